//! CLI command handlers

use anyhow::{anyhow, Context, Result};
use finloop_core::models::configuration::{Configuration, LogLevel};
use finloop_core::models::workflow::RiskLevel;
use finloop_core::services::business::Collaborators;
use finloop_core::workflow::definitions::builtin;
use finloop_core::workflow::gate::ConfidenceGate;
use finloop_core::workflow::validator::WorkflowValidator;
use std::io::{self, Write};
use std::path::PathBuf;

/// Expand `~/` and fall back to the XDG default when no path is given
pub fn resolve_config_path(config_file: Option<&str>) -> Result<PathBuf> {
    match config_file {
        Some(path) if path.starts_with("~/") => {
            let home = std::env::var("HOME")
                .map_err(|_| anyhow!("HOME environment variable not set"))?;
            Ok(PathBuf::from(path.replacen("~/", &format!("{}/", home), 1)))
        }
        Some(path) => Ok(PathBuf::from(path)),
        None => Configuration::default_config_path(),
    }
}

/// Load and validate the configuration; a missing file yields the defaults
pub fn load_config(config_file: Option<&str>) -> Result<Configuration> {
    let path = resolve_config_path(config_file)?;
    let config = Configuration::load_from_file(&path)?;

    if let Err(errors) = config.validate() {
        return Err(anyhow!(
            "Invalid configuration {}:\n  - {}",
            path.display(),
            errors.join("\n  - ")
        ));
    }
    Ok(config)
}

pub(crate) fn read_user_input_sync() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_line(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

fn log_level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Handle the 'gate' command
pub fn handle_gate(
    operation: String,
    confidence: f64,
    value: f64,
    risk: String,
    force: bool,
    config_file: Option<String>,
    json: bool,
) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(anyhow!("Confidence must be within 0.0..=1.0"));
    }
    if !value.is_finite() {
        return Err(anyhow!("Value must be a finite number"));
    }

    let config = load_config(config_file.as_deref())?;
    let gate = ConfidenceGate::new(config.thresholds);
    let risk_level = RiskLevel::parse(&risk);
    let decision = gate.evaluate(&operation, confidence, value, risk_level, force);

    if json {
        let output = serde_json::json!({
            "operation_type": operation,
            "requires_review": decision.requires_review,
            "reason": decision.reason,
            "confidence_threshold": gate.confidence_threshold(&operation),
            "value_threshold": gate.value_threshold(&operation),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match &decision.reason {
        Some(reason) => {
            println!("👤 Human review required");
            println!("   Reason: {}", reason);
        }
        None => println!("🤖 Auto-approved: high confidence and within thresholds"),
    }
    println!(
        "   Confidence threshold: {:.2}",
        gate.confidence_threshold(&operation)
    );
    println!("   Value threshold: {:.2}", gate.value_threshold(&operation));

    Ok(())
}

/// Handle the 'config --show' command
pub fn handle_config_show(config_file: String) -> Result<()> {
    let config = load_config(Some(&config_file))?;
    let content = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{}", content);

    let definitions = builtin(&Collaborators::simulated(), &config.thresholds);
    let validation = WorkflowValidator::validate_definitions(&config, &definitions);
    for warning in &validation.warnings {
        println!("⚠️  {}", warning);
    }
    Ok(())
}

/// Handle the 'config --init' command
pub async fn handle_config_init(config_file: String) -> Result<()> {
    println!("⚙️  Initializing finloop configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = resolve_config_path(Some(&config_file))?;
    println!("📄 Config file: {}", config_path.display());

    let mut config = if config_path.exists() {
        println!("⚠️  Configuration file already exists. Loading existing values...");
        Configuration::load_from_file(&config_path).context("Failed to load existing config")?
    } else {
        println!("✨ Creating new configuration with defaults...");
        Configuration::default()
    };

    println!("\n📝 Please answer the following questions (press Enter to use default):\n");

    print!(
        "Approval timeout in seconds [{}]: ",
        config.approval_timeout_seconds
    );
    io::stdout().flush()?;
    let timeout_input = read_user_input_sync()?;
    if !timeout_input.trim().is_empty() {
        match timeout_input.trim().parse::<u64>() {
            Ok(timeout) => config.approval_timeout_seconds = timeout,
            Err(_) => println!("⚠️  Invalid timeout value, using default"),
        }
    }

    print!("Review floor for recorded decisions [{}]: ", config.review_floor);
    io::stdout().flush()?;
    let floor_input = read_user_input_sync()?;
    if !floor_input.trim().is_empty() {
        match floor_input.trim().parse::<f64>() {
            Ok(floor) => config.review_floor = floor,
            Err(_) => println!("⚠️  Invalid review floor, using default"),
        }
    }

    print!(
        "Log level (error/warn/info/debug/trace) [{}]: ",
        log_level_name(config.log_level)
    );
    io::stdout().flush()?;
    let log_level_input = read_user_input_sync()?;
    if !log_level_input.trim().is_empty() {
        config.log_level = match log_level_input.trim().to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => {
                println!("⚠️  Invalid log level, using default");
                config.log_level
            }
        };
    }

    print!(
        "Decision store file (empty for in-memory) [{}]: ",
        store_description(&config)
    );
    io::stdout().flush()?;
    let store_input = read_user_input_sync()?;
    if !store_input.trim().is_empty() {
        config.audit_store_path = Some(PathBuf::from(store_input.trim()));
    }

    println!("\n🔍 Validating configuration...");
    match config.validate() {
        Ok(()) => println!("✅ Configuration is valid"),
        Err(errors) => {
            println!("❌ Configuration validation failed:");
            for error in &errors {
                println!("   - {}", error);
            }
            return Err(anyhow!("Configuration validation failed"));
        }
    }

    println!("\n💾 Saving configuration to {}...", config_path.display());
    config
        .save_to_file(&config_path)
        .context("Failed to save configuration")?;

    println!("✅ Configuration saved successfully!");
    println!("\n📋 Configuration summary:");
    println!("   Approval timeout: {} seconds", config.approval_timeout_seconds);
    println!("   Review floor: {}", config.review_floor);
    println!("   Log level: {}", log_level_name(config.log_level));
    println!("   Decision store: {}", store_description(&config));

    Ok(())
}

fn store_description(config: &Configuration) -> String {
    config
        .audit_store_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "in-memory".to_string())
}
