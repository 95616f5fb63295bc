//! Logging service

use crate::models::LogLevel;
use serde_json::{Map, Value};

/// Initialize logging with the specified level
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match level {
        LogLevel::Error => "finloop=error,finloop_core=error",
        LogLevel::Warn => "finloop=warn,finloop_core=warn",
        LogLevel::Info => "finloop=info,finloop_core=info",
        LogLevel::Debug => "finloop=debug,finloop_core=debug",
        LogLevel::Trace => "finloop=trace,finloop_core=trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()?;

    Ok(())
}

/// Log a best-effort compensation
pub fn log_compensation(action_type: &str, payload: &Map<String, Value>) {
    let payload = Value::Object(payload.clone());
    tracing::info!(
        action_type = action_type,
        payload = %payload,
        "Compensating action"
    );
}

/// Log an operational alert (alert delivery itself lives outside the core)
pub fn log_alert(conversation_id: &str, level: &str, message: &str) {
    if level == "critical" {
        tracing::error!(
            conversation_id = conversation_id,
            level = level,
            alert = message,
            "Alert triggered"
        );
    } else {
        tracing::warn!(
            conversation_id = conversation_id,
            level = level,
            alert = message,
            "Alert triggered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_logging() {
        INIT.call_once(|| {
            let _ = init_logging(LogLevel::Info);
        });
    }

    #[test]
    fn test_logging_initialization() {
        // A second init reports an error instead of panicking
        let _ = init_logging(LogLevel::Info);
        let _ = init_logging(LogLevel::Debug);
    }

    #[test]
    fn test_log_functions() {
        init_test_logging();

        let mut payload = Map::new();
        payload.insert("lock_id".to_string(), Value::from("lock_1"));
        log_compensation("funds_lock", &payload);
        log_alert("conv_1", "critical", "High overall risk detected");
        log_alert("conv_1", "info", "Portfolio rebalancing recommended");
    }
}
