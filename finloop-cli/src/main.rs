mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{handlers, workflow_handlers};

#[derive(Parser)]
#[command(name = "finloop")]
#[command(version = "0.1.0")]
#[command(about = "Confidence-gated financial workflows with human review")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow against the simulated collaborators
    ///
    /// Parameters are passed as key=value pairs; values that parse as JSON
    /// (numbers, booleans, arrays) are kept typed, anything else is a string.
    ///
    /// When the run stops at a review checkpoint the pending request is printed
    /// and the decision is read from stdin, unless --decision answers it.
    ///
    /// Examples:
    ///   finloop run compliance kyc --user user_demo
    ///   finloop run trading buy -p size=0.05 -p stop_loss=45000
    ///   finloop run human_review general_operation -p confidence=0.4 --decision reject
    Run {
        /// Workflow kind (compliance, risk_assessment, customer_service, human_review, trading)
        workflow: String,

        /// Operation type selecting the workflow branch
        operation: String,

        /// Acting user id
        #[arg(short, long, default_value = "user_demo")]
        user: String,

        /// Workflow parameter as key=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Answer any review checkpoint automatically (approve or reject)
        #[arg(long)]
        decision: Option<String>,

        /// Reviewer identity used for signals sent from this command
        #[arg(long, default_value = "cli-operator")]
        approver: String,

        /// Reviewer comment attached to the signal
        #[arg(long)]
        comment: Option<String>,

        /// Path to configuration file
        #[arg(long)]
        config_file: Option<String>,

        /// Output the result envelope as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate the confidence gate for a decision without running a workflow
    Gate {
        /// Operation type to look up in the threshold tables
        operation: String,

        /// Confidence of the automated decision (0.0 - 1.0)
        confidence: f64,

        /// Monetary value of the operation
        #[arg(short, long, default_value = "0")]
        value: f64,

        /// Risk level (low, medium, high)
        #[arg(short, long, default_value = "low")]
        risk: String,

        /// Force a human review
        #[arg(long)]
        force: bool,

        /// Path to configuration file
        #[arg(long)]
        config_file: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List registered workflows and their operation types
    Workflows {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Configure finloop settings
    Config {
        /// Start interactive configuration setup
        #[arg(long)]
        init: bool,

        /// Print the effective configuration and threshold warnings
        #[arg(long)]
        show: bool,

        /// Path to configuration file
        #[arg(long, default_value = "~/.config/finloop/config.toml")]
        config_file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            operation,
            user,
            params,
            decision,
            approver,
            comment,
            config_file,
            json,
        } => {
            let options = workflow_handlers::RunOptions {
                decision,
                approver,
                comment,
                config_file,
                json,
            };
            workflow_handlers::handle_run(workflow, operation, user, params, options).await?;
        }
        Commands::Gate {
            operation,
            confidence,
            value,
            risk,
            force,
            config_file,
            json,
        } => {
            handlers::handle_gate(operation, confidence, value, risk, force, config_file, json)?;
        }
        Commands::Workflows { json } => {
            workflow_handlers::handle_workflow_list(json)?;
        }
        Commands::Config {
            init,
            show,
            config_file,
        } => {
            if init {
                handlers::handle_config_init(config_file).await?;
            } else if show {
                handlers::handle_config_show(config_file)?;
            } else {
                println!("Config command requires --init or --show");
                println!("Usage: finloop config --init|--show [--config-file PATH]");
            }
        }
    }

    Ok(())
}
