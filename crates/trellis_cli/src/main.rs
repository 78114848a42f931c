//! TRELLIS CLI
//!
//! Validate, compose and run machines, and talk to tool servers.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;
mod config;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use config::CliConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "TRELLIS - schema-guarded state machines with composable hats", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `trellis=debug`
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a machine definition and its schema references
    Validate {
        /// Machine document
        #[arg(short, long)]
        machine: PathBuf,
    },
    /// Apply hats and print the composed machine
    Compose {
        /// Machine document
        #[arg(short, long)]
        machine: PathBuf,
    },
    /// Start a tool server and print its catalogue
    Tools {
        /// Server executable
        #[arg(long)]
        command: String,
        /// Server argument (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Call one tool on a tool server
    Call {
        /// Server executable
        #[arg(long)]
        command: String,
        /// Server argument (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Tool name
        #[arg(long)]
        tool: String,
        /// Tool arguments (JSON object)
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
    /// Run a machine with one starting event
    Run {
        /// Machine document
        #[arg(short, long)]
        machine: PathBuf,
        /// Event document
        #[arg(short, long)]
        event: PathBuf,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn init_logging(config: &CliConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("trellis=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(filter) = cli.log_filter {
        config = config.with_log_filter(filter);
    }
    init_logging(&config);

    match cli.command {
        Commands::Validate { machine } => {
            let machine = commands::load_machine(&machine)?;
            let problems = commands::validate(&machine);
            if problems.is_empty() {
                println!("{} {}: ok", machine.id, machine.version);
                Ok(())
            } else {
                for problem in &problems {
                    eprintln!("{}", problem);
                }
                Err(eyre!("{} problem(s) in {}", problems.len(), machine.id))
            }
        }
        Commands::Compose { machine } => {
            let machine = commands::load_machine(&machine)?;
            let (composed, report) = commands::compose(machine, &config).await?;
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("{}", composed.to_json_pretty()?);
            Ok(())
        }
        Commands::Tools { command, args } => {
            let tools = commands::tools(config.bridge_for(&command, &args)).await?;
            print_json(&tools)
        }
        Commands::Call {
            command,
            args,
            tool,
            arguments,
        } => {
            let arguments = commands::parse_json(&arguments)?;
            let result = commands::call(config.bridge_for(&command, &args), &tool, arguments).await?;
            print_json(&result)
        }
        Commands::Run {
            machine,
            event,
            timeout_secs,
        } => {
            if let Some(secs) = timeout_secs {
                config = config.with_run_timeout(Duration::from_secs(secs));
            }
            let machine = commands::load_machine(&machine)?;
            let event = commands::load_event(&event)?;
            let report = commands::run(machine, event, &config).await?;
            print_json(&report)?;
            match report.error {
                None => Ok(()),
                Some(error) => Err(eyre!("run did not complete: {}", error)),
            }
        }
    }
}
