mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyxom-cli")]
#[command(about = "Pyxom CLI - Validate, run and grade Python submissions locally", long_about = None)]
struct Cli {
    /// Sandbox backend (process or docker). Defaults to SANDBOX_BACKEND.
    #[arg(long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission against an exercise
    Grade {
        /// Exercise JSON: a single exercise or a catalog with an "exercises" array
        #[arg(short, long)]
        exercise: PathBuf,

        /// Exercise id, required when the file is a catalog
        #[arg(long)]
        id: Option<String>,

        /// Python source file
        #[arg(short, long)]
        code: PathBuf,

        /// Include on-request hints
        #[arg(long, default_value = "false")]
        request_hints: bool,

        /// Print the redacted attempt as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Run only the security gate
    Validate {
        /// Python source file
        #[arg(short, long)]
        code: PathBuf,
    },

    /// Execute a submission once and print its output
    Run {
        /// Python source file
        #[arg(short, long)]
        code: PathBuf,

        /// File fed to the program as stdin
        #[arg(short, long)]
        stdin: Option<PathBuf>,

        /// Execution timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.backend.as_deref())?;

    match cli.command {
        Commands::Grade {
            exercise,
            id,
            code,
            request_hints,
            json,
        } => {
            let passed =
                commands::grade(&config, &exercise, id.as_deref(), &code, request_hints, json).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Validate { code } => {
            if !commands::validate(&code)? {
                std::process::exit(1);
            }
        }
        Commands::Run {
            code,
            stdin,
            timeout_ms,
        } => {
            commands::run(&config, &code, stdin.as_deref(), timeout_ms).await?;
        }
    }

    Ok(())
}
