//! sift command-line driver
//!
//! Runs the metadata retention analysis over a program manifest and
//! reports which types and members keep reflection metadata.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{AnalysisArgs, OutputFormat, Session};
use output::{resolve_color_choice, StyledOutput};

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Reflection metadata retention for ahead-of-time compilation", long_about = None)]
#[command(version)]
struct Cli {
    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and print the retention plan
    Analyze {
        #[command(flatten)]
        args: AnalysisArgs,
        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: OutputFormat,
        /// Also write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show what a type (`Ns.Type`) or member (`Ns.Type::Name(sig)`) kept
    Query {
        #[command(flatten)]
        args: AnalysisArgs,
        /// Type or member to look up
        target: String,
    },

    /// Print the plan digest
    Digest {
        #[command(flatten)]
        args: AnalysisArgs,
        /// Fail unless the digest equals this value
        #[arg(long)]
        expect: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // Logging is opt-in through SIFT_LOG
    if let Ok(filter) = EnvFilter::try_from_env("SIFT_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let mut out = StyledOutput::new(resolve_color_choice(cli.color.as_deref()));

    match cli.command {
        Commands::Analyze {
            args,
            format,
            output,
        } => {
            let session = Session::open(&args)?;
            commands::analyze::execute(&session, format, output.as_deref(), &mut out)
        }
        Commands::Query { args, target } => {
            let session = Session::open(&args)?;
            commands::query::execute(&session, &target, &mut out)
        }
        Commands::Digest { args, expect } => {
            let session = Session::open(&args)?;
            commands::digest::execute(&session, expect.as_deref(), &mut out)
        }
    }
}
