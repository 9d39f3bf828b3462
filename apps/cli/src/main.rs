//! Pagesmith CLI - generate and check websites from natural-language requests
//!
//! This CLI provides a `pagesmith` command that drives the generation engine
//! against a project directory, and checks saved model responses offline.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::check::{self, CheckOptions};
use commands::generate::{self, GenerateOptions};

/// Pagesmith - website generation with validated, retried model output
#[derive(Parser, Debug)]
#[command(
    name = "pagesmith",
    author,
    version,
    about = "Pagesmith - website generation from natural-language requests",
    long_about = "Pagesmith asks a language model for website files, validates every file block it streams back,\nand retries with feedback until the answer passes or the time budget runs out."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate or update a website
    ///
    /// Streams the model's answer, writes the validated files into the
    /// project directory and prints progress as it goes.
    Generate {
        /// What to build or change
        request: String,

        /// Project directory
        #[arg(short, long)]
        project: PathBuf,

        /// Config file (TOML with [model] and [engine] sections)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Base URL of the Ollama-compatible server
        #[arg(long)]
        base_url: Option<String>,

        /// Wall-clock budget for the whole run in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Prior conversation turns as JSON
        #[arg(long)]
        history: Option<PathBuf>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Check a saved model response
    ///
    /// Extracts and validates the file blocks of a response offline and
    /// prints the verdict as JSON. Exits non-zero if the response fails.
    Check {
        /// File containing the response text
        response: PathBuf,

        /// Require the scaffold files (entry page, stylesheet, app script)
        #[arg(long)]
        scaffold: bool,

        /// Treat the project as already having files
        #[arg(long)]
        existing: bool,

        /// Files are optional (question rather than change request)
        #[arg(long)]
        optional: bool,

        /// Config file for validation limits and scaffold paths
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ok = match args.command {
        Command::Generate { request, project, config, model, base_url, deadline_secs, history, json } => {
            generate::execute(GenerateOptions {
                request,
                project,
                config,
                model,
                base_url,
                deadline_secs,
                history,
                json,
            })
            .await?
        }
        Command::Check { response, scaffold, existing, optional, config } => {
            check::execute(&CheckOptions { response, scaffold, existing, optional, config })?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
