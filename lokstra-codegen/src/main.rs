//! `lokstra-codegen` CLI
//!
//! Runs the annotation processor over a source root. Exits non-zero when any
//! folder failed; the other folders are still processed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lokstra_codegen::scanner::{run, ScanOptions};

#[derive(Parser, Debug)]
#[command(name = "lokstra-codegen", about = "Generate lokstra registration files from annotated sources")]
struct Args {
    /// Source root to scan
    #[arg(default_value = "src")]
    root: PathBuf,

    /// Worker count (defaults to twice the hardware threads)
    #[arg(long)]
    workers: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let opts = ScanOptions {
        root: args.root,
        workers: args.workers,
    };
    match run(&opts) {
        Ok(report) => {
            let (updated, skipped): (usize, usize) = report
                .folders
                .iter()
                .fold((0, 0), |(u, s), f| (u + f.updated, s + f.skipped));
            tracing::info!(
                folders = report.folders.len(),
                updated,
                skipped,
                failed = report.failed(),
                "scan complete"
            );
            if report.ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "scan aborted");
            ExitCode::FAILURE
        }
    }
}
