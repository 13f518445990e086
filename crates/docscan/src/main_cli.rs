//! docscan CLI: drive SCSI document scanners and the built-in simulator.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use clap::Parser;
use docscan_lib::transport::CancelFlag;

mod cli;

/// Cleared by the Ctrl+C handler; the acquisition loop cancels the batch.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

/// Cancel flag of the scanner currently acquiring. Ctrl+C sets it so a
/// `read` waiting on the device returns without another call.
pub static ACTIVE_SCAN: Mutex<Option<CancelFlag>> = Mutex::new(None);

#[derive(Parser)]
#[command(
    name = "docscan-cli",
    version,
    about = "Acquire pages, thumbnails and decoded codes from SCSI document scanners"
)]
struct Args {
    /// Output as JSON (for models, sense, config, simulate, scan)
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: cli::Command,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    #[cfg(not(windows))]
    {
        ctrlc::set_handler(move || {
            RUNNING.store(false, Ordering::SeqCst);
            if let Some(flag) = ACTIVE_SCAN
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
            {
                flag.request();
            }
        })
        .ok();
    }

    if let Err(e) = cli::run(args.command, args.json, args.config.as_deref()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
