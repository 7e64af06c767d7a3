//! Replay a captured oplog onto a MongoDB host.
//!
//! The oplog bytes come from stdin by default, or from a file:
//! ```bash
//! mongodump --host source -d local -c oplog.rs --out - | oplog-replay --host target
//! oplog-replay --file oplog.bson --host target --mode fixed --speed 500
//! oplog-replay --file oplog.bson --speed -1        # as fast as possible
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tokio::io::AsyncRead;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oplog_replay::{controller_for, replay_oplog, ApplySink, MongoSink, ReplayMode};

#[derive(Parser)]
#[command(author, version, about = "Replay a captured MongoDB oplog against a live server")]
struct Cli {
    #[arg(
        short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Playback speed: a multiplier over the original timing in relative
    /// mode (-1 or 0 means as fast as possible), operations per second in
    /// fixed mode.
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    speed: f64,

    /// Pacing policy.
    #[arg(long, value_enum, default_value_t = Mode::Relative)]
    mode: Mode,

    /// Mongo host to play back onto. Bare hosts get a mongodb:// scheme;
    /// full connection URIs pass through as-is.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Turn updates that match no document into inserts instead of failures.
    #[arg(long)]
    always_upsert: bool,

    /// Read the oplog from this file instead of stdin.
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Number of times to retry the whole replay after a failure. Only
    /// useful with --file; stdin cannot be rewound.
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Fixed,
    Relative,
}

impl From<Mode> for ReplayMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Fixed => ReplayMode::Fixed,
            Mode::Relative => ReplayMode::Relative,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let sink: Arc<dyn ApplySink> = Arc::new(MongoSink::connect(&cli.host, cli.always_upsert).await?);
    run(&cli, sink).await
}

/// Attempt the replay, including retries. Factored out to facilitate unit
/// testing against a mock sink.
async fn run(cli: &Cli, sink: Arc<dyn ApplySink>) -> Result<()> {
    let mut attempts_left = cli.retries + 1;
    loop {
        let input = open_input(cli.file.as_deref()).await?;
        let controller = controller_for(cli.mode.into(), cli.speed)?;

        match replay_oplog(input, controller, sink.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempts_left -= 1;
                if attempts_left == 0 {
                    return Err(err.into());
                }
                warn!("replay failed ({err}); retrying, {attempts_left} attempt(s) left");
                if cli.file.is_none() {
                    info!("stdin is already consumed; the retry will see an empty stream");
                }
            }
        }
    }
}

async fn open_input(file: Option<&std::path::Path>) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
    match file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdin())),
    }
}
