use std::fs::OpenOptions;
use std::sync::Mutex;
use anyhow::{anyhow, Context};
use tracing::Level;

/// Installs the global `tracing` subscriber for the binaries: INFO, or DEBUG if `verbose`.
///  With a `log_file`, output is appended to that file instead of going to stdout.
pub fn init_logging(verbose: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {:?}", path))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    }
        .map_err(|e| anyhow!("initializing logging: {}", e))
}
