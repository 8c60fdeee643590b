//! Synchronous stderr logging setup.
//!
//! Mirrors the teacher's `kv-cli::trace` module's `fern`-based dispatch
//! and timestamped line format, but with the non-blocking rolling-file
//! appender dropped: `onramp` runs once and exits, there is no long-lived
//! process to rotate logs for, so a single synchronous stderr sink is all
//! spec.md §6's `--verbose` flag needs.

use anyhow::Result;
use log::LevelFilter;

/// `--verbose` raises the level from `warn` to `info`.
pub fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { LevelFilter::Info } else { LevelFilter::Warn };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
