//! CLI argument parsing: `onramp DATABASE_PATH CHANGE_FILE SEQ_NUMBER
//! TIMESTAMP [--verbose] [--commit]`, per spec.md §6. `clap`'s derive
//! `Parser`, the same crate the teacher's `kv-cli` uses, though this tool
//! has no subcommands and no REPL — it runs once and exits.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, PartialEq)]
#[command(name = "onramp", version, about = "Apply an OSM change file and emit an augmented diff")]
pub struct Args {
    /// Path to the embedded KV store's log file (created if absent).
    pub database_path: PathBuf,

    /// Path to the OSM change file (.osc) to apply.
    pub change_file: PathBuf,

    /// Replication sequence number this change file corresponds to.
    pub seq_number: u64,

    /// ISO-8601 timestamp of the change file, recorded as the diff's
    /// `osm_base` and, on `--commit`, as store metadata.
    pub timestamp: String,

    /// Emit progress lines to stderr.
    #[clap(long)]
    pub verbose: bool,

    /// Commit the write transaction. Without this flag the run is a dry
    /// run: the diff is still written, but the store is left untouched.
    #[clap(long)]
    pub commit: bool,
}
