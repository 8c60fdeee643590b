//! `onramp` entry point: apply an OSM change file against the embedded
//! store and emit an augmented diff, per spec.md §6/§7.
//!
//! No REPL, no async runtime — this is a one-shot CLI, so `main` is a
//! thin dispatcher over [`onramp_cli::run::run`] with the process exit
//! code spec.md's exit-code table requires: 0 on success, 1 on a usage
//! error (bad arguments), 2 on any I/O, parse, or store error.

use clap::Parser;
use onramp_cli::args::Args;
use onramp_cli::{run, trace};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap already printed usage/help to stderr.
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    if let Err(err) = trace::init_logging(args.verbose) {
        eprintln!("error: failed to initialize logging: {err:#}");
        return ExitCode::from(2);
    }

    if let Err(err) = run::run(&args) {
        eprintln!("error: {err:#}");
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}
