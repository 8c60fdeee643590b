//! Orchestrates the four-step control flow of spec.md §2: open the store
//! read-only, run the diff pass (relation resolver pre-scan, then
//! node/way/relation diffing) and write the `.adiff.xml`, then reopen
//! read-write and run the write-handler pass, committing or aborting per
//! `--commit`.

use crate::args::Args;
use crate::osc;
use anyhow::{Context, Result};
use log::info;
use onramp_store::diff::emitter::DiffEmitter;
use onramp_store::diff::handler::DiffHandler;
use onramp_store::diff::relation_resolver::RelationResolver;
use onramp_store::engine::bitcask::BitCask;
use onramp_store::event::ChangeEvent;
use onramp_store::schema::{REPLICATION_TIMESTAMP_KEY, SEQUENCE_NUMBER_KEY};
use onramp_store::txn::{Env, Metadata};
use onramp_store::write_handler::WriteHandler;
use std::path::Path;

pub fn run(args: &Args) -> Result<()> {
    info!("reading change file {}", args.change_file.display());
    let events = osc::read_change_file(&args.change_file)?;
    info!("parsed {} change events", events.len());

    let engine = BitCask::new(args.database_path.clone())
        .with_context(|| format!("opening store at {}", args.database_path.display()))?;
    let env = Env::new(engine);

    let doc = {
        let mut ro_txn = env.begin_ro().context("beginning diff-pass read transaction")?;

        let mut resolver = RelationResolver::new();
        for event in &events {
            resolver.observe(event);
        }

        let mut handler = DiffHandler::new(&mut ro_txn);
        for event in &events {
            match event {
                ChangeEvent::Node(node) => handler.on_node(node)?,
                ChangeEvent::Way(way) => handler.on_way(way)?,
                // Relations are all driven through the resolver below, so
                // each one sees the fully-populated node/way maps
                // regardless of where it appears in the change stream.
                ChangeEvent::Relation(_) => {}
            }
        }
        resolver.flush_incomplete(&mut handler).context("resolving incomplete relations")?;

        DiffEmitter::emit(handler)
    };

    let output_path = Path::new(".").join(format!("{}.adiff.xml", args.seq_number));
    crate::adiff::write_diff(&output_path, &args.timestamp, &doc)
        .with_context(|| format!("writing {}", output_path.display()))?;
    info!("wrote {}", output_path.display());

    let mut rw_txn = env.begin_rw().context("beginning write-pass transaction")?;
    {
        let mut handler = WriteHandler::new(&mut rw_txn);
        for event in &events {
            handler.apply(event)?;
        }
    }

    if args.commit {
        let mut metadata = Metadata::new(&mut rw_txn);
        metadata.put(SEQUENCE_NUMBER_KEY, &args.seq_number.to_string())?;
        metadata.put(REPLICATION_TIMESTAMP_KEY, &args.timestamp)?;
        rw_txn.commit().context("committing write transaction")?;
        info!("committed sequence {}", args.seq_number);
    } else {
        rw_txn.abort();
        info!("dry run: write transaction aborted, store left unchanged");
    }

    Ok(())
}
