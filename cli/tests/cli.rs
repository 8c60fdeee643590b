//! End-to-end scenarios against the built `onramp` binary, driven the way
//! the teacher's `kv-cli` integration tests drive `kv-cli`: `assert_cmd`
//! spawning the real binary, `assert_fs`/`tempfile` for a throwaway
//! database directory and change file.

use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;

const CHANGE_FILE: &str = r#"<osmChange version="0.6">
    <create>
        <node id="1" version="1" changeset="10" uid="5" user="alice" timestamp="2020-01-01T00:00:00Z" lat="1.0" lon="2.0">
            <tag k="amenity" v="cafe"/>
        </node>
    </create>
</osmChange>"#;

fn write_change_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("001.osc");
    fs::write(&path, CHANGE_FILE).unwrap();
    path
}

/// Scenario 5 (spec.md §8): a dry run (no `--commit`) writes the full
/// `.adiff.xml` but leaves the store untouched, and is idempotent across
/// repeated invocations on the same change file.
#[test]
fn dry_run_is_idempotent_and_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("onramp.db");
    let change_file = write_change_file(dir.path());
    let workdir = tempfile::tempdir().unwrap();

    let run = || {
        let mut cmd = Command::cargo_bin("onramp").unwrap();
        cmd.current_dir(workdir.path())
            .arg(&db_path)
            .arg(&change_file)
            .arg("1")
            .arg("2020-01-01T00:00:00Z");
        cmd.assert().success();
    };

    run();
    let first_diff = fs::read_to_string(workdir.path().join("1.adiff.xml")).unwrap();
    assert!(first_diff.contains("action type=\"create\""));
    assert!(!db_path.exists() || fs::metadata(&db_path).unwrap().len() == 0);

    run();
    let second_diff = fs::read_to_string(workdir.path().join("1.adiff.xml")).unwrap();
    assert_eq!(first_diff, second_diff);
}

/// Scenario 6 (spec.md §8): after `--commit`, the store's metadata
/// records the sequence number and timestamp the CLI was invoked with.
#[test]
fn commit_records_sequence_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("onramp.db");
    let change_file = write_change_file(dir.path());
    let workdir = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("onramp").unwrap();
    cmd.current_dir(workdir.path())
        .arg(&db_path)
        .arg(&change_file)
        .arg("42")
        .arg("2020-06-15T12:00:00Z")
        .arg("--commit");
    cmd.assert().success();

    let engine = onramp_store::engine::bitcask::BitCask::new(db_path).unwrap();
    let env = onramp_store::txn::Env::new(engine);
    let mut txn = env.begin_ro().unwrap();
    let mut metadata = onramp_store::txn::Metadata::new(&mut txn);

    assert_eq!(
        metadata.get(onramp_store::schema::SEQUENCE_NUMBER_KEY).unwrap(),
        Some("42".to_string())
    );
    assert_eq!(
        metadata.get(onramp_store::schema::REPLICATION_TIMESTAMP_KEY).unwrap(),
        Some("2020-06-15T12:00:00Z".to_string())
    );
}

#[test]
fn missing_change_file_exits_with_io_error_code() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("onramp.db");

    let mut cmd = Command::cargo_bin("onramp").unwrap();
    cmd.arg(&db_path)
        .arg(dir.path().join("does-not-exist.osc"))
        .arg("1")
        .arg("2020-01-01T00:00:00Z");
    cmd.assert().failure().code(2);
}

#[test]
fn missing_arguments_exit_with_usage_error_code() {
    let mut cmd = Command::cargo_bin("onramp").unwrap();
    cmd.arg("only-one-arg");
    cmd.assert().failure().code(1);
}
