use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const DSN: &[u8] = include_bytes!("../../dmarc-dsn/data/dsn_failed.eml");

fn run(args: &[&str], data_dir: Option<&Path>, input: &[u8]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dmarc-dsn-processor"));
    cmd.args(args)
        .env_remove("DATA_DIR")
        .env_remove("VERBOSE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = data_dir {
        cmd.env("DATA_DIR", dir);
    }
    let mut child = cmd.spawn().unwrap();
    // The process may exit before reading its input
    let _ = child.stdin.take().unwrap().write_all(input);
    child.wait_with_output().unwrap()
}

#[test]
fn missing_queue_id() {
    let output = run(&[], None, b"");
    k9::assert_equal!(output.status.code(), Some(1));
}

#[test]
fn missing_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let output = run(&["Q1", "", missing.to_str().unwrap()], None, DSN);
    k9::assert_equal!(output.status.code(), Some(1));
}

#[test]
fn records_bounce() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&["Q1"], Some(dir.path()), DSN);
    k9::assert_equal!(output.status.code(), Some(0));

    let log = std::fs::read_to_string(dir.path().join("domains/example.org")).unwrap();
    k9::assert_equal!(log.lines().count(), 1);
    assert!(log.contains("\"orig_rcpt\":\"dmarc-reports@example.org\""));
}

#[test]
fn data_dir_argument_wins() {
    let env_dir = tempfile::tempdir().unwrap();
    let arg_dir = tempfile::tempdir().unwrap();
    let output = run(
        &["Q2", "", arg_dir.path().to_str().unwrap()],
        Some(env_dir.path()),
        b"Subject: not a bounce\n\nhello\n",
    );
    k9::assert_equal!(output.status.code(), Some(0));
    assert!(arg_dir.path().join("saved/Q2.no_dsn_details").exists());
    assert!(!env_dir.path().join("saved").exists());
}
