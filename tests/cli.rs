//! Command-line tools run against grammar files written to a temporary directory.

mod common;

use common::uplink_ack_block;
use std::path::PathBuf;
use std::process::Command;

const DEMO: &str = include_str!("../demos/packet_uplink_ack.csn");

fn write_grammar(dir: &tempfile::TempDir, name: &str, src: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, src).expect("write grammar");
    path
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[test]
fn lint_reports_errors_with_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bad = write_grammar(&dir, "bad.csn", "table T { u: union { x: bit; }; }");
    let out = Command::new(env!("CARGO_BIN_EXE_csn1_lint")).arg(&bad).output().expect("run csn1_lint");
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("[union-size]"), "{}", stdout);
}

#[test]
fn lint_accepts_clean_grammar() {
    let dir = tempfile::tempdir().expect("tempdir");
    let good = write_grammar(&dir, "demo.csn", DEMO);
    let out = Command::new(env!("CARGO_BIN_EXE_csn1_lint")).arg(&good).output().expect("run csn1_lint");
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn decode_prints_dump() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_grammar(&dir, "demo.csn", DEMO);
    let out = Command::new(env!("CARGO_BIN_EXE_csn1_decode"))
        .arg(&path)
        .args(["--table", "PacketUplinkAck"])
        .arg(hex(&uplink_ack_block()))
        .output()
        .expect("run csn1_decode");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("= final ack indication: 1"), "{}", stdout);
    assert!(stdout.contains("global TFI:"), "{}", stdout);
    assert!(stdout.ends_with("remaining bits: 0\n"), "{}", stdout);
}

#[test]
fn decode_failure_exits_nonzero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_grammar(&dir, "demo.csn", DEMO);
    let out = Command::new(env!("CARGO_BIN_EXE_csn1_decode"))
        .arg(&path)
        .args(["--table", "PacketUplinkAck", "ff00"])
        .output()
        .expect("run csn1_decode");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("csn1 error: general error"), "{}", stderr);
}

#[test]
fn decode_walks_segments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_grammar(&dir, "demo.csn", DEMO);
    // SegA(a = 5), SegB(len = 0), then zero fill
    let out = Command::new(env!("CARGO_BIN_EXE_csn1_decode"))
        .arg(&path)
        .args(["--segments", "SegA,SegB", "4580"])
        .output()
        .expect("run csn1_decode");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("== SegA [bits 0..8]"), "{}", stdout);
    assert!(stdout.contains("== SegB [bits 8..13]"), "{}", stdout);
    assert!(stdout.ends_with("remaining bits: 3\n"), "{}", stdout);
}
