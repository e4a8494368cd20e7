//! FileCheck-style tests for individual TIR files.
//!
//! The dynamic runner covers every file; these name the important ones so a
//! failure points straight at the scenario.

use std::fs;
use std::path::Path;
use wqm::test_ir::{TestRunner, TestSpec};

/// Test helper that runs a TIR file through FileCheck validation
fn run_filecheck_test(tir_file: &str) {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetest").join(tir_file);
    let contents = fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    let spec =
        TestSpec::parse(&contents).unwrap_or_else(|e| panic!("Failed to parse test spec from {}: {}", tir_file, e));

    let runner = TestRunner::new(false);
    runner.run_test(&spec).unwrap_or_else(|e| panic!("Test {} failed: {}", tir_file, e));
}

#[test]
fn test_noop_filecheck() {
    run_filecheck_test("noop.tir");
}

#[test]
fn test_uniform_only_filecheck() {
    run_filecheck_test("uniform_only.tir");
}

#[test]
fn test_diamond_filecheck() {
    run_filecheck_test("diamond.tir");
}

#[test]
fn test_flag_save_filecheck() {
    run_filecheck_test("flag_save.tir");
}

#[test]
fn test_flag_avoid_filecheck() {
    run_filecheck_test("flag_avoid.tir");
}

#[test]
fn test_else_invert_filecheck() {
    run_filecheck_test("else_invert.tir");
}
