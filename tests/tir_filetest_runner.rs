//! Dynamic test runner for TIR filetest files.
//!
//! Discovers every .tir file under tests/filetest and runs it through the
//! check module's TestRunner.

use std::fs;
use std::path::{Path, PathBuf};
use wqm::test_ir::{TestRunner, TestSpec};

/// Discovers all .tir files in a directory recursively
fn discover_tir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(discover_tir_files(&path));
            } else if path.extension().and_then(|s| s.to_str()) == Some("tir") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

fn run_tir_file(path: &Path) -> Result<(), String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let spec = TestSpec::parse(&content)?;
    TestRunner::new(false).run_test(&spec)
}

#[test]
fn run_all_tir_files() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetest");
    let files = discover_tir_files(&dir);
    assert!(!files.is_empty(), "no .tir files found in {}", dir.display());

    let mut failures = Vec::new();
    for file in files {
        let relative = file.strip_prefix(&dir).unwrap_or(&file);
        print!("Running {}... ", relative.display());
        match run_tir_file(&file) {
            Ok(()) => println!("PASS"),
            Err(e) => {
                println!("FAIL");
                failures.push((file.clone(), e));
            }
        }
    }

    if !failures.is_empty() {
        eprintln!("\nFailures:");
        for (file, error) in &failures {
            eprintln!("  {}: {}", file.display(), error);
        }
        panic!("{} tests failed", failures.len());
    }
}
