//! FileCheck-style test validation for TIR files.
//!
//! A test file is TIR with `; RUN:` and `; CHECK...:` comment lines. The
//! runner parses the IR, runs the mode switching pass over every function and
//! matches the printed result (plus optional annotation dumps and statistics)
//! against the CHECK directives, similar to LLVM's FileCheck tool.

use bumpalo::Bump;

use super::{TestIR, TestIRAdaptor};
use crate::wqm::{analyze_function, ModeState, PassConfig, WholeQuadMode};

/// A CHECK directive extracted from a TIR file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match exact pattern
    Check(String),
    /// CHECK-LABEL: pattern - Label for a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the next line
    CheckNext(String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive specifying how to execute the test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    /// The command is expected to fail (`; RUN: not wqm-opt ...`).
    pub expect_failure: bool,
    pub command: String,
    pub args: Vec<String>,
}

/// Test specification extracted from a TIR file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub tir_content: String,
}

impl TestSpec {
    /// Parse a TIR file to extract test specifications
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut tir_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let mut parts = run_cmd.split_whitespace().peekable();
                let expect_failure = parts.next_if_eq(&"not").is_some();
                let Some(command) = parts.next() else {
                    return Err(format!("empty RUN line: '{}'", trimmed));
                };
                run_directives.push(RunDirective {
                    expect_failure,
                    command: command.to_string(),
                    args: parts.map(str::to_string).collect(),
                });
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if trimmed.starts_with("; CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            } else {
                // Regular TIR content
                tir_lines.push(line);
            }
        }

        if run_directives.is_empty() {
            return Err("no RUN directive".to_string());
        }

        Ok(TestSpec { run_directives, check_directives, tir_content: tir_lines.join("\n") })
    }
}

/// Test runner that executes TIR tests
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Run a TIR test and validate output
    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        for run_dir in &spec.run_directives {
            let output = match (self.execute_command(&spec.tir_content, run_dir), run_dir.expect_failure) {
                (Ok(output), false) => output,
                (Err(e), true) => format!("error: {}", e),
                (Ok(_), true) => return Err(format!("'{}' was expected to fail but succeeded", run_dir.command)),
                (Err(e), false) => return Err(e),
            };
            if self.verbose {
                println!("{}", output);
            }
            self.validate_output(&output, &spec.check_directives)?;
        }

        Ok(())
    }

    /// Execute a test command and return the output
    ///
    /// Flags: `--ignore-cc` runs the pass on every function regardless of
    /// calling convention, `--print-state` prints the solved annotations of
    /// each function before it is rewritten, `--stats` appends the pass
    /// statistics.
    pub fn execute_command(&self, tir: &str, run_dir: &RunDirective) -> Result<String, String> {
        let mut ignore_cc = false;
        let mut print_state = false;
        let mut print_stats = false;

        for arg in &run_dir.args {
            match arg.as_str() {
                "--ignore-cc" => ignore_cc = true,
                "--print-state" => print_state = true,
                "--stats" => print_stats = true,
                _ => {}
            }
        }

        let mut ir = TestIR::parse(tir)?;
        let config = PassConfig { require_pixel_shader: !ignore_cc, dump_state: false };
        let mut pass = WholeQuadMode::with_config(config);
        let mut output = Vec::new();

        {
            let mut adaptor = TestIRAdaptor::new(&mut ir);
            let funcs: Vec<_> = adaptor.funcs().collect();
            for func in funcs {
                adaptor.switch_func(func);

                if print_state {
                    let arena = Bump::new();
                    let mut state = ModeState::new_in(&arena, &adaptor);
                    let global_flags = analyze_function(&mut state, &adaptor);
                    output.push(format!("State for {}: global {}", adaptor.func_name(func), global_flags));
                    output.push(state.display(&adaptor).to_string());
                    output.push("End State".to_string());
                }

                pass.run(&mut adaptor).map_err(|e| e.to_string())?;
            }
        }

        output.push(ir.print());
        if print_stats {
            output.push(pass.stats().to_string());
        }

        Ok(output.join("\n"))
    }

    /// Validate output against CHECK directives
    pub fn validate_output(&self, output: &str, directives: &[CheckDirective]) -> Result<(), String> {
        let output_lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                    let found = output_lines.iter().skip(line_idx).position(|line| line.contains(pattern.as_str()));

                    match found {
                        Some(idx) => {
                            line_idx += idx + 1; // Move to the next line after the match
                            if self.verbose {
                                println!("{:?} found at line {}", directive, line_idx - 1);
                            }
                        }
                        None => {
                            let kind = if matches!(directive, CheckDirective::Check(_)) { "CHECK" } else { "CHECK-LABEL" };
                            return Err(format!("{}: pattern '{}' not found in output", kind, pattern));
                        }
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    let Some(line) = output_lines.get(line_idx) else {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    };
                    if !line.contains(pattern.as_str()) {
                        return Err(format!("CHECK-NEXT: expected '{}' but got '{}'", pattern, line));
                    }
                    line_idx += 1;
                }

                CheckDirective::CheckEmpty => {
                    // End of output counts as empty
                    if let Some(line) = output_lines.get(line_idx) {
                        if !line.trim().is_empty() {
                            return Err(format!("CHECK-EMPTY: expected empty line but got '{}'", line));
                        }
                    }
                    line_idx += 1;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"; RUN: wqm-opt %s --stats
; CHECK-LABEL: f(ps) {
; CHECK-NEXT: entry:
; CHECK-NEXT: %mask0:s = copy $exec
; COM: uniform only, so a single switch
; CHECK-NEXT: $exec = s_wqm $exec
; CHECK: Mode switches: 1
f(ps) {
entry:
  %a = v_op
  %t = sample %a
  %m:s = live
  ret
}"#;

    #[test]
    fn test_parse_directives() {
        let spec = TestSpec::parse(SIMPLE).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.run_directives[0].command, "wqm-opt");
        assert_eq!(spec.run_directives[0].args, vec!["%s", "--stats"]);
        assert!(!spec.run_directives[0].expect_failure);
        assert_eq!(spec.check_directives.len(), 6);
        assert!(spec.tir_content.contains("f(ps)"));
    }

    #[test]
    fn test_run_simple() {
        let spec = TestSpec::parse(SIMPLE).unwrap();
        TestRunner::new(false).run_test(&spec).unwrap();
    }

    #[test]
    fn test_expected_failure() {
        let content = "; RUN: not wqm-opt %s\n; CHECK: error: Unknown operation: v_bogus\nf(ps) {\nentry:\n  %a = v_bogus\n  ret\n}\n";
        let spec = TestSpec::parse(content).unwrap();
        assert!(spec.run_directives[0].expect_failure);
        TestRunner::new(false).run_test(&spec).unwrap();
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "State for f\nBlock entry\n\nf(ps) {\n";

        let directives = vec![
            CheckDirective::Check("State".to_string()),
            CheckDirective::CheckNext("Block entry".to_string()),
            CheckDirective::CheckEmpty,
            CheckDirective::CheckLabel("f(ps)".to_string()),
        ];

        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_next_failure() {
        let runner = TestRunner::new(false);
        let output = "Line 1\nLine 2\nLine 3\n";

        let directives = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()), // Should fail
        ];

        let result = runner.validate_output(output, &directives);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("CHECK-NEXT"));
    }
}
