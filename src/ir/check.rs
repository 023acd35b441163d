//! FileCheck-style test validation for `.bsir` files.
//!
//! This module provides functionality to parse RUN/CHECK directives from IR files,
//! run the slicer (and optionally the interpreter) as the RUN line asks, and
//! validate output against expected patterns, similar to LLVM's FileCheck tool
//! but implemented in a Rust-native way.

use super::Module;
use crate::core::SlicerConfig;
use crate::interp::Interpreter;
use crate::slicer::slice_module;

/// A CHECK directive extracted from an IR file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match pattern on some later line
    Check(String),
    /// CHECK-LABEL: pattern - Label for a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the next line
    CheckNext(String),
    /// CHECK-NOT: pattern - Pattern must not occur before the next match
    CheckNot(String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive specifying how to execute the test
#[derive(Debug, Clone)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
    /// `not` prefix: the pass is expected to report diagnostics.
    pub expect_failure: bool,
}

/// Test specification extracted from an IR file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub ir_content: String,
}

impl TestSpec {
    /// Parse an IR file to extract test specifications
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut ir_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let (expect_failure, run_cmd) = match run_cmd.trim().strip_prefix("not ") {
                    Some(rest) => (true, rest),
                    None => (false, run_cmd),
                };
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                if let Some((command, args)) = parts.split_first() {
                    run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                        expect_failure,
                    });
                }
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(pattern.trim().to_string()));
            } else if trimmed.starts_with("; CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            } else {
                // Regular IR content
                ir_lines.push(line);
            }
        }

        if run_directives.is_empty() {
            return Err("no RUN directive found".to_string());
        }

        Ok(TestSpec {
            run_directives,
            check_directives,
            ir_content: ir_lines.join("\n"),
        })
    }
}

/// Test runner that executes `.bsir` tests
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Run an IR test and validate output
    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        for run_dir in &spec.run_directives {
            let output = self.execute_command(&spec.ir_content, run_dir)?;
            if self.verbose {
                println!("{}", output);
            }
            self.validate_output(&output, &spec.check_directives)?;
        }

        Ok(())
    }

    /// Execute a test command and return the output
    pub fn execute_command(&self, ir_text: &str, run_dir: &RunDirective) -> Result<String, String> {
        let mut module = Module::parse(ir_text)?;
        let mut config = SlicerConfig::default();
        let mut print_ir = true;
        let mut print_stats = false;
        let mut run_func: Option<&str> = None;
        let mut dump_globals = Vec::new();

        let mut args = run_dir.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-print" => print_ir = false,
                "--stats" => print_stats = true,
                "--no-verify" => config.verify = false,
                "--no-tags" => config.keep_tags = false,
                "--run" => run_func = args.next().map(String::as_str),
                "--dump-global" => {
                    if let Some(name) = args.next() {
                        dump_globals.push(name.as_str());
                    }
                }
                _ => {}
            }
        }

        let report = slice_module(&mut module, &config);
        let mut output = Vec::new();

        for diag in &report.diagnostics {
            output.push(format!("error: {}", diag.message));
        }
        match (run_dir.expect_failure, report.diagnostics.is_empty()) {
            (true, true) => return Err("expected the pass to report diagnostics".to_string()),
            (false, false) => {
                return Err(format!("unexpected diagnostics:\n{}", output.join("\n")));
            }
            _ => {}
        }

        if print_ir {
            output.push(module.to_string());
        }
        if print_stats {
            output.push(report.stats.to_string());
        }

        if run_func.is_some() || !dump_globals.is_empty() {
            let mut interp = Interpreter::new(&module);
            if let Some(name) = run_func {
                let result = interp.call(name, &[]).map_err(|e| e.to_string())?;
                match result {
                    Some(v) => output.push(format!("result: {}", v)),
                    None => output.push("result: void".to_string()),
                }
            }
            for name in dump_globals {
                let bytes = interp.global_bytes(name).map_err(|e| e.to_string())?;
                let items: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
                output.push(format!("@{} = [{}]", name, items.join(", ")));
            }
        }

        Ok(output.join("\n"))
    }

    /// Validate output against CHECK directives
    pub fn validate_output(&self, output: &str, directives: &[CheckDirective]) -> Result<(), String> {
        let output_lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;
        let mut pending_not: Vec<&str> = Vec::new();

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::CheckNot(pattern) => pending_not.push(pattern.as_str()),

                CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                    let found = output_lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));

                    let kind = match directive {
                        CheckDirective::CheckLabel(_) => "CHECK-LABEL",
                        _ => "CHECK",
                    };
                    match found {
                        Some(idx) => {
                            Self::check_absent(&output_lines[line_idx..line_idx + idx], &pending_not)?;
                            pending_not.clear();
                            line_idx += idx + 1;
                            if self.verbose {
                                println!("{}: '{}' found at line {}", kind, pattern, line_idx - 1);
                            }
                        }
                        None => {
                            return Err(format!("{}: pattern '{}' not found in output", kind, pattern));
                        }
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    if line_idx >= output_lines.len() {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    }

                    let line = output_lines[line_idx];
                    if !line.contains(pattern.as_str()) {
                        return Err(format!("CHECK-NEXT: expected '{}' but got '{}'", pattern, line));
                    }

                    if self.verbose {
                        println!("CHECK-NEXT: '{}' matches at line {}", pattern, line_idx);
                    }
                    line_idx += 1;
                }

                CheckDirective::CheckEmpty => {
                    if line_idx >= output_lines.len() {
                        continue; // End of output counts as empty
                    }

                    let line = output_lines[line_idx];
                    if !line.trim().is_empty() {
                        return Err(format!("CHECK-EMPTY: expected empty line but got '{}'", line));
                    }
                    line_idx += 1;
                }
            }
        }

        Self::check_absent(&output_lines[line_idx.min(output_lines.len())..], &pending_not)
    }

    fn check_absent(lines: &[&str], patterns: &[&str]) -> Result<(), String> {
        for pattern in patterns {
            if let Some(line) = lines.iter().find(|line| line.contains(*pattern)) {
                return Err(format!("CHECK-NOT: pattern '{}' found in '{}'", pattern, line));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let content = r#"; RUN: bitslice %s --run main
; CHECK: define void @main
; CHECK-LABEL: entry:
; CHECK-NEXT: ret void
; CHECK-NOT: begin_slice
; COM: This is a comment
define void @main() {
entry:
  ret void
}"#;

        let spec = TestSpec::parse(content).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.run_directives[0].args, vec!["%s", "--run", "main"]);
        assert_eq!(spec.check_directives.len(), 5);
        assert!(spec.ir_content.contains("define void @main"));
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "define void @f() {\nentry:\n  ret void\n}\n";

        let directives = vec![
            CheckDirective::Check("define".to_string()),
            CheckDirective::CheckLabel("entry:".to_string()),
            CheckDirective::CheckNext("ret void".to_string()),
        ];

        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_next_failure() {
        let runner = TestRunner::new(false);
        let output = "Line 1\nLine 2\nLine 3\n";

        let directives = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()),
        ];

        let result = runner.validate_output(output, &directives);
        assert!(result.unwrap_err().contains("CHECK-NEXT"));
    }

    #[test]
    fn test_check_not_between_matches() {
        let runner = TestRunner::new(false);
        let output = "start\nforbidden\nend\n";

        let ok = vec![
            CheckDirective::Check("end".to_string()),
            CheckDirective::CheckNot("forbidden".to_string()),
        ];
        runner.validate_output(output, &ok).unwrap();

        let bad = vec![
            CheckDirective::Check("start".to_string()),
            CheckDirective::CheckNot("forbidden".to_string()),
            CheckDirective::Check("end".to_string()),
        ];
        assert!(runner.validate_output(output, &bad).unwrap_err().contains("CHECK-NOT"));
    }

    #[test]
    fn test_run_plain_module() {
        let runner = TestRunner::new(false);
        let spec = TestSpec::parse(
            "; RUN: bitslice %s --run f\n; CHECK: ret i32 7\n; CHECK: result: 7\ndefine i32 @f() {\nentry:\n  ret i32 7\n}\n",
        )
        .unwrap();
        runner.run_test(&spec).unwrap();
    }
}
