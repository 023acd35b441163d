//! FileCheck-style tests for `.bsir` files
//!
//! Every file under `tests/filetest` carries its own RUN and CHECK directives;
//! this suite runs the pass as the RUN line asks and matches the output.

use bitslicer::ir::{CheckDirective, TestRunner, TestSpec};
use std::fs;
use std::path::Path;

/// Test helper that runs a `.bsir` file through FileCheck validation
fn run_filecheck_test(file: &str) {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetest").join(file);
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    let spec = TestSpec::parse(&contents)
        .unwrap_or_else(|e| panic!("Failed to parse test spec from {}: {}", file, e));

    let runner = TestRunner::new(false);
    runner.run_test(&spec)
        .unwrap_or_else(|e| panic!("Test {} failed: {}", file, e));
}

#[test]
fn test_xor_region_filecheck() {
    run_filecheck_test("xor_region.bsir");
}

#[test]
fn test_pack_roundtrip_filecheck() {
    run_filecheck_test("pack_roundtrip.bsir");
}

#[test]
fn test_rotate_filecheck() {
    run_filecheck_test("rotate.bsir");
}

#[test]
fn test_scalar_region_filecheck() {
    run_filecheck_test("scalar_region.bsir");
}

#[test]
fn test_capacity_error_filecheck() {
    run_filecheck_test("capacity_error.bsir");
}

#[test]
fn test_unsupported_op_filecheck() {
    run_filecheck_test("unsupported_op.bsir");
}

#[test]
fn test_range_mismatch_filecheck() {
    run_filecheck_test("range_mismatch.bsir");
}

/// Every file in the directory must have at least one RUN line and pass.
#[test]
fn test_all_filetests() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetest");
    let mut count = 0;
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("bsir") {
            continue;
        }
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        run_filecheck_test(&name);
        count += 1;
    }
    assert!(count >= 7, "only {} filetests found in {}", count, dir.display());
}

#[cfg(test)]
mod filecheck_internals {
    use super::*;

    #[test]
    fn test_not_prefix_expects_diagnostics() {
        let spec = TestSpec::parse(
            "; RUN: not bitslice %s\n; CHECK: define\ndefine void @f() {\nentry:\n  ret void\n}\n",
        )
        .unwrap();
        assert!(spec.run_directives[0].expect_failure);

        let err = TestRunner::new(false).run_test(&spec).unwrap_err();
        assert!(err.contains("expected the pass to report diagnostics"));
    }

    #[test]
    fn test_unexpected_diagnostics_fail() {
        let spec = TestSpec::parse(
            "; RUN: bitslice %s\ndefine void @f(ptr %p) {\nentry:\n  call void @begin_slice(ptr %p, i32 1, i32 4)\n  ret void\n}\n",
        )
        .unwrap();
        let err = TestRunner::new(false).run_test(&spec).unwrap_err();
        assert!(err.contains("unexpected diagnostics"), "{}", err);
    }

    #[test]
    fn test_directive_order_is_kept() {
        let spec = TestSpec::parse(
            "; RUN: bitslice %s\n; CHECK: a\n; CHECK-NOT: b\n; CHECK-NEXT: c\n; CHECK-EMPTY\ndefine void @f() {\nentry:\n  ret void\n}\n",
        )
        .unwrap();
        assert_eq!(
            spec.check_directives,
            vec![
                CheckDirective::Check("a".to_string()),
                CheckDirective::CheckNot("b".to_string()),
                CheckDirective::CheckNext("c".to_string()),
                CheckDirective::CheckEmpty,
            ]
        );
    }
}
