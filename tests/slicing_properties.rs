//! End-to-end properties of the bit-slicing pass.
//!
//! Every test parses a module, runs the pass, verifies the result and then
//! executes it with the reference interpreter, so the properties are checked
//! on the behaviour of the generated loops rather than on their shape.

use bitslicer::core::{SlicerConfig, TransformError};
use bitslicer::interp::Interpreter;
use bitslicer::ir::{verify_module, Module};
use bitslicer::slicer::{slice_module, SliceReport};

fn slice(src: &str) -> (Module, SliceReport) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut module = Module::parse(src).unwrap_or_else(|e| panic!("parse error: {}\n{}", e, src));
    let report = slice_module(&mut module, &SlicerConfig::default());
    verify_module(&module).unwrap_or_else(|e| panic!("{}\n{}", e, module));
    (module, report)
}

fn slice_clean(src: &str) -> Module {
    let (module, report) = slice(src);
    assert!(report.diagnostics.is_empty(), "unexpected diagnostics: {:?}", report.diagnostics);
    module
}

/// Run `@main` after loading `inputs` into globals; returns the bytes of `outputs`.
fn execute(module: &Module, inputs: &[(&str, &[u8])], args: &[u64], outputs: &[&str]) -> Vec<Vec<u8>> {
    let mut interp = Interpreter::new(module);
    for (name, bytes) in inputs {
        interp.set_global_bytes(name, bytes).unwrap();
    }
    interp.call("main", args).unwrap();
    outputs.iter().map(|name| interp.global_bytes(name).unwrap().to_vec()).collect()
}

/// Deterministic, irregular byte pattern.
fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(37).wrapping_add(seed).rotate_left((i % 7) as u32))
        .collect()
}

#[test]
fn test_slice_round_trip_every_byte_value() {
    let module = slice_clean(
        r#"
global @buf = [256 x i8] zeroinitializer

define void @main() {
entry:
  call void @begin_slice(ptr @buf, i32 1, i32 256)
  call void @end_slice(ptr @buf)
  ret void
}
"#,
    );
    let input: Vec<u8> = (0..=255).collect();
    let out = execute(&module, &[("buf", &input)], &[], &["buf"]);
    assert_eq!(out[0], input);
}

#[test]
fn test_slice_round_trip_sizes() {
    for len in [4usize, 8, 12, 32, 100] {
        let src = format!(
            r#"
global @buf = [{len} x i8] zeroinitializer

define void @main() {{
entry:
  call void @begin_slice(ptr @buf, i32 1, i32 {len})
  call void @end_slice(ptr @buf)
  ret void
}}
"#
        );
        let module = slice_clean(&src);
        let input = pattern(len, len as u8);
        let out = execute(&module, &[("buf", &input)], &[], &["buf"]);
        assert_eq!(out[0], input, "length {}", len);
    }
}

#[test]
fn test_pack_unpack_markers_round_trip() {
    let module = slice_clean(
        r#"
global @input = [64 x i8] zeroinitializer
global @words = [16 x i32] zeroinitializer
global @output = [64 x i8] zeroinitializer

define void @main() {
entry:
  call void @pack(ptr @input, ptr @words)
  call void @unpack(ptr @words, ptr @output)
  ret void
}
"#,
    );
    let input = pattern(64, 3);
    let out = execute(&module, &[("input", &input)], &[], &["output"]);
    assert_eq!(out[0], input);
}

#[test]
fn test_pack_marker_layout() {
    // 32 instances of 2 bytes: instance j's byte m is input[j*2 + m].
    let module = slice_clean(
        r#"
global @input = [64 x i8] zeroinitializer
global @words = [16 x i32] zeroinitializer

define void @main() {
entry:
  call void @pack(ptr @input, ptr @words)
  ret void
}
"#,
    );
    let input = pattern(64, 11);
    let out = execute(&module, &[("input", &input)], &[], &["words"]);
    let words: Vec<u32> = out[0]
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    for j in 0..32 {
        for m in 0..2 {
            for k in 0..8 {
                let expected = (input[j * 2 + m] >> k) & 1;
                let got = (words[m * 8 + k] >> j) & 1;
                assert_eq!(u32::from(expected), got, "instance {} byte {} bit {}", j, m, k);
            }
        }
    }
}

#[test]
fn test_multi_instance_layout_via_rotate() {
    // Rotating the lanes left by eight moves byte m of every instance to m + 1
    // while each instance stays in its own bit position.
    let module = slice_clean(
        r#"
global @state = [32 x i8] zeroinitializer
global @lbl = c"shift"
global @desc = c"state::rotL::state-8"

define void @main() {
entry:
  call void @begin_slice(ptr @state, i32 4, i32 8)
  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  call void @end_slice(ptr @state)
  ret void
}
"#,
    );
    let input = pattern(32, 5);
    let out = execute(&module, &[("state", &input)], &[], &["state"]);
    for j in 0..4 {
        for m in 0..8 {
            assert_eq!(out[0][j * 8 + (m + 1) % 8], input[j * 8 + m], "instance {} byte {}", j, m);
        }
    }
}

#[test]
fn test_lane_independence_of_xor() {
    let module = slice_clean(
        r#"
global @l = [32 x i8] zeroinitializer
global @r = [32 x i8] zeroinitializer
global @d = [32 x i8] zeroinitializer
global @lbl = c"mix"
global @desc = c"d:all::^::l:all-r:all"

define void @main() {
entry:
  call void @begin_slice(ptr @l, i32 4, i32 8)
  call void @begin_slice(ptr @r, i32 4, i32 8)
  call void @begin_slice(ptr @d, i32 4, i32 8)
  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  call void @end_slice(ptr @d)
  ret void
}
"#,
    );
    let l = pattern(32, 1);
    let r = pattern(32, 200);
    let base = execute(&module, &[("l", &l), ("r", &r)], &[], &["d"]).remove(0);
    let expected: Vec<u8> = l.iter().zip(&r).map(|(a, b)| a ^ b).collect();
    assert_eq!(base, expected);

    for (byte, bit) in [(0usize, 0u8), (13, 3), (31, 7)] {
        let mut flipped = l.clone();
        flipped[byte] ^= 1 << bit;
        let out = execute(&module, &[("l", &flipped), ("r", &r)], &[], &["d"]).remove(0);
        for (i, (a, b)) in out.iter().zip(&base).enumerate() {
            let diff = a ^ b;
            if i == byte {
                assert_eq!(diff, 1 << bit);
            } else {
                assert_eq!(diff, 0, "byte {} changed after flipping byte {}", i, byte);
            }
        }
    }
}

#[test]
fn test_xor_of_identical_buffers_is_zero() {
    let module = slice_clean(
        r#"
global @in = [16 x i8] [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
global @in2 = [16 x i8] [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
global @lbl = c"r0"
global @desc = c"in:all::^::in:all-in2:all"

define void @main() {
entry:
  call void @begin_slice(ptr @in, i32 1, i32 16)
  call void @begin_slice(ptr @in2, i32 1, i32 16)
  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  call void @end_slice(ptr @in)
  call void @end_slice(ptr @in2)
  ret void
}
"#,
    );
    let out = execute(&module, &[], &[], &["in", "in2"]);
    assert_eq!(out[0], vec![0u8; 16]);
    assert_eq!(out[1], (0..16).collect::<Vec<u8>>());
}

fn two_buffer_region(desc: &str, region_at: &str) -> String {
    let region = "  call void @region_start(ptr @lbl, ptr @desc)\n  call void @region_end(ptr @lbl)\n";
    let pick = |at: &str| if at == region_at { region } else { "" };
    format!(
        r#"
global @a = [4 x i8] zeroinitializer
global @b = [4 x i8] zeroinitializer
global @lbl = c"w"
global @desc = c"{desc}"

define void @main() {{
entry:
{before}  call void @begin_slice(ptr @a, i32 1, i32 4)
  call void @begin_slice(ptr @b, i32 1, i32 4)
{inside}  call void @end_slice(ptr @a)
  call void @end_slice(ptr @b)
{after}  ret void
}}
"#,
        before = pick("before"),
        inside = pick("inside"),
        after = pick("after"),
    )
}

#[test]
fn test_xor_into_overlapping_window_reads_old_lanes() {
    // Lane w of a single instance is bit w % 8 of byte w / 8.
    let zero = [0u8; 4];
    for desc in ["a:range:1,8::^::a:range:0,7-b:range:0,7", "a:range:1,8::^::b:range:0,7-a:range:0,7"] {
        let module = slice_clean(&two_buffer_region(desc, "inside"));
        let out = execute(&module, &[("a", &[1, 0, 0, 0]), ("b", &zero)], &[], &["a"]).remove(0);
        assert_eq!(out, vec![3, 0, 0, 0], "{}", desc);

        let out = execute(&module, &[("a", &[0xff, 0, 0, 0]), ("b", &zero)], &[], &["a"]).remove(0);
        assert_eq!(out, vec![0xff, 1, 0, 0], "{}", desc);
    }

    let module = slice_clean(&two_buffer_region("a:range:0,7::^::a:range:1,8-b:range:0,7", "inside"));
    let out = execute(&module, &[("a", &[0b10, 1, 0, 0]), ("b", &zero)], &[], &["a"]).remove(0);
    assert_eq!(out, vec![0x81, 1, 0, 0]);
}

#[test]
fn test_region_inside_window_is_lowered() {
    let module = slice_clean(&two_buffer_region("a::^::a-b", "inside"));
    let out = execute(&module, &[("a", &[1, 2, 3, 4]), ("b", &[1, 1, 1, 1])], &[], &["a"]).remove(0);
    assert_eq!(out, vec![0, 3, 2, 5]);
}

#[test]
fn test_region_outside_window_is_reported() {
    for at in ["before", "after"] {
        let (module, report) = slice(&two_buffer_region("a::^::a-b", at));
        assert_eq!(report.diagnostics.len(), 1, "{}: {:?}", at, report.diagnostics);
        assert!(
            report.diagnostics[0].message.contains("outside the slice window of 'a'"),
            "{}: {}",
            at,
            report.diagnostics[0].message
        );
        assert_eq!(report.stats.statements_lowered, 0);

        let text = module.to_string();
        assert!(text.contains("@region_start"), "{}", at);
        assert!(text.contains("@region_end"), "{}", at);
        assert!(!text.contains("xor.cond"), "{}", at);
    }
}

#[test]
fn test_mismatched_ranges_emit_nothing() {
    let src = r#"
global @a = [4 x i8] zeroinitializer
global @b = [4 x i8] zeroinitializer
global @lbl = c"bad"
global @desc = c"a:range:0,7::^::a:range:0,7-b:range:0,6"

define void @main() {
entry:
  call void @begin_slice(ptr @a, i32 1, i32 4)
  call void @begin_slice(ptr @b, i32 1, i32 4)
  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  ret void
}
"#;
    let (module, report) = slice(src);
    assert_eq!(report.diagnostics.len(), 1);
    assert!(report.diagnostics[0].message.contains("Range length mismatch: 8 lanes vs 7 lanes"));
    assert_eq!(report.stats.statements_lowered, 0);

    let text = module.to_string();
    assert!(text.contains("@region_start"));
    assert!(text.contains("@region_end"));
    assert!(!text.contains("xor.cond"));
}

fn rotate_module(desc: &str, amount_buffer: bool) -> String {
    let (amount_global, amount_slice) = if amount_buffer {
        (
            "global @amt = [4 x i8] zeroinitializer\n",
            "  call void @begin_slice(ptr @amt, i32 1, i32 4)\n",
        )
    } else {
        ("", "")
    };
    format!(
        r#"
global @x = [4 x i8] zeroinitializer
{amount_global}global @lbl = c"rot"
global @desc = c"{desc}"

define void @main() {{
entry:
  call void @begin_slice(ptr @x, i32 1, i32 4)
{amount_slice}  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  call void @end_slice(ptr @x)
  ret void
}}
"#
    )
}

#[test]
fn test_rotate_by_constant() {
    // One instance of four bytes: lane i is bit i of the little-endian word.
    let input = [0x2du8, 0x90, 0x01, 0xc4];
    let word = u32::from_le_bytes(input);
    for k in [1u32, 5, 8, 31, 37] {
        for (op, expected) in [("rotL", word.rotate_left(k)), ("rotR", word.rotate_right(k))] {
            let module = slice_clean(&rotate_module(&format!("x::{}::x-{}", op, k), false));
            let out = execute(&module, &[("x", &input)], &[], &["x"]).remove(0);
            assert_eq!(out, expected.to_le_bytes().to_vec(), "{} by {}", op, k);
        }
    }
}

#[test]
fn test_rotate_by_sliced_amount() {
    // Word 0 of a single-instance buffer is bit 0 of its first byte.
    let module = slice_clean(&rotate_module("x::rotR::x-amt", true));
    let input = [0x81u8, 0x00, 0x00, 0x00];
    let out = execute(&module, &[("x", &input), ("amt", &[1, 0, 0, 0])], &[], &["x"]).remove(0);
    assert_eq!(out, 0x81u32.rotate_right(1).to_le_bytes().to_vec());

    let out = execute(&module, &[("x", &input), ("amt", &[0, 0, 0, 0])], &[], &["x"]).remove(0);
    assert_eq!(out, input.to_vec());
}

#[test]
fn test_rotate_of_lane_range() {
    // Only lanes 8..=15 (byte 1) rotate; rotating one byte's lanes by 3 rotates the byte.
    let module = slice_clean(&rotate_module("x:range:8,15::rotL::x:range:8,15-3", false));
    let input = [0x11u8, 0b1010_0001, 0x22, 0x33];
    let out = execute(&module, &[("x", &input)], &[], &["x"]).remove(0);
    assert_eq!(out, vec![0x11, 0b1010_0001u8.rotate_left(3), 0x22, 0x33]);
}

#[test]
fn test_move_permutes_lanes() {
    let mut perm: Vec<u8> = (0..32).rev().collect();
    perm[5] = 200;
    let perm_text: Vec<String> = perm.iter().map(|v| v.to_string()).collect();
    let src = format!(
        r#"
global @a = [4 x i8] zeroinitializer
global @b = [4 x i8] zeroinitializer
global @perm = [32 x i8] [{}]
global @lbl = c"p"
global @desc = c"b::move::a-perm"

define void @main() {{
entry:
  call void @begin_slice(ptr @a, i32 1, i32 4)
  call void @begin_slice(ptr @b, i32 1, i32 4)
  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  call void @end_slice(ptr @b)
  ret void
}}
"#,
        perm_text.join(", ")
    );
    let module = slice_clean(&src);
    let a = [0x5au8, 0x01, 0xf0, 0x83];
    let b = [0xffu8, 0xff, 0xff, 0xff];
    let out = execute(&module, &[("a", &a), ("b", &b)], &[], &["b"]).remove(0);

    let a_word = u32::from_le_bytes(a);
    let mut expected = u32::from_le_bytes(b);
    for (i, &target) in perm.iter().enumerate() {
        if target < 32 {
            let bit = (a_word >> i) & 1;
            expected = (expected & !(1 << target)) | (bit << target);
        }
    }
    assert_eq!(out, expected.to_le_bytes().to_vec());
}

#[test]
fn test_move_from_raw_storage() {
    let src = r#"
global @raw = [1 x i8] [6]
global @dst = [1 x i8] zeroinitializer
global @perm = [8 x i8] [1, 2, 3, 4, 5, 6, 7, 0]
global @lbl = c"p"
global @desc = c"dst::move::raw-perm"

define void @main() {
entry:
  call void @begin_slice(ptr @dst, i32 1, i32 1)
  call void @region_start(ptr @lbl, ptr @desc)
  call void @region_end(ptr @lbl)
  call void @end_slice(ptr @dst)
  ret void
}
"#;
    let module = slice_clean(src);
    let out = execute(&module, &[], &[], &["dst", "raw"]);
    assert_eq!(out[0], vec![6u8.rotate_left(1)]);
    assert_eq!(out[1], vec![6]);
}

#[test]
fn test_pack_capacity_is_checked_before_emission() {
    let src = r#"
global @input = [64 x i8] zeroinitializer
global @small = [15 x i32] zeroinitializer

define void @main() {
entry:
  call void @pack(ptr @input, ptr @small)
  ret void
}
"#;
    let original = Module::parse(src).unwrap().to_string();
    let mut module = Module::parse(src).unwrap();
    let config = SlicerConfig { keep_tags: false, ..SlicerConfig::default() };
    let report = slice_module(&mut module, &config);

    let expected = TransformError::InsufficientCapacity { required: 16, available: 15 };
    assert_eq!(report.diagnostics.len(), 1);
    assert!(report.diagnostics[0].message.starts_with(&expected.to_string()));
    assert_eq!(report.stats.loops_emitted, 0);
    assert_eq!(module.to_string(), original);
}

#[test]
fn test_undersized_multi_instance_buffer_is_rejected() {
    let (module, report) = slice(
        r#"
global @state = [16 x i8] zeroinitializer

define void @main() {
entry:
  call void @begin_slice(ptr @state, i32 4, i32 8)
  call void @end_slice(ptr @state)
  ret void
}
"#,
    );
    assert!(report.diagnostics[0].message.contains("need at least 32 but buffer holds 16"));
    assert!(module.to_string().contains("@begin_slice"));
}

#[test]
fn test_scalar_code_inside_region() {
    let module = slice_clean(
        r#"
global @s = [4 x i8] zeroinitializer

define void @main(i8 %amt) {
entry:
  call void @begin_slice(ptr @s, i32 1, i32 4)
  %p0 = gep [4 x i8], ptr @s, i64 0, i64 0
  %v0 = load i8, ptr %p0
  %a = shl i8 %v0, 3
  store i8 %a, ptr %p0
  %p1 = gep [4 x i8], ptr @s, i64 0, i64 1
  %v1 = load i8, ptr %p1
  %b = ashr i8 %v1, 2
  store i8 %b, ptr %p1
  %p2 = gep [4 x i8], ptr @s, i64 0, i64 2
  %v2 = load i8, ptr %p2
  %c = lshr i8 %v2, %amt
  store i8 %c, ptr %p2
  %p3 = gep [4 x i8], ptr @s, i64 0, i64 3
  %v3 = load i8, ptr %p3
  %w = sext i8 %v3 to i32
  %t = trunc i32 %w to i8
  %o = or i8 %t, 1
  %m = and i8 %o, %v0
  store i8 %m, ptr %p3
  call void @end_slice(ptr @s)
  ret void
}
"#,
    );
    let input = [150u8, 129, 127, 0xd7];
    for amt in [0u8, 3, 7, 8, 9] {
        let out = execute(&module, &[("s", &input)], &[u64::from(amt)], &["s"]).remove(0);
        let lshr = if amt >= 8 { 0 } else { input[2] >> amt };
        let expected = vec![
            input[0].wrapping_shl(3),
            ((input[1] as i8) >> 2) as u8,
            lshr,
            (input[3] | 1) & input[0],
        ];
        assert_eq!(out, expected, "amount {}", amt);
    }
}

#[test]
fn test_shift_by_variable_amount_saturates() {
    let module = slice_clean(
        r#"
global @s = [2 x i8] zeroinitializer

define void @main(i8 %amt) {
entry:
  call void @begin_slice(ptr @s, i32 1, i32 2)
  %p0 = gep [2 x i8], ptr @s, i64 0, i64 0
  %v0 = load i8, ptr %p0
  %a = ashr i8 %v0, %amt
  store i8 %a, ptr %p0
  %p1 = gep [2 x i8], ptr @s, i64 0, i64 1
  %v1 = load i8, ptr %p1
  %b = shl i8 %v1, %amt
  store i8 %b, ptr %p1
  call void @end_slice(ptr @s)
  ret void
}
"#,
    );
    let input = [0x90u8, 0x5b];
    for amt in [0u8, 1, 4, 7, 8, 9, 200, 255] {
        let out = execute(&module, &[("s", &input)], &[u64::from(amt)], &["s"]).remove(0);
        let expected = if amt >= 8 {
            vec![0xff, 0]
        } else {
            vec![((input[0] as i8) >> amt) as u8, input[1] << amt]
        };
        assert_eq!(out, expected, "amount {}", amt);
    }
}

#[test]
fn test_shift_by_sliced_amount_is_reported() {
    let (module, report) = slice(
        r#"
global @s = [4 x i8] zeroinitializer

define void @main() {
entry:
  call void @begin_slice(ptr @s, i32 1, i32 4)
  %p1 = gep [4 x i8], ptr @s, i64 0, i64 1
  %v = load i8, ptr @s
  %w = load i8, ptr %p1
  %x = shl i8 %v, %w
  call void @end_slice(ptr @s)
  ret void
}
"#,
    );
    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.diagnostics);
    assert!(report.diagnostics[0]
        .message
        .contains("Unsupported operation with bit-sliced operand: shl by a bit-sliced amount"));
    assert!(module.to_string().contains("shl i8"));
}

#[test]
fn test_arithmetic_on_sliced_data_is_reported() {
    let (module, report) = slice(
        r#"
global @s = [4 x i8] zeroinitializer

define void @main() {
entry:
  call void @begin_slice(ptr @s, i32 1, i32 4)
  %v = load i8, ptr @s
  %x = add i8 %v, 1
  call void @end_slice(ptr @s)
  ret void
}
"#,
    );
    assert_eq!(report.diagnostics.len(), 1);
    assert!(report.diagnostics[0]
        .message
        .contains("Unsupported operation with bit-sliced operand: add"));
    assert!(module.to_string().contains("add i8"));
}
