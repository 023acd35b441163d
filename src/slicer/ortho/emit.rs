//! Loop emission for resolved region statements.
//!
//! Every statement becomes one or two counted loops over its lane selection.
//! MOVE and ROTATE first copy their source lanes into a temporary so that the
//! destination may alias the source. XOR does the same only for a source whose
//! window starts below an overlapping destination window.

use super::{Lowered, Resolved, Source};
use crate::core::{SlicedBuffer, TransformError, TransformResult, TransformSession, ELEMENT_BITS};
use crate::ir::{BinOp, CastOp, FunctionBuilder, IcmpPred, Type, Value};
use crate::slicer::loops::{emit_counted_loop, emit_guarded};
use crate::slicer::ortho::OrthoOp;

fn lane_ptr(b: &mut FunctionBuilder, buffer: &SlicedBuffer, start: u64, i: Value, name: &str) -> Value {
    let index = b.build_binary(BinOp::Add, i, Value::i32(start as u32), &format!("{}.lane", name));
    b.build_gep(Type::i32(), buffer.storage, vec![index], &format!("{}.lp", name))
}

/// Lane word `i` of a value operand.
fn read_lane(b: &mut FunctionBuilder, src: &Resolved, i: Value, name: &str) -> TransformResult<Value> {
    match &src.source {
        Source::Sliced(buffer) => {
            let p = lane_ptr(b, buffer, src.start, i, name);
            Ok(b.build_load(Type::i32(), p, &format!("{}.w", name)))
        }
        Source::Raw(storage) => {
            let bit_index = b.build_binary(BinOp::Add, i, Value::i32(src.start as u32), &format!("{}.bi", name));
            let byte = b.build_binary(BinOp::UDiv, bit_index, Value::i32(ELEMENT_BITS), &format!("{}.byte", name));
            let k = b.build_binary(BinOp::URem, bit_index, Value::i32(ELEMENT_BITS), &format!("{}.k", name));
            let base = storage.base(b);
            let p = b.build_gep(Type::i8(), base, vec![byte], &format!("{}.bp", name));
            let v = b.build_load(Type::i8(), p, &format!("{}.raw", name));
            let wide = b.build_cast(CastOp::ZExt, v, Type::i32(), &format!("{}.wide", name));
            let shifted = b.build_binary(BinOp::LShr, wide, k, &format!("{}.shr", name));
            let bit = b.build_binary(BinOp::And, shifted, Value::i32(1), &format!("{}.bit", name));
            Ok(b.build_binary(BinOp::Mul, bit, Value::i32(u32::MAX), &format!("{}.bcast", name)))
        }
        Source::Constant(_) => Err(TransformError::invalid(format!("'{}' is a constant, not a lane source", src.name))),
    }
}

/// Index value `i` of an index operand, as i32.
fn read_index(b: &mut FunctionBuilder, src: &Resolved, i: Value, name: &str) -> Value {
    match &src.source {
        Source::Sliced(buffer) => {
            let p = lane_ptr(b, buffer, src.start, i, name);
            b.build_load(Type::i32(), p, &format!("{}.ix", name))
        }
        Source::Raw(storage) => {
            let at = b.build_binary(BinOp::Add, i, Value::i32(src.start as u32), &format!("{}.at", name));
            let base = storage.base(b);
            let p = b.build_gep(storage.elem.clone(), base, vec![at], &format!("{}.ip", name));
            let v = b.build_load(storage.elem.clone(), p, &format!("{}.ixv", name));
            b.build_int_resize(v, 32, false, &format!("{}.ix", name))
        }
        Source::Constant(c) => Value::i32(*c as u32),
    }
}

fn sliced<'r, 'arena>(r: &'r Resolved<'arena>) -> TransformResult<&'r SlicedBuffer<'arena>> {
    match &r.source {
        Source::Sliced(buffer) => Ok(buffer),
        _ => Err(TransformError::UnknownBuffer { name: r.name.clone() }),
    }
}

fn copy_to_temp(b: &mut FunctionBuilder, session: &TransformSession, src: &Resolved, name: &str) -> TransformResult<Value> {
    let tmp = b.build_entry_alloca(Type::array(src.len, Type::i32()), &format!("{}.tmp", name))?;
    let copy = format!("{}.copy", name);
    emit_counted_loop(b, session, &copy, Value::i32(0), Value::i32(src.len as u32), |b, i| {
        let v = read_lane(b, src, i, &copy)?;
        let p = b.build_gep(Type::i32(), tmp, vec![i], &format!("{}.tp", copy));
        b.build_store(v, p);
        Ok(())
    })?;
    Ok(tmp)
}

/// True when `src` reads lanes of `dest`'s storage that an earlier iteration
/// of a lane-by-lane write would already have overwritten.
fn clobbers(dest: &Resolved, src: &Resolved) -> bool {
    match (&dest.source, &src.source) {
        (Source::Sliced(d), Source::Sliced(s)) if d.storage == s.storage => {
            src.start < dest.start && dest.start < src.start + src.len
        }
        _ => false,
    }
}

fn emit_xor(b: &mut FunctionBuilder, session: &TransformSession, stmt: &Lowered) -> TransformResult<()> {
    let dest = sliced(&stmt.dest)?;
    let mut stage = |src: &Resolved, name: &str| -> TransformResult<Option<Value>> {
        if clobbers(&stmt.dest, src) {
            copy_to_temp(b, session, src, name).map(Some)
        } else {
            Ok(None)
        }
    };
    let left_tmp = stage(&stmt.left, "xor.l")?;
    let right_tmp = stage(&stmt.right, "xor.r")?;
    emit_counted_loop(b, session, "xor", Value::i32(0), Value::i32(stmt.left.len as u32), |b, i| {
        let l = read_staged(b, &stmt.left, left_tmp, i, "xor.l")?;
        let r = read_staged(b, &stmt.right, right_tmp, i, "xor.r")?;
        let x = b.build_binary(BinOp::Xor, l, r, "xor.v");
        let p = lane_ptr(b, dest, stmt.dest.start, i, "xor.d");
        b.build_store(x, p);
        Ok(())
    })
}

fn read_staged(b: &mut FunctionBuilder, src: &Resolved, tmp: Option<Value>, i: Value, name: &str) -> TransformResult<Value> {
    match tmp {
        Some(tmp) => {
            let p = b.build_gep(Type::i32(), tmp, vec![i], &format!("{}.tp", name));
            Ok(b.build_load(Type::i32(), p, &format!("{}.tv", name)))
        }
        None => read_lane(b, src, i, name),
    }
}

fn emit_move(b: &mut FunctionBuilder, session: &TransformSession, stmt: &Lowered) -> TransformResult<()> {
    let dest = sliced(&stmt.dest)?;
    let tmp = copy_to_temp(b, session, &stmt.left, "move")?;
    emit_counted_loop(b, session, "move.scatter", Value::i32(0), Value::i32(stmt.left.len as u32), |b, i| {
        let idx = read_index(b, &stmt.right, i, "move.idx");
        let in_bounds = b.build_icmp(IcmpPred::Ult, idx, Value::i32(stmt.dest.len as u32), "move.inb");
        emit_guarded(b, "move.chk", in_bounds, |b| {
            let src = b.build_gep(Type::i32(), tmp, vec![i], "move.tp");
            let v = b.build_load(Type::i32(), src, "move.v");
            let p = lane_ptr(b, dest, stmt.dest.start, idx, "move.d");
            b.build_store(v, p);
            Ok(())
        })
    })
}

fn emit_rotate(b: &mut FunctionBuilder, session: &TransformSession, stmt: &Lowered) -> TransformResult<()> {
    let target = sliced(&stmt.left)?;
    let len = stmt.left.len as u32;
    let name = if stmt.op == OrthoOp::RotL { "rotl" } else { "rotr" };
    let tmp = copy_to_temp(b, session, &stmt.left, name)?;

    let amount = match &stmt.right.source {
        Source::Constant(c) => Value::i32((*c % u64::from(len)) as u32),
        _ => {
            let raw = read_index(b, &stmt.right, Value::i32(0), &format!("{}.amt", name));
            b.build_binary(BinOp::URem, raw, Value::i32(len), &format!("{}.k", name))
        }
    };
    let step = if stmt.op == OrthoOp::RotL {
        amount
    } else {
        b.build_binary(BinOp::Sub, Value::i32(len), amount, &format!("{}.back", name))
    };

    let write = format!("{}.write", name);
    emit_counted_loop(b, session, &write, Value::i32(0), Value::i32(len), |b, i| {
        let moved = b.build_binary(BinOp::Add, i, step, &format!("{}.sum", write));
        let dst = b.build_binary(BinOp::URem, moved, Value::i32(len), &format!("{}.dst", write));
        let src = b.build_gep(Type::i32(), tmp, vec![i], &format!("{}.tp", write));
        let v = b.build_load(Type::i32(), src, &format!("{}.v", write));
        let p = lane_ptr(b, target, stmt.left.start, dst, &write);
        b.build_store(v, p);
        Ok(())
    })
}

/// Emit one resolved statement at the insertion point.
pub fn emit_statement(b: &mut FunctionBuilder, session: &TransformSession, stmt: &Lowered) -> TransformResult<()> {
    match stmt.op {
        OrthoOp::Xor => emit_xor(b, session, stmt)?,
        OrthoOp::Move => emit_move(b, session, stmt)?,
        OrthoOp::RotL | OrthoOp::RotR => emit_rotate(b, session, stmt)?,
    }
    session.record_statement();
    Ok(())
}
