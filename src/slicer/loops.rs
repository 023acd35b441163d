// This module provides the one reusable piece of control-flow scaffolding every emitter
// in the slicer is built from: a counted loop. emit_counted_loop splits the current block
// at the builder's insertion point, chains a condition block, a body block and an
// increment block between the two halves, keeps the induction variable in an i32 stack
// slot in the entry block (so no phi nodes are needed), hands the body closure a builder
// positioned inside the body together with the loaded index, and finally leaves the
// builder at the start of the exit block so emission continues right after the loop.
// Loops nest by calling it again from inside a body closure. emit_guarded is the
// single-armed conditional used for bounds-checked stores.

//! Counted loop and guard scaffolding.

use crate::core::{TransformResult, TransformSession};
use crate::ir::{BinOp, FunctionBuilder, IcmpPred, InstKind, Type, Value};

/// Emit `for (idx = start; idx < end; idx++) body(idx)` at the insertion point.
///
/// `start` and `end` are i32 values. Block names are derived from `name`.
pub fn emit_counted_loop<F>(
    b: &mut FunctionBuilder,
    session: &TransformSession,
    name: &str,
    start: Value,
    end: Value,
    body: F,
) -> TransformResult<()>
where
    F: FnOnce(&mut FunctionBuilder, Value) -> TransformResult<()>,
{
    let slot = b.build_entry_alloca(Type::i32(), &format!("{}.idx", name))?;
    b.build_store(start, slot);

    let head = b.current_block();
    let (exit, br) = b.split_here(&format!("{}.end", name));
    let cond = b.append_block_after(head, &format!("{}.cond", name));
    let body_block = b.append_block_after(cond, &format!("{}.body", name));
    let inc = b.append_block_after(body_block, &format!("{}.inc", name));
    b.func_mut().redirect_branch(br, exit, cond);

    b.position_at_end(cond);
    let iv = b.build_load(Type::i32(), slot, &format!("{}.iv", name));
    let in_range = b.build_icmp(IcmpPred::Ult, iv, end, &format!("{}.cmp", name));
    b.build_condbr(in_range, body_block, exit);

    b.position_at_end(body_block);
    let idx = b.build_load(Type::i32(), slot, &format!("{}.i", name));
    body(b, idx)?;
    b.build_br(inc);

    b.position_at_end(inc);
    let cur = b.build_load(Type::i32(), slot, &format!("{}.cur", name));
    let next = b.build_binary(BinOp::Add, cur, Value::i32(1), &format!("{}.next", name));
    b.build_store(next, slot);
    b.build_br(cond);

    b.position_at_start(exit);
    session.record_loop();
    log::trace!("emitted loop {}", name);
    Ok(())
}

/// Emit `if (cond) body()` at the insertion point.
pub fn emit_guarded<F>(b: &mut FunctionBuilder, name: &str, cond: Value, body: F) -> TransformResult<()>
where
    F: FnOnce(&mut FunctionBuilder) -> TransformResult<()>,
{
    let head = b.current_block();
    let (join, br) = b.split_here(&format!("{}.end", name));
    let then_block = b.append_block_after(head, &format!("{}.then", name));
    b.func_mut().inst_mut(br).kind = InstKind::CondBr { cond, then_dest: then_block, else_dest: join };

    b.position_at_end(then_block);
    body(b)?;
    b.build_br(join);

    b.position_at_start(join);
    Ok(())
}
