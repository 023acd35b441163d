// This module implements the operand/use rewriter, the second pass over the function.
// It visits the region members found by the taint analysis in program order and
// replaces each scalar operation on sliced data by its per-lane equivalent. Addresses
// are never materialised as lane pointers ahead of time: a load or store through an
// address derived from a sliced root recomputes the byte offset from the gep chain at
// its own position and indexes the eight words m*8 + k of the slice storage. Loads
// produce eight lane values, stores write eight lanes (broadcasting a scalar value bit
// by bit into all-ones or all-zero words), bitwise operators combine lanes pairwise,
// extensions pad or replicate lanes, truncation drops lanes, and shifts by a scalar
// amount spill the lanes to a small stack array and read them back at a shifted index
// that is clamped to the lane window. Anything else touching sliced data is reported as
// unsupported and left alone; every rewritten original is queued for erasure.

//! Slice-wise rewriting of loads, stores and operators.

use super::taint::{Taint, TaintAnalysis};
use crate::core::{
    MarkerKind,
    SlicedBuffer,
    TransformError,
    TransformResult,
    TransformSession,
    ELEMENT_BITS,
};
use crate::ir::{BinOp, CastOp, Function, FunctionBuilder, IcmpPred, InstId, InstKind, Type, Value};
use hashbrown::HashMap;

/// Tag on the per-lane loads and stores emitted for a sliced access.
pub const LANE_TAG: &str = "sliced.lane";

/// All-ones slice word.
const LANE_ONES: u32 = u32::MAX;

pub struct OperandRewriter<'a, 's, 'arena> {
    taint: &'a TaintAnalysis<Function>,
    session: &'s TransformSession<'arena>,
    lanes: HashMap<InstId, Vec<Value>>,
}

impl<'a, 's, 'arena> OperandRewriter<'a, 's, 'arena> {
    pub fn new(taint: &'a TaintAnalysis<Function>, session: &'s TransformSession<'arena>) -> Self {
        Self { taint, session, lanes: HashMap::new() }
    }

    /// Rewrite every region member. Returns the number of rewritten instructions.
    pub fn run(&mut self, func: &mut Function) -> usize {
        let mut rewritten = 0;
        for inst in self.taint.members().to_vec() {
            if !func.is_live(inst) || MarkerKind::ALL.iter().any(|k| func.has_tag(inst, k.tag())) {
                continue;
            }
            let opcode = func.inst(inst).kind.opcode();
            match self.rewrite(func, inst) {
                Ok(()) => {
                    log::trace!("{}: rewrote {} slice-wise", func.name, opcode);
                    self.session.schedule_erase(inst);
                    self.session.record_rewrite(opcode);
                    rewritten += 1;
                }
                Err(err) => {
                    let what = match func.inst(inst).name.as_deref() {
                        Some(name) => format!("'%{}'", name),
                        None => format!("'{}'", opcode),
                    };
                    self.session.report(format!("{} (at {})", err, what));
                }
            }
        }
        rewritten
    }

    fn region_buffer(&self, inst: InstId) -> TransformResult<SlicedBuffer<'arena>> {
        self.taint
            .buffer_of(inst)
            .and_then(|id| self.session.buffer(id))
            .ok_or_else(|| TransformError::invalid("instruction is not inside a slice region"))
    }

    fn rewrite(&mut self, func: &mut Function, inst: InstId) -> TransformResult<()> {
        let data = func.inst(inst);
        let kind = data.kind.clone();
        let width = data.ty.int_width();
        let name = data.name.clone().unwrap_or_else(|| kind.opcode().to_string());

        let mut b = FunctionBuilder::new(func)?;
        b.position_before(inst)?;

        match kind {
            InstKind::Gep { .. } => {
                if self.taint.taint(inst) == Some(Taint::Data) {
                    return Err(TransformError::unsupported("address computed from a bit-sliced index"));
                }
                // Offsets are recomputed at each load and store.
                Ok(())
            }

            InstKind::Load { ty, ptr } => {
                if ty != Type::i8() {
                    return Err(TransformError::unsupported(format!("load of {} from sliced storage", ty)));
                }
                let buffer = self.region_buffer(inst)?;
                let ptrs = self.lane_pointers(&mut b, &buffer, ptr, &name)?;
                let lanes = ptrs
                    .into_iter()
                    .enumerate()
                    .map(|(k, p)| {
                        let lane = b.build_load(Type::i32(), p, &format!("{}.l{}", name, k));
                        tag_lane(&mut b, lane);
                        lane
                    })
                    .collect();
                self.lanes.insert(inst, lanes);
                Ok(())
            }

            InstKind::Store { value, ptr } => {
                if self.taint.taint(inst) != Some(Taint::Address) {
                    return Err(TransformError::unsupported("store of a bit-sliced value to unsliced memory"));
                }
                let value_ty = b.func().value_type(&value);
                if value_ty != Type::i8() {
                    return Err(TransformError::unsupported(format!("store of {} into sliced storage", value_ty)));
                }
                let buffer = self.region_buffer(inst)?;
                let lanes = self.lanes_of(&mut b, value, ELEMENT_BITS, &name)?;
                let ptrs = self.lane_pointers(&mut b, &buffer, ptr, &name)?;
                for (lane, p) in lanes.into_iter().zip(ptrs) {
                    let store = b.build_store(lane, p);
                    b.func_mut().add_tag(store, LANE_TAG);
                }
                Ok(())
            }

            InstKind::Binary { op, lhs, rhs } if op.is_bitwise() => {
                let w = width.ok_or_else(|| TransformError::invalid("bitwise operation on a non-integer"))?;
                let l = self.lanes_of(&mut b, lhs, w, &name)?;
                let r = self.lanes_of(&mut b, rhs, w, &name)?;
                let lanes = l
                    .into_iter()
                    .zip(r)
                    .enumerate()
                    .map(|(k, (x, y))| b.build_binary(op, x, y, &format!("{}.l{}", name, k)))
                    .collect();
                self.lanes.insert(inst, lanes);
                Ok(())
            }

            InstKind::Binary { op, lhs, rhs } if op.is_shift() => {
                if self.sliced_lanes(b.func(), rhs)?.is_some() {
                    return Err(TransformError::unsupported(format!("{} by a bit-sliced amount", op.name())));
                }
                let w = width.ok_or_else(|| TransformError::invalid("shift of a non-integer"))?;
                let l = self.lanes_of(&mut b, lhs, w, &name)?;
                let lanes = emit_lane_shift(&mut b, op, &l, rhs, &name)?;
                self.lanes.insert(inst, lanes);
                Ok(())
            }

            InstKind::Cast { op, value, to } => {
                let from = b
                    .func()
                    .value_type(&value)
                    .int_width()
                    .ok_or_else(|| TransformError::invalid("cast of a non-integer"))?;
                let to = to.int_width().ok_or_else(|| TransformError::invalid("cast to a non-integer"))?;
                let mut lanes = self.lanes_of(&mut b, value, from, &name)?;
                match op {
                    CastOp::Trunc => lanes.truncate(to as usize),
                    CastOp::ZExt => lanes.resize(to as usize, Value::i32(0)),
                    CastOp::SExt => {
                        let sign = lanes.last().copied().unwrap_or(Value::i32(0));
                        lanes.resize(to as usize, sign);
                    }
                }
                self.lanes.insert(inst, lanes);
                Ok(())
            }

            other => Err(TransformError::unsupported(other.opcode())),
        }
    }

    /// Lanes of an already rewritten value, `None` for a scalar.
    fn sliced_lanes(&self, func: &Function, value: Value) -> TransformResult<Option<Vec<Value>>> {
        let Value::Inst(def) = value else {
            return Ok(None);
        };
        if let Some(lanes) = self.lanes.get(&def) {
            return Ok(Some(lanes.clone()));
        }
        if self.taint.is_member(def) && self.taint.taint(def) == Some(Taint::Data) {
            let name = func.inst(def).name.as_deref().unwrap_or("value");
            return Err(TransformError::invalid(format!("operand '%{}' was not bit-sliced", name)));
        }
        Ok(None)
    }

    /// Lanes of `value`, broadcasting a scalar bit by bit.
    fn lanes_of(&self, b: &mut FunctionBuilder, value: Value, width: u32, name: &str) -> TransformResult<Vec<Value>> {
        if let Some(lanes) = self.sliced_lanes(b.func(), value)? {
            if lanes.len() != width as usize {
                return Err(TransformError::invalid(format!(
                    "operand has {} lanes, expected {}",
                    lanes.len(),
                    width
                )));
            }
            return Ok(lanes);
        }
        Ok(broadcast(b, value, width, name))
    }

    fn lane_pointers(
        &self,
        b: &mut FunctionBuilder,
        buffer: &SlicedBuffer,
        ptr: Value,
        name: &str,
    ) -> TransformResult<Vec<Value>> {
        let offset = self.byte_offset(b, ptr, buffer.root, name)?;
        let rel = b.build_binary(BinOp::Sub, offset, Value::i32(buffer.base_offset as u32), &format!("{}.off", name));
        if let Some(c) = rel.as_const() {
            if c.bits >= u64::from(buffer.block_length) {
                return Err(TransformError::invalid(format!(
                    "byte {} lies outside the {}-byte sliced window of '{}'",
                    c.as_i64(),
                    buffer.block_length,
                    buffer.original_name
                )));
            }
        }
        let row = b.build_binary(BinOp::Mul, rel, Value::i32(ELEMENT_BITS), &format!("{}.row", name));
        Ok((0..ELEMENT_BITS)
            .map(|k| {
                let index = b.build_binary(BinOp::Add, row, Value::i32(k), &format!("{}.w{}", name, k));
                b.build_gep(Type::i32(), buffer.storage, vec![index], &format!("{}.p{}", name, k))
            })
            .collect())
    }

    /// Byte offset (i32) of `ptr` from `root`, following the gep chain.
    fn byte_offset(&self, b: &mut FunctionBuilder, ptr: Value, root: Value, name: &str) -> TransformResult<Value> {
        if ptr == root {
            return Ok(Value::i32(0));
        }
        let not_derived = || TransformError::invalid("address does not derive from the sliced buffer");
        let def = ptr.as_inst().ok_or_else(not_derived)?;
        let InstKind::Gep { elem, base, indices } = b.func().inst(def).kind.clone() else {
            return Err(not_derived());
        };

        let mut offset = self.byte_offset(b, base, root, name)?;
        let mut ty = elem;
        for (n, idx) in indices.into_iter().enumerate() {
            if n > 0 {
                ty = ty
                    .element()
                    .cloned()
                    .ok_or_else(|| TransformError::invalid(format!("gep steps into non-array type {}", ty)))?;
            }
            if self.sliced_lanes(b.func(), idx)?.is_some() {
                return Err(TransformError::unsupported("address computed from a bit-sliced index"));
            }
            let idx = b.build_int_resize(idx, 32, true, &format!("{}.idx", name));
            let scaled = b.build_binary(BinOp::Mul, idx, Value::i32(ty.byte_size() as u32), &format!("{}.scaled", name));
            offset = b.build_binary(BinOp::Add, offset, scaled, &format!("{}.addr", name));
        }
        Ok(offset)
    }
}

fn tag_lane(b: &mut FunctionBuilder, lane: Value) {
    if let Some(inst) = lane.as_inst() {
        b.func_mut().add_tag(inst, LANE_TAG);
    }
}

/// Spread bit k of a `width`-bit scalar into an all-ones or all-zero lane word.
pub fn broadcast(b: &mut FunctionBuilder, value: Value, width: u32, name: &str) -> Vec<Value> {
    (0..width)
        .map(|k| {
            let shifted = b.build_binary(BinOp::LShr, value, Value::int(width, u64::from(k)), &format!("{}.s{}", name, k));
            let bit = b.build_binary(BinOp::And, shifted, Value::int(width, 1), &format!("{}.b{}", name, k));
            let wide = b.build_int_resize(bit, 32, false, &format!("{}.z{}", name, k));
            b.build_binary(BinOp::Mul, wide, Value::i32(LANE_ONES), &format!("{}.m{}", name, k))
        })
        .collect()
}

/// Shift sliced lanes by a scalar amount.
///
/// Lane k of the result reads lane `k - s` (shl) or `k + s` (lshr, ashr) of the
/// source. Reads outside the window give zero lanes, except that ashr clamps to
/// the sign lane, so amounts at or beyond the width saturate.
pub fn emit_lane_shift(
    b: &mut FunctionBuilder,
    op: BinOp,
    lanes: &[Value],
    amount: Value,
    name: &str,
) -> TransformResult<Vec<Value>> {
    let width = lanes.len() as u32;
    let spill = b.build_entry_alloca(Type::array(u64::from(width), Type::i32()), &format!("{}.spill", name))?;
    for (k, &lane) in lanes.iter().enumerate() {
        let p = b.build_gep(Type::i32(), spill, vec![Value::i32(k as u32)], &format!("{}.sp{}", name, k));
        b.build_store(lane, p);
    }

    let c = |v: u32| Value::int(width, u64::from(v));
    let mut out = Vec::with_capacity(lanes.len());
    for k in 0..width {
        let (in_range, src, fallback) = match op {
            BinOp::Shl => (
                b.build_icmp(IcmpPred::Ule, amount, c(k), &format!("{}.in{}", name, k)),
                b.build_binary(BinOp::Sub, c(k), amount, &format!("{}.src{}", name, k)),
                c(0),
            ),
            BinOp::LShr | BinOp::AShr => (
                b.build_icmp(IcmpPred::Ult, amount, c(width - k), &format!("{}.in{}", name, k)),
                b.build_binary(BinOp::Add, c(k), amount, &format!("{}.src{}", name, k)),
                if op == BinOp::AShr { c(width - 1) } else { c(0) },
            ),
            other => return Err(TransformError::unsupported(other.name())),
        };
        let index = b.build_select(in_range, src, fallback, &format!("{}.sel{}", name, k));
        let index = b.build_int_resize(index, 32, false, &format!("{}.ix{}", name, k));
        let p = b.build_gep(Type::i32(), spill, vec![index], &format!("{}.rp{}", name, k));
        let lane = b.build_load(Type::i32(), p, &format!("{}.r{}", name, k));

        let lane = if op == BinOp::AShr {
            lane
        } else {
            let keep = b.build_int_resize(in_range, 32, false, &format!("{}.keep{}", name, k));
            let mask = b.build_binary(BinOp::Sub, Value::i32(0), keep, &format!("{}.mask{}", name, k));
            b.build_binary(BinOp::And, lane, mask, &format!("{}.l{}", name, k))
        };
        out.push(lane);
    }
    Ok(out)
}
