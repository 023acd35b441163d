// This module synthesizes the bit-pack and bit-unpack loops. Packing transposes bytes
// into slice words: for every word w of the slice storage (w = m*8 + k for byte m and
// bit k) it clears the word, then loops over the blocks j and ORs bit k of block j's
// byte m, read from source offset m + j*blockLength, into bit position j. Unpacking is
// the inverse: for every output byte position p it recovers the block j = p / L and the
// byte m = p % L, gathers the eight bits k from words m*8 + k at bit position j, and
// stores the truncated byte back. A single-instance buffer is the one-block case of the
// same loops. Extraction and insertion always use logical shifts and a one-bit mask.
// Besides the begin_slice/end_slice pair the module lowers the word-oriented pack and
// unpack markers, which treat their byte operand as 32 parallel instances and check the
// word operand's capacity before emitting anything.

//! Bit-pack / bit-unpack loop synthesis.

use super::alloc::{marker_args, trace_storage, StorageRef};
use super::loops::emit_counted_loop;
use crate::core::{
    BufferId,
    BufferOrigin,
    Layout,
    MarkerKind,
    SlicedBuffer,
    TransformError,
    TransformResult,
    TransformSession,
    ELEMENT_BITS,
    WORD_BITS,
};
use crate::ir::{BinOp, CastOp, Function, FunctionBuilder, Globals, InstId, Type, Value};

/// One byte-buffer/word-buffer pair to transpose.
#[derive(Debug, Clone, Copy)]
pub struct Transpose {
    /// Pointer to the first byte.
    pub bytes: Value,
    /// Pointer to the first slice word.
    pub words: Value,
    pub blocks: u32,
    pub block_length: u32,
}

impl Transpose {
    pub fn word_count(&self) -> u32 {
        ELEMENT_BITS * self.block_length
    }

    pub fn byte_count(&self) -> u32 {
        self.blocks * self.block_length
    }
}

/// Emit the loops filling `t.words` from `t.bytes` at the insertion point.
pub fn emit_pack(b: &mut FunctionBuilder, session: &TransformSession, t: Transpose, name: &str) -> TransformResult<()> {
    emit_counted_loop(b, session, name, Value::i32(0), Value::i32(t.word_count()), |b, w| {
        let word_ptr = b.build_gep(Type::i32(), t.words, vec![w], &format!("{}.wp", name));
        b.build_store(Value::i32(0), word_ptr);
        let byte = b.build_binary(BinOp::UDiv, w, Value::i32(ELEMENT_BITS), &format!("{}.byte", name));
        let bit = b.build_binary(BinOp::URem, w, Value::i32(ELEMENT_BITS), &format!("{}.bit", name));

        let inner = format!("{}.blk", name);
        emit_counted_loop(b, session, &inner, Value::i32(0), Value::i32(t.blocks), |b, j| {
            let stride = b.build_binary(BinOp::Mul, j, Value::i32(t.block_length), &format!("{}.stride", inner));
            let offset = b.build_binary(BinOp::Add, byte, stride, &format!("{}.off", inner));
            let src = b.build_gep(Type::i8(), t.bytes, vec![offset], &format!("{}.sp", inner));
            let v = b.build_load(Type::i8(), src, &format!("{}.byte", inner));
            let wide = b.build_cast(CastOp::ZExt, v, Type::i32(), &format!("{}.wide", inner));
            let shifted = b.build_binary(BinOp::LShr, wide, bit, &format!("{}.shr", inner));
            let lane = b.build_binary(BinOp::And, shifted, Value::i32(1), &format!("{}.lane", inner));
            let placed = b.build_binary(BinOp::Shl, lane, j, &format!("{}.place", inner));
            let cur = b.build_load(Type::i32(), word_ptr, &format!("{}.cur", inner));
            let merged = b.build_binary(BinOp::Or, cur, placed, &format!("{}.merge", inner));
            b.build_store(merged, word_ptr);
            Ok(())
        })
    })
}

/// Emit the loops writing `t.bytes` back from `t.words` at the insertion point.
pub fn emit_unpack(b: &mut FunctionBuilder, session: &TransformSession, t: Transpose, name: &str) -> TransformResult<()> {
    let acc = b.build_entry_alloca(Type::i32(), &format!("{}.acc", name))?;
    emit_counted_loop(b, session, name, Value::i32(0), Value::i32(t.byte_count()), |b, p| {
        let m = b.build_binary(BinOp::URem, p, Value::i32(t.block_length), &format!("{}.m", name));
        let j = b.build_binary(BinOp::UDiv, p, Value::i32(t.block_length), &format!("{}.j", name));
        let row = b.build_binary(BinOp::Mul, m, Value::i32(ELEMENT_BITS), &format!("{}.row", name));
        b.build_store(Value::i32(0), acc);

        let inner = format!("{}.bit", name);
        emit_counted_loop(b, session, &inner, Value::i32(0), Value::i32(ELEMENT_BITS), |b, k| {
            let index = b.build_binary(BinOp::Add, row, k, &format!("{}.idx", inner));
            let word_ptr = b.build_gep(Type::i32(), t.words, vec![index], &format!("{}.wp", inner));
            let word = b.build_load(Type::i32(), word_ptr, &format!("{}.word", inner));
            let shifted = b.build_binary(BinOp::LShr, word, j, &format!("{}.shr", inner));
            let lane = b.build_binary(BinOp::And, shifted, Value::i32(1), &format!("{}.lane", inner));
            let placed = b.build_binary(BinOp::Shl, lane, k, &format!("{}.place", inner));
            let cur = b.build_load(Type::i32(), acc, &format!("{}.cur", inner));
            let merged = b.build_binary(BinOp::Or, cur, placed, &format!("{}.merge", inner));
            b.build_store(merged, acc);
            Ok(())
        })?;

        let gathered = b.build_load(Type::i32(), acc, &format!("{}.val", name));
        let byte = b.build_cast(CastOp::Trunc, gathered, Type::i8(), &format!("{}.byte", name));
        let dst = b.build_gep(Type::i8(), t.bytes, vec![p], &format!("{}.dp", name));
        b.build_store(byte, dst);
        Ok(())
    })
}

fn buffer_transpose(b: &mut FunctionBuilder, buffer: &SlicedBuffer) -> Transpose {
    let bytes = if buffer.base_offset == 0 {
        buffer.root
    } else {
        let name = format!("{}.base", buffer.original_name);
        b.build_gep(Type::i8(), buffer.root, vec![Value::i64(buffer.base_offset)], &name)
    };
    Transpose {
        bytes,
        words: buffer.storage,
        blocks: buffer.block_count(),
        block_length: buffer.block_length,
    }
}

/// Fill a sliced buffer's storage right before its `begin_slice` marker.
pub fn emit_slice_pack(func: &mut Function, session: &TransformSession, buffer: &SlicedBuffer) -> TransformResult<()> {
    let mut b = FunctionBuilder::new(func)?;
    b.position_before(buffer.marker)?;
    let t = buffer_transpose(&mut b, buffer);
    emit_pack(&mut b, session, t, &format!("{}.pack", buffer.original_name))
}

/// Write a sliced buffer back right before its `end_slice` marker.
pub fn emit_slice_unpack(
    func: &mut Function,
    session: &TransformSession,
    buffer: &SlicedBuffer,
    end: InstId,
) -> TransformResult<()> {
    let mut b = FunctionBuilder::new(func)?;
    b.position_before(end)?;
    let t = buffer_transpose(&mut b, buffer);
    emit_unpack(&mut b, session, t, &format!("{}.unpack", buffer.original_name))
}

/// Words needed to hold `bytes` bytes as 32 parallel instances.
fn word_layout(bytes: &StorageRef) -> TransformResult<(u32, u64)> {
    let n = bytes.capacity;
    let per_block = u64::from(WORD_BITS);
    if n == 0 || n % per_block != 0 {
        return Err(TransformError::invalid(format!(
            "'{}' holds {} bytes, not a multiple of {}",
            bytes.name, n, per_block
        )));
    }
    let block_length = n / per_block;
    let block_length = u32::try_from(block_length)
        .map_err(|_| TransformError::invalid(format!("'{}' is too large to slice", bytes.name)))?;
    Ok((block_length, block_length as u64 * u64::from(ELEMENT_BITS)))
}

fn check_words(words: &StorageRef, required: u64) -> TransformResult<()> {
    let available = words.capacity / u64::from(WORD_BITS / 8);
    if available < required {
        return Err(TransformError::InsufficientCapacity { required, available });
    }
    Ok(())
}

/// Lower `pack(input, output)`: input bytes become 32 instances sliced into output words.
/// Returns the view buffer registered for the output.
pub fn lower_pack_marker<'arena>(
    func: &mut Function,
    globals: &Globals,
    session: &TransformSession<'arena>,
    marker: InstId,
) -> TransformResult<BufferId> {
    let args = marker_args(func, marker, MarkerKind::Pack)?;
    let input = trace_storage(func, globals, args[0])?;
    let output = trace_storage(func, globals, args[1])?;
    let (block_length, required) = word_layout(&input)?;
    check_words(&output, required)?;
    log::debug!(
        "{}: packing '{}' into '{}' as {} blocks of {} bytes",
        func.name,
        input.name,
        output.name,
        WORD_BITS,
        block_length
    );

    let mut b = FunctionBuilder::new(func)?;
    b.position_before(marker)?;
    let t = Transpose { bytes: input.base(&mut b), words: output.base(&mut b), blocks: WORD_BITS, block_length };
    emit_pack(&mut b, session, t, &format!("{}.pack", input.name))?;

    Ok(session.add_buffer(SlicedBuffer {
        id: BufferId(0),
        original_name: session.intern_str(&output.name),
        root: output.root,
        base_offset: output.offset,
        layout: Layout::for_blocks(WORD_BITS),
        element_width: ELEMENT_BITS,
        block_length,
        storage: t.words,
        origin: BufferOrigin::View,
        marker,
        opened_at: None,
        closed_at: None,
    }))
}

/// Lower `unpack(input, output)`: input words are transposed back into output bytes.
pub fn lower_unpack_marker(
    func: &mut Function,
    globals: &Globals,
    session: &TransformSession,
    marker: InstId,
) -> TransformResult<()> {
    let args = marker_args(func, marker, MarkerKind::Unpack)?;
    let input = trace_storage(func, globals, args[0])?;
    let output = trace_storage(func, globals, args[1])?;
    let (block_length, required) = word_layout(&output)?;
    check_words(&input, required)?;
    log::debug!("{}: unpacking '{}' into '{}'", func.name, input.name, output.name);

    let mut b = FunctionBuilder::new(func)?;
    b.position_before(marker)?;
    let t = Transpose { bytes: output.base(&mut b), words: input.base(&mut b), blocks: WORD_BITS, block_length };
    emit_unpack(&mut b, session, t, &format!("{}.unpack", output.name))
}
