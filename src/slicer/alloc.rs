// This module implements the allocation rewriter. Given a begin_slice marker it follows
// the buffer argument backwards through constant address computations to the root
// storage (a fixed-size alloca or a global), checks that the storage from the traced
// offset holds blockCount x blockLength bytes, allocates the wide [8*blockLength x i32]
// slice array in the entry block and registers a SlicedBuffer for it in the session.
// The root allocation is tagged and queued for erasure; it only disappears if every
// use of it was migrated. trace_storage is shared with the pack/unpack markers and the
// orthogonal-region interpreter, which resolve their operands the same way.

//! Allocation rewriting for `begin_slice` markers.

use crate::core::{
    BufferId,
    BufferOrigin,
    Layout,
    MarkerKind,
    SlicedBuffer,
    SlicerConfig,
    TransformError,
    TransformResult,
    TransformSession,
    ELEMENT_BITS,
    WORD_BITS,
};
use crate::ir::{Function, FunctionBuilder, Globals, InstId, InstKind, Type, Value};

/// Tag on a root allocation whose contents were moved into slice storage.
pub const SLICED_ROOT_TAG: &str = "bitsliced";

/// Tag on the slice storage allocation itself.
pub const SLICE_STORAGE_TAG: &str = "bitsliced.storage";

/// Fixed-size storage a pointer operand resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRef {
    /// Alloca result or global.
    pub root: Value,
    /// Constant byte offset of the pointer inside `root`.
    pub offset: u64,
    /// Bytes from `offset` to the end of `root`.
    pub capacity: u64,
    /// Element type of the root (the root type itself when it is not an array).
    pub elem: Type,
    pub name: String,
}

impl StorageRef {
    /// Pointer to the first traced byte.
    pub fn base(&self, b: &mut FunctionBuilder) -> Value {
        if self.offset == 0 {
            return self.root;
        }
        let name = format!("{}.base", self.name);
        b.build_gep(Type::i8(), self.root, vec![Value::i64(self.offset)], &name)
    }
}

fn root_storage(func: &Function, globals: &Globals, root: Value) -> Option<StorageRef> {
    let (ty, name) = match root {
        Value::Inst(inst) => match &func.inst(inst).kind {
            InstKind::Alloca { ty } => (ty.clone(), func.value_name(&root).unwrap_or("buffer").to_string()),
            _ => return None,
        },
        Value::Global(g) => {
            let global = globals.get(g);
            (global.ty.clone(), global.name.clone())
        }
        _ => return None,
    };
    let elem = ty.element().cloned().unwrap_or_else(|| ty.clone());
    Some(StorageRef { root, offset: 0, capacity: ty.byte_size(), elem, name })
}

/// Constant byte offset of a `gep elem, base, indices`, or `None` if an index is not constant.
pub fn const_gep_offset(elem: &Type, indices: &[Value]) -> Option<i64> {
    let mut ty = elem;
    let mut offset: i64 = 0;
    for (n, idx) in indices.iter().enumerate() {
        if n > 0 {
            ty = ty.element()?;
        }
        let c = idx.as_const()?;
        offset = offset.checked_add(c.as_i64().checked_mul(ty.byte_size() as i64)?)?;
    }
    Some(offset)
}

/// Follow `ptr` back to fixed-size storage through constant address computations.
pub fn trace_storage(func: &Function, globals: &Globals, ptr: Value) -> TransformResult<StorageRef> {
    let mut offset: i64 = 0;
    let mut cur = ptr;
    loop {
        if let Value::Inst(inst) = cur {
            if let InstKind::Gep { elem, base, indices } = &func.inst(inst).kind {
                let step = const_gep_offset(elem, indices)
                    .ok_or_else(|| TransformError::invalid("buffer address has a non-constant index"))?;
                offset = offset
                    .checked_add(step)
                    .ok_or_else(|| TransformError::invalid("buffer address offset overflows"))?;
                cur = *base;
                continue;
            }
        }
        break;
    }

    let mut storage = root_storage(func, globals, cur)
        .ok_or_else(|| TransformError::invalid("operand does not trace back to a fixed-size allocation"))?;
    if offset < 0 || offset as u64 > storage.capacity {
        return Err(TransformError::invalid(format!(
            "offset {} lies outside '{}' ({} bytes)",
            offset, storage.name, storage.capacity
        )));
    }
    storage.offset = offset as u64;
    storage.capacity -= offset as u64;
    Ok(storage)
}

/// Integer value of a constant marker argument.
pub fn const_arg(value: Value, what: &str) -> TransformResult<u64> {
    value
        .as_const()
        .map(|c| c.bits)
        .ok_or_else(|| TransformError::invalid(format!("{} must be a constant", what)))
}

/// Arguments of a marker call, checked against the arity of `kind`.
pub fn marker_args(func: &Function, marker: InstId, kind: MarkerKind) -> TransformResult<Vec<Value>> {
    let arity = kind.arity();
    match &func.inst(marker).kind {
        InstKind::Call { args, .. } if args.len() == arity => Ok(args.clone()),
        InstKind::Call { callee, args } => Err(TransformError::invalid(format!(
            "'{}' takes {} arguments, got {}",
            callee,
            arity,
            args.len()
        ))),
        other => Err(TransformError::invalid(format!("marker is a '{}', not a call", other.opcode()))),
    }
}

/// Rewrite the allocation named by a `begin_slice(buffer, blockCount, blockLength)` marker.
pub fn rewrite_alloc<'arena>(
    func: &mut Function,
    globals: &Globals,
    session: &TransformSession<'arena>,
    config: &SlicerConfig,
    marker: InstId,
) -> TransformResult<BufferId> {
    let args = marker_args(func, marker, MarkerKind::BeginSlice)?;
    let storage = trace_storage(func, globals, args[0])?;

    let blocks = const_arg(args[1], "block count")?;
    if !(1..=u64::from(WORD_BITS)).contains(&blocks) {
        return Err(TransformError::invalid(format!(
            "block count {} is outside 1..={}",
            blocks, WORD_BITS
        )));
    }
    let block_length = const_arg(args[2], "block length")?;
    if block_length == 0 || block_length > u64::from(u32::MAX / ELEMENT_BITS) {
        return Err(TransformError::invalid(format!("block length {} is not usable", block_length)));
    }

    let required = blocks * block_length;
    if storage.capacity < required {
        let err = TransformError::InsufficientCapacity { required, available: storage.capacity };
        if config.enforce_capacity {
            return Err(err);
        }
        log::warn!("{}: {} (continuing, capacity checks disabled)", func.name, err);
    }

    let words = u64::from(ELEMENT_BITS) * block_length;
    let slice_name = format!("{}.bsliced", storage.name);
    let mut b = FunctionBuilder::new(func)?;
    let slice_storage = b.build_entry_alloca(Type::array(words, Type::i32()), &slice_name)?;
    if let Some(inst) = slice_storage.as_inst() {
        func.add_tag(inst, SLICE_STORAGE_TAG);
    }
    if let Some(root) = storage.root.as_inst() {
        func.add_tag(root, SLICED_ROOT_TAG);
        session.schedule_erase(root);
    }

    log::debug!(
        "{}: slicing '{}' as {} block(s) of {} bytes into {} words",
        func.name,
        storage.name,
        blocks,
        block_length,
        words
    );

    Ok(session.add_buffer(SlicedBuffer {
        id: BufferId(0),
        original_name: session.intern_str(&storage.name),
        root: storage.root,
        base_offset: storage.offset,
        layout: Layout::for_blocks(blocks as u32),
        element_width: ELEMENT_BITS,
        block_length: block_length as u32,
        storage: slice_storage,
        origin: BufferOrigin::Slice,
        marker,
        opened_at: None,
        closed_at: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Module;
    use bumpalo::Bump;

    const SRC: &str = r#"
global @table = [64 x i8] zeroinitializer

define void @f(ptr %ext, i32 %n) {
entry:
  %buf = alloca [16 x i8]
  %mid = gep [16 x i8], ptr %buf, i64 0, i64 4
  %dyn = gep i8, ptr %buf, i32 %n
  %g = gep [64 x i8], ptr @table, i64 0, i64 32
  call void @begin_slice(ptr %buf, i32 1, i32 16)
  call void @begin_slice(ptr %mid, i32 2, i32 8)
  call void @begin_slice(ptr %g, i32 4, i32 8)
  call void @begin_slice(ptr %ext, i32 1, i32 16)
  call void @begin_slice(ptr %dyn, i32 1, i32 4)
  call void @begin_slice(ptr %buf, i32 %n, i32 4)
  ret void
}
"#;

    fn markers(func: &Function) -> Vec<InstId> {
        func.program_order()
            .into_iter()
            .filter(|&i| matches!(func.inst(i).kind, InstKind::Call { .. }))
            .collect()
    }

    #[test]
    fn test_trace_storage() {
        let module = Module::parse(SRC).unwrap();
        let func = module.function("f").unwrap();
        let buf = Value::Inst(func.inst_by_name("buf").unwrap());

        let mid = trace_storage(func, &module.globals, Value::Inst(func.inst_by_name("mid").unwrap())).unwrap();
        assert_eq!(mid.root, buf);
        assert_eq!((mid.offset, mid.capacity), (4, 12));
        assert_eq!(mid.elem, Type::i8());

        let g = trace_storage(func, &module.globals, Value::Inst(func.inst_by_name("g").unwrap())).unwrap();
        assert_eq!(g.name, "table");
        assert_eq!((g.offset, g.capacity), (32, 32));
    }

    #[test]
    fn test_rewrite_alloc_registers_buffer() {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = Bump::new();
        let session = TransformSession::new(&arena);
        let mut module = Module::parse(SRC).unwrap();
        let globals = module.globals.clone();
        let func = module.function_mut("f").unwrap();
        session.begin_function("f");
        let config = SlicerConfig::default();
        let sites = markers(func);

        let id = rewrite_alloc(func, &globals, &session, &config, sites[0]).unwrap();
        let buffer = session.buffer(id).unwrap();
        assert_eq!(buffer.original_name, "buf");
        assert_eq!(buffer.layout, Layout::SingleInstance);
        assert_eq!(buffer.word_count(), 128);
        let storage = buffer.storage.as_inst().unwrap();
        assert_eq!(func.inst(storage).kind, InstKind::Alloca { ty: Type::array(128, Type::i32()) });
        assert_eq!(func.inst(storage).name.as_deref(), Some("buf.bsliced"));
        assert!(func.has_tag(func.inst_by_name("buf").unwrap(), SLICED_ROOT_TAG));

        let id = rewrite_alloc(func, &globals, &session, &config, sites[2]).unwrap();
        let buffer = session.buffer(id).unwrap();
        assert_eq!(buffer.layout, Layout::MultiInstance { blocks: 4 });
        assert_eq!(buffer.lane_count(), 32);
        assert_eq!(buffer.base_offset, 32);
    }

    #[test]
    fn test_rewrite_alloc_failures() {
        let arena = Bump::new();
        let session = TransformSession::new(&arena);
        let mut module = Module::parse(SRC).unwrap();
        let globals = module.globals.clone();
        let func = module.function_mut("f").unwrap();
        let config = SlicerConfig::default();
        let sites = markers(func);

        let err = rewrite_alloc(func, &globals, &session, &config, sites[1]).unwrap_err();
        assert_eq!(err, TransformError::InsufficientCapacity { required: 16, available: 12 });

        let err = rewrite_alloc(func, &globals, &session, &config, sites[3]).unwrap_err();
        assert!(matches!(err, TransformError::InvalidOperand { .. }));

        let err = rewrite_alloc(func, &globals, &session, &config, sites[4]).unwrap_err();
        assert!(err.to_string().contains("non-constant index"), "{}", err);

        let err = rewrite_alloc(func, &globals, &session, &config, sites[5]).unwrap_err();
        assert!(err.to_string().contains("must be a constant"), "{}", err);
        assert!(session.buffers().is_empty());
    }

    #[test]
    fn test_trace_storage_offset_overflow() {
        let module = Module::parse(
            r#"
define void @f() {
entry:
  %buf = alloca [16 x i8]
  %h1 = gep i8, ptr %buf, i64 6000000000000000000
  %h2 = gep i8, ptr %h1, i64 6000000000000000000
  call void @begin_slice(ptr %h2, i32 1, i32 16)
  ret void
}
"#,
        )
        .unwrap();
        let func = module.function("f").unwrap();
        let h2 = Value::Inst(func.inst_by_name("h2").unwrap());
        let err = trace_storage(func, &module.globals, h2).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);
    }

    #[test]
    fn test_marker_arity_follows_kind() {
        let module = Module::parse(SRC).unwrap();
        let func = module.function("f").unwrap();
        let begin = markers(func)[0];

        assert_eq!(marker_args(func, begin, MarkerKind::BeginSlice).unwrap().len(), 3);
        let err = marker_args(func, begin, MarkerKind::EndSlice).unwrap_err();
        assert!(err.to_string().contains("'begin_slice' takes 1 arguments, got 3"), "{}", err);
        let err = marker_args(func, func.inst_by_name("buf").unwrap(), MarkerKind::Pack).unwrap_err();
        assert!(err.to_string().contains("not a call"), "{}", err);
    }
}
