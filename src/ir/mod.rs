// This module defines the small SSA intermediate representation the bit-slicing pass
// operates on. A Module holds globals (integer arrays and C-string literals) and
// functions; a Function owns an instruction arena, a block arena and a layout order.
// Instructions are addressed by stable InstId handles that survive insertion,
// block splitting and erasure (erasure only clears the parent link), so the
// transformation can queue instructions for deletion and erase them last. The
// instruction set is LLVM-shaped: alloca/gep/load/store, integer binary ops, icmp,
// casts, select, calls and br/condbr/ret.

//! SSA IR used by the bit-slicing transformation.
//!
//! The format is designed to be:
//! - Human-readable and writable (see [`parser`] for the grammar)
//! - Mutable through stable handles (see [`builder`])
//! - Executable (see [`crate::interp`])
//!
//! ```text
//! global @desc = c"out:all::^::a:all-b:all"
//!
//! define void @main() {
//! entry:
//!   %a = alloca [16 x i8]
//!   call void @begin_slice(ptr %a, i32 1, i32 16)
//!   ret void
//! }
//! ```

use hashbrown::{HashMap, HashSet};
use std::fmt;

pub mod builder;
pub mod check;
pub mod parser;
pub mod printer;
pub mod verify;

pub use builder::FunctionBuilder;
pub use check::{CheckDirective, TestRunner, TestSpec};
pub use verify::{verify_function, verify_module};

use thiserror::Error;

/// Errors raised by IR construction and verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("instruction {0:?} is not attached to a block")]
    Detached(InstId),

    #[error("function '{0}' has no body")]
    NoBody(String),

    #[error("verification failed in '{func}': {reason}")]
    Verify { func: String, reason: String },
}

pub type IrResult<T> = Result<T, IrError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    Ptr,
    Array(u64, Box<Type>),
}

impl Type {
    pub fn i1() -> Self {
        Type::Int(1)
    }

    pub fn i8() -> Self {
        Type::Int(8)
    }

    pub fn i32() -> Self {
        Type::Int(32)
    }

    pub fn i64() -> Self {
        Type::Int(64)
    }

    pub fn array(len: u64, elem: Type) -> Self {
        Type::Array(len, Box::new(elem))
    }

    /// Size in bytes when stored in memory.
    pub fn byte_size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::Int(w) => u64::from(w.div_ceil(8)),
            Type::Ptr => 8,
            Type::Array(n, elem) => n * elem.byte_size(),
        }
    }

    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }

    pub fn array_len(&self) -> Option<u64> {
        match self {
            Type::Array(n, _) => Some(*n),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(_, elem) => Some(elem),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(w) => write!(f, "i{}", w),
            Type::Ptr => write!(f, "ptr"),
            Type::Array(n, elem) => write!(f, "[{} x {}]", n, elem),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// Mask covering the low `width` bits.
pub fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Sign-extend the low `width` bits of `bits`.
pub fn sign_extend(bits: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return bits as i64;
    }
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}

/// Integer constant, stored truncated to its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Const {
    pub width: u32,
    pub bits: u64,
}

impl Const {
    pub fn new(width: u32, bits: u64) -> Self {
        Self { width, bits: bits & width_mask(width) }
    }

    pub fn as_i64(&self) -> i64 {
        sign_extend(self.bits, self.width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Inst(InstId),
    Arg(u32),
    Const(Const),
    Global(GlobalId),
}

impl Value {
    pub fn int(width: u32, bits: u64) -> Self {
        Value::Const(Const::new(width, bits))
    }

    pub fn i32(bits: u32) -> Self {
        Value::int(32, u64::from(bits))
    }

    pub fn i64(bits: u64) -> Self {
        Value::int(64, bits)
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<Const> {
        match self {
            Value::Const(c) => Some(*c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::URem => "urem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "add" => BinOp::Add,
            "sub" => BinOp::Sub,
            "mul" => BinOp::Mul,
            "udiv" => BinOp::UDiv,
            "urem" => BinOp::URem,
            "and" => BinOp::And,
            "or" => BinOp::Or,
            "xor" => BinOp::Xor,
            "shl" => BinOp::Shl,
            "lshr" => BinOp::LShr,
            "ashr" => BinOp::AShr,
            _ => return None,
        })
    }

    pub fn is_bitwise(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinOp::Shl | BinOp::LShr | BinOp::AShr)
    }

    /// Evaluate on `width`-bit operands. Returns `None` on division by zero.
    /// Shift amounts at or beyond the width saturate.
    pub fn eval(self, width: u32, a: u64, b: u64) -> Option<u64> {
        let mask = width_mask(width);
        let (a, b) = (a & mask, b & mask);
        let r = match self {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::UDiv => a.checked_div(b)?,
            BinOp::URem => a.checked_rem(b)?,
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Shl => {
                if b >= u64::from(width) {
                    0
                } else {
                    a << b
                }
            }
            BinOp::LShr => {
                if b >= u64::from(width) {
                    0
                } else {
                    a >> b
                }
            }
            BinOp::AShr => {
                let s = sign_extend(a, width);
                let amt = b.min(u64::from(width.saturating_sub(1)).min(63));
                (s >> amt) as u64
            }
        };
        Some(r & mask)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl IcmpPred {
    pub fn name(self) -> &'static str {
        match self {
            IcmpPred::Eq => "eq",
            IcmpPred::Ne => "ne",
            IcmpPred::Ult => "ult",
            IcmpPred::Ule => "ule",
            IcmpPred::Ugt => "ugt",
            IcmpPred::Uge => "uge",
            IcmpPred::Slt => "slt",
            IcmpPred::Sle => "sle",
            IcmpPred::Sgt => "sgt",
            IcmpPred::Sge => "sge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => IcmpPred::Eq,
            "ne" => IcmpPred::Ne,
            "ult" => IcmpPred::Ult,
            "ule" => IcmpPred::Ule,
            "ugt" => IcmpPred::Ugt,
            "uge" => IcmpPred::Uge,
            "slt" => IcmpPred::Slt,
            "sle" => IcmpPred::Sle,
            "sgt" => IcmpPred::Sgt,
            "sge" => IcmpPred::Sge,
            _ => return None,
        })
    }

    pub fn eval(self, width: u32, a: u64, b: u64) -> bool {
        let mask = width_mask(width);
        let (ua, ub) = (a & mask, b & mask);
        let (sa, sb) = (sign_extend(ua, width), sign_extend(ub, width));
        match self {
            IcmpPred::Eq => ua == ub,
            IcmpPred::Ne => ua != ub,
            IcmpPred::Ult => ua < ub,
            IcmpPred::Ule => ua <= ub,
            IcmpPred::Ugt => ua > ub,
            IcmpPred::Uge => ua >= ub,
            IcmpPred::Slt => sa < sb,
            IcmpPred::Sle => sa <= sb,
            IcmpPred::Sgt => sa > sb,
            IcmpPred::Sge => sa >= sb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
}

impl CastOp {
    pub fn name(self) -> &'static str {
        match self {
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::Trunc => "trunc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "zext" => CastOp::ZExt,
            "sext" => CastOp::SExt,
            "trunc" => CastOp::Trunc,
            _ => return None,
        })
    }

    pub fn eval(self, from: u32, to: u32, bits: u64) -> u64 {
        let v = match self {
            CastOp::ZExt | CastOp::Trunc => bits & width_mask(from),
            CastOp::SExt => sign_extend(bits, from) as u64,
        };
        v & width_mask(to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Alloca { ty: Type },
    Gep { elem: Type, base: Value, indices: Vec<Value> },
    Load { ty: Type, ptr: Value },
    Store { value: Value, ptr: Value },
    Binary { op: BinOp, lhs: Value, rhs: Value },
    Icmp { pred: IcmpPred, lhs: Value, rhs: Value },
    Cast { op: CastOp, value: Value, to: Type },
    Select { cond: Value, on_true: Value, on_false: Value },
    Call { callee: String, args: Vec<Value> },
    Br { target: BlockId },
    CondBr { cond: Value, then_dest: BlockId, else_dest: BlockId },
    Ret { value: Option<Value> },
}

impl InstKind {
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::Br { .. } => Vec::new(),
            InstKind::Gep { base, indices, .. } => {
                let mut ops = Vec::with_capacity(indices.len() + 1);
                ops.push(*base);
                ops.extend(indices.iter().copied());
                ops
            }
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Store { value, ptr } => vec![*value, *ptr],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Select { cond, on_true, on_false } => vec![*cond, *on_true, *on_false],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Ret { value } => value.iter().copied().collect(),
        }
    }

    /// Mutable access to the operand at `slot`, numbered as in [`Self::operands`].
    pub fn operand_mut(&mut self, slot: usize) -> Option<&mut Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::Br { .. } => None,
            InstKind::Gep { base, indices, .. } => {
                if slot == 0 {
                    Some(base)
                } else {
                    indices.get_mut(slot - 1)
                }
            }
            InstKind::Load { ptr, .. } => (slot == 0).then_some(ptr),
            InstKind::Store { value, ptr } => match slot {
                0 => Some(value),
                1 => Some(ptr),
                _ => None,
            },
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => match slot {
                0 => Some(lhs),
                1 => Some(rhs),
                _ => None,
            },
            InstKind::Cast { value, .. } => (slot == 0).then_some(value),
            InstKind::Select { cond, on_true, on_false } => match slot {
                0 => Some(cond),
                1 => Some(on_true),
                2 => Some(on_false),
                _ => None,
            },
            InstKind::Call { args, .. } => args.get_mut(slot),
            InstKind::CondBr { cond, .. } => (slot == 0).then_some(cond),
            InstKind::Ret { value } => value.as_mut().filter(|_| slot == 0),
        }
    }

    /// Mutable access to successor `slot`, numbered as in [`Self::successors`].
    pub fn successor_mut(&mut self, slot: usize) -> Option<&mut BlockId> {
        match self {
            InstKind::Br { target } => (slot == 0).then_some(target),
            InstKind::CondBr { then_dest, else_dest, .. } => match slot {
                0 => Some(then_dest),
                1 => Some(else_dest),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. })
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr { then_dest, else_dest, .. } => vec![*then_dest, *else_dest],
            _ => Vec::new(),
        }
    }

    /// Short opcode name used in statistics and diagnostics.
    pub fn opcode(&self) -> &'static str {
        match self {
            InstKind::Alloca { .. } => "alloca",
            InstKind::Gep { .. } => "gep",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Binary { op, .. } => op.name(),
            InstKind::Icmp { .. } => "icmp",
            InstKind::Cast { op, .. } => op.name(),
            InstKind::Select { .. } => "select",
            InstKind::Call { .. } => "call",
            InstKind::Br { .. } => "br",
            InstKind::CondBr { .. } => "condbr",
            InstKind::Ret { .. } => "ret",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstData {
    pub kind: InstKind,
    /// Result type (`void` for stores, branches and void calls).
    pub ty: Type,
    pub name: Option<String>,
    pub tags: Vec<String>,
    parent: Option<BlockId>,
}

impl InstData {
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<InstId>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub declaration: bool,
    insts: Vec<InstData>,
    blocks: Vec<BlockData>,
    layout: Vec<BlockId>,
    names: HashSet<String>,
    block_names: HashSet<String>,
}

impl Function {
    pub fn new(name: &str, params: Vec<Param>, ret: Type) -> Self {
        let names = params.iter().map(|p| p.name.clone()).collect();
        Self {
            name: name.to_string(),
            params,
            ret,
            declaration: false,
            insts: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
            names,
            block_names: HashSet::new(),
        }
    }

    /// Return `base` if no value uses it yet, otherwise `base.N`.
    pub fn unique_name(&mut self, base: &str) -> String {
        fresh_name(&mut self.names, base)
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = self.new_block(name);
        self.layout.push(id);
        id
    }

    /// Create a block placed directly after `after` in the layout.
    pub fn insert_block_after(&mut self, after: BlockId, name: &str) -> BlockId {
        let id = self.new_block(name);
        let pos = self
            .layout
            .iter()
            .position(|&b| b == after)
            .map(|p| p + 1)
            .unwrap_or(self.layout.len());
        self.layout.insert(pos, id);
        id
    }

    fn new_block(&mut self, name: &str) -> BlockId {
        let name = fresh_name(&mut self.block_names, name);
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData { name, insts: Vec::new() });
        id
    }

    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.0 as usize]
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.layout.iter().copied().find(|&b| self.block(b).name == name)
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst.0 as usize]
    }

    pub fn inst_mut(&mut self, inst: InstId) -> &mut InstData {
        &mut self.insts[inst.0 as usize]
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Create a detached instruction. Named results get a function-unique name.
    pub fn create_inst(&mut self, kind: InstKind, ty: Type, name: Option<&str>) -> InstId {
        let name = name.map(|n| self.unique_name(n));
        let id = InstId(self.insts.len() as u32);
        self.insts.push(InstData { kind, ty, name, tags: Vec::new(), parent: None });
        id
    }

    pub fn insert_inst(&mut self, block: BlockId, index: usize, inst: InstId) {
        self.blocks[block.0 as usize].insts.insert(index, inst);
        self.insts[inst.0 as usize].parent = Some(block);
    }

    pub fn push_inst(&mut self, block: BlockId, inst: InstId) {
        let len = self.block(block).insts.len();
        self.insert_inst(block, len, inst);
    }

    pub fn is_live(&self, inst: InstId) -> bool {
        self.inst(inst).parent.is_some()
    }

    /// Block and index of a live instruction.
    pub fn position(&self, inst: InstId) -> Option<(BlockId, usize)> {
        let block = self.inst(inst).parent?;
        let index = self.block(block).insts.iter().position(|&i| i == inst)?;
        Some((block, index))
    }

    /// Detach an instruction from its block. Returns false if it was not attached.
    pub fn erase(&mut self, inst: InstId) -> bool {
        let Some((block, index)) = self.position(inst) else {
            return false;
        };
        self.blocks[block.0 as usize].insts.remove(index);
        self.insts[inst.0 as usize].parent = None;
        true
    }

    /// Split `block` before `index`: instructions from `index` on move into a new
    /// block placed after it, and `block` is closed with a branch to the new block.
    /// Returns the new block and the joining branch.
    pub fn split_block(&mut self, block: BlockId, index: usize, name: &str) -> (BlockId, InstId) {
        let tail = self.insert_block_after(block, name);
        let moved: Vec<InstId> = self.blocks[block.0 as usize].insts.split_off(index);
        for &inst in &moved {
            self.insts[inst.0 as usize].parent = Some(tail);
        }
        self.blocks[tail.0 as usize].insts = moved;
        let br = self.create_inst(InstKind::Br { target: tail }, Type::Void, None);
        self.push_inst(block, br);
        (tail, br)
    }

    /// Retarget the successor `from` of a branch instruction to `to`.
    pub fn redirect_branch(&mut self, inst: InstId, from: BlockId, to: BlockId) {
        match &mut self.inst_mut(inst).kind {
            InstKind::Br { target } if *target == from => *target = to,
            InstKind::CondBr { then_dest, else_dest, .. } => {
                if *then_dest == from {
                    *then_dest = to;
                }
                if *else_dest == from {
                    *else_dest = to;
                }
            }
            _ => {}
        }
    }

    /// All live instructions in layout order.
    pub fn program_order(&self) -> Vec<InstId> {
        self.layout
            .iter()
            .flat_map(|&b| self.block(b).insts.iter().copied())
            .collect()
    }

    /// Map every live instruction to the live instructions that use its result.
    pub fn users(&self) -> HashMap<InstId, Vec<InstId>> {
        let mut users: HashMap<InstId, Vec<InstId>> = HashMap::new();
        for inst in self.program_order() {
            for op in self.inst(inst).kind.operands() {
                if let Value::Inst(def) = op {
                    users.entry(def).or_default().push(inst);
                }
            }
        }
        users
    }

    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Inst(id) => self.inst(*id).ty.clone(),
            Value::Arg(i) => self
                .params
                .get(*i as usize)
                .map(|p| p.ty.clone())
                .unwrap_or(Type::Void),
            Value::Const(c) => Type::Int(c.width),
            Value::Global(_) => Type::Ptr,
        }
    }

    /// Source-level name of a value, if any.
    pub fn value_name(&self, value: &Value) -> Option<&str> {
        match value {
            Value::Inst(id) => self.inst(*id).name.as_deref(),
            Value::Arg(i) => self.params.get(*i as usize).map(|p| p.name.as_str()),
            _ => None,
        }
    }

    pub fn add_tag(&mut self, inst: InstId, tag: &str) {
        let data = self.inst_mut(inst);
        if !data.has_tag(tag) {
            data.tags.push(tag.to_string());
        }
    }

    pub fn has_tag(&self, inst: InstId, tag: &str) -> bool {
        self.inst(inst).has_tag(tag)
    }

    /// Find a live instruction by result name.
    pub fn inst_by_name(&self, name: &str) -> Option<InstId> {
        self.program_order()
            .into_iter()
            .find(|&i| self.inst(i).name.as_deref() == Some(name))
    }
}

fn fresh_name(taken: &mut HashSet<String>, base: &str) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}.{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Zero,
    Ints(Vec<u64>),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: GlobalInit,
}

impl Global {
    /// Little-endian initial memory image.
    pub fn bytes(&self) -> Vec<u8> {
        let size = self.ty.byte_size() as usize;
        let mut out = vec![0u8; size];
        match &self.init {
            GlobalInit::Zero => {}
            GlobalInit::Str(s) => {
                for (dst, src) in out.iter_mut().zip(s.bytes()) {
                    *dst = src;
                }
            }
            GlobalInit::Ints(values) => {
                let elem = self.ty.element().map(Type::byte_size).unwrap_or(size as u64) as usize;
                for (i, v) in values.iter().enumerate() {
                    let start = i * elem;
                    if start + elem > size {
                        break;
                    }
                    out[start..start + elem].copy_from_slice(&v.to_le_bytes()[..elem]);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct Globals {
    items: Vec<Global>,
}

impl Globals {
    pub fn push(&mut self, global: Global) -> GlobalId {
        let id = GlobalId(self.items.len() as u32);
        self.items.push(global);
        id
    }

    pub fn get(&self, id: GlobalId) -> &Global {
        &self.items[id.0 as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<GlobalId> {
        self.items.iter().position(|g| g.name == name).map(|i| GlobalId(i as u32))
    }

    /// Contents of a C-string global.
    pub fn string(&self, id: GlobalId) -> Option<&str> {
        match &self.items.get(id.0 as usize)?.init {
            GlobalInit::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.items.iter().enumerate().map(|(i, g)| (GlobalId(i as u32), g))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub globals: Globals,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        parser::parse_module(text)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}
