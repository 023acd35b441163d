//! Instruction builder with an insertion point.
//!
//! Mirrors what an `IRBuilder` offers: every `build_*` call inserts before the
//! current point and advances past the new instruction, and integer operations
//! whose operands are all constants fold to a constant instead of emitting code.

use super::*;

pub struct FunctionBuilder<'f> {
    func: &'f mut Function,
    block: BlockId,
    index: usize,
}

impl<'f> FunctionBuilder<'f> {
    /// Builder positioned at the end of the entry block.
    pub fn new(func: &'f mut Function) -> IrResult<Self> {
        let block = func.entry_block().ok_or_else(|| IrError::NoBody(func.name.clone()))?;
        let index = func.block(block).insts.len();
        Ok(Self { func, block, index })
    }

    pub fn func(&self) -> &Function {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut Function {
        self.func
    }

    pub fn current_block(&self) -> BlockId {
        self.block
    }

    /// Position immediately before `inst`.
    pub fn position_before(&mut self, inst: InstId) -> IrResult<()> {
        let (block, index) = self.func.position(inst).ok_or(IrError::Detached(inst))?;
        self.block = block;
        self.index = index;
        Ok(())
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.block = block;
        self.index = self.func.block(block).insts.len();
    }

    pub fn position_at_start(&mut self, block: BlockId) {
        self.block = block;
        self.index = 0;
    }

    fn insert(&mut self, kind: InstKind, ty: Type, name: Option<&str>) -> InstId {
        let inst = self.func.create_inst(kind, ty, name);
        self.func.insert_inst(self.block, self.index, inst);
        self.index += 1;
        log::trace!("emit {} in {}", self.func.inst(inst).kind.opcode(), self.func.block(self.block).name);
        inst
    }

    pub fn build_alloca(&mut self, ty: Type, name: &str) -> Value {
        Value::Inst(self.insert(InstKind::Alloca { ty }, Type::Ptr, Some(name)))
    }

    /// Allocate in the entry block, after any allocas already there.
    pub fn build_entry_alloca(&mut self, ty: Type, name: &str) -> IrResult<Value> {
        let entry = self.func.entry_block().ok_or_else(|| IrError::NoBody(self.func.name.clone()))?;
        let at = self
            .func
            .block(entry)
            .insts
            .iter()
            .position(|&i| !matches!(self.func.inst(i).kind, InstKind::Alloca { .. }))
            .unwrap_or(self.func.block(entry).insts.len());
        let inst = self.func.create_inst(InstKind::Alloca { ty }, Type::Ptr, Some(name));
        self.func.insert_inst(entry, at, inst);
        if self.block == entry && self.index >= at {
            self.index += 1;
        }
        Ok(Value::Inst(inst))
    }

    pub fn build_gep(&mut self, elem: Type, base: Value, indices: Vec<Value>, name: &str) -> Value {
        Value::Inst(self.insert(InstKind::Gep { elem, base, indices }, Type::Ptr, Some(name)))
    }

    pub fn build_load(&mut self, ty: Type, ptr: Value, name: &str) -> Value {
        Value::Inst(self.insert(InstKind::Load { ty: ty.clone(), ptr }, ty, Some(name)))
    }

    pub fn build_store(&mut self, value: Value, ptr: Value) -> InstId {
        self.insert(InstKind::Store { value, ptr }, Type::Void, None)
    }

    pub fn build_binary(&mut self, op: BinOp, lhs: Value, rhs: Value, name: &str) -> Value {
        if let (Value::Const(a), Value::Const(b)) = (lhs, rhs) {
            if let Some(bits) = op.eval(a.width, a.bits, b.bits) {
                return Value::int(a.width, bits);
            }
        }
        let ty = self.func.value_type(&lhs);
        Value::Inst(self.insert(InstKind::Binary { op, lhs, rhs }, ty, Some(name)))
    }

    pub fn build_icmp(&mut self, pred: IcmpPred, lhs: Value, rhs: Value, name: &str) -> Value {
        if let (Value::Const(a), Value::Const(b)) = (lhs, rhs) {
            return Value::int(1, u64::from(pred.eval(a.width, a.bits, b.bits)));
        }
        Value::Inst(self.insert(InstKind::Icmp { pred, lhs, rhs }, Type::i1(), Some(name)))
    }

    pub fn build_cast(&mut self, op: CastOp, value: Value, to: Type, name: &str) -> Value {
        let to_width = to.int_width().unwrap_or(64);
        if let Value::Const(c) = value {
            return Value::int(to_width, op.eval(c.width, to_width, c.bits));
        }
        if self.func.value_type(&value) == to {
            return value;
        }
        Value::Inst(self.insert(InstKind::Cast { op, value, to: to.clone() }, to, Some(name)))
    }

    /// Convert an integer to `width` bits, zero- or sign-extending as requested.
    pub fn build_int_resize(&mut self, value: Value, width: u32, signed: bool, name: &str) -> Value {
        let from = self.func.value_type(&value).int_width().unwrap_or(width);
        let op = if from > width {
            CastOp::Trunc
        } else if signed {
            CastOp::SExt
        } else {
            CastOp::ZExt
        };
        self.build_cast(op, value, Type::Int(width), name)
    }

    pub fn build_select(&mut self, cond: Value, on_true: Value, on_false: Value, name: &str) -> Value {
        if let Value::Const(c) = cond {
            return if c.bits != 0 { on_true } else { on_false };
        }
        let ty = self.func.value_type(&on_true);
        Value::Inst(self.insert(InstKind::Select { cond, on_true, on_false }, ty, Some(name)))
    }

    pub fn build_call(&mut self, callee: &str, args: Vec<Value>, ret: Type, name: Option<&str>) -> InstId {
        let name = if ret.is_void() { None } else { name };
        self.insert(InstKind::Call { callee: callee.to_string(), args }, ret, name)
    }

    pub fn build_br(&mut self, target: BlockId) -> InstId {
        self.insert(InstKind::Br { target }, Type::Void, None)
    }

    pub fn build_condbr(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) -> InstId {
        self.insert(InstKind::CondBr { cond, then_dest, else_dest }, Type::Void, None)
    }

    pub fn build_ret(&mut self, value: Option<Value>) -> InstId {
        self.insert(InstKind::Ret { value }, Type::Void, None)
    }

    /// Split the current block at the insertion point. Everything after the point
    /// moves to a new block; the builder stays in the old block, before the branch
    /// that now joins the two. Returns the new block and that branch.
    pub fn split_here(&mut self, name: &str) -> (BlockId, InstId) {
        let (tail, br) = self.func.split_block(self.block, self.index, name);
        self.index = self.func.block(self.block).insts.len() - 1;
        (tail, br)
    }

    pub fn append_block_after(&mut self, after: BlockId, name: &str) -> BlockId {
        self.func.insert_block_after(after, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_function() -> Function {
        let mut func = Function::new("f", Vec::new(), Type::Void);
        let entry = func.add_block("entry");
        let ret = func.create_inst(InstKind::Ret { value: None }, Type::Void, None);
        func.push_inst(entry, ret);
        func
    }

    #[test]
    fn test_constant_folding() {
        let mut func = empty_function();
        let mut b = FunctionBuilder::new(&mut func).unwrap();
        let v = b.build_binary(BinOp::Mul, Value::i64(3), Value::i64(8), "x");
        assert_eq!(v, Value::i64(24));
        let c = b.build_icmp(IcmpPred::Ult, Value::i32(3), Value::i32(8), "c");
        assert_eq!(c, Value::int(1, 1));
        let z = b.build_cast(CastOp::SExt, Value::int(8, 0xff), Type::i32(), "z");
        assert_eq!(z, Value::i32(0xffff_ffff));
        assert_eq!(func.inst_count(), 1);
    }

    #[test]
    fn test_entry_alloca_keeps_insert_point() {
        let mut func = empty_function();
        let ret = func.program_order()[0];
        let mut b = FunctionBuilder::new(&mut func).unwrap();
        b.position_before(ret).unwrap();
        let x = b.build_alloca(Type::i32(), "x");
        let slot = b.build_entry_alloca(Type::i32(), "slot").unwrap();
        b.build_store(Value::i32(1), x);

        let order = func.program_order();
        assert_eq!(order.len(), 4);
        assert_eq!(Value::Inst(order[0]), x);
        assert_eq!(Value::Inst(order[1]), slot);
        assert!(matches!(func.inst(order[2]).kind, InstKind::Store { .. }));
        assert_eq!(order[3], ret);
    }

    #[test]
    fn test_split_here_positions_before_branch() {
        let mut func = empty_function();
        let ret = func.program_order()[0];
        let mut b = FunctionBuilder::new(&mut func).unwrap();
        b.position_before(ret).unwrap();
        let (tail, br) = b.split_here("tail");
        let slot = b.build_alloca(Type::i8(), "late");
        let entry = b.current_block();

        assert_eq!(func.block(entry).insts, vec![slot.as_inst().unwrap(), br]);
        assert_eq!(func.block(tail).insts, vec![ret]);
    }
}
