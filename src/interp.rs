// This module implements a small reference interpreter for the crate's IR so transformed
// programs can be executed instead of only pattern-matched. Memory is byte addressed and
// little endian: every global gets one allocation when the interpreter is created and
// every executed alloca gets a fresh one. A pointer packs the allocation number into its
// high 32 bits and the byte offset into the low 32 bits, so address arithmetic stays
// inside the allocation it started from and out-of-range accesses are caught precisely.
// Calls to functions defined in the module are executed recursively; calls to marker
// operations that survived transformation are no-ops; any other external call is an
// error. A step budget turns accidental infinite loops into an InterpError.

//! Reference interpreter.

use hashbrown::HashMap;
use thiserror::Error;

use crate::core::MarkerNames;
use crate::ir::{sign_extend, width_mask, Function, InstId, InstKind, Module, Type, Value};

pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("Function not found: {0}")]
    UnknownFunction(String),

    #[error("Global not found: {0}")]
    UnknownGlobal(String),

    #[error("Call to external function '{0}'")]
    External(String),

    #[error("Function '{name}' expects {expected} arguments, got {got}")]
    ArgumentCount { name: String, expected: usize, got: usize },

    #[error("Out-of-bounds access of {size} bytes at offset {offset} (allocation holds {len})")]
    OutOfBounds { offset: i64, size: u64, len: usize },

    #[error("Invalid pointer 0x{0:x}")]
    InvalidPointer(u64),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("Malformed program: {0}")]
    Malformed(String),
}

pub type InterpResult<T> = Result<T, InterpError>;

fn make_ptr(alloc: usize, offset: u64) -> u64 {
    ((alloc as u64 + 1) << 32) | (offset & 0xffff_ffff)
}

fn split_ptr(ptr: u64) -> InterpResult<(usize, u64)> {
    let alloc = ptr >> 32;
    if alloc == 0 {
        return Err(InterpError::InvalidPointer(ptr));
    }
    Ok(((alloc - 1) as usize, ptr & 0xffff_ffff))
}

struct Frame<'a> {
    values: HashMap<InstId, u64>,
    args: &'a [u64],
}

pub struct Interpreter<'m> {
    module: &'m Module,
    memory: Vec<Vec<u8>>,
    global_allocs: Vec<usize>,
    markers: MarkerNames,
    steps: u64,
    step_limit: u64,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        let mut memory = Vec::new();
        let mut global_allocs = Vec::new();
        for (_, global) in module.globals.iter() {
            global_allocs.push(memory.len());
            memory.push(global.bytes());
        }
        Self {
            module,
            memory,
            global_allocs,
            markers: MarkerNames::default(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn with_markers(mut self, markers: MarkerNames) -> Self {
        self.markers = markers;
        self
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn global_bytes(&self, name: &str) -> InterpResult<&[u8]> {
        let id = self
            .module
            .globals
            .by_name(name)
            .ok_or_else(|| InterpError::UnknownGlobal(name.to_string()))?;
        Ok(&self.memory[self.global_allocs[id.0 as usize]])
    }

    /// Overwrite the start of a global's memory.
    pub fn set_global_bytes(&mut self, name: &str, bytes: &[u8]) -> InterpResult<()> {
        let id = self
            .module
            .globals
            .by_name(name)
            .ok_or_else(|| InterpError::UnknownGlobal(name.to_string()))?;
        let mem = &mut self.memory[self.global_allocs[id.0 as usize]];
        if bytes.len() > mem.len() {
            return Err(InterpError::OutOfBounds { offset: 0, size: bytes.len() as u64, len: mem.len() });
        }
        mem[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Execute `name` with integer arguments; returns the result of non-void functions.
    pub fn call(&mut self, name: &str, args: &[u64]) -> InterpResult<Option<u64>> {
        let module = self.module;
        let func = module
            .function(name)
            .filter(|f| !f.declaration)
            .ok_or_else(|| InterpError::UnknownFunction(name.to_string()))?;
        if func.params.len() != args.len() {
            return Err(InterpError::ArgumentCount {
                name: name.to_string(),
                expected: func.params.len(),
                got: args.len(),
            });
        }
        log::debug!("interpreting @{}", name);
        self.exec_function(func, args)
    }

    fn step(&mut self) -> InterpResult<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(InterpError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn access(&self, ptr: u64, size: u64) -> InterpResult<(usize, usize)> {
        let (alloc, offset) = split_ptr(ptr)?;
        let mem = self.memory.get(alloc).ok_or(InterpError::InvalidPointer(ptr))?;
        if offset + size > mem.len() as u64 {
            return Err(InterpError::OutOfBounds { offset: offset as i64, size, len: mem.len() });
        }
        Ok((alloc, offset as usize))
    }

    fn read(&self, ptr: u64, size: u64) -> InterpResult<u64> {
        let (alloc, offset) = self.access(ptr, size)?;
        let mut buf = [0u8; 8];
        buf[..size as usize].copy_from_slice(&self.memory[alloc][offset..offset + size as usize]);
        Ok(u64::from_le_bytes(buf))
    }

    fn write(&mut self, ptr: u64, size: u64, bits: u64) -> InterpResult<()> {
        let (alloc, offset) = self.access(ptr, size)?;
        let bytes = bits.to_le_bytes();
        self.memory[alloc][offset..offset + size as usize].copy_from_slice(&bytes[..size as usize]);
        Ok(())
    }

    fn eval(&self, func: &Function, frame: &Frame<'_>, value: &Value) -> InterpResult<u64> {
        match value {
            Value::Inst(id) => frame.values.get(id).copied().ok_or_else(|| {
                InterpError::Malformed(format!("use of a value not yet computed in '{}'", func.name))
            }),
            Value::Arg(i) => frame
                .args
                .get(*i as usize)
                .copied()
                .ok_or_else(|| InterpError::Malformed(format!("argument {} out of range", i))),
            Value::Const(c) => Ok(c.bits),
            Value::Global(g) => self
                .global_allocs
                .get(g.0 as usize)
                .map(|&alloc| make_ptr(alloc, 0))
                .ok_or_else(|| InterpError::Malformed(format!("unknown global {:?}", g))),
        }
    }

    fn width_of(func: &Function, value: &Value) -> InterpResult<u32> {
        func.value_type(value)
            .int_width()
            .ok_or_else(|| InterpError::Malformed("integer operation on a non-integer".to_string()))
    }

    fn gep(&self, func: &Function, frame: &Frame<'_>, elem: &Type, base: &Value, indices: &[Value]) -> InterpResult<u64> {
        let ptr = self.eval(func, frame, base)?;
        let (alloc, offset) = split_ptr(ptr)?;
        let mut delta: i64 = 0;
        let mut ty = elem;
        for (n, idx) in indices.iter().enumerate() {
            if n > 0 {
                ty = ty
                    .element()
                    .ok_or_else(|| InterpError::Malformed(format!("gep steps into non-array type {}", ty)))?;
            }
            let width = Self::width_of(func, idx)?;
            let i = sign_extend(self.eval(func, frame, idx)?, width);
            delta = delta.wrapping_add(i.wrapping_mul(ty.byte_size() as i64));
        }
        let target = offset as i64 + delta;
        if !(0..=0xffff_ffff).contains(&target) {
            let len = self.memory.get(alloc).map(Vec::len).unwrap_or(0);
            return Err(InterpError::OutOfBounds { offset: target, size: 0, len });
        }
        Ok(make_ptr(alloc, target as u64))
    }

    fn exec_function(&mut self, func: &'m Function, args: &[u64]) -> InterpResult<Option<u64>> {
        let mut frame = Frame { values: HashMap::new(), args };
        let mut block = func
            .entry_block()
            .ok_or_else(|| InterpError::Malformed(format!("function '{}' has no body", func.name)))?;

        loop {
            let mut next = None;
            for &inst in &func.block(block).insts {
                self.step()?;
                let data = func.inst(inst);
                let result = match &data.kind {
                    InstKind::Alloca { ty } => {
                        self.memory.push(vec![0; ty.byte_size() as usize]);
                        Some(make_ptr(self.memory.len() - 1, 0))
                    }
                    InstKind::Gep { elem, base, indices } => Some(self.gep(func, &frame, elem, base, indices)?),
                    InstKind::Load { ty, ptr } => {
                        let p = self.eval(func, &frame, ptr)?;
                        Some(self.read(p, ty.byte_size())?)
                    }
                    InstKind::Store { value, ptr } => {
                        let v = self.eval(func, &frame, value)?;
                        let p = self.eval(func, &frame, ptr)?;
                        let size = func.value_type(value).byte_size();
                        self.write(p, size, v)?;
                        None
                    }
                    InstKind::Binary { op, lhs, rhs } => {
                        let width = Self::width_of(func, lhs)?;
                        let a = self.eval(func, &frame, lhs)?;
                        let b = self.eval(func, &frame, rhs)?;
                        Some(op.eval(width, a, b).ok_or(InterpError::DivisionByZero)?)
                    }
                    InstKind::Icmp { pred, lhs, rhs } => {
                        let width = Self::width_of(func, lhs)?;
                        let a = self.eval(func, &frame, lhs)?;
                        let b = self.eval(func, &frame, rhs)?;
                        Some(u64::from(pred.eval(width, a, b)))
                    }
                    InstKind::Cast { op, value, to } => {
                        let from = Self::width_of(func, value)?;
                        let to = to.int_width().unwrap_or(64);
                        Some(op.eval(from, to, self.eval(func, &frame, value)?))
                    }
                    InstKind::Select { cond, on_true, on_false } => {
                        let c = self.eval(func, &frame, cond)?;
                        let chosen = if c & 1 != 0 { on_true } else { on_false };
                        Some(self.eval(func, &frame, chosen)?)
                    }
                    InstKind::Call { callee, args } => {
                        let values = args
                            .iter()
                            .map(|a| self.eval(func, &frame, a))
                            .collect::<InterpResult<Vec<_>>>()?;
                        self.exec_call(callee, &values)?
                    }
                    InstKind::Br { target } => {
                        next = Some(*target);
                        None
                    }
                    InstKind::CondBr { cond, then_dest, else_dest } => {
                        let c = self.eval(func, &frame, cond)?;
                        next = Some(if c & 1 != 0 { *then_dest } else { *else_dest });
                        None
                    }
                    InstKind::Ret { value } => {
                        return match value {
                            Some(v) => Ok(Some(self.eval(func, &frame, v)?)),
                            None => Ok(None),
                        };
                    }
                };

                if let Some(bits) = result {
                    let bits = match data.ty.int_width() {
                        Some(w) => bits & width_mask(w),
                        None => bits,
                    };
                    frame.values.insert(inst, bits);
                }
                if next.is_some() {
                    break;
                }
            }

            block = next.ok_or_else(|| {
                InterpError::Malformed(format!("block '{}' falls through", func.block(block).name))
            })?;
        }
    }

    fn exec_call(&mut self, callee: &str, args: &[u64]) -> InterpResult<Option<u64>> {
        let module = self.module;
        if let Some(target) = module.function(callee).filter(|f| !f.declaration) {
            if target.params.len() != args.len() {
                return Err(InterpError::ArgumentCount {
                    name: callee.to_string(),
                    expected: target.params.len(),
                    got: args.len(),
                });
            }
            return self.exec_function(target, args);
        }
        if self.markers.classify(callee).is_some() {
            log::debug!("ignoring surviving marker call @{}", callee);
            return Ok(None);
        }
        Err(InterpError::External(callee.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str, func: &str, args: &[u64]) -> InterpResult<Option<u64>> {
        let module = Module::parse(src).unwrap();
        let mut interp = Interpreter::new(&module);
        interp.call(func, args)
    }

    #[test]
    fn test_arithmetic_and_branches() {
        let src = r#"
define i32 @max(i32 %a, i32 %b) {
entry:
  %c = icmp sgt i32 %a, %b
  condbr %c, ^left, ^right
left:
  ret i32 %a
right:
  ret i32 %b
}
"#;
        assert_eq!(run(src, "max", &[3, 9]).unwrap(), Some(9));
        assert_eq!(run(src, "max", &[0xffff_fffe, 1]).unwrap(), Some(1));
    }

    #[test]
    fn test_counted_loop_sums() {
        let src = r#"
define i32 @sum(i32 %n) {
entry:
  %i = alloca i32
  %acc = alloca i32
  store i32 0, ptr %i
  store i32 0, ptr %acc
  br ^cond
cond:
  %iv = load i32, ptr %i
  %c = icmp ult i32 %iv, %n
  condbr %c, ^body, ^done
body:
  %a = load i32, ptr %acc
  %a2 = add i32 %a, %iv
  store i32 %a2, ptr %acc
  %next = add i32 %iv, 1
  store i32 %next, ptr %i
  br ^cond
done:
  %r = load i32, ptr %acc
  ret i32 %r
}
"#;
        assert_eq!(run(src, "sum", &[10]).unwrap(), Some(45));
    }

    #[test]
    fn test_globals_and_gep() {
        let src = r#"
global @table = [4 x i8] [3, 0, 2, 1]

define i8 @pick(i64 %i) {
entry:
  %p = gep [4 x i8], ptr @table, i64 0, i64 %i
  %v = load i8, ptr %p
  store i8 9, ptr %p
  ret i8 %v
}
"#;
        let module = Module::parse(src).unwrap();
        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call("pick", &[2]).unwrap(), Some(2));
        assert_eq!(interp.global_bytes("table").unwrap(), &[3, 0, 9, 1]);

        interp.set_global_bytes("table", &[7, 7]).unwrap();
        assert_eq!(interp.call("pick", &[1]).unwrap(), Some(7));
    }

    #[test]
    fn test_out_of_bounds_is_reported() {
        let src = r#"
define i8 @oob() {
entry:
  %buf = alloca [4 x i8]
  %p = gep i8, ptr %buf, i64 4
  %v = load i8, ptr %p
  ret i8 %v
}
"#;
        assert!(matches!(run(src, "oob", &[]), Err(InterpError::OutOfBounds { .. })));
    }

    #[test]
    fn test_markers_are_noops_and_externals_fail() {
        let src = r#"
define void @f() {
entry:
  %buf = alloca [4 x i8]
  call void @begin_slice(ptr %buf, i32 1, i32 4)
  ret void
}

define void @g() {
entry:
  call void @puts()
  ret void
}
"#;
        assert_eq!(run(src, "f", &[]).unwrap(), None);
        assert_eq!(run(src, "g", &[]), Err(InterpError::External("puts".to_string())));
    }

    #[test]
    fn test_step_limit() {
        let src = "define void @spin() {\nentry:\n  br ^entry\n}\n";
        let module = Module::parse(src).unwrap();
        let mut interp = Interpreter::new(&module).with_step_limit(1000);
        assert_eq!(interp.call("spin", &[]), Err(InterpError::StepLimit(1000)));
    }

    #[test]
    fn test_division_by_zero() {
        let src = "define i32 @d(i32 %a) {\nentry:\n  %q = udiv i32 10, %a\n  ret i32 %q\n}\n";
        assert_eq!(run(src, "d", &[0]), Err(InterpError::DivisionByZero));
        assert_eq!(run(src, "d", &[3]).unwrap(), Some(3));
    }
}
