//! Textual IR printer. The output re-parses with [`super::parser`].

use super::*;
use std::fmt::{self, Write as _};

pub(crate) fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'"' | b'\\' => {
                let _ = write!(out, "\\{:02X}", byte);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\{:02X}", byte);
            }
        }
    }
    out
}

struct ValueDisplay<'a> {
    func: &'a Function,
    globals: Option<&'a Globals>,
    value: Value,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Inst(id) => match &self.func.inst(id).name {
                Some(name) => write!(f, "%{}", name),
                None => write!(f, "%v{}", id.0),
            },
            Value::Arg(i) => match self.func.params.get(i as usize) {
                Some(p) => write!(f, "%{}", p.name),
                None => write!(f, "%arg{}", i),
            },
            Value::Const(c) if c.width == 1 => write!(f, "{}", if c.bits != 0 { "true" } else { "false" }),
            Value::Const(c) => write!(f, "{}", c.as_i64()),
            Value::Global(g) => match self.globals {
                Some(globals) => write!(f, "@{}", globals.get(g).name),
                None => write!(f, "@g{}", g.0),
            },
        }
    }
}

/// Printer for one function, with access to the module's globals for symbol names.
pub struct FunctionPrinter<'a> {
    func: &'a Function,
    globals: Option<&'a Globals>,
}

impl<'a> FunctionPrinter<'a> {
    pub fn new(func: &'a Function, globals: Option<&'a Globals>) -> Self {
        Self { func, globals }
    }

    fn v(&self, value: Value) -> ValueDisplay<'a> {
        ValueDisplay { func: self.func, globals: self.globals, value }
    }

    fn typed(&self, value: Value) -> String {
        format!("{} {}", self.func.value_type(&value), self.v(value))
    }

    fn block_name(&self, block: BlockId) -> &str {
        &self.func.block(block).name
    }

    /// One instruction, without indentation.
    pub fn inst_to_string(&self, inst: InstId) -> String {
        let data = self.func.inst(inst);
        let mut out = String::new();
        if !data.ty.is_void() {
            let _ = write!(out, "{} = ", self.v(Value::Inst(inst)));
        }

        let _ = match &data.kind {
            InstKind::Alloca { ty } => write!(out, "alloca {}", ty),
            InstKind::Gep { elem, base, indices } => {
                let _ = write!(out, "gep {}, {}", elem, self.typed(*base));
                for idx in indices {
                    let _ = write!(out, ", {}", self.typed(*idx));
                }
                Ok(())
            }
            InstKind::Load { ty, ptr } => write!(out, "load {}, {}", ty, self.typed(*ptr)),
            InstKind::Store { value, ptr } => {
                write!(out, "store {}, {}", self.typed(*value), self.typed(*ptr))
            }
            InstKind::Binary { op, lhs, rhs } => {
                write!(out, "{} {}, {}", op.name(), self.typed(*lhs), self.v(*rhs))
            }
            InstKind::Icmp { pred, lhs, rhs } => {
                write!(out, "icmp {} {}, {}", pred.name(), self.typed(*lhs), self.v(*rhs))
            }
            InstKind::Cast { op, value, to } => {
                write!(out, "{} {} to {}", op.name(), self.typed(*value), to)
            }
            InstKind::Select { cond, on_true, on_false } => write!(
                out,
                "select {}, {}, {}",
                self.typed(*cond),
                self.typed(*on_true),
                self.typed(*on_false)
            ),
            InstKind::Call { callee, args } => {
                let args: Vec<String> = args.iter().map(|a| self.typed(*a)).collect();
                write!(out, "call {} @{}({})", data.ty, callee, args.join(", "))
            }
            InstKind::Br { target } => write!(out, "br ^{}", self.block_name(*target)),
            InstKind::CondBr { cond, then_dest, else_dest } => write!(
                out,
                "condbr {}, ^{}, ^{}",
                self.v(*cond),
                self.block_name(*then_dest),
                self.block_name(*else_dest)
            ),
            InstKind::Ret { value: None } => write!(out, "ret void"),
            InstKind::Ret { value: Some(v) } => write!(out, "ret {}", self.typed(*v)),
        };

        for tag in &data.tags {
            let _ = write!(out, " #{}", tag);
        }
        out
    }
}

impl fmt::Display for FunctionPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.func;
        let params: Vec<String> = if func.declaration {
            func.params.iter().map(|p| p.ty.to_string()).collect()
        } else {
            func.params.iter().map(|p| format!("{} %{}", p.ty, p.name)).collect()
        };

        if func.declaration {
            return writeln!(f, "declare {} @{}({})", func.ret, func.name, params.join(", "));
        }

        writeln!(f, "define {} @{}({}) {{", func.ret, func.name, params.join(", "))?;
        for &block in func.layout() {
            writeln!(f, "{}:", self.block_name(block))?;
            for &inst in &func.block(block).insts {
                writeln!(f, "  {}", self.inst_to_string(inst))?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.init {
            GlobalInit::Str(s) => write!(f, "global @{} = c\"{}\"", self.name, escape_c_string(s)),
            GlobalInit::Zero => write!(f, "global @{} = {} zeroinitializer", self.name, self.ty),
            GlobalInit::Ints(values) if self.ty.array_len().is_some() => {
                let width = self.ty.element().and_then(Type::int_width).unwrap_or(64);
                let items: Vec<String> = values
                    .iter()
                    .map(|v| Const::new(width, *v).as_i64().to_string())
                    .collect();
                write!(f, "global @{} = {} [{}]", self.name, self.ty, items.join(", "))
            }
            GlobalInit::Ints(values) => {
                let width = self.ty.int_width().unwrap_or(64);
                let v = values.first().copied().unwrap_or(0);
                write!(f, "global @{} = {} {}", self.name, self.ty, Const::new(width, v).as_i64())
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, global) in self.globals.iter() {
            writeln!(f, "{}", global)?;
        }

        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 || !self.globals.is_empty() {
                writeln!(f)?;
            }
            write!(f, "{}", FunctionPrinter::new(func, Some(&self.globals)))?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", FunctionPrinter::new(self, None))
    }
}
