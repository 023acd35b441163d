// This module defines the IrAdaptor trait, the seam between the transformation engine
// and the IR it rewrites. The analysis half of the engine (the annotation scanner and
// the taint analysis) only ever needs a handful of read queries plus tagging: walk the
// instructions in program order, look at an instruction's operands, ask whether it is
// a call and to what, ask whether it allocates storage, and attach or query a string
// tag. Keeping those queries behind a trait lets both stages be tested against any IR
// that can answer them. The rewriting stages mutate the program and use the concrete
// FunctionBuilder instead; this module also provides the adaptor implementation for
// the crate's own ir::Function.

//! IrAdaptor responsibilities.
//!
//! The adaptor is the glue between the slicer and an SSA IR. The analysis stages
//! assume:
//! - Instructions can be enumerated in a single, stable program order.
//! - Every operand is either the result of an instruction or an opaque value
//!   (argument, constant, symbol).
//! - An instruction can carry an arbitrary set of string tags.

use crate::ir::{Function, InstId, InstKind, Value};

/// Bridge between an SSA IR and the analysis stages of the slicer.
pub trait IrAdaptor {
    type ValueRef: Copy + Eq + core::hash::Hash;
    type InstRef: Copy + Eq + core::hash::Hash;

    /// Name of the function being analysed.
    fn func_name(&self) -> &str;

    /// All live instructions in program order.
    fn program_order(&self) -> Vec<Self::InstRef>;

    /// Operands of an instruction.
    fn inst_operands(&self, inst: Self::InstRef) -> Vec<Self::ValueRef>;

    /// The value produced by an instruction.
    fn inst_result(&self, inst: Self::InstRef) -> Self::ValueRef;

    /// The instruction that defines `val`, if it is an instruction result.
    fn value_inst(&self, val: Self::ValueRef) -> Option<Self::InstRef>;

    /// Callee symbol when `inst` is a direct call.
    fn call_target(&self, inst: Self::InstRef) -> Option<&str>;

    /// Whether `inst` is a fixed-size storage allocation.
    fn is_storage(&self, inst: Self::InstRef) -> bool;

    /// Whether `inst` only computes an address from its operands.
    fn is_address_computation(&self, inst: Self::InstRef) -> bool;

    /// Whether `inst` reads memory through its pointer operand.
    fn is_load(&self, inst: Self::InstRef) -> bool;

    /// Whether `inst` writes memory; operand 0 is the value, operand 1 the pointer.
    fn is_store(&self, inst: Self::InstRef) -> bool;

    /// Short opcode name, for diagnostics.
    fn opcode(&self, inst: Self::InstRef) -> &str;

    fn has_tag(&self, inst: Self::InstRef, tag: &str) -> bool;

    fn add_tag(&mut self, inst: Self::InstRef, tag: &str);
}

impl IrAdaptor for Function {
    type ValueRef = Value;
    type InstRef = InstId;

    fn func_name(&self) -> &str {
        &self.name
    }

    fn program_order(&self) -> Vec<InstId> {
        Function::program_order(self)
    }

    fn inst_operands(&self, inst: InstId) -> Vec<Value> {
        self.inst(inst).kind.operands()
    }

    fn inst_result(&self, inst: InstId) -> Value {
        Value::Inst(inst)
    }

    fn value_inst(&self, val: Value) -> Option<InstId> {
        val.as_inst()
    }

    fn call_target(&self, inst: InstId) -> Option<&str> {
        match &self.inst(inst).kind {
            InstKind::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    fn is_storage(&self, inst: InstId) -> bool {
        matches!(self.inst(inst).kind, InstKind::Alloca { .. })
    }

    fn is_address_computation(&self, inst: InstId) -> bool {
        matches!(self.inst(inst).kind, InstKind::Gep { .. })
    }

    fn is_load(&self, inst: InstId) -> bool {
        matches!(self.inst(inst).kind, InstKind::Load { .. })
    }

    fn is_store(&self, inst: InstId) -> bool {
        matches!(self.inst(inst).kind, InstKind::Store { .. })
    }

    fn opcode(&self, inst: InstId) -> &str {
        self.inst(inst).kind.opcode()
    }

    fn has_tag(&self, inst: InstId, tag: &str) -> bool {
        Function::has_tag(self, inst, tag)
    }

    fn add_tag(&mut self, inst: InstId, tag: &str) {
        Function::add_tag(self, inst, tag)
    }
}
