// This module implements the forward taint analysis that decides which instructions the
// operand rewriter has to touch. Starting from the root storage of every sliced buffer it
// walks the function in program order, repeating until nothing changes, and marks each
// instruction that transitively consumes a root: address computations whose base is a
// root or a tainted address become Address, loads through a tainted address and anything
// else consuming a tainted value become Data. Independently of the dataflow, every
// tainted instruction is assigned to the slice region it sits in, a region being the
// program-order window strictly between a begin_slice marker and its end_slice (or the
// end of the function). The whole result is computed before any rewriting starts and is
// then only read, so stages that insert code never disturb it. The analysis is generic
// over IrAdaptor.

//! Forward taint analysis over sliced buffers.

use crate::core::{BufferId, IrAdaptor};
use core::marker::PhantomData;
use hashbrown::HashMap;

/// How an instruction depends on a sliced root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taint {
    /// Computes an address inside the sliced storage.
    Address,
    /// Consumes a value read from the sliced storage.
    Data,
}

/// Program-order window in which accesses to `root` are slice-wise.
#[derive(Debug, Clone)]
pub struct SliceRegion<V, I> {
    pub buffer: BufferId,
    pub root: V,
    pub begin: I,
    /// `None` extends the region to the end of the function.
    pub end: Option<I>,
}

#[derive(Debug, Clone, Copy)]
struct TaintInfo<V> {
    taint: Taint,
    root: V,
}

pub struct TaintAnalysis<A: IrAdaptor> {
    positions: HashMap<A::InstRef, usize>,
    info: HashMap<A::InstRef, TaintInfo<A::ValueRef>>,
    members: HashMap<A::InstRef, BufferId>,
    order: Vec<A::InstRef>,
    _marker: PhantomData<A>,
}

impl<A: IrAdaptor> Default for TaintAnalysis<A> {
    fn default() -> Self {
        Self {
            positions: HashMap::new(),
            info: HashMap::new(),
            members: HashMap::new(),
            order: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<A: IrAdaptor> TaintAnalysis<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&mut self, adaptor: &A, regions: &[SliceRegion<A::ValueRef, A::InstRef>]) {
        self.positions.clear();
        self.info.clear();
        self.members.clear();
        self.order.clear();

        let order = adaptor.program_order();
        for (pos, &inst) in order.iter().enumerate() {
            self.positions.insert(inst, pos);
        }

        let roots: Vec<A::ValueRef> = regions.iter().map(|r| r.root).collect();

        // The use graph can loop back through stores, so iterate to a fixpoint.
        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for &inst in &order {
                if self.info.contains_key(&inst) {
                    continue;
                }
                if let Some(info) = self.classify(adaptor, inst, &roots) {
                    self.info.insert(inst, info);
                    changed = true;
                }
            }
        }
        log::debug!(
            "{}: taint fixpoint after {} rounds, {} derived instructions",
            adaptor.func_name(),
            rounds,
            self.info.len()
        );

        for &inst in &order {
            let Some(info) = self.info.get(&inst) else {
                continue;
            };
            let pos = self.positions[&inst];
            let region = regions.iter().rev().find(|r| {
                r.root == info.root
                    && self.positions.get(&r.begin).is_some_and(|&b| b < pos)
                    && r.end.is_none_or(|e| self.positions.get(&e).is_some_and(|&e| pos < e))
            });
            if let Some(region) = region {
                self.members.insert(inst, region.buffer);
                self.order.push(inst);
            }
        }
    }

    fn operand_taint(&self, adaptor: &A, value: A::ValueRef, roots: &[A::ValueRef]) -> Option<TaintInfo<A::ValueRef>> {
        if roots.contains(&value) {
            return Some(TaintInfo { taint: Taint::Address, root: value });
        }
        adaptor.value_inst(value).and_then(|def| self.info.get(&def).copied())
    }

    fn classify(&self, adaptor: &A, inst: A::InstRef, roots: &[A::ValueRef]) -> Option<TaintInfo<A::ValueRef>> {
        let operands = adaptor.inst_operands(inst);
        let tainted: Vec<(usize, TaintInfo<A::ValueRef>)> = operands
            .iter()
            .enumerate()
            .filter_map(|(slot, &op)| self.operand_taint(adaptor, op, roots).map(|t| (slot, t)))
            .collect();
        let &(first_slot, first) = tainted.first()?;

        if adaptor.is_address_computation(inst) {
            let index_data = tainted.iter().find(|(slot, t)| *slot > 0 && t.taint == Taint::Data);
            return Some(match index_data {
                Some(&(_, t)) => TaintInfo { taint: Taint::Data, root: t.root },
                None if first_slot == 0 && first.taint == Taint::Address => first,
                None => TaintInfo { taint: Taint::Data, root: first.root },
            });
        }

        if adaptor.is_store(inst) {
            return Some(match tainted.iter().find(|(slot, t)| *slot == 1 && t.taint == Taint::Address) {
                Some(&(_, t)) => t,
                None => TaintInfo { taint: Taint::Data, root: first.root },
            });
        }

        Some(TaintInfo { taint: Taint::Data, root: first.root })
    }

    /// Region buffer of a tainted instruction inside a slice region.
    pub fn buffer_of(&self, inst: A::InstRef) -> Option<BufferId> {
        self.members.get(&inst).copied()
    }

    pub fn taint(&self, inst: A::InstRef) -> Option<Taint> {
        self.info.get(&inst).map(|i| i.taint)
    }

    /// Region members in program order.
    pub fn members(&self) -> &[A::InstRef] {
        &self.order
    }

    pub fn is_member(&self, inst: A::InstRef) -> bool {
        self.members.contains_key(&inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, InstId, Module, Value};

    fn inst(func: &Function, name: &str) -> InstId {
        func.inst_by_name(name).unwrap()
    }

    const SRC: &str = r#"
define i8 @f(i8 %k) {
entry:
  %buf = alloca [16 x i8]
  %early = load i8, ptr %buf
  call void @begin_slice(ptr %buf, i32 1, i32 16)
  %p = gep [16 x i8], ptr %buf, i64 0, i64 2
  %v = load i8, ptr %p
  %x = xor i8 %v, %k
  %w = zext i8 %x to i32
  store i8 %x, ptr %p
  %unrelated = add i8 %k, 1
  call void @end_slice(ptr %buf)
  %late = load i8, ptr %p
  ret i8 %late
}
"#;

    fn region(func: &Function) -> SliceRegion<Value, InstId> {
        let order = func.program_order();
        SliceRegion {
            buffer: BufferId(0),
            root: Value::Inst(inst(func, "buf")),
            begin: order[2],
            end: Some(order[9]),
        }
    }

    #[test]
    fn test_taint_kinds() {
        let module = Module::parse(SRC).unwrap();
        let func = module.function("f").unwrap();
        let mut taint = TaintAnalysis::<Function>::new();
        taint.analyze(func, &[region(func)]);

        assert_eq!(taint.taint(inst(func, "p")), Some(Taint::Address));
        assert_eq!(taint.taint(inst(func, "v")), Some(Taint::Data));
        assert_eq!(taint.taint(inst(func, "x")), Some(Taint::Data));
        assert_eq!(taint.taint(inst(func, "w")), Some(Taint::Data));
        assert_eq!(taint.taint(inst(func, "unrelated")), None);
    }

    #[test]
    fn test_region_membership() {
        let module = Module::parse(SRC).unwrap();
        let func = module.function("f").unwrap();
        let mut taint = TaintAnalysis::<Function>::new();
        taint.analyze(func, &[region(func)]);

        assert!(!taint.is_member(inst(func, "early")));
        assert!(taint.is_member(inst(func, "p")));
        assert!(taint.is_member(inst(func, "x")));
        assert!(!taint.is_member(inst(func, "late")));
        assert_eq!(taint.buffer_of(inst(func, "v")), Some(BufferId(0)));

        // The end marker consumes the root but sits on the region boundary.
        let end = func.program_order()[9];
        assert!(taint.taint(end).is_some());
        assert!(!taint.is_member(end));
    }

    #[test]
    fn test_open_region_extends_to_function_end() {
        let module = Module::parse(SRC).unwrap();
        let func = module.function("f").unwrap();
        let mut open = region(func);
        open.end = None;
        let mut taint = TaintAnalysis::<Function>::new();
        taint.analyze(func, &[open]);
        assert!(taint.is_member(inst(func, "late")));
    }
}
