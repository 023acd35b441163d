// This module implements the annotation scanner, the first stage of the slicer. It makes
// one linear pass over a function in program order and looks at every call. When the
// callee is one of the six configured marker operations the call is tagged with the
// marker's label, queued on the worklist for its kind together with its program-order
// position, and scheduled for erasure along with any address computation that exists
// only to feed the marker an argument. Nothing is rewritten here and nothing can fail:
// unknown calls are ignored. The scanner is generic over IrAdaptor so it only depends on
// the read-and-tag part of the IR interface.

//! Marker recognition.

use crate::core::{IrAdaptor, MarkerNames, MarkerSite, Worklists};

/// What a scan found.
#[derive(Debug, Clone)]
pub struct ScanOutput<I> {
    pub worklists: Worklists<I>,
    /// Marker calls and their argument-only address computations.
    pub erase: Vec<I>,
}

pub fn scan<A: IrAdaptor>(adaptor: &mut A, markers: &MarkerNames) -> ScanOutput<A::InstRef> {
    let mut out = ScanOutput { worklists: Worklists::default(), erase: Vec::new() };

    for (position, inst) in adaptor.program_order().into_iter().enumerate() {
        let Some(kind) = adaptor.call_target(inst).and_then(|callee| markers.classify(callee)) else {
            continue;
        };

        log::debug!("{}: found {} at position {}", adaptor.func_name(), markers.name(kind), position);
        adaptor.add_tag(inst, kind.tag());
        out.worklists.push(MarkerSite { kind, inst, position });
        out.erase.push(inst);

        for op in adaptor.inst_operands(inst) {
            if let Some(def) = adaptor.value_inst(op) {
                if adaptor.is_address_computation(def) {
                    out.erase.push(def);
                }
            }
        }
    }

    out
}
