// This module wires the slicer stages into one pass over a module. For every function
// body it scans for marker calls, rewrites each begin_slice allocation, pairs end_slice
// markers with the buffer they close, runs the taint analysis once over the untouched
// function, and only then starts inserting code: pack loops at begin_slice sites,
// unpack loops at end_slice sites, per-lane rewrites of every region member, the
// word-oriented pack/unpack markers and finally the orthogonal regions. Cleanup erases
// what the rewrites left dead. A failing step is reported through the session, keeps
// its marker call in place and never stops the remaining steps or functions. All
// per-unit state lives in one TransformSession backed by a bumpalo arena that
// slice_module creates and drops around the run.

//! The bit-slicing pass.
//!
//! # Stages
//!
//! 1. [`scanner`] tags and queues marker calls.
//! 2. [`alloc`] replaces marked buffers by `[8 * L x i32]` slice storage.
//! 3. [`taint`] finds the instructions that read or write sliced data.
//! 4. [`pack`] synthesizes the transposition loops.
//! 5. [`operands`] rewrites loads, stores and operators lane by lane.
//! 6. [`ortho`] interprets orthogonal-region descriptions.
//! 7. [`cleanup`] erases dead originals.
//!
//! [`slice_module`] runs all of them and returns a [`SliceReport`].

pub mod alloc;
pub mod cleanup;
pub mod loops;
pub mod operands;
pub mod ortho;
pub mod pack;
pub mod scanner;
pub mod taint;

use bumpalo::Bump;
use hashbrown::HashSet;

use crate::core::{
    BufferId,
    Diagnostic,
    MarkerKind,
    MarkerSite,
    SessionStats,
    SlicerConfig,
    TransformError,
    TransformResult,
    TransformSession,
};
use crate::ir::{verify_function, Function, Globals, InstId, Module, Value};
use operands::OperandRewriter;
use taint::{SliceRegion, TaintAnalysis};

/// Outcome of running the pass over a module.
#[derive(Debug, Clone)]
pub struct SliceReport {
    /// Whether any function was modified.
    pub changed: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: SessionStats,
}

/// Run the pass over every function body of `module`.
pub fn slice_module(module: &mut Module, config: &SlicerConfig) -> SliceReport {
    let arena = Bump::new();
    let session = TransformSession::new(&arena);
    let changed = BitSlicer::new(&session, config).run(module);
    SliceReport {
        changed,
        diagnostics: session.diagnostics(),
        stats: session.stats(),
    }
}

/// Pass driver bound to one session.
pub struct BitSlicer<'s, 'arena> {
    session: &'s TransformSession<'arena>,
    config: &'s SlicerConfig,
}

impl<'s, 'arena> BitSlicer<'s, 'arena> {
    pub fn new(session: &'s TransformSession<'arena>, config: &'s SlicerConfig) -> Self {
        Self { session, config }
    }

    /// Transform every defined function. Returns whether anything changed.
    pub fn run(&self, module: &mut Module) -> bool {
        let Module { globals, functions } = module;
        let mut changed = false;
        for func in functions.iter_mut().filter(|f| !f.declaration) {
            changed |= self.run_function(globals, func);
        }
        changed
    }

    fn fail(&self, site: &MarkerSite<InstId>, err: TransformError) {
        let marker = self.config.markers.name(site.kind);
        self.session.report(format!("{} (at {} #{})", err, marker, site.position));
        self.session.keep(site.inst);
    }

    /// Latest open buffer on the storage named by an `end_slice` marker.
    fn match_end(
        &self,
        func: &Function,
        globals: &Globals,
        site: &MarkerSite<InstId>,
        opened: &[(BufferId, usize)],
        closed: &HashSet<BufferId>,
    ) -> TransformResult<BufferId> {
        let args = alloc::marker_args(func, site.inst, MarkerKind::EndSlice)?;
        let storage = alloc::trace_storage(func, globals, args[0])?;
        opened
            .iter()
            .rev()
            .filter(|(id, begin)| *begin < site.position && !closed.contains(id))
            .filter_map(|&(id, _)| self.session.buffer(id))
            .find(|buffer| buffer.root == storage.root && buffer.base_offset == storage.offset)
            .map(|buffer| buffer.id)
            .ok_or(TransformError::UnknownBuffer { name: storage.name })
    }

    /// Transform one function. Returns whether it changed.
    pub fn run_function(&self, globals: &Globals, func: &mut Function) -> bool {
        let session = self.session;
        session.begin_function(&func.name);
        let before = func.inst_count();

        let scanned = scanner::scan(func, &self.config.markers);
        if scanned.worklists.is_empty() {
            log::debug!("{}: no markers", func.name);
            return false;
        }
        for kind in MarkerKind::ALL {
            for site in scanned.worklists.get(kind) {
                session.push_marker(site.clone());
            }
        }
        for inst in scanned.erase {
            session.schedule_erase(inst);
        }

        let mut opened = Vec::new();
        for site in session.markers(MarkerKind::BeginSlice) {
            match alloc::rewrite_alloc(func, globals, session, self.config, site.inst) {
                Ok(id) => {
                    session.open_window(id, site.position);
                    opened.push((id, site.position));
                }
                Err(err) => self.fail(&site, err),
            }
        }

        let mut closed = HashSet::new();
        let mut closes = Vec::new();
        for site in session.markers(MarkerKind::EndSlice) {
            match self.match_end(func, globals, &site, &opened, &closed) {
                Ok(id) => {
                    session.close_window(id, site.position);
                    closed.insert(id);
                    closes.push((id, site.inst));
                }
                Err(err) => self.fail(&site, err),
            }
        }

        let buffers: Vec<_> = opened.iter().filter_map(|&(id, _)| session.buffer(id)).collect();
        let regions: Vec<SliceRegion<Value, InstId>> = buffers
            .iter()
            .map(|buffer| SliceRegion {
                buffer: buffer.id,
                root: buffer.root,
                begin: buffer.marker,
                end: closes.iter().find(|(id, _)| *id == buffer.id).map(|&(_, end)| end),
            })
            .collect();
        let mut taint = TaintAnalysis::<Function>::new();
        taint.analyze(func, &regions);

        for buffer in &buffers {
            if let Err(err) = pack::emit_slice_pack(func, session, buffer) {
                session.report(format!("{} (packing '{}')", err, buffer.original_name));
            }
        }
        for &(id, end) in &closes {
            let Some(buffer) = session.buffer(id) else {
                continue;
            };
            if let Err(err) = pack::emit_slice_unpack(func, session, &buffer, end) {
                session.report(format!("{} (unpacking '{}')", err, buffer.original_name));
                session.keep(end);
            }
        }

        let rewritten = OperandRewriter::new(&taint, session).run(func);
        log::debug!("{}: {} instruction(s) rewritten slice-wise", func.name, rewritten);

        for site in session.markers(MarkerKind::Pack) {
            match pack::lower_pack_marker(func, globals, session, site.inst) {
                Ok(id) => session.open_window(id, site.position),
                Err(err) => self.fail(&site, err),
            }
        }
        for site in session.markers(MarkerKind::Unpack) {
            if let Err(err) = pack::lower_unpack_marker(func, globals, session, site.inst) {
                self.fail(&site, err);
            }
        }

        let statements = ortho::lower_regions(func, globals, session);
        log::debug!("{}: {} region statement(s) lowered", func.name, statements);

        let erased = cleanup::erase_dead(func, session);

        if self.config.verify {
            if let Err(err) = verify_function(func) {
                session.report(format!("transformed function fails verification: {}", err));
            }
        }
        if !self.config.keep_tags {
            cleanup::strip_tags(func);
        }

        func.inst_count() != before || erased > 0
    }
}
