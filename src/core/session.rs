// This module provides the transformation session, the single per-compilation-unit state
// object every stage of the slicer reads and writes. TransformSession borrows a bumpalo
// arena from the caller and interns labels, descriptions and buffer names in it, so a
// SlicedBuffer can carry its original name as a plain &'arena str for the whole run.
// The session owns the SlicedBuffer table (entries addressed by a stable BufferId
// rather than re-found by name), the six typed marker worklists filled by the scanner,
// the ordered erase set consumed by cleanup, the diagnostic list, and SessionStats
// counters with a Display impl. Function-scoped state (buffers, worklists, erase set)
// is cleared between functions because instruction handles are only meaningful inside
// one function; statistics and diagnostics accumulate over the whole unit.

//! Arena-based transformation session.
//!
//! All per-unit state lives here and is passed explicitly to each stage, so
//! nothing leaks between two runs of the pass.

use bumpalo::Bump;
use hashbrown::{HashMap, HashSet};
use std::cell::RefCell;
use std::fmt;

use crate::ir::{InstId, Value};

/// Bits per original scalar element.
pub const ELEMENT_BITS: u32 = 8;

/// Bits per slice word.
pub const WORD_BITS: u32 = 32;

/// Stable handle of a [`SlicedBuffer`] within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// How instances are laid out inside the slice words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    SingleInstance,
    MultiInstance { blocks: u32 },
}

impl Layout {
    pub fn for_blocks(blocks: u32) -> Self {
        if blocks <= 1 {
            Layout::SingleInstance
        } else {
            Layout::MultiInstance { blocks }
        }
    }

    pub fn block_count(&self) -> u32 {
        match self {
            Layout::SingleInstance => 1,
            Layout::MultiInstance { blocks } => *blocks,
        }
    }
}

/// Where a buffer's slice words came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// Created by a `begin_slice` marker; storage is a fresh allocation.
    Slice,
    /// Created by a `pack` marker; storage is the caller's output buffer.
    View,
}

/// One storage location chosen for bit-slicing.
#[derive(Debug, Clone)]
pub struct SlicedBuffer<'arena> {
    pub id: BufferId,
    pub original_name: &'arena str,
    /// Root storage of the scalar buffer (alloca result or global).
    pub root: Value,
    /// Constant byte offset of the sliced window inside `root`.
    pub base_offset: u64,
    pub layout: Layout,
    pub element_width: u32,
    /// Bytes per instance.
    pub block_length: u32,
    /// Backing `[8 * block_length x i32]` storage.
    pub storage: Value,
    pub origin: BufferOrigin,
    pub marker: InstId,
    /// Program position of the marker that opened the buffer, once known.
    pub opened_at: Option<usize>,
    /// Program position of the `end_slice` that closed the buffer.
    pub closed_at: Option<usize>,
}

impl SlicedBuffer<'_> {
    /// Whether code at program position `position` lies inside the slice window.
    pub fn covers(&self, position: usize) -> bool {
        self.opened_at.map_or(true, |open| open < position) && self.closed_at.map_or(true, |close| position < close)
    }

    /// Number of bit-planes per element across all instances.
    pub fn lane_count(&self) -> u32 {
        self.element_width * self.layout.block_count()
    }

    /// Number of 32-bit slice words backing the buffer.
    pub fn word_count(&self) -> u64 {
        u64::from(self.element_width) * u64::from(self.block_length)
    }

    pub fn block_count(&self) -> u32 {
        self.layout.block_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    BeginSlice,
    EndSlice,
    Pack,
    Unpack,
    RegionStart,
    RegionEnd,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 6] = [
        MarkerKind::BeginSlice,
        MarkerKind::EndSlice,
        MarkerKind::Pack,
        MarkerKind::Unpack,
        MarkerKind::RegionStart,
        MarkerKind::RegionEnd,
    ];

    /// Tag attached to recognized marker calls.
    pub fn tag(self) -> &'static str {
        match self {
            MarkerKind::BeginSlice => "marker.begin_slice",
            MarkerKind::EndSlice => "marker.end_slice",
            MarkerKind::Pack => "marker.pack",
            MarkerKind::Unpack => "marker.unpack",
            MarkerKind::RegionStart => "marker.region_start",
            MarkerKind::RegionEnd => "marker.region_end",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            MarkerKind::BeginSlice => 3,
            MarkerKind::EndSlice | MarkerKind::RegionEnd => 1,
            MarkerKind::Pack | MarkerKind::Unpack | MarkerKind::RegionStart => 2,
        }
    }
}

/// A recognized marker call.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSite<I> {
    pub kind: MarkerKind,
    pub inst: I,
    /// Position in program order at scan time.
    pub position: usize,
}

/// Per-kind marker queues, in program order.
#[derive(Debug, Clone)]
pub struct Worklists<I> {
    lists: HashMap<MarkerKind, Vec<MarkerSite<I>>>,
}

impl<I> Default for Worklists<I> {
    fn default() -> Self {
        Self { lists: HashMap::new() }
    }
}

impl<I: Clone> Worklists<I> {
    pub fn push(&mut self, site: MarkerSite<I>) {
        self.lists.entry(site.kind).or_default().push(site);
    }

    pub fn get(&self, kind: MarkerKind) -> &[MarkerSite<I>] {
        self.lists.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

/// Ordered, de-duplicated set of instructions scheduled for deletion.
#[derive(Debug, Clone, Default)]
pub struct EraseSet {
    order: Vec<InstId>,
    members: HashSet<InstId>,
}

impl EraseSet {
    pub fn insert(&mut self, inst: InstId) -> bool {
        if self.members.insert(inst) {
            self.order.push(inst);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, inst: InstId) -> bool {
        if self.members.remove(&inst) {
            self.order.retain(|&i| i != inst);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.members.contains(&inst)
    }

    pub fn iter(&self) -> impl Iterator<Item = InstId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// A reported problem; the step that produced it was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub function: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error in '{}': {}", self.function, self.message)
    }
}

/// Arena-based transformation session.
pub struct TransformSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
    interned_strings: RefCell<HashMap<String, &'arena str>>,
    buffers: RefCell<Vec<SlicedBuffer<'arena>>>,
    worklists: RefCell<Worklists<InstId>>,
    erase_set: RefCell<EraseSet>,
    diagnostics: RefCell<Vec<Diagnostic>>,
    current_function: RefCell<Option<String>>,
}

impl<'arena> TransformSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            buffers: RefCell::new(Vec::new()),
            worklists: RefCell::new(Worklists::default()),
            erase_set: RefCell::new(EraseSet::default()),
            diagnostics: RefCell::new(Vec::new()),
            current_function: RefCell::new(None),
        }
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Reset function-scoped state and make `name` the current function.
    pub fn begin_function(&self, name: &str) {
        self.buffers.borrow_mut().clear();
        self.worklists.borrow_mut().clear();
        self.erase_set.borrow_mut().clear();
        *self.current_function.borrow_mut() = Some(name.to_string());
        self.stats.borrow_mut().functions_processed += 1;
    }

    pub fn current_function(&self) -> Option<String> {
        self.current_function.borrow().clone()
    }

    /// Register a sliced buffer and return its handle.
    pub fn add_buffer(&self, mut buffer: SlicedBuffer<'arena>) -> BufferId {
        let mut buffers = self.buffers.borrow_mut();
        let id = BufferId(buffers.len() as u32);
        buffer.id = id;
        buffers.push(buffer);
        if buffers[id.0 as usize].origin == BufferOrigin::Slice {
            self.stats.borrow_mut().buffers_sliced += 1;
        }
        id
    }

    pub fn buffer(&self, id: BufferId) -> Option<SlicedBuffer<'arena>> {
        self.buffers.borrow().get(id.0 as usize).cloned()
    }

    /// Latest buffer registered under `name`; later markers shadow earlier ones.
    pub fn find_buffer(&self, name: &str) -> Option<SlicedBuffer<'arena>> {
        self.buffers
            .borrow()
            .iter()
            .rev()
            .find(|b| b.original_name == name)
            .cloned()
    }

    /// Latest buffer named `name` whose slice window covers `position`.
    pub fn visible_buffer(&self, name: &str, position: usize) -> Option<SlicedBuffer<'arena>> {
        self.buffers
            .borrow()
            .iter()
            .rev()
            .find(|b| b.original_name == name && b.covers(position))
            .cloned()
    }

    pub fn open_window(&self, id: BufferId, position: usize) {
        if let Some(buffer) = self.buffers.borrow_mut().get_mut(id.0 as usize) {
            buffer.opened_at = Some(position);
        }
    }

    pub fn close_window(&self, id: BufferId, position: usize) {
        if let Some(buffer) = self.buffers.borrow_mut().get_mut(id.0 as usize) {
            buffer.closed_at = Some(position);
        }
    }

    pub fn buffers(&self) -> Vec<SlicedBuffer<'arena>> {
        self.buffers.borrow().clone()
    }

    pub fn push_marker(&self, site: MarkerSite<InstId>) {
        self.stats.borrow_mut().markers_seen += 1;
        self.worklists.borrow_mut().push(site);
    }

    pub fn markers(&self, kind: MarkerKind) -> Vec<MarkerSite<InstId>> {
        self.worklists.borrow().get(kind).to_vec()
    }

    pub fn schedule_erase(&self, inst: InstId) {
        self.erase_set.borrow_mut().insert(inst);
    }

    /// Keep an instruction that was scheduled for erasure.
    pub fn keep(&self, inst: InstId) {
        self.erase_set.borrow_mut().remove(inst);
    }

    pub fn erase_candidates(&self) -> Vec<InstId> {
        self.erase_set.borrow().iter().collect()
    }

    /// Record a diagnostic for the current function and mirror it to the log.
    pub fn report(&self, message: impl Into<String>) {
        let function = self.current_function().unwrap_or_default();
        let diag = Diagnostic { function, message: message.into() };
        log::error!("{}", diag);
        self.stats.borrow_mut().diagnostics += 1;
        self.diagnostics.borrow_mut().push(diag);
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn record_loop(&self) {
        self.stats.borrow_mut().loops_emitted += 1;
    }

    pub fn record_rewrite(&self, opcode: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_rewritten += 1;
        *stats.rewrite_counts.entry(opcode.to_string()).or_insert(0) += 1;
    }

    pub fn record_statement(&self) {
        self.stats.borrow_mut().statements_lowered += 1;
    }

    pub fn record_erased(&self, count: usize) {
        self.stats.borrow_mut().instructions_erased += count;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Transformation statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub functions_processed: usize,
    pub markers_seen: usize,
    pub buffers_sliced: usize,
    pub loops_emitted: usize,
    pub statements_lowered: usize,
    pub instructions_rewritten: usize,
    pub instructions_erased: usize,
    pub diagnostics: usize,
    pub rewrite_counts: HashMap<String, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bit-slicing Statistics:")?;
        writeln!(f, "  Functions processed: {}", self.functions_processed)?;
        writeln!(f, "  Markers seen: {}", self.markers_seen)?;
        writeln!(f, "  Buffers sliced: {}", self.buffers_sliced)?;
        writeln!(f, "  Loops emitted: {}", self.loops_emitted)?;
        writeln!(f, "  Statements lowered: {}", self.statements_lowered)?;
        writeln!(f, "  Instructions rewritten: {}", self.instructions_rewritten)?;
        writeln!(f, "  Instructions erased: {}", self.instructions_erased)?;
        writeln!(f, "  Diagnostics: {}", self.diagnostics)?;

        if !self.rewrite_counts.is_empty() {
            writeln!(f, "  Rewrite breakdown:")?;
            let mut counts: Vec<_> = self.rewrite_counts.iter().collect();
            counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (opcode, count) in counts {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}
