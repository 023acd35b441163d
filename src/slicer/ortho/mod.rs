// This module interprets orthogonal regions. A region_start(label, description) marker
// carries a mini-language description; the region is closed by the first later
// region_end marker with the same label. Every statement of the description is parsed,
// then its operands are resolved: names are looked up in the session's buffer table
// first, MOVE sources fall back to raw allocas and globals, and ROTATE amounts fall
// back to integer literals. Selectors turn into a (start, len) window over the lanes
// of the resolved operand. All statements of a region are validated before anything is
// emitted, so a bad statement leaves the region untouched and its markers in place.

//! Orthogonal-region interpreter.

pub mod emit;
pub mod parser;

pub use parser::{parse_description, parse_statement, Operand, OrthoOp, Selector, Statement};

use super::alloc::{const_gep_offset, marker_args, trace_storage, StorageRef};
use crate::core::{
    MarkerKind,
    MarkerSite,
    SlicedBuffer,
    TransformError,
    TransformResult,
    TransformSession,
    ELEMENT_BITS,
};
use crate::ir::{Function, FunctionBuilder, Globals, InstId, InstKind, Value};

/// What a statement operand resolved to.
#[derive(Debug, Clone)]
pub enum Source<'arena> {
    Sliced(SlicedBuffer<'arena>),
    /// Unsliced storage: bits for a MOVE source, elements for a MOVE index table.
    Raw(StorageRef),
    Constant(u64),
}

#[derive(Debug, Clone)]
pub struct Resolved<'arena> {
    pub name: String,
    pub source: Source<'arena>,
    pub start: u64,
    pub len: u64,
}

/// A statement whose operands are resolved and whose lane windows are validated.
#[derive(Debug, Clone)]
pub struct Lowered<'arena> {
    pub op: OrthoOp,
    pub dest: Resolved<'arena>,
    pub left: Resolved<'arena>,
    pub right: Resolved<'arena>,
}

fn select(operand: &Operand, total: u64) -> TransformResult<(u64, u64)> {
    match operand.selector {
        Selector::All => Ok((0, total)),
        Selector::Range(a, b) if b < total => Ok((a, b - a + 1)),
        Selector::Range(_, b) => Err(TransformError::invalid(format!(
            "lane {} of '{}' is out of range ({} lanes)",
            b, operand.name, total
        ))),
    }
}

/// Sliced buffer named `name` as seen from program position `position`.
fn lookup<'arena>(
    session: &TransformSession<'arena>,
    name: &str,
    position: usize,
) -> TransformResult<Option<SlicedBuffer<'arena>>> {
    if let Some(buffer) = session.visible_buffer(name, position) {
        return Ok(Some(buffer));
    }
    match session.find_buffer(name) {
        Some(_) => Err(TransformError::invalid(format!(
            "region at #{} lies outside the slice window of '{}'",
            position, name
        ))),
        None => Ok(None),
    }
}

fn resolve_sliced<'arena>(
    session: &TransformSession<'arena>,
    operand: &Operand,
    position: usize,
) -> TransformResult<Resolved<'arena>> {
    let buffer = lookup(session, &operand.name, position)?
        .ok_or_else(|| TransformError::UnknownBuffer { name: operand.name.clone() })?;
    let (start, len) = select(operand, buffer.word_count())?;
    Ok(Resolved { name: operand.name.clone(), source: Source::Sliced(buffer), start, len })
}

/// Unsliced storage named `name`: a live alloca first, then a global.
fn find_raw(func: &Function, globals: &Globals, name: &str) -> TransformResult<Option<StorageRef>> {
    if let Some(inst) = func.inst_by_name(name) {
        if matches!(func.inst(inst).kind, InstKind::Alloca { .. }) {
            return trace_storage(func, globals, Value::Inst(inst)).map(Some);
        }
    }
    match globals.by_name(name) {
        Some(g) => trace_storage(func, globals, Value::Global(g)).map(Some),
        None => Ok(None),
    }
}

/// MOVE source: a sliced buffer, or raw storage read bit by bit.
fn resolve_bits<'arena>(
    func: &Function,
    globals: &Globals,
    session: &TransformSession<'arena>,
    operand: &Operand,
    position: usize,
) -> TransformResult<Resolved<'arena>> {
    if lookup(session, &operand.name, position)?.is_some() {
        return resolve_sliced(session, operand, position);
    }
    let storage = find_raw(func, globals, &operand.name)?
        .ok_or_else(|| TransformError::UnknownBuffer { name: operand.name.clone() })?;
    let (start, len) = select(operand, storage.capacity * u64::from(ELEMENT_BITS))?;
    Ok(Resolved { name: operand.name.clone(), source: Source::Raw(storage), start, len })
}

/// MOVE index table: a sliced buffer's words, or the integer elements of raw storage.
fn resolve_indices<'arena>(
    func: &Function,
    globals: &Globals,
    session: &TransformSession<'arena>,
    operand: &Operand,
    position: usize,
) -> TransformResult<Resolved<'arena>> {
    if lookup(session, &operand.name, position)?.is_some() {
        return resolve_sliced(session, operand, position);
    }
    let storage = find_raw(func, globals, &operand.name)?
        .ok_or_else(|| TransformError::UnknownBuffer { name: operand.name.clone() })?;
    if storage.elem.int_width().is_none() {
        return Err(TransformError::invalid(format!(
            "index table '{}' must hold integers, not {}",
            operand.name, storage.elem
        )));
    }
    let (start, len) = select(operand, storage.capacity / storage.elem.byte_size())?;
    Ok(Resolved { name: operand.name.clone(), source: Source::Raw(storage), start, len })
}

/// ROTATE amount: a sliced buffer's first selected word, or an integer literal.
fn resolve_amount<'arena>(
    session: &TransformSession<'arena>,
    operand: &Operand,
    position: usize,
) -> TransformResult<Resolved<'arena>> {
    if lookup(session, &operand.name, position)?.is_some() {
        return resolve_sliced(session, operand, position);
    }
    let value = operand
        .name
        .parse::<u64>()
        .map_err(|_| TransformError::UnknownBuffer { name: operand.name.clone() })?;
    if operand.selector != Selector::All {
        return Err(TransformError::invalid(format!("constant amount {} takes no range", value)));
    }
    Ok(Resolved { name: operand.name.clone(), source: Source::Constant(value), start: 0, len: 1 })
}

fn same_length(left: &Resolved, right: &Resolved) -> TransformResult<()> {
    if left.len != right.len {
        return Err(TransformError::RangeMismatch { left: left.len, right: right.len });
    }
    Ok(())
}

/// Resolve and validate one statement against the buffers whose slice window
/// covers program position `position`.
pub fn lower_statement<'arena>(
    func: &Function,
    globals: &Globals,
    session: &TransformSession<'arena>,
    stmt: &Statement,
    position: usize,
) -> TransformResult<Lowered<'arena>> {
    let dest = resolve_sliced(session, &stmt.dest, position)?;
    let (left, right) = match stmt.op {
        OrthoOp::Xor => {
            let left = resolve_sliced(session, &stmt.left, position)?;
            let right = resolve_sliced(session, &stmt.right, position)?;
            same_length(&left, &right)?;
            same_length(&dest, &left)?;
            (left, right)
        }
        OrthoOp::Move => {
            let left = resolve_bits(func, globals, session, &stmt.left, position)?;
            let right = resolve_indices(func, globals, session, &stmt.right, position)?;
            same_length(&left, &right)?;
            (left, right)
        }
        OrthoOp::RotL | OrthoOp::RotR => {
            if stmt.dest.name != stmt.left.name {
                return Err(TransformError::invalid(format!(
                    "{} writes in place, so its destination must be '{}', not '{}'",
                    stmt.op.symbol(),
                    stmt.left.name,
                    stmt.dest.name
                )));
            }
            let left = resolve_sliced(session, &stmt.left, position)?;
            if (dest.start, dest.len) != (left.start, left.len) {
                return Err(TransformError::invalid(format!(
                    "{} destination and source select different lanes of '{}'",
                    stmt.op.symbol(),
                    stmt.left.name
                )));
            }
            (left, resolve_amount(session, &stmt.right, position)?)
        }
    };
    Ok(Lowered { op: stmt.op, dest, left, right })
}

/// Text behind a label or description argument.
fn text_arg(func: &Function, globals: &Globals, value: Value, what: &str) -> TransformResult<String> {
    if let Some(c) = value.as_const() {
        return Ok(c.bits.to_string());
    }
    let (global, offset) = match value {
        Value::Global(g) => (g, 0),
        Value::Inst(inst) => match &func.inst(inst).kind {
            InstKind::Gep { elem, base: Value::Global(g), indices } => {
                let offset = const_gep_offset(elem, indices)
                    .filter(|&o| o >= 0)
                    .ok_or_else(|| TransformError::invalid(format!("{} has a non-constant offset", what)))?;
                (*g, offset as usize)
            }
            _ => return Err(TransformError::invalid(format!("{} must point into a string constant", what))),
        },
        _ => return Err(TransformError::invalid(format!("{} must be a string constant", what))),
    };
    let text = globals
        .string(global)
        .ok_or_else(|| TransformError::invalid(format!("{} must point into a string constant", what)))?;
    text.get(offset..)
        .map(|s| s.trim_end_matches('\0').to_string())
        .ok_or_else(|| TransformError::invalid(format!("{} offset {} lies outside the string", what, offset)))
}

struct RegionEnd<'arena> {
    site: MarkerSite<InstId>,
    label: Option<&'arena str>,
    used: bool,
}

fn lower_region<'arena>(
    func: &mut Function,
    globals: &Globals,
    session: &TransformSession<'arena>,
    start: &MarkerSite<InstId>,
    ends: &mut [RegionEnd<'arena>],
    matched: &mut Option<InstId>,
) -> TransformResult<usize> {
    let args = marker_args(func, start.inst, MarkerKind::RegionStart)?;
    let label = session.intern_str(&text_arg(func, globals, args[0], "region label")?);
    let end = ends
        .iter_mut()
        .find(|end| !end.used && end.site.position > start.position && end.label == Some(label))
        .ok_or_else(|| TransformError::grammar(format!("region '{}' has no matching end", label)))?;
    end.used = true;
    *matched = Some(end.site.inst);

    let description = session.intern_str(&text_arg(func, globals, args[1], "region description")?);
    log::debug!("{}: region '{}': {}", func.name, label, description);
    let statements = parse_description(description)?;
    let lowered = statements
        .iter()
        .map(|stmt| lower_statement(func, globals, session, stmt, start.position))
        .collect::<TransformResult<Vec<_>>>()?;

    let mut b = FunctionBuilder::new(func)?;
    b.position_before(start.inst)?;
    for stmt in &lowered {
        emit::emit_statement(&mut b, session, stmt)?;
    }
    Ok(lowered.len())
}

/// Lower every queued region of the current function. Returns the number of
/// statements emitted; failed regions are reported and keep their markers.
pub fn lower_regions(func: &mut Function, globals: &Globals, session: &TransformSession) -> usize {
    let mut ends: Vec<RegionEnd> = Vec::new();
    for site in session.markers(MarkerKind::RegionEnd) {
        let label = marker_args(func, site.inst, MarkerKind::RegionEnd)
            .and_then(|args| text_arg(func, globals, args[0], "region label"));
        let label = match label {
            Ok(label) => Some(session.intern_str(&label)),
            Err(err) => {
                session.report(format!("{} (region end at #{})", err, site.position));
                session.keep(site.inst);
                None
            }
        };
        ends.push(RegionEnd { site, label, used: label.is_none() });
    }

    let mut statements = 0;
    for start in session.markers(MarkerKind::RegionStart) {
        let mut matched = None;
        match lower_region(func, globals, session, &start, &mut ends, &mut matched) {
            Ok(n) => statements += n,
            Err(err) => {
                session.report(format!("{} (region start at #{})", err, start.position));
                session.keep(start.inst);
                if let Some(end) = matched {
                    session.keep(end);
                }
            }
        }
    }

    for end in ends.iter().filter(|end| !end.used) {
        let label = end.label.unwrap_or_default();
        let err = TransformError::grammar(format!("region end '{}' without a start", label));
        session.report(format!("{} (region end at #{})", err, end.site.position));
        session.keep(end.site.inst);
    }
    statements
}
