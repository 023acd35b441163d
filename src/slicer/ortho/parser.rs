//! Parser for region descriptions.
//!
//! A description holds one or more statements separated by `;`:
//!
//! ```text
//! DEST[:SEL[:a,b]] :: OP :: LEFT[:SEL[:a,b]] - RIGHT[:SEL[:a,b]]
//! ```
//!
//! `OP` is one of `^`, `move`, `rotL`, `rotR`; `SEL` is `all` or `range`, and a
//! `range` selector takes an inclusive, zero-based `a,b` pair. A missing selector
//! means `all`. Whitespace around tokens is ignored.

use crate::core::{TransformError, TransformResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrthoOp {
    Xor,
    Move,
    RotL,
    RotR,
}

impl OrthoOp {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "^" => OrthoOp::Xor,
            "move" => OrthoOp::Move,
            "rotL" => OrthoOp::RotL,
            "rotR" => OrthoOp::RotR,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            OrthoOp::Xor => "^",
            OrthoOp::Move => "move",
            OrthoOp::RotL => "rotL",
            OrthoOp::RotR => "rotR",
        }
    }

    pub fn is_rotate(self) -> bool {
        matches!(self, OrthoOp::RotL | OrthoOp::RotR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    /// Inclusive lane range.
    Range(u64, u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub name: String,
    pub selector: Selector,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            Selector::All => write!(f, "{}:all", self.name),
            Selector::Range(a, b) => write!(f, "{}:range:{},{}", self.name, a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub op: OrthoOp,
    pub dest: Operand,
    pub left: Operand,
    pub right: Operand,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}-{}", self.dest, self.op.symbol(), self.left, self.right)
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn parse_bound(s: &str, text: &str) -> TransformResult<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| TransformError::grammar(format!("bad range bound '{}' in '{}'", s.trim(), text)))
}

fn parse_operand(text: &str) -> TransformResult<Operand> {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    if parts.len() > 3 {
        return Err(TransformError::grammar(format!("too many ':' in operand '{}'", text.trim())));
    }
    let name = parts[0];
    if !is_name(name) {
        return Err(TransformError::grammar(format!("bad operand name '{}'", name)));
    }

    let selector = match (parts.get(1).copied(), parts.get(2).copied()) {
        (None, _) | (Some("all"), None) => Selector::All,
        (Some("all"), Some(_)) => {
            return Err(TransformError::grammar(format!("selector 'all' takes no range in '{}'", text.trim())));
        }
        (Some("range"), Some(range)) => {
            let (a, b) = range
                .split_once(',')
                .ok_or_else(|| TransformError::grammar(format!("range '{}' is not 'begin,end'", range)))?;
            let (a, b) = (parse_bound(a, text)?, parse_bound(b, text)?);
            if a > b {
                return Err(TransformError::grammar(format!("empty range {},{} in '{}'", a, b, text.trim())));
            }
            Selector::Range(a, b)
        }
        (Some("range"), None) => {
            return Err(TransformError::grammar(format!("selector 'range' needs bounds in '{}'", text.trim())));
        }
        (Some(other), _) => {
            return Err(TransformError::grammar(format!("unknown selector '{}'", other)));
        }
    };

    Ok(Operand { name: name.to_string(), selector })
}

/// Parse one statement.
pub fn parse_statement(text: &str) -> TransformResult<Statement> {
    let slots: Vec<&str> = text.split("::").collect();
    let [dest, op, operands] = slots.as_slice() else {
        return Err(TransformError::grammar(format!(
            "expected DEST::OP::LEFT-RIGHT, got '{}'",
            text.trim()
        )));
    };

    let op = OrthoOp::parse(op.trim())
        .ok_or_else(|| TransformError::grammar(format!("unknown operator '{}'", op.trim())))?;

    let (left, right) = operands
        .split_once('-')
        .ok_or_else(|| TransformError::grammar(format!("expected LEFT-RIGHT, got '{}'", operands.trim())))?;

    Ok(Statement {
        op,
        dest: parse_operand(dest)?,
        left: parse_operand(left)?,
        right: parse_operand(right)?,
    })
}

/// Parse a whole description into its statements.
pub fn parse_description(text: &str) -> TransformResult<Vec<Statement>> {
    let statements: Vec<Statement> = text
        .split(';')
        .filter(|s| !s.trim().is_empty())
        .map(parse_statement)
        .collect::<TransformResult<_>>()?;
    if statements.is_empty() {
        return Err(TransformError::grammar("description holds no statement"));
    }
    Ok(statements)
}
