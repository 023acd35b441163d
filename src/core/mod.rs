// This module gathers the infrastructure shared by every stage of the slicer: the
// arena-backed transformation session (interned names, the SlicedBuffer table keyed by
// stable BufferId, the typed marker worklists, the ordered erase set, diagnostics and
// statistics), the thiserror-based error enum each step returns, the IrAdaptor trait
// through which the analysis stages read the program, and the plain configuration
// struct the CLI fills in. None of it knows how a particular lowering works; the
// stages under crate::slicer build on these pieces.

//! Core slicer infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based interning using `bumpalo`
//! - Buffer table, worklists, erase set and diagnostics per function
//! - Transformation statistics
//!
//! ## Errors (`error`)
//! - `TransformError` / `TransformResult` for every transformation step
//!
//! ## IR seam (`adaptor`)
//! - `IrAdaptor`, the read-and-tag interface used by the analysis stages

pub mod adaptor;
pub mod config;
pub mod error;
pub mod session;

pub use adaptor::IrAdaptor;
pub use config::{MarkerNames, SlicerConfig};
pub use error::{TransformError, TransformResult};
pub use session::{
    BufferId,
    BufferOrigin,
    Diagnostic,
    EraseSet,
    Layout,
    MarkerKind,
    MarkerSite,
    SessionStats,
    SlicedBuffer,
    TransformSession,
    Worklists,
    ELEMENT_BITS,
    WORD_BITS,
};
