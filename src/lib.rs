//! bitslicer - bit-slicing transformation for a small SSA IR.
//!
//! The pass rewrites byte-oriented code into a bit-sliced form: every byte of
//! a marked buffer is spread over eight 32-bit slice words, one bit per word,
//! so that one scalar instruction stream evaluates up to 32 instances of the
//! original program in parallel.
//!
//! # Primary Usage
//!
//! ```
//! use bitslicer::core::SlicerConfig;
//! use bitslicer::ir::Module;
//! use bitslicer::slicer::slice_module;
//!
//! let mut module = Module::parse(
//!     "define void @main() {\nentry:\n  %buf = alloca [4 x i8]\n  call void @begin_slice(ptr %buf, i32 1, i32 4)\n  ret void\n}\n",
//! )
//! .unwrap();
//! let report = slice_module(&mut module, &SlicerConfig::default());
//! assert!(report.changed);
//! assert!(report.diagnostics.is_empty());
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - The host IR: types, builder, parser, printer, verifier, check runner
//! - [`core`] - Shared infrastructure (session, errors, adaptor trait, configuration)
//! - [`slicer`] - The transformation stages and the pass driver
//! - [`interp`] - Reference interpreter used to execute transformed code

pub mod core;
pub mod interp;
pub mod ir;
pub mod slicer;

pub use core::{
    // Session management
    BufferId, Diagnostic, SessionStats, SlicedBuffer, TransformSession,
    // Errors
    TransformError, TransformResult,
    // Configuration
    MarkerNames, SlicerConfig,
};
pub use interp::{InterpError, Interpreter};
pub use ir::Module;
pub use slicer::{slice_module, BitSlicer, SliceReport};
