//! Semantic core of the dsflow data-science DSL.
//!
//! The crate consumes a resolved syntax tree and provides the analyses and
//! the Python back-end on top of it:
//!
//!   JSON syntax tree
//!     -> ast          (arena, spans, node properties)
//!     -> semantics    (type computer, type checker, partial evaluator, purity)
//!     -> codegen_python + sourcemap (Python modules and source maps)
//!
//! The CLI and other front-ends should depend on this crate rather than
//! reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------

pub mod error;

// ---------------------------------------------------------------------
// Syntax tree and loading
// ---------------------------------------------------------------------

pub mod ast;
pub mod builtins;
pub mod loader;

// ---------------------------------------------------------------------
// Semantic layers: types, type checking, evaluation, purity
// ---------------------------------------------------------------------

pub mod types;
pub mod type_computer;
pub mod typecheck;
pub mod evaluation;
pub mod partial_eval;
pub mod purity;
pub mod semantics;
pub mod slicer;

// ---------------------------------------------------------------------
// Back-end: Python generation and orchestration
// ---------------------------------------------------------------------

pub mod code;
pub mod python_runtime;
pub mod codegen_python;
pub mod sourcemap;
pub mod compiler;

#[cfg(test)]
mod testing;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use ast::{Ast, AstBuilder, NodeId, NodeKind};
pub use compiler::{GenerateOptions, GeneratedFile, generate};
pub use error::CoreError;
pub use loader::{LoadedAst, load_ast, load_asts};
pub use semantics::{SemanticCache, SemanticModel};
