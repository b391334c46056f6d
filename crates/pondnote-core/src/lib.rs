//! Core engine for pondnote.
//!
//! This crate holds the pure, storage-agnostic parts of a SQL notebook:
//! - Cell model with stable references and optional user aliases
//! - Naming utilities (`-- @name` annotations, alias validation)
//! - Ordering primitives for insert/remove/move
//! - SQL scanning, statement splitting and classification
//! - Reference extraction and tokenizer-aware rewriting
//! - Dependency graph building, cycle detection, traversal and ordering
//! - Lineage-aware dependency resolution with lexical fallback
//! - Rename refactor previews
//! - View materialization and script import

pub mod cell;
pub mod graph;
pub mod import;
pub mod lineage;
pub mod materialize;
pub mod naming;
pub mod order;
pub mod references;
pub mod rename;
pub mod scan;
pub mod statement;
pub mod text;
pub mod util;

pub use cell::{Cell, CellId, CellKind, CellRef};
pub use graph::DependencyGraph;
pub use rename::{CellContentPatch, RenamePreview};
