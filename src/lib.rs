//! pondnote: SQL notebooks with stable cell references.
//!
//! The engine (naming, reference extraction, dependency graph, rename
//! refactoring, lineage resolution) lives in `pondnote-core`. This crate
//! adds the notebook document, persistence, the state controller and the
//! CLI front door.

pub mod cli;
pub mod config;
pub mod controller;
pub mod diff;
pub mod error;
pub mod lineage_process;
pub mod notebook;
pub mod output;
pub mod store;

pub use controller::NotebookController;
pub use error::NotebookError;
pub use notebook::{Notebook, NotebookId};
