//! Error types and error code constants for pondnote.
//!
//! `NotebookError` is the single error type the controller and CLI return.
//! Module errors from the engine (`CellNameError`, `RenameError`,
//! `SplitError`) and from the shell (`StoreError`, `ConfigError`) are bridged
//! in with `From` impls.
//!
//! ## Error Code Mapping
//!
//! - `2`: Invalid arguments (bad names, unreadable notebook or script)
//! - `3`: Resolution errors (unknown notebook, cell or file)
//! - `4`: Apply errors (persisting a notebook failed)
//! - `10`: Internal errors (bugs, unexpected state)

use std::fmt;

use thiserror::Error;

use pondnote_core::naming::CellNameError;
use pondnote_core::rename::RenameError;
use pondnote_core::statement::SplitError;
use pondnote_core::CellId;

use crate::config::ConfigError;
use crate::notebook::NotebookId;
use crate::store::StoreError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Stable error codes, used as CLI exit codes and in JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller (bad input, malformed request).
    InvalidArguments = 2,
    /// Something named by the caller does not exist.
    ResolutionError = 3,
    /// Failed to persist changes.
    ApplyError = 4,
    /// Internal errors (bugs, unexpected state).
    InternalError = 10,
}

impl OutputErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("invalid cell name '{name}': {reason}")]
    InvalidCellName { name: String, reason: String },

    #[error("notebook not found: {notebook_id}")]
    NotebookNotFound { notebook_id: NotebookId },

    #[error("cell not found: {cell_id}")]
    CellNotFound { cell_id: CellId },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("apply error: {message}")]
    ApplyError {
        message: String,
        key: Option<String>,
    },

    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl NotebookError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        NotebookError::InvalidArguments {
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        NotebookError::InternalError {
            message: message.into(),
        }
    }

    pub fn cell_not_found(cell_id: &CellId) -> Self {
        NotebookError::CellNotFound {
            cell_id: cell_id.clone(),
        }
    }
}

impl From<&NotebookError> for OutputErrorCode {
    fn from(err: &NotebookError) -> Self {
        match err {
            NotebookError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            NotebookError::InvalidCellName { .. } => OutputErrorCode::InvalidArguments,
            NotebookError::NotebookNotFound { .. } => OutputErrorCode::ResolutionError,
            NotebookError::CellNotFound { .. } => OutputErrorCode::ResolutionError,
            NotebookError::FileNotFound { .. } => OutputErrorCode::ResolutionError,
            NotebookError::ApplyError { .. } => OutputErrorCode::ApplyError,
            NotebookError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

// ============================================================================
// Bridges
// ============================================================================

impl From<CellNameError> for NotebookError {
    fn from(err: CellNameError) -> Self {
        let name = match &err {
            CellNameError::Empty => String::new(),
            CellNameError::InvalidSyntax { name } | CellNameError::ReservedPrefix { name } => {
                name.clone()
            }
        };
        NotebookError::InvalidCellName {
            name,
            reason: err.to_string(),
        }
    }
}

impl From<RenameError> for NotebookError {
    fn from(err: RenameError) -> Self {
        match err {
            RenameError::CellNotFound { cell_id } => NotebookError::CellNotFound { cell_id },
            RenameError::NotSqlCell { cell_id } => NotebookError::InvalidArguments {
                message: format!("cell {} is not a SQL cell", cell_id),
                details: Some(serde_json::json!({ "cell_id": cell_id })),
            },
            RenameError::InvalidName(name_err) => name_err.into(),
        }
    }
}

impl From<SplitError> for NotebookError {
    fn from(err: SplitError) -> Self {
        let details = match &err {
            SplitError::Unterminated { offset, .. } => {
                Some(serde_json::json!({ "offset": offset }))
            }
            SplitError::Failed { .. } => None,
        };
        NotebookError::InvalidArguments {
            message: err.to_string(),
            details,
        }
    }
}

impl From<StoreError> for NotebookError {
    fn from(err: StoreError) -> Self {
        let key = match &err {
            StoreError::InvalidKey { key } => Some(key.clone()),
            _ => None,
        };
        NotebookError::ApplyError {
            message: err.to_string(),
            key,
        }
    }
}

impl From<ConfigError> for NotebookError {
    fn from(err: ConfigError) -> Self {
        NotebookError::invalid_args(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(OutputErrorCode::InvalidArguments.code(), 2);
        assert_eq!(OutputErrorCode::ResolutionError.code(), 3);
        assert_eq!(OutputErrorCode::ApplyError.code(), 4);
        assert_eq!(OutputErrorCode::InternalError.code(), 10);
    }

    #[test]
    fn name_errors_are_invalid_arguments() {
        let err: NotebookError = CellNameError::ReservedPrefix {
            name: "__pp_cell_x".into(),
        }
        .into();
        assert!(matches!(
            &err,
            NotebookError::InvalidCellName { name, .. } if name == "__pp_cell_x"
        ));
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InvalidArguments);
    }

    #[test]
    fn rename_errors_map_by_kind() {
        let missing: NotebookError = RenameError::CellNotFound {
            cell_id: CellId::from("c"),
        }
        .into();
        assert_eq!(OutputErrorCode::from(&missing), OutputErrorCode::ResolutionError);

        let invalid: NotebookError = RenameError::InvalidName(CellNameError::Empty).into();
        assert_eq!(OutputErrorCode::from(&invalid), OutputErrorCode::InvalidArguments);
    }

    #[test]
    fn split_errors_carry_offset() {
        let err: NotebookError = SplitError::Unterminated {
            what: "string literal",
            offset: 9,
        }
        .into();
        match err {
            NotebookError::InvalidArguments { details, .. } => {
                assert_eq!(details, Some(serde_json::json!({ "offset": 9 })));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn store_errors_are_apply_errors() {
        let err: NotebookError = StoreError::InvalidKey { key: "../x".into() }.into();
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::ApplyError);
    }
}
