//! Cell naming: annotation parsing, alias validation, stable references.
//!
//! Aliases are plain SQL identifiers (`^[A-Za-z_][A-Za-z0-9_]*$`). The
//! reserved [`STABLE_REF_PREFIX`] belongs to generated stable references and
//! is rejected case-insensitively in [`validate_cell_name`], the single place
//! that enforces it.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use winnow::ascii::{space0, space1};
use winnow::combinator::{alt, eof};
use winnow::prelude::*;
use winnow::token::take_while;
use winnow::ModalResult;

/// Prefix shared by every generated stable cell reference.
pub const STABLE_REF_PREFIX: &str = "__pp_cell_";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Why a proposed alias was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellNameError {
    #[error("cell name cannot be empty")]
    Empty,

    #[error(
        "invalid cell name '{name}': use letters, digits and underscores, not starting with a digit"
    )]
    InvalidSyntax { name: String },

    #[error("invalid cell name '{name}': names starting with '__pp_cell_' are reserved")]
    ReservedPrefix { name: String },
}

/// Check whether `name` is a syntactically valid SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Check whether `name` carries the reserved stable-reference prefix
/// (case-insensitive).
pub fn is_stable_ref(name: &str) -> bool {
    name.len() >= STABLE_REF_PREFIX.len()
        && name.is_char_boundary(STABLE_REF_PREFIX.len())
        && name[..STABLE_REF_PREFIX.len()].eq_ignore_ascii_case(STABLE_REF_PREFIX)
}

/// Validate a user-supplied cell alias.
///
/// # Examples
///
/// ```
/// use pondnote_core::naming::validate_cell_name;
///
/// assert!(validate_cell_name("daily_orders").is_ok());
/// assert!(validate_cell_name("_tmp1").is_ok());
/// assert!(validate_cell_name("1st").is_err());
/// assert!(validate_cell_name("__PP_CELL_x").is_err());
/// ```
pub fn validate_cell_name(name: &str) -> Result<(), CellNameError> {
    if name.is_empty() {
        return Err(CellNameError::Empty);
    }
    if !is_valid_identifier(name) {
        return Err(CellNameError::InvalidSyntax {
            name: name.to_string(),
        });
    }
    if is_stable_ref(name) {
        return Err(CellNameError::ReservedPrefix {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Trim a raw alias; blank or missing input means "no alias".
pub fn normalize_cell_name(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build the stable reference for a cell ID.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, so hyphenated IDs produce
/// a bare identifier usable without quoting.
pub fn make_cell_ref(cell_id: &str) -> String {
    let sanitized: String = cell_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", STABLE_REF_PREFIX, sanitized)
}

/// Read a `-- @name: IDENT` (or `-- @name IDENT`) annotation from the first
/// line of `content`.
///
/// Annotations on any later line are ignored.
pub fn parse_user_cell_name(content: &str) -> Option<String> {
    let first_line = content.lines().next()?.trim();
    let ident = name_annotation.parse(first_line).ok()?;
    if is_valid_identifier(ident) {
        Some(ident.to_string())
    } else {
        None
    }
}

fn name_annotation<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    ("--", space0, "@name").parse_next(input)?;
    alt(((space0, ':', space0).void(), space1.void())).parse_next(input)?;
    let ident = take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)?;
    (space0, eof).parse_next(input)?;
    Ok(ident)
}

// ============================================================================
// Tests
// ============================================================================
