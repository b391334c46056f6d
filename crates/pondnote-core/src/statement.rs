//! Statement splitting and classification.
//!
//! The engine consumes statement spans through the [`StatementSplitter`]
//! trait so an embedding application can plug in its own SQL parser.
//! [`ScriptSplitter`] is the built-in implementation: it cuts on semicolons
//! outside strings and comments and classifies each span into a
//! [`StatementKind`] once, up front.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::{tokenize, Span, Token, TokenKind};

/// Errors reported by a statement splitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    /// A string, quoted identifier or block comment never closes.
    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },

    /// Failure reported by an external splitter.
    #[error("statement splitting failed: {message}")]
    Failed { message: String },
}

/// Statement category, decided from the leading keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    With,
    Create,
    CreateSecret,
    Attach,
    Detach,
    Insert,
    Update,
    Delete,
    Drop,
    Alter,
    Pragma,
    Use,
    Set,
    Copy,
    Explain,
    Describe,
    Show,
    Other,
}

impl StatementKind {
    /// Statements that produce a result set other cells can read from.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::With
                | StatementKind::Describe
                | StatementKind::Show
        )
    }

    /// Statements that change session-level database state (catalogs,
    /// secrets, settings) rather than data.
    pub fn is_session_command(&self) -> bool {
        matches!(
            self,
            StatementKind::Attach
                | StatementKind::Detach
                | StatementKind::CreateSecret
                | StatementKind::Use
                | StatementKind::Set
                | StatementKind::Pragma
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::With => "with",
            StatementKind::Create => "create",
            StatementKind::CreateSecret => "create_secret",
            StatementKind::Attach => "attach",
            StatementKind::Detach => "detach",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Drop => "drop",
            StatementKind::Alter => "alter",
            StatementKind::Pragma => "pragma",
            StatementKind::Use => "use",
            StatementKind::Set => "set",
            StatementKind::Copy => "copy",
            StatementKind::Explain => "explain",
            StatementKind::Describe => "describe",
            StatementKind::Show => "show",
            StatementKind::Other => "other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One statement of a script, with source offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSpan {
    /// Statement text, without the terminating semicolon.
    pub code: String,
    /// Byte offset of the first character in the script.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub kind: StatementKind,
}

impl StatementSpan {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Splits SQL text into classified statement spans.
pub trait StatementSplitter: Send + Sync {
    fn split(&self, sql: &str) -> Result<Vec<StatementSpan>, SplitError>;
}

/// Built-in splitter backed by [`crate::scan`].
///
/// Each span starts at its first non-whitespace token (leading comments are
/// part of the statement) and ends after its last non-whitespace token.
/// Segments holding nothing but whitespace and comments are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptSplitter;

impl StatementSplitter for ScriptSplitter {
    fn split(&self, sql: &str) -> Result<Vec<StatementSpan>, SplitError> {
        let tokens = tokenize(sql);
        if let Some(open) = tokens.iter().find(|token| !token.terminated) {
            return Err(SplitError::Unterminated {
                what: describe(open.kind),
                offset: open.span.start,
            });
        }

        let mut statements = Vec::new();
        for segment in tokens.split(|token| token.kind == TokenKind::Semicolon) {
            if let Some(statement) = statement_from_segment(sql, segment) {
                statements.push(statement);
            }
        }
        Ok(statements)
    }
}

/// Split `sql` with the built-in [`ScriptSplitter`].
pub fn split_sql_by_statements(sql: &str) -> Result<Vec<StatementSpan>, SplitError> {
    ScriptSplitter.split(sql)
}

fn statement_from_segment(sql: &str, segment: &[Token]) -> Option<StatementSpan> {
    if segment.iter().all(Token::is_trivia) {
        return None;
    }
    let first = segment
        .iter()
        .find(|token| token.kind != TokenKind::Whitespace)?;
    let last = segment
        .iter()
        .rev()
        .find(|token| token.kind != TokenKind::Whitespace)?;
    let code = &sql[first.span.start..last.span.end];
    Some(StatementSpan {
        code: code.to_string(),
        start: first.span.start,
        end: last.span.end,
        kind: classify_statement(code),
    })
}

fn describe(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::StringLiteral => "string literal",
        TokenKind::QuotedIdentifier => "quoted identifier",
        TokenKind::BlockComment => "block comment",
        _ => "token",
    }
}

/// Classify a single statement by its leading keywords.
///
/// Leading comments and opening parentheses are skipped, so
/// `/* note */ (SELECT 1)` is a [`StatementKind::Select`].
pub fn classify_statement(sql: &str) -> StatementKind {
    let words: Vec<String> = tokenize(sql)
        .into_iter()
        .filter(|token| !token.is_trivia())
        .skip_while(|token| token.kind == TokenKind::Symbol && token.text(sql) == "(")
        .take_while(|token| token.kind == TokenKind::Word)
        .take(5)
        .map(|token| token.text(sql).to_ascii_uppercase())
        .collect();

    let Some(first) = words.first() else {
        return StatementKind::Other;
    };
    match first.as_str() {
        "SELECT" | "FROM" | "VALUES" | "TABLE" | "SUMMARIZE" | "PIVOT" | "UNPIVOT" => {
            StatementKind::Select
        }
        "WITH" => StatementKind::With,
        "CREATE" => {
            if words[1..].iter().any(|word| word == "SECRET") {
                StatementKind::CreateSecret
            } else {
                StatementKind::Create
            }
        }
        "ATTACH" => StatementKind::Attach,
        "DETACH" => StatementKind::Detach,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "DROP" => StatementKind::Drop,
        "ALTER" => StatementKind::Alter,
        "PRAGMA" => StatementKind::Pragma,
        "USE" => StatementKind::Use,
        "SET" | "RESET" => StatementKind::Set,
        "COPY" => StatementKind::Copy,
        "EXPLAIN" => StatementKind::Explain,
        "DESCRIBE" | "DESC" => StatementKind::Describe,
        "SHOW" => StatementKind::Show,
        _ => StatementKind::Other,
    }
}

// ============================================================================
// Tests
// ============================================================================
