//! Reference extraction and tokenizer-aware name rewriting.
//!
//! Both dependency extraction and rename rewriting look at the same
//! candidates: bare words and the content of quoted identifiers, as produced
//! by [`crate::scan`]. Words inside string literals and comments are never
//! candidates, so a name that rename leaves untouched in a comment is also
//! never reported as a dependency.
//!
//! Matching is whole-token and case-sensitive: `my_view_extended` does not
//! match `my_view`, and `Orders` does not match `orders`.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::naming::is_stable_ref;
use crate::scan::{tokenize, unescape_quoted, Span, TokenKind};

/// How an identifier occurrence is written in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierStyle {
    /// `orders`
    Bare,
    /// `"orders"`
    Quoted,
}

/// An identifier-like occurrence in SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierOccurrence<'a> {
    /// Identifier value (unescaped for quoted identifiers).
    pub value: Cow<'a, str>,
    /// Span to replace when renaming: the whole word, or the text between
    /// the quotes.
    pub span: Span,
    pub style: IdentifierStyle,
}

/// A single text replacement produced by [`rewrite_name_occurrences`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameReplacement {
    /// Byte range in the original text.
    pub span: Span,
    pub old_text: String,
    pub new_text: String,
    pub style: IdentifierStyle,
}

/// Collect every bare word and quoted identifier in `sql`, in source order.
pub fn identifier_occurrences(sql: &str) -> Vec<IdentifierOccurrence<'_>> {
    tokenize(sql)
        .into_iter()
        .filter_map(|token| match token.kind {
            TokenKind::Word => Some(IdentifierOccurrence {
                value: Cow::Borrowed(token.text(sql)),
                span: token.span,
                style: IdentifierStyle::Bare,
            }),
            TokenKind::QuotedIdentifier => {
                let inner = token.quoted_inner_span()?;
                Some(IdentifierOccurrence {
                    value: unescape_quoted(&sql[inner.start..inner.end]),
                    span: inner,
                    style: IdentifierStyle::Quoted,
                })
            }
            _ => None,
        })
        .collect()
}

/// Names from `available` referenced in `sql`, in first-occurrence order,
/// without duplicates.
///
/// Tokens carrying the stable-reference prefix are reported even when they
/// are not in `available`, so dangling stable references show up as
/// unresolved instead of disappearing.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use pondnote_core::references::extract_cell_references;
///
/// let available: BTreeSet<String> = ["old_alias".to_string()].into();
/// assert_eq!(extract_cell_references("SELECT * FROM old_alias", &available), vec!["old_alias"]);
/// assert!(extract_cell_references("SELECT 'old_alias' AS x", &available).is_empty());
/// assert!(extract_cell_references("-- old_alias comment", &available).is_empty());
/// ```
pub fn extract_cell_references(sql: &str, available: &BTreeSet<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut found = Vec::new();
    for occurrence in identifier_occurrences(sql) {
        let value = occurrence.value.as_ref();
        if (available.contains(value) || is_stable_ref(value)) && seen.insert(value.to_string())
        {
            found.push(value.to_string());
        }
    }
    found
}

/// Find every occurrence of `name` in `sql` outside strings and comments.
pub fn find_name_occurrences<'a>(sql: &'a str, name: &str) -> Vec<IdentifierOccurrence<'a>> {
    identifier_occurrences(sql)
        .into_iter()
        .filter(|occurrence| occurrence.value == name)
        .collect()
}

/// Replace every occurrence of `old_name` in `sql` with `new_name`.
///
/// Quoted occurrences keep their quotes (`"old"` → `"new"`), bare ones stay
/// bare. Returns the rewritten text and the replacements applied, ordered by
/// position in the original text.
pub fn rewrite_name_occurrences(
    sql: &str,
    old_name: &str,
    new_name: &str,
) -> (String, Vec<NameReplacement>) {
    let occurrences = find_name_occurrences(sql, old_name);
    if occurrences.is_empty() || old_name == new_name {
        return (sql.to_string(), Vec::new());
    }

    let mut rewritten = String::with_capacity(sql.len());
    let mut replacements = Vec::with_capacity(occurrences.len());
    let mut cursor = 0;
    for occurrence in occurrences {
        let new_text = match occurrence.style {
            IdentifierStyle::Bare => new_name.to_string(),
            IdentifierStyle::Quoted => new_name.replace('"', "\"\""),
        };
        rewritten.push_str(&sql[cursor..occurrence.span.start]);
        rewritten.push_str(&new_text);
        cursor = occurrence.span.end;
        replacements.push(NameReplacement {
            span: occurrence.span,
            old_text: sql[occurrence.span.start..occurrence.span.end].to_string(),
            new_text,
            style: occurrence.style,
        });
    }
    rewritten.push_str(&sql[cursor..]);
    (rewritten, replacements)
}

// ============================================================================
// Tests
// ============================================================================
