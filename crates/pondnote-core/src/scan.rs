//! Coarse SQL scanner.
//!
//! Splits SQL text into a contiguous token stream that is just precise
//! enough to tell identifiers apart from string literals and comments. It is
//! not a SQL parser: keywords are ordinary [`TokenKind::Word`] tokens and
//! operators are single-character [`TokenKind::Symbol`] tokens.
//!
//! The scanner never fails. Unterminated strings, quoted identifiers and
//! block comments extend to the end of input and are flagged with
//! `terminated == false`, which the statement splitter turns into an error.
//!
//! Recognized forms:
//!
//! | Form | Kind |
//! |------|------|
//! | `-- ...` to end of line | `LineComment` |
//! | `/* ... */` (nesting allowed) | `BlockComment` |
//! | `'...'` with `''` escapes | `StringLiteral` |
//! | `E'...'` with backslash or `''` escapes | `StringLiteral` |
//! | `$$...$$`, `$tag$...$tag$` | `StringLiteral` |
//! | `"..."` with `""` escapes | `QuotedIdentifier` |
//! | letter/underscore then letters, digits, `_`, `$` | `Word` |

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte offsets into SQL text, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "Span start ({}) must be <= end ({})", start, end);
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Shift both ends by `offset` bytes.
    pub fn offset_by(&self, offset: usize) -> Span {
        Span::new(self.start + offset, self.end + offset)
    }

    /// Check if this span contains another span entirely.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Coarse token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Word,
    QuotedIdentifier,
    StringLiteral,
    LineComment,
    BlockComment,
    Number,
    Whitespace,
    Semicolon,
    Symbol,
}

/// A classified slice of SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// False for strings, quoted identifiers and block comments that run off
    /// the end of the input.
    pub terminated: bool,
}

impl Token {
    /// The token's source text.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    /// Span between the quotes of a quoted identifier.
    pub fn quoted_inner_span(&self) -> Option<Span> {
        if self.kind != TokenKind::QuotedIdentifier {
            return None;
        }
        let end = if self.terminated {
            self.span.end - 1
        } else {
            self.span.end
        };
        Some(Span::new(self.span.start + 1, end.max(self.span.start + 1)))
    }
}

/// Unescape the content of a quoted identifier (`""` → `"`).
pub fn unescape_quoted(inner: &str) -> Cow<'_, str> {
    if inner.contains("\"\"") {
        Cow::Owned(inner.replace("\"\"", "\""))
    } else {
        Cow::Borrowed(inner)
    }
}

/// Tokenize SQL text. The returned spans cover the input without gaps.
pub fn tokenize(sql: &str) -> Vec<Token> {
    Scanner::new(sql).run()
}

// ============================================================================
// Scanner
// ============================================================================

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token> {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let (kind, terminated) = self.next_kind();
            debug_assert!(self.pos > start, "scanner must make progress");
            self.tokens.push(Token {
                kind,
                span: Span::new(start, self.pos),
                terminated,
            });
        }
        self.tokens
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn current_char(&self) -> char {
        self.src[self.pos..].chars().next().unwrap_or('\0')
    }

    fn next_kind(&mut self) -> (TokenKind, bool) {
        let byte = self.bytes[self.pos];
        match byte {
            b'-' if self.peek(1) == Some(b'-') => {
                self.line_comment();
                (TokenKind::LineComment, true)
            }
            b'/' if self.peek(1) == Some(b'*') => (TokenKind::BlockComment, self.block_comment()),
            b'e' | b'E' if self.peek(1) == Some(b'\'') => {
                (TokenKind::StringLiteral, self.escape_string())
            }
            b'\'' => (TokenKind::StringLiteral, self.quoted(b'\'')),
            b'"' => (TokenKind::QuotedIdentifier, self.quoted(b'"')),
            b';' => {
                self.pos += 1;
                (TokenKind::Semicolon, true)
            }
            b'$' => match self.dollar_tag_len() {
                Some(tag_len) => (TokenKind::StringLiteral, self.dollar_quoted(tag_len)),
                None => {
                    self.pos += 1;
                    (TokenKind::Symbol, true)
                }
            },
            b if b.is_ascii_whitespace() => {
                while self.peek(0).is_some_and(|b| b.is_ascii_whitespace()) {
                    self.pos += 1;
                }
                (TokenKind::Whitespace, true)
            }
            b if b.is_ascii_digit() => {
                self.take_word_chars();
                (TokenKind::Number, true)
            }
            _ => {
                let c = self.current_char();
                if c.is_alphabetic() || c == '_' {
                    self.take_word_chars();
                    (TokenKind::Word, true)
                } else {
                    self.pos += c.len_utf8();
                    (TokenKind::Symbol, true)
                }
            }
        }
    }

    fn take_word_chars(&mut self) {
        while self.pos < self.bytes.len() {
            let c = self.current_char();
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn line_comment(&mut self) {
        while self.peek(0).is_some_and(|b| b != b'\n') {
            self.pos += 1;
        }
    }

    fn block_comment(&mut self) -> bool {
        self.pos += 2;
        let mut depth = 1usize;
        while self.pos < self.bytes.len() {
            match (self.bytes[self.pos], self.peek(1)) {
                (b'/', Some(b'*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (b'*', Some(b'/')) => {
                    depth -= 1;
                    self.pos += 2;
                    if depth == 0 {
                        return true;
                    }
                }
                _ => self.pos += 1,
            }
        }
        false
    }

    /// Consume a `quote`-delimited run where a doubled quote is an escape.
    fn quoted(&mut self, quote: u8) -> bool {
        self.pos += 1;
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] == quote {
                if self.peek(1) == Some(quote) {
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return true;
            }
            self.pos += 1;
        }
        false
    }

    /// Consume an `E'...'` string, where a backslash escapes the next
    /// character.
    fn escape_string(&mut self) -> bool {
        self.pos += 2;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => {
                    self.pos += 1;
                    if self.pos < self.bytes.len() {
                        self.pos += self.current_char().len_utf8();
                    }
                }
                b'\'' if self.peek(1) == Some(b'\'') => self.pos += 2,
                b'\'' => {
                    self.pos += 1;
                    return true;
                }
                _ => self.pos += 1,
            }
        }
        false
    }

    /// Length of a `$tag$` opener at the current position, if there is one.
    fn dollar_tag_len(&self) -> Option<usize> {
        let rest = &self.bytes[self.pos + 1..];
        let tag_len = rest
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        if rest.first().is_some_and(|b| b.is_ascii_digit()) {
            return None;
        }
        if rest.get(tag_len) == Some(&b'$') {
            Some(tag_len + 2)
        } else {
            None
        }
    }

    fn dollar_quoted(&mut self, tag_len: usize) -> bool {
        let delimiter = &self.bytes[self.pos..self.pos + tag_len];
        self.pos += tag_len;
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos..].starts_with(delimiter) {
                self.pos += tag_len;
                return true;
            }
            self.pos += 1;
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, &str)> {
        tokenize(sql)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text(sql)))
            .collect()
    }

    #[test]
    fn spans_cover_input() {
        let sql = "SELECT 'a''b', \"q\" FROM t -- c\n/* x */;";
        let tokens = tokenize(sql);
        let mut expected_start = 0;
        for token in &tokens {
            assert_eq!(token.span.start, expected_start);
            expected_start = token.span.end;
        }
        assert_eq!(expected_start, sql.len());
    }

    #[test]
    fn classifies_basic_forms() {
        assert_eq!(
            kinds("SELECT x, 'lit' FROM \"Tbl\" -- note"),
            vec![
                (TokenKind::Word, "SELECT"),
                (TokenKind::Word, "x"),
                (TokenKind::Symbol, ","),
                (TokenKind::StringLiteral, "'lit'"),
                (TokenKind::Word, "FROM"),
                (TokenKind::QuotedIdentifier, "\"Tbl\""),
                (TokenKind::LineComment, "-- note"),
            ]
        );
    }

    #[test]
    fn doubled_quotes_stay_inside() {
        assert_eq!(
            kinds("'it''s' \"a\"\"b\""),
            vec![
                (TokenKind::StringLiteral, "'it''s'"),
                (TokenKind::QuotedIdentifier, "\"a\"\"b\""),
            ]
        );
        assert_eq!(unescape_quoted("a\"\"b"), "a\"b");
    }

    #[test]
    fn escape_strings_take_backslash_escapes() {
        assert_eq!(
            kinds("E'it\\'s' FROM old_alias, e'a\\\\' x, e_col"),
            vec![
                (TokenKind::StringLiteral, "E'it\\'s'"),
                (TokenKind::Word, "FROM"),
                (TokenKind::Word, "old_alias"),
                (TokenKind::Symbol, ","),
                (TokenKind::StringLiteral, "e'a\\\\'"),
                (TokenKind::Word, "x"),
                (TokenKind::Symbol, ","),
                (TokenKind::Word, "e_col"),
            ]
        );
        // Plain strings keep backslashes literal.
        assert_eq!(
            kinds("'a\\' b"),
            vec![(TokenKind::StringLiteral, "'a\\'"), (TokenKind::Word, "b")]
        );
        assert!(!tokenize("E'open\\'")[0].terminated);
    }

    #[test]
    fn nested_block_comment() {
        assert_eq!(
            kinds("/* a /* b */ c */ x"),
            vec![
                (TokenKind::BlockComment, "/* a /* b */ c */"),
                (TokenKind::Word, "x"),
            ]
        );
    }

    #[test]
    fn dollar_quoted_strings() {
        assert_eq!(
            kinds("$$ t ; $$ $fn$ body $fn$ $1"),
            vec![
                (TokenKind::StringLiteral, "$$ t ; $$"),
                (TokenKind::StringLiteral, "$fn$ body $fn$"),
                (TokenKind::Symbol, "$"),
                (TokenKind::Number, "1"),
            ]
        );
    }

    #[test]
    fn unterminated_forms_are_flagged() {
        for sql in ["'open", "E'open", "\"open", "/* open", "$$ open"] {
            let tokens = tokenize(sql);
            assert_eq!(tokens.len(), 1, "{}", sql);
            assert!(!tokens[0].terminated, "{} should be unterminated", sql);
        }
    }

    #[test]
    fn quoted_inner_span() {
        let sql = "\"abc\"";
        let token = tokenize(sql)[0];
        let inner = token.quoted_inner_span().unwrap();
        assert_eq!(&sql[inner.start..inner.end], "abc");
    }

    #[test]
    fn unicode_words() {
        assert_eq!(
            kinds("SELECT café FROM t"),
            vec![
                (TokenKind::Word, "SELECT"),
                (TokenKind::Word, "café"),
                (TokenKind::Word, "FROM"),
                (TokenKind::Word, "t"),
            ]
        );
    }
}
