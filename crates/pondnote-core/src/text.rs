//! Text position utilities for cell content.
//!
//! Lines and columns are 1-indexed. Columns count chars, not bytes, since
//! they are shown to users.

/// Convert a byte offset to a `(line, col)` pair.
///
/// Offsets past the end of `content` map to the position after the last
/// char.
pub fn byte_offset_to_position(content: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    for (index, ch) in content.char_indices() {
        if index >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Text of a 1-indexed line, without its line terminator.
pub fn line_text(content: &str, line: u32) -> Option<&str> {
    let index = usize::try_from(line).ok()?.checked_sub(1)?;
    content
        .split('\n')
        .nth(index)
        .map(|text| text.strip_suffix('\r').unwrap_or(text))
}

/// Number of lines; empty content has one (empty) line.
pub fn line_count(content: &str) -> u32 {
    let newlines = content.bytes().filter(|b| *b == b'\n').count();
    u32::try_from(newlines).map_or(u32::MAX, |n| n.saturating_add(1))
}
