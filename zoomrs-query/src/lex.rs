//! Shared lexing helpers for the query compilers.

use crate::error::{QueryError, QueryResult};

/// Lexes a double-quoted term starting at the opening quote. Backslash
/// escapes `"` and `\`; any other backslash is literal. Returns the term
/// text and the byte index past the closing quote.
pub(crate) fn lex_quoted(input: &str, start: usize) -> QueryResult<(String, usize)> {
    let bytes = input.as_bytes();
    let mut buf: Vec<u8> = Vec::new();
    let mut i = start + 1;
    loop {
        if i >= bytes.len() {
            return Err(QueryError::syntax("unterminated quoted term", start));
        }
        match bytes[i] {
            b'"' => {
                i += 1;
                break;
            }
            b'\\' if matches!(bytes.get(i + 1), Some(b'"') | Some(b'\\')) => {
                buf.push(bytes[i + 1]);
                i += 2;
            }
            b => {
                buf.push(b);
                i += 1;
            }
        }
    }
    // Only whole bytes of a valid &str were copied.
    let text = String::from_utf8(buf)
        .map_err(|_| QueryError::syntax("invalid UTF-8 in quoted term", start))?;
    Ok((text, i))
}
