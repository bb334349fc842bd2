//! Compile-time query errors.

/// Result type for the query compilers.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors produced while compiling a query expression.
///
/// `pos` is a byte offset into the source string pointing at the offending
/// token. CCL errors carry the numeric code of the fixed diagnostic
/// taxonomy in addition to its canonical message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("{message} at byte {pos}")]
    Syntax { message: String, pos: usize },

    #[error("CCL error {code}: {message} at byte {pos}")]
    Ccl {
        code: i32,
        message: &'static str,
        pos: usize,
    },
}

impl QueryError {
    pub(crate) fn syntax(message: impl Into<String>, pos: usize) -> Self {
        QueryError::Syntax {
            message: message.into(),
            pos,
        }
    }

    /// Returns the byte offset the error points at.
    pub fn position(&self) -> usize {
        match self {
            QueryError::Syntax { pos, .. } | QueryError::Ccl { pos, .. } => *pos,
        }
    }

    /// Returns the numeric CCL code, if this is a CCL error.
    pub fn ccl_code(&self) -> Option<i32> {
        match self {
            QueryError::Ccl { code, .. } => Some(*code),
            QueryError::Syntax { .. } => None,
        }
    }
}
