//! Sort-criteria DSL: `field [ascending|descending] (, field ...)`.

use std::fmt;

use crate::error::{QueryError, QueryResult};

/// One sort key with its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// Validated sort criteria, ordered by precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

impl SortSpec {
    /// Parses and validates the DSL eagerly. Direction defaults to
    /// ascending when omitted.
    pub fn parse(criteria: &str) -> QueryResult<Self> {
        let mut keys = Vec::new();
        let mut offset = 0usize;
        for part in criteria.split(',') {
            let trimmed = part.trim();
            let part_pos = offset + (part.len() - part.trim_start().len());
            if trimmed.is_empty() {
                return Err(QueryError::syntax("empty sort key", part_pos));
            }
            let mut words = trimmed.split_whitespace();
            let field = words.next().expect("non-empty sort key").to_owned();
            let ascending = match words.next() {
                None => true,
                Some("ascending") => true,
                Some("descending") => false,
                Some(other) => {
                    return Err(QueryError::syntax(
                        format!("expected 'ascending' or 'descending', found '{other}'"),
                        part_pos,
                    ))
                }
            };
            if let Some(extra) = words.next() {
                return Err(QueryError::syntax(
                    format!("unexpected token '{extra}' in sort key"),
                    part_pos,
                ));
            }
            keys.push(SortKey { field, ascending });
            offset += part.len() + 1;
        }
        if keys.is_empty() {
            return Err(QueryError::syntax("empty sort criteria", 0));
        }
        Ok(SortSpec { keys })
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, key) in self.keys.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{} {}",
                key.field,
                if key.ascending { "ascending" } else { "descending" }
            )?;
        }
        Ok(())
    }
}
