//! # Retrieved Records
//!
//! A record is the immutable unit handed back from a windowed fetch: raw
//! bytes plus the syntax tag they were fetched with. Content is never
//! interpreted here; rendering and charset conversion belong to callers.

use bytes::Bytes;

/// One retrieved record.
///
/// Cloning is cheap and yields a handle whose lifetime is independent of
/// the result-set cache it came from; the underlying bytes are immutable,
/// so a clone stays valid after the cache is reset or destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    syntax: String,
    data: Bytes,
}

impl Record {
    pub(crate) fn new(syntax: impl Into<String>, data: Bytes) -> Self {
        Record {
            syntax: syntax.into(),
            data,
        }
    }

    /// The syntax tag the record was fetched with, e.g. `"usmarc"`.
    pub fn syntax(&self) -> &str {
        &self.syntax
    }

    /// Returns the record content for a render form.
    ///
    /// `"raw"` and `"render"` always match; otherwise `form` must equal
    /// the record's own syntax tag. Unknown forms yield `None` since the
    /// engine performs no conversion.
    pub fn get(&self, form: &str) -> Option<Bytes> {
        if form.eq_ignore_ascii_case("raw")
            || form.eq_ignore_ascii_case("render")
            || form.eq_ignore_ascii_case(&self.syntax)
        {
            Some(self.data.clone())
        } else {
            None
        }
    }
}
