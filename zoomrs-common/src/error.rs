//! # Error Kinds
//!
//! Purpose: Define the error surface shared by the engine and its handles.
//!
//! ## Design Principles
//! 1. **Split Propagation**: Compile-time query errors surface
//!    synchronously from the compilers; network and protocol errors are
//!    recorded on the connection and read back via [`LastError`].
//! 2. **Poll-Friendly Absence**: Out-of-range record positions return
//!    "no record" rather than an error; only scan positions fail hard.
//! 3. **Fail Fast on Misuse**: Operations on closed connections or
//!    already-sent packages fail immediately with a state error.

use crate::diag;

/// Result type for engine operations.
pub type ZoomResult<T> = Result<T, ZoomError>;

/// Errors surfaced by the session engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoomError {
    /// Operation attempted after the connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-level failure; `code` is from the fixed connection-error
    /// enumeration in [`crate::diag`].
    #[error("network failure ({code}): {message}")]
    Network { code: i32, message: String },

    /// Server returned a diagnostic for an operation.
    #[error("server diagnostic {code} ({diagset}): {message}")]
    Protocol {
        code: i32,
        message: String,
        addinfo: String,
        diagset: String,
    },

    /// Operation aborted by an explicit close.
    #[error("operation cancelled")]
    Cancelled,

    /// Scan position beyond the server-reported term count.
    #[error("position {pos} out of range (size {size})")]
    IndexOutOfRange { pos: u64, size: u64 },

    /// Operation not valid in the handle's current state.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

/// Last-error record kept per connection.
///
/// `code` 0 means no error. Mirrors the (code, message, additional-info,
/// diagnostic-set) tuple of the original connection error accessor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LastError {
    pub code: i32,
    pub message: String,
    pub addinfo: String,
    pub diagset: String,
}

impl LastError {
    /// Clears the record back to "no error".
    pub fn clear(&mut self) {
        *self = LastError::default();
    }

    /// Returns true when no error is recorded.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Records a transport failure.
    pub fn set_network(&mut self, code: i32, message: impl Into<String>) {
        self.code = code;
        self.message = message.into();
        self.addinfo.clear();
        self.diagset = diag::DIAGSET_ZOOM.to_owned();
    }

    /// Records a server diagnostic.
    pub fn set_diagnostic(
        &mut self,
        code: i32,
        message: impl Into<String>,
        addinfo: impl Into<String>,
        diagset: impl Into<String>,
    ) {
        self.code = code;
        self.message = message.into();
        self.addinfo = addinfo.into();
        self.diagset = diagset.into();
    }

    /// Converts the record into the matching error value, if any.
    pub fn to_error(&self) -> Option<ZoomError> {
        if self.is_ok() {
            return None;
        }
        if self.diagset == diag::DIAGSET_ZOOM {
            Some(ZoomError::Network {
                code: self.code,
                message: self.message.clone(),
            })
        } else {
            Some(ZoomError::Protocol {
                code: self.code,
                message: self.message.clone(),
                addinfo: self.addinfo.clone(),
                diagset: self.diagset.clone(),
            })
        }
    }
}
