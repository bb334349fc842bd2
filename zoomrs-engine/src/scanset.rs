//! # Scan Sets
//!
//! A scan browses an index's term list around a start term. The server
//! reports an ordered run of (term, occurrence count, display term)
//! triples; it may return fewer than the `number` option requested.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use zoomrs_common::{diag, ZoomError, ZoomResult};

use crate::connection::{Connection, OpState};
use crate::event;

/// One browsed index term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTerm {
    pub term: String,
    pub occurrences: u64,
    pub display: String,
}

pub(crate) struct ScanInner {
    pub(crate) state: OpState,
    pub(crate) terms: Vec<ScanTerm>,
}

/// Handle to one term-list browse.
pub struct ScanSet {
    inner: Arc<Mutex<ScanInner>>,
    conn: Connection,
}

impl ScanSet {
    pub(crate) fn new(inner: Arc<Mutex<ScanInner>>, conn: Connection) -> Self {
        ScanSet { inner, conn }
    }

    /// Current operation state of the scan.
    pub fn state(&self) -> OpState {
        self.lock().state
    }

    /// Number of terms the server actually returned; 0 while pending.
    pub fn size(&self) -> u64 {
        self.lock().terms.len() as u64
    }

    /// Returns the term at 1-based `pos`, driving this connection until
    /// the scan completes. Positions beyond [`ScanSet::size`] fail with
    /// an out-of-range error.
    pub fn term(&self, pos: u64) -> ZoomResult<ScanTerm> {
        self.wait_settled()?;
        let inner = self.lock();
        let size = inner.terms.len() as u64;
        if pos == 0 || pos > size {
            return Err(ZoomError::IndexOutOfRange { pos, size });
        }
        Ok(inner.terms[(pos - 1) as usize].clone())
    }

    /// Releases the handle; the connection stays open.
    pub fn destroy(self) {}

    fn wait_settled(&self) -> ZoomResult<()> {
        let deadline = Instant::now() + self.conn.op_timeout();
        loop {
            match self.lock().state {
                OpState::Pending => {}
                OpState::Ready => return Ok(()),
                state => return Err(self.conn.op_error(state)),
            }
            if event::drive(&[&self.conn]).is_none() {
                return Err(ZoomError::Network {
                    code: diag::ERROR_INTERNAL,
                    message: "scan ended without a response".to_owned(),
                });
            }
            if Instant::now() > deadline {
                self.conn.fail_timeout();
                return Err(ZoomError::Network {
                    code: diag::ERROR_TIMEOUT,
                    message: "operation timed out".to_owned(),
                });
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScanInner> {
        self.inner.lock().expect("scan set mutex poisoned")
    }
}

impl std::fmt::Debug for ScanSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ScanSet")
            .field("state", &inner.state)
            .field("terms", &inner.terms.len())
            .finish()
    }
}
