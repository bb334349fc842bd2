//! # Result Sets
//!
//! Purpose: Expose a server-side search outcome as a windowed, cached
//! view over its records.
//!
//! ## Design Principles
//! 1. **Sparse Cache**: Records are cached by 1-based position; a miss
//!    fetches a whole window (`fetchWindow` option) to amortize
//!    round-trips.
//! 2. **Sort Invalidates**: A server-side sort reorders positions, so the
//!    cache is cleared before the sort request is even queued.
//! 3. **Absence Is Not an Error**: Positions beyond the hit count return
//!    "no record" so callers can probe without error-driven control flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use zoomrs_common::{diag, Options, ZoomError, ZoomResult};
use zoomrs_query::SortSpec;

use crate::connection::{Connection, OpState};
use crate::event;
use crate::record::Record;

pub(crate) struct RsInner {
    pub(crate) state: OpState,
    pub(crate) size: u64,
    pub(crate) setname: String,
    pub(crate) options: Options,
    pub(crate) cache: HashMap<u64, Record>,
}

/// Handle to one server-side result set.
pub struct ResultSet {
    inner: Arc<Mutex<RsInner>>,
    conn: Connection,
}

impl ResultSet {
    pub(crate) fn new(inner: Arc<Mutex<RsInner>>, conn: Connection) -> Self {
        ResultSet { inner, conn }
    }

    /// The result set's options store (a child of the connection's).
    pub fn options(&self) -> Options {
        self.lock().options.clone()
    }

    pub fn option_get(&self, key: &str) -> Option<String> {
        self.options().get(key)
    }

    pub fn option_set(&self, key: &str, value: &str) {
        self.options().set(key, value);
    }

    /// Current operation state of the set.
    pub fn state(&self) -> OpState {
        self.lock().state
    }

    /// Server-reported hit count; 0 while the search is still pending.
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Fetches the record at 1-based `pos`, driving this connection until
    /// the windowed fetch completes.
    ///
    /// A cached position returns immediately with no network traffic.
    /// Positions outside `1..=size()` yield `Ok(None)`.
    pub fn get_record(&self, pos: u64) -> ZoomResult<Option<Record>> {
        self.wait_settled()?;

        let (setname, start, count, syntax) = {
            let inner = self.lock();
            if let Some(record) = inner.cache.get(&pos) {
                return Ok(Some(record.clone()));
            }
            if pos == 0 || pos > inner.size {
                return Ok(None);
            }
            let window = inner.options.get_int("fetchWindow", 10).max(1) as u64;
            let count = window.min(inner.size - pos + 1);
            let syntax = inner
                .options
                .get("preferredRecordSyntax")
                .unwrap_or_else(|| "raw".to_owned());
            (inner.setname.clone(), pos, count, syntax)
        };

        self.conn
            .queue_present(&self.inner, &setname, start, count, &syntax)?;
        self.drive_while(|inner| inner.state == OpState::Ready && !inner.cache.contains_key(&pos))?;

        let inner = self.lock();
        match inner.state {
            OpState::Ready => Ok(inner.cache.get(&pos).cloned()),
            state => Err(self.conn.op_error(state)),
        }
    }

    /// Returns the cached record at `pos`, or `None`, without ever
    /// touching the network.
    pub fn get_record_immediate(&self, pos: u64) -> Option<Record> {
        self.lock().cache.get(&pos).cloned()
    }

    /// Applies a server-side sort, clearing the record cache.
    ///
    /// The cache is empty, the hit count reads zero, and the set is
    /// pending from the moment this returns; completion is observed
    /// through the event loop like any search. Invalid criteria fail
    /// eagerly without touching the set.
    pub fn sort(&self, criteria: &str) -> ZoomResult<()> {
        let spec = SortSpec::parse(criteria).map_err(|err| ZoomError::Network {
            code: diag::ERROR_INVALID_QUERY,
            message: err.to_string(),
        })?;
        let setname = {
            let mut inner = self.lock();
            inner.cache.clear();
            inner.size = 0;
            inner.state = OpState::Pending;
            inner.setname.clone()
        };
        let queued = self
            .conn
            .queue_sort(&self.inner, &setname, &spec.to_string());
        if queued.is_err() {
            self.lock().state = OpState::Failed;
        }
        queued
    }

    /// Drops all cached records; the server-side set is untouched.
    pub fn reset_cache(&self) {
        self.lock().cache.clear();
    }

    /// Releases the cache and the connection binding.
    ///
    /// Records cloned out of the cache remain valid. The connection
    /// itself stays open.
    pub fn destroy(self) {
        self.lock().cache.clear();
    }

    /// Drives the connection until the search (or sort) settles.
    fn wait_settled(&self) -> ZoomResult<()> {
        self.drive_while(|inner| inner.state == OpState::Pending)?;
        let state = self.lock().state;
        match state {
            OpState::Ready => Ok(()),
            OpState::Pending => Err(ZoomError::Network {
                code: diag::ERROR_INTERNAL,
                message: "search ended without a response".to_owned(),
            }),
            state => Err(self.conn.op_error(state)),
        }
    }

    /// Drives this result set's own connection while `keep_going` holds
    /// and the scheduler still reports progress, bounded by the
    /// connection's `timeout` option.
    fn drive_while(&self, keep_going: impl Fn(&RsInner) -> bool) -> ZoomResult<()> {
        let deadline = Instant::now() + self.conn.op_timeout();
        loop {
            if !keep_going(&self.lock()) {
                return Ok(());
            }
            if event::drive(&[&self.conn]).is_none() {
                return Ok(());
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

    fn lock(&self) -> std::sync::MutexGuard<'_, RsInner> {
        self.inner.lock().expect("result set mutex poisoned")
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ResultSet")
            .field("setname", &inner.setname)
            .field("state", &inner.state)
            .field("size", &inner.size)
            .field("cached", &inner.cache.len())
            .finish()
    }
}
