//! # Extended-Service Packages
//!
//! One package is one extended-service transaction (record update, item
//! order, and similar non-search actions). The action type is an opaque
//! server-defined string; its parameters are options set on the package's
//! own store and serialized verbatim into the request.

use std::sync::{Arc, Mutex};

use zoomrs_common::{Options, ZoomError, ZoomResult};

use crate::connection::{Connection, OpState};

pub(crate) struct PkgInner {
    pub(crate) state: OpState,
    pub(crate) sent: bool,
    pub(crate) es_type: String,
    pub(crate) options: Options,
}

/// Handle to one extended-service transaction.
///
/// Lifecycle: built (configure options) → sent once → completed or
/// failed. A package can never be resent.
pub struct Package {
    inner: Arc<Mutex<PkgInner>>,
    conn: Connection,
}

impl Package {
    pub(crate) fn new(inner: Arc<Mutex<PkgInner>>, conn: Connection) -> Self {
        Package { inner, conn }
    }

    /// The action type this package was created with.
    pub fn es_type(&self) -> String {
        self.lock().es_type.clone()
    }

    /// The package's own options store (a child of the connection's).
    pub fn options(&self) -> Options {
        self.lock().options.clone()
    }

    pub fn option_get(&self, key: &str) -> Option<String> {
        self.options().get(key)
    }

    pub fn option_set(&self, key: &str, value: &str) {
        self.options().set(key, value);
    }

    /// Operation state: built until sent, then pending until the server
    /// answers.
    pub fn state(&self) -> OpState {
        self.lock().state
    }

    /// Whether the package has been sent.
    pub fn is_sent(&self) -> bool {
        self.lock().sent
    }

    /// Queues the extended-service request.
    ///
    /// Exactly one send per package; a second attempt fails with an
    /// illegal-state error, and sending on a closed connection fails with
    /// a closed error.
    pub fn send(&self) -> ZoomResult<()> {
        {
            let mut inner = self.lock();
            if inner.sent {
                return Err(ZoomError::IllegalState("package already sent"));
            }
            inner.sent = true;
            inner.state = OpState::Pending;
        }
        // The package lock is released before queueing; the connection
        // locks it again while serializing the options.
        let queued = self.conn.queue_es(&self.inner);
        if queued.is_err() {
            self.lock().state = OpState::Failed;
        }
        queued
    }

    /// Releases the handle; the connection stays open.
    pub fn destroy(self) {}

    fn lock(&self) -> std::sync::MutexGuard<'_, PkgInner> {
        self.inner.lock().expect("package mutex poisoned")
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Package")
            .field("es_type", &inner.es_type)
            .field("state", &inner.state)
            .field("sent", &inner.sent)
            .finish()
    }
}
