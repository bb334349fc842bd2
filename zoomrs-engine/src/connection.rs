//! # Connection
//!
//! Purpose: Own one session with a remote search target: the transport
//! channel, the options store, the last-error record, and the queue of
//! in-flight operations.
//!
//! ## Design Principles
//! 1. **Queue, Don't Block**: `search`/`scan`/package-send only enqueue
//!    work; bytes move exclusively inside the event loop's drive step, so
//!    many connections share one thread of control.
//! 2. **Errors Stay Local**: Network and server failures are recorded in
//!    the connection's last-error and the affected handle's state; they
//!    are never thrown out of the scheduler.
//! 3. **Closed Is Final**: A closed connection cancels its pending work
//!    and rejects everything afterwards; reopening means a new value.
//! 4. **Pipelined FIFO**: Responses are matched to requests strictly in
//!    send order, which the protocol guarantees per connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use zoomrs_common::{diag, LastError, Options, ZoomError, ZoomResult};
use zoomrs_query::{CqlProfile, Query, QueryResult, SortSpec};

use crate::channel::{Channel, RecvState, TcpChannel};
use crate::event::{next_stamp, EventKind};
use crate::package::{Package, PkgInner};
use crate::proto::{encode_frame, field_i32, field_str, field_u64, Frame, FrameParser};
use crate::record::Record;
use crate::resultset::{ResultSet, RsInner};
use crate::scanset::{ScanInner, ScanSet, ScanTerm};

/// Lifecycle state of an asynchronous operation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    /// Created but not yet submitted; only packages linger here.
    Built,
    /// Queued or on the wire; the completion event has not arrived.
    Pending,
    /// Completed; results are readable.
    Ready,
    /// The server or transport reported a failure; see the connection's
    /// last-error.
    Failed,
    /// Aborted by closing the connection.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Created,
    Connecting,
    Open,
    Closed,
    Failed,
}

enum OpKind {
    Init,
    Search(Arc<Mutex<RsInner>>),
    Sort(Arc<Mutex<RsInner>>),
    Present(Arc<Mutex<RsInner>>),
    Scan(Arc<Mutex<ScanInner>>),
    Es(Arc<Mutex<PkgInner>>),
}

struct Op {
    kind: OpKind,
    frame: Vec<u8>,
}

struct Event {
    stamp: u64,
    kind: EventKind,
}

struct ConnInner {
    state: ConnState,
    channel: Option<Box<dyn Channel>>,
    options: Options,
    last_error: LastError,
    last_event: EventKind,
    /// Ops accepted but not yet serialized to the send buffer.
    queue: VecDeque<Op>,
    /// Ops on the wire, awaiting responses in FIFO order.
    inflight: VecDeque<Op>,
    send_buf: BytesMut,
    recv_buf: BytesMut,
    parser: FrameParser,
    events: VecDeque<Event>,
    next_set: u64,
    peer: String,
}

/// One session with a remote target.
///
/// Cloning yields another handle to the same session; result sets, scan
/// sets, and packages keep such a handle internally.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<ConnInner>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Creates an unconnected session with an empty options store.
    pub fn new() -> Self {
        Self::with_options(Options::new())
    }

    /// Creates an unconnected session configured by `options`.
    pub fn with_options(options: Options) -> Self {
        Connection {
            inner: Arc::new(Mutex::new(ConnInner {
                state: ConnState::Created,
                channel: None,
                options,
                last_error: LastError::default(),
                last_event: EventKind::None,
                queue: VecDeque::new(),
                inflight: VecDeque::new(),
                send_buf: BytesMut::new(),
                recv_buf: BytesMut::with_capacity(8 * 1024),
                parser: FrameParser::new(),
                events: VecDeque::new(),
                next_set: 0,
                peer: String::new(),
            })),
        }
    }

    /// The session's options store.
    pub fn options(&self) -> Options {
        self.lock().options.clone()
    }

    pub fn option_get(&self, key: &str) -> Option<String> {
        self.options().get(key)
    }

    pub fn option_set(&self, key: &str, value: &str) {
        self.options().set(key, value);
    }

    /// Opens a TCP transport to `host:port` and queues session setup.
    ///
    /// Ordinary connect failures never surface here; the connection
    /// transitions to its failed state with the error recorded, readable
    /// via [`Connection::last_error`].
    pub fn connect(&self, host: &str, port: u16) {
        let timeout = self.connect_timeout();
        match TcpChannel::connect(host, port, timeout) {
            Ok(channel) => {
                self.install_channel(Box::new(channel), format!("{host}:{port}"));
            }
            Err(err) => {
                let mut inner = self.lock();
                inner.peer = format!("{host}:{port}");
                inner.state = ConnState::Failed;
                inner
                    .last_error
                    .set_network(diag::ERROR_CONNECT, err.to_string());
                debug!(peer = %inner.peer, error = %err, "connect failed");
            }
        }
    }

    /// Attaches a caller-supplied transport instead of TCP.
    pub fn connect_with(&self, channel: Box<dyn Channel>) {
        self.install_channel(channel, "custom".to_owned());
    }

    fn install_channel(&self, channel: Box<dyn Channel>, peer: String) {
        let mut inner = self.lock();
        inner.channel = Some(channel);
        inner.peer = peer;
        inner.state = ConnState::Connecting;
        inner.last_error.clear();
        let frame = build_frame(&[b"INIT"]);
        inner.queue.push_back(Op {
            kind: OpKind::Init,
            frame,
        });
        debug!(peer = %inner.peer, "transport attached");
    }

    /// Registers a search and returns its pending result set.
    ///
    /// Fails immediately if the connection is closed, failed, or was never
    /// opened; completion is observed through the event loop.
    pub fn search(&self, query: &Query) -> ZoomResult<ResultSet> {
        let mut inner = self.lock();
        inner.ensure_usable()?;

        let setname = format!("rs{}", inner.next_set);
        inner.next_set += 1;
        let options = inner.options.child();
        let database = inner
            .options
            .get("databaseName")
            .unwrap_or_else(|| "Default".to_owned());
        let sort = query
            .sort_spec()
            .map(SortSpec::to_string)
            .unwrap_or_default();
        let pqf = query.to_pqf();

        let rs = Arc::new(Mutex::new(RsInner {
            state: OpState::Pending,
            size: 0,
            setname: setname.clone(),
            options,
            cache: Default::default(),
        }));
        let frame = build_frame(&[
            b"SEARCH",
            setname.as_bytes(),
            database.as_bytes(),
            pqf.as_bytes(),
            sort.as_bytes(),
        ]);
        inner.queue.push_back(Op {
            kind: OpKind::Search(rs.clone()),
            frame,
        });
        debug!(peer = %inner.peer, set = %setname, query = %pqf, "search queued");
        Ok(ResultSet::new(rs, self.clone()))
    }

    /// Registers a term-list browse starting at `term`.
    pub fn scan(&self, term: &str) -> ZoomResult<ScanSet> {
        self.scan_start(term.to_owned())
    }

    /// Registers a term-list browse starting at a compiled query's term.
    pub fn scan_query(&self, query: &Query) -> ZoomResult<ScanSet> {
        self.scan_start(query.to_pqf())
    }

    fn scan_start(&self, start: String) -> ZoomResult<ScanSet> {
        let mut inner = self.lock();
        inner.ensure_usable()?;

        let number = inner.options.get_int("number", 10).max(1);
        let scan = Arc::new(Mutex::new(ScanInner {
            state: OpState::Pending,
            terms: Vec::new(),
        }));
        let frame = build_frame(&[b"SCAN", start.as_bytes(), number.to_string().as_bytes()]);
        inner.queue.push_back(Op {
            kind: OpKind::Scan(scan.clone()),
            frame,
        });
        debug!(peer = %inner.peer, start = %start, number, "scan queued");
        Ok(ScanSet::new(scan, self.clone()))
    }

    /// Creates an extended-service package of the given action type.
    ///
    /// The package gets a fresh child options store and touches the
    /// network only when sent.
    pub fn package(&self, es_type: &str) -> ZoomResult<Package> {
        let inner = self.lock();
        if inner.state == ConnState::Closed {
            return Err(ZoomError::ConnectionClosed);
        }
        let pkg = Arc::new(Mutex::new(PkgInner {
            state: OpState::Built,
            sent: false,
            es_type: es_type.to_owned(),
            options: inner.options.child(),
        }));
        Ok(Package::new(pkg, self.clone()))
    }

    /// Compiles a CQL string using this connection's field mapping.
    ///
    /// Options named `cql.field.<index>` extend and override the built-in
    /// context profile; their values are attribute specs like `"1=4"`.
    pub fn compile_cql(&self, input: &str) -> QueryResult<Query> {
        let mut profile = CqlProfile::default();
        for (key, value) in self.options().local_entries() {
            if let Some(index) = key.strip_prefix("cql.field.") {
                profile.add(index, &value)?;
            }
        }
        Query::from_cql_with(input, &profile)
    }

    /// The most recent error recorded on this connection; a zero code
    /// means none.
    pub fn last_error(&self) -> LastError {
        self.lock().last_error.clone()
    }

    /// The event most recently delivered for this connection.
    pub fn last_event(&self) -> EventKind {
        self.lock().last_event
    }

    pub fn is_closed(&self) -> bool {
        self.lock().state == ConnState::Closed
    }

    /// Closes the session, cancelling all pending operations.
    ///
    /// Idempotent; their handles observe [`OpState::Cancelled`] and every
    /// later call on this connection fails with a closed error.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == ConnState::Closed {
            return;
        }
        // Best-effort goodbye; the peer may already be gone.
        if inner.state == ConnState::Open {
            let frame = build_frame(&[b"CLOSE"]);
            if let Some(channel) = inner.channel.as_mut() {
                let _ = channel.send(&frame);
            }
        }
        let inner = &mut *inner;
        for op in inner.queue.drain(..).chain(inner.inflight.drain(..)) {
            mark_op(&op.kind, OpState::Cancelled);
        }
        if let Some(mut channel) = inner.channel.take() {
            channel.close();
        }
        inner.send_buf.clear();
        inner.events.clear();
        inner.state = ConnState::Closed;
        debug!(peer = %inner.peer, "connection closed");
    }

    // ---- scheduler interface -------------------------------------------

    /// One non-blocking I/O and protocol step. Called from the event loop.
    pub(crate) fn step(&self) {
        let mut inner = self.lock();
        match inner.state {
            ConnState::Created | ConnState::Closed | ConnState::Failed => return,
            ConnState::Connecting => {
                // The transport connect completed synchronously in
                // `connect`; the first drive observes it.
                inner.state = ConnState::Open;
                inner.push_event(EventKind::Connect);
                debug!(peer = %inner.peer, "session open");
            }
            ConnState::Open => {}
        }

        while let Some(op) = inner.queue.pop_front() {
            inner.send_buf.extend_from_slice(&op.frame);
            inner.inflight.push_back(op);
            inner.push_event(EventKind::SendApdu);
        }

        if let Err(err) = inner.pump() {
            inner.fail(err);
        }
    }

    pub(crate) fn front_event_stamp(&self) -> Option<u64> {
        self.lock().events.front().map(|ev| ev.stamp)
    }

    pub(crate) fn take_event(&self) -> Option<EventKind> {
        let mut inner = self.lock();
        let kind = inner.events.pop_front().map(|ev| ev.kind)?;
        inner.last_event = kind;
        Some(kind)
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        let inner = self.lock();
        matches!(inner.state, ConnState::Connecting)
            || !inner.queue.is_empty()
            || !inner.inflight.is_empty()
            || !inner.send_buf.is_empty()
    }

    pub(crate) fn note_idle_poll(&self) {
        self.lock().last_event = EventKind::None;
    }

    /// Waits up to `timeout` for this connection's transport to become
    /// readable. Used by the scheduler instead of a blind sleep.
    pub(crate) fn poll_channel(&self, timeout: Duration) {
        let mut inner = self.lock();
        if let Some(channel) = inner.channel.as_mut() {
            channel.poll(timeout);
        } else {
            thread::sleep(timeout);
        }
    }

    /// Records a timeout failure for all outstanding work.
    pub(crate) fn fail_timeout(&self) {
        let mut inner = self.lock();
        inner.push_event(EventKind::Timeout);
        inner.fail(ZoomError::Network {
            code: diag::ERROR_TIMEOUT,
            message: "operation timed out".to_owned(),
        });
    }

    /// Wall-clock budget for internally driven waits, from the `timeout`
    /// option in seconds.
    pub(crate) fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.options().get_int("timeout", 30).max(1) as u64)
    }

    /// The error a caller should see for an operation that failed or was
    /// cancelled on this connection.
    pub(crate) fn op_error(&self, state: OpState) -> ZoomError {
        match state {
            OpState::Cancelled => ZoomError::Cancelled,
            _ => self.last_error().to_error().unwrap_or(ZoomError::Network {
                code: diag::ERROR_INTERNAL,
                message: "operation failed without a recorded error".to_owned(),
            }),
        }
    }

    pub(crate) fn queue_present(
        &self,
        rs: &Arc<Mutex<RsInner>>,
        setname: &str,
        start: u64,
        count: u64,
        syntax: &str,
    ) -> ZoomResult<()> {
        let mut inner = self.lock();
        inner.ensure_usable()?;
        let frame = build_frame(&[
            b"PRESENT",
            setname.as_bytes(),
            start.to_string().as_bytes(),
            count.to_string().as_bytes(),
            syntax.as_bytes(),
        ]);
        inner.queue.push_back(Op {
            kind: OpKind::Present(rs.clone()),
            frame,
        });
        trace!(peer = %inner.peer, set = %setname, start, count, "present queued");
        Ok(())
    }

    pub(crate) fn queue_sort(
        &self,
        rs: &Arc<Mutex<RsInner>>,
        setname: &str,
        criteria: &str,
    ) -> ZoomResult<()> {
        let mut inner = self.lock();
        inner.ensure_usable()?;
        let frame = build_frame(&[b"SORT", setname.as_bytes(), criteria.as_bytes()]);
        inner.queue.push_back(Op {
            kind: OpKind::Sort(rs.clone()),
            frame,
        });
        debug!(peer = %inner.peer, set = %setname, criteria = %criteria, "sort queued");
        Ok(())
    }

    pub(crate) fn queue_es(&self, pkg: &Arc<Mutex<PkgInner>>) -> ZoomResult<()> {
        let mut inner = self.lock();
        inner.ensure_usable()?;
        let mut parts: Vec<Vec<u8>> = vec![b"ES".to_vec()];
        {
            let pkg = pkg.lock().expect("package mutex poisoned");
            parts.push(pkg.es_type.clone().into_bytes());
            for (key, value) in pkg.options.local_entries() {
                parts.push(key.into_bytes());
                parts.push(value.into_bytes());
            }
        }
        let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        let frame = build_frame(&refs);
        inner.queue.push_back(Op {
            kind: OpKind::Es(pkg.clone()),
            frame,
        });
        Ok(())
    }

    fn connect_timeout(&self) -> Option<Duration> {
        let secs = self.options().get_int("timeout", 0);
        if secs > 0 {
            Some(Duration::from_secs(secs as u64))
        } else {
            None
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnInner> {
        self.inner.lock().expect("connection mutex poisoned")
    }
}

impl ConnInner {
    fn ensure_usable(&self) -> ZoomResult<()> {
        match self.state {
            ConnState::Closed => Err(ZoomError::ConnectionClosed),
            ConnState::Failed => Err(self
                .last_error
                .to_error()
                .unwrap_or(ZoomError::ConnectionClosed)),
            ConnState::Created => Err(ZoomError::IllegalState("connection is not opened")),
            ConnState::Connecting | ConnState::Open => Ok(()),
        }
    }

    fn push_event(&mut self, kind: EventKind) {
        self.events.push_back(Event {
            stamp: next_stamp(),
            kind,
        });
    }

    /// Flushes the send buffer and drains the receive side.
    fn pump(&mut self) -> ZoomResult<()> {
        if self.channel.is_none() {
            return Ok(());
        }

        if !self.send_buf.is_empty() {
            let channel = self.channel.as_mut().expect("channel present");
            let written = channel.send(&self.send_buf)?;
            if written > 0 {
                self.send_buf.advance(written);
                trace!(peer = %self.peer, written, "bytes sent");
                self.push_event(EventKind::SendData);
            }
        }

        loop {
            let channel = self.channel.as_mut().expect("channel present");
            match channel.recv(&mut self.recv_buf)? {
                RecvState::Data(read) => {
                    trace!(peer = %self.peer, read, "bytes received");
                    self.push_event(EventKind::RecvData);
                    while let Some(frame) = self.parser.parse(&mut self.recv_buf)? {
                        self.push_event(EventKind::RecvApdu);
                        self.dispatch(frame)?;
                    }
                }
                RecvState::WouldBlock => return Ok(()),
                RecvState::Closed => {
                    if self.inflight.is_empty() && self.queue.is_empty() {
                        self.state = ConnState::Closed;
                        self.channel = None;
                        return Ok(());
                    }
                    return Err(ZoomError::Network {
                        code: diag::ERROR_CONNECTION_LOST,
                        message: "peer closed with operations outstanding".to_owned(),
                    });
                }
            }
        }
    }

    /// Matches one response frame against the oldest in-flight operation.
    fn dispatch(&mut self, frame: Frame) -> ZoomResult<()> {
        let op = self.inflight.pop_front().ok_or(ZoomError::Network {
            code: diag::ERROR_DECODE,
            message: "response without a matching request".to_owned(),
        })?;
        let verb = frame.first().map(Vec::as_slice).unwrap_or_default();

        match (verb, &op.kind) {
            (b"INITED", OpKind::Init) => {}
            (b"HITS", OpKind::Search(rs)) | (b"HITS", OpKind::Sort(rs)) => {
                let hits = field_u64(&frame, 1)?;
                let mut rs = rs.lock().expect("result set mutex poisoned");
                rs.size = hits;
                rs.state = OpState::Ready;
                debug!(peer = %self.peer, set = %rs.setname, hits, "search complete");
                self.push_event(EventKind::RecvSearch);
            }
            (b"RECS", OpKind::Present(rs)) => {
                let start = field_u64(&frame, 1)?;
                let syntax = field_str(&frame, 2)?;
                let mut rs = rs.lock().expect("result set mutex poisoned");
                for (offset, data) in frame[3..].iter().enumerate() {
                    let record = Record::new(syntax.clone(), Bytes::from(data.clone()));
                    rs.cache.insert(start + offset as u64, record);
                    self.push_event(EventKind::RecvRecord);
                }
                trace!(peer = %self.peer, set = %rs.setname, start, count = frame.len() - 3, "records cached");
            }
            (b"TERMS", OpKind::Scan(scan)) => {
                let mut terms = Vec::new();
                let mut idx = 1;
                while idx + 3 <= frame.len() {
                    terms.push(ScanTerm {
                        term: field_str(&frame, idx)?,
                        occurrences: field_u64(&frame, idx + 1)?,
                        display: field_str(&frame, idx + 2)?,
                    });
                    idx += 3;
                }
                let mut scan = scan.lock().expect("scan set mutex poisoned");
                scan.terms = terms;
                scan.state = OpState::Ready;
            }
            (b"ESOK", OpKind::Es(pkg)) => {
                let mut pkg = pkg.lock().expect("package mutex poisoned");
                pkg.state = OpState::Ready;
            }
            (b"DIAG", _) => {
                let code = field_i32(&frame, 1)?;
                let message = field_str(&frame, 2)?;
                let addinfo = field_str(&frame, 3)?;
                let diagset = field_str(&frame, 4)?;
                debug!(peer = %self.peer, code, message = %message, "server diagnostic");
                self.last_error
                    .set_diagnostic(code, message, addinfo, diagset);
                mark_op(&op.kind, OpState::Failed);
            }
            _ => {
                return Err(ZoomError::Network {
                    code: diag::ERROR_DECODE,
                    message: "response verb does not match the pending operation".to_owned(),
                });
            }
        }
        self.push_event(EventKind::End);
        Ok(())
    }

    /// Marks the connection failed and every outstanding operation with it.
    fn fail(&mut self, err: ZoomError) {
        if let ZoomError::Network { code, message } = &err {
            if self.last_error.is_ok() {
                self.last_error.set_network(*code, message.clone());
            }
        } else if self.last_error.is_ok() {
            self.last_error
                .set_network(diag::ERROR_INTERNAL, err.to_string());
        }
        for op in self.queue.drain(..).chain(self.inflight.drain(..)) {
            mark_op(&op.kind, OpState::Failed);
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.send_buf.clear();
        self.state = ConnState::Failed;
        debug!(peer = %self.peer, error = %self.last_error.message, "connection failed");
    }
}

fn mark_op(kind: &OpKind, state: OpState) {
    match kind {
        OpKind::Init => {}
        OpKind::Search(rs) | OpKind::Sort(rs) | OpKind::Present(rs) => {
            rs.lock().expect("result set mutex poisoned").state = state;
        }
        OpKind::Scan(scan) => {
            scan.lock().expect("scan set mutex poisoned").state = state;
        }
        OpKind::Es(pkg) => {
            pkg.lock().expect("package mutex poisoned").state = state;
        }
    }
}

fn build_frame(parts: &[&[u8]]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(parts, &mut buf);
    buf.to_vec()
}
