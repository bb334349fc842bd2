//! # Byte Transport Seam
//!
//! Purpose: Isolate the session engine from the concrete transport behind
//! a small non-blocking byte-stream trait, implemented once per target.
//!
//! ## Design Principles
//! 1. **Byte Streams Only**: The engine never learns whether the peer is
//!    plain TCP, TLS, or an in-process pipe.
//! 2. **Non-Blocking I/O**: `send`/`recv` never park the thread; the one
//!    place a transport may wait is the explicit `poll` readiness call.
//! 3. **Would-Block Is Not an Error**: Backpressure is reported in-band so
//!    the scheduler can keep other connections moving.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use zoomrs_common::{diag, ZoomError, ZoomResult};

/// Outcome of one non-blocking receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    /// Bytes were appended to the caller's buffer.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The peer closed the stream.
    Closed,
}

/// Non-blocking byte transport used by a connection.
pub trait Channel: Send {
    /// Writes as much of `data` as the transport accepts; `Ok(0)` means
    /// the transport is not writable right now.
    fn send(&mut self, data: &[u8]) -> ZoomResult<usize>;

    /// Appends any available bytes to `buf`.
    fn recv(&mut self, buf: &mut BytesMut) -> ZoomResult<RecvState>;

    /// Waits up to `timeout` for input to become available.
    ///
    /// Returns `true` when a `recv` is worth attempting (bytes buffered,
    /// the peer closed, or the transport cannot tell), `false` when the
    /// wait elapsed with nothing ready.
    fn poll(&mut self, timeout: Duration) -> bool;

    /// Releases the transport. Idempotent.
    fn close(&mut self);
}

fn lost(err: std::io::Error) -> ZoomError {
    ZoomError::Network {
        code: diag::ERROR_CONNECTION_LOST,
        message: err.to_string(),
    }
}

/// Plain TCP transport.
///
/// The connect itself is synchronous with an optional timeout; everything
/// after that runs in non-blocking mode.
pub struct TcpChannel {
    stream: Option<TcpStream>,
}

impl TcpChannel {
    /// Connects to `host:port` and switches the stream to non-blocking.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> ZoomResult<Self> {
        let stream = connect_stream(host, port, timeout).map_err(|err| ZoomError::Network {
            code: diag::ERROR_CONNECT,
            message: err.to_string(),
        })?;
        stream.set_nonblocking(true).map_err(lost)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true).map_err(lost)?;
        Ok(TcpChannel {
            stream: Some(stream),
        })
    }
}

fn connect_stream(host: &str, port: u16, timeout: Option<Duration>) -> std::io::Result<TcpStream> {
    match timeout {
        Some(timeout) => {
            let mut last = None;
            for addr in (host, port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(stream) => return Ok(stream),
                    Err(err) => last = Some(err),
                }
            }
            Err(last.unwrap_or_else(|| {
                std::io::Error::new(ErrorKind::NotFound, "address resolved to nothing")
            }))
        }
        None => TcpStream::connect((host, port)),
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, data: &[u8]) -> ZoomResult<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ZoomError::ConnectionClosed);
        };
        match stream.write(data) {
            Ok(written) => Ok(written),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(lost(err)),
        }
    }

    fn recv(&mut self, buf: &mut BytesMut) -> ZoomResult<RecvState> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ZoomError::ConnectionClosed);
        };
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk) {
            Ok(0) => Ok(RecvState::Closed),
            Ok(read) => {
                buf.extend_from_slice(&chunk[..read]);
                Ok(RecvState::Data(read))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(RecvState::WouldBlock),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(RecvState::WouldBlock),
            Err(err) => Err(lost(err)),
        }
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return true;
        };
        // Peek in blocking mode with a read timeout, then restore the
        // non-blocking discipline the rest of the engine relies on.
        if stream.set_nonblocking(false).is_err()
            || stream.set_read_timeout(Some(timeout)).is_err()
        {
            return true;
        }
        let mut byte = [0u8; 1];
        let ready = match stream.peek(&mut byte) {
            Ok(_) => true,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.kind() == ErrorKind::TimedOut =>
            {
                false
            }
            // Let the next recv surface the failure.
            Err(_) => true,
        };
        let _ = stream.set_nonblocking(true);
        ready
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

struct MemPipe {
    data: BytesMut,
    closed: bool,
}

/// In-memory duplex transport for tests and embedding.
///
/// [`MemChannel::pair`] returns two connected endpoints; bytes sent on one
/// become readable on the other.
pub struct MemChannel {
    outbound: Arc<Mutex<MemPipe>>,
    inbound: Arc<Mutex<MemPipe>>,
}

impl MemChannel {
    pub fn pair() -> (MemChannel, MemChannel) {
        let a_to_b = Arc::new(Mutex::new(MemPipe {
            data: BytesMut::new(),
            closed: false,
        }));
        let b_to_a = Arc::new(Mutex::new(MemPipe {
            data: BytesMut::new(),
            closed: false,
        }));
        (
            MemChannel {
                outbound: a_to_b.clone(),
                inbound: b_to_a.clone(),
            },
            MemChannel {
                outbound: b_to_a,
                inbound: a_to_b,
            },
        )
    }
}

impl Channel for MemChannel {
    fn send(&mut self, data: &[u8]) -> ZoomResult<usize> {
        let mut pipe = self.outbound.lock().expect("pipe mutex poisoned");
        if pipe.closed {
            return Err(ZoomError::Network {
                code: diag::ERROR_CONNECTION_LOST,
                message: "peer endpoint dropped".into(),
            });
        }
        pipe.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut BytesMut) -> ZoomResult<RecvState> {
        let mut pipe = self.inbound.lock().expect("pipe mutex poisoned");
        if pipe.data.is_empty() {
            return if pipe.closed {
                Ok(RecvState::Closed)
            } else {
                Ok(RecvState::WouldBlock)
            };
        }
        let taken = pipe.data.split();
        buf.extend_from_slice(&taken);
        Ok(RecvState::Data(taken.len()))
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        let ready = |pipe: &MemPipe| !pipe.data.is_empty() || pipe.closed;
        if ready(&self.inbound.lock().expect("pipe mutex poisoned")) {
            return true;
        }
        std::thread::sleep(timeout);
        ready(&self.inbound.lock().expect("pipe mutex poisoned"))
    }

    fn close(&mut self) {
        self.outbound.lock().expect("pipe mutex poisoned").closed = true;
        self.inbound.lock().expect("pipe mutex poisoned").closed = true;
    }
}
