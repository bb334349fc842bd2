//! # Event Loop
//!
//! Purpose: Advance network I/O and protocol state for a set of
//! connections from one thread of control, reporting observable events
//! one at a time.
//!
//! ## Design Principles
//! 1. **Caller-Owned Loop**: `drive` performs one scheduling step; the
//!    caller repeats it until the operations it cares about settle.
//! 2. **Stateless Scheduler**: Fairness lives in globally monotonic event
//!    stamps on the connections themselves; nothing persists between
//!    calls.
//! 3. **No Thrown I/O Errors**: Failures land in each connection's
//!    last-error record; `drive` itself only reports events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::connection::Connection;

/// Observable event kinds, with the numeric values of the original event
/// vocabulary preserved for callers that log or switch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    #[default]
    None = 0,
    Connect = 1,
    SendData = 2,
    RecvData = 3,
    Timeout = 4,
    Unknown = 5,
    SendApdu = 6,
    RecvApdu = 7,
    RecvRecord = 8,
    RecvSearch = 9,
    End = 10,
}

impl EventKind {
    /// The stable numeric code for this event.
    pub fn code(self) -> i32 {
        self as i32
    }
}

static EVENT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Issues the next globally monotonic event stamp.
pub(crate) fn next_stamp() -> u64 {
    EVENT_STAMP.fetch_add(1, Ordering::Relaxed)
}

/// Advances I/O for every connection and reports one event.
///
/// Every connection gets a full I/O step on every call; the oldest queued
/// event across all connections is then popped and returned as
/// `(index, kind)`, so no connection can starve another. `None` is the
/// idle signal: no connection has pending work or queued events.
///
/// A step that moved no bytes on a connection with work still pending
/// reports [`EventKind::None`] for it after waiting briefly on that
/// connection's transport readiness, so callers can keep looping without
/// spinning.
pub fn drive(connections: &[&Connection]) -> Option<(usize, EventKind)> {
    for conn in connections {
        conn.step();
    }

    let mut oldest: Option<(usize, u64)> = None;
    for (idx, conn) in connections.iter().enumerate() {
        if let Some(stamp) = conn.front_event_stamp() {
            if oldest.map_or(true, |(_, best)| stamp < best) {
                oldest = Some((idx, stamp));
            }
        }
    }
    if let Some((idx, _)) = oldest {
        let kind = connections[idx].take_event().unwrap_or(EventKind::Unknown);
        return Some((idx, kind));
    }

    for (idx, conn) in connections.iter().enumerate() {
        if conn.has_pending_work() {
            // Nothing was ready; wait on the transport before the caller
            // retries.
            conn.poll_channel(Duration::from_millis(1));
            conn.note_idle_poll();
            return Some((idx, EventKind::None));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_codes_are_stable() {
        let expected: &[(EventKind, i32)] = &[
            (EventKind::None, 0),
            (EventKind::Connect, 1),
            (EventKind::SendData, 2),
            (EventKind::RecvData, 3),
            (EventKind::Timeout, 4),
            (EventKind::Unknown, 5),
            (EventKind::SendApdu, 6),
            (EventKind::RecvApdu, 7),
            (EventKind::RecvRecord, 8),
            (EventKind::RecvSearch, 9),
            (EventKind::End, 10),
        ];
        for (kind, code) in expected {
            assert_eq!(kind.code(), *code);
        }
    }

    #[test]
    fn test_stamps_are_monotonic() {
        let a = next_stamp();
        let b = next_stamp();
        assert!(b > a);
    }

    #[test]
    fn test_drive_with_no_connections_is_idle() {
        assert_eq!(drive(&[]), None);
    }
}
