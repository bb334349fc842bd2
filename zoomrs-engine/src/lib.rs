//! # Session Engine
//!
//! Purpose: Drive client sessions against remote bibliographic search
//! targets: connection lifecycle, searches with windowed record caching,
//! term browsing, extended-service packages, and the single event loop
//! that multiplexes them over non-blocking transports.
//!
//! ## Design Principles
//! 1. **One Thread of Control**: All state transitions happen inside a
//!    drive step; between calls nothing mutates, so no caller-visible
//!    locking discipline is required.
//! 2. **Handles Over Callbacks**: Searches, scans, and packages return
//!    handles with explicit pending/ready/failed/cancelled states.
//! 3. **Transport-Agnostic**: The engine talks to a [`Channel`]; TCP and
//!    an in-memory pipe ship in the box, anything else can be plugged in.

pub mod channel;
pub mod connection;
pub mod event;
pub mod package;
pub mod proto;
pub mod record;
pub mod resultset;
pub mod scanset;

pub use channel::{Channel, MemChannel, RecvState, TcpChannel};
pub use connection::{Connection, OpState};
pub use event::{drive, EventKind};
pub use package::Package;
pub use record::Record;
pub use resultset::ResultSet;
pub use scanset::{ScanSet, ScanTerm};

pub use zoomrs_common::{diag, LastError, Options, ZoomError, ZoomResult};
pub use zoomrs_query::Query;
