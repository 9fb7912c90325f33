//! swarmlet - a peer-to-peer swarming file distribution engine
//!
//! A fixed set of peers, each identified by a numeric id and an endpoint,
//! cooperatively distribute a single known file divided into fixed-size
//! pieces. Every peer acts as client and server at once: it maintains a
//! bitfield of the pieces it owns, exchanges length-prefixed control and
//! data frames with every other peer, and runs a tit-for-tat scheduler
//! that periodically re-selects which neighbors it will serve.
//!
//! # Modules
//!
//! - [`config`] - Common.cfg / PeerInfo.cfg parsing
//! - [`peer`] - Wire protocol, per-link state machine, choke scheduling
//! - [`storage`] - Indexed piece read/write against the backing file
//! - [`journal`] - Per-peer activity log with mandated line formats
//! - [`session`] - Process bootstrap, link set, completion detection

pub mod config;
pub mod journal;
pub mod peer;
pub mod session;
pub mod storage;

pub use config::{Config, ConfigError, PeerEntry};
pub use journal::Journal;
pub use peer::{
    Bitfield, ChokeScheduler, Direction, FrameReader, FrameWriter, Handshake, Message, MessageId,
    PeerError, PeerLink, PieceRegistry,
};
pub use session::{Session, SessionError};
pub use storage::{PieceStore, StorageError};
