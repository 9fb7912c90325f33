//! Peer wire protocol and scheduling.
//!
//! This module implements the symmetric handshake, the eight-message
//! length-prefixed framing, the per-connection state machine, the shared
//! piece registry, and the two periodic choke schedulers.

mod bitfield;
mod choking;
mod error;
mod link;
mod message;
mod registry;
mod transport;

pub use bitfield::Bitfield;
pub use choking::ChokeScheduler;
pub use error::PeerError;
pub use link::{Direction, PeerLink};
pub use message::{Handshake, Message, MessageId, HANDSHAKE_HEADER, HANDSHAKE_LEN};
pub use registry::PieceRegistry;
pub use transport::{FrameReader, FrameWriter};
