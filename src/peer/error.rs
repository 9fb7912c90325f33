use thiserror::Error;

/// Errors that can occur on a peer link.
///
/// Protocol and invariant errors terminate the offending link only; the
/// rest of the swarm keeps running.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error, including an expired read timeout.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The 18-byte handshake header did not match.
    #[error("bad handshake header")]
    BadHandshake,

    /// Message type byte outside the defined range.
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    /// The stream ended in the middle of a frame.
    #[error("truncated frame")]
    TruncatedFrame,

    /// The length prefix exceeds the configured frame cap.
    #[error("frame of {len} bytes exceeds cap of {cap}")]
    OversizeFrame { len: usize, cap: usize },

    /// A piece index outside `0..num_pieces` arrived on the wire.
    #[error("piece index {0} out of range")]
    BadPieceIndex(u32),

    /// The remote closed the connection at a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,
}
