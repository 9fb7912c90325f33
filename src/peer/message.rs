use super::error::PeerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// ASCII literal opening every handshake.
pub const HANDSHAKE_HEADER: &[u8] = b"P2PFILESHARINGPROJ";
/// Length of the handshake in bytes: 18-byte header, 10 reserved zero
/// bytes, 4-byte big-endian peer id.
pub const HANDSHAKE_LEN: usize = 32;

const RESERVED_LEN: usize = 10;

/// The fixed 32-byte handshake exchanged immediately after TCP
/// establishment, by both sides, regardless of who dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// The sender's peer id.
    pub peer_id: u32,
}

impl Handshake {
    pub fn new(peer_id: u32) -> Self {
        Self { peer_id }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_slice(HANDSHAKE_HEADER);
        buf.put_bytes(0, RESERVED_LEN);
        buf.put_u32(self.peer_id);
        buf.freeze()
    }

    /// Decodes a 32-byte handshake.
    ///
    /// Only the header is validated; the reserved bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN || &data[..HANDSHAKE_HEADER.len()] != HANDSHAKE_HEADER {
            return Err(PeerError::BadHandshake);
        }
        let peer_id = u32::from_be_bytes([data[28], data[29], data[30], data[31]]);
        Ok(Self { peer_id })
    }
}

/// Message type identifiers.
///
/// Every frame carries a one-byte id after the 4-byte length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Stop serving piece data to the peer.
    Choke = 0,
    /// Willing to serve piece data to the peer.
    Unchoke = 1,
    /// The peer owns a piece we need.
    Interested = 2,
    /// The peer owns nothing we need.
    NotInterested = 3,
    /// Announce a newly-acquired piece.
    Have = 4,
    /// Announce all owned pieces at once.
    Bitfield = 5,
    /// Ask for one whole piece.
    Request = 6,
    /// Deliver one whole piece.
    Piece = 7,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            other => Err(PeerError::UnknownType(other)),
        }
    }
}

/// A wire message.
///
/// Frames are length-prefixed: a 4-byte big-endian length equal to
/// `1 + payload`, the type byte, then the payload. Piece indices are
/// 4-byte big-endian throughout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// We now own `piece`.
    Have { piece: u32 },
    /// Packed ownership bitfield.
    Bitfield(Bytes),
    /// Ask for `piece` in full.
    Request { piece: u32 },
    /// `piece` followed by its raw bytes.
    Piece { piece: u32, data: Bytes },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
        }
    }

    /// Encodes the message including the 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(self.id() as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*piece);
            }
            Message::Piece { piece, data } => {
                buf.put_u32(5 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*piece);
                buf.put_slice(data);
            }
        }
        buf.freeze()
    }

    /// Decodes a full frame, length prefix included.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 5 {
            return Err(PeerError::TruncatedFrame);
        }
        let length = data.get_u32() as usize;
        if length == 0 || data.remaining() < length {
            return Err(PeerError::TruncatedFrame);
        }
        let id = MessageId::try_from(data.get_u8())?;
        let payload_len = length - 1;

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if payload_len < 4 {
                    return Err(PeerError::TruncatedFrame);
                }
                Ok(Message::Have {
                    piece: data.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(payload_len))),
            MessageId::Request => {
                if payload_len < 4 {
                    return Err(PeerError::TruncatedFrame);
                }
                Ok(Message::Request {
                    piece: data.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload_len < 4 {
                    return Err(PeerError::TruncatedFrame);
                }
                let piece = data.get_u32();
                Ok(Message::Piece {
                    piece,
                    data: data.copy_to_bytes(payload_len - 4),
                })
            }
        }
    }
}
