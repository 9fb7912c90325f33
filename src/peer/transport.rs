use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use bytes::BytesMut;
use std::io::{self, Read, Write};

/// Receive half of a link: reads length-prefixed frames off a stream.
///
/// Generic over the stream so codec behavior is testable against
/// in-memory buffers; links instantiate it over a `TcpStream` carrying
/// the read timeout. The frame cap bounds the length prefix before the
/// body is read, so a hostile prefix cannot force a huge allocation.
pub struct FrameReader<R> {
    stream: R,
    frame_cap: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(stream: R, frame_cap: usize) -> Self {
        Self { stream, frame_cap }
    }

    /// Reads the fixed 32-byte handshake.
    pub fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        if !self.fill(&mut buf)? {
            return Err(PeerError::ConnectionClosed);
        }
        Handshake::decode(&buf)
    }

    /// Reads one complete frame and decodes it.
    ///
    /// A clean EOF at a frame boundary is `ConnectionClosed`; an EOF
    /// anywhere inside a frame is `TruncatedFrame`.
    pub fn receive_message(&mut self) -> Result<Message, PeerError> {
        let mut prefix = [0u8; 4];
        if !self.fill(&mut prefix)? {
            return Err(PeerError::ConnectionClosed);
        }
        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            return Err(PeerError::TruncatedFrame);
        }
        if len > self.frame_cap {
            return Err(PeerError::OversizeFrame {
                len,
                cap: self.frame_cap,
            });
        }

        let mut frame = BytesMut::with_capacity(4 + len);
        frame.extend_from_slice(&prefix);
        frame.resize(4 + len, 0);
        self.fill_all(&mut frame[4..])?;
        Message::decode(frame.freeze())
    }

    /// Fills `buf`, returning false on EOF before the first byte.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool, PeerError> {
        let mut read = 0;
        while read < buf.len() {
            match self.stream.read(&mut buf[read..]) {
                Ok(0) if read == 0 => return Ok(false),
                Ok(0) => return Err(PeerError::TruncatedFrame),
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PeerError::Io(e)),
            }
        }
        Ok(true)
    }

    /// Like `fill`, but an EOF at any offset is a truncation.
    fn fill_all(&mut self, buf: &mut [u8]) -> Result<(), PeerError> {
        let mut read = 0;
        while read < buf.len() {
            match self.stream.read(&mut buf[read..]) {
                Ok(0) => return Err(PeerError::TruncatedFrame),
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PeerError::Io(e)),
            }
        }
        Ok(())
    }
}

/// Send half of a link. Callers serialize access behind a per-link
/// mutex; the writer itself just encodes and flushes.
pub struct FrameWriter<W> {
    stream: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.stream.write_all(&handshake.encode())?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.stream.write_all(&message.encode())?;
        self.stream.flush()?;
        Ok(())
    }
}
