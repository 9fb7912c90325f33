use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::transport::{FrameReader, FrameWriter};
use crate::session::Session;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted on the listen socket.
    Inbound,
    /// Dialed by this peer.
    Outbound,
}

/// Mutable per-link state, guarded by one mutex.
///
/// Lock order is state before writer, never the reverse.
struct LinkState {
    /// What the neighbor owns; populated by its bitfield frame, or
    /// lazily by a `have` that arrives first.
    neighbor_bits: Option<Bitfield>,
    /// The neighbor refuses to serve us.
    peer_choked_us: bool,
    /// We refuse to serve the neighbor.
    we_choke_peer: bool,
    /// The neighbor declared interest in our pieces.
    peer_interested: bool,
    /// Our last interest declaration to the neighbor.
    we_interested: bool,
    /// A request is in flight; at most one per link.
    awaiting_piece: bool,
}

/// One live connection to a remote peer.
///
/// The owning thread runs the receive loop; scheduler threads call
/// [`PeerLink::set_choked`] and the session broadcasts `have` frames, so
/// the send half sits behind its own mutex.
pub struct PeerLink {
    remote_id: u32,
    direction: Direction,
    writer: Mutex<FrameWriter<TcpStream>>,
    state: Mutex<LinkState>,
    /// Bytes of piece data received since the scheduler last drained us.
    downloaded: AtomicU64,
}

impl PeerLink {
    /// Performs the handshake on a fresh socket and registers the link.
    ///
    /// Both sides write their handshake before reading the remote one,
    /// then unconditionally send a bitfield snapshot. Returns the link
    /// and the frame reader the caller's receive loop consumes.
    pub fn establish(
        stream: TcpStream,
        direction: Direction,
        session: &Arc<Session>,
    ) -> Result<(Arc<Self>, FrameReader<TcpStream>), PeerError> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(session.read_timeout()))?;
        let mut writer = FrameWriter::new(stream.try_clone()?);
        let mut reader = FrameReader::new(stream, session.frame_cap());

        writer.send_handshake(&Handshake::new(session.local_id()))?;
        let remote = reader.receive_handshake()?;

        let link = Arc::new(Self {
            remote_id: remote.peer_id,
            direction,
            writer: Mutex::new(writer),
            state: Mutex::new(LinkState {
                neighbor_bits: None,
                peer_choked_us: true,
                we_choke_peer: true,
                peer_interested: false,
                we_interested: false,
                awaiting_piece: false,
            }),
            downloaded: AtomicU64::new(0),
        });
        session.register(Arc::clone(&link));

        match direction {
            Direction::Outbound => session.journal().connect_to(remote.peer_id),
            Direction::Inbound => session.journal().connected_from(remote.peer_id),
        }
        debug!(
            "handshake complete with peer {} ({:?})",
            remote.peer_id, direction
        );

        if let Err(e) = link.send(&Message::Bitfield(session.registry().snapshot().to_bytes())) {
            session.unregister(&link);
            return Err(e);
        }
        Ok((link, reader))
    }

    /// Runs the receive loop until the link dies, then deregisters.
    pub fn run(self: Arc<Self>, session: &Arc<Session>, mut reader: FrameReader<TcpStream>) {
        let result = loop {
            let message = match reader.receive_message() {
                Ok(m) => m,
                Err(e) => break Err(e),
            };
            if let Err(e) = self.handle(session, message) {
                break Err(e);
            }
        };
        match result {
            Err(PeerError::ConnectionClosed) => {
                info!("peer {} closed the connection", self.remote_id)
            }
            Err(PeerError::Io(e)) => info!("peer {}: link lost: {}", self.remote_id, e),
            Err(e) => warn!("peer {}: terminating link: {}", self.remote_id, e),
            Ok(()) => unreachable!("receive loop only exits on error"),
        }
        session.unregister(&self);
    }

    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Atomically reads and zeroes the interval download counter.
    pub fn take_downloaded(&self) -> u64 {
        self.downloaded.swap(0, Ordering::Relaxed)
    }

    pub fn peer_interested(&self) -> bool {
        self.state.lock().peer_interested
    }

    /// Interested in us but currently served nothing: eligible for the
    /// optimistic unchoke slot.
    pub fn wants_unchoke(&self) -> bool {
        let st = self.state.lock();
        st.peer_interested && st.we_choke_peer
    }

    /// Flips our choke state toward the neighbor and emits the matching
    /// control frame. No-op when the state is unchanged; send failures
    /// are swallowed because the receive loop owns link teardown.
    pub fn set_choked(&self, session: &Session, choke: bool) {
        let mut st = self.state.lock();
        if st.we_choke_peer == choke {
            return;
        }
        st.we_choke_peer = choke;
        let frame = if choke {
            Message::Choke
        } else {
            Message::Unchoke
        };
        // The state lock is held across the send so the flag always
        // matches the last control frame on the wire.
        if let Err(e) = self.send(&frame) {
            debug!("peer {}: choke frame dropped: {}", self.remote_id, e);
        }
        drop(st);
        if choke {
            session.journal().choking_neighbor(self.remote_id);
        } else {
            session.journal().unchoking_neighbor(self.remote_id);
        }
    }

    /// Sends a `have` announcement, ignoring failures; used by the
    /// session's broadcast after a piece lands.
    pub(crate) fn announce_have(&self, piece: u32) {
        if let Err(e) = self.send(&Message::Have { piece }) {
            debug!("peer {}: have({}) dropped: {}", self.remote_id, piece, e);
        }
    }

    /// Declares `not_interested`, ignoring failures; used by the
    /// session's completion broadcast.
    pub(crate) fn announce_not_interested(&self) {
        self.state.lock().we_interested = false;
        if let Err(e) = self.send(&Message::NotInterested) {
            debug!("peer {}: not_interested dropped: {}", self.remote_id, e);
        }
    }

    fn send(&self, message: &Message) -> Result<(), PeerError> {
        self.writer.lock().send_message(message)
    }

    fn handle(&self, session: &Arc<Session>, message: Message) -> Result<(), PeerError> {
        match message {
            Message::Choke => {
                let mut st = self.state.lock();
                st.peer_choked_us = true;
                // The in-flight request is void; we do not remember its
                // index, and a raced piece is still accepted.
                st.awaiting_piece = false;
                drop(st);
                session.journal().choked_by(self.remote_id);
            }
            Message::Unchoke => {
                self.state.lock().peer_choked_us = false;
                session.journal().unchoked_by(self.remote_id);
                self.request_next(session)?;
            }
            Message::Interested => {
                // Interest alone never unchokes; the schedulers decide.
                self.state.lock().peer_interested = true;
                session.journal().receive_interested(self.remote_id);
            }
            Message::NotInterested => {
                self.state.lock().peer_interested = false;
                session.journal().receive_not_interested(self.remote_id);
            }
            Message::Have { piece } => self.on_have(session, piece)?,
            Message::Bitfield(bits) => self.on_bitfield(session, &bits)?,
            Message::Request { piece } => self.on_request(session, piece)?,
            Message::Piece { piece, data } => self.on_piece(session, piece, &data)?,
        }
        Ok(())
    }

    fn on_have(&self, session: &Arc<Session>, piece: u32) -> Result<(), PeerError> {
        let num_pieces = session.registry().num_pieces();
        if piece as usize >= num_pieces {
            return Err(PeerError::BadPieceIndex(piece));
        }
        let complete = {
            let mut st = self.state.lock();
            let bits = st
                .neighbor_bits
                .get_or_insert_with(|| Bitfield::empty(num_pieces));
            bits.set(piece as usize);
            bits.is_complete()
        };
        if complete {
            session.note_remote_complete(self.remote_id);
        }
        session.journal().receive_have(self.remote_id, piece);
        self.refresh_interest(session)?;
        self.request_next(session)
    }

    fn on_bitfield(&self, session: &Arc<Session>, payload: &[u8]) -> Result<(), PeerError> {
        let bits = Bitfield::from_bytes(payload, session.registry().num_pieces());
        let complete = bits.is_complete();
        let want = session.registry().next_needed_from(&bits).is_some();
        {
            let mut st = self.state.lock();
            st.neighbor_bits = Some(bits);
            st.we_interested = want;
        }
        if complete {
            session.note_remote_complete(self.remote_id);
        }
        // The first sight of the neighbor's holdings always gets an
        // explicit declaration, one way or the other.
        self.send(if want {
            &Message::Interested
        } else {
            &Message::NotInterested
        })?;
        self.request_next(session)
    }

    fn on_request(&self, session: &Arc<Session>, piece: u32) -> Result<(), PeerError> {
        if piece as usize >= session.registry().num_pieces() {
            return Err(PeerError::BadPieceIndex(piece));
        }
        if self.state.lock().we_choke_peer {
            // A choked peer must not be served; choke was already
            // signaled, so the request is dropped without reply.
            debug!("peer {}: dropping request({}) while choked", self.remote_id, piece);
            return Ok(());
        }
        match session.store().read_piece(piece) {
            Ok(data) => self.send(&Message::Piece { piece, data })?,
            // A failed read does not kill the link; the peer will
            // re-request after its next unchoke.
            Err(e) => warn!("peer {}: read of piece {} failed: {}", self.remote_id, piece, e),
        }
        Ok(())
    }

    fn on_piece(&self, session: &Arc<Session>, piece: u32, data: &[u8]) -> Result<(), PeerError> {
        if piece as usize >= session.registry().num_pieces() {
            return Err(PeerError::BadPieceIndex(piece));
        }
        self.state.lock().awaiting_piece = false;
        self.downloaded
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        if let Err(e) = session.store().write_piece(piece, data) {
            warn!("peer {}: write of piece {} failed: {}", self.remote_id, piece, e);
            return Ok(());
        }
        let (flipped, count) = session.registry().mark_have(piece as usize);
        if flipped {
            session.journal().downloaded_piece(self.remote_id, piece, count);
            session.broadcast_have(piece);
            if session.registry().is_complete() {
                session.journal().download_complete();
                session.broadcast_not_interested();
                return Ok(());
            }
        }
        self.refresh_interest(session)?;
        self.request_next(session)
    }

    /// Re-derives interest from the neighbor bitfield and sends a
    /// declaration only when it changed.
    fn refresh_interest(&self, session: &Session) -> Result<(), PeerError> {
        let want = {
            let mut st = self.state.lock();
            let want = st
                .neighbor_bits
                .as_ref()
                .and_then(|bits| session.registry().next_needed_from(bits))
                .is_some();
            if st.we_interested == want {
                return Ok(());
            }
            st.we_interested = want;
            want
        };
        self.send(if want {
            &Message::Interested
        } else {
            &Message::NotInterested
        })
    }

    /// Issues a request for the next needed piece, if the neighbor has
    /// one, is not choking us, and no request is already in flight.
    fn request_next(&self, session: &Session) -> Result<(), PeerError> {
        let piece = {
            let mut st = self.state.lock();
            if st.peer_choked_us || st.awaiting_piece {
                return Ok(());
            }
            let next = st
                .neighbor_bits
                .as_ref()
                .and_then(|bits| session.registry().next_needed_from(bits));
            match next {
                Some(piece) => {
                    st.awaiting_piece = true;
                    piece as u32
                }
                None => return Ok(()),
            }
        };
        debug!("peer {}: requesting piece {}", self.remote_id, piece);
        self.send(&Message::Request { piece })
    }
}
