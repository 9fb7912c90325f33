//! Process bootstrap and swarm lifecycle.
//!
//! A [`Session`] owns everything the links and schedulers share: the
//! piece registry, the piece store, the journal, the live link set, and
//! the choke scheduler. [`Session::run`] launches the accept loop, dials
//! every peer listed before this one in the table, starts the two
//! scheduler threads, and then blocks until every peer in the table has
//! the complete file.

use crate::config::{Config, ConfigError};
use crate::journal::Journal;
use crate::peer::{ChokeScheduler, Direction, PeerLink, PieceRegistry};
use crate::storage::{PieceStore, StorageError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const COMPLETION_POLL: Duration = Duration::from_secs(2);
const DIAL_ATTEMPTS: u32 = 40;
const DIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Slack on top of the piece size for the frame type byte and index.
const FRAME_OVERHEAD: usize = 16;
const MIN_READ_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared services and process-wide swarm state for one peer.
pub struct Session {
    local_id: u32,
    cfg: Config,
    registry: PieceRegistry,
    store: PieceStore,
    journal: Journal,
    scheduler: ChokeScheduler,
    /// All live links, keyed by remote peer id.
    links: DashMap<u32, Arc<PeerLink>>,
    /// Remote peers whose bitfield has been observed complete. Monotone,
    /// so completion detection survives link teardown.
    finished: Mutex<HashSet<u32>>,
    shutdown: AtomicBool,
}

impl Session {
    /// Builds the shared services for `local_id`, with config files,
    /// journal, and the `<peerId>/` data directory rooted at `dir`.
    pub fn new(cfg: Config, local_id: u32, dir: &Path) -> Result<Arc<Self>, SessionError> {
        let me = cfg.peer(local_id)?.clone();
        let store = PieceStore::open(
            &dir.join(local_id.to_string()),
            &cfg.file_name,
            cfg.file_size,
            cfg.piece_size,
        )?;
        let registry = PieceRegistry::new(cfg.num_pieces() as usize, me.has_file);
        let journal = Journal::open(dir, local_id)?;
        let scheduler = ChokeScheduler::new(cfg.preferred_neighbors);
        Ok(Arc::new(Self {
            local_id,
            cfg,
            registry,
            store,
            journal,
            scheduler,
            links: DashMap::new(),
            finished: Mutex::new(HashSet::new()),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Runs the swarm to completion.
    ///
    /// Returns once the local file is complete and every peer in the
    /// table has been observed complete.
    pub fn run(self: Arc<Self>) -> Result<(), SessionError> {
        let me = self.cfg.peer(self.local_id)?.clone();
        let listener = TcpListener::bind(("0.0.0.0", me.port))?;
        info!("peer {} listening on port {}", self.local_id, me.port);

        let session = Arc::clone(&self);
        thread::spawn(move || session.accept_loop(listener));

        for entry in self.cfg.peers_before(self.local_id) {
            let session = Arc::clone(&self);
            thread::spawn(move || session.dial(&entry.host, entry.port, entry.id));
        }

        let session = Arc::clone(&self);
        let interval = Duration::from_secs(self.cfg.unchoking_interval);
        thread::spawn(move || loop {
            thread::sleep(interval);
            if session.shutdown.load(Ordering::Relaxed) {
                break;
            }
            session.scheduler.run_preferred_round(&session);
        });

        let session = Arc::clone(&self);
        let interval = Duration::from_secs(self.cfg.optimistic_interval);
        thread::spawn(move || loop {
            thread::sleep(interval);
            if session.shutdown.load(Ordering::Relaxed) {
                break;
            }
            session.scheduler.run_optimistic_round(&session);
        });

        loop {
            thread::sleep(COMPLETION_POLL);
            if self.swarm_complete() {
                self.journal.all_peers_complete();
                info!("peer {}: all peers have the complete file", self.local_id);
                self.shutdown.store(true, Ordering::Relaxed);
                return Ok(());
            }
        }
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {}", addr);
                    let session = Arc::clone(&self);
                    thread::spawn(move || Self::run_link(&session, stream, Direction::Inbound));
                }
                Err(e) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    warn!("accept failed: {}", e);
                }
            }
        }
    }

    /// Dials one earlier table entry, retrying briefly: peers start in
    /// table order and the remote listener may not be up yet.
    fn dial(self: Arc<Self>, host: &str, port: u16, peer_id: u32) {
        for attempt in 1..=DIAL_ATTEMPTS {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            match TcpStream::connect((host, port)) {
                Ok(stream) => {
                    Self::run_link(&self, stream, Direction::Outbound);
                    return;
                }
                Err(e) => {
                    debug!("dial {}:{} attempt {} failed: {}", host, port, attempt, e);
                    thread::sleep(DIAL_BACKOFF);
                }
            }
        }
        warn!("giving up dialing peer {} at {}:{}", peer_id, host, port);
    }

    fn run_link(session: &Arc<Self>, stream: TcpStream, direction: Direction) {
        match PeerLink::establish(stream, direction, session) {
            Ok((link, reader)) => link.run(session, reader),
            Err(e) => info!("link setup failed: {}", e),
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn registry(&self) -> &PieceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PieceStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Largest frame the transport will accept: one full piece plus
    /// framing overhead.
    pub fn frame_cap(&self) -> usize {
        self.cfg.piece_size as usize + FRAME_OVERHEAD
    }

    /// Socket read timeout; at least one unchoking interval so quiet
    /// links survive a full scheduler cycle.
    pub fn read_timeout(&self) -> Duration {
        MIN_READ_TIMEOUT.max(Duration::from_secs(2 * self.cfg.unchoking_interval))
    }

    pub fn register(&self, link: Arc<PeerLink>) {
        self.links.insert(link.remote_id(), link);
    }

    /// Removes the link, guarded by pointer identity so a replacement
    /// link under the same id is never evicted by its predecessor.
    pub fn unregister(&self, link: &Arc<PeerLink>) {
        self.links
            .remove_if(&link.remote_id(), |_, live| Arc::ptr_eq(live, link));
    }

    pub fn link(&self, remote_id: u32) -> Option<Arc<PeerLink>> {
        self.links.get(&remote_id).map(|entry| Arc::clone(&entry))
    }

    pub fn links_snapshot(&self) -> Vec<Arc<PeerLink>> {
        self.links.iter().map(|entry| Arc::clone(&entry)).collect()
    }

    /// Announces a freshly-acquired piece on every live link, the
    /// source of the piece included.
    pub fn broadcast_have(&self, piece: u32) {
        for link in self.links_snapshot() {
            link.announce_have(piece);
        }
    }

    /// Declares `not_interested` on every live link; sent once when the
    /// local file completes.
    pub fn broadcast_not_interested(&self) {
        for link in self.links_snapshot() {
            link.announce_not_interested();
        }
    }

    /// Records that `remote_id`'s bitfield has been observed complete.
    pub fn note_remote_complete(&self, remote_id: u32) {
        if self.finished.lock().insert(remote_id) {
            debug!("peer {} has the complete file", remote_id);
        }
    }

    /// Local file complete and every other table entry observed
    /// complete.
    fn swarm_complete(&self) -> bool {
        if !self.registry.is_complete() {
            return false;
        }
        let finished = self.finished.lock();
        self.cfg
            .peers
            .iter()
            .all(|p| p.id == self.local_id || finished.contains(&p.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerEntry;
    use std::time::Instant;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn swarm_config(ports: &[u16]) -> Config {
        Config {
            preferred_neighbors: 1,
            unchoking_interval: 1,
            optimistic_interval: 1,
            file_name: "payload.bin".to_string(),
            file_size: 37,
            piece_size: 8,
            peers: ports
                .iter()
                .enumerate()
                .map(|(i, &port)| PeerEntry {
                    id: 1001 + i as u32,
                    host: "127.0.0.1".to_string(),
                    port,
                    has_file: i == 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_two_peer_swarm_transfers_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = swarm_config(&[free_port(), free_port()]);
        let payload: Vec<u8> = (0..37u8).map(|b| b.wrapping_mul(7)).collect();

        // Seed peer 1001's data directory before its store opens.
        std::fs::create_dir_all(dir.path().join("1001")).unwrap();
        std::fs::write(dir.path().join("1001").join("payload.bin"), &payload).unwrap();

        let seeder = Session::new(cfg.clone(), 1001, dir.path()).unwrap();
        let leecher = Session::new(cfg, 1002, dir.path()).unwrap();
        assert!(seeder.registry().is_complete());
        assert!(!leecher.registry().is_complete());

        let run_seeder = Arc::clone(&seeder);
        thread::spawn(move || run_seeder.run().unwrap());
        let run_leecher = Arc::clone(&leecher);
        thread::spawn(move || run_leecher.run().unwrap());

        let deadline = Instant::now() + Duration::from_secs(30);
        while !leecher.registry().is_complete() {
            assert!(Instant::now() < deadline, "leecher never completed");
            thread::sleep(Duration::from_millis(100));
        }

        let received = std::fs::read(dir.path().join("1002").join("payload.bin")).unwrap();
        assert_eq!(received, payload);

        // The seeder learns of the leecher's completion via its have
        // broadcasts and both watchers then wind the swarm down.
        while !(seeder.shutdown.load(Ordering::Relaxed)
            && leecher.shutdown.load(Ordering::Relaxed))
        {
            assert!(Instant::now() < deadline, "sessions never wound down");
            thread::sleep(Duration::from_millis(100));
        }

        let log = std::fs::read_to_string(dir.path().join("log_peer_1002.log")).unwrap();
        assert_eq!(
            log.lines()
                .filter(|l| l.contains("has downloaded the piece"))
                .count(),
            5
        );
        assert!(log.contains("has downloaded the complete file."));
        assert!(log.contains("has verified all peers have the complete file."));
    }
}
