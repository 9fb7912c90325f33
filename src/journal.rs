//! Per-peer activity journal.
//!
//! Every peer appends timestamped protocol events to
//! `log_peer_<peerId>.log`. The line formats are part of the protocol's
//! observable surface, so they are fixed here rather than routed through
//! the tracing diagnostics.

use parking_lot::Mutex;
use std::fmt::Arguments;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Append-only writer for the mandated activity log lines.
///
/// Journal output is an artifact, not a dependency of the protocol, so
/// write failures are swallowed rather than propagated into link or
/// scheduler code paths.
pub struct Journal {
    peer_id: u32,
    out: Mutex<BufWriter<File>>,
}

impl Journal {
    /// Opens (appending) `log_peer_<peer_id>.log` inside `dir`.
    pub fn open(dir: &Path, peer_id: u32) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("log_peer_{peer_id}.log")))?;
        Ok(Self {
            peer_id,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn line(&self, body: Arguments<'_>) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut out = self.out.lock();
        let _ = writeln!(out, "[{stamp}]: {body}");
        let _ = out.flush();
    }

    pub fn connect_to(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] makes a connection to Peer [{other}].",
            self.peer_id
        ));
    }

    pub fn connected_from(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] is connected from Peer [{other}].",
            self.peer_id
        ));
    }

    pub fn preferred_neighbors(&self, ids: &[u32]) {
        let list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.line(format_args!(
            "Peer [{}] has the preferred neighbors [{list}].",
            self.peer_id
        ));
    }

    pub fn optimistic_neighbor(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] has the optimistically unchoked neighbor [{other}].",
            self.peer_id
        ));
    }

    pub fn unchoked_by(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] is unchoked by [{other}].",
            self.peer_id
        ));
    }

    pub fn choked_by(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] is choked by [{other}].",
            self.peer_id
        ));
    }

    pub fn choking_neighbor(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] choking neighbor [{other}].",
            self.peer_id
        ));
    }

    pub fn unchoking_neighbor(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] unchoking neighbor [{other}].",
            self.peer_id
        ));
    }

    pub fn receive_have(&self, other: u32, piece: u32) {
        self.line(format_args!(
            "Peer [{}] received the 'have' message from [{other}] for the piece [{piece}].",
            self.peer_id
        ));
    }

    pub fn receive_interested(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] received the 'interested' message from [{other}].",
            self.peer_id
        ));
    }

    pub fn receive_not_interested(&self, other: u32) {
        self.line(format_args!(
            "Peer [{}] received the 'not interested' message from [{other}].",
            self.peer_id
        ));
    }

    pub fn downloaded_piece(&self, from: u32, piece: u32, count: usize) {
        self.line(format_args!(
            "Peer [{}] has downloaded the piece [{piece}] from [{from}]. \
             Now the number of pieces it has is [{count}].",
            self.peer_id
        ));
    }

    pub fn download_complete(&self) {
        self.line(format_args!(
            "Peer [{}] has downloaded the complete file.",
            self.peer_id
        ));
    }

    pub fn all_peers_complete(&self) {
        self.line(format_args!(
            "Peer [{}] has verified all peers have the complete file.",
            self.peer_id
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path(), 1001).unwrap();
        journal.connect_to(1002);
        journal.downloaded_piece(1002, 3, 7);
        journal.download_complete();

        let text = std::fs::read_to_string(dir.path().join("log_peer_1001.log")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("Peer [1001] makes a connection to Peer [1002]."));
        assert!(lines[1].contains("has downloaded the piece [3] from [1002]."));
        assert!(lines[1].ends_with("Now the number of pieces it has is [7]."));
        assert!(lines[2].ends_with("Peer [1001] has downloaded the complete file."));
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        Journal::open(dir.path(), 7).unwrap().choked_by(8);
        Journal::open(dir.path(), 7).unwrap().unchoked_by(8);
        let text = std::fs::read_to_string(dir.path().join("log_peer_7.log")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
