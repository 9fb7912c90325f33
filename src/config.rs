//! Configuration loading.
//!
//! Two text files in the working directory describe the swarm:
//! `Common.cfg` carries the tunables as whitespace-separated `key value`
//! lines, and `PeerInfo.cfg` lists `id host port hasFile` rows whose
//! order defines the dial rule: a peer dials every row above its own.
//! `#` and `//` start comments; unknown keys are ignored.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing {0} in Common.cfg")]
    MissingKey(&'static str),

    #[error("bad value for {key}: {value}")]
    BadValue { key: String, value: String },

    #[error("bad PeerInfo.cfg line (need 4 columns): {0}")]
    BadPeerLine(String),

    #[error("PeerInfo.cfg has no peers")]
    NoPeers,

    #[error("peer id {0} not present in PeerInfo.cfg")]
    UnknownPeer(u32),
}

/// One row of the peer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: u32,
    pub host: String,
    pub port: u16,
    pub has_file: bool,
}

/// The fixed record of tunables plus the ordered peer table.
#[derive(Debug, Clone)]
pub struct Config {
    /// `NumberOfPreferredNeighbors`: upload slots outside the optimistic one.
    pub preferred_neighbors: usize,
    /// `UnchokingInterval` in seconds.
    pub unchoking_interval: u64,
    /// `OptimisticUnchokingInterval` in seconds.
    pub optimistic_interval: u64,
    pub file_name: String,
    pub file_size: u64,
    pub piece_size: u64,
    pub peers: Vec<PeerEntry>,
}

impl Config {
    /// Loads `Common.cfg` and `PeerInfo.cfg` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let common = std::fs::read_to_string(dir.join("Common.cfg"))?;
        let peers = std::fs::read_to_string(dir.join("PeerInfo.cfg"))?;
        Self::parse(&common, &peers)
    }

    pub fn parse(common: &str, peer_table: &str) -> Result<Self, ConfigError> {
        let mut preferred_neighbors = None;
        let mut unchoking_interval = None;
        let mut optimistic_interval = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;

        for line in common.lines().map(strip_comment) {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "NumberOfPreferredNeighbors" => preferred_neighbors = Some(parse(key, value)?),
                "UnchokingInterval" => unchoking_interval = Some(parse(key, value)?),
                "OptimisticUnchokingInterval" => optimistic_interval = Some(parse(key, value)?),
                "FileName" => file_name = Some(value.to_string()),
                "FileSize" => file_size = Some(parse(key, value)?),
                "PieceSize" => piece_size = Some(parse(key, value)?),
                _ => {}
            }
        }

        let mut peers = Vec::new();
        for line in peer_table.lines().map(strip_comment) {
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(ConfigError::BadPeerLine(line.trim().to_string()));
            }
            peers.push(PeerEntry {
                id: parse("peer id", parts[0])?,
                host: parts[1].to_string(),
                port: parse("port", parts[2])?,
                has_file: parts[3] == "1",
            });
        }
        if peers.is_empty() {
            return Err(ConfigError::NoPeers);
        }

        Ok(Self {
            preferred_neighbors: preferred_neighbors
                .ok_or(ConfigError::MissingKey("NumberOfPreferredNeighbors"))?,
            unchoking_interval: unchoking_interval
                .ok_or(ConfigError::MissingKey("UnchokingInterval"))?,
            optimistic_interval: optimistic_interval
                .ok_or(ConfigError::MissingKey("OptimisticUnchokingInterval"))?,
            file_name: file_name.ok_or(ConfigError::MissingKey("FileName"))?,
            file_size: file_size.ok_or(ConfigError::MissingKey("FileSize"))?,
            piece_size: piece_size.ok_or(ConfigError::MissingKey("PieceSize"))?,
            peers,
        })
    }

    pub fn num_pieces(&self) -> u32 {
        self.file_size.div_ceil(self.piece_size) as u32
    }

    pub fn peer(&self, id: u32) -> Result<&PeerEntry, ConfigError> {
        self.peers
            .iter()
            .find(|p| p.id == id)
            .ok_or(ConfigError::UnknownPeer(id))
    }

    /// Peers listed before `id`; these are the ones `id` dials.
    pub fn peers_before(&self, id: u32) -> Vec<PeerEntry> {
        self.peers
            .iter()
            .take_while(|p| p.id != id)
            .cloned()
            .collect()
    }
}

fn strip_comment(line: &str) -> &str {
    let cut = [line.find('#'), line.find("//")]
        .into_iter()
        .flatten()
        .min();
    match cut {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMON: &str = "\
NumberOfPreferredNeighbors 2
UnchokingInterval 5
OptimisticUnchokingInterval 15
FileName TheFile.dat
FileSize 10000232
PieceSize 32768
";

    const PEERS: &str = "\
1001 lin114-00.cise.ufl.edu 6008 1
1002 lin114-01.cise.ufl.edu 6008 0
1003 lin114-02.cise.ufl.edu 6008 0
";

    #[test]
    fn test_parse_common() {
        let cfg = Config::parse(COMMON, PEERS).unwrap();
        assert_eq!(cfg.preferred_neighbors, 2);
        assert_eq!(cfg.unchoking_interval, 5);
        assert_eq!(cfg.optimistic_interval, 15);
        assert_eq!(cfg.file_name, "TheFile.dat");
        assert_eq!(cfg.file_size, 10000232);
        assert_eq!(cfg.piece_size, 32768);
        assert_eq!(cfg.num_pieces(), 306);
    }

    #[test]
    fn test_comments_and_unknown_keys_ignored() {
        let common = format!("{COMMON}\n# full-line comment\nSomeFutureKey 7\nPieceSize 32768 // trailing\n");
        let cfg = Config::parse(&common, PEERS).unwrap();
        assert_eq!(cfg.piece_size, 32768);
    }

    #[test]
    fn test_missing_key_rejected() {
        let common = COMMON.replace("PieceSize 32768\n", "");
        assert!(matches!(
            Config::parse(&common, PEERS),
            Err(ConfigError::MissingKey("PieceSize"))
        ));
    }

    #[test]
    fn test_peer_table_order_defines_dials() {
        let cfg = Config::parse(COMMON, PEERS).unwrap();
        assert_eq!(cfg.peers.len(), 3);
        assert!(cfg.peers[0].has_file);
        assert!(!cfg.peers[1].has_file);

        let before: Vec<u32> = cfg.peers_before(1003).iter().map(|p| p.id).collect();
        assert_eq!(before, vec![1001, 1002]);
        assert!(cfg.peers_before(1001).is_empty());
    }

    #[test]
    fn test_short_peer_line_rejected() {
        assert!(matches!(
            Config::parse(COMMON, "1001 localhost 6008\n"),
            Err(ConfigError::BadPeerLine(_))
        ));
    }

    #[test]
    fn test_empty_peer_table_rejected() {
        assert!(matches!(
            Config::parse(COMMON, "# nobody\n"),
            Err(ConfigError::NoPeers)
        ));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Common.cfg"), COMMON).unwrap();
        std::fs::write(dir.path().join("PeerInfo.cfg"), PEERS).unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.peer(1002).unwrap().port, 6008);
        assert!(matches!(cfg.peer(9999), Err(ConfigError::UnknownPeer(9999))));
    }
}
