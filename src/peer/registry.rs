use super::bitfield::Bitfield;
use parking_lot::Mutex;

/// Thread-safe bookkeeping of the pieces this peer owns.
///
/// Every link thread and both scheduler threads hold a handle; all
/// operations serialize on one internal mutex, so `mark_have` and
/// `snapshot` are linearizable.
pub struct PieceRegistry {
    bits: Mutex<Bitfield>,
}

impl PieceRegistry {
    /// Starts all-ones when the peer table declares this peer has the
    /// full file, else all-zeros.
    pub fn new(num_pieces: usize, start_complete: bool) -> Self {
        let bits = if start_complete {
            Bitfield::full(num_pieces)
        } else {
            Bitfield::empty(num_pieces)
        };
        Self {
            bits: Mutex::new(bits),
        }
    }

    /// Sets bit `index`, idempotently.
    ///
    /// Returns whether the bit actually flipped and the piece count
    /// afterwards, so callers can journal the new count and fire
    /// completion exactly once.
    pub fn mark_have(&self, index: usize) -> (bool, usize) {
        let mut bits = self.bits.lock();
        let flipped = !bits.get(index);
        bits.set(index);
        (flipped, bits.count())
    }

    pub fn have(&self, index: usize) -> bool {
        self.bits.lock().get(index)
    }

    /// Independent copy of the local bitfield, safe to ship on the wire.
    pub fn snapshot(&self) -> Bitfield {
        self.bits.lock().clone()
    }

    /// Lowest-indexed piece the neighbor has that we lack.
    pub fn next_needed_from(&self, neighbor: &Bitfield) -> Option<usize> {
        let bits = self.bits.lock();
        (0..bits.num_pieces()).find(|&i| neighbor.get(i) && !bits.get(i))
    }

    pub fn is_complete(&self) -> bool {
        self.bits.lock().is_complete()
    }

    /// Whether a neighbor bitfield covers every piece in range.
    pub fn bitfield_is_complete(&self, bits: &Bitfield) -> bool {
        let n = self.bits.lock().num_pieces();
        (0..n).all(|i| bits.get(i))
    }

    pub fn num_pieces(&self) -> usize {
        self.bits.lock().num_pieces()
    }
}
