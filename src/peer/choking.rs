use crate::session::Session;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Process-wide upload allocation state.
///
/// Two dedicated threads drive the rounds: preferred-neighbor
/// recomputation every unchoking interval and optimistic rotation every
/// optimistic interval. Links never write this state; the rounds never
/// read link state except through snapshots, so consistency is eventual
/// within one interval.
pub struct ChokeScheduler {
    preferred_count: usize,
    preferred: Mutex<HashSet<u32>>,
    optimistic: Mutex<Option<u32>>,
}

impl ChokeScheduler {
    pub fn new(preferred_count: usize) -> Self {
        Self {
            preferred_count,
            preferred: Mutex::new(HashSet::new()),
            optimistic: Mutex::new(None),
        }
    }

    /// Recomputes the preferred set from the last interval's download
    /// rates and pushes choke state to every link.
    pub fn run_preferred_round(&self, session: &Session) {
        let links = session.links_snapshot();

        // Every counter is drained each interval, candidate or not, so
        // rates never accumulate across intervals.
        let mut candidates = Vec::new();
        for link in &links {
            let bytes = link.take_downloaded();
            if link.peer_interested() {
                candidates.push((link.remote_id(), bytes));
            }
        }

        let chosen = select_preferred(
            candidates,
            self.preferred_count,
            session.registry().is_complete(),
            &mut rand::rng(),
        );

        let changed = {
            let mut preferred = self.preferred.lock();
            if *preferred == chosen {
                false
            } else {
                *preferred = chosen.clone();
                true
            }
        };
        if changed {
            let mut ids: Vec<u32> = chosen.iter().copied().collect();
            ids.sort_unstable();
            session.journal().preferred_neighbors(&ids);
        }

        let optimistic = *self.optimistic.lock();
        for link in &links {
            let id = link.remote_id();
            let unchoked = chosen.contains(&id) || optimistic == Some(id);
            link.set_choked(session, !unchoked);
        }
    }

    /// Rotates the optimistic-unchoke slot among interested-but-choked
    /// links.
    pub fn run_optimistic_round(&self, session: &Session) {
        let links = session.links_snapshot();
        let candidates: Vec<_> = links.iter().filter(|l| l.wants_unchoke()).collect();

        if candidates.is_empty() {
            *self.optimistic.lock() = None;
            return;
        }

        let pick = candidates[rand::rng().random_range(0..candidates.len())];
        let previous = self.optimistic.lock().replace(pick.remote_id());

        if previous != Some(pick.remote_id()) {
            session.journal().optimistic_neighbor(pick.remote_id());
        }
        pick.set_choked(session, false);

        if let Some(prev_id) = previous {
            if prev_id != pick.remote_id() && !self.preferred.lock().contains(&prev_id) {
                if let Some(prev_link) = session.link(prev_id) {
                    prev_link.set_choked(session, true);
                }
            }
        }
    }
}

/// Picks up to `k` preferred neighbors from `(peer id, bytes this
/// interval)` candidates.
///
/// A seeding peer picks uniformly at random; a downloading peer takes
/// the top `k` by rate, ties broken uniformly at random. The shuffle
/// before the stable sort is what randomizes the ties.
fn select_preferred<R: Rng>(
    mut candidates: Vec<(u32, u64)>,
    k: usize,
    seeding: bool,
    rng: &mut R,
) -> HashSet<u32> {
    candidates.shuffle(rng);
    if !seeding {
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
    }
    candidates.into_iter().take(k).map(|(id, _)| id).collect()
}
