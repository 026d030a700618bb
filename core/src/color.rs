/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The (optional) color engine's color table: a concurrent map from a
//! color-set's content hash to the coordinate of its materialized entry in
//! the color repository, with at-most-once materialization guaranteed via a
//! compare-and-swap protocol on each entry's state.
//!
//! A worker that first observes a given color set marks it in-process,
//! materializes the color set into the shared repository without holding any
//! lock, then publishes the resulting coordinate. A worker that observes an
//! in-process entry waits for the coordinate instead of redoing the work, so
//! each distinct color set is materialized exactly once regardless of how
//! many workers discover it concurrently.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A color set's materialization state, packed into a single `u64` so it can
/// be updated with one atomic compare-and-swap:
///
/// - `0`: absent (not encoded as a stored variant; absence is "no entry in
///   the map yet").
/// - in-process: high bit set, low 32 bits the claiming worker's id.
/// - ready: high bit clear, low 48 bits the repository offset.
const IN_PROCESS_BIT: u64 = 1 << 63;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorCoordinate {
    InProcess { worker_id: u32 },
    Ready { repo_offset: u64 },
}

impl ColorCoordinate {
    fn encode(self) -> u64 {
        match self {
            ColorCoordinate::InProcess { worker_id } => IN_PROCESS_BIT | worker_id as u64,
            ColorCoordinate::Ready { repo_offset } => {
                debug_assert!(repo_offset < IN_PROCESS_BIT);
                repo_offset
            }
        }
    }

    fn decode(bits: u64) -> Self {
        if bits & IN_PROCESS_BIT != 0 {
            ColorCoordinate::InProcess {
                worker_id: (bits & 0xFFFF_FFFF) as u32,
            }
        } else {
            ColorCoordinate::Ready { repo_offset: bits }
        }
    }
}

/// Maps a color set's 64-bit content hash to its [`ColorCoordinate`].
///
/// Hash collisions between distinct color sets are not disambiguated here:
/// this accepts a vanishingly small false-merge rate in exchange for not
/// storing full color sets as map keys. The color repository itself treats
/// an entry's coordinate as authoritative.
#[derive(Clone, Default)]
pub struct ColorTable {
    entries: Arc<DashMap<u64, AtomicU64>>,
}

impl ColorTable {
    pub fn new() -> Self {
        ColorTable {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Attempts to claim `color_hash` for materialization by `worker_id`.
    /// Returns `Ok(())` if this call performed the claim (the caller should
    /// now materialize and call [`publish`](Self::publish)); returns
    /// `Err(existing)` if another worker already holds or has finished the
    /// claim.
    pub fn mark_in_process(&self, color_hash: u64, worker_id: u32) -> Result<(), ColorCoordinate> {
        let claim = ColorCoordinate::InProcess { worker_id }.encode();
        match self.entries.entry(color_hash) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(AtomicU64::new(claim));
                Ok(())
            }
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                Err(ColorCoordinate::decode(slot.get().load(Ordering::Acquire)))
            }
        }
    }

    /// Publishes the materialized coordinate for `color_hash`, previously
    /// claimed by [`mark_in_process`](Self::mark_in_process). Panics (a
    /// programming error, not a runtime condition) if no entry exists.
    pub fn publish(&self, color_hash: u64, repo_offset: u64) {
        let slot = self
            .entries
            .get(&color_hash)
            .expect("publish called without a prior mark_in_process");
        slot.store(
            ColorCoordinate::Ready { repo_offset }.encode(),
            Ordering::Release,
        );
    }

    /// Reads the current coordinate for `color_hash`, if any worker has
    /// claimed it.
    pub fn get(&self, color_hash: u64) -> Option<ColorCoordinate> {
        self.entries
            .get(&color_hash)
            .map(|slot| ColorCoordinate::decode(slot.load(Ordering::Acquire)))
    }

    /// If `color_hash` is still in-process under `worker_id`, atomically
    /// replaces it with the ready coordinate; used by the worker that holds
    /// the claim to publish without a second lookup. Returns whether the
    /// update took effect (it can only fail if another worker's claim
    /// differs, which would indicate a protocol violation upstream).
    pub fn update_if_in_process(&self, color_hash: u64, worker_id: u32, repo_offset: u64) -> bool {
        let Some(slot) = self.entries.get(&color_hash) else {
            return false;
        };
        let expected = ColorCoordinate::InProcess { worker_id }.encode();
        let desired = ColorCoordinate::Ready { repo_offset }.encode();
        slot.compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every currently-ready `(color_hash, repo_offset)` pair, for
    /// building the final colors file once every worker has finished
    /// resolving (any entry still `InProcess` at that point is a protocol
    /// violation upstream and is skipped rather than panicking here).
    pub fn ready_entries(&self) -> Vec<(u64, u64)> {
        self.entries
            .iter()
            .filter_map(|entry| match ColorCoordinate::decode(entry.value().load(Ordering::Acquire)) {
                ColorCoordinate::Ready { repo_offset } => Some((*entry.key(), repo_offset)),
                ColorCoordinate::InProcess { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claimant_wins() {
        let table = ColorTable::new();
        assert!(table.mark_in_process(42, 1).is_ok());
        assert_eq!(
            table.mark_in_process(42, 2),
            Err(ColorCoordinate::InProcess { worker_id: 1 })
        );
    }

    #[test]
    fn publish_then_get_returns_ready() {
        let table = ColorTable::new();
        table.mark_in_process(7, 1).unwrap();
        table.publish(7, 999);
        assert_eq!(table.get(7), Some(ColorCoordinate::Ready { repo_offset: 999 }));
    }

    #[test]
    fn update_if_in_process_rejects_wrong_worker() {
        let table = ColorTable::new();
        table.mark_in_process(7, 1).unwrap();
        assert!(!table.update_if_in_process(7, 2, 999));
        assert!(table.update_if_in_process(7, 1, 999));
        assert_eq!(table.get(7), Some(ColorCoordinate::Ready { repo_offset: 999 }));
    }

    #[test]
    fn concurrent_claimants_only_one_succeeds() {
        use std::sync::atomic::AtomicUsize;
        let table = ColorTable::new();
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|id| {
                let table = table.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    if table.mark_in_process(1, id).is_ok() {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::Relaxed), 1);
    }
}
