/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Minimizer computation and the subgraph/partition addressing it induces.

use crate::kmer::{char_to_base, Base, Kmer};
use std::collections::VecDeque;

/// Maps a 64-bit hash to one of `num_subgraphs` (a power of two) buckets.
#[inline(always)]
pub fn subgraph_of(hash: u64, num_subgraphs: usize) -> usize {
    debug_assert!(num_subgraphs.is_power_of_two());
    (hash as usize) & (num_subgraphs - 1)
}

/// Maps a 64-bit hash to one of `num_partitions` (a power of two) vertex
/// partitions: `partition(v) = hash(v) & (P - 1)`.
#[inline(always)]
pub fn partition_of(hash: u64, num_partitions: usize) -> usize {
    subgraph_of(hash, num_partitions)
}

/// A candidate l-mer inside a minimizer window: its packed value and its
/// seeded hash. Ties in hash are broken by the smaller integer value:
/// deterministic and cheap, and irrelevant in practice since a 64-bit hash
/// collision between two l-mers in the same window is vanishingly rare.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    hash: u64,
    value: u64,
    pos: usize,
}

impl Candidate {
    #[inline(always)]
    fn better_than(&self, other: &Candidate) -> bool {
        (self.hash, self.value) < (other.hash, other.value)
    }
}

/// Packs an l-mer's bases into a single integer for tie-breaking and for
/// compact storage, most-significant base first.
fn lmer_value(kmer: &Kmer) -> u64 {
    let mut v = 0u64;
    for i in 0..kmer.k() {
        v = (v << 2) | kmer.get_base(i) as u64;
    }
    v
}

/// Streams the minimizer of every length-`w` window (`w = k - 1`) over a
/// placeholder-free fragment, using a monotonic deque so that each base
/// advance is amortized O(1).
pub struct MinimizerScanner<'a> {
    bases: &'a [Base],
    l: usize,
    w: usize,
    seed: u64,
    /// Precomputed (hash, value) for every l-mer start position.
    lmers: Vec<(u64, u64)>,
    deque: VecDeque<Candidate>,
    next_window_start: usize,
}

impl<'a> MinimizerScanner<'a> {
    /// `bases` must be placeholder-free and at least `w = k - 1` bases long.
    pub fn new(bases: &'a [Base], l: usize, w: usize, seed: u64) -> Self {
        debug_assert!(l <= w && l <= 32 && bases.len() >= w);
        let num_lmers = bases.len() - l + 1;
        let mut lmers = Vec::with_capacity(num_lmers);
        let mut cur = if l > 0 {
            Some(Kmer::from_fn(l, |i| bases[i]))
        } else {
            None
        };
        for pos in 0..num_lmers {
            let kmer = if pos == 0 {
                cur.unwrap()
            } else {
                let next = cur.unwrap().roll_forward(bases[pos + l - 1]);
                cur = Some(next);
                next
            };
            lmers.push((kmer.hash64(seed), lmer_value(&kmer)));
        }
        MinimizerScanner {
            bases,
            l,
            w,
            seed,
            lmers,
            deque: VecDeque::new(),
            next_window_start: 0,
        }
    }

    fn push_lmer(&mut self, pos: usize) {
        let (hash, value) = self.lmers[pos];
        let cand = Candidate { hash, value, pos };
        while let Some(back) = self.deque.back() {
            if cand.better_than(back) {
                self.deque.pop_back();
            } else {
                break;
            }
        }
        self.deque.push_back(cand);
    }

    fn evict_before(&mut self, window_start: usize) {
        while let Some(front) = self.deque.front() {
            if front.pos < window_start {
                self.deque.pop_front();
            } else {
                break;
            }
        }
    }
}

/// One (k-1)-mer window's minimizer: the position (in l-mer-start coordinates
/// relative to the fragment) and hash of the minimizing l-mer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinimizerInstance {
    /// Start offset, in bases from the fragment's start, of the window this
    /// instance covers.
    pub window_start: usize,
    /// Start offset of the minimizing l-mer itself.
    pub lmer_start: usize,
    pub hash: u64,
    pub value: u64,
}

impl<'a> Iterator for MinimizerScanner<'a> {
    type Item = MinimizerInstance;

    fn next(&mut self) -> Option<Self::Item> {
        let window_start = self.next_window_start;
        if window_start + self.w > self.bases.len() {
            return None;
        }
        let num_windows_lmer_positions = self.w - self.l + 1;
        let last_lmer_for_window = window_start + num_windows_lmer_positions - 1;
        // Feed the deque every l-mer start newly in range for this window.
        let feed_upto = last_lmer_for_window;
        let already_fed = if window_start == 0 {
            0
        } else {
            window_start + num_windows_lmer_positions - 2
        };
        let start_feed = if window_start == 0 { 0 } else { already_fed + 1 };
        for pos in start_feed..=feed_upto {
            self.push_lmer(pos);
        }
        self.evict_before(window_start);
        let best = *self.deque.front().expect("window is non-empty");
        self.next_window_start += 1;
        Some(MinimizerInstance {
            window_start,
            lmer_start: best.pos,
            hash: best.hash,
            value: best.value,
        })
    }
}

/// Computes the minimizer of a single (k-1)-mer, without the sliding-window
/// machinery; used for isolated lookups (e.g. re-deriving a vertex's
/// subgraph).
pub fn minimizer_of_window(window: &[Base], l: usize, seed: u64) -> MinimizerInstance {
    debug_assert!(l <= window.len() && l <= 32);
    let mut best: Option<MinimizerInstance> = None;
    let mut cur = Kmer::from_fn(l, |i| window[i]);
    for pos in 0..=(window.len() - l) {
        let kmer = if pos == 0 {
            cur
        } else {
            cur = cur.roll_forward(window[pos + l - 1]);
            cur
        };
        let hash = kmer.hash64(seed);
        let value = lmer_value(&kmer);
        let better = match &best {
            None => true,
            Some(b) => (hash, value) < (b.hash, b.value),
        };
        if better {
            best = Some(MinimizerInstance {
                window_start: 0,
                lmer_start: pos,
                hash,
                value,
            });
        }
    }
    best.expect("window is non-empty")
}

/// Parses an ASCII fragment into base codes, returning `None` at the first
/// placeholder symbol found (callers are expected to have already split on
/// placeholders into admissible fragments).
pub fn ascii_to_bases(seq: &[u8]) -> Option<Vec<Base>> {
    seq.iter().map(|&c| char_to_base(c)).collect()
}
