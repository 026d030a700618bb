/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! A fixed-capacity, open-addressing hash table for per-subgraph vertex
//! state, sized up-front from a [`crate::hll::HyperLogLog`] estimate.
//!
//! Slots carry a one-byte generation counter rather than a tombstone/empty
//! flag alone, so that the whole table can be "cleared" between subgraphs in
//! O(1): bumping a table-wide generation invalidates every slot without
//! touching it, and a slot is only considered occupied when its stored
//! generation matches the table's current one.

use crate::error::InternalError;
use crate::kmer::Kmer;

/// A vertex's side: `Front` is the side extended by prepending a base
/// (towards the 5' end of the canonical k-mer), `Back` the side extended by
/// appending one (towards the 3' end).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }
}

/// One side's observed extension: no neighbour, exactly one distinct
/// neighbouring base, or more than one (branching).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtensionSlot {
    #[default]
    Absent,
    One(crate::kmer::Base),
    Multi,
}

impl ExtensionSlot {
    fn observe(&mut self, b: crate::kmer::Base) {
        *self = match *self {
            ExtensionSlot::Absent => ExtensionSlot::One(b),
            ExtensionSlot::One(existing) if existing == b => ExtensionSlot::One(existing),
            _ => ExtensionSlot::Multi,
        };
    }

    /// The edge-count abstraction the unitig walk reasons about: 0, 1, or
    /// "many" (>= 2, collapsing all branching into one case).
    pub fn edge_count(&self) -> u8 {
        match self {
            ExtensionSlot::Absent => 0,
            ExtensionSlot::One(_) => 1,
            ExtensionSlot::Multi => 2,
        }
    }

    pub fn single_base(&self) -> Option<crate::kmer::Base> {
        match self {
            ExtensionSlot::One(b) => Some(*b),
            _ => None,
        }
    }
}

/// Per-vertex state the subgraph engine accumulates for one canonical
/// k-mer: its two extension slots, a discontinuity flag per side, and
/// whether it has already been consumed by a unitig walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexState {
    pub front: ExtensionSlot,
    pub back: ExtensionSlot,
    pub front_disc: bool,
    pub back_disc: bool,
    pub visited: bool,
    /// Set in colored mode: the hash of this vertex's color-set, once
    /// computed by the color engine.
    pub color_hash: Option<u64>,
}

impl VertexState {
    pub fn slot(&self, side: Side) -> ExtensionSlot {
        match side {
            Side::Front => self.front,
            Side::Back => self.back,
        }
    }

    fn observe(&mut self, side: Side, b: crate::kmer::Base) {
        match side {
            Side::Front => self.front.observe(b),
            Side::Back => self.back.observe(b),
        }
    }

    fn mark_disc(&mut self, side: Side) {
        match side {
            Side::Front => self.front_disc = true,
            Side::Back => self.back_disc = true,
        }
    }

    pub fn disc(&self, side: Side) -> bool {
        match side {
            Side::Front => self.front_disc,
            Side::Back => self.back_disc,
        }
    }
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u8,
    key: Kmer,
    value: VertexState,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            generation: 0,
            key: Kmer::from_ascii(b"A").unwrap(),
            value: VertexState::default(),
        }
    }
}

/// A linear-probing hash table of fixed capacity (a power of two), built
/// once per subgraph and discarded (or cleared and reused) once its unitigs
/// are emitted.
pub struct VertexTable {
    slots: Vec<Slot>,
    mask: u64,
    generation: u8,
    len: usize,
    seed: u64,
}

impl VertexTable {
    pub fn with_capacity(capacity: usize, seed: u64) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        VertexTable {
            slots: vec![Slot::empty(); capacity],
            mask: (capacity - 1) as u64,
            generation: 1,
            len: 0,
            seed,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clears the table in O(1) by bumping the generation counter. Wraps
    /// `u8` generations back to `1` (never `0`, reserved for "never
    /// written") and eagerly zeroes slots on that rare wraparound.
    pub fn clear(&mut self) {
        self.len = 0;
        if self.generation == u8::MAX {
            for slot in &mut self.slots {
                *slot = Slot::empty();
            }
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    fn probe(&self, key: &Kmer) -> usize {
        (key.hash64(self.seed) & self.mask) as usize
    }

    fn is_live(&self, slot: &Slot) -> bool {
        slot.generation == self.generation
    }

    /// Finds `key`'s slot index, starting the probe sequence at its home
    /// slot and wrapping around the table. Returns `None` only if the table
    /// is completely full of live entries none of which match `key`, which
    /// cannot happen given capacity provisioned with slack over the
    /// HyperLogLog estimate; callers still treat it as
    /// [`InternalError::HashTableOverflow`].
    fn find_slot(&self, key: &Kmer) -> Option<usize> {
        let start = self.probe(key);
        let cap = self.slots.len();
        for step in 0..cap {
            let idx = (start + step) % cap;
            let slot = &self.slots[idx];
            if !self.is_live(slot) || slot.key == *key {
                return Some(idx);
            }
        }
        None
    }

    /// Looks up `key`, returning its current state if present.
    pub fn get(&self, key: &Kmer) -> Option<VertexState> {
        let idx = self.find_slot(key)?;
        let slot = &self.slots[idx];
        self.is_live(slot).then_some(slot.value)
    }

    /// Ensures `key` has an entry, applying `f` to its (possibly
    /// freshly-inserted default) state.
    pub fn bump(&mut self, key: &Kmer, f: impl FnOnce(&mut VertexState)) -> Result<(), InternalError> {
        let capacity = self.slots.len();
        let idx = self
            .find_slot(key)
            .ok_or(InternalError::HashTableOverflow { capacity })?;
        let slot = &mut self.slots[idx];
        if !self.is_live(slot) {
            *slot = Slot {
                generation: self.generation,
                key: *key,
                value: VertexState::default(),
            };
            self.len += 1;
        }
        f(&mut slot.value);
        Ok(())
    }

    /// Records that `key`'s `side` is extended by base `b` (or marks it
    /// `Multi` if a different base was already observed there).
    pub fn observe_extension(&mut self, key: &Kmer, side: Side, b: crate::kmer::Base) -> Result<(), InternalError> {
        self.bump(key, |v| v.observe(side, b))
    }

    /// Records that `key`'s `side` crosses a subgraph boundary.
    pub fn mark_discontinuous(&mut self, key: &Kmer, side: Side) -> Result<(), InternalError> {
        self.bump(key, |v| v.mark_disc(side))
    }

    pub fn mark_visited(&mut self, key: &Kmer) -> Result<(), InternalError> {
        self.bump(key, |v| v.visited = true)
    }

    /// Records the resolved color-set hash for a color-shift vertex.
    pub fn set_color_hash(&mut self, key: &Kmer, hash: u64) -> Result<(), InternalError> {
        self.bump(key, |v| v.color_hash = Some(hash))
    }

    /// Iterates every live `(key, state)` pair, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Kmer, &VertexState)> {
        self.slots
            .iter()
            .filter(move |s| self.is_live(s))
            .map(|s| (&s.key, &s.value))
    }

    /// Issues a software prefetch hint for `key`'s home slot, used by the
    /// buffered batch-update path so that the cache-miss latency of a
    /// probe overlaps with computing the next batch entry.
    #[inline(always)]
    pub fn prefetch(&self, key: &Kmer) {
        #[cfg(target_arch = "x86_64")]
        {
            let idx = self.probe(key);
            let ptr = self.slots.as_ptr().wrapping_add(idx) as *const i8;
            unsafe {
                std::arch::x86_64::_mm_prefetch::<{ std::arch::x86_64::_MM_HINT_T0 }>(ptr);
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &[u8]) -> Kmer {
        Kmer::from_ascii(s).unwrap()
    }

    #[test]
    fn insert_and_get() {
        let mut t = VertexTable::with_capacity(16, 7);
        t.observe_extension(&k(b"ACGTACGT"), Side::Back, 1).unwrap();
        let state = t.get(&k(b"ACGTACGT")).unwrap();
        assert_eq!(state.back.edge_count(), 1);
        assert_eq!(state.back.single_base(), Some(1));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn clear_resets_without_touching_capacity() {
        let mut t = VertexTable::with_capacity(16, 7);
        t.observe_extension(&k(b"ACGTACGT"), Side::Back, 1).unwrap();
        assert_eq!(t.len(), 1);
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.capacity(), 16);
        assert!(t.get(&k(b"ACGTACGT")).is_none());
    }

    #[test]
    fn repeated_same_base_stays_single() {
        let mut t = VertexTable::with_capacity(16, 7);
        for _ in 0..5 {
            t.observe_extension(&k(b"AAAACCCC"), Side::Back, 2).unwrap();
        }
        assert_eq!(t.get(&k(b"AAAACCCC")).unwrap().back, ExtensionSlot::One(2));
    }

    #[test]
    fn differing_bases_become_multi() {
        let mut t = VertexTable::with_capacity(16, 7);
        t.observe_extension(&k(b"AAAACCCC"), Side::Back, 0).unwrap();
        t.observe_extension(&k(b"AAAACCCC"), Side::Back, 3).unwrap();
        assert_eq!(t.get(&k(b"AAAACCCC")).unwrap().back, ExtensionSlot::Multi);
    }

    #[test]
    fn overflow_is_reported_not_panicked() {
        let mut t = VertexTable::with_capacity(2, 1);
        let a = k(b"AAAAAAAA");
        let b = k(b"CCCCCCCC");
        let c = k(b"GGGGGGGG");
        let d = k(b"TTTTTTTT");
        t.bump(&a, |_| {}).unwrap();
        t.bump(&b, |_| {}).unwrap();
        // table has capacity 2 and both slots are occupied; further distinct
        // keys must fail cleanly rather than loop forever or overwrite.
        let r1 = t.bump(&c, |_| {});
        let r2 = t.bump(&d, |_| {});
        assert!(r1.is_err() || r2.is_err());
    }
}
