/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Fixed-width, 2-bit-packed k-mers.
//!
//! A k-mer is stored as `k` bases, 2 bits each, little-endian packed across
//! [`KMER_WORDS`] 64-bit words: base `i` (`i = 0` is the 5'-most base) lives at
//! bit offset `2 * (i % 32)` of `words[i / 32]`. Bits at or beyond position `k`
//! are always zero; every constructor and mutator maintains that invariant so
//! that equality, hashing, and ordering agree.
//!
//! `k` is a runtime value bounded by the const [`KMER_WORDS`]-sized backing
//! array (see the design notes on avoiding macro-driven per-k template
//! enumeration): this is the "runtime `k`, const-generic word-count upper
//! bound" alternative.

use crate::config::{KMER_WORDS, MAX_K};
use std::cmp::Ordering;
use std::fmt;

/// A 2-bit base code: `A=0, C=1, G=2, T=3`. Chosen so the complement is a
/// single XOR with 3 (`A<->T`, `C<->G`).
pub type Base = u8;

#[inline(always)]
pub fn char_to_base(c: u8) -> Option<Base> {
    match c {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

#[inline(always)]
pub fn base_to_char(b: Base) -> u8 {
    match b & 3 {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

#[inline(always)]
pub fn complement_base(b: Base) -> Base {
    b ^ 3
}

/// Is `c` a placeholder (not one of A/C/G/T)?
#[inline(always)]
pub fn is_placeholder(c: u8) -> bool {
    char_to_base(c).is_none()
}

/// A fixed-width 2-bit-packed k-mer, not necessarily canonicalized.
#[derive(Clone, Copy, Eq)]
pub struct Kmer {
    k: u8,
    words: [u64; KMER_WORDS],
}

impl Kmer {
    pub const BASES_PER_WORD: usize = 32;

    /// Parses a k-mer from an ASCII `{A,C,G,T}` string of length exactly `k`.
    pub fn from_ascii(seq: &[u8]) -> Option<Self> {
        let k = seq.len();
        if k == 0 || k > MAX_K {
            return None;
        }
        let mut kmer = Kmer {
            k: k as u8,
            words: [0; KMER_WORDS],
        };
        for (i, &c) in seq.iter().enumerate() {
            kmer.set_base(i, char_to_base(c)?);
        }
        Some(kmer)
    }

    pub fn k(&self) -> usize {
        self.k as usize
    }

    pub fn words(&self) -> &[u64; KMER_WORDS] {
        &self.words
    }

    #[inline(always)]
    pub fn get_base(&self, i: usize) -> Base {
        debug_assert!(i < self.k());
        let word = self.words[i / Self::BASES_PER_WORD];
        ((word >> (2 * (i % Self::BASES_PER_WORD))) & 3) as Base
    }

    #[inline(always)]
    fn set_base(&mut self, i: usize, b: Base) {
        debug_assert!(i < self.k());
        let shift = 2 * (i % Self::BASES_PER_WORD);
        let word = &mut self.words[i / Self::BASES_PER_WORD];
        *word &= !(3u64 << shift);
        *word |= (b as u64 & 3) << shift;
    }

    /// Builds a k-mer of length `k` from a base-producing closure.
    pub fn from_fn(k: usize, mut f: impl FnMut(usize) -> Base) -> Self {
        debug_assert!(k > 0 && k <= MAX_K);
        let mut kmer = Kmer {
            k: k as u8,
            words: [0; KMER_WORDS],
        };
        for i in 0..k {
            kmer.set_base(i, f(i));
        }
        kmer
    }

    pub fn to_ascii(&self) -> Vec<u8> {
        (0..self.k()).map(|i| base_to_char(self.get_base(i))).collect()
    }

    /// The reverse complement of this k-mer.
    pub fn reverse_complement(&self) -> Self {
        let k = self.k();
        Kmer::from_fn(k, |i| complement_base(self.get_base(k - 1 - i)))
    }

    /// The canonical form: the lexicographically smaller of `self` and its
    /// reverse complement.
    pub fn canonical(&self) -> Self {
        let rc = self.reverse_complement();
        if *self <= rc {
            *self
        } else {
            rc
        }
    }

    /// Like [`canonical`](Self::canonical), but also reports whether the
    /// canonical form is the reverse complement of `self` (`true`) or `self`
    /// itself (`false`). Used to derive observed orientation without keeping
    /// a raw pointer into one of two sibling copies.
    pub fn canonical_with_orientation(&self) -> (Self, bool) {
        let rc = self.reverse_complement();
        if *self <= rc {
            (*self, false)
        } else {
            (rc, true)
        }
    }

    /// Is this k-mer its own reverse complement?
    pub fn is_palindrome(&self) -> bool {
        *self == self.reverse_complement()
    }

    /// A 64-bit seeded hash, independent of the word layout above bit `2k`.
    pub fn hash64(&self, seed: u64) -> u64 {
        let mut bytes = [0u8; KMER_WORDS * 8];
        for (word, chunk) in self.words.iter().zip(bytes.chunks_exact_mut(8)) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        xxhash_rust::xxh3::xxh3_64_with_seed(&bytes, seed ^ (self.k as u64))
    }

    /// Fixed-width on-disk encoding: 1 byte `k` followed by `KMER_WORDS`
    /// little-endian `u64` words. Used anywhere a k-mer is a field of a
    /// larger record (discontinuity edges, hash table slots).
    pub const ENCODED_LEN: usize = 1 + KMER_WORDS * 8;

    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= Self::ENCODED_LEN);
        buf[0] = self.k;
        for (word, chunk) in self.words.iter().zip(buf[1..].chunks_exact_mut(8)) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= Self::ENCODED_LEN);
        let k = buf[0];
        let mut words = [0u64; KMER_WORDS];
        for (word, chunk) in words.iter_mut().zip(buf[1..].chunks_exact(8)) {
            *word = u64::from_le_bytes(chunk.try_into().unwrap());
        }
        Kmer { k, words }
    }

    /// Returns the length-`k-1` prefix (drops the last base).
    pub fn prefix(&self) -> Self {
        debug_assert!(self.k() > 1);
        Kmer::from_fn(self.k() - 1, |i| self.get_base(i))
    }

    /// Returns the length-`k-1` suffix (drops the first base).
    pub fn suffix(&self) -> Self {
        debug_assert!(self.k() > 1);
        Kmer::from_fn(self.k() - 1, |i| self.get_base(i + 1))
    }

    /// Rolls the window one base forward: drops the first base and appends
    /// `last`, keeping the same length.
    pub fn roll_forward(&self, last: Base) -> Self {
        let k = self.k();
        Kmer::from_fn(k, |i| if i + 1 < k { self.get_base(i + 1) } else { last })
    }

    /// Rolls the window one base backward: drops the last base and prepends
    /// `first`, keeping the same length.
    pub fn roll_backward(&self, first: Base) -> Self {
        let k = self.k();
        Kmer::from_fn(k, |i| if i == 0 { first } else { self.get_base(i - 1) })
    }

    /// Extracts the length-`len` k-mer starting at base offset `start` within
    /// a longer run of packed bases (e.g. a super-k-mer record).
    pub fn extract_window(bases: &[Base], start: usize, len: usize) -> Self {
        debug_assert!(start + len <= bases.len());
        Kmer::from_fn(len, |i| bases[start + i])
    }

    /// Extends this k-mer with one more base, producing a `(k+1)`-mer.
    pub fn extend_right(&self, b: Base) -> Kmer {
        let k = self.k();
        Kmer::from_fn(k + 1, |i| if i < k { self.get_base(i) } else { b })
    }
}

impl PartialEq for Kmer {
    fn eq(&self, other: &Self) -> bool {
        self.k == other.k && self.words == other.words
    }
}

impl std::hash::Hash for Kmer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.k.hash(state);
        self.words.hash(state);
    }
}

impl PartialOrd for Kmer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lexicographic order on the base sequence, 5' to 3'. Only meaningful
/// between k-mers of the same length (mixed-length comparisons compare the
/// shared prefix, then length, matching string-prefix semantics).
impl Ord for Kmer {
    fn cmp(&self, other: &Self) -> Ordering {
        let k = self.k().min(other.k());
        for i in 0..k {
            match self.get_base(i).cmp(&other.get_base(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.k.cmp(&other.k)
    }
}

impl fmt::Debug for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_ascii()))
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_ascii()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ascii() {
        let s = b"ACGTACGTAC";
        let km = Kmer::from_ascii(s).unwrap();
        assert_eq!(km.to_ascii(), s);
    }

    #[test]
    fn round_trip_binary_encoding() {
        let km = Kmer::from_ascii(b"ACGTACGTACGTACGT").unwrap();
        let mut buf = [0u8; Kmer::ENCODED_LEN];
        km.write_to(&mut buf);
        let back = Kmer::read_from(&buf);
        assert_eq!(km, back);
    }

    #[test]
    fn reverse_complement_involution() {
        let km = Kmer::from_ascii(b"ACGTACGTAC").unwrap();
        assert_eq!(km.reverse_complement().reverse_complement(), km);
    }

    #[test]
    fn reverse_complement_known_value() {
        let km = Kmer::from_ascii(b"ACGT").unwrap();
        assert_eq!(km.reverse_complement().to_ascii(), b"ACGT");
        let km2 = Kmer::from_ascii(b"AAAA").unwrap();
        assert_eq!(km2.reverse_complement().to_ascii(), b"TTTT");
    }

    #[test]
    fn palindrome_detection() {
        let km = Kmer::from_ascii(b"ACGT").unwrap();
        assert!(km.is_palindrome());
        let km2 = Kmer::from_ascii(b"ACGA").unwrap();
        assert!(!km2.is_palindrome());
    }

    #[test]
    fn canonical_is_lexicographically_smaller() {
        let km = Kmer::from_ascii(b"TTTT").unwrap();
        let (c, was_rc) = km.canonical_with_orientation();
        assert_eq!(c.to_ascii(), b"AAAA");
        assert!(was_rc);
    }

    #[test]
    fn roll_forward_and_backward() {
        let km = Kmer::from_ascii(b"ACGTA").unwrap();
        let rolled = km.roll_forward(char_to_base(b'C').unwrap());
        assert_eq!(rolled.to_ascii(), b"CGTAC");
        let back = rolled.roll_backward(char_to_base(b'A').unwrap());
        assert_eq!(back.to_ascii(), b"ACGTA");
    }

    #[test]
    fn prefix_suffix() {
        let km = Kmer::from_ascii(b"ACGTA").unwrap();
        assert_eq!(km.prefix().to_ascii(), b"ACGT");
        assert_eq!(km.suffix().to_ascii(), b"CGTA");
    }

    #[test]
    fn ordering_matches_ascii_ordering() {
        let a = Kmer::from_ascii(b"AACC").unwrap();
        let b = Kmer::from_ascii(b"AACG").unwrap();
        assert!(a < b);
    }

    #[test]
    fn hash_is_stable_and_seed_sensitive() {
        let km = Kmer::from_ascii(b"ACGTACGT").unwrap();
        assert_eq!(km.hash64(42), km.hash64(42));
        assert_ne!(km.hash64(42), km.hash64(43));
    }
}
