/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Stage (e): the shared unitig output sink, and stitching a bucket's
//! lm-tigs into final maximal unitigs using their resolved [`PathInfo`].

use crate::path_info::PathInfo;
use anyhow::{Context, Result};
use dbgc_core::hashtable::Side;
use dbgc_core::kmer::{base_to_char, char_to_base, complement_base, Kmer};
use dbgc_core::lmtig::LmTigReader;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Returns the rotation offset (in `0..period`) of the lexicographically
/// minimum canonical k-mer among a cyclic unitig's distinct rotations, where
/// `period = seq.len() - k + 1` (the trailing `k - 1` bytes of `seq` are the
/// wraparound repeat of its first `k - 1`, so only offsets `0..period` are
/// distinct rotations).
pub(crate) fn cycle_rotation_offset(seq: &[u8], k: usize) -> usize {
    let total = seq.len();
    if total < k {
        return 0;
    }
    let period = total - k + 1;
    let window = |offset: usize| -> Kmer {
        let bytes: Vec<u8> = (0..k).map(|i| seq[(offset + i) % period]).collect();
        Kmer::from_ascii(&bytes)
            .expect("cyclic unitig sequence is valid ACGT")
            .canonical()
    };
    let mut best_offset = 0;
    let mut best = window(0);
    for offset in 1..period {
        let candidate = window(offset);
        if candidate < best {
            best = candidate;
            best_offset = offset;
        }
    }
    best_offset
}

/// Rotates any per-vertex sequence cyclically by `offset`, wrapping every
/// `period` elements. Used both for a cycle's ASCII bytes (`period` elements
/// wrapped `items.len() / period` times over) and its parallel per-vertex
/// color-hash array (`items.len() == period`, a plain rotation).
pub(crate) fn rotate_cyclic_by<T: Copy>(items: &[T], period: usize, offset: usize) -> Vec<T> {
    if period == 0 {
        return items.to_vec();
    }
    (0..items.len()).map(|t| items[(offset + t) % period]).collect()
}

/// Rotates a cyclic unitig's ASCII sequence so the k-mer at offset 0 is the
/// lexicographically minimum canonical k-mer among all of the cycle's
/// rotations. Gives every occurrence of a given cycle a single canonical
/// output form regardless of which vertex the walk that produced it happened
/// to start from.
pub(crate) fn rotate_cycle_to_minimum(seq: &[u8], k: usize) -> Vec<u8> {
    let total = seq.len();
    if total < k {
        return seq.to_vec();
    }
    let period = total - k + 1;
    let offset = cycle_rotation_offset(seq, k);
    rotate_cyclic_by(seq, period, offset)
}

/// The single shared writer every worker's finished unitig (trivial, from
/// the subgraph engine, or stitched, from the collator) is flushed to.
/// Guarded by one mutex, per the concurrency model's "single shared writer"
/// rule; callers are expected to batch a chain's full sequence before
/// calling [`write_unitig`](Self::write_unitig) so lock hold time stays
/// short relative to the ~100 KiB amortisation target.
pub struct UnitigSink {
    writer: Mutex<Box<dyn Write + Send>>,
    next_id: AtomicU64,
    /// In colored mode: the raw per-vertex color-hash stream, aligned to the
    /// FASTA vertex order by sharing this sink's single writer lock with the
    /// sequence write. Holds unresolved 64-bit color-set hashes; the
    /// pipeline remaps these to dense color-set ids once every bucket has
    /// finished materializing its color sets.
    colors_writer: Option<Mutex<Box<dyn Write + Send>>>,
}

impl UnitigSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        UnitigSink {
            writer: Mutex::new(writer),
            next_id: AtomicU64::new(0),
            colors_writer: None,
        }
    }

    pub fn with_colors(writer: Box<dyn Write + Send>, colors_writer: Box<dyn Write + Send>) -> Self {
        UnitigSink {
            writer: Mutex::new(writer),
            next_id: AtomicU64::new(0),
            colors_writer: Some(Mutex::new(colors_writer)),
        }
    }

    /// Writes one maximal unitig as a FASTA-like record with a header
    /// encoding its integer id, returning that id. `vertex_colors`, when
    /// this sink was built with [`with_colors`](Self::with_colors), is one
    /// 64-bit color-set hash per vertex in `ascii_sequence` (length
    /// `ascii_sequence.len() - k + 1`), appended to the raw color stream in
    /// the same call so its position stays aligned with this record.
    pub fn write_unitig(&self, ascii_sequence: &[u8], is_cycle: bool, vertex_colors: Option<&[u64]>) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut record = Vec::with_capacity(ascii_sequence.len() + 32);
        if is_cycle {
            writeln!(record, ">unitig_{id} cycle")?;
        } else {
            writeln!(record, ">unitig_{id}")?;
        }
        record.extend_from_slice(ascii_sequence);
        record.push(b'\n');
        self.writer
            .lock()
            .unwrap()
            .write_all(&record)
            .context("writing unitig to output sink")?;
        if let (Some(colors), Some(writer)) = (vertex_colors, &self.colors_writer) {
            let mut buf = Vec::with_capacity(colors.len() * 8);
            for hash in colors {
                buf.extend_from_slice(&hash.to_le_bytes());
            }
            writer
                .lock()
                .unwrap()
                .write_all(&buf)
                .context("writing per-vertex color hash stream")?;
        }
        Ok(id)
    }

    /// Flushes both underlying writers. Callers that need to read back a
    /// finalized output file (the color remapping pass reads the raw color
    /// stream this sink wrote) must call this first.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().unwrap().flush().context("flushing unitig sink")?;
        if let Some(writer) = &self.colors_writer {
            writer.lock().unwrap().flush().context("flushing color-hash stream")?;
        }
        Ok(())
    }
}

fn reverse_complement_ascii(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&c| base_to_char(complement_base(char_to_base(c).expect("non-ACGT byte in lm-tig"))))
        .collect()
}

/// Stitches lm-tigs into chains and flushes each completed chain to a
/// shared [`UnitigSink`].
pub struct Collator<'a> {
    sink: &'a UnitigSink,
    k: usize,
}

impl<'a> Collator<'a> {
    pub fn new(sink: &'a UnitigSink, k: usize) -> Self {
        Collator { sink, k }
    }

    /// Collates one bucket's lm-tigs, given the resolved path-info for each
    /// intra-bucket index (`None` for lm-tigs already written directly as
    /// trivial maximal unitigs by the subgraph engine). `colored` controls
    /// whether each chain's per-vertex color-hash stream (written by the
    /// subgraph engine alongside the lm-tig itself) is read back, stitched,
    /// and forwarded to the sink. Returns the number of chains flushed.
    pub fn collate_bucket(&self, reader: &LmTigReader, path_info: &[Option<PathInfo>], colored: bool) -> Result<usize> {
        let mut chains: HashMap<Kmer, Vec<(u64, usize, Side)>> = HashMap::new();
        let mut cyclic_paths: std::collections::HashSet<Kmer> = std::collections::HashSet::new();
        for (idx, info) in path_info.iter().enumerate() {
            if let Some(info) = info {
                chains
                    .entry(info.path_id)
                    .or_default()
                    .push((info.rank, idx, info.orientation));
                if info.is_cycle {
                    cyclic_paths.insert(info.path_id);
                }
            }
        }
        let mut written = 0;
        for (path_id, mut members) in chains {
            members.sort_by_key(|(rank, _, _)| *rank);
            let mut seq: Vec<u8> = Vec::new();
            let mut colors: Vec<u64> = Vec::new();
            for (_, idx, orientation) in &members {
                let raw = reader
                    .get(*idx)
                    .with_context(|| format!("path-info references missing lm-tig {idx}"))?;
                let piece = match orientation {
                    Side::Front => raw.to_vec(),
                    Side::Back => reverse_complement_ascii(raw),
                };
                if colored {
                    if let Some(piece_colors) = reader.colors(*idx, self.k) {
                        let piece_colors = match orientation {
                            Side::Front => piece_colors,
                            Side::Back => piece_colors.into_iter().rev().collect(),
                        };
                        colors.extend_from_slice(&piece_colors);
                    }
                }
                if seq.is_empty() {
                    seq = piece;
                } else {
                    let overlap = (self.k - 1).min(piece.len());
                    seq.extend_from_slice(&piece[overlap..]);
                }
            }
            let is_cycle = cyclic_paths.contains(&path_id);
            if is_cycle {
                let period = seq.len().saturating_sub(self.k - 1).max(1);
                let offset = cycle_rotation_offset(&seq, self.k);
                seq = rotate_cyclic_by(&seq, period, offset);
                if colored && !colors.is_empty() {
                    let color_period = colors.len();
                    colors = rotate_cyclic_by(&colors, color_period, offset % color_period);
                }
            }
            let colors_arg = if colored && !colors.is_empty() { Some(colors.as_slice()) } else { None };
            self.sink.write_unitig(&seq, is_cycle, colors_arg)?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgc_core::lmtig::LmTigWriter;

    #[test]
    fn rotate_cycle_to_minimum_picks_the_lowest_canonical_rotation() {
        let rotated = rotate_cycle_to_minimum(b"CAAACA", 3);
        assert_eq!(rotated, b"AAACAA");
    }

    #[test]
    fn rotate_cycle_to_minimum_is_idempotent_on_an_already_minimal_sequence() {
        let rotated = rotate_cycle_to_minimum(b"AAACAA", 3);
        assert_eq!(rotated, b"AAACAA");
    }

    #[test]
    fn write_unitig_assigns_increasing_ids() {
        let buf: Vec<u8> = Vec::new();
        let sink = UnitigSink::new(Box::new(buf));
        let id0 = sink.write_unitig(b"ACGT", false, None).unwrap();
        let id1 = sink.write_unitig(b"TTTT", true, None).unwrap();
        assert_eq!((id0, id1), (0, 1));
    }

    #[test]
    fn collates_two_lmtigs_into_one_chain_with_overlap_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LmTigWriter::create(dir.path(), 0).unwrap();
        writer.append(b"ACGTACGT").unwrap(); // idx 0, k=5 => last 4 bases overlap
        writer.append(b"ACGTTTTT").unwrap(); // idx 1
        drop(writer);
        let reader = LmTigReader::open(dir.path(), 0).unwrap();

        let path_id = Kmer::from_ascii(b"AAAA").unwrap();
        let path_info = vec![
            Some(PathInfo {
                path_id,
                rank: 0,
                orientation: Side::Front,
                is_cycle: false,
            }),
            Some(PathInfo {
                path_id,
                rank: 1,
                orientation: Side::Front,
                is_cycle: false,
            }),
        ];

        let buf: Vec<u8> = Vec::new();
        let sink = UnitigSink::new(Box::new(buf));
        let collator = Collator::new(&sink, 5);
        let written = collator.collate_bucket(&reader, &path_info, false).unwrap();
        assert_eq!(written, 1);
    }
}
