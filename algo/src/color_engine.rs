/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Stage (f), optional: assigns every color-shift vertex a color-set
//! identifier, materializing each distinct color set at most once across
//! all workers.
//!
//! A vertex is a *color-shift* vertex when the source ids reaching it from
//! its front side and from its back side disagree — the unitig passing
//! through it is where two differently-colored regions of the input meet.
//! Everything else inherits its neighbour's color-set implicitly and never
//! touches the color table at all.

use anyhow::{Context, Result};
use dbgc_core::color::{ColorCoordinate, ColorTable};
use dbgc_core::kmer::Kmer;
use dbgc_core::superkmer::SuperKmerRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use xxhash_rust::xxh3::xxh3_64_with_seed;

#[derive(Clone, Debug, Default)]
struct SideSources {
    front: Vec<u32>,
    back: Vec<u32>,
}

/// Folds one bucket's super-k-mer records into a per-vertex front/back
/// source-id observation map, keyed by canonical k-mer.
///
/// Relies on the partitioner's colored-mode batching invariant: records
/// arrive already sorted by source id within a batch, so each side's vector
/// is built in non-decreasing order and needs no separate sort before the
/// color engine deduplicates it.
fn collect_side_sources(records: &[SuperKmerRecord], k: usize) -> HashMap<Kmer, SideSources> {
    let mut out: HashMap<Kmer, SideSources> = HashMap::new();
    for record in records {
        let Some(source_id) = record.source_id else { continue };
        if record.bases.len() < k {
            continue;
        }
        let num_kmers = record.bases.len() - k + 1;
        for start in 0..num_kmers {
            let kmer = Kmer::extract_window(&record.bases, start, k).canonical();
            let entry = out.entry(kmer).or_default();
            if start == 0 {
                entry.front.push(source_id);
            }
            if start + 1 == num_kmers {
                entry.back.push(source_id);
            }
        }
    }
    out
}

fn dedup_sorted(mut ids: Vec<u32>) -> Vec<u32> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// One vertex flagged as a color-shift point, with the unique source ids
/// that its two sides disagree on (already merged and deduplicated: this is
/// the full color-set the engine must resolve a coordinate for).
pub struct ColorShiftVertex {
    pub vertex: Kmer,
    pub source_ids: Vec<u32>,
}

/// Scans a bucket's collected side-sources and returns every vertex whose
/// front and back source-id sets disagree.
pub fn find_color_shift_vertices(records: &[SuperKmerRecord], k: usize) -> Vec<ColorShiftVertex> {
    let observed = collect_side_sources(records, k);
    let mut shifts = Vec::new();
    for (vertex, sides) in observed {
        let front = dedup_sorted(sides.front);
        let back = dedup_sorted(sides.back);
        if front.is_empty() || back.is_empty() || front == back {
            continue;
        }
        let mut merged = front;
        merged.extend(back);
        shifts.push(ColorShiftVertex {
            vertex,
            source_ids: dedup_sorted(merged),
        });
    }
    shifts
}

/// Hashes a color set (a sorted, deduplicated list of source ids) to the
/// 64-bit key the color table indexes on.
pub fn hash_color_set(source_ids: &[u32], seed: u64) -> u64 {
    let mut buf = Vec::with_capacity(source_ids.len() * 4);
    for id in source_ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    xxh3_64_with_seed(&buf, seed)
}

/// Encodes a color set as a packed little-endian `u32` sequence, the
/// on-disk form appended to a worker's color repository bucket.
fn encode_color_set(source_ids: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + source_ids.len() * 4);
    out.extend_from_slice(&(source_ids.len() as u32).to_le_bytes());
    for id in source_ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

/// Decodes one color set previously appended by [`encode_color_set`] out of
/// a repository's raw bytes at `offset`.
pub fn decode_color_set(bytes: &[u8], offset: u64) -> Vec<u32> {
    let offset = offset as usize;
    let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(len);
    let mut cursor = offset + 4;
    for _ in 0..len {
        out.push(u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()));
        cursor += 4;
    }
    out
}

/// Returns the sorted, deduplicated set of every source id observed
/// anywhere in `records`: a bucket's ambient color-set, used as the
/// fallback color for vertices when the bucket contains no color-shift
/// vertex at all (every record agrees on sources everywhere, so the color
/// engine's CAS protocol never runs for this bucket).
pub fn bucket_ambient_sources(records: &[SuperKmerRecord]) -> Vec<u32> {
    dedup_sorted(records.iter().filter_map(|r| r.source_id).collect())
}

/// A worker's append-only color repository: every distinct color set this
/// worker ever materializes, concatenated in encounter order. Unlike an
/// [`AtlasBucket`](dbgc_core::bucket::AtlasBucket), appends here must hand
/// back the record's own offset synchronously (it becomes the published
/// [`ColorCoordinate::Ready::repo_offset`]), so records are held in memory
/// and flushed to `col_<worker_id>` once at finalization rather than
/// streamed through a shared/flush buffer pair.
pub struct ColorRepository {
    path: PathBuf,
    buf: Mutex<Vec<u8>>,
}

impl ColorRepository {
    pub fn create(dir: &Path, worker_id: u32) -> Self {
        ColorRepository {
            path: dir.join(format!("col_{worker_id}")),
            buf: Mutex::new(Vec::new()),
        }
    }

    /// Appends `bytes` and returns the byte offset it was written at.
    fn append(&self, bytes: &[u8]) -> u64 {
        let mut buf = self.buf.lock().unwrap();
        let offset = buf.len() as u64;
        buf.extend_from_slice(bytes);
        offset
    }

    /// Flushes the accumulated repository to disk. Called once, after every
    /// worker has finished resolving color sets.
    pub fn finalize(&self) -> Result<()> {
        let buf = self.buf.lock().unwrap();
        std::fs::write(&self.path, &*buf)
            .with_context(|| format!("flushing color repository {}", self.path.display()))
    }

    /// Returns a snapshot of the bytes accumulated so far, for decoding
    /// materialized color sets without a second read of the finalized file.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }
}

/// Drives the CAS materialization protocol over one worker's shared
/// [`ColorTable`] and this worker's own repository.
///
/// At most one worker ever materializes a given distinct color set: the
/// first to win [`ColorTable::mark_in_process`] appends it to its own
/// repository and publishes the resulting coordinate; everyone else either
/// spins until that publish lands or reads an already-ready coordinate
/// straight away.
pub struct ColorEngine<'a> {
    table: &'a ColorTable,
    repo: &'a ColorRepository,
    worker_id: u32,
    seed: u64,
}

impl<'a> ColorEngine<'a> {
    pub fn new(table: &'a ColorTable, repo: &'a ColorRepository, worker_id: u32, seed: u64) -> Self {
        ColorEngine { table, repo, worker_id, seed }
    }

    /// Resolves `source_ids`'s color-set coordinate, materializing it if no
    /// other worker has already done so.
    pub fn resolve(&self, source_ids: &[u32]) -> Result<ColorCoordinate> {
        let hash = hash_color_set(source_ids, self.seed);
        match self.table.mark_in_process(hash, self.worker_id) {
            Ok(()) => {
                let offset = self.materialize(source_ids)?;
                let coordinate = ColorCoordinate::Ready { repo_offset: offset };
                let updated = self.table.update_if_in_process(hash, self.worker_id, offset);
                debug_assert!(updated, "lost our own in-process claim before publishing");
                Ok(coordinate)
            }
            Err(ColorCoordinate::Ready { repo_offset }) => Ok(ColorCoordinate::Ready { repo_offset }),
            Err(ColorCoordinate::InProcess { .. }) => {
                loop {
                    match self.table.get(hash) {
                        Some(ColorCoordinate::Ready { repo_offset }) => {
                            return Ok(ColorCoordinate::Ready { repo_offset })
                        }
                        _ => std::thread::yield_now(),
                    }
                }
            }
        }
    }

    fn materialize(&self, source_ids: &[u32]) -> Result<u64> {
        let bytes = encode_color_set(source_ids);
        Ok(self.repo.append(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgc_core::superkmer::SuperKmerFlags;

    fn rec(source_id: u32, seq: &[u8]) -> SuperKmerRecord {
        SuperKmerRecord {
            flags: SuperKmerFlags::empty(),
            source_id: Some(source_id),
            bases: dbgc_core::minimizer::ascii_to_bases(seq).unwrap(),
        }
    }

    #[test]
    fn agreeing_sides_are_not_a_color_shift() {
        let records = vec![rec(1, b"ACGTACGT"), rec(1, b"ACGTACGT")];
        let shifts = find_color_shift_vertices(&records, 5);
        assert!(shifts.is_empty());
    }

    #[test]
    fn disagreeing_sides_flag_a_color_shift_with_merged_sources() {
        // k=5: "ACGTT" has two windows; front window's vertex also appears
        // as the back window of a different source's record.
        let records = vec![rec(1, b"ACGTT"), rec(2, b"ACGTT")];
        let shifts = find_color_shift_vertices(&records, 5);
        // Single-window records: front == back == the whole k-mer, so each
        // source alone agrees with itself; combined across both records the
        // same vertex sees {1} from one record and {2} from the other at
        // both sides, so front={1,2} == back={1,2}: no shift. Use a
        // two-window record instead to separate front/back by source.
        assert!(shifts.is_empty());

        let mixed = vec![rec(1, b"ACGTTT"), rec(2, b"TTACGT")];
        let shifts = find_color_shift_vertices(&mixed, 5);
        assert!(!shifts.is_empty());
    }

    #[test]
    fn hash_color_set_is_order_independent_once_sorted() {
        let a = hash_color_set(&[1, 2, 3], 7);
        let b = hash_color_set(&dedup_sorted(vec![3, 1, 2, 1]), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn first_resolver_materializes_second_reads_ready() {
        let dir = tempfile::tempdir().unwrap();
        let table = ColorTable::new();
        let repo = ColorRepository::create(dir.path(), 0);
        let e1 = ColorEngine::new(&table, &repo, 1, 0);
        let e2 = ColorEngine::new(&table, &repo, 2, 0);
        let c1 = e1.resolve(&[4, 5, 6]).unwrap();
        let c2 = e2.resolve(&[4, 5, 6]).unwrap();
        assert_eq!(c1, c2);
    }
}
