/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Atlas buckets: the append-only external-memory shards that the
//! partitioner's worker pool writes super-k-mers into, and that the
//! subgraph engine later reads back one subgraph at a time.
//!
//! A worker accumulates records in a thread-local buffer and periodically
//! merges it into the bucket's shared buffer under a short lock (the
//! chunk-lock). When the shared buffer crosses its capacity, the worker that
//! observed this swaps it out for an empty one and flushes the full buffer to
//! disk under a second lock (the flush-lock), so that writers blocked only on
//! the chunk-lock can keep accumulating into the new shared buffer while the
//! flush runs.

use crate::mmap_helper::MappedBucket;
use anyhow::{Context, Result};
use log::debug;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One subgraph's append-only shard within an atlas.
pub struct AtlasBucket {
    path: PathBuf,
    shared: Mutex<Vec<u8>>,
    flush: Mutex<()>,
    flush_threshold: usize,
}

impl AtlasBucket {
    pub fn new(path: impl Into<PathBuf>, flush_threshold: usize) -> Self {
        AtlasBucket {
            path: path.into(),
            shared: Mutex::new(Vec::with_capacity(flush_threshold)),
            flush: Mutex::new(()),
            flush_threshold,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merges a worker-local buffer into the shared buffer, flushing to disk
    /// if this merge pushes the shared buffer past its threshold. Returns
    /// without blocking other writers past the short chunk-lock hold, except
    /// for the one worker that happens to trigger the flush.
    pub fn merge(&self, local: &[u8]) -> Result<()> {
        if local.is_empty() {
            return Ok(());
        }
        let to_flush = {
            let mut shared = self.shared.lock().unwrap();
            shared.extend_from_slice(local);
            if shared.len() >= self.flush_threshold {
                Some(std::mem::replace(
                    &mut *shared,
                    Vec::with_capacity(self.flush_threshold),
                ))
            } else {
                None
            }
        };
        if let Some(buf) = to_flush {
            self.flush_buffer(&buf)?;
        }
        Ok(())
    }

    fn flush_buffer(&self, buf: &[u8]) -> Result<()> {
        let _guard = self.flush.lock().unwrap();
        let start = std::time::Instant::now();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open bucket {} for append", self.path.display()))?;
        f.write_all(buf)
            .with_context(|| format!("Cannot flush bucket {}", self.path.display()))?;
        debug!("flushed {} bytes to {} in {:?}", buf.len(), self.path.display(), start.elapsed());
        Ok(())
    }

    /// Flushes whatever remains in the shared buffer. Must be called once all
    /// writers for this bucket have finished, before the bucket is read back.
    pub fn finalize(&self) -> Result<()> {
        let remaining = {
            let mut shared = self.shared.lock().unwrap();
            std::mem::take(&mut *shared)
        };
        if !remaining.is_empty() {
            self.flush_buffer(&remaining)?;
        }
        Ok(())
    }

    /// Memory-maps the flushed bucket file for sequential reading. Call only
    /// after [`finalize`](Self::finalize).
    pub fn open_for_read(&self) -> Result<MappedBucket> {
        MappedBucket::open(&self.path)
    }

    /// Removes the bucket's backing file, once its contents have been fully
    /// consumed downstream (e.g. by the contractor after reading a column).
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Cannot remove bucket {}", self.path.display())),
        }
    }
}

/// An atlas: the `G` subgraph buckets grouped together so that a single
/// atlas's worth of partitioner output is visited as a unit (one directory
/// on disk, matching the persisted-state layout of `working_dir/atlas_<id>/`).
pub struct Atlas {
    id: usize,
    buckets: Vec<AtlasBucket>,
}

impl Atlas {
    /// Creates an atlas with `graphs_per_atlas` buckets rooted at
    /// `dir/atlas_<id>/G_<g>`.
    pub fn create(dir: &Path, id: usize, graphs_per_atlas: usize, flush_threshold: usize) -> Result<Self> {
        let atlas_dir = dir.join(format!("atlas_{id}"));
        std::fs::create_dir_all(&atlas_dir)
            .with_context(|| format!("Cannot create atlas directory {}", atlas_dir.display()))?;
        let buckets = (0..graphs_per_atlas)
            .map(|g| AtlasBucket::new(atlas_dir.join(format!("G_{g}")), flush_threshold))
            .collect();
        Ok(Atlas { id, buckets })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn bucket(&self, graph_id: usize) -> &AtlasBucket {
        &self.buckets[graph_id]
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn finalize_all(&self) -> Result<()> {
        for bucket in &self.buckets {
            bucket.finalize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn merge_and_finalize_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = AtlasBucket::new(dir.path().join("b0"), 16);
        bucket.merge(b"abcd").unwrap();
        bucket.merge(b"efgh").unwrap();
        bucket.finalize().unwrap();
        let mapped = bucket.open_for_read().unwrap();
        assert_eq!(mapped.as_bytes(), b"abcdefgh");
    }

    #[test]
    fn flush_triggers_at_threshold_and_later_merges_still_land() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = AtlasBucket::new(dir.path().join("b0"), 4);
        bucket.merge(b"aaaa").unwrap(); // crosses threshold, flushes
        bucket.merge(b"bb").unwrap(); // stays buffered
        bucket.finalize().unwrap();
        let mapped = bucket.open_for_read().unwrap();
        assert_eq!(mapped.as_bytes(), b"aaaabb");
    }

    #[test]
    fn concurrent_writers_do_not_lose_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = std::sync::Arc::new(AtlasBucket::new(dir.path().join("b0"), 64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = bucket.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        bucket.merge(b"x").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        bucket.finalize().unwrap();
        let mapped = bucket.open_for_read().unwrap();
        assert_eq!(mapped.len(), 800);
    }

    #[test]
    fn atlas_creates_addressed_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let atlas = Atlas::create(dir.path(), 3, 4, 1024).unwrap();
        assert_eq!(atlas.id(), 3);
        assert_eq!(atlas.len(), 4);
        atlas.bucket(2).merge(b"hi").unwrap();
        atlas.finalize_all().unwrap();
        assert!(dir.path().join("atlas_3").join("G_2").exists());
    }
}
