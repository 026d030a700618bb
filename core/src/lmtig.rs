/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! lm-tig storage: one append-only file of concatenated ASCII nucleotide
//! sequences per subgraph bucket, with a parallel fixed-width length file so
//! that any lm-tig can be located by its index without scanning.

use crate::mmap_helper::MappedBucket;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends lm-tig sequences for one subgraph bucket.
pub struct LmTigWriter {
    sequences_path: PathBuf,
    lengths_path: PathBuf,
    colors_path: PathBuf,
    sequences: std::fs::File,
    lengths: std::fs::File,
    colors: Option<std::fs::File>,
    count: usize,
}

impl LmTigWriter {
    pub fn create(dir: &Path, bucket: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create lm-tig directory {}", dir.display()))?;
        let sequences_path = dir.join(format!("lmtig_{bucket}.seq"));
        let lengths_path = dir.join(format!("lmtig_{bucket}.len"));
        let colors_path = dir.join(format!("lmtig_{bucket}.col"));
        let sequences = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&sequences_path)
            .with_context(|| format!("Cannot create {}", sequences_path.display()))?;
        let lengths = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lengths_path)
            .with_context(|| format!("Cannot create {}", lengths_path.display()))?;
        Ok(LmTigWriter {
            sequences_path,
            lengths_path,
            colors_path,
            sequences,
            lengths,
            colors: None,
            count: 0,
        })
    }

    /// Appends one lm-tig, returning its intra-bucket index.
    pub fn append(&mut self, ascii_sequence: &[u8]) -> Result<usize> {
        self.sequences
            .write_all(ascii_sequence)
            .with_context(|| format!("writing {}", self.sequences_path.display()))?;
        self.lengths
            .write_all(&(ascii_sequence.len() as u32).to_le_bytes())
            .with_context(|| format!("writing {}", self.lengths_path.display()))?;
        let idx = self.count;
        self.count += 1;
        Ok(idx)
    }

    /// Appends the per-vertex color hashes for the lm-tig most recently
    /// written by [`append`](Self::append). Must be called at most once per
    /// `append`, in the same order, only in colored mode; the `.col` file is
    /// created lazily on first use and is absent entirely when this is never
    /// called, which [`LmTigReader::colors`] treats as "no color stream".
    pub fn append_colors(&mut self, vertex_colors: &[u64]) -> Result<()> {
        if self.colors.is_none() {
            self.colors = Some(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&self.colors_path)
                    .with_context(|| format!("Cannot create {}", self.colors_path.display()))?,
            );
        }
        let file = self.colors.as_mut().expect("just ensured present");
        for hash in vertex_colors {
            file.write_all(&hash.to_le_bytes())
                .with_context(|| format!("writing {}", self.colors_path.display()))?;
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Reads back a bucket's lm-tigs by index, given the files an
/// [`LmTigWriter`] produced.
pub struct LmTigReader {
    sequences: MappedBucket,
    /// Byte offset into `sequences` where each lm-tig starts, plus a
    /// trailing sentinel equal to the total length.
    offsets: Vec<usize>,
    colors: Option<MappedBucket>,
}

impl LmTigReader {
    pub fn open(dir: &Path, bucket: usize) -> Result<Self> {
        let sequences_path = dir.join(format!("lmtig_{bucket}.seq"));
        let lengths_path = dir.join(format!("lmtig_{bucket}.len"));
        let colors_path = dir.join(format!("lmtig_{bucket}.col"));
        let sequences = MappedBucket::open(&sequences_path)?;
        let lengths = MappedBucket::open(&lengths_path)?;
        let lengths_bytes = lengths.as_bytes();
        let mut offsets = Vec::with_capacity(lengths_bytes.len() / 4 + 1);
        let mut cursor = 0usize;
        offsets.push(0);
        for chunk in lengths_bytes.chunks_exact(4) {
            let len = u32::from_le_bytes(chunk.try_into().unwrap()) as usize;
            cursor += len;
            offsets.push(cursor);
        }
        let colors = colors_path.is_file().then(|| MappedBucket::open(&colors_path)).transpose()?;
        Ok(LmTigReader { sequences, offsets, colors })
    }

    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(index)?;
        let end = *self.offsets.get(index + 1)?;
        Some(&self.sequences.as_bytes()[start..end])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.len()).map(move |i| self.get(i).unwrap())
    }

    /// Returns lm-tig `index`'s per-vertex color hashes, one per k-mer in
    /// its sequence, if this bucket was written in colored mode (`None`
    /// otherwise). `k` converts each entry's byte length into a vertex
    /// count, since the color stream carries no length prefixes of its own.
    pub fn colors(&self, index: usize, k: usize) -> Option<Vec<u64>> {
        let colors = self.colors.as_ref()?;
        let bytes = colors.as_bytes();
        let mut cursor = 0usize;
        for i in 0..index {
            let len = self.get(i)?.len();
            cursor += len.saturating_sub(k - 1) * 8;
        }
        let len = self.get(index)?.len();
        let vertex_count = len.saturating_sub(k - 1);
        let mut out = Vec::with_capacity(vertex_count);
        for i in 0..vertex_count {
            let start = cursor + i * 8;
            out.push(u64::from_le_bytes(bytes.get(start..start + 8)?.try_into().ok()?));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LmTigWriter::create(dir.path(), 0).unwrap();
        let idx0 = writer.append(b"ACGTACGT").unwrap();
        let idx1 = writer.append(b"TTTT").unwrap();
        assert_eq!((idx0, idx1), (0, 1));
        drop(writer);

        let reader = LmTigReader::open(dir.path(), 0).unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get(0), Some(&b"ACGTACGT"[..]));
        assert_eq!(reader.get(1), Some(&b"TTTT"[..]));
        assert_eq!(reader.get(2), None);
    }

    #[test]
    fn empty_bucket_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let _writer = LmTigWriter::create(dir.path(), 3).unwrap();
        let reader = LmTigReader::open(dir.path(), 3).unwrap();
        assert!(reader.is_empty());
    }
}
