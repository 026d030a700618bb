/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Read-only memory mapping of bucket files, so that bucket readers (the
//! subgraph engine loading its atlas shard, the contractor streaming an
//! edge-matrix column, the collator streaming an lm-tig file) do not pay for
//! an explicit read syscall per record.

use anyhow::{Context, Result};
use mmap_rs::{Mmap, MmapFlags, MmapOptions};
use std::path::Path;
use std::sync::Arc;

/// A clonable, read-only memory mapping of a bucket file.
#[derive(Clone)]
pub struct MappedBucket(Arc<Mmap>);

impl MappedBucket {
    /// Maps `path` read-only. An empty or missing file maps to an empty
    /// slice rather than an error, since a bucket that received no records is
    /// a normal outcome, not a failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let len = match path.metadata() {
            Ok(meta) => meta.len() as usize,
            Err(_) => 0,
        };
        if len == 0 {
            let empty = MmapOptions::new(0)
                .with_context(|| "Cannot create empty mapping")?
                .map()
                .with_context(|| "Cannot map empty region")?;
            return Ok(MappedBucket(Arc::new(empty)));
        }
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open bucket {}", path.display()))?;
        let mmap = unsafe {
            MmapOptions::new(len)
                .with_context(|| format!("Cannot initialize mmap of size {len}"))?
                .with_flags(MmapFlags::SEQUENTIAL)
                .with_file(&file, 0)
                .map()
                .with_context(|| format!("Cannot mmap {}", path.display()))?
        };
        Ok(MappedBucket(Arc::new(mmap)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A [`std::io::Read`]er over the mapped bytes, for sequential record
    /// deserialization.
    pub fn reader(&self) -> std::io::Cursor<&[u8]> {
        std::io::Cursor::new(self.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_written_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(b"hello world").unwrap();
        }
        let mapped = MappedBucket::open(&path).unwrap();
        assert_eq!(mapped.as_bytes(), b"hello world");
    }

    #[test]
    fn missing_file_maps_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        let mapped = MappedBucket::open(&path).unwrap();
        assert!(mapped.is_empty());
    }
}
