/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Pipeline-wide configuration.
//!
//! Per the design notes, all thresholds and salts that the original project
//! kept as module-level globals are threaded explicitly through this struct,
//! constructed once at start-up and validated before any stage runs.

use crate::error::ValidationError;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Maximum k supported by the fixed-width k-mer encoding (2 words of 64 bits,
/// 2 bits/base => 64 bases/word => 128 bases max; we cap lower to keep
/// minimizer/(k-1)-mer windows inside a single word pair comfortably).
pub const MAX_K: usize = 63;

/// Number of 64-bit words used to store a k-mer's 2-bit-packed encoding.
pub const KMER_WORDS: usize = 2;

/// A source's identifier in `[1, 2^21)`, dense and contiguous across a run.
pub const MAX_SOURCE_ID: u32 = 1 << 21;

/// Memory budget expressed either as an absolute byte count or as a number of
/// batch elements; mirrors how batched external-memory algorithms elsewhere
/// in the ecosystem size their in-core buffers.
#[derive(Clone, Copy, Debug)]
pub enum MemoryBudget {
    /// A soft cap in bytes on simultaneously resident subgraph hash tables.
    Bytes(usize),
    /// No cap: size hash tables purely from HyperLogLog estimates + slack.
    Unrestricted,
}

impl Default for MemoryBudget {
    /// Half of physical RAM, matching a common batched external-memory
    /// default; falls back to 8 GiB if the system's memory can't be probed.
    fn default() -> Self {
        let system = sysinfo::System::new_with_specifics(
            sysinfo::RefreshKind::nothing().with_memory(sysinfo::MemoryRefreshKind::nothing().with_ram()),
        );
        let total = system.total_memory();
        if total == 0 {
            return MemoryBudget::Bytes(8usize << 30);
        }
        MemoryBudget::Bytes((total / 2) as usize)
    }
}

/// Top-level, validated configuration for a `build` run.
#[derive(Clone, Debug)]
pub struct Config {
    /// k-mer length. Must be odd, 3..=[`MAX_K`].
    pub k: usize,
    /// Minimizer length. Must be <= k and <= 32.
    pub l: usize,
    /// Number of subgraph buckets, a power of two.
    pub num_subgraphs: usize,
    /// Number of atlases; `graphs_per_atlas = num_subgraphs / num_atlases`.
    pub num_atlases: usize,
    /// Number of vertex partitions used by the edge matrix, a power of two.
    pub num_partitions: usize,
    /// Total worker parallelism target.
    pub num_threads: usize,
    /// Dedicated reader threads, in `2..=4`.
    pub num_readers: usize,
    /// Whether to run the color engine.
    pub colored: bool,
    /// Soft/strict memory budget for subgraph hash tables.
    pub memory_budget: MemoryBudget,
    /// Whether `memory_budget` is a strict (hard) cap rather than advisory.
    pub strict_memory: bool,
    /// Scratch directory for atlas buckets, the edge matrix, path-info
    /// buckets, diagonal-chain files, and color repositories.
    pub working_dir: PathBuf,
    /// Output prefix for the unitigs file and (if colored) the colors file.
    pub output_prefix: PathBuf,
    /// Per-worker local super-k-mer buffer size in bytes, before merging into
    /// an atlas's shared buffer.
    pub worker_buffer_bytes: usize,
    /// Bytes of input consumed per reader batch in colored mode (batch
    /// boundaries drive the source-id-sorted collation of pending
    /// super-k-mers).
    pub bytes_per_batch: usize,
    /// Random 64-bit seed mixed into every hash (minimizer, k-mer, vertex
    /// partitioning, color-set hashing) so that repeated runs over the same
    /// input with the same seed are reproducible.
    pub seed: u64,
}

impl Config {
    /// Builds and validates a configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        k: usize,
        l: usize,
        num_subgraphs: usize,
        num_atlases: usize,
        num_partitions: usize,
        num_threads: usize,
        num_readers: usize,
        colored: bool,
        memory_budget: MemoryBudget,
        strict_memory: bool,
        working_dir: PathBuf,
        output_prefix: PathBuf,
        seed: u64,
    ) -> Result<Self, ValidationError> {
        let cfg = Config {
            k,
            l,
            num_subgraphs,
            num_atlases,
            num_partitions,
            num_threads,
            num_readers,
            colored,
            memory_budget,
            strict_memory,
            working_dir,
            output_prefix,
            worker_buffer_bytes: 1 << 20,
            bytes_per_batch: 64 << 20,
            seed,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.k % 2 == 0 {
            return Err(ValidationError::EvenK(self.k));
        }
        if self.k > MAX_K {
            return Err(ValidationError::KTooLarge {
                k: self.k,
                max: MAX_K,
            });
        }
        if self.l > 32 {
            return Err(ValidationError::LTooLarge32(self.l));
        }
        if self.l > self.k {
            return Err(ValidationError::LTooLarge {
                l: self.l,
                k: self.k,
            });
        }
        if !self.num_subgraphs.is_power_of_two() {
            return Err(ValidationError::GNotPowerOfTwo(self.num_subgraphs));
        }
        if !self.num_partitions.is_power_of_two() {
            return Err(ValidationError::GNotPowerOfTwo(self.num_partitions));
        }
        if self.num_atlases == 0
            || self.num_atlases > self.num_subgraphs
            || self.num_subgraphs % self.num_atlases != 0
            || !(self.num_subgraphs / self.num_atlases).is_power_of_two()
        {
            return Err(ValidationError::AtlasCountInvalid {
                num_atlases: self.num_atlases,
                num_subgraphs: self.num_subgraphs,
            });
        }
        if !(2..=4).contains(&self.num_readers) {
            return Err(ValidationError::ThreadCountOutOfRange(
                self.num_readers,
                2,
                4,
            ));
        }
        if self.num_threads == 0 {
            return Err(ValidationError::ThreadCountOutOfRange(
                self.num_threads,
                1,
                usize::MAX,
            ));
        }
        if self.strict_memory && matches!(self.memory_budget, MemoryBudget::Unrestricted) {
            return Err(ValidationError::ConflictingMemoryBound);
        }
        Ok(())
    }

    /// `graphs_per_atlas(g) = num_subgraphs / num_atlases`.
    pub fn graphs_per_atlas(&self) -> usize {
        self.num_subgraphs / self.num_atlases
    }

    /// `atlas_id(g) = g >> log2(graphs_per_atlas)`.
    pub fn atlas_id(&self, g: usize) -> usize {
        g >> self.graphs_per_atlas().trailing_zeros()
    }

    /// `graph_id(g) = g & (graphs_per_atlas - 1)`.
    pub fn graph_id(&self, g: usize) -> usize {
        g & (self.graphs_per_atlas() - 1)
    }

    /// Worker pool size `N - R`.
    pub fn num_workers(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.num_threads.saturating_sub(self.num_readers).max(1))
            .expect("at least one worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(k: usize, l: usize) -> Config {
        Config {
            k,
            l,
            num_subgraphs: 16,
            num_atlases: 4,
            num_partitions: 8,
            num_threads: 4,
            num_readers: 2,
            colored: false,
            memory_budget: MemoryBudget::default(),
            strict_memory: false,
            working_dir: PathBuf::from("/tmp"),
            output_prefix: PathBuf::from("/tmp/out"),
            worker_buffer_bytes: 1 << 20,
            bytes_per_batch: 1 << 20,
            seed: 0,
        }
    }

    #[test]
    fn rejects_even_k() {
        assert!(matches!(
            base(4, 3).validate(),
            Err(ValidationError::EvenK(4))
        ));
    }

    #[test]
    fn rejects_l_greater_than_k() {
        assert!(matches!(
            base(5, 7).validate(),
            Err(ValidationError::LTooLarge { .. })
        ));
    }

    #[test]
    fn accepts_sane_config() {
        assert!(base(31, 13).validate().is_ok());
    }

    #[test]
    fn rejects_atlas_count_that_does_not_divide_subgraphs_into_a_power_of_two() {
        let mut cfg = base(31, 13);
        cfg.num_subgraphs = 64;
        cfg.num_atlases = 10;
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::AtlasCountInvalid { .. })
        ));
    }

    #[test]
    fn rejects_single_reader() {
        let mut cfg = base(31, 13);
        cfg.num_readers = 1;
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::ThreadCountOutOfRange(1, 2, 4))
        ));
    }

    #[test]
    fn atlas_addressing() {
        let cfg = base(21, 11);
        // graphs_per_atlas = 16/4 = 4
        assert_eq!(cfg.graphs_per_atlas(), 4);
        assert_eq!(cfg.atlas_id(5), 1);
        assert_eq!(cfg.graph_id(5), 1);
        assert_eq!(cfg.atlas_id(0), 0);
        assert_eq!(cfg.atlas_id(15), 3);
    }
}
