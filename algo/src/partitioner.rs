/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Stage (a): streams records, extracts super-(k-1)-mers bounded by
//! minimizer changes, and routes each as a super-k-mer record into one of
//! `G` subgraph buckets.

use anyhow::{Context, Result};
use dbgc_core::bucket::Atlas;
use dbgc_core::config::Config;
use dbgc_core::fragment::{admissible_fragments, Record, RecordSource};
use dbgc_core::kmer::Base;
use dbgc_core::minimizer::{ascii_to_bases, subgraph_of, MinimizerScanner};
use dbgc_core::superkmer::{SuperKmerFlags, SuperKmerRecord};
use log::trace;

#[derive(Clone, Copy, Debug, Default)]
pub struct PartitionerStats {
    pub fragments: usize,
    pub super_kmers: usize,
}

struct Run {
    /// Index of the first minimizer window belonging to this run.
    window_start: usize,
    /// Index of the last minimizer window belonging to this run (inclusive).
    window_end: usize,
    subgraph: usize,
}

/// Groups a fragment's per-window minimizer subgraph ids into maximal runs,
/// splitting both on a subgraph change and on the maximum super-(k-1)-mer
/// length `k - l` windows.
fn group_runs(subgraphs: &[usize], max_windows: usize) -> Vec<Run> {
    let mut runs = Vec::new();
    if subgraphs.is_empty() {
        return runs;
    }
    let mut start = 0usize;
    let mut cur = subgraphs[0];
    for i in 1..subgraphs.len() {
        let run_len = i - start;
        if subgraphs[i] != cur || run_len >= max_windows {
            runs.push(Run {
                window_start: start,
                window_end: i - 1,
                subgraph: cur,
            });
            start = i;
            cur = subgraphs[i];
        }
    }
    runs.push(Run {
        window_start: start,
        window_end: subgraphs.len() - 1,
        subgraph: cur,
    });
    runs
}

/// Extracts every super-k-mer record from one admissible fragment and calls
/// `emit(subgraph_id, record)` for each. `source_id` is attached when
/// coloring is enabled.
pub fn fragment_super_kmers(
    bases: &[Base],
    cfg: &Config,
    source_id: Option<u32>,
    mut emit: impl FnMut(usize, SuperKmerRecord) -> Result<()>,
) -> Result<usize> {
    let w = cfg.k - 1;
    if bases.len() < w {
        return Ok(0);
    }
    let scanner = MinimizerScanner::new(bases, cfg.l, w, cfg.seed);
    let instances: Vec<_> = scanner.collect();
    let subgraphs: Vec<usize> = instances
        .iter()
        .map(|inst| subgraph_of(inst.hash, cfg.num_subgraphs))
        .collect();
    let max_windows = cfg.k.saturating_sub(cfg.l).max(1);
    let runs = group_runs(&subgraphs, max_windows);

    let mut emitted = 0;
    for (idx, run) in runs.iter().enumerate() {
        let l_joined = idx > 0;
        let r_joined = idx + 1 < runs.len();
        let l_disc = l_joined && runs[idx - 1].subgraph != run.subgraph;
        let r_disc = r_joined && runs[idx + 1].subgraph != run.subgraph;

        // window i covers bases [i, i + w); the run's own (k-1)-mer span is
        // [window_start, window_end + w).
        let span_start = run.window_start;
        let span_end = run.window_end + w;
        let seq_start = if l_joined { span_start - 1 } else { span_start };
        let seq_end = if r_joined {
            (span_end + 1).min(bases.len())
        } else {
            span_end
        };

        let mut flags = SuperKmerFlags::empty();
        flags.set(SuperKmerFlags::L_DISC, l_disc);
        flags.set(SuperKmerFlags::R_DISC, r_disc);
        flags.set(SuperKmerFlags::L_JOINED, l_joined);
        flags.set(SuperKmerFlags::R_JOINED, r_joined);

        let record = SuperKmerRecord {
            flags,
            source_id,
            bases: bases[seq_start..seq_end].to_vec(),
        };
        emit(run.subgraph, record)?;
        emitted += 1;
    }
    Ok(emitted)
}

/// Drives a [`RecordSource`] through fragment extraction and bucket routing.
///
/// In uncolored mode, every super-k-mer is flushed straight to its atlas
/// bucket as soon as it's produced. In colored mode, records are held in a
/// per-subgraph pending list and, once `bytes_per_batch` input bytes have
/// been consumed, each pending list is stably sorted by source id (a
/// counting sort over the batch's observed id range) before being flushed —
/// preserving the source-id monotonicity the color engine relies on.
pub struct Partitioner<'a> {
    cfg: &'a Config,
    atlases: &'a [Atlas],
    pending: Vec<Vec<(u32, Vec<u8>)>>,
    bytes_since_batch: usize,
    stats: PartitionerStats,
}

impl<'a> Partitioner<'a> {
    pub fn new(cfg: &'a Config, atlases: &'a [Atlas]) -> Self {
        let pending = if cfg.colored {
            vec![Vec::new(); cfg.num_subgraphs]
        } else {
            Vec::new()
        };
        Partitioner {
            cfg,
            atlases,
            pending,
            bytes_since_batch: 0,
            stats: PartitionerStats::default(),
        }
    }

    fn route(&self, g: usize, bytes: &[u8]) -> Result<()> {
        let atlas_idx = self.cfg.atlas_id(g);
        let graph_idx = self.cfg.graph_id(g);
        self.atlases[atlas_idx]
            .bucket(graph_idx)
            .merge(bytes)
            .with_context(|| format!("flushing subgraph {g}"))
    }

    fn ingest_record(&mut self, record: Record) -> Result<()> {
        let source_id = self.cfg.colored.then_some(record.source_id);
        let min_len = self.cfg.k + 1;
        let fragments: Vec<Vec<Base>> = admissible_fragments(&record.sequence, min_len)
            .map(|frag| ascii_to_bases(frag).expect("admissible fragment is placeholder-free"))
            .collect();
        self.bytes_since_batch += record.sequence.len();
        for bases in &fragments {
            self.stats.fragments += 1;
            let cfg = self.cfg;
            if self.cfg.colored {
                let mut pending_g = Vec::new();
                fragment_super_kmers(bases, cfg, source_id, |g, rec| {
                    let mut buf = Vec::new();
                    rec.write_to(&mut buf)?;
                    pending_g.push((g, record.source_id, buf));
                    Ok(())
                })?;
                self.stats.super_kmers += pending_g.len();
                for (g, src, buf) in pending_g {
                    self.pending[g].push((src, buf));
                }
            } else {
                let mut count = 0;
                fragment_super_kmers(bases, cfg, None, |g, rec| {
                    let mut buf = Vec::new();
                    rec.write_to(&mut buf)?;
                    self.route(g, &buf)?;
                    count += 1;
                    Ok(())
                })?;
                self.stats.super_kmers += count;
            }
        }
        if self.cfg.colored && self.bytes_since_batch >= self.cfg.bytes_per_batch {
            self.flush_colored_batch()?;
            self.bytes_since_batch = 0;
        }
        Ok(())
    }

    fn flush_colored_batch(&mut self) -> Result<()> {
        for g in 0..self.pending.len() {
            if self.pending[g].is_empty() {
                continue;
            }
            self.pending[g].sort_by_key(|(src, _)| *src);
            let bytes: Vec<u8> = self.pending[g]
                .drain(..)
                .flat_map(|(_, b)| b)
                .collect();
            self.route(g, &bytes)?;
        }
        Ok(())
    }

    pub fn run(&mut self, source: &mut dyn RecordSource) -> Result<PartitionerStats> {
        while let Some(record) = source.next_record()? {
            trace!("partitioning record from source {}", record.source_id);
            self.ingest_record(record)?;
        }
        if self.cfg.colored {
            self.flush_colored_batch()?;
        }
        for atlas in self.atlases {
            atlas.finalize_all()?;
        }
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgc_core::config::{Config, MemoryBudget};
    use dbgc_core::fragment::VecRecordSource;
    use dbgc_core::superkmer::SuperKmerRecord;

    fn test_config(dir: &std::path::Path, colored: bool) -> Config {
        Config::new(
            5,
            3,
            4,
            1,
            4,
            2,
            2,
            colored,
            MemoryBudget::default(),
            false,
            dir.to_path_buf(),
            dir.join("out"),
            42,
        )
        .unwrap()
    }

    fn build_atlases(cfg: &Config, dir: &std::path::Path) -> Vec<Atlas> {
        (0..cfg.num_atlases)
            .map(|id| Atlas::create(dir, id, cfg.graphs_per_atlas(), 1 << 16).unwrap())
            .collect()
    }

    #[test]
    fn single_fragment_produces_at_least_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), false);
        let atlases = build_atlases(&cfg, dir.path());
        let mut partitioner = Partitioner::new(&cfg, &atlases);
        let mut source = VecRecordSource::new(vec![Record {
            source_id: 1,
            sequence: b"ACGTACGTACGTACGT".to_vec(),
        }]);
        let stats = partitioner.run(&mut source).unwrap();
        assert!(stats.fragments >= 1);
        assert!(stats.super_kmers >= 1);
    }

    #[test]
    fn short_fragment_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), false);
        let atlases = build_atlases(&cfg, dir.path());
        let mut partitioner = Partitioner::new(&cfg, &atlases);
        let mut source = VecRecordSource::new(vec![Record {
            source_id: 1,
            sequence: b"ACG".to_vec(),
        }]);
        let stats = partitioner.run(&mut source).unwrap();
        assert_eq!(stats.fragments, 0);
    }

    #[test]
    fn colored_mode_attaches_source_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), true);
        let atlases = build_atlases(&cfg, dir.path());
        let mut partitioner = Partitioner::new(&cfg, &atlases);
        let mut source = VecRecordSource::new(vec![Record {
            source_id: 7,
            sequence: b"ACGTACGTACGTACGT".to_vec(),
        }]);
        let stats = partitioner.run(&mut source).unwrap();
        assert!(stats.super_kmers >= 1);
        // Spot check: at least one bucket across the atlases has nonempty
        // bytes once flushed, and decoding yields the attached source id.
        let mut found_source = false;
        for atlas in &atlases {
            for g in 0..atlas.len() {
                let mapped = atlas.bucket(g).open_for_read().unwrap();
                let mut cursor = mapped.reader();
                while let Some(rec) = SuperKmerRecord::read_from(&mut cursor).unwrap() {
                    if rec.source_id == Some(7) {
                        found_source = true;
                    }
                }
            }
        }
        assert!(found_source);
    }

    #[test]
    fn group_runs_splits_on_subgraph_change() {
        let subgraphs = vec![0, 0, 0, 1, 1, 0];
        let runs = group_runs(&subgraphs, 100);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].subgraph, 0);
        assert_eq!(runs[1].subgraph, 1);
        assert_eq!(runs[2].subgraph, 0);
    }

    #[test]
    fn group_runs_splits_on_max_length() {
        let subgraphs = vec![0; 10];
        let runs = group_runs(&subgraphs, 4);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].window_end - runs[0].window_start + 1, 4);
    }
}
