/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Orchestrates the full compaction run: partitioner, per-bucket subgraph
//! engine, contractor, expander, collator, and (in colored mode) the color
//! engine, driven once over a [`Config`] and a [`RecordSource`].

use anyhow::{Context, Result};
use dbgc_core::bucket::Atlas;
use dbgc_core::config::Config;
use dbgc_core::edge_matrix::EdgeMatrix;
use dbgc_core::fragment::RecordSource;
use dbgc_core::lmtig::{LmTigReader, LmTigWriter};
use dbgc_core::superkmer::SuperKmerRecord;
use log::info;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::collator::{Collator, UnitigSink};
use crate::color_engine::{
    bucket_ambient_sources, decode_color_set, find_color_shift_vertices, hash_color_set,
    ColorEngine, ColorRepository,
};
use crate::contractor::{run_contractor, ContractorStats};
use crate::expander::{bucket_path_info, run_expander, ExpanderStats};
use crate::partitioner::{Partitioner, PartitionerStats};
use crate::subgraph::{build_vertex_table, SubgraphEngine, SubgraphStats};
use dbgc_core::color::ColorTable;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    pub partitioner: PartitionerStats,
    pub subgraph: SubgraphStats,
    pub contractor: ContractorStats,
    pub expander: ExpanderStats,
    pub unitigs_written: usize,
    pub color_shift_vertices: usize,
}

fn lmtig_dir(cfg: &Config) -> std::path::PathBuf {
    cfg.working_dir.join("lmtig")
}

fn colors_raw_path(cfg: &Config) -> std::path::PathBuf {
    cfg.working_dir.join("colors.raw")
}

/// Decodes every record flushed to one subgraph bucket's atlas file.
fn read_bucket_records(atlas: &Atlas, graph_id: usize) -> Result<Vec<SuperKmerRecord>> {
    let bucket = atlas.bucket(graph_id);
    let mapped = bucket.open_for_read().context("mapping subgraph bucket for read")?;
    let mut reader = mapped.reader();
    let mut records = Vec::new();
    while let Some(record) = SuperKmerRecord::read_from(&mut reader)? {
        records.push(record);
    }
    Ok(records)
}

/// Runs stage (a) then, bucket by bucket, stage (b): folds each subgraph's
/// super-k-mers into a vertex table, walks its unitigs, and (in colored
/// mode) resolves every color-shift vertex it contains plus a bucket-wide
/// ambient color-set used to fill vertices a shift never touched. Returns
/// the shared edge matrix stage (c)/(d) need next, the resolved color
/// table/repository (colored mode only, for the final remapping pass), the
/// highest source id observed, plus accumulated stats.
#[allow(clippy::type_complexity)]
fn run_partition_and_subgraphs(
    cfg: &Config,
    source: &mut dyn RecordSource,
    sink: &UnitigSink,
) -> Result<(
    EdgeMatrix,
    PartitionerStats,
    SubgraphStats,
    usize,
    Option<ColorTable>,
    Option<ColorRepository>,
    u32,
)> {
    let atlases: Vec<Atlas> = (0..cfg.num_atlases)
        .map(|id| Atlas::create(&cfg.working_dir, id, cfg.graphs_per_atlas(), cfg.worker_buffer_bytes))
        .collect::<Result<_>>()
        .context("creating atlases")?;

    let mut partitioner = Partitioner::new(cfg, &atlases);
    let partitioner_stats = partitioner.run(source).context("running partitioner")?;

    let matrix = EdgeMatrix::create(&cfg.working_dir.join("edges"), cfg.num_partitions, cfg.worker_buffer_bytes)
        .context("creating edge matrix")?;

    let color_table = cfg.colored.then(ColorTable::new);
    let color_repo = cfg.colored.then(|| ColorRepository::create(&cfg.working_dir, 0));

    // One bucket's worth of work: read its atlas shard, optionally resolve
    // its color shifts and ambient color, then walk its unitigs. Buckets are
    // independent of each other (their own vertex table, lm-tig files, and
    // atlas shard), so the worker pool below runs them with work-stealing
    // across `cfg.num_workers()` threads; the shared edge matrix, sink, and
    // color table/repository each guard their own internal state.
    let process_bucket = |g: usize| -> Result<(SubgraphStats, usize, u32)> {
        let atlas_idx = cfg.atlas_id(g);
        let graph_idx = cfg.graph_id(g);
        let records = read_bucket_records(&atlases[atlas_idx], graph_idx)?;

        let mut table = build_vertex_table(&records, cfg)?;

        let mut color_shift_vertices = 0usize;
        let mut num_sources = 0u32;
        let ambient_hash = if cfg.colored {
            let color_table = color_table.as_ref().expect("colored config seeds a color table");
            let repo = color_repo.as_ref().expect("colored config seeds a color repository");
            let engine = ColorEngine::new(color_table, repo, g as u32, cfg.seed);

            for record in &records {
                if let Some(id) = record.source_id {
                    num_sources = num_sources.max(id + 1);
                }
            }

            let shifts = find_color_shift_vertices(&records, cfg.k);
            for shift in &shifts {
                let hash = hash_color_set(&shift.source_ids, cfg.seed);
                engine.resolve(&shift.source_ids)?;
                table.set_color_hash(&shift.vertex, hash)?;
            }
            color_shift_vertices += shifts.len();

            let ambient_sources = bucket_ambient_sources(&records);
            if ambient_sources.is_empty() {
                None
            } else {
                let hash = hash_color_set(&ambient_sources, cfg.seed);
                engine.resolve(&ambient_sources)?;
                Some(hash)
            }
        } else {
            None
        };

        let mut writer = LmTigWriter::create(&lmtig_dir(cfg), g)?;
        let engine = SubgraphEngine::new(cfg, &matrix, sink, g as u32, ambient_hash);
        let stats = engine.run(&mut table, &mut writer)?;

        atlases[atlas_idx].bucket(graph_idx).remove()?;

        Ok((stats, color_shift_vertices, num_sources))
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.num_workers().get())
        .build()
        .context("building subgraph worker pool")?;
    let bucket_results: Vec<(SubgraphStats, usize, u32)> =
        pool.install(|| (0..cfg.num_subgraphs).into_par_iter().map(process_bucket).collect::<Result<Vec<_>>>())?;

    let mut subgraph_stats = SubgraphStats::default();
    let mut color_shift_vertices = 0usize;
    let mut num_sources = 0u32;
    for (stats, shifts, sources) in bucket_results {
        subgraph_stats.vertices += stats.vertices;
        subgraph_stats.trivial_unitigs += stats.trivial_unitigs;
        subgraph_stats.lm_tigs += stats.lm_tigs;
        subgraph_stats.discontinuity_edges += stats.discontinuity_edges;
        subgraph_stats.cycles += stats.cycles;
        subgraph_stats.isolated_palindromes += stats.isolated_palindromes;
        color_shift_vertices += shifts;
        num_sources = num_sources.max(sources);
    }

    if let Some(repo) = &color_repo {
        repo.finalize()?;
    }

    Ok((
        matrix,
        partitioner_stats,
        subgraph_stats,
        color_shift_vertices,
        color_table,
        color_repo,
        num_sources,
    ))
}

/// Remaps the raw per-vertex color-hash stream every bucket appended to
/// `sink`'s colors writer into dense color-set ids, and writes the colors
/// file: a small header (source count, distinct color-set count) followed by
/// one packed membership bit-vector per distinct color-set, in ascending
/// hash order.
fn write_color_outputs(cfg: &Config, color_table: &ColorTable, color_repo: &ColorRepository, num_sources: u32) -> Result<()> {
    let snapshot = color_repo.snapshot();
    let mut entries = color_table.ready_entries();
    entries.sort_by_key(|(hash, _)| *hash);
    let id_of: HashMap<u64, u32> = entries
        .iter()
        .enumerate()
        .map(|(i, (hash, _))| (*hash, i as u32))
        .collect();

    let colors_path = cfg.output_prefix.with_extension("colors");
    let mut writer = BufWriter::new(
        File::create(&colors_path).with_context(|| format!("creating {}", colors_path.display()))?,
    );
    writer.write_all(&num_sources.to_le_bytes())?;
    writer.write_all(&(entries.len() as u32).to_le_bytes())?;
    let bytes_per_set = (num_sources as usize).div_ceil(8).max(1);
    for (_, offset) in &entries {
        let source_ids = decode_color_set(&snapshot, *offset);
        let mut bitvec = vec![0u8; bytes_per_set];
        for id in source_ids {
            bitvec[id as usize / 8] |= 1 << (id as usize % 8);
        }
        writer.write_all(&bitvec)?;
    }
    writer.flush().context("flushing colors file")?;

    let raw_path = colors_raw_path(cfg);
    let raw_bytes = std::fs::read(&raw_path)
        .with_context(|| format!("reading {}", raw_path.display()))?;
    let colorids_path = cfg.output_prefix.with_extension("colorids");
    let mut ids_writer = BufWriter::new(
        File::create(&colorids_path).with_context(|| format!("creating {}", colorids_path.display()))?,
    );
    for chunk in raw_bytes.chunks_exact(8) {
        let hash = u64::from_le_bytes(chunk.try_into().unwrap());
        let id = id_of.get(&hash).copied().unwrap_or(0);
        ids_writer.write_all(&id.to_le_bytes())?;
    }
    ids_writer.flush().context("flushing color-id stream")?;
    std::fs::remove_file(&raw_path).ok();
    Ok(())
}

/// Runs the full pipeline end to end, writing the unitigs file at
/// `cfg.output_prefix` with a `.fasta` suffix.
pub fn run_pipeline(cfg: &Config, source: &mut dyn RecordSource) -> Result<PipelineStats> {
    std::fs::create_dir_all(&cfg.working_dir).context("creating working directory")?;
    let output_path = cfg.output_prefix.with_extension("fasta");
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).context("creating output directory")?;
    }
    let out_file = File::create(&output_path)
        .with_context(|| format!("truncating output file {}", output_path.display()))?;
    let sink = if cfg.colored {
        let colors_raw = File::create(colors_raw_path(cfg))
            .context("creating raw color-hash stream")?;
        UnitigSink::with_colors(Box::new(BufWriter::new(out_file)), Box::new(BufWriter::new(colors_raw)))
    } else {
        UnitigSink::new(Box::new(BufWriter::new(out_file)))
    };

    let (matrix, partitioner_stats, subgraph_stats, color_shift_vertices, color_table, color_repo, num_sources) =
        run_partition_and_subgraphs(cfg, source, &sink)?;
    info!(
        "partitioned {} fragments into {} super-k-mers",
        partitioner_stats.fragments, partitioner_stats.super_kmers
    );

    let (contractor_resolved, meta_vertices, contractor_stats) = run_contractor(cfg, &matrix)?;
    info!(
        "contractor processed {} columns, {} meta-vertices",
        contractor_stats.columns_processed, contractor_stats.meta_vertices
    );

    let (resolved, expander_stats) = run_expander(cfg, &meta_vertices, &contractor_resolved)?;
    info!(
        "expander settled {} partitions, broke {} cycles",
        expander_stats.partitions_processed, expander_stats.cycles_broken
    );

    let collator = Collator::new(&sink, cfg.k);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.num_workers().get())
        .build()
        .context("building collator worker pool")?;
    let per_bucket_written: Vec<usize> = pool.install(|| {
        (0..cfg.num_subgraphs)
            .into_par_iter()
            .map(|g| -> Result<usize> {
                let reader = LmTigReader::open(&lmtig_dir(cfg), g)?;
                if reader.is_empty() {
                    return Ok(0);
                }
                let path_info = bucket_path_info(&resolved, g, reader.len());
                collator.collate_bucket(&reader, &path_info, cfg.colored)
            })
            .collect::<Result<Vec<_>>>()
    })?;
    let unitigs_written: usize = per_bucket_written.iter().sum();

    if let (Some(table), Some(repo)) = (&color_table, &color_repo) {
        sink.flush().context("flushing unitig sink before color remapping")?;
        write_color_outputs(cfg, table, repo, num_sources)?;
    }

    Ok(PipelineStats {
        partitioner: partitioner_stats,
        subgraph: subgraph_stats,
        contractor: contractor_stats,
        expander: expander_stats,
        unitigs_written,
        color_shift_vertices,
    })
}
