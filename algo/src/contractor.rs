/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Stage (c): eliminates degree-2 chains of discontinuity vertices column by
//! column, from the highest vertex partition down to the lowest, so that by
//! the time the expander walks partitions ascending, every remaining edge
//! directly connects a resolvable anchor to its neighbour.
//!
//! A discontinuity vertex always has exactly two boundary sides, so it is
//! touched by exactly two discontinuity edges over the matrix's lifetime
//! (possibly after earlier columns have already re-composed one of them).
//! Column `j`'s own diagonal cell and non-diagonal column hold every edge
//! whose higher-partition endpoint is `j`; processing them with a per-column
//! map lets every such vertex's two incidences meet exactly once, either
//! resolving it immediately (both far ends are the ϕ sentinel) or composing
//! its two edges into one, which is then handed onward.
//!
//! Composing a vertex away from future processing would otherwise lose its
//! own lm-tig's identity, so whichever incidence actually owned a
//! `(bucket, index)` address gets its original, still-weight-1 edge pushed
//! unchanged into `D_j`. The expander's reverse walk over `D_j` is what
//! eventually gives that vertex its own `PathInfo`, independent of whatever
//! composed chain carries its neighbours onward.

use anyhow::{Context, Result};
use dbgc_core::config::Config;
use dbgc_core::edge_matrix::{DiscontinuityEdge, EdgeMatrix, Endpoint};
use dbgc_core::hashtable::Side;
use dbgc_core::kmer::Kmer;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::path_info::{EdgePathInfo, MetaVertex, PathInfo};

#[derive(Clone, Copy, Debug, Default)]
pub struct ContractorStats {
    pub columns_processed: usize,
    pub meta_vertices: usize,
    pub resolved_edges: usize,
    pub deferred_edges: usize,
}

pub(crate) fn partition_of_endpoint(cfg: &Config, e: Endpoint) -> usize {
    match e {
        Endpoint::Phi => 0,
        Endpoint::Vertex { kmer, .. } => EdgeMatrix::partition_of(kmer.hash64(cfg.seed), cfg.num_partitions),
    }
}

/// One vertex's first-seen incidence within a column's processing, awaiting
/// its second (and, per the two-sides invariant, final) pairing.
#[derive(Clone, Copy)]
struct Pending {
    far: Endpoint,
    v_side: Side,
    weight: u32,
    bucket: u32,
    index: u32,
    /// Whether `(bucket, index)` actually addresses this vertex's own lm-tig
    /// (it was the owning `x` side of an original, weight-1 edge), as
    /// opposed to having been carried along from the far end of an edge
    /// this vertex merely neighbours. Only an owning incidence's own edge
    /// needs retiring into `D_j` when contraction hides this vertex behind
    /// a composed chain.
    owns: bool,
}

pub(crate) fn edge_orientation(v_side: Side) -> Side {
    if v_side == Side::Back {
        Side::Front
    } else {
        Side::Back
    }
}

fn deferred_path(working_dir: &Path, target_partition: usize) -> PathBuf {
    working_dir.join(format!("D_{target_partition}"))
}

fn append_deferred(working_dir: &Path, target_partition: usize, edge: &DiscontinuityEdge) -> Result<()> {
    let path = deferred_path(working_dir, target_partition);
    let mut buf = Vec::with_capacity(DiscontinuityEdge::ENCODED_LEN);
    edge.write_to(&mut buf);
    let existing = fs::read(&path).unwrap_or_default();
    let mut merged = existing;
    merged.extend_from_slice(&buf);
    fs::write(&path, merged).with_context(|| format!("writing {}", path.display()))
}

/// Reads every `D_<partition>` file's records, bucketed by the vertex
/// partition that will eventually resolve them: a mix of retired
/// original-owner edges (weight 1, needing `PathInfo` via `infer`) and
/// same-partition leftover chains that never escaped their own column.
pub fn read_all_deferred(working_dir: &Path, num_partitions: usize) -> Result<HashMap<usize, Vec<DiscontinuityEdge>>> {
    let mut by_partition: HashMap<usize, Vec<DiscontinuityEdge>> = HashMap::new();
    for j in 0..num_partitions {
        let path = deferred_path(working_dir, j);
        if !path.exists() {
            continue;
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let mut offset = 0;
        let mut edges = Vec::new();
        while offset < bytes.len() {
            let (edge, len) = DiscontinuityEdge::read_from(&bytes[offset..]);
            edges.push(edge);
            offset += len;
        }
        by_partition.insert(j, edges);
    }
    Ok(by_partition)
}

/// Composes `v`'s first and second incidences. Returns `Some((far0, far1,
/// weight))` when the pairing produces a new logical edge to carry onward,
/// or `None` when it closed a fully-resolved (both-ϕ) chain, in which case
/// `resolved` and `meta_vertices` already received the output.
///
/// Whichever of the two incidences actually owned its `(bucket, index)`
/// (see [`Pending::owns`]) has its original, still weight-1 edge pushed to
/// `retired` unchanged: `v` is about to disappear behind the composed far
/// ends, but its own lm-tig still needs a `PathInfo` once the expander
/// later resolves this vertex from one side or the other.
#[allow(clippy::too_many_arguments)]
fn observe(
    chain_map: &mut HashMap<Kmer, Pending>,
    v: Kmer,
    v_side: Side,
    far: Endpoint,
    weight: u32,
    bucket: u32,
    index: u32,
    owns: bool,
    resolved: &mut Vec<EdgePathInfo>,
    meta_vertices: &mut Vec<MetaVertex>,
    retired: &mut Vec<DiscontinuityEdge>,
) -> Option<(Endpoint, Endpoint, u32)> {
    match chain_map.remove(&v) {
        None => {
            chain_map.insert(
                v,
                Pending {
                    far,
                    v_side,
                    weight,
                    bucket,
                    index,
                    owns,
                },
            );
            None
        }
        Some(prev) => {
            if prev.far.is_phi() && far.is_phi() {
                let path_id = v;
                meta_vertices.push(MetaVertex {
                    vertex: v,
                    info: PathInfo {
                        path_id,
                        rank: 0,
                        orientation: Side::Front,
                        is_cycle: false,
                    },
                });
                resolved.push(EdgePathInfo {
                    bucket: prev.bucket as usize,
                    index: prev.index as usize,
                    info: PathInfo {
                        path_id,
                        rank: 0,
                        orientation: edge_orientation(prev.v_side),
                        is_cycle: false,
                    },
                });
                resolved.push(EdgePathInfo {
                    bucket: bucket as usize,
                    index: index as usize,
                    info: PathInfo {
                        path_id,
                        rank: 1,
                        orientation: edge_orientation(v_side),
                        is_cycle: false,
                    },
                });
                None
            } else {
                if prev.owns {
                    retired.push(DiscontinuityEdge {
                        x: Endpoint::Vertex { kmer: v, side: prev.v_side },
                        y: prev.far,
                        weight: 1,
                        bucket: prev.bucket,
                        index: prev.index,
                    });
                }
                if owns {
                    retired.push(DiscontinuityEdge {
                        x: Endpoint::Vertex { kmer: v, side: v_side },
                        y: far,
                        weight: 1,
                        bucket,
                        index,
                    });
                }
                Some((prev.far, far, prev.weight + weight))
            }
        }
    }
}

/// Processes one column, reading and removing its matrix cells, composing
/// chains through every vertex whose partition is `j`. A vertex with two
/// incidences in this column composes: both ϕ resolves immediately, a
/// same-partition far end re-queues for further composition within this same
/// column, anything else writes the composed edge straight back into the
/// matrix. A vertex with only one incidence here has no partner to compose
/// with — column `j` is never revisited, so it is persisted to `D_j` for the
/// expander's reverse walk to resolve later instead.
pub fn contract_column(cfg: &Config, matrix: &EdgeMatrix, j: usize) -> Result<(Vec<EdgePathInfo>, Vec<MetaVertex>)> {
    let mut chain_map: HashMap<Kmer, Pending> = HashMap::new();
    let mut resolved = Vec::new();
    let mut meta_vertices = Vec::new();
    let mut retired = Vec::new();

    let mut edges = matrix.read_diagonal(j)?;
    edges.extend(matrix.read_non_diagonal_column(j)?);

    for edge in &edges {
        for (near, far) in [(edge.x, edge.y), (edge.y, edge.x)] {
            let (v, v_side) = match near {
                Endpoint::Phi => continue,
                Endpoint::Vertex { kmer, side } => (kmer, side),
            };
            if partition_of_endpoint(cfg, near) != j {
                continue;
            }
            let owns = near == edge.x && edge.weight == 1;
            if let Some((far0, far1, weight)) = observe(
                &mut chain_map,
                v,
                v_side,
                far,
                edge.weight,
                edge.bucket,
                edge.index,
                owns,
                &mut resolved,
                &mut meta_vertices,
                &mut retired,
            ) {
                // far0/far1 came from two different original edges sharing
                // `v`; route the merged chain by its own far ends rather than
                // re-keying on v, which has now been fully contracted away.
                // This re-keyed entry is itself a pass-through link, not an
                // owning incidence: its bucket/index are meaningless (the
                // merged edge's weight is already > 1) so `owns` is false.
                let mut requeued_in_column = false;
                for (this_far, other_far) in [(far0, far1), (far1, far0)] {
                    if let Endpoint::Vertex { kmer, side } = this_far {
                        if partition_of_endpoint(cfg, this_far) == j {
                            chain_map.insert(
                                kmer,
                                Pending {
                                    far: other_far,
                                    v_side: side,
                                    weight,
                                    bucket: edge.bucket,
                                    index: edge.index,
                                    owns: false,
                                },
                            );
                            requeued_in_column = true;
                        }
                    }
                }
                if !requeued_in_column {
                    // Both far ends already sit below column j: nothing here
                    // can pair with a further incidence, so dispatch the
                    // composed edge straight into its destination cell
                    // instead of leaving it to the end-of-column sweep
                    // (which only looks at `chain_map`, and this chain was
                    // never keyed into it).
                    let composed = DiscontinuityEdge {
                        x: far0,
                        y: far1,
                        weight,
                        bucket: edge.bucket,
                        index: edge.index,
                    };
                    let pa = partition_of_endpoint(cfg, far0);
                    let pb = partition_of_endpoint(cfg, far1);
                    matrix.append(pa, pb, &composed)?;
                }
            }
        }
    }

    matrix.remove_cell(j, j)?;
    for p in 0..j {
        matrix.remove_cell(p, j)?;
    }

    for retired_edge in &retired {
        append_deferred(&cfg.working_dir, j, retired_edge)?;
    }

    for (v, pending) in chain_map {
        let edge = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: v, side: pending.v_side },
            y: pending.far,
            weight: pending.weight,
            bucket: pending.bucket,
            index: pending.index,
        };
        if pending.far.is_phi() {
            let path_id = v;
            meta_vertices.push(MetaVertex {
                vertex: v,
                info: PathInfo {
                    path_id,
                    rank: 0,
                    orientation: Side::Front,
                    is_cycle: false,
                },
            });
            resolved.push(EdgePathInfo {
                bucket: pending.bucket as usize,
                index: pending.index as usize,
                info: PathInfo {
                    path_id,
                    rank: 0,
                    orientation: edge_orientation(pending.v_side),
                    is_cycle: false,
                },
            });
        } else {
            // `v` was only ever touched once in this column's cells: it has
            // no partner to compose with here, whether its far end sits in
            // this same partition (an internal loop) or a strictly lower
            // one. Column `j` is never revisited once this pass moves on, so
            // this is not a "write back and wait" case — it is persisted to
            // `D_j` for the expander's reverse walk, which resolves it via
            // `infer` once its far end's own path-info is already known from
            // an earlier (lower-partition) step of the ascending pass.
            append_deferred(&cfg.working_dir, j, &edge)?;
        }
    }

    Ok((resolved, meta_vertices))
}

/// Drives the full descending pass, column `P` down to `1`, over an
/// [`EdgeMatrix`], returning every directly-resolved edge path-info and
/// meta-vertex produced along the way.
pub fn run_contractor(cfg: &Config, matrix: &EdgeMatrix) -> Result<(Vec<EdgePathInfo>, Vec<MetaVertex>, ContractorStats)> {
    let mut all_resolved = Vec::new();
    let mut all_meta = Vec::new();
    let mut stats = ContractorStats::default();
    for j in (0..cfg.num_partitions).rev() {
        let (resolved, meta) = contract_column(cfg, matrix, j)?;
        stats.columns_processed += 1;
        stats.resolved_edges += resolved.len();
        stats.meta_vertices += meta.len();
        all_resolved.extend(resolved);
        all_meta.extend(meta);
    }
    let deferred = read_all_deferred(&cfg.working_dir, cfg.num_partitions)?;
    stats.deferred_edges = deferred.values().map(|v| v.len()).sum();
    Ok((all_resolved, all_meta, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgc_core::config::MemoryBudget;
    use dbgc_core::kmer::Kmer;

    fn cfg(dir: &Path) -> Config {
        Config::new(5, 3, 4, 1, 4, 2, 2, false, MemoryBudget::default(), false, dir.to_path_buf(), dir.join("out"), 7).unwrap()
    }

    fn kmer(s: &[u8]) -> Kmer {
        Kmer::from_ascii(s).unwrap()
    }

    #[test]
    fn phi_to_phi_chain_resolves_within_one_column() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let matrix = EdgeMatrix::create(&dir.path().join("edges"), cfg.num_partitions, 1 << 16).unwrap();
        let v = kmer(b"ACGTA");
        let p = EdgeMatrix::partition_of(v.hash64(cfg.seed), cfg.num_partitions);
        let e1 = DiscontinuityEdge {
            x: Endpoint::Phi,
            y: Endpoint::Vertex { kmer: v, side: Side::Front },
            weight: 1,
            bucket: 0,
            index: 0,
        };
        let e2 = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: v, side: Side::Back },
            y: Endpoint::Phi,
            weight: 1,
            bucket: 0,
            index: 1,
        };
        matrix.append(0, p, &e1).unwrap();
        matrix.append(p, 0, &e2).unwrap();

        let (resolved, meta) = contract_column(&cfg, &matrix, p).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].vertex, v);
    }

    #[test]
    fn open_chain_crossing_partitions_is_deferred_for_the_expander() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let matrix = EdgeMatrix::create(&dir.path().join("edges"), cfg.num_partitions, 1 << 16).unwrap();
        let v = kmer(b"ACGTA");
        let other = kmer(b"TTTTT");
        let p = EdgeMatrix::partition_of(v.hash64(cfg.seed), cfg.num_partitions);
        let q = EdgeMatrix::partition_of(other.hash64(cfg.seed), cfg.num_partitions);
        assert_ne!(p, q, "fixture needs endpoints in distinct partitions");
        // Only a single incidence for v in this column: v's other side is
        // never seen here, so it stays open with no partner to compose
        // against and must wait for the expander rather than a later column,
        // since column `hi` is never processed again.
        let e = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: v, side: Side::Front },
            y: Endpoint::Vertex { kmer: other, side: Side::Back },
            weight: 1,
            bucket: 2,
            index: 5,
        };
        let hi = p.max(q);
        let lo = p.min(q);
        matrix.append(lo, hi, &e).unwrap();

        let (resolved, meta) = contract_column(&cfg, &matrix, hi).unwrap();
        assert!(resolved.is_empty());
        assert!(meta.is_empty());

        // The cell is fully drained, nothing written back into the matrix.
        let requeued = matrix.read_cell(lo, hi).unwrap();
        assert!(requeued.is_empty());

        let deferred = read_all_deferred(&cfg.working_dir, cfg.num_partitions).unwrap();
        let entries = deferred.get(&hi).cloned().unwrap_or_default();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].weight, 1);
        assert_eq!(entries[0].bucket, 2);
        assert_eq!(entries[0].index, 5);
    }

    #[test]
    fn same_partition_leftover_loop_is_deferred_for_the_expander() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let matrix = EdgeMatrix::create(&dir.path().join("edges"), cfg.num_partitions, 1 << 16).unwrap();
        // Two vertices in the same partition, each touched once in this
        // column by an edge to the other: after composing v's single
        // incidence, the far end (`other`) also resolves to partition j,
        // so the leftover chain never leaves the column and must go to
        // D_j instead of back into the matrix.
        let v = kmer(b"ACGTA");
        let j = EdgeMatrix::partition_of(v.hash64(cfg.seed), cfg.num_partitions);
        let mut other = None;
        for candidate in [b"TTTTT", b"GGGGG", b"CCCCC", b"AAAAA"] {
            let k = kmer(candidate);
            if EdgeMatrix::partition_of(k.hash64(cfg.seed), cfg.num_partitions) == j && k != v {
                other = Some(k);
                break;
            }
        }
        let other = other.expect("fixture needs a second vertex sharing v's partition");
        let e = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: v, side: Side::Front },
            y: Endpoint::Vertex { kmer: other, side: Side::Back },
            weight: 1,
            bucket: 2,
            index: 5,
        };
        matrix.append(j, j, &e).unwrap();

        let (resolved, meta) = contract_column(&cfg, &matrix, j).unwrap();
        assert!(resolved.is_empty());
        assert!(meta.is_empty());

        // Both v and other are touched exactly once in this column (the edge
        // is only ever observed from each side once), so each leaves behind
        // its own unresolved pending entry rather than pairing with the
        // other — both get deferred to D_j.
        let deferred = read_all_deferred(&cfg.working_dir, cfg.num_partitions).unwrap();
        let total: usize = deferred.values().map(|v| v.len()).sum();
        assert_eq!(total, 2);
    }

    fn find_in_partition(cfg: &Config, j: usize, exclude: &[Kmer]) -> Kmer {
        for candidate in [
            b"AAAAA" as &[u8], b"CCCCC", b"GGGGG", b"TTTTT", b"ACGTA", b"TGCAT", b"AGCTA", b"TCGAT", b"GATCC", b"CTAGG",
        ] {
            let k = kmer(candidate);
            if !exclude.contains(&k) && EdgeMatrix::partition_of(k.hash64(cfg.seed), cfg.num_partitions) == j {
                return k;
            }
        }
        panic!("fixture needs a vertex in partition {j}");
    }

    #[test]
    fn composing_a_vertex_away_retires_its_own_edge_to_d_j() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let matrix = EdgeMatrix::create(&dir.path().join("edges"), cfg.num_partitions, 1 << 16).unwrap();

        let v = kmer(b"ACGTA");
        let j = EdgeMatrix::partition_of(v.hash64(cfg.seed), cfg.num_partitions);
        let far_a = find_in_partition(&cfg, (j + 1) % cfg.num_partitions, &[v]);
        let far_b = find_in_partition(&cfg, (j + 2) % cfg.num_partitions, &[v, far_a]);
        let p_a = EdgeMatrix::partition_of(far_a.hash64(cfg.seed), cfg.num_partitions);
        let p_b = EdgeMatrix::partition_of(far_b.hash64(cfg.seed), cfg.num_partitions);
        assert!(p_a < j && p_b < j && p_a != p_b);

        // v's own edge (it owns this one: it's x, weight 1).
        let owned = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: v, side: Side::Front },
            y: Endpoint::Vertex { kmer: far_a, side: Side::Back },
            weight: 1,
            bucket: 9,
            index: 3,
        };
        // An edge that merely references v as its neighbour; v doesn't own
        // this (bucket, index) — far_b's lm-tig does.
        let referencing = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: far_b, side: Side::Front },
            y: Endpoint::Vertex { kmer: v, side: Side::Back },
            weight: 1,
            bucket: 77,
            index: 1,
        };
        matrix.append(p_a, j, &owned).unwrap();
        matrix.append(p_b, j, &referencing).unwrap();

        let (resolved, meta) = contract_column(&cfg, &matrix, j).unwrap();
        assert!(resolved.is_empty());
        assert!(meta.is_empty());

        let deferred = read_all_deferred(&cfg.working_dir, cfg.num_partitions).unwrap();
        let retired_here = deferred.get(&j).cloned().unwrap_or_default();
        assert_eq!(retired_here.len(), 1);
        assert_eq!(retired_here[0].bucket, 9);
        assert_eq!(retired_here[0].index, 3);
        assert_eq!(retired_here[0].x, Endpoint::Vertex { kmer: v, side: Side::Front });

        // The composed far_a--far_b edge was written back into the matrix,
        // not deferred, since both ends sit below column j.
        let requeued = matrix.read_cell(p_a.min(p_b), p_a.max(p_b)).unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].weight, 2);
    }
}
