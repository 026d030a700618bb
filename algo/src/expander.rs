/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Stage (d): back-propagates the contractor's meta-vertex path-identities
//! onto every internal vertex and every original lm-tig edge.
//!
//! The contractor already resolves every chain whose two ends are both the
//! ϕ sentinel, and drains the edge matrix to empty by the time it finishes —
//! everything it could not resolve directly is left behind in a `D_j` side
//! file, addressed by the partition of its "owning" vertex. What remains is
//! exactly the input this stage needs: a running map from vertex to
//! `PathInfo`, seeded by the meta-vertices, extended by replaying each
//! partition's `D_j` file once the partitions below it are settled.

use anyhow::Result;
use dbgc_core::config::Config;
use dbgc_core::edge_matrix::{DiscontinuityEdge, Endpoint};
use dbgc_core::hashtable::Side;
use dbgc_core::kmer::Kmer;
use std::collections::HashMap;

use crate::contractor::{edge_orientation, read_all_deferred};
use crate::path_info::{EdgePathInfo, MetaVertex, PathInfo};

#[derive(Clone, Copy, Debug, Default)]
pub struct ExpanderStats {
    pub partitions_processed: usize,
    pub resolved_edges: usize,
    pub cycles_broken: usize,
}

/// Resolves one deferred edge against the running map, inferring and
/// inserting whichever endpoint is still missing.
///
/// `(bucket, index)` on a weight-1 edge always addresses `x`'s own lm-tig
/// (the invariant the subgraph engine establishes when it emits these
/// edges), so a weight-1 edge only ever produces path-info for `x` — `y`'s
/// own edge, if it owns one, arrives as a separate record. Weight > 1 edges
/// are meta-edges folded in by contraction: they carry path-info onward but
/// have no lm-tig of their own to emit.
///
/// Returns `None` if neither endpoint is known yet (try again next pass).
fn attempt_resolve(m: &mut HashMap<Kmer, PathInfo>, edge: &DiscontinuityEdge) -> Option<Option<EdgePathInfo>> {
    let x = match edge.x {
        Endpoint::Vertex { kmer, side } => Some((kmer, side)),
        Endpoint::Phi => None,
    };
    let y = match edge.y {
        Endpoint::Vertex { kmer, side } => Some((kmer, side)),
        Endpoint::Phi => None,
    };

    if let Some((kx, sx)) = x {
        if let Some(&info) = m.get(&kx) {
            if let Some((ky, sy)) = y {
                m.entry(ky).or_insert_with(|| PathInfo::infer(info, sx, sy, edge.weight as u64));
            }
            return Some(edge_path_info(edge, info, sx));
        }
    }
    if let Some((ky, sy)) = y {
        if let Some(&info) = m.get(&ky) {
            let x_info = match x {
                Some((kx, sx)) => {
                    let inferred = PathInfo::infer(info, sy, sx, edge.weight as u64);
                    m.insert(kx, inferred);
                    Some((inferred, sx))
                }
                None => None,
            };
            return Some(match x_info {
                Some((info, sx)) => edge_path_info(edge, info, sx),
                None => None,
            });
        }
    }
    None
}

fn edge_path_info(edge: &DiscontinuityEdge, x_info: PathInfo, x_side: Side) -> Option<EdgePathInfo> {
    if edge.weight != 1 {
        return None;
    }
    Some(EdgePathInfo {
        bucket: edge.bucket as usize,
        index: edge.index as usize,
        info: PathInfo {
            path_id: x_info.path_id,
            rank: x_info.rank,
            orientation: edge_orientation(x_side),
            is_cycle: x_info.is_cycle,
        },
    })
}

/// Runs one fixed-point pass over `edges`, resolving whatever it can and
/// returning the edges that still have neither endpoint known.
fn pass(m: &mut HashMap<Kmer, PathInfo>, edges: Vec<DiscontinuityEdge>, resolved: &mut Vec<EdgePathInfo>) -> (Vec<DiscontinuityEdge>, bool) {
    let mut pending = Vec::new();
    let mut progressed = false;
    for edge in edges {
        match attempt_resolve(m, &edge) {
            Some(out) => {
                progressed = true;
                if let Some(epi) = out {
                    resolved.push(epi);
                }
            }
            None => pending.push(edge),
        }
    }
    (pending, progressed)
}

fn drain_to_fixed_point(m: &mut HashMap<Kmer, PathInfo>, mut edges: Vec<DiscontinuityEdge>, resolved: &mut Vec<EdgePathInfo>) -> Vec<DiscontinuityEdge> {
    loop {
        let (pending, progressed) = pass(m, edges, resolved);
        edges = pending;
        if !progressed || edges.is_empty() {
            return edges;
        }
    }
}

/// Picks an arbitrary owning endpoint to anchor a connected component that
/// never touched a ϕ boundary: a pure cycle, which the contractor never
/// resolves on its own since nothing terminates it. Anchoring one vertex at
/// rank 0 lets the usual `infer` propagation carry the rest of the loop; the
/// collator's fixed `(k-1)`-overlap trim doesn't depend on which vertex was
/// chosen as the seam.
fn anchor_cycle(m: &mut HashMap<Kmer, PathInfo>, edges: &[DiscontinuityEdge]) {
    for edge in edges {
        if let Endpoint::Vertex { kmer, .. } = edge.x {
            if !m.contains_key(&kmer) {
                m.insert(
                    kmer,
                    PathInfo {
                        path_id: kmer,
                        rank: 0,
                        orientation: Side::Front,
                        is_cycle: true,
                    },
                );
                return;
            }
        }
        if let Endpoint::Vertex { kmer, .. } = edge.y {
            if !m.contains_key(&kmer) {
                m.insert(
                    kmer,
                    PathInfo {
                        path_id: kmer,
                        rank: 0,
                        orientation: Side::Front,
                        is_cycle: true,
                    },
                );
                return;
            }
        }
    }
}

/// Runs the full ascending expansion pass: seeds the running map with every
/// meta-vertex the contractor produced, then replays each partition's `D_j`
/// file in turn, lowest partition first, so that any cross-partition
/// reference a later file makes has already been settled.
pub fn run_expander(cfg: &Config, meta_vertices: &[MetaVertex], contractor_resolved: &[EdgePathInfo]) -> Result<(Vec<EdgePathInfo>, ExpanderStats)> {
    let mut m: HashMap<Kmer, PathInfo> = HashMap::new();
    for mv in meta_vertices {
        m.insert(mv.vertex, mv.info);
    }

    let mut resolved = contractor_resolved.to_vec();
    let mut stats = ExpanderStats::default();

    let deferred = read_all_deferred(&cfg.working_dir, cfg.num_partitions)?;
    let mut leftover: Vec<DiscontinuityEdge> = Vec::new();
    for i in 0..cfg.num_partitions {
        stats.partitions_processed += 1;
        let edges = deferred.get(&i).cloned().unwrap_or_default();
        let still_pending = drain_to_fixed_point(&mut m, edges, &mut resolved);
        leftover.extend(still_pending);
    }

    // Whatever remains after one ascending pass belongs to cycles with no ϕ
    // anchor anywhere in their component: break each by seeding an arbitrary
    // vertex, then keep draining until every component is spent.
    while !leftover.is_empty() {
        let before = leftover.len();
        leftover = drain_to_fixed_point(&mut m, leftover, &mut resolved);
        if leftover.is_empty() {
            break;
        }
        if leftover.len() == before {
            anchor_cycle(&mut m, &leftover);
            stats.cycles_broken += 1;
        }
    }

    stats.resolved_edges = resolved.len();
    debug_assert!(
        meta_vertices.iter().map(|mv| mv.vertex).collect::<std::collections::HashSet<_>>().len() == meta_vertices.len(),
        "a vertex was assigned two different meta-vertex records"
    );
    Ok((resolved, stats))
}

/// Builds the collator's per-bucket input: a `PathInfo` slot for every
/// intra-bucket lm-tig index, `None` where nothing in `resolved` claimed it
/// (trivial unitigs the subgraph engine already wrote directly never get an
/// entry here).
pub fn bucket_path_info(resolved: &[EdgePathInfo], bucket: usize, lmtig_count: usize) -> Vec<Option<PathInfo>> {
    let mut out = vec![None; lmtig_count];
    for epi in resolved {
        if epi.bucket == bucket && epi.index < lmtig_count {
            out[epi.index] = Some(epi.info);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgc_core::config::{Config, MemoryBudget};
    use dbgc_core::edge_matrix::EdgeMatrix;
    use std::path::Path;

    fn cfg(dir: &Path) -> Config {
        Config::new(5, 3, 4, 1, 4, 2, 2, false, MemoryBudget::default(), false, dir.to_path_buf(), dir.join("out"), 7).unwrap()
    }

    fn kmer(s: &[u8]) -> Kmer {
        Kmer::from_ascii(s).unwrap()
    }

    fn write_deferred(dir: &Path, partition: usize, edge: &DiscontinuityEdge) {
        let path = dir.join(format!("D_{partition}"));
        let mut buf = Vec::new();
        edge.write_to(&mut buf);
        let mut existing = std::fs::read(&path).unwrap_or_default();
        existing.extend_from_slice(&buf);
        std::fs::write(&path, existing).unwrap();
    }

    #[test]
    fn infers_owned_edge_from_a_known_meta_vertex() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let anchor = kmer(b"ACGTA");
        let v = kmer(b"TTTTT");
        let p = EdgeMatrix::partition_of(v.hash64(cfg.seed), cfg.num_partitions);

        // v's own retired edge, owning bucket/index, pointing at `anchor`
        // which the contractor already resolved as a meta-vertex.
        let edge = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: v, side: Side::Front },
            y: Endpoint::Vertex { kmer: anchor, side: Side::Back },
            weight: 1,
            bucket: 4,
            index: 2,
        };
        write_deferred(dir.path(), p, &edge);

        let meta = vec![MetaVertex {
            vertex: anchor,
            info: PathInfo {
                path_id: anchor,
                rank: 10,
                orientation: Side::Front,
                is_cycle: false,
            },
        }];

        let (resolved, stats) = run_expander(&cfg, &meta, &[]).unwrap();
        assert_eq!(stats.cycles_broken, 0);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].bucket, 4);
        assert_eq!(resolved[0].index, 2);
    }

    #[test]
    fn meta_edge_of_weight_above_one_carries_info_without_emitting_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let anchor = kmer(b"ACGTA");
        let far = kmer(b"GGGGG");
        let p = EdgeMatrix::partition_of(far.hash64(cfg.seed), cfg.num_partitions);

        let meta_edge = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: anchor, side: Side::Back },
            y: Endpoint::Vertex { kmer: far, side: Side::Front },
            weight: 3,
            bucket: 0,
            index: 0,
        };
        write_deferred(dir.path(), p, &meta_edge);

        let meta = vec![MetaVertex {
            vertex: anchor,
            info: PathInfo {
                path_id: anchor,
                rank: 0,
                orientation: Side::Front,
                is_cycle: false,
            },
        }];

        let (resolved, _stats) = run_expander(&cfg, &meta, &[]).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn isolated_cycle_with_no_anchor_is_broken_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let a = kmer(b"ACGTA");
        let b = kmer(b"TTTTT");
        let p = EdgeMatrix::partition_of(a.hash64(cfg.seed), cfg.num_partitions);

        let edge = DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: a, side: Side::Front },
            y: Endpoint::Vertex { kmer: b, side: Side::Back },
            weight: 1,
            bucket: 1,
            index: 0,
        };
        write_deferred(dir.path(), p, &edge);

        let (resolved, stats) = run_expander(&cfg, &[], &[]).unwrap();
        assert_eq!(stats.cycles_broken, 1);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].info.is_cycle);
    }

    #[test]
    fn bucket_path_info_fills_only_claimed_slots() {
        let info = PathInfo {
            path_id: kmer(b"ACGTA"),
            rank: 0,
            orientation: Side::Front,
            is_cycle: false,
        };
        let resolved = vec![EdgePathInfo { bucket: 2, index: 1, info }];
        let slots = bucket_path_info(&resolved, 2, 3);
        assert!(slots[0].is_none());
        assert_eq!(slots[1], Some(info));
        assert!(slots[2].is_none());
    }
}
