/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The discontinuity-edge matrix: an upper-triangular, partition-indexed
//! collection of buckets holding the edges that cross subgraph boundaries.
//!
//! A discontinuity edge connects a vertex observed at the boundary of one
//! subgraph to the vertex it continues into in another, or to the sentinel
//! ϕ when the boundary is a true path endpoint. Cell `(p, q)` with `p <= q`
//! holds every edge discovered between partitions `p` and `q` (ϕ conventionally
//! takes partition `0`); a self-loop at the matrix diagonal (`p == q`) holds
//! edges between two boundary vertices that both fall in the same partition.
//! The contractor consumes the matrix column by column, eliminating degree-2
//! chains as it goes, so cells are addressed independently and removed once
//! drained.

use crate::bucket::AtlasBucket;
use crate::hashtable::Side;
use crate::kmer::Kmer;
use anyhow::{Context, Result};
use std::path::Path;

/// One endpoint of a discontinuity edge: either a real boundary vertex (on
/// a given side) or the ϕ sentinel marking a true path end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Phi,
    Vertex { kmer: Kmer, side: Side },
}

impl Endpoint {
    pub fn is_phi(&self) -> bool {
        matches!(self, Endpoint::Phi)
    }

    pub fn kmer(&self) -> Option<Kmer> {
        match self {
            Endpoint::Phi => None,
            Endpoint::Vertex { kmer, .. } => Some(*kmer),
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Endpoint::Phi => None,
            Endpoint::Vertex { side, .. } => Some(*side),
        }
    }
}

/// A discontinuity edge `(x, s_x, y, s_y, w, b, b_idx)`: endpoints `x`/`y`
/// (each a canonical k-mer and side, or ϕ), the accumulated weight `w` (the
/// number of original lm-tig edges this edge currently summarises, `1`
/// until contraction merges it with a neighbour), and the `(bucket, index)`
/// address of the associated lm-tig in on-disk bucketed storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscontinuityEdge {
    pub x: Endpoint,
    pub y: Endpoint,
    pub weight: u32,
    pub bucket: u32,
    pub index: u32,
}

impl DiscontinuityEdge {
    pub const ENCODED_LEN: usize = 1 + Kmer::ENCODED_LEN * 2 + 4 + 4 + 4;

    fn filler_kmer() -> Kmer {
        Kmer::from_ascii(b"A").unwrap()
    }

    /// Appends this edge's encoding to `out`. Exposed beyond the matrix's own
    /// cell storage so the contractor can persist diagonal chains in the same
    /// wire format.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        let mut kbuf = [0u8; Kmer::ENCODED_LEN];
        let x_kmer = match self.x {
            Endpoint::Phi => Self::filler_kmer(),
            Endpoint::Vertex { kmer, side } => {
                flags |= 0b0001;
                if side == Side::Back {
                    flags |= 0b0010;
                }
                kmer
            }
        };
        let y_kmer = match self.y {
            Endpoint::Phi => Self::filler_kmer(),
            Endpoint::Vertex { kmer, side } => {
                flags |= 0b0100;
                if side == Side::Back {
                    flags |= 0b1000;
                }
                kmer
            }
        };
        out.push(flags);
        x_kmer.write_to(&mut kbuf);
        out.extend_from_slice(&kbuf);
        y_kmer.write_to(&mut kbuf);
        out.extend_from_slice(&kbuf);
        out.extend_from_slice(&self.weight.to_le_bytes());
        out.extend_from_slice(&self.bucket.to_le_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
    }

    /// Decodes one edge from the front of `bytes`, returning it along with
    /// the number of bytes consumed.
    pub fn read_from(bytes: &[u8]) -> (Self, usize) {
        let klen = Kmer::ENCODED_LEN;
        let flags = bytes[0];
        let mut off = 1;
        let x_kmer = Kmer::read_from(&bytes[off..off + klen]);
        off += klen;
        let y_kmer = Kmer::read_from(&bytes[off..off + klen]);
        off += klen;
        let weight = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let bucket = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let index = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let x = if flags & 0b0001 != 0 {
            Endpoint::Vertex {
                kmer: x_kmer,
                side: if flags & 0b0010 != 0 { Side::Back } else { Side::Front },
            }
        } else {
            Endpoint::Phi
        };
        let y = if flags & 0b0100 != 0 {
            Endpoint::Vertex {
                kmer: y_kmer,
                side: if flags & 0b1000 != 0 { Side::Back } else { Side::Front },
            }
        } else {
            Endpoint::Phi
        };
        (
            DiscontinuityEdge {
                x,
                y,
                weight,
                bucket,
                index,
            },
            off,
        )
    }
}

/// `P*(P+1)/2` buckets addressed by `(min(p,q), max(p,q))`; `partition(v) =
/// hash(v) & (P - 1)`, with ϕ conventionally assigned partition `0`.
pub struct EdgeMatrix {
    num_partitions: usize,
    cells: Vec<Option<AtlasBucket>>,
}

impl EdgeMatrix {
    pub fn partition_of(hash: u64, num_partitions: usize) -> usize {
        crate::minimizer::partition_of(hash, num_partitions)
    }

    fn cell_index(num_partitions: usize, p: usize, q: usize) -> usize {
        let (lo, hi) = if p <= q { (p, q) } else { (q, p) };
        lo * num_partitions - (lo * (lo.saturating_sub(1))) / 2 + (hi - lo)
    }

    pub fn create(dir: &Path, num_partitions: usize, flush_threshold: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create edge matrix directory {}", dir.display()))?;
        let num_cells = num_partitions * (num_partitions + 1) / 2;
        let mut cells = Vec::with_capacity(num_cells);
        for p in 0..num_partitions {
            for q in p..num_partitions {
                let idx = Self::cell_index(num_partitions, p, q);
                debug_assert_eq!(cells.len(), idx);
                let path = dir.join(format!("cell_{p}_{q}"));
                cells.push(Some(AtlasBucket::new(path, flush_threshold)));
            }
        }
        Ok(EdgeMatrix {
            num_partitions,
            cells,
        })
    }

    fn cell(&self, p: usize, q: usize) -> &AtlasBucket {
        self.cells[Self::cell_index(self.num_partitions, p, q)]
            .as_ref()
            .expect("cell already removed")
    }

    /// Appends one edge to the cell `(p, q)` given by its endpoints'
    /// partitions (ϕ endpoints use partition `0`).
    pub fn append(&self, p: usize, q: usize, edge: &DiscontinuityEdge) -> Result<()> {
        let mut buf = Vec::with_capacity(DiscontinuityEdge::ENCODED_LEN);
        edge.write_to(&mut buf);
        self.cell(p, q).merge(&buf)
    }

    /// Finalizes and reads back every edge currently in cell `(p, q)`.
    pub fn read_cell(&self, p: usize, q: usize) -> Result<Vec<DiscontinuityEdge>> {
        let cell = self.cell(p, q);
        cell.finalize()?;
        let mapped = cell.open_for_read()?;
        let bytes = mapped.as_bytes();
        let mut edges = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (edge, len) = DiscontinuityEdge::read_from(&bytes[offset..]);
            edges.push(edge);
            offset += len;
        }
        Ok(edges)
    }

    /// Reads every cell in column `q` (all `p <= q`), split into the
    /// diagonal block (`p == q`) and the non-diagonal rows (`p < q`), the
    /// units the contractor processes separately per column.
    pub fn read_diagonal(&self, q: usize) -> Result<Vec<DiscontinuityEdge>> {
        self.read_cell(q, q)
    }

    pub fn read_non_diagonal_column(&self, q: usize) -> Result<Vec<DiscontinuityEdge>> {
        let mut all = Vec::new();
        for p in 0..q {
            all.extend(self.read_cell(p, q)?);
        }
        Ok(all)
    }

    /// Reads every cell in row `i` with column `j > i`, the unit the
    /// expander streams per partition.
    pub fn read_row(&self, i: usize) -> Result<Vec<DiscontinuityEdge>> {
        let mut all = Vec::new();
        for j in (i + 1)..self.num_partitions {
            all.extend(self.read_cell(i, j)?);
        }
        Ok(all)
    }

    /// Drops cell `(p, q)`'s backing file once fully consumed.
    pub fn remove_cell(&self, p: usize, q: usize) -> Result<()> {
        self.cell(p, q).remove()
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kmer(s: &[u8]) -> Kmer {
        Kmer::from_ascii(s).unwrap()
    }

    fn vertex_edge(u: &[u8], us: Side, v: &[u8], vs: Side, w: u32) -> DiscontinuityEdge {
        DiscontinuityEdge {
            x: Endpoint::Vertex { kmer: kmer(u), side: us },
            y: Endpoint::Vertex { kmer: kmer(v), side: vs },
            weight: w,
            bucket: 0,
            index: 0,
        }
    }

    #[test]
    fn cell_index_covers_upper_triangle_without_gaps() {
        let p = 5;
        let mut seen = std::collections::HashSet::new();
        for i in 0..p {
            for j in i..p {
                let idx = EdgeMatrix::cell_index(p, i, j);
                assert!(seen.insert(idx), "duplicate index for ({i},{j})");
            }
        }
        assert_eq!(seen.len(), p * (p + 1) / 2);
    }

    #[test]
    fn cell_index_is_symmetric() {
        assert_eq!(EdgeMatrix::cell_index(6, 2, 4), EdgeMatrix::cell_index(6, 4, 2));
    }

    #[test]
    fn append_and_read_cell_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = EdgeMatrix::create(dir.path(), 4, 1 << 16).unwrap();
        let e1 = vertex_edge(b"ACGTACGT", Side::Front, b"TTTTAAAA", Side::Back, 1);
        let e2 = vertex_edge(b"GGGGCCCC", Side::Back, b"AAAATTTT", Side::Front, 3);
        matrix.append(1, 3, &e1).unwrap();
        matrix.append(1, 3, &e2).unwrap();
        let edges = matrix.read_cell(1, 3).unwrap();
        assert_eq!(edges, vec![e1, e2]);
    }

    #[test]
    fn phi_endpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = EdgeMatrix::create(dir.path(), 4, 1 << 16).unwrap();
        let e = DiscontinuityEdge {
            x: Endpoint::Phi,
            y: Endpoint::Vertex {
                kmer: kmer(b"ACGTACGT"),
                side: Side::Back,
            },
            weight: 1,
            bucket: 2,
            index: 7,
        };
        matrix.append(0, 2, &e).unwrap();
        let back = matrix.read_cell(0, 2).unwrap();
        assert_eq!(back, vec![e]);
        assert!(back[0].x.is_phi());
    }

    #[test]
    fn append_order_independent_of_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = EdgeMatrix::create(dir.path(), 4, 1 << 16).unwrap();
        let e = vertex_edge(b"ACGTACGT", Side::Front, b"TTTTAAAA", Side::Back, 1);
        matrix.append(3, 1, &e).unwrap();
        assert_eq!(matrix.read_cell(1, 3).unwrap(), vec![e]);
    }

    #[test]
    fn row_and_column_reads_gather_expected_cells() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = EdgeMatrix::create(dir.path(), 4, 1 << 16).unwrap();
        let e = vertex_edge(b"ACGTACGT", Side::Front, b"TTTTAAAA", Side::Back, 1);
        matrix.append(0, 2, &e).unwrap();
        matrix.append(1, 2, &e).unwrap();
        matrix.append(2, 2, &e).unwrap();
        assert_eq!(matrix.read_non_diagonal_column(2).unwrap().len(), 2);
        assert_eq!(matrix.read_diagonal(2).unwrap().len(), 1);
        matrix.append(2, 3, &e).unwrap();
        assert_eq!(matrix.read_row(2).unwrap().len(), 1);
    }
}
