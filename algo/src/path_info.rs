/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Meta-vertex and path-info records: the contractor's output and the
//! expander's input and output.

use dbgc_core::hashtable::Side;
use dbgc_core::kmer::Kmer;

/// A record with a fixed on-disk encoding, so that contractor/expander
/// side files (`P_v_<j>`, `P_e_<b>`, `D_<j>`) can be stored as flat arrays
/// addressable by index without a separate length table.
pub trait FixedRecord: Sized {
    const ENCODED_LEN: usize;
    fn write_to(&self, out: &mut Vec<u8>);
    fn read_from(bytes: &[u8]) -> Self;
}

fn side_byte(side: Side) -> u8 {
    match side {
        Side::Front => 0,
        Side::Back => 1,
    }
}

fn byte_side(b: u8) -> Side {
    if b == 0 {
        Side::Front
    } else {
        Side::Back
    }
}

/// A meta-vertex or internal vertex's position within a maximal chain: the
/// chain's canonical identifier `path_id`, this vertex's `rank` within it
/// (0-based from the chain's canonical direction), and the `orientation`
/// telling whether this vertex's canonical k-mer form agrees with the
/// chain's canonical direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathInfo {
    pub path_id: Kmer,
    pub rank: u64,
    pub orientation: Side,
    /// Set when `path_id`'s chain is a pure cycle with no ϕ anchor anywhere
    /// in its component (see the expander's `anchor_cycle`), so the collator
    /// knows to rotate the stitched sequence to its minimum-rank k-mer
    /// before writing it out, the same as the subgraph engine does for a
    /// cycle it closes entirely on its own.
    pub is_cycle: bool,
}

impl PathInfo {
    /// Derives the other endpoint's path-info from a known endpoint's,
    /// across a chain edge of weight `w` connecting `known` (on side
    /// `known_side`) to the unknown vertex (on side `other_side`).
    ///
    /// Per the contractor's orientation bookkeeping: walking off a vertex's
    /// `Back` side increases rank by `w`; walking off `Front` decreases it.
    /// The produced orientation flips relative to `known`'s exactly when the
    /// two sides agree (both `Front` or both `Back`), since that means the
    /// chain direction reversed at this edge.
    pub fn infer(known: PathInfo, known_side: Side, other_side: Side, w: u64) -> PathInfo {
        let rank = match known_side {
            Side::Back => known.rank + w,
            Side::Front => known.rank.saturating_sub(w),
        };
        let orientation = if known_side == other_side {
            known.orientation.opposite()
        } else {
            known.orientation
        };
        PathInfo {
            path_id: known.path_id,
            rank,
            orientation,
            is_cycle: known.is_cycle,
        }
    }
}

impl FixedRecord for PathInfo {
    const ENCODED_LEN: usize = Kmer::ENCODED_LEN + 8 + 1 + 1;

    fn write_to(&self, out: &mut Vec<u8>) {
        let mut kbuf = [0u8; Kmer::ENCODED_LEN];
        self.path_id.write_to(&mut kbuf);
        out.extend_from_slice(&kbuf);
        out.extend_from_slice(&self.rank.to_le_bytes());
        out.push(side_byte(self.orientation));
        out.push(self.is_cycle as u8);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let klen = Kmer::ENCODED_LEN;
        let path_id = Kmer::read_from(&bytes[..klen]);
        let rank = u64::from_le_bytes(bytes[klen..klen + 8].try_into().unwrap());
        let orientation = byte_side(bytes[klen + 8]);
        let is_cycle = bytes[klen + 9] != 0;
        PathInfo {
            path_id,
            rank,
            orientation,
            is_cycle,
        }
    }
}

/// A vertex's assigned meta-vertex record, keyed by its canonical k-mer when
/// stored in `P_v_<partition>` buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaVertex {
    pub vertex: Kmer,
    pub info: PathInfo,
}

impl FixedRecord for MetaVertex {
    const ENCODED_LEN: usize = Kmer::ENCODED_LEN + PathInfo::ENCODED_LEN;

    fn write_to(&self, out: &mut Vec<u8>) {
        let mut kbuf = [0u8; Kmer::ENCODED_LEN];
        self.vertex.write_to(&mut kbuf);
        out.extend_from_slice(&kbuf);
        self.info.write_to(out);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let klen = Kmer::ENCODED_LEN;
        let vertex = Kmer::read_from(&bytes[..klen]);
        let info = PathInfo::read_from(&bytes[klen..]);
        MetaVertex { vertex, info }
    }
}

/// One original lm-tig edge's resolved path-info, keyed by its
/// `(bucket, intra_bucket_index)` address for the collator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgePathInfo {
    pub bucket: usize,
    pub index: usize,
    pub info: PathInfo,
}

impl FixedRecord for EdgePathInfo {
    const ENCODED_LEN: usize = 4 + 4 + PathInfo::ENCODED_LEN;

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bucket as u32).to_le_bytes());
        out.extend_from_slice(&(self.index as u32).to_le_bytes());
        self.info.write_to(out);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let bucket = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let index = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let info = PathInfo::read_from(&bytes[8..]);
        EdgePathInfo { bucket, index, info }
    }
}

/// Serializes a slice of fixed-length records to a flat byte buffer.
pub fn encode_records<T: FixedRecord>(records: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * T::ENCODED_LEN);
    for r in records {
        r.write_to(&mut out);
    }
    out
}

/// Deserializes a flat byte buffer produced by [`encode_records`] back into
/// its records.
pub fn decode_records<T: FixedRecord>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::ENCODED_LEN)
        .map(T::read_from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(rank: u64, o: Side) -> PathInfo {
        PathInfo {
            path_id: Kmer::from_ascii(b"ACGTACGT").unwrap(),
            rank,
            orientation: o,
            is_cycle: false,
        }
    }

    #[test]
    fn infer_extends_rank_forward_off_back_side() {
        let known = path(3, Side::Front);
        let other = PathInfo::infer(known, Side::Back, Side::Front, 2);
        assert_eq!(other.rank, 5);
        assert_eq!(other.orientation, known.orientation);
    }

    #[test]
    fn infer_flips_orientation_when_sides_match() {
        let known = path(3, Side::Front);
        let other = PathInfo::infer(known, Side::Front, Side::Front, 1);
        assert_eq!(other.orientation, Side::Back);
    }

    #[test]
    fn meta_vertex_and_edge_path_info_round_trip() {
        let mv = MetaVertex {
            vertex: Kmer::from_ascii(b"GGGGCCCC").unwrap(),
            info: path(7, Side::Back),
        };
        let encoded = encode_records(&[mv]);
        assert_eq!(encoded.len(), MetaVertex::ENCODED_LEN);
        let decoded: Vec<MetaVertex> = decode_records(&encoded);
        assert_eq!(decoded, vec![mv]);

        let ep = EdgePathInfo {
            bucket: 3,
            index: 41,
            info: path(2, Side::Front),
        };
        let encoded = encode_records(&[ep]);
        let decoded: Vec<EdgePathInfo> = decode_records(&encoded);
        assert_eq!(decoded, vec![ep]);
    }
}
