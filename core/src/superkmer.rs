/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Super-(k-1)-mer / super-k-mer records and their on-disk encoding.
//!
//! Records are little-endian and fixed-width except for the trailing
//! 2-bit-packed base payload, whose length is given by the record header.

use crate::kmer::Base;
use std::io::{self, Read, Write};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SuperKmerFlags: u8 {
        /// Left neighbour exists and belongs to a different subgraph.
        const L_DISC   = 0b0000_0001;
        /// Right neighbour exists and belongs to a different subgraph.
        const R_DISC   = 0b0000_0010;
        /// A left-neighbouring super-k-mer exists in the fragment.
        const L_JOINED = 0b0000_0100;
        /// A right-neighbouring super-k-mer exists in the fragment.
        const R_JOINED = 0b0000_1000;
        /// A source id is attached (colored mode).
        const HAS_SOURCE = 0b0001_0000;
    }
}

/// A super-k-mer record as routed to a subgraph bucket: a run of bases
/// (already padded with left/right context when joined) plus the attributes
/// describing its boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperKmerRecord {
    pub flags: SuperKmerFlags,
    pub source_id: Option<u32>,
    pub bases: Vec<Base>,
}

impl SuperKmerRecord {
    pub fn l_disc(&self) -> bool {
        self.flags.contains(SuperKmerFlags::L_DISC)
    }
    pub fn r_disc(&self) -> bool {
        self.flags.contains(SuperKmerFlags::R_DISC)
    }
    pub fn l_joined(&self) -> bool {
        self.flags.contains(SuperKmerFlags::L_JOINED)
    }
    pub fn r_joined(&self) -> bool {
        self.flags.contains(SuperKmerFlags::R_JOINED)
    }

    /// Writes this record to `w` as: 1 flags byte, 4-byte source id (0 when
    /// absent), 4-byte base count, then `ceil(len * 2 / 8)` bytes of 2-bit
    /// packed bases (low bits of each byte hold the earliest base).
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        let mut flags = self.flags;
        flags.set(SuperKmerFlags::HAS_SOURCE, self.source_id.is_some());
        w.write_all(&[flags.bits()])?;
        w.write_all(&self.source_id.unwrap_or(0).to_le_bytes())?;
        w.write_all(&(self.bases.len() as u32).to_le_bytes())?;
        w.write_all(&pack_bases(&self.bases))?;
        Ok(())
    }

    /// Reads a record previously written by [`write_to`](Self::write_to).
    /// Returns `Ok(None)` at a clean EOF before any byte of a new record is
    /// read.
    pub fn read_from(r: &mut impl Read) -> io::Result<Option<Self>> {
        let mut flags_byte = [0u8; 1];
        match r.read(&mut flags_byte)? {
            0 => return Ok(None),
            1 => {}
            _ => unreachable!(),
        }
        let flags_bits = flags_byte[0];
        let flags = SuperKmerFlags::from_bits_truncate(flags_bits);
        let mut src_buf = [0u8; 4];
        r.read_exact(&mut src_buf)?;
        let source_id_raw = u32::from_le_bytes(src_buf);
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let num_bytes = len.div_ceil(4);
        let mut packed = vec![0u8; num_bytes];
        r.read_exact(&mut packed)?;
        let bases = unpack_bases(&packed, len);
        let source_id = flags
            .contains(SuperKmerFlags::HAS_SOURCE)
            .then_some(source_id_raw);
        Ok(Some(SuperKmerRecord {
            flags,
            source_id,
            bases,
        }))
    }
}

fn pack_bases(bases: &[Base]) -> Vec<u8> {
    let mut out = vec![0u8; bases.len().div_ceil(4)];
    for (i, &b) in bases.iter().enumerate() {
        out[i / 4] |= (b & 3) << (2 * (i % 4));
    }
    out
}

fn unpack_bases(packed: &[u8], len: usize) -> Vec<Base> {
    (0..len)
        .map(|i| (packed[i / 4] >> (2 * (i % 4))) & 3)
        .collect()
}
