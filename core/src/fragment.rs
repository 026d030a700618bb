/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The narrow interface the partitioner consumes from its external
//! collaborators (file decompression and FASTA/FASTQ record splitting), and
//! the admissible-fragment extraction that *is* the partitioner's
//! responsibility.

use crate::kmer::is_placeholder;

/// One raw record handed to the partitioner: a source id and the record's
/// full nucleotide sequence (placeholders permitted). Decompression and
/// FASTA/FASTQ parsing happen upstream of this type; this crate only
/// consumes its output.
pub struct Record {
    pub source_id: u32,
    pub sequence: Vec<u8>,
}

/// A streaming source of [`Record`]s. Implementations are free to read from
/// gzip/zstd-compressed FASTA or FASTQ files, a KMC-style super-k-mer bin, or
/// (in tests) an in-memory vector; the partitioner only depends on this
/// trait.
pub trait RecordSource {
    fn next_record(&mut self) -> anyhow::Result<Option<Record>>;
}

/// An in-memory [`RecordSource`] useful for tests and small inputs.
pub struct VecRecordSource {
    records: std::vec::IntoIter<Record>,
}

impl VecRecordSource {
    pub fn new(records: Vec<Record>) -> Self {
        VecRecordSource {
            records: records.into_iter(),
        }
    }
}

impl RecordSource for VecRecordSource {
    fn next_record(&mut self) -> anyhow::Result<Option<Record>> {
        Ok(self.records.next())
    }
}

/// Splits a record's sequence into its admissible fragments: maximal
/// placeholder-free substrings of length `>= min_len` (`min_len = k + 1`).
/// Fragments shorter than `min_len` are silently dropped, per the
/// partitioner's failure semantics.
pub fn admissible_fragments(sequence: &[u8], min_len: usize) -> impl Iterator<Item = &[u8]> {
    let mut start = 0usize;
    let mut fragments = Vec::new();
    let n = sequence.len();
    let mut i = 0usize;
    while i < n {
        if is_placeholder(sequence[i]) {
            if i - start >= min_len {
                fragments.push(&sequence[start..i]);
            }
            start = i + 1;
        }
        i += 1;
    }
    if n - start >= min_len {
        fragments.push(&sequence[start..n]);
    }
    fragments.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_clean_fragment() {
        let frags: Vec<_> = admissible_fragments(b"ACGTACGTAC", 6).collect();
        assert_eq!(frags, vec![&b"ACGTACGTAC"[..]]);
    }

    #[test]
    fn placeholders_split_fragments() {
        let frags: Vec<_> = admissible_fragments(b"ACGTNNNACGTACGT", 4).collect();
        assert_eq!(frags, vec![&b"ACGT"[..], &b"ACGTACGT"[..]]);
    }

    #[test]
    fn short_fragments_are_dropped() {
        let frags: Vec<_> = admissible_fragments(b"ACGTNNNAC", 6).collect();
        assert!(frags.is_empty());
    }

    #[test]
    fn all_placeholders_yields_nothing() {
        let frags: Vec<_> = admissible_fragments(b"NNNNNNNNNN", 3).collect();
        assert!(frags.is_empty());
    }
}
