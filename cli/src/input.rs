/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! A minimal FASTA/FASTQ [`RecordSource`] reading one or more input files in
//! sequence, each contributing records under its own dense source id.
//!
//! Decompression (gzip/zstd) is out of scope here: the workspace carries no
//! compression crate, and this reader only consumes plain-text records.

use anyhow::{bail, Context, Result};
use dbgc_core::fragment::{Record, RecordSource};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Reads every sequence record out of a list of FASTA/FASTQ files, assigning
/// each file the next dense source id in `[1, 2^21)` as required by the
/// pipeline's source-id contract.
pub struct FileRecordSource {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<(u32, BufReader<File>)>,
    next_source_id: u32,
}

impl FileRecordSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        FileRecordSource {
            files: paths.into_iter(),
            current: None,
            next_source_id: 1,
        }
    }

    fn open_next(&mut self) -> Result<bool> {
        let Some(path) = self.files.next() else {
            return Ok(false);
        };
        let file = File::open(&path).with_context(|| format!("opening input file {}", path.display()))?;
        let source_id = self.next_source_id;
        self.next_source_id += 1;
        self.current = Some((source_id, BufReader::new(file)));
        Ok(true)
    }

    fn next_from_current(&mut self) -> Result<Option<Record>> {
        let Some((source_id, reader)) = &mut self.current else {
            return Ok(None);
        };
        let mut header = String::new();
        loop {
            header.clear();
            if reader.read_line(&mut header)? == 0 {
                return Ok(None);
            }
            if !header.trim_end().is_empty() {
                break;
            }
        }
        let header = header.trim_end();
        let sequence = match header.as_bytes().first() {
            Some(b'>') => read_fasta_sequence(reader)?,
            Some(b'@') => read_fastq_sequence(reader)?,
            _ => bail!("expected a FASTA/FASTQ header, got {header:?}"),
        };
        Ok(Some(Record {
            source_id: *source_id,
            sequence,
        }))
    }
}

fn read_fasta_sequence(reader: &mut BufReader<File>) -> Result<Vec<u8>> {
    let mut sequence = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if line.starts_with('>') {
            reader.seek_relative(-(n as i64)).context("seeking back over next header")?;
            break;
        }
        sequence.extend(line.trim_end().bytes());
    }
    Ok(sequence)
}

fn read_fastq_sequence(reader: &mut BufReader<File>) -> Result<Vec<u8>> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let sequence = line.trim_end().bytes().collect();
    // '+' separator line and quality line, both discarded.
    let mut discard = String::new();
    reader.read_line(&mut discard)?;
    discard.clear();
    reader.read_line(&mut discard)?;
    Ok(sequence)
}

impl RecordSource for FileRecordSource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(None);
            }
            if let Some(record) = self.next_from_current()? {
                return Ok(Some(record));
            }
            self.current = None;
        }
    }
}

/// Validates that every input path exists and is readable before the
/// pipeline commits to any work, per the CLI's pre-flight validation policy.
pub fn check_inputs_exist(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        if !Path::new(path).is_file() {
            bail!("input file does not exist or is not a regular file: {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_two_fasta_records_across_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fasta");
        let mut f = File::create(&path).unwrap();
        writeln!(f, ">r1\nACGT\nACGT\n>r2\nTTTT").unwrap();
        drop(f);

        let mut source = FileRecordSource::new(vec![path]);
        let r1 = source.next_record().unwrap().unwrap();
        assert_eq!(r1.source_id, 1);
        assert_eq!(r1.sequence, b"ACGTACGT");
        let r2 = source.next_record().unwrap().unwrap();
        assert_eq!(r2.sequence, b"TTTT");
        assert!(source.next_record().unwrap().is_none());
    }

    #[test]
    fn assigns_distinct_source_ids_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.fasta");
        let p2 = dir.path().join("b.fasta");
        std::fs::write(&p1, ">r1\nACGT\n").unwrap();
        std::fs::write(&p2, ">r2\nGGGG\n").unwrap();

        let mut source = FileRecordSource::new(vec![p1, p2]);
        let r1 = source.next_record().unwrap().unwrap();
        let r2 = source.next_record().unwrap().unwrap();
        assert_eq!((r1.source_id, r2.source_id), (1, 2));
    }
}
