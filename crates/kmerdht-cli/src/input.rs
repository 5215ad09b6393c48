// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! K-mer file parsing and shard assignment — the driver collaborator
//! `spec.md` §1 treats as external, grounded on `original_source/kmer_hash.cpp`'s
//! `read_kmers`/`line_count`/`kmer_size` helpers.
//!
//! Each line of the input file is `KMER_LEN` base characters immediately
//! followed by a one-character forward-extension symbol and a
//! one-character backward-extension symbol, with no separators (the same
//! fixed-width layout `original_source` packs its k-mer files in).
//! [`NO_EXTENSION`] marks "nothing extends this way"; a `'F'` backward
//! extension marks a contig head.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use kmerdht::kmer::{KmerParseError, KMER_LEN};
use kmerdht::KmerRecord;

/// Errors reading or parsing a k-mer file.
#[derive(Debug)]
pub enum InputError {
    Io(io::Error),
    /// Line `line_no` wasn't `KMER_LEN + 2` bytes long.
    WrongLineLength { line_no: usize, len: usize },
    Parse { line_no: usize, source: KmerParseError },
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read k-mer file: {e}"),
            Self::WrongLineLength { line_no, len } => write!(
                f,
                "line {line_no}: expected {} bytes ({KMER_LEN}-mer + 2 extension symbols), got {len}",
                KMER_LEN + 2
            ),
            Self::Parse { line_no, source } => write!(f, "line {line_no}: {source}"),
        }
    }
}

impl std::error::Error for InputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse { source, .. } => Some(source),
            Self::WrongLineLength { .. } => None,
        }
    }
}

impl From<io::Error> for InputError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

fn open_lines(path: &Path) -> io::Result<impl Iterator<Item = io::Result<String>>> {
    Ok(BufReader::new(File::open(path)?).lines())
}

/// The k-mer length this file was produced for, read from its first line
/// (`original_source`'s `kmer_size`). Callers compare this against
/// [`KMER_LEN`] and refuse to proceed on mismatch, mirroring
/// `kmer_hash.cpp`'s fatal check at startup.
pub fn kmer_len(path: &Path) -> Result<usize, InputError> {
    let mut lines = open_lines(path)?;
    match lines.next() {
        Some(line) => {
            let line = line?;
            Ok(line.len().saturating_sub(2))
        }
        None => Ok(0),
    }
}

/// Total number of k-mer records in the file (`original_source`'s
/// `line_count`), used to size the table at a 0.5 load factor.
pub fn line_count(path: &Path) -> Result<usize, InputError> {
    let lines = open_lines(path)?;
    let mut n = 0usize;
    for line in lines {
        line?;
        n += 1;
    }
    Ok(n)
}

fn parse_line(line_no: usize, line: &str) -> Result<KmerRecord, InputError> {
    let bytes = line.as_bytes();
    if bytes.len() != KMER_LEN + 2 {
        return Err(InputError::WrongLineLength {
            line_no,
            len: bytes.len(),
        });
    }
    let (bases, ext) = bytes.split_at(KMER_LEN);
    let key = kmerdht::Key::parse(bases).map_err(|source| InputError::Parse { line_no, source })?;
    Ok(KmerRecord::new(key, ext[0], ext[1]))
}

/// Reads this rank's shard: line `i` (0-indexed) belongs to rank
/// `i % world_size`, matching `original_source`'s round-robin
/// `read_kmers(fname, world_size, rank)` — this keeps shard sizes balanced
/// to within one record without needing the total line count twice.
pub fn read_shard(path: &Path, world_size: usize, rank: usize) -> Result<Vec<KmerRecord>, InputError> {
    let lines = open_lines(path)?;
    let mut shard = Vec::new();
    for (i, line) in lines.enumerate() {
        if i % world_size != rank {
            continue;
        }
        shard.push(parse_line(i + 1, &line?)?);
    }
    Ok(shard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    fn kmer_line(bases: &str, fwd: char, bwd: char) -> String {
        format!("{bases}{fwd}{bwd}")
    }

    #[test]
    fn kmer_len_reads_first_line_length() {
        let line = kmer_line("AAAAAAAAAAAAAAAAAAAAA", 'C', 'F');
        let f = write_file(&[&line]);
        assert_eq!(kmer_len(f.path()).unwrap(), KMER_LEN);
    }

    #[test]
    fn line_count_counts_every_line() {
        let l1 = kmer_line("AAAAAAAAAAAAAAAAAAAAA", 'C', 'F');
        let l2 = kmer_line("CCCCCCCCCCCCCCCCCCCCC", 'G', 'A');
        let f = write_file(&[&l1, &l2]);
        assert_eq!(line_count(f.path()).unwrap(), 2);
    }

    #[test]
    fn round_robin_shard_assignment() {
        const ALPHABET: [char; 4] = ['A', 'C', 'G', 'T'];
        let lines: Vec<String> = (0..6)
            .map(|i| kmer_line(&ALPHABET[i % 4].to_string().repeat(KMER_LEN), 'C', 'F'))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let f = write_file(&refs);

        let shard0 = read_shard(f.path(), 3, 0).unwrap();
        let shard1 = read_shard(f.path(), 3, 1).unwrap();
        let shard2 = read_shard(f.path(), 3, 2).unwrap();
        assert_eq!(shard0.len() + shard1.len() + shard2.len(), 6);
        assert_eq!(shard0.len(), 2);
        assert_eq!(shard1.len(), 2);
        assert_eq!(shard2.len(), 2);
    }

    #[test]
    fn rejects_wrong_line_length() {
        let f = write_file(&["ACGT"]);
        let err = read_shard(f.path(), 1, 0).unwrap_err();
        assert!(matches!(err, InputError::WrongLineLength { .. }));
    }
}
