// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The contig-walking driver `spec.md` §1 treats as an external collaborator
//! that calls `insert`/`find` — restored here, grounded directly on
//! `original_source/kmer_hash.cpp`'s `main` loop.
//!
//! A contig is a maximal chain of k-mers linked by forward extension,
//! starting from a "start node" (a k-mer with no backward extension) and
//! ending at a k-mer with no forward extension.

use kmerdht::kmer::KmerRecord;
use kmerdht::{Substrate, Table, TableError};

/// One reconstructed contig: its k-mers in walk order, head first.
pub type Contig = Vec<KmerRecord>;

/// Walks every start node in `start_nodes` to completion, repeatedly
/// calling [`Table::find`] for the next k-mer until a forward extension of
/// [`kmerdht::NO_EXTENSION`] is reached. Mirrors `kmer_hash.cpp`'s
/// `while (contig.back().forwardExt() != 'F')` loop exactly; a lookup miss
/// is a fatal `TableError::NotFound`, matching the original's
/// `runtime_error("Error: k-mer not found in hashmap.")`.
pub fn walk_all<S: Substrate>(
    table: &Table<S>,
    start_nodes: &[KmerRecord],
) -> Result<Vec<Contig>, TableError> {
    start_nodes.iter().map(|start| walk_one(table, *start)).collect()
}

fn walk_one<S: Substrate>(table: &Table<S>, start: KmerRecord) -> Result<Contig, TableError> {
    let mut contig = vec![start];
    loop {
        let last = *contig.last().expect("contig always has at least the start node");
        let Some(next_key) = last.next_key() else {
            break;
        };
        let mut next = KmerRecord::default();
        if !table.find(&next_key, &mut next) {
            return Err(TableError::NotFound);
        }
        contig.push(next);
    }
    Ok(contig)
}

/// Renders a contig back to its full base sequence: the head k-mer's full
/// bases, then one trailing base per subsequent k-mer — mirroring
/// `original_source`'s `extract_contig`.
#[must_use]
pub fn extract_contig(contig: &Contig) -> String {
    let Some(head) = contig.first() else {
        return String::new();
    };
    let mut out = head.key.bases();
    for rec in &contig[1..] {
        out.push(rec.key.bases().chars().last().expect("bases non-empty"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmerdht::kmer::Key;
    use kmerdht::substrate::thread::ThreadCluster;

    fn key(s: &str) -> Key {
        Key::parse(s.as_bytes()).unwrap()
    }

    /// Baseline walk: head and tail each land directly on their own home
    /// slot, no probing involved.
    #[test]
    fn walks_a_two_node_contig() {
        let cluster = ThreadCluster::new(1);
        let head = KmerRecord::new(key("AAAAAAAAAAAAAAAAAAAAA"), b'C', b'F');
        let tail = KmerRecord::new(key("AAAAAAAAAAAAAAAAAAAAC"), b'F', b'A');
        let results = cluster.run(move |s| {
            let mut table = Table::new(s, 4);
            table.open_for_insert();
            table.insert(head);
            table.insert(tail);
            table.open_for_find();
            walk_all(&table, &[head])
        });
        let contigs = results.into_iter().next().unwrap().unwrap();
        assert_eq!(contigs.len(), 1);
        assert_eq!(contigs[0], vec![head, tail]);
        assert_eq!(extract_contig(&contigs[0]), "AAAAAAAAAAAAAAAAAAAAC");
    }

    /// Brute-forces a k-mer whose `hash() % capacity` lands on `target`,
    /// mirroring the technique `kmerdht`'s own scenario tests use since the
    /// FNV-1a hash can't be dictated directly. Deterministic: always returns
    /// the same key for the same `(capacity, target, salt)`.
    fn key_with_home(capacity: usize, target: u64, salt: u64) -> Key {
        const ALPHABET: [char; 4] = ['A', 'C', 'G', 'T'];
        for i in 0.. {
            let n = i ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let bases: String = (0..kmerdht::KMER_LEN)
                .map(|b| ALPHABET[((n >> (2 * b)) & 0b11) as usize])
                .collect();
            let key = Key::parse(bases.as_bytes()).unwrap();
            if key.hash() % capacity as u64 == target {
                return key;
            }
        }
        unreachable!("exhausted u64 search space without finding a matching home slot");
    }

    /// Scenario 6 (`spec.md` §8): a walk whose next k-mer doesn't sit on its
    /// own home slot. A filler record claims the tail's home slot first, so
    /// `find` must probe past an occupied, non-matching slot mid-walk rather
    /// than stopping at the first slot it visits.
    #[test]
    fn walk_survives_a_collision_at_the_next_kmers_home_slot() {
        const CAPACITY: usize = 8;

        // Search for a head whose forward neighbour doesn't home to the same
        // slot as the head itself, so the filler can occupy the neighbour's
        // home slot without disturbing the head's.
        let (head_key, tail_key, tail_home) = (1u64..)
            .map(|salt| {
                let head_key = key_with_home(CAPACITY, 0, salt);
                let head_record = KmerRecord::new(head_key, b'C', b'F');
                let tail_key = head_record
                    .next_key()
                    .expect("forward_ext is not NO_EXTENSION");
                let tail_home = tail_key.hash() % CAPACITY as u64;
                (head_key, tail_key, tail_home)
            })
            .find(|&(_, _, tail_home)| tail_home != 0)
            .expect("some salt yields a head whose neighbour doesn't home to slot 0");

        let head = KmerRecord::new(head_key, b'C', b'F');
        let filler_key = key_with_home(CAPACITY, tail_home, 99);
        assert_ne!(filler_key, tail_key, "need a distinct key to occupy the tail's home slot first");
        let filler = KmerRecord::new(filler_key, b'F', b'F');
        let tail = KmerRecord::new(tail_key, b'F', b'C');

        let cluster = ThreadCluster::new(1);
        let results = cluster.run(move |s| {
            let mut table = Table::new(s, CAPACITY);
            table.open_for_insert();
            // Claim the tail's home slot before the tail itself is inserted,
            // forcing both its insert and its later find to probe past it.
            table.insert(filler);
            table.insert(head);
            table.insert(tail);
            table.open_for_find();
            walk_all(&table, &[head])
        });
        let contigs = results.into_iter().next().unwrap().unwrap();
        assert_eq!(contigs.len(), 1);
        assert_eq!(contigs[0], vec![head, tail]);
    }

    #[test]
    fn single_node_contig_has_no_forward_extension() {
        let cluster = ThreadCluster::new(1);
        let solo = KmerRecord::new(key("GGGGGGGGGGGGGGGGGGGGG"), b'F', b'F');
        let results = cluster.run(move |s| {
            let mut table = Table::new(s, 2);
            table.open_for_insert();
            table.insert(solo);
            table.open_for_find();
            walk_all(&table, &[solo])
        });
        let contigs = results.into_iter().next().unwrap().unwrap();
        assert_eq!(contigs, vec![vec![solo]]);
    }

    #[test]
    fn missing_next_kmer_is_fatal() {
        let cluster = ThreadCluster::new(1);
        let head = KmerRecord::new(key("AAAAAAAAAAAAAAAAAAAAA"), b'C', b'F');
        let results = cluster.run(move |s| {
            let mut table = Table::new(s, 4);
            table.open_for_insert();
            table.insert(head);
            table.open_for_find();
            walk_all(&table, &[head])
        });
        assert_eq!(results.into_iter().next().unwrap(), Err(TableError::NotFound));
    }
}
