// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The probe engine: `Table::insert`/`Table::find`/`Table::size` over the
//! slot protocol, plus the construction/phase state machine from
//! `spec.md` §4.5.

use log::{debug, info, trace, warn};

use crate::kmer::{Key, KmerRecord};
use crate::partition;
use crate::slot::{self, Claim};
use crate::substrate::Substrate;

/// `Table`'s lifecycle phase (`spec.md` §4.5). Tracked only for
/// debug-assertions per §7 kind 4 ("contract violation... implementations
/// should assert where cheap"); it never changes externally observable
/// behavior in a release build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Constructing,
    OpenForInsert,
    OpenForFind,
}

/// The distributed open-addressing hash table.
///
/// Generic over the [`Substrate`] that provides rank identity, the
/// partitioned payload/flags arrays, and the collective barrier. Construct
/// with [`Table::new`], cross the construction barrier with
/// [`Table::open_for_insert`], then insert; cross the phase barrier with
/// [`Table::open_for_find`] before calling [`Table::find`].
pub struct Table<S: Substrate> {
    substrate: S,
    capacity: usize,
    stride: usize,
    payload: S::Payload,
    flags: S::Flags,
    phase: Phase,
}

impl<S: Substrate> Table<S> {
    /// Collectively constructs a table of the given logical `capacity`.
    /// Every rank must call this with the same `capacity`; allocation of
    /// the payload and flags arrays is itself collective (it crosses a
    /// barrier internally, via [`Substrate::alloc_payload`]/[`Substrate::alloc_flags`]),
    /// but `spec.md` §6 additionally requires the caller to cross a
    /// collective barrier before first use — see [`Table::open_for_insert`].
    #[must_use]
    pub fn new(substrate: S, capacity: usize) -> Self {
        let world_size = substrate.world_size();
        let rank = substrate.rank();
        let stride = partition::stride(capacity, world_size);
        let my_size = partition::my_size(capacity, world_size, rank);

        info!(
            "constructing table: capacity={capacity} world_size={world_size} rank={rank} stride={stride} my_size={my_size}"
        );

        let payload = substrate.alloc_payload(my_size);
        let flags = substrate.alloc_flags(my_size);

        Self {
            substrate,
            capacity,
            stride,
            payload,
            flags,
            phase: Phase::Constructing,
        }
    }

    /// Crosses the construction barrier required by `spec.md` §3/§6 and
    /// marks the table ready for [`Table::insert`]. Collective.
    pub fn open_for_insert(&mut self) {
        debug_assert_eq!(self.phase, Phase::Constructing, "open_for_insert called out of order");
        self.substrate.barrier();
        self.phase = Phase::OpenForInsert;
        info!("table open for insert");
    }

    /// Crosses the phase barrier between the insert and find phases
    /// (`spec.md` §4.3/§4.4/§5): publishes every winning claimant's payload
    /// write to every rank. Collective.
    pub fn open_for_find(&mut self) {
        debug_assert_eq!(self.phase, Phase::OpenForInsert, "open_for_find called out of order");
        self.substrate.barrier();
        self.phase = Phase::OpenForFind;
        info!("table open for find");
    }

    /// The global logical capacity `N` (`spec.md` §6).
    #[must_use]
    pub fn size(&self) -> usize {
        self.capacity
    }

    /// `stride` as derived from `(capacity, world_size)` at construction
    /// time (`spec.md` §4.2): the number of logical slots assigned to every
    /// rank except possibly the last.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of slots this rank actually owns, derived from `stride` the
    /// same way [`partition::my_size`] computes it.
    #[must_use]
    pub fn my_size(&self) -> usize {
        partition::my_size(self.capacity, self.substrate.world_size(), self.substrate.rank())
    }

    fn locate(&self, slot: usize) -> (usize, usize) {
        partition::locate(slot, self.stride)
    }

    /// Attempts to insert `record`. Linear probing with step 1 starting at
    /// the home slot `record.hash() mod N`, bounded by `N` probes
    /// (`spec.md` §4.4). Returns `true` iff a slot was claimed and written.
    pub fn insert(&self, record: KmerRecord) -> bool {
        debug_assert_eq!(self.phase, Phase::OpenForInsert, "insert called out of phase");

        if self.capacity == 0 {
            return false;
        }

        let home = record.hash() % self.capacity as u64;
        for probe in 0..self.capacity as u64 {
            let slot = ((home + probe) % self.capacity as u64) as usize;
            let (owner, offset) = self.locate(slot);
            trace!("insert probe={probe} slot={slot} owner={owner} offset={offset}");

            match slot::claim(&self.substrate, &self.flags, owner, offset) {
                Claim::Won => {
                    self.substrate.put_payload(&self.payload, owner, offset, record);
                    debug!("insert claimed slot={slot} after {probe} probes");
                    return true;
                }
                Claim::Lost => {
                    warn!("insert lost race for slot={slot}, probing onward");
                }
            }
        }

        warn!("insert exhausted probe budget of {}: table full", self.capacity);
        false
    }

    /// Looks up `key`. Linear probing mirrors [`Table::insert`]'s sequence
    /// but does **not** terminate early on an empty slot (`spec.md` §4.4):
    /// a concurrent loser may have placed the key further along the same
    /// probe sequence while an earlier slot it vacated in favor of remains
    /// unclaimed. The probe budget is `N`.
    pub fn find(&self, key: &Key, out: &mut KmerRecord) -> bool {
        debug_assert_eq!(self.phase, Phase::OpenForFind, "find called out of phase");

        if self.capacity == 0 {
            return false;
        }

        let home = key.hash() % self.capacity as u64;
        for probe in 0..self.capacity as u64 {
            let slot = ((home + probe) % self.capacity as u64) as usize;
            let (owner, offset) = self.locate(slot);
            trace!("find probe={probe} slot={slot} owner={owner} offset={offset}");

            if !slot::is_occupied(&self.substrate, &self.flags, owner, offset) {
                continue;
            }

            let candidate = self.substrate.get_payload(&self.payload, owner, offset);
            if candidate.matches(key) {
                *out = candidate;
                debug!("find located key after {probe} probes at slot={slot}");
                return true;
            }
        }

        warn!("find exhausted probe budget of {}: key not found", self.capacity);
        false
    }
}
