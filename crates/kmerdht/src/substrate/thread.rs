// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! An in-process RMA substrate where every rank is an OS thread sharing the
//! payload and flags arrays through `Arc`. Cheap to construct and fully
//! deterministic, which makes it the substrate the crate's own test suite
//! runs against — writer and reader ranks live in the same test process
//! rather than separate ones.
//!
//! # Memory safety of the payload array
//!
//! Each payload cell is written by at most one rank (the winning claimant,
//! per the slot protocol in [`crate::slot`]) and is only ever read after a
//! [`Substrate::barrier`] call separating the writer from the readers. That
//! single-writer-then-barrier-then-many-readers discipline is exactly what
//! makes the `UnsafeCell` access in [`PayloadCell`] sound: `std::sync::Barrier::wait`
//! is built on a `Mutex`/`Condvar` pair, and a `Mutex` unlock/lock pair is a
//! release/acquire fence, so every write issued before a thread's
//! `barrier()` call is visible to every thread that returns from its own
//! `barrier()` call.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use super::Substrate;
use crate::kmer::KmerRecord;

/// One payload slot. Not `Sync` by default because of the `UnsafeCell`; the
/// safety argument above is why it's fine to assert `Sync` here.
struct PayloadCell(UnsafeCell<KmerRecord>);

// SAFETY: see the module-level doc comment — writes are single-writer and
// all reads are ordered after a barrier that fences the write.
unsafe impl Sync for PayloadCell {}

impl PayloadCell {
    fn new() -> Self {
        Self(UnsafeCell::new(KmerRecord::default()))
    }

    /// # Safety
    /// Caller must uphold the single-writer / read-after-barrier discipline
    /// described in the module doc comment.
    #[inline]
    unsafe fn get(&self) -> *mut KmerRecord {
        self.0.get()
    }
}

/// Spawns one OS thread per simulated rank, all sharing the same
/// directories and barrier.
pub struct ThreadCluster {
    world_size: usize,
}

impl ThreadCluster {
    #[must_use]
    pub fn new(world_size: usize) -> Self {
        assert!(world_size > 0, "a cluster needs at least one rank");
        Self { world_size }
    }

    /// Runs `f` once per rank on its own thread and collects the results in
    /// rank order. Panics if any rank thread panics.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(ThreadSubstrate) -> R + Send + Sync,
        R: Send,
    {
        let barrier = Arc::new(Barrier::new(self.world_size));
        let payload_dir = Arc::new(Mutex::new(vec![None; self.world_size]));
        let flags_dir = Arc::new(Mutex::new(vec![None; self.world_size]));

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..self.world_size)
                .map(|rank| {
                    let substrate = ThreadSubstrate {
                        rank,
                        world_size: self.world_size,
                        barrier: Arc::clone(&barrier),
                        payload_dir: Arc::clone(&payload_dir),
                        flags_dir: Arc::clone(&flags_dir),
                    };
                    let f = &f;
                    scope.spawn(move || f(substrate))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

type PayloadDir = Arc<Mutex<Vec<Option<Arc<[PayloadCell]>>>>>;
type FlagsDir = Arc<Mutex<Vec<Option<Arc<[AtomicI32]>>>>>;

/// A single rank's handle into a [`ThreadCluster`]'s shared state.
///
/// One `ThreadCluster` supports exactly one collective allocation round per
/// array (i.e. one `Table` construction); the directories are built once,
/// on first use, and are not reset. Build a fresh `ThreadCluster` per table
/// under test.
pub struct ThreadSubstrate {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
    payload_dir: PayloadDir,
    flags_dir: FlagsDir,
}

/// Directory of every rank's payload partition, resolved after the
/// publishing barrier in [`Substrate::alloc_payload`].
pub struct ThreadPayload {
    dirs: Vec<Arc<[PayloadCell]>>,
}

/// Directory of every rank's flags partition.
pub struct ThreadFlags {
    dirs: Vec<Arc<[AtomicI32]>>,
}

impl Substrate for ThreadSubstrate {
    type Payload = ThreadPayload;
    type Flags = ThreadFlags;

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn alloc_payload(&self, len: usize) -> Self::Payload {
        let partition: Arc<[PayloadCell]> =
            (0..len).map(|_| PayloadCell::new()).collect::<Vec<_>>().into();
        {
            let mut dir = self.payload_dir.lock();
            dir[self.rank] = Some(partition);
        }
        // Publishing barrier: every rank's slot in the directory is filled
        // in before anyone reads the full directory below.
        self.barrier();
        let dir = self.payload_dir.lock();
        let dirs = dir
            .iter()
            .map(|slot| Arc::clone(slot.as_ref().expect("payload directory incomplete after barrier")))
            .collect();
        ThreadPayload { dirs }
    }

    fn alloc_flags(&self, len: usize) -> Self::Flags {
        let partition: Arc<[AtomicI32]> = (0..len)
            .map(|_| AtomicI32::new(0))
            .collect::<Vec<_>>()
            .into();
        {
            let mut dir = self.flags_dir.lock();
            dir[self.rank] = Some(partition);
        }
        self.barrier();
        let dir = self.flags_dir.lock();
        let dirs = dir
            .iter()
            .map(|slot| Arc::clone(slot.as_ref().expect("flags directory incomplete after barrier")))
            .collect();
        ThreadFlags { dirs }
    }

    fn put_payload(&self, arr: &Self::Payload, owner: usize, offset: usize, record: KmerRecord) {
        // SAFETY: single-writer (the slot protocol only calls this for the
        // winning claimant of (owner, offset)) and not read until a barrier
        // separates writer from readers; see the module doc comment.
        unsafe {
            *arr.dirs[owner][offset].get() = record;
        }
    }

    fn get_payload(&self, arr: &Self::Payload, owner: usize, offset: usize) -> KmerRecord {
        // SAFETY: only called after the phase barrier has fenced the write.
        unsafe { *arr.dirs[owner][offset].get() }
    }

    fn get_flag(&self, arr: &Self::Flags, owner: usize, offset: usize) -> i32 {
        arr.dirs[owner][offset].load(Ordering::Relaxed)
    }

    fn fetch_add_flag(&self, arr: &Self::Flags, owner: usize, offset: usize, delta: i32) -> i32 {
        arr.dirs[owner][offset].fetch_add(delta, Ordering::Relaxed)
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}
