// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A real one-sided RMA substrate backed by POSIX shared memory: ranks are
//! independent OS processes on one host, and "remote" put/get/fetch-add
//! are plain reads, writes, and atomics against an `mmap`'d region another
//! process created.
//!
//! This is a single-host analog of the RMA conduits an HPC runtime (MPI
//! one-sided windows, or the UPC++ runtime this system's design descends
//! from) provides across a whole cluster: on one host, shared memory *is*
//! globally addressable memory any process can put/get/fetch-add into.
//!
//! # Directory construction
//!
//! Every rank creates its own payload and flags segments, named after its
//! own rank. To open another rank's segment a process needs that rank's
//! partition length, so a small shared *directory* segment (one slot per
//! rank, written once by its owning rank) carries the lengths; after a
//! publishing barrier every rank reads the full directory and opens the
//! `world_size - 1` segments it doesn't own.
//!
//! # Barrier
//!
//! A control segment (shared by every rank under a fixed name) holds a
//! central sense-reversing barrier: an arrival counter and a generation
//! counter, both plain atomics. Whichever rank's `shm_open` races to create
//! the segment first initializes it, guarded by a claim/commit handshake
//! structurally identical to the hash table's own slot protocol; the rest
//! spin-wait for `MAGIC` to appear. This segment is touched only a few
//! times per table (directory publication, construction barrier, phase
//! barrier) and is not a hot path.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::kmer::KmerRecord;

use super::Substrate;

/// Errors from the shared-memory substrate. Per `spec.md` §7 kind 3, these
/// are fatal: there is no retry at this layer.
#[derive(Debug)]
pub enum SubstrateError {
    SegmentCreate(io::Error),
    SegmentOpen(io::Error),
    Mmap(io::Error),
    InvalidName(String),
}

impl fmt::Display for SubstrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::InvalidName(n) => write!(f, "invalid segment name: {n}"),
        }
    }
}

impl std::error::Error for SubstrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, SubstrateError>;

/// A raw `mmap`'d POSIX shared memory region. Unmapped on drop; never
/// unlinked automatically (the owning rank is responsible, via
/// [`ShmSegment::unlink`], since another rank may still have it mapped).
struct ShmSegment {
    ptr: *mut u8,
    size: usize,
}

// SAFETY: the region is accessed only through the atomic- and
// single-writer-then-barrier disciplines documented on `ShmSubstrate`.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') || name[1..].contains('/') || name.len() > 255 {
            return Err(SubstrateError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Creates a fresh segment, replacing any stale one of the same name
    /// left behind by a crashed previous run.
    fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| SubstrateError::InvalidName(name.into()))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink is
        // safe to call on a name that doesn't exist (error ignored);
        // shm_open with O_CREAT|O_EXCL either creates a fresh segment or
        // fails, checked below.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(SubstrateError::SegmentCreate(io::Error::last_os_error()));
        }
        Self::finish_open(fd, size, true)
    }

    /// Opens (racing to create, if needed) a segment shared by every rank
    /// under a fixed name — used for the directory and barrier control
    /// blocks, where no single rank is the designated owner.
    fn create_or_open_shared(name: &str, size: usize) -> Result<(Self, bool)> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| SubstrateError::InvalidName(name.into()))?;
        // SAFETY: c_name is valid; O_CREAT without O_EXCL succeeds whether
        // or not another rank already created the segment.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(SubstrateError::SegmentCreate(io::Error::last_os_error()));
        }
        // We can't tell from shm_open alone whether we created or joined
        // an existing segment; the caller resolves that race with a
        // claim/commit handshake inside the mapped memory itself.
        let seg = Self::finish_open(fd, size, false)?;
        Ok((seg, true))
    }

    /// Opens a segment another rank owns, retrying briefly if it hasn't
    /// been created yet (construction is collective, but process startup
    /// across independent OS processes isn't instantaneous).
    fn open_retrying(name: &str, size: usize, timeout: Duration) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| SubstrateError::InvalidName(name.into()))?;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            // SAFETY: c_name is a valid NUL-terminated string; O_RDWR opens
            // an existing segment for read/write, failing if absent.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd >= 0 {
                return Self::finish_open(fd, size, false);
            }
            if std::time::Instant::now() >= deadline {
                return Err(SubstrateError::SegmentOpen(io::Error::last_os_error()));
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    fn finish_open(fd: libc::c_int, size: usize, zero: bool) -> Result<Self> {
        // SAFETY: fd is a valid, just-opened file descriptor; size is the
        // caller-provided segment length.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SubstrateError::SegmentCreate(err));
        }
        // SAFETY: fd is valid and sized to at least `size` bytes;
        // PROT_READ|PROT_WRITE and MAP_SHARED are valid flags for a
        // cross-process read-write mapping.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: fd is valid; the mapping (success or not) retains its own
        // reference, so closing fd here is safe either way.
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(SubstrateError::Mmap(io::Error::last_os_error()));
        }
        if zero {
            // SAFETY: ptr is valid for `size` writable bytes from the mmap above.
            unsafe { ptr::write_bytes(ptr.cast::<u8>(), 0, size) };
        }
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            size,
        })
    }

    fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| SubstrateError::InvalidName(name.into()))?;
        // SAFETY: c_name is valid; shm_unlink on a missing name is harmless.
        unsafe {
            libc::shm_unlink(c_name.as_ptr());
        }
        Ok(())
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size came from a successful mmap in this struct and
        // are unmapped at most once (Drop runs once).
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
    }
}

#[repr(C)]
struct GateControl {
    magic: AtomicU32,
    arrived: AtomicU32,
    generation: AtomicU32,
}

const GATE_MAGIC: u32 = 0x4b4d_4452; // "KMDR"
const GATE_UNINIT: u32 = 0;
const GATE_INITIALIZING: u32 = 1;

/// Initializes (racing with every other rank that calls this on the same
/// segment) or waits for initialization of a shared control block, via a
/// claim/commit handshake on `magic` identical in spirit to the hash
/// table's own slot protocol.
fn init_gate(magic: &AtomicU32, init: impl FnOnce()) {
    if magic
        .compare_exchange(GATE_UNINIT, GATE_INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        init();
        magic.store(GATE_MAGIC, Ordering::Release);
    } else {
        while magic.load(Ordering::Acquire) != GATE_MAGIC {
            std::thread::yield_now();
        }
    }
}

/// Per-rank directory entry: the length (in elements) of that rank's
/// payload and flags partitions, published once by its owner.
#[repr(C)]
struct DirEntry {
    payload_len: AtomicU64,
    flags_len: AtomicU64,
}

#[repr(C)]
struct DirControl {
    magic: AtomicU32,
    _pad: u32,
    // followed in memory by `world_size` DirEntry records
}

/// Distributed hash table substrate where every rank is an independent OS
/// process sharing POSIX shared memory segments.
pub struct ShmSubstrate {
    rank: usize,
    world_size: usize,
    session: String,
    gate_seg: ShmSegment,
    dir_seg: ShmSegment,
}

impl ShmSubstrate {
    /// Joins (and, for whichever rank arrives first, creates) the named
    /// session. `session` should be unique per run — e.g. a PID or
    /// timestamp supplied by the launching shell script — so that
    /// concurrent runs don't collide on segment names.
    pub fn join(rank: usize, world_size: usize, session: &str) -> Result<Self> {
        assert!(rank < world_size, "rank must be < world_size");

        let gate_name = format!("/kmerdht_{session}_gate");
        let (gate_seg, _) =
            ShmSegment::create_or_open_shared(&gate_name, std::mem::size_of::<GateControl>())?;
        let gate = unsafe { &*gate_seg.as_ptr().cast::<GateControl>() };
        init_gate(&gate.magic, || {
            gate.arrived.store(0, Ordering::Relaxed);
            gate.generation.store(0, Ordering::Relaxed);
        });

        let dir_size =
            std::mem::size_of::<DirControl>() + world_size * std::mem::size_of::<DirEntry>();
        let dir_name = format!("/kmerdht_{session}_dir");
        let (dir_seg, _) = ShmSegment::create_or_open_shared(&dir_name, dir_size)?;
        let dir_ctrl = unsafe { &*dir_seg.as_ptr().cast::<DirControl>() };
        init_gate(&dir_ctrl.magic, || {
            // zeroed already by finish_open(zero=false) only when freshly
            // created by the kernel; re-zero defensively for reused pages.
            for r in 0..world_size {
                let entry = dir_entry(&dir_seg, r);
                entry.payload_len.store(0, Ordering::Relaxed);
                entry.flags_len.store(0, Ordering::Relaxed);
            }
        });

        Ok(Self {
            rank,
            world_size,
            session: session.to_string(),
            gate_seg,
            dir_seg,
        })
    }

    fn gate(&self) -> &GateControl {
        // SAFETY: gate_seg was sized for exactly one GateControl in `join`.
        unsafe { &*self.gate_seg.as_ptr().cast::<GateControl>() }
    }

    fn segment_name(&self, array: &str, rank: usize) -> String {
        format!("/kmerdht_{}_{array}_r{rank}", self.session)
    }

    /// Removes this rank's segments. Call once, from the rank that owns
    /// them, after the table is no longer needed; other ranks simply stop
    /// mapping them. Rank 0 also removes the shared gate/directory.
    pub fn cleanup(&self) {
        let _ = ShmSegment::unlink(&self.segment_name("payload", self.rank));
        let _ = ShmSegment::unlink(&self.segment_name("flags", self.rank));
        if self.rank == 0 {
            let _ = ShmSegment::unlink(&format!("/kmerdht_{}_gate", self.session));
            let _ = ShmSegment::unlink(&format!("/kmerdht_{}_dir", self.session));
        }
    }

    /// Publishes this rank's lengths, barriers, then opens every other
    /// rank's segment for the named array using the lengths it reads back.
    fn publish_and_open(
        &self,
        array: &str,
        my_len: usize,
        element_size: usize,
        set_len: impl Fn(&DirEntry, u64),
        get_len: impl Fn(&DirEntry) -> u64,
    ) -> Vec<ShmSegment> {
        let own_name = self.segment_name(array, self.rank);
        let own = ShmSegment::create(&own_name, (my_len * element_size).max(1))
            .unwrap_or_else(|e| panic!("failed to create {own_name}: {e}"));

        set_len(dir_entry(&self.dir_seg, self.rank), my_len as u64);
        self.barrier();

        let mut out: Vec<Option<ShmSegment>> = (0..self.world_size).map(|_| None).collect();
        let mut own = Some(own);
        for r in 0..self.world_size {
            if r == self.rank {
                out[r] = own.take();
            } else {
                let len = get_len(dir_entry(&self.dir_seg, r)) as usize;
                let name = self.segment_name(array, r);
                let seg = ShmSegment::open_retrying(
                    &name,
                    (len * element_size).max(1),
                    Duration::from_secs(30),
                )
                .unwrap_or_else(|e| panic!("failed to open {name}: {e}"));
                out[r] = Some(seg);
            }
        }
        out.into_iter()
            .map(|o| o.expect("every rank's segment opened"))
            .collect()
    }
}

fn dir_entry(dir_seg: &ShmSegment, rank: usize) -> &DirEntry {
    // SAFETY: dir_seg holds one DirControl followed by world_size DirEntry
    // records, as sized in `join`; callers index within world_size.
    unsafe {
        let base = dir_seg
            .as_ptr()
            .add(std::mem::size_of::<DirControl>())
            .cast::<DirEntry>();
        &*base.add(rank)
    }
}

/// Directory of every rank's payload partition.
pub struct ShmPayload {
    segments: Vec<ShmSegment>,
}

/// Directory of every rank's flags partition.
pub struct ShmFlags {
    segments: Vec<ShmSegment>,
}

impl Substrate for ShmSubstrate {
    type Payload = ShmPayload;
    type Flags = ShmFlags;

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn alloc_payload(&self, len: usize) -> Self::Payload {
        let segments = self.publish_and_open(
            "payload",
            len,
            std::mem::size_of::<KmerRecord>(),
            |e, v| e.payload_len.store(v, Ordering::Release),
            |e| e.payload_len.load(Ordering::Acquire),
        );
        ShmPayload { segments }
    }

    fn alloc_flags(&self, len: usize) -> Self::Flags {
        let segments = self.publish_and_open(
            "flags",
            len,
            std::mem::size_of::<AtomicI32>(),
            |e, v| e.flags_len.store(v, Ordering::Release),
            |e| e.flags_len.load(Ordering::Acquire),
        );
        ShmFlags { segments }
    }

    fn put_payload(&self, arr: &Self::Payload, owner: usize, offset: usize, record: KmerRecord) {
        // SAFETY: exactly one rank ever wins the claim for (owner, offset)
        // and writes it; no read of this cell happens before the caller
        // has crossed the phase barrier.
        unsafe {
            let ptr = arr.segments[owner].as_ptr().cast::<KmerRecord>().add(offset);
            ptr.write(record);
        }
    }

    fn get_payload(&self, arr: &Self::Payload, owner: usize, offset: usize) -> KmerRecord {
        // SAFETY: only called after the phase barrier fences the write.
        unsafe {
            let ptr = arr.segments[owner].as_ptr().cast::<KmerRecord>().add(offset);
            ptr.read()
        }
    }

    fn get_flag(&self, arr: &Self::Flags, owner: usize, offset: usize) -> i32 {
        // SAFETY: segment is sized for `len` AtomicI32 slots by alloc_flags.
        let atomic = unsafe { &*arr.segments[owner].as_ptr().cast::<AtomicI32>().add(offset) };
        atomic.load(Ordering::Relaxed)
    }

    fn fetch_add_flag(&self, arr: &Self::Flags, owner: usize, offset: usize, delta: i32) -> i32 {
        // SAFETY: see get_flag.
        let atomic = unsafe { &*arr.segments[owner].as_ptr().cast::<AtomicI32>().add(offset) };
        atomic.fetch_add(delta, Ordering::Relaxed)
    }

    fn barrier(&self) {
        let gate = self.gate();
        let my_gen = gate.generation.load(Ordering::Acquire);
        let arrived = gate.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        if arrived as usize == self.world_size {
            gate.arrived.store(0, Ordering::Relaxed);
            gate.generation.fetch_add(1, Ordering::Release);
        } else {
            while gate.generation.load(Ordering::Acquire) == my_gen {
                std::thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the substrate with every "rank" as a thread in this
    /// process, which is legal: POSIX shared memory is addressable by any
    /// thread of any process that maps it, not only by separate processes.
    #[test]
    fn two_rank_roundtrip_over_real_shared_memory() {
        let session = format!("test{}", std::process::id());
        std::thread::scope(|scope| {
            let session0 = session.clone();
            let h0 = scope.spawn(move || {
                let s = ShmSubstrate::join(0, 2, &session0).unwrap();
                let payload = s.alloc_payload(2);
                let flags = s.alloc_flags(2);
                let rec = KmerRecord::new(crate::kmer::Key::default(), b'A', b'F');
                assert_eq!(s.fetch_add_flag(&flags, 0, 0, 1), 0);
                s.put_payload(&payload, 0, 0, rec);
                s.barrier();
                s.barrier();
                s.cleanup();
            });
            let session1 = session.clone();
            let h1 = scope.spawn(move || {
                let s = ShmSubstrate::join(1, 2, &session1).unwrap();
                let payload = s.alloc_payload(2);
                let _flags = s.alloc_flags(2);
                s.barrier();
                s.barrier();
                let got = s.get_payload(&payload, 0, 0);
                assert_eq!(got.forward_ext, b'A');
            });
            h0.join().unwrap();
            h1.join().unwrap();
        });
    }
}
