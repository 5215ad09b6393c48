// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # kmerdht — distributed open-addressing hash table over one-sided RMA
//!
//! A global hash table partitioned across a cluster of processes, built to
//! host k-mer records for distributed-memory contig assembly. The core
//! contract — partitioning, a claim/commit protocol over a remote atomic
//! primitive, and a bounded linear-probe engine — has no central
//! coordinator and no locks: every slot is owned by exactly one process,
//! and concurrent writers resolve collisions with a single remote
//! fetch-add.
//!
//! ## Layers
//!
//! - [`partition`] — deterministic slot → `(rank, offset)` mapping.
//! - [`substrate`] — the one-sided RMA collaborator ([`substrate::Substrate`]),
//!   with an in-process [`substrate::thread::ThreadSubstrate`] and an
//!   OS-process [`substrate::shm::ShmSubstrate`] (feature `shm`).
//! - [`slot`] — the claim/commit discipline over the flags array.
//! - [`table`] — the probe engine: [`table::Table::insert`]/[`table::Table::find`].
//!
//! ## Phases
//!
//! A [`table::Table`] moves through exactly three phases: constructing,
//! open for insert, open for find. Two collective barriers gate the
//! transitions — see [`table::Table::open_for_insert`] and
//! [`table::Table::open_for_find`]. Crossing them is the caller's
//! responsibility; the core does not call them for you, because exactly
//! when all of a rank's own inserts are queued is a driver-level decision.
//!
//! ## Non-goals
//!
//! Deletion, resizing, rehashing, persistence, iteration order, fairness
//! between writers, load-factor adaptation, and duplicate-key rejection
//! beyond what the probe contract yields are all out of scope. See
//! `SPEC_FULL.md` for the full rationale.

pub mod error;
pub mod kmer;
pub mod partition;
pub mod slot;
pub mod substrate;
pub mod table;

pub use error::TableError;
pub use kmer::{Key, KmerParseError, KmerRecord, KMER_LEN, NO_EXTENSION};
pub use substrate::Substrate;
pub use table::Table;
