// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed error kinds for `spec.md` §7's error taxonomy.
//!
//! [`Table::insert`](crate::table::Table::insert) and
//! [`Table::find`](crate::table::Table::find) keep returning plain `bool`
//! per `spec.md` §6 — that boolean contract is an explicit invariant of the
//! core. [`TableError`] exists for callers (the CLI driver, diagnostics)
//! that want to carry the *kind* of failure as a typed value rather than
//! re-deriving it from a bare `false`.

use std::fmt;

/// The two outcome kinds `spec.md` §7 describes as "returned as boolean
/// results": capacity exhaustion on insert, and key absence on find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// `insert` exhausted its probe budget without claiming a slot.
    Full,
    /// `find` exhausted its probe budget without locating the key.
    NotFound,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "HashMap is full"),
            Self::NotFound => write!(f, "k-mer not found in hashmap"),
        }
    }
}

impl std::error::Error for TableError {}
