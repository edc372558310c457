// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lectern-store: Durable records for the Lectern pipeline.
//
// Pages, classifications, engine attempts, fused results and review tasks go
// through the `RecordStore` contract (SQLite implementation included). State
// transitions land in a separate append-only audit log. Page content is
// fingerprinted with SHA-256.

pub mod audit;
pub mod integrity;
pub mod sqlite;
pub mod store;

pub use audit::{AuditEntry, AuditLog};
pub use integrity::{hash_bytes, verify_hash};
pub use sqlite::SqliteStore;
pub use store::RecordStore;
