// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page content fingerprints (SHA-256, lowercase hex).
//
// A page is identified by content as well as id: the digest recorded at intake
// is checked again whenever the bytes are resubmitted for reprocessing.

use lectern_core::error::{LecternError, Result};
use sha2::{Digest, Sha256};

/// SHA-256 of `data` as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Check `data` against a digest recorded earlier.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hash_bytes(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        return Ok(());
    }
    Err(LecternError::IntegrityMismatch {
        expected: expected_hex.to_owned(),
        actual,
    })
}
