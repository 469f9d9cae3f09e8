//! Content fingerprints of result sequences.
//!
//! Two runs over the same bars must emit the same results; comparing blake3
//! digests of their canonical form is how recomputes are checked against the
//! stored table without shipping every row around.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::LimitResult;

/// Hex blake3 digest of a canonical result sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultFingerprint(pub String);

impl ResultFingerprint {
    /// Fingerprint results in `(code, date)` order, whatever order they arrive in.
    pub fn of(results: &[LimitResult]) -> Self {
        let mut sorted: Vec<&LimitResult> = results.iter().collect();
        sorted.sort_by(|a, b| (&a.code, a.date).cmp(&(&b.code, b.date)));

        let mut hasher = blake3::Hasher::new();
        for r in sorted {
            let flag = r
                .limit_status
                .as_flag()
                .map_or_else(|| "-".to_string(), |f| f.to_string());
            let line = format!(
                "{}|{}|{}|{}|{}|{}\n",
                r.code,
                r.date,
                flag,
                r.chain_height,
                u8::from(r.is_fried),
                r.board_type
            );
            hasher.update(line.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ResultFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
