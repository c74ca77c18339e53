//! Blob store write check.
//!
//! Writes a small text object and a 1x1 PNG under `test/` and reports one
//! pass/fail line per check. Check objects use fixed paths, so repeated
//! runs overwrite instead of accumulating.

use std::fmt;

use serde::Serialize;

use crate::blob::{BlobStore, TransferState};

pub const CHECK_PREFIX: &str = "test";

const TEXT_CHECK_BODY: &[u8] = b"avatarflow storage check";

/// Smallest valid grayscale PNG (1x1).
pub const CHECK_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0xb5, 0x1c, 0x0c,
    0x02, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x64, 0x60, 0x00, 0x00,
    0x00, 0x06, 0x00, 0x02, 0x30, 0x81, 0xd0, 0x2f, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44,
    0xae, 0x42, 0x60, 0x82,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub path: String,
    /// Locator on success, failure reason otherwise.
    pub outcome: Result<String, String>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(locator) => write!(f, "PASS {} -> {}", self.name, locator),
            Err(reason) => write!(f, "FAIL {} ({}): {}", self.name, self.path, reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(CheckResult::passed)
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{result}")?;
        }
        Ok(())
    }
}

/// Run every check against `store`. Never fails; failures are reported.
pub async fn run_checks(store: &dyn BlobStore) -> CheckReport {
    let checks: [(&'static str, String, &[u8], &str); 2] = [
        ("text", format!("{CHECK_PREFIX}/string-test.txt"), TEXT_CHECK_BODY, "text/plain"),
        ("png", format!("{CHECK_PREFIX}/base64-test.png"), CHECK_PNG, "image/png"),
    ];

    let mut results = Vec::with_capacity(checks.len());
    for (name, path, body, content_type) in checks {
        let outcome = match store.put(&path, body.to_vec(), content_type).await {
            Ok(receipt) if receipt.state == TransferState::Success => Ok(store.locator(&path)),
            Ok(receipt) => Err(format!("transfer ended in state '{}'", receipt.state)),
            Err(e) => Err(e.to_string()),
        };
        results.push(CheckResult {
            name,
            path,
            outcome,
        });
    }

    CheckReport { results }
}
