//! Blob store path naming.
//!
//! Convention: `{namespace}/{identifier}/{millis}_{random}.{ext}`
//!
//! - `millis` is strictly increasing within the process, so two callers in
//!   the same process never share a stamp.
//! - `random` is [`RANDOM_SUFFIX_LEN`] lowercase alphanumerics, which keeps
//!   collisions across processes negligible even for identical stamps.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of the random component of paths and upload ids.
pub const RANDOM_SUFFIX_LEN: usize = 12;

/// Segment used when a caller's identifier sanitizes to nothing.
const FALLBACK_IDENTIFIER: &str = "anonymous";

static LAST_STAMP_MS: AtomicU64 = AtomicU64::new(0);

/// Current UNIX time in milliseconds, bumped forward when needed so every
/// call in this process returns a value greater than the previous one.
pub fn monotonic_millis() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_STAMP_MS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP_MS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Random lowercase alphanumeric string of `len` characters.
pub fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Correlation id for one upload attempt: `{millis}-{random}`.
pub fn upload_id() -> String {
    format!("{}-{}", monotonic_millis(), random_suffix(RANDOM_SUFFIX_LEN))
}

/// Build a unique blob path for a new object.
///
/// `namespace` and `identifier` are sanitized to a single path segment each.
///
/// ```
/// use avatarflow_core::naming::storage_path;
///
/// let path = storage_path("uploads", "public-user", "jpg");
/// assert!(path.starts_with("uploads/public-user/"));
/// assert!(path.ends_with(".jpg"));
/// ```
pub fn storage_path(namespace: &str, identifier: &str, ext: &str) -> String {
    format!(
        "{}/{}/{}_{}.{}",
        sanitize_segment(namespace),
        sanitize_segment(identifier),
        monotonic_millis(),
        random_suffix(RANDOM_SUFFIX_LEN),
        ext.trim_start_matches('.'),
    )
}

/// File extension for an image content type. Unknown types get `bin`.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_` and forbid
/// traversal segments.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_IDENTIFIER.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn path_has_expected_shape() {
        let path = storage_path("uploads", "public-user", "png");
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "uploads");
        assert_eq!(parts[1], "public-user");

        let (stamp, rest) = parts[2].split_once('_').unwrap();
        assert!(stamp.parse::<u64>().is_ok());
        let (random, ext) = rest.split_once('.').unwrap();
        assert_eq!(random.len(), RANDOM_SUFFIX_LEN);
        assert_eq!(ext, "png");
    }

    #[test]
    fn millis_strictly_increase() {
        let mut prev = monotonic_millis();
        for _ in 0..1_000 {
            let next = monotonic_millis();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn concurrent_paths_are_unique() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..500)
                        .map(|_| storage_path("uploads", "u", "jpg"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for path in handle.join().unwrap() {
                assert!(seen.insert(path), "duplicate storage path");
            }
        }
        assert_eq!(seen.len(), 4_000);
    }

    #[test]
    fn identifiers_cannot_escape_their_segment() {
        let path = storage_path("uploads", "../../etc", "jpg");
        assert!(path.starts_with("uploads/.._.._etc/"));
        let path = storage_path("uploads", "..", "jpg");
        assert!(path.starts_with("uploads/anonymous/"));
        let path = storage_path("uploads", "  ", "jpg");
        assert!(path.starts_with("uploads/anonymous/"));
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(extension_for_content_type("image/jpeg"), "jpg");
        assert_eq!(extension_for_content_type("IMAGE/PNG; charset=binary"), "png");
        assert_eq!(extension_for_content_type("image/webp"), "webp");
        assert_eq!(extension_for_content_type("application/octet-stream"), "bin");
    }

    #[test]
    fn upload_id_shape() {
        let id = upload_id();
        let (stamp, random) = id.split_once('-').unwrap();
        assert!(stamp.parse::<u64>().is_ok());
        assert_eq!(random.len(), RANDOM_SUFFIX_LEN);
        assert!(random.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
