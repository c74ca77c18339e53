//! Inline (`data:`) payload helpers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode bytes as a base64 `data:` URI.
pub fn encode(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{content_type};base64,{}", STANDARD.encode(bytes))
}

/// Length of [`encode`]'s output without building it.
pub fn encoded_len(content_type: &str, byte_len: usize) -> usize {
    "data:".len() + content_type.len() + ";base64,".len() + byte_len.div_ceil(3) * 4
}

/// Whether `source` is an inline payload rather than a locator.
pub fn is_data_uri(source: &str) -> bool {
    source.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_prefix() {
        assert_eq!(encode("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn encoded_len_matches_encode() {
        for n in [0usize, 1, 2, 3, 4, 50, 1_000] {
            let bytes = vec![7u8; n];
            assert_eq!(encoded_len("image/jpeg", n), encode("image/jpeg", &bytes).len());
        }
    }

    #[test]
    fn detects_inline_sources() {
        assert!(is_data_uri("data:image/jpeg;base64,AAAA"));
        assert!(!is_data_uri("https://cdn.example.com/a.jpg"));
    }
}
