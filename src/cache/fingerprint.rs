//! Cache fingerprinting (§4.1)
//!
//! A fingerprint is deterministic over `(prefix_tag, normalized query,
//! schema version)` via SHA-256 -> hex, so identical queries produce
//! identical fingerprints across process restarts.

use sha2::{Digest, Sha256};

/// Schema version baked into every fingerprint. Bump this if the shape of
/// cached content ever changes incompatibly, to avoid serving stale entries
/// under a new format.
pub const SCHEMA_VERSION: &str = "v1.0";

/// Normalize a query string for fingerprinting: trim, collapse internal
/// whitespace, lowercase. Two queries differing only in casing or spacing
/// fingerprint identically.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Compute the fingerprint for `(prefix_tag, query, SCHEMA_VERSION)`.
pub fn fingerprint(prefix_tag: &str, query: &str) -> String {
    let normalized = normalize_query(query);
    let mut hasher = Sha256::new();
    hasher.update(prefix_tag.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized.as_bytes());
    hasher.update(b"\0");
    hasher.update(SCHEMA_VERSION.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = fingerprint("fact_v1", "What was Q1 2025 revenue?");
        let b = fingerprint("fact_v1", "What was Q1 2025 revenue?");
        assert_eq!(a, b);
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        let a = fingerprint("fact_v1", "What was Q1 2025 revenue?");
        let b = fingerprint("fact_v1", "  what   was q1 2025   revenue?  ");
        assert_eq!(a, b);
    }

    #[test]
    fn different_prefix_tags_differ() {
        let a = fingerprint("fact_v1", "same query");
        let b = fingerprint("other_ns", "same query");
        assert_ne!(a, b);
    }

    #[test]
    fn different_queries_differ() {
        let a = fingerprint("fact_v1", "query one");
        let b = fingerprint("fact_v1", "query two");
        assert_ne!(a, b);
    }

    #[test]
    fn is_hex_sha256_length() {
        let fp = fingerprint("fact_v1", "anything");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
