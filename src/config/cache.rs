//! Cache store configuration (§4.1, §6.5)

use serde::Deserialize;

/// Tunables for the cache store (C1).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace string partitioning cache entries.
    pub prefix_tag: String,
    /// Minimum token count a candidate response must have to be admitted.
    pub min_tokens: u64,
    /// Time-to-live for a stored entry, in seconds.
    pub ttl_seconds: u64,
    /// Maximum total bytes the cache may hold before LRU eviction kicks in.
    pub max_bytes: u64,
    /// When evicting, drain down to this fraction of `max_bytes`.
    pub target_fill_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix_tag: "fact_v1".to_string(),
            min_tokens: 50,
            ttl_seconds: 3600,
            max_bytes: 10 * 1024 * 1024,
            target_fill_ratio: 0.8,
        }
    }
}

/// Cache settings as loaded from the config file's `[cache]` section.
#[derive(Debug, Deserialize, Default)]
pub struct FileCacheConfig {
    pub prefix_tag: Option<String>,
    pub min_tokens: Option<u64>,
    pub ttl_seconds: Option<u64>,
    pub max_size: Option<String>,
    pub target_fill_ratio: Option<f64>,
}

impl CacheConfig {
    pub fn from_file(file: Option<FileCacheConfig>) -> Result<Self, String> {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let max_bytes = match file.max_size {
            Some(s) => parse_size(&s)?,
            None => defaults.max_bytes,
        };

        let target_fill_ratio = file.target_fill_ratio.unwrap_or(defaults.target_fill_ratio);
        if !(0.5..=0.95).contains(&target_fill_ratio) {
            return Err(format!(
                "target_fill_ratio must be between 0.5 and 0.95, got {}",
                target_fill_ratio
            ));
        }

        let min_tokens = file.min_tokens.unwrap_or(defaults.min_tokens);
        if min_tokens < 1 {
            return Err("min_tokens must be >= 1".to_string());
        }

        let ttl_seconds = file.ttl_seconds.unwrap_or(defaults.ttl_seconds);
        if ttl_seconds < 60 {
            return Err("ttl_seconds must be >= 60".to_string());
        }

        Ok(Self {
            prefix_tag: file.prefix_tag.unwrap_or(defaults.prefix_tag),
            min_tokens,
            ttl_seconds,
            max_bytes,
            target_fill_ratio,
        })
    }
}

/// Parse a human size string like `"10MB"`, `"512K"`, `"1G"` using binary
/// (1024-based) units, matching `CACHE_MAX_SIZE`'s documented format (§6.5).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let upper = s.to_uppercase();
    let (digits, multiplier) = if let Some(prefix) = upper.strip_suffix("GB").or_else(|| upper.strip_suffix('G')) {
        (prefix, 1024u64 * 1024 * 1024)
    } else if let Some(prefix) = upper.strip_suffix("MB").or_else(|| upper.strip_suffix('M')) {
        (prefix, 1024u64 * 1024)
    } else if let Some(prefix) = upper.strip_suffix("KB").or_else(|| upper.strip_suffix('K')) {
        (prefix, 1024u64)
    } else if let Some(prefix) = upper.strip_suffix('B') {
        (prefix, 1u64)
    } else {
        (upper.as_str(), 1u64)
    };

    let value: f64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size string: {:?}", s))?;
    if value < 0.0 {
        return Err(format!("size must be non-negative: {:?}", s));
    }

    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_size_suffixes() {
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("512K").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("2048B").unwrap(), 2048);
        assert_eq!(parse_size("100").unwrap(), 100);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
    }

    #[test]
    fn matches_documented_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.prefix_tag, "fact_v1");
        assert_eq!(cfg.min_tokens, 50);
        assert_eq!(cfg.ttl_seconds, 3600);
        assert_eq!(cfg.max_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn rejects_fill_ratio_out_of_range() {
        let file = FileCacheConfig {
            target_fill_ratio: Some(0.99),
            ..Default::default()
        };
        assert!(CacheConfig::from_file(Some(file)).is_err());
    }
}
