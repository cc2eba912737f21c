//! Configuration tests
//!
//! These are compile-time + round-trip guards: when a new config field is
//! added, these tests catch TOML shape mistakes (e.g. wrong section nesting)
//! before they reach a running process.

use super::*;

#[test]
fn default_config_cache_section_round_trips() {
    let toml_str = r#"
        [cache]
        prefix_tag = "fact_v2"
        min_tokens = 80
        max_size = "20MB"
        ttl_seconds = 7200
    "#;
    let file: FileConfig = toml::from_str(toml_str).expect("valid toml");
    let cache = CacheConfig::from_file(file.cache).expect("valid cache config");
    assert_eq!(cache.prefix_tag, "fact_v2");
    assert_eq!(cache.min_tokens, 80);
    assert_eq!(cache.max_bytes, 20 * 1024 * 1024);
    assert_eq!(cache.ttl_seconds, 7200);
}

#[test]
fn unknown_keys_are_ignored_not_fatal() {
    let toml_str = r#"
        some_future_option = "whatever"

        [cache]
        prefix_tag = "fact_v1"
        not_a_real_field = 123
    "#;
    assert!(toml::from_str::<FileConfig>(toml_str).is_ok());
}

#[test]
fn malformed_toml_is_rejected() {
    let toml_str = "[cache\nprefix_tag = ";
    assert!(toml::from_str::<FileConfig>(toml_str).is_err());
}

#[test]
fn empty_file_config_yields_all_defaults() {
    let file = FileConfig::default();
    let cache = CacheConfig::from_file(file.cache).unwrap();
    let defaults = CacheConfig::default();
    assert_eq!(cache.prefix_tag, defaults.prefix_tag);
    assert_eq!(cache.min_tokens, defaults.min_tokens);
    assert_eq!(cache.max_bytes, defaults.max_bytes);
}
