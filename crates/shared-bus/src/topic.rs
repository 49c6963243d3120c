//! # Topic Routing
//!
//! Topic-exchange matching of routing keys against binding patterns.
//! Keys and patterns are dot-separated words.
//!
//! - `*` matches exactly one word
//! - `#` matches zero or more words
//!
//! ```text
//! commits.*      matches  commits.node1_signal
//! commits.#      matches  commits  |  commits.a.b
//! commits.*      rejects  commits  |  commits.a.b
//! ```

/// Routing key for a message emitted under `prefix` with suffix `key`.
#[must_use]
pub fn routing_key(prefix: &str, key: &str) -> String {
    format!("{prefix}.{key}")
}

/// Default binding for a queue listening under `prefix`.
#[must_use]
pub fn default_binding(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// True when `routing_key` is matched by the binding `pattern`.
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) if word == "*" || word == first => {
                matches_words(rest, key_rest)
            }
            _ => false,
        },
    }
}
