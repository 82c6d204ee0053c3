//! Key Pattern Module
//!
//! Invalidation and lookup patterns: a literal prefix with at most one
//! wildcard, which must be trailing. A pattern without a wildcard matches a
//! single key exactly.

/// The only wildcard a pattern may carry.
pub const WILDCARD: char = '*';

/// Separator between key segments.
pub const SEPARATOR: char = ':';

/// Returns true if `key` matches `pattern`.
pub fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix(WILDCARD) {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// A pattern is valid when its only wildcard, if any, is the last character.
pub fn is_valid(pattern: &str) -> bool {
    match pattern.find(WILDCARD) {
        Some(index) => index == pattern.len() - 1,
        None => !pattern.is_empty(),
    }
}

/// The part of the pattern before the wildcard.
pub fn literal_prefix(pattern: &str) -> &str {
    pattern.strip_suffix(WILDCARD).unwrap_or(pattern)
}

/// Converts a pattern into a Redis glob, escaping glob metacharacters in the
/// literal part so that only the trailing wildcard stays special.
pub fn to_redis_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 4);
    for c in literal_prefix(pattern).chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            glob.push('\\');
        }
        glob.push(c);
    }
    if pattern.ends_with(WILDCARD) {
        glob.push(WILDCARD);
    }
    glob
}
