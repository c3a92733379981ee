//! Storage key derivation.

/// Sanitize a caller-supplied cache key for object storage. Every character
/// outside `[A-Za-z0-9_-]` is replaced with `_`. Distinct keys that
/// sanitize to the same value collide; callers needing collision-free keys
/// must pre-sanitize.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Normalize a key prefix so that a non-empty prefix ends with `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Derive the real storage key: sanitized key behind a normalized prefix.
pub fn real_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{}", sanitize_key(key))
}
