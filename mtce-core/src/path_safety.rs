//! Path-safety and share-hash predicates (spec §4.H, tested by §8
//! property 1).

/// A share-relative path is valid iff it:
/// - does not start with `/` or `\`
/// - contains no `\` anywhere
/// - splits into at least one nonempty `/`-separated segment
/// - has no `..` segment
pub fn is_valid_relative_path(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.starts_with('/') || s.starts_with('\\') {
        return false;
    }
    if s.contains('\\') {
        return false;
    }
    let segments: Vec<&str> = s.split('/').collect();
    if segments.iter().all(|seg| seg.is_empty()) {
        return false;
    }
    for seg in &segments {
        if seg.is_empty() {
            continue;
        }
        if *seg == ".." {
            return false;
        }
    }
    true
}

/// Nonempty, length <= 64, matches `[A-Za-z0-9_-]+`.
pub fn is_valid_share_hash(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 {
        return false;
    }
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        assert!(!is_valid_relative_path("a/../b"));
        assert!(!is_valid_relative_path(".."));
        assert!(!is_valid_relative_path("../a"));
    }

    #[test]
    fn accepts_plain_nested_path() {
        assert!(is_valid_relative_path("a/b/c"));
        assert!(is_valid_relative_path("pic.jpg"));
    }

    #[test]
    fn rejects_leading_slash_and_backslash() {
        assert!(!is_valid_relative_path("/a/b"));
        assert!(!is_valid_relative_path("\\a\\b"));
        assert!(!is_valid_relative_path("a\\b"));
        assert!(!is_valid_relative_path(""));
    }

    #[test]
    fn share_hash_boundary() {
        assert!(is_valid_share_hash(&"a".repeat(64)));
        assert!(!is_valid_share_hash(&"a".repeat(65)));
        assert!(!is_valid_share_hash(""));
        assert!(!is_valid_share_hash("bad/hash"));
        assert!(is_valid_share_hash("abc-DEF_123"));
    }
}
