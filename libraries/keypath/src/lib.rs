//! Key paths are dot-delimited strings such as `team.eng.alice`. The sync service treats them as flat keys,
//! while the data viewer treats every segment as one level of a tree.
//!
//! Listen patterns use the same syntax plus two wildcards: `*` stands for exactly one segment, and `#` (only
//! allowed as the final segment) stands for one or more remaining segments.

use std::cmp::Ordering;

pub const SEPARATOR: char = '.';
pub const MAX_SEGMENTS: usize = 16;
pub const MAX_KEY_LENGTH: usize = 200;

const SINGLE_WILDCARD: &str = "*";
const MULTI_WILDCARD: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyPathError {
    #[error("key must not be empty")]
    Empty,
    #[error("key has {0} segments, at most {MAX_SEGMENTS} are allowed")]
    TooManySegments(usize),
    #[error("key is {0} bytes long, at most {MAX_KEY_LENGTH} are allowed")]
    TooLong(usize),
    #[error("key contains an empty segment")]
    EmptySegment,
    #[error("segment {0:?} contains whitespace")]
    Whitespace(String),
    #[error("wildcard segment {0:?} is only allowed in listen patterns")]
    Wildcard(String),
    #[error("`#` may only appear as the last segment of a pattern")]
    MisplacedMultiWildcard,
}

pub fn split(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).collect()
}

pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            path.push(SEPARATOR);
        }
        path.push_str(segment.as_ref());
    }
    path
}

/// Sibling order. Plain lexicographic comparison of the full ids.
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

/// `None` for top-level keys.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once(SEPARATOR).map(|(parent, _)| parent)
}

pub fn last_segment(path: &str) -> &str {
    path.rsplit_once(SEPARATOR)
        .map(|(_, segment)| segment)
        .unwrap_or(path)
}

pub fn child(parent: Option<&str>, segment: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}{SEPARATOR}{segment}"),
        None => segment.to_string(),
    }
}

/// Every proper ancestor of `path`, outermost first. `a.b.c` yields `a`, `a.b`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices(SEPARATOR).map(|(i, _)| &path[..i])
}

/// Position at which `id` belongs in `siblings`, which must already be sorted by [`compare_paths`].
/// If an equal id is present, its index is returned.
pub fn insertion_index<S: AsRef<str>>(siblings: &[S], id: &str) -> usize {
    match siblings.binary_search_by(|sibling| compare_paths(sibling.as_ref(), id)) {
        Ok(i) | Err(i) => i,
    }
}

/// Checks that `path` names a concrete key that can be written or deleted.
pub fn validate(path: &str) -> Result<(), KeyPathError> {
    validate_shape(path)?;
    for segment in split(path) {
        if segment == SINGLE_WILDCARD || segment == MULTI_WILDCARD {
            return Err(KeyPathError::Wildcard(segment.to_string()));
        }
    }
    Ok(())
}

/// Checks that `pattern` is a usable listen pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), KeyPathError> {
    validate_shape(pattern)?;
    let segments = split(pattern);
    let last = segments.len() - 1;
    if segments[..last].contains(&MULTI_WILDCARD) {
        return Err(KeyPathError::MisplacedMultiWildcard);
    }
    Ok(())
}

fn validate_shape(path: &str) -> Result<(), KeyPathError> {
    if path.is_empty() {
        return Err(KeyPathError::Empty);
    }
    if path.len() > MAX_KEY_LENGTH {
        return Err(KeyPathError::TooLong(path.len()));
    }
    let segments = split(path);
    if segments.len() > MAX_SEGMENTS {
        return Err(KeyPathError::TooManySegments(segments.len()));
    }
    for segment in segments {
        if segment.is_empty() {
            return Err(KeyPathError::EmptySegment);
        }
        if segment.chars().any(char::is_whitespace) {
            return Err(KeyPathError::Whitespace(segment.to_string()));
        }
    }
    Ok(())
}

/// Whether the concrete `key` is covered by the listen `pattern`.
pub fn matches(pattern: &str, key: &str) -> bool {
    let pattern = split(pattern);
    let key = split(key);

    for (i, expected) in pattern.iter().enumerate() {
        if *expected == MULTI_WILDCARD {
            return key.len() > i;
        }
        let Some(actual) = key.get(i) else {
            return false;
        };
        if *expected != SINGLE_WILDCARD && expected != actual {
            return false;
        }
    }
    pattern.len() == key.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_join() {
        for path in ["a", "a.b", "team.eng.alice", "", "a..b", "room/x"] {
            assert_eq!(join(&split(path)), path);
        }
        assert_eq!(split("team.eng.alice"), vec!["team", "eng", "alice"]);
    }

    #[test]
    fn test_parent_and_child() {
        assert_eq!(parent("a.b.c"), Some("a.b"));
        assert_eq!(parent("a"), None);
        assert_eq!(last_segment("a.b.c"), "c");
        assert_eq!(last_segment("a"), "a");
        assert_eq!(child(Some("a.b"), "c"), "a.b.c");
        assert_eq!(child(None, "a"), "a");
        assert_eq!(ancestors("a.b.c").collect::<Vec<_>>(), vec!["a", "a.b"]);
        assert_eq!(ancestors("a").count(), 0);
    }

    #[test]
    fn test_insertion_keeps_order() {
        let mut siblings = vec!["a.b", "a.d", "a.f"];
        for id in ["a.e", "a.a", "a.z", "a.c", "a.d"] {
            let i = insertion_index(&siblings, id);
            siblings.insert(i, id);
            assert!(siblings.windows(2).all(|w| compare_paths(w[0], w[1]).is_le()));
        }
        assert_eq!(insertion_index::<&str>(&[], "x"), 0);
    }

    #[test]
    fn test_uppercase_sorts_first() {
        let mut siblings: Vec<String> = Vec::new();
        for id in ["b", "B", "a", "A"] {
            let i = insertion_index(&siblings, id);
            siblings.insert(i, id.to_string());
        }
        assert_eq!(siblings, vec!["A", "B", "a", "b"]);
    }

    #[test]
    fn test_validate() {
        assert_eq!(validate("a.b.c"), Ok(()));
        assert_eq!(validate(""), Err(KeyPathError::Empty));
        assert_eq!(validate("a..b"), Err(KeyPathError::EmptySegment));
        assert_eq!(
            validate("Node Name"),
            Err(KeyPathError::Whitespace("Node Name".to_string()))
        );
        assert_eq!(validate("a.*"), Err(KeyPathError::Wildcard("*".to_string())));
        let deep = vec!["x"; MAX_SEGMENTS + 1];
        assert_eq!(
            validate(&join(&deep)),
            Err(KeyPathError::TooManySegments(MAX_SEGMENTS + 1))
        );
        let long = "x".repeat(MAX_KEY_LENGTH + 1);
        assert_eq!(validate(&long), Err(KeyPathError::TooLong(MAX_KEY_LENGTH + 1)));
    }

    #[test]
    fn test_validate_pattern() {
        assert_eq!(validate_pattern("#"), Ok(()));
        assert_eq!(validate_pattern("a.*.c"), Ok(()));
        assert_eq!(
            validate_pattern("a.#.c"),
            Err(KeyPathError::MisplacedMultiWildcard)
        );
    }

    #[test]
    fn test_matches() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "a.b.c"));
        assert!(!matches("a.b.c", "a.b"));
        assert!(matches("a.*", "a.x"));
        assert!(!matches("a.*", "a.x.y"));
        assert!(matches("a.#", "a.x.y"));
        assert!(!matches("a.#", "a"));
        assert!(matches("#", "anything.at.all"));
        assert!(matches("room/x", "room/x"));
    }
}
