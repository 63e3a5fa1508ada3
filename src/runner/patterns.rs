//! Glob pattern resolution for task inputs, outputs and skip lists

use crate::error::PatternError;
use glob::Pattern;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// The path a pattern names when it has no live wildcard.
///
/// `[x]` quoting one metacharacter is how `Pattern::escape` protects
/// directory names, so it reads as that character.
fn literal_path(pattern: &str) -> Option<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' | '?' => return None,
            '[' => {
                let mut ahead = chars.clone();
                match (ahead.next(), ahead.next()) {
                    (Some(quoted @ ('[' | ']' | '*' | '?')), Some(']')) => {
                        out.push(quoted);
                        chars = ahead;
                    }
                    _ => return None,
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

/// Resolve `patterns` against `base`.
///
/// Wildcard patterns expand to the existing paths they match, in sorted order,
/// and contribute nothing when they match nothing. Literal paths are returned
/// whether or not they exist. Characters in `base` are never wildcards.
pub fn resolve_patterns(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, PatternError> {
    let mut result = Vec::new();

    for pattern in patterns {
        if let Some(literal) = literal_path(pattern) {
            // join keeps absolute paths as they are
            result.push(base.join(literal));
            continue;
        }

        let text = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            let mut prefix = Pattern::escape(&base.to_string_lossy());
            if !prefix.ends_with(['/', '\\']) {
                prefix.push(MAIN_SEPARATOR);
            }
            prefix + pattern.as_str()
        };
        let matches = glob::glob(&text).map_err(|e| PatternError::Invalid {
            pattern: pattern.clone(),
            message: e.msg.to_string(),
        })?;

        for entry in matches {
            match entry {
                Ok(path) => result.push(path),
                Err(e) => {
                    let path = e.path().to_path_buf();
                    return Err(PatternError::Walk {
                        path,
                        source: e.into_error(),
                    });
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wildcards_expand_to_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.c"), "").unwrap();
        fs::write(temp_dir.path().join("a.c"), "").unwrap();
        fs::write(temp_dir.path().join("a.h"), "").unwrap();

        let result = resolve_patterns(temp_dir.path(), &patterns(&["*.c"])).unwrap();
        assert_eq!(
            result,
            vec![temp_dir.path().join("a.c"), temp_dir.path().join("b.c")]
        );
    }

    #[test]
    fn test_recursive_wildcard() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("src/deep")).unwrap();
        fs::write(temp_dir.path().join("src/deep/x.rs"), "").unwrap();
        fs::write(temp_dir.path().join("src/y.rs"), "").unwrap();

        let result = resolve_patterns(temp_dir.path(), &patterns(&["src/**/*.rs"])).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.contains(&temp_dir.path().join("src/deep/x.rs")));
    }

    #[test]
    fn test_unmatched_wildcard_is_dropped_and_literal_kept() {
        let temp_dir = TempDir::new().unwrap();

        let result =
            resolve_patterns(temp_dir.path(), &patterns(&["*.none", "missing.txt"])).unwrap();
        assert_eq!(result, vec![temp_dir.path().join("missing.txt")]);
    }

    #[test]
    fn test_metacharacters_in_base_are_literal() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("proj[1]");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("a.c"), "").unwrap();

        let result = resolve_patterns(&base, &patterns(&["*.c", "missing.txt"])).unwrap();
        assert_eq!(result, vec![base.join("a.c"), base.join("missing.txt")]);

        let escaped = format!("{}/b.txt", Pattern::escape(&base.to_string_lossy()));
        let result = resolve_patterns(&base, &[escaped]).unwrap();
        assert_eq!(result, vec![base.join("b.txt")]);
    }

    #[test]
    fn test_literal_path() {
        assert_eq!(literal_path("a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(literal_path("proj[[]1[]]/x").as_deref(), Some("proj[1]/x"));
        assert_eq!(literal_path("src/*.c"), None);
        assert_eq!(literal_path("file?.o"), None);
        assert_eq!(literal_path("[ab].c"), None);
    }

    #[test]
    fn test_invalid_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let err = resolve_patterns(temp_dir.path(), &patterns(&["a/***"])).unwrap_err();
        assert!(matches!(err, PatternError::Invalid { .. }));
    }
}
