//! Path resolution for script builtins
//!
//! Fragments follow three conventions: `//x` is relative to the project root,
//! `/x` is absolute on the current volume and anything else is relative to the
//! directory resolved so far, which starts at the script's directory.

use glob::Pattern;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Resolve path fragments from the script directory
pub fn normalize_path<S: AsRef<str>>(script_dir: &Path, project_root: &Path, parts: &[S]) -> PathBuf {
    let mut result = script_dir.to_path_buf();

    for part in parts {
        let part = part.as_ref();
        if let Some(rest) = part.strip_prefix("//") {
            result = project_root.join(rest);
        } else if part.starts_with('/') {
            result = volume_root(&result).join(part.trim_start_matches('/'));
        } else {
            // join replaces the path when `part` is absolute
            result = result.join(part);
        }
    }

    clean(&result)
}

/// Resolve a glob fragment the way `normalize_path` resolves a path.
///
/// The directory the fragment is resolved against is escaped, so only
/// wildcards written in the fragment itself stay live.
pub fn normalize_pattern(base: &Path, project_root: &Path, fragment: &str) -> String {
    let full = normalize_path(base, project_root, &[fragment]);
    let anchor = if fragment.starts_with("//") {
        clean(project_root)
    } else if fragment.starts_with('/') || Path::new(fragment).is_absolute() {
        return full.to_string_lossy().into_owned();
    } else {
        clean(base)
    };

    // `..` in the fragment can climb above the anchor
    let prefix = match anchor.ancestors().find(|a| full.starts_with(a)) {
        Some(prefix) if !prefix.as_os_str().is_empty() => prefix,
        _ => return full.to_string_lossy().into_owned(),
    };
    let mut text = Pattern::escape(&prefix.to_string_lossy());
    if let Ok(rest) = full.strip_prefix(prefix) {
        if !rest.as_os_str().is_empty() {
            if !text.ends_with(['/', '\\']) {
                text.push(MAIN_SEPARATOR);
            }
            text.push_str(&rest.to_string_lossy());
        }
    }
    text
}

fn volume_root(path: &Path) -> PathBuf {
    let mut root = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => root.push(component.as_os_str()),
            _ => break,
        }
    }
    if root.as_os_str().is_empty() {
        root.push(MAIN_SEPARATOR.to_string());
    }
    root
}

/// Lexically clean a path: drop `.` components and fold `..` into their parent
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

/// Express `path` relative to `base`. Both must be absolute and clean.
pub fn relative_to(base: &Path, path: &Path) -> Option<PathBuf> {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = path.components().collect();

    if base.first() != target.first() {
        return None;
    }

    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &target[common..] {
        rel.push(component.as_os_str());
    }

    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Some(rel)
}

/// Display a path inside the project as `//relative`, anything else unchanged
pub fn simplify_path(project_root: &Path, path: &Path) -> String {
    match path.strip_prefix(project_root) {
        Ok(rel) => format!("//{}", to_slash(rel)),
        Err(_) => path.display().to_string(),
    }
}

/// Render a path with forward slashes
pub fn to_slash(path: &Path) -> String {
    let text = path.to_string_lossy();
    if MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_normalize_conventions() {
        let dir = Path::new("/proj/sub");
        let root = Path::new("/proj");

        assert_eq!(normalize_path(dir, root, &["a/b"]), PathBuf::from("/proj/sub/a/b"));
        assert_eq!(normalize_path(dir, root, &["//lib"]), PathBuf::from("/proj/lib"));
        assert_eq!(normalize_path(dir, root, &["/usr/bin"]), PathBuf::from("/usr/bin"));
        assert_eq!(normalize_path(dir, root, &["../x", "./y"]), PathBuf::from("/proj/x/y"));
        assert_eq!(
            normalize_path(dir, root, &["//out", "obj", "//src"]),
            PathBuf::from("/proj/src")
        );
        assert_eq!(normalize_path::<&str>(dir, root, &[]), PathBuf::from("/proj/sub"));
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_pattern_escapes_directories() {
        let dir = Path::new("/work/proj[1]/sub");
        let root = Path::new("/work/proj[1]");

        assert_eq!(normalize_pattern(dir, root, "*.c"), "/work/proj[[]1[]]/sub/*.c");
        assert_eq!(normalize_pattern(dir, root, "//inc/*.h"), "/work/proj[[]1[]]/inc/*.h");
        assert_eq!(normalize_pattern(dir, root, "../x?.txt"), "/work/proj[[]1[]]/x?.txt");
        assert_eq!(normalize_pattern(dir, root, "/opt/[ab].c"), "/opt/[ab].c");
        assert_eq!(normalize_pattern(dir, root, "."), "/work/proj[[]1[]]/sub");
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(clean(Path::new("a/..")), PathBuf::from("."));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_to() {
        let base = Path::new("/proj/build");
        assert_eq!(
            relative_to(base, Path::new("/proj/src/main.c")),
            Some(PathBuf::from("../src/main.c"))
        );
        assert_eq!(relative_to(base, base), Some(PathBuf::from(".")));
        assert_eq!(
            relative_to(base, Path::new("/proj/build/out")),
            Some(PathBuf::from("out"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_simplify_path() {
        let root = Path::new("/proj");
        assert_eq!(simplify_path(root, Path::new("/proj/tasks.rhai")), "//tasks.rhai");
        assert_eq!(simplify_path(root, Path::new("/elsewhere/x")), "/elsewhere/x");
    }
}
