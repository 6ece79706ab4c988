//! Shared path and name utilities.
//!
//! Index names are compared ASCII case-insensitively everywhere: sibling order,
//! listing dedup and lookup all go through [`name_cmp`]. Relative paths are
//! `/`-separated and never carry a leading or trailing separator.

use std::cmp::Ordering;
use std::env;
use std::path::{Component, Path, PathBuf};

/// Case-insensitive (ASCII-folded) byte comparison of two names.
#[must_use]
pub fn name_cmp(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// Whether two names are equal under the index's case folding.
#[must_use]
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Listing order: case-folded first, raw bytes as tie-breaker.
#[must_use]
pub fn listing_cmp(a: &str, b: &str) -> Ordering {
    name_cmp(a, b).then_with(|| a.cmp(b))
}

/// Join a relative directory and a child name.
#[must_use]
pub fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Split `a/b/c` into `(Some("a/b"), "c")`; a single segment has no parent.
#[must_use]
pub fn split_parent(rel: &str) -> (Option<&str>, &str) {
    match rel.rfind('/') {
        Some(pos) => (Some(&rel[..pos]), &rel[pos + 1..]),
        None => (None, rel),
    }
}

/// Non-empty `/`-separated segments of a relative path.
pub fn segments(rel: &str) -> impl Iterator<Item = &str> {
    rel.split('/').filter(|s| !s.is_empty())
}

/// Resolve a relative index path below a local root.
#[must_use]
pub fn local_path(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in segments(rel) {
        path.push(segment);
    }
    path
}

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_cmp_folds_ascii_case() {
        assert_eq!(name_cmp("Readme.md", "readme.MD"), Ordering::Equal);
        assert_eq!(name_cmp("a", "B"), Ordering::Less);
        assert_eq!(name_cmp("Zeta", "alpha"), Ordering::Greater);
        assert_eq!(name_cmp("abc", "abcd"), Ordering::Less);
        assert!(names_equal("DIR", "dir"));
    }

    #[test]
    fn listing_cmp_breaks_ties_by_raw_bytes() {
        assert_eq!(listing_cmp("A.txt", "a.txt"), Ordering::Less);
        assert_eq!(listing_cmp("a.txt", "B.txt"), Ordering::Less);
    }

    #[test]
    fn relative_path_helpers() {
        assert_eq!(join_rel("", "a"), "a");
        assert_eq!(join_rel("a/b", "c"), "a/b/c");
        assert_eq!(split_parent("a/b/c"), (Some("a/b"), "c"));
        assert_eq!(split_parent("top"), (None, "top"));
        assert_eq!(segments("a//b/").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(
            local_path(Path::new("/base"), "x/y"),
            PathBuf::from("/base/x/y")
        );
    }

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn handles_parent_at_root() {
        #[cfg(unix)]
        {
            let input = Path::new("/../foo");
            let resolved = normalize_syntactic(input);
            assert_eq!(resolved, Path::new("/foo"));
        }
    }
}
