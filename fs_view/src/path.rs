//! Path resolution logic
//!
//! This module handles parsing storage-relative paths and joining them onto
//! a storage root.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during path resolution
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// Path is malformed or tries to leave its root
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Path resolver
///
/// Handles splitting paths into components, validating syntax and joining
/// them onto a root.
pub struct PathResolver;

impl PathResolver {
    /// Splits a relative path into normalized components
    ///
    /// Repeated and trailing separators and `.` components are dropped. The
    /// empty path yields no components.
    ///
    /// # Examples
    ///
    /// ```
    /// use fs_view::PathResolver;
    ///
    /// let components = PathResolver::split_path("assets//a.bin").unwrap();
    /// assert_eq!(components, vec!["assets", "a.bin"]);
    ///
    /// assert!(PathResolver::split_path("../etc/passwd").is_err());
    /// assert!(PathResolver::split_path("/abs").is_err());
    /// ```
    pub fn split_path(path: &str) -> Result<Vec<&str>, PathError> {
        if path.starts_with('/') {
            return Err(PathError::InvalidPath(format!(
                "absolute path not allowed under a storage: {}",
                path
            )));
        }
        if path.contains('\0') {
            return Err(PathError::InvalidPath(
                "Path contains a NUL byte".to_string(),
            ));
        }

        let mut components = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(PathError::InvalidPath(format!(
                        "traversal component in {}",
                        path
                    )))
                }
                name => components.push(name),
            }
        }

        Ok(components)
    }

    /// Returns the normalized form of a relative path
    pub fn normalize(path: &str) -> Result<String, PathError> {
        Ok(Self::split_path(path)?.join("/"))
    }

    /// Resolves a relative path against a root
    ///
    /// # Examples
    ///
    /// ```
    /// use fs_view::PathResolver;
    /// use std::path::{Path, PathBuf};
    ///
    /// let abs = PathResolver::resolve(Path::new("/data/incremental/MT_1"), "assets/a.bin").unwrap();
    /// assert_eq!(abs, PathBuf::from("/data/incremental/MT_1/assets/a.bin"));
    /// ```
    pub fn resolve(root: &Path, path: &str) -> Result<PathBuf, PathError> {
        let mut resolved = root.to_path_buf();
        for component in Self::split_path(path)? {
            resolved.push(component);
        }
        Ok(resolved)
    }

    /// Validates a full path outside any storage, such as a bind target
    ///
    /// The path must be absolute and free of `..`; `.` and repeated
    /// separators are normalized away.
    pub fn absolute_target(path: &str) -> Result<PathBuf, PathError> {
        if path.contains('\0') {
            return Err(PathError::InvalidPath(
                "Path contains a NUL byte".to_string(),
            ));
        }
        let raw = Path::new(path);
        if !raw.is_absolute() {
            return Err(PathError::InvalidPath(format!(
                "target must be absolute: {}",
                path
            )));
        }

        let mut normalized = PathBuf::from("/");
        for component in raw.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(name) => normalized.push(name),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(PathError::InvalidPath(format!(
                        "traversal component in {}",
                        path
                    )))
                }
            }
        }
        Ok(normalized)
    }

    /// Splits a relative path into its parent path and final name
    ///
    /// Returns `None` for the root itself.
    pub fn split_parent(path: &str) -> Result<Option<(String, String)>, PathError> {
        let components = Self::split_path(path)?;
        match components.split_last() {
            None => Ok(None),
            Some((name, parent)) => Ok(Some((parent.join("/"), name.to_string()))),
        }
    }

    /// Validates a single path component name
    ///
    /// Returns true if the name is valid for a directory entry.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\0')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_path() {
        let result = PathResolver::split_path("todo.txt").unwrap();
        assert_eq!(result, vec!["todo.txt"]);
    }

    #[test]
    fn test_split_nested_path() {
        let result = PathResolver::split_path("docs/notes/todo.txt").unwrap();
        assert_eq!(result, vec!["docs", "notes", "todo.txt"]);
    }

    #[test]
    fn test_leading_slash_is_rejected() {
        let result = PathResolver::split_path("/docs/notes.txt");
        assert!(matches!(result, Err(PathError::InvalidPath(_))));
    }

    #[test]
    fn test_separators_are_normalized() {
        assert_eq!(
            PathResolver::split_path("docs//./notes.txt/").unwrap(),
            vec!["docs", "notes.txt"]
        );
        assert_eq!(PathResolver::normalize("a/./b//c/").unwrap(), "a/b/c");
    }

    #[test]
    fn test_empty_path_is_root() {
        assert!(PathResolver::split_path("").unwrap().is_empty());
        assert!(PathResolver::split_path(".").unwrap().is_empty());
        assert_eq!(
            PathResolver::resolve(Path::new("/r"), "").unwrap(),
            PathBuf::from("/r")
        );
    }

    #[test]
    fn test_dotdot_component() {
        for path in ["..", "docs/../notes.txt", "docs/..", "a/b/../../.."] {
            let result = PathResolver::split_path(path);
            assert!(matches!(result, Err(PathError::InvalidPath(_))), "{}", path);
        }
    }

    #[test]
    fn test_nul_is_rejected() {
        assert!(PathResolver::split_path("a\0b").is_err());
        assert!(PathResolver::absolute_target("/a\0b").is_err());
    }

    #[test]
    fn test_resolve_stays_under_root() {
        let root = Path::new("/data/incremental/MT_3");
        let abs = PathResolver::resolve(root, "lib//arm64/./libfoo.so").unwrap();
        assert_eq!(abs, root.join("lib/arm64/libfoo.so"));
        assert!(abs.starts_with(root));
    }

    #[test]
    fn test_absolute_target() {
        assert_eq!(
            PathResolver::absolute_target("/data/app//pkg/./base").unwrap(),
            PathBuf::from("/data/app/pkg/base")
        );
        assert!(PathResolver::absolute_target("relative/target").is_err());
        assert!(PathResolver::absolute_target("/data/../etc").is_err());
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(
            PathResolver::split_parent("assets/a.bin").unwrap(),
            Some(("assets".to_string(), "a.bin".to_string()))
        );
        assert_eq!(
            PathResolver::split_parent("a.bin").unwrap(),
            Some((String::new(), "a.bin".to_string()))
        );
        assert_eq!(PathResolver::split_parent("").unwrap(), None);
    }

    #[test]
    fn test_is_valid_name() {
        assert!(PathResolver::is_valid_name("todo.txt"));
        assert!(PathResolver::is_valid_name("my-file"));
        assert!(PathResolver::is_valid_name("file_123"));

        assert!(!PathResolver::is_valid_name(""));
        assert!(!PathResolver::is_valid_name("."));
        assert!(!PathResolver::is_valid_name(".."));
        assert!(!PathResolver::is_valid_name("has/slash"));
        assert!(!PathResolver::is_valid_name("has\0null"));
    }
}
