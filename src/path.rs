// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, and provide the __logical path__ type used to address
//! files inside of an archive.
//!
//! # Logical Paths
//!
//! A logical path is a forward-slash separated path that is relative to some
//! declared root, e.g., the local root that got packed, or the remote root that
//! gets reconciled. Logical paths are the addressing keys of an archive. They
//! look the same no matter what platform produced them, so an archive built on
//! Windows deploys cleanly onto a POSIX host and vice versa.

use std::{
    borrow::Borrow,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path, PathBuf},
};

/// Default artifacts root that displaced files get moved into during deploy.
pub const DEFAULT_ARTIFACTS_DIR: &str = "/deployment-artifacts";

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/pushtree/config.toml` as
/// the default absolute path. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if configuration directory cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("pushtree").join("config.toml"))
        .ok_or(PathError::NoWayHome)
}

/// Default artifacts root as a [`PathBuf`].
pub fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACTS_DIR)
}

/// Forward-slash separated path relative to a declared root.
///
/// # Invariant
///
/// - Never empty, never absolute.
/// - No empty, `.`, or `..` components.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// Construct new logical path from its textual form.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::InvalidLogicalPath`] if any component is empty,
    ///   `.`, or `..`, or the path contains a backslash or line break.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let valid = !path.contains(['\\', '\n', '\r'])
            && path
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");

        if !valid {
            return Err(PathError::InvalidLogicalPath { path });
        }

        Ok(Self(path))
    }

    /// Construct logical path from native path relative to some root.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::NotRelative`] if path is not a plain relative
    ///   path.
    /// - Return [`PathError::NonUtf8`] if any component is not valid UTF-8.
    pub fn from_relative(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| PathError::NonUtf8 {
                        path: path.to_path_buf(),
                    })?;
                    parts.push(part);
                }
                Component::CurDir => continue,
                _ => {
                    return Err(PathError::NotRelative {
                        path: path.to_path_buf(),
                    })
                }
            }
        }

        Self::new(parts.join("/")).map_err(|_| PathError::NotRelative {
            path: path.to_path_buf(),
        })
    }

    /// Construct logical path of `path` relative to `root`.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::NotRelative`] if `path` is not below `root`.
    /// - Return [`PathError::NonUtf8`] if any component is not valid UTF-8.
    pub fn from_root(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<Self> {
        let relative =
            path.as_ref()
                .strip_prefix(root.as_ref())
                .map_err(|_| PathError::NotRelative {
                    path: path.as_ref().to_path_buf(),
                })?;
        Self::from_relative(relative)
    }

    /// Treat logical path as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Resolve logical path to a native path under `root`.
    pub fn to_native(&self, root: impl AsRef<Path>) -> PathBuf {
        let mut native = root.as_ref().to_path_buf();
        native.extend(self.0.split('/'));
        native
    }
}

impl Display for LogicalPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl AsRef<str> for LogicalPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for LogicalPath {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// Path resolution error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PathError {
    /// Cannot determine user's configuration directory.
    ///
    /// # See Also
    ///
    /// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
    #[error("cannot determine absolute path to user's configuration directory")]
    NoWayHome,

    /// Textual logical path is malformed.
    #[error("invalid logical path {path:?}")]
    InvalidLogicalPath { path: String },

    /// Native path cannot be expressed relative to its root.
    #[error("path {:?} is not relative to its root", path.display())]
    NotRelative { path: PathBuf },

    /// Native path is not valid UTF-8.
    #[error("path {:?} is not valid UTF-8", path.display())]
    NonUtf8 { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("a.txt"; "top level file")]
    #[test_case("b/c.txt"; "nested file")]
    #[test_case(".config/nvim/init.lua"; "hidden directory")]
    #[test]
    fn logical_path_accepts(path: &str) {
        assert_eq!(LogicalPath::new(path).unwrap().as_str(), path);
    }

    #[test_case(""; "empty")]
    #[test_case("/etc/passwd"; "absolute")]
    #[test_case("a//b"; "empty component")]
    #[test_case("a/../b"; "parent component")]
    #[test_case("./a"; "current component")]
    #[test_case("a\\b"; "backslash")]
    #[test_case("a\nb.txt"; "line feed")]
    #[test_case("dir\r/b.txt"; "carriage return")]
    #[test]
    fn logical_path_rejects(path: &str) {
        assert!(LogicalPath::new(path).is_err());
    }

    #[test]
    fn logical_path_from_root() {
        let root = Path::new("/srv/app");
        let result = LogicalPath::from_root(root, root.join("b").join("c.txt")).unwrap();
        assert_eq!(result.as_str(), "b/c.txt");
        assert!(LogicalPath::from_root(root, "/srv/other/c.txt").is_err());
    }

    #[test]
    fn logical_path_to_native() {
        let path = LogicalPath::new("b/c.txt").unwrap();
        assert_eq!(
            path.to_native("/srv/app"),
            Path::new("/srv/app").join("b").join("c.txt")
        );
    }
}
