// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive manifest.
//!
//! The manifest lists every logical path whose payload is packed into an
//! archive, in the order the local root was walked. It is stored as plain text
//! with one logical path per line, and no trailing newline.

use crate::path::{LogicalPath, PathError};

use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Name of manifest entry inside of an archive.
pub const MANIFEST_ENTRY: &str = "copies.txt";

/// Ordered listing of logical paths packed into an archive.
///
/// # Invariant
///
/// - No duplicate logical paths.
/// - Insertion order is preserved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    paths: Vec<LogicalPath>,
    seen: HashSet<LogicalPath>,
}

impl Manifest {
    /// Construct new empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append logical path to manifest.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Duplicate`] if path is already listed.
    pub fn push(&mut self, path: LogicalPath) -> Result<()> {
        if !self.seen.insert(path.clone()) {
            return Err(ManifestError::Duplicate { path });
        }

        self.paths.push(path);
        Ok(())
    }

    /// Check if manifest lists target path.
    pub fn contains(&self, path: impl AsRef<str>) -> bool {
        self.seen.contains(path.as_ref())
    }

    /// Listing of logical paths in insertion order.
    pub fn paths(&self) -> &[LogicalPath] {
        self.paths.as_slice()
    }

    /// Iterate logical paths in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &LogicalPath> {
        self.paths.iter()
    }

    /// Number of listed logical paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Check if manifest lists nothing.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest = Manifest::new();
        for (index, line) in data.lines().enumerate() {
            if line.is_empty() {
                continue;
            }

            let path = LogicalPath::new(line).map_err(|err| ManifestError::InvalidPath {
                line: index + 1,
                source: err,
            })?;
            manifest.push(path)?;
        }

        Ok(manifest)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (index, path) in self.paths.iter().enumerate() {
            if index > 0 {
                fmt.write_str("\n")?;
            }
            fmt.write_str(path.as_str())?;
        }

        Ok(())
    }
}

/// Manifest error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest line is not a valid logical path.
    #[error("invalid manifest entry at line {line}")]
    InvalidPath {
        line: usize,
        #[source]
        source: PathError,
    },

    /// Manifest lists the same logical path twice.
    #[error("manifest lists {path:?} more than once")]
    Duplicate { path: LogicalPath },
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
