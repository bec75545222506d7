// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive build logic.
//!
//! Walk a local root, filter every file through the root's ignore rules, and
//! pack whatever survives into an archive alongside the manifest and the raw
//! ignore rule text.
//!
//! Version-control metadata directories are always pruned from the walk, no
//! matter what the ignore rules say. Excluded files are reported so an operator
//! can audit what got dropped, but they never reach the payload.
//!
//! # Partial Archives
//!
//! The archive is written to a temporary file beside its destination, and only
//! renamed into place once the container has been finalized. Any fatal error
//! drops the temporary file, so a broken build never leaves a corrupt archive
//! behind.

use crate::{
    archive::{ArchiveError, ArchiveWriter},
    path::LogicalPath,
    rules::{IgnoreRules, RuleError, IGNORE_FILE_NAME},
};

use ignore::{DirEntry, WalkBuilder};
use std::{
    fs::{create_dir_all, File, Metadata},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Directories that never get packed.
pub const PRUNED_DIRS: &[&str] = &[".git", ".github"];

/// Options for building an archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    /// Walk and filter, but do not write any archive bytes.
    pub dry_run: bool,

    /// Do not list individual packed files.
    pub quiet: bool,
}

/// Outcome of building an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackReport {
    /// Packed logical paths in walk order.
    pub included: Vec<LogicalPath>,

    /// Logical paths dropped by ignore rules in walk order.
    pub excluded: Vec<LogicalPath>,

    /// Files that could not be opened for reading.
    pub skipped: Vec<PathBuf>,

    /// Total payload bytes packed.
    pub bytes: u64,
}

/// Build archives out of a local root.
#[derive(Debug, Clone)]
pub struct Packer {
    local_root: PathBuf,
    options: PackOptions,
}

impl Packer {
    /// Construct new packer for target local root.
    pub fn new(local_root: impl Into<PathBuf>, options: PackOptions) -> Self {
        Self {
            local_root: local_root.into(),
            options,
        }
    }

    /// Local root being packed.
    pub fn local_root(&self) -> &Path {
        self.local_root.as_path()
    }

    /// Walk local root, and pack included files into archive at target path.
    ///
    /// Creates the local root if it is missing, unless this is a dry run.
    ///
    /// # Errors
    ///
    /// - Return [`PackError::CreateRoot`] if missing local root cannot be
    ///   created.
    /// - Return [`PackError::Rules`] if ignore rules cannot be read or
    ///   compiled.
    /// - Return [`PackError::Walk`] if local root cannot be walked.
    /// - Return [`PackError::CreateArchive`] or [`PackError::PersistArchive`]
    ///   if archive file cannot be written into place.
    /// - Return [`PackError::Archive`] if payload cannot be packed.
    #[instrument(skip(self, archive_path), level = "debug")]
    pub fn pack(&self, archive_path: impl AsRef<Path>) -> Result<PackReport> {
        if !self.local_root.exists() {
            if self.options.dry_run {
                warn!("local root {:?} does not exist", self.local_root.display());
                return Ok(PackReport::default());
            }

            create_dir_all(&self.local_root).map_err(|err| PackError::CreateRoot {
                source: err,
                path: self.local_root.clone(),
            })?;
        }

        let ignore_text = IgnoreRules::read_text(&self.local_root)?;
        let rules = match &ignore_text {
            Some(text) => IgnoreRules::parse(text)?,
            None => IgnoreRules::new(),
        };

        info!("walking {:?}", self.local_root.display());
        let candidates = walk_local(&self.local_root)?;

        if ignore_text.is_some() {
            info!("applying {IGNORE_FILE_NAME} rules");
        }

        let mut report = PackReport::default();
        let mut included = Vec::new();
        for candidate in candidates {
            if rules.is_excluded(&candidate.logical, false) {
                info!("excluded {}", candidate.logical);
                report.excluded.push(candidate.logical);
            } else {
                included.push(candidate);
            }
        }

        if self.options.dry_run {
            for candidate in included {
                // INVARIANT: Sort unreadable files exactly like a live run.
                let Some((_, metadata)) = open_or_skip(&candidate, &mut report) else {
                    continue;
                };

                self.list(&candidate);
                report.bytes += metadata.len();
                report.included.push(candidate.logical);
            }
            info!("dry run, no archive written");
            return Ok(report);
        }

        self.write_archive(archive_path.as_ref(), ignore_text.as_deref(), included, &mut report)?;
        info!(
            "packed {} files ({} bytes) into {:?}",
            report.included.len(),
            report.bytes,
            archive_path.as_ref().display()
        );

        Ok(report)
    }

    fn write_archive(
        &self,
        archive_path: &Path,
        ignore_text: Option<&str>,
        included: Vec<Candidate>,
        report: &mut PackReport,
    ) -> Result<()> {
        let parent = archive_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(parent).map_err(|err| PackError::CreateArchive {
            source: err,
            path: archive_path.to_path_buf(),
        })?;

        let mut writer = ArchiveWriter::new(BufWriter::new(temp.as_file_mut()));
        if let Some(text) = ignore_text {
            writer.write_ignore_text(text)?;
        }

        for candidate in included {
            // INVARIANT: Unreadable file is left out of both payload and manifest.
            let Some((file, metadata)) = open_or_skip(&candidate, report) else {
                continue;
            };

            self.list(&candidate);
            let written = writer.add_file(
                candidate.logical.clone(),
                file_mode(&metadata),
                metadata.len(),
                &mut BufReader::new(file),
            )?;
            report.bytes += written;
            report.included.push(candidate.logical);
        }

        let (mut sink, _) = writer.finish()?;
        sink.flush().map_err(|err| PackError::CreateArchive {
            source: err,
            path: archive_path.to_path_buf(),
        })?;
        drop(sink);

        temp.as_file()
            .sync_all()
            .map_err(|err| PackError::CreateArchive {
                source: err,
                path: archive_path.to_path_buf(),
            })?;
        temp.persist(archive_path)
            .map_err(|err| PackError::PersistArchive {
                source: err.error,
                path: archive_path.to_path_buf(),
            })?;

        Ok(())
    }

    fn list(&self, candidate: &Candidate) {
        if !self.options.quiet {
            info!("{} --> {}", candidate.local.display(), candidate.logical);
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    local: PathBuf,
    logical: LogicalPath,
}

/// Collect every regular file under root in walk order.
fn walk_local(root: &Path) -> Result<Vec<Candidate>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| !is_version_control_dir(entry))
        .build();

    let mut candidates = Vec::new();
    for result in walker {
        let entry = result.map_err(|err| PackError::Walk {
            source: err,
            root: root.to_path_buf(),
        })?;

        if entry.depth() == 0 || !is_regular_file(&entry) {
            continue;
        }

        let logical = match LogicalPath::from_root(root, entry.path()) {
            Ok(logical) => logical,
            Err(err) => {
                warn!("skipping {:?}: {err}", entry.path().display());
                continue;
            }
        };

        debug!("found {logical}");
        candidates.push(Candidate {
            local: entry.into_path(),
            logical,
        });
    }

    Ok(candidates)
}

fn is_version_control_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_some_and(|kind| kind.is_dir())
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| PRUNED_DIRS.contains(&name))
}

fn is_regular_file(entry: &DirEntry) -> bool {
    match entry.file_type() {
        Some(kind) if kind.is_file() => true,
        Some(kind) if kind.is_symlink() => entry.path().is_file(),
        _ => false,
    }
}

/// Open included file, or record it as skipped if it cannot be read.
fn open_or_skip(candidate: &Candidate, report: &mut PackReport) -> Option<(File, Metadata)> {
    match open_with_metadata(&candidate.local) {
        Ok(opened) => Some(opened),
        Err(err) => {
            warn!("skipping {:?}: {err}", candidate.local.display());
            report.skipped.push(candidate.local.clone());
            None
        }
    }
}

fn open_with_metadata(path: &Path) -> std::io::Result<(File, Metadata)> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    Ok((file, metadata))
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Archive build error types.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Missing local root cannot be created.
    #[error("failed to create local root at {:?}", path.display())]
    CreateRoot {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Local root cannot be walked.
    #[error("failed to walk local root at {:?}", root.display())]
    Walk {
        #[source]
        source: ignore::Error,
        root: PathBuf,
    },

    /// Temporary archive file cannot be created or written.
    #[error("failed to write archive at {:?}", path.display())]
    CreateArchive {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Finished archive cannot be moved into place.
    #[error("failed to move archive into place at {:?}", path.display())]
    PersistArchive {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Ignore rules cannot be read or compiled.
    #[error(transparent)]
    Rules(#[from] RuleError),

    /// Payload cannot be packed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Friendly result alias :3
pub type Result<T, E = PackError> = std::result::Result<T, E>;
