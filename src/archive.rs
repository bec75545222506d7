// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive container.
//!
//! An __archive__ is the portable transport between the build phase and the
//! deploy phase. It is a flat keyed byte-blob store backed by the zip format,
//! which already records the size, CRC-32 checksum, and unix permission bits of
//! every entry it holds.
//!
//! # Archive Layout
//!
//! An archive contains three kinds of entries:
//!
//! 1. `.pushignore`: the raw ignore rule text of the local root, if any.
//! 2. `copies.txt`: the [`Manifest`], i.e., every packed logical path in walk
//!    order.
//! 3. `copies/<logical path>`: the payload of each packed file.
//!
//! The manifest must list exactly the set of payload entries. Any drift between
//! the two is treated as a corrupt archive, just like a CRC-32 mismatch.
//!
//! # See Also
//!
//! 1. [`manifest`]
//! 2. [`crate::rules`]

pub mod manifest;

pub use manifest::{Manifest, ManifestError, MANIFEST_ENTRY};

use crate::{
    path::LogicalPath,
    rules::{IgnoreRules, RuleError, IGNORE_FILE_NAME},
};

use std::{
    collections::HashMap,
    fs::File,
    io::{copy, sink, Read, Seek, Write},
    path::{Path, PathBuf},
};
use tracing::debug;
use zip::{result::ZipError, write::SimpleFileOptions, ZipArchive, ZipWriter};

/// Name of ignore rule entry inside of an archive.
pub const IGNORE_ENTRY: &str = IGNORE_FILE_NAME;

/// Namespace prefix of payload entries inside of an archive.
pub const PAYLOAD_PREFIX: &str = "copies/";

/// Name of payload entry for target logical path.
pub fn payload_name(path: &LogicalPath) -> String {
    format!("{PAYLOAD_PREFIX}{path}")
}

/// Metadata of a packed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Logical path of packed file.
    pub path: LogicalPath,

    /// Uncompressed size in bytes.
    pub size: u64,

    /// CRC-32 checksum of uncompressed content.
    pub crc32: u32,

    /// Unix mode recorded at build time, if any.
    pub mode: Option<u32>,
}

impl ArchiveEntry {
    /// Execute bits recorded at build time.
    pub fn execute_bits(&self) -> u32 {
        self.mode.map_or(0, |mode| mode & 0o111)
    }

    /// Check if packed file was executable at build time.
    pub fn is_executable(&self) -> bool {
        self.execute_bits() != 0
    }
}

/// Write new archive.
///
/// Payload entries are appended one by one, and the manifest is written last
/// once every payload entry is known.
pub struct ArchiveWriter<W>
where
    W: Write + Seek,
{
    zip: ZipWriter<W>,
    manifest: Manifest,
}

impl<W> ArchiveWriter<W>
where
    W: Write + Seek,
{
    /// Construct new archive writer on top of target sink.
    pub fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            manifest: Manifest::new(),
        }
    }

    /// Pack raw ignore rule text.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Zip`] if entry cannot be started.
    /// - Return [`ArchiveError::Write`] if entry cannot be written.
    pub fn write_ignore_text(&mut self, text: impl AsRef<str>) -> Result<()> {
        self.zip
            .start_file(IGNORE_ENTRY, SimpleFileOptions::default())?;
        self.zip
            .write_all(text.as_ref().as_bytes())
            .map_err(|err| ArchiveError::Write {
                source: err,
                name: IGNORE_ENTRY.into(),
            })?;

        Ok(())
    }

    /// Pack payload of a file under its logical path.
    ///
    /// Records the file's permission bits into the entry, and lists the logical
    /// path in the manifest. Returns number of bytes packed.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Manifest`] if logical path was already packed.
    /// - Return [`ArchiveError::Zip`] if entry cannot be started.
    /// - Return [`ArchiveError::Write`] if content cannot be copied.
    pub fn add_file(
        &mut self,
        path: LogicalPath,
        mode: u32,
        size_hint: u64,
        content: &mut impl Read,
    ) -> Result<u64> {
        let name = payload_name(&path);
        self.manifest.push(path)?;

        let options = SimpleFileOptions::default()
            .unix_permissions(mode)
            .large_file(size_hint >= u64::from(u32::MAX));
        self.zip.start_file(name.as_str(), options)?;
        let written = copy(content, &mut self.zip)
            .map_err(|err| ArchiveError::Write { source: err, name })?;

        Ok(written)
    }

    /// Manifest of everything packed so far.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Write manifest, and finalize the archive.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Zip`] if manifest entry cannot be started, or
    ///   archive cannot be finalized.
    /// - Return [`ArchiveError::Write`] if manifest cannot be written.
    pub fn finish(mut self) -> Result<(W, Manifest)> {
        self.zip
            .start_file(MANIFEST_ENTRY, SimpleFileOptions::default())?;
        self.zip
            .write_all(self.manifest.to_string().as_bytes())
            .map_err(|err| ArchiveError::Write {
                source: err,
                name: MANIFEST_ENTRY.into(),
            })?;
        let inner = self.zip.finish()?;

        Ok((inner, self.manifest))
    }
}

/// Opened, verified archive.
///
/// # Invariant
///
/// - Every entry passed its CRC-32 check when opened.
/// - Manifest lists exactly the set of payload entries.
pub struct Archive<R>
where
    R: Read + Seek,
{
    zip: ZipArchive<R>,
    manifest: Manifest,
    ignore_text: Option<String>,
    entries: HashMap<LogicalPath, ArchiveEntry>,
}

impl Archive<File> {
    /// Open and verify archive file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Open`] if archive file cannot be opened.
    /// - Any error of [`Archive::new`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|err| ArchiveError::Open {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;
        Self::new(file)
    }
}

impl<R> Archive<R>
where
    R: Read + Seek,
{
    /// Construct verified archive from reader.
    ///
    /// Every entry is decompressed, and checked against its recorded CRC-32.
    /// Then the manifest is loaded, and matched against the payload entries.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Zip`] if reader is not a zip archive.
    /// - Return [`ArchiveError::Integrity`] if any entry fails its CRC-32
    ///   check.
    /// - Return [`ArchiveError::MissingManifest`] if manifest entry is absent.
    /// - Return [`ArchiveError::Manifest`] if manifest is malformed.
    /// - Return [`ArchiveError::MissingPayload`] or
    ///   [`ArchiveError::UnlistedPayload`] if manifest and payload disagree.
    pub fn new(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader)?;
        verify_entries(&mut zip)?;

        let ignore_text = read_text_entry(&mut zip, IGNORE_ENTRY)?;
        let manifest: Manifest = read_text_entry(&mut zip, MANIFEST_ENTRY)?
            .ok_or(ArchiveError::MissingManifest)?
            .parse()?;

        let mut entries = HashMap::new();
        for index in 0..zip.len() {
            let file = zip.by_index(index)?;
            let Some(logical) = file.name().strip_prefix(PAYLOAD_PREFIX) else {
                continue;
            };

            if file.is_dir() {
                continue;
            }

            if !manifest.contains(logical) {
                return Err(ArchiveError::UnlistedPayload {
                    name: file.name().into(),
                });
            }

            let path = LogicalPath::new(logical).map_err(|_| ArchiveError::UnlistedPayload {
                name: file.name().into(),
            })?;
            entries.insert(
                path.clone(),
                ArchiveEntry {
                    path,
                    size: file.size(),
                    crc32: file.crc32(),
                    mode: file.unix_mode(),
                },
            );
        }

        if let Some(path) = manifest.iter().find(|path| !entries.contains_key(*path)) {
            return Err(ArchiveError::MissingPayload { path: path.clone() });
        }

        debug!("opened archive listing {} packed files", manifest.len());

        Ok(Self {
            zip,
            manifest,
            ignore_text,
            entries,
        })
    }

    /// Manifest of packed logical paths.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Raw ignore rule text captured at build time.
    pub fn ignore_text(&self) -> Option<&str> {
        self.ignore_text.as_deref()
    }

    /// Compile ignore rules captured at build time.
    ///
    /// Archives without ignore rule text yield an empty rule set.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Rules`] if captured rules are malformed.
    pub fn ignore_rules(&self) -> Result<IgnoreRules> {
        match &self.ignore_text {
            Some(text) => Ok(IgnoreRules::parse(text)?),
            None => Ok(IgnoreRules::new()),
        }
    }

    /// Metadata of packed file at logical path.
    pub fn entry(&self, path: impl AsRef<str>) -> Option<&ArchiveEntry> {
        self.entries.get(path.as_ref())
    }

    /// Open payload of packed file for reading.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::MissingPayload`] if logical path is not
    ///   packed.
    /// - Return [`ArchiveError::Zip`] if payload entry cannot be opened.
    pub fn open_payload(&mut self, path: &LogicalPath) -> Result<impl Read + '_> {
        if !self.entries.contains_key(path) {
            return Err(ArchiveError::MissingPayload { path: path.clone() });
        }

        Ok(self.zip.by_name(&payload_name(path))?)
    }
}

fn verify_entries<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<()> {
    for index in 0..zip.len() {
        let mut file = zip.by_index(index)?;
        let name = file.name().to_string();

        // INVARIANT: Reading an entry to its end checks its CRC-32.
        copy(&mut file, &mut sink()).map_err(|err| ArchiveError::Integrity {
            source: err,
            name,
        })?;
    }

    Ok(())
}

fn read_text_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|err| ArchiveError::Integrity {
            source: err,
            name: name.into(),
        })?;

    Ok(Some(text))
}

/// Archive error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Archive file cannot be opened.
    #[error("failed to open archive at {:?}", path.display())]
    Open {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Archive entry failed its integrity check.
    #[error("archive entry {name:?} failed integrity check")]
    Integrity {
        #[source]
        source: std::io::Error,
        name: String,
    },

    /// Archive has no manifest entry.
    #[error("archive has no {MANIFEST_ENTRY} manifest")]
    MissingManifest,

    /// Manifest lists logical path without payload.
    #[error("manifest lists {path:?} but archive has no payload for it")]
    MissingPayload { path: LogicalPath },

    /// Payload entry is not listed in manifest.
    #[error("archive entry {name:?} is not listed in manifest")]
    UnlistedPayload { name: String },

    /// Archive entry cannot be written.
    #[error("failed to write archive entry {name:?}")]
    Write {
        #[source]
        source: std::io::Error,
        name: String,
    },

    /// Manifest is malformed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Captured ignore rules are malformed.
    #[error(transparent)]
    Rules(#[from] RuleError),

    /// Zip container operations fail.
    #[error(transparent)]
    Zip(#[from] ZipError),
}

/// Friendly result alias :3
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
