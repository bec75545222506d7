// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive deployment logic.
//!
//! Reconcile a remote root so it converges on the manifest of an archive. The
//! remote root is walked top-down, and every file it holds falls into one of
//! three buckets:
//!
//! 1. __Unchanged__: listed in the manifest with identical size and CRC-32.
//!    Nothing happens.
//! 2. __Changed__: listed in the manifest, but size or CRC-32 differ. The old
//!    file is moved into the artifacts root, then the packed payload is
//!    written in its place.
//! 3. __Obsolete__: not listed in the manifest. The file is moved into the
//!    artifacts root.
//!
//! Whatever the walk did not encounter is __new__, and gets written from the
//! payload without producing any artifact.
//!
//! # Protected Subtrees
//!
//! The ignore rules captured in the archive also apply at deploy time. Any
//! remote directory they exclude is pruned from the walk entirely, so nothing
//! under it is ever read, moved, or written. This protects operator or runtime
//! managed state like logs, uploads, or caches.
//!
//! # Failure Window
//!
//! Replacing a changed file is a move followed by a write. A crash between the
//! two leaves that path absent until the next deploy. No locking is performed,
//! so the caller must make sure nothing else mutates the remote root during a
//! deploy.

use crate::{
    archive::{Archive, ArchiveError},
    path::LogicalPath,
    rules::IgnoreRules,
};

use ignore::{DirEntry, WalkBuilder};
use std::{
    collections::HashSet,
    fs::{self, create_dir_all, File},
    io::{BufWriter, Read, Seek, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Options for deploying an archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    /// Walk and diff, but do not touch the filesystem.
    pub dry_run: bool,
}

/// Outcome of deploying an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployReport {
    /// Files left untouched.
    pub unchanged: Vec<LogicalPath>,

    /// Files moved into artifacts, then replaced from payload.
    pub replaced: Vec<LogicalPath>,

    /// Obsolete files moved into artifacts.
    pub removed: Vec<LogicalPath>,

    /// New files written from payload.
    pub added: Vec<LogicalPath>,
}

impl DeployReport {
    /// Check if deployment left the remote root as it was.
    pub fn is_noop(&self) -> bool {
        self.replaced.is_empty() && self.removed.is_empty() && self.added.is_empty()
    }
}

/// Apply filesystem mutations for a deployment.
///
/// Reconciliation logic is identical no matter which writer is used, so a dry
/// run walks and diffs exactly like a live run.
pub trait TreeWriter {
    /// Move displaced remote file into artifacts root.
    fn backup(&mut self, from: &Path, to: &Path) -> Result<()>;

    /// Write payload to remote path, and apply recorded execute bits.
    fn install(&mut self, content: &mut dyn Read, to: &Path, execute_bits: u32) -> Result<()>;
}

/// Writer that mutates the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWriter;

impl TreeWriter for FsWriter {
    fn backup(&mut self, from: &Path, to: &Path) -> Result<()> {
        let backup_err = |err| DeployError::Backup {
            source: err,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        };

        if let Some(parent) = to.parent() {
            create_dir_all(parent).map_err(backup_err)?;
        }

        move_file(from, to).map_err(backup_err)
    }

    fn install(&mut self, content: &mut dyn Read, to: &Path, execute_bits: u32) -> Result<()> {
        let install_err = |err| DeployError::Install {
            source: err,
            path: to.to_path_buf(),
        };

        if let Some(parent) = to.parent() {
            create_dir_all(parent).map_err(install_err)?;
        }

        let mut target = BufWriter::new(File::create(to).map_err(install_err)?);
        std::io::copy(content, &mut target).map_err(install_err)?;
        target.flush().map_err(install_err)?;
        drop(target);

        // INVARIANT: Failure to apply execute bits never aborts deployment.
        if execute_bits != 0 {
            if let Err(err) = apply_execute_bits(to, execute_bits) {
                warn!("cannot set execute bits on {:?}: {err}", to.display());
            }
        }

        Ok(())
    }
}

/// Writer that only reports what would happen.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunWriter;

impl TreeWriter for DryRunWriter {
    fn backup(&mut self, from: &Path, _to: &Path) -> Result<()> {
        debug!("dry run, keep {:?}", from.display());
        Ok(())
    }

    fn install(&mut self, _content: &mut dyn Read, to: &Path, _execute_bits: u32) -> Result<()> {
        debug!("dry run, skip writing {:?}", to.display());
        Ok(())
    }
}

/// Deploy archives into a remote root.
#[derive(Debug, Clone)]
pub struct Deployer {
    remote_root: PathBuf,
    artifacts_root: PathBuf,
    options: DeployOptions,
}

impl Deployer {
    /// Construct new deployer.
    pub fn new(
        remote_root: impl Into<PathBuf>,
        artifacts_root: impl Into<PathBuf>,
        options: DeployOptions,
    ) -> Self {
        Self {
            remote_root: remote_root.into(),
            artifacts_root: artifacts_root.into(),
            options,
        }
    }

    /// Remote root being reconciled.
    pub fn remote_root(&self) -> &Path {
        self.remote_root.as_path()
    }

    /// Artifacts root that displaced files are moved into.
    pub fn artifacts_root(&self) -> &Path {
        self.artifacts_root.as_path()
    }

    /// Deploy archive into remote root.
    ///
    /// Creates the remote root if it is missing, unless this is a dry run.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::CreateRoot`] if missing remote root cannot be
    ///   created.
    /// - Any error of [`Deployer::reconcile`].
    #[instrument(skip(self, archive), level = "debug")]
    pub fn deploy<R>(&self, archive: &mut Archive<R>) -> Result<DeployReport>
    where
        R: Read + Seek,
    {
        if self.options.dry_run {
            return self.reconcile(archive, &mut DryRunWriter);
        }

        if !self.remote_root.exists() {
            info!("creating remote root {:?}", self.remote_root.display());
            create_dir_all(&self.remote_root).map_err(|err| DeployError::CreateRoot {
                source: err,
                path: self.remote_root.clone(),
            })?;
        }

        self.reconcile(archive, &mut FsWriter)
    }

    /// Reconcile remote root against archive through target writer.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Archive`] if captured ignore rules are
    ///   malformed, or payload cannot be opened.
    /// - Return [`DeployError::Walk`] if remote root cannot be walked.
    /// - Return [`DeployError::ReadRemote`] if remote file cannot be
    ///   checksummed.
    /// - Any error of the writer.
    pub fn reconcile<R, W>(&self, archive: &mut Archive<R>, writer: &mut W) -> Result<DeployReport>
    where
        R: Read + Seek,
        W: TreeWriter + ?Sized,
    {
        let rules = archive.ignore_rules()?;
        let mut pending: HashSet<LogicalPath> = archive.manifest().iter().cloned().collect();
        let mut report = DeployReport::default();

        info!("walking {:?}", self.remote_root.display());
        let remote_files = if self.remote_root.exists() {
            walk_remote(&self.remote_root, &self.artifacts_root, &rules)?
        } else {
            Vec::new()
        };

        for remote in remote_files {
            if rules.is_excluded(&remote.logical, false) {
                debug!("ignored {}", remote.logical);
                continue;
            }

            let artifact = remote.logical.to_native(&self.artifacts_root);
            if !pending.remove(remote.logical.as_str()) {
                info!(
                    "artifact {:?} --> {:?}",
                    remote.path.display(),
                    artifact.display()
                );
                writer.backup(&remote.path, &artifact)?;
                report.removed.push(remote.logical);
                continue;
            }

            let (size, crc32, execute_bits) = match archive.entry(&remote.logical) {
                Some(entry) => (entry.size, entry.crc32, entry.execute_bits()),
                None => {
                    return Err(ArchiveError::MissingPayload {
                        path: remote.logical,
                    }
                    .into())
                }
            };

            if !is_changed(&remote.path, size, crc32)? {
                debug!("unchanged {}", remote.logical);
                report.unchanged.push(remote.logical);
                continue;
            }

            info!(
                "artifact {:?} --> {:?}",
                remote.path.display(),
                artifact.display()
            );
            writer.backup(&remote.path, &artifact)?;

            info!("deploy {} --> {:?}", remote.logical, remote.path.display());
            let mut payload = archive.open_payload(&remote.logical)?;
            writer.install(&mut payload, &remote.path, execute_bits)?;
            drop(payload);
            report.replaced.push(remote.logical);
        }

        let added: Vec<LogicalPath> = archive
            .manifest()
            .iter()
            .filter(|path| pending.contains(path.as_str()))
            .cloned()
            .collect();

        for logical in added {
            // INVARIANT: Never write into a protected subtree.
            if rules.is_excluded(&logical, false) {
                warn!("{logical} is excluded by ignore rules, not deploying it");
                continue;
            }

            let execute_bits = archive
                .entry(&logical)
                .map(|entry| entry.execute_bits())
                .unwrap_or(0);
            let target = logical.to_native(&self.remote_root);

            info!("deploy {logical} --> {:?}", target.display());
            let mut payload = archive.open_payload(&logical)?;
            writer.install(&mut payload, &target, execute_bits)?;
            drop(payload);
            report.added.push(logical);
        }

        info!(
            "{} unchanged, {} replaced, {} removed, {} added",
            report.unchanged.len(),
            report.replaced.len(),
            report.removed.len(),
            report.added.len()
        );

        Ok(report)
    }
}

#[derive(Debug)]
struct RemoteFile {
    path: PathBuf,
    logical: LogicalPath,
}

/// Collect every file under remote root, pruning directories excluded by
/// ignore rules, and the artifacts root itself.
///
/// Symbolic links to directories count as directories. They are never
/// descended into, and never collected as files.
fn walk_remote(root: &Path, artifacts_root: &Path, rules: &IgnoreRules) -> Result<Vec<RemoteFile>> {
    let prune_root = root.to_path_buf();
    let prune_artifacts = nested_artifacts_root(root, artifacts_root);
    let prune_rules = rules.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 || !is_directory(entry) {
                return true;
            }

            let Ok(relative) = entry.path().strip_prefix(&prune_root) else {
                return true;
            };

            if prune_artifacts.as_deref() == Some(relative) {
                return false;
            }

            match LogicalPath::from_relative(relative) {
                Ok(logical) => !prune_rules.is_excluded(&logical, true),
                Err(_) => true,
            }
        })
        .build();

    let mut files = Vec::new();
    for result in walker {
        let entry = result.map_err(|err| DeployError::Walk {
            source: err,
            root: root.to_path_buf(),
        })?;

        if entry.depth() == 0 || is_directory(&entry) {
            continue;
        }

        let logical = match LogicalPath::from_root(root, entry.path()) {
            Ok(logical) => logical,
            Err(err) => {
                warn!("skipping {:?}: {err}", entry.path().display());
                continue;
            }
        };

        files.push(RemoteFile {
            path: entry.into_path(),
            logical,
        });
    }

    Ok(files)
}

fn is_directory(entry: &DirEntry) -> bool {
    match entry.file_type() {
        Some(kind) if kind.is_dir() => true,
        Some(kind) if kind.is_symlink() => entry.path().is_dir(),
        _ => false,
    }
}

/// Location of artifacts root relative to remote root, if it lies strictly
/// inside of it.
///
/// Both roots are canonicalized first, so different spellings of the same
/// directory still match. An artifacts root that does not exist yet cannot
/// hold anything to prune.
fn nested_artifacts_root(root: &Path, artifacts_root: &Path) -> Option<PathBuf> {
    let root = root.canonicalize().ok()?;
    let artifacts_root = artifacts_root.canonicalize().ok()?;
    artifacts_root
        .strip_prefix(&root)
        .ok()
        .filter(|relative| !relative.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Compare remote file against packed size and CRC-32.
///
/// Size is compared first, so content is only read when sizes agree.
fn is_changed(path: &Path, size: u64, crc32: u32) -> Result<bool> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(true),
    };

    if !metadata.is_file() || metadata.len() != size {
        return Ok(true);
    }

    let remote_crc32 = file_crc32(path).map_err(|err| DeployError::ReadRemote {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(remote_crc32 != crc32)
}

fn file_crc32(path: &Path) -> std::io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = vec![0; 64 * 1024];

    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hasher.finalize())
}

/// Move file, falling back to copy then remove when rename fails, e.g., across
/// filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!("rename {:?} failed ({err}), copying instead", from.display());
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

#[cfg(unix)]
fn apply_execute_bits(path: &Path, bits: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | (bits & 0o111));
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn apply_execute_bits(_path: &Path, _bits: u32) -> std::io::Result<()> {
    Ok(())
}

/// Archive deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Missing remote root cannot be created.
    #[error("failed to create remote root at {:?}", path.display())]
    CreateRoot {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Remote root cannot be walked.
    #[error("failed to walk remote root at {:?}", root.display())]
    Walk {
        #[source]
        source: ignore::Error,
        root: PathBuf,
    },

    /// Remote file cannot be read for comparison.
    #[error("failed to read remote file at {:?}", path.display())]
    ReadRemote {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Displaced file cannot be moved into artifacts root.
    #[error("failed to move {:?} into artifacts at {:?}", from.display(), to.display())]
    Backup {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Payload cannot be written to remote root.
    #[error("failed to write payload to {:?}", path.display())]
    Install {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Archive cannot be read.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use pretty_assertions::assert_eq;
    use std::{
        collections::BTreeMap,
        fs::{read_to_string, write},
        io::Cursor,
    };
    use tempfile::TempDir;

    type MemoryArchive = Archive<Cursor<Vec<u8>>>;

    fn archive(ignore: Option<&str>, files: &[(&str, &str)]) -> anyhow::Result<MemoryArchive> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        if let Some(text) = ignore {
            writer.write_ignore_text(text)?;
        }
        for (path, content) in files {
            writer.add_file(
                LogicalPath::new(*path)?,
                0o644,
                content.len() as u64,
                &mut content.as_bytes(),
            )?;
        }
        let (cursor, _) = writer.finish()?;

        Ok(Archive::new(Cursor::new(cursor.into_inner()))?)
    }

    fn write_tree(root: &Path, files: &[(&str, &str)]) -> anyhow::Result<()> {
        for (path, content) in files {
            let path = root.join(path);
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            write(path, content)?;
        }

        Ok(())
    }

    fn snapshot(root: &Path) -> anyhow::Result<BTreeMap<String, String>> {
        let mut tree = BTreeMap::new();
        if !root.exists() {
            return Ok(tree);
        }

        for entry in WalkBuilder::new(root).standard_filters(false).build() {
            let entry = entry?;
            if entry.file_type().is_some_and(|kind| kind.is_file()) {
                let logical = LogicalPath::from_root(root, entry.path())?;
                tree.insert(logical.to_string(), read_to_string(entry.path())?);
            }
        }

        Ok(tree)
    }

    fn tree(files: &[(&str, &str)]) -> BTreeMap<String, String> {
        files
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect()
    }

    fn names(paths: &[LogicalPath]) -> Vec<&str> {
        paths.iter().map(LogicalPath::as_str).collect()
    }

    /// Records every mutation before delegating to [`FsWriter`].
    #[derive(Default)]
    struct RecordingWriter {
        touched: Vec<PathBuf>,
    }

    impl TreeWriter for RecordingWriter {
        fn backup(&mut self, from: &Path, to: &Path) -> Result<()> {
            self.touched.push(from.to_path_buf());
            FsWriter.backup(from, to)
        }

        fn install(&mut self, content: &mut dyn Read, to: &Path, execute_bits: u32) -> Result<()> {
            self.touched.push(to.to_path_buf());
            FsWriter.install(content, to, execute_bits)
        }
    }

    #[test]
    fn deploy_into_empty_root() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        let mut archive = archive(None, &[("a.txt", "x"), ("b/c.txt", "y")])?;

        let report =
            Deployer::new(&remote, &artifacts, DeployOptions::default()).deploy(&mut archive)?;

        assert_eq!(names(&report.added), vec!["a.txt", "b/c.txt"]);
        assert_eq!(snapshot(&remote)?, tree(&[("a.txt", "x"), ("b/c.txt", "y")]));
        assert!(!artifacts.exists());

        Ok(())
    }

    #[test]
    fn deploy_three_way_diff() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        write_tree(
            &remote,
            &[
                ("changed.txt", "old content"),
                ("same.txt", "same"),
                ("old/stale.txt", "stale"),
            ],
        )?;
        let mut archive = archive(
            None,
            &[("changed.txt", "new"), ("same.txt", "same"), ("fresh.txt", "fresh")],
        )?;

        let report =
            Deployer::new(&remote, &artifacts, DeployOptions::default()).deploy(&mut archive)?;

        assert_eq!(names(&report.unchanged), vec!["same.txt"]);
        assert_eq!(names(&report.replaced), vec!["changed.txt"]);
        assert_eq!(names(&report.removed), vec!["old/stale.txt"]);
        assert_eq!(names(&report.added), vec!["fresh.txt"]);
        assert_eq!(
            snapshot(&remote)?,
            tree(&[("changed.txt", "new"), ("fresh.txt", "fresh"), ("same.txt", "same")])
        );
        assert_eq!(
            snapshot(&artifacts)?,
            tree(&[("changed.txt", "old content"), ("old/stale.txt", "stale")])
        );

        Ok(())
    }

    #[test]
    fn deploy_detects_same_size_content_change() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        write_tree(&remote, &[("config.ini", "mode=a")])?;
        let mut archive = archive(None, &[("config.ini", "mode=b")])?;

        let report =
            Deployer::new(&remote, &artifacts, DeployOptions::default()).deploy(&mut archive)?;

        assert_eq!(names(&report.replaced), vec!["config.ini"]);
        assert_eq!(read_to_string(remote.join("config.ini"))?, "mode=b");
        assert_eq!(read_to_string(artifacts.join("config.ini"))?, "mode=a");

        Ok(())
    }

    #[test]
    fn deploy_is_idempotent() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        write_tree(&remote, &[("a.txt", "stale"), ("junk.txt", "junk")])?;
        let mut archive = archive(None, &[("a.txt", "x"), ("b/c.txt", "y")])?;
        let deployer = Deployer::new(&remote, &artifacts, DeployOptions::default());

        let first = deployer.deploy(&mut archive)?;
        assert!(!first.is_noop());

        let mut recorder = RecordingWriter::default();
        let second = deployer.reconcile(&mut archive, &mut recorder)?;
        assert!(second.is_noop());
        assert!(recorder.touched.is_empty());
        assert_eq!(names(&second.unchanged), vec!["a.txt", "b/c.txt"]);

        Ok(())
    }

    #[test]
    fn deploy_prunes_ignored_directories() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        write_tree(
            &remote,
            &[
                ("runtime/cache.db", "state"),
                ("runtime/nested/uploads.bin", "blob"),
                ("app.py", "old"),
                ("debug.log", "trace"),
            ],
        )?;
        let mut archive = archive(Some("runtime/\n*.log\n"), &[("app.py", "new")])?;
        let deployer = Deployer::new(&remote, &artifacts, DeployOptions::default());

        let mut recorder = RecordingWriter::default();
        let report = deployer.reconcile(&mut archive, &mut recorder)?;

        assert_eq!(names(&report.replaced), vec!["app.py"]);
        assert!(report.removed.is_empty());
        assert!(recorder
            .touched
            .iter()
            .all(|path| !path.starts_with(remote.join("runtime"))));
        assert_eq!(
            snapshot(&remote)?,
            tree(&[
                ("app.py", "new"),
                ("debug.log", "trace"),
                ("runtime/cache.db", "state"),
                ("runtime/nested/uploads.bin", "blob"),
            ])
        );

        Ok(())
    }

    #[test]
    fn deploy_dry_run_touches_nothing() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        let before = [("changed.txt", "old"), ("stale.txt", "stale")];
        write_tree(&remote, &before)?;
        let mut archive = archive(None, &[("changed.txt", "new!"), ("fresh.txt", "fresh")])?;

        let options = DeployOptions { dry_run: true };
        let dry = Deployer::new(&remote, &artifacts, options).deploy(&mut archive)?;
        assert_eq!(snapshot(&remote)?, tree(&before));
        assert!(!artifacts.exists());

        let live =
            Deployer::new(&remote, &artifacts, DeployOptions::default()).deploy(&mut archive)?;
        assert_eq!(dry, live);

        Ok(())
    }

    #[test]
    fn deploy_dry_run_missing_root() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let mut archive = archive(None, &[("a.txt", "x")])?;

        let options = DeployOptions { dry_run: true };
        let report =
            Deployer::new(&remote, scratch.path().join("artifacts"), options).deploy(&mut archive)?;
        assert_eq!(names(&report.added), vec!["a.txt"]);
        assert!(!remote.exists());

        Ok(())
    }

    #[test]
    fn deploy_skips_nested_artifacts_root() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = remote.join(".artifacts");
        write_tree(&remote, &[("a.txt", "old"), (".artifacts/earlier.txt", "kept")])?;
        let mut archive = archive(None, &[("a.txt", "new")])?;
        let deployer = Deployer::new(&remote, &artifacts, DeployOptions::default());

        let report = deployer.deploy(&mut archive)?;
        assert_eq!(names(&report.replaced), vec!["a.txt"]);
        assert!(report.removed.is_empty());
        assert_eq!(
            snapshot(&artifacts)?,
            tree(&[("a.txt", "old"), ("earlier.txt", "kept")])
        );

        Ok(())
    }

    #[test]
    fn deploy_skips_artifacts_root_spelled_differently() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        create_dir_all(scratch.path().join("elsewhere"))?;
        let artifacts = scratch.path().join("elsewhere/../remote/.artifacts");
        write_tree(&remote, &[("a.txt", "old"), (".artifacts/earlier.txt", "kept")])?;
        let mut archive = archive(None, &[("a.txt", "new")])?;

        let report =
            Deployer::new(&remote, &artifacts, DeployOptions::default()).deploy(&mut archive)?;
        assert!(report.removed.is_empty());
        assert_eq!(
            snapshot(&remote.join(".artifacts"))?,
            tree(&[("a.txt", "old"), ("earlier.txt", "kept")])
        );

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn deploy_never_moves_directory_symlinks() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;

        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let artifacts = scratch.path().join("artifacts");
        write_tree(
            scratch.path(),
            &[("shared_uploads/avatar.png", "png"), ("shared_assets/logo.svg", "svg")],
        )?;
        write_tree(&remote, &[("app.py", "old")])?;
        symlink("../shared_uploads", remote.join("uploads"))?;
        symlink("../shared_assets", remote.join("assets"))?;
        let mut archive = archive(Some("uploads/
"), &[("app.py", "new")])?;

        let mut recorder = RecordingWriter::default();
        let report = Deployer::new(&remote, &artifacts, DeployOptions::default())
            .reconcile(&mut archive, &mut recorder)?;

        assert!(report.removed.is_empty());
        assert_eq!(names(&report.replaced), vec!["app.py"]);
        assert_eq!(recorder.touched, vec![remote.join("app.py"), remote.join("app.py")]);
        assert!(fs::symlink_metadata(remote.join("uploads"))?.file_type().is_symlink());
        assert!(fs::symlink_metadata(remote.join("assets"))?.file_type().is_symlink());
        assert_eq!(read_to_string(remote.join("uploads/avatar.png"))?, "png");

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn deploy_applies_execute_bits() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let scratch = TempDir::new()?;
        let remote = scratch.path().join("remote");
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        writer.add_file(LogicalPath::new("bin/run.sh")?, 0o755, 10, &mut &b"#!/bin/sh\n"[..])?;
        writer.add_file(LogicalPath::new("data.txt")?, 0o644, 1, &mut &b"x"[..])?;
        let (cursor, _) = writer.finish()?;
        let mut archive = Archive::new(Cursor::new(cursor.into_inner()))?;

        Deployer::new(&remote, scratch.path().join("artifacts"), DeployOptions::default())
            .deploy(&mut archive)?;

        let mode = fs::metadata(remote.join("bin/run.sh"))?.permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
        let mode = fs::metadata(remote.join("data.txt"))?.permissions().mode();
        assert_eq!(mode & 0o111, 0);

        Ok(())
    }

    #[test]
    fn file_crc32_matches_archive_checksum() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let path = scratch.path().join("blob");
        write(&path, "hello world")?;

        assert_eq!(file_crc32(&path)?, crc32fast::hash(b"hello world"));
        assert!(!is_changed(&path, 11, crc32fast::hash(b"hello world"))?);
        assert!(is_changed(&path, 12, crc32fast::hash(b"hello world"))?);
        assert!(is_changed(&scratch.path().join("missing"), 0, 0)?);

        Ok(())
    }
}
