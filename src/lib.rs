// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reconcile remote deployment trees through portable archives.
//!
//! Deployment happens in two phases that never need to see each other's
//! filesystem:
//!
//! 1. __Build__: walk a local root, filter it through the ignore rules found
//!    in its `.pushignore` file, and pack everything that survives into an
//!    archive along with a manifest and the raw ignore rules. See [`pack`].
//! 2. __Deploy__: open that archive somewhere else, walk a remote root, and
//!    make it converge on the manifest. Files that get overwritten or removed
//!    are moved into an artifacts root instead of being deleted. See
//!    [`deploy`].
//!
//! Deploying the same archive twice is a no-op the second time around.

pub mod archive;
pub mod config;
pub mod deploy;
pub mod pack;
pub mod path;
pub mod rules;

pub use archive::{Archive, ArchiveEntry, ArchiveError, ArchiveWriter, Manifest};
pub use deploy::{DeployError, DeployOptions, DeployReport, Deployer, TreeWriter};
pub use pack::{PackError, PackOptions, PackReport, Packer};
pub use path::LogicalPath;
pub use rules::{IgnoreRules, RuleError};
