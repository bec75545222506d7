// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional configuration file that pushtree reads
//! its defaults from. Command-line flags always take priority over whatever
//! the configuration file says.
//!
//! # General Layout
//!
//! ```toml
//! log = "info"
//!
//! [build]
//! quiet = false
//!
//! [deploy]
//! artifacts = "$HOME/deployment-artifacts"
//! ```
//!
//! Every key is optional. Path values go through shell expansion, so `~` and
//! environment variables can be used freely.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Top-level configuration settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Log filter directive, e.g., `debug` or `pushtree=trace`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    /// Build phase settings.
    pub build: BuildSettings,

    /// Deploy phase settings.
    pub deploy: DeploySettings,
}

impl Settings {
    /// Load settings from configuration file at target path.
    ///
    /// A missing file yields default settings, unless the caller explicitly
    /// asked for that file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read, or if an
    ///   explicitly requested file does not exist.
    /// - Any error of parsing the file's contents.
    pub fn load(path: impl AsRef<Path>, explicit: bool) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound && !explicit => {
                debug!("no configuration file at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on artifacts root.
        if let Some(artifacts) = settings.deploy.artifacts.take() {
            let expanded = shellexpand::full(artifacts.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
            settings.deploy.artifacts = Some(PathBuf::from(expanded));
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Build phase settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Do not log every packed file.
    pub quiet: bool,
}

/// Deploy phase settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Artifacts root to move displaced files into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PathBuf>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use tempfile::TempDir;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = indoc! {r#"
            log = "debug"

            [build]
            quiet = true

            [deploy]
            artifacts = "$BLAH/artifacts"
        "#}
        .parse()?;

        let expect = Settings {
            log: Some("debug".into()),
            build: BuildSettings { quiet: true },
            deploy: DeploySettings {
                artifacts: Some(PathBuf::from("/home/blah/blah/artifacts")),
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_partial_settings() -> anyhow::Result<()> {
        let result: Settings = indoc! {r#"
            [build]
            quiet = true
        "#}
        .parse()?;

        let expect = Settings {
            build: BuildSettings { quiet: true },
            ..Default::default()
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test(env = [("NOT_SET_ANYWHERE", "")])]
    fn deserialize_reports_unknown_variables() {
        std::env::remove_var("NOT_SET_ANYWHERE");
        let result = indoc! {r#"
            [deploy]
            artifacts = "$NOT_SET_ANYWHERE/artifacts"
        "#}
        .parse::<Settings>();

        assert!(matches!(result, Err(ConfigError::ShellExpansion(..))));
    }

    #[test]
    fn serialize_settings() -> anyhow::Result<()> {
        let settings = Settings {
            log: Some("info".into()),
            build: BuildSettings { quiet: false },
            deploy: DeploySettings {
                artifacts: Some(PathBuf::from("/srv/artifacts")),
            },
        };

        let result = settings.to_string();
        assert!(result.contains("[deploy]"));
        assert!(result.contains(r#"artifacts = "/srv/artifacts""#));
        assert_eq!(result.parse::<Settings>()?, settings);

        Ok(())
    }

    #[test]
    fn load_missing_settings() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let path = scratch.path().join("config.toml");

        assert_eq!(Settings::load(&path, false)?, Settings::default());
        assert!(matches!(
            Settings::load(&path, true),
            Err(ConfigError::Read { .. })
        ));

        Ok(())
    }

    #[test]
    fn load_malformed_settings() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let path = scratch.path().join("config.toml");
        std::fs::write(&path, "[build\nquiet = 1")?;

        let result = Settings::load(&path, false);
        assert!(matches!(result, Err(ConfigError::Deserialize(..))));

        Ok(())
    }
}
