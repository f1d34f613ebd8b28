// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Settings file support.
//!
//! Connection and target settings can be kept in a TOML file so that only
//! the CSV file has to be given on the command line:
//!
//! ```toml
//! host = "https://omero.example.org"
//! username = "alice"
//! group = 53
//! dataset = 0
//! dataset_name = "reviewed"
//! ```
//!
//! Every setting is optional. Command line flags and environment variables
//! take precedence over the file.

use crate::{
    Error,
    api::{DatasetID, GroupID},
};
use ::config::{Config, File, FileFormat};
use directories::ProjectDirs;
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_server_id() -> u64 {
    1
}

fn default_timeout() -> u64 {
    30
}

/// Settings read from the configuration file.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub group: Option<GroupID>,
    /// Target dataset, `0` to create a new one.
    pub dataset: Option<DatasetID>,
    /// Name of the dataset to create.
    pub dataset_name: Option<String>,
    /// Index of the OMERO server in the web server's server list.
    #[serde(default = "default_server_id")]
    pub server_id: u64,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: None,
            username: None,
            password: None,
            group: None,
            dataset: None,
            dataset_name: None,
            server_id: default_server_id(),
            timeout: default_timeout(),
        }
    }
}

impl Settings {
    /// Default location of the settings file, `omero-replace/config.toml`
    /// under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "OME", "omero-replace")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads settings from the given file, or from the default location
    /// when `path` is `None`.
    ///
    /// A missing file yields the defaults. An explicitly given file that
    /// does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Settings::default()),
            },
        };

        debug!("Loading settings from {:?}", path);
        let settings = Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// The configured timeout, overridden by `OMERO_TIMEOUT` when set.
    pub fn effective_timeout(&self) -> u64 {
        timeout_override(std::env::var("OMERO_TIMEOUT").ok().as_deref(), self.timeout)
    }
}

/// Parses a timeout override in seconds, keeping the fallback when the value
/// is absent or not a number.
fn timeout_override(value: Option<&str>, fallback: u64) -> u64 {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_timeout_override() {
        assert_eq!(timeout_override(Some("45"), 30), 45);
        assert_eq!(timeout_override(Some(" 5 "), 30), 5);
        assert_eq!(timeout_override(Some("soon"), 30), 30);
        assert_eq!(timeout_override(None, 12), 12);
    }

    #[test]
    fn test_load_file() -> Result<(), Error> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            "host = \"https://omero.example.org\"\n\
             username = \"alice\"\n\
             group = 53\n\
             dataset = 0\n\
             dataset_name = \"reviewed\"\n\
             timeout = 90"
        )?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.host.as_deref(), Some("https://omero.example.org"));
        assert_eq!(settings.username.as_deref(), Some("alice"));
        assert_eq!(settings.password, None);
        assert_eq!(settings.group, Some(GroupID::from(53)));
        assert_eq!(settings.dataset, Some(DatasetID::from(0)));
        assert_eq!(settings.dataset_name.as_deref(), Some("reviewed"));
        assert_eq!(settings.server_id, 1);
        assert_eq!(settings.timeout, 90);
        Ok(())
    }

    #[test]
    fn test_empty_file_gives_defaults() -> Result<(), Error> {
        let file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings, Settings::default());
        Ok(())
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let result = Settings::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::ConfigError(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_value() -> Result<(), Error> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "group = \"lab\"")?;
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(Error::ConfigError(_))
        ));
        Ok(())
    }
}
