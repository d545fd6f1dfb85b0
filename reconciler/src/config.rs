// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and setting up logging

use crate::sim::DEFAULT_PAGE_SIZE;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use slog::{o, Drain, Level, Logger};
use std::fs::OpenOptions;
use thiserror::Error;

/// Configuration for the reconciler
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Role that our own changes are made under.  Change notifications for
    /// calls made by this role are ignored.
    #[serde(default)]
    pub own_role: Option<String>,
    /// Logging configuration
    pub log: ConfigLogging,
    /// Settings for the simulated directory
    #[serde(default)]
    pub sim: SimConfig,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        config.validate().map_err(|message| LoadError::Invalid {
            path: path.into(),
            message,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sim.page_size == 0 {
            return Err("sim.page_size must be at least 1".to_string());
        }
        if let ConfigLogging::File { path, .. } = &self.log {
            if path.as_str().is_empty() {
                return Err("log.path must not be empty".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// number of link records returned per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig { page_size: default_page_size() }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid configuration in \"{path}\": {message}")]
    Invalid { path: Utf8PathBuf, message: String },
}

/// Where log messages go (the "log" table of the configuration)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "mode")]
pub enum ConfigLogging {
    #[serde(rename = "stderr-terminal")]
    StderrTerminal { level: ConfigLoggingLevel },

    #[serde(rename = "file")]
    File {
        level: ConfigLoggingLevel,
        path: Utf8PathBuf,
        #[serde(default)]
        if_exists: ConfigLoggingIfExists,
    },
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingIfExists {
    Fail,
    Truncate,
    #[default]
    Append,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<ConfigLoggingLevel> for Level {
    fn from(config_level: ConfigLoggingLevel) -> Level {
        match config_level {
            ConfigLoggingLevel::Trace => Level::Trace,
            ConfigLoggingLevel::Debug => Level::Debug,
            ConfigLoggingLevel::Info => Level::Info,
            ConfigLoggingLevel::Warn => Level::Warning,
            ConfigLoggingLevel::Error => Level::Error,
            ConfigLoggingLevel::Critical => Level::Critical,
        }
    }
}

#[derive(Debug, Error)]
#[error("open log file \"{path}\"")]
pub struct LogInitError {
    path: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

impl ConfigLogging {
    /// Create the root logger based on the requested configuration.
    pub fn to_logger(&self, name: &str) -> Result<Logger, LogInitError> {
        match self {
            ConfigLogging::StderrTerminal { level } => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root_logger(*level, drain, name))
            }

            ConfigLogging::File { level, path, if_exists } => {
                let mut open_options = OpenOptions::new();
                open_options.write(true).create(true);
                match if_exists {
                    ConfigLoggingIfExists::Fail => {
                        open_options.create_new(true);
                    }
                    ConfigLoggingIfExists::Append => {
                        open_options.append(true);
                    }
                    ConfigLoggingIfExists::Truncate => {
                        open_options.truncate(true);
                    }
                }

                let drain = log_drain_for_file(&open_options, path)?;
                Ok(async_root_logger(*level, drain, name))
            }
        }
    }
}

// Every drain is wrapped in an async drain, which does the synchronization.
fn async_root_logger<T>(
    level: ConfigLoggingLevel,
    drain: T,
    name: &str,
) -> Logger
where
    T: Drain + Send + 'static,
    <T as Drain>::Err: std::fmt::Debug,
{
    let level_drain = slog::LevelFilter(drain, Level::from(level)).fuse();
    let async_drain = slog_async::Async::new(level_drain).build().fuse();
    Logger::root(
        async_drain,
        o!("name" => name.to_string(), "pid" => std::process::id()),
    )
}

fn log_drain_for_file(
    open_options: &OpenOptions,
    path: &Utf8Path,
) -> Result<slog::Fuse<slog_json::Json<std::fs::File>>, LogInitError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| LogInitError { path: path.into(), err })?;
        }
    }
    let file = open_options
        .open(path)
        .map_err(|err| LogInitError { path: path.into(), err })?;

    // Tell whoever is watching the terminal where the rest of the log went.
    eprintln!("note: configured to log to \"{}\"", path);
    Ok(slog_json::Json::default(file).fuse())
}
