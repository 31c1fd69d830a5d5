// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listener: Listener,
    pub log: Log,
}

impl Config {
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::IoError`] if `path` cannot be
    /// read, or [`crate::error::ErrorKind::ConfigError`] if its contents
    /// are not valid TOML for this shape.
    pub fn load(path: &Path) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    pub bind_addr: String,
    pub max_connections: usize,
    pub max_keep_alive: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub console_log: bool,
    pub level: LogLevel,
    pub log_file: Option<PathBuf>,
}

impl Log {
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.level
    }

    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
