// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker-infrastructure errors: I/O, channel plumbing, and config.
//!
//! Wire-protocol and session violations (bad QoS, session already in use,
//! not connected yet, ...) are [`codec::Error`] values; they cross the
//! listener/processor boundary unwrapped rather than through this type,
//! since the processor's job is to decide what to do with exactly that
//! closed set of protocol errors.

use std::fmt::{self, Display};
use std::io;

use tokio::sync::mpsc;

#[derive(Clone, Debug)]
pub enum ErrorKind {
    IoError,
    ConfigError,
    ChannelError,
    LoggerError,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("{err}"))
    }
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(err: mpsc::error::SendError<T>) -> Self {
        Self::from_string(ErrorKind::ChannelError, format!("channel closed: {err}"))
    }
}
