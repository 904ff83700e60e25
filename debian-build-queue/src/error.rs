// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::queue_item::QueueLocation, std::path::PathBuf, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum BuildQueueError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[cfg(feature = "http")]
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("HTTP request for {0} returned status {1}")]
    HttpStatus(String, u16),

    #[error("file {0} is missing or unreadable: {1:?}")]
    FileUnreadable(PathBuf, std::io::Error),

    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("bad hex in content digest: {0}: {1:?}")]
    ContentDigestBadHex(String, hex::FromHexError),

    #[error("cannot {operation} an item that is {location}")]
    InvalidTransition {
        operation: &'static str,
        location: QueueLocation,
    },

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{0} already exists")]
    DestinationExists(PathBuf),

    #[error("journal {0} references files missing from both locations: {1:?}")]
    JournalIncomplete(PathBuf, Vec<String>),

    #[error("error running {program}: {source:?}")]
    Command {
        program: String,
        source: std::io::Error,
    },
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, BuildQueueError>;
