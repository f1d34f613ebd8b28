// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

/// Error type for OMERO shape comment replacement.
///
/// Setup problems (authentication, group and dataset selection, CSV schema)
/// are fatal and abort the run. Row-level problems are normally recorded as
/// skips by the update applier and never surface as an `Error`, with the
/// exception of [`Error::Persistence`] which is reported per row.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred during file operations.
    IoError(std::io::Error),
    /// Configuration parsing or loading error.
    ConfigError(config::ConfigError),
    /// JSON serialization or deserialization error.
    JsonError(serde_json::Error),
    /// HTTP request error from the reqwest client.
    HttpError(reqwest::Error),
    /// URL parsing error.
    UrlParseError(url::ParseError),
    /// CSV reading or writing error.
    CsvError(csv::Error),
    /// Integer parsing error.
    ParseIntError(std::num::ParseIntError),
    /// Connecting or logging into the server failed.
    Authentication(String),
    /// The user is not a member of any group.
    NoGroups,
    /// A group or dataset identifier is not among the available choices.
    InvalidSelection(String),
    /// A required value is empty or otherwise unusable.
    Validation(String),
    /// The CSV input is missing required columns.
    Schema(Vec<String>),
    /// A CSV record could not be parsed into an update row.
    InvalidRow { line: u64, message: String },
    /// Saving a modified object failed.
    Persistence(String),
    /// Server returned a non-success status with an optional message.
    ServerError(u16, String),
    /// Server returned an invalid or unexpected response.
    InvalidResponse,
    /// The session is closed or was rejected by the server.
    SessionClosed,
}

impl Error {
    /// Returns true when the error leaves the session unusable, so the run
    /// must abort rather than skip the current row.
    pub fn is_structural(&self) -> bool {
        match self {
            Error::SessionClosed | Error::Authentication(_) => true,
            Error::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::HttpError(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::UrlParseError(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::CsvError(err)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::ParseIntError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
            Error::JsonError(e) => write!(f, "JSON error: {}", e),
            Error::HttpError(e) => write!(f, "HTTP error: {}", e),
            Error::UrlParseError(e) => write!(f, "URL parse error: {}", e),
            Error::CsvError(e) => write!(f, "CSV error: {}", e),
            Error::ParseIntError(e) => write!(f, "Integer parse error: {}", e),
            Error::Authentication(s) => write!(f, "Failed to connect to OMERO: {}", s),
            Error::NoGroups => write!(f, "No groups found for this user"),
            Error::InvalidSelection(s) => write!(f, "Invalid selection: {}", s),
            Error::Validation(s) => write!(f, "Validation error: {}", s),
            Error::Schema(missing) => write!(
                f,
                "The CSV file must contain the columns image_id, shape_id, old_text, new_text \
                 (missing: {})",
                missing.join(", ")
            ),
            Error::InvalidRow { line, message } => {
                write!(f, "Invalid CSV record on line {}: {}", line, message)
            }
            Error::Persistence(s) => write!(f, "Failed to save: {}", s),
            Error::ServerError(status, msg) => write!(f, "Server error {}: {}", status, msg),
            Error::InvalidResponse => write!(f, "Invalid server response"),
            Error::SessionClosed => write!(f, "Session is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::ConfigError(e) => Some(e),
            Error::JsonError(e) => Some(e),
            Error::HttpError(e) => Some(e),
            Error::UrlParseError(e) => Some(e),
            Error::CsvError(e) => Some(e),
            Error::ParseIntError(e) => Some(e),
            _ => None,
        }
    }
}
