use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{RoomNumber, SensorKind};

#[derive(Debug, Error, Diagnostic)]
pub enum RepackError {
    #[error("invalid room number: {0}")]
    InvalidRoom(String),

    #[error("invalid archive filename: {0}")]
    InvalidArchiveName(String),

    #[error("invalid date range: {from} is not before {to}")]
    InvalidDateRange { from: String, to: String },

    #[error("search for {filename} returned {count} results, expected exactly one")]
    #[diagnostic(help("check that the archive was uploaded for that date"))]
    ArchiveCardinality { filename: String, count: usize },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("environment variable {0} is not set")]
    #[diagnostic(help("export the variable before running"))]
    MissingSecret(String),

    #[error("repository request failed: {0}")]
    RepositoryHttp(String),

    #[error("repository returned status {status}: {message}")]
    RepositoryStatus { status: u16, message: String },

    #[error("notification request failed: {0}")]
    NotifyHttp(String),

    #[error("notification service returned status {status}: {message}")]
    NotifyStatus { status: u16, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RepackError {
    /// Errors caused by the remote repository rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            RepackError::RepositoryHttp(_)
                | RepackError::RepositoryStatus { .. }
                | RepackError::ArchiveCardinality { .. }
        )
    }
}

/// A problem that degrades the output without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    ExtractedFileCount { found: usize, expected: usize },
    RoomFileCount { room: RoomNumber, found: usize },
    MissingSensor { room: RoomNumber, sensor: SensorKind },
    UnknownFile { filename: String },
    DuplicateSensorFile {
        room: RoomNumber,
        sensor: SensorKind,
        filename: String,
    },
    UnparsedRows {
        room: RoomNumber,
        sensor: SensorKind,
        skipped: usize,
    },
    UnreadableFile {
        room: RoomNumber,
        sensor: SensorKind,
        reason: String,
    },
    ArchiveSkipped { date: NaiveDate, reason: String },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::ExtractedFileCount { found, expected } => write!(
                f,
                "archive contains {found} files - there should be at least {expected}"
            ),
            Issue::RoomFileCount { room, found } => write!(
                f,
                "archive contains {found} files for room {room} - there should be 3"
            ),
            Issue::MissingSensor { room, sensor } => {
                write!(f, "room {room} has no {sensor} file, filled with NAN")
            }
            Issue::UnknownFile { filename } => write!(f, "new data file name found: {filename}"),
            Issue::DuplicateSensorFile {
                room,
                sensor,
                filename,
            } => write!(f, "room {room} has a second {sensor} file {filename}, ignored"),
            Issue::UnparsedRows {
                room,
                sensor,
                skipped,
            } => write!(f, "room {room} {sensor}: {skipped} rows skipped"),
            Issue::UnreadableFile {
                room,
                sensor,
                reason,
            } => write!(f, "room {room} {sensor} file unreadable ({reason}), filled with NAN"),
            Issue::ArchiveSkipped { date, reason } => write!(f, "{date} skipped: {reason}"),
        }
    }
}
