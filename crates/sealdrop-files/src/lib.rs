//! # sealdrop Files
//!
//! Filesystem side of a sealdrop transfer.
//!
//! This crate provides:
//! - [`open_file`] / [`open_files`]: turn paths into sendable [`OutgoingFile`]s
//! - [`StagedFileSink`]: a [`ChunkSink`] that writes to a hidden temp file and
//!   renames it into place only on commit
//!
//! [`OutgoingFile`]: sealdrop_core::OutgoingFile
//! [`ChunkSink`]: sealdrop_core::ChunkSink

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sink;
pub mod source;

pub use sink::{StagedFileSink, resolve_output};
pub use source::{open_file, open_files};

use std::io;
use std::path::PathBuf;

/// Errors preparing files for sending or a directory for receiving.
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Opening a source file failed
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Source path is not a regular file
    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),

    /// Path has no usable final component
    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),

    /// Final path component is not a valid wire name
    #[error("{}: {source}", path.display())]
    InvalidName {
        /// Path that failed
        path: PathBuf,
        /// Why the name was rejected
        source: sealdrop_core::ProtocolError,
    },

    /// Two sources map to the same wire name
    #[error("more than one file is named {0}")]
    DuplicateName(String),

    /// Output directory could not be prepared
    #[error("cannot use output directory {}: {source}", path.display())]
    OutputDir {
        /// Directory that failed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Output path exists but is not a directory
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}
