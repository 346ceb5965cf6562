//! File sources for the sending side.

use crate::FilesError;
use sealdrop_core::{FileName, OutgoingFile};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Open `path` for sending under its final path component.
///
/// # Errors
///
/// Fails if the path has no valid wire name, cannot be opened, or is not a
/// regular file.
pub fn open_file(path: &Path) -> Result<OutgoingFile, FilesError> {
    let raw = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FilesError::NoFileName(path.to_path_buf()))?;
    let name = FileName::parse(raw).map_err(|source| FilesError::InvalidName {
        path: path.to_path_buf(),
        source,
    })?;

    let file = File::open(path).map_err(|source| FilesError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let metadata = file.metadata().map_err(|source| FilesError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(FilesError::NotAFile(path.to_path_buf()));
    }

    debug!(path = %path.display(), %name, len = metadata.len(), "opened source file");
    Ok(OutgoingFile::new(name, file, Some(metadata.len())))
}

/// Open every path, rejecting two paths that would arrive under one name.
///
/// # Errors
///
/// The first [`open_file`] failure, or [`FilesError::DuplicateName`].
pub fn open_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<OutgoingFile>, FilesError> {
    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(paths.len());

    for path in paths {
        let file = open_file(path.as_ref())?;
        if !seen.insert(file.name.as_str().to_owned()) {
            return Err(FilesError::DuplicateName(file.name.to_string()));
        }
        files.push(file);
    }

    Ok(files)
}
