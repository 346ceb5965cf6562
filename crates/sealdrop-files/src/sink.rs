//! Staged file sink.
//!
//! Received bytes go to a hidden `.sealdrop.<pid>.<n>.part` file in the
//! output directory. The part file is renamed onto the real name only when
//! the transfer is committed, so a failed or interrupted transfer never
//! leaves a half-written file under its final name. Part names do not embed
//! the file name, which may already use the whole 255-byte limit.

use crate::FilesError;
use sealdrop_core::{ChunkSink, FileName};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Path a received file named `name` ends up at.
///
/// `name` is already validated, so it is a single path component.
#[must_use]
pub fn resolve_output(output_dir: &Path, name: &FileName) -> PathBuf {
    output_dir.join(name.as_str())
}

fn part_path(output_dir: &Path, seq: u64) -> PathBuf {
    output_dir.join(format!(".sealdrop.{}.{seq}.part", std::process::id()))
}

#[derive(Debug)]
struct Staged {
    writer: BufWriter<File>,
    part: PathBuf,
    target: PathBuf,
}

/// [`ChunkSink`] writing into a directory with atomic commit.
#[derive(Debug)]
pub struct StagedFileSink {
    output_dir: PathBuf,
    overwrite: bool,
    current: Option<Staged>,
    committed: Vec<PathBuf>,
    next_part: u64,
}

impl StagedFileSink {
    /// Create a sink for `output_dir`, creating the directory if missing.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::NotADirectory`] if the path exists but is not a
    /// directory, or [`FilesError::OutputDir`] if it cannot be created.
    pub fn new(output_dir: impl Into<PathBuf>, overwrite: bool) -> Result<Self, FilesError> {
        let output_dir = output_dir.into();

        if output_dir.exists() {
            if !output_dir.is_dir() {
                return Err(FilesError::NotADirectory(output_dir));
            }
        } else {
            fs::create_dir_all(&output_dir).map_err(|source| FilesError::OutputDir {
                path: output_dir.clone(),
                source,
            })?;
        }

        Ok(Self {
            output_dir,
            overwrite,
            current: None,
            committed: Vec::new(),
            next_part: 0,
        })
    }

    /// Directory files are written into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Final paths of all committed files, in order.
    #[must_use]
    pub fn committed(&self) -> &[PathBuf] {
        &self.committed
    }

    fn refuse_existing(&self, target: &Path) -> io::Result<()> {
        if !self.overwrite && target.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }
        Ok(())
    }
}

impl ChunkSink for StagedFileSink {
    fn begin(&mut self, name: &FileName) -> io::Result<()> {
        if self.current.is_some() {
            return Err(io::Error::other("previous transfer not finished"));
        }

        let target = resolve_output(&self.output_dir, name);
        self.refuse_existing(&target)?;

        let part = part_path(&self.output_dir, self.next_part);
        self.next_part += 1;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part)?;
        debug!(%name, part = %part.display(), "staging file");

        self.current = Some(Staged {
            writer: BufWriter::new(file),
            part,
            target,
        });
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let staged = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::other("write without begin"))?;
        staged.writer.write_all(data)
    }

    fn commit(&mut self) -> io::Result<()> {
        let Some(staged) = self.current.take() else {
            return Err(io::Error::other("commit without begin"));
        };

        let result = (|| {
            let file = staged.writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            drop(file);
            self.refuse_existing(&staged.target)?;
            fs::rename(&staged.part, &staged.target)
        })();

        match result {
            Ok(()) => {
                info!(path = %staged.target.display(), "file committed");
                self.committed.push(staged.target);
                Ok(())
            }
            Err(e) => {
                remove_part(&staged.part);
                Err(e)
            }
        }
    }

    fn abort(&mut self) {
        if let Some(staged) = self.current.take() {
            drop(staged.writer);
            remove_part(&staged.part);
            debug!(path = %staged.target.display(), "transfer aborted, part file removed");
        }
    }
}

impl Drop for StagedFileSink {
    fn drop(&mut self) {
        self.abort();
    }
}

fn remove_part(part: &Path) {
    match fs::remove_file(part) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(part = %part.display(), "failed to remove part file: {e}"),
    }
}
