//! Writing output files via a temporary file that is renamed into
//! place, so that a failed run never leaves a half-written file at
//! the target path.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use nix::unistd::{getpid, gettid};

use crate::info;

#[derive(Debug, thiserror::Error)]
pub enum TempfileError {
    #[error("path is missing parent directory part")]
    MissingParent,
    #[error("path is missing file name part")]
    MissingFileName,
    #[error("IO error while {0} {1:?}: {2:#}")]
    IOError(&'static str, PathBuf, std::io::Error),
}

/// Append a suffix `.tmp~..-..` where the numbers are pid and tid
pub fn temp_path(target_path: impl AsRef<Path>) -> Result<PathBuf, TempfileError> {
    let target_path = target_path.as_ref();
    let dir = target_path.parent().ok_or(TempfileError::MissingParent)?;
    let file_name = target_path
        .file_name()
        .ok_or(TempfileError::MissingFileName)?;
    let pid = getpid();
    let tid = gettid();
    let file_name = format!("{}.tmp~{pid}-{tid}", file_name.to_string_lossy());
    Ok(dir.join(file_name))
}

/// Removes the temporary file on drop unless `finish` was called.
#[derive(Debug)]
pub struct Tempfile {
    pub target_path: PathBuf,
    pub temp_path: PathBuf,
    finished: bool,
}

impl Tempfile {
    pub fn new(target_path: impl Into<PathBuf>) -> Result<Self, TempfileError> {
        let target_path = target_path.into();
        let temp_path = temp_path(&target_path)?;
        Ok(Tempfile {
            target_path,
            temp_path,
            finished: false,
        })
    }

    pub fn create(&self) -> Result<File, TempfileError> {
        File::create(&self.temp_path)
            .map_err(|e| TempfileError::IOError("creating", self.temp_path.clone(), e))
    }

    pub fn finish(mut self) -> Result<(), TempfileError> {
        std::fs::rename(&self.temp_path, &self.target_path).map_err(|e| {
            TempfileError::IOError("renaming to target", self.target_path.clone(), e)
        })?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Tempfile {
    fn drop(&mut self) {
        if !self.finished {
            match std::fs::remove_file(&self.temp_path) {
                Ok(()) => (),
                Err(e) => match e.kind() {
                    std::io::ErrorKind::NotFound => (),
                    _ => info!("error deleting temporary file {:?}: {e:#}", self.temp_path),
                },
            }
        }
    }
}

/// Write the file at `target_path` via `write`, buffered. On errors,
/// `target_path` is left untouched.
pub fn write_file_atomically(
    target_path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<(), TempfileError> {
    let tempfile = Tempfile::new(target_path)?;
    let mut out = BufWriter::new(tempfile.create()?);
    let io_err = |e| TempfileError::IOError("writing", tempfile.temp_path.clone(), e);
    write(&mut out).map_err(io_err)?;
    let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    tempfile.finish()
}
