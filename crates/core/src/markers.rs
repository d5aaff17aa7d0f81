//! Durable per-process markers.
//!
//! One file per live service, named `<uuid>.txt` and holding the textual
//! process id. The directory is the only persisted state the orchestrator
//! owns; it is scanned in full at startup to reap services left behind by a
//! previous run.
//!
//! Marker I/O is synchronous. The registry performs it while holding its
//! lock, so the in-memory record and its marker change in the same step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::Pid;

/// Extension of committed marker files.
pub const MARKER_EXTENSION: &str = "txt";

/// Suffix of a marker that is still being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// A marker file found on disk.
#[derive(Debug, Clone)]
pub struct Marker {
    /// File name without extension; the record's uuid for committed markers.
    pub handle: String,
    pub path: PathBuf,
    /// `None` when the file content is not a process id.
    pub pid: Option<Pid>,
}

/// Directory of marker files.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// Open (creating if needed) the marker directory.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, handle: &str) -> PathBuf {
        self.dir.join(format!("{handle}.{MARKER_EXTENSION}"))
    }

    /// Write the marker for `handle`.
    ///
    /// Writes to a partial file first and renames it into place, so a crash
    /// never leaves a half-written marker under the committed name.
    pub fn write(&self, handle: &str, pid: Pid) -> io::Result<()> {
        let partial = self.dir.join(format!("{handle}{PARTIAL_SUFFIX}"));
        fs::write(&partial, pid.to_string())?;
        fs::rename(&partial, self.path_for(handle))
    }

    /// Remove the marker for `handle`. Returns `false` if it did not exist.
    pub fn remove(&self, handle: &str) -> io::Result<bool> {
        remove_file_if_exists(&self.path_for(handle))
    }

    /// Remove a marker found by [`scan`](Self::scan).
    pub fn remove_marker(&self, marker: &Marker) -> io::Result<bool> {
        remove_file_if_exists(&marker.path)
    }

    /// Every regular file in the marker directory, partial writes included.
    pub fn scan(&self) -> io::Result<Vec<Marker>> {
        let mut markers = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let handle = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pid = fs::read_to_string(&path)
                .ok()
                .and_then(|content| content.trim().parse::<Pid>().ok());
            markers.push(Marker { handle, path, pid });
        }
        markers.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(markers)
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
