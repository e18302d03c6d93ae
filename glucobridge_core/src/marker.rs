//! Last-seen marker persistence.
//!
//! By default the marker lives only in memory, so a restart forgets it and the
//! current reading is forwarded once more. [`FileMarker`] keeps it on disk with
//! file locking and atomic replacement for deployments that need restart safety.

use crate::{Error, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Storage for the timestamp identity of the last forwarded reading
pub trait MarkerStore {
    /// Load the stored marker, or `None` if nothing was stored
    fn load(&mut self) -> Result<Option<String>>;

    /// Record `marker` as the last forwarded timestamp
    fn store(&mut self, marker: &str) -> Result<()>;
}

impl<M: MarkerStore + ?Sized> MarkerStore for Box<M> {
    fn load(&mut self) -> Result<Option<String>> {
        (**self).load()
    }

    fn store(&mut self, marker: &str) -> Result<()> {
        (**self).store(marker)
    }
}

/// Marker kept only for the life of the process
#[derive(Debug, Default)]
pub struct MemoryMarker {
    marker: Option<String>,
}

impl MarkerStore for MemoryMarker {
    fn load(&mut self) -> Result<Option<String>> {
        Ok(self.marker.clone())
    }

    fn store(&mut self, marker: &str) -> Result<()> {
        self.marker = Some(marker.to_string());
        Ok(())
    }
}

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct MarkerFileContents {
    last_timestamp: String,
}

/// JSON file-backed marker
#[derive(Debug)]
pub struct FileMarker {
    path: PathBuf,
}

impl FileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MarkerStore for FileMarker {
    /// Returns `None` if the file doesn't exist.
    /// If the file is unreadable or corrupted, logs a warning and returns `None`.
    fn load(&mut self) -> Result<Option<String>> {
        let path = &self.path;
        if !path.exists() {
            tracing::info!("No marker file at {:?}, starting without a last-seen reading", path);
            return Ok(None);
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open marker file {:?}: {}. Ignoring it.", path, e);
                return Ok(None);
            }
        };

        // Acquire shared lock for reading
        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock marker file {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read marker file {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }

        file.unlock()?;

        match serde_json::from_str::<MarkerFileContents>(&contents) {
            Ok(stored) => {
                tracing::debug!("Loaded marker {:?} from {:?}", stored.last_timestamp, path);
                Ok(Some(stored.last_timestamp))
            }
            Err(e) => {
                tracing::warn!("Failed to parse marker file {:?}: {}. Ignoring it.", path, e);
                Ok(None)
            }
        }
    }

    /// Writes to a temp file in the same directory, syncs, then renames over the original
    fn store(&mut self, marker: &str) -> Result<()> {
        let path = &self.path;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;

        // Exclusive lock serializes concurrent writers
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(&MarkerFileContents {
                last_timestamp: marker.to_string(),
            })?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path)
            .map_err(|e| Error::State(format!("cannot replace {}: {}", path.display(), e.error)))?;

        tracing::debug!("Saved marker {:?} to {:?}", marker, path);
        Ok(())
    }
}
