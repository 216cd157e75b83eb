//! JSON-blob state persistence
//!
//! A directory of single-document JSON files, one per fixed key. Every save
//! overwrites the whole record via temp-file + rename, so a crash mid-write
//! never leaves a torn blob and there are no field-level increments to lose
//! under rare concurrent access. A missing file is a cold start, not an error.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Errors from state persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("state store I/O error: {0}")]
    Io(String),

    #[error("state parse error: {0}")]
    Parse(String),
}

/// Result alias for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Handle to a directory of keyed JSON blobs.
///
/// Cheap to clone; each component owns its handle and its own keys.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("creating state dir {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Load the blob stored under `key`, or `None` if it was never written.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Io(format!("reading {}: {e}", path.display())))?;
        let value = serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing {}: {e}", path.display())))?;
        Ok(Some(value))
    }

    /// Overwrite the blob under `key` atomically (temp file + rename).
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Parse(format!("serializing {key}: {e}")))?;

        let tmp_path = self
            .dir
            .join(format!(".{key}.tmp.{}", std::process::id()));

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| Error::Io(format!("writing temp file for {key}: {e}")))?;

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::Io(format!("renaming temp file for {key}: {e}")))?;

        debug!(key, path = %path.display(), "persisted state blob");
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
