//! Atomic JSON persistence for the engine's two state files
//!
//! Writes go to `<file>.tmp` and are renamed over the target, so a reader
//! never sees a truncated record. One retry, then the caller keeps its
//! in-memory value and tries again on the next mutation.

use reverie_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

const WRITE_ATTEMPTS: u32 = 2;

pub struct JsonStore<T> {
    path: PathBuf,
    timeout: Duration,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Read the record. `Ok(None)` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<T>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!("read {}: {}", self.path.display(), e)))
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Persistence(format!("parse {}: {}", self.path.display(), e)))
    }

    /// Atomically replace the record, retrying once.
    pub async fn save(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let mut last_err = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.write_once(&json).await {
                Ok(()) => {
                    debug!("Persisted {}", self.path.display());
                    return Ok(());
                }
                Err(e) => {
                    warn!("Write attempt {} for {} failed: {}", attempt, self.path.display(), e);
                    last_err = Some(e);
                }
            }
        }
        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        error!("Giving up on {} until next mutation: {}", self.path.display(), reason);
        Err(Error::Persistence(format!("{}: {}", self.path.display(), reason)))
    }

    async fn write_once(&self, json: &str) -> Result<()> {
        let tmp = self.tmp_path();
        let write = async {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Persistence(e.to_string())),
            Err(_) => Err(Error::timeout(format!("write {}", self.path.display()), self.timeout)),
        }
    }

    /// Delete the record. Missing files are not an error.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!("remove {}: {}", self.path.display(), e))),
        }
    }
}
