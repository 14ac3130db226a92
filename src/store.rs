use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::CatalogConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("catalog {path} is not a valid JSON array: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write catalog {path} after {attempts} attempt(s): {source}")]
    Write {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// JSON file holding the whole catalog.
///
/// Saving copies the previous file aside first and overwrites in place;
/// writes blocked by another process holding the file are retried.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
    backup_path: PathBuf,
    write_attempts: u32,
    retry_backoff: Duration,
}

impl CatalogStore {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            path: config.path.clone(),
            backup_path: config.backup_path(),
            write_attempts: config.write_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Loads the catalog; a missing file is an empty catalog.
    pub fn load(&self) -> Result<Catalog, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no catalog found, starting empty");
                return Ok(Catalog::default());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, catalog: &Catalog) -> Result<(), StoreError> {
        self.save_with(catalog, |path, bytes| fs::write(path, bytes))
    }

    fn save_with<W>(&self, catalog: &Catalog, mut write: W) -> Result<(), StoreError>
    where
        W: FnMut(&Path, &[u8]) -> io::Result<()>,
    {
        self.backup();
        let bytes = serde_json::to_vec_pretty(catalog)?;

        let mut attempt = 1;
        loop {
            match write(&self.path, &bytes) {
                Ok(()) => {
                    debug!(
                        path = %self.path.display(),
                        entries = catalog.len(),
                        attempt,
                        "catalog written"
                    );
                    return Ok(());
                }
                Err(e) if is_transient(&e) && attempt < self.write_attempts => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "catalog is locked, retrying in {:?}",
                        self.retry_backoff
                    );
                    thread::sleep(self.retry_backoff);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(StoreError::Write {
                        path: self.path.clone(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    /// Best-effort copy of the current file to the backup path.
    fn backup(&self) {
        if !self.path.exists() {
            return;
        }
        match fs::copy(&self.path, &self.backup_path) {
            Ok(_) => debug!(backup = %self.backup_path.display(), "catalog backed up"),
            Err(e) => warn!(
                backup = %self.backup_path.display(),
                error = %e,
                "failed to back up catalog, continuing"
            ),
        }
    }
}

/// Lock and permission conflicts, typically another program holding the file.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy | io::ErrorKind::WouldBlock
    ) || (cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33)))
}
