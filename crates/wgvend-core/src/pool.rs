//! File-pool allocation for single-use configuration artifacts.
//!
//! Artifacts are pre-generated `.conf` files dropped into the `available/`
//! directory. Allocation atomically renames the first artifact (sorted by
//! filename) into `reserved/`, so two concurrent finalizations can never be
//! offered the same file. A reservation either commits to `used/` after a
//! successful delivery or is released back to `available/`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// Extension carried by every artifact file; anything else in the pool
/// directories is ignored.
pub const ARTIFACT_EXTENSION: &str = "conf";

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The available pool is empty.
    #[error("no artifacts available")]
    NoArtifacts,

    /// The named artifact holds no reservation.
    #[error("artifact not reserved: {name}")]
    NotReserved {
        /// The artifact name that was expected in the reserved pool.
        name: String,
    },

    /// Filesystem failure underneath a pool operation.
    #[error("pool i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// The three on-disk artifact pools.
#[derive(Debug)]
pub struct FilePool {
    available_dir: PathBuf,
    reserved_dir: PathBuf,
    used_dir: PathBuf,
}

impl FilePool {
    /// Opens the pool rooted at `root`, creating the `available/`,
    /// `reserved/`, and `used/` directories when absent.
    ///
    /// Reservations are in-memory soft state: any artifact still sitting in
    /// `reserved/` from a previous process is returned to `available/` here.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`] when a directory cannot be created or a
    /// stale reservation cannot be moved back.
    pub fn open(root: &Path) -> Result<Self, PoolError> {
        let pool = Self {
            available_dir: root.join("available"),
            reserved_dir: root.join("reserved"),
            used_dir: root.join("used"),
        };
        fs::create_dir_all(&pool.available_dir)?;
        fs::create_dir_all(&pool.reserved_dir)?;
        fs::create_dir_all(&pool.used_dir)?;
        pool.recover_stale_reservations()?;
        Ok(pool)
    }

    /// Returns the names of available artifacts, sorted by filename so that
    /// "take the first" is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`] when the directory cannot be read.
    pub fn list_available(&self) -> Result<Vec<String>, PoolError> {
        let mut names = Self::artifact_names(&self.available_dir)?;
        names.sort();
        Ok(names)
    }

    /// Allocates the next artifact: the first available name is atomically
    /// renamed into the reserved pool and returned.
    ///
    /// A name handed out here can never be returned to a second caller
    /// before [`Self::commit`] or [`Self::release`] resolves it; the rename
    /// is the reservation.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoArtifacts`] when the available pool is empty,
    /// or [`PoolError::Io`] on filesystem failure.
    pub fn allocate(&self) -> Result<String, PoolError> {
        for name in self.list_available()? {
            let src = self.available_dir.join(&name);
            let dst = self.reserved_dir.join(&name);
            match fs::rename(&src, &dst) {
                Ok(()) => {
                    info!(artifact = %name, "artifact reserved");
                    return Ok(name);
                },
                // Lost the race for this name; try the next one.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PoolError::Io(e)),
            }
        }
        Err(PoolError::NoArtifacts)
    }

    /// Commits a reservation: the artifact moves from `reserved/` to
    /// `used/`. Call only after the delivery for this artifact succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotReserved`] when no reservation exists for
    /// `name`, or [`PoolError::Io`] on filesystem failure.
    pub fn commit(&self, name: &str) -> Result<(), PoolError> {
        self.move_reserved(name, &self.used_dir)?;
        info!(artifact = %name, "artifact committed to used pool");
        Ok(())
    }

    /// Releases a reservation: the artifact returns to `available/` and
    /// becomes allocatable again. Used on rejection, cancellation, delivery
    /// failure, and pending-request replacement.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotReserved`] when no reservation exists for
    /// `name`, or [`PoolError::Io`] on filesystem failure.
    pub fn release(&self, name: &str) -> Result<(), PoolError> {
        self.move_reserved(name, &self.available_dir)?;
        info!(artifact = %name, "artifact released back to available pool");
        Ok(())
    }

    /// Path of a reserved artifact, for the delivery call.
    #[must_use]
    pub fn reserved_path(&self, name: &str) -> PathBuf {
        self.reserved_dir.join(name)
    }

    /// Number of available artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`] when the directory cannot be read.
    pub fn available_count(&self) -> Result<usize, PoolError> {
        Ok(Self::artifact_names(&self.available_dir)?.len())
    }

    /// Number of used artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`] when the directory cannot be read.
    pub fn used_count(&self) -> Result<usize, PoolError> {
        Ok(Self::artifact_names(&self.used_dir)?.len())
    }

    /// Names of used artifacts, sorted by filename.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`] when the directory cannot be read.
    pub fn list_used(&self) -> Result<Vec<String>, PoolError> {
        let mut names = Self::artifact_names(&self.used_dir)?;
        names.sort();
        Ok(names)
    }

    fn move_reserved(&self, name: &str, dst_dir: &Path) -> Result<(), PoolError> {
        let src = self.reserved_dir.join(name);
        let dst = dst_dir.join(name);
        fs::rename(&src, &dst).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PoolError::NotReserved {
                    name: name.to_string(),
                }
            } else {
                PoolError::Io(e)
            }
        })
    }

    fn recover_stale_reservations(&self) -> Result<(), PoolError> {
        let stale = Self::artifact_names(&self.reserved_dir)?;
        for name in &stale {
            fs::rename(self.reserved_dir.join(name), self.available_dir.join(name))?;
        }
        if !stale.is_empty() {
            warn!(
                count = stale.len(),
                "returned stale reservations to the available pool"
            );
        }
        Ok(())
    }

    fn artifact_names(dir: &Path) -> Result<Vec<String>, PoolError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_artifact = path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == ARTIFACT_EXTENSION);
            if !is_artifact {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
