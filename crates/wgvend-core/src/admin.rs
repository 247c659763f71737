//! Administrator directory: a flat file of principal IDs, one per line.
//!
//! The directory is additive only — there is no revoke operation. The
//! configured owner ID is seeded on first bootstrap and treated as a
//! permanent member.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::gateway::UserId;

/// Errors from admin directory operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Filesystem failure underneath a directory operation.
    #[error("admin directory i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// Mutable set of administrator IDs persisted to a flat file.
#[derive(Debug)]
pub struct AdminDirectory {
    path: PathBuf,
}

impl AdminDirectory {
    /// Creates a directory handle for the given backing file. The file is
    /// not touched until [`Self::bootstrap`] runs.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ensures the backing file exists and contains the owner ID.
    /// Idempotent: calling it twice leaves exactly one entry for the owner.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Io`] when the file cannot be created or
    /// appended.
    pub fn bootstrap(&self, owner: UserId) -> Result<(), AdminError> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, format!("{owner}\n"))?;
            info!(owner = owner.0, "admin directory created");
            return Ok(());
        }
        if !self.contains(owner)? {
            self.append(owner)?;
            info!(owner = owner.0, "owner re-seeded into admin directory");
        }
        Ok(())
    }

    /// Membership test. Read failures are logged and reported as
    /// non-membership rather than propagated: an unreadable directory must
    /// never grant administrative capability.
    #[must_use]
    pub fn is_admin(&self, id: UserId) -> bool {
        match self.contains(id) {
            Ok(present) => present,
            Err(e) => {
                warn!(user_id = id.0, "admin membership check failed: {e}");
                false
            },
        }
    }

    /// Grants administrator rights. Returns `true` when the ID was newly
    /// added, `false` when it was already a member.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Io`] when the file cannot be read or appended.
    pub fn grant(&self, id: UserId) -> Result<bool, AdminError> {
        if self.contains(id)? {
            return Ok(false);
        }
        self.append(id)?;
        info!(user_id = id.0, "administrator granted");
        Ok(true)
    }

    fn contains(&self, id: UserId) -> Result<bool, AdminError> {
        if !self.path.exists() {
            return Ok(false);
        }
        let wanted = id.to_string();
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().any(|line| line.trim() == wanted))
    }

    fn append(&self, id: UserId) -> Result<(), AdminError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{id}")?;
        Ok(())
    }
}
