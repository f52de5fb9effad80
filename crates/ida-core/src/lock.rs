//! Sentinel-file locks serialising bulk actions per project and service-wide.
//!
//! A lock is held while its zero-byte sentinel exists. Acquisition relies on
//! exclusive creation, so two racing callers cannot both win.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Project name addressing the service-wide lock.
pub const ALL_PROJECTS: &str = "all";

pub struct ProjectLockManager {
    config: AppConfig,
}

impl ProjectLockManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn control_dir(&self) -> PathBuf {
        self.config.control_dir()
    }

    pub fn global_lock_path(&self) -> PathBuf {
        self.control_dir().join("LOCK")
    }

    pub fn offline_path(&self) -> PathBuf {
        self.control_dir().join("OFFLINE")
    }

    /// Sentinel for a project, or the global sentinel for `"all"`.
    pub fn lock_path(&self, project: &str) -> Result<PathBuf> {
        if project == ALL_PROJECTS {
            return Ok(self.global_lock_path());
        }
        validate_project(project)?;
        Ok(self.config.project_home(project).join("files").join("LOCK"))
    }

    /// Invalid project names are never locked.
    pub fn is_locked(&self, project: &str) -> bool {
        self.lock_path(project).map_or(false, |path| path.exists())
    }

    /// Try to take the lock. `Ok(false)` means someone else holds it.
    pub fn lock(&self, project: &str) -> Result<bool> {
        let path = self.lock_path(project)?;
        if self.global_lock_path().exists() {
            if project == ALL_PROJECTS {
                return Ok(true);
            }
            debug!("Lock of {} refused: service is locked", project);
            return Ok(false);
        }

        if project == ALL_PROJECTS {
            self.ensure_control_dir("lock")?;
        }
        let acquired = create_sentinel(&path).map_err(|e| {
            error!(project, operation = "lock", path = %path.display(), "Failed to create lock: {}", e);
            e
        })?;
        if acquired {
            info!("Locked {}", project);
        } else {
            debug!("Lock of {} refused: already locked", project);
        }
        Ok(acquired)
    }

    pub fn unlock(&self, project: &str) -> Result<()> {
        let path = self.lock_path(project)?;
        remove_sentinel(&path).map_err(|e| {
            error!(project, operation = "unlock", path = %path.display(), "Failed to remove lock: {}", e);
            e
        })?;
        info!("Unlocked {}", project);
        Ok(())
    }

    pub fn is_offline(&self) -> bool {
        self.offline_path().exists()
    }

    pub fn set_offline(&self) -> Result<()> {
        self.ensure_control_dir("offline")?;
        let path = self.offline_path();
        create_sentinel(&path).map_err(|e| {
            error!(operation = "offline", path = %path.display(), "Failed to create sentinel: {}", e);
            e
        })?;
        info!("Service set offline");
        Ok(())
    }

    pub fn set_online(&self) -> Result<()> {
        let path = self.offline_path();
        remove_sentinel(&path).map_err(|e| {
            error!(operation = "online", path = %path.display(), "Failed to remove sentinel: {}", e);
            e
        })?;
        info!("Service set online");
        Ok(())
    }

    fn ensure_control_dir(&self, operation: &str) -> Result<()> {
        let dir = self.control_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            error!(operation, path = %dir.display(), "Failed to create control directory: {}", e);
            e
        })?;
        Ok(())
    }
}

/// A project name must be a single path component.
fn validate_project(project: &str) -> Result<()> {
    if project.trim().is_empty()
        || project == "."
        || project == ".."
        || project.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidArgument(format!(
            "invalid project name '{}'",
            project
        )));
    }
    Ok(())
}

/// Create an empty sentinel. Returns `false` if it already existed.
fn create_sentinel(path: &Path) -> std::io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

fn remove_sentinel(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
