use tracing::{debug, info};

use crate::clock::{format_timestamp, Clock};
use crate::error::{Error, Result};
use crate::storage::models::{FrozenFile, NewFrozenFile};
use crate::storage::Database;

/// Records of files moved into a project's frozen area by freeze actions.
pub struct FrozenFileStore<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
}

impl<'a> FrozenFileStore<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock) -> Self {
        Self { db, clock }
    }

    pub fn insert(&self, file: &NewFrozenFile) -> Result<i64> {
        if file.project.trim().is_empty() || file.pathname.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "frozen file needs a project and a pathname".into(),
            ));
        }
        let id = self.db.insert_frozen_file(file)?;
        debug!("Recorded frozen file {} in project {}", file.pathname, file.project);
        Ok(id)
    }

    /// The active record for a pathname relative to the frozen folder.
    pub fn find_by_pathname(&self, project: &str, pathname: &str) -> Result<Option<FrozenFile>> {
        Ok(self.db.select_active_frozen_file(project, pathname)?)
    }

    /// Records under a relative pathname scope, newest record first.
    pub fn find_active_by_prefix(&self, project: &str, path_scope: &str) -> Result<Vec<FrozenFile>> {
        Ok(self.db.select_active_frozen_files_by_prefix(project, path_scope)?)
    }

    pub fn mark_removed(&self, id: i64) -> Result<()> {
        let ts = format_timestamp(self.clock.now());
        if self.db.set_frozen_file_removed(id, &ts)? == 0 {
            return Err(Error::NotFound(format!("no active frozen file with id {}", id)));
        }
        Ok(())
    }

    /// Delete the records of one project, or of every project for `"all"`.
    pub fn delete_all(&self, project: &str) -> Result<usize> {
        let scope = if project == "all" { None } else { Some(project) };
        let deleted = self.db.delete_frozen_files(scope)?;
        info!("Deleted {} frozen file records for {}", deleted, project);
        Ok(deleted)
    }
}
