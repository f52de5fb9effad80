use super::models::*;
use super::sqlite::Database;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Result, Row};
use tracing::debug;

/// Selection over `ida_action`. `projects: None` means every project; an
/// empty set matches nothing.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub status: Option<ActionStatus>,
    pub projects: Option<Vec<String>>,
}

/// Selection over `ida_data_change` for one project. Every set field must match exactly.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub user: Option<String>,
    pub change: Option<ChangeKind>,
    pub mode: Option<ChangeMode>,
    pub limit: Option<u32>,
}

const ACTION_COLUMNS: &str = "id, pid, action, project, user, node, pathname, initiated, \
     storage, pids, checksums, metadata, replication, completed, failed, cleared, \
     error, retry, retrying";

const CHANGE_COLUMNS: &str = "timestamp, project, user, change, pathname, target, mode";

const FROZEN_FILE_COLUMNS: &str = "id, action, project, pathname, node, size, checksum, \
     modified, frozen, metadata, replicated, removed, cleared, pid";

const CACHE_COLUMNS: &str = "fileid, storage, path, name, mimetype, size, mtime, etag";

fn action_from_row(row: &Row<'_>) -> Result<Action> {
    Ok(Action {
        id: row.get(0)?,
        pid: row.get(1)?,
        action: row.get(2)?,
        project: row.get(3)?,
        user: row.get(4)?,
        node: row.get(5)?,
        pathname: row.get(6)?,
        initiated: row.get(7)?,
        storage: row.get(8)?,
        pids: row.get(9)?,
        checksums: row.get(10)?,
        metadata: row.get(11)?,
        replication: row.get(12)?,
        completed: row.get(13)?,
        failed: row.get(14)?,
        cleared: row.get(15)?,
        error: row.get(16)?,
        retry: row.get(17)?,
        retrying: row.get(18)?,
    })
}

fn change_from_row(row: &Row<'_>) -> Result<DataChange> {
    Ok(DataChange {
        timestamp: row.get(0)?,
        project: row.get(1)?,
        user: row.get(2)?,
        change: row.get(3)?,
        pathname: row.get(4)?,
        target: row.get(5)?,
        mode: row.get(6)?,
    })
}

fn frozen_file_from_row(row: &Row<'_>) -> Result<FrozenFile> {
    Ok(FrozenFile {
        id: row.get(0)?,
        action: row.get(1)?,
        project: row.get(2)?,
        pathname: row.get(3)?,
        node: row.get(4)?,
        size: row.get(5)?,
        checksum: row.get(6)?,
        modified: row.get(7)?,
        frozen: row.get(8)?,
        metadata: row.get(9)?,
        replicated: row.get(10)?,
        removed: row.get(11)?,
        cleared: row.get(12)?,
        pid: row.get(13)?,
    })
}

fn cache_entry_from_row(row: &Row<'_>) -> Result<CacheEntry> {
    Ok(CacheEntry {
        fileid: row.get(0)?,
        storage: row.get(1)?,
        path: row.get(2)?,
        name: row.get(3)?,
        mimetype: row.get(4)?,
        size: row.get(5)?,
        mtime: row.get(6)?,
        etag: row.get(7)?,
    })
}

/// Appends `AND project IN (?, ...)` for a project set, binding each name.
fn push_project_clause(sql: &mut String, values: &mut Vec<Value>, projects: Option<&[String]>) {
    if let Some(projects) = projects {
        let placeholders = vec!["?"; projects.len()].join(", ");
        sql.push_str(&format!(" AND project IN ({})", placeholders));
        values.extend(projects.iter().map(|p| Value::Text(p.clone())));
    }
}

fn char_len(s: &str) -> i64 {
    s.chars().count() as i64
}

impl Database {
    // ── Actions ──────────────────────────────────────────────────

    pub fn insert_action(&self, action: &NewAction, initiated: &str) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO ida_action (pid, action, project, user, node, pathname, initiated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action.pid,
                action.action,
                action.project,
                action.user,
                action.node,
                action.pathname,
                initiated
            ],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Inserted {} action {} for project {}", action.action, action.pid, action.project);
        Ok(id)
    }

    pub fn select_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        let mut sql = format!("SELECT {} FROM ida_action WHERE 1 = 1", ACTION_COLUMNS);
        let mut values = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND {}", status.predicate()));
        }
        push_project_clause(&mut sql, &mut values, filter.projects.as_deref());
        let order = filter
            .status
            .map(|s| s.order_column())
            .unwrap_or("initiated");
        sql.push_str(&format!(" ORDER BY {} DESC, id DESC", order));

        let mut stmt = self.connection().prepare(&sql)?;
        let actions = stmt
            .query_map(params_from_iter(values), action_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(actions)
    }

    pub fn count_actions(&self, filter: &ActionFilter) -> Result<i64> {
        let mut sql = "SELECT COUNT(*) FROM ida_action WHERE 1 = 1".to_string();
        let mut values = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND {}", status.predicate()));
        }
        push_project_clause(&mut sql, &mut values, filter.projects.as_deref());
        self.connection()
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
    }

    /// Whether a pending action of the given kind exists for any of the projects.
    pub fn has_pending_action_of_kind(
        &self,
        kind: ActionKind,
        projects: Option<&[String]>,
    ) -> Result<bool> {
        let mut sql = format!(
            "SELECT COUNT(*) FROM ida_action WHERE {} AND action = ?",
            ActionStatus::Pending.predicate()
        );
        let mut values = vec![Value::Text(kind.as_str().to_string())];
        push_project_clause(&mut sql, &mut values, projects);
        let count: i64 = self
            .connection()
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn select_action(&self, pid: &str, projects: Option<&[String]>) -> Result<Option<Action>> {
        let mut sql = format!("SELECT {} FROM ida_action WHERE pid = ?", ACTION_COLUMNS);
        let mut values = vec![Value::Text(pid.to_string())];
        push_project_clause(&mut sql, &mut values, projects);
        match self
            .connection()
            .query_row(&sql, params_from_iter(values), action_from_row)
        {
            Ok(action) => Ok(Some(action)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Set a milestone column if it is still null. Returns the number of rows changed.
    pub fn set_action_milestone(
        &self,
        pid: &str,
        milestone: Milestone,
        timestamp: &str,
    ) -> Result<usize> {
        let column = milestone.column();
        let sql = format!(
            "UPDATE ida_action SET {col} = ?1 \
             WHERE pid = ?2 AND {col} IS NULL AND failed IS NULL AND cleared IS NULL",
            col = column
        );
        let changed = self.connection().execute(&sql, params![timestamp, pid])?;
        debug!("Set {} = {} on action {} ({} rows)", column, timestamp, pid, changed);
        Ok(changed)
    }

    pub fn set_action_failed(&self, pid: &str, timestamp: &str, error: &str) -> Result<usize> {
        self.connection().execute(
            "UPDATE ida_action SET failed = ?1, error = ?2 \
             WHERE pid = ?3 AND failed IS NULL AND completed IS NULL AND cleared IS NULL",
            params![timestamp, error, pid],
        )
    }

    pub fn set_action_cleared(&self, pid: &str, timestamp: &str) -> Result<usize> {
        self.connection().execute(
            "UPDATE ida_action SET cleared = ?1 \
             WHERE pid = ?2 AND failed IS NOT NULL AND cleared IS NULL",
            params![timestamp, pid],
        )
    }

    pub fn set_action_retry(&self, pid: &str, timestamp: &str, retrying: &str) -> Result<usize> {
        self.connection().execute(
            "UPDATE ida_action SET retry = ?1, retrying = ?2 \
             WHERE pid = ?3 AND failed IS NOT NULL AND cleared IS NULL",
            params![timestamp, retrying, pid],
        )
    }

    pub fn delete_action(&self, pid: &str) -> Result<usize> {
        self.connection()
            .execute("DELETE FROM ida_action WHERE pid = ?1", params![pid])
    }

    /// Delete every action of one project, or of all projects when `project` is `None`.
    pub fn delete_actions(&self, project: Option<&str>) -> Result<usize> {
        let deleted = match project {
            Some(project) => self
                .connection()
                .execute("DELETE FROM ida_action WHERE project = ?1", params![project])?,
            None => self.connection().execute("DELETE FROM ida_action", [])?,
        };
        debug!("Deleted {} actions ({:?})", deleted, project);
        Ok(deleted)
    }

    // ── Data changes ─────────────────────────────────────────────

    pub fn insert_data_change(&self, change: &DataChange) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO ida_data_change (timestamp, project, user, change, pathname, target, mode) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                change.timestamp,
                change.project,
                change.user,
                change.change,
                change.pathname,
                change.target,
                change.mode
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Changes of one project matching the filter, newest first.
    pub fn select_data_changes(&self, project: &str, filter: &ChangeFilter) -> Result<Vec<DataChange>> {
        let mut sql = format!(
            "SELECT {} FROM ida_data_change WHERE project = ?",
            CHANGE_COLUMNS
        );
        let mut values = vec![Value::Text(project.to_string())];
        if let Some(user) = &filter.user {
            sql.push_str(" AND user = ?");
            values.push(Value::Text(user.clone()));
        }
        if let Some(change) = filter.change {
            sql.push_str(" AND change = ?");
            values.push(Value::Text(change.as_str().to_string()));
        }
        if let Some(mode) = filter.mode {
            sql.push_str(" AND mode = ?");
            values.push(Value::Text(mode.as_str().to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.connection().prepare(&sql)?;
        let changes = stmt
            .query_map(params_from_iter(values), change_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(changes)
    }

    /// The oldest change of the given kind for a project.
    pub fn select_first_data_change(
        &self,
        project: &str,
        change: ChangeKind,
    ) -> Result<Option<DataChange>> {
        let sql = format!(
            "SELECT {} FROM ida_data_change WHERE project = ?1 AND change = ?2 \
             ORDER BY timestamp ASC, id ASC LIMIT 1",
            CHANGE_COLUMNS
        );
        match self
            .connection()
            .query_row(&sql, params![project, change], change_from_row)
        {
            Ok(change) => Ok(Some(change)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The newest change of the given kind recorded for an exact pathname.
    pub fn select_last_data_change_for_pathname(
        &self,
        project: &str,
        change: ChangeKind,
        pathname: &str,
    ) -> Result<Option<DataChange>> {
        let sql = format!(
            "SELECT {} FROM ida_data_change \
             WHERE project = ?1 AND change = ?2 AND pathname = ?3 \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            CHANGE_COLUMNS
        );
        match self
            .connection()
            .query_row(&sql, params![project, change, pathname], change_from_row)
        {
            Ok(change) => Ok(Some(change)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `(pathname, timestamp)` of every change of a kind under a pathname
    /// prefix, sorted by pathname ascending then timestamp descending.
    pub fn select_change_timestamps_by_prefix(
        &self,
        project: &str,
        change: ChangeKind,
        prefix: &str,
    ) -> Result<Vec<(String, String)>> {
        let mut stmt = self.connection().prepare(
            "SELECT pathname, timestamp FROM ida_data_change \
             WHERE project = ?1 AND change = ?2 AND substr(pathname, 1, ?3) = ?4 \
             ORDER BY pathname ASC, timestamp DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(
                params![project, change, char_len(prefix), prefix],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_data_changes(&self, project: Option<&str>) -> Result<usize> {
        let deleted = match project {
            Some(project) => self.connection().execute(
                "DELETE FROM ida_data_change WHERE project = ?1",
                params![project],
            )?,
            None => self.connection().execute("DELETE FROM ida_data_change", [])?,
        };
        debug!("Deleted {} data changes ({:?})", deleted, project);
        Ok(deleted)
    }

    // ── Frozen files ─────────────────────────────────────────────

    pub fn insert_frozen_file(&self, file: &NewFrozenFile) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO ida_frozen_file \
             (action, project, pathname, node, size, checksum, modified, frozen, pid) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file.action,
                file.project,
                file.pathname,
                file.node,
                file.size,
                file.checksum,
                file.modified,
                file.frozen,
                file.pid
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Active (not removed, not cleared) frozen files under a pathname
    /// prefix, newest record first.
    pub fn select_active_frozen_files_by_prefix(
        &self,
        project: &str,
        prefix: &str,
    ) -> Result<Vec<FrozenFile>> {
        let sql = format!(
            "SELECT {} FROM ida_frozen_file \
             WHERE project = ?1 AND removed IS NULL AND cleared IS NULL \
             AND substr(pathname, 1, ?2) = ?3 \
             ORDER BY id DESC",
            FROZEN_FILE_COLUMNS
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let files = stmt
            .query_map(params![project, char_len(prefix), prefix], frozen_file_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn select_active_frozen_file(
        &self,
        project: &str,
        pathname: &str,
    ) -> Result<Option<FrozenFile>> {
        let sql = format!(
            "SELECT {} FROM ida_frozen_file \
             WHERE project = ?1 AND pathname = ?2 AND removed IS NULL AND cleared IS NULL \
             ORDER BY id DESC LIMIT 1",
            FROZEN_FILE_COLUMNS
        );
        match self
            .connection()
            .query_row(&sql, params![project, pathname], frozen_file_from_row)
        {
            Ok(file) => Ok(Some(file)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_frozen_file_removed(&self, id: i64, timestamp: &str) -> Result<usize> {
        self.connection().execute(
            "UPDATE ida_frozen_file SET removed = ?1 WHERE id = ?2 AND removed IS NULL",
            params![timestamp, id],
        )
    }

    pub fn delete_frozen_files(&self, project: Option<&str>) -> Result<usize> {
        match project {
            Some(project) => self.connection().execute(
                "DELETE FROM ida_frozen_file WHERE project = ?1",
                params![project],
            ),
            None => self.connection().execute("DELETE FROM ida_frozen_file", []),
        }
    }

    // ── Storage cache ────────────────────────────────────────────

    pub fn select_storage_numeric_id(&self, storage_id: &str) -> Result<Option<i64>> {
        match self.connection().query_row(
            "SELECT numeric_id FROM storages WHERE id = ?1",
            params![storage_id],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn insert_storage(&self, storage_id: &str) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO storages (id) VALUES (?1)",
            params![storage_id],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Insert a storage-cache row, returning its file id. The file-sharing
    /// server owns this table; this exists for repair tooling and tests.
    pub fn insert_cache_entry(
        &self,
        storage: i64,
        path: &str,
        mimetype: &str,
        size: i64,
        mtime: i64,
    ) -> Result<i64> {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.connection().execute(
            "INSERT INTO filecache (storage, path, name, mimetype, size, mtime) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![storage, path, name, mimetype, size, mtime],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn select_cache_entry(&self, storage: i64, path: &str) -> Result<Option<CacheEntry>> {
        let sql = format!(
            "SELECT {} FROM filecache WHERE storage = ?1 AND path = ?2",
            CACHE_COLUMNS
        );
        match self
            .connection()
            .query_row(&sql, params![storage, path], cache_entry_from_row)
        {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Non-folder entries whose path starts with `prefix`, path ascending.
    pub fn select_cache_files_by_prefix(
        &self,
        storage: i64,
        prefix: &str,
        limit: i64,
    ) -> Result<Vec<CacheEntry>> {
        let sql = format!(
            "SELECT {} FROM filecache \
             WHERE storage = ?1 AND mimetype != ?2 AND substr(path, 1, ?3) = ?4 \
             ORDER BY path ASC LIMIT ?5",
            CACHE_COLUMNS
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let entries = stmt
            .query_map(
                params![storage, FOLDER_MIMETYPE, char_len(prefix), prefix, limit],
                cache_entry_from_row,
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }
}
