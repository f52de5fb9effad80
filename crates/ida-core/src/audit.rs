//! Append-only log of structural changes to project data.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::clock::{format_timestamp, normalize_timestamp, Clock};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::storage::models::{ChangeKind, ChangeMode, DataChange};
use crate::storage::{ChangeFilter, Database};

/// User recorded for changes made by administrators and project service accounts.
pub const SERVICE_USER: &str = "service";

/// A change to be recorded. `timestamp` and `mode` default to now and `api`.
#[derive(Debug, Clone, Default)]
pub struct ChangeRequest<'r> {
    pub project: &'r str,
    pub user: &'r str,
    pub change: &'r str,
    pub pathname: &'r str,
    pub target: Option<&'r str>,
    pub timestamp: Option<&'r str>,
    pub mode: Option<&'r str>,
}

/// Optional exact-match filters for history queries.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery<'q> {
    pub user: Option<&'q str>,
    pub change: Option<ChangeKind>,
    pub mode: Option<ChangeMode>,
    pub limit: Option<u32>,
}

pub struct ChangeAuditLog<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    config: &'a AppConfig,
}

impl<'a> ChangeAuditLog<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &'a AppConfig) -> Self {
        Self { db, clock, config }
    }

    fn normalize_user(&self, user: &str) -> String {
        if user == "admin" || self.config.is_project_user(user) {
            SERVICE_USER.to_string()
        } else {
            user.to_string()
        }
    }

    pub fn record(&self, request: ChangeRequest<'_>) -> Result<DataChange> {
        for (field, value) in [
            ("project", request.project),
            ("user", request.user),
            ("change", request.change),
            ("pathname", request.pathname),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidArgument(format!("{} must not be empty", field)));
            }
        }

        let change: ChangeKind = request.change.parse()?;
        let target = request.target.filter(|t| !t.is_empty());
        if change.requires_target() && target.is_none() {
            return Err(Error::InvalidArgument(format!(
                "a target pathname is required for {} changes",
                change
            )));
        }
        let mode = match request.mode {
            Some(mode) => mode.parse()?,
            None => ChangeMode::default(),
        };
        let timestamp = match request.timestamp {
            Some(ts) => normalize_timestamp(ts)?,
            None => format_timestamp(self.clock.now()),
        };

        let record = DataChange {
            timestamp,
            project: request.project.to_string(),
            user: self.normalize_user(request.user),
            change,
            pathname: request.pathname.to_string(),
            target: target.map(str::to_string),
            mode,
        };
        self.db.insert_data_change(&record)?;
        debug!(
            "Recorded {} of {} in project {} by {}",
            record.change, record.pathname, record.project, record.user
        );
        Ok(record)
    }

    /// Record projects that predate the change log have implicitly, anchored at the migration epoch.
    fn synthetic_init(&self, project: &str) -> DataChange {
        DataChange {
            timestamp: self.config.migration_epoch.clone(),
            project: project.to_string(),
            user: SERVICE_USER.to_string(),
            change: ChangeKind::Init,
            pathname: "/".to_string(),
            target: None,
            mode: ChangeMode::System,
        }
    }

    fn allows_synthetic_init(user: Option<&str>, query: &HistoryQuery<'_>) -> bool {
        user.map_or(true, |u| u == SERVICE_USER)
            && query.change.map_or(true, |c| c == ChangeKind::Init)
            && query.mode.map_or(true, |m| m == ChangeMode::System)
    }

    /// Changes of a project newest first; falls back to the synthetic init
    /// record when nothing matches and the filters admit it.
    pub fn history(&self, project: &str, query: &HistoryQuery<'_>) -> Result<Vec<DataChange>> {
        if project.trim().is_empty() {
            return Err(Error::InvalidArgument("project must not be empty".into()));
        }
        if query.limit == Some(0) {
            return Err(Error::InvalidArgument("limit must be positive".into()));
        }
        let user = query.user.map(|u| self.normalize_user(u));
        let filter = ChangeFilter {
            user: user.clone(),
            change: query.change,
            mode: query.mode,
            limit: query.limit,
        };
        let changes = self.db.select_data_changes(project, &filter)?;
        if changes.is_empty() && Self::allows_synthetic_init(user.as_deref(), query) {
            return Ok(vec![self.synthetic_init(project)]);
        }
        Ok(changes)
    }

    pub fn last_for(&self, project: &str, query: &HistoryQuery<'_>) -> Result<Option<DataChange>> {
        let query = HistoryQuery {
            limit: Some(1),
            ..query.clone()
        };
        Ok(self.history(project, &query)?.into_iter().next())
    }

    /// The project's first `init` record, if it was ever recorded.
    pub fn get_initialization_details(&self, project: &str) -> Result<Option<DataChange>> {
        Ok(self.db.select_first_data_change(project, ChangeKind::Init)?)
    }

    /// Latest `add` of a pathname relative to the project's staging folder.
    pub fn get_last_add_change_details(
        &self,
        project: &str,
        pathname: &str,
    ) -> Result<Option<DataChange>> {
        let full = format!("{}{}", self.config.staging_root(project), pathname);
        Ok(self
            .db
            .select_last_data_change_for_pathname(project, ChangeKind::Add, &full)?)
    }

    /// Most recent `add` timestamp of every staging pathname under `path_scope`.
    pub fn last_add_timestamps_by_prefix(
        &self,
        project: &str,
        path_scope: &str,
    ) -> Result<BTreeMap<String, String>> {
        let prefix = format!("{}{}", self.config.staging_root(project), path_scope);
        let rows = self
            .db
            .select_change_timestamps_by_prefix(project, ChangeKind::Add, &prefix)?;

        let mut latest = BTreeMap::new();
        for (pathname, timestamp) in rows {
            // Rows arrive newest first within each pathname.
            latest.entry(pathname).or_insert(timestamp);
        }
        Ok(latest)
    }

    /// Irreversibly delete the log of one project, or of every project for `"all"`.
    pub fn purge(&self, project: &str) -> Result<usize> {
        if project.trim().is_empty() {
            return Err(Error::InvalidArgument("project must not be empty".into()));
        }
        let scope = if project == "all" { None } else { Some(project) };
        let deleted = self.db.delete_data_changes(scope)?;
        info!("Purged {} data changes for {}", deleted, project);
        Ok(deleted)
    }
}
