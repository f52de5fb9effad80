use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Mimetype the storage cache assigns to directories.
pub const FOLDER_MIMETYPE: &str = "httpd/unix-directory";

/// Implements string conversion, `Display` and SQLite mapping for a
/// fieldless enum whose variants map one-to-one onto lowercase keywords.
macro_rules! keyword_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidArgument(format!(
                        "unknown {} '{}'",
                        $what, other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|_| FromSqlError::InvalidType)
            }
        }
    };
}

// ── Actions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Freeze,
    Unfreeze,
    Delete,
    Suspend,
    Repair,
}

keyword_enum!(ActionKind, "action", {
    Freeze => "freeze",
    Unfreeze => "unfreeze",
    Delete => "delete",
    Suspend => "suspend",
    Repair => "repair",
});

impl ActionKind {
    /// Milestones that must all be reached before the action may complete.
    pub fn required_milestones(&self) -> &'static [Milestone] {
        match self {
            ActionKind::Freeze => &[
                Milestone::Storage,
                Milestone::Metadata,
                Milestone::Checksums,
                Milestone::Pids,
                Milestone::Replication,
            ],
            _ => &[Milestone::Storage, Milestone::Metadata],
        }
    }
}

/// Status filter over actions. Each status is a predicate over the
/// milestone timestamps; `Incomplete` is the union of pending and failed and
/// is never reported for a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
    Cleared,
    Incomplete,
    Initiating,
}

keyword_enum!(ActionStatus, "action status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cleared => "cleared",
    Incomplete => "incomplete",
    Initiating => "initiating",
});

impl ActionStatus {
    pub(crate) fn predicate(&self) -> &'static str {
        match self {
            ActionStatus::Initiating => "cleared IS NULL AND storage IS NULL",
            ActionStatus::Pending => {
                "cleared IS NULL AND completed IS NULL AND failed IS NULL"
            }
            ActionStatus::Completed => "cleared IS NULL AND completed IS NOT NULL",
            ActionStatus::Failed => "cleared IS NULL AND failed IS NOT NULL",
            ActionStatus::Cleared => "cleared IS NOT NULL",
            ActionStatus::Incomplete => "cleared IS NULL AND completed IS NULL",
        }
    }

    /// Column the listing for this status is ordered by, newest first.
    pub(crate) fn order_column(&self) -> &'static str {
        match self {
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Cleared => "cleared",
            _ => "initiated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Milestone {
    Storage,
    Pids,
    Checksums,
    Metadata,
    Replication,
    Completed,
}

keyword_enum!(Milestone, "milestone", {
    Storage => "storage",
    Pids => "pids",
    Checksums => "checksums",
    Metadata => "metadata",
    Replication => "replication",
    Completed => "completed",
});

impl Milestone {
    pub(crate) fn column(&self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub id: i64,
    pub pid: String,
    pub action: ActionKind,
    pub project: String,
    pub user: String,
    pub node: i64,
    pub pathname: String,
    pub initiated: String,
    pub storage: Option<String>,
    pub pids: Option<String>,
    pub checksums: Option<String>,
    pub metadata: Option<String>,
    pub replication: Option<String>,
    pub completed: Option<String>,
    pub failed: Option<String>,
    pub cleared: Option<String>,
    pub error: Option<String>,
    pub retry: Option<String>,
    pub retrying: Option<String>,
}

impl Action {
    /// Current state of this action.
    pub fn status(&self) -> ActionStatus {
        if self.cleared.is_some() {
            ActionStatus::Cleared
        } else if self.completed.is_some() {
            ActionStatus::Completed
        } else if self.failed.is_some() {
            ActionStatus::Failed
        } else if self.storage.is_none() {
            ActionStatus::Initiating
        } else {
            ActionStatus::Pending
        }
    }

    /// Whether this action satisfies a status filter; mirrors the SQL predicates.
    pub fn matches(&self, status: ActionStatus) -> bool {
        let cleared = self.cleared.is_some();
        match status {
            ActionStatus::Initiating => !cleared && self.storage.is_none(),
            ActionStatus::Pending => {
                !cleared && self.completed.is_none() && self.failed.is_none()
            }
            ActionStatus::Completed => !cleared && self.completed.is_some(),
            ActionStatus::Failed => !cleared && self.failed.is_some(),
            ActionStatus::Cleared => cleared,
            ActionStatus::Incomplete => !cleared && self.completed.is_none(),
        }
    }

    pub fn milestone(&self, milestone: Milestone) -> Option<&str> {
        match milestone {
            Milestone::Storage => self.storage.as_deref(),
            Milestone::Pids => self.pids.as_deref(),
            Milestone::Checksums => self.checksums.as_deref(),
            Milestone::Metadata => self.metadata.as_deref(),
            Milestone::Replication => self.replication.as_deref(),
            Milestone::Completed => self.completed.as_deref(),
        }
    }

    /// Milestones still outstanding before this action may complete.
    pub fn missing_milestones(&self) -> Vec<Milestone> {
        self.action
            .required_milestones()
            .iter()
            .copied()
            .filter(|m| self.milestone(*m).is_none())
            .collect()
    }
}

/// Input for creating a new action record.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub pid: String,
    pub action: ActionKind,
    pub project: String,
    pub user: String,
    pub node: i64,
    pub pathname: String,
    pub initiated: Option<String>,
}

// ── Data changes ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Init,
    Add,
    Modify,
    Rename,
    Move,
    Copy,
    Delete,
}

keyword_enum!(ChangeKind, "change", {
    Init => "init",
    Add => "add",
    Modify => "modify",
    Rename => "rename",
    Move => "move",
    Copy => "copy",
    Delete => "delete",
});

impl ChangeKind {
    pub fn requires_target(&self) -> bool {
        matches!(self, ChangeKind::Rename | ChangeKind::Move | ChangeKind::Copy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    #[default]
    Api,
    Cli,
    Gui,
    System,
}

keyword_enum!(ChangeMode, "mode", {
    Api => "api",
    Cli => "cli",
    Gui => "gui",
    System => "system",
});

/// One structural change to project data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataChange {
    pub timestamp: String,
    pub project: String,
    pub user: String,
    pub change: ChangeKind,
    pub pathname: String,
    pub target: Option<String>,
    pub mode: ChangeMode,
}

// ── Frozen files ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrozenFile {
    pub id: i64,
    /// Pid of the action that froze the file.
    pub action: String,
    pub project: String,
    /// Pathname relative to the project's frozen folder, e.g. `/dir/file.dat`.
    pub pathname: String,
    pub node: i64,
    pub size: i64,
    pub checksum: Option<String>,
    pub modified: Option<String>,
    pub frozen: Option<String>,
    pub metadata: Option<String>,
    pub replicated: Option<String>,
    pub removed: Option<String>,
    pub cleared: Option<String>,
    pub pid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFrozenFile {
    pub action: String,
    pub project: String,
    pub pathname: String,
    pub node: i64,
    pub size: i64,
    pub checksum: Option<String>,
    pub modified: Option<String>,
    pub frozen: Option<String>,
    pub pid: Option<String>,
}

// ── Storage cache ────────────────────────────────────────────

/// A row of the file-sharing server's storage-cache index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub fileid: i64,
    pub storage: i64,
    /// Path within the storage, e.g. `files/2017_1234+/dir/file.dat`.
    pub path: String,
    pub name: String,
    pub mimetype: String,
    pub size: i64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    pub etag: Option<String>,
}

impl CacheEntry {
    pub fn is_folder(&self) -> bool {
        self.mimetype == FOLDER_MIMETYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(kind: ActionKind) -> Action {
        Action {
            id: 1,
            pid: "5a1c".to_string(),
            action: kind,
            project: "2017_1234".to_string(),
            user: "alice".to_string(),
            node: 42,
            pathname: "/2017_1234+/data".to_string(),
            initiated: "2023-05-01T10:00:00Z".to_string(),
            storage: None,
            pids: None,
            checksums: None,
            metadata: None,
            replication: None,
            completed: None,
            failed: None,
            cleared: None,
            error: None,
            retry: None,
            retrying: None,
        }
    }

    #[test]
    fn test_status_progression() {
        let mut a = action(ActionKind::Unfreeze);
        assert_eq!(a.status(), ActionStatus::Initiating);
        assert!(a.matches(ActionStatus::Initiating));
        assert!(a.matches(ActionStatus::Pending));
        assert!(a.matches(ActionStatus::Incomplete));

        a.storage = Some("2023-05-01T10:01:00Z".to_string());
        assert_eq!(a.status(), ActionStatus::Pending);
        assert!(!a.matches(ActionStatus::Initiating));

        a.failed = Some("2023-05-01T10:02:00Z".to_string());
        assert_eq!(a.status(), ActionStatus::Failed);
        assert!(a.matches(ActionStatus::Incomplete));
        assert!(!a.matches(ActionStatus::Pending));

        a.cleared = Some("2023-05-01T10:03:00Z".to_string());
        assert_eq!(a.status(), ActionStatus::Cleared);
        for status in ActionStatus::ALL {
            assert_eq!(a.matches(*status), *status == ActionStatus::Cleared);
        }
    }

    #[test]
    fn test_freeze_requires_all_milestones() {
        let mut a = action(ActionKind::Freeze);
        a.storage = Some("2023-05-01T10:01:00Z".to_string());
        a.metadata = Some("2023-05-01T10:02:00Z".to_string());
        assert_eq!(
            a.missing_milestones(),
            vec![Milestone::Checksums, Milestone::Pids, Milestone::Replication]
        );

        let mut b = action(ActionKind::Delete);
        b.storage = a.storage.clone();
        b.metadata = a.metadata.clone();
        assert!(b.missing_milestones().is_empty());
    }

    #[test]
    fn test_keyword_parsing() {
        assert_eq!("freeze".parse::<ActionKind>().unwrap(), ActionKind::Freeze);
        assert_eq!("incomplete".parse::<ActionStatus>().unwrap(), ActionStatus::Incomplete);
        assert_eq!("system".parse::<ChangeMode>().unwrap(), ChangeMode::System);
        assert!(matches!(
            "archived".parse::<ActionStatus>(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!("Freeze".parse::<ActionKind>(), Err(Error::InvalidArgument(_))));
        assert_eq!(ChangeKind::ALL.len(), 7);
    }

    #[test]
    fn test_target_requirements() {
        let requiring: Vec<_> = ChangeKind::ALL
            .iter()
            .filter(|c| c.requires_target())
            .map(|c| c.as_str())
            .collect();
        assert_eq!(requiring, vec!["rename", "move", "copy"]);
    }
}
