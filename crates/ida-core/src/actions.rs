//! Action records and their milestone-driven state machine.
//!
//! An action's status is never stored: it is derived from which milestone
//! timestamps are set. Workers advance milestones through this store; the
//! only reversal is clearing a failed action.

use rusqlite::{Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::clock::{format_timestamp, normalize_timestamp, parse_timestamp, Clock};
use crate::error::{Error, Result};
use crate::storage::models::{Action, ActionKind, ActionStatus, Milestone, NewAction};
use crate::storage::{ActionFilter, Database};

pub struct ActionStore<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
}

impl<'a> ActionStore<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock) -> Self {
        Self { db, clock }
    }

    fn filter(status: Option<ActionStatus>, projects: Option<&[String]>) -> ActionFilter {
        ActionFilter {
            status,
            projects: projects.map(|p| p.to_vec()),
        }
    }

    /// Resolve an optional caller timestamp, defaulting to now.
    fn timestamp(&self, supplied: Option<&str>) -> Result<String> {
        match supplied {
            Some(ts) => normalize_timestamp(ts),
            None => Ok(format_timestamp(self.clock.now())),
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn has_actions(
        &self,
        status: Option<ActionStatus>,
        projects: Option<&[String]>,
    ) -> Result<bool> {
        Ok(self.count_actions(status, projects)? > 0)
    }

    pub fn find_actions(
        &self,
        status: Option<ActionStatus>,
        projects: Option<&[String]>,
    ) -> Result<Vec<Action>> {
        Ok(self.db.select_actions(&Self::filter(status, projects))?)
    }

    pub fn count_actions(
        &self,
        status: Option<ActionStatus>,
        projects: Option<&[String]>,
    ) -> Result<i64> {
        Ok(self.db.count_actions(&Self::filter(status, projects))?)
    }

    /// True if any of the projects has a pending suspend action.
    pub fn is_suspended(&self, projects: Option<&[String]>) -> Result<bool> {
        Ok(self
            .db
            .has_pending_action_of_kind(ActionKind::Suspend, projects)?)
    }

    pub fn find_action(&self, pid: &str, projects: Option<&[String]>) -> Result<Option<Action>> {
        Ok(self.db.select_action(pid, projects)?)
    }

    fn require_action(&self, pid: &str) -> Result<Action> {
        self.find_action(pid, None)?
            .ok_or_else(|| Error::NotFound(format!("no action with pid '{}'", pid)))
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub fn create_action(&self, new: NewAction) -> Result<Action> {
        if new.pid.trim().is_empty() {
            return Err(Error::InvalidArgument("action pid must not be empty".into()));
        }
        if new.project.trim().is_empty() {
            return Err(Error::InvalidArgument("action project must not be empty".into()));
        }

        let initiated = self.timestamp(new.initiated.as_deref())?;
        match self.db.insert_action(&new, &initiated) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(Error::Conflict(format!("action '{}' already exists", new.pid)));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            "Initiated {} action {} on {} in project {}",
            new.action, new.pid, new.pathname, new.project
        );
        self.require_action(&new.pid)
    }

    /// Record that a workflow stage has finished.
    ///
    /// Each milestone is set at most once and never before `initiated`.
    /// `Completed` additionally requires every milestone the action kind needs.
    pub fn record_milestone(
        &self,
        pid: &str,
        milestone: Milestone,
        timestamp: Option<&str>,
    ) -> Result<Action> {
        let action = self.require_action(pid)?;
        match action.status() {
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cleared => {
                return Err(Error::Conflict(format!(
                    "action '{}' is {} and can no longer advance",
                    pid,
                    action.status()
                )));
            }
            _ => {}
        }
        if let Some(existing) = action.milestone(milestone) {
            return Err(Error::Conflict(format!(
                "milestone {} of action '{}' already set at {}",
                milestone, pid, existing
            )));
        }
        if milestone == Milestone::Completed {
            let missing = action.missing_milestones();
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
                return Err(Error::Conflict(format!(
                    "{} action '{}' cannot complete before: {}",
                    action.action,
                    pid,
                    names.join(", ")
                )));
            }
        }

        let ts = self.timestamp(timestamp)?;
        self.ensure_not_before_initiated(&action, &ts)?;

        if self.db.set_action_milestone(pid, milestone, &ts)? == 0 {
            // Another writer got there between our read and the update.
            return Err(Error::Conflict(format!(
                "milestone {} of action '{}' was set concurrently",
                milestone, pid
            )));
        }
        debug!("Action {} reached {} at {}", pid, milestone, ts);
        self.require_action(pid)
    }

    /// Mark a pending action as failed with an error message.
    pub fn fail_action(&self, pid: &str, error: &str, timestamp: Option<&str>) -> Result<Action> {
        let action = self.require_action(pid)?;
        if !action.matches(ActionStatus::Pending) {
            return Err(Error::Conflict(format!(
                "action '{}' is {} and cannot fail",
                pid,
                action.status()
            )));
        }
        let ts = self.timestamp(timestamp)?;
        self.ensure_not_before_initiated(&action, &ts)?;
        if self.db.set_action_failed(pid, &ts, error)? == 0 {
            return Err(Error::Conflict(format!(
                "action '{}' changed state concurrently",
                pid
            )));
        }
        info!("Action {} failed: {}", pid, error);
        self.require_action(pid)
    }

    /// Note that a failed action is being retried by another action.
    pub fn record_retry(
        &self,
        pid: &str,
        retrying_pid: &str,
        timestamp: Option<&str>,
    ) -> Result<Action> {
        let action = self.require_action(pid)?;
        if action.status() != ActionStatus::Failed {
            return Err(Error::Conflict(format!(
                "only failed actions can be retried; action '{}' is {}",
                pid,
                action.status()
            )));
        }
        let ts = self.timestamp(timestamp)?;
        self.db.set_action_retry(pid, &ts, retrying_pid)?;
        self.require_action(pid)
    }

    fn ensure_not_before_initiated(&self, action: &Action, timestamp: &str) -> Result<()> {
        let initiated = parse_timestamp(&action.initiated)?;
        if parse_timestamp(timestamp)? < initiated {
            return Err(Error::InvalidArgument(format!(
                "timestamp {} precedes initiation of action '{}' at {}",
                timestamp, action.pid, action.initiated
            )));
        }
        Ok(())
    }

    // ── Clearing ─────────────────────────────────────────────────

    /// Clear a failed action. Any other state is a conflict and is left untouched.
    pub fn clear_action(&self, pid: &str) -> Result<Action> {
        let action = self.require_action(pid)?;
        if action.status() != ActionStatus::Failed {
            return Err(Error::Conflict(format!(
                "action '{}' is {}; only failed actions can be cleared",
                pid,
                action.status()
            )));
        }
        let ts = self.timestamp(None)?;
        if self.db.set_action_cleared(pid, &ts)? == 0 {
            return Err(Error::Conflict(format!(
                "action '{}' changed state concurrently",
                pid
            )));
        }
        info!("Cleared failed action {} of project {}", pid, action.project);
        self.require_action(pid)
    }

    /// Clear every action matching the filter. All matches must be failed;
    /// otherwise nothing is cleared.
    pub fn clear_actions(
        &self,
        status: ActionStatus,
        projects: Option<&[String]>,
    ) -> Result<Vec<Action>> {
        let ts = self.timestamp(None)?;
        // Hold the write lock from the selection on; dropping `tx` rolls back.
        let tx = Transaction::new_unchecked(self.db.connection(), TransactionBehavior::Immediate)?;

        let matching = self.find_actions(Some(status), projects)?;
        if let Some(blocked) = matching
            .iter()
            .find(|a| a.status() != ActionStatus::Failed)
        {
            return Err(Error::Conflict(format!(
                "action '{}' is {}; only failed actions can be cleared",
                blocked.pid,
                blocked.status()
            )));
        }
        for action in &matching {
            if self.db.set_action_cleared(&action.pid, &ts)? == 0 {
                return Err(Error::Conflict(format!(
                    "action '{}' changed state concurrently",
                    action.pid
                )));
            }
        }
        let cleared = matching
            .iter()
            .map(|a| self.require_action(&a.pid))
            .collect::<Result<Vec<_>>>()?;

        tx.commit()?;
        info!("Cleared {} failed actions", cleared.len());
        Ok(cleared)
    }

    // ── Administrative ───────────────────────────────────────────

    /// Hard delete, bypassing the state machine.
    pub fn delete_action(&self, pid: &str) -> Result<bool> {
        let deleted = self.db.delete_action(pid)? > 0;
        if deleted {
            info!("Deleted action {}", pid);
        }
        Ok(deleted)
    }

    /// Delete all actions of a project; `None` or `"all"` deletes every action.
    pub fn delete_all_actions(&self, project: Option<&str>) -> Result<usize> {
        let project = project.filter(|p| *p != "all");
        let deleted = self.db.delete_actions(project)?;
        info!("Deleted {} actions for {}", deleted, project.unwrap_or("all projects"));
        Ok(deleted)
    }
}
