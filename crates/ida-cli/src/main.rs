mod commands;
mod logging;

use std::io::{self, Write};
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{ActionCommands, ActionScope, ChangeCommands, Cli, Commands, FileCommands, HistoryArgs};
use dotenv::dotenv;
use ida_core::audit::{ChangeRequest, HistoryQuery};
use ida_core::storage::models::{Action, ActionStatus, DataChange, NewAction};
use ida_core::storage::Database;
use ida_core::{
    ActionStore, AppConfig, ChangeAuditLog, Error as CoreError, FileDetailsResolver,
    ProjectLockManager, SystemClock,
};
use serde::Serialize;
use tracing::{error, info, warn};

/// Caller-facing refusals: conflicts, invalid arguments and missing records.
const EXIT_REFUSED: i32 = 2;
/// Internal failures: I/O, database and configuration errors.
const EXIT_FAILURE: i32 = 1;

fn main() {
    dotenv().ok();

    let guard = logging::init_logger();

    let config = match ida_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            drop(guard);
            process::exit(EXIT_FAILURE);
        }
    };

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Err(err) = run(command, &config, args.json) {
        let code = report(&err);
        drop(guard);
        process::exit(code);
    }
}

/// Exit code for a failed command. Refusals are the caller's to fix;
/// anything else is an internal failure.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CoreError>() {
        Some(core) if core.is_user_facing() => EXIT_REFUSED,
        _ => EXIT_FAILURE,
    }
}

/// Tell the user what went wrong and return the exit code. Internal
/// failures are logged in full and reported generically.
fn report(err: &anyhow::Error) -> i32 {
    let code = exit_code(err);
    if code == EXIT_REFUSED {
        warn!("Refused: {}", err);
        eprintln!("{} {}", "Operation not allowed right now:".yellow(), err);
    } else {
        error!("Command failed: {:#}", err);
        eprintln!("{} see the log for details", "Internal error;".red());
    }
    code
}

fn run(command: Commands, config: &AppConfig, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Lock { project } => {
            if ProjectLockManager::new(config).lock(&project)? {
                println!("{} {}", "Locked".green(), project);
            } else {
                return Err(CoreError::Conflict(format!("{} is already locked", project)).into());
            }
        }
        Commands::Unlock { project } => {
            ProjectLockManager::new(config).unlock(&project)?;
            println!("{} {}", "Unlocked".green(), project);
        }
        Commands::Locked { project } => {
            let locked = ProjectLockManager::new(config).is_locked(&project);
            emit(json, &locked, || {
                if locked {
                    println!("{} is {}", project, "locked".red());
                } else {
                    println!("{} is {}", project, "unlocked".green());
                }
            })?;
        }
        Commands::Offline => {
            ProjectLockManager::new(config).set_offline()?;
            println!("Service is {}", "offline".red());
        }
        Commands::Online => {
            ProjectLockManager::new(config).set_online()?;
            println!("Service is {}", "online".green());
        }
        Commands::Actions(cmd) => run_actions(cmd, config, json)?,
        Commands::Changes(cmd) => run_changes(cmd, config, json)?,
        Commands::Files(cmd) => run_files(cmd, config, json)?,
        Commands::PrintConfig => {
            println!("Configuration: {:?}", config);
        }
        Commands::TruncateDb => {
            if !confirm("Are you SURE you want to delete every action, change and frozen-file record?")? {
                return Ok(());
            }
            open_database(config)?.truncate_all()?;
            println!("All tracking tables truncated");
        }
    }
    Ok(())
}

fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    Database::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path))
}

fn scope_filter(scope: &ActionScope) -> anyhow::Result<(Option<ActionStatus>, Option<&[String]>)> {
    let status = scope
        .status
        .as_deref()
        .map(str::parse::<ActionStatus>)
        .transpose()?;
    let projects = if scope.projects.is_empty() {
        None
    } else {
        Some(scope.projects.as_slice())
    };
    Ok((status, projects))
}

fn run_actions(cmd: ActionCommands, config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let clock = SystemClock;
    let store = ActionStore::new(&db, &clock);

    match cmd {
        ActionCommands::List(scope) => {
            let (status, projects) = scope_filter(&scope)?;
            let actions = store.find_actions(status, projects)?;
            emit(json, &actions, || actions.iter().for_each(print_action))?;
        }
        ActionCommands::Count(scope) => {
            let (status, projects) = scope_filter(&scope)?;
            let count = store.count_actions(status, projects)?;
            emit(json, &count, || println!("{}", count))?;
        }
        ActionCommands::Show { pid } => match store.find_action(&pid, None)? {
            Some(action) => emit(json, &action, || print_action(&action))?,
            None => return Err(CoreError::NotFound(format!("no action with pid '{}'", pid)).into()),
        },
        ActionCommands::Create {
            pid,
            action,
            project,
            user,
            node,
            pathname,
            initiated,
        } => {
            let created = store.create_action(NewAction {
                pid,
                action: action.parse()?,
                project,
                user,
                node,
                pathname,
                initiated,
            })?;
            emit(json, &created, || print_action(&created))?;
        }
        ActionCommands::Milestone {
            pid,
            milestone,
            timestamp,
        } => {
            let action = store.record_milestone(&pid, milestone.parse()?, timestamp.as_deref())?;
            emit(json, &action, || print_action(&action))?;
        }
        ActionCommands::Fail {
            pid,
            error,
            timestamp,
        } => {
            let action = store.fail_action(&pid, &error, timestamp.as_deref())?;
            emit(json, &action, || print_action(&action))?;
        }
        ActionCommands::Retry {
            pid,
            retrying,
            timestamp,
        } => {
            let action = store.record_retry(&pid, &retrying, timestamp.as_deref())?;
            emit(json, &action, || print_action(&action))?;
        }
        ActionCommands::Clear { pid } => {
            let action = store.clear_action(&pid)?;
            emit(json, &action, || print_action(&action))?;
        }
        ActionCommands::ClearAll(scope) => {
            let (status, projects) = scope_filter(&scope)?;
            let cleared = store.clear_actions(status.unwrap_or(ActionStatus::Failed), projects)?;
            emit(json, &cleared, || println!("{} actions cleared", cleared.len()))?;
        }
        ActionCommands::Delete { pid } => {
            if !store.delete_action(&pid)? {
                return Err(CoreError::NotFound(format!("no action with pid '{}'", pid)).into());
            }
            println!("Deleted action {}", pid);
        }
        ActionCommands::Purge { project } => {
            if !confirm(&format!("Delete ALL action records for {}?", project))? {
                return Ok(());
            }
            let deleted = store.delete_all_actions(Some(&project))?;
            println!("{} actions deleted", deleted);
        }
    }
    Ok(())
}

fn history_query(args: &HistoryArgs, limit: Option<u32>) -> anyhow::Result<HistoryQuery<'_>> {
    Ok(HistoryQuery {
        user: args.user.as_deref(),
        change: args.change.as_deref().map(str::parse).transpose()?,
        mode: args.mode.as_deref().map(str::parse).transpose()?,
        limit,
    })
}

fn run_changes(cmd: ChangeCommands, config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let clock = SystemClock;
    let log = ChangeAuditLog::new(&db, &clock, config);

    match cmd {
        ChangeCommands::Record {
            project,
            user,
            change,
            pathname,
            target,
            timestamp,
            mode,
        } => {
            let recorded = log.record(ChangeRequest {
                project: &project,
                user: &user,
                change: &change,
                pathname: &pathname,
                target: target.as_deref(),
                timestamp: timestamp.as_deref(),
                mode: mode.as_deref(),
            })?;
            emit(json, &recorded, || print_change(&recorded))?;
        }
        ChangeCommands::Last(args) => {
            let last = log.last_for(&args.project, &history_query(&args, None)?)?;
            print_optional_change(json, last)?;
        }
        ChangeCommands::History { query, limit } => {
            let changes = log.history(&query.project, &history_query(&query, limit)?)?;
            emit(json, &changes, || changes.iter().for_each(print_change))?;
        }
        ChangeCommands::Init { project } => {
            print_optional_change(json, log.get_initialization_details(&project)?)?;
        }
        ChangeCommands::LastAdd { project, pathname } => {
            print_optional_change(json, log.get_last_add_change_details(&project, &pathname)?)?;
        }
        ChangeCommands::Purge { project } => {
            if !confirm(&format!("Irreversibly delete the change log of {}?", project))? {
                return Ok(());
            }
            let deleted = log.purge(&project)?;
            println!("{} changes deleted", deleted);
        }
    }
    Ok(())
}

fn run_files(cmd: FileCommands, config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let resolver = FileDetailsResolver::new(&db, config);

    match cmd {
        FileCommands::Details {
            project,
            pathname,
            limit,
        } => {
            let details = resolver.get_file_details(&project, &pathname, limit)?;
            emit(json, &details, || {
                for file in &details.files {
                    println!("{:>12}  {}  {}", file.size, file.modified, file.pathname);
                }
                for skipped in &details.skipped {
                    println!("{} {}: {}", "skipped".yellow(), skipped.path, skipped.reason);
                }
                let truncated = details.count > limit as usize;
                println!(
                    "{} files{}",
                    details.count.to_string().cyan(),
                    if truncated { " (truncated)" } else { "" }
                );
            })?;
        }
        FileCommands::Frozen { project, scope } => {
            let files = resolver.get_ida_frozen_file_details(&project, &scope)?;
            emit(json, &files, || {
                for (pathname, file) in &files {
                    println!(
                        "{}  {}  {}",
                        pathname,
                        file.size,
                        file.frozen.as_deref().unwrap_or("-")
                    );
                }
            })?;
        }
    }
    Ok(())
}

/// Print `value` as JSON, or run the human-readable printer.
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

fn print_action(action: &Action) {
    let status = match action.status() {
        ActionStatus::Completed => action.status().to_string().green(),
        ActionStatus::Failed => action.status().to_string().red(),
        ActionStatus::Cleared => action.status().to_string().dimmed(),
        _ => action.status().to_string().yellow(),
    };
    println!(
        "{}  {:<9} {:<10} {}  {}  {}",
        action.pid.bold(),
        action.action,
        status,
        action.project,
        action.initiated,
        action.pathname
    );
    if let Some(err) = &action.error {
        println!("    {}", err.red());
    }
}

fn print_change(change: &DataChange) {
    let target = change
        .target
        .as_deref()
        .map(|t| format!(" -> {}", t))
        .unwrap_or_default();
    println!(
        "{}  {:<7} {}{}  {} ({})",
        change.timestamp,
        change.change.to_string().cyan(),
        change.pathname,
        target,
        change.user,
        change.mode
    );
}

fn print_optional_change(json: bool, change: Option<DataChange>) -> anyhow::Result<()> {
    match change {
        Some(change) => emit(json, &change, || print_change(&change)),
        None => emit(json, &Option::<DataChange>::None, || println!("No matching change")),
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let confirmed = prompt_confirm(prompt, Some(false))?;
    if !confirmed {
        info!("Aborted");
    }
    Ok(confirmed)
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusals_exit_with_refused_code() {
        for err in [
            CoreError::Conflict("action 'p1' is pending".into()),
            CoreError::InvalidArgument("limit must be positive".into()),
            CoreError::NotFound("no action with pid 'p1'".into()),
        ] {
            assert_eq!(exit_code(&anyhow::Error::from(err)), EXIT_REFUSED);
        }
    }

    #[test]
    fn test_refusals_survive_context() {
        let err = anyhow::Error::from(CoreError::Conflict("locked".into())).context("lock 2017_1234");
        assert_eq!(exit_code(&err), EXIT_REFUSED);
    }

    #[test]
    fn test_internal_failures_exit_with_failure_code() {
        let io = CoreError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(exit_code(&anyhow::Error::from(io)), EXIT_FAILURE);

        let db = CoreError::Inconsistent("files/x".into());
        assert_eq!(exit_code(&anyhow::Error::from(db)), EXIT_FAILURE);

        assert_eq!(exit_code(&anyhow::anyhow!("opening database ida.db")), EXIT_FAILURE);
    }
}
