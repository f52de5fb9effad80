use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ida-tracker")]
#[command(about = "Action, change and lock bookkeeping for IDA projects", long_about = None)]
pub struct Cli {
    /// Print records as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Take the lock of a project, or the service-wide lock with "all"
    Lock { project: String },
    /// Release the lock of a project, or the service-wide lock with "all"
    Unlock { project: String },
    /// Report whether a project is locked
    Locked { project: String },
    /// Take the service offline
    Offline,
    /// Bring the service back online
    Online,
    /// Query and update action records
    #[command(subcommand)]
    Actions(ActionCommands),
    /// Record and query the data change log
    #[command(subcommand)]
    Changes(ChangeCommands),
    /// Resolve file details from the storage cache
    #[command(subcommand)]
    Files(FileCommands),
    /// Print configuration values
    PrintConfig,
    /// Delete every action, change and frozen-file record
    TruncateDb,
}

#[derive(Debug, Args)]
pub struct ActionScope {
    /// Action status: pending, completed, failed, cleared, incomplete or initiating
    #[arg(long)]
    pub status: Option<String>,
    /// Restrict to these projects; repeatable
    #[arg(long = "project")]
    pub projects: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum ActionCommands {
    /// List actions, newest first
    List(ActionScope),
    /// Count actions
    Count(ActionScope),
    /// Show one action
    Show { pid: String },
    /// Register a new action
    Create {
        pid: String,
        /// freeze, unfreeze, delete, suspend or repair
        action: String,
        project: String,
        #[arg(long, default_value = "service")]
        user: String,
        #[arg(long, default_value_t = 0)]
        node: i64,
        #[arg(long, default_value = "/")]
        pathname: String,
        #[arg(long)]
        initiated: Option<String>,
    },
    /// Record a processing milestone
    Milestone {
        pid: String,
        /// storage, pids, checksums, metadata, replication or completed
        milestone: String,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Mark a pending action failed
    Fail {
        pid: String,
        error: String,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Record that a failed action is being retried by another
    Retry {
        pid: String,
        retrying: String,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Clear a failed action
    Clear { pid: String },
    /// Clear every failed action matching the scope
    ClearAll(ActionScope),
    /// Delete an action record
    Delete { pid: String },
    /// Delete all action records of a project, or of every project with "all"
    Purge { project: String },
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub project: String,
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub change: Option<String>,
    #[arg(long)]
    pub mode: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ChangeCommands {
    /// Record a change
    Record {
        project: String,
        user: String,
        /// init, add, rename, delete, modify, move, copy
        change: String,
        pathname: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        timestamp: Option<String>,
        /// system, api, cli or gui
        #[arg(long)]
        mode: Option<String>,
    },
    /// Most recent matching change
    Last(HistoryArgs),
    /// Matching changes, newest first
    History {
        #[command(flatten)]
        query: HistoryArgs,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// The project's recorded initialization
    Init { project: String },
    /// Latest add of a pathname relative to the staging folder
    LastAdd { project: String, pathname: String },
    /// Delete the change log of a project, or of every project with "all"
    Purge { project: String },
}

#[derive(Debug, Subcommand)]
pub enum FileCommands {
    /// Files at or under a storage path such as files/2017_1234+/dir
    Details {
        project: String,
        pathname: String,
        #[arg(long, default_value_t = 5000)]
        limit: u32,
    },
    /// Active frozen files under a scope relative to the frozen folder
    Frozen {
        project: String,
        #[arg(default_value = "/")]
        scope: String,
    },
}
