use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "bandsync")]
#[command(about = "Offline-first sync client for band scheduling data")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the client config file
    #[arg(long, global = true, value_name = "PATH", env = "BANDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the local database file
    #[arg(long, global = true, value_name = "PATH", env = "BANDSYNC_DB_PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a local mutation for the next sync
    Enqueue(EnqueueArgs),
    /// Push queued operations and pull remote changes
    Sync {
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue, conflict and cursor state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued operations, oldest first
    Pending {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle open version conflicts automatically
    Reconcile {
        /// Resolution strategy
        #[arg(long, value_enum, default_value_t = StrategyArg::Lww)]
        strategy: StrategyArg,
    },
    /// Settle one conflict by hand
    Resolve {
        /// Local conflict id (see `bandsync conflicts`)
        id: i64,
        /// Keep the local change and re-push it
        #[arg(long, conflicts_with = "keep_server", required_unless_present = "keep_server")]
        keep_local: bool,
        /// Drop the local change and keep the server record
        #[arg(long)]
        keep_server: bool,
    },
    /// List cached entities of one type
    Cache {
        /// Entity type (event, booking, member, availability, setlist, song, venue, task)
        entity_type: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a schedule snapshot for booking conflicts
    Detect {
        /// Snapshot JSON file, or `-` for stdin
        snapshot: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the client config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct EnqueueArgs {
    /// Entity type (event, booking, member, availability, setlist, song, venue, task)
    pub entity: String,
    /// Operation (create, update, delete, reorder-batch)
    pub operation: String,
    /// Id of the entity being changed
    pub entity_id: String,
    /// JSON object payload for create/update
    #[arg(long, value_name = "JSON")]
    pub payload: Option<String>,
    /// Server version the change was made against
    #[arg(long, value_name = "VERSION")]
    pub base_version: Option<u64>,
    /// Reorder step as `<entity-id>:<position>`; repeat for each item
    #[arg(long = "step", value_name = "ID:POS")]
    pub steps: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    /// Last write wins by `updatedAt`
    Lww,
    /// Leave everything for `bandsync resolve`
    Manual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a new config file
    Init {
        /// Sync API base URL
        #[arg(long, value_name = "URL")]
        api_url: String,
        /// Tenant (band) id to sync
        #[arg(long, value_name = "ID")]
        tenant: String,
        /// Device id (generated when omitted)
        #[arg(long, value_name = "ID")]
        device_id: Option<String>,
        /// Bearer token for the sync API
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config with secrets redacted
    Show,
}
