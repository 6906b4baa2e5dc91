use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "stowline")]
#[command(about = "Inspect and drive the Stowline offline sync engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to engine config JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// CLI profile name holding backend settings
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize outbox, conflicts, media, and context
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and repair the operation outbox
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Drain pending operations to the backend
    Sync {
        /// Only drain this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare local entities with the backend and record conflicts
    Detect {
        /// Account scope (defaults to saved context)
        #[arg(long, value_name = "ID")]
        account: Option<String>,
        /// Project scope (defaults to saved context)
        #[arg(long, value_name = "ID")]
        project: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List and resolve detected conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Media storage usage
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },
    /// Expiring cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Show or set the saved account/user/project context
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Drain on reconnect and on a fixed interval until interrupted
    Watch {
        /// Seconds between connectivity checks and drains
        #[arg(long, default_value = "30")]
        interval_secs: u64,
        /// Only drain this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
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

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations in drain order
    List {
        /// Only show this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
        /// Only show stalled operations
        #[arg(long)]
        stalled: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear an operation's retry state
    Retry {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Drop an operation without applying it
    Discard {
        /// Operation ID or unique ID prefix
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ChoiceArg {
    /// Apply the automatic policy
    Auto,
    Local,
    Server,
    /// Merge, preferring the side given by --prefer
    Merge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SideArg {
    Local,
    Server,
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts
    List {
        /// Only show this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict
    Resolve {
        /// Conflict ID or unique ID prefix
        id: String,
        #[arg(long, value_enum, default_value_t = ChoiceArg::Auto)]
        choice: ChoiceArg,
        /// Base side for --choice merge
        #[arg(long, value_enum, default_value_t = SideArg::Server)]
        prefer: SideArg,
        /// Fields taken from the other side for --choice merge
        #[arg(long = "take", value_name = "FIELD")]
        take_other: Vec<String>,
    },
    /// Resolve every conflict the automatic policy can decide
    ResolveAuto {
        /// Only this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
    },
    /// Delete resolved conflict records
    Purge {
        /// Only this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MediaCommands {
    /// Show bytes used against the quota
    Usage {
        /// Only count this account
        #[arg(long, value_name = "ID")]
        account: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Delete expired cache entries
    Purge,
}

#[derive(Subcommand)]
pub enum ContextCommands {
    /// Print the saved context
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save the active context
    Set {
        #[arg(long, value_name = "ID")]
        account: Option<String>,
        #[arg(long, value_name = "ID")]
        user: Option<String>,
        #[arg(long, value_name = "ID")]
        project: Option<String>,
    },
    /// Forget the saved context
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Backend base URL
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
        /// Backend API key
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
        /// Optional user access token
        #[arg(long, value_name = "TOKEN")]
        access_token: Option<String>,
        /// Request timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile and engine config
    Show,
}
