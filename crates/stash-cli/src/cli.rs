use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "stash")]
#[command(about = "Offline-first notes organized in tabs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Quick capture into the inbox: stash "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new message
    #[command(alias = "new")]
    Add {
        /// Message text (read from stdin when omitted)
        content: Vec<String>,
        /// Target tab id or unique fragment (inbox when omitted)
        #[arg(long, value_name = "TAB")]
        tab: Option<String>,
    },
    /// List messages of a tab or the inbox
    List {
        /// Tab id or unique fragment (inbox when omitted)
        #[arg(long, value_name = "TAB")]
        tab: Option<String>,
        /// Number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the text of a message
    Edit {
        /// Message id or unique fragment
        id: String,
        /// New text (read from stdin when omitted)
        content: Vec<String>,
    },
    /// Move a message to another tab or the inbox
    Move {
        /// Message id or unique fragment
        id: String,
        /// Target tab id or unique fragment (inbox when omitted)
        #[arg(long, value_name = "TAB")]
        tab: Option<String>,
        /// Position inside the target container
        #[arg(long)]
        position: Option<i64>,
    },
    /// Delete a message
    Delete {
        /// Message id or unique fragment
        id: String,
    },
    /// Manage tabs
    Tab {
        #[command(subcommand)]
        command: TabCommands,
    },
    /// Run one sync cycle against the backend
    Sync,
    /// Show local sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stay connected: realtime updates plus periodic sync until interrupted
    Watch,
    /// Sign in, sign out and inspect the account
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Configure the sync backend
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

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum TabCommands {
    /// List tabs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a tab
    Add {
        /// Tab title
        title: Vec<String>,
    },
    /// Rename a tab
    Rename {
        /// Tab id or unique fragment
        id: String,
        /// New title
        title: Vec<String>,
    },
    /// Change the position of a tab
    Reorder {
        /// Tab id or unique fragment
        id: String,
        /// New position
        position: i64,
    },
    /// Delete a tab and its messages
    Delete {
        /// Tab id or unique fragment
        id: String,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Create an account and store its credentials in the keychain
    Register {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Sign in and store credentials in the keychain
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show whether this device is signed in
    Status,
    /// Sign out and remove every local account trace
    Logout,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update the config file
    Init {
        /// Backend API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Realtime endpoint (derived from the API URL when omitted)
        #[arg(long, value_name = "URL")]
        realtime_url: Option<String>,
        /// Seconds between background syncs in `stash watch`
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
    },
    /// Print the effective configuration
    Show,
}
