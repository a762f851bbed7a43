use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Scheduled, sandboxed collection programs with dedup, retries and notifications")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a subscription that sources collect into
    Subscribe {
        /// Display name
        #[arg(long)]
        name: String,

        /// Free-text criteria used to flag matching items
        #[arg(long, default_value = "")]
        criteria: String,
    },

    /// Register a collection program as a scheduled source
    Add {
        /// Owning subscription id
        #[arg(long)]
        subscription: i64,

        /// Cron expression (5 fields, or 6/7 with seconds)
        #[arg(long)]
        schedule: String,

        /// Path to the program file
        #[arg(long)]
        file: String,

        /// Source name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Store the source without scheduling it
        #[arg(long)]
        disabled: bool,
    },

    /// List all sources with their run state
    List,

    /// Remove a source and its items
    Remove {
        /// Source id
        id: i64,
    },

    /// Enable a source
    Enable {
        /// Source id
        id: i64,
    },

    /// Disable a source
    Disable {
        /// Source id
        id: i64,
    },

    /// Collect from a source now
    Run {
        /// Source id
        id: i64,
    },

    /// Show items collected by a source, newest first
    Items {
        /// Source id
        id: i64,

        /// Maximum number of items to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show recent notifications
    Notifications {
        /// Maximum number of notifications to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Transform, screen and compile a program without running it
    Check {
        /// Path to the program file
        file: String,
    },

    /// Run a program in the sandbox and print its items (nothing is stored)
    Exec {
        /// Path to the program file
        file: String,
    },

    /// Schedule every enabled source and run until Ctrl-C
    Daemon,
}
