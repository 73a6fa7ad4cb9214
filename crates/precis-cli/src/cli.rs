use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use precis_core::conflict::ConflictChoice;

#[derive(Parser)]
#[command(name = "precis")]
#[command(about = "Sync Précis settings, history and library across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with the browser and run a first sync
    Login,
    /// Sign out and forget stored credentials
    Logout {
        /// Also revoke the grant at the provider
        #[arg(long)]
        revoke: bool,
    },
    /// Run a sync cycle now
    Sync,
    /// Turn background sync on or off
    AutoSync {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Show or change which datasets are synced
    Prefs {
        /// Sync settings
        #[arg(long, value_name = "BOOL")]
        settings: Option<bool>,
        /// Sync history
        #[arg(long, value_name = "BOOL")]
        history: Option<bool>,
        /// Sync library
        #[arg(long, value_name = "BOOL")]
        library: Option<bool>,
    },
    /// Resolve a settings conflict found during sync
    Resolve {
        #[arg(value_enum)]
        choice: ResolveChoice,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep running and sync on the background schedule
    Daemon,
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
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub const fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveChoice {
    /// Keep this device's settings
    Local,
    /// Use the settings stored in the cloud
    Cloud,
    /// Decide later and pause auto-sync
    Cancel,
}

impl From<ResolveChoice> for ConflictChoice {
    fn from(choice: ResolveChoice) -> Self {
        match choice {
            ResolveChoice::Local => Self::Local,
            ResolveChoice::Cloud => Self::Cloud,
            ResolveChoice::Cancel => Self::Cancel,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
            CompletionShell::PowerShell => Self::PowerShell,
        }
    }
}
