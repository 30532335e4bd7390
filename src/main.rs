// Syncpoint
// Command line front end for pushing, restoring, cloning and merging working copies

// IMPORTS ------------------>>

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use syncpoint::core::TracingReporter;
use syncpoint::repository::{manual_sync, merge, LocalRepository};
use syncpoint::store::{StoreMode, SyncPointStore};
use syncpoint::SyncSettings;

//--------------------------------------------------------<<

#[derive(Parser)]
#[command(name = "syncpoint")]
#[command(version)]
#[command(about = "Versioned file synchronization with syncpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Plain files per syncpoint
    Directory,
    /// One zip archive per syncpoint
    Compressed,
}

impl From<Mode> for StoreMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Directory => StoreMode::Directory,
            Mode::Compressed => StoreMode::Compressed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a working copy to a remote store
    Init {
        /// Working copy
        local: PathBuf,
        /// Remote store root
        remote: PathBuf,
        /// Store layout when the remote is new
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Record a syncpoint of the working copy
    Push {
        /// Working copy
        #[arg(default_value = ".")]
        local: PathBuf,
        /// Syncpoint id, generated from the current time when omitted
        #[arg(long)]
        id: Option<String>,
        /// Description
        #[arg(long, short)]
        message: Option<String>,
        /// Mark as a merge reference
        #[arg(long)]
        reference: bool,
    },

    /// Restore a syncpoint into the working copy
    Restore {
        /// Working copy
        #[arg(default_value = ".")]
        local: PathBuf,
        /// Syncpoint id or `latest`
        #[arg(long, default_value = "latest")]
        id: String,
        /// Restore only this relative path
        #[arg(long)]
        file: Option<String>,
    },

    /// Clone a remote's latest syncpoint into a new working copy and remote
    Clone {
        /// Remote to clone from
        source_remote: PathBuf,
        /// New working copy
        local: PathBuf,
        /// New remote store root
        remote: PathBuf,
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Merge one working copy into another
    Merge {
        /// Working copy merged from
        source: PathBuf,
        /// Working copy merged into
        target: PathBuf,
    },

    /// Synchronize a folder once
    Sync {
        from: PathBuf,
        /// Folder, `.zip` archive, or store root with `--record`
        to: PathBuf,
        /// Record a syncpoint in the store at `to`
        #[arg(long)]
        record: bool,
        #[arg(long)]
        id: Option<String>,
        #[arg(long, short)]
        message: Option<String>,
    },

    /// List the syncpoints of a remote store
    List {
        /// Remote store root
        remote: PathBuf,
    },
}

// ┌──────────────────────────────────────────────────────────────────────────────────────────────────────────────────┐
// │                                                 MAIN ENTRY POINT                                                 │
// └──────────────────────────────────────────────────────────────────────────────────────────────────────────────────┘

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncpoint=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let reporter = TracingReporter;

    match cli.command {
        Commands::Init { local, remote, mode } => {
            LocalRepository::initialize(&local, &remote, mode.map(Into::into), &reporter)
                .with_context(|| format!("Failed to initialize {}", local.display()))?;
        }
        Commands::Push { local, id, message, reference } => {
            let mut repo = open(&local)?;
            let syncpoint = repo
                .push(id.as_deref(), message.as_deref(), reference, &reporter)
                .context("Push failed")?;
            println!("{}", syncpoint.id);
        }
        Commands::Restore { local, id, file } => {
            let mut repo = open(&local)?;
            let summary = repo
                .restore(&id, file.as_deref(), &reporter)
                .with_context(|| format!("Failed to restore {}", id))?;
            if !summary.succeeded() {
                bail!("{} file(s) could not be restored or removed", summary.failures.len());
            }
        }
        Commands::Clone { source_remote, local, remote, mode } => {
            LocalRepository::clone_from(&source_remote, &local, &remote, mode.map(Into::into), &reporter)
                .with_context(|| format!("Failed to clone {}", source_remote.display()))?;
        }
        Commands::Merge { source, target } => {
            let mut source_repo = open(&source)?;
            let mut target_repo = open(&target)?;
            let merged = merge(&mut source_repo, &mut target_repo, &reporter).context("Merge failed")?;
            if !merged {
                bail!("merge left conflicts in {}", target.display());
            }
        }
        Commands::Sync { from, to, record, id, message } => {
            let settings = SyncSettings::load_for_working_copy(&from)?;
            manual_sync(&from, &to, record, id.as_deref(), message.as_deref(), &settings, &reporter)
                .with_context(|| format!("Failed to synchronize {} into {}", from.display(), to.display()))?;
        }
        Commands::List { remote } => {
            let store = SyncPointStore::open(&remote, None)
                .with_context(|| format!("Failed to open {}", remote.display()))?;
            for syncpoint in store.syncpoints() {
                println!(
                    "{}  {}  {}{}",
                    syncpoint.id,
                    syncpoint.created_at.format("%Y-%m-%d %H:%M:%S"),
                    syncpoint.description,
                    if syncpoint.is_reference_point { "  [reference]" } else { "" }
                );
            }
        }
    }

    Ok(())
}

fn open(local: &Path) -> Result<LocalRepository> {
    LocalRepository::open(local)
        .with_context(|| format!("{} is not bound to a remote, run `syncpoint init` first", local.display()))
}
