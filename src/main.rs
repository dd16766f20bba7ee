use clap::{Parser, Subcommand};
use nk::{DirState, Repo, Repository, Status};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nk", version = "0.1.0", about = "Content-addressed snapshot engine for a directory tree")]
struct Cli {
    /// Repository directory (created on first snapshot)
    #[arg(short = 'R', long, global = true, default_value = ".nk")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a directory tree into the repository
    Snapshot {
        /// Directory to snapshot (default: current directory)
        #[arg(default_value = ".")]
        root: PathBuf,
    },
    /// Restore a directory tree to a previous snapshot
    Restore {
        /// Directory to restore into
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Snapshot timestamp to restore; defaults to the latest
        #[arg(short, long)]
        timestamp: Option<i64>,
    },
    /// List stored snapshot timestamps
    Log,
    /// Show what a snapshot would change without writing anything
    Status {
        #[arg(default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Snapshot { root } => {
            let mut repo = Repo::open(&cli.repo)?;
            let timestamp = chrono::Utc::now().timestamp();
            let changed = nk::snapshot(&mut repo, &root, timestamp)?;
            if changed {
                println!("snapshot {timestamp}");
            } else {
                println!("nothing to do");
            }
            repo.close()?;
        }

        Commands::Restore { root, timestamp } => {
            let mut repo = Repo::open(&cli.repo)?;
            let target = resolve_timestamp(&repo, timestamp)?;
            nk::restore(&mut repo, &root, target)?;
            println!("restored {} to snapshot {target}", root.display());
            repo.close()?;
        }

        Commands::Log => {
            let repo = Repo::open(&cli.repo)?;
            let mut timestamps = repo.list_states()?;
            timestamps.sort_unstable();
            for ts in &timestamps {
                println!("{ts}");
            }
            if timestamps.is_empty() {
                println!("no snapshots yet");
            }
            repo.close()?;
        }

        Commands::Status { root } => {
            let mut repo = Repo::open(&cli.repo)?;
            let changes = nk::status(&mut repo, &root)?;
            if changes.is_empty() {
                println!("nothing to snapshot");
            } else {
                for (relpath, status) in &changes {
                    println!("{:<9} {}", status_label(*status), relpath);
                }
            }
            repo.close()?;
        }
    }

    Ok(())
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Unchanged => "unchanged",
        Status::New => "new",
        Status::Changed => "changed",
        Status::Deleted => "deleted",
    }
}

fn resolve_timestamp(repo: &Repo, timestamp: Option<i64>) -> Result<i64, Box<dyn std::error::Error>> {
    match timestamp {
        Some(ts) => Ok(ts),
        None => {
            let state: Option<DirState> = repo.read_state(nk::TIMESTAMP_MAX)?;
            state
                .map(|s| s.timestamp)
                .ok_or_else(|| Box::<dyn std::error::Error>::from("repository has no snapshots"))
        }
    }
}
