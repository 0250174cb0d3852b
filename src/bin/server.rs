use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bireus::logging;
use bireus::server_repository::{self, RepositoryManager};

#[derive(Parser)]
#[command(name = "bireus-server", about = "Manage BiReUS server-side repositories")]
struct Cli {
    /// Root directory containing one subdirectory per repository.
    #[arg(long, default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new repository.
    Add {
        name: String,
        /// Name of the first version directory (must already exist on disk).
        #[arg(long, default_value = "1.0.0")]
        first_version: String,
        /// `incremental[-fo]`, `instant[-fo]`, or `major-minor[-fo]:<minor_range>`.
        #[arg(long, default_value = "instant")]
        strategy: String,
    },
    /// Scan for new version directories and (re)generate their patch archives.
    Update {
        /// Update a single repository instead of every repository under `--path`.
        #[arg(long)]
        repo: Option<String>,
    },
    /// Remove leftover staging directories.
    Cleanup {
        #[arg(long)]
        repo: Option<String>,
    },
}

fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Add { name, first_version, strategy } => {
            let mut manager = RepositoryManager::new(&cli.path)?;
            let strategy = server_repository::parse_strategy(&strategy)?;
            manager.create(&name, &first_version, strategy)?;
        }
        Command::Update { repo } => {
            let mut manager = RepositoryManager::new(&cli.path)?;
            match repo {
                Some(name) => {
                    let repo_path = cli.path.join(&name);
                    let mut repository = bireus::server_repository::ServerRepository::open(&repo_path)?;
                    repository.update()?;
                }
                None => manager.full_update()?,
            }
        }
        Command::Cleanup { repo } => {
            let manager = RepositoryManager::new(&cli.path)?;
            match repo {
                Some(name) => {
                    let repo_path = cli.path.join(&name);
                    let repository = bireus::server_repository::ServerRepository::open(&repo_path)?;
                    repository.cleanup()?;
                }
                None => manager.full_cleanup()?,
            }
        }
    }

    Ok(())
}
