use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bireus::client_repository::ClientRepository;
use bireus::download::BlockingDownloadService;
use bireus::logging;

#[derive(Parser)]
#[command(name = "bireus-client", about = "Check out and update BiReUS client-side repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone a repository from a remote URL into a new local directory.
    Init { path: PathBuf, url: String },
    /// Check out a specific version, or the latest version if none is given.
    Checkout {
        #[arg(long, default_value = ".")]
        path: PathBuf,
        version: Option<String>,
    },
}

fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let download_service = BlockingDownloadService::new();

    match cli.command {
        Command::Init { path, url } => {
            ClientRepository::get_from_url(&path, &url, &download_service)?;
        }
        Command::Checkout { path, version } => {
            let mut repository = ClientRepository::open(&path, &download_service)?;
            match version {
                Some(v) => repository.checkout_version(&v)?,
                None => repository.checkout_latest()?,
            }
        }
    }

    Ok(())
}
