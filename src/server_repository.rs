//! Server-side repository: a directory of version subdirectories plus the
//! metadata (patch strategy, version graph) needed to decide which patch
//! archives must exist and to (re)generate the ones that are missing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive;
use crate::compare_task::CompareTask;
use crate::patch_strategy::PatchStrategy;
use crate::util;
use crate::version_graph::VersionGraph;

const INFO_FILE: &str = "info.json";
const GRAPH_FILE: &str = "versions.gml";
const LATEST_ARCHIVE: &str = "latest.tar.xz";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigBody {
    name: String,
    first_version: String,
    latest_version: String,
    strategy: StrategyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InfoJson {
    config: ConfigBody,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum StrategyConfig {
    Incremental { bidirectional: bool },
    Instant { bidirectional: bool },
    MajorMinor { bidirectional: bool, minor_range: usize },
}

impl From<StrategyConfig> for PatchStrategy {
    fn from(c: StrategyConfig) -> Self {
        match c {
            StrategyConfig::Incremental { bidirectional } => PatchStrategy::Incremental { bidirectional },
            StrategyConfig::Instant { bidirectional } => PatchStrategy::Instant { bidirectional },
            StrategyConfig::MajorMinor { bidirectional, minor_range } => {
                PatchStrategy::MajorMinor { bidirectional, minor_range }
            }
        }
    }
}

impl From<PatchStrategy> for StrategyConfig {
    fn from(s: PatchStrategy) -> Self {
        match s {
            PatchStrategy::Incremental { bidirectional } => StrategyConfig::Incremental { bidirectional },
            PatchStrategy::Instant { bidirectional } => StrategyConfig::Instant { bidirectional },
            PatchStrategy::MajorMinor { bidirectional, minor_range } => {
                StrategyConfig::MajorMinor { bidirectional, minor_range }
            }
        }
    }
}

/// Parses a CLI-facing strategy spec: `incremental[-fo]`, `instant[-fo]`, or
/// `major-minor[-fo]:<minor_range>`. `-fo` selects forward-only (non-bidirectional).
pub fn parse_strategy(spec: &str) -> Result<PatchStrategy> {
    let (base, range) = match spec.split_once(':') {
        Some((b, r)) => (b, Some(r)),
        None => (spec, None),
    };
    let (base, forward_only) = match base.strip_suffix("-fo") {
        Some(stripped) => (stripped, true),
        None => (base, false),
    };
    let bidirectional = !forward_only;

    match base {
        "incremental" => Ok(PatchStrategy::Incremental { bidirectional }),
        "instant" => Ok(PatchStrategy::Instant { bidirectional }),
        "major-minor" => {
            let minor_range = range
                .ok_or_else(|| anyhow::anyhow!("major-minor strategy requires `:<minor_range>`"))?
                .parse()
                .context("invalid minor_range")?;
            Ok(PatchStrategy::MajorMinor { bidirectional, minor_range })
        }
        other => bail!("unknown patch strategy `{other}`"),
    }
}

pub struct ServerRepository {
    path: PathBuf,
    name: String,
    first_version: String,
    strategy: PatchStrategy,
    graph: VersionGraph,
}

impl ServerRepository {
    /// Creates a brand-new repository directory containing only `first_version`.
    pub fn create(path: &Path, name: &str, first_version: &str, strategy: PatchStrategy) -> Result<Self> {
        std::fs::create_dir_all(path.join(first_version))
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let graph = strategy.new_repo(first_version);
        let repo = ServerRepository {
            path: path.to_path_buf(),
            name: name.to_string(),
            first_version: first_version.to_string(),
            strategy,
            graph,
        };
        repo.save_metadata(first_version)?;
        repo.graph.write_gml(&repo.path.join(GRAPH_FILE))?;
        info!(repository = %name, first_version, "created repository");
        Ok(repo)
    }

    /// Opens an existing repository directory previously created with [`Self::create`].
    pub fn open(path: &Path) -> Result<Self> {
        let info_path = path.join(INFO_FILE);
        let config: ConfigBody = {
            let data = std::fs::read_to_string(&info_path).with_context(|| format!("Failed to read {}", info_path.display()))?;
            let info: InfoJson = serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", info_path.display()))?;
            info.config
        };
        let graph = VersionGraph::read_gml(&path.join(GRAPH_FILE))?;

        Ok(ServerRepository {
            path: path.to_path_buf(),
            name: config.name,
            first_version: config.first_version,
            strategy: config.strategy.into(),
            graph,
        })
    }

    fn save_metadata(&self, latest_version: &str) -> Result<()> {
        let info = InfoJson {
            config: ConfigBody {
                name: self.name.clone(),
                first_version: self.first_version.clone(),
                latest_version: latest_version.to_string(),
                strategy: self.strategy.into(),
            },
        };
        let json = serde_json::to_string_pretty(&info)?;
        std::fs::write(self.path.join(INFO_FILE), json)?;
        Ok(())
    }

    /// Scans for version directories not yet in the version graph, adds them
    /// (generating whatever patch archives the strategy requires), and
    /// regenerates `latest.tar.xz`.
    pub fn update(&mut self) -> Result<()> {
        info!(repository = %self.name, "updating repository");

        let on_disk = version_directories(&self.path)?;
        let known: BTreeSet<String> = self.graph.versions().into_iter().collect();

        let mut new_versions: Vec<String> = on_disk.difference(&known).cloned().collect();
        new_versions.sort();

        if new_versions.is_empty() && known.is_empty() {
            bail!("no versions found in {}", self.path.display());
        }

        let last_known = self.graph.versions().into_iter().max();

        let mut last_version = last_known.unwrap_or_else(|| new_versions[0].clone());
        for new_version in &new_versions {
            if *new_version == last_version && self.graph.has_version(new_version) {
                continue;
            }
            debug!(new_version, last_version, "adding version");
            self.add_version(&last_version, new_version)?;
            last_version = new_version.clone();
        }

        self.graph.write_gml(&self.path.join(GRAPH_FILE))?;
        let latest = self.regenerate_latest()?;
        if let Some(latest) = latest {
            self.save_metadata(&latest)?;
        }

        info!(repository = %self.name, "update finished");
        Ok(())
    }

    fn add_version(&mut self, last_version: &str, new_version: &str) -> Result<()> {
        let required_patches = self.strategy.add_version(&mut self.graph, last_version, new_version)?;

        for (base, target) in required_patches {
            debug!(base, target, "generating diff");
            let task = CompareTask::new(self.path.clone(), self.name.clone(), base, target);
            task.generate_and_archive()?;
        }

        Ok(())
    }

    fn regenerate_latest(&self) -> Result<Option<String>> {
        let Some(latest) = self.graph.versions().into_iter().max() else {
            return Ok(None);
        };
        let latest_dir = self.path.join(&latest);
        let latest_archive = self.path.join(LATEST_ARCHIVE);
        archive::pack_xztar(&latest_dir, &latest_archive)?;
        Ok(Some(latest))
    }

    /// Removes leftover `.delta_to` staging directories from every version.
    pub fn cleanup(&self) -> Result<()> {
        debug!(repository = %self.name, "cleanup");
        for version in version_directories(&self.path)? {
            let staging = self.path.join(&version).join(".delta_to");
            if staging.exists() {
                std::fs::remove_dir_all(&staging)
                    .with_context(|| format!("Failed to remove {}", staging.display()))?;
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn version_directories(repo_path: &Path) -> Result<BTreeSet<String>> {
    let mut versions = util::subdirectory_names(repo_path)?;
    versions.remove(".delta_to");
    versions.remove("__patches__");
    Ok(versions)
}

pub struct RepositoryManager {
    path: PathBuf,
    repositories: Vec<ServerRepository>,
}

impl RepositoryManager {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            bail!("invalid repository manager path: {}", path.display());
        }

        let mut repositories = Vec::new();
        for name in util::subdirectory_names(path)? {
            let repo_path = path.join(&name);
            if repo_path.join(INFO_FILE).exists() {
                repositories.push(ServerRepository::open(&repo_path)?);
            }
        }

        Ok(RepositoryManager { path: path.to_path_buf(), repositories })
    }

    pub fn create(&mut self, name: &str, first_version: &str, strategy: PatchStrategy) -> Result<&ServerRepository> {
        info!(name, first_version, "creating repository");
        let repo = ServerRepository::create(&self.path.join(name), name, first_version, strategy)?;
        self.repositories.push(repo);
        Ok(self.repositories.last().unwrap())
    }

    pub fn full_update(&mut self) -> Result<()> {
        info!(path = %self.path.display(), "full_update started");
        for repo in &mut self.repositories {
            repo.update()?;
        }
        info!("full_update finished");
        Ok(())
    }

    pub fn full_cleanup(&self) -> Result<()> {
        info!(path = %self.path.display(), "full_cleanup started");
        for repo in &self.repositories {
            repo.cleanup()?;
        }
        info!("full_cleanup finished");
        Ok(())
    }

    pub fn repositories(&self) -> &[ServerRepository] {
        &self.repositories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn parses_strategy_specs() {
        assert_eq!(parse_strategy("incremental").unwrap(), PatchStrategy::Incremental { bidirectional: true });
        assert_eq!(parse_strategy("incremental-fo").unwrap(), PatchStrategy::Incremental { bidirectional: false });
        assert_eq!(parse_strategy("instant").unwrap(), PatchStrategy::Instant { bidirectional: true });
        assert_eq!(
            parse_strategy("major-minor:5").unwrap(),
            PatchStrategy::MajorMinor { bidirectional: true, minor_range: 5 }
        );
        assert!(parse_strategy("bogus").is_err());
    }

    #[test]
    fn create_then_update_generates_patch_archive() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("myrepo");

        write(&repo_path.join("v1/a.txt"), b"hello");
        let mut repo = ServerRepository::create(&repo_path, "myrepo", "v1", PatchStrategy::Incremental { bidirectional: true }).unwrap();

        write(&repo_path.join("v2/a.txt"), b"hello world");
        repo.update().unwrap();

        assert!(repo_path.join("__patches__/v1_to_v2.tar.xz").exists());
        assert!(repo_path.join("__patches__/v2_to_v1.tar.xz").exists());
        assert!(repo_path.join("latest.tar.xz").exists());

        let reopened = ServerRepository::open(&repo_path).unwrap();
        assert_eq!(reopened.name(), "myrepo");
    }

    #[test]
    fn cleanup_removes_staging_dirs() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("myrepo");
        write(&repo_path.join("v1/a.txt"), b"hello");
        let repo = ServerRepository::create(&repo_path, "myrepo", "v1", PatchStrategy::Incremental { bidirectional: true }).unwrap();

        let staging = repo_path.join("v1/.delta_to/v2");
        std::fs::create_dir_all(&staging).unwrap();
        repo.cleanup().unwrap();
        assert!(!staging.exists());
    }
}
