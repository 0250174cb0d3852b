//! Client-side repository: tracks the currently checked-out version of a
//! local working tree and routes `checkout_version` calls through the
//! shortest patch path in the remote version graph.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive;
use crate::download::DownloadService;
use crate::error::{BireusError, CheckoutErrorReason};
use crate::patch_task::PatchTask;
use crate::version_graph::VersionGraph;

const METADATA_DIR: &str = ".bireus";
const INFO_FILE: &str = "info.json";
const GRAPH_FILE: &str = "versions.gml";

/// `config` fields a server publishes, plus the `url`/`current_version` a
/// client adds once it has cloned the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigBody {
    name: String,
    first_version: String,
    latest_version: String,
    strategy: serde_json::Value,
    #[serde(default)]
    url: String,
    #[serde(default)]
    current_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoInfo {
    config: ConfigBody,
}

pub struct ClientRepository<'a> {
    path: PathBuf,
    download_service: &'a dyn DownloadService,
    info: RepoInfo,
    version_graph: VersionGraph,
}

impl<'a> ClientRepository<'a> {
    fn metadata_dir(&self) -> PathBuf {
        self.path.join(METADATA_DIR)
    }

    fn info_path(&self) -> PathBuf {
        self.metadata_dir().join(INFO_FILE)
    }

    fn graph_path(&self) -> PathBuf {
        self.metadata_dir().join(GRAPH_FILE)
    }

    fn patch_path(&self, from: &str, to: &str) -> PathBuf {
        self.metadata_dir().join(format!("{from}_to_{to}.tar.xz"))
    }

    /// Opens an already-checked-out repository at `path`.
    pub fn open(path: &Path, download_service: &'a dyn DownloadService) -> Result<Self> {
        let metadata_dir = path.join(METADATA_DIR);
        let info: RepoInfo = {
            let data = std::fs::read_to_string(metadata_dir.join(INFO_FILE))
                .with_context(|| format!("Failed to read repository info at {}", path.display()))?;
            serde_json::from_str(&data)?
        };
        let version_graph = VersionGraph::read_gml(&metadata_dir.join(GRAPH_FILE))?;

        info!(repository = %info.config.name, current_version = %info.config.current_version, "repository opened");
        Ok(ClientRepository { path: path.to_path_buf(), download_service, info, version_graph })
    }

    /// Clones a repository from `url` into a brand-new directory at `path`.
    pub fn get_from_url(path: &Path, url: &str, download_service: &'a dyn DownloadService) -> Result<Self> {
        if path.exists() {
            bail!("repository path already exists: {}", path.display());
        }
        std::fs::create_dir_all(path)?;

        let info_bytes = download_service.read(&format!("{url}/info.json"))?;
        let mut info: RepoInfo = serde_json::from_slice(&info_bytes)?;
        info.config.url = url.to_string();
        info.config.current_version = info.config.latest_version.clone();

        let metadata_dir = path.join(METADATA_DIR);
        std::fs::create_dir_all(&metadata_dir)?;
        std::fs::write(metadata_dir.join(INFO_FILE), serde_json::to_string_pretty(&info)?)?;
        download_service.download(&format!("{url}/versions.gml"), &metadata_dir.join(GRAPH_FILE))?;

        let temp = tempfile::tempdir()?;
        let latest_archive = temp.path().join("latest.tar.xz");
        info!("downloading latest version");
        download_service.download(&format!("{url}/latest.tar.xz"), &latest_archive)?;
        archive::unpack_xztar(&latest_archive, path)?;

        let version_graph = VersionGraph::read_gml(&metadata_dir.join(GRAPH_FILE))?;
        Ok(ClientRepository { path: path.to_path_buf(), download_service, info, version_graph })
    }

    pub fn current_version(&self) -> &str {
        &self.info.config.current_version
    }

    pub fn latest_version(&self) -> &str {
        &self.info.config.latest_version
    }

    /// Refreshes `info.json` and the version graph from the origin if the
    /// server's `latest_version` has moved on.
    fn refresh_from_origin(&mut self) -> Result<()> {
        let info_bytes = self.download_service.read(&format!("{}/info.json", self.info.config.url))?;
        let remote_info: RepoInfo = serde_json::from_slice(&info_bytes)?;

        if remote_info.config.latest_version != self.info.config.latest_version {
            self.info.config.latest_version = remote_info.config.latest_version;
            self.info.config.name = remote_info.config.name;
            std::fs::write(self.info_path(), serde_json::to_string_pretty(&self.info)?)?;

            self.download_service.download(&format!("{}/versions.gml", self.info.config.url), &self.graph_path())?;
            self.version_graph = VersionGraph::read_gml(&self.graph_path())?;
        }

        Ok(())
    }

    pub fn checkout_latest(&mut self) -> Result<()> {
        if let Err(e) = self.refresh_from_origin() {
            warn!(error = %e, "remote repository unreachable, using local metadata instead");
        }
        let latest = self.info.config.latest_version.clone();
        self.checkout_version(&latest)
    }

    fn version_known(&mut self, version: &str) -> Result<bool> {
        if self.version_graph.has_version(version) {
            return Ok(true);
        }
        self.refresh_from_origin()?;
        Ok(self.version_graph.has_version(version))
    }

    /// Checks out `version`, applying whatever patch chain the version graph
    /// prescribes. A no-op if `version` is already checked out.
    pub fn checkout_version(&mut self, version: &str) -> Result<()> {
        info!(version, current = %self.info.config.current_version, "checking out version");

        if self.info.config.current_version == version {
            info!(version, "already checked out");
            return Ok(());
        }

        if !self.version_known(version)? {
            return Err(BireusError::CheckoutError { reason: CheckoutErrorReason::UnknownVersion }.into());
        }

        let path = self
            .version_graph
            .shortest_path(&self.info.config.current_version, version)
            .ok_or(BireusError::CheckoutError { reason: CheckoutErrorReason::NoPath })?;

        debug!(?path, "patch path");

        for hop in path.windows(2) {
            let (from, to) = (hop[0].as_str(), hop[1].as_str());
            let patch_file = self.patch_path(from, to);

            if !patch_file.exists() {
                info!(from, to, "downloading patch archive from server");
                let url = format!("{}/__patches__/{from}_to_{to}.tar.xz", self.info.config.url);
                self.download_service.download(&url, &patch_file)?;
            } else {
                debug!(from, to, "patch archive already on disk");
            }

            let patch_task = PatchTask::new(self.download_service, self.info.config.url.clone(), &self.path, &patch_file);
            patch_task.run()?;
        }

        self.info.config.current_version = version.to_string();
        std::fs::write(self.info_path(), serde_json::to_string_pretty(&self.info)?)?;

        info!(version, "checkout finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::test_support::FakeDownloadService;
    use crate::patch_strategy::PatchStrategy;
    use crate::server_repository::ServerRepository;
    use tempfile::tempdir;

    fn write(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn serve_repository(_server: &ServerRepository, repo_path: &Path, service: &FakeDownloadService, base_url: &str) {
        service.put(&format!("{base_url}/info.json"), std::fs::read(repo_path.join("info.json")).unwrap());
        service.put(&format!("{base_url}/versions.gml"), std::fs::read(repo_path.join("versions.gml")).unwrap());
        service.put(&format!("{base_url}/latest.tar.xz"), std::fs::read(repo_path.join("latest.tar.xz")).unwrap());
        service.put(
            &format!("{base_url}/__patches__/v1_to_v2.tar.xz"),
            std::fs::read(repo_path.join("__patches__/v1_to_v2.tar.xz")).unwrap(),
        );
    }

    /// Serves every patch archive under `<repo_path>/__patches__`, for tests
    /// that route through more than one hop.
    fn serve_repository_all_patches(repo_path: &Path, service: &FakeDownloadService, base_url: &str) {
        service.put(&format!("{base_url}/info.json"), std::fs::read(repo_path.join("info.json")).unwrap());
        service.put(&format!("{base_url}/versions.gml"), std::fs::read(repo_path.join("versions.gml")).unwrap());
        service.put(&format!("{base_url}/latest.tar.xz"), std::fs::read(repo_path.join("latest.tar.xz")).unwrap());
        for entry in std::fs::read_dir(repo_path.join("__patches__")).unwrap() {
            let entry = entry.unwrap();
            let bytes = std::fs::read(entry.path()).unwrap();
            service.put(&format!("{base_url}/__patches__/{}", entry.file_name().to_string_lossy()), bytes);
        }
    }

    #[test]
    fn get_from_url_then_checkout_latest() {
        let root = tempdir().unwrap();
        write(&root.path().join("repo/v1/a.txt"), b"version one");
        let mut server =
            ServerRepository::create(&root.path().join("repo"), "repo", "v1", PatchStrategy::Incremental { bidirectional: true }).unwrap();
        write(&root.path().join("repo/v2/a.txt"), b"version two, a little longer");
        server.update().unwrap();

        let service = FakeDownloadService::new();
        serve_repository(&server, &root.path().join("repo"), &service, "http://example/repo");

        let client_path = root.path().join("client");
        let mut client = ClientRepository::get_from_url(&client_path, "http://example/repo", &service).unwrap();
        assert_eq!(client.current_version(), "v2");
        assert_eq!(std::fs::read(client_path.join("a.txt")).unwrap(), b"version two, a little longer");

        // Force back to v1 metadata to exercise checkout_version's patch path.
        client.info.config.current_version = "v1".to_string();
        std::fs::write(client_path.join("a.txt"), b"version one").unwrap();
        client.checkout_version("v2").unwrap();
        assert_eq!(client.current_version(), "v2");
        assert_eq!(std::fs::read(client_path.join("a.txt")).unwrap(), b"version two, a little longer");
    }

    #[test]
    fn checkout_version_routes_across_multiple_hops() {
        let root = tempdir().unwrap();
        write(&root.path().join("repo/v1/a.txt"), b"version one");
        let mut server =
            ServerRepository::create(&root.path().join("repo"), "repo", "v1", PatchStrategy::Incremental { bidirectional: true }).unwrap();
        write(&root.path().join("repo/v2/a.txt"), b"version two, a little longer");
        server.update().unwrap();
        write(&root.path().join("repo/v3/a.txt"), b"version three, longer still than the rest");
        server.update().unwrap();

        // Incremental strategy only links adjacent versions, so v1->v3 has no
        // direct edge: the checkout below must route v1 -> v2 -> v3.
        assert!(root.path().join("repo/__patches__/v1_to_v2.tar.xz").exists());
        assert!(root.path().join("repo/__patches__/v2_to_v3.tar.xz").exists());
        assert!(!root.path().join("repo/__patches__/v1_to_v3.tar.xz").exists());

        let service = FakeDownloadService::new();
        serve_repository_all_patches(&root.path().join("repo"), &service, "http://example/repo");

        let client_path = root.path().join("client");
        let mut client = ClientRepository::get_from_url(&client_path, "http://example/repo", &service).unwrap();
        assert_eq!(client.current_version(), "v3");

        // Force the client back to v1 to exercise a direct v1 -> v3 checkout.
        client.info.config.current_version = "v1".to_string();
        std::fs::write(client_path.join("a.txt"), b"version one").unwrap();
        std::fs::write(client.info_path(), serde_json::to_string_pretty(&client.info).unwrap()).unwrap();

        client.checkout_version("v3").unwrap();
        assert_eq!(client.current_version(), "v3");
        assert_eq!(
            std::fs::read(client_path.join("a.txt")).unwrap(),
            b"version three, longer still than the rest"
        );
    }

    #[test]
    fn checkout_same_version_is_noop() {
        let root = tempdir().unwrap();

        let service = FakeDownloadService::new();
        let client_path = root.path().join("client");
        std::fs::create_dir_all(client_path.join(METADATA_DIR)).unwrap();
        write(&client_path.join("a.txt"), b"v1");
        let info = RepoInfo {
            config: ConfigBody {
                name: "repo".to_string(),
                first_version: "v1".to_string(),
                latest_version: "v1".to_string(),
                strategy: serde_json::json!({"kind": "Incremental", "bidirectional": true}),
                url: "http://example/repo".to_string(),
                current_version: "v1".to_string(),
            },
        };
        std::fs::write(client_path.join(METADATA_DIR).join(INFO_FILE), serde_json::to_string(&info).unwrap()).unwrap();
        let graph = PatchStrategy::Incremental { bidirectional: true }.new_repo("v1");
        graph.write_gml(&client_path.join(METADATA_DIR).join(GRAPH_FILE)).unwrap();

        let mut client = ClientRepository::open(&client_path, &service).unwrap();
        client.checkout_version("v1").unwrap();
        assert_eq!(client.current_version(), "v1");
    }
}
