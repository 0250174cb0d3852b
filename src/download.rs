//! Fetches patch archives and repository metadata from a remote repository
//! URL. A trait so tests and embedders can swap in a fake transport; the
//! default implementation is a blocking `reqwest` client.

use std::path::Path;

use tracing::debug;

use crate::error::{BireusError, Result};

pub trait DownloadService: Send + Sync {
    /// Downloads the file at `url` to `path`.
    fn download(&self, url: &str, path: &Path) -> Result<()>;

    /// Reads the file at `url` into memory.
    fn read(&self, url: &str) -> Result<Vec<u8>>;
}

/// A simple blocking download service backed by `reqwest`.
pub struct BlockingDownloadService {
    client: reqwest::blocking::Client,
}

impl BlockingDownloadService {
    pub fn new() -> Self {
        BlockingDownloadService { client: reqwest::blocking::Client::new() }
    }
}

impl Default for BlockingDownloadService {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadService for BlockingDownloadService {
    fn download(&self, url: &str, path: &Path) -> Result<()> {
        debug!(url, path = %path.display(), "starting download");
        let bytes = self.read(url)?;
        std::fs::write(path, bytes).map_err(|e| BireusError::DownloadError { cause: e.to_string(), url: url.to_string() })
    }

    fn read(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "starting download to memory");
        let fetch = || -> reqwest::Result<Vec<u8>> {
            let response = self.client.get(url).send()?.error_for_status()?;
            Ok(response.bytes()?.to_vec())
        };
        fetch().map_err(|e| BireusError::DownloadError { cause: e.to_string(), url: url.to_string() })
    }
}

/// An in-memory stand-in used by tests elsewhere in the crate so they don't
/// need network access.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    pub struct FakeDownloadService {
        pub files: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    impl FakeDownloadService {
        pub fn new() -> Self {
            FakeDownloadService { files: Mutex::new(std::collections::HashMap::new()) }
        }

        pub fn put(&self, url: &str, data: Vec<u8>) {
            self.files.lock().unwrap().insert(url.to_string(), data);
        }
    }

    impl Default for FakeDownloadService {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DownloadService for FakeDownloadService {
        fn download(&self, url: &str, path: &Path) -> Result<()> {
            let data = self.read(url)?;
            std::fs::write(path, data).map_err(|e| BireusError::DownloadError { cause: e.to_string(), url: url.to_string() })
        }

        fn read(&self, url: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| BireusError::DownloadError { cause: "not found".to_string(), url: url.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeDownloadService;
    use super::*;

    #[test]
    fn fake_service_round_trips() {
        let service = FakeDownloadService::new();
        service.put("http://example/a.bin", b"payload".to_vec());
        assert_eq!(service.read("http://example/a.bin").unwrap(), b"payload");
        assert!(service.read("http://example/missing").is_err());
    }
}
