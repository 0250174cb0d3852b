//! Client-side recursive patch application.
//!
//! Unpacks a patch archive into a staging area under `.bireus/__temp__`,
//! builds a complete `.patched` tree alongside the working copy (never
//! mutating it in place), verifies every bsdiff transition by CRC before and
//! after, falls back to downloading a file fresh from the origin repository
//! if a CRC check fails outside a zipdelta, and finally swaps the `.patched`
//! tree into place atomically.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::archive;
use crate::binary_diff;
use crate::binary_patch;
use crate::crc;
use crate::diff_model::{Action, DiffHead, DiffItem, ItemType, PROTOCOL_VERSION};
use crate::download::DownloadService;
use crate::error::{BireusError, CheckoutErrorReason};

/// Renames `src` to `dst`, falling back to a recursive copy when they sit on
/// different filesystems (`rename` returns `EXDEV`).
fn move_dir(src: &Path, dst: &Path) -> anyhow::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            crate::util::copy_dir_recursive(src, dst)?;
            std::fs::remove_dir_all(src)?;
            Ok(())
        }
    }
}

pub struct PatchTask<'a> {
    download_service: &'a dyn DownloadService,
    repository_url: String,
    repo_path: PathBuf,
    patch_file: PathBuf,
}

impl<'a> PatchTask<'a> {
    pub fn new(
        download_service: &'a dyn DownloadService,
        repository_url: impl Into<String>,
        repo_path: impl Into<PathBuf>,
        patch_file: impl Into<PathBuf>,
    ) -> Self {
        PatchTask {
            download_service,
            repository_url: repository_url.into(),
            repo_path: repo_path.into(),
            patch_file: patch_file.into(),
        }
    }

    /// Applies the patch archive, returning the target version on success.
    /// The working tree at `repo_path` is left untouched if this returns an
    /// error before the final swap.
    pub fn run(&self) -> anyhow::Result<String> {
        let temp_root = self.repo_path.join(".bireus").join("__temp__");
        std::fs::create_dir_all(&temp_root)?;
        let unpacked = tempfile::Builder::new().prefix("patch_").tempdir_in(&temp_root)?;

        if archive::is_zip(&self.patch_file).unwrap_or(false) {
            archive::unpack_zip(&self.patch_file, unpacked.path())?;
        } else {
            archive::unpack_xztar(&self.patch_file, unpacked.path())?;
        }

        let diff_head = DiffHead::load_json_file(&unpacked.path().join(".bireus"))?;
        if diff_head.protocol != PROTOCOL_VERSION {
            return Err(BireusError::ProtocolMismatch { seen: diff_head.protocol, supported: PROTOCOL_VERSION }.into());
        }

        let root_diff = diff_head
            .root()
            .ok_or(BireusError::CheckoutError { reason: CheckoutErrorReason::UnknownVersion })?;

        info!(target = %diff_head.target_version, "applying patch");

        // Built next to, never inside, `repo_path`: the swap below replaces
        // `repo_path` wholesale, so the staging tree must not be a
        // descendant of it.
        let staging = tempfile::Builder::new().prefix("bireus_staged_").tempdir()?;
        std::fs::create_dir_all(staging.path())?;

        self.patch_directory(root_diff, &self.repo_path, unpacked.path(), staging.path(), &diff_head.target_version, false)?;

        self.swap_in(staging.path())?;

        Ok(diff_head.target_version)
    }

    /// Moves the freshly patched tree into place, replacing `repo_path`.
    fn swap_in(&self, staged: &Path) -> anyhow::Result<()> {
        let parent = self.repo_path.parent().ok_or_else(|| anyhow::anyhow!("repo path has no parent"))?;
        let file_name = self.repo_path.file_name().ok_or_else(|| anyhow::anyhow!("repo path has no file name"))?;
        let intermediate = parent.join(format!("{}.patched", file_name.to_string_lossy()));

        if intermediate.exists() {
            std::fs::remove_dir_all(&intermediate)?;
        }
        std::fs::rename(&self.repo_path, &intermediate)?;
        move_dir(staged, &self.repo_path)?;

        // The staged tree is built purely from diff content and carries no
        // `.bireus` metadata directory; restore it from the old tree, minus
        // the scratch space used to unpack this very patch.
        let old_metadata = intermediate.join(".bireus");
        if old_metadata.is_dir() {
            let new_metadata = self.repo_path.join(".bireus");
            std::fs::create_dir_all(&new_metadata)?;
            for entry in std::fs::read_dir(&old_metadata)? {
                let entry = entry?;
                if entry.file_name() == "__temp__" {
                    continue;
                }
                let dest = new_metadata.join(entry.file_name());
                if entry.file_type()?.is_dir() {
                    crate::util::copy_dir_recursive(&entry.path(), &dest)?;
                } else {
                    std::fs::copy(entry.path(), &dest)?;
                }
            }
        }

        std::fs::remove_dir_all(&intermediate)?;
        Ok(())
    }

    fn patch_directory(
        &self,
        diff: &DiffItem,
        base_dir: &Path,
        patch_dir: &Path,
        staging_dir: &Path,
        target_version: &str,
        inside_zip: bool,
    ) -> anyhow::Result<()> {
        debug!(action = ?diff.action, name = %diff.name, "patching directory");

        match diff.action {
            Action::Add => {
                std::fs::create_dir_all(staging_dir)?;
                crate::util::copy_dir_recursive(patch_dir, staging_dir)?;
            }
            Action::Remove => {
                // Nothing copied into staging: the directory ceases to exist.
            }
            Action::Delta => {
                std::fs::create_dir_all(staging_dir)?;
                for item in &diff.items {
                    match item.item_type {
                        ItemType::File => self.patch_file(
                            item,
                            &base_dir.join(&item.name),
                            &patch_dir.join(&item.name),
                            &staging_dir.join(&item.name),
                            target_version,
                            inside_zip,
                        )?,
                        ItemType::Directory => self.patch_directory(
                            item,
                            &base_dir.join(&item.name),
                            &patch_dir.join(&item.name),
                            &staging_dir.join(&item.name),
                            target_version,
                            inside_zip,
                        )?,
                    }
                }
            }
            other => anyhow::bail!("illegal action {other:?} for directory `{}`", diff.name),
        }

        Ok(())
    }

    fn patch_file(
        &self,
        diff: &DiffItem,
        base_path: &Path,
        patch_path: &Path,
        staging_path: &Path,
        target_version: &str,
        inside_zip: bool,
    ) -> anyhow::Result<()> {
        debug!(action = ?diff.action, name = %diff.name, "patching file");

        if let Some(parent) = staging_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match diff.action {
            Action::Add => {
                std::fs::copy(patch_path, staging_path)?;
            }
            Action::Remove => {
                // Nothing copied into staging: the file ceases to exist.
            }
            Action::Unchanged => {
                std::fs::copy(base_path, staging_path)?;
            }
            Action::Bsdiff => {
                self.apply_bsdiff(diff, base_path, patch_path, staging_path, target_version, inside_zip)?;
            }
            Action::Zipdelta => {
                self.patch_zipdelta(diff, base_path, patch_path, staging_path, target_version)?;
            }
            Action::Delta => anyhow::bail!("illegal action `delta` for file `{}`", diff.name),
        }

        Ok(())
    }

    fn apply_bsdiff(
        &self,
        diff: &DiffItem,
        base_path: &Path,
        patch_path: &Path,
        staging_path: &Path,
        target_version: &str,
        inside_zip: bool,
    ) -> anyhow::Result<()> {
        let expected_base = diff.base_crc.as_deref().unwrap_or_default();
        let actual_base = crc::crc32_hex(base_path)?;

        if expected_base != actual_base {
            let mismatch = BireusError::CrcMismatch {
                file: base_path.to_path_buf(),
                expected: expected_base.to_string(),
                actual: actual_base,
            };
            return self.handle_crc_mismatch(mismatch, base_path, staging_path, target_version, inside_zip);
        }

        let old_data = crate::util::mmap_file(base_path)?;
        let encoded = std::fs::read(patch_path)?;
        let chunks = binary_diff::decode_chunks(&encoded)?;
        let patched = binary_patch::apply_diff(&old_data, &chunks);
        std::fs::write(staging_path, &patched)?;

        let expected_target = diff.target_crc.as_deref().unwrap_or_default();
        let actual_target = crc::crc32_hex_bytes(&patched);
        if expected_target != actual_target {
            let mismatch = BireusError::CrcMismatch {
                file: staging_path.to_path_buf(),
                expected: expected_target.to_string(),
                actual: actual_target,
            };
            return self.handle_crc_mismatch(mismatch, base_path, staging_path, target_version, inside_zip);
        }

        Ok(())
    }

    /// A bsdiff verification failure inside a zipdelta always propagates (the
    /// outer file-level patch will retry as a whole); outside a zipdelta we
    /// fall back to downloading the target file fresh from the origin.
    fn handle_crc_mismatch(
        &self,
        mismatch: BireusError,
        base_path: &Path,
        staging_path: &Path,
        target_version: &str,
        inside_zip: bool,
    ) -> anyhow::Result<()> {
        error!(error = %mismatch, "crc mismatch while patching");

        if inside_zip {
            return Err(mismatch.into());
        }

        let relative = base_path.strip_prefix(&self.repo_path).unwrap_or(base_path);
        let relative = relative.to_string_lossy().replace('\\', "/");
        let url = format!("{}/{}/{}", self.repository_url, target_version, relative);

        warn!(url, "emergency fallback: downloading file fresh from origin");
        self.download_service.download(&url, staging_path)?;
        Ok(())
    }

    fn patch_zipdelta(
        &self,
        diff: &DiffItem,
        base_path: &Path,
        patch_path: &Path,
        staging_path: &Path,
        target_version: &str,
    ) -> anyhow::Result<()> {
        let unzipped = tempfile::Builder::new().prefix("bireus_unzipped_").tempdir()?;
        archive::unpack_zip(base_path, unzipped.path())?;

        let inner_staging = tempfile::Builder::new().prefix("bireus_zip_staged_").tempdir()?;
        std::fs::create_dir_all(inner_staging.path())?;

        let mut synthetic = diff.clone();
        synthetic.action = Action::Delta;

        match self.patch_directory(&synthetic, unzipped.path(), patch_path, inner_staging.path(), target_version, true) {
            Ok(()) => {
                archive::pack_zip(inner_staging.path(), staging_path)?;
                Ok(())
            }
            Err(err) if matches!(err.downcast_ref::<BireusError>(), Some(BireusError::CrcMismatch { .. })) => {
                warn!(error = %err, "crc mismatch inside zipdelta, falling back to whole-archive download");
                let relative = base_path.strip_prefix(&self.repo_path).unwrap_or(base_path);
                let relative = relative.to_string_lossy().replace('\\', "/");
                let url = format!("{}/{}/{}", self.repository_url, target_version, relative);
                self.download_service.download(&url, staging_path)?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
