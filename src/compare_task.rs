//! Server-side recursive structural diff: walks a base and target version
//! tree in lockstep and produces both a [`DiffHead`] manifest and the
//! payload files (bsdiff blobs, added files, recursively-diffed zip
//! payloads) staged under a delta directory, ready to be archived.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::archive;
use crate::binary_diff;
use crate::crc;
use crate::diff_model::{Action, DiffHead, DiffItem};
use crate::util;

pub struct CompareTask {
    absolute_path: PathBuf,
    repository: String,
    base: String,
    target: String,
}

impl CompareTask {
    pub fn new(absolute_path: impl Into<PathBuf>, repository: impl Into<String>, base: impl Into<String>, target: impl Into<String>) -> Self {
        CompareTask {
            absolute_path: absolute_path.into(),
            repository: repository.into(),
            base: base.into(),
            target: target.into(),
        }
    }

    fn base_path(&self) -> PathBuf {
        self.absolute_path.join(&self.base)
    }

    fn target_path(&self) -> PathBuf {
        self.absolute_path.join(&self.target)
    }

    fn delta_path(&self) -> PathBuf {
        self.absolute_path.join(&self.base).join(".delta_to").join(&self.target)
    }

    /// Runs the comparison and, if `write_deltafile` is set, stages the
    /// `.bireus` manifest and payload files under the delta directory.
    pub fn generate_diff(&self, write_deltafile: bool) -> Result<DiffHead> {
        let delta_path = self.delta_path();
        std::fs::create_dir_all(&delta_path).with_context(|| format!("Failed to create {}", delta_path.display()))?;

        let mut head = DiffHead::new(self.repository.clone(), self.base.clone(), self.target.clone());
        let root = self.compare_directory(Path::new(""))?;
        head.items.push(root);

        if write_deltafile {
            head.write_json_file(&delta_path.join(".bireus"))?;
        }

        Ok(head)
    }

    /// Runs [`Self::generate_diff`] and packs the resulting delta directory
    /// into an xz-tar archive at `<absolute_path>/__patches__/<base>_to_<target>.tar.xz`,
    /// removing the staging tree afterwards.
    pub fn generate_and_archive(&self) -> Result<DiffHead> {
        let head = self.generate_diff(true)?;

        let patches_dir = self.absolute_path.join("__patches__");
        std::fs::create_dir_all(&patches_dir)?;
        let archive_path = patches_dir.join(format!("{}_to_{}.tar.xz", self.base, self.target));
        archive::pack_xztar(&self.delta_path(), &archive_path)?;

        let staging_root = self.base_path().join(".delta_to");
        std::fs::remove_dir_all(&staging_root).with_context(|| format!("Failed to clean up {}", staging_root.display()))?;

        Ok(head)
    }

    fn compare_directory(&self, relative: &Path) -> Result<DiffItem> {
        let base_dir = self.base_path().join(relative);
        let target_dir = self.target_path().join(relative);
        let delta_dir = self.delta_path().join(relative);

        let base_exists = base_dir.exists();
        let target_exists = target_dir.exists();

        let action = if base_exists && target_exists {
            std::fs::create_dir_all(&delta_dir)?;
            Action::Delta
        } else if base_exists {
            Action::Remove
        } else {
            util::copy_dir_recursive(&target_dir, &delta_dir)?;
            Action::Add
        };

        let mut subdirs = std::collections::BTreeSet::new();
        let mut subfiles = std::collections::BTreeSet::new();
        if base_exists {
            subdirs.extend(util::subdirectory_names(&base_dir)?);
            subfiles.extend(util::file_names(&base_dir)?);
        }
        if target_exists {
            subdirs.extend(util::subdirectory_names(&target_dir)?);
            subfiles.extend(util::file_names(&target_dir)?);
        }

        let name = relative.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let mut result = DiffItem::new_directory(name, action);

        let subdir_items: Result<Vec<DiffItem>> = subdirs
            .into_par_iter()
            .map(|dir| self.compare_directory(&relative.join(dir)))
            .collect();
        let subfile_items: Result<Vec<DiffItem>> = subfiles
            .into_par_iter()
            .map(|file| self.compare_file(relative, &file))
            .collect();

        result.items.extend(subdir_items?);
        result.items.extend(subfile_items?);

        Ok(result)
    }

    fn compare_file(&self, relative: &Path, file_name: &str) -> Result<DiffItem> {
        let base_file = self.base_path().join(relative).join(file_name);
        let target_file = self.target_path().join(relative).join(file_name);
        let delta_file = self.delta_path().join(relative).join(file_name);

        if let Some(parent) = delta_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !base_file.exists() {
            std::fs::copy(&target_file, &delta_file).with_context(|| format!("Failed to copy {}", target_file.display()))?;
            let target_crc = crc::crc32_hex(&target_file)?;
            return Ok(DiffItem::new_file(file_name, Action::Add, None, Some(target_crc)));
        }

        if !target_file.exists() {
            let base_crc = crc::crc32_hex(&base_file)?;
            return Ok(DiffItem::new_file(file_name, Action::Remove, Some(base_crc), None));
        }

        if crc::files_equal(&base_file, &target_file)? {
            let crc = crc::crc32_hex(&target_file)?;
            return Ok(DiffItem::new_file(file_name, Action::Unchanged, Some(crc.clone()), Some(crc)));
        }

        if archive::is_zip(&base_file).unwrap_or(false) {
            return self.compare_zip_file(relative, file_name, &base_file, &target_file, &delta_file);
        }

        let base_data = util::mmap_file(&base_file)?;
        let target_data = util::mmap_file(&target_file)?;
        let chunks = binary_diff::compute_diff(&base_data, &target_data);
        let encoded = binary_diff::encode_chunks(&chunks)?;
        std::fs::write(&delta_file, encoded).with_context(|| format!("Failed to write {}", delta_file.display()))?;

        let base_crc = crc::crc32_hex(&base_file)?;
        let target_crc = crc::crc32_hex(&target_file)?;
        Ok(DiffItem::new_file(file_name, Action::Bsdiff, Some(base_crc), Some(target_crc)))
    }

    fn compare_zip_file(
        &self,
        relative: &Path,
        file_name: &str,
        base_file: &Path,
        target_file: &Path,
        delta_file: &Path,
    ) -> Result<DiffItem> {
        let temp = tempfile::Builder::new().prefix("bireus_").suffix("_dir").tempdir()?;
        let temp_base = temp.path().join("base");
        let temp_target = temp.path().join("target");
        archive::unpack_zip(base_file, &temp_base)?;
        archive::unpack_zip(target_file, &temp_target)?;

        let zip_task = CompareTask::new(temp.path(), self.repository.clone(), "base".to_string(), "target".to_string());
        let zip_head = zip_task.generate_diff(false)?;

        let temp_delta = temp.path().join("base").join(".delta_to").join("target");
        if temp_delta.exists() {
            util::copy_dir_recursive(&temp_delta, delta_file)?;
        } else {
            std::fs::create_dir_all(delta_file)?;
        }

        let zipfile_crc = crc::ZIPFILE_SENTINEL.to_string();
        let mut item = DiffItem::new_file(file_name, Action::Zipdelta, Some(zipfile_crc.clone()), Some(zipfile_crc));
        item.items = zip_head.root().map(|r| r.items.clone()).unwrap_or_default();
        let _ = relative;
        Ok(item)
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
    fn detects_add_remove_unchanged_and_bsdiff() {
        let root = tempdir().unwrap();
        write(&root.path().join("v1/keep.txt"), b"same content");
        write(&root.path().join("v1/old.txt"), b"going away");
        write(&root.path().join("v1/change.txt"), b"AAAAAAAAAA");

        write(&root.path().join("v2/keep.txt"), b"same content");
        write(&root.path().join("v2/new.txt"), b"brand new");
        write(&root.path().join("v2/change.txt"), b"BBBBBBBBBB");

        let task = CompareTask::new(root.path(), "repo", "v1", "v2");
        let head = task.generate_diff(true).unwrap();

        let root_item = head.root().unwrap();
        let actions: std::collections::HashMap<_, _> =
            root_item.items.iter().map(|i| (i.name.clone(), i.action)).collect();

        assert_eq!(actions["keep.txt"], Action::Unchanged);
        assert_eq!(actions["old.txt"], Action::Remove);
        assert_eq!(actions["new.txt"], Action::Add);
        assert_eq!(actions["change.txt"], Action::Bsdiff);

        let delta_dir = root.path().join("v1/.delta_to/v2");
        assert!(delta_dir.join(".bireus").exists());
        assert!(delta_dir.join("new.txt").exists());
        assert!(delta_dir.join("change.txt").exists());
    }

    #[test]
    fn directory_add_copies_payload() {
        let root = tempdir().unwrap();
        write(&root.path().join("v1/a.txt"), b"only in v1");
        write(&root.path().join("v2/a.txt"), b"only in v1");
        write(&root.path().join("v2/newdir/b.txt"), b"new dir contents");

        let task = CompareTask::new(root.path(), "repo", "v1", "v2");
        let head = task.generate_diff(true).unwrap();

        let root_item = head.root().unwrap();
        let newdir = root_item.items.iter().find(|i| i.name == "newdir").unwrap();
        assert_eq!(newdir.action, Action::Add);

        let delta_dir = root.path().join("v1/.delta_to/v2");
        assert!(delta_dir.join("newdir/b.txt").exists());
    }
}
