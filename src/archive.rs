//! Archive pack/unpack primitives: xz-compressed tar (patch archives,
//! repository snapshots) and zip (zipdelta payloads).

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// Pack `dir`'s contents into an xz-compressed tar at `output`.
/// `dir` itself is not included as a path component; its children become
/// the archive root, matching `shutil.make_archive`'s `xztar` format.
pub fn pack_xztar(dir: &Path, output: &Path) -> Result<()> {
    let tar_file = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let encoder = XzEncoder::new(tar_file, 6);
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", dir)
        .with_context(|| format!("Failed to tar {}", dir.display()))?;
    builder.into_inner().context("Failed to finish tar stream")?.finish()?;
    Ok(())
}

/// Unpack an xz-compressed tar at `archive` into `dest`, creating `dest` if
/// needed.
pub fn unpack_xztar(archive: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let decoder = XzDecoder::new(file);
    let mut tar_archive = tar::Archive::new(decoder);
    tar_archive
        .unpack(dest)
        .with_context(|| format!("Failed to unpack {} into {}", archive.display(), dest.display()))
}

/// Returns true if `path` looks like a zip archive (by magic bytes, via the
/// `zip` crate's own detection).
pub fn is_zip(path: &Path) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(zip::ZipArchive::new(file).is_ok())
}

/// Extract a zip archive at `path` into `dest`.
pub fn unpack_zip(path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).with_context(|| format!("Failed to read zip {}", path.display()))?;
    archive.extract(dest).with_context(|| format!("Failed to extract zip {} into {}", path.display(), dest.display()))
}

/// Zip up `dir`'s contents (recursively) into a new archive at `output`,
/// overwriting any existing file there.
pub fn pack_zip(dir: &Path, output: &Path) -> Result<()> {
    let file = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .context("Failed to compute relative path")?
            .to_str()
            .context("Non-UTF8 path in zip payload")?
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{relative}/"), options)?;
        } else {
            writer.start_file(relative, options)?;
            let mut reader = File::open(entry.path())?;
            std::io::copy(&mut reader, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn xztar_round_trip() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/a.txt"), b"hello").unwrap();

        let archive_dir = tempdir().unwrap();
        let archive_path = archive_dir.path().join("out.tar.xz");
        pack_xztar(src.path(), &archive_path).unwrap();

        let dest = tempdir().unwrap();
        unpack_xztar(&archive_path, dest.path()).unwrap();

        let content = std::fs::read(dest.path().join("sub/a.txt")).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn zip_round_trip_and_detection() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"zipped").unwrap();

        let archive_dir = tempdir().unwrap();
        let archive_path = archive_dir.path().join("out.zip");
        pack_zip(src.path(), &archive_path).unwrap();

        assert!(is_zip(&archive_path).unwrap());

        let dest = tempdir().unwrap();
        unpack_zip(&archive_path, dest.path()).unwrap();
        let content = std::fs::read(dest.path().join("a.txt")).unwrap();
        assert_eq!(content, b"zipped");
    }

    #[test]
    fn non_zip_file_is_not_detected_as_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(!is_zip(&path).unwrap());
    }
}
