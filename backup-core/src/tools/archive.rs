//! Tar archives of the media directories.
//!
//! Entries are stored relative to the application root so extraction lands
//! files back where they were captured from.

use super::{StopSignal, ToolControl};
use crate::utils::errors::{BackupError, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use walkdir::WalkDir;

const TOOL: &str = "tar";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub size: u64,
    pub mtime: u64,
}

fn archive_err(path: &Path, e: impl std::fmt::Display) -> BackupError {
    BackupError::Archive(format!("{}: {}", path.display(), e))
}

/// Pack every regular file under `root/<include>` into `output`
pub fn create_archive(
    root: &Path,
    include: &[PathBuf],
    output: &Path,
    stop: &StopSignal,
) -> Result<ArchiveStats> {
    let mut builder = Builder::new(BufWriter::new(File::create(output)?));
    builder.follow_symlinks(false);
    let mut stats = ArchiveStats::default();

    for dir in include {
        let abs = root.join(dir);
        if !abs.is_dir() {
            tracing::warn!(dir = %abs.display(), "Media directory missing, skipping");
            continue;
        }
        for entry in WalkDir::new(&abs).follow_links(false).sort_by_file_name() {
            stop.check()?;
            let entry = entry.map_err(|e| archive_err(&abs, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| archive_err(entry.path(), e))?;
            builder
                .append_path_with_name(entry.path(), rel)
                .map_err(|e| archive_err(entry.path(), e))?;
            stats.files += 1;
            stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    builder
        .into_inner()
        .map_err(|e| archive_err(output, e))?
        .into_inner()
        .map_err(|e| archive_err(output, e.error()))?
        .sync_all()?;
    Ok(stats)
}

/// Unpack `archive` under `root`, overwriting existing files.
/// Entries that would escape `root` are refused by the tar crate.
/// A raised `stop` leaves the entries unpacked so far in place.
pub fn extract_archive(archive: &Path, root: &Path, stop: &StopSignal) -> Result<u64> {
    std::fs::create_dir_all(root)?;
    let mut tar = Archive::new(File::open(archive)?);
    tar.set_overwrite(true);
    tar.set_preserve_mtime(true);

    let mut count = 0;
    for entry in tar.entries().map_err(|e| archive_err(archive, e))? {
        stop.check()?;
        let mut entry = entry.map_err(|e| archive_err(archive, e))?;
        if entry.unpack_in(root).map_err(|e| archive_err(archive, e))? {
            count += 1;
        } else {
            tracing::warn!(archive = %archive.display(), "Skipped archive entry outside target root");
        }
    }
    Ok(count)
}

/// Path -> (size, mtime) for every file entry
pub fn list_archive(archive: &Path, stop: &StopSignal) -> Result<BTreeMap<String, ArchiveEntry>> {
    let mut tar = Archive::new(File::open(archive)?);
    let mut listing = BTreeMap::new();
    for entry in tar.entries().map_err(|e| archive_err(archive, e))? {
        stop.check()?;
        let entry = entry.map_err(|e| archive_err(archive, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| archive_err(archive, e))?
            .to_string_lossy()
            .to_string();
        let header = entry.header();
        listing.insert(
            path,
            ArchiveEntry {
                size: header.size().unwrap_or(0),
                mtime: header.mtime().unwrap_or(0),
            },
        );
    }
    Ok(listing)
}

pub async fn create(
    root: &Path,
    include: &[PathBuf],
    output: &Path,
    control: &ToolControl,
) -> Result<ArchiveStats> {
    let (root, include, output) = (root.to_path_buf(), include.to_vec(), output.to_path_buf());
    control
        .blocking(TOOL, move |stop| create_archive(&root, &include, &output, stop))
        .await
}

pub async fn extract(archive: &Path, root: &Path, control: &ToolControl) -> Result<u64> {
    let (archive, root) = (archive.to_path_buf(), root.to_path_buf());
    control
        .blocking(TOOL, move |stop| extract_archive(&archive, &root, stop))
        .await
}

pub async fn list(archive: &Path, control: &ToolControl) -> Result<BTreeMap<String, ArchiveEntry>> {
    let archive = archive.to_path_buf();
    control.blocking(TOOL, move |stop| list_archive(&archive, stop)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn media_root() -> TempDir {
        let root = TempDir::new().unwrap();
        let uploads = root.path().join("public/uploads/2024");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("logo.png"), b"png-bytes").unwrap();
        std::fs::create_dir_all(root.path().join("storage/editor")).unwrap();
        std::fs::write(root.path().join("storage/editor/design.json"), b"{}").unwrap();
        std::fs::write(root.path().join("secret.env"), b"not included").unwrap();
        root
    }

    fn include() -> Vec<PathBuf> {
        vec![
            PathBuf::from("public/uploads"),
            PathBuf::from("storage/editor"),
            PathBuf::from("public/missing"),
        ]
    }

    #[test]
    fn test_create_and_list() {
        let root = media_root();
        let out = TempDir::new().unwrap();
        let tar_path = out.path().join("files.tar");

        let stats = create_archive(root.path(), &include(), &tar_path, &StopSignal::default()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 11);

        let listing = list_archive(&tar_path, &StopSignal::default()).unwrap();
        let names: Vec<&str> = listing.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["public/uploads/2024/logo.png", "storage/editor/design.json"]);
        assert_eq!(listing["public/uploads/2024/logo.png"].size, 9);
    }

    #[test]
    fn test_extract_restores_relative_paths() {
        let root = media_root();
        let out = TempDir::new().unwrap();
        let tar_path = out.path().join("files.tar");
        create_archive(root.path(), &include(), &tar_path, &StopSignal::default()).unwrap();

        std::fs::write(root.path().join("public/uploads/2024/logo.png"), b"changed").unwrap();
        std::fs::remove_file(root.path().join("storage/editor/design.json")).unwrap();

        assert_eq!(extract_archive(&tar_path, root.path(), &StopSignal::default()).unwrap(), 2);
        assert_eq!(
            std::fs::read(root.path().join("public/uploads/2024/logo.png")).unwrap(),
            b"png-bytes"
        );
        assert!(root.path().join("storage/editor/design.json").exists());
    }

    /// 3000 small uploads, archived
    fn bulky_archive(dir: &Path) -> PathBuf {
        let src = dir.join("src");
        let uploads = src.join("public/uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        for i in 0..3000 {
            std::fs::write(uploads.join(format!("{:04}.bin", i)), [7u8; 512]).unwrap();
        }
        let tar_path = dir.join("files.tar");
        create_archive(
            &src,
            &[PathBuf::from("public/uploads")],
            &tar_path,
            &StopSignal::default(),
        )
        .unwrap();
        tar_path
    }

    fn file_count(root: &Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[tokio::test]
    async fn test_timed_out_extract_stops_writing() {
        let dir = TempDir::new().unwrap();
        let tar_path = bulky_archive(dir.path());
        let dest = dir.path().join("dest");

        let control = ToolControl::new(Duration::from_millis(5), CancellationToken::new());
        let err = extract(&tar_path, &dest, &control).await.unwrap_err();
        assert!(matches!(err, BackupError::ToolTimeout { .. }), "{:?}", err);

        let at_error = file_count(&dest);
        assert!(at_error < 3000);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(file_count(&dest), at_error);
    }

    #[tokio::test]
    async fn test_cancelled_extract_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let tar_path = bulky_archive(dir.path());
        let dest = dir.path().join("dest");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let control = ToolControl::new(Duration::from_secs(30), cancel);
        let err = extract(&tar_path, &dest, &control).await.unwrap_err();
        assert!(matches!(err, BackupError::Cancelled));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(file_count(&dest), 0);
    }
}
