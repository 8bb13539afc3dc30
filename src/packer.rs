use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, error, info};
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::{error::ApiError, staging::StagedDir};

const MEDIA_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "webp", "heic", "gif", "mp4", "mov", "m4v", "webm",
];

/// What a staging directory turned into once its media files were inspected.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Single(PathBuf),
    Archive(PathBuf),
}

impl Delivery {
    pub fn path(&self) -> &Path {
        match self {
            Self::Single(path) | Self::Archive(path) => path,
        }
    }
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Media files directly inside `dir`, sorted by name. Sidecar files are skipped.
pub async fn collect_media_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_media_file(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Picks the single file or zips several into `<staging root>/<dir name>.zip`. The archive is
/// tracked by the staged directory's guard before it is written, so a failed archive is
/// removed along with the directory.
pub async fn pack(staged: &mut StagedDir, files: Vec<PathBuf>) -> Result<Delivery, ApiError> {
    match files.len() {
        0 => Err(ApiError::artifact_not_found("No media found")),
        1 => {
            let file = files.into_iter().next().unwrap_or_default();
            debug!("Single media file {:?}, no archive needed", file);
            Ok(Delivery::Single(file))
        }
        count => {
            let archive_path = staged.path().with_file_name(format!("{}.zip", staged.name()));
            staged.track(archive_path.clone());

            let target = archive_path.clone();
            tokio::task::spawn_blocking(move || write_zip(&target, &files))
                .await
                .map_err(|join_error| {
                    error!("Archive task failed: {join_error}");
                    ApiError::archive_failed("Failed to create archive")
                })?
                .map_err(|zip_error| {
                    error!("Could not archive {count} files into {:?}: {zip_error}", archive_path);
                    ApiError::archive_failed("Failed to create archive")
                })?;

            info!("Archived {count} media files into {:?}", archive_path);
            Ok(Delivery::Archive(archive_path))
        }
    }
}

fn write_zip(target: &Path, files: &[PathBuf]) -> zip::result::ZipResult<()> {
    let archive = std::fs::File::create(target)?;
    let mut zip = ZipWriter::new(std::io::BufWriter::new(archive));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for (index, file) in files.iter().enumerate() {
        let entry_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("media_{index}"));

        zip.start_file(entry_name, options)?;
        std::io::copy(&mut std::fs::File::open(file)?, &mut zip)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::staging::{StagingRoot, UuidIds};

    #[test]
    fn media_filter_skips_sidecars() {
        assert!(is_media_file(Path::new("post_1.jpg")));
        assert!(is_media_file(Path::new("clip.MP4")));
        assert!(!is_media_file(Path::new("post.json")));
        assert!(!is_media_file(Path::new("post.json.xz")));
        assert!(!is_media_file(Path::new("caption.txt")));
        assert!(!is_media_file(Path::new("noext")));
    }

    #[tokio::test]
    async fn one_file_is_not_archived() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingRoot::new(root.path(), Arc::new(UuidIds));
        let mut staged = staging.create("ig").await.unwrap();
        std::fs::write(staged.path().join("abc.jpg"), b"jpg").unwrap();
        std::fs::write(staged.path().join("abc.json"), b"{}").unwrap();

        let files = collect_media_files(staged.path()).await.unwrap();
        let delivery = pack(&mut staged, files).await.unwrap();

        assert_eq!(delivery, Delivery::Single(staged.path().join("abc.jpg")));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn several_files_become_one_zip_removed_with_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingRoot::new(root.path(), Arc::new(UuidIds));
        let mut staged = staging.create("ig").await.unwrap();
        std::fs::write(staged.path().join("abc_1.jpg"), b"one").unwrap();
        std::fs::write(staged.path().join("abc_2.mp4"), b"two").unwrap();

        let files = collect_media_files(staged.path()).await.unwrap();
        let delivery = pack(&mut staged, files).await.unwrap();

        let Delivery::Archive(archive) = delivery else {
            panic!("expected an archive");
        };
        assert_eq!(
            archive.file_name().unwrap().to_str().unwrap(),
            format!("{}.zip", staged.name())
        );

        let reader = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        let mut names = reader.file_names().map(ToString::to_string).collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["abc_1.jpg", "abc_2.mp4"]);

        drop(staged.into_guard());
        assert!(!archive.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingRoot::new(root.path(), Arc::new(UuidIds));
        let mut staged = staging.create("ig").await.unwrap();

        let files = collect_media_files(staged.path()).await.unwrap();
        let error = pack(&mut staged, files).await.unwrap_err();
        assert_eq!(error.code(), "ARTIFACT_NOT_FOUND");
    }

    #[tokio::test]
    async fn unwritable_archive_fails_and_is_removed_with_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingRoot::new(root.path(), Arc::new(UuidIds));
        let mut staged = staging.create("ig").await.unwrap();
        std::fs::write(staged.path().join("abc_1.jpg"), b"one").unwrap();
        std::fs::write(staged.path().join("abc_2.jpg"), b"two").unwrap();
        let blocked = root.path().join(format!("{}.zip", staged.name()));
        std::fs::create_dir(&blocked).unwrap();

        let files = collect_media_files(staged.path()).await.unwrap();
        let error = pack(&mut staged, files).await.unwrap_err();
        assert_eq!(error.code(), "ARCHIVE_FAILED");
        assert_eq!(error.message(), "Failed to create archive");

        drop(staged);
        assert!(!blocked.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn vanished_member_fails_the_archive() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingRoot::new(root.path(), Arc::new(UuidIds));
        let mut staged = staging.create("ig").await.unwrap();
        std::fs::write(staged.path().join("abc_1.jpg"), b"one").unwrap();
        std::fs::write(staged.path().join("abc_2.jpg"), b"two").unwrap();

        let files = collect_media_files(staged.path()).await.unwrap();
        std::fs::remove_file(&files[1]).unwrap();
        let error = pack(&mut staged, files).await.unwrap_err();
        assert_eq!(error.code(), "ARCHIVE_FAILED");

        let partial = root.path().join(format!("{}.zip", staged.name()));
        assert!(partial.exists());
        drop(staged);
        assert!(!partial.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
