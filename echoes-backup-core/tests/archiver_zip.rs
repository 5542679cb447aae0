use std::fs::{self, File};
use std::io::Read;

use echoes_backup_core::archiver::{archive_path, ZipArchiver};
use echoes_backup_core::contract::Archiver;
use echoes_backup_core::error::ArchiveError;
use tempfile::tempdir;

#[tokio::test]
async fn compress_writes_a_flattened_archive_next_to_the_directory() {
    let root = tempdir().unwrap();
    let day = root.path().join("2020-09-10");
    fs::create_dir_all(day.join("gnuplot/specs")).unwrap();
    fs::create_dir_all(day.join("empty")).unwrap();
    fs::write(day.join("summary.txt"), "daily summary").unwrap();
    fs::write(day.join("gnuplot/specs/a.png"), "png").unwrap();

    let archiver = ZipArchiver::new();
    let stats = archiver.compress(&day).await.unwrap();

    assert_eq!(stats.len(), 2);
    let target = archive_path(&day);
    assert_eq!(target, root.path().join("2020-09-10.zip"));

    let mut zip = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "empty/",
            "gnuplot/",
            "gnuplot/specs/",
            "gnuplot/specs/a.png",
            "summary.txt",
        ]
    );

    let mut content = String::new();
    zip.by_name("summary.txt")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "daily summary");

    // The raw directory is left for the caller to delete, and no temp files remain.
    assert!(day.exists());
    let leftovers: Vec<_> = fs::read_dir(root.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn compress_missing_directory_is_source_missing() {
    let root = tempdir().unwrap();
    let err = ZipArchiver::new()
        .compress(&root.path().join("2020-09-10"))
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::SourceMissing(_)));
    assert!(!root.path().join("2020-09-10.zip").exists());
}

#[tokio::test]
async fn delete_is_idempotent_for_files_and_directories() {
    let root = tempdir().unwrap();
    let dir = root.path().join("2020-09-10");
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("nested/file"), "x").unwrap();
    let file = root.path().join("2020-09-09.zip");
    fs::write(&file, "zip").unwrap();

    let archiver = ZipArchiver::new();
    archiver.delete(&dir).await.unwrap();
    archiver.delete(&file).await.unwrap();
    assert!(!dir.exists());
    assert!(!file.exists());

    archiver.delete(&dir).await.unwrap();
    archiver.delete(&file).await.unwrap();
}

#[tokio::test]
async fn list_returns_sorted_entry_names() {
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("2020-09-10")).unwrap();
    fs::write(root.path().join("2020-09-09.zip"), "").unwrap();
    fs::write(root.path().join("daily.csv"), "").unwrap();

    let names = ZipArchiver::new().list(root.path()).await.unwrap();

    assert_eq!(names, vec!["2020-09-09.zip", "2020-09-10", "daily.csv"]);
}
