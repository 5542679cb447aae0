//! Per-directory file counts of a tree, recorded alongside each successful compression.

use std::path::Path;

use tracing::debug;

use crate::contract::{DirectoryCount, Statistics};
use crate::error::StatisticsError;

/// Walk `root` recursively and count the files each directory owns directly.
///
/// Only directories with at least one non-directory entry appear in the result.
/// Paths are relative to `root`, `/`-prefixed and `/`-separated; the root itself is `/`.
/// The result is sorted by path.
pub fn collect_statistics(root: &Path) -> Result<Statistics, StatisticsError> {
    if !root.is_dir() {
        return Err(StatisticsError::NotFound(root.to_path_buf()));
    }

    fn visit_dir(
        dir: &Path,
        root: &Path,
        results: &mut Statistics,
    ) -> Result<(), StatisticsError> {
        let io_err = |source| StatisticsError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = 0u64;
        for entry_res in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry_res.map_err(io_err)?;
            let file_type = entry.file_type().map_err(io_err)?;
            if file_type.is_dir() {
                visit_dir(&entry.path(), root, results)?;
            } else {
                files += 1;
            }
        }

        if files > 0 {
            results.push(DirectoryCount {
                path: relative_key(dir, root),
                files,
            });
        }
        Ok(())
    }

    let mut results = Statistics::new();
    visit_dir(root, root, &mut results)?;
    results.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), directories = results.len(), "Collected directory statistics");
    Ok(results)
}

fn relative_key(dir: &Path, root: &Path) -> String {
    let rel = dir.strip_prefix(root).unwrap_or(dir);
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", segments.join("/"))
}
