//! Work-item enumeration and the destination-path rule (§4.3, §6.3).

use crate::intermediate::{is_container_file, is_intermediate_output};
use crate::protocol::{Envelope, Mode};
use std::path::{Path, PathBuf};
use transcode_config::PathsConfig;
use walkdir::WalkDir;

/// One source file paired with its deterministic destination path.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Recursively list container files under `root`, excluding the
/// intermediate-output pattern and hidden directories.
pub(crate) fn scan_directory(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if !root.exists() {
        return found;
    }
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with('.') && entry.depth() > 0 {
                    return false;
                }
            }
        }
        true
    });
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_container_file(path) || is_intermediate_output(path) {
            continue;
        }
        found.push(path.to_path_buf());
    }
    found
}

fn longest_common_prefix(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut iter = paths.iter();
    let first = iter.next()?;
    let mut common: Vec<_> = first.components().collect();
    for p in iter {
        let comps: Vec<_> = p.components().collect();
        let mut i = 0;
        while i < common.len() && i < comps.len() && common[i] == comps[i] {
            i += 1;
        }
        common.truncate(i);
        if common.is_empty() {
            return None;
        }
    }
    if common.is_empty() {
        None
    } else {
        Some(common.iter().collect())
    }
}

/// Destination-path rule (§4.3, §6.3).
pub fn destination_for(
    mode: Mode,
    source: &Path,
    path_hint: Option<&Path>,
    all_files: &[PathBuf],
    paths: &PathsConfig,
    source_type: transcode_config::SourceType,
) -> PathBuf {
    match mode {
        Mode::Series => {
            let series_root = paths
                .src_base
                .join(source_type.as_str())
                .join(&paths.series_subpath);
            match source.strip_prefix(&series_root) {
                Ok(relative) => paths.series_dst_base.join(relative),
                Err(_) => paths
                    .series_dst_base
                    .join(source.file_name().unwrap_or_default()),
            }
        }
        Mode::Movie => {
            let common_root = path_hint
                .map(Path::to_path_buf)
                .or_else(|| {
                    let parents: Vec<PathBuf> = all_files
                        .iter()
                        .filter_map(|f| f.parent().map(Path::to_path_buf))
                        .collect();
                    longest_common_prefix(&parents)
                });
            match common_root.as_deref().and_then(|root| source.strip_prefix(root).ok()) {
                Some(relative) if !relative.as_os_str().is_empty() => {
                    paths.movie_dst_base.join(relative)
                }
                _ => paths
                    .movie_dst_base
                    .join(source.file_name().unwrap_or_default()),
            }
        }
    }
}

/// Enumerate the work items for an accepted envelope, applying the
/// destination-path rule and skipping items whose destination already
/// exists (idempotence, §4.3).
pub fn enumerate_work_items(envelope: &Envelope, paths: &PathsConfig) -> Vec<WorkItem> {
    let candidates: Vec<PathBuf> = if !envelope.files.is_empty() {
        envelope
            .files
            .iter()
            .filter(|f| !is_intermediate_output(f))
            .cloned()
            .collect()
    } else if let Some(path) = &envelope.path {
        scan_directory(path)
    } else {
        Vec::new()
    };

    candidates
        .iter()
        .map(|source| {
            let destination = destination_for(
                envelope.mode,
                source,
                envelope.path.as_deref(),
                &candidates,
                paths,
                envelope.source_type,
            );
            WorkItem {
                source: source.clone(),
                destination,
            }
        })
        .filter(|item| !item.destination.exists())
        .collect()
}
