//! Reconciler (§4.4): a one-shot tool that diffs the source and destination
//! trees and republishes envelopes for any file whose output is missing.

pub mod batch;
pub mod source_type;

use crate::bus::{BusError, JobBus};
use crate::protocol::{Envelope, Mode, SUPPORTED_VERSION};
use crate::worker::enumerate::{destination_for, scan_directory};
use batch::batch_files;
use serde_json::json;
use source_type::resolve_batch_source_type;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use transcode_config::{Config, SourceType};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Outcome of a reconciliation run, real or dry-run.
#[derive(Debug, Default)]
pub struct ReconcilerReport {
    pub envelopes: Vec<Envelope>,
    pub skipped_temp: usize,
    pub skipped_probe_failures: usize,
}

impl ReconcilerReport {
    pub fn published_files(&self) -> usize {
        self.envelopes.iter().map(|e| e.files.len()).sum()
    }
}

/// Discover `(source_type, root)` pairs by probing for `dvd`/`bluray`
/// subfolders under the configured source base; fall back to a single root
/// using the configured default when neither exists (§4.4 step 1).
fn discover_roots(src_base: &Path, default_source_type: SourceType) -> Vec<(SourceType, PathBuf)> {
    let dvd_root = src_base.join(SourceType::Dvd.as_str());
    let bluray_root = src_base.join(SourceType::Bluray.as_str());

    let mut roots = Vec::new();
    if dvd_root.is_dir() {
        roots.push((SourceType::Dvd, dvd_root));
    }
    if bluray_root.is_dir() {
        roots.push((SourceType::Bluray, bluray_root));
    }
    if roots.is_empty() {
        roots.push((default_source_type, src_base.to_path_buf()));
    }
    roots
}

/// Enumerate the missing files (by the worker's own destination rule) for
/// one `(source_type, mode_root)` scan (§4.4 steps 2-3, 6).
fn collect_missing(
    mode: Mode,
    mode_root: &Path,
    source_type: SourceType,
    paths: &transcode_config::PathsConfig,
    include_probe_failures: bool,
) -> (Vec<PathBuf>, usize) {
    let mut missing = Vec::new();
    let mut skipped_probe_failures = 0;

    if !mode_root.exists() {
        tracing::warn!(root = %mode_root.display(), "source root does not exist");
        return (missing, skipped_probe_failures);
    }

    let candidates = scan_directory(mode_root);
    for file in &candidates {
        let destination = destination_for(mode, file, None, &candidates, paths, source_type);
        if destination.exists() {
            continue;
        }
        if !include_probe_failures && crate::worker::probe::probe_file(file).is_err() {
            skipped_probe_failures += 1;
            continue;
        }
        missing.push(file.clone());
    }

    (missing, skipped_probe_failures)
}

/// Optional movie-name hint (§4.4.1): set only when a batch has exactly one
/// file whose parent directory is the movie source root itself.
fn movie_name_hint(batch: &[PathBuf], mode_root: &Path) -> Option<String> {
    if batch.len() != 1 {
        return None;
    }
    let file = &batch[0];
    if file.parent() == Some(mode_root) {
        file.file_stem().and_then(|s| s.to_str()).map(str::to_string)
    } else {
        None
    }
}

fn build_envelope(
    mode: Mode,
    source_type: SourceType,
    files: Vec<PathBuf>,
    movie_name: Option<String>,
) -> Envelope {
    Envelope {
        version: SUPPORTED_VERSION,
        mode,
        source_type,
        path: None,
        files,
        interlaced: None,
        movie_name,
    }
}

/// Run one reconciliation pass. When `dry_run` is true, envelopes are
/// computed and returned but never published on the bus.
pub async fn reconcile(
    config: &Config,
    bus: &dyn JobBus,
    dry_run: bool,
) -> Result<ReconcilerReport, ReconcileError> {
    let mut report = ReconcilerReport::default();
    let roots = discover_roots(&config.paths.src_base, config.paths.default_source_type);

    for (source_type, root) in roots {
        for (mode, subpath) in [
            (Mode::Series, &config.paths.series_subpath),
            (Mode::Movie, &config.paths.movie_subpath),
        ] {
            let mode_root = root.join(subpath);
            let (missing, skipped) = collect_missing(
                mode,
                &mode_root,
                source_type,
                &config.paths,
                config.reconciler.include_probe_failures,
            );
            report.skipped_probe_failures += skipped;

            let mut by_parent: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
            for path in missing {
                by_parent.entry(path.parent().unwrap_or(&mode_root).to_path_buf()).or_default().push(path);
            }

            for (parent, files) in by_parent {
                for batch in batch_files(files, config.reconciler.batch_size) {
                    let first = batch[0].clone();
                    let batch_source_type = resolve_batch_source_type(&parent, &mode_root, &first, source_type);
                    let movie_name = if mode == Mode::Movie {
                        movie_name_hint(&batch, &mode_root)
                    } else {
                        None
                    };
                    let envelope = build_envelope(mode, batch_source_type, batch, movie_name);

                    if dry_run {
                        tracing::info!(mode = ?envelope.mode, files = envelope.files.len(), "dry-run: would publish envelope");
                    } else {
                        let payload = json!({
                            "version": envelope.version,
                            "mode": envelope.mode,
                            "source_type": envelope.source_type,
                            "files": envelope.files,
                            "movie_name": envelope.movie_name,
                        })
                        .to_string();
                        bus.publish(&config.broker.topic_jobs, &payload).await?;
                    }
                    report.envelopes.push(envelope);
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use std::fs;

    fn write_file(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn base_config(src_base: &Path, series_dst: &Path, movie_dst: &Path) -> Config {
        let mut config = Config::default();
        config.paths.src_base = src_base.to_path_buf();
        config.paths.series_dst_base = series_dst.to_path_buf();
        config.paths.movie_dst_base = movie_dst.to_path_buf();
        config.reconciler.include_probe_failures = true;
        config
    }

    #[tokio::test]
    async fn test_missing_series_file_gets_published() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let series_dst = dir.path().join("series-dst");
        let movie_dst = dir.path().join("movie-dst");

        write_file(&src.join("dvd/Serien/Show/S01/Show-S01E01.mkv"));
        let config = base_config(&src, &series_dst, &movie_dst);

        let bus = InMemoryBus::new();
        let report = reconcile(&config, &bus, false).await.unwrap();

        assert_eq!(report.published_files(), 1);
        assert_eq!(bus.published.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_destination_is_not_republished() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let series_dst = dir.path().join("series-dst");
        let movie_dst = dir.path().join("movie-dst");

        write_file(&src.join("dvd/Serien/Show/S01/Show-S01E01.mkv"));
        write_file(&series_dst.join("Show/S01/Show-S01E01.mkv"));
        let config = base_config(&src, &series_dst, &movie_dst);

        let bus = InMemoryBus::new();
        let report = reconcile(&config, &bus, false).await.unwrap();

        assert_eq!(report.published_files(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let series_dst = dir.path().join("series-dst");
        let movie_dst = dir.path().join("movie-dst");

        write_file(&src.join("dvd/Filme/Film/Film.mkv"));
        let config = base_config(&src, &series_dst, &movie_dst);

        let bus = InMemoryBus::new();
        let report = reconcile(&config, &bus, true).await.unwrap();

        assert_eq!(report.published_files(), 1);
        assert!(bus.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_movie_name_hint_set_only_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let series_dst = dir.path().join("series-dst");
        let movie_dst = dir.path().join("movie-dst");

        write_file(&src.join("dvd/Filme/Film.mkv"));
        let config = base_config(&src, &series_dst, &movie_dst);

        let bus = InMemoryBus::new();
        let report = reconcile(&config, &bus, true).await.unwrap();

        let movie_envelope = report.envelopes.iter().find(|e| e.mode == Mode::Movie).unwrap();
        assert_eq!(movie_envelope.movie_name.as_deref(), Some("Film"));
    }

    #[tokio::test]
    async fn test_batching_respects_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let series_dst = dir.path().join("series-dst");
        let movie_dst = dir.path().join("movie-dst");

        for i in 0..7 {
            write_file(&src.join(format!("dvd/Serien/Show/S01/Show-S01E{i:02}.mkv")));
        }
        let mut config = base_config(&src, &series_dst, &movie_dst);
        config.reconciler.batch_size = 3;

        let bus = InMemoryBus::new();
        let report = reconcile(&config, &bus, false).await.unwrap();

        assert_eq!(report.published_files(), 7);
        assert!(report.envelopes.iter().all(|e| e.files.len() <= 3));
    }
}
