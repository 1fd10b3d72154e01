//! Source-type inference for a reconciler batch (§4.4 step 5): a
//! `.source_type` marker file found while walking up from the batch's
//! directory wins; otherwise probe the first file's video height.

use crate::worker::probe::probe_file;
use std::path::Path;
use transcode_config::SourceType;

/// Walk from `dir` up to (and including) `stop_at`, returning the content
/// of the first `.source_type` marker file found.
fn find_marker_source_type(dir: &Path, stop_at: &Path) -> Option<SourceType> {
    let mut current = Some(dir);
    while let Some(d) = current {
        let marker = d.join(".source_type");
        if let Ok(content) = std::fs::read_to_string(&marker) {
            if let Some(source_type) = SourceType::parse_loose(&content) {
                return Some(source_type);
            }
        }
        if d == stop_at {
            break;
        }
        current = d.parent();
    }
    None
}

/// Probe the first file's video height: ≤576 → DVD, ≥720 → Blu-ray. Returns
/// `None` if the probe fails or the height falls in neither band.
fn infer_from_height(first_file: &Path) -> Option<SourceType> {
    let probe = probe_file(first_file).ok()?;
    let height = probe.video_streams.first()?.height;
    if height == 0 {
        None
    } else if height <= 576 {
        Some(SourceType::Dvd)
    } else if height >= 720 {
        Some(SourceType::Bluray)
    } else {
        None
    }
}

/// Resolve the source type for one missing-file batch, per the priority
/// chain: marker file, then probed height, then the walker's default.
pub fn resolve_batch_source_type(
    dir: &Path,
    src_base: &Path,
    first_file: &Path,
    default: SourceType,
) -> SourceType {
    find_marker_source_type(dir, src_base)
        .or_else(|| infer_from_height(first_file))
        .unwrap_or(default)
}
