//! Interlace decision (§4.3): explicit hint → container field-order →
//! statistical frame sample → conservative default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterlaceError {
    #[error("ffprobe frame-sample invocation failed: {0}")]
    SampleFailed(String),
}

/// How the interlace decision was reached, kept distinct so the worker can
/// log when the conservative default fired (DESIGN.md Open Question 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterlaceSource {
    Explicit,
    Metadata,
    Analyzed,
    DefaultedInterlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlaceDecision {
    pub interlaced: bool,
    pub source: InterlaceSource,
}

/// Default sample window for statistical frame analysis, per §4.3.
pub const DEFAULT_SAMPLE_FRAMES: usize = 500;

/// Values `field_order` can take that denote interlaced content.
fn field_order_is_interlaced(field_order: &str) -> Option<bool> {
    match field_order {
        "tt" | "bb" | "tb" | "bt" => Some(true),
        "progressive" => Some(false),
        _ => None,
    }
}

/// Resolve the interlace decision for one work item.
///
/// `hint` is the envelope's explicit override, if any. `field_order` is the
/// primary video stream's ffprobe `field_order`. `sample_counts`, when
/// metadata is inconclusive, is the result of a statistical frame sample
/// (top/bottom-field-first count, progressive count).
pub fn resolve_interlace(
    hint: Option<bool>,
    field_order: Option<&str>,
    sample_counts: Option<(u64, u64)>,
) -> InterlaceDecision {
    if let Some(interlaced) = hint {
        return InterlaceDecision {
            interlaced,
            source: InterlaceSource::Explicit,
        };
    }

    if let Some(interlaced) = field_order.and_then(field_order_is_interlaced) {
        return InterlaceDecision {
            interlaced,
            source: InterlaceSource::Metadata,
        };
    }

    if let Some((interlaced_count, progressive_count)) = sample_counts {
        if interlaced_count > progressive_count {
            return InterlaceDecision {
                interlaced: true,
                source: InterlaceSource::Analyzed,
            };
        }
        if progressive_count > interlaced_count {
            return InterlaceDecision {
                interlaced: false,
                source: InterlaceSource::Analyzed,
            };
        }
        // Tie (including all-zero) is undetermined; fall through to default.
    }

    InterlaceDecision {
        interlaced: true,
        source: InterlaceSource::DefaultedInterlaced,
    }
}

/// Sample up to `max_frames` frames of `path` via ffprobe's per-frame
/// `interlaced_frame` field, returning (interlaced_count, progressive_count).
pub fn sample_frame_interlacing(
    path: &Path,
    max_frames: usize,
) -> Result<(u64, u64), InterlaceError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-select_streams",
            "v:0",
            "-show_entries",
            "frame=interlaced_frame",
            "-read_intervals",
            &format!("%+#{}", max_frames),
            "-print_format",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| InterlaceError::SampleFailed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(InterlaceError::SampleFailed(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(count_interlaced_frames(&stdout))
}

#[derive(Deserialize)]
struct FrameList {
    frames: Option<Vec<Frame>>,
}

#[derive(Deserialize)]
struct Frame {
    interlaced_frame: Option<i64>,
}

fn count_interlaced_frames(json_str: &str) -> (u64, u64) {
    let Ok(parsed) = serde_json::from_str::<FrameList>(json_str) else {
        return (0, 0);
    };
    let mut interlaced = 0u64;
    let mut progressive = 0u64;
    for frame in parsed.frames.unwrap_or_default() {
        match frame.interlaced_frame {
            Some(1) => interlaced += 1,
            Some(0) => progressive += 1,
            _ => {}
        }
    }
    (interlaced, progressive)
}
