//! Shared filename rules used by both the worker's enumeration step and the
//! reconciler's scan: recognized container extensions and the
//! intermediate-output exclusion pattern.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Container extensions considered source/output video files.
pub const CONTAINER_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".m2ts", ".ts"];

fn intermediate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]{2}_[A-Za-z][0-9]{2}\.mkv$").expect("static pattern is valid")
    })
}

/// True if `path`'s file name matches the tool-generated temporary pattern
/// produced by the ripper for untitled tracks (e.g. `t0_t01.mkv`).
pub fn is_intermediate_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| intermediate_pattern().is_match(name))
        .unwrap_or(false)
}

/// True if `path` has a recognized container extension, case-insensitively.
pub fn is_container_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let with_dot = format!(".{}", ext.to_lowercase());
            CONTAINER_EXTENSIONS.contains(&with_dot.as_str())
        })
        .unwrap_or(false)
}
