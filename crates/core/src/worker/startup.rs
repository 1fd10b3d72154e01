//! Startup checks, re-targeted from the teacher's software-only assertion
//! (see DESIGN.md "Teacher tension") to verifying the binaries and hardware
//! device this system actually needs are present before the worker loop
//! starts accepting jobs.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("required binary `{0}` not found on PATH")]
    MissingBinary(String),

    #[error("configured render node {0:?} does not exist")]
    MissingRenderNode(std::path::PathBuf),
}

fn binary_available(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .output()
        .map(|o| o.status.success() || !o.stdout.is_empty() || !o.stderr.is_empty())
        .unwrap_or(false)
}

/// Verify `ffmpeg`/`ffprobe` are runnable and, when hardware encoding is
/// enabled, that the configured render node device exists.
pub fn run_startup_checks(hw_enabled: bool, render_node: &Path) -> Result<(), StartupError> {
    if !binary_available("ffmpeg") {
        return Err(StartupError::MissingBinary("ffmpeg".to_string()));
    }
    if !binary_available("ffprobe") {
        return Err(StartupError::MissingBinary("ffprobe".to_string()));
    }
    if hw_enabled && !render_node.exists() {
        return Err(StartupError::MissingRenderNode(render_node.to_path_buf()));
    }
    Ok(())
}
