//! Multi-encoder state machine (§4.3): `Pending → HW-A → HW-B → SW →
//! Done | Failed`, with per-encoder retry bounds and partial-output
//! cleanup between attempts, under the host GPU mutex for the hardware
//! states only.

pub mod qsv;
pub mod sw;
pub mod vaapi;

use crate::worker::gpu_lock::GpuLock;
use crate::worker::interlace::InterlaceDecision;
use crate::worker::stream_plan::StreamPlan;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use transcode_config::{QualityConfig, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Qsv,
    Vaapi,
    Sw,
}

impl EncoderKind {
    pub fn label(self) -> &'static str {
        match self {
            EncoderKind::Qsv => "qsv",
            EncoderKind::Vaapi => "vaapi",
            EncoderKind::Sw => "sw",
        }
    }
}

/// The state-machine label (`HW-A`/`HW-B`/`SW`) a given encoder attempt
/// belongs to, for the metrics surface.
pub fn encoder_state_label(encoder: EncoderKind) -> &'static str {
    match encoder {
        EncoderKind::Qsv => "hw-a",
        EncoderKind::Vaapi => "hw-b",
        EncoderKind::Sw => "sw",
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{encoder} exited with status {status}: {stderr}")]
    NonZeroExit {
        encoder: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("failed to spawn {encoder}: {source}")]
    Spawn {
        encoder: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    GpuLock(#[from] crate::worker::gpu_lock::GpuLockError),

    #[error("all configured encoders exhausted for this item")]
    Exhausted,
}

/// One work item's immutable encode request, shared across all encoder
/// attempts for that item.
pub struct EncodeRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub source_type: SourceType,
    pub interlace: InterlaceDecision,
    pub plan: &'a StreamPlan,
    pub quality: &'a QualityConfig,
    /// Skip QSV for codec-specific source exceptions (e.g. VC-1), §4.3.
    pub skip_qsv: bool,
}

/// Which code path a particular attempt took, reported on the `start`
/// lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeAttempt {
    pub encoder: EncoderKind,
    pub attempt_number: u32,
}

/// Build the ordered list of hardware encoders to try for this request,
/// honoring the codec-specific skip rule.
fn hardware_order(request: &EncodeRequest) -> Vec<EncoderKind> {
    if request.skip_qsv {
        vec![EncoderKind::Vaapi]
    } else {
        vec![EncoderKind::Qsv, EncoderKind::Vaapi]
    }
}

fn remove_partial_output(destination: &Path) {
    let _ = std::fs::remove_file(destination);
}

fn run_ffmpeg(encoder: EncoderKind, args: &[String]) -> Result<(), EncodeError> {
    let output = Command::new("ffmpeg")
        .args(args)
        .output()
        .map_err(|source| EncodeError::Spawn {
            encoder: encoder.label(),
            source,
        })?;
    if !output.status.success() {
        return Err(EncodeError::NonZeroExit {
            encoder: encoder.label(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Stream mapping args shared by all three encoders (§4.3.1): the single
/// video stream, the resolved audio maps with per-stream codec/bitrate,
/// all subtitles, and the downmix track when present.
pub(crate) fn stream_map_args(plan: &StreamPlan) -> Vec<String> {
    let mut args = vec!["-map".to_string(), "0:v:0".to_string()];

    let mut audio_out_index = 0usize;
    for stream in &plan.audio {
        args.push("-map".to_string());
        args.push(format!("0:{}", stream.source_index));
        if stream.encode {
            args.push(format!("-c:a:{audio_out_index}"));
            args.push("aac".to_string());
            if let Some(bitrate) = &stream.bitrate {
                args.push(format!("-b:a:{audio_out_index}"));
                args.push(bitrate.clone());
            }
        } else {
            args.push(format!("-c:a:{audio_out_index}"));
            args.push("copy".to_string());
        }
        audio_out_index += 1;
    }

    if let Some(downmix) = &plan.downmix {
        args.push("-map".to_string());
        args.push(format!("0:{}", downmix.source_index));
        args.push(format!("-c:a:{audio_out_index}"));
        args.push("aac".to_string());
        args.push(format!("-b:a:{audio_out_index}"));
        args.push(downmix.bitrate.clone());
        args.push(format!("-ac:{audio_out_index}"));
        args.push("2".to_string());
    }

    args.push("-map".to_string());
    args.push("0:s?".to_string());
    args.push("-c:s".to_string());
    args.push("copy".to_string());

    args
}

fn build_args(encoder: EncoderKind, request: &EncodeRequest) -> Vec<String> {
    match encoder {
        EncoderKind::Qsv => qsv::build_command(request),
        EncoderKind::Vaapi => vaapi::build_command(request),
        EncoderKind::Sw => sw::build_command(request),
    }
}

/// Run the full state machine for one work item: hardware encoders in
/// order, each up to `max_hw_retries + 1` attempts, then software fallback
/// if enabled. Returns the encoder that produced the output, or
/// `EncodeError::Exhausted`.
pub fn run_state_machine(
    request: &EncodeRequest,
    gpu_lock: &mut GpuLock,
    max_hw_retries: u32,
    enable_sw_fallback: bool,
    on_attempt_start: impl FnMut(EncodeAttempt),
) -> Result<EncoderKind, EncodeError> {
    run_state_machine_with(
        request,
        gpu_lock,
        max_hw_retries,
        enable_sw_fallback,
        on_attempt_start,
        run_ffmpeg,
    )
}

/// Same as [`run_state_machine`] with the ffmpeg invocation factored out, so
/// tests can substitute a deterministic runner in place of a real process.
fn run_state_machine_with(
    request: &EncodeRequest,
    gpu_lock: &mut GpuLock,
    max_hw_retries: u32,
    enable_sw_fallback: bool,
    mut on_attempt_start: impl FnMut(EncodeAttempt),
    mut runner: impl FnMut(EncoderKind, &[String]) -> Result<(), EncodeError>,
) -> Result<EncoderKind, EncodeError> {
    for encoder in hardware_order(request) {
        let _guard = gpu_lock.acquire()?;
        for attempt in 1..=max_hw_retries + 1 {
            on_attempt_start(EncodeAttempt {
                encoder,
                attempt_number: attempt,
            });
            let args = build_args(encoder, request);
            match runner(encoder, &args) {
                Ok(()) => return Ok(encoder),
                Err(_) => remove_partial_output(request.destination),
            }
        }
        // Hardware lock is released here (guard dropped at end of scope)
        // before falling through to the next encoder.
    }

    if enable_sw_fallback {
        on_attempt_start(EncodeAttempt {
            encoder: EncoderKind::Sw,
            attempt_number: 1,
        });
        let args = build_args(EncoderKind::Sw, request);
        match runner(EncoderKind::Sw, &args) {
            Ok(()) => return Ok(EncoderKind::Sw),
            Err(_) => {
                remove_partial_output(request.destination);
                return Err(EncodeError::Exhausted);
            }
        }
    }

    Err(EncodeError::Exhausted)
}
