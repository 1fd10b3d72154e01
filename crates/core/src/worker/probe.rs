//! ffprobe invocation and parsing, extended with language tags and
//! `field_order` beyond the narrower probe schema this was grounded on.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStream {
    pub index: u32,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// Raw `field_order` as reported by ffprobe (e.g. `"progressive"`,
    /// `"tt"`, `"bb"`, `"tb"`, `"bt"`, or absent/"unknown").
    pub field_order: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioStream {
    pub index: u32,
    pub codec_name: String,
    pub channels: Option<u32>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitleStream {
    pub index: u32,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
    pub format: FormatInfo,
}

mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: u32,
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub channels: Option<u32>,
        pub field_order: Option<String>,
        pub tags: Option<Tags>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Tags {
        pub language: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format
/// <path>` and parses the result.
pub fn probe_file(path: &Path) -> Result<ProbeResult, ProbeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("missing format information in ffprobe output".to_string())
    })?;

    let mut video_streams = Vec::new();
    let mut audio_streams = Vec::new();
    let mut subtitle_streams = Vec::new();

    for stream in streams {
        let codec_type = stream.codec_type.as_deref().unwrap_or("");
        let language = stream
            .tags
            .as_ref()
            .and_then(|t| t.language.clone());

        match codec_type {
            "video" => video_streams.push(VideoStream {
                index: stream.index,
                codec_name: stream.codec_name.clone().unwrap_or_default(),
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                field_order: stream.field_order.clone(),
            }),
            "audio" => audio_streams.push(AudioStream {
                index: stream.index,
                codec_name: stream.codec_name.clone().unwrap_or_default(),
                channels: stream.channels,
                language,
            }),
            "subtitle" => subtitle_streams.push(SubtitleStream {
                index: stream.index,
                language,
            }),
            _ => {}
        }
    }

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(ProbeResult {
        video_streams,
        audio_streams,
        subtitle_streams,
        format: FormatInfo { duration_secs },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffprobe_output_basic() {
        let json = r#"{
            "streams": [
                {
                    "index": 0,
                    "codec_type": "video",
                    "codec_name": "mpeg2video",
                    "width": 720,
                    "height": 576,
                    "field_order": "tt"
                },
                {
                    "index": 1,
                    "codec_type": "audio",
                    "codec_name": "ac3",
                    "channels": 6,
                    "tags": {"language": "deu"}
                },
                {
                    "index": 2,
                    "codec_type": "subtitle",
                    "tags": {"language": "eng"}
                }
            ],
            "format": {"duration": "5400.25"}
        }"#;

        let result = parse_ffprobe_output(json).expect("should parse");
        assert_eq!(result.video_streams.len(), 1);
        assert_eq!(result.video_streams[0].field_order.as_deref(), Some("tt"));
        assert_eq!(result.audio_streams[0].channels, Some(6));
        assert_eq!(result.audio_streams[0].language.as_deref(), Some("deu"));
        assert_eq!(result.subtitle_streams[0].language.as_deref(), Some("eng"));
        assert!((result.format.duration_secs - 5400.25).abs() < 0.001);
    }

    #[test]
    fn test_parse_ffprobe_output_missing_optional_fields() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264"}
            ],
            "format": {"duration": "60.0"}
        }"#;
        let result = parse_ffprobe_output(json).expect("should parse");
        assert_eq!(result.video_streams[0].width, 0);
        assert!(result.video_streams[0].field_order.is_none());
    }
}
