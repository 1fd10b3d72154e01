//! Software fallback encoder command (§4.3.1): plain `bwdif` deinterlacing,
//! `libx265` at a fixed CRF per source type. Always the last state in the
//! chain and never holds the GPU lock.

use super::{stream_map_args, EncodeRequest};
use transcode_config::SourceType;

pub(crate) fn build_command(request: &EncodeRequest) -> Vec<String> {
    let crf = match request.source_type {
        SourceType::Dvd => request.quality.sw_crf_dvd,
        SourceType::Bluray => request.quality.sw_crf_bluray,
    };

    let mut args = vec![
        "-i".to_string(),
        request.source.to_string_lossy().into_owned(),
    ];

    if request.interlace.interlaced {
        args.push("-vf".to_string());
        args.push("bwdif".to_string());
    }

    args.push("-c:v".to_string());
    args.push("libx265".to_string());
    args.push("-crf".to_string());
    args.push(crf.to_string());

    args.extend(stream_map_args(request.plan));
    args.push("-y".to_string());
    args.push(request.destination.to_string_lossy().into_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::interlace::{InterlaceDecision, InterlaceSource};
    use crate::worker::stream_plan::StreamPlan;
    use std::path::PathBuf;
    use transcode_config::QualityConfig;

    #[test]
    fn test_interlaced_applies_bwdif() {
        let plan = StreamPlan {
            audio: vec![],
            downmix: None,
            subtitles: vec![],
        };
        let quality = QualityConfig::default();
        let source = PathBuf::from("/raw/in.mkv");
        let dest = PathBuf::from("/out/out.mkv");
        let request = EncodeRequest {
            source: &source,
            destination: &dest,
            source_type: SourceType::Dvd,
            interlace: InterlaceDecision {
                interlaced: true,
                source: InterlaceSource::DefaultedInterlaced,
            },
            plan: &plan,
            quality: &quality,
            skip_qsv: false,
        };
        let args = build_command(&request);
        assert!(args.contains(&"bwdif".to_string()));
        assert!(args.contains(&"25".to_string()));
    }

    #[test]
    fn test_progressive_no_vf_flag() {
        let plan = StreamPlan {
            audio: vec![],
            downmix: None,
            subtitles: vec![],
        };
        let quality = QualityConfig::default();
        let source = PathBuf::from("/raw/in.mkv");
        let dest = PathBuf::from("/out/out.mkv");
        let request = EncodeRequest {
            source: &source,
            destination: &dest,
            source_type: SourceType::Bluray,
            interlace: InterlaceDecision {
                interlaced: false,
                source: InterlaceSource::Metadata,
            },
            plan: &plan,
            quality: &quality,
            skip_qsv: false,
        };
        let args = build_command(&request);
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.contains(&"21".to_string()));
    }
}
