//! Intel Quick Sync hardware encoder command (§4.3.1): `vpp_qsv`
//! deinterlacing toggle, `hevc_qsv` at a per-source-type global quality.

use super::{stream_map_args, EncodeRequest};
use transcode_config::SourceType;

pub(crate) fn build_command(request: &EncodeRequest) -> Vec<String> {
    let deinterlace = if request.interlace.interlaced { "1" } else { "0" };
    let global_quality = match request.source_type {
        SourceType::Dvd => request.quality.qsv_global_quality_dvd,
        SourceType::Bluray => request.quality.qsv_global_quality_bluray,
    };

    let mut args = vec![
        "-hwaccel".to_string(),
        "qsv".to_string(),
        "-hwaccel_output_format".to_string(),
        "qsv".to_string(),
        "-i".to_string(),
        request.source.to_string_lossy().into_owned(),
        "-vf".to_string(),
        format!("vpp_qsv=deinterlace={deinterlace}"),
        "-c:v".to_string(),
        "hevc_qsv".to_string(),
        "-global_quality".to_string(),
        global_quality.to_string(),
    ];

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
    fn test_deinterlace_flag_reflects_decision() {
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
                source: InterlaceSource::Metadata,
            },
            plan: &plan,
            quality: &quality,
            skip_qsv: false,
        };
        let args = build_command(&request);
        assert!(args.contains(&"vpp_qsv=deinterlace=1".to_string()));
        assert!(args.contains(&"25".to_string()));
    }

    #[test]
    fn test_progressive_disables_deinterlace() {
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
        assert!(args.contains(&"vpp_qsv=deinterlace=0".to_string()));
        assert!(args.contains(&"21".to_string()));
    }
}
