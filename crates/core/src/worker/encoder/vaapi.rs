//! VAAPI hardware encoder command (§4.3.1): `bwdif` deinterlacing in
//! software before `format=p010le,hwupload=extra_hw_frames=64`, `hevc_vaapi`
//! at a fixed QP per source type.

use super::{stream_map_args, EncodeRequest};
use transcode_config::SourceType;

pub(crate) fn build_command(request: &EncodeRequest) -> Vec<String> {
    let qp = match request.source_type {
        SourceType::Dvd => request.quality.vaapi_qp_dvd,
        SourceType::Bluray => request.quality.vaapi_qp_bluray,
    };

    let filter = if request.interlace.interlaced {
        "bwdif,format=p010le,hwupload=extra_hw_frames=64".to_string()
    } else {
        "format=p010le,hwupload=extra_hw_frames=64".to_string()
    };

    let mut args = vec![
        "-hwaccel".to_string(),
        "vaapi".to_string(),
        "-hwaccel_device".to_string(),
        "/dev/dri/renderD128".to_string(),
        "-i".to_string(),
        request.source.to_string_lossy().into_owned(),
        "-vf".to_string(),
        filter,
        "-c:v".to_string(),
        "hevc_vaapi".to_string(),
        "-qp".to_string(),
        qp.to_string(),
    ];

    args.extend(stream_map_args(request.plan));
    args.push("-y".to_string());
    args.push(request.destination.to_string_lossy().into_owned());
    args
}
