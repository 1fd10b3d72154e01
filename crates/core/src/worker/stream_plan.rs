//! Stream-selection policy (§4.3): language filtering with an all-audio
//! fallback, audio policy resolution, channel-aware bitrate selection, and
//! optional stereo downmix.

use super::probe::{AudioStream, ProbeResult, SubtitleStream};
use serde::{Deserialize, Serialize};
use transcode_config::{AudioConfig, AudioPolicy, QualityConfig, SourceType};

/// A single resolved output audio stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioPlan {
    pub source_index: u32,
    pub channels: Option<u32>,
    pub language: Option<String>,
    pub encode: bool,
    pub bitrate: Option<String>,
}

/// The resolved stereo downmix track, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownmixPlan {
    pub source_index: u32,
    pub bitrate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitlePlan {
    pub source_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamPlan {
    pub audio: Vec<AudioPlan>,
    pub downmix: Option<DownmixPlan>,
    pub subtitles: Vec<SubtitlePlan>,
}

fn language_matches(stream_language: Option<&str>, allow: &[String]) -> bool {
    match stream_language {
        Some(lang) => allow.iter().any(|a| a.eq_ignore_ascii_case(lang)),
        // A stream with no language tag can't be matched against an
        // allow-set; treat it as not matching so the fallback rule decides.
        None => false,
    }
}

/// Apply the language allow-set to audio streams, falling back to "keep
/// all" if the filter would otherwise drop every stream (§8 "Language
/// filter safety").
fn filter_audio<'a>(
    streams: &'a [AudioStream],
    allow: &[String],
) -> Vec<&'a AudioStream> {
    let filtered: Vec<&AudioStream> = streams
        .iter()
        .filter(|s| language_matches(s.language.as_deref(), allow))
        .collect();
    if filtered.is_empty() && !streams.is_empty() {
        streams.iter().collect()
    } else {
        filtered
    }
}

fn filter_subtitles<'a>(
    streams: &'a [SubtitleStream],
    allow: &[String],
) -> Vec<&'a SubtitleStream> {
    streams
        .iter()
        .filter(|s| language_matches(s.language.as_deref(), allow))
        .collect()
}

/// Choose a bitrate for one audio stream by channel count (§4.3): ≤2ch low;
/// >2ch medium on DVD, high on Blu-ray; unknown count → medium.
fn bitrate_for(channels: Option<u32>, source_type: SourceType, quality: &QualityConfig) -> String {
    match channels {
        Some(c) if c <= 2 => quality.audio_bitrate_low.clone(),
        Some(_) => match source_type {
            SourceType::Dvd => quality.audio_bitrate_medium.clone(),
            SourceType::Bluray => quality.audio_bitrate_high.clone(),
        },
        None => quality.audio_bitrate_medium.clone(),
    }
}

/// Resolve the full stream plan for one work item.
pub fn resolve_stream_plan(
    probe: &ProbeResult,
    source_type: SourceType,
    audio_config: &AudioConfig,
    quality: &QualityConfig,
) -> StreamPlan {
    let policy = audio_config.policy.resolve(source_type);
    let selected_audio = filter_audio(&probe.audio_streams, &audio_config.audio_languages);
    let selected_subtitles = filter_subtitles(&probe.subtitle_streams, &audio_config.subtitle_languages);

    let encode = policy == AudioPolicy::Encode;
    let audio: Vec<AudioPlan> = selected_audio
        .iter()
        .map(|s| AudioPlan {
            source_index: s.index,
            channels: s.channels,
            language: s.language.clone(),
            encode,
            bitrate: if encode {
                Some(bitrate_for(s.channels, source_type, quality))
            } else {
                None
            },
        })
        .collect();

    let downmix = if audio_config.enable_downmix && policy != AudioPolicy::Copy {
        audio.first().map(|first| DownmixPlan {
            source_index: first.source_index,
            bitrate: quality.downmix_bitrate.clone(),
        })
    } else {
        None
    };

    let subtitles = selected_subtitles
        .iter()
        .map(|s| SubtitlePlan {
            source_index: s.index,
        })
        .collect();

    StreamPlan {
        audio,
        downmix,
        subtitles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::probe::FormatInfo;
    use proptest::prelude::*;

    fn probe_with_audio(streams: Vec<AudioStream>) -> ProbeResult {
        ProbeResult {
            video_streams: vec![],
            audio_streams: streams,
            subtitle_streams: vec![],
            format: FormatInfo { duration_secs: 100.0 },
        }
    }

    fn audio(index: u32, channels: Option<u32>, lang: Option<&str>) -> AudioStream {
        AudioStream {
            index,
            codec_name: "ac3".to_string(),
            channels,
            language: lang.map(str::to_string),
        }
    }

    #[test]
    fn test_language_filter_keeps_matching_only() {
        let probe = probe_with_audio(vec![
            audio(1, Some(6), Some("deu")),
            audio(2, Some(2), Some("fra")),
        ]);
        let audio_config = AudioConfig {
            policy: AudioPolicy::Copy,
            audio_languages: vec!["deu".to_string()],
            subtitle_languages: vec![],
            enable_downmix: false,
        };
        let plan = resolve_stream_plan(&probe, SourceType::Dvd, &audio_config, &QualityConfig::default());
        assert_eq!(plan.audio.len(), 1);
        assert_eq!(plan.audio[0].source_index, 1);
    }

    #[test]
    fn test_language_filter_falls_back_to_all_when_nothing_matches() {
        let probe = probe_with_audio(vec![audio(1, Some(2), Some("jpn"))]);
        let audio_config = AudioConfig {
            policy: AudioPolicy::Copy,
            audio_languages: vec!["deu".to_string(), "eng".to_string()],
            subtitle_languages: vec![],
            enable_downmix: false,
        };
        let plan = resolve_stream_plan(&probe, SourceType::Dvd, &audio_config, &QualityConfig::default());
        assert_eq!(plan.audio.len(), 1, "fallback should keep the only stream");
    }

    #[test]
    fn test_auto_policy_encodes_bluray_copies_dvd() {
        let probe = probe_with_audio(vec![audio(1, Some(6), Some("deu"))]);
        let audio_config = AudioConfig {
            policy: AudioPolicy::Auto,
            audio_languages: vec!["deu".to_string()],
            subtitle_languages: vec![],
            enable_downmix: false,
        };
        let quality = QualityConfig::default();

        let bluray_plan = resolve_stream_plan(&probe, SourceType::Bluray, &audio_config, &quality);
        assert!(bluray_plan.audio[0].encode);
        assert_eq!(bluray_plan.audio[0].bitrate.as_deref(), Some("768k"));

        let dvd_plan = resolve_stream_plan(&probe, SourceType::Dvd, &audio_config, &quality);
        assert!(!dvd_plan.audio[0].encode);
        assert!(dvd_plan.audio[0].bitrate.is_none());
    }

    #[test]
    fn test_bitrate_selection_by_channel_count() {
        let quality = QualityConfig::default();
        assert_eq!(bitrate_for(Some(2), SourceType::Dvd, &quality), "256k");
        assert_eq!(bitrate_for(Some(6), SourceType::Dvd, &quality), "640k");
        assert_eq!(bitrate_for(Some(6), SourceType::Bluray, &quality), "768k");
        assert_eq!(bitrate_for(None, SourceType::Dvd, &quality), "640k");
    }

    #[test]
    fn test_downmix_added_when_enabled_and_not_copy() {
        let probe = probe_with_audio(vec![audio(1, Some(6), Some("deu"))]);
        let audio_config = AudioConfig {
            policy: AudioPolicy::Encode,
            audio_languages: vec!["deu".to_string()],
            subtitle_languages: vec![],
            enable_downmix: true,
        };
        let plan = resolve_stream_plan(&probe, SourceType::Bluray, &audio_config, &QualityConfig::default());
        let downmix = plan.downmix.expect("downmix should be present");
        assert_eq!(downmix.source_index, 1);
        assert_eq!(downmix.bitrate, "192k");
    }

    #[test]
    fn test_downmix_omitted_when_policy_is_copy() {
        let probe = probe_with_audio(vec![audio(1, Some(6), Some("deu"))]);
        let audio_config = AudioConfig {
            policy: AudioPolicy::Copy,
            audio_languages: vec!["deu".to_string()],
            subtitle_languages: vec![],
            enable_downmix: true,
        };
        let plan = resolve_stream_plan(&probe, SourceType::Dvd, &audio_config, &QualityConfig::default());
        assert!(plan.downmix.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_language_filter_safety(
            channels in proptest::option::of(1u32..8),
            lang in "[a-z]{3}",
            allow in prop::collection::vec("[a-z]{3}", 0..3),
        ) {
            let probe = probe_with_audio(vec![audio(1, channels, Some(&lang))]);
            let audio_config = AudioConfig {
                policy: AudioPolicy::Copy,
                audio_languages: allow,
                subtitle_languages: vec![],
                enable_downmix: false,
            };
            let plan = resolve_stream_plan(&probe, SourceType::Dvd, &audio_config, &QualityConfig::default());
            prop_assert!(!plan.audio.is_empty(), "input had one audio stream, output must keep at least one");
        }
    }
}
