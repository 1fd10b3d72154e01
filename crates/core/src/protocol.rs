//! Job envelope and intake validation.
//!
//! A raw bus payload is validated in a fixed order (§4.1): it must parse as
//! a JSON object, carry the exact supported protocol version, name a usable
//! work set, and carry well-formed `mode`/`source_type`/`interlaced` fields.
//! Nothing is coerced; a mismatch is rejected, not repaired.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use transcode_config::SourceType;

/// The protocol version this worker accepts. Any other value is rejected.
pub const SUPPORTED_VERSION: i64 = 3;

/// Work mode carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Series,
    Movie,
}

impl Mode {
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "series" => Some(Mode::Series),
            "movie" => Some(Mode::Movie),
            _ => None,
        }
    }
}

/// An accepted, validated job envelope (§6.1, protocol v3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub version: i64,
    pub mode: Mode,
    pub source_type: SourceType,
    pub path: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub interlaced: Option<bool>,
    pub movie_name: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing or non-integer `version` field")]
    MissingVersion,

    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: i64, got: i64 },

    #[error("neither `path` nor a non-empty `files` list was provided")]
    NoWorkSet,

    #[error("`mode` is missing, invalid, and could not be inferred from `path`")]
    UnresolvedMode,

    #[error("`source_type` is missing, invalid, and could not be inferred from `path`")]
    UnresolvedSourceType,

    #[error("`interlaced` must be a boolean when present")]
    InvalidInterlacedType,

    #[error("malformed JSON payload: {0}")]
    Json(String),
}

/// Case-insensitive match of any path segment against `needle`.
fn path_contains_segment(path: &std::path::Path, needle: &str) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.eq_ignore_ascii_case(needle))
            .unwrap_or(false)
    })
}

fn infer_mode(path: Option<&std::path::Path>, series_subpath: &str, movie_subpath: &str) -> Option<Mode> {
    let path = path?;
    if path_contains_segment(path, series_subpath) {
        Some(Mode::Series)
    } else if path_contains_segment(path, movie_subpath) {
        Some(Mode::Movie)
    } else {
        None
    }
}

fn infer_source_type(path: Option<&std::path::Path>) -> Option<SourceType> {
    let path = path?;
    if path_contains_segment(path, "dvd") {
        Some(SourceType::Dvd)
    } else if path_contains_segment(path, "bluray") || path_contains_segment(path, "blu-ray") {
        Some(SourceType::Bluray)
    } else {
        None
    }
}

/// Validate a raw JSON payload against the fixed order in §4.1, given the
/// configured series/movie subpath names used for `mode` inference.
pub fn validate_envelope(
    raw: &str,
    series_subpath: &str,
    movie_subpath: &str,
) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::Json(e.to_string()))?;
    let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    let version = obj
        .get("version")
        .and_then(Value::as_i64)
        .ok_or(ProtocolError::MissingVersion)?;
    if version != SUPPORTED_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: SUPPORTED_VERSION,
            got: version,
        });
    }

    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .map(PathBuf::from);

    let files: Vec<PathBuf> = obj
        .get("files")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();

    let path_exists = path.as_deref().is_some_and(|p| p.exists());
    if files.is_empty() && !path_exists {
        return Err(ProtocolError::NoWorkSet);
    }

    let mode = obj
        .get("mode")
        .and_then(Value::as_str)
        .and_then(Mode::parse_loose)
        .or_else(|| infer_mode(path.as_deref(), series_subpath, movie_subpath))
        .ok_or(ProtocolError::UnresolvedMode)?;

    let source_type = obj
        .get("source_type")
        .and_then(Value::as_str)
        .and_then(SourceType::parse_loose)
        .or_else(|| infer_source_type(path.as_deref()))
        .ok_or(ProtocolError::UnresolvedSourceType)?;

    let interlaced = match obj.get("interlaced") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => return Err(ProtocolError::InvalidInterlacedType),
    };

    let movie_name = obj
        .get("movie_name")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Envelope {
        version,
        mode,
        source_type,
        path,
        files,
        interlaced,
        movie_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SERIES: &str = "Serien";
    const MOVIE: &str = "Filme";

    #[test]
    fn test_accepts_well_formed_v3_envelope() {
        let raw = r#"{"version":3,"mode":"series","source_type":"dvd","files":["/raw/dvd/Serien/Show/S01/Show-S01E01.mkv"]}"#;
        let env = validate_envelope(raw, SERIES, MOVIE).expect("should validate");
        assert_eq!(env.version, 3);
        assert_eq!(env.mode, Mode::Series);
        assert_eq!(env.source_type, SourceType::Dvd);
        assert_eq!(env.files.len(), 1);
    }

    #[test]
    fn test_rejects_version_mismatch() {
        let raw = r#"{"version":2,"mode":"movie","source_type":"dvd","files":["/a.mkv"]}"#;
        let err = validate_envelope(raw, SERIES, MOVIE).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::VersionMismatch {
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn test_rejects_higher_version_without_coercion() {
        let raw = r#"{"version":4,"mode":"movie","source_type":"dvd","files":["/a.mkv"]}"#;
        let err = validate_envelope(raw, SERIES, MOVIE).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::VersionMismatch {
                expected: 3,
                got: 4
            }
        );
    }

    #[test]
    fn test_rejects_empty_work_set() {
        let raw = r#"{"version":3,"mode":"movie","source_type":"dvd"}"#;
        assert_eq!(
            validate_envelope(raw, SERIES, MOVIE).unwrap_err(),
            ProtocolError::NoWorkSet
        );
    }

    #[test]
    fn test_infers_mode_from_path_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bluray/Serien/Show/S01");
        std::fs::create_dir_all(&path).unwrap();
        let raw = format!(
            r#"{{"version":3,"source_type":"bluray","path":{:?}}}"#,
            path.to_str().unwrap()
        );
        let env = validate_envelope(&raw, SERIES, MOVIE).expect("should validate via inference");
        assert_eq!(env.mode, Mode::Series);
    }

    #[test]
    fn test_infers_source_type_from_path_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bluray/Filme/Film");
        std::fs::create_dir_all(&path).unwrap();
        let raw = format!(
            r#"{{"version":3,"mode":"movie","path":{:?}}}"#,
            path.to_str().unwrap()
        );
        let env = validate_envelope(&raw, SERIES, MOVIE).expect("should validate via inference");
        assert_eq!(env.source_type, SourceType::Bluray);
    }

    #[test]
    fn test_rejects_nonexistent_path_with_no_files() {
        let raw = r#"{"version":3,"mode":"movie","source_type":"dvd","path":"/raw/does/not/exist"}"#;
        assert_eq!(
            validate_envelope(raw, SERIES, MOVIE).unwrap_err(),
            ProtocolError::NoWorkSet
        );
    }

    #[test]
    fn test_rejects_non_bool_interlaced() {
        let raw = r#"{"version":3,"mode":"movie","source_type":"dvd","files":["/a.mkv"],"interlaced":"yes"}"#;
        assert_eq!(
            validate_envelope(raw, SERIES, MOVIE).unwrap_err(),
            ProtocolError::InvalidInterlacedType
        );
    }

    #[test]
    fn test_rejects_non_object_payload() {
        assert_eq!(
            validate_envelope("[1,2,3]", SERIES, MOVIE).unwrap_err(),
            ProtocolError::NotAnObject
        );
    }

    #[test]
    fn test_movie_name_preserved_as_optional() {
        let raw = r#"{"version":3,"mode":"movie","source_type":"dvd","files":["/a.mkv"],"movie_name":"Film"}"#;
        let env = validate_envelope(raw, SERIES, MOVIE).expect("should validate");
        assert_eq!(env.movie_name.as_deref(), Some("Film"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_strictness(version in any::<i64>()) {
            prop_assume!(version != SUPPORTED_VERSION);
            let raw = format!(
                r#"{{"version":{},"mode":"movie","source_type":"dvd","files":["/a.mkv"]}}"#,
                version
            );
            let result = validate_envelope(&raw, SERIES, MOVIE);
            prop_assert_eq!(
                result.unwrap_err(),
                ProtocolError::VersionMismatch {
                    expected: SUPPORTED_VERSION,
                    got: version,
                }
            );
        }

        #[test]
        fn prop_accepted_envelope_always_has_work_set(
            files in prop::collection::vec("[a-zA-Z0-9/_.-]{3,20}", 1..5),
        ) {
            let files_json: Vec<String> = files.iter().map(|f| format!("\"/raw/{}\"", f)).collect();
            let raw = format!(
                r#"{{"version":3,"mode":"movie","source_type":"dvd","files":[{}]}}"#,
                files_json.join(",")
            );
            let env = validate_envelope(&raw, SERIES, MOVIE).expect("well-formed envelope should validate");
            prop_assert!(!env.files.is_empty());
        }
    }
}
