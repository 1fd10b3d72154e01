//! Core configuration structures and loading logic.
//!
//! Layering, lowest to highest priority: `config.toml` structural defaults,
//! an optional `KEY=VALUE` seed file, then real environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Physical media class of an input disc. Controls quality targets and
/// audio defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Dvd,
    Bluray,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Dvd => "dvd",
            SourceType::Bluray => "bluray",
        }
    }

    /// Case-insensitive parse used both for config values and for inferring
    /// source type from path segments / marker file contents.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dvd" => Some(SourceType::Dvd),
            "bluray" | "blu-ray" => Some(SourceType::Bluray),
            _ => None,
        }
    }
}

/// How audio streams are handled in the stream plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioPolicy {
    /// `encode` for bluray sources, `copy` for dvd sources.
    Auto,
    Encode,
    Copy,
}

impl AudioPolicy {
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(AudioPolicy::Auto),
            "encode" => Some(AudioPolicy::Encode),
            "copy" => Some(AudioPolicy::Copy),
            _ => None,
        }
    }

    /// Resolve `Auto` against a source type; `Encode`/`Copy` pass through.
    pub fn resolve(self, source_type: SourceType) -> AudioPolicy {
        match self {
            AudioPolicy::Auto => match source_type {
                SourceType::Bluray => AudioPolicy::Encode,
                SourceType::Dvd => AudioPolicy::Copy,
            },
            other => other,
        }
    }
}

/// Which `JobQueue` backing the worker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Volatile,
    Persistent,
}

impl QueueBackend {
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "volatile" | "memory" | "in-memory" => Some(QueueBackend::Volatile),
            "persistent" | "sqlite" => Some(QueueBackend::Persistent),
            _ => None,
        }
    }
}

/// MQTT broker connection and topic configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_topic_jobs")]
    pub topic_jobs: String,
    #[serde(default = "default_topic_start")]
    pub topic_start: String,
    #[serde(default = "default_topic_done")]
    pub topic_done: String,
    #[serde(default = "default_topic_error")]
    pub topic_error: String,
}

fn default_broker_host() -> String {
    String::new()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_topic_jobs() -> String {
    "media/rip/done".to_string()
}
fn default_topic_start() -> String {
    "media/transcode/start".to_string()
}
fn default_topic_done() -> String {
    "media/transcode/done".to_string()
}
fn default_topic_error() -> String {
    "media/transcode/error".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: String::new(),
            password: String::new(),
            tls: false,
            topic_jobs: default_topic_jobs(),
            topic_start: default_topic_start(),
            topic_done: default_topic_done(),
            topic_error: default_topic_error(),
        }
    }
}

/// Library layout: source and destination roots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default)]
    pub src_base: PathBuf,
    #[serde(default = "default_series_subpath")]
    pub series_subpath: PathBuf,
    #[serde(default = "default_movie_subpath")]
    pub movie_subpath: PathBuf,
    #[serde(default = "default_series_dst_base")]
    pub series_dst_base: PathBuf,
    #[serde(default = "default_movie_dst_base")]
    pub movie_dst_base: PathBuf,
    #[serde(default = "default_source_type")]
    pub default_source_type: SourceType,
}

fn default_series_subpath() -> PathBuf {
    PathBuf::from("Serien")
}
fn default_movie_subpath() -> PathBuf {
    PathBuf::from("Filme")
}
fn default_series_dst_base() -> PathBuf {
    PathBuf::from("/media/Serien")
}
fn default_movie_dst_base() -> PathBuf {
    PathBuf::from("/media/Filme")
}
fn default_source_type() -> SourceType {
    SourceType::Dvd
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src_base: PathBuf::new(),
            series_subpath: default_series_subpath(),
            movie_subpath: default_movie_subpath(),
            series_dst_base: default_series_dst_base(),
            movie_dst_base: default_movie_dst_base(),
            default_source_type: default_source_type(),
        }
    }
}

/// Stream-selection policy: language allow-sets, audio policy, downmix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_audio_policy")]
    pub policy: AudioPolicy,
    #[serde(default = "default_audio_languages")]
    pub audio_languages: Vec<String>,
    #[serde(default = "default_subtitle_languages")]
    pub subtitle_languages: Vec<String>,
    #[serde(default)]
    pub enable_downmix: bool,
}

fn default_audio_policy() -> AudioPolicy {
    AudioPolicy::Copy
}
fn default_audio_languages() -> Vec<String> {
    vec!["deu".to_string(), "eng".to_string()]
}
fn default_subtitle_languages() -> Vec<String> {
    vec!["deu".to_string(), "eng".to_string()]
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            policy: default_audio_policy(),
            audio_languages: default_audio_languages(),
            subtitle_languages: default_subtitle_languages(),
            enable_downmix: false,
        }
    }
}

/// Per-source-type encoder quality targets, kept as a lookup table per
/// SPEC_FULL §4.3 ("DVD-vs-Blu-ray MUST differ").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    #[serde(default = "default_qsv_quality_dvd")]
    pub qsv_global_quality_dvd: i32,
    #[serde(default = "default_qsv_quality_bluray")]
    pub qsv_global_quality_bluray: i32,
    #[serde(default = "default_vaapi_qp_dvd")]
    pub vaapi_qp_dvd: i32,
    #[serde(default = "default_vaapi_qp_bluray")]
    pub vaapi_qp_bluray: i32,
    #[serde(default = "default_sw_crf_dvd")]
    pub sw_crf_dvd: i32,
    #[serde(default = "default_sw_crf_bluray")]
    pub sw_crf_bluray: i32,
    #[serde(default = "default_audio_bitrate_low")]
    pub audio_bitrate_low: String,
    #[serde(default = "default_audio_bitrate_medium")]
    pub audio_bitrate_medium: String,
    #[serde(default = "default_audio_bitrate_high")]
    pub audio_bitrate_high: String,
    #[serde(default = "default_downmix_bitrate")]
    pub downmix_bitrate: String,
}

fn default_qsv_quality_dvd() -> i32 {
    25
}
fn default_qsv_quality_bluray() -> i32 {
    21
}
fn default_vaapi_qp_dvd() -> i32 {
    26
}
fn default_vaapi_qp_bluray() -> i32 {
    22
}
fn default_sw_crf_dvd() -> i32 {
    25
}
fn default_sw_crf_bluray() -> i32 {
    21
}
fn default_audio_bitrate_low() -> String {
    "256k".to_string()
}
fn default_audio_bitrate_medium() -> String {
    "640k".to_string()
}
fn default_audio_bitrate_high() -> String {
    "768k".to_string()
}
fn default_downmix_bitrate() -> String {
    "192k".to_string()
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            qsv_global_quality_dvd: default_qsv_quality_dvd(),
            qsv_global_quality_bluray: default_qsv_quality_bluray(),
            vaapi_qp_dvd: default_vaapi_qp_dvd(),
            vaapi_qp_bluray: default_vaapi_qp_bluray(),
            sw_crf_dvd: default_sw_crf_dvd(),
            sw_crf_bluray: default_sw_crf_bluray(),
            audio_bitrate_low: default_audio_bitrate_low(),
            audio_bitrate_medium: default_audio_bitrate_medium(),
            audio_bitrate_high: default_audio_bitrate_high(),
            downmix_bitrate: default_downmix_bitrate(),
        }
    }
}

/// Encoder state machine configuration: fallback, retries, GPU device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_enable_sw_fallback")]
    pub enable_sw_fallback: bool,
    #[serde(default = "default_max_hw_retries")]
    pub max_hw_retries: u32,
    #[serde(default = "default_gpu_lock_path")]
    pub gpu_lock_path: PathBuf,
    #[serde(default = "default_render_node")]
    pub render_node: PathBuf,
    #[serde(default)]
    pub quality: QualityConfig,
}

fn default_enable_sw_fallback() -> bool {
    true
}
fn default_max_hw_retries() -> u32 {
    2
}
fn default_gpu_lock_path() -> PathBuf {
    PathBuf::from("/var/lock/transcode-gpu.lock")
}
fn default_render_node() -> PathBuf {
    PathBuf::from("/dev/dri/renderD128")
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            enable_sw_fallback: default_enable_sw_fallback(),
            max_hw_retries: default_max_hw_retries(),
            gpu_lock_path: default_gpu_lock_path(),
            render_node: default_render_node(),
            quality: QualityConfig::default(),
        }
    }
}

/// Durable job queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,
    #[serde(default = "default_queue_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Volatile
}
fn default_queue_db_path() -> PathBuf {
    PathBuf::from("/var/lib/transcode-worker/queue.sqlite3")
}
fn default_poll_interval_secs() -> u64 {
    2
}
fn default_claim_ttl_secs() -> u64 {
    3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            db_path: default_queue_db_path(),
            poll_interval_secs: default_poll_interval_secs(),
            claim_ttl_secs: default_claim_ttl_secs(),
        }
    }
}

/// Reconciler batching and probe-failure behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcilerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub include_probe_failures: bool,
}

fn default_batch_size() -> usize {
    5
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            include_probe_failures: false,
        }
    }
}

/// Top-level configuration, built once at startup and threaded explicitly
/// through the queue, intake validator, worker, and reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load a `KEY=VALUE` seed file and apply each pair via `env::set_var`
    /// for any key not already present in the environment. Malformed lines
    /// and comments (`#`) are skipped. Missing files are not an error.
    ///
    /// Mirrors the original `rescan.py::load_env_file` behavior: an env file
    /// only fills gaps, it never overrides a variable already set.
    pub fn load_env_file<P: AsRef<Path>>(path: P) {
        let path = path.as_ref();
        let Ok(content) = fs::read_to_string(path) else {
            return;
        };
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || env::var_os(key).is_some() {
                continue;
            }
            env::set_var(key, value.trim());
        }
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        let vars: HashMap<String, String> = env::vars().collect();

        if let Some(v) = vars.get("MQTT_HOST") {
            self.broker.host = v.clone();
        }
        if let Some(v) = vars.get("MQTT_PORT").and_then(|v| v.parse().ok()) {
            self.broker.port = v;
        }
        if let Some(v) = vars.get("MQTT_USER") {
            self.broker.username = v.clone();
        }
        if let Some(v) = vars.get("MQTT_PASSWORD") {
            self.broker.password = v.clone();
        }
        if let Some(v) = vars.get("MQTT_SSL") {
            self.broker.tls = parse_bool_loose(v).unwrap_or(self.broker.tls);
        }
        if let Some(v) = vars.get("MQTT_TOPIC") {
            self.broker.topic_jobs = v.clone();
        }
        if let Some(v) = vars.get("MQTT_TOPIC_START") {
            self.broker.topic_start = v.clone();
        }
        if let Some(v) = vars.get("MQTT_TOPIC_DONE") {
            self.broker.topic_done = v.clone();
        }
        if let Some(v) = vars.get("MQTT_TOPIC_ERROR") {
            self.broker.topic_error = v.clone();
        }

        if let Some(v) = vars.get("SRC_BASE") {
            self.paths.src_base = PathBuf::from(v);
        }
        if let Some(v) = vars.get("SERIES_SUBPATH") {
            self.paths.series_subpath = PathBuf::from(v);
        }
        if let Some(v) = vars.get("MOVIE_SUBPATH") {
            self.paths.movie_subpath = PathBuf::from(v);
        }
        if let Some(v) = vars.get("SERIES_DST_BASE") {
            self.paths.series_dst_base = PathBuf::from(v);
        }
        if let Some(v) = vars.get("MOVIE_DST_BASE") {
            self.paths.movie_dst_base = PathBuf::from(v);
        }
        if let Some(v) = vars.get("DEFAULT_SOURCE_TYPE").and_then(|v| SourceType::parse_loose(v)) {
            self.paths.default_source_type = v;
        }

        if let Some(v) = vars.get("AUDIO_MODE").and_then(|v| AudioPolicy::parse_loose(v)) {
            self.audio.policy = v;
        }
        if let Some(v) = vars.get("AUDIO_LANGUAGES") {
            self.audio.audio_languages = split_csv(v);
        }
        if let Some(v) = vars.get("SUBTITLE_LANGUAGES") {
            self.audio.subtitle_languages = split_csv(v);
        }
        if let Some(v) = vars.get("ENABLE_AAC_DOWNMIX") {
            self.audio.enable_downmix = parse_bool_loose(v).unwrap_or(self.audio.enable_downmix);
        }

        if let Some(v) = vars.get("ENABLE_SW_FALLBACK") {
            self.encoder.enable_sw_fallback =
                parse_bool_loose(v).unwrap_or(self.encoder.enable_sw_fallback);
        }
        if let Some(v) = vars.get("MAX_HW_RETRIES").and_then(|v| v.parse().ok()) {
            self.encoder.max_hw_retries = v;
        }
        if let Some(v) = vars.get("GPU_LOCK_PATH") {
            self.encoder.gpu_lock_path = PathBuf::from(v);
        }
        if let Some(v) = vars.get("RENDER_NODE") {
            self.encoder.render_node = PathBuf::from(v);
        }

        if let Some(v) = vars.get("QUEUE_BACKEND").and_then(|v| QueueBackend::parse_loose(v)) {
            self.queue.backend = v;
        }
        if let Some(v) = vars.get("QUEUE_DB_PATH") {
            self.queue.db_path = PathBuf::from(v);
        }
        if let Some(v) = vars.get("QUEUE_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.queue.poll_interval_secs = v;
        }
        if let Some(v) = vars.get("QUEUE_CLAIM_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.queue.claim_ttl_secs = v;
        }

        if let Some(v) = vars.get("RECONCILER_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.reconciler.batch_size = v;
        }
        if let Some(v) = vars.get("RECONCILER_INCLUDE_PROBE_FAILURES") {
            self.reconciler.include_probe_failures =
                parse_bool_loose(v).unwrap_or(self.reconciler.include_probe_failures);
        }
    }

    /// Validate cross-field invariants not expressible through serde alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.series_subpath.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "paths.series_subpath",
                reason: "must be relative".to_string(),
            });
        }
        if self.paths.movie_subpath.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "paths.movie_subpath",
                reason: "must be relative".to_string(),
            });
        }
        Ok(())
    }

    /// Load configuration from a TOML file, seed it from an optional
    /// `KEY=VALUE` file, then apply real environment overrides.
    pub fn load<P: AsRef<Path>>(toml_path: P, env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(toml_path)?;
        if let Some(env_file) = env_file {
            Self::load_env_file(env_file);
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn parse_bool_loose(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
