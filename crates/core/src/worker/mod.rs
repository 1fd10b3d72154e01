//! Transcode worker (§4.3, §5): the single per-host consumer loop that
//! claims jobs off the queue, enumerates work items, runs each through the
//! encoder state machine under the host GPU lock, and reports lifecycle
//! events on the bus.

pub mod encoder;
pub mod enumerate;
pub mod gpu_lock;
pub mod interlace;
pub mod probe;
pub mod startup;
pub mod stream_plan;
pub mod verify;

use crate::bus::{BusError, JobBus};
use crate::metrics::{JobMetrics, MetricsSnapshot, SharedMetrics};
use crate::queue::{JobQueue, QueueError, QueueId, QueuedJob};
use encoder::{encoder_state_label, EncodeAttempt, EncodeError, EncoderKind};
use enumerate::{enumerate_work_items, WorkItem};
use gpu_lock::{GpuLock, GpuLockError};
use interlace::{resolve_interlace, sample_frame_interlacing, InterlaceError, DEFAULT_SAMPLE_FRAMES};
use probe::{probe_file, ProbeError};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use stream_plan::resolve_stream_plan;
use thiserror::Error;
use transcode_config::Config;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    GpuLock(#[from] GpuLockError),
}

/// Source codecs that QSV cannot hardware-decode, forcing the VAAPI path
/// directly (§4.3 "codec-specific source exception").
const QSV_SKIP_CODECS: &[&str] = &["vc1"];

/// Build the metrics entry for a work item at the moment it starts
/// encoding, before any hardware attempt has run.
fn initial_job_metric(job_id: QueueId, item: &WorkItem, initial_encoder: EncoderKind) -> JobMetrics {
    JobMetrics {
        id: format!("job-{job_id}"),
        input_path: item.source.to_string_lossy().to_string(),
        stage: "encoding".to_string(),
        encoder: initial_encoder.label().to_string(),
        encoder_state: encoder_state_label(initial_encoder).to_string(),
        hw_attempt: 0,
        size_in_bytes_before: std::fs::metadata(&item.source).map(|m| m.len()).unwrap_or(0),
        size_in_bytes_after: 0,
    }
}

/// Insert or replace the metrics entry with a matching id.
fn upsert_job_metric(jobs: &mut Vec<JobMetrics>, metric: JobMetrics) {
    match jobs.iter_mut().find(|j| j.id == metric.id) {
        Some(existing) => *existing = metric,
        None => jobs.push(metric),
    }
}

/// Apply a single encoder attempt event to the matching job entry.
fn apply_attempt(jobs: &mut [JobMetrics], job_id: &str, attempt: EncodeAttempt) {
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
        job.encoder = attempt.encoder.label().to_string();
        job.encoder_state = encoder_state_label(attempt.encoder).to_string();
        job.hw_attempt = attempt.attempt_number;
    }
}

/// Remove a finished item's metrics entry, crediting `total_bytes_encoded`
/// when it completed successfully.
fn finish_job_metric(snapshot: &mut MetricsSnapshot, job_id: &str, bytes_encoded: Option<u64>) {
    snapshot.jobs.retain(|j| j.id != job_id);
    if let Some(bytes) = bytes_encoded {
        snapshot.total_bytes_encoded += bytes;
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The transcode worker: one claimed job at a time, strictly serialized.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    bus: Arc<dyn JobBus>,
    config: Config,
    metrics: SharedMetrics,
    gpu_lock: Option<GpuLock>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        bus: Arc<dyn JobBus>,
        config: Config,
        metrics: SharedMetrics,
    ) -> Result<Self, GpuLockError> {
        let gpu_lock = GpuLock::open(&config.encoder.gpu_lock_path)?;
        Ok(Self {
            queue,
            bus,
            config,
            metrics,
            gpu_lock: Some(gpu_lock),
        })
    }

    /// Run forever, pulling one job at a time and processing it to
    /// completion before the next `get`.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        loop {
            let job = self.queue.get().await?;
            self.run_job(job).await?;
        }
    }

    /// Process a single claimed job: enumerate items, run each to
    /// completion, then acknowledge the queue. An item-level failure is
    /// reported and the worker moves on; it never causes a requeue (§7).
    async fn run_job(&mut self, job: QueuedJob) -> Result<(), WorkerError> {
        let items = enumerate_work_items(&job.envelope, &self.config.paths);
        {
            let mut snapshot = self.metrics.write().await;
            snapshot.running_jobs = 1;
        }

        for item in items {
            if let Err(err) = self
                .run_item(job.id, &item, job.envelope.source_type, job.envelope.interlaced)
                .await
            {
                tracing::warn!(source = %item.source.display(), error = %err, "work item failed");
                self.publish_error(&item, &err.to_string()).await?;
                let mut snapshot = self.metrics.write().await;
                snapshot.failed_jobs += 1;
            } else {
                let mut snapshot = self.metrics.write().await;
                snapshot.completed_jobs += 1;
            }
        }

        {
            let mut snapshot = self.metrics.write().await;
            snapshot.running_jobs = 0;
        }
        self.queue.task_done(job.id).await?;
        Ok(())
    }

    async fn run_item(
        &mut self,
        job_id: QueueId,
        item: &WorkItem,
        source_type: transcode_config::SourceType,
        interlace_hint: Option<bool>,
    ) -> Result<(), ItemError> {
        let probe = probe_file(&item.source)?;
        let plan = resolve_stream_plan(&probe, source_type, &self.config.audio, &self.config.encoder.quality);

        let primary_video = probe.video_streams.first();
        let field_order = primary_video.and_then(|v| v.field_order.as_deref());
        let decision = if interlace_hint.is_some() {
            resolve_interlace(interlace_hint, field_order, None)
        } else if field_order.is_some() {
            resolve_interlace(None, field_order, None)
        } else {
            let samples = sample_frame_interlacing(&item.source, DEFAULT_SAMPLE_FRAMES).ok();
            resolve_interlace(None, None, samples)
        };

        let skip_qsv = primary_video
            .map(|v| QSV_SKIP_CODECS.contains(&v.codec_name.to_lowercase().as_str()))
            .unwrap_or(false);

        let initial_encoder = if skip_qsv { EncoderKind::Vaapi } else { EncoderKind::Qsv };
        self.publish_start(item, initial_encoder).await.map_err(ItemError::Bus)?;

        let job_metric = initial_job_metric(job_id, item, initial_encoder);
        let job_metric_id = job_metric.id.clone();
        {
            let mut snapshot = self.metrics.write().await;
            upsert_job_metric(&mut snapshot.jobs, job_metric);
        }

        let source = item.source.clone();
        let destination = item.destination.clone();
        let quality = self.config.encoder.quality.clone();
        let max_hw_retries = self.config.encoder.max_hw_retries;
        let enable_sw_fallback = self.config.encoder.enable_sw_fallback;
        let mut gpu_lock = self.gpu_lock.take().expect("gpu lock present for lifetime of worker");

        let (attempt_tx, mut attempt_rx) = tokio::sync::mpsc::unbounded_channel::<EncodeAttempt>();
        let metrics_for_drain = self.metrics.clone();
        let drain_job_id = job_metric_id.clone();
        let drain_handle = tokio::spawn(async move {
            while let Some(attempt) = attempt_rx.recv().await {
                let mut snapshot = metrics_for_drain.write().await;
                apply_attempt(&mut snapshot.jobs, &drain_job_id, attempt);
            }
        });

        let (gpu_lock, encode_result) = tokio::task::spawn_blocking(move || {
            let request = encoder::EncodeRequest {
                source: &source,
                destination: &destination,
                source_type,
                interlace: decision,
                plan: &plan,
                quality: &quality,
                skip_qsv,
            };
            let result = encoder::run_state_machine(&request, &mut gpu_lock, max_hw_retries, enable_sw_fallback, move |attempt| {
                tracing::info!(encoder = attempt.encoder.label(), attempt = attempt.attempt_number, "encoder attempt");
                let _ = attempt_tx.send(attempt);
            });
            (gpu_lock, result)
        })
        .await
        .expect("encoder task panicked");

        drain_handle.await.expect("metrics drain task panicked");
        self.gpu_lock = Some(gpu_lock);

        match encode_result {
            Ok(used) => {
                if let Ok(output_probe) = probe_file(&item.destination) {
                    if verify::duration_mismatch_warrants_warning(probe.format.duration_secs, output_probe.format.duration_secs) {
                        tracing::warn!(
                            source = %item.source.display(),
                            input_secs = probe.format.duration_secs,
                            output_secs = output_probe.format.duration_secs,
                            "output duration deviates from input beyond tolerance"
                        );
                    }
                }
                let size_in_bytes_after = std::fs::metadata(&item.destination).map(|m| m.len()).unwrap_or(0);
                {
                    let mut snapshot = self.metrics.write().await;
                    finish_job_metric(&mut snapshot, &job_metric_id, Some(size_in_bytes_after));
                }
                self.publish_done(item, used).await.map_err(ItemError::Bus)?;
                Ok(())
            }
            Err(err) => {
                let mut snapshot = self.metrics.write().await;
                finish_job_metric(&mut snapshot, &job_metric_id, None);
                Err(ItemError::Encode(err))
            }
        }
    }

    async fn publish_start(&self, item: &WorkItem, encoder: EncoderKind) -> Result<(), BusError> {
        let payload = json!({
            "version": crate::protocol::SUPPORTED_VERSION,
            "source": item.source.to_string_lossy(),
            "destination": item.destination.to_string_lossy(),
            "encoder": encoder.label(),
            "timestamp": unix_timestamp(),
        })
        .to_string();
        self.bus.publish(&self.config.broker.topic_start, &payload).await
    }

    async fn publish_done(&self, item: &WorkItem, encoder: EncoderKind) -> Result<(), BusError> {
        let payload = json!({
            "version": crate::protocol::SUPPORTED_VERSION,
            "destination": item.destination.to_string_lossy(),
            "encoder": encoder.label(),
            "timestamp": unix_timestamp(),
        })
        .to_string();
        self.bus.publish(&self.config.broker.topic_done, &payload).await
    }

    async fn publish_error(&self, item: &WorkItem, message: &str) -> Result<(), WorkerError> {
        let payload = json!({
            "version": crate::protocol::SUPPORTED_VERSION,
            "source": item.source.to_string_lossy(),
            "error": message,
            "timestamp": unix_timestamp(),
        })
        .to_string();
        self.bus
            .publish(&self.config.broker.topic_error, &payload)
            .await
            .map_err(WorkerError::from)
    }
}

#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Interlace(#[from] InterlaceError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Bus(BusError),
}
