//! Transcode core
//!
//! Job protocol, durable job queue, transcode worker, and reconciler for
//! the disc-ripping pipeline's central transcode service.

pub mod bus;
pub mod intermediate;
pub mod metrics;
pub mod metrics_server;
pub mod protocol;
pub mod queue;
pub mod reconciler;
pub mod worker;

pub use transcode_config as config;
pub use transcode_config::Config;

pub use bus::{BusError, InMemoryBus, JobBus, MqttBus};
pub use intermediate::{is_container_file, is_intermediate_output, CONTAINER_EXTENSIONS};
pub use metrics::{collect_system_metrics, new_shared_metrics, JobMetrics, MetricsSnapshot, SharedMetrics, SystemMetrics};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use protocol::{validate_envelope, Envelope, Mode, ProtocolError};
pub use queue::{JobQueue, QueueError, QueuedJob};
pub use reconciler::{reconcile, ReconcileError, ReconcilerReport};
pub use worker::{Worker, WorkerError};
