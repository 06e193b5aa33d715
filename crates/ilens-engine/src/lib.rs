//! Camera-to-inventory scanning engine.
//!
//! This crate provides:
//! - Pipeline modes combining cloud identification with on-device backends
//! - Reconciliation of backend output into one canonical detection list
//! - Sequential attribute enrichment
//! - Session aggregation and delivery
//! - Graceful shutdown

pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reconciler;
pub mod session;
pub mod sink;

pub use config::{EngineConfig, DEFAULT_GENERIC_LABELS};
pub use engine::{Backend, EngineBuilder, EngineEvent, ScanEngine};
pub use enrichment::{EnrichmentHandle, EnrichmentJob, EnrichmentQueue};
pub use error::{EngineError, EngineResult};
pub use pipeline::{PipelineMode, PipelinePhase, PipelineState};
pub use reconciler::{IngestOutcome, Reconciler};
pub use session::SessionAggregator;
pub use sink::{JsonInventorySink, NullSink, SessionSink};
