//! Sequential enrichment queue.
//!
//! Detections enter with a name and little else; enrichment asks the
//! cloud model for brand, color, size and category one item at a time.
//! The queue is strictly FIFO with one request in flight and a fixed
//! pause between dispatches, so enrichment never competes with live
//! identification for quota. Failed or unusable replies are dropped and
//! the detection keeps its unenriched state.

use std::sync::Arc;
use std::time::Duration;

use ilens_models::{DetectionId, Frame};
use ilens_vision::GeminiVision;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics;
use crate::reconciler::Reconciler;

/// One queued enrichment request.
#[derive(Debug)]
pub enum EnrichmentJob {
    /// Ask about the named item using its full source frame.
    WholeItem {
        id: DetectionId,
        frame: Arc<Frame>,
        name: String,
    },
    /// Ask about a pre-cropped item image. The label is a hint only.
    Crop {
        id: DetectionId,
        jpeg: Vec<u8>,
        label: String,
    },
}

impl EnrichmentJob {
    fn detection_id(&self) -> &DetectionId {
        match self {
            EnrichmentJob::WholeItem { id, .. } => id,
            EnrichmentJob::Crop { id, .. } => id,
        }
    }
}

/// Cloneable submit side of the queue, held by the ingest loops.
#[derive(Clone)]
pub struct EnrichmentHandle {
    tx: mpsc::UnboundedSender<EnrichmentJob>,
}

impl EnrichmentHandle {
    pub fn enqueue(&self, job: EnrichmentJob) {
        if self.tx.send(job).is_err() {
            debug!("enrichment worker is gone, job dropped");
        }
    }
}

/// Owns the enrichment worker task for one session.
pub struct EnrichmentQueue {
    tx: mpsc::UnboundedSender<EnrichmentJob>,
    cancel: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl EnrichmentQueue {
    pub fn spawn(
        vision: Arc<GeminiVision>,
        reconciler: Arc<Mutex<Reconciler>>,
        gap: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel, cancel_rx) = watch::channel(false);
        let worker = tokio::spawn(Self::run(vision, reconciler, rx, cancel_rx, gap));
        Self { tx, cancel, worker }
    }

    pub fn handle(&self) -> EnrichmentHandle {
        EnrichmentHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn enqueue(&self, job: EnrichmentJob) {
        self.handle().enqueue(job);
    }

    /// Stop the worker. Pending jobs are dropped; an in-flight dispatch
    /// is aborted without applying its result.
    pub fn cancel_all(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait for the worker to wind down.
    pub async fn shutdown(self) {
        self.cancel_all();
        let _ = self.worker.await;
    }

    async fn run(
        vision: Arc<GeminiVision>,
        reconciler: Arc<Mutex<Reconciler>>,
        mut rx: mpsc::UnboundedReceiver<EnrichmentJob>,
        mut cancel: watch::Receiver<bool>,
        gap: Duration,
    ) {
        loop {
            // The cancel flag only ever flips to true, so any change
            // means shutdown.
            let job = tokio::select! {
                _ = cancel.changed() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let id = job.detection_id().clone();
            tokio::select! {
                _ = cancel.changed() => {
                    debug!(detection_id = %id, "enrichment cancelled mid-flight");
                    metrics::record_enrichment_job("cancelled");
                    break;
                }
                outcome = Self::dispatch(&vision, &reconciler, job) => {
                    metrics::record_enrichment_job(outcome);
                }
            }

            // Fixed pause between dispatches, not before the first.
            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(gap) => {}
            }
        }
    }

    async fn dispatch(
        vision: &GeminiVision,
        reconciler: &Mutex<Reconciler>,
        job: EnrichmentJob,
    ) -> &'static str {
        let (id, result) = match job {
            EnrichmentJob::WholeItem { id, frame, name } => {
                let result = vision.enrich_item(&frame, &name).await;
                (id, result)
            }
            EnrichmentJob::Crop { id, jpeg, label } => {
                let result = vision.enrich_crop(&jpeg, &label).await;
                (id, result)
            }
        };

        match result {
            Ok(Some(reply)) => {
                if reconciler.lock().await.apply_enrichment(&id, reply) {
                    debug!(detection_id = %id, "enrichment applied");
                    "applied"
                } else {
                    "target_gone"
                }
            }
            Ok(None) => {
                debug!(detection_id = %id, "enrichment reply unusable, dropped");
                "unusable"
            }
            Err(e) => {
                warn!(detection_id = %id, error = %e, "enrichment request failed, dropped");
                "failed"
            }
        }
    }
}
