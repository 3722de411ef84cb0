use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{info, warn};

use crate::config::ValidationMode;
use crate::inference::request::PredictionRequest;

#[derive(Debug)]
pub enum PredictorError {
    /// The request body does not describe a usable feature vector
    Validation(String),
    /// The predictor program could not be started
    Spawn(String),
    /// The predictor program exited unsuccessfully
    SubprocessFailure { code: Option<i32>, stderr: String },
    /// The predictor finished but did not produce a JSON document
    MalformedOutput(String),
    /// The prediction service could not be reached or answered with an error
    RemoteFailure { status: Option<u16>, body: String },
    /// Every prediction slot and queue position is taken
    Busy,
    /// The predictor did not answer in time and was abandoned
    Timeout(Duration),
}

impl PredictorError {
    pub fn status(&self) -> StatusCode {
        match self {
            PredictorError::Validation(_) => StatusCode::BAD_REQUEST,
            PredictorError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            PredictorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PredictorError::Spawn(_)
            | PredictorError::SubprocessFailure { .. }
            | PredictorError::MalformedOutput(_)
            | PredictorError::RemoteFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for PredictorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictorError::Validation(message) => write!(f, "{}", message),
            PredictorError::Spawn(reason) => write!(f, "Failed to start predictor: {}", reason),
            PredictorError::SubprocessFailure {
                code: Some(code),
                stderr,
            } => write!(
                f,
                "Predictor process exited with code {}. Error: {}",
                code,
                stderr.trim()
            ),
            PredictorError::SubprocessFailure { code: None, stderr } => write!(
                f,
                "Predictor process was terminated by a signal. Error: {}",
                stderr.trim()
            ),
            PredictorError::MalformedOutput(raw) => {
                write!(f, "Failed to parse prediction result: {}", raw)
            }
            PredictorError::RemoteFailure {
                status: Some(status),
                body,
            } => write!(
                f,
                "Prediction service answered with status {}: {}",
                status, body
            ),
            PredictorError::RemoteFailure { status: None, body } => {
                write!(f, "Prediction service unreachable: {}", body)
            }
            PredictorError::Busy => write!(f, "Too many predictions in progress, try again later"),
            PredictorError::Timeout(limit) => write!(
                f,
                "Prediction did not finish within {} seconds",
                limit.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for PredictorError {}

/// A backend able to turn a feature vector into a prediction document.
#[async_trait]
pub trait PredictHandler: Send + Sync {
    async fn run_predict(&self, request: &PredictionRequest) -> Result<Value, PredictorError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeLimits {
    pub max_concurrent: usize,
    pub max_queued: usize,
    pub timeout: Duration,
}

/// Validates incoming requests and hands them to the predictor, at most
/// `max_concurrent` at a time with up to `max_queued` callers waiting.
pub struct PredictionBridge {
    predictor: Arc<dyn PredictHandler>,
    permits: Semaphore,
    waiting: AtomicUsize,
    limits: BridgeLimits,
    validation_mode: ValidationMode,
}

/// Queue position held while waiting for a permit. Released on drop so that
/// callers abandoning the wait do not leak their position.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PredictionBridge {
    pub fn new(
        predictor: Arc<dyn PredictHandler>,
        limits: BridgeLimits,
        validation_mode: ValidationMode,
    ) -> Self {
        let limits = BridgeLimits {
            max_concurrent: limits.max_concurrent.max(1),
            ..limits
        };
        Self {
            predictor,
            permits: Semaphore::new(limits.max_concurrent),
            waiting: AtomicUsize::new(0),
            limits,
            validation_mode,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn predict(&self, body: Value) -> Result<Value, PredictorError> {
        let request = PredictionRequest::from_json(body, self.validation_mode)?;
        let _permit = self.acquire().await?;

        match tokio::time::timeout(self.limits.timeout, self.predictor.run_predict(&request)).await
        {
            Ok(Ok(prediction)) => {
                info!("Prediction finished");
                Ok(prediction)
            }
            Ok(Err(err)) => {
                warn!("Prediction failed: {}", err);
                Err(err)
            }
            Err(_) => {
                warn!(
                    "Prediction exceeded {:?}, abandoning predictor",
                    self.limits.timeout
                );
                Err(PredictorError::Timeout(self.limits.timeout))
            }
        }
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, PredictorError> {
        if let Ok(permit) = self.permits.try_acquire() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _slot = QueueSlot(&self.waiting);
        if queued >= self.limits.max_queued {
            warn!("Prediction queue is full ({} waiting)", queued);
            return Err(PredictorError::Busy);
        }
        self.permits
            .acquire()
            .await
            .map_err(|_| PredictorError::Busy)
    }
}
