//! Client for the external overstay-prediction service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Ms, Span};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub predicted_overstay_minutes: f64,
    pub source: String,
}

impl Prediction {
    /// Reject values the wait computation cannot use.
    pub fn validate(self) -> Result<Self, PredictorError> {
        if !self.predicted_overstay_minutes.is_finite() || self.predicted_overstay_minutes < 0.0 {
            return Err(PredictorError::Invalid(format!(
                "predicted_overstay_minutes = {}",
                self.predicted_overstay_minutes
            )));
        }
        Ok(self)
    }
}

#[derive(Debug)]
pub enum PredictorError {
    Transport(String),
    Status(u16),
    Decode(String),
    Invalid(String),
    Timeout(Duration),
}

impl std::fmt::Display for PredictorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictorError::Transport(e) => write!(f, "predictor unreachable: {e}"),
            PredictorError::Status(code) => write!(f, "predictor responded with status {code}"),
            PredictorError::Decode(e) => write!(f, "bad predictor response: {e}"),
            PredictorError::Invalid(e) => write!(f, "unusable prediction: {e}"),
            PredictorError::Timeout(d) => write!(f, "predictor timed out after {}ms", d.as_millis()),
        }
    }
}

impl std::error::Error for PredictorError {}

/// Predicts how long the occupant of a booking will overstay.
#[async_trait]
pub trait OverstayPredictor: Send + Sync {
    /// `window` is the occupying booking's nominal `[start, end)`.
    async fn predict(&self, window: Span) -> Result<Prediction, PredictorError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionRequest {
    start_time: String,
    end_time: String,
}

fn rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// JSON over HTTP: `POST url {startTime, endTime}`.
pub struct HttpPredictor {
    client: reqwest::Client,
    url: String,
}

impl HttpPredictor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PredictorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictorError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OverstayPredictor for HttpPredictor {
    async fn predict(&self, window: Span) -> Result<Prediction, PredictorError> {
        let request = PredictionRequest {
            start_time: rfc3339(window.start),
            end_time: rfc3339(window.end),
        };
        tracing::debug!(url = %self.url, ?request, "calling predictor");
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PredictorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictorError::Status(status.as_u16()));
        }
        response
            .json::<Prediction>()
            .await
            .map_err(|e| PredictorError::Decode(e.to_string()))
    }
}

/// Used when no predictor URL is configured; every call takes the fallback path.
#[derive(Debug, Default)]
pub struct UnavailablePredictor;

#[async_trait]
impl OverstayPredictor for UnavailablePredictor {
    async fn predict(&self, _window: Span) -> Result<Prediction, PredictorError> {
        Err(PredictorError::Transport("no predictor configured".into()))
    }
}
