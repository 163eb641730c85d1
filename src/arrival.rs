//! What happens when a driver pulls up to the spot they booked.
//!
//! Three outcomes, checked in order, first match wins:
//!
//! 1. the spot is free: nothing to do;
//! 2. it is taken but the buffer lot has room: send the driver there;
//! 3. it is taken and the buffer lot is full: estimate the wait and offer
//!    to wait or cancel.
//!
//! The buffer spot handed out in (2) is advisory. It is not booked, so two
//! arrivals resolved at the same moment can be pointed at the same spot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::engine::{Engine, ParkError, validate_instant, validate_user_id};
use crate::model::{Booking, MINUTE_MS, Ms, SpotStatus};
use crate::notify::Notifier;
use crate::observability;
use crate::predictor::{OverstayPredictor, PredictorError};

pub const DEFAULT_BUFFER_LOT: &str = "Lot-C";
pub const DEFAULT_PREDICTOR_TIMEOUT: Duration = Duration::from_secs(2);
/// Used only when neither the predictor nor the simulated departure give a number.
pub const DEFAULT_WAIT_MINUTES: i64 = 10;

pub const FLOW_HAPPY_PATH: &str = "FLOW_1_HAPPY_PATH";
pub const FLOW_REBOOKING: &str = "FLOW_2_REBOOKING";
pub const FLOW_ZERO_INVENTORY: &str = "FLOW_3_ZERO_INVENTORY";

/// Where a wait estimate came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionSource {
    /// Label returned by the predictor service.
    Predictor(String),
    LocalSimulation,
    Default,
}

impl PredictionSource {
    pub fn as_str(&self) -> &str {
        match self {
            PredictionSource::Predictor(label) => label,
            PredictionSource::LocalSimulation => "local_simulation_fallback",
            PredictionSource::Default => "default_fallback",
        }
    }
}

impl Serialize for PredictionSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationOption {
    pub id: &'static str,
    pub title: String,
    pub subtitle: String,
}

fn remediation_options(wait_minutes: i64) -> Vec<RemediationOption> {
    vec![
        RemediationOption {
            id: "WAIT",
            title: "Wait for Spot".into(),
            subtitle: format!("Get {wait_minutes} minutes of parking on us."),
        },
        RemediationOption {
            id: "CANCEL",
            title: "I Can't Wait (Cancel)".into(),
            subtitle: "Get a full refund + a service credit.".into(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "flow")]
pub enum ArrivalOutcome {
    #[serde(rename = "FLOW_1_HAPPY_PATH")]
    HappyPath { spot_id: String },
    #[serde(rename = "FLOW_2_REBOOKING")]
    Rebooking {
        original_spot_id: String,
        new_spot_id: String,
        overstaying_user: String,
    },
    #[serde(rename = "FLOW_3_ZERO_INVENTORY")]
    ZeroInventory {
        spot_id: String,
        wait_minutes: i64,
        prediction_source: PredictionSource,
        details: String,
        options: Vec<RemediationOption>,
    },
}

impl ArrivalOutcome {
    pub fn flow(&self) -> &'static str {
        match self {
            ArrivalOutcome::HappyPath { .. } => FLOW_HAPPY_PATH,
            ArrivalOutcome::Rebooking { .. } => FLOW_REBOOKING,
            ArrivalOutcome::ZeroInventory { .. } => FLOW_ZERO_INVENTORY,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ArrivalOutcome::HappyPath { .. } => "Your spot is ready!",
            ArrivalOutcome::Rebooking { .. } => "Your spot was occupied, but we found you a new one!",
            ArrivalOutcome::ZeroInventory { .. } => "We're sorry, the lot is 100% full.",
        }
    }
}

/// Whole minutes from now until `delta_ms` has passed, at least one.
pub fn wait_minutes(delta_ms: f64) -> Option<i64> {
    if !delta_ms.is_finite() {
        return None;
    }
    Some(((delta_ms / MINUTE_MS as f64).round() as i64).max(1))
}

pub struct ArrivalResolver {
    engine: Arc<Engine>,
    predictor: Arc<dyn OverstayPredictor>,
    notifier: Arc<dyn Notifier>,
    buffer_lot: String,
    predictor_timeout: Duration,
}

impl ArrivalResolver {
    pub fn new(
        engine: Arc<Engine>,
        predictor: Arc<dyn OverstayPredictor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            predictor,
            notifier,
            buffer_lot: DEFAULT_BUFFER_LOT.to_string(),
            predictor_timeout: DEFAULT_PREDICTOR_TIMEOUT,
        }
    }

    pub fn with_buffer_lot(mut self, lot_id: impl Into<String>) -> Self {
        self.buffer_lot = lot_id.into();
        self
    }

    pub fn with_predictor_timeout(mut self, timeout: Duration) -> Self {
        self.predictor_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn buffer_lot(&self) -> &str {
        &self.buffer_lot
    }

    /// Run the arrival flow for `user_id` reaching `spot_id` at `arrival`.
    ///
    /// A spot missing from the catalog is deliberately not treated as free:
    /// it fails with [`ParkError::UnknownSpot`], never the happy path.
    pub async fn resolve(
        &self,
        spot_id: &str,
        arrival: Ms,
        user_id: &str,
    ) -> Result<ArrivalOutcome, ParkError> {
        if spot_id.is_empty() || user_id.is_empty() {
            return Err(ParkError::Validation(
                "spot_id, arrival and user_id are required".into(),
            ));
        }
        validate_instant(arrival)?;
        validate_user_id(user_id)?;

        // The status snapshot is taken under the spot's read lock, which is
        // released before anything below can suspend on the predictor.
        let occupant = match self.engine.status_at(spot_id, arrival).await? {
            SpotStatus::Free => {
                info!("[flow 1] happy path: spot {spot_id} is free");
                return Ok(self.finish(ArrivalOutcome::HappyPath {
                    spot_id: spot_id.to_string(),
                }));
            }
            SpotStatus::Occupied { booking, is_overstay } => {
                warn!(
                    is_overstay,
                    "[flow 2] conflict: spot {spot_id} is occupied by {}, finding buffer...",
                    booking.user_id
                );
                booking
            }
        };

        if let Some(new_spot_id) = self.engine.find_buffer_spot(arrival, &self.buffer_lot).await {
            info!("[flow 2] re-booking {user_id} to buffer spot {new_spot_id}");
            self.notifier.notify(
                Some(user_id),
                "Your Parking Spot Has Changed!",
                &format!(
                    "Your spot {spot_id} was occupied. We've moved you to {new_spot_id} at no extra cost."
                ),
            );
            return Ok(self.finish(ArrivalOutcome::Rebooking {
                original_spot_id: spot_id.to_string(),
                new_spot_id,
                overstaying_user: occupant.user_id,
            }));
        }

        warn!(
            "[flow 3] zero inventory: spot {spot_id} occupied, no buffer spots in {}",
            self.buffer_lot
        );
        let (wait, source) = self.estimate_wait(&occupant, arrival).await;

        self.notifier.notify(
            Some(user_id),
            "Parking Conflict at Your Spot!",
            &format!(
                "Your spot {spot_id} is occupied. Predicted wait: ~{wait} min. Please see app for options."
            ),
        );

        Ok(self.finish(ArrivalOutcome::ZeroInventory {
            spot_id: spot_id.to_string(),
            wait_minutes: wait,
            prediction_source: source,
            details: format!(
                "Your spot ({spot_id}) is still occupied. We predict it will be free in ~{wait} minutes."
            ),
            options: remediation_options(wait),
        }))
    }

    fn finish(&self, outcome: ArrivalOutcome) -> ArrivalOutcome {
        metrics::counter!(observability::ARRIVALS_TOTAL, "flow" => outcome.flow()).increment(1);
        outcome
    }

    /// One predictor attempt, then the simulated departure, then a constant.
    async fn estimate_wait(&self, occupant: &Booking, arrival: Ms) -> (i64, PredictionSource) {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.predictor_timeout,
            self.predictor.predict(occupant.nominal()),
        )
        .await
        {
            Ok(result) => result.and_then(|p| p.validate()),
            Err(_) => Err(PredictorError::Timeout(self.predictor_timeout)),
        };
        metrics::histogram!(observability::PREDICTOR_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(prediction) => {
                metrics::counter!(observability::PREDICTOR_CALLS_TOTAL, "outcome" => "ok").increment(1);
                let predicted_end =
                    occupant.end as f64 + prediction.predicted_overstay_minutes * MINUTE_MS as f64;
                if let Some(wait) = wait_minutes(predicted_end - arrival as f64) {
                    info!(
                        "[flow 3] predictor: overstay={} min, wait={wait} min",
                        prediction.predicted_overstay_minutes
                    );
                    return (wait, PredictionSource::Predictor(prediction.source));
                }
            }
            Err(e) => {
                let outcome = match e {
                    PredictorError::Timeout(_) => "timeout",
                    _ => "error",
                };
                metrics::counter!(observability::PREDICTOR_CALLS_TOTAL, "outcome" => outcome).increment(1);
                warn!("[flow 3] predictor call failed: {e}; falling back to simulated departure");
            }
        }

        let local = occupant
            .actual_departure
            .checked_sub(arrival)
            .and_then(|delta| wait_minutes(delta as f64));
        match local {
            Some(wait) => (wait, PredictionSource::LocalSimulation),
            None => (DEFAULT_WAIT_MINUTES, PredictionSource::Default),
        }
    }
}
