//! Schedule slippage: some drivers leave later than they booked.
//!
//! Every new booking gets an independent draw. With probability `p` the
//! actual departure is pushed past the nominal end by a whole number of
//! minutes picked uniformly from `[min_minutes, max_minutes]`.

use std::sync::{Mutex, PoisonError};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::model::{Booking, MINUTE_MS};

pub const OVERSTAY_PROBABILITY: f64 = 0.3;
pub const MIN_OVERSTAY_MINUTES: u32 = 5;
pub const MAX_OVERSTAY_MINUTES: u32 = 20;

pub struct OverstaySimulator {
    probability: f64,
    min_minutes: u32,
    max_minutes: u32,
    rng: Mutex<SmallRng>,
}

impl OverstaySimulator {
    /// `seed = None` seeds from OS entropy. A non-finite probability falls
    /// back to [`OVERSTAY_PROBABILITY`].
    pub fn new(probability: f64, min_minutes: u32, max_minutes: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            tracing::warn!("overstay probability {probability} is not finite, using {OVERSTAY_PROBABILITY}");
            OVERSTAY_PROBABILITY
        };
        Self {
            probability,
            min_minutes: min_minutes.min(max_minutes),
            max_minutes: max_minutes.max(min_minutes),
            rng: Mutex::new(rng),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(OVERSTAY_PROBABILITY, MIN_OVERSTAY_MINUTES, MAX_OVERSTAY_MINUTES, Some(seed))
    }

    /// Nobody overstays.
    pub fn never() -> Self {
        Self::new(0.0, 0, 0, Some(0))
    }

    /// Every booking overstays by exactly `minutes`.
    pub fn always(minutes: u32) -> Self {
        Self::new(1.0, minutes, minutes, Some(0))
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Draw one overstay, in minutes.
    pub fn sample_minutes(&self) -> Option<u32> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if !rng.gen_bool(self.probability) {
            return None;
        }
        Some(rng.gen_range(self.min_minutes..=self.max_minutes))
    }

    /// Push the booking's actual departure out if this draw overstays.
    /// Returns the delay that was applied.
    pub fn apply(&self, booking: &mut Booking) -> Option<u32> {
        let minutes = self.sample_minutes()?;
        booking.actual_departure = booking.end + minutes as i64 * MINUTE_MS;
        Some(minutes)
    }
}

impl Default for OverstaySimulator {
    fn default() -> Self {
        Self::new(OVERSTAY_PROBABILITY, MIN_OVERSTAY_MINUTES, MAX_OVERSTAY_MINUTES, None)
    }
}

impl std::fmt::Debug for OverstaySimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverstaySimulator")
            .field("probability", &self.probability)
            .field("min_minutes", &self.min_minutes)
            .field("max_minutes", &self.max_minutes)
            .finish_non_exhaustive()
    }
}
