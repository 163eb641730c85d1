use std::sync::atomic::Ordering;

use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_user_id, validate_window};
use super::{Engine, ParkError};

impl Engine {
    /// Reserve `spot_id` for `[start, end)`.
    ///
    /// A missing or empty `user_id` becomes `user_<id>`.
    pub async fn create_booking(
        &self,
        spot_id: &str,
        start: Ms,
        end: Ms,
        user_id: Option<String>,
    ) -> Result<Booking, ParkError> {
        let span = validate_window(start, end, MAX_BOOKING_DURATION_MS)?;
        if let Some(ref u) = user_id {
            validate_user_id(u)?;
        }
        let rs = self.spot_or_unknown(spot_id)?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPOT {
            return Err(ParkError::Validation("too many bookings on spot".into()));
        }

        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let user_id = user_id
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("user_{id}"));
        let mut booking = Booking {
            id,
            user_id,
            spot_id: guard.spot_id.clone(),
            start: span.start,
            end: span.end,
            actual_departure: span.end,
        };

        if let Some(minutes) = self.simulator.apply(&mut booking) {
            info!(
                booking_id = id,
                spot_id = %booking.spot_id,
                "simulation: booking will overstay by {minutes} min"
            );
            metrics::counter!(observability::OVERSTAYS_SIMULATED_TOTAL).increment(1);
        }

        guard.insert_booking(booking.clone());
        self.booking_to_spot.insert(id, booking.spot_id.clone());
        drop(guard);

        let lot_name = self
            .catalog()
            .lot_for_spot(&booking.spot_id)
            .map_or("unknown lot", |l| l.name.as_str());
        info!("created booking {id} for spot {} in {lot_name}", booking.spot_id);
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        metrics::gauge!(observability::BOOKINGS_ACTIVE).set(self.booking_count() as f64);
        Ok(booking)
    }

    /// Remove a booking for good and hand it back.
    pub async fn cancel_booking(&self, id: BookingId) -> Result<Booking, ParkError> {
        let spot_id = self
            .get_spot_for_booking(id)
            .ok_or(ParkError::NotFound(id))?;
        let rs = self.get_spot(&spot_id).ok_or(ParkError::NotFound(id))?;
        let mut guard = rs.write().await;
        // A concurrent cancel may have won between the lookup and the lock.
        let booking = guard.remove_booking(id).ok_or(ParkError::NotFound(id))?;
        self.booking_to_spot.remove(&id);
        drop(guard);

        info!("cancelled booking {id} for spot {spot_id}");
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        metrics::gauge!(observability::BOOKINGS_ACTIVE).set(self.booking_count() as f64);
        Ok(booking)
    }
}
