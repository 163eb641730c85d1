use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_instant, validate_window};
use super::{Engine, ParkError};

impl Engine {
    /// Live occupancy of a spot at `at`, honouring actual departures.
    pub async fn status_at(&self, spot_id: &str, at: Ms) -> Result<SpotStatus, ParkError> {
        validate_instant(at)?;
        let rs = self.spot_or_unknown(spot_id)?;
        let guard = rs.read().await;
        Ok(guard.status_at(at))
    }

    /// Whether `[start, end)` overlaps a scheduled booking on the spot.
    /// Overstays are not considered; see [`Engine::status_at`] for that.
    pub async fn is_conflicted(&self, spot_id: &str, start: Ms, end: Ms) -> Result<bool, ParkError> {
        let span = validate_window(start, end, MAX_QUERY_WINDOW_MS)?;
        let rs = self.spot_or_unknown(spot_id)?;
        let guard = rs.read().await;
        Ok(guard.is_conflicted(&span))
    }

    /// Free-spot counts per lot for `[start, end)`, in catalog order.
    pub async fn search_lots(&self, start: Ms, end: Ms) -> Result<Vec<LotAvailability>, ParkError> {
        let span = validate_window(start, end, MAX_QUERY_WINDOW_MS)?;
        let mut out = Vec::with_capacity(self.catalog().lots().len());
        for lot in self.catalog().lots() {
            let mut available_count = 0;
            for spot_id in &lot.spots {
                let rs = self.spot_or_unknown(spot_id)?;
                let guard = rs.read().await;
                if !guard.is_conflicted(&span) {
                    available_count += 1;
                }
            }
            out.push(LotAvailability {
                lot_id: lot.id.clone(),
                name: lot.name.clone(),
                location: lot.location,
                total_spots: lot.spots.len(),
                available_count,
            });
        }
        Ok(out)
    }

    /// First spot in `buffer_lot_id` (catalog order) that is free at `at`.
    ///
    /// First-fit, not load-balanced. An unknown lot yields `None`.
    pub async fn find_buffer_spot(&self, at: Ms, buffer_lot_id: &str) -> Option<String> {
        let lot = self.catalog().lot(buffer_lot_id)?;
        for spot_id in &lot.spots {
            let Some(rs) = self.get_spot(spot_id) else { continue };
            let guard = rs.read().await;
            if guard.occupant_at(at).is_none() {
                return Some(spot_id.clone());
            }
        }
        None
    }

    /// Active bookings, ordered by spot (catalog order) then start time.
    pub async fn list_bookings(&self, spot_id: Option<&str>) -> Result<Vec<Booking>, ParkError> {
        if let Some(spot_id) = spot_id {
            let rs = self.spot_or_unknown(spot_id)?;
            let guard = rs.read().await;
            return Ok(guard.bookings.clone());
        }
        let mut out = Vec::with_capacity(self.booking_count());
        for spot_id in self.catalog().spot_ids() {
            let Some(rs) = self.get_spot(spot_id) else { continue };
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().cloned());
        }
        Ok(out)
    }
}
