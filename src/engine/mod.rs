mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::ParkError;

pub(crate) use conflict::{validate_instant, validate_user_id};

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::catalog::Catalog;
use crate::model::*;
use crate::overstay::OverstaySimulator;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

/// The booking store plus the availability queries over it.
///
/// Every catalog spot owns its own lock. `create_booking` holds the spot's
/// write lock across the conflict check and the insert, so overlapping
/// creates on one spot are serialized while other spots proceed in parallel.
pub struct Engine {
    catalog: Arc<Catalog>,
    pub(super) spots: DashMap<String, SharedSpotState>,
    /// Reverse lookup: booking id → spot id
    pub(super) booking_to_spot: DashMap<BookingId, String>,
    pub(super) next_id: AtomicU64,
    pub(super) simulator: OverstaySimulator,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, simulator: OverstaySimulator) -> Self {
        let spots = DashMap::with_capacity(catalog.total_spots());
        for spot_id in catalog.spot_ids() {
            spots.insert(spot_id.to_string(), Arc::new(RwLock::new(SpotState::new(spot_id))));
        }
        Self {
            catalog,
            spots,
            booking_to_spot: DashMap::new(),
            next_id: AtomicU64::new(1),
            simulator,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn get_spot(&self, spot_id: &str) -> Option<SharedSpotState> {
        self.spots.get(spot_id).map(|e| e.value().clone())
    }

    pub(super) fn spot_or_unknown(&self, spot_id: &str) -> Result<SharedSpotState, ParkError> {
        self.get_spot(spot_id)
            .ok_or_else(|| ParkError::UnknownSpot(spot_id.to_string()))
    }

    pub fn get_spot_for_booking(&self, id: BookingId) -> Option<String> {
        self.booking_to_spot.get(&id).map(|e| e.value().clone())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_spot.len()
    }
}
