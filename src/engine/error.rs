use crate::model::BookingId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParkError {
    /// Missing or malformed input. Rejected before the store is touched.
    Validation(String),
    UnknownSpot(String),
    /// Nominal window overlaps an existing booking on this spot.
    Conflict(String),
    NotFound(BookingId),
    Internal(String),
}

impl ParkError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParkError::Validation(_) => "validation",
            ParkError::UnknownSpot(_) => "unknown_spot",
            ParkError::Conflict(_) => "conflict",
            ParkError::NotFound(_) => "not_found",
            ParkError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for ParkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParkError::Validation(msg) => write!(f, "invalid request: {msg}"),
            ParkError::UnknownSpot(id) => write!(f, "spot id '{id}' does not exist"),
            ParkError::Conflict(id) => {
                write!(f, "spot {id} is already booked for this time slot")
            }
            ParkError::NotFound(id) => write!(f, "booking not found: {id}"),
            ParkError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for ParkError {}
