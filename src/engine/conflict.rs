use crate::model::*;

use super::ParkError;

pub(crate) fn validate_instant(t: Ms) -> Result<(), ParkError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(ParkError::Validation("timestamp out of range".into()));
    }
    Ok(())
}

/// Check `[start, end)` is well-formed and build the span.
pub(crate) fn validate_window(start: Ms, end: Ms, max_duration: Ms) -> Result<Span, ParkError> {
    validate_instant(start)?;
    validate_instant(end)?;
    if end <= start {
        return Err(ParkError::Validation("end time must be after start time".into()));
    }
    if end - start > max_duration {
        return Err(ParkError::Validation("time window too wide".into()));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<(), ParkError> {
    if user_id.len() > crate::limits::MAX_USER_ID_LEN {
        return Err(ParkError::Validation("user id too long".into()));
    }
    Ok(())
}

/// Nominal-window overlap only; actual departures are ignored here.
pub(crate) fn check_no_conflict(spot: &SpotState, span: &Span) -> Result<(), ParkError> {
    if spot.is_conflicted(span) {
        return Err(ParkError::Conflict(spot.spot_id.clone()));
    }
    Ok(())
}
