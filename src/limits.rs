use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

pub const MAX_SPOT_ID_LEN: usize = 64;
pub const MAX_USER_ID_LEN: usize = 256;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_BOOKING_DURATION_MS: Ms = 31 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_BOOKINGS_PER_SPOT: usize = 10_000;
