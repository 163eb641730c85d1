use serde::{Deserialize, Serialize};

/// Unix milliseconds.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Booking ids come from a monotonic counter and are never reused.
pub type BookingId = u64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// A named group of spots at one location. Spot order is catalog order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: String,
    pub name: String,
    pub location: Location,
    pub spots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: String,
    pub spot_id: String,
    pub start: Ms,
    pub end: Ms,
    /// When the car really leaves. Never earlier than `end`.
    pub actual_departure: Ms,
}

impl Booking {
    /// The scheduled window, used for conflict detection and search.
    pub fn nominal(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// The window the spot is physically taken, used for live status.
    pub fn occupancy(&self) -> Span {
        Span::new(self.start, self.actual_departure)
    }
}

/// Live state of a spot at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotStatus {
    Free,
    Occupied { booking: Booking, is_overstay: bool },
}

impl SpotStatus {
    pub fn is_free(&self) -> bool {
        matches!(self, SpotStatus::Free)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpotStatus::Free => "free",
            SpotStatus::Occupied { .. } => "occupied",
        }
    }
}

/// All bookings on a single spot.
#[derive(Debug, Clone)]
pub struct SpotState {
    pub spot_id: String,
    /// Sorted by `start`. Nominal windows never overlap.
    pub bookings: Vec<Booking>,
}

impl SpotState {
    pub fn new(spot_id: impl Into<String>) -> Self {
        Self {
            spot_id: spot_id.into(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings whose nominal window overlaps the query.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end > query.start)
    }

    /// Whether any booking's nominal window overlaps `query`.
    pub fn is_conflicted(&self, query: &Span) -> bool {
        self.overlapping(query).next().is_some()
    }

    /// The booking physically holding the spot at `t`.
    ///
    /// An overstaying booking can still be on the spot after the next one has
    /// nominally started; the earliest-starting occupant wins.
    pub fn occupant_at(&self, t: Ms) -> Option<&Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start <= t);
        self.bookings[..right_bound]
            .iter()
            .find(|b| b.occupancy().contains_instant(t))
    }

    pub fn status_at(&self, t: Ms) -> SpotStatus {
        match self.occupant_at(t) {
            Some(b) => SpotStatus::Occupied {
                booking: b.clone(),
                is_overstay: t > b.end,
            },
            None => SpotStatus::Free,
        }
    }
}

/// One row of a lot search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotAvailability {
    pub lot_id: String,
    pub name: String,
    pub location: Location,
    pub total_spots: usize,
    pub available_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(id: BookingId, start: Ms, end: Ms, actual_departure: Ms) -> Booking {
        Booking {
            id,
            user_id: format!("user_{id}"),
            spot_id: "Lot-A-01".into(),
            start,
            end,
            actual_departure,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn booking_ordering() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 300, 400, 400));
        st.insert_booking(booking(2, 100, 200, 200));
        st.insert_booking(booking(3, 200, 300, 300));
        let starts: Vec<_> = st.bookings.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut st = SpotState::new("Lot-A-01");
        for i in 0..3 {
            st.insert_booking(booking(i, (i as Ms) * 100, (i as Ms) * 100 + 50, (i as Ms) * 100 + 50));
        }
        let removed = st.remove_booking(1).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(st.bookings.len(), 2);
        assert_eq!(st.bookings[0].id, 0);
        assert_eq!(st.bookings[1].id, 2);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 200));
        assert!(st.remove_booking(42).is_none());
        assert_eq!(st.bookings.len(), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 200));
        st.insert_booking(booking(2, 450, 600, 600));
        st.insert_booking(booking(3, 1000, 1100, 1100));
        let hits: Vec<_> = st.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn overlapping_ignores_actual_departure() {
        // Nominal [100, 200) with an overstay to 260 does not block [200, 300).
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 260));
        assert_eq!(st.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn is_conflicted_uses_nominal_window() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 260));
        assert!(st.is_conflicted(&Span::new(150, 250)));
        assert!(!st.is_conflicted(&Span::new(200, 300)));
        assert!(!st.is_conflicted(&Span::new(0, 100)));
    }

    #[test]
    fn status_free_outside_occupancy() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 260));
        assert!(st.status_at(99).is_free());
        assert!(st.status_at(260).is_free());
    }

    #[test]
    fn status_flags_overstay_after_nominal_end() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 260));

        match st.status_at(150) {
            SpotStatus::Occupied { booking, is_overstay } => {
                assert_eq!(booking.id, 1);
                assert!(!is_overstay);
            }
            other => panic!("expected occupied, got {other:?}"),
        }
        // exactly at the nominal end is not yet an overstay
        match st.status_at(200) {
            SpotStatus::Occupied { is_overstay, .. } => assert!(!is_overstay),
            other => panic!("expected occupied, got {other:?}"),
        }
        match st.status_at(201) {
            SpotStatus::Occupied { is_overstay, .. } => assert!(is_overstay),
            other => panic!("expected occupied, got {other:?}"),
        }
    }

    #[test]
    fn overstaying_occupant_wins_over_next_booking() {
        let mut st = SpotState::new("Lot-A-01");
        st.insert_booking(booking(1, 100, 200, 260));
        st.insert_booking(booking(2, 200, 300, 300));
        match st.status_at(230) {
            SpotStatus::Occupied { booking, is_overstay } => {
                assert_eq!(booking.id, 1);
                assert!(is_overstay);
            }
            other => panic!("expected occupied, got {other:?}"),
        }
        match st.status_at(270) {
            SpotStatus::Occupied { booking, .. } => assert_eq!(booking.id, 2),
            other => panic!("expected occupied, got {other:?}"),
        }
    }
}
