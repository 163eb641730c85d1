use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::limits::MAX_SPOT_ID_LEN;
use crate::model::{Location, Lot};

/// Static lot and spot definitions. Immutable once built.
#[derive(Debug, Clone)]
pub struct Catalog {
    lots: Vec<Lot>,
    /// spot id → index into `lots`
    spot_to_lot: HashMap<String, usize>,
}

/// Build `<lot_id>-01 .. <lot_id>-NN`.
pub fn spot_ids(lot_id: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{lot_id}-{i:02}")).collect()
}

impl Catalog {
    pub fn new(lots: Vec<Lot>) -> Result<Self, CatalogError> {
        if lots.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen_lots = HashMap::new();
        let mut spot_to_lot = HashMap::new();
        for (idx, lot) in lots.iter().enumerate() {
            if seen_lots.insert(lot.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateLot(lot.id.clone()));
            }
            let prefix = format!("{}-", lot.id);
            for spot in &lot.spots {
                if !spot.starts_with(&prefix) || spot.len() > MAX_SPOT_ID_LEN {
                    return Err(CatalogError::BadSpotId {
                        lot: lot.id.clone(),
                        spot: spot.clone(),
                    });
                }
                if spot_to_lot.insert(spot.clone(), idx).is_some() {
                    return Err(CatalogError::DuplicateSpot(spot.clone()));
                }
            }
        }
        Ok(Self { lots, spot_to_lot })
    }

    /// The three lots the service ships with. Lot-C is the buffer lot.
    pub fn builtin() -> Self {
        let lots = vec![
            Lot {
                id: "Lot-A".into(),
                name: "Main St. Garage (Lot A)".into(),
                location: Location { lat: 18.5204, lng: 73.8567 },
                spots: spot_ids("Lot-A", 44),
            },
            Lot {
                id: "Lot-B".into(),
                name: "VW Tower Parking (Lot B)".into(),
                location: Location { lat: 18.5230, lng: 73.8525 },
                spots: spot_ids("Lot-B", 50),
            },
            Lot {
                id: "Lot-C".into(),
                name: "Buffer Lot (Lot C)".into(),
                location: Location { lat: 18.5190, lng: 73.8580 },
                spots: spot_ids("Lot-C", 6),
            },
        ];
        let spot_to_lot = lots
            .iter()
            .enumerate()
            .flat_map(|(idx, lot)| lot.spots.iter().map(move |s| (s.clone(), idx)))
            .collect();
        Self { lots, spot_to_lot }
    }

    /// Parse a JSON array of lots. Each entry either lists its `spots`
    /// explicitly or gives a `spot_count` to expand.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<LotEntry> = serde_json::from_str(json).map_err(CatalogError::Json)?;
        let lots = entries
            .into_iter()
            .map(|entry| match entry {
                LotEntry::Explicit { id, name, location, spots } => Lot { id, name, location, spots },
                LotEntry::Counted { id, name, location, spot_count } => {
                    let spots = spot_ids(&id, spot_count);
                    Lot { id, name, location, spots }
                }
            })
            .collect();
        Self::new(lots)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(CatalogError::Io)?;
        Self::from_json(&json)
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn lot(&self, lot_id: &str) -> Option<&Lot> {
        self.lots.iter().find(|l| l.id == lot_id)
    }

    pub fn lot_for_spot(&self, spot_id: &str) -> Option<&Lot> {
        self.spot_to_lot.get(spot_id).map(|&idx| &self.lots[idx])
    }

    pub fn contains_spot(&self, spot_id: &str) -> bool {
        self.spot_to_lot.contains_key(spot_id)
    }

    /// Every spot id, lot by lot, in catalog order.
    pub fn spot_ids(&self) -> impl Iterator<Item = &str> {
        self.lots.iter().flat_map(|l| l.spots.iter().map(String::as_str))
    }

    pub fn total_spots(&self) -> usize {
        self.spot_to_lot.len()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LotEntry {
    Explicit {
        id: String,
        name: String,
        location: Location,
        spots: Vec<String>,
    },
    Counted {
        id: String,
        name: String,
        location: Location,
        spot_count: usize,
    },
}

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Empty,
    DuplicateLot(String),
    DuplicateSpot(String),
    BadSpotId { lot: String, spot: String },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "cannot read catalog: {e}"),
            CatalogError::Json(e) => write!(f, "invalid catalog JSON: {e}"),
            CatalogError::Empty => write!(f, "catalog has no lots"),
            CatalogError::DuplicateLot(id) => write!(f, "duplicate lot id: {id}"),
            CatalogError::DuplicateSpot(id) => write!(f, "duplicate spot id: {id}"),
            CatalogError::BadSpotId { lot, spot } => {
                write!(f, "spot {spot} does not belong to lot {lot}")
            }
        }
    }
}

impl std::error::Error for CatalogError {}
