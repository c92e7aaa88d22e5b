//! Tracking device records.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// Whether the bound bike is parked or on the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParkedState {
    /// The bike is standing still; any buffered trip is complete.
    Parked,
    /// The bike is being ridden; coordinates are accumulating.
    Moving,
}

impl ParkedState {
    /// Translate the device document's `parked` flag.
    ///
    /// An absent flag means the state is unknown.
    #[must_use]
    pub fn from_flag(parked: Option<bool>) -> Option<Self> {
        parked.map(|p| if p { Self::Parked } else { Self::Moving })
    }

    /// The `parked` flag for this state.
    #[must_use]
    pub fn as_flag(self) -> bool {
        matches!(self, Self::Parked)
    }
}

impl std::fmt::Display for ParkedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parked => write!(f, "Parked"),
            Self::Moving => write!(f, "Moving"),
        }
    }
}

/// A device document as written by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Coordinates buffered since the buffer was last consumed.
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,
    /// Parked flag; absent until the device reports one.
    #[serde(default)]
    pub parked: Option<bool>,
    /// `HH:MM` the current trip started.
    #[serde(default)]
    pub start_time: Option<String>,
    /// `HH:MM` the current trip ended.
    #[serde(default)]
    pub end_time: Option<String>,
    /// `YYYY-MM-DD` of the trip.
    #[serde(default)]
    pub date: Option<String>,
}

impl DeviceRecord {
    /// The presentation state for this record.
    #[must_use]
    pub fn parked_state(&self) -> Option<ParkedState> {
        ParkedState::from_flag(self.parked)
    }
}
