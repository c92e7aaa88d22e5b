//! Recorded trips and the bounded history that keeps the latest ones.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::lenient;
use crate::geo::Coordinate;

/// Number of routes kept in the owner's history.
pub const ROUTE_HISTORY_CAPACITY: usize = 10;

/// Placeholder for start/end times that were never recorded.
pub const UNSET_TIME: &str = "00:00";

/// One trip ingested from a device's coordinate buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Map<String, Value>")]
pub struct Route {
    /// Path as recorded by the device.
    #[serde(rename = "coords")]
    pub coordinates: Vec<Coordinate>,
    /// Path length in meters.
    pub distance: f64,
    /// `HH:MM` when the device started moving.
    pub start_time: String,
    /// `HH:MM` when the device parked.
    pub end_time: String,
    /// `YYYY-MM-DD` of the trip.
    pub date: String,
}

impl From<Map<String, Value>> for Route {
    fn from(doc: Map<String, Value>) -> Self {
        let time = |key: &str| lenient::text(doc.get(key)).unwrap_or_else(|| UNSET_TIME.to_string());
        Self {
            coordinates: lenient::list(doc.get("coords").or_else(|| doc.get("coordinates")), "route point"),
            distance: lenient::number(doc.get("distance")).unwrap_or(0.0),
            start_time: time("startTime"),
            end_time: time("endTime"),
            date: lenient::text(doc.get("date")).unwrap_or_default(),
        }
    }
}

/// The most recent routes, oldest first.
///
/// Pushing beyond [`ROUTE_HISTORY_CAPACITY`] drops the oldest entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Value>", into = "Vec<Route>")]
pub struct RouteHistory {
    routes: VecDeque<Route>,
}

impl RouteHistory {
    /// An empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route, evicting the oldest while over capacity.
    ///
    /// Returns the evicted route, if any.
    pub fn push(&mut self, route: Route) -> Option<Route> {
        self.routes.push_back(route);
        let mut evicted = None;
        while self.routes.len() > ROUTE_HISTORY_CAPACITY {
            evicted = self.routes.pop_front();
        }
        evicted
    }

    /// Number of stored routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// The newest route.
    #[must_use]
    pub fn latest(&self) -> Option<&Route> {
        self.routes.back()
    }
}

impl From<Vec<Route>> for RouteHistory {
    fn from(routes: Vec<Route>) -> Self {
        let skip = routes.len().saturating_sub(ROUTE_HISTORY_CAPACITY);
        Self {
            routes: routes.into_iter().skip(skip).collect(),
        }
    }
}

impl From<Vec<Value>> for RouteHistory {
    fn from(values: Vec<Value>) -> Self {
        Self::from(lenient::list::<Route>(Some(&Value::Array(values)), "route"))
    }
}

impl From<RouteHistory> for Vec<Route> {
    fn from(history: RouteHistory) -> Self {
        history.routes.into()
    }
}
