//! Route ingestion and the parked/moving state machine.
//!
//! A device accumulates coordinates while moving. When it parks, the buffer
//! becomes a [`Route`]: its length is added to the owner's total, the route
//! enters the bounded history, both are persisted, and finally the device
//! buffer is cleared so it is consumed exactly once.

use tracing::{debug, info};

use crate::clock::Clock;
use crate::document::{cleared_device_buffer, decode_device, encode_parking, encode_routes};
use crate::error::{Error, Result};
use crate::geo::path_distance;
use crate::model::{DeviceRecord, ParkedState, Route, UNSET_TIME};
use crate::remote::{DocumentRef, DocumentStore};
use crate::state::FleetState;

/// Turn a device buffer into a route.
///
/// Returns `None` when fewer than two points were buffered or the points
/// cover no distance.
#[must_use]
pub fn plan_route(record: &DeviceRecord, clock: &dyn Clock) -> Option<Route> {
    if record.coordinates.len() < 2 {
        return None;
    }
    let distance = path_distance(&record.coordinates);
    if distance <= 0.0 {
        return None;
    }
    Some(Route {
        coordinates: record.coordinates.clone(),
        distance,
        start_time: record
            .start_time
            .clone()
            .unwrap_or_else(|| UNSET_TIME.to_string()),
        end_time: record
            .end_time
            .clone()
            .unwrap_or_else(|| UNSET_TIME.to_string()),
        date: record
            .date
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| clock.calendar_date()),
    })
}

/// Read a device document.
///
/// # Errors
///
/// Returns [`Error::MissingDocument`] if the device has no document, or the
/// store's read error.
pub async fn read_device(store: &dyn DocumentStore, device: &DocumentRef) -> Result<DeviceRecord> {
    let doc = store
        .get(device)
        .await?
        .ok_or_else(|| Error::missing_document(device))?;
    Ok(decode_device(&doc))
}

/// Consume the device buffer into the fleet state and persist the result.
///
/// The owner's `totalDistanceTravelled` and `cachedRoutes` are written in one
/// merge, then the device buffer is cleared. Returns the ingested route, or
/// `None` when the buffer holds no trip (see [`plan_route`]).
///
/// # Errors
///
/// Returns an error if the device cannot be read or either write fails. A
/// failed write leaves the local route in place.
pub async fn ingest(
    store: &dyn DocumentStore,
    state: &mut FleetState,
    owner: &DocumentRef,
    device: &DocumentRef,
    clock: &dyn Clock,
) -> Result<Option<Route>> {
    let record = read_device(store, device).await?;
    let Some(route) = plan_route(&record, clock) else {
        debug!("No route to ingest from {} ({} points)", device, record.coordinates.len());
        return Ok(None);
    };

    state.add_route(route.clone());
    let fields = encode_routes(state.total_distance(), state.routes())?;
    store.merge(owner, fields).await?;
    store.merge(device, cleared_device_buffer()).await?;

    info!(
        "Ingested route of {:.1} m from {} ({} points)",
        route.distance,
        device,
        route.coordinates.len()
    );
    Ok(Some(route))
}

/// Result of a parking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkingChange {
    /// The device already reported the requested state.
    Unchanged,
    /// The device was switched to the requested state.
    Switched(ParkedState),
}

/// Write a parking transition to a device document.
///
/// Parking stamps `endTime`, starting to move stamps `startTime`, both with
/// the clock's local `HH:MM`. Nothing is written if the stored flag already
/// matches.
///
/// # Errors
///
/// Returns [`Error::MissingDocument`] if the device has no document, or the
/// store's read or write error.
pub async fn write_parking(
    store: &dyn DocumentStore,
    device: &DocumentRef,
    target: ParkedState,
    clock: &dyn Clock,
) -> Result<ParkingChange> {
    let record = read_device(store, device).await?;
    if record.parked_state() == Some(target) {
        debug!("{} is already {}", device, target);
        return Ok(ParkingChange::Unchanged);
    }
    store
        .merge(device, encode_parking(target, &clock.clock_time()))
        .await?;
    info!("{} is now {}", device, target);
    Ok(ParkingChange::Switched(target))
}
