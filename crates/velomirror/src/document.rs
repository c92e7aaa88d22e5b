//! The boundary between remote documents and the fleet model.
//!
//! Decoding is tolerant: a malformed field is logged and replaced by its
//! default instead of rejecting the whole snapshot, and list fields are
//! decoded entry by entry so one bad bike or route never costs the rest. Encoding produces the
//! partial documents used by merge writes, one top-level field group each.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;
use crate::model::lenient;
use crate::model::{
    Bike, DeviceRecord, Identity, ParkedState, Route, RouteHistory, UserSettings, UNSET_TIME,
};

/// A document body: top-level field name to JSON value.
pub type Document = Map<String, Value>;

/// Top-level field names of owner and device documents.
pub mod fields {
    /// Owner display name.
    pub const NAME: &str = "name";
    /// Owner email, also the document key.
    pub const EMAIL: &str = "email";
    /// Owner avatar.
    pub const PHOTO_URL: &str = "photoURL";
    /// Identity provider uid.
    pub const UID: &str = "uid";
    /// The bike array.
    pub const BIKES: &str = "bikes";
    /// The settings object.
    pub const USER_SETTINGS: &str = "userSettings";
    /// Accumulated distance in meters.
    pub const TOTAL_DISTANCE: &str = "totalDistanceTravelled";
    /// Bounded route history.
    pub const CACHED_ROUTES: &str = "cachedRoutes";
    /// Device coordinate buffer.
    pub const COORDINATES: &str = "coordinates";
    /// Device parked flag.
    pub const PARKED: &str = "parked";
    /// Device trip start time.
    pub const START_TIME: &str = "startTime";
    /// Device trip end time.
    pub const END_TIME: &str = "endTime";
}

/// Top-level owner fields touched by a local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerField {
    /// `bikes`.
    Bikes,
    /// `userSettings`.
    Settings,
    /// `totalDistanceTravelled` together with `cachedRoutes`.
    Routes,
}

impl std::fmt::Display for OwnerField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bikes => write!(f, "{}", fields::BIKES),
            Self::Settings => write!(f, "{}", fields::USER_SETTINGS),
            Self::Routes => write!(f, "{}+{}", fields::TOTAL_DISTANCE, fields::CACHED_ROUTES),
        }
    }
}

/// The replaceable slices of an owner document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerSnapshot {
    /// Bikes, defaulting to none.
    pub bikes: Vec<Bike>,
    /// Settings, defaulting field by field.
    pub settings: UserSettings,
    /// Distance in meters, defaulting to 0.
    pub total_distance: f64,
    /// Routes, defaulting to empty and truncated to the newest entries.
    pub routes: RouteHistory,
}

impl OwnerSnapshot {
    /// Decode the replaceable fields of an owner document.
    #[must_use]
    pub fn decode(doc: &Document) -> Self {
        Self {
            bikes: lenient::list(doc.get(fields::BIKES), "bike"),
            settings: decode_field(doc, fields::USER_SETTINGS),
            total_distance: lenient::number(doc.get(fields::TOTAL_DISTANCE))
                .filter(|d| *d >= 0.0)
                .unwrap_or(0.0),
            routes: RouteHistory::from(lenient::list::<Route>(
                doc.get(fields::CACHED_ROUTES),
                "route",
            )),
        }
    }
}

/// Decode a device document.
#[must_use]
pub fn decode_device(doc: &Document) -> DeviceRecord {
    DeviceRecord {
        coordinates: lenient::list(doc.get(fields::COORDINATES), "coordinate"),
        parked: lenient::flag(doc.get(fields::PARKED)),
        start_time: lenient::text(doc.get(fields::START_TIME)),
        end_time: lenient::text(doc.get(fields::END_TIME)),
        date: lenient::text(doc.get("date")),
    }
}

fn decode_field<T: DeserializeOwned + Default>(doc: &Document, name: &str) -> T {
    match doc.get(name) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!("Malformed '{}' field, using default: {}", name, e);
            T::default()
        }),
    }
}

fn single<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<Document> {
    let mut doc = Document::new();
    doc.insert(name.to_string(), serde_json::to_value(value)?);
    Ok(doc)
}

/// Fields written when an owner document is first created.
///
/// # Errors
///
/// Returns an error if the identity cannot be serialized.
pub fn encode_identity(identity: &Identity) -> Result<Document> {
    match serde_json::to_value(identity)? {
        Value::Object(doc) => Ok(doc),
        _ => Ok(Document::new()),
    }
}

/// Partial document replacing `bikes`.
///
/// # Errors
///
/// Returns an error if a bike cannot be serialized.
pub fn encode_bikes(bikes: &[Bike]) -> Result<Document> {
    single(fields::BIKES, bikes)
}

/// Partial document replacing `userSettings`.
///
/// # Errors
///
/// Returns an error if the settings cannot be serialized.
pub fn encode_settings(settings: &UserSettings) -> Result<Document> {
    single(fields::USER_SETTINGS, settings)
}

/// Partial document replacing the distance total and route history.
///
/// # Errors
///
/// Returns an error if a route cannot be serialized.
pub fn encode_routes(total_distance: f64, routes: &RouteHistory) -> Result<Document> {
    let mut doc = single(fields::CACHED_ROUTES, routes)?;
    doc.insert(fields::TOTAL_DISTANCE.to_string(), Value::from(total_distance));
    Ok(doc)
}

/// Partial device document for a parking transition stamped at `time`.
///
/// Parking stamps `endTime`; starting to move stamps `startTime`.
#[must_use]
pub fn encode_parking(state: ParkedState, time: &str) -> Document {
    let mut doc = Document::new();
    doc.insert(fields::PARKED.to_string(), Value::Bool(state.as_flag()));
    let stamp = match state {
        ParkedState::Parked => fields::END_TIME,
        ParkedState::Moving => fields::START_TIME,
    };
    doc.insert(stamp.to_string(), Value::from(time));
    doc
}

/// Partial device document emptying the coordinate buffer.
#[must_use]
pub fn cleared_device_buffer() -> Document {
    let mut doc = Document::new();
    doc.insert(fields::COORDINATES.to_string(), Value::Array(Vec::new()));
    doc.insert(fields::START_TIME.to_string(), Value::from(UNSET_TIME));
    doc.insert(fields::END_TIME.to_string(), Value::from(UNSET_TIME));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActiveDevice, BikeDraft, Component};
    use serde_json::json;

    fn as_doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_decode_empty_owner_document() {
        let snapshot = OwnerSnapshot::decode(&Document::new());
        assert_eq!(snapshot, OwnerSnapshot::default());
    }

    #[test]
    fn test_decode_owner_document() {
        let doc = as_doc(json!({
            "name": "Ada",
            "bikes": [{ "id": "b1", "nickname": "Gravel", "components": [{ "type": "Chain" }] }],
            "userSettings": { "userActiveDevice": "PROTOTYPE", "receiveTheftNotifications": false },
            "totalDistanceTravelled": 1234.5,
            "cachedRoutes": [{ "coords": [], "distance": 1234.5, "date": "2025-05-01" }]
        }));
        let snapshot = OwnerSnapshot::decode(&doc);

        assert_eq!(snapshot.bikes.len(), 1);
        assert_eq!(snapshot.bikes[0].components[0].kind, "Chain");
        assert_eq!(
            snapshot.settings.active_device,
            ActiveDevice::Named("PROTOTYPE".into())
        );
        assert!(!snapshot.settings.receive_theft_notifications);
        assert!(snapshot.settings.registered_devices.is_empty());
        assert!((snapshot.total_distance - 1234.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.routes.len(), 1);
    }

    #[test]
    fn test_malformed_field_defaults_alone() {
        let doc = as_doc(json!({
            "bikes": "not an array",
            "totalDistanceTravelled": 42.0
        }));
        let snapshot = OwnerSnapshot::decode(&doc);
        assert!(snapshot.bikes.is_empty());
        assert!((snapshot.total_distance - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_one_bad_bike_field_keeps_the_fleet() {
        let doc = as_doc(json!({
            "bikes": [
                { "id": "a", "nickname": "Good" },
                { "id": "b", "nickname": null },
                { "id": "c", "components": [{ "type": "Chain", "health": { "lifespan": "2500" } }] },
                { "id": "d", "components": [{
                    "type": "Brakes",
                    "maintenanceHistory": [{ "date": "2025-05-01", "healthRestored": 80 }]
                }] },
                "not a bike"
            ]
        }));
        let snapshot = OwnerSnapshot::decode(&doc);

        let ids: Vec<&str> = snapshot.bikes.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(snapshot.bikes[1].nickname, "");
        assert!((snapshot.bikes[2].components[0].health.lifespan - 2500.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.bikes[3].components[0].maintenance_history.len(), 1);
    }

    #[test]
    fn test_null_settings_field_keeps_the_rest() {
        let doc = as_doc(json!({
            "userSettings": { "userActiveDevice": "PROTOTYPE", "receiveTheftNotifications": null },
            "totalDistanceTravelled": "88.5"
        }));
        let snapshot = OwnerSnapshot::decode(&doc);
        assert_eq!(
            snapshot.settings.active_device,
            ActiveDevice::Named("PROTOTYPE".into())
        );
        assert!(snapshot.settings.receive_theft_notifications);
        assert!((snapshot.total_distance - 88.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_device_tolerates_missing_fields() {
        let record = decode_device(&as_doc(json!({ "parked": false })));
        assert!(record.coordinates.is_empty());
        assert_eq!(record.parked, Some(false));
        assert!(record.start_time.is_none());
    }

    #[test]
    fn test_encode_bikes_is_single_field() {
        let mut draft = BikeDraft::default();
        draft.components.push(Component::new("Chain", "KMC", 2500.0));
        let doc = encode_bikes(&[Bike::from_draft(draft)]).unwrap();
        assert_eq!(doc.len(), 1);
        assert!(doc[fields::BIKES].is_array());
    }

    #[test]
    fn test_encode_settings_is_single_field() {
        let doc = encode_settings(&UserSettings::default()).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(
            doc[fields::USER_SETTINGS]["userActiveDevice"],
            "No active device"
        );
    }

    #[test]
    fn test_encode_routes() {
        let mut routes = RouteHistory::new();
        routes.push(Route {
            coordinates: Vec::new(),
            distance: 10.0,
            start_time: "08:00".into(),
            end_time: "08:30".into(),
            date: "2025-05-01".into(),
        });
        let doc = encode_routes(10.0, &routes).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc[fields::TOTAL_DISTANCE], 10.0);
        assert_eq!(doc[fields::CACHED_ROUTES].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_encode_identity() {
        let doc = encode_identity(&Identity::new("ada@example.com")).unwrap();
        assert_eq!(doc[fields::EMAIL], "ada@example.com");
        assert!(doc.contains_key(fields::PHOTO_URL));
        assert!(!doc.contains_key(fields::BIKES));
    }

    #[test]
    fn test_encode_parking() {
        let parked = encode_parking(ParkedState::Parked, "17:45");
        assert_eq!(parked[fields::PARKED], true);
        assert_eq!(parked[fields::END_TIME], "17:45");
        assert!(!parked.contains_key(fields::START_TIME));

        let moving = encode_parking(ParkedState::Moving, "08:05");
        assert_eq!(moving[fields::PARKED], false);
        assert_eq!(moving[fields::START_TIME], "08:05");
    }

    #[test]
    fn test_cleared_device_buffer() {
        let doc = cleared_device_buffer();
        assert!(doc[fields::COORDINATES].as_array().unwrap().is_empty());
        assert_eq!(doc[fields::START_TIME], UNSET_TIME);
        assert_eq!(doc[fields::END_TIME], UNSET_TIME);
        assert!(!doc.contains_key(fields::PARKED));
    }
}
