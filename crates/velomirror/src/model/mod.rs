//! Fleet data model.
//!
//! Serde attributes on these types are the document schema: field names
//! match the remote documents and every default is applied on decode.

pub mod bike;
pub mod device;
pub(crate) mod lenient;
pub mod owner;
pub mod route;
pub mod settings;

pub use bike::{Bike, BikeDraft, BikeId, Component, Health, MaintenanceRecord};
pub use device::{DeviceRecord, ParkedState};
pub use owner::Identity;
pub use route::{Route, RouteHistory, ROUTE_HISTORY_CAPACITY, UNSET_TIME};
pub use settings::{ActiveDevice, UserSettings, NO_ACTIVE_DEVICE};
