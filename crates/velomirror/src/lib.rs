//! `velomirror` - a reactive local mirror of a bicycle fleet
//!
//! This library keeps one owner's bikes, components, maintenance history,
//! routes and device bindings in sync with an authoritative document store,
//! derives maintenance advisories from component wear, and turns streamed
//! GPS coordinates into recorded routes.
//!
//! The entry point is [`Garage`]; see the [`remote`] module for the store
//! backends.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod advisor;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod garage;
pub mod geo;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod remote;
pub mod state;
pub mod sync;

pub use advisor::{MaintenanceAdvisor, MaintenanceAdvisory};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use garage::Garage;
pub use geo::Coordinate;
pub use ingest::ParkingChange;
pub use logging::init_logging;
pub use model::{
    ActiveDevice, Bike, BikeDraft, BikeId, Component, Identity, MaintenanceRecord, ParkedState,
    Route, RouteHistory, UserSettings,
};
pub use remote::{DocumentStore, MemoryStore, SqliteStore};
pub use state::FleetState;
pub use sync::ChannelKind;
