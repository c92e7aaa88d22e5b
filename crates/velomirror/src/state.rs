//! In-memory fleet state.
//!
//! [`FleetState`] is plain data. Every mutation either applies fully or
//! leaves the state untouched, and reports the top-level owner field it
//! changed so the caller can persist exactly that field. Each applied change
//! bumps [`FleetState::revision`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::advisor::{MaintenanceAdvisor, MaintenanceAdvisory};
use crate::document::{OwnerField, OwnerSnapshot};
use crate::model::{
    Bike, BikeDraft, BikeId, Component, Identity, MaintenanceRecord, ParkedState, Route,
    RouteHistory, UserSettings,
};

/// The mirrored fleet of one owner.
#[derive(Debug, Clone, Default)]
pub struct FleetState {
    owner: Option<Identity>,
    bikes: Vec<Bike>,
    selected_bike: Option<BikeId>,
    settings: UserSettings,
    total_distance: f64,
    routes: RouteHistory,
    advisories: Vec<MaintenanceAdvisory>,
    parked: Option<ParkedState>,
    revision: u64,
}

impl FleetState {
    /// An empty state with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // === Queries ===

    /// The signed-in owner.
    #[must_use]
    pub fn owner(&self) -> Option<&Identity> {
        self.owner.as_ref()
    }

    /// All bikes in display order.
    #[must_use]
    pub fn bikes(&self) -> &[Bike] {
        &self.bikes
    }

    /// A bike by id.
    #[must_use]
    pub fn bike(&self, id: &BikeId) -> Option<&Bike> {
        self.bikes.iter().find(|b| &b.id == id)
    }

    /// The bike currently selected for detail views.
    #[must_use]
    pub fn selected_bike(&self) -> Option<&Bike> {
        self.selected_bike.as_ref().and_then(|id| self.bike(id))
    }

    /// Owner settings.
    #[must_use]
    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    /// Accumulated distance in meters.
    #[must_use]
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// The bounded route history.
    #[must_use]
    pub fn routes(&self) -> &RouteHistory {
        &self.routes
    }

    /// Current maintenance advisories.
    #[must_use]
    pub fn advisories(&self) -> &[MaintenanceAdvisory] {
        &self.advisories
    }

    /// Parked state of the active device; `None` while unknown.
    #[must_use]
    pub fn parked(&self) -> Option<ParkedState> {
        self.parked
    }

    /// Maintenance history of one component.
    #[must_use]
    pub fn maintenance_history(&self, bike: &BikeId, index: usize) -> Option<&[MaintenanceRecord]> {
        self.bike(bike)?
            .components
            .get(index)
            .map(|c| c.maintenance_history.as_slice())
    }

    /// Counter bumped by every applied change.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // === Local mutations ===

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn bike_mut(&mut self, id: &BikeId) -> Option<&mut Bike> {
        self.bikes.iter_mut().find(|b| &b.id == id)
    }

    fn edit_bike(&mut self, id: &BikeId, edit: impl FnOnce(&mut Bike) -> bool) -> Option<OwnerField> {
        let applied = edit(self.bike_mut(id)?);
        if applied {
            self.touch();
            Some(OwnerField::Bikes)
        } else {
            None
        }
    }

    /// Add a bike built from `draft` and return its new id.
    pub fn add_bike(&mut self, draft: BikeDraft) -> BikeId {
        let bike = Bike::from_draft(draft);
        let id = bike.id.clone();
        self.bikes.push(bike);
        self.touch();
        id
    }

    /// Remove a bike, clearing the selection if it was selected.
    pub fn remove_bike(&mut self, id: &BikeId) -> Option<OwnerField> {
        let index = self.bikes.iter().position(|b| &b.id == id)?;
        self.bikes.remove(index);
        if self.selected_bike.as_ref() == Some(id) {
            self.selected_bike = None;
        }
        self.touch();
        Some(OwnerField::Bikes)
    }

    /// Set one top-level bike field.
    pub fn update_bike_field(&mut self, id: &BikeId, field: &str, value: Value) -> Option<OwnerField> {
        self.edit_bike(id, |bike| bike.set_field(field, value))
    }

    /// Select a bike. Returns `false` if no bike has that id.
    pub fn select_bike(&mut self, id: &BikeId) -> bool {
        if self.bike(id).is_none() {
            return false;
        }
        self.selected_bike = Some(id.clone());
        self.touch();
        true
    }

    /// Append a component to a bike.
    pub fn add_component(&mut self, bike: &BikeId, mut component: Component) -> Option<OwnerField> {
        component.normalize();
        self.edit_bike(bike, |b| {
            b.components.push(component);
            true
        })
    }

    /// Remove the component at `index`.
    pub fn remove_component(&mut self, bike: &BikeId, index: usize) -> Option<OwnerField> {
        self.edit_bike(bike, |b| {
            if index < b.components.len() {
                b.components.remove(index);
                true
            } else {
                false
            }
        })
    }

    /// Swap the component at `index` for a new one.
    pub fn replace_component(
        &mut self,
        bike: &BikeId,
        index: usize,
        mut component: Component,
    ) -> Option<OwnerField> {
        component.normalize();
        self.edit_bike(bike, |b| match b.components.get_mut(index) {
            Some(slot) => {
                *slot = component;
                true
            }
            None => false,
        })
    }

    /// Record maintenance on the component at `index`.
    pub fn record_maintenance(
        &mut self,
        bike: &BikeId,
        index: usize,
        record: MaintenanceRecord,
    ) -> Option<OwnerField> {
        self.edit_bike(bike, |b| match b.components.get_mut(index) {
            Some(component) => {
                component.record_maintenance(record);
                true
            }
            None => false,
        })
    }

    /// Add ridden distance to every in-use component of a bike.
    pub fn record_ride(&mut self, bike: &BikeId, distance: f64) -> Option<OwnerField> {
        if !distance.is_finite() || distance <= 0.0 {
            return None;
        }
        self.edit_bike(bike, |b| {
            let mut worn = false;
            for component in b.components.iter_mut().filter(|c| c.in_use) {
                component.health.mileage += distance;
                worn = true;
            }
            worn
        })
    }

    /// Replace the settings.
    pub fn save_settings(&mut self, settings: UserSettings) -> Option<OwnerField> {
        self.settings = settings;
        self.touch();
        Some(OwnerField::Settings)
    }

    /// Register a device name; no change if it is already registered.
    pub fn register_device(&mut self, name: &str) -> Option<OwnerField> {
        if self.settings.register_device(name) {
            self.touch();
            Some(OwnerField::Settings)
        } else {
            None
        }
    }

    // === Sync-driven updates ===

    /// Set the signed-in owner.
    pub fn set_owner(&mut self, owner: Option<Identity>) {
        self.owner = owner;
        self.touch();
    }

    /// Replace the document-backed slices with a remote snapshot.
    ///
    /// The selection survives only if the selected bike still exists.
    pub fn apply_remote(&mut self, snapshot: OwnerSnapshot) {
        self.bikes = snapshot.bikes;
        self.settings = snapshot.settings;
        self.total_distance = snapshot.total_distance;
        self.routes = snapshot.routes;
        if let Some(id) = &self.selected_bike {
            if !self.bikes.iter().any(|b| &b.id == id) {
                self.selected_bike = None;
            }
        }
        self.touch();
    }

    /// Append an ingested route and add its distance to the total.
    ///
    /// Returns the route evicted from the history, if any.
    pub fn add_route(&mut self, route: Route) -> Option<Route> {
        self.total_distance += route.distance;
        let evicted = self.routes.push(route);
        self.touch();
        evicted
    }

    /// Set the device parked state, returning the previous one.
    pub fn set_parked(&mut self, parked: Option<ParkedState>) -> Option<ParkedState> {
        let previous = std::mem::replace(&mut self.parked, parked);
        if previous != parked {
            self.touch();
        }
        previous
    }

    /// Recompute advisories from the current bikes.
    pub fn refresh_advisories(&mut self, advisor: &MaintenanceAdvisor, now: DateTime<Utc>) {
        let advisories = advisor.evaluate(&self.bikes, now);
        if advisories != self.advisories {
            self.advisories = advisories;
            self.touch();
        }
    }

    /// Return to the signed-out defaults. The revision keeps counting.
    pub fn reset(&mut self) {
        let revision = self.revision + 1;
        *self = Self {
            revision,
            ..Self::default()
        };
    }
}
