//! The public face of the engine.
//!
//! A [`Garage`] couples the in-memory [`FleetState`] with the [`Reconciler`].
//! Mutations apply locally right away, recompute advisories where the bike
//! tree changed, and schedule a merge of the one owner field they touched.
//! Remote notifications are applied when the caller drives the event queue
//! with [`Garage::process_pending`] or [`Garage::next_event`].
//!
//! Nothing on the sync path returns an error to the caller: failures are
//! logged and local state stays as it is.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::advisor::{MaintenanceAdvisor, MaintenanceAdvisory};
use crate::catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DefaultsConfig, StoreBackend};
use crate::document::{
    decode_device, encode_bikes, encode_identity, encode_routes, encode_settings, Document,
    OwnerField, OwnerSnapshot,
};
use crate::error::{Error, Result};
use crate::ingest::{self, ParkingChange};
use crate::model::{
    Bike, BikeDraft, BikeId, Component, Identity, MaintenanceRecord, ParkedState, Route,
    RouteHistory, UserSettings,
};
use crate::remote::{DocumentRef, DocumentStore, MemoryStore, SqliteStore};
use crate::state::FleetState;
use crate::sync::{ChannelEvent, ChannelKind, Notification, Reconciler};

/// Local mirror of one owner's fleet, kept in sync with a document store.
#[derive(Debug)]
pub struct Garage {
    state: FleetState,
    reconciler: Reconciler,
    advisor: MaintenanceAdvisor,
    defaults: DefaultsConfig,
    clock: Arc<dyn Clock>,
    revisions: watch::Sender<u64>,
}

impl Garage {
    /// Create a garage over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        let state = FleetState::new();
        let (revisions, _) = watch::channel(state.revision());
        Self {
            state,
            reconciler: Reconciler::new(store),
            advisor: MaintenanceAdvisor::new(config.advisor.clone()),
            defaults: config.defaults.clone(),
            clock: Arc::new(SystemClock),
            revisions,
        }
    }

    /// Open a garage on the backend named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` store cannot be opened.
    pub fn open(config: &Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(config.database_path())?),
        };
        info!("Using {:?} document store", config.store.backend);
        Ok(Self::new(store, config))
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The document store in use.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.reconciler.store()
    }

    /// Receiver that observes every state revision.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    /// Whether a subscription of `kind` is live.
    #[must_use]
    pub fn is_subscribed(&self, kind: ChannelKind) -> bool {
        self.reconciler.is_live(kind)
    }

    /// Device document currently followed.
    #[must_use]
    pub fn device_channel(&self) -> Option<&DocumentRef> {
        self.reconciler.channel(ChannelKind::Device)
    }

    // === Queries ===

    /// The whole state.
    #[must_use]
    pub fn state(&self) -> &FleetState {
        &self.state
    }

    /// The signed-in owner.
    #[must_use]
    pub fn owner(&self) -> Option<&Identity> {
        self.state.owner()
    }

    /// All bikes.
    #[must_use]
    pub fn bikes(&self) -> &[Bike] {
        self.state.bikes()
    }

    /// A bike by id.
    #[must_use]
    pub fn bike(&self, id: &BikeId) -> Option<&Bike> {
        self.state.bike(id)
    }

    /// The selected bike.
    #[must_use]
    pub fn selected_bike(&self) -> Option<&Bike> {
        self.state.selected_bike()
    }

    /// Owner settings.
    #[must_use]
    pub fn settings(&self) -> &UserSettings {
        self.state.settings()
    }

    /// Accumulated distance in meters.
    #[must_use]
    pub fn total_distance(&self) -> f64 {
        self.state.total_distance()
    }

    /// Recent routes.
    #[must_use]
    pub fn routes(&self) -> &RouteHistory {
        self.state.routes()
    }

    /// Current maintenance advisories.
    #[must_use]
    pub fn advisories(&self) -> &[MaintenanceAdvisory] {
        self.state.advisories()
    }

    /// Parked state of the active device.
    #[must_use]
    pub fn parked(&self) -> Option<ParkedState> {
        self.state.parked()
    }

    /// Maintenance history of one component.
    #[must_use]
    pub fn maintenance_history(&self, bike: &BikeId, index: usize) -> Option<&[MaintenanceRecord]> {
        self.state.maintenance_history(bike, index)
    }

    /// Current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.revision()
    }

    // === Mutations ===

    fn owner_document(&self) -> Option<DocumentRef> {
        self.state.owner().map(|o| DocumentRef::owner(o.email.clone()))
    }

    fn publish(&self) {
        self.revisions.send_replace(self.state.revision());
    }

    fn refresh_advisories(&mut self) {
        self.state
            .refresh_advisories(&self.advisor, self.clock.now_utc());
    }

    fn encode(&self, field: OwnerField) -> Result<Document> {
        match field {
            OwnerField::Bikes => encode_bikes(self.state.bikes()),
            OwnerField::Settings => encode_settings(self.state.settings()),
            OwnerField::Routes => encode_routes(self.state.total_distance(), self.state.routes()),
        }
    }

    fn persist(&mut self, field: OwnerField) {
        let Some(owner) = self.owner_document() else {
            warn!("Not signed in; {} kept locally only", field);
            return;
        };
        match self.encode(field) {
            Ok(fields) => self.reconciler.schedule_merge(owner, fields),
            Err(e) => error!("Could not encode {}: {}", field, e),
        }
    }

    fn commit(&mut self, touched: Option<OwnerField>, advise: bool) -> bool {
        let Some(field) = touched else {
            return false;
        };
        if advise {
            self.refresh_advisories();
        }
        self.persist(field);
        self.publish();
        true
    }

    /// Add a bike and return its id.
    pub fn add_bike(&mut self, draft: BikeDraft) -> BikeId {
        let id = self.state.add_bike(draft);
        self.commit(Some(OwnerField::Bikes), true);
        id
    }

    /// Add a bike with one fresh component of every common type.
    pub fn create_generic_bike(&mut self, nickname: &str, brand: &str, model: &str) -> BikeId {
        self.add_bike(catalog::generic_bike(nickname, brand, model))
    }

    /// A fresh component whose lifespan comes from the catalog, falling
    /// back to the configured default.
    #[must_use]
    pub fn new_component(&self, kind: &str, brand: &str) -> Component {
        let lifespan = catalog::find_match(kind)
            .map_or(self.defaults.component_lifespan, |t| t.default_lifespan);
        Component::new(kind, brand, lifespan)
    }

    /// Remove a bike. Returns `false` for an unknown id.
    pub fn remove_bike(&mut self, id: &BikeId) -> bool {
        let touched = self.state.remove_bike(id);
        self.commit(touched, true)
    }

    /// Set one top-level field of a bike.
    pub fn update_bike_field(&mut self, id: &BikeId, field: &str, value: Value) -> bool {
        let touched = self.state.update_bike_field(id, field, value);
        self.commit(touched, false)
    }

    /// Select a bike for detail views; not persisted.
    pub fn select_bike(&mut self, id: &BikeId) -> bool {
        let selected = self.state.select_bike(id);
        if selected {
            self.publish();
        }
        selected
    }

    /// Append a component to a bike.
    pub fn add_component(&mut self, bike: &BikeId, component: Component) -> bool {
        let touched = self.state.add_component(bike, component);
        self.commit(touched, true)
    }

    /// Remove a component.
    pub fn remove_component(&mut self, bike: &BikeId, index: usize) -> bool {
        let touched = self.state.remove_component(bike, index);
        self.commit(touched, true)
    }

    /// Swap a component for a new one.
    pub fn replace_component(&mut self, bike: &BikeId, index: usize, component: Component) -> bool {
        let touched = self.state.replace_component(bike, index, component);
        self.commit(touched, true)
    }

    /// Record maintenance on a component.
    pub fn record_maintenance(&mut self, bike: &BikeId, index: usize, record: MaintenanceRecord) -> bool {
        let touched = self.state.record_maintenance(bike, index, record);
        self.commit(touched, true)
    }

    /// Add ridden distance to the in-use components of a bike.
    pub fn record_ride(&mut self, bike: &BikeId, distance: f64) -> bool {
        let touched = self.state.record_ride(bike, distance);
        self.commit(touched, true)
    }

    /// Replace the owner settings.
    pub fn save_settings(&mut self, settings: UserSettings) -> bool {
        let touched = self.state.save_settings(settings);
        self.commit(touched, false)
    }

    /// Register a device name with the owner.
    pub fn register_device(&mut self, name: &str) -> bool {
        let touched = self.state.register_device(name);
        self.commit(touched, false)
    }

    // === Session ===

    /// Sign in: reset local state, create the owner document if it does
    /// not exist yet, and subscribe to it.
    pub async fn sign_in(&mut self, identity: Identity) {
        self.reconciler.cancel_all();
        self.state.reset();
        let owner = DocumentRef::owner(identity.email.clone());
        info!("Signing in as {}", identity.email);

        match encode_identity(&identity) {
            Ok(fields) => match self.reconciler.store().create_if_absent(&owner, fields).await {
                Ok(true) => info!("Created owner document {}", owner),
                Ok(false) => debug!("Owner document {} already exists", owner),
                Err(e) => error!("Could not create owner document: {}", e),
            },
            Err(e) => error!("Could not encode identity: {}", e),
        }

        self.state.set_owner(Some(identity));
        self.publish();

        if let Err(e) = self.reconciler.subscribe(ChannelKind::Owner, owner).await {
            error!("Owner subscription failed: {}", e);
        }
    }

    /// Sign out: drop every subscription and queued event and return to
    /// the signed-out defaults.
    pub fn sign_out(&mut self) {
        self.reconciler.cancel_all();
        self.state.reset();
        self.publish();
        info!("Signed out");
    }

    /// Wait for every scheduled write to reach the store.
    pub async fn flush(&mut self) {
        self.reconciler.flush().await;
    }

    // === Inbound ===

    /// Apply every queued notification. Returns how many were applied.
    pub async fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.reconciler.try_next() {
            self.handle(event).await;
            applied += 1;
        }
        applied
    }

    /// Wait for one notification and apply it.
    ///
    /// Returns `false` only if the event queue has closed.
    pub async fn next_event(&mut self) -> bool {
        match self.reconciler.next().await {
            Some(event) => {
                self.handle(event).await;
                true
            }
            None => false,
        }
    }

    async fn handle(&mut self, event: ChannelEvent) {
        match (event.kind, event.notification) {
            (kind, Notification::Failed(e)) => {
                error!("{} channel on {} failed: {}", kind, event.document, e);
            }
            (ChannelKind::Owner, Notification::Snapshot(Some(doc))) => self.apply_owner(&doc).await,
            (ChannelKind::Device, Notification::Snapshot(Some(doc))) => self.apply_device(&doc).await,
            (ChannelKind::Device, Notification::Snapshot(None)) => {
                warn!("{}", Error::missing_document(&event.document));
                if self.state.set_parked(None).is_some() {
                    self.publish();
                }
            }
            (ChannelKind::Owner, Notification::Snapshot(None)) => {
                warn!("{}", Error::missing_document(&event.document));
            }
        }
    }

    async fn apply_owner(&mut self, doc: &Document) {
        self.state.apply_remote(OwnerSnapshot::decode(doc));
        self.refresh_advisories();

        let wanted = self.state.settings().active_device.name().map(str::to_string);
        let current = self.device_channel().map(|d| d.key.clone());
        if wanted != current {
            self.state.set_parked(None);
        }
        self.publish();

        match wanted {
            Some(name) => {
                if let Err(e) = self
                    .reconciler
                    .subscribe(ChannelKind::Device, DocumentRef::device(name))
                    .await
                {
                    error!("Device subscription failed: {}", e);
                }
            }
            None => {
                self.reconciler.cancel(ChannelKind::Device);
            }
        }
    }

    async fn apply_device(&mut self, doc: &Document) {
        let parked = decode_device(doc).parked_state();
        let previous = self.state.set_parked(parked);
        self.publish();

        if previous == Some(ParkedState::Moving) && parked == Some(ParkedState::Parked) {
            debug!("Device parked; ingesting route");
            self.ingest().await;
        }
    }

    // === Routes and parking ===

    fn active_device(&self) -> Option<DocumentRef> {
        self.state
            .settings()
            .active_device
            .name()
            .map(DocumentRef::device)
    }

    async fn ingest(&mut self) -> Option<Route> {
        let Some(device) = self.active_device() else {
            warn!("No active device; nothing to ingest");
            return None;
        };
        let Some(owner) = self.owner_document() else {
            warn!("{}", Error::NotSignedIn);
            return None;
        };

        let store = Arc::clone(self.reconciler.store());
        let result = ingest::ingest(
            store.as_ref(),
            &mut self.state,
            &owner,
            &device,
            self.clock.as_ref(),
        )
        .await;
        self.publish();

        match result {
            Ok(route) => route,
            Err(e) if e.is_missing_document() => {
                warn!("{}", e);
                None
            }
            Err(e) => {
                error!("Route ingestion failed: {}", e);
                None
            }
        }
    }

    /// Consume the active device's buffer into a route now.
    pub async fn fetch_latest_route(&mut self) -> Option<Route> {
        self.ingest().await
    }

    /// Request a parking transition on the active device.
    ///
    /// Parking also ingests the buffered route. Returns `None` when there is
    /// no active device or the transition failed.
    pub async fn set_parking(&mut self, target: ParkedState) -> Option<ParkingChange> {
        let Some(device) = self.active_device() else {
            warn!("No active device; ignoring parking request");
            return None;
        };

        let store = Arc::clone(self.reconciler.store());
        let change = match ingest::write_parking(store.as_ref(), &device, target, self.clock.as_ref()).await {
            Ok(change) => change,
            Err(e) if e.is_missing_document() => {
                warn!("{}", e);
                return None;
            }
            Err(e) => {
                error!("Parking update failed: {}", e);
                return None;
            }
        };

        if self.state.set_parked(Some(target)) != Some(target) {
            self.publish();
        }
        if change == ParkingChange::Switched(ParkedState::Parked) {
            self.ingest().await;
        }
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::AdvisorConfig;
    use crate::document::fields;
    use crate::logging::init_test_logging;
    use crate::model::{ActiveDevice, ROUTE_HISTORY_CAPACITY};
    use chrono::{Local, TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    const EMAIL: &str = "ada@example.com";

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn clock() -> FixedClock {
        FixedClock::new(Local.with_ymd_and_hms(2025, 6, 1, 17, 45, 0).unwrap())
    }

    fn setup() -> (Arc<MemoryStore>, Garage) {
        init_test_logging();
        let store = Arc::new(MemoryStore::new());
        let garage = Garage::new(Arc::clone(&store) as Arc<dyn DocumentStore>, &Config::default())
            .with_clock(Arc::new(clock()));
        (store, garage)
    }

    fn owner() -> DocumentRef {
        DocumentRef::owner(EMAIL)
    }

    fn identity() -> Identity {
        Identity {
            name: "Ada".into(),
            email: EMAIL.into(),
            photo_url: "https://example.com/ada.png".into(),
            uid: "u-1".into(),
        }
    }

    async fn signed_in(store: &MemoryStore, garage: &mut Garage, seed: Option<Value>) {
        if let Some(seed) = seed {
            store.put(&owner(), doc(seed)).unwrap();
        }
        garage.sign_in(identity()).await;
        garage.process_pending().await;
    }

    fn trip(parked: bool) -> Value {
        json!({
            "coordinates": [
                { "lat": 0.0, "lng": 0.0 },
                { "lat": 0.001, "lng": 0.0 },
                { "lat": 0.002, "lng": 0.0 }
            ],
            "parked": parked,
            "startTime": "17:00"
        })
    }

    #[tokio::test]
    async fn test_sign_in_creates_identity_document() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;

        let body = store.snapshot(&owner()).unwrap();
        let mut keys: Vec<_> = body.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["email", "name", "photoURL", "uid"]);
        assert_eq!(garage.owner().unwrap().email, EMAIL);
        assert!(garage.is_subscribed(ChannelKind::Owner));
        assert!(garage.bikes().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_keeps_existing_document() {
        let (store, mut garage) = setup();
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "bikes": [{ "id": "b1", "nickname": "Old" }] })),
        )
        .await;

        assert_eq!(garage.bikes().len(), 1);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_bikes_write_leaves_settings_untouched() {
        let (store, mut garage) = setup();
        signed_in(
            &store,
            &mut garage,
            Some(json!({
                "email": EMAIL,
                "userSettings": { "receiveTheftNotifications": false, "userActiveDevice": "No active device" }
            })),
        )
        .await;
        let settings_before = store.snapshot(&owner()).unwrap()[fields::USER_SETTINGS].clone();

        garage.add_bike(BikeDraft {
            nickname: "Gravel".into(),
            ..BikeDraft::default()
        });
        garage.flush().await;

        let body = store.snapshot(&owner()).unwrap();
        assert_eq!(body[fields::USER_SETTINGS], settings_before);
        assert_eq!(body[fields::BIKES].as_array().unwrap().len(), 1);
        let writes = store.writes_to(&owner());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].keys().collect::<Vec<_>>(), vec![fields::BIKES]);
    }

    #[tokio::test]
    async fn test_odd_bike_values_do_not_wipe_the_fleet() {
        let (store, mut garage) = setup();
        signed_in(
            &store,
            &mut garage,
            Some(json!({
                "email": EMAIL,
                "bikes": [
                    { "id": "a", "nickname": "Good" },
                    { "id": "b", "nickname": null },
                    { "id": "c", "components": [{ "type": "Chain", "health": { "lifespan": "2500" } }] },
                    { "id": "d", "components": [{
                        "type": "Brakes",
                        "maintenanceHistory": [{ "date": "2025-05-01", "healthRestored": 80 }]
                    }] }
                ]
            })),
        )
        .await;
        assert_eq!(garage.bikes().len(), 4);

        garage.add_bike(BikeDraft {
            nickname: "New".into(),
            ..BikeDraft::default()
        });
        garage.flush().await;

        let body = store.snapshot(&owner()).unwrap();
        let ids: Vec<&str> = body[fields::BIKES]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|b| b["id"].as_str())
            .collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(&ids[..4], &["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_mutation_without_owner_stays_local() {
        let (store, mut garage) = setup();
        let id = garage.add_bike(BikeDraft::default());
        garage.flush().await;
        assert!(garage.bike(&id).is_some());
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_bike_is_ignored() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;
        store.clear_write_log();
        let revision = garage.revision();

        assert!(!garage.remove_bike(&BikeId::from("ghost")));
        assert!(!garage.record_ride(&BikeId::from("ghost"), 10.0));
        garage.flush().await;
        assert_eq!(garage.revision(), revision);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_snapshot_replaces_and_advises() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;
        garage.add_bike(BikeDraft::default());
        garage.flush().await;
        garage.process_pending().await;

        store
            .put(
                &owner(),
                doc(json!({
                    "email": EMAIL,
                    "bikes": [{
                        "id": "remote",
                        "nickname": "Commuter",
                        "components": [{ "type": "Chain", "brand": "KMC", "health": { "mileage": 850, "lifespan": 1000 } }]
                    }],
                    "totalDistanceTravelled": 42.0
                })),
            )
            .unwrap();
        garage.process_pending().await;

        assert_eq!(garage.bikes().len(), 1);
        assert_eq!(garage.bikes()[0].id, BikeId::from("remote"));
        assert!((garage.total_distance() - 42.0).abs() < f64::EPSILON);
        assert_eq!(garage.advisories().len(), 1);
        assert_eq!(garage.advisories()[0].health_percentage, 15);
    }

    #[tokio::test]
    async fn test_maintenance_clears_advisory() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;
        let id = garage.add_bike(BikeDraft {
            components: vec![garage.new_component("Chain", "KMC")],
            ..BikeDraft::default()
        });
        garage.record_ride(&id, 2200.0);
        assert_eq!(garage.advisories().len(), 1);

        garage.record_maintenance(
            &id,
            0,
            MaintenanceRecord {
                date: Utc::now(),
                health_restored: 80.0,
            },
        );
        assert!(garage.advisories().is_empty());
        assert_eq!(garage.maintenance_history(&id, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_device_follows_active_device() {
        let (store, mut garage) = setup();
        let a = DocumentRef::device("A");
        let b = DocumentRef::device("B");
        store.put(&a, doc(json!({ "parked": false }))).unwrap();
        store.put(&b, doc(json!({ "parked": true }))).unwrap();

        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;
        assert_eq!(garage.device_channel(), Some(&a));
        assert_eq!(garage.parked(), Some(ParkedState::Moving));

        let mut settings = garage.settings().clone();
        settings.active_device = ActiveDevice::Named("B".into());
        garage.save_settings(settings);
        garage.flush().await;
        // A's notification is queued before the owner snapshot that switches to B.
        store.put(&a, doc(json!({ "parked": true }))).unwrap();
        garage.process_pending().await;

        assert_eq!(garage.device_channel(), Some(&b));
        assert_eq!(store.listener_count(&a), 0);
        assert_eq!(store.listener_count(&b), 1);
        assert_eq!(garage.parked(), Some(ParkedState::Parked));

        store.put(&a, doc(json!({ "parked": false }))).unwrap();
        garage.process_pending().await;
        assert_eq!(garage.parked(), Some(ParkedState::Parked));

        let mut settings = garage.settings().clone();
        settings.active_device = ActiveDevice::None;
        garage.save_settings(settings);
        garage.flush().await;
        garage.process_pending().await;
        assert!(garage.device_channel().is_none());
        assert_eq!(store.listener_count(&b), 0);
        assert_eq!(garage.parked(), None);
    }

    #[tokio::test]
    async fn test_parking_twice_ingests_once() {
        let (store, mut garage) = setup();
        let device = DocumentRef::device("A");
        store.put(&device, doc(trip(false))).unwrap();
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;

        let first = garage.set_parking(ParkedState::Parked).await;
        assert_eq!(first, Some(ParkingChange::Switched(ParkedState::Parked)));
        garage.process_pending().await;
        let second = garage.set_parking(ParkedState::Parked).await;
        assert_eq!(second, Some(ParkingChange::Unchanged));
        garage.process_pending().await;

        assert_eq!(garage.routes().len(), 1);
        assert!((garage.total_distance() - 222.39).abs() < 0.1);
        let route = garage.routes().latest().unwrap();
        assert_eq!(route.start_time, "17:00");
        assert_eq!(route.end_time, "17:45");
        assert_eq!(route.date, "2025-06-01");

        let parking_writes = store
            .writes_to(&device)
            .into_iter()
            .filter(|w| w.contains_key(fields::PARKED))
            .count();
        assert_eq!(parking_writes, 1);
        let route_writes = store
            .writes_to(&owner())
            .into_iter()
            .filter(|w| w.contains_key(fields::CACHED_ROUTES))
            .count();
        assert_eq!(route_writes, 1);
        assert!(store.snapshot(&device).unwrap()[fields::COORDINATES]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remote_park_transition_ingests() {
        let (store, mut garage) = setup();
        let device = DocumentRef::device("A");
        store.put(&device, doc(json!({ "parked": false }))).unwrap();
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;
        assert_eq!(garage.parked(), Some(ParkedState::Moving));

        store.put(&device, doc(trip(true))).unwrap();
        garage.process_pending().await;

        assert_eq!(garage.parked(), Some(ParkedState::Parked));
        assert_eq!(garage.routes().len(), 1);
        let body = store.snapshot(&owner()).unwrap();
        assert_eq!(body[fields::CACHED_ROUTES].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_park_with_short_buffer_adds_nothing() {
        for points in [json!([]), json!([{ "lat": 1.0, "lng": 1.0 }])] {
            let (store, mut garage) = setup();
            let device = DocumentRef::device("A");
            store
                .put(&device, doc(json!({ "parked": false, "coordinates": points })))
                .unwrap();
            signed_in(
                &store,
                &mut garage,
                Some(json!({ "email": EMAIL, "totalDistanceTravelled": 10.0, "userSettings": { "userActiveDevice": "A" } })),
            )
            .await;

            garage.set_parking(ParkedState::Parked).await;
            garage.process_pending().await;

            assert!(garage.routes().is_empty());
            assert!((garage.total_distance() - 10.0).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn test_start_moving_stamps_start_time() {
        let (store, mut garage) = setup();
        let device = DocumentRef::device("A");
        store.put(&device, doc(json!({ "parked": true }))).unwrap();
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;

        let change = garage.set_parking(ParkedState::Moving).await;
        assert_eq!(change, Some(ParkingChange::Switched(ParkedState::Moving)));
        assert_eq!(garage.parked(), Some(ParkedState::Moving));
        assert_eq!(store.snapshot(&device).unwrap()[fields::START_TIME], "17:45");
        assert!(garage.routes().is_empty());
    }

    #[tokio::test]
    async fn test_without_active_device_parking_is_noop() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;
        assert!(garage.set_parking(ParkedState::Parked).await.is_none());
        assert!(garage.fetch_latest_route().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_latest_route() {
        let (store, mut garage) = setup();
        let device = DocumentRef::device("A");
        store.put(&device, doc(trip(true))).unwrap();
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;

        let route = garage.fetch_latest_route().await.unwrap();
        assert_eq!(route.coordinates.len(), 3);
        assert!(garage.fetch_latest_route().await.is_none());
    }

    #[tokio::test]
    async fn test_history_capacity_through_ingestion() {
        let (store, mut garage) = setup();
        let device = DocumentRef::device("A");
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;

        for _ in 0..=ROUTE_HISTORY_CAPACITY {
            store.put(&device, doc(trip(true))).unwrap();
            garage.fetch_latest_route().await;
            garage.process_pending().await;
        }
        assert_eq!(garage.routes().len(), ROUTE_HISTORY_CAPACITY);
        let body = store.snapshot(&owner()).unwrap();
        assert_eq!(
            body[fields::CACHED_ROUTES].as_array().unwrap().len(),
            ROUTE_HISTORY_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_sign_out_tears_down() {
        let (store, mut garage) = setup();
        let device = DocumentRef::device("A");
        store.put(&device, doc(json!({ "parked": false }))).unwrap();
        signed_in(
            &store,
            &mut garage,
            Some(json!({ "email": EMAIL, "bikes": [{ "id": "b1" }], "userSettings": { "userActiveDevice": "A" } })),
        )
        .await;
        store.put(&device, doc(json!({ "parked": true }))).unwrap();

        garage.sign_out();
        assert_eq!(garage.process_pending().await, 0);
        assert!(garage.owner().is_none());
        assert!(garage.bikes().is_empty());
        assert_eq!(garage.parked(), None);
        assert_eq!(store.listener_count(&owner()), 0);
        assert_eq!(store.listener_count(&device), 0);
        assert!(!garage.is_subscribed(ChannelKind::Owner));
    }

    #[tokio::test]
    async fn test_register_device_persists_settings() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;

        assert!(garage.register_device("PROTOTYPE"));
        assert!(!garage.register_device("PROTOTYPE"));
        garage.flush().await;

        let body = store.snapshot(&owner()).unwrap();
        assert_eq!(
            body[fields::USER_SETTINGS]["userRegisteredDevices"],
            json!(["PROTOTYPE"])
        );
    }

    #[tokio::test]
    async fn test_generic_bike_and_catalog_components() {
        let (_store, mut garage) = setup();
        let id = garage.create_generic_bike("", "Trek", "");
        assert_eq!(
            garage.bike(&id).unwrap().components.len(),
            catalog::COMPONENT_TYPES.len()
        );

        let chain = garage.new_component("chain", "KMC");
        assert!((chain.health.lifespan - 2500.0).abs() < f64::EPSILON);
        let bell = garage.new_component("Bell", "Knog");
        assert!((bell.health.lifespan - 5000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_select_bike_is_local() {
        let (store, mut garage) = setup();
        signed_in(&store, &mut garage, None).await;
        let id = garage.add_bike(BikeDraft::default());
        garage.flush().await;
        store.clear_write_log();

        assert!(garage.select_bike(&id));
        garage.flush().await;
        assert_eq!(garage.selected_bike().unwrap().id, id);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_watch_sees_revisions() {
        let (_store, mut garage) = setup();
        let mut rx = garage.watch();
        let _ = rx.borrow_and_update();

        garage.add_bike(BikeDraft::default());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), garage.revision());
    }

    #[tokio::test]
    async fn test_custom_advisor_threshold() {
        let store = Arc::new(MemoryStore::new());
        let config = Config {
            advisor: AdvisorConfig {
                health_threshold_percent: 50,
                ..AdvisorConfig::default()
            },
            ..Config::default()
        };
        let mut garage = Garage::new(store as Arc<dyn DocumentStore>, &config);
        let id = garage.add_bike(BikeDraft {
            components: vec![Component::new("Chain", "KMC", 1000.0)],
            ..BikeDraft::default()
        });
        garage.record_ride(&id, 600.0);
        assert_eq!(garage.advisories().len(), 1);
    }

    #[tokio::test]
    async fn test_open_sqlite_backend() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.database_path = Some(dir.path().join("documents.db"));

        let mut garage = Garage::open(&config).unwrap();
        garage.sign_in(identity()).await;
        garage.add_bike(BikeDraft::default());
        garage.flush().await;

        let body = garage.store().get(&owner()).await.unwrap().unwrap();
        assert_eq!(body[fields::BIKES].as_array().unwrap().len(), 1);
    }
}
