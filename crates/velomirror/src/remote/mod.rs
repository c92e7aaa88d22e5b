//! Document store abstraction.
//!
//! The engine talks to the authoritative store only through
//! [`DocumentStore`]: point reads, field-level merge writes and change
//! subscriptions. Two backends ship with the crate: [`MemoryStore`] for tests
//! and embedding, and [`SqliteStore`], a local file-backed store.

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

pub use crate::document::Document;
use crate::error::{Error, Result};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Top-level collections of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Owner documents keyed by email.
    Users,
    /// Tracker documents keyed by device name.
    Devices,
}

impl Collection {
    /// Collection name as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Devices => "devices",
        }
    }

    /// Parse a stored collection name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "users" => Some(Self::Users),
            "devices" => Some(Self::Devices),
            _ => None,
        }
    }
}

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    /// Collection holding the document.
    pub collection: Collection,
    /// Key within the collection.
    pub key: String,
}

impl DocumentRef {
    /// The owner document for `email`.
    #[must_use]
    pub fn owner(email: impl Into<String>) -> Self {
        Self {
            collection: Collection::Users,
            key: email.into(),
        }
    }

    /// The device document for `name`.
    #[must_use]
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            collection: Collection::Devices,
            key: name.into(),
        }
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.key)
    }
}

/// Callback receiving each snapshot; `None` means the document does not exist.
pub type SnapshotFn = Box<dyn Fn(Option<Document>) + Send + Sync>;

/// Callback receiving subscription failures.
pub type ErrorFn = Box<dyn Fn(Error) + Send + Sync>;

/// An authoritative document store.
///
/// `merge` replaces only the top-level fields present in `fields`, creating
/// the document if needed. `subscribe` delivers the current snapshot right
/// away, then one snapshot after every change, until the returned
/// [`Subscription`] is cancelled or dropped.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Read a document.
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>>;

    /// Merge top-level fields into a document.
    async fn merge(&self, doc: &DocumentRef, fields: Document) -> Result<()>;

    /// Create a document unless it already exists. Returns whether it was created.
    async fn create_if_absent(&self, doc: &DocumentRef, fields: Document) -> Result<bool>;

    /// Register for change notifications on a document.
    ///
    /// The current body is delivered before this returns. Backends invoke
    /// callbacks while holding their own data lock, so a callback must not
    /// read or write the store; it may cancel subscriptions.
    async fn subscribe(
        &self,
        doc: &DocumentRef,
        on_data: SnapshotFn,
        on_error: ErrorFn,
    ) -> Result<Subscription>;
}

/// A live registration for change notifications.
///
/// Cancelling (or dropping) detaches the callbacks synchronously: once
/// `cancel` returns, the store will not invoke them again.
pub struct Subscription {
    id: u64,
    document: DocumentRef,
    active: Arc<AtomicBool>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("document", &self.document)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Store-assigned identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The subscribed document.
    #[must_use]
    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    /// Whether callbacks may still be invoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Detach the callbacks and release the registration.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(detach) = self.detach.take() {
            detach();
            trace!("Released subscription {} on {}", self.id, self.document);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct Listener {
    id: u64,
    active: Arc<AtomicBool>,
    on_data: Arc<SnapshotFn>,
    on_error: Arc<ErrorFn>,
}

/// Per-document listener lists shared by the store backends.
#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    next_id: Arc<AtomicU64>,
    listeners: Arc<Mutex<HashMap<DocumentRef, Vec<Listener>>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("documents", &self.listeners.lock().map(|l| l.len()).unwrap_or(0))
            .finish()
    }
}

impl ListenerRegistry {
    /// Add a listener and hand back its cancellable handle.
    pub(crate) fn register(
        &self,
        doc: &DocumentRef,
        on_data: SnapshotFn,
        on_error: ErrorFn,
    ) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let active = Arc::new(AtomicBool::new(true));

        self.listeners
            .lock()
            .map_err(|_| Error::subscription(doc, "listener registry poisoned"))?
            .entry(doc.clone())
            .or_default()
            .push(Listener {
                id,
                active: Arc::clone(&active),
                on_data: Arc::new(on_data),
                on_error: Arc::new(on_error),
            });

        let listeners = Arc::clone(&self.listeners);
        let target = doc.clone();
        let detach = move || {
            if let Ok(mut map) = listeners.lock() {
                if let Some(list) = map.get_mut(&target) {
                    list.retain(|l| l.id != id);
                    if list.is_empty() {
                        map.remove(&target);
                    }
                }
            }
        };

        Ok(Subscription {
            id,
            document: doc.clone(),
            active,
            detach: Some(Box::new(detach)),
        })
    }

    fn snapshot_listeners(&self, doc: &DocumentRef) -> Vec<(Arc<AtomicBool>, Arc<SnapshotFn>, Arc<ErrorFn>)> {
        self.listeners
            .lock()
            .map(|map| {
                map.get(doc)
                    .map(|list| {
                        list.iter()
                            .map(|l| (Arc::clone(&l.active), Arc::clone(&l.on_data), Arc::clone(&l.on_error)))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Deliver a snapshot to every live listener of `doc`.
    ///
    /// Callbacks run outside the registry lock, so they may cancel
    /// registrations. Any lock the calling backend holds stays held.
    pub(crate) fn notify(&self, doc: &DocumentRef, snapshot: Option<&Document>) {
        for (active, on_data, _) in self.snapshot_listeners(doc) {
            if active.load(Ordering::SeqCst) {
                on_data(snapshot.cloned());
            }
        }
    }

    /// Deliver a failure to every live listener of `doc`.
    pub(crate) fn fail(&self, doc: &DocumentRef, message: &str) {
        for (active, _, on_error) in self.snapshot_listeners(doc) {
            if active.load(Ordering::SeqCst) {
                on_error(Error::subscription(doc, message));
            }
        }
    }

    /// Number of live listeners on `doc`.
    pub(crate) fn live_count(&self, doc: &DocumentRef) -> usize {
        self.listeners
            .lock()
            .map(|map| map.get(doc).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// Apply a merge: replace each named top-level field, leave the rest.
pub(crate) fn merge_fields(target: &mut Document, fields: Document) {
    for (name, value) in fields {
        target.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(count: &Arc<AtomicUsize>) -> (SnapshotFn, ErrorFn) {
        let data = Arc::clone(count);
        (
            Box::new(move |_| {
                data.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn test_document_ref_display() {
        assert_eq!(DocumentRef::owner("ada@example.com").to_string(), "users/ada@example.com");
        assert_eq!(DocumentRef::device("PROTOTYPE").to_string(), "devices/PROTOTYPE");
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!(Collection::parse("users"), Some(Collection::Users));
        assert_eq!(Collection::parse("devices"), Some(Collection::Devices));
        assert_eq!(Collection::parse("bikes"), None);
    }

    #[test]
    fn test_merge_fields_leaves_siblings() {
        let mut target = Document::new();
        target.insert("bikes".into(), json!([]));
        target.insert("userSettings".into(), json!({ "a": 1 }));

        let mut update = Document::new();
        update.insert("bikes".into(), json!([{ "id": "x" }]));
        merge_fields(&mut target, update);

        assert_eq!(target["bikes"], json!([{ "id": "x" }]));
        assert_eq!(target["userSettings"], json!({ "a": 1 }));
    }

    #[test]
    fn test_registry_notify_and_cancel() {
        let registry = ListenerRegistry::default();
        let doc = DocumentRef::device("A");
        let count = Arc::new(AtomicUsize::new(0));
        let (on_data, on_error) = counting_listener(&count);

        let sub = registry.register(&doc, on_data, on_error).unwrap();
        assert_eq!(registry.live_count(&doc), 1);

        registry.notify(&doc, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sub.cancel();
        assert_eq!(registry.live_count(&doc), 0);
        registry.notify(&doc, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_registration() {
        let registry = ListenerRegistry::default();
        let doc = DocumentRef::owner("x");
        let count = Arc::new(AtomicUsize::new(0));
        let (on_data, on_error) = counting_listener(&count);

        {
            let sub = registry.register(&doc, on_data, on_error).unwrap();
            assert!(sub.is_active());
        }
        assert_eq!(registry.live_count(&doc), 0);
    }

    #[test]
    fn test_callback_may_cancel_during_notify() {
        let registry = ListenerRegistry::default();
        let doc = DocumentRef::owner("ada@example.com");
        let slot: Arc<std::sync::Mutex<Option<Subscription>>> = Arc::default();
        let held = Arc::clone(&slot);
        let sub = registry
            .register(
                &doc,
                Box::new(move |_| {
                    held.lock().unwrap().take();
                }),
                Box::new(|_| {}),
            )
            .unwrap();
        *slot.lock().unwrap() = Some(sub);

        registry.notify(&doc, None);
        assert_eq!(registry.live_count(&doc), 0);
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn test_registry_ids_are_unique() {
        let registry = ListenerRegistry::default();
        let doc = DocumentRef::owner("x");
        let a = registry
            .register(&doc, Box::new(|_| {}), Box::new(|_| {}))
            .unwrap();
        let b = registry
            .register(&doc, Box::new(|_| {}), Box::new(|_| {}))
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.live_count(&doc), 2);
    }

    #[test]
    fn test_fail_reaches_error_callback() {
        let registry = ListenerRegistry::default();
        let doc = DocumentRef::owner("x");
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let _sub = registry
            .register(
                &doc,
                Box::new(|_| {}),
                Box::new(move |e| {
                    assert!(matches!(e, Error::Subscription { .. }));
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        registry.fail(&doc, "permission denied");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
