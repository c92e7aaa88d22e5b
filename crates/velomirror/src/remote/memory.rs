//! In-process document store.
//!
//! Holds documents in a map and notifies subscribers synchronously from the
//! writing call. Tests use the write log and failure switches to observe and
//! disturb the sync path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{merge_fields, Document, DocumentRef, DocumentStore, ErrorFn, ListenerRegistry, SnapshotFn, Subscription};
use crate::error::{Error, Result};

/// A document store living entirely in memory.
///
/// Subscription callbacks run while the document map is locked and must not
/// read or write the store. The listener registry is not locked during
/// delivery, so a callback may cancel subscriptions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<DocumentRef, Document>>,
    listeners: ListenerRegistry,
    write_log: Mutex<Vec<(DocumentRef, Document)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_documents(&self) -> Result<std::sync::MutexGuard<'_, HashMap<DocumentRef, Document>>> {
        self.documents
            .lock()
            .map_err(|_| Error::internal("memory store lock poisoned"))
    }

    /// Replace a document wholesale, as another client would, and notify.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn put(&self, doc: &DocumentRef, body: Document) -> Result<()> {
        let mut documents = self.lock_documents()?;
        documents.insert(doc.clone(), body.clone());
        self.listeners.notify(doc, Some(&body));
        Ok(())
    }

    /// Delete a document and notify subscribers with an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn remove(&self, doc: &DocumentRef) -> Result<bool> {
        let mut documents = self.lock_documents()?;
        let existed = documents.remove(doc).is_some();
        self.listeners.notify(doc, None);
        Ok(existed)
    }

    /// Current body of a document.
    #[must_use]
    pub fn snapshot(&self, doc: &DocumentRef) -> Option<Document> {
        self.documents.lock().ok()?.get(doc).cloned()
    }

    /// Every merge and create applied so far, oldest first.
    #[must_use]
    pub fn write_log(&self) -> Vec<(DocumentRef, Document)> {
        self.write_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Writes applied to one document, oldest first.
    #[must_use]
    pub fn writes_to(&self, doc: &DocumentRef) -> Vec<Document> {
        self.write_log()
            .into_iter()
            .filter(|(target, _)| target == doc)
            .map(|(_, fields)| fields)
            .collect()
    }

    /// Forget the recorded writes.
    pub fn clear_write_log(&self) {
        if let Ok(mut log) = self.write_log.lock() {
            log.clear();
        }
    }

    /// Number of live subscriptions on a document.
    #[must_use]
    pub fn listener_count(&self, doc: &DocumentRef) -> usize {
        self.listeners.live_count(doc)
    }

    /// Make reads and new subscriptions fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make merges and creates fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Push a failure to the subscribers of a document.
    pub fn fail_subscribers(&self, doc: &DocumentRef, message: &str) {
        self.listeners.fail(doc, message);
    }

    fn record(&self, doc: &DocumentRef, fields: &Document) {
        if let Ok(mut log) = self.write_log.lock() {
            log.push((doc.clone(), fields.clone()));
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::remote_read(doc, "reads disabled"));
        }
        Ok(self.lock_documents()?.get(doc).cloned())
    }

    async fn merge(&self, doc: &DocumentRef, fields: Document) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::remote_write(doc, "writes disabled"));
        }
        let mut documents = self.lock_documents()?;
        self.record(doc, &fields);
        let body = documents.entry(doc.clone()).or_default();
        merge_fields(body, fields);
        trace!("Merged into {}", doc);
        let body = body.clone();
        self.listeners.notify(doc, Some(&body));
        Ok(())
    }

    async fn create_if_absent(&self, doc: &DocumentRef, fields: Document) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::remote_write(doc, "writes disabled"));
        }
        let mut documents = self.lock_documents()?;
        if documents.contains_key(doc) {
            return Ok(false);
        }
        self.record(doc, &fields);
        documents.insert(doc.clone(), fields.clone());
        debug!("Created {}", doc);
        self.listeners.notify(doc, Some(&fields));
        Ok(true)
    }

    async fn subscribe(
        &self,
        doc: &DocumentRef,
        on_data: SnapshotFn,
        on_error: ErrorFn,
    ) -> Result<Subscription> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::subscription(doc, "reads disabled"));
        }
        // Holding the lock orders the initial snapshot before any later write.
        let documents = self.lock_documents()?;
        on_data(documents.get(doc).cloned());
        self.listeners.register(doc, on_data, on_error)
    }
}
