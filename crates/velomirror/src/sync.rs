//! Subscription lifecycle and outbound writes.
//!
//! The [`Reconciler`] owns at most one live subscription per
//! [`ChannelKind`]. Store callbacks only enqueue [`ChannelEvent`]s tagged with
//! the subscription that produced them; the owner of the reconciler drains the
//! queue one event at a time. Events whose tag no longer matches the live
//! subscription of their kind are discarded, so a replaced channel never
//! leaks notifications into the new one.
//!
//! Outbound merges are spawned onto the current tokio runtime and chained so
//! they reach the store in the order they were scheduled.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::remote::{DocumentRef, DocumentStore, Subscription};

/// The two subscription slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// The signed-in owner's document.
    Owner,
    /// The active tracking device's document.
    Device,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// What a subscription delivered.
#[derive(Debug)]
pub enum Notification {
    /// A document snapshot; `None` when the document does not exist.
    Snapshot(Option<Document>),
    /// The subscription reported a failure.
    Failed(Error),
}

/// A queued notification.
#[derive(Debug)]
pub struct ChannelEvent {
    /// Slot the notification belongs to.
    pub kind: ChannelKind,
    /// Tag of the subscription that produced it.
    pub tag: u64,
    /// Document the subscription watches.
    pub document: DocumentRef,
    /// Payload.
    pub notification: Notification,
}

#[derive(Debug)]
struct Channel {
    tag: u64,
    subscription: Subscription,
}

/// Keeps the owner and device subscriptions and the outbound write queue.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    owner: Option<Channel>,
    device: Option<Channel>,
    next_tag: u64,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    writes: JoinSet<()>,
    last_write: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store)
            .field("owner", &self.owner)
            .field("device", &self.device)
            .field("pending_writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler over `store` with nothing subscribed.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            owner: None,
            device: None,
            next_tag: 0,
            events_tx,
            events_rx,
            writes: JoinSet::new(),
            last_write: None,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn slot(&self, kind: ChannelKind) -> Option<&Channel> {
        match kind {
            ChannelKind::Owner => self.owner.as_ref(),
            ChannelKind::Device => self.device.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: ChannelKind) -> &mut Option<Channel> {
        match kind {
            ChannelKind::Owner => &mut self.owner,
            ChannelKind::Device => &mut self.device,
        }
    }

    /// Replace the subscription of `kind` with one on `document`.
    ///
    /// The previous subscription is cancelled before the new one is
    /// requested. On error the slot stays empty.
    ///
    /// # Errors
    ///
    /// Returns the store's subscription error.
    pub async fn subscribe(&mut self, kind: ChannelKind, document: DocumentRef) -> Result<()> {
        self.cancel(kind);

        self.next_tag += 1;
        let tag = self.next_tag;

        let data_tx = self.events_tx.clone();
        let data_doc = document.clone();
        let on_data = Box::new(move |snapshot: Option<Document>| {
            // A closed queue means the reconciler is gone; nothing to deliver to.
            let _ = data_tx.send(ChannelEvent {
                kind,
                tag,
                document: data_doc.clone(),
                notification: Notification::Snapshot(snapshot),
            });
        });
        let error_tx = self.events_tx.clone();
        let error_doc = document.clone();
        let on_error = Box::new(move |err: Error| {
            let _ = error_tx.send(ChannelEvent {
                kind,
                tag,
                document: error_doc.clone(),
                notification: Notification::Failed(err),
            });
        });

        let subscription = self.store.subscribe(&document, on_data, on_error).await?;
        debug!("Subscribed {} channel to {} (tag {})", kind, document, tag);
        *self.slot_mut(kind) = Some(Channel { tag, subscription });
        Ok(())
    }

    /// Cancel the subscription of `kind`. Returns whether one was live.
    pub fn cancel(&mut self, kind: ChannelKind) -> bool {
        match self.slot_mut(kind).take() {
            Some(channel) => {
                debug!("Cancelled {} channel on {}", kind, channel.subscription.document());
                channel.subscription.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription and drop queued events.
    pub fn cancel_all(&mut self) {
        self.cancel(ChannelKind::Owner);
        self.cancel(ChannelKind::Device);
        let dropped = self.drain();
        if dropped > 0 {
            trace!("Dropped {} queued events", dropped);
        }
    }

    /// Discard every queued event, returning how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.events_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Document watched by the subscription of `kind`.
    #[must_use]
    pub fn channel(&self, kind: ChannelKind) -> Option<&DocumentRef> {
        self.slot(kind).map(|c| c.subscription.document())
    }

    /// Whether a subscription of `kind` is live.
    #[must_use]
    pub fn is_live(&self, kind: ChannelKind) -> bool {
        self.slot(kind).is_some_and(|c| c.subscription.is_active())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        [ChannelKind::Owner, ChannelKind::Device]
            .into_iter()
            .filter(|k| self.is_live(*k))
            .count()
    }

    fn is_current(&self, event: &ChannelEvent) -> bool {
        let current = self.slot(event.kind).is_some_and(|c| c.tag == event.tag);
        if !current {
            trace!("Ignoring stale {} event from {} (tag {})", event.kind, event.document, event.tag);
        }
        current
    }

    /// Next queued event from a live subscription, without waiting.
    pub fn try_next(&mut self) -> Option<ChannelEvent> {
        while let Ok(event) = self.events_rx.try_recv() {
            if self.is_current(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Wait for the next event from a live subscription.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        while let Some(event) = self.events_rx.recv().await {
            if self.is_current(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Queue a merge write to `document`.
    ///
    /// The write runs on the current tokio runtime after every previously
    /// scheduled write. Failures are logged and not retried. Without a
    /// runtime the write is skipped.
    pub fn schedule_merge(&mut self, document: DocumentRef, fields: Document) {
        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime; skipping write to {}", document);
            return;
        };

        while let Some(result) = self.writes.try_join_next() {
            if let Err(e) = result {
                error!("Write task failed: {}", e);
            }
        }

        let store = Arc::clone(&self.store);
        let previous = self.last_write.take();
        let (done_tx, done_rx) = oneshot::channel();
        self.last_write = Some(done_rx);

        self.writes.spawn_on(
            async move {
                if let Some(previous) = previous {
                    // Completion or cancellation of the previous write both release us.
                    let _ = previous.await;
                }
                match store.merge(&document, fields).await {
                    Ok(()) => trace!("Wrote {}", document),
                    Err(e) => error!("Write to {} failed: {}", document, e),
                }
                let _ = done_tx.send(());
            },
            &handle,
        );
    }

    /// Number of scheduled writes not yet reaped.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Wait for every scheduled write to finish.
    pub async fn flush(&mut self) {
        while let Some(result) = self.writes.join_next().await {
            if let Err(e) = result {
                error!("Write task failed: {}", e);
            }
        }
        self.last_write = None;
    }
}
