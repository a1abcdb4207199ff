//! Change events emitted after a committed mutation, and the notifiers that receive them

use crate::error::NotifyError;
use crate::model::*;
use async_trait::async_trait;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Something downstream caches need to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    #[serde(rename = "datatype_modified")]
    DatatypeModified {
        datatype: DatatypeId,
        clear_record_cache: bool,
    },
    #[serde(rename = "datatype_link_status_changed")]
    DatatypeLinkStatusChanged {
        root: DatatypeId,
        new_remote: Option<DatatypeId>,
        previous_remote: Option<DatatypeId>,
    },
    #[serde(rename = "record_modified")]
    RecordModified { record: DatarecordId },
    /// One event per mutation, however many root records it touched.
    #[serde(rename = "record_link_status_changed")]
    RecordLinkStatusChanged {
        roots: Vec<DatarecordId>,
        remote_type: DatatypeId,
    },
}

/// Receiver of change events. Owns cache invalidation.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError>;

    fn name(&self) -> &str;
}

/// Deliver `events` in order. Failures are logged and otherwise ignored: the
/// mutation that produced them is already committed.
pub async fn dispatch(notifier: &dyn ChangeNotifier, events: &[ChangeEvent]) {
    for event in events {
        if let Err(e) = notifier.notify(event).await {
            tracing::warn!("Notifier {} failed to deliver {:?}: {}", notifier.name(), event, e);
        }
    }
}

/// Publishes events on a tokio broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| NotifyError::NoSubscribers)
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

/// Tracks which cached artifacts are stale. Thread-safe for concurrent access.
#[derive(Default)]
pub struct InvalidationTracker {
    /// Datatypes whose schema caches must be rebuilt.
    datatypes: DashSet<DatatypeId>,
    /// Datatypes whose cached record renderings must be dropped as well.
    record_caches: DashSet<DatatypeId>,
    /// Root records scheduled for recache.
    records: DashSet<DatarecordId>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_datatype_stale(&self, id: DatatypeId) -> bool {
        self.datatypes.contains(&id)
    }

    pub fn is_record_cache_stale(&self, id: DatatypeId) -> bool {
        self.record_caches.contains(&id)
    }

    pub fn is_record_stale(&self, id: DatarecordId) -> bool {
        self.records.contains(&id)
    }

    /// Take the set of root records awaiting recache, sorted.
    pub fn drain_records(&self) -> Vec<DatarecordId> {
        let mut drained: Vec<DatarecordId> = self.records.iter().map(|r| *r).collect();
        drained.sort();
        for id in &drained {
            self.records.remove(id);
        }
        drained
    }
}

#[async_trait]
impl ChangeNotifier for InvalidationTracker {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        match event {
            ChangeEvent::DatatypeModified {
                datatype,
                clear_record_cache,
            } => {
                self.datatypes.insert(*datatype);
                if *clear_record_cache {
                    self.record_caches.insert(*datatype);
                }
            }
            ChangeEvent::DatatypeLinkStatusChanged { root, .. } => {
                self.datatypes.insert(*root);
            }
            ChangeEvent::RecordModified { record } => {
                self.records.insert(*record);
            }
            ChangeEvent::RecordLinkStatusChanged { roots, .. } => {
                for root in roots {
                    self.records.insert(*root);
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "invalidation"
    }
}

/// Keeps every event it receives. Useful in tests and for dry runs.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Forwards each event to several notifiers. Succeeds only if all of them do.
#[derive(Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn ChangeNotifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn ChangeNotifier>) -> Self {
        self.targets.push(target);
        self
    }
}

#[async_trait]
impl ChangeNotifier for FanoutNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let mut failed = Vec::new();
        for target in &self.targets {
            if let Err(e) = target.notify(event).await {
                failed.push(format!("{}: {}", target.name(), e));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Unavailable(failed.join(", ")))
        }
    }

    fn name(&self) -> &str {
        "fanout"
    }
}
