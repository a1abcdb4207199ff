//! Integration tests for Schemalink
//!
//! These tests drive the linker services against a registry that is saved to
//! and reloaded from disk between steps.

use schemalink_core::*;
use schemalink_linker::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

const ACTOR: ActorId = ActorId(3);

struct Registry {
    store: RegistryStore,
    events: Arc<RecordingNotifier>,
}

impl Registry {
    fn open(path: &std::path::Path) -> Self {
        let state = load_registry(path).unwrap().unwrap_or_default();
        Registry {
            store: RegistryStore::from_state(state, RegistryConfig::default()),
            events: Arc::new(RecordingNotifier::new()),
        }
    }

    fn mutator(&self) -> LinkMutator {
        LinkMutator::new(self.store.clone(), self.events.clone())
    }

    fn linker(&self) -> RecordLinker {
        RecordLinker::new(self.store.clone(), self.events.clone())
    }

    async fn save(&self, path: &std::path::Path) {
        save_registry(&self.store.export().await, path).unwrap();
    }
}

/// Project and Sample top-level types, Sample with a furnished layout.
async fn seed(registry: &Registry) -> (DatatypeId, DatatypeId, LayoutNodeId) {
    registry
        .store
        .write(ActorId(0), |txn| {
            let project = txn.add_datatype("Project", false);
            let sample = txn.add_datatype("Sample", false);
            let sample_root = txn.state().default_layout(sample)?.root;
            txn.add_slot(sample_root, sample, SlotContent::Fields(vec![FieldId(1)]))?;
            let project_root = txn.state().default_layout(project)?.root;
            let slot = txn.add_slot(project_root, project, SlotContent::Empty)?;
            Ok((project, sample, slot))
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_link_survives_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(dir.path());

    let first = Registry::open(&path);
    let (project, sample, slot) = seed(&first).await;
    first
        .mutator()
        .set_datatype_link(
            ACTOR,
            SetLinkRequest {
                local: project,
                new_remote: Some(sample),
                previous_remote: None,
                slot,
            },
        )
        .await
        .unwrap();
    first.save(&path).await;

    let second = Registry::open(&path);
    {
        let state = second.store.read().await;
        assert!(state.link_edge(project, sample).is_some());
        assert_eq!(state.slot(slot).unwrap().content, SlotContent::Linked(sample));
        assert_eq!(state.children(slot).count(), 1);
    }

    // Unlinking after the reload cleans up what the first session cloned.
    second
        .mutator()
        .set_datatype_link(
            ACTOR,
            SetLinkRequest {
                local: project,
                new_remote: None,
                previous_remote: Some(sample),
                slot,
            },
        )
        .await
        .unwrap();
    let state = second.store.read().await;
    assert!(state.link_edge(project, sample).is_none());
    assert_eq!(state.children(slot).count(), 0);
}

#[tokio::test]
async fn test_ids_keep_increasing_across_sessions() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(dir.path());

    let first = Registry::open(&path);
    let (project, sample, _) = seed(&first).await;
    first.save(&path).await;

    let second = Registry::open(&path);
    let fresh = second
        .store
        .write(ACTOR, |txn| Ok(txn.add_datatype("Container", false)))
        .await
        .unwrap();
    assert!(fresh > project && fresh > sample);
}

#[tokio::test]
async fn test_record_workflow_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(dir.path());

    let registry = Registry::open(&path);
    let (project, sample, slot) = seed(&registry).await;
    registry
        .mutator()
        .set_datatype_link(
            ACTOR,
            SetLinkRequest {
                local: project,
                new_remote: Some(sample),
                previous_remote: None,
                slot,
            },
        )
        .await
        .unwrap();

    let (p1, samples) = registry
        .store
        .write(ACTOR, |txn| {
            let p1 = txn.add_datarecord(project)?;
            let samples = (0..3).map(|_| txn.add_datarecord(sample)).collect::<Result<Vec<_>>>()?;
            Ok((p1, samples))
        })
        .await
        .unwrap();

    let linker = registry.linker();
    let request = SyncRequest {
        local_record: p1,
        ancestor_type: project,
        descendant_type: sample,
        desired: samples.iter().copied().collect(),
        mode: SyncMode::FullSync,
    };
    let created = linker.sync_record_links(ACTOR, request.clone()).await.unwrap();
    assert_eq!(created.created.len(), 3);
    assert!(linker.sync_record_links(ACTOR, request).await.unwrap().is_noop());

    registry.save(&path).await;
    let reloaded = Registry::open(&path);
    let outcome = reloaded.linker().delete_record(ACTOR, samples[0]).await.unwrap();
    assert_eq!(outcome.removed.len(), 1);
    assert_eq!(outcome.affected_roots.get(&project), Some(&BTreeSet::from([p1])));

    let state = reloaded.store.read().await;
    let remaining: BTreeSet<_> = state.record_links_of(p1).map(|l| l.descendant).collect();
    assert_eq!(remaining, BTreeSet::from([samples[1], samples[2]]));
}

#[tokio::test]
async fn test_cycle_guard_sees_reloaded_links() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(dir.path());

    let registry = Registry::open(&path);
    let (project, sample, slot) = seed(&registry).await;
    registry
        .mutator()
        .set_datatype_link(
            ACTOR,
            SetLinkRequest {
                local: project,
                new_remote: Some(sample),
                previous_remote: None,
                slot,
            },
        )
        .await
        .unwrap();
    registry.save(&path).await;

    let reloaded = Registry::open(&path);
    let back = reloaded
        .store
        .write(ACTOR, |txn| {
            let root = txn.state().default_layout(sample)?.root;
            txn.add_slot(root, sample, SlotContent::Empty)
        })
        .await
        .unwrap();

    let snapshot = reloaded.store.read().await.snapshot();
    assert!(would_create_cycle(&snapshot.linked_from(), sample, project));

    let err = reloaded
        .mutator()
        .set_datatype_link(
            ACTOR,
            SetLinkRequest {
                local: sample,
                new_remote: Some(project),
                previous_remote: None,
                slot: back,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Cycle { .. }));
}

#[tokio::test]
async fn test_broadcast_and_tracker_receive_the_same_events() {
    let registry = Registry::open(&TempDir::new().unwrap().path().join("unused.json"));
    let (project, sample, slot) = seed(&registry).await;

    let broadcast = Arc::new(BroadcastNotifier::new(registry.store.config().event_channel_capacity));
    let mut rx = broadcast.subscribe();
    let tracker = Arc::new(InvalidationTracker::new());
    let fanout = FanoutNotifier::new().with(broadcast.clone()).with(tracker.clone());

    LinkMutator::new(registry.store.clone(), Arc::new(fanout))
        .set_datatype_link(
            ACTOR,
            SetLinkRequest {
                local: project,
                new_remote: Some(sample),
                previous_remote: None,
                slot,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        ChangeEvent::DatatypeModified {
            datatype: project,
            clear_record_cache: false,
        }
    );
    assert!(tracker.is_datatype_stale(project));
    assert!(!tracker.is_record_cache_stale(project));
}

#[test]
fn test_config_file_controls_depth_limit() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("schemalink.toml");
    std::fs::write(&config_path, "max_layout_depth = 2\n").unwrap();

    let config = RegistryConfig::load_or_default(Some(&config_path)).unwrap();
    assert_eq!(config.max_layout_depth, 2);
    assert_eq!(config.snapshot_path, registry_path(std::path::Path::new(".")));

    let missing = RegistryConfig::load_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(missing, RegistryConfig::default());
}
