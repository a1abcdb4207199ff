//! CLI command implementations

use anyhow::Context as _;
use schemalink_core::*;
use schemalink_linker::{LinkMutator, RecordLinker, SetLinkRequest, SyncMode, SyncRequest};
use std::path::PathBuf;
use std::sync::Arc;

/// Settings shared by every command.
pub struct Context {
    root: PathBuf,
    config: RegistryConfig,
    actor: ActorId,
}

impl Context {
    pub fn new(root: PathBuf, config: RegistryConfig, actor: u64) -> Self {
        Self {
            root,
            config,
            actor: ActorId(actor),
        }
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join(&self.config.snapshot_path)
    }
}

/// A registry loaded for the duration of one command.
struct Session {
    store: RegistryStore,
    recorder: Arc<RecordingNotifier>,
    tracker: Arc<InvalidationTracker>,
    path: PathBuf,
}

impl Session {
    fn open(ctx: &Context) -> anyhow::Result<Self> {
        let path = ctx.registry_file();
        let state = load_registry(&path)?
            .with_context(|| format!("no registry at {} (run `schemalink init` first)", path.display()))?;
        Ok(Session {
            store: RegistryStore::from_state(state, ctx.config.clone()),
            recorder: Arc::new(RecordingNotifier::new()),
            tracker: Arc::new(InvalidationTracker::new()),
            path,
        })
    }

    fn notifier(&self) -> Arc<dyn ChangeNotifier> {
        Arc::new(
            FanoutNotifier::new()
                .with(self.recorder.clone())
                .with(self.tracker.clone()),
        )
    }

    /// Print what was announced and write the registry back.
    async fn close(self) -> anyhow::Result<()> {
        for event in self.recorder.take().await {
            println!("  event: {}", serde_json::to_string(&event)?);
        }
        let stale = self.tracker.drain_records();
        if !stale.is_empty() {
            tracing::debug!("{} cached records invalidated", stale.len());
        }
        save_registry(&self.store.export().await, &self.path)?;
        Ok(())
    }
}

pub fn init(ctx: &Context, force: bool) -> anyhow::Result<()> {
    let path = ctx.registry_file();
    if path.exists() && !force {
        anyhow::bail!("registry already exists at {} (use --force to overwrite)", path.display());
    }
    save_registry(&RegistryState::new(), &path)?;
    tracing::info!("Initialized empty registry at {}", path.display());
    Ok(())
}

pub async fn show(ctx: &Context) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let state = session.store.read().await;
    print!("{}", render(&state));
    Ok(())
}

/// Human-readable listing of the active registry.
pub fn render(state: &RegistryState) -> String {
    let mut out = format!("registry version {}\n", state.version());

    out.push_str("datatypes:\n");
    for dt in state.datatypes.values().filter(|d| d.is_active()) {
        let mut tags = Vec::new();
        if !dt.is_top_level() {
            tags.push(format!("root {}", dt.grandparent.0));
        }
        if dt.is_template {
            tags.push(format!("template rev {}", dt.template_revision));
        }
        if let Some(target) = dt.metadata_for {
            tags.push(format!("metadata for {}", target.0));
        }
        let tags = if tags.is_empty() { String::new() } else { format!(" ({})", tags.join(", ")) };
        out.push_str(&format!("  [{}] {}{}\n", dt.id.0, dt.name, tags));
    }

    out.push_str("links:\n");
    for edge in state.link_edges.values().filter(|e| e.is_active()) {
        let arity = if edge.multiple_allowed { "many" } else { "one" };
        out.push_str(&format!("  {} -> {} ({})\n", edge.ancestor.0, edge.descendant.0, arity));
    }

    out.push_str("record links:\n");
    for link in state.record_links.values().filter(|l| l.is_active()) {
        out.push_str(&format!("  {} -> {}\n", link.ancestor.0, link.descendant.0));
    }
    out
}

pub async fn add_datatype(ctx: &Context, name: String, parent: Option<u64>, template: bool) -> anyhow::Result<()> {
    if parent.is_some() && template {
        anyhow::bail!("a child datatype takes its template flag from its parent; drop --template");
    }
    let session = Session::open(ctx)?;
    let id = session
        .store
        .write(ctx.actor, |txn| match parent {
            Some(parent) => txn.add_child_datatype(DatatypeId(parent), &name),
            None => Ok(txn.add_datatype(&name, template)),
        })
        .await?;
    println!("datatype {} created", id.0);
    session.close().await
}

pub async fn add_slot(ctx: &Context, owner: u64, region: u64, under: Option<u64>) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let id = session
        .store
        .write(ctx.actor, |txn| {
            let parent = match under {
                Some(slot) => LayoutNodeId(slot),
                None => txn.state().default_layout(DatatypeId(owner))?.root,
            };
            txn.state().datatype(DatatypeId(region))?;
            txn.add_slot(parent, DatatypeId(region), SlotContent::Empty)
        })
        .await?;
    println!("slot {} created", id.0);
    session.close().await
}

pub async fn add_record(ctx: &Context, datatype: u64, parent: Option<u64>) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let id = session
        .store
        .write(ctx.actor, |txn| match parent {
            Some(parent) => txn.add_child_datarecord(DatarecordId(parent), DatatypeId(datatype)),
            None => txn.add_datarecord(DatatypeId(datatype)),
        })
        .await?;
    println!("record {} created", id.0);
    session.close().await
}

pub async fn link(
    ctx: &Context,
    local: u64,
    new_remote: Option<u64>,
    previous_remote: Option<u64>,
    slot: u64,
) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let mutator = LinkMutator::new(session.store.clone(), session.notifier());
    let request = SetLinkRequest {
        local: DatatypeId(local),
        new_remote: new_remote.map(DatatypeId),
        previous_remote: previous_remote.map(DatatypeId),
        slot: LayoutNodeId(slot),
    };

    let outcome = mutator.set_datatype_link(ctx.actor, request).await?;
    match outcome.linked_datatype {
        Some(remote) => println!("slot {} now shows datatype {}", outcome.slot.0, remote.0),
        None => println!("slot {} is empty", outcome.slot.0),
    }
    if !outcome.unlinked_records.is_empty() {
        println!("  {} records lost link instances", outcome.unlinked_records.len());
    }
    session.close().await
}

pub async fn sync_records(
    ctx: &Context,
    record: u64,
    ancestor_type: u64,
    descendant_type: u64,
    desired: Vec<u64>,
    add_only: bool,
) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let linker = RecordLinker::new(session.store.clone(), session.notifier());
    let request = SyncRequest {
        local_record: DatarecordId(record),
        ancestor_type: DatatypeId(ancestor_type),
        descendant_type: DatatypeId(descendant_type),
        desired: desired.into_iter().map(DatarecordId).collect(),
        mode: if add_only { SyncMode::AddOnly } else { SyncMode::FullSync },
    };

    let outcome = linker.sync_record_links(ctx.actor, request).await?;
    println!(
        "record {}: {} links created, {} removed",
        record,
        outcome.created.len(),
        outcome.removed.len()
    );
    session.close().await
}

pub async fn delete_record(ctx: &Context, record: u64) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let linker = RecordLinker::new(session.store.clone(), session.notifier());
    let outcome = linker.delete_record(ctx.actor, DatarecordId(record)).await?;
    println!("record {} deleted, {} links removed", record, outcome.removed.len());
    session.close().await
}

pub async fn check_cycle(ctx: &Context, local: u64, remote: u64) -> anyhow::Result<()> {
    let session = Session::open(ctx)?;
    let snapshot = session.store.read().await.snapshot();
    match cycle_report(&snapshot, DatatypeId(local), DatatypeId(remote)) {
        Some(path) => println!("cycle: {}", path),
        None => println!("no cycle: {} -> {} is safe", local, remote),
    }
    Ok(())
}

/// The closing loop as `remote -> .. -> local -> remote`, if there is one.
fn cycle_report(snapshot: &SchemaSnapshot, local: DatatypeId, remote: DatatypeId) -> Option<String> {
    let path = find_cycle_path(&snapshot.linked_from(), local, remote)?;
    let mut hops: Vec<String> = path.iter().map(|d| d.0.to_string()).collect();
    hops.push(remote.0.to_string());
    Some(hops.join(" -> "))
}

