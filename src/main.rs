//! Schemalink CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "schemalink")]
#[command(about = "Link-graph maintenance for a schema registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Registry root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User id recorded on every change
    #[arg(long, default_value = "1")]
    actor: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty registry
    Init {
        /// Overwrite an existing registry
        #[arg(long)]
        force: bool,
    },
    /// Print datatypes, links, and record links
    Show,
    /// Add a datatype, top-level unless a parent is given
    AddDatatype {
        name: String,
        /// Parent datatype; a child takes its template flag from the parent
        #[arg(long)]
        parent: Option<u64>,
        /// Mark a top-level datatype as a template
        #[arg(long, conflicts_with = "parent")]
        template: bool,
    },
    /// Add an empty slot under the root of a datatype's default layout
    AddSlot {
        /// Datatype whose default layout gets the slot
        #[arg(long)]
        owner: u64,
        /// Datatype the slot renders
        #[arg(long)]
        region: u64,
        /// Parent slot (defaults to the layout root)
        #[arg(long)]
        under: Option<u64>,
    },
    /// Add a record, top-level unless a parent record is given
    AddRecord {
        #[arg(long)]
        datatype: u64,
        #[arg(long)]
        parent: Option<u64>,
    },
    /// Link a datatype to a remote datatype in a slot
    Link {
        local: u64,
        remote: u64,
        #[arg(long)]
        slot: u64,
        /// Remote currently shown in the slot, to replace
        #[arg(long)]
        replace: Option<u64>,
    },
    /// Remove a datatype link shown in a slot
    Unlink {
        local: u64,
        remote: u64,
        #[arg(long)]
        slot: u64,
    },
    /// Reconcile a record's links with a desired set
    SyncRecords {
        record: u64,
        #[arg(long)]
        ancestor_type: u64,
        #[arg(long)]
        descendant_type: u64,
        /// Records the local record should be linked to
        #[arg(long, value_delimiter = ',')]
        desired: Vec<u64>,
        /// Only add links, never remove
        #[arg(long)]
        add_only: bool,
    },
    /// Delete a record and every link touching it
    DeleteRecord { record: u64 },
    /// Report whether linking local -> remote would close a cycle
    CheckCycle { local: u64, remote: u64 },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("schemalink={}", log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = schemalink_core::RegistryConfig::load_or_default(cli.config.as_deref())?;
    let ctx = commands::Context::new(cli.root, config, cli.actor);
    tracing::debug!("Registry file: {}", ctx.registry_file().display());

    match cli.command {
        Commands::Init { force } => commands::init(&ctx, force),
        Commands::Show => commands::show(&ctx).await,
        Commands::AddDatatype { name, parent, template } => {
            commands::add_datatype(&ctx, name, parent, template).await
        }
        Commands::AddSlot { owner, region, under } => {
            commands::add_slot(&ctx, owner, region, under).await
        }
        Commands::AddRecord { datatype, parent } => {
            commands::add_record(&ctx, datatype, parent).await
        }
        Commands::Link { local, remote, slot, replace } => {
            commands::link(&ctx, local, Some(remote), replace, slot).await
        }
        Commands::Unlink { local, remote, slot } => {
            commands::link(&ctx, local, None, Some(remote), slot).await
        }
        Commands::SyncRecords { record, ancestor_type, descendant_type, desired, add_only } => {
            commands::sync_records(&ctx, record, ancestor_type, descendant_type, desired, add_only).await
        }
        Commands::DeleteRecord { record } => {
            commands::delete_record(&ctx, record).await
        }
        Commands::CheckCycle { local, remote } => {
            commands::check_cycle(&ctx, local, remote).await
        }
        Commands::Version => {
            println!("Schemalink v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
