//! Command-line front end.

use crate::egest::*;
use crate::export::export_tables;
use crate::ingest::{IngestReport, ingest_version};
use crate::manifest::Manifest;
use crate::model::RevisionState;
use crate::rehash::{HashEngine, RehashReport};
use crate::settings::HashTreeSettings;
use crate::store::{self, EntityStore};
use crate::validate::{validate, validate_deep};
use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "idc-hashtree",
    version,
    about = "Versioned hierarchical Merkle hashing of the IDC catalog",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Database connection string (default: IDC_HASHTREE_DB__CONNECTION).
    #[arg(long, global = true, value_name = "URL")]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a new version from a manifest.
    Ingest(IngestArgs),

    /// Recompute the hashes of a version.
    Rehash(VersionArg),

    /// Report stale hashes of a version without changing them.
    Verify(VersionArg),

    /// Undo a version, or a single entity of it.
    #[command(subcommand)]
    Egest(EgestCommand),

    /// Check the invariants of the store.
    Check(CheckArgs),

    /// Export every table as newline-delimited JSON.
    Export(ExportArgs),

    /// Summarize the versions, or the collections of one version.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Number of the new version.
    #[arg(long)]
    pub version: u32,

    /// Version to build on (default: the latest version).
    #[arg(long)]
    pub previous: Option<u32>,

    /// JSON manifest of the new version's content.
    #[arg(long, value_name = "FILE")]
    pub manifest: Utf8PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArg {
    #[arg(long)]
    pub version: u32,
}

#[derive(Subcommand, Debug)]
pub enum EgestCommand {
    /// Undo the latest version completely.
    Version(VersionArg),

    /// Undo one collection of the latest version.
    Collection {
        #[arg(long)]
        version: u32,
        collection_id: String,
    },

    /// Undo one patient of a collection built by the latest version.
    Patient {
        #[arg(long)]
        version: u32,
        /// UUID of the collection.
        collection: Uuid,
        submitter_case_id: String,
    },

    /// Undo one study of a patient built by the latest version.
    Study {
        #[arg(long)]
        version: u32,
        /// UUID of the patient.
        patient: Uuid,
        study_instance_uid: String,
    },

    /// Undo one series of a study built by the latest version.
    Series {
        #[arg(long)]
        version: u32,
        /// UUID of the study.
        study: Uuid,
        series_instance_uid: String,
    },

    /// Undo one instance of a series built by the latest version.
    Instance {
        #[arg(long)]
        version: u32,
        /// UUID of the series.
        series: Uuid,
        sop_instance_uid: String,
    },
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also recompute every version's hashes.
    #[arg(long)]
    pub deep: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output directory (default: IDC_HASHTREE_EXPORT_DIR).
    #[arg(long, value_name = "DIR")]
    pub dir: Option<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub version: Option<u32>,
}

/// Run a command against the catalog database.
pub async fn run(cli: Cli, settings: HashTreeSettings) -> anyhow::Result<()> {
    let mut db = settings.db.clone();
    if let Some(connection) = cli.db {
        db.connection = connection;
    }
    let store = EntityStore::connect(&db)
        .await
        .with_context(|| format!("Could not open {}", db.connection))?;
    let result = run_command(&store, cli.command, &settings).await;
    store.close().await;
    result
}

async fn run_command(store: &EntityStore, command: Commands, settings: &HashTreeSettings) -> anyhow::Result<()> {
    let engine = HashEngine::new(settings.rehash.clone());
    match command {
        Commands::Ingest(args) => {
            let manifest = Manifest::load(&args.manifest).with_context(|| format!("Could not read {}", args.manifest))?;
            let previous = match args.previous {
                Some(previous) => previous,
                None => store::latest_version(&mut *store.acquire().await?).await?.unwrap_or(0),
            };
            let report = ingest_version(store, &engine, &manifest, args.version, previous).await?;
            print_ingest(&report);
        }
        Commands::Rehash(VersionArg { version }) => {
            let report = engine.rehash_version(store, version).await?;
            print_rehash(&report);
        }
        Commands::Verify(VersionArg { version }) => {
            let report = engine.verify_version(store, version).await?;
            for (level, uuid) in &report.changed {
                println!("stale\t{level}\t{uuid}");
            }
            if report.version_changed {
                println!("stale\tversion\t{version}");
            }
            if report.changed_count() > 0 {
                bail!("{} stale node(s) in version {version}", report.changed_count());
            }
            println!("version {version}: {} node(s) verified", report.visited);
        }
        Commands::Egest(command) => {
            let report = egest(store, command).await?;
            println!(
                "deleted {}, detached {}, restored {}, reset {}",
                report.deleted.len(),
                report.detached.len(),
                report.restored.len(),
                report.reset.len()
            );
        }
        Commands::Check(CheckArgs { deep }) => {
            let violations = if deep {
                validate_deep(store, &engine).await?
            } else {
                validate(store).await?
            };
            for violation in &violations {
                println!("{violation}");
            }
            if !violations.is_empty() {
                bail!("{} violation(s)", violations.len());
            }
        }
        Commands::Export(ExportArgs { dir }) => {
            let dir = dir.unwrap_or_else(|| settings.export_dir.clone());
            for (path, rows) in export_tables(store, &dir).await? {
                println!("{path}\t{rows}");
            }
        }
        Commands::Show(ShowArgs { version }) => show(store, version).await?,
    }
    Ok(())
}

async fn egest(store: &EntityStore, command: EgestCommand) -> Result<EgestReport, crate::EgestError> {
    match command {
        EgestCommand::Version(VersionArg { version }) => egest_version(store, version).await,
        EgestCommand::Collection { version, collection_id } => egest_collection(store, version, &collection_id).await,
        EgestCommand::Patient {
            version,
            collection,
            submitter_case_id,
        } => egest_patient(store, version, collection, &submitter_case_id).await,
        EgestCommand::Study {
            version,
            patient,
            study_instance_uid,
        } => egest_study(store, version, patient, &study_instance_uid).await,
        EgestCommand::Series {
            version,
            study,
            series_instance_uid,
        } => egest_series(store, version, study, &series_instance_uid).await,
        EgestCommand::Instance {
            version,
            series,
            sop_instance_uid,
        } => egest_instance(store, version, series, &sop_instance_uid).await,
    }
}

fn print_ingest(report: &IngestReport) {
    println!(
        "version {}: {} new, {} revised, {} unchanged, {} retired",
        report.version,
        report.count(RevisionState::New),
        report.count(RevisionState::Revised),
        report.count(RevisionState::Unchanged),
        report.count(RevisionState::Retired),
    );
}

fn print_rehash(report: &RehashReport) {
    println!(
        "version {}: {} visited, {} skipped, {} changed",
        report.version,
        report.visited,
        report.skipped,
        report.changed_count()
    );
}

async fn show(store: &EntityStore, version: Option<u32>) -> anyhow::Result<()> {
    let mut conn = store.acquire().await?;
    match version {
        None => {
            for v in store::versions(&mut conn).await? {
                println!(
                    "{}\tprevious={}\tdone={}\t{}",
                    v.version, v.previous_version, v.done, v.hashes.all_sources
                );
            }
        }
        Some(version) => {
            store::require_version(&mut conn, version).await?;
            for collection in store::current_child_rows::<crate::Collection>(&mut conn, version, version).await? {
                println!(
                    "{}\t{}\trev={}\t{}",
                    collection.collection_id,
                    collection.row.uuid,
                    collection.row.rev_idc_version,
                    collection.node.hashes.all_sources
                );
            }
        }
    }
    Ok(())
}
