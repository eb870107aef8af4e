//! Building a new version from a [Manifest].
//!
//! Every entity of the manifest is matched by natural key against the children which
//! the corresponding parent had in the previous version:
//!
//! - no match: a NEW row is created.
//! - a match whose stored hashes equal the manifest's: the existing row is attached to
//!   the new parent (UNCHANGED).
//! - a match whose hashes differ: a new row succeeds it (REVISED), and the old row's
//!   `final_idc_version` becomes the previous version.
//! - a previous child which the manifest no longer lists is RETIRED.
//!
//! A version is built and hashed inside one database transaction. If anything fails,
//! the store is left as it was.

use crate::association::Association;
use crate::error::{IngestError, StoreError};
use crate::hashes::{HashTriple, SourceFlags};
use crate::manifest::*;
use crate::model::*;
use crate::rehash::{HashEngine, RehashReport};
use crate::store::{self, EntityStore};
use crate::types::{Level, Source};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Sqlite, Transaction};
use std::collections::HashSet;
use tracing::Instrument;
use uuid::Uuid;

/// Outcome of building a version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub version: u32,
    /// State of every row which the build created, attached or retired.
    pub rows: Vec<(RevisionState, Level, Uuid)>,
    pub rehash: RehashReport,
}

impl IngestReport {
    pub fn uuids(&self, state: RevisionState, level: Level) -> Vec<Uuid> {
        self.rows
            .iter()
            .filter(|(s, l, _)| *s == state && *l == level)
            .map(|(_, _, uuid)| *uuid)
            .collect()
    }

    pub fn count(&self, state: RevisionState) -> usize {
        self.rows.iter().filter(|(s, _, _)| *s == state).count()
    }
}

/// Build version `version` on top of `previous` (0 if it is the first version).
///
/// `previous` must be the latest version in the store, and `version` must be greater.
/// The transaction is committed if-*and-only-if* the whole version was built and hashed.
pub async fn ingest_version(
    store: &EntityStore,
    engine: &HashEngine,
    manifest: &Manifest,
    version: u32,
    previous: u32,
) -> Result<IngestReport, IngestError> {
    let span = tracing::info_span!("ingest", version, previous);
    build_version(store, engine, manifest, version, previous)
        .instrument(span)
        .await
}

async fn build_version(
    store: &EntityStore,
    engine: &HashEngine,
    manifest: &Manifest,
    version: u32,
    previous: u32,
) -> Result<IngestReport, IngestError> {
    let mut transaction = store.begin().await?;
    let latest = store::latest_version(&mut transaction).await?;
    if previous != latest.unwrap_or(0) {
        return Err(IngestError::NotOnLatest {
            version,
            previous,
            latest,
        });
    }
    if version <= previous {
        return Err(IngestError::NotAfterLatest {
            version,
            latest: previous,
        });
    }
    store::insert_version(&mut transaction, &Version::new(version, previous)).await?;

    let mut builder = Builder {
        transaction,
        version,
        previous,
        built: Vec::new(),
        rows: Vec::new(),
    };
    let previous_parent = (previous != 0).then_some(previous);
    builder
        .build_all(&manifest.collections, version, previous_parent)
        .await?;
    let Builder {
        mut transaction,
        built,
        rows,
        ..
    } = builder;

    let rehash = engine.rehash_in(&mut transaction, version).await?;
    for (level, uuid, predecessor) in built {
        set_revised(&mut transaction, level, uuid, predecessor).await?;
    }
    finish_version(&mut transaction, version, previous).await?;
    transaction.commit().await.map_err(StoreError::from)?;

    let report = IngestReport {
        version,
        rows,
        rehash,
    };
    tracing::info!(
        new = report.count(RevisionState::New),
        revised = report.count(RevisionState::Revised),
        unchanged = report.count(RevisionState::Unchanged),
        retired = report.count(RevisionState::Retired),
        "Version built"
    );
    Ok(report)
}

struct Builder {
    transaction: Transaction<'static, Sqlite>,
    version: u32,
    previous: u32,
    /// Rows created by this build, with their predecessors.
    built: Vec<(Level, Uuid, Option<Uuid>)>,
    rows: Vec<(RevisionState, Level, Uuid)>,
}

impl Builder {
    /// Build the children `items` of `parent`. `previous_parent` is the row which held
    /// the same children in the previous version, if any.
    async fn build_all<M: Build>(
        &mut self,
        items: &[M],
        parent: <M::Entity as Entity>::ParentKey,
        previous_parent: Option<<M::Entity as Entity>::ParentKey>,
    ) -> Result<(), IngestError> {
        let previous_children = match previous_parent {
            Some(p) => store::current_child_rows::<M::Entity>(&mut self.transaction, p, self.previous).await?,
            None => Vec::new(),
        };
        let mut keys = HashSet::new();
        let mut matched = HashSet::new();
        for item in items {
            let key = item.natural_key();
            if !keys.insert(M::Entity::normalized_key(key)) {
                return Err(IngestError::DuplicateKey {
                    level: M::Entity::LEVEL,
                    key: key.to_string(),
                });
            }
            let predecessor = previous_children.iter().find(|row| row.key_matches(key)).cloned();
            if let Some(predecessor) = &predecessor {
                matched.insert(predecessor.row().uuid);
            }
            self.build(item, parent, predecessor).await?;
        }
        for row in previous_children {
            let uuid = row.row().uuid;
            if !matched.contains(&uuid) {
                retire(&mut self.transaction, M::Entity::LEVEL, uuid, self.previous, &mut self.rows).await?;
            }
        }
        Ok(())
    }

    async fn build<M: Build>(
        &mut self,
        item: &M,
        parent: <M::Entity as Entity>::ParentKey,
        predecessor: Option<M::Entity>,
    ) -> Result<Uuid, IngestError> {
        let level = M::Entity::LEVEL;
        if let Some(row) = &predecessor {
            if item.is_unchanged(row) {
                let uuid = row.row().uuid;
                store::attach_existing::<M::Entity>(&mut self.transaction, uuid, parent).await?;
                self.rows.push((RevisionState::Unchanged, level, uuid));
                return Ok(uuid);
            }
        }

        let mut row = match &predecessor {
            Some(predecessor) => {
                let mut row = M::Entity::create(
                    item.natural_key(),
                    RowMeta::revision_of(predecessor.row(), self.version),
                );
                row.inherit_lineage(predecessor);
                row
            }
            None => M::Entity::create(item.natural_key(), RowMeta::new(self.version)),
        };
        row.row_mut().expanded = true;
        let uuid = store::insert(&mut self.transaction, &row).await?;
        store::attach::<M::Entity>(&mut self.transaction, parent, uuid).await?;
        let predecessor_uuid = predecessor.map(|p| p.row().uuid);
        if let Some(predecessor) = predecessor_uuid {
            store::set_final(&mut self.transaction, level, predecessor, self.previous).await?;
        }
        tracing::debug!(%level, %uuid, key = item.natural_key(), predecessor = ?predecessor_uuid, "Building");

        item.fill(self, &mut row, predecessor_uuid).await?;
        row.row_mut().done = true;
        store::save(&mut self.transaction, &row).await?;

        let state = if predecessor_uuid.is_some() {
            RevisionState::Revised
        } else {
            RevisionState::New
        };
        self.rows.push((state, level, uuid));
        self.built.push((level, uuid, predecessor_uuid));
        Ok(uuid)
    }
}

/// A manifest node which becomes an `Entity` row.
trait Build: ManifestNode {
    type Entity: Entity;

    /// Whether `row` already has this node's content.
    fn is_unchanged(&self, row: &Self::Entity) -> bool;

    /// Copy this node's attributes onto the new `row` and build its children.
    fn fill<'a>(
        &'a self,
        builder: &'a mut Builder,
        row: &'a mut Self::Entity,
        predecessor: Option<Uuid>,
    ) -> LocalBoxFuture<'a, Result<(), IngestError>>;
}

fn same_digest<B: Branch>(item: &impl ManifestNode, row: &B) -> bool {
    let (hashes, sources) = item.digest();
    row.node().hashes == hashes && row.node().sources == sources
}

fn set_timestamps(node: &mut NodeState, item: &impl ManifestNode) {
    let (min, max) = item.timestamps();
    node.min_timestamp = min;
    node.max_timestamp = max;
}

impl Build for CollectionManifest {
    type Entity = Collection;

    fn is_unchanged(&self, row: &Collection) -> bool {
        same_digest(self, row)
    }

    fn fill<'a>(
        &'a self,
        builder: &'a mut Builder,
        row: &'a mut Collection,
        predecessor: Option<Uuid>,
    ) -> LocalBoxFuture<'a, Result<(), IngestError>> {
        async move {
            builder.build_all(&self.patients, row.row.uuid, predecessor).await?;
            set_timestamps(&mut row.node, self);
            Ok(())
        }
        .boxed_local()
    }
}

impl Build for PatientManifest {
    type Entity = Patient;

    fn is_unchanged(&self, row: &Patient) -> bool {
        same_digest(self, row)
    }

    fn fill<'a>(
        &'a self,
        builder: &'a mut Builder,
        row: &'a mut Patient,
        predecessor: Option<Uuid>,
    ) -> LocalBoxFuture<'a, Result<(), IngestError>> {
        async move {
            builder.build_all(&self.studies, row.row.uuid, predecessor).await?;
            set_timestamps(&mut row.node, self);
            Ok(())
        }
        .boxed_local()
    }
}

impl Build for StudyManifest {
    type Entity = Study;

    fn is_unchanged(&self, row: &Study) -> bool {
        same_digest(self, row)
    }

    fn fill<'a>(
        &'a self,
        builder: &'a mut Builder,
        row: &'a mut Study,
        predecessor: Option<Uuid>,
    ) -> LocalBoxFuture<'a, Result<(), IngestError>> {
        async move {
            builder.build_all(&self.series, row.row.uuid, predecessor).await?;
            set_timestamps(&mut row.node, self);
            row.study_instances = self.instance_count();
            Ok(())
        }
        .boxed_local()
    }
}

impl Build for SeriesManifest {
    type Entity = Series;

    fn is_unchanged(&self, row: &Series) -> bool {
        same_digest(self, row) && row.source_doi == self.source_doi && row.source_url == self.source_url
    }

    fn fill<'a>(
        &'a self,
        builder: &'a mut Builder,
        row: &'a mut Series,
        predecessor: Option<Uuid>,
    ) -> LocalBoxFuture<'a, Result<(), IngestError>> {
        async move {
            builder.build_all(&self.instances, row.row.uuid, predecessor).await?;
            set_timestamps(&mut row.node, self);
            row.series_instances = self.instances.len() as i64;
            row.source_doi = self.source_doi.clone();
            row.source_url = self.source_url.clone();
            Ok(())
        }
        .boxed_local()
    }
}

impl Build for InstanceManifest {
    type Entity = Instance;

    fn is_unchanged(&self, row: &Instance) -> bool {
        row.hash == self.hash && row.source == self.source
    }

    fn fill<'a>(
        &'a self,
        _builder: &'a mut Builder,
        row: &'a mut Instance,
        predecessor: Option<Uuid>,
    ) -> LocalBoxFuture<'a, Result<(), IngestError>> {
        row.hash = self.hash.clone();
        row.size = self.size;
        row.source = self.source;
        row.excluded = self.excluded;
        row.timestamp = self.timestamp;
        row.revised = predecessor.is_some();
        futures::future::ok(()).boxed_local()
    }
}

/// Retire the row `uuid` and whatever below it is still current.
async fn retire(
    conn: &mut SqliteConnection,
    level: Level,
    uuid: Uuid,
    previous: u32,
    rows: &mut Vec<(RevisionState, Level, Uuid)>,
) -> Result<(), StoreError> {
    let mut pending = vec![(level, uuid)];
    while let Some((level, uuid)) = pending.pop() {
        if !store::set_final(conn, level, uuid, previous).await? {
            continue;
        }
        tracing::debug!(%level, %uuid, "Retired");
        rows.push((RevisionState::Retired, level, uuid));
        if let Some(below) = Association::below(level) {
            for child in store::current_child_uuids(conn, below, uuid, u32::MAX).await?.into_iter().rev() {
                pending.push((below.child, child));
            }
        }
    }
    Ok(())
}

async fn set_revised(
    conn: &mut SqliteConnection,
    level: Level,
    uuid: Uuid,
    predecessor: Option<Uuid>,
) -> Result<(), StoreError> {
    match level {
        Level::Collection => set_branch_revised::<Collection>(conn, uuid, predecessor).await,
        Level::Patient => set_branch_revised::<Patient>(conn, uuid, predecessor).await,
        Level::Study => set_branch_revised::<Study>(conn, uuid, predecessor).await,
        Level::Series => set_branch_revised::<Series>(conn, uuid, predecessor).await,
        // instances are flagged when filled, the version by finish_version
        Level::Instance | Level::Version => Ok(()),
    }
}

/// A source is revised if its hash differs from the predecessor's. Every source of a
/// row without predecessor is revised.
async fn set_branch_revised<B: Branch>(
    conn: &mut SqliteConnection,
    uuid: Uuid,
    predecessor: Option<Uuid>,
) -> Result<(), StoreError> {
    let before = match predecessor {
        Some(p) => Some(store::require::<B>(conn, p).await?.node().hashes.clone()),
        None => None,
    };
    let mut row = store::require::<B>(conn, uuid).await?;
    let node = row.node_mut();
    node.revised = revised_flags(&node.hashes, node.sources, before.as_ref());
    store::save(conn, &row).await
}

fn revised_flags(hashes: &HashTriple, sources: SourceFlags, before: Option<&HashTriple>) -> SourceFlags {
    match before {
        Some(before) => Source::TRACKED
            .into_iter()
            .fold(SourceFlags::default(), |flags, source| {
                flags.with(source, hashes.get(source) != before.get(source))
            }),
        None => sources,
    }
}

async fn finish_version(conn: &mut SqliteConnection, version: u32, previous: u32) -> Result<(), StoreError> {
    let before = match previous {
        0 => None,
        previous => Some(store::require_version(conn, previous).await?.hashes),
    };
    let collections = store::current_child_rows::<Collection>(conn, version, version).await?;
    let mut row = store::require_version(conn, version).await?;
    row.min_timestamp = collections.iter().filter_map(|c| c.node.min_timestamp).min();
    row.max_timestamp = collections.iter().filter_map(|c| c.node.max_timestamp).max();
    row.revised = revised_flags(&row.hashes, row.sources, before.as_ref());
    row.expanded = true;
    row.done = true;
    store::save_version(conn, &row).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::testing::*;
    use crate::merkle::get_merkle_hash;
    use crate::settings::RehashSettings;
    use crate::store::TableDump;
    use crate::store::testing::temp_store;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn engine() -> HashEngine {
        HashEngine::new(RehashSettings::default())
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_version(engine: HashEngine) {
        let store = temp_store().await;
        let manifest = manifest(vec![series(
            "1.2.1",
            vec![instance("1.2.1.1", "bb", Source::Tcia), instance("1.2.1.2", "aa", Source::Tcia)],
        )]);
        let report = ingest_version(&store, &engine, &manifest, 1, 0).await.unwrap();
        assert_eq!(report.count(RevisionState::New), 6);
        assert_eq!(report.count(RevisionState::Revised), 0);

        let mut conn = store.acquire().await.unwrap();
        let version = store::require_version(&mut conn, 1).await.unwrap();
        assert!(version.done && version.expanded);
        assert_eq!(version.revised, SourceFlags::new(true, false));
        let series_uuid = report.uuids(RevisionState::New, Level::Series)[0];
        let series: Series = store::require(&mut conn, series_uuid).await.unwrap();
        assert_eq!(series.node.hashes.all_sources, get_merkle_hash(["aa", "bb"]));
        assert_eq!(series.series_instances, 2);
        assert_eq!(series.node.revised, SourceFlags::new(true, false));
        assert!(series.row.done && series.row.expanded && series.row.is_new);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_unchanged_revised_and_retired(engine: HashEngine) {
        let store = temp_store().await;
        let keep = series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)]);
        let change = series("1.2.2", vec![instance("1.2.2.1", "bb", Source::Tcia)]);
        let drop = series("1.2.3", vec![instance("1.2.3.1", "cc", Source::Tcia)]);
        let v1 = ingest_version(&store, &engine, &manifest(vec![keep.clone(), change, drop]), 1, 0)
            .await
            .unwrap();
        let v1_series = v1.uuids(RevisionState::New, Level::Series);

        let changed = series(
            "1.2.2",
            vec![instance("1.2.2.1", "bb", Source::Tcia), instance("1.2.2.2", "dd", Source::Path)],
        );
        let v2 = ingest_version(&store, &engine, &manifest(vec![keep, changed]), 2, 1)
            .await
            .unwrap();
        let mut conn = store.acquire().await.unwrap();

        let unchanged = v2.uuids(RevisionState::Unchanged, Level::Series);
        assert_eq!(unchanged.len(), 1);
        assert!(v1_series.contains(&unchanged[0]));
        assert_eq!(v2.uuids(RevisionState::Unchanged, Level::Instance).len(), 1);

        let revised = v2.uuids(RevisionState::Revised, Level::Series);
        assert_eq!(revised.len(), 1);
        let revised: Series = store::require(&mut conn, revised[0]).await.unwrap();
        assert_eq!(revised.series_instance_uid.as_str(), "1.2.2");
        assert_eq!(revised.row.init_idc_version, 1);
        assert_eq!(revised.row.rev_idc_version, 2);
        assert_eq!(revised.node.revised, SourceFlags::new(false, true));
        let old = store::rows_for_key::<Series>(&mut conn, "1.2.2").await.unwrap();
        assert_eq!(old.len(), 2);
        for uuid in old {
            let row: Series = store::require(&mut conn, uuid).await.unwrap();
            if row.row.rev_idc_version == 1 {
                assert_eq!(row.row.final_idc_version, 1);
            }
        }

        let retired = v2.uuids(RevisionState::Retired, Level::Series);
        assert_eq!(retired.len(), 1);
        let retired: Series = store::require(&mut conn, retired[0]).await.unwrap();
        assert_eq!(retired.series_instance_uid.as_str(), "1.2.3");
        assert_eq!(retired.row.final_idc_version, 1);
        assert_eq!(v2.uuids(RevisionState::Retired, Level::Instance).len(), 1);

        for level in [Level::Study, Level::Patient, Level::Collection] {
            assert_eq!(v2.uuids(RevisionState::Revised, level).len(), 1, "{level}");
        }
        let version = store::require_version(&mut conn, 2).await.unwrap();
        let first = store::require_version(&mut conn, 1).await.unwrap();
        assert_eq!(version.previous_version, 1);
        assert_ne!(version.hashes, first.hashes);
        assert_eq!(version.revised, SourceFlags::new(true, true));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_identical_manifest_reuses_every_row(engine: HashEngine) {
        let store = temp_store().await;
        let manifest = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Path)])]);
        ingest_version(&store, &engine, &manifest, 1, 0).await.unwrap();
        let report = ingest_version(&store, &engine, &manifest, 2, 1).await.unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.count(RevisionState::Unchanged), 1);

        let mut conn = store.acquire().await.unwrap();
        let version = store::require_version(&mut conn, 2).await.unwrap();
        let first = store::require_version(&mut conn, 1).await.unwrap();
        assert_eq!(version.hashes, first.hashes);
        assert!(!version.revised.any());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_collection_ids_match_case_insensitively(engine: HashEngine) {
        let store = temp_store().await;
        let mut first = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])]);
        ingest_version(&store, &engine, &first, 1, 0).await.unwrap();
        first.collections[0].collection_id = "tcga-read".into();
        let report = ingest_version(&store, &engine, &first, 2, 1).await.unwrap();
        assert_eq!(report.count(RevisionState::Unchanged), 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_patient_revision_keeps_case_id(engine: HashEngine) {
        let store = temp_store().await;
        let v1 = ingest_version(
            &store,
            &engine,
            &manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])]),
            1,
            0,
        )
        .await
        .unwrap();
        let v2 = ingest_version(
            &store,
            &engine,
            &manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "ab", Source::Tcia)])]),
            2,
            1,
        )
        .await
        .unwrap();
        let mut conn = store.acquire().await.unwrap();
        let before: Patient = store::require(&mut conn, v1.uuids(RevisionState::New, Level::Patient)[0])
            .await
            .unwrap();
        let after: Patient = store::require(&mut conn, v2.uuids(RevisionState::Revised, Level::Patient)[0])
            .await
            .unwrap();
        assert_ne!(before.row.uuid, after.row.uuid);
        assert_eq!(before.idc_case_id, after.idc_case_id);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejects_out_of_order_versions(engine: HashEngine) {
        let store = temp_store().await;
        let manifest = manifest(vec![]);
        assert!(matches!(
            ingest_version(&store, &engine, &manifest, 2, 1).await,
            Err(IngestError::NotOnLatest { latest: None, .. })
        ));
        ingest_version(&store, &engine, &manifest, 3, 0).await.unwrap();
        assert!(matches!(
            ingest_version(&store, &engine, &manifest, 2, 3).await,
            Err(IngestError::NotAfterLatest { version: 2, latest: 3 })
        ));
        assert!(matches!(
            ingest_version(&store, &engine, &manifest, 4, 2).await,
            Err(IngestError::NotOnLatest { latest: Some(3), .. })
        ));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_key_rolls_back(engine: HashEngine) {
        let store = temp_store().await;
        let duplicated = manifest(vec![
            series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)]),
            series("1.2.1", vec![instance("1.2.1.2", "bb", Source::Tcia)]),
        ]);
        let err = ingest_version(&store, &engine, &duplicated, 1, 0).await.unwrap_err();
        assert!(matches!(err, IngestError::DuplicateKey { level: Level::Series, .. }));
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(store::dump(&mut conn).await.unwrap(), TableDump::default());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_ingest_ignores_completion_log() {
        let store = temp_store().await;
        let temp_dir = tempfile::tempdir().unwrap();
        let dones_log = camino::Utf8Path::from_path(temp_dir.path()).unwrap().join("dones.txt");
        let engine = HashEngine::new(RehashSettings {
            dones_log: Some(dones_log.clone()),
            ..Default::default()
        });
        let manifest = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])]);
        let report = ingest_version(&store, &engine, &manifest, 1, 0).await.unwrap();
        assert!(!dones_log.exists());
        assert_eq!(report.rehash.changed_at(Level::Series).len(), 1);
    }
}
