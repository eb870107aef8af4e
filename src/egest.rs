//! Undoing the build of a version, or of a single child within it.
//!
//! Egestion walks down from the parent: rows created by the version being undone are
//! deleted together with everything they created below them, rows which the version
//! merely reused are detached, and the predecessor of each deleted revision becomes
//! current again. Every operation runs inside one database transaction, so a failure
//! leaves the store untouched.

use crate::association::Association;
use crate::error::{EgestError, StoreError};
use crate::model::*;
use crate::store::{self, EntityStore};
use crate::types::Level;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use sqlx::{Sqlite, Transaction};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EgestReport {
    pub deleted: Vec<(Level, Uuid)>,
    pub detached: Vec<(Level, Uuid)>,
    /// Rows which are current again.
    pub restored: Vec<(Level, Uuid)>,
    /// Surviving ancestors which were reset to unbuilt, nearest first.
    pub reset: Vec<(Level, Uuid)>,
}

/// Whether the parent a child is egested from outlives the egestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentFate {
    Survives,
    Deleted,
}

/// Undo the whole build of `version` and delete it. `version` must be the latest version.
pub async fn egest_version(store: &EntityStore, version: u32) -> Result<EgestReport, EgestError> {
    let span = tracing::info_span!("egest", version);
    async move {
        let mut egester = Egester::begin(store, version).await?;
        for collection in store::children::<Collection>(&mut egester.transaction, version).await? {
            egester
                .egest_child::<Collection>(version, collection, ParentFate::Deleted)
                .await?;
        }
        store::remove_version(&mut egester.transaction, version).await?;
        let previous = egester.previous;
        if previous != 0 {
            for collection in store::current_children::<Collection>(&mut egester.transaction, previous, previous).await? {
                egester.restore_subtree::<Collection>(collection).await?;
            }
        }
        egester.commit().await
    }
    .instrument(span)
    .await
}

/// Undo one collection of `version`. The version is reset to unbuilt.
pub async fn egest_collection(store: &EntityStore, version: u32, collection_id: &str) -> Result<EgestReport, EgestError> {
    let span = tracing::info_span!("egest", version, collection_id);
    async move {
        let mut egester = Egester::begin(store, version).await?;
        let collection = store::find_child::<Collection>(&mut egester.transaction, version, collection_id)
            .await?
            .ok_or_else(|| EgestError::NoSuchChild {
                level: Level::Collection,
                parent: version.to_string(),
                key: collection_id.to_string(),
            })?;
        egester
            .egest_child::<Collection>(version, collection, ParentFate::Survives)
            .await?;
        egester.reset_version().await?;
        egester.commit().await
    }
    .instrument(span)
    .await
}

/// Undo the patient `submitter_case_id` of the collection `collection`, which must have
/// been built by `version`.
pub async fn egest_patient(
    store: &EntityStore,
    version: u32,
    collection: Uuid,
    submitter_case_id: &str,
) -> Result<EgestReport, EgestError> {
    egest_from::<Collection>(store, version, collection, submitter_case_id).await
}

pub async fn egest_study(
    store: &EntityStore,
    version: u32,
    patient: Uuid,
    study_instance_uid: &str,
) -> Result<EgestReport, EgestError> {
    egest_from::<Patient>(store, version, patient, study_instance_uid).await
}

pub async fn egest_series(
    store: &EntityStore,
    version: u32,
    study: Uuid,
    series_instance_uid: &str,
) -> Result<EgestReport, EgestError> {
    egest_from::<Study>(store, version, study, series_instance_uid).await
}

pub async fn egest_instance(
    store: &EntityStore,
    version: u32,
    series: Uuid,
    sop_instance_uid: &str,
) -> Result<EgestReport, EgestError> {
    egest_from::<Series>(store, version, series, sop_instance_uid).await
}

/// Undo the child `key` of `parent`, then reset `parent`, its ancestors built by
/// `version` and the version itself to unbuilt.
async fn egest_from<B>(store: &EntityStore, version: u32, parent: Uuid, key: &str) -> Result<EgestReport, EgestError>
where
    B: Branch,
    B::Child: Egest,
{
    let level = <B::Child as Entity>::LEVEL;
    let span = tracing::info_span!("egest", version, %level, key);
    async move {
        let mut egester = Egester::begin(store, version).await?;
        let row = store::require::<B>(&mut egester.transaction, parent).await?;
        if row.row().rev_idc_version != version || !row.row().is_current() {
            return Err(EgestError::ParentNotInVersion {
                level: B::LEVEL,
                uuid: parent,
                version,
            });
        }
        let child = store::find_child::<B::Child>(&mut egester.transaction, parent, key)
            .await?
            .ok_or_else(|| EgestError::NoSuchChild {
                level: <B::Child as Entity>::LEVEL,
                parent: parent.to_string(),
                key: key.to_string(),
            })?;
        egester
            .egest_child::<B::Child>(parent, child, ParentFate::Survives)
            .await?;
        egester.reset_ancestors(B::LEVEL, parent).await?;
        egester.reset_version().await?;
        egester.commit().await
    }
    .instrument(span)
    .await
}

struct Egester {
    transaction: Transaction<'static, Sqlite>,
    version: u32,
    previous: u32,
    report: EgestReport,
}

impl Egester {
    /// Start undoing `version`, which must be the latest version.
    async fn begin(store: &EntityStore, version: u32) -> Result<Self, EgestError> {
        let mut transaction = store.begin().await?;
        let previous = store::require_version(&mut transaction, version)
            .await?
            .previous_version;
        match store::latest_version(&mut transaction).await? {
            Some(latest) if latest != version => Err(EgestError::NotLatest { version, latest }),
            _ => Ok(Self {
                transaction,
                version,
                previous,
                report: EgestReport::default(),
            }),
        }
    }

    async fn commit(self) -> Result<EgestReport, EgestError> {
        self.transaction.commit().await.map_err(StoreError::from)?;
        let report = self.report;
        tracing::info!(
            deleted = report.deleted.len(),
            detached = report.detached.len(),
            restored = report.restored.len(),
            reset = report.reset.len(),
            "Egested"
        );
        Ok(report)
    }

    /// Undo the `E` row `uuid` as a child of `parent`.
    async fn egest_child<E: Egest>(&mut self, parent: E::ParentKey, uuid: Uuid, fate: ParentFate) -> Result<(), EgestError> {
        store::detach::<E>(&mut self.transaction, parent, uuid).await?;
        let row = store::require::<E>(&mut self.transaction, uuid).await?;
        if row.row().rev_idc_version != self.version {
            tracing::debug!(level = %E::LEVEL, %uuid, %parent, "Detached");
            self.report.detached.push((E::LEVEL, uuid));
            return Ok(());
        }

        E::egest_children(self, uuid).await?;
        if row.row().init_idc_version != row.row().rev_idc_version {
            let predecessor = self.predecessor(&row).await?;
            self.restore_subtree::<E>(predecessor).await?;
            if fate == ParentFate::Survives {
                store::attach::<E>(&mut self.transaction, parent, predecessor).await?;
            }
        }
        store::delete::<E>(&mut self.transaction, uuid).await?;
        tracing::debug!(level = %E::LEVEL, %uuid, "Deleted");
        self.report.deleted.push((E::LEVEL, uuid));
        Ok(())
    }

    /// The row of the same lineage as `row` which `row` superseded.
    async fn predecessor<E: Entity>(&mut self, row: &E) -> Result<Uuid, EgestError> {
        let uuid = row.row().uuid;
        let previous = self.previous;
        let candidates: Vec<Uuid> = store::lineage(&mut self.transaction, row)
            .await?
            .iter()
            .map(Entity::row)
            .filter(|other| other.uuid != uuid && other.final_idc_version == previous)
            .map(|other| other.uuid)
            .collect();
        match candidates.as_slice() {
            [predecessor] => Ok(*predecessor),
            [] => Err(EgestError::MissingPredecessor {
                level: E::LEVEL,
                uuid,
                previous: self.previous,
            }),
            _ => Err(EgestError::AmbiguousPredecessor {
                level: E::LEVEL,
                uuid,
                previous: self.previous,
                count: candidates.len(),
            }),
        }
    }

    /// Make the `E` row `uuid` current again if the undone version ended it.
    async fn restore<E: Entity>(&mut self, uuid: Uuid) -> Result<(), StoreError> {
        let row = store::require::<E>(&mut self.transaction, uuid).await?;
        if row.row().final_idc_version == self.previous {
            store::clear_final(&mut self.transaction, E::LEVEL, uuid).await?;
            self.report.restored.push((E::LEVEL, uuid));
        }
        Ok(())
    }

    /// [Egester::restore] every row of the previous version's tree below and including `uuid`.
    async fn restore_subtree<E: Egest>(&mut self, uuid: Uuid) -> Result<(), StoreError> {
        self.restore::<E>(uuid).await?;
        E::restore_children(self, uuid).await
    }

    /// Reset the row `uuid` of `level` and every ancestor which `version` built.
    async fn reset_ancestors(&mut self, level: Level, uuid: Uuid) -> Result<(), StoreError> {
        let mut pending = vec![(level, uuid)];
        while let Some((level, uuid)) = pending.pop() {
            if self.report.reset.contains(&(level, uuid)) {
                continue;
            }
            store::reset_unbuilt(&mut self.transaction, level, uuid).await?;
            tracing::debug!(%level, %uuid, "Reset to unbuilt");
            self.report.reset.push((level, uuid));
            match Association::above(level) {
                Some(above) if above.parent != Level::Version => {
                    for parent in store::built_parents(&mut self.transaction, above, uuid, self.version).await? {
                        pending.push((above.parent, parent));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn reset_version(&mut self) -> Result<(), StoreError> {
        let mut row = store::require_version(&mut self.transaction, self.version).await?;
        row.reset_unbuilt();
        store::save_version(&mut self.transaction, &row).await
    }
}

/// Per-level recursion of egestion.
trait Egest: Entity {
    fn egest_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>>;

    fn restore_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>>;
}

fn egest_children_of<B>(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>>
where
    B: Branch,
    B::Child: Egest,
{
    async move {
        for child in store::children::<B::Child>(&mut egester.transaction, uuid).await? {
            egester
                .egest_child::<B::Child>(uuid, child, ParentFate::Deleted)
                .await?;
        }
        Ok(())
    }
    .boxed_local()
}

fn restore_children_of<B>(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>>
where
    B: Branch,
    B::Child: Egest,
{
    async move {
        let previous = egester.previous;
        for child in store::current_children::<B::Child>(&mut egester.transaction, uuid, previous).await? {
            egester.restore_subtree::<B::Child>(child).await?;
        }
        Ok(())
    }
    .boxed_local()
}

impl Egest for Collection {
    fn egest_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>> {
        egest_children_of::<Self>(egester, uuid)
    }

    fn restore_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>> {
        restore_children_of::<Self>(egester, uuid)
    }
}

impl Egest for Patient {
    fn egest_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>> {
        egest_children_of::<Self>(egester, uuid)
    }

    fn restore_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>> {
        restore_children_of::<Self>(egester, uuid)
    }
}

impl Egest for Study {
    fn egest_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>> {
        egest_children_of::<Self>(egester, uuid)
    }

    fn restore_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>> {
        restore_children_of::<Self>(egester, uuid)
    }
}

impl Egest for Series {
    fn egest_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>> {
        egest_children_of::<Self>(egester, uuid)
    }

    fn restore_children(egester: &mut Egester, uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>> {
        restore_children_of::<Self>(egester, uuid)
    }
}

impl Egest for Instance {
    fn egest_children(_egester: &mut Egester, _uuid: Uuid) -> LocalBoxFuture<'_, Result<(), EgestError>> {
        futures::future::ok(()).boxed_local()
    }

    fn restore_children(_egester: &mut Egester, _uuid: Uuid) -> LocalBoxFuture<'_, Result<(), StoreError>> {
        futures::future::ok(()).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dones::DonesLog;
    use crate::hashes::HashTriple;
    use crate::ingest::{IngestReport, ingest_version};
    use crate::manifest::testing::*;
    use crate::manifest::Manifest;
    use crate::rehash::HashEngine;
    use crate::settings::RehashSettings;
    use crate::store::testing::{TempStore, temp_store};
    use crate::types::Source;
    use crate::validate::validate_deep;
    use camino::Utf8Path;
    use pretty_assertions::assert_eq;
    use rstest::*;

    /// Version 1 with one collection, patient, study and series holding one instance.
    async fn small_tree() -> (TempStore, [Uuid; 5]) {
        let store = temp_store().await;
        let mut conn = store.acquire().await.unwrap();
        store::insert_version(&mut conn, &Version::new(1, 0)).await.unwrap();
        let (collection, _) = store::get_or_create::<Collection>(&mut conn, 1, "TCGA-READ", 1).await.unwrap();
        let (patient, _) = store::get_or_create::<Patient>(&mut conn, collection, "case-1", 1).await.unwrap();
        let (study, _) = store::get_or_create::<Study>(&mut conn, patient, "1.2", 1).await.unwrap();
        let (series, _) = store::get_or_create::<Series>(&mut conn, study, "1.2.1", 1).await.unwrap();
        let (instance, _) = store::get_or_create::<Instance>(&mut conn, series, "1.2.1.1", 1).await.unwrap();
        drop(conn);
        (store, [collection, patient, study, series, instance])
    }

    fn engine() -> HashEngine {
        HashEngine::new(RehashSettings::default())
    }

    /// Build version 1 from `first` and version 2 from `second`.
    async fn two_versions(first: &Manifest, second: &Manifest) -> (TempStore, IngestReport) {
        let store = temp_store().await;
        ingest_version(&store, &engine(), first, 1, 0).await.unwrap();
        let v2 = ingest_version(&store, &engine(), second, 2, 1).await.unwrap();
        (store, v2)
    }

    async fn version_hashes(store: &EntityStore, version: u32) -> HashTriple {
        let mut conn = store.acquire().await.unwrap();
        store::require_version(&mut conn, version).await.unwrap().hashes
    }

    async fn dump(store: &EntityStore) -> store::TableDump {
        let mut conn = store.acquire().await.unwrap();
        store::dump(&mut conn).await.unwrap()
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_egest_only_version() {
        let (store, _) = small_tree().await;
        let report = egest_version(&store, 1).await.unwrap();
        assert_eq!(report.deleted.len(), 5);
        assert_eq!(dump(&store).await, store::TableDump::default());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_egest_new_collection_resets_version() {
        let (store, [collection, ..]) = small_tree().await;
        let mut conn = store.acquire().await.unwrap();
        let mut version = store::require_version(&mut conn, 1).await.unwrap();
        version.done = true;
        version.expanded = true;
        version.hashes = HashTriple::new("", "", "aa");
        store::save_version(&mut conn, &version).await.unwrap();
        drop(conn);

        let report = egest_collection(&store, 1, "tcga-read").await.unwrap();
        assert_eq!(report.deleted.first().map(|(level, _)| *level), Some(Level::Instance));
        assert_eq!(report.deleted.last(), Some(&(Level::Collection, collection)));

        let mut conn = store.acquire().await.unwrap();
        assert!(store::get::<Collection>(&mut conn, collection).await.unwrap().is_none());
        assert!(store::rows::<Instance>(&mut conn).await.unwrap().is_empty());
        let version = store::require_version(&mut conn, 1).await.unwrap();
        assert!(!version.done);
        assert!(!version.expanded);
        assert!(version.hashes.is_unbuilt());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_revised_series_restores_predecessor_and_resets_ancestors() {
        let keep = series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)]);
        let first = manifest(vec![keep.clone(), series("1.2.2", vec![instance("1.2.2.1", "bb", Source::Tcia)])]);
        let second = manifest(vec![
            keep,
            series(
                "1.2.2",
                vec![instance("1.2.2.1", "bb", Source::Tcia), instance("1.2.2.2", "cc", Source::Path)],
            ),
        ]);
        let (store, v2) = two_versions(&first, &second).await;
        let study = v2.uuids(RevisionState::Revised, Level::Study)[0];
        let successor = v2.uuids(RevisionState::Revised, Level::Series)[0];
        let added = v2.uuids(RevisionState::New, Level::Instance)[0];

        let report = egest_series(&store, 2, study, "1.2.2").await.unwrap();
        assert_eq!(report.deleted, vec![(Level::Instance, added), (Level::Series, successor)]);
        assert_eq!(report.detached.len(), 1);
        assert_eq!(report.restored.len(), 1);
        let restored = report.restored[0].1;
        assert_eq!(
            report.reset,
            vec![
                (Level::Study, study),
                (Level::Patient, v2.uuids(RevisionState::Revised, Level::Patient)[0]),
                (Level::Collection, v2.uuids(RevisionState::Revised, Level::Collection)[0]),
            ]
        );

        let mut conn = store.acquire().await.unwrap();
        let children = store::children::<Series>(&mut conn, study).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.contains(&restored));
        assert!(store::require::<Series>(&mut conn, restored).await.unwrap().row.is_current());
        for (level, uuid) in &report.reset {
            let node = match level {
                Level::Study => store::require::<Study>(&mut conn, *uuid).await.unwrap().node,
                Level::Patient => store::require::<Patient>(&mut conn, *uuid).await.unwrap().node,
                _ => store::require::<Collection>(&mut conn, *uuid).await.unwrap().node,
            };
            assert!(node.hashes.is_unbuilt(), "{level}");
        }
        let version = store::require_version(&mut conn, 2).await.unwrap();
        assert!(!version.done && !version.expanded);
        assert!(version.hashes.is_unbuilt());
        drop(conn);

        engine().rehash_version(&store, 2).await.unwrap();
        assert_eq!(version_hashes(&store, 2).await, version_hashes(&store, 1).await);
        assert_eq!(validate_deep(&store, &engine()).await.unwrap(), vec![]);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_egest_new_patient() {
        let case_1 = patient("case-1", vec![study("1.2", vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])])]);
        let case_2 = patient("case-2", vec![study("1.3", vec![series("1.3.1", vec![instance("1.3.1.1", "bb", Source::Path)])])]);
        let (store, v2) = two_versions(&collection(vec![case_1.clone()]), &collection(vec![case_1, case_2])).await;
        let collection_v2 = v2.uuids(RevisionState::Revised, Level::Collection)[0];
        let new_patient = v2.uuids(RevisionState::New, Level::Patient)[0];

        let report = egest_patient(&store, 2, collection_v2, "case-2").await.unwrap();
        assert_eq!(report.deleted.len(), 4);
        assert_eq!(report.deleted.last(), Some(&(Level::Patient, new_patient)));
        assert!(report.restored.is_empty());
        assert_eq!(report.reset, vec![(Level::Collection, collection_v2)]);

        let mut conn = store.acquire().await.unwrap();
        assert_eq!(store::children::<Patient>(&mut conn, collection_v2).await.unwrap().len(), 1);
        assert!(store::require_version(&mut conn, 2).await.unwrap().hashes.is_unbuilt());
        drop(conn);

        engine().rehash_version(&store, 2).await.unwrap();
        assert_eq!(version_hashes(&store, 2).await, version_hashes(&store, 1).await);
        assert_eq!(validate_deep(&store, &engine()).await.unwrap(), vec![]);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_egest_revised_study() {
        let first = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])]);
        let second = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "ab", Source::Tcia)])]);
        let (store, v2) = two_versions(&first, &second).await;
        let patient_v2 = v2.uuids(RevisionState::Revised, Level::Patient)[0];
        let study_v2 = v2.uuids(RevisionState::Revised, Level::Study)[0];

        let report = egest_study(&store, 2, patient_v2, "1.2").await.unwrap();
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(report.deleted.last(), Some(&(Level::Study, study_v2)));
        // the study, series and instance of version 1 are current again
        assert_eq!(report.restored.len(), 3);
        assert_eq!(report.reset[0], (Level::Patient, patient_v2));
        assert_eq!(report.reset[1].0, Level::Collection);

        engine().rehash_version(&store, 2).await.unwrap();
        assert_eq!(version_hashes(&store, 2).await, version_hashes(&store, 1).await);
        assert_eq!(validate_deep(&store, &engine()).await.unwrap(), vec![]);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_rehash_after_egest_ignores_stale_completion_log() {
        let first = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])]);
        let second = manifest(vec![
            series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)]),
            series("1.2.2", vec![instance("1.2.2.1", "bb", Source::Path)]),
        ]);
        let (store, v2) = two_versions(&first, &second).await;
        let study = v2.uuids(RevisionState::Revised, Level::Study)[0];

        let temp_dir = tempfile::tempdir().unwrap();
        let dones_log = Utf8Path::from_path(temp_dir.path()).unwrap().join("dones.txt");
        let logged = HashEngine::new(RehashSettings {
            dones_log: Some(dones_log.clone()),
            workers: std::num::NonZeroUsize::new(2).unwrap(),
            ..Default::default()
        });
        logged.rehash_version(&store, 2).await.unwrap();
        assert!(!dones_log.exists());

        let report = egest_series(&store, 2, study, "1.2.2").await.unwrap();
        // left behind by a run of version 2 which did not finish
        let mut log = DonesLog::open(&dones_log, 2).await.unwrap();
        log.record(report.reset.iter().map(|(_, uuid)| uuid)).await.unwrap();
        drop(log);

        let rehash = logged.rehash_version(&store, 2).await.unwrap();
        assert_eq!(rehash.skipped, 0);
        assert!(!dones_log.exists());
        assert_eq!(version_hashes(&store, 2).await, version_hashes(&store, 1).await);
        assert_eq!(validate_deep(&store, &engine()).await.unwrap(), vec![]);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_ambiguous_predecessor_rolls_back() {
        let first = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)])]);
        let second = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "ab", Source::Tcia)])]);
        let (store, v2) = two_versions(&first, &second).await;
        let study = v2.uuids(RevisionState::Revised, Level::Study)[0];

        let mut conn = store.acquire().await.unwrap();
        let twin = Series::create(
            "1.2.1",
            RowMeta {
                final_idc_version: 1,
                ..RowMeta::new(1)
            },
        );
        store::insert(&mut conn, &twin).await.unwrap();
        drop(conn);
        let before = dump(&store).await;

        let err = egest_series(&store, 2, study, "1.2.1").await.unwrap_err();
        assert!(matches!(
            err,
            EgestError::AmbiguousPredecessor {
                level: Level::Series,
                previous: 1,
                count: 2,
                ..
            }
        ));
        assert_eq!(dump(&store).await, before);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_predecessor_rolls_back() {
        let (store, [collection, ..]) = small_tree().await;
        let mut conn = store.acquire().await.unwrap();
        store::insert_version(&mut conn, &Version::new(2, 1)).await.unwrap();
        let orphan = Collection::create(
            "TCGA-READ",
            RowMeta {
                init_idc_version: 1,
                ..RowMeta::new(2)
            },
        );
        let orphan = store::insert(&mut conn, &orphan).await.unwrap();
        store::attach::<Collection>(&mut conn, 2, orphan).await.unwrap();
        drop(conn);
        let before = dump(&store).await;

        let err = egest_version(&store, 2).await.unwrap_err();
        assert!(matches!(
            err,
            EgestError::MissingPredecessor {
                level: Level::Collection,
                previous: 1,
                ..
            }
        ));
        assert_eq!(dump(&store).await, before);
        let mut conn = store.acquire().await.unwrap();
        assert!(store::exists::<Collection>(&mut conn, collection).await.unwrap());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_egest_version_restores_previous_tree() {
        let first = manifest(vec![
            series("1.2.1", vec![instance("1.2.1.1", "aa", Source::Tcia)]),
            series("1.2.2", vec![instance("1.2.2.1", "bb", Source::Tcia)]),
        ]);
        let store = temp_store().await;
        ingest_version(&store, &engine(), &first, 1, 0).await.unwrap();
        let before = dump(&store).await;
        let second = manifest(vec![series("1.2.1", vec![instance("1.2.1.1", "ac", Source::Path)])]);
        ingest_version(&store, &engine(), &second, 2, 1).await.unwrap();

        egest_version(&store, 2).await.unwrap();
        assert_eq!(dump(&store).await, before);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_only_latest_version() {
        let (store, _) = small_tree().await;
        let mut conn = store.acquire().await.unwrap();
        store::insert_version(&mut conn, &Version::new(2, 1)).await.unwrap();
        drop(conn);
        assert!(matches!(
            egest_version(&store, 1).await,
            Err(EgestError::NotLatest { version: 1, latest: 2 })
        ));
        assert!(matches!(
            egest_version(&store, 7).await,
            Err(EgestError::Store(StoreError::UnknownVersion(7)))
        ));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_parent_must_be_built_by_version() {
        let (store, [_, _, _, series, _]) = small_tree().await;
        let mut conn = store.acquire().await.unwrap();
        store::insert_version(&mut conn, &Version::new(2, 1)).await.unwrap();
        drop(conn);
        assert!(matches!(
            egest_instance(&store, 2, series, "1.2.1.1").await,
            Err(EgestError::ParentNotInVersion { level: Level::Series, .. })
        ));
        assert!(matches!(
            egest_instance(&store, 1, series, "1.2.1.1").await,
            Err(EgestError::NotLatest { .. })
        ));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_such_child() {
        let (store, [_, _, _, series, _]) = small_tree().await;
        assert!(matches!(
            egest_instance(&store, 1, series, "9.9").await,
            Err(EgestError::NoSuchChild { level: Level::Instance, .. })
        ));
    }
}
