use idc_hashtree::*;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

pub(crate) fn init_logging() {
    INIT_LOGGING.call_once(|| {
        tracing::subscriber::set_global_default(
            tracing_subscriber::FmtSubscriber::builder()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .finish(),
        )
        .unwrap()
    })
}

pub(crate) fn engine() -> HashEngine {
    HashEngine::new(RehashSettings {
        workers: NonZeroUsize::new(4).unwrap(),
        shard_prefix_len: 1,
        queue_capacity: NonZeroUsize::new(2).unwrap(),
        ..Default::default()
    })
}

pub(crate) fn instance(sop: &str, hash: &str) -> InstanceManifest {
    InstanceManifest {
        sop_instance_uid: sop.into(),
        hash: hash.to_string(),
        size: 1024,
        source: Source::Tcia,
        excluded: false,
        timestamp: None,
    }
}

pub(crate) fn series(uid: &str, instances: Vec<InstanceManifest>) -> SeriesManifest {
    SeriesManifest {
        series_instance_uid: uid.into(),
        source_doi: None,
        source_url: None,
        instances,
    }
}

/// A collection with a single patient holding a single study.
pub(crate) fn collection(collection_id: &str, series: Vec<SeriesManifest>) -> CollectionManifest {
    CollectionManifest {
        collection_id: collection_id.into(),
        patients: vec![PatientManifest {
            submitter_case_id: format!("{collection_id}-case").into(),
            studies: vec![StudyManifest {
                study_instance_uid: format!("{collection_id}.1").into(),
                series,
            }],
        }],
    }
}

pub(crate) fn manifest(collections: Vec<CollectionManifest>) -> Manifest {
    Manifest { collections }
}

/// A catalog database which is deleted when this is dropped.
pub(crate) struct TempStore {
    store: EntityStore,
    dir: tempfile::TempDir,
}

impl Deref for TempStore {
    type Target = EntityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl TempStore {
    pub(crate) async fn new() -> Self {
        let dir = tempfile::TempDir::with_prefix("idc-hashtree-it-").unwrap();
        let store = EntityStore::connect(&db_settings(&dir)).await.unwrap();
        Self { store, dir }
    }

    /// Close the database and open it again.
    pub(crate) async fn reopen(self) -> Self {
        let Self { store, dir } = self;
        store.close().await;
        let store = EntityStore::connect(&db_settings(&dir)).await.unwrap();
        Self { store, dir }
    }

    pub(crate) async fn dump(&self) -> TableDump {
        let mut conn = self.acquire().await.unwrap();
        store::dump(&mut conn).await.unwrap()
    }

    pub(crate) async fn version(&self, version: u32) -> Version {
        let mut conn = self.acquire().await.unwrap();
        store::require_version(&mut conn, version).await.unwrap()
    }

    pub(crate) async fn get<E: Entity>(&self, uuid: uuid::Uuid) -> Option<E> {
        let mut conn = self.acquire().await.unwrap();
        store::get(&mut conn, uuid).await.unwrap()
    }

    /// The current collection `collection_id` of `version`.
    pub(crate) async fn find_collection(&self, version: u32, collection_id: &str) -> Collection {
        let mut conn = self.acquire().await.unwrap();
        store::current_child_rows::<Collection>(&mut conn, version, version)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.key_matches(collection_id))
            .unwrap()
    }
}

fn db_settings(dir: &tempfile::TempDir) -> DbSettings {
    DbSettings {
        connection: format!("sqlite://{}", dir.path().join("catalog.sqlite").display()),
        ..Default::default()
    }
}
