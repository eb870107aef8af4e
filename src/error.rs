use crate::types::Level;
use crate::worker_pool::PoolClosed;
use uuid::Uuid;

/// Violation of the entity store's contract, or failure of the database under it.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("version {0} does not exist")]
    UnknownVersion(u32),

    #[error("version {0} already exists")]
    VersionExists(u32),

    #[error("no {level} row with uuid {uuid}")]
    UnknownEntity { level: Level, uuid: Uuid },

    #[error("{level} {child} is already associated with parent {parent}")]
    DuplicateAssociation {
        level: Level,
        parent: String,
        child: Uuid,
    },

    #[error("{level} {child} is not associated with parent {parent}")]
    NotAssociated {
        level: Level,
        parent: String,
        child: Uuid,
    },

    #[error("cannot delete {level} {key}: it still has {links} association(s)")]
    StillReferenced {
        level: Level,
        key: String,
        links: i64,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Error recomputing hashes.
#[derive(thiserror::Error, Debug)]
pub enum RehashError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not use completion log: {0}")]
    DonesLog(#[from] std::io::Error),

    #[error(transparent)]
    Worker(#[from] WorkerPanicked),

    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),

    #[error("the worker pool stopped before reporting on every shard of level {0}")]
    MissingShards(Level),
}

/// A worker of a [crate::WorkerPool] panicked while handling a task.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("worker {pool}/{worker} panicked: {message}")]
pub struct WorkerPanicked {
    pub pool: &'static str,
    pub worker: usize,
    pub message: String,
}

/// Error building a version from a manifest.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("cannot build version {version}: the latest version is {latest}")]
    NotAfterLatest { version: u32, latest: u32 },

    #[error("cannot build version {version} on top of {previous}: the latest version is {latest:?}")]
    NotOnLatest {
        version: u32,
        previous: u32,
        latest: Option<u32>,
    },

    #[error("{level} \"{key}\" appears more than once under the same parent")]
    DuplicateKey { level: Level, key: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rehash(#[from] RehashError),
}

/// Error undoing a version. Egestion is transactional: on any of these, nothing changed.
#[derive(thiserror::Error, Debug)]
pub enum EgestError {
    #[error("{level} {uuid} is a revision, but no row of its lineage has final_idc_version={previous}")]
    MissingPredecessor {
        level: Level,
        uuid: Uuid,
        previous: u32,
    },

    #[error("{level} {uuid} has {count} candidate predecessors with final_idc_version={previous}")]
    AmbiguousPredecessor {
        level: Level,
        uuid: Uuid,
        previous: u32,
        count: usize,
    },

    #[error("version {version} cannot be egested while version {latest} exists")]
    NotLatest { version: u32, latest: u32 },

    #[error("{level} {uuid} was not built by version {version}")]
    ParentNotInVersion {
        level: Level,
        uuid: Uuid,
        version: u32,
    },

    #[error("{level} \"{key}\" is not a child of {parent}")]
    NoSuchChild {
        level: Level,
        parent: String,
        key: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error reading manifests or writing exports.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
