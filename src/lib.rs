//! Versioned, hierarchical Merkle hashing and revision tracking for the Imaging Data
//! Commons catalog.
//!
//! The catalog is a tree of Version → Collection → Patient → Study → Series → Instance.
//! Every version is a complete snapshot, but rows which did not change between versions
//! are shared rather than copied, and every node carries the MD5 Merkle hash of its
//! subtree.

mod association;
pub mod cli;
mod config;
mod dones;
mod egest;
mod error;
mod export;
mod hashes;
mod ingest;
mod manifest;
mod merkle;
mod model;
mod rehash;
mod sanitize;
mod settings;
pub mod store;
mod types;
mod validate;
mod worker_pool;

pub use association::{Association, ParentKey};
pub use cli::{Cli, run};
pub use config::{ENV_PREFIX, load_settings};
pub use dones::DonesLog;
pub use egest::*;
pub use error::*;
pub use export::export_tables;
pub use hashes::{HashTriple, SourceFlags};
pub use ingest::{IngestReport, ingest_version};
pub use manifest::*;
pub use merkle::{EMPTY_HASH, get_merkle_hash};
pub use model::*;
pub use rehash::{HashEngine, HashUpdate, RehashReport, shard_of};
pub use sanitize::idc_collection_id;
pub use settings::{DbSettings, HashTreeSettings, RehashSettings};
pub use store::{EntityStore, TableDump};
pub use types::*;
pub use validate::{Violation, validate, validate_deep};
pub use worker_pool::{PoolClosed, WorkerPool};
