//! The Merkle hash recomputation engine.
//!
//! Hashes are recomputed level by level, leaf-most first. Within a level, nodes are
//! partitioned into shards by the leading hex digits of their UUID and the shards are
//! hashed concurrently by a [WorkerPool]. Every worker reads through its own pooled
//! database connection and commits its shard in its own transaction. A level starts only
//! after every shard of the level below has been committed, so children are always
//! rehashed before their parents.

use crate::dones::DonesLog;
use crate::error::{RehashError, StoreError};
use crate::hashes::{HashTriple, SourceFlags};
use crate::merkle::get_merkle_hash;
use crate::model::*;
use crate::settings::RehashSettings;
use crate::store::{self, EntityStore};
use crate::types::Level;
use crate::worker_pool::WorkerPool;
use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::Instrument;
use ulid::Ulid;
use uuid::Uuid;

/// Newly computed hash state of one node, next to the state stored for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashUpdate {
    pub level: Level,
    pub uuid: Uuid,
    pub hashes: HashTriple,
    pub sources: SourceFlags,
    pub stored_hashes: HashTriple,
    pub stored_sources: SourceFlags,
}

impl HashUpdate {
    pub fn hashes_changed(&self) -> bool {
        self.hashes != self.stored_hashes
    }

    /// Whether anything must be written.
    pub fn is_stale(&self) -> bool {
        self.hashes_changed() || self.sources != self.stored_sources
    }
}

/// Outcome of recomputing the hashes of one version's tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehashReport {
    pub version: u32,
    /// Nodes which were recomputed, not counting the version itself.
    pub visited: usize,
    /// Nodes skipped because the completion log lists them.
    pub skipped: usize,
    /// Nodes whose stored hashes were overwritten, leaf-most first.
    pub changed: Vec<(Level, Uuid)>,
    pub version_changed: bool,
}

impl RehashReport {
    pub fn changed_count(&self) -> usize {
        self.changed.len() + usize::from(self.version_changed)
    }

    pub fn changed_at(&self, level: Level) -> Vec<Uuid> {
        self.changed
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, uuid)| *uuid)
            .collect()
    }
}

/// Recomputes hashes of the versioned tree.
#[derive(Debug, Clone)]
pub struct HashEngine {
    settings: RehashSettings,
}

struct ShardTask {
    level: Level,
    shard: String,
    nodes: Vec<Uuid>,
}

struct ShardOutcome {
    shard: String,
    nodes: Vec<Uuid>,
    changed: Vec<Uuid>,
}

impl HashEngine {
    pub fn new(settings: RehashSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RehashSettings {
        &self.settings
    }

    /// Recompute the hashes of every current node of `version`'s tree, and of the version
    /// itself. A node's stored hashes are overwritten if-*and-only-if* they differ from the
    /// recomputed ones.
    ///
    /// If a completion log is configured, nodes which an interrupted run of this version
    /// committed are skipped, unless they are unbuilt. Committed shards are appended to
    /// the log, which is removed when the run succeeds.
    pub async fn rehash_version(&self, store: &EntityStore, version: u32) -> Result<RehashReport, RehashError> {
        let run = Ulid::new();
        let span = tracing::info_span!("rehash", %run, version);
        async {
            let dones = match &self.settings.dones_log {
                Some(path) => {
                    let dones = DonesLog::open(path, version).await?;
                    tracing::info!(path = dones.path().as_str(), done = dones.len(), "Using completion log");
                    Some(dones)
                }
                None => None,
            };
            let report = self.rehash_sharded(store, version, dones).await?;
            tracing::info!(
                visited = report.visited,
                skipped = report.skipped,
                changed = report.changed_count(),
                "Rehash finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn rehash_sharded(
        &self,
        store: &EntityStore,
        version: u32,
        mut dones: Option<DonesLog>,
    ) -> Result<RehashReport, RehashError> {
        let tree = {
            let mut conn = store.acquire().await?;
            VersionTree::collect(&mut conn, version).await?
        };
        let handler_store = store.clone();
        let mut pool = WorkerPool::new(
            self.settings.workers,
            self.settings.queue_capacity,
            "rehash",
            move |task: ShardTask| hash_shard(handler_store.clone(), task),
        );
        let mut report = RehashReport {
            version,
            ..Default::default()
        };
        let mut progress = Progress::new(self.settings.progress_interval, tree.len());

        for level in Level::BOTTOM_UP {
            let (todo, skipped): (Vec<Uuid>, Vec<Uuid>) = tree
                .level(level)
                .iter()
                .map(|(uuid, _)| *uuid)
                .partition(|uuid| !(dones.as_ref().is_some_and(|d| d.contains(uuid)) && !tree.is_unbuilt(uuid)));
            report.skipped += skipped.len();
            report.visited += todo.len();
            progress.advance(skipped.len());

            let shards = partition(todo, self.settings.shard_prefix_len);
            let shard_count = shards.len();
            for (shard, nodes) in shards {
                pool.submit(ShardTask { level, shard, nodes }).await?;
            }
            let changed_before = report.changed.len();
            for _ in 0..shard_count {
                let outcome = pool.recv().await.ok_or(RehashError::MissingShards(level))???;
                report.changed.extend(outcome.changed.iter().map(|uuid| (level, *uuid)));
                if let Some(dones) = dones.as_mut() {
                    dones.record(&outcome.nodes).await?;
                }
                tracing::trace!(%level, shard = outcome.shard, nodes = outcome.nodes.len(), "Shard committed");
                progress.advance(outcome.nodes.len());
            }
            tracing::info!(
                %level,
                shards = shard_count,
                changed = report.changed.len() - changed_before,
                "Level rehashed"
            );
        }
        pool.shutdown().await;

        let mut transaction = store.begin().await?;
        report.version_changed = update_version(&mut transaction, version).await?;
        transaction.commit().await.map_err(StoreError::from)?;
        if let Some(dones) = dones {
            dones.finish().await?;
        }
        Ok(report)
    }

    /// Recompute the hashes of `version`'s tree one node at a time over `conn`, typically
    /// inside the caller's transaction. The completion log is not used.
    pub async fn rehash_in(&self, conn: &mut SqliteConnection, version: u32) -> Result<RehashReport, RehashError> {
        let tree = VersionTree::collect(conn, version).await?;
        let mut report = RehashReport {
            version,
            ..Default::default()
        };
        let mut progress = Progress::new(self.settings.progress_interval, tree.len());
        for level in Level::BOTTOM_UP {
            for uuid in tree.level(level).keys() {
                let update = compute_at_level(conn, level, *uuid).await?;
                if apply(conn, &update).await? {
                    report.changed.push((level, *uuid));
                }
                report.visited += 1;
                progress.advance(1);
            }
        }
        report.version_changed = update_version(conn, version).await?;
        Ok(report)
    }

    /// Report the nodes of `version`'s tree whose stored hashes are stale, without
    /// modifying the store: the recomputation runs in a transaction which is rolled back.
    pub async fn verify_version(&self, store: &EntityStore, version: u32) -> Result<RehashReport, RehashError> {
        let mut transaction = store.begin().await?;
        let report = self.rehash_in(&mut transaction, version).await?;
        transaction.rollback().await.map_err(StoreError::from)?;
        Ok(report)
    }
}

/// The shard of a node: the first `prefix_len` hex digits of its UUID.
pub fn shard_of(uuid: &Uuid, prefix_len: usize) -> String {
    let hex = uuid.simple().to_string();
    hex[..prefix_len.min(hex.len())].to_string()
}

fn partition(nodes: Vec<Uuid>, prefix_len: usize) -> BTreeMap<String, Vec<Uuid>> {
    let mut shards: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
    for uuid in nodes {
        shards.entry(shard_of(&uuid, prefix_len)).or_default().push(uuid);
    }
    shards
}

/// Compute every node of the shard from committed data, then write the stale ones in
/// one transaction.
async fn hash_shard(store: EntityStore, task: ShardTask) -> Result<ShardOutcome, StoreError> {
    let mut conn = store.acquire().await?;
    let mut updates = Vec::with_capacity(task.nodes.len());
    for uuid in &task.nodes {
        updates.push(compute_at_level(&mut conn, task.level, *uuid).await?);
    }
    let mut transaction = conn.begin().await?;
    let mut changed = Vec::new();
    for update in &updates {
        if apply(&mut transaction, update).await? {
            changed.push(update.uuid);
        }
    }
    transaction.commit().await?;
    Ok(ShardOutcome {
        shard: task.shard,
        nodes: task.nodes,
        changed,
    })
}

/// Combine what the current children of a node feed into it.
///
/// `all_sources` covers every child, so a node without children gets [crate::EMPTY_HASH].
/// A per-source hash is empty when no child carries that source.
pub(crate) fn summarize<'a>(contributions: impl IntoIterator<Item = Contribution<'a>>) -> (HashTriple, SourceFlags) {
    let mut all_sources = Vec::new();
    let mut tcia = Vec::new();
    let mut path = Vec::new();
    for contribution in contributions {
        all_sources.push(contribution.all_sources);
        tcia.extend(contribution.tcia);
        path.extend(contribution.path);
    }
    let per_source = |hashes: &[&str]| {
        if hashes.is_empty() {
            String::new()
        } else {
            get_merkle_hash(hashes)
        }
    };
    let hashes = HashTriple {
        tcia: per_source(&tcia),
        path: per_source(&path),
        all_sources: get_merkle_hash(&all_sources),
    };
    let sources = SourceFlags::new(!tcia.is_empty(), !path.is_empty());
    (hashes, sources)
}

/// Compute the hash state of the `B` row `uuid` from its current children.
pub(crate) async fn compute<B: Branch>(conn: &mut SqliteConnection, uuid: Uuid) -> Result<HashUpdate, StoreError> {
    let row = store::require::<B>(conn, uuid).await?;
    let children = store::current_child_rows::<B::Child>(conn, uuid, row.row().reference_version()).await?;
    let (hashes, sources) = summarize(children.iter().map(Entity::contribution));
    Ok(HashUpdate {
        level: B::LEVEL,
        uuid,
        hashes,
        sources,
        stored_hashes: row.node().hashes.clone(),
        stored_sources: row.node().sources,
    })
}

pub(crate) async fn compute_at_level(
    conn: &mut SqliteConnection,
    level: Level,
    uuid: Uuid,
) -> Result<HashUpdate, StoreError> {
    match level {
        Level::Collection => compute::<Collection>(conn, uuid).await,
        Level::Patient => compute::<Patient>(conn, uuid).await,
        Level::Study => compute::<Study>(conn, uuid).await,
        Level::Series => compute::<Series>(conn, uuid).await,
        Level::Version | Level::Instance => unreachable!("{level} rows are not hashed by uuid"),
    }
}

/// Compute the hash state of a version from its current collections.
pub(crate) async fn compute_version(
    conn: &mut SqliteConnection,
    version: u32,
) -> Result<(HashTriple, SourceFlags), StoreError> {
    store::require_version(conn, version).await?;
    let collections = store::current_child_rows::<Collection>(conn, version, version).await?;
    Ok(summarize(collections.iter().map(Entity::contribution)))
}

/// Store `update` if it is stale. Returns whether the stored hashes changed.
async fn apply(conn: &mut SqliteConnection, update: &HashUpdate) -> Result<bool, StoreError> {
    if !update.is_stale() {
        return Ok(false);
    }
    if update.hashes_changed() {
        tracing::debug!(
            level = %update.level,
            uuid = %update.uuid,
            old = update.stored_hashes.all_sources,
            new = update.hashes.all_sources,
            "Hash changed"
        );
    }
    let sql = format!(
        "UPDATE {} SET hashes_tcia = ?, hashes_path = ?, hashes_all_sources = ?,
            sources_tcia = ?, sources_path = ?
         WHERE uuid = ?",
        update.level.table_name()
    );
    sqlx::query(&sql)
        .bind(update.hashes.tcia.as_str())
        .bind(update.hashes.path.as_str())
        .bind(update.hashes.all_sources.as_str())
        .bind(update.sources.tcia)
        .bind(update.sources.path)
        .bind(update.uuid)
        .execute(&mut *conn)
        .await?;
    Ok(update.hashes_changed())
}

/// Recompute and store the hashes of the version row. Returns whether they changed.
async fn update_version(conn: &mut SqliteConnection, version: u32) -> Result<bool, StoreError> {
    let (hashes, sources) = compute_version(conn, version).await?;
    let mut row = store::require_version(conn, version).await?;
    let changed = row.hashes != hashes;
    if changed {
        tracing::debug!(old = row.hashes.all_sources, new = hashes.all_sources, "Version hash changed");
    }
    if row.hashes != hashes || row.sources != sources {
        row.hashes = hashes;
        row.sources = sources;
        store::save_version(conn, &row).await?;
    }
    Ok(changed)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeNode {
    reference_version: u32,
    unbuilt: bool,
}

/// The current nodes of a version's tree, per level.
pub(crate) struct VersionTree {
    levels: BTreeMap<Level, BTreeMap<Uuid, TreeNode>>,
}

impl VersionTree {
    pub(crate) async fn collect(conn: &mut SqliteConnection, version: u32) -> Result<Self, StoreError> {
        store::require_version(conn, version).await?;
        let collections = store::current_child_rows::<Collection>(conn, version, version)
            .await?
            .iter()
            .map(tree_node)
            .collect();
        let patients = descend::<Collection>(conn, &collections).await?;
        let studies = descend::<Patient>(conn, &patients).await?;
        let series = descend::<Study>(conn, &studies).await?;
        let levels = BTreeMap::from([
            (Level::Collection, collections),
            (Level::Patient, patients),
            (Level::Study, studies),
            (Level::Series, series),
        ]);
        Ok(Self { levels })
    }

    pub(crate) fn level(&self, level: Level) -> &BTreeMap<Uuid, TreeNode> {
        static EMPTY: BTreeMap<Uuid, TreeNode> = BTreeMap::new();
        self.levels.get(&level).unwrap_or(&EMPTY)
    }

    /// Whether the node has never been hashed, or was reset since.
    pub(crate) fn is_unbuilt(&self, uuid: &Uuid) -> bool {
        self.levels
            .values()
            .find_map(|nodes| nodes.get(uuid))
            .is_some_and(|node| node.unbuilt)
    }

    pub(crate) fn len(&self) -> usize {
        self.levels.values().map(BTreeMap::len).sum()
    }
}

fn tree_node<E: Entity>(row: &E) -> (Uuid, TreeNode) {
    let node = TreeNode {
        reference_version: row.row().reference_version(),
        unbuilt: row.node_state().is_none_or(|node| node.hashes.is_unbuilt()),
    };
    (row.row().uuid, node)
}

async fn descend<B: Branch>(
    conn: &mut SqliteConnection,
    parents: &BTreeMap<Uuid, TreeNode>,
) -> Result<BTreeMap<Uuid, TreeNode>, StoreError> {
    let mut children = BTreeMap::new();
    for (uuid, node) in parents {
        let rows = store::current_child_rows::<B::Child>(conn, *uuid, node.reference_version).await?;
        children.extend(rows.iter().map(tree_node));
    }
    Ok(children)
}

/// Logs progress no more often than every `interval`.
struct Progress {
    interval: Duration,
    last: Instant,
    done: usize,
    total: usize,
}

impl Progress {
    fn new(interval: Duration, total: usize) -> Self {
        Self {
            interval,
            last: Instant::now(),
            done: 0,
            total,
        }
    }

    fn advance(&mut self, n: usize) {
        self.done += n;
        if self.last.elapsed() >= self.interval {
            tracing::info!(done = self.done, total = self.total, "Rehash progress");
            self.last = Instant::now();
        }
    }
}
