//! The hierarchical entity store: one table per level and one association table per
//! pair of adjacent levels, in a SQLite database.
//!
//! Operations are free functions over a [SqliteConnection], so that they compose inside
//! a caller's transaction: pass `&mut transaction` or `&mut pooled_connection`.

use crate::association::{Association, ParentKey};
use crate::error::StoreError;
use crate::model::*;
use crate::settings::DbSettings;
use crate::types::Level;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! row_columns {
    () => {
        "uuid BLOB PRIMARY KEY NOT NULL,
        init_idc_version INTEGER NOT NULL,
        rev_idc_version INTEGER NOT NULL,
        final_idc_version INTEGER NOT NULL DEFAULT 0,
        done BOOLEAN NOT NULL DEFAULT FALSE,
        is_new BOOLEAN NOT NULL DEFAULT TRUE,
        expanded BOOLEAN NOT NULL DEFAULT FALSE"
    };
}

macro_rules! node_columns {
    () => {
        "min_timestamp TEXT,
        max_timestamp TEXT,
        hashes_tcia TEXT NOT NULL DEFAULT '',
        hashes_path TEXT NOT NULL DEFAULT '',
        hashes_all_sources TEXT NOT NULL DEFAULT '',
        sources_tcia BOOLEAN NOT NULL DEFAULT FALSE,
        sources_path BOOLEAN NOT NULL DEFAULT FALSE,
        revised_tcia BOOLEAN NOT NULL DEFAULT FALSE,
        revised_path BOOLEAN NOT NULL DEFAULT FALSE"
    };
}

const TABLES: &[&str] = &[
    concat!(
        "CREATE TABLE IF NOT EXISTS version (
        version INTEGER PRIMARY KEY NOT NULL,
        previous_version INTEGER NOT NULL,
        done BOOLEAN NOT NULL DEFAULT FALSE,
        is_new BOOLEAN NOT NULL DEFAULT TRUE,
        expanded BOOLEAN NOT NULL DEFAULT FALSE,
        ",
        node_columns!(),
        ")"
    ),
    concat!(
        "CREATE TABLE IF NOT EXISTS collection (",
        row_columns!(),
        ",
        collection_id TEXT NOT NULL,
        idc_collection_id TEXT NOT NULL,
        ",
        node_columns!(),
        ")"
    ),
    concat!(
        "CREATE TABLE IF NOT EXISTS patient (",
        row_columns!(),
        ",
        submitter_case_id TEXT NOT NULL,
        idc_case_id BLOB NOT NULL,
        ",
        node_columns!(),
        ")"
    ),
    concat!(
        "CREATE TABLE IF NOT EXISTS study (",
        row_columns!(),
        ",
        study_instance_uid TEXT NOT NULL,
        study_instances INTEGER NOT NULL DEFAULT 0,
        ",
        node_columns!(),
        ")"
    ),
    concat!(
        "CREATE TABLE IF NOT EXISTS series (",
        row_columns!(),
        ",
        series_instance_uid TEXT NOT NULL,
        series_instances INTEGER NOT NULL DEFAULT 0,
        source_doi TEXT,
        source_url TEXT,
        ",
        node_columns!(),
        ")"
    ),
    concat!(
        "CREATE TABLE IF NOT EXISTS instance (",
        row_columns!(),
        ",
        sop_instance_uid TEXT NOT NULL,
        hash TEXT NOT NULL DEFAULT '',
        size INTEGER NOT NULL DEFAULT 0,
        source TEXT NOT NULL,
        excluded BOOLEAN NOT NULL DEFAULT FALSE,
        timestamp TEXT,
        revised BOOLEAN NOT NULL DEFAULT FALSE
        )"
    ),
];

/// Natural key and lineage lookups.
const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS collection_lineage ON collection (lower(collection_id))",
    "CREATE INDEX IF NOT EXISTS patient_key ON patient (submitter_case_id)",
    "CREATE INDEX IF NOT EXISTS patient_lineage ON patient (lower(hex(idc_case_id)))",
    "CREATE INDEX IF NOT EXISTS study_key ON study (study_instance_uid)",
    "CREATE INDEX IF NOT EXISTS series_key ON series (series_instance_uid)",
    "CREATE INDEX IF NOT EXISTS instance_key ON instance (sop_instance_uid)",
];

/// The versioned catalog tree.
///
/// A row may be associated with several parents: an entity which did not change
/// between versions is attached to each version's parent instead of being duplicated.
#[derive(Debug, Clone)]
pub struct EntityStore {
    pool: SqlitePool,
}

impl EntityStore {
    /// Connect to the database, creating it and its tables if they do not exist.
    pub async fn connect(settings: &DbSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&settings.connection)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(settings.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.pool.get())
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let mut transaction = self.pool.begin().await?;
        for statement in TABLES.iter().chain(INDEXES) {
            sqlx::query(statement).execute(&mut *transaction).await?;
        }
        for association in Association::ALL {
            sqlx::query(&association.create_table())
                .execute(&mut *transaction)
                .await?;
            sqlx::query(&association.create_index())
                .execute(&mut *transaction)
                .await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. It is rolled back when dropped without being committed.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn assignments(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn latest_version(conn: &mut SqliteConnection) -> Result<Option<u32>, StoreError> {
    let latest: Option<u32> = sqlx::query_scalar("SELECT MAX(version) FROM version")
        .fetch_one(&mut *conn)
        .await?;
    Ok(latest)
}

pub async fn versions(conn: &mut SqliteConnection) -> Result<Vec<Version>, StoreError> {
    let versions = sqlx::query_as("SELECT * FROM version ORDER BY version")
        .fetch_all(&mut *conn)
        .await?;
    Ok(versions)
}

pub async fn version(conn: &mut SqliteConnection, version: u32) -> Result<Option<Version>, StoreError> {
    let row = sqlx::query_as("SELECT * FROM version WHERE version = ?")
        .bind(version)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn require_version(conn: &mut SqliteConnection, number: u32) -> Result<Version, StoreError> {
    version(conn, number)
        .await?
        .ok_or(StoreError::UnknownVersion(number))
}

pub async fn insert_version(conn: &mut SqliteConnection, row: &Version) -> Result<(), StoreError> {
    if version(conn, row.version).await?.is_some() {
        return Err(StoreError::VersionExists(row.version));
    }
    let sql = format!(
        "INSERT INTO version ({}) VALUES ({})",
        Version::COLUMNS.join(", "),
        placeholders(Version::COLUMNS.len())
    );
    row.bind(sqlx::query(&sql)).execute(&mut *conn).await?;
    Ok(())
}

pub async fn save_version(conn: &mut SqliteConnection, row: &Version) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE version SET {} WHERE version = ?",
        assignments(Version::COLUMNS)
    );
    let result = row
        .bind(sqlx::query(&sql))
        .bind(row.version)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::UnknownVersion(row.version));
    }
    Ok(())
}

/// Delete a version row. Its collections must have been detached first.
pub async fn remove_version(conn: &mut SqliteConnection, number: u32) -> Result<Version, StoreError> {
    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM version_collection WHERE version = ?")
        .bind(number)
        .fetch_one(&mut *conn)
        .await?;
    if links > 0 {
        return Err(StoreError::StillReferenced {
            level: Level::Version,
            key: number.to_string(),
            links,
        });
    }
    let row = require_version(conn, number).await?;
    sqlx::query("DELETE FROM version WHERE version = ?")
        .bind(number)
        .execute(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn get<E: Entity>(conn: &mut SqliteConnection, uuid: Uuid) -> Result<Option<E>, StoreError> {
    let sql = format!("SELECT * FROM {} WHERE uuid = ?", E::LEVEL.table_name());
    let row = sqlx::query_as(&sql)
        .bind(uuid)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn require<E: Entity>(conn: &mut SqliteConnection, uuid: Uuid) -> Result<E, StoreError> {
    get::<E>(conn, uuid).await?.ok_or(StoreError::UnknownEntity {
        level: E::LEVEL,
        uuid,
    })
}

pub async fn exists<E: Entity>(conn: &mut SqliteConnection, uuid: Uuid) -> Result<bool, StoreError> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE uuid = ?)", E::LEVEL.table_name());
    let exists: bool = sqlx::query_scalar(&sql).bind(uuid).fetch_one(&mut *conn).await?;
    Ok(exists)
}

/// Every row of the table, ordered by UUID.
pub async fn rows<E: Entity>(conn: &mut SqliteConnection) -> Result<Vec<E>, StoreError> {
    let sql = format!("SELECT * FROM {} ORDER BY uuid", E::LEVEL.table_name());
    let rows = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    Ok(rows)
}

/// Add a row without associating it with any parent.
pub async fn insert<E: Entity>(conn: &mut SqliteConnection, row: &E) -> Result<Uuid, StoreError> {
    let columns = E::columns();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        E::LEVEL.table_name(),
        columns.join(", "),
        placeholders(columns.len())
    );
    row.bind(sqlx::query(&sql)).execute(&mut *conn).await?;
    Ok(row.row().uuid)
}

/// Write every column of an existing row.
pub async fn save<E: Entity>(conn: &mut SqliteConnection, row: &E) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {} SET {} WHERE uuid = ?",
        E::LEVEL.table_name(),
        assignments(&E::columns())
    );
    let uuid = row.row().uuid;
    let result = row
        .bind(sqlx::query(&sql))
        .bind(uuid)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::UnknownEntity {
            level: E::LEVEL,
            uuid,
        });
    }
    Ok(())
}

/// Set the last version in which the row `uuid` of `level` is current.
///
/// Returns whether the row was current before.
pub async fn set_final(
    conn: &mut SqliteConnection,
    level: Level,
    uuid: Uuid,
    final_version: u32,
) -> Result<bool, StoreError> {
    let sql = format!(
        "UPDATE {} SET final_idc_version = ? WHERE uuid = ? AND final_idc_version = 0",
        level.table_name()
    );
    let result = sqlx::query(&sql)
        .bind(final_version)
        .bind(uuid)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Make the row `uuid` of `level` current again.
pub async fn clear_final(conn: &mut SqliteConnection, level: Level, uuid: Uuid) -> Result<(), StoreError> {
    let sql = format!("UPDATE {} SET final_idc_version = 0 WHERE uuid = ?", level.table_name());
    sqlx::query(&sql).bind(uuid).execute(&mut *conn).await?;
    Ok(())
}

/// Return a row to the state of one which was never built: current, not expanded,
/// not done, and with hashes which do not match any tree.
pub async fn reset_unbuilt(conn: &mut SqliteConnection, level: Level, uuid: Uuid) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {} SET expanded = FALSE, done = FALSE, final_idc_version = 0,
            hashes_tcia = '', hashes_path = '', hashes_all_sources = '',
            sources_tcia = FALSE, sources_path = FALSE,
            revised_tcia = FALSE, revised_path = FALSE
         WHERE uuid = ?",
        level.table_name()
    );
    let result = sqlx::query(&sql).bind(uuid).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::UnknownEntity { level, uuid });
    }
    Ok(())
}

/// UUIDs of the rows associated with `parent` through `association`.
pub async fn child_uuids<P: ParentKey>(
    conn: &mut SqliteConnection,
    association: Association,
    parent: P,
) -> Result<Vec<Uuid>, StoreError> {
    let sql = format!(
        "SELECT {child} FROM {table} WHERE {parent} = ? ORDER BY {child}",
        child = association.child_column,
        table = association.table,
        parent = association.parent_column,
    );
    let children = sqlx::query_scalar(&sql)
        .bind(parent)
        .fetch_all(&mut *conn)
        .await?;
    Ok(children)
}

/// UUIDs of the rows associated with `parent` through `association` which are
/// current at `version`.
pub async fn current_child_uuids<P: ParentKey>(
    conn: &mut SqliteConnection,
    association: Association,
    parent: P,
    version: u32,
) -> Result<Vec<Uuid>, StoreError> {
    let sql = format!(
        "SELECT c.uuid FROM {table} a JOIN {child_table} c ON c.uuid = a.{child}
         WHERE a.{parent} = ? AND (c.final_idc_version = 0 OR c.final_idc_version >= ?)
         ORDER BY c.uuid",
        table = association.table,
        child_table = association.child.table_name(),
        child = association.child_column,
        parent = association.parent_column,
    );
    let children = sqlx::query_scalar(&sql)
        .bind(parent)
        .bind(version)
        .fetch_all(&mut *conn)
        .await?;
    Ok(children)
}

/// UUIDs of the `E` rows associated with `parent`.
pub async fn children<E: Entity>(conn: &mut SqliteConnection, parent: E::ParentKey) -> Result<Vec<Uuid>, StoreError> {
    child_uuids(conn, E::PARENTS, parent).await
}

/// UUIDs of the `E` rows associated with `parent` which are current at `version`.
pub async fn current_children<E: Entity>(
    conn: &mut SqliteConnection,
    parent: E::ParentKey,
    version: u32,
) -> Result<Vec<Uuid>, StoreError> {
    current_child_uuids(conn, E::PARENTS, parent, version).await
}

/// The `E` rows associated with `parent` which are current at `version`, ordered by UUID.
pub async fn current_child_rows<E: Entity>(
    conn: &mut SqliteConnection,
    parent: E::ParentKey,
    version: u32,
) -> Result<Vec<E>, StoreError> {
    let sql = format!(
        "SELECT c.* FROM {table} a JOIN {child_table} c ON c.uuid = a.{child}
         WHERE a.{parent} = ? AND (c.final_idc_version = 0 OR c.final_idc_version >= ?)
         ORDER BY c.uuid",
        table = E::PARENTS.table,
        child_table = E::LEVEL.table_name(),
        child = E::PARENTS.child_column,
        parent = E::PARENTS.parent_column,
    );
    let rows = sqlx::query_as(&sql)
        .bind(parent)
        .bind(version)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Keys of the parents of the row `child` in `association`.
pub async fn parent_keys<P: ParentKey>(
    conn: &mut SqliteConnection,
    association: Association,
    child: Uuid,
) -> Result<Vec<P>, StoreError> {
    let sql = format!(
        "SELECT {parent} FROM {table} WHERE {child} = ? ORDER BY {parent}",
        parent = association.parent_column,
        table = association.table,
        child = association.child_column,
    );
    let parents = sqlx::query_scalar(&sql)
        .bind(child)
        .fetch_all(&mut *conn)
        .await?;
    Ok(parents)
}

/// UUIDs of the parents of `child` in `association` which were created by `version`.
pub async fn built_parents(
    conn: &mut SqliteConnection,
    association: Association,
    child: Uuid,
    version: u32,
) -> Result<Vec<Uuid>, StoreError> {
    let sql = format!(
        "SELECT p.uuid FROM {table} a JOIN {parent_table} p ON p.uuid = a.{parent}
         WHERE a.{child} = ? AND p.rev_idc_version = ?
         ORDER BY p.uuid",
        table = association.table,
        parent_table = association.parent.table_name(),
        parent = association.parent_column,
        child = association.child_column,
    );
    let parents = sqlx::query_scalar(&sql)
        .bind(child)
        .bind(version)
        .fetch_all(&mut *conn)
        .await?;
    Ok(parents)
}

/// Keys of the parents of the `E` row `child`.
pub async fn parents<E: Entity>(conn: &mut SqliteConnection, child: Uuid) -> Result<Vec<E::ParentKey>, StoreError> {
    parent_keys(conn, E::PARENTS, child).await
}

/// Associate the `E` row `child` with `parent`.
pub async fn attach<E: Entity>(conn: &mut SqliteConnection, parent: E::ParentKey, child: Uuid) -> Result<(), StoreError> {
    if !exists::<E>(conn, child).await? {
        return Err(StoreError::UnknownEntity {
            level: E::LEVEL,
            uuid: child,
        });
    }
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (?, ?) ON CONFLICT DO NOTHING",
        E::PARENTS.table,
        E::PARENTS.parent_column,
        E::PARENTS.child_column
    );
    let result = sqlx::query(&sql)
        .bind(parent)
        .bind(child)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::DuplicateAssociation {
            level: E::LEVEL,
            parent: parent.to_string(),
            child,
        });
    }
    Ok(())
}

pub async fn detach<E: Entity>(conn: &mut SqliteConnection, parent: E::ParentKey, child: Uuid) -> Result<(), StoreError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND {} = ?",
        E::PARENTS.table,
        E::PARENTS.parent_column,
        E::PARENTS.child_column
    );
    let result = sqlx::query(&sql)
        .bind(parent)
        .bind(child)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotAssociated {
            level: E::LEVEL,
            parent: parent.to_string(),
            child,
        });
    }
    Ok(())
}

/// The child of `parent` identified by `natural_key`, preferring a current row, then
/// the most recent revision.
pub async fn find_child<E: Entity>(
    conn: &mut SqliteConnection,
    parent: E::ParentKey,
    natural_key: &str,
) -> Result<Option<Uuid>, StoreError> {
    let sql = format!(
        "SELECT c.uuid FROM {table} a JOIN {child_table} c ON c.uuid = a.{child}
         WHERE a.{parent} = ? AND {condition}
         ORDER BY c.final_idc_version = 0 DESC, c.rev_idc_version DESC
         LIMIT 1",
        table = E::PARENTS.table,
        child_table = E::LEVEL.table_name(),
        child = E::PARENTS.child_column,
        parent = E::PARENTS.parent_column,
        condition = E::key_condition(),
    );
    let uuid = sqlx::query_scalar(&sql)
        .bind(parent)
        .bind(natural_key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(uuid)
}

/// Look up the child of `parent` identified by `natural_key`. If there is none, create
/// it as new in `version` and associate it with `parent`.
///
/// Returns the UUID of the child and whether it was created.
pub async fn get_or_create<E: Entity>(
    conn: &mut SqliteConnection,
    parent: E::ParentKey,
    natural_key: &str,
    version: u32,
) -> Result<(Uuid, bool), StoreError> {
    if let Some(uuid) = find_child::<E>(conn, parent, natural_key).await? {
        return Ok((uuid, false));
    }
    let uuid = insert(conn, &E::create(natural_key, RowMeta::new(version))).await?;
    attach::<E>(conn, parent, uuid).await?;
    tracing::debug!(level = %E::LEVEL, %uuid, %parent, natural_key, "created");
    Ok((uuid, true))
}

/// Attach an unchanged row to the parent of a new version instead of duplicating it.
pub async fn attach_existing<E: Entity>(
    conn: &mut SqliteConnection,
    child: Uuid,
    parent: E::ParentKey,
) -> Result<(), StoreError> {
    attach::<E>(conn, parent, child).await?;
    tracing::debug!(level = %E::LEVEL, uuid = %child, %parent, "attached unchanged");
    Ok(())
}

/// Every row identified by `natural_key`, across versions.
pub async fn rows_for_key<E: Entity>(conn: &mut SqliteConnection, natural_key: &str) -> Result<Vec<Uuid>, StoreError> {
    let sql = format!(
        "SELECT uuid FROM {} WHERE {} ORDER BY uuid",
        E::LEVEL.table_name(),
        E::key_condition()
    );
    let uuids = sqlx::query_scalar(&sql)
        .bind(natural_key)
        .fetch_all(&mut *conn)
        .await?;
    Ok(uuids)
}

/// Every row of the same lineage as `row`, including itself, oldest revision first.
pub async fn lineage<E: Entity>(conn: &mut SqliteConnection, row: &E) -> Result<Vec<E>, StoreError> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ? ORDER BY rev_idc_version, uuid",
        E::LEVEL.table_name(),
        E::LINEAGE
    );
    let rows = sqlx::query_as(&sql)
        .bind(row.lineage_key())
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Delete a row. It must not be associated with any parent or child.
pub async fn delete<E: Entity>(conn: &mut SqliteConnection, uuid: Uuid) -> Result<E, StoreError> {
    let mut links = count_links(conn, E::PARENTS, E::PARENTS.child_column, uuid).await?;
    if let Some(below) = Association::below(E::LEVEL) {
        links += count_links(conn, below, below.parent_column, uuid).await?;
    }
    if links > 0 {
        return Err(StoreError::StillReferenced {
            level: E::LEVEL,
            key: uuid.to_string(),
            links,
        });
    }
    let row = require::<E>(conn, uuid).await?;
    let sql = format!("DELETE FROM {} WHERE uuid = ?", E::LEVEL.table_name());
    sqlx::query(&sql).bind(uuid).execute(&mut *conn).await?;
    Ok(row)
}

async fn count_links(
    conn: &mut SqliteConnection,
    association: Association,
    column: &str,
    uuid: Uuid,
) -> Result<i64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {column} = ?", association.table);
    let count = sqlx::query_scalar(&sql).bind(uuid).fetch_one(&mut *conn).await?;
    Ok(count)
}

/// Every pair of `association`, ordered by parent then child.
pub async fn pairs<P: ParentKey>(
    conn: &mut SqliteConnection,
    association: Association,
) -> Result<Vec<(P, Uuid)>, StoreError> {
    let sql = format!(
        "SELECT {parent}, {child} FROM {table} ORDER BY {parent}, {child}",
        parent = association.parent_column,
        child = association.child_column,
        table = association.table,
    );
    let pairs = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    Ok(pairs)
}

/// Content of every table, in a deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDump {
    pub version: Vec<Version>,
    pub collection: Vec<Collection>,
    pub patient: Vec<Patient>,
    pub study: Vec<Study>,
    pub series: Vec<Series>,
    pub instance: Vec<Instance>,
    pub version_collection: Vec<(u32, Uuid)>,
    pub collection_patient: Vec<(Uuid, Uuid)>,
    pub patient_study: Vec<(Uuid, Uuid)>,
    pub study_series: Vec<(Uuid, Uuid)>,
    pub series_instance: Vec<(Uuid, Uuid)>,
}

pub async fn dump(conn: &mut SqliteConnection) -> Result<TableDump, StoreError> {
    use crate::association::*;
    Ok(TableDump {
        version: versions(conn).await?,
        collection: rows(conn).await?,
        patient: rows(conn).await?,
        study: rows(conn).await?,
        series: rows(conn).await?,
        instance: rows(conn).await?,
        version_collection: pairs(conn, VERSION_COLLECTION).await?,
        collection_patient: pairs(conn, COLLECTION_PATIENT).await?,
        patient_study: pairs(conn, PATIENT_STUDY).await?,
        study_series: pairs(conn, STUDY_SERIES).await?,
        series_instance: pairs(conn, SERIES_INSTANCE).await?,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::ops::Deref;

    /// A store in a database file which is deleted when this is dropped.
    pub(crate) struct TempStore {
        store: EntityStore,
        _dir: tempfile::TempDir,
    }

    impl Deref for TempStore {
        type Target = EntityStore;

        fn deref(&self) -> &Self::Target {
            &self.store
        }
    }

    impl TempStore {
        pub(crate) fn settings(&self) -> DbSettings {
            db_settings(self._dir.path())
        }
    }

    pub(crate) fn db_settings(dir: &std::path::Path) -> DbSettings {
        DbSettings {
            connection: format!("sqlite://{}", dir.join("catalog.sqlite").display()),
            ..Default::default()
        }
    }

    pub(crate) async fn temp_store() -> TempStore {
        let dir = tempfile::TempDir::with_prefix("idc-hashtree-test-").unwrap();
        let store = EntityStore::connect(&db_settings(dir.path())).await.unwrap();
        TempStore { store, _dir: dir }
    }
}
