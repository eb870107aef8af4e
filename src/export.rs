//! Per-table export as newline-delimited JSON, one row per line, using the catalog's
//! column names.

use crate::association::{Association, ParentKey};
use crate::error::PersistError;
use crate::model::*;
use crate::store::EntityStore;
use crate::types::Level;
use camino::{Utf8Path, Utf8PathBuf};
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

/// Write every table of `store` into `dir`, which is created if needed.
///
/// Rows are streamed from the database inside one read transaction, so the export is a
/// consistent snapshot. Returns the written files with their row counts.
pub async fn export_tables(store: &EntityStore, dir: impl AsRef<Utf8Path>) -> Result<Vec<(Utf8PathBuf, usize)>, PersistError> {
    let dir = dir.as_ref();
    fs_err::tokio::create_dir_all(dir).await?;
    let mut transaction = store.pool().begin().await?;
    let mut written = vec![write_versions(&mut transaction, dir).await?];
    written.push(write_entities::<Collection>(&mut transaction, dir).await?);
    written.push(write_entities::<Patient>(&mut transaction, dir).await?);
    written.push(write_entities::<Study>(&mut transaction, dir).await?);
    written.push(write_entities::<Series>(&mut transaction, dir).await?);
    written.push(write_entities::<Instance>(&mut transaction, dir).await?);
    for association in Association::ALL {
        let file = if association.parent == Level::Version {
            write_association::<u32>(&mut transaction, dir, association).await?
        } else {
            write_association::<Uuid>(&mut transaction, dir, association).await?
        };
        written.push(file);
    }
    transaction.rollback().await?;
    tracing::info!(dir = dir.as_str(), tables = written.len(), "Exported tables");
    Ok(written)
}

async fn write_versions(conn: &mut SqliteConnection, dir: &Utf8Path) -> Result<(Utf8PathBuf, usize), PersistError> {
    let rows = sqlx::query_as::<_, Version>("SELECT * FROM version ORDER BY version").fetch(&mut *conn);
    write_rows(dir, Level::Version.table_name(), rows).await
}

async fn write_entities<E: Entity + Serialize>(
    conn: &mut SqliteConnection,
    dir: &Utf8Path,
) -> Result<(Utf8PathBuf, usize), PersistError> {
    let table = E::LEVEL.table_name();
    let sql = format!("SELECT * FROM {table} ORDER BY uuid");
    let rows = sqlx::query_as::<_, E>(&sql).fetch(&mut *conn);
    write_rows(dir, table, rows).await
}

/// Association rows are objects keyed by the table's two column names.
async fn write_association<P: ParentKey + Serialize>(
    conn: &mut SqliteConnection,
    dir: &Utf8Path,
    association: Association,
) -> Result<(Utf8PathBuf, usize), PersistError> {
    let sql = format!(
        "SELECT {parent}, {child} FROM {table} ORDER BY {parent}, {child}",
        parent = association.parent_column,
        child = association.child_column,
        table = association.table,
    );
    let rows = sqlx::query_as::<_, (P, Uuid)>(&sql)
        .fetch(&mut *conn)
        .map_ok(|(parent, child)| {
            let mut row = serde_json::Map::new();
            row.insert(association.parent_column.to_string(), serde_json::json!(parent));
            row.insert(association.child_column.to_string(), serde_json::json!(child));
            row
        });
    write_rows(dir, association.table, rows).await
}

async fn write_rows<R: Serialize>(
    dir: &Utf8Path,
    name: &str,
    rows: impl Stream<Item = Result<R, sqlx::Error>>,
) -> Result<(Utf8PathBuf, usize), PersistError> {
    let path = dir.join(format!("{name}.ndjson"));
    let mut writer = BufWriter::new(fs_err::tokio::File::create(&path).await?);
    let mut rows = std::pin::pin!(rows);
    let mut count = 0;
    while let Some(row) = rows.try_next().await? {
        let mut line = serde_json::to_vec(&row)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        count += 1;
    }
    writer.flush().await?;
    tracing::debug!(path = path.as_str(), rows = count, "Exported table");
    Ok((path, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, testing::temp_store};
    use rstest::*;
    use serde_json::Value;

    fn read_rows(path: &Utf8Path) -> Vec<Value> {
        fs_err::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_column_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(temp_dir.path()).unwrap().join("export");
        let store = temp_store().await;
        let mut conn = store.acquire().await.unwrap();
        store::insert_version(&mut conn, &Version::new(1, 0)).await.unwrap();
        let (collection, _) = store::get_or_create::<Collection>(&mut conn, 1, "TCGA-READ", 1).await.unwrap();
        let (patient, _) = store::get_or_create::<Patient>(&mut conn, collection, "case-1", 1).await.unwrap();
        drop(conn);

        let written = export_tables(&store, &dir).await.unwrap();
        assert_eq!(written.len(), 11);
        // exporting twice into the same directory is fine
        export_tables(&store, &dir).await.unwrap();

        let collections = read_rows(&dir.join("collection.ndjson"));
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0]["collection_id"], "TCGA-READ");
        assert_eq!(collections[0]["idc_collection_id"], "tcga_read");
        assert_eq!(collections[0]["hashes"]["tcia"], "");
        assert_eq!(collections[0]["rev_idc_version"], 1);

        let links = read_rows(&dir.join("collection_patient.ndjson"));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0]["collection_uuid"], collection.to_string());
        assert_eq!(links[0]["patient_uuid"], patient.to_string());

        let versions = read_rows(&dir.join("version_collection.ndjson"));
        assert_eq!(versions[0]["version"], 1);
        assert!(read_rows(&dir.join("instance.ndjson")).is_empty());
    }
}
