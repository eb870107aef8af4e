//! Consistency checks of an [EntityStore].

use crate::association::{Association, ParentKey};
use crate::error::{RehashError, StoreError};
use crate::model::*;
use crate::rehash::HashEngine;
use crate::store::{self, EntityStore};
use crate::types::Level;
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A broken invariant of the versioned tree.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("{level} {uuid} has init_idc_version={init} after rev_idc_version={rev}")]
    InitAfterRevision { level: Level, uuid: Uuid, init: u32, rev: u32 },

    #[error("{level} {uuid} has final_idc_version={final_version} before rev_idc_version={rev}")]
    FinalBeforeRevision {
        level: Level,
        uuid: Uuid,
        rev: u32,
        final_version: u32,
    },

    #[error("{level} \"{lineage}\" has {} current rows", .uuids.len())]
    SeveralCurrent {
        level: Level,
        lineage: String,
        uuids: Vec<Uuid>,
    },

    #[error("{level} \"{lineage}\": {second} does not revise {first} in a later version")]
    RevisionsNotIncreasing {
        level: Level,
        lineage: String,
        first: Uuid,
        second: Uuid,
    },

    #[error("{level} association ({parent}, {child}) refers to a missing row")]
    DanglingAssociation { level: Level, parent: String, child: Uuid },

    #[error("stored hashes of {level} {key} are stale in version {version}")]
    StaleHash { level: Level, key: String, version: u32 },
}

/// Check the revision bookkeeping and the association tables.
pub async fn validate(store: &EntityStore) -> Result<Vec<Violation>, StoreError> {
    let mut conn = store.acquire().await?;
    let mut violations = Vec::new();
    check_rows::<Collection>(&mut conn, &mut violations).await?;
    check_rows::<Patient>(&mut conn, &mut violations).await?;
    check_rows::<Study>(&mut conn, &mut violations).await?;
    check_rows::<Series>(&mut conn, &mut violations).await?;
    check_rows::<Instance>(&mut conn, &mut violations).await?;

    for association in Association::ALL {
        if association.parent == Level::Version {
            check_association::<u32>(&mut conn, association, &mut violations).await?;
        } else {
            check_association::<Uuid>(&mut conn, association, &mut violations).await?;
        }
    }
    Ok(violations)
}

/// [validate], and also recompute the hashes of every version's tree.
pub async fn validate_deep(store: &EntityStore, engine: &HashEngine) -> Result<Vec<Violation>, RehashError> {
    let mut violations = validate(store).await?;
    let versions = {
        let mut conn = store.acquire().await?;
        store::versions(&mut conn).await?
    };
    for version in versions.into_iter().map(|v| v.version) {
        let report = engine.verify_version(store, version).await?;
        violations.extend(report.changed.into_iter().map(|(level, uuid)| Violation::StaleHash {
            level,
            key: uuid.to_string(),
            version,
        }));
        if report.version_changed {
            violations.push(Violation::StaleHash {
                level: Level::Version,
                key: version.to_string(),
                version,
            });
        }
    }
    Ok(violations)
}

async fn check_rows<E: Entity>(conn: &mut SqliteConnection, violations: &mut Vec<Violation>) -> Result<(), StoreError> {
    let table = E::LEVEL.table_name();
    let lineage = E::LINEAGE;

    let sql = format!(
        "SELECT uuid, init_idc_version, rev_idc_version FROM {table}
         WHERE init_idc_version > rev_idc_version ORDER BY uuid"
    );
    let rows: Vec<(Uuid, u32, u32)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    violations.extend(rows.into_iter().map(|(uuid, init, rev)| Violation::InitAfterRevision {
        level: E::LEVEL,
        uuid,
        init,
        rev,
    }));

    let sql = format!(
        "SELECT uuid, rev_idc_version, final_idc_version FROM {table}
         WHERE final_idc_version != 0 AND final_idc_version < rev_idc_version ORDER BY uuid"
    );
    let rows: Vec<(Uuid, u32, u32)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    violations.extend(rows.into_iter().map(|(uuid, rev, final_version)| Violation::FinalBeforeRevision {
        level: E::LEVEL,
        uuid,
        rev,
        final_version,
    }));

    let sql = format!(
        "SELECT {lineage} AS lineage, uuid FROM {table}
         WHERE final_idc_version = 0 AND {lineage} IN (
             SELECT {lineage} FROM {table} WHERE final_idc_version = 0
             GROUP BY {lineage} HAVING COUNT(*) > 1
         )
         ORDER BY lineage, uuid"
    );
    let rows: Vec<(String, Uuid)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    let mut current: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
    for (lineage, uuid) in rows {
        current.entry(lineage).or_default().push(uuid);
    }
    violations.extend(current.into_iter().map(|(lineage, uuids)| Violation::SeveralCurrent {
        level: E::LEVEL,
        lineage,
        uuids,
    }));

    let sql = format!(
        "SELECT lineage, previous, uuid FROM (
             SELECT {lineage} AS lineage, uuid, rev_idc_version AS rev,
                 LAG(uuid) OVER revisions AS previous,
                 LAG(rev_idc_version) OVER revisions AS previous_rev
             FROM {table}
             WINDOW revisions AS (PARTITION BY {lineage} ORDER BY init_idc_version, rev_idc_version, uuid)
         )
         WHERE previous IS NOT NULL AND rev <= previous_rev
         ORDER BY lineage, uuid"
    );
    let rows: Vec<(String, Uuid, Uuid)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    violations.extend(rows.into_iter().map(|(lineage, first, second)| Violation::RevisionsNotIncreasing {
        level: E::LEVEL,
        lineage,
        first,
        second,
    }));
    Ok(())
}

async fn check_association<P: ParentKey>(
    conn: &mut SqliteConnection,
    association: Association,
    violations: &mut Vec<Violation>,
) -> Result<(), StoreError> {
    let sql = format!(
        "SELECT a.{parent}, a.{child} FROM {table} a
         LEFT JOIN {parent_table} p ON p.{parent_key} = a.{parent}
         LEFT JOIN {child_table} c ON c.uuid = a.{child}
         WHERE p.{parent_key} IS NULL OR c.uuid IS NULL
         ORDER BY a.{parent}, a.{child}",
        parent = association.parent_column,
        child = association.child_column,
        table = association.table,
        parent_table = association.parent.table_name(),
        parent_key = association.parent_key(),
        child_table = association.child.table_name(),
    );
    let dangling: Vec<(P, Uuid)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    violations.extend(dangling.into_iter().map(|(parent, child)| Violation::DanglingAssociation {
        level: association.child,
        parent: parent.to_string(),
        child,
    }));
    Ok(())
}
