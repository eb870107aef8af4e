//! The association tables, which link rows of adjacent levels many-to-many.

use crate::types::Level;
use sqlx::Sqlite;
use std::fmt;
use uuid::Uuid;

/// Key type of a parent table: the integer version number, or a surrogate UUID.
pub trait ParentKey:
    Copy
    + Ord
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + Unpin
    + 'static
    + sqlx::Type<Sqlite>
    + for<'q> sqlx::Encode<'q, Sqlite>
    + for<'r> sqlx::Decode<'r, Sqlite>
{
}

impl ParentKey for u32 {}

impl ParentKey for Uuid {}

/// A many-to-many association between the rows of two adjacent levels.
///
/// `(parent_column, child_column)` is the composite primary key: a pair is either
/// present once or absent. The child column has its own index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    pub table: &'static str,
    pub parent: Level,
    pub parent_column: &'static str,
    pub child: Level,
    pub child_column: &'static str,
}

pub const VERSION_COLLECTION: Association = Association {
    table: "version_collection",
    parent: Level::Version,
    parent_column: "version",
    child: Level::Collection,
    child_column: "collection_uuid",
};

pub const COLLECTION_PATIENT: Association = Association {
    table: "collection_patient",
    parent: Level::Collection,
    parent_column: "collection_uuid",
    child: Level::Patient,
    child_column: "patient_uuid",
};

pub const PATIENT_STUDY: Association = Association {
    table: "patient_study",
    parent: Level::Patient,
    parent_column: "patient_uuid",
    child: Level::Study,
    child_column: "study_uuid",
};

pub const STUDY_SERIES: Association = Association {
    table: "study_series",
    parent: Level::Study,
    parent_column: "study_uuid",
    child: Level::Series,
    child_column: "series_uuid",
};

pub const SERIES_INSTANCE: Association = Association {
    table: "series_instance",
    parent: Level::Series,
    parent_column: "series_uuid",
    child: Level::Instance,
    child_column: "instance_uuid",
};

impl Association {
    /// Every association table, root-most first.
    pub const ALL: [Association; 5] = [
        VERSION_COLLECTION,
        COLLECTION_PATIENT,
        PATIENT_STUDY,
        STUDY_SERIES,
        SERIES_INSTANCE,
    ];

    /// The association linking rows of `child` to their parents.
    pub fn above(child: Level) -> Option<Association> {
        Self::ALL.into_iter().find(|a| a.child == child)
    }

    /// The association linking rows of `parent` to their children.
    pub fn below(parent: Level) -> Option<Association> {
        Self::ALL.into_iter().find(|a| a.parent == parent)
    }

    /// Primary key column of the parent table.
    pub fn parent_key(&self) -> &'static str {
        match self.parent {
            Level::Version => "version",
            _ => "uuid",
        }
    }

    pub(crate) fn create_table(&self) -> String {
        let parent_type = match self.parent {
            Level::Version => "INTEGER",
            _ => "BLOB",
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {parent_column} {parent_type} NOT NULL REFERENCES {parent_table}({parent_key}),
                {child_column} BLOB NOT NULL REFERENCES {child_table}(uuid),
                PRIMARY KEY ({parent_column}, {child_column})
            )",
            table = self.table,
            parent_column = self.parent_column,
            parent_table = self.parent.table_name(),
            parent_key = self.parent_key(),
            child_column = self.child_column,
            child_table = self.child.table_name(),
        )
    }

    pub(crate) fn create_index(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_{child_column} ON {table} ({child_column})",
            table = self.table,
            child_column = self.child_column,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case(Level::Collection, "version_collection")]
    #[case(Level::Patient, "collection_patient")]
    #[case(Level::Instance, "series_instance")]
    fn test_above(#[case] child: Level, #[case] table: &str) {
        let association = Association::above(child).unwrap();
        assert_eq!(association.table, table);
        assert_eq!(Some(association.parent), child.parent());
        assert_eq!(Association::below(association.parent), Some(association));
    }

    #[rstest]
    fn test_ends_of_hierarchy() {
        assert_eq!(Association::above(Level::Version), None);
        assert_eq!(Association::below(Level::Instance), None);
        assert_eq!(VERSION_COLLECTION.parent_key(), "version");
        assert_eq!(STUDY_SERIES.parent_key(), "uuid");
    }

    #[rstest]
    fn test_create_table() {
        let sql = VERSION_COLLECTION.create_table();
        assert!(sql.contains("version INTEGER NOT NULL REFERENCES version(version)"));
        assert!(sql.contains("PRIMARY KEY (version, collection_uuid)"));
    }
}
