//! Rows of the versioned catalog tables.
//!
//! Field names are the external column names. The `hashes`, `sources` and `revised`
//! composites are stored as one column per member, e.g. `hashes_tcia`.

use crate::association::*;
use crate::hashes::{HashTriple, SourceFlags};
use crate::sanitize::idc_collection_id;
use crate::types::*;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Row, Sqlite};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// A statement with its parameters bound so far.
pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Columns of [RowMeta], in the order bound by [RowMeta::bind].
pub const ROW_COLUMNS: &[&str] = &[
    "uuid",
    "init_idc_version",
    "rev_idc_version",
    "final_idc_version",
    "done",
    "is_new",
    "expanded",
];

/// Columns of [NodeState], in the order bound by [NodeState::bind].
pub const NODE_COLUMNS: &[&str] = &[
    "min_timestamp",
    "max_timestamp",
    "hashes_tcia",
    "hashes_path",
    "hashes_all_sources",
    "sources_tcia",
    "sources_path",
    "revised_tcia",
    "revised_path",
];

/// Revision bookkeeping and lifecycle flags shared by every surrogate-keyed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMeta {
    pub uuid: Uuid,
    /// Version in which the lineage of this row first appeared.
    pub init_idc_version: u32,
    /// Version in which this row was created.
    pub rev_idc_version: u32,
    /// Last version in which this row was current, or 0 if it is still current.
    pub final_idc_version: u32,
    pub done: bool,
    pub is_new: bool,
    pub expanded: bool,
}

/// Where a row stands relative to some version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionState {
    /// First appearance of the lineage.
    New,
    /// Created in this version as a successor of an older row.
    Revised,
    /// Created by an earlier version and still current.
    Unchanged,
    /// Superseded or removed.
    Retired,
}

impl RowMeta {
    /// Metadata of a row whose lineage first appears in `version`.
    pub fn new(version: u32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            init_idc_version: version,
            rev_idc_version: version,
            final_idc_version: 0,
            done: false,
            is_new: true,
            expanded: false,
        }
    }

    /// Metadata of a row which succeeds `predecessor` in `version`.
    pub fn revision_of(predecessor: &RowMeta, version: u32) -> Self {
        Self {
            init_idc_version: predecessor.init_idc_version,
            is_new: false,
            ..Self::new(version)
        }
    }

    pub fn is_current(&self) -> bool {
        self.final_idc_version == 0
    }

    pub fn is_current_at(&self, version: u32) -> bool {
        self.final_idc_version == 0 || self.final_idc_version >= version
    }

    /// The version against which the currency of this row's children is judged:
    /// the last version in which it was current, or "latest" if it still is.
    pub fn reference_version(&self) -> u32 {
        if self.is_current() {
            u32::MAX
        } else {
            self.final_idc_version
        }
    }

    pub(crate) fn from_columns(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            uuid: row.try_get("uuid")?,
            init_idc_version: row.try_get("init_idc_version")?,
            rev_idc_version: row.try_get("rev_idc_version")?,
            final_idc_version: row.try_get("final_idc_version")?,
            done: row.try_get("done")?,
            is_new: row.try_get("is_new")?,
            expanded: row.try_get("expanded")?,
        })
    }

    pub(crate) fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.uuid)
            .bind(self.init_idc_version)
            .bind(self.rev_idc_version)
            .bind(self.final_idc_version)
            .bind(self.done)
            .bind(self.is_new)
            .bind(self.expanded)
    }

    pub fn state(&self, version: u32) -> RevisionState {
        if !self.is_current() {
            RevisionState::Retired
        } else if self.rev_idc_version != version {
            RevisionState::Unchanged
        } else if self.init_idc_version == self.rev_idc_version {
            RevisionState::New
        } else {
            RevisionState::Revised
        }
    }
}

/// Hash and aggregate state of non-leaf rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub min_timestamp: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub max_timestamp: Option<OffsetDateTime>,
    pub hashes: HashTriple,
    pub sources: SourceFlags,
    pub revised: SourceFlags,
}

impl NodeState {
    /// Forget everything computed from children.
    pub fn reset(&mut self) {
        self.hashes = HashTriple::default();
        self.sources = SourceFlags::default();
        self.revised = SourceFlags::default();
    }

    pub(crate) fn from_columns(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            min_timestamp: row.try_get("min_timestamp")?,
            max_timestamp: row.try_get("max_timestamp")?,
            hashes: HashTriple::from_columns(row)?,
            sources: SourceFlags::from_columns(row, "sources")?,
            revised: SourceFlags::from_columns(row, "revised")?,
        })
    }

    pub(crate) fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        bind_composites(query.bind(self.min_timestamp).bind(self.max_timestamp), &self.hashes, self.sources, self.revised)
    }
}

fn bind_composites<'q>(
    query: SqliteQuery<'q>,
    hashes: &'q HashTriple,
    sources: SourceFlags,
    revised: SourceFlags,
) -> SqliteQuery<'q> {
    query
        .bind(hashes.tcia.as_str())
        .bind(hashes.path.as_str())
        .bind(hashes.all_sources.as_str())
        .bind(sources.tcia)
        .bind(sources.path)
        .bind(revised.tcia)
        .bind(revised.path)
}

/// One published snapshot of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version: u32,
    /// 0 for the first version.
    pub previous_version: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub min_timestamp: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub max_timestamp: Option<OffsetDateTime>,
    pub done: bool,
    pub is_new: bool,
    pub expanded: bool,
    pub hashes: HashTriple,
    pub sources: SourceFlags,
    pub revised: SourceFlags,
}

impl Version {
    pub fn new(version: u32, previous_version: u32) -> Self {
        Self {
            version,
            previous_version,
            min_timestamp: None,
            max_timestamp: None,
            done: false,
            is_new: true,
            expanded: false,
            hashes: Default::default(),
            sources: Default::default(),
            revised: Default::default(),
        }
    }

    pub fn reset_unbuilt(&mut self) {
        self.expanded = false;
        self.done = false;
        self.hashes = HashTriple::default();
        self.sources = SourceFlags::default();
        self.revised = SourceFlags::default();
    }

    /// Every column of the `version` table, in the order bound by [Version::bind].
    pub const COLUMNS: &[&str] = &[
        "version",
        "previous_version",
        "done",
        "is_new",
        "expanded",
        "min_timestamp",
        "max_timestamp",
        "hashes_tcia",
        "hashes_path",
        "hashes_all_sources",
        "sources_tcia",
        "sources_path",
        "revised_tcia",
        "revised_path",
    ];

    pub(crate) fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        let query = query
            .bind(self.version)
            .bind(self.previous_version)
            .bind(self.done)
            .bind(self.is_new)
            .bind(self.expanded)
            .bind(self.min_timestamp)
            .bind(self.max_timestamp);
        bind_composites(query, &self.hashes, self.sources, self.revised)
    }
}

impl FromRow<'_, SqliteRow> for Version {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            version: row.try_get("version")?,
            previous_version: row.try_get("previous_version")?,
            min_timestamp: row.try_get("min_timestamp")?,
            max_timestamp: row.try_get("max_timestamp")?,
            done: row.try_get("done")?,
            is_new: row.try_get("is_new")?,
            expanded: row.try_get("expanded")?,
            hashes: HashTriple::from_columns(row)?,
            sources: SourceFlags::from_columns(row, "sources")?,
            revised: SourceFlags::from_columns(row, "revised")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub collection_id: CollectionId,
    pub idc_collection_id: String,
    #[serde(flatten)]
    pub row: RowMeta,
    #[serde(flatten)]
    pub node: NodeState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub submitter_case_id: SubmitterCaseId,
    /// Stable across revisions of the same patient.
    pub idc_case_id: Uuid,
    #[serde(flatten)]
    pub row: RowMeta,
    #[serde(flatten)]
    pub node: NodeState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub study_instance_uid: StudyInstanceUid,
    pub study_instances: i64,
    #[serde(flatten)]
    pub row: RowMeta,
    #[serde(flatten)]
    pub node: NodeState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub series_instance_uid: SeriesInstanceUid,
    pub series_instances: i64,
    #[serde(default)]
    pub source_doi: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(flatten)]
    pub row: RowMeta,
    #[serde(flatten)]
    pub node: NodeState,
}

/// A single DICOM file. Its `hash` is the content hash of the file, not a composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub sop_instance_uid: SopInstanceUid,
    #[serde(flatten)]
    pub row: RowMeta,
    pub hash: String,
    pub size: i64,
    pub source: Source,
    /// Semantically invalid, but kept so that historical hashes can be recomputed.
    #[serde(default)]
    pub excluded: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default)]
    pub revised: bool,
}

/// What a child row feeds into its parent's hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution<'a> {
    pub all_sources: &'a str,
    pub tcia: Option<&'a str>,
    pub path: Option<&'a str>,
}

impl<'a> Contribution<'a> {
    pub fn get(&self, source: Source) -> Option<&'a str> {
        match source {
            Source::Tcia => self.tcia,
            Source::Path => self.path,
            Source::AllSources => Some(self.all_sources),
        }
    }

    /// What a node with these hashes feeds into its parent.
    pub fn of_hashes(hashes: &'a HashTriple, sources: SourceFlags) -> Self {
        Self {
            all_sources: &hashes.all_sources,
            tcia: sources.tcia.then_some(hashes.tcia.as_str()),
            path: sources.path.then_some(hashes.path.as_str()),
        }
    }

    fn of_node(node: &'a NodeState) -> Self {
        Self::of_hashes(&node.hashes, node.sources)
    }
}

/// A surrogate-keyed row of one of the catalog tables below `version`.
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Clone + fmt::Debug + Send + Sync + Unpin + 'static {
    const LEVEL: Level;
    /// Key of the parent table.
    type ParentKey: ParentKey;
    /// The association linking rows of this table to their parents.
    const PARENTS: Association;
    const KEY_COLUMN: &'static str;
    /// SQL expression which evaluates to [Entity::lineage_key].
    const LINEAGE: &'static str = Self::KEY_COLUMN;
    /// Columns besides those of [RowMeta] and [NodeState], in the order bound by [Entity::bind_own].
    const OWN_COLUMNS: &'static [&'static str];
    const HAS_NODE: bool = true;

    /// A fresh row for `natural_key`.
    fn create(natural_key: &str, row: RowMeta) -> Self;

    fn natural_key(&self) -> &str;

    /// Whether this row is identified by `key`.
    fn key_matches(&self, key: &str) -> bool {
        self.natural_key() == key
    }

    /// `key` in the form compared by [Entity::key_matches].
    fn normalized_key(key: &str) -> String {
        key.to_string()
    }

    /// SQL condition which holds for the rows identified by the one bound parameter.
    fn key_condition() -> String {
        format!("{} = ?", Self::KEY_COLUMN)
    }

    /// Identifies every surrogate row of the same entity across versions.
    fn lineage_key(&self) -> String {
        self.natural_key().to_string()
    }

    /// Carry identifiers over from the row this one succeeds.
    fn inherit_lineage(&mut self, _predecessor: &Self) {}

    fn row(&self) -> &RowMeta;
    fn row_mut(&mut self) -> &mut RowMeta;
    fn contribution(&self) -> Contribution<'_>;

    fn bind_own<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    /// [NodeState] of rows which have one.
    fn node_state(&self) -> Option<&NodeState> {
        None
    }

    /// Every column of the table, in the order bound by [Entity::bind].
    fn columns() -> Vec<&'static str> {
        let node: &[&str] = if Self::HAS_NODE { NODE_COLUMNS } else { &[] };
        [ROW_COLUMNS, Self::OWN_COLUMNS, node].concat()
    }

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        let query = self.bind_own(self.row().bind(query));
        match self.node_state() {
            Some(node) => node.bind(query),
            None => query,
        }
    }
}

/// A row with children, whose hashes are computed from theirs.
pub trait Branch: Entity {
    type Child: Entity<ParentKey = Uuid>;
    fn node(&self) -> &NodeState;
    fn node_mut(&mut self) -> &mut NodeState;
}

impl FromRow<'_, SqliteRow> for Collection {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            collection_id: CollectionId::from(row.try_get::<String, _>("collection_id")?),
            idc_collection_id: row.try_get("idc_collection_id")?,
            row: RowMeta::from_columns(row)?,
            node: NodeState::from_columns(row)?,
        })
    }
}

impl Entity for Collection {
    const LEVEL: Level = Level::Collection;
    type ParentKey = u32;
    const PARENTS: Association = VERSION_COLLECTION;
    const KEY_COLUMN: &'static str = "collection_id";
    const LINEAGE: &'static str = "lower(collection_id)";
    const OWN_COLUMNS: &'static [&'static str] = &["collection_id", "idc_collection_id"];

    fn create(natural_key: &str, row: RowMeta) -> Self {
        Self {
            collection_id: CollectionId::from(natural_key),
            idc_collection_id: idc_collection_id(natural_key),
            row,
            node: Default::default(),
        }
    }

    fn natural_key(&self) -> &str {
        self.collection_id.as_str()
    }

    fn key_matches(&self, key: &str) -> bool {
        self.collection_id.as_str().eq_ignore_ascii_case(key)
    }

    fn normalized_key(key: &str) -> String {
        key.to_ascii_lowercase()
    }

    fn key_condition() -> String {
        "lower(collection_id) = lower(?)".to_string()
    }

    fn lineage_key(&self) -> String {
        Self::normalized_key(self.collection_id.as_str())
    }

    fn inherit_lineage(&mut self, predecessor: &Self) {
        self.idc_collection_id = predecessor.idc_collection_id.clone();
    }

    fn row(&self) -> &RowMeta {
        &self.row
    }

    fn row_mut(&mut self) -> &mut RowMeta {
        &mut self.row
    }

    fn contribution(&self) -> Contribution<'_> {
        Contribution::of_node(&self.node)
    }

    fn bind_own<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.collection_id.as_str())
            .bind(self.idc_collection_id.as_str())
    }

    fn node_state(&self) -> Option<&NodeState> {
        Some(&self.node)
    }
}

impl Branch for Collection {
    type Child = Patient;

    fn node(&self) -> &NodeState {
        &self.node
    }

    fn node_mut(&mut self) -> &mut NodeState {
        &mut self.node
    }
}

impl FromRow<'_, SqliteRow> for Patient {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            submitter_case_id: SubmitterCaseId::from(row.try_get::<String, _>("submitter_case_id")?),
            idc_case_id: row.try_get("idc_case_id")?,
            row: RowMeta::from_columns(row)?,
            node: NodeState::from_columns(row)?,
        })
    }
}

impl Entity for Patient {
    const LEVEL: Level = Level::Patient;
    type ParentKey = Uuid;
    const PARENTS: Association = COLLECTION_PATIENT;
    const KEY_COLUMN: &'static str = "submitter_case_id";
    const LINEAGE: &'static str = "lower(hex(idc_case_id))";
    const OWN_COLUMNS: &'static [&'static str] = &["submitter_case_id", "idc_case_id"];

    fn create(natural_key: &str, row: RowMeta) -> Self {
        Self {
            submitter_case_id: SubmitterCaseId::from(natural_key),
            idc_case_id: Uuid::new_v4(),
            row,
            node: Default::default(),
        }
    }

    fn natural_key(&self) -> &str {
        self.submitter_case_id.as_str()
    }

    /// Submitter case IDs are only unique within a collection.
    fn lineage_key(&self) -> String {
        self.idc_case_id.simple().to_string()
    }

    fn inherit_lineage(&mut self, predecessor: &Self) {
        self.idc_case_id = predecessor.idc_case_id;
    }

    fn row(&self) -> &RowMeta {
        &self.row
    }

    fn row_mut(&mut self) -> &mut RowMeta {
        &mut self.row
    }

    fn contribution(&self) -> Contribution<'_> {
        Contribution::of_node(&self.node)
    }

    fn bind_own<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.submitter_case_id.as_str())
            .bind(self.idc_case_id)
    }

    fn node_state(&self) -> Option<&NodeState> {
        Some(&self.node)
    }
}

impl Branch for Patient {
    type Child = Study;

    fn node(&self) -> &NodeState {
        &self.node
    }

    fn node_mut(&mut self) -> &mut NodeState {
        &mut self.node
    }
}

impl FromRow<'_, SqliteRow> for Study {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            study_instance_uid: StudyInstanceUid::from(row.try_get::<String, _>("study_instance_uid")?),
            study_instances: row.try_get("study_instances")?,
            row: RowMeta::from_columns(row)?,
            node: NodeState::from_columns(row)?,
        })
    }
}

impl Entity for Study {
    const LEVEL: Level = Level::Study;
    type ParentKey = Uuid;
    const PARENTS: Association = PATIENT_STUDY;
    const KEY_COLUMN: &'static str = "study_instance_uid";
    const OWN_COLUMNS: &'static [&'static str] = &["study_instance_uid", "study_instances"];

    fn create(natural_key: &str, row: RowMeta) -> Self {
        Self {
            study_instance_uid: StudyInstanceUid::from(natural_key),
            study_instances: 0,
            row,
            node: Default::default(),
        }
    }

    fn natural_key(&self) -> &str {
        self.study_instance_uid.as_str()
    }

    fn row(&self) -> &RowMeta {
        &self.row
    }

    fn row_mut(&mut self) -> &mut RowMeta {
        &mut self.row
    }

    fn contribution(&self) -> Contribution<'_> {
        Contribution::of_node(&self.node)
    }

    fn bind_own<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.study_instance_uid.as_str())
            .bind(self.study_instances)
    }

    fn node_state(&self) -> Option<&NodeState> {
        Some(&self.node)
    }
}

impl Branch for Study {
    type Child = Series;

    fn node(&self) -> &NodeState {
        &self.node
    }

    fn node_mut(&mut self) -> &mut NodeState {
        &mut self.node
    }
}

impl FromRow<'_, SqliteRow> for Series {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            series_instance_uid: SeriesInstanceUid::from(row.try_get::<String, _>("series_instance_uid")?),
            series_instances: row.try_get("series_instances")?,
            source_doi: row.try_get("source_doi")?,
            source_url: row.try_get("source_url")?,
            row: RowMeta::from_columns(row)?,
            node: NodeState::from_columns(row)?,
        })
    }
}

impl Entity for Series {
    const LEVEL: Level = Level::Series;
    type ParentKey = Uuid;
    const PARENTS: Association = STUDY_SERIES;
    const KEY_COLUMN: &'static str = "series_instance_uid";
    const OWN_COLUMNS: &'static [&'static str] = &["series_instance_uid", "series_instances", "source_doi", "source_url"];

    fn create(natural_key: &str, row: RowMeta) -> Self {
        Self {
            series_instance_uid: SeriesInstanceUid::from(natural_key),
            series_instances: 0,
            source_doi: None,
            source_url: None,
            row,
            node: Default::default(),
        }
    }

    fn natural_key(&self) -> &str {
        self.series_instance_uid.as_str()
    }

    fn row(&self) -> &RowMeta {
        &self.row
    }

    fn row_mut(&mut self) -> &mut RowMeta {
        &mut self.row
    }

    fn contribution(&self) -> Contribution<'_> {
        Contribution::of_node(&self.node)
    }

    fn bind_own<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.series_instance_uid.as_str())
            .bind(self.series_instances)
            .bind(self.source_doi.as_deref())
            .bind(self.source_url.as_deref())
    }

    fn node_state(&self) -> Option<&NodeState> {
        Some(&self.node)
    }
}

impl Branch for Series {
    type Child = Instance;

    fn node(&self) -> &NodeState {
        &self.node
    }

    fn node_mut(&mut self) -> &mut NodeState {
        &mut self.node
    }
}

impl FromRow<'_, SqliteRow> for Instance {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let source: String = row.try_get("source")?;
        Ok(Self {
            sop_instance_uid: SopInstanceUid::from(row.try_get::<String, _>("sop_instance_uid")?),
            row: RowMeta::from_columns(row)?,
            hash: row.try_get("hash")?,
            size: row.try_get("size")?,
            source: source.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "source".to_string(),
                source: Box::new(e),
            })?,
            excluded: row.try_get("excluded")?,
            timestamp: row.try_get("timestamp")?,
            revised: row.try_get("revised")?,
        })
    }
}

impl Entity for Instance {
    const LEVEL: Level = Level::Instance;
    type ParentKey = Uuid;
    const PARENTS: Association = SERIES_INSTANCE;
    const KEY_COLUMN: &'static str = "sop_instance_uid";
    const OWN_COLUMNS: &'static [&'static str] = &[
        "sop_instance_uid",
        "hash",
        "size",
        "source",
        "excluded",
        "timestamp",
        "revised",
    ];
    const HAS_NODE: bool = false;

    fn create(natural_key: &str, row: RowMeta) -> Self {
        Self {
            sop_instance_uid: SopInstanceUid::from(natural_key),
            row,
            hash: String::new(),
            size: 0,
            source: Source::Tcia,
            excluded: false,
            timestamp: None,
            revised: false,
        }
    }

    fn natural_key(&self) -> &str {
        self.sop_instance_uid.as_str()
    }

    fn row(&self) -> &RowMeta {
        &self.row
    }

    fn row_mut(&mut self) -> &mut RowMeta {
        &mut self.row
    }

    fn contribution(&self) -> Contribution<'_> {
        let hash = self.hash.as_str();
        Contribution {
            all_sources: hash,
            tcia: (self.source == Source::Tcia).then_some(hash),
            path: (self.source == Source::Path).then_some(hash),
        }
    }

    fn bind_own<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.sop_instance_uid.as_str())
            .bind(self.hash.as_str())
            .bind(self.size)
            .bind(self.source.as_str())
            .bind(self.excluded)
            .bind(self.timestamp)
            .bind(self.revised)
    }
}
