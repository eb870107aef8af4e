use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Collection ID as published by the source, e.g. `TCGA-BRCA`.
///
/// Not unique across versions, and compared case-insensitively.
#[braid(serde)]
pub struct CollectionId;

/// Patient ID as submitted to the source (DICOM `PatientID`).
#[braid(serde)]
pub struct SubmitterCaseId;

/// DICOM `StudyInstanceUID`.
#[braid(serde)]
pub struct StudyInstanceUid;

/// DICOM `SeriesInstanceUID`.
#[braid(serde)]
pub struct SeriesInstanceUid;

/// DICOM `SOPInstanceUID`.
#[braid(serde)]
pub struct SopInstanceUid;

/// The upstream originator of a piece of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Radiology hosted by TCIA.
    Tcia,
    /// IDC-converted pathology and other data.
    #[serde(alias = "idc")]
    Path,
    /// Data not attributed to a single source. Only contributes to `hashes.all_sources`.
    AllSources,
}

impl Source {
    /// The sources which have their own hash and flag in a [crate::HashTriple].
    pub const TRACKED: [Source; 2] = [Source::Tcia, Source::Path];

    /// Value of the `source` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Tcia => "tcia",
            Source::Path => "path",
            Source::AllSources => "all_sources",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown source {0:?}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcia" => Ok(Source::Tcia),
            "path" | "idc" => Ok(Source::Path),
            "all_sources" => Ok(Source::AllSources),
            _ => Err(UnknownSource(s.to_string())),
        }
    }
}

/// A level of the catalog hierarchy, from root to leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Version,
    Collection,
    Patient,
    Study,
    Series,
    Instance,
}

impl Level {
    /// Levels whose hashes are computed from their children, leaf-most first.
    pub const BOTTOM_UP: [Level; 4] = [Level::Series, Level::Study, Level::Patient, Level::Collection];

    /// The level above, or [None] for [Level::Version].
    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Version => None,
            Level::Collection => Some(Level::Version),
            Level::Patient => Some(Level::Collection),
            Level::Study => Some(Level::Patient),
            Level::Series => Some(Level::Study),
            Level::Instance => Some(Level::Series),
        }
    }

    /// Name of the table holding rows of this level.
    pub fn table_name(self) -> &'static str {
        match self {
            Level::Version => "version",
            Level::Collection => "collection",
            Level::Patient => "patient",
            Level::Study => "study",
            Level::Series => "series",
            Level::Instance => "instance",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
