//! The source content of one version, as handed to [crate::ingest_version].
//!
//! A manifest lists every collection of the version, down to instance level. Unchanged
//! content must be listed too: whatever a collection, patient, study or series of the
//! previous version does not list is retired.

use crate::hashes::{HashTriple, SourceFlags};
use crate::model::Contribution;
use crate::rehash::summarize;
use crate::types::*;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub collections: Vec<CollectionManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub collection_id: CollectionId,
    #[serde(default)]
    pub patients: Vec<PatientManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientManifest {
    pub submitter_case_id: SubmitterCaseId,
    #[serde(default)]
    pub studies: Vec<StudyManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyManifest {
    pub study_instance_uid: StudyInstanceUid,
    #[serde(default)]
    pub series: Vec<SeriesManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesManifest {
    pub series_instance_uid: SeriesInstanceUid,
    #[serde(default)]
    pub source_doi: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceManifest {
    pub sop_instance_uid: SopInstanceUid,
    /// Content hash of the file.
    pub hash: String,
    pub size: i64,
    pub source: Source,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl Manifest {
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, crate::PersistError> {
        let data = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }
}

pub(crate) type TimeSpan = (Option<OffsetDateTime>, Option<OffsetDateTime>);

/// A node of a manifest, one level below its parent.
pub(crate) trait ManifestNode {
    fn natural_key(&self) -> &str;

    /// The hashes and sources which the entity built from this node will have.
    fn digest(&self) -> (HashTriple, SourceFlags);

    /// Earliest and latest instance timestamp below this node.
    fn timestamps(&self) -> TimeSpan;
}

fn digest_of<'a, M: ManifestNode + 'a>(children: &'a [M]) -> (HashTriple, SourceFlags) {
    let digests: Vec<_> = children.iter().map(ManifestNode::digest).collect();
    summarize(
        digests
            .iter()
            .map(|(hashes, sources)| Contribution::of_hashes(hashes, *sources)),
    )
}

fn timestamps_of<M: ManifestNode>(children: &[M]) -> TimeSpan {
    children
        .iter()
        .map(ManifestNode::timestamps)
        .fold((None, None), |(min, max), (child_min, child_max)| {
            (
                min.into_iter().chain(child_min).min(),
                max.into_iter().chain(child_max).max(),
            )
        })
}

impl ManifestNode for CollectionManifest {
    fn natural_key(&self) -> &str {
        self.collection_id.as_str()
    }

    fn digest(&self) -> (HashTriple, SourceFlags) {
        digest_of(&self.patients)
    }

    fn timestamps(&self) -> TimeSpan {
        timestamps_of(&self.patients)
    }
}

impl ManifestNode for PatientManifest {
    fn natural_key(&self) -> &str {
        self.submitter_case_id.as_str()
    }

    fn digest(&self) -> (HashTriple, SourceFlags) {
        digest_of(&self.studies)
    }

    fn timestamps(&self) -> TimeSpan {
        timestamps_of(&self.studies)
    }
}

impl ManifestNode for StudyManifest {
    fn natural_key(&self) -> &str {
        self.study_instance_uid.as_str()
    }

    fn digest(&self) -> (HashTriple, SourceFlags) {
        digest_of(&self.series)
    }

    fn timestamps(&self) -> TimeSpan {
        timestamps_of(&self.series)
    }
}

impl ManifestNode for SeriesManifest {
    fn natural_key(&self) -> &str {
        self.series_instance_uid.as_str()
    }

    fn digest(&self) -> (HashTriple, SourceFlags) {
        digest_of(&self.instances)
    }

    fn timestamps(&self) -> TimeSpan {
        timestamps_of(&self.instances)
    }
}

/// An instance is digested as if it were a node whose only hash is its content hash.
impl ManifestNode for InstanceManifest {
    fn natural_key(&self) -> &str {
        self.sop_instance_uid.as_str()
    }

    fn digest(&self) -> (HashTriple, SourceFlags) {
        let sources = SourceFlags::new(self.source == Source::Tcia, self.source == Source::Path);
        let per_source = |flag: bool| if flag { self.hash.clone() } else { String::new() };
        let hashes = HashTriple::new(per_source(sources.tcia), per_source(sources.path), self.hash.clone());
        (hashes, sources)
    }

    fn timestamps(&self) -> TimeSpan {
        (self.timestamp, self.timestamp)
    }
}

impl StudyManifest {
    pub(crate) fn instance_count(&self) -> i64 {
        self.series.iter().map(|s| s.instances.len() as i64).sum()
    }
}
