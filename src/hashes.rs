use crate::types::Source;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// The `hashes` composite: one hash per tracked source, plus the hash over all sources.
///
/// An empty string means "unbuilt" for `all_sources`, and "no data from this source"
/// for `tcia` and `path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashTriple {
    pub tcia: String,
    pub path: String,
    pub all_sources: String,
}

impl HashTriple {
    pub fn new(tcia: impl Into<String>, path: impl Into<String>, all_sources: impl Into<String>) -> Self {
        Self {
            tcia: tcia.into(),
            path: path.into(),
            all_sources: all_sources.into(),
        }
    }

    /// Copy of `self` with `all_sources` replaced.
    pub fn with_all_sources(&self, hash: impl Into<String>) -> Self {
        Self {
            all_sources: hash.into(),
            ..self.clone()
        }
    }

    /// Copy of `self` with the hash of `source` replaced.
    pub fn with_source(&self, source: Source, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        match source {
            Source::Tcia => Self {
                tcia: hash,
                ..self.clone()
            },
            Source::Path => Self {
                path: hash,
                ..self.clone()
            },
            Source::AllSources => self.with_all_sources(hash),
        }
    }

    pub fn get(&self, source: Source) -> &str {
        match source {
            Source::Tcia => &self.tcia,
            Source::Path => &self.path,
            Source::AllSources => &self.all_sources,
        }
    }

    /// Read the `hashes_tcia`, `hashes_path` and `hashes_all_sources` columns.
    pub(crate) fn from_columns(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            tcia: row.try_get("hashes_tcia")?,
            path: row.try_get("hashes_path")?,
            all_sources: row.try_get("hashes_all_sources")?,
        })
    }

    /// Whether this node has never been hashed (or was reset by egestion).
    pub fn is_unbuilt(&self) -> bool {
        self.all_sources.is_empty()
    }
}

/// The `sources` and `revised` composites: one flag per tracked source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFlags {
    pub tcia: bool,
    pub path: bool,
}

impl SourceFlags {
    pub fn new(tcia: bool, path: bool) -> Self {
        Self { tcia, path }
    }

    /// Flag of `source`. [Source::AllSources] is set if any tracked source is.
    pub fn get(self, source: Source) -> bool {
        match source {
            Source::Tcia => self.tcia,
            Source::Path => self.path,
            Source::AllSources => self.any(),
        }
    }

    /// Copy of `self` with the flag of `source` replaced.
    pub fn with(self, source: Source, value: bool) -> Self {
        match source {
            Source::Tcia => Self { tcia: value, ..self },
            Source::Path => Self { path: value, ..self },
            Source::AllSources => Self {
                tcia: value,
                path: value,
            },
        }
    }

    /// Read the `{prefix}_tcia` and `{prefix}_path` columns.
    pub(crate) fn from_columns(row: &SqliteRow, prefix: &str) -> sqlx::Result<Self> {
        Ok(Self {
            tcia: row.try_get(format!("{prefix}_tcia").as_str())?,
            path: row.try_get(format!("{prefix}_path").as_str())?,
        })
    }

    pub fn any(self) -> bool {
        self.tcia || self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    fn test_with_all_sources_leaves_original_untouched() {
        let original = HashTriple::new("t", "p", "a");
        let updated = original.with_all_sources("b");
        assert_eq!(original.all_sources, "a");
        assert_eq!(updated, HashTriple::new("t", "p", "b"));
    }

    #[rstest]
    #[case(Source::Tcia, HashTriple::new("x", "p", "a"))]
    #[case(Source::Path, HashTriple::new("t", "x", "a"))]
    #[case(Source::AllSources, HashTriple::new("t", "p", "x"))]
    fn test_with_source(#[case] source: Source, #[case] expected: HashTriple) {
        let actual = HashTriple::new("t", "p", "a").with_source(source, "x");
        assert_eq!(actual.get(source), "x");
        assert_eq!(actual, expected)
    }

    #[rstest]
    fn test_source_flags() {
        let flags = SourceFlags::default().with(Source::Path, true);
        assert!(!flags.get(Source::Tcia));
        assert!(flags.get(Source::Path));
        assert!(flags.get(Source::AllSources));
        assert!(!SourceFlags::default().any());
    }
}
