use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Append-only record of the nodes whose hashes an interrupted rehash of one version
/// already committed, so that a re-run can skip them.
///
/// Each line is `<version> <uuid>`. Entries of other versions are ignored, so a log left
/// behind by an unrelated run never causes a node to be skipped. The log is removed by
/// [DonesLog::finish] once the run it belongs to succeeds.
///
/// Completion is recorded at-least-once: a node may be recomputed again if the process
/// dies between committing its hash and appending it here, which is harmless because
/// recomputation is idempotent.
pub struct DonesLog {
    path: Utf8PathBuf,
    version: u32,
    done: HashSet<Uuid>,
    file: fs_err::tokio::File,
}

impl DonesLog {
    /// Open (or create) the log at `path` and read the nodes of `version` already listed.
    ///
    /// Malformed lines, e.g. a line truncated by a crash, are ignored.
    pub async fn open(path: impl AsRef<Utf8Path>, version: u32) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = match fs_err::tokio::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let mut done = HashSet::new();
        let mut foreign = 0;
        for line in content.lines() {
            match parse_line(line) {
                Some((v, uuid)) if v == version => {
                    done.insert(uuid);
                }
                Some(_) => foreign += 1,
                None => tracing::warn!(path = path.as_str(), line, "Skipping malformed line of dones log"),
            }
        }
        if foreign > 0 {
            tracing::warn!(
                path = path.as_str(),
                version,
                entries = foreign,
                "Ignoring entries of other versions in dones log"
            );
        }
        let mut file = fs_err::tokio::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if !content.is_empty() && !content.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        Ok(Self {
            path,
            version,
            done,
            file,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.done.contains(uuid)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Record nodes as done and flush the log.
    pub async fn record<'a>(&mut self, uuids: impl IntoIterator<Item = &'a Uuid>) -> std::io::Result<()> {
        let mut lines = String::new();
        for uuid in uuids {
            if self.done.insert(*uuid) {
                lines.push_str(&format!("{} {uuid}\n", self.version));
            }
        }
        if lines.is_empty() {
            return Ok(());
        }
        self.file.write_all(lines.as_bytes()).await?;
        self.file.flush().await
    }

    /// The run this log belongs to is complete: delete the log.
    pub async fn finish(self) -> std::io::Result<()> {
        let Self { path, file, .. } = self;
        drop(file);
        fs_err::tokio::remove_file(&path).await
    }
}

fn parse_line(line: &str) -> Option<(u32, Uuid)> {
    let (version, uuid) = line.trim().split_once(' ')?;
    Some((version.parse().ok()?, Uuid::parse_str(uuid).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_reopen_remembers_done_nodes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(temp_dir.path()).unwrap().join("dones.txt");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut log = DonesLog::open(&path, 3).await.unwrap();
        assert!(log.is_empty());
        log.record([&a, &b, &a]).await.unwrap();
        drop(log);

        let mut content = fs_err::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("3 "));
        content.push_str("3 0f3c");
        fs_err::write(&path, content).unwrap();

        let mut log = DonesLog::open(&path, 3).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.contains(&a));
        assert!(log.contains(&b));
        assert!(!log.contains(&Uuid::new_v4()));

        let c = Uuid::new_v4();
        log.record([&c]).await.unwrap();
        drop(log);
        assert_eq!(DonesLog::open(&path, 3).await.unwrap().len(), 3);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_entries_of_other_versions_are_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(temp_dir.path()).unwrap().join("dones.txt");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fs_err::write(&path, format!("1 {a}\n2 {b}\n{a}\n")).unwrap();

        let log = DonesLog::open(&path, 2).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.contains(&b));
        assert!(!log.contains(&a));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_finish_removes_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(temp_dir.path()).unwrap().join("dones.txt");
        let mut log = DonesLog::open(&path, 1).await.unwrap();
        log.record([&Uuid::new_v4()]).await.unwrap();
        log.finish().await.unwrap();
        assert!(!path.exists());
        assert!(DonesLog::open(&path, 1).await.unwrap().is_empty());
    }
}
