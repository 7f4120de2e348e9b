use std::path::{Path, PathBuf};

use crate::types::DownloadError;

/// Persisted metadata for one download: enough to reconstruct its segment
/// layout on resume. Segment byte progress is deliberately absent — it is
/// recovered by stat'ing each scratch file (see [`scratch_len`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub url: String,
    pub output_dir: PathBuf,
    pub file_name: String,
    pub segment_count: u32,
    pub total_size: u64,
}

/// Owns the per-process scratch directory (`<tempRoot>/parafetch/`) holding
/// every in-flight download's state file and segment scratch files.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Uses the platform temp directory by default; acquired at first use,
    /// shared by every download partitioned within it by id.
    pub fn new() -> std::io::Result<Self> {
        Self::at(std::env::temp_dir().join("parafetch"))
    }

    pub fn at(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.state"))
    }

    pub fn part_path(&self, id: &str, ordinal: u32) -> PathBuf {
        self.root.join(format!("{id}.part{ordinal}"))
    }

    /// Writes the flat five-line metadata format: url, output dir, file
    /// name, segment count, total size.
    pub async fn save(&self, id: &str, record: &StateRecord) -> Result<(), DownloadError> {
        let contents = format!(
            "{}\n{}\n{}\n{}\n{}\n",
            record.url,
            record.output_dir.display(),
            record.file_name,
            record.segment_count,
            record.total_size,
        );
        tokio::fs::write(self.state_path(id), contents)
            .await
            .map_err(DownloadError::Disk)?;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<StateRecord, DownloadError> {
        let contents = tokio::fs::read_to_string(self.state_path(id))
            .await
            .map_err(|_| DownloadError::StateMissing)?;
        let mut lines = contents.lines();

        let url = lines.next().ok_or(DownloadError::StateMissing)?.to_string();
        let output_dir = lines.next().ok_or(DownloadError::StateMissing)?.to_string();
        let file_name = lines.next().ok_or(DownloadError::StateMissing)?.to_string();
        let segment_count: u32 = lines
            .next()
            .ok_or(DownloadError::StateMissing)?
            .parse()
            .map_err(|_| DownloadError::StateMissing)?;
        let total_size: u64 = lines
            .next()
            .ok_or(DownloadError::StateMissing)?
            .parse()
            .map_err(|_| DownloadError::StateMissing)?;

        Ok(StateRecord {
            url,
            output_dir: PathBuf::from(output_dir),
            file_name,
            segment_count,
            total_size,
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), DownloadError> {
        match tokio::fs::remove_file(self.state_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::Disk(e)),
        }
    }

    /// Returns the on-disk length of a segment's scratch file, or 0 if it
    /// doesn't exist yet — the source of truth for `downloaded` on resume.
    pub async fn scratch_len(&self, id: &str, ordinal: u32) -> u64 {
        tokio::fs::metadata(self.part_path(id, ordinal))
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Concatenates segments `1..=segment_count` in order into
    /// `{output_dir}/{id}.downloaded`, returning that path. Callers rename
    /// to the final file name; on any I/O failure the partial file is
    /// removed and the error propagated.
    pub async fn merge(
        &self,
        id: &str,
        output_dir: &Path,
        segment_count: u32,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|_| DownloadError::MergeError)?;
        let final_path = output_dir.join(format!("{id}.downloaded"));

        let result = self.merge_into(id, &final_path, segment_count).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&final_path).await;
        }
        result.map(|()| final_path)
    }

    async fn merge_into(
        &self,
        id: &str,
        final_path: &Path,
        segment_count: u32,
    ) -> Result<(), DownloadError> {
        use tokio::io::AsyncWriteExt;

        let mut out = tokio::fs::File::create(final_path)
            .await
            .map_err(|_| DownloadError::MergeError)?;

        for ordinal in 1..=segment_count {
            let bytes = tokio::fs::read(self.part_path(id, ordinal))
                .await
                .map_err(|_| DownloadError::MergeError)?;
            out.write_all(&bytes)
                .await
                .map_err(|_| DownloadError::MergeError)?;
        }
        out.flush().await.map_err(|_| DownloadError::MergeError)?;

        self.cleanup(id, segment_count).await;
        Ok(())
    }

    /// Deletes every segment scratch file and the metadata file. Best
    /// effort: a missing file is not an error.
    pub async fn cleanup(&self, id: &str, segment_count: u32) {
        for ordinal in 1..=segment_count {
            let _ = tokio::fs::remove_file(self.part_path(id, ordinal)).await;
        }
        let _ = self.delete(id).await;
    }

    /// Cancels a download that is `Suspended` (paused, no live worker
    /// attached) directly from its id: loads the persisted segment count
    /// just long enough to clean up every scratch file and the metadata
    /// file, without reopening anything or touching the network.
    pub async fn cancel_suspended(&self, id: &str) -> Result<(), DownloadError> {
        let record = self.load(id).await?;
        self.cleanup(id, record.segment_count).await;
        Ok(())
    }
}
