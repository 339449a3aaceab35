//! Finalizing downloaded reports
//!
//! The browser saves reports under whatever name the remote system picks. After
//! each download the newest file in the download directory is renamed to a
//! deterministic `<MONTHCODE><YEAR>.<ext>` name, replacing any earlier copy.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, instrument};

use crate::errors::FetchError;
use crate::log_sink::LogSink;
use crate::wait::Deadline;

/// OS metadata file that is never a download.
pub const METADATA_FILE: &str = "desktop.ini";

/// Extensions browsers use for downloads still in progress.
const PARTIAL_EXTENSIONS: [&str; 3] = ["crdownload", "part", "tmp"];

/// A file observed in the download directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    pub modified_at: SystemTime,
    /// Extension including the leading dot, empty when the file has none.
    pub extension: String,
}

impl DownloadArtifact {
    fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_default()
    }

    pub fn is_partial(&self) -> bool {
        let ext = self.extension.trim_start_matches('.');
        PARTIAL_EXTENSIONS
            .iter()
            .any(|partial| ext.eq_ignore_ascii_case(partial))
    }
}

/// Lists the regular files of `dir` except the metadata file.
pub fn list_artifacts(dir: &Path) -> Result<Vec<DownloadArtifact>, FetchError> {
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == OsStr::new(METADATA_FILE) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let path = entry.path();
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        artifacts.push(DownloadArtifact {
            modified_at: metadata.modified()?,
            path,
            extension,
        });
    }
    Ok(artifacts)
}

/// Newest artifact by modification time; equal times go to the greatest file name.
pub fn newest_artifact(artifacts: &[DownloadArtifact]) -> Option<&DownloadArtifact> {
    artifacts
        .iter()
        .max_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
}

/// Renames newest artifacts in one download directory.
#[derive(Debug, Clone)]
pub struct DownloadFinalizer {
    sink: LogSink,
}

impl DownloadFinalizer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }

    /// Renames the newest artifact in `download_dir` to `label` plus its extension.
    ///
    /// An existing file with the target name is deleted first, without backup.
    #[instrument(skip(self, download_dir), fields(dir = %download_dir.display()))]
    pub fn finalize(&self, download_dir: &Path, label: &str) -> Result<PathBuf, FetchError> {
        let artifacts = list_artifacts(download_dir)?;
        let Some(newest) = newest_artifact(&artifacts) else {
            self.sink.log("No file found in the download folder.");
            return Err(FetchError::NoArtifact(download_dir.to_path_buf()));
        };

        let target = download_dir.join(format!("{label}{}", newest.extension));
        if newest.path == target {
            debug!("Newest artifact already carries the target name");
            return Ok(target);
        }
        if target.exists() {
            debug!(target = %target.display(), "Replacing previous artifact");
            std::fs::remove_file(&target)?;
        }
        std::fs::rename(&newest.path, &target)?;

        info!(from = %newest.path.display(), to = %target.display(), "Artifact finalized");
        self.sink.log(format!(
            "Success! File renamed to: {}",
            target.file_name().unwrap_or_default().to_string_lossy()
        ));
        Ok(target)
    }
}

/// The state of a download directory right before a download is triggered.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    seen: HashMap<PathBuf, SystemTime>,
}

impl DirectorySnapshot {
    pub fn capture(dir: &Path) -> Result<Self, FetchError> {
        let seen = list_artifacts(dir)?
            .into_iter()
            .map(|artifact| (artifact.path, artifact.modified_at))
            .collect();
        Ok(Self { seen })
    }

    /// A file that is new or rewritten since the snapshot, provided no download
    /// started since then is still in progress.
    ///
    /// Partial files that were already there at capture time are leftovers and do
    /// not hold the wait back.
    pub fn completed_artifact(&self, dir: &Path) -> Result<Option<DownloadArtifact>, FetchError> {
        let changed: Vec<DownloadArtifact> = list_artifacts(dir)?
            .into_iter()
            .filter(|artifact| self.seen.get(&artifact.path) != Some(&artifact.modified_at))
            .collect();
        if changed.iter().any(DownloadArtifact::is_partial) {
            return Ok(None);
        }
        Ok(newest_artifact(&changed).cloned())
    }
}

/// Waits until a download started after `snapshot` has been fully written.
///
/// Fails with [`FetchError::NoArtifact`] when nothing arrives within `timeout`.
#[instrument(level = "debug", skip(snapshot, timeout, poll), fields(dir = %dir.display()))]
pub async fn wait_for_download(
    snapshot: &DirectorySnapshot,
    dir: &Path,
    timeout: Duration,
    poll: Duration,
) -> Result<DownloadArtifact, FetchError> {
    let deadline = Deadline::after(timeout);
    loop {
        if let Some(artifact) = snapshot.completed_artifact(dir)? {
            debug!(
                path = %artifact.path.display(),
                elapsed = ?deadline.elapsed(),
                "Download complete"
            );
            return Ok(artifact);
        }
        if deadline.expired() {
            debug!(?timeout, "No completed download");
            return Err(FetchError::NoArtifact(dir.to_path_buf()));
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::UNIX_EPOCH;

    fn write_at(dir: &Path, name: &str, secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs))
            .unwrap();
        path
    }

    fn finalizer() -> DownloadFinalizer {
        DownloadFinalizer::new(LogSink::new(|_| {}))
    }

    #[test]
    fn renames_newest_and_ignores_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "a.xlsx", 1);
        write_at(dir.path(), "b.xlsx", 2);
        write_at(dir.path(), METADATA_FILE, 3);

        let target = finalizer().finalize(dir.path(), "MAR2024").unwrap();

        assert_eq!(target, dir.path().join("MAR2024.xlsx"));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "b.xlsx");
        assert!(dir.path().join("a.xlsx").exists());
        assert!(!dir.path().join("b.xlsx").exists());
        assert!(dir.path().join(METADATA_FILE).exists());
    }

    #[test]
    fn overwrites_previous_artifact_with_same_label() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "a.xlsx", 1);
        write_at(dir.path(), "b.xlsx", 2);
        finalizer().finalize(dir.path(), "MAR2024").unwrap();

        write_at(dir.path(), "c.xlsx", 5);
        let target = finalizer().finalize(dir.path(), "MAR2024").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "c.xlsx");
        assert!(!dir.path().join("c.xlsx").exists());
    }

    #[test]
    fn only_metadata_is_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), METADATA_FILE, 1);

        match finalizer().finalize(dir.path(), "MAR2024") {
            Err(FetchError::NoArtifact(path)) => assert_eq!(path, dir.path()),
            other => panic!("Expected NoArtifact, but got {other:?}"),
        }
    }

    #[test]
    fn equal_timestamps_pick_greatest_name() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "report_a.csv", 7);
        write_at(dir.path(), "report_b.csv", 7);

        let target = finalizer().finalize(dir.path(), "JAN2024").unwrap();

        assert_eq!(target, dir.path().join("JAN2024.csv"));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "report_b.csv");
    }

    #[test]
    fn file_without_extension_keeps_bare_label() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "export", 1);

        let target = finalizer().finalize(dir.path(), "OUT2023").unwrap();
        assert_eq!(target, dir.path().join("OUT2023"));
    }

    #[test]
    fn newest_already_named_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "old.xlsx", 1);
        write_at(dir.path(), "FEV2024.xlsx", 4);

        let target = finalizer().finalize(dir.path(), "FEV2024").unwrap();
        assert_eq!(std::fs::read_to_string(target).unwrap(), "FEV2024.xlsx");
        assert!(dir.path().join("old.xlsx").exists());
    }

    #[test]
    fn snapshot_ignores_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "JAN2024.xlsx", 1);
        let snapshot = DirectorySnapshot::capture(dir.path()).unwrap();
        assert!(snapshot.completed_artifact(dir.path()).unwrap().is_none());

        write_at(dir.path(), "report.xlsx.crdownload", 2);
        assert!(snapshot.completed_artifact(dir.path()).unwrap().is_none());

        std::fs::rename(
            dir.path().join("report.xlsx.crdownload"),
            dir.path().join("report.xlsx"),
        )
        .unwrap();
        let done = snapshot.completed_artifact(dir.path()).unwrap().unwrap();
        assert_eq!(done.path, dir.path().join("report.xlsx"));
        assert_eq!(done.extension, ".xlsx");
    }

    #[tokio::test]
    async fn download_wait_gives_up_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = DirectorySnapshot::capture(dir.path()).unwrap();

        let result = wait_for_download(
            &snapshot,
            dir.path(),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;

        match result {
            Err(FetchError::NoArtifact(path)) => assert_eq!(path, dir.path()),
            other => panic!("Expected NoArtifact, but got {other:?}"),
        }
    }

    #[test]
    fn leftover_partial_does_not_block_new_download() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "Unconfirmed 1234.crdownload", 1);
        let snapshot = DirectorySnapshot::capture(dir.path()).unwrap();
        assert!(snapshot.completed_artifact(dir.path()).unwrap().is_none());

        write_at(dir.path(), "relatorio.xlsx", 2);

        let done = snapshot.completed_artifact(dir.path()).unwrap().unwrap();
        assert_eq!(done.path, dir.path().join("relatorio.xlsx"));
    }

    #[tokio::test]
    async fn download_wait_ignores_leftover_partial() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "Unconfirmed 1234.crdownload", 1);
        let snapshot = DirectorySnapshot::capture(dir.path()).unwrap();
        write_at(dir.path(), "relatorio.xlsx", 2);

        let artifact = wait_for_download(
            &snapshot,
            dir.path(),
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(artifact.path, dir.path().join("relatorio.xlsx"));
    }
}
