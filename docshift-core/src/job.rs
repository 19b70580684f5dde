//! Conversion jobs and the cleanup sweeper.
//!
//! A [`ConversionJob`] is the unit of work for one request. It owns a
//! scratch directory and a cleanup list; every path it hands out is pushed
//! onto that list *before* the caller gets a chance to write to it, so no
//! failure between "path chosen" and "file complete" can leak a file.
//!
//! Jobs move through `Created -> Validating -> Converting -> Packaging ->
//! Responding -> Cleaned`. Any state may jump straight to `Cleaned`.
//! [`ConversionJob::cleanup`] is idempotent and also runs on drop, so a
//! job that is abandoned mid-flight (handler error, client disconnect
//! during download) is still swept.

use crate::convert::Operation;
use crate::error::{ConvertError, Result};
use crate::options::FormFields;
use crate::upload::{stored_input_name, UploadedFile};
use crate::workspace::{destroy_scratch_dir, remove_file_quietly, ScratchDir};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CREATE_ATTEMPTS: usize = 8;

/// Opaque job token: millisecond timestamp plus 48 random bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let entropy: [u8; 6] = rand::random();
        JobId(format!("{millis}-{}", hex::encode(entropy)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Validating,
    Converting,
    Packaging,
    Responding,
    Cleaned,
}

impl JobState {
    fn successor(self) -> Option<JobState> {
        match self {
            JobState::Created => Some(JobState::Validating),
            JobState::Validating => Some(JobState::Converting),
            JobState::Converting => Some(JobState::Packaging),
            JobState::Packaging => Some(JobState::Responding),
            JobState::Responding => Some(JobState::Cleaned),
            JobState::Cleaned => None,
        }
    }
}

/// One file produced by a converter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub path: PathBuf,
    pub download_name: String,
    pub mime_type: String,
}

#[derive(Debug)]
pub struct ConversionJob {
    id: JobId,
    operation: Operation,
    state: JobState,
    scratch: ScratchDir,
    inputs: Vec<UploadedFile>,
    options: FormFields,
    outputs: Vec<OutputFile>,
    cleanup_list: Vec<PathBuf>,
    staged_inputs: usize,
}

impl ConversionJob {
    /// Creates the job and its scratch directory under `scratch_root`.
    pub async fn create(scratch_root: &Path, operation: Operation) -> Result<Self> {
        for _ in 0..CREATE_ATTEMPTS {
            let id = JobId::generate();
            let name = format!("{}-{}", operation.name(), id);
            if let Some(scratch) = ScratchDir::create(scratch_root, &name).await? {
                debug!(job = %id, operation = %operation, "job created");
                return Ok(Self {
                    id,
                    operation,
                    state: JobState::Created,
                    scratch,
                    inputs: Vec::new(),
                    options: FormFields::new(),
                    outputs: Vec::new(),
                    cleanup_list: Vec::new(),
                    staged_inputs: 0,
                });
            }
        }
        Err(ConvertError::Internal(format!(
            "could not allocate a unique scratch directory after {CREATE_ATTEMPTS} attempts"
        )))
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn inputs(&self) -> &[UploadedFile] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputFile] {
        &self.outputs
    }

    pub fn options(&self) -> &FormFields {
        &self.options
    }

    pub fn set_options(&mut self, options: FormFields) {
        self.options = options;
    }

    /// Moves to `next`, which must be the following state or `Cleaned`.
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if next == JobState::Cleaned {
            self.cleanup();
            return Ok(());
        }
        if self.state.successor() != Some(next) {
            return Err(ConvertError::Internal(format!(
                "job {} cannot move from {:?} to {next:?}",
                self.id, self.state
            )));
        }
        debug!(job = %self.id, from = ?self.state, to = ?next, "job state change");
        self.state = next;
        Ok(())
    }

    /// Reserves a path for the next uploaded part and records it for cleanup.
    pub fn stage_input(&mut self, original_name: &str) -> PathBuf {
        let path = self.scratch.file(&stored_input_name(self.staged_inputs, original_name));
        self.staged_inputs += 1;
        self.track(path.clone());
        path
    }

    /// Registers a fully written upload.
    pub fn add_input(&mut self, file: UploadedFile) {
        self.track(file.stored_path.clone());
        self.inputs.push(file);
    }

    /// Reserves `file_name` inside the scratch directory for converter output.
    pub fn reserve_output(&mut self, file_name: &str) -> PathBuf {
        let path = self.scratch.file(file_name);
        self.track(path.clone());
        path
    }

    pub fn add_output(&mut self, output: OutputFile) {
        self.track(output.path.clone());
        self.outputs.push(output);
    }

    /// Records a path created as a side effect (e.g. by a subprocess).
    pub fn track(&mut self, path: PathBuf) {
        if !self.cleanup_list.contains(&path) {
            self.cleanup_list.push(path);
        }
    }

    /// Paths this job will delete on cleanup, in creation order.
    pub fn tracked_paths(&self) -> &[PathBuf] {
        &self.cleanup_list
    }

    pub fn is_cleaned(&self) -> bool {
        self.state == JobState::Cleaned
    }

    /// Deletes every tracked file, then the scratch directory.
    ///
    /// Best-effort: failures are logged, never returned. Calling it again
    /// after it has run does nothing. Returns how many tracked files were
    /// actually removed by this call.
    ///
    /// This blocks on the filesystem; async callers use [`Self::finish`].
    pub fn cleanup(&mut self) -> usize {
        if self.state == JobState::Cleaned {
            return 0;
        }
        let removed = sweep(&self.id, &self.cleanup_list, self.scratch.path());
        self.mark_cleaned(removed);
        removed
    }

    /// [`Self::cleanup`] on the blocking thread pool.
    pub async fn finish(&mut self) -> usize {
        if self.state == JobState::Cleaned {
            return 0;
        }
        let id = self.id.clone();
        let paths = self.cleanup_list.clone();
        let dir = self.scratch.path().to_path_buf();
        match tokio::task::spawn_blocking(move || sweep(&id, &paths, &dir)).await {
            Ok(removed) => {
                self.mark_cleaned(removed);
                removed
            }
            Err(err) => {
                warn!(job = %self.id, error = %err, "background cleanup failed, sweeping inline");
                self.cleanup()
            }
        }
    }

    fn mark_cleaned(&mut self, removed: usize) {
        debug!(job = %self.id, removed, from = ?self.state, "job cleaned");
        self.state = JobState::Cleaned;
    }
}

fn sweep(id: &JobId, paths: &[PathBuf], dir: &Path) -> usize {
    let removed = paths.iter().filter(|path| remove_file_quietly(path)).count();
    if let Err(err) = destroy_scratch_dir(dir) {
        warn!(
            job = %id,
            error = %err,
            path = %dir.display(),
            "failed to remove scratch directory"
        );
    }
    removed
}

impl Drop for ConversionJob {
    fn drop(&mut self) {
        if !self.is_cleaned() {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(root: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<_> = std::fs::read_dir(root)
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        entries.sort();
        entries
    }

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);

        let (millis, entropy) = a.as_str().split_once('-').unwrap();
        let millis: i64 = millis.parse().unwrap();
        assert!((chrono::Utc::now().timestamp_millis() - millis).abs() < 60_000);
        assert_eq!(entropy.len(), 12);
    }

    #[tokio::test]
    async fn cleanup_removes_everything_and_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let before = snapshot(root.path());

        let mut job = ConversionJob::create(root.path(), Operation::Merge).await.unwrap();
        let input = job.stage_input("a.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let output = job.reserve_output("merged.pdf");
        std::fs::write(&output, b"%PDF-1.4").unwrap();
        let stray = job.scratch_dir().join("converter.log");
        std::fs::write(&stray, b"log").unwrap();

        assert_eq!(job.cleanup(), 2);
        assert!(job.is_cleaned());
        assert_eq!(snapshot(root.path()), before);

        assert_eq!(job.cleanup(), 0);
        assert_eq!(job.state(), JobState::Cleaned);
        assert_eq!(snapshot(root.path()), before);
    }

    #[tokio::test]
    async fn finish_sweeps_off_the_executor_and_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let before = snapshot(root.path());

        let mut job = ConversionJob::create(root.path(), Operation::PdfToWord).await.unwrap();
        let input = job.stage_input("a.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let nested = job.scratch_dir().join("out");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("page-1.png"), b"png").unwrap();

        assert_eq!(job.finish().await, 1);
        assert!(job.is_cleaned());
        assert_eq!(snapshot(root.path()), before);

        assert_eq!(job.finish().await, 0);
        assert_eq!(job.cleanup(), 0);
        assert_eq!(snapshot(root.path()), before);
    }

    #[tokio::test]
    async fn dropping_a_job_sweeps_it() {
        let root = tempfile::tempdir().unwrap();
        let dir;
        {
            let mut job = ConversionJob::create(root.path(), Operation::Compress).await.unwrap();
            let path = job.stage_input("big.pdf");
            std::fs::write(path, b"partial").unwrap();
            dir = job.scratch_dir().to_path_buf();
        }
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn scratch_dirs_are_named_after_the_operation() {
        let root = tempfile::tempdir().unwrap();
        let a = ConversionJob::create(root.path(), Operation::Merge).await.unwrap();
        let b = ConversionJob::create(root.path(), Operation::Merge).await.unwrap();

        assert_ne!(a.scratch_dir(), b.scratch_dir());
        let name = a.scratch_dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("merge-"), "got {name}");
    }

    #[tokio::test]
    async fn state_machine_only_moves_forward() {
        let root = tempfile::tempdir().unwrap();
        let mut job = ConversionJob::create(root.path(), Operation::Merge).await.unwrap();

        assert!(job.advance(JobState::Converting).is_err());
        job.advance(JobState::Validating).unwrap();
        job.advance(JobState::Converting).unwrap();
        assert!(job.advance(JobState::Validating).is_err());

        job.advance(JobState::Cleaned).unwrap();
        assert!(job.is_cleaned());
        assert!(job.advance(JobState::Packaging).is_err());
        job.advance(JobState::Cleaned).unwrap();
    }

    #[tokio::test]
    async fn staged_inputs_get_distinct_paths() {
        let root = tempfile::tempdir().unwrap();
        let mut job = ConversionJob::create(root.path(), Operation::Merge).await.unwrap();
        let a = job.stage_input("same.pdf");
        let b = job.stage_input("same.pdf");
        assert_ne!(a, b);
        assert_eq!(job.tracked_paths(), &[a, b]);
    }
}
