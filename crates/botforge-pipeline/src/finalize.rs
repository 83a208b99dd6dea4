//! Output store: exposes an artifact tree all at once or not at all.
//!
//! [`LocalFsStore`] writes into `<root>/.staging/<run id>`, checks every file
//! landed with the expected size, then renames the staging directory to
//! `<root>/<slug>-<run id prefix>`. Staging is removed on any failure.

use crate::artifact::ArtifactTree;
use botforge_core::RunId;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("output directory already exists: {0}")]
    Exists(PathBuf),

    #[error("verification failed: {0}")]
    Verify(String),

    #[error("writer task failed: {0}")]
    Join(String),
}

impl FinalizeError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    /// Transient I/O worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// Pluggable destination for finished runs.
#[async_trait::async_trait]
pub trait OutputStore: Send + Sync {
    /// Expose `tree` for `run_id`; returns the final location.
    async fn commit(&self, run_id: &RunId, slug: &str, tree: &ArtifactTree) -> Result<PathBuf, FinalizeError>;

    /// Where a run's output would live.
    fn location(&self, run_id: &RunId, slug: &str) -> PathBuf;
}

/// Writes one staged file.
pub type FileWriter = fn(&Path, &[u8]) -> io::Result<()>;

fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    std::fs::write(path, content)
}

pub struct LocalFsStore {
    root: PathBuf,
    retries: u32,
    write: FileWriter,
}

impl LocalFsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf(), retries: 2, write: write_file }
    }

    /// Replace the per-file writer, e.g. with one that syncs each file.
    pub fn with_writer(mut self, write: FileWriter) -> Self {
        self.write = write;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(".staging").join(run_id.as_str())
    }
}

#[async_trait::async_trait]
impl OutputStore for LocalFsStore {
    async fn commit(&self, run_id: &RunId, slug: &str, tree: &ArtifactTree) -> Result<PathBuf, FinalizeError> {
        let staging = self.staging_dir(run_id);
        let target = self.location(run_id, slug);
        let files: Vec<(String, Vec<u8>)> = tree.iter().map(|(p, f)| (p.to_string(), f.content.clone())).collect();
        let expected = tree.manifest();

        let mut attempt = 0;
        loop {
            let job = WriteJob {
                staging: staging.clone(),
                target: target.clone(),
                files: files.clone(),
                expected: expected.clone(),
                write: self.write,
            };
            let outcome = tokio::task::spawn_blocking(move || job.run())
                .await
                .map_err(|e| FinalizeError::Join(e.to_string()))
                .and_then(|r| r);

            match outcome {
                Ok(()) => {
                    info!(run_id = %run_id, path = %target.display(), files = expected.len(), "output finalized");
                    return Ok(target);
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(run_id = %run_id, attempt, error = %e, "transient finalize failure, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn location(&self, run_id: &RunId, slug: &str) -> PathBuf {
        self.root.join(format!("{}-{}", slug, run_id.short()))
    }
}

/// One attempt at staging and exposing a tree; runs on the blocking pool.
struct WriteJob {
    staging: PathBuf,
    target: PathBuf,
    files: Vec<(String, Vec<u8>)>,
    expected: BTreeMap<String, u64>,
    write: FileWriter,
}

impl WriteJob {
    fn run(self) -> Result<(), FinalizeError> {
        let result = self.write_and_expose();
        if result.is_err() {
            if let Err(e) = std::fs::remove_dir_all(&self.staging) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove staging {}: {}", self.staging.display(), e);
                }
            }
        }
        result
    }

    fn write_and_expose(&self) -> Result<(), FinalizeError> {
        let (staging, target) = (self.staging.as_path(), self.target.as_path());
        if target.exists() {
            return Err(FinalizeError::Exists(target.to_path_buf()));
        }
        if staging.exists() {
            std::fs::remove_dir_all(staging).map_err(|e| FinalizeError::io(staging, e))?;
        }
        std::fs::create_dir_all(staging).map_err(|e| FinalizeError::io(staging, e))?;

        for (rel, content) in &self.files {
            let path = staging.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| FinalizeError::io(parent, e))?;
            }
            (self.write)(&path, content).map_err(|e| FinalizeError::io(&path, e))?;
            debug!("staged {} ({} bytes)", path.display(), content.len());
        }

        verify(staging, &self.expected)?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FinalizeError::io(parent, e))?;
        }
        std::fs::rename(staging, target).map_err(|e| FinalizeError::io(target, e))?;
        Ok(())
    }
}

/// Every expected file exists with its expected size, and nothing else does.
pub fn verify(dir: &Path, expected: &BTreeMap<String, u64>) -> Result<(), FinalizeError> {
    let mut found = BTreeMap::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| FinalizeError::Verify(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| FinalizeError::Verify(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().map_err(|e| FinalizeError::Verify(e.to_string()))?.len();
        found.insert(rel, size);
    }

    for (path, size) in expected {
        match found.get(path) {
            None => return Err(FinalizeError::Verify(format!("{} is missing", path))),
            Some(actual) if actual != size => {
                return Err(FinalizeError::Verify(format!(
                    "{} has {} bytes, expected {}",
                    path, actual, size
                )))
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = found.keys().find(|p| !expected.contains_key(*p)) {
        return Err(FinalizeError::Verify(format!("unexpected file {}", extra)));
    }
    Ok(())
}
