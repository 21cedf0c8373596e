//! Ephemeral workdirs for uploaded bundles
//!
//! A bundle (main HTML file plus assets) is written into a fresh directory
//! under the staging root and published in a registry under an opaque key.
//! The internal content server resolves keys through [`WorkdirManager::lookup`];
//! only the manager ever deletes a directory.
//!
//! # Lifecycle
//!
//! ```text
//! validate names ─► fetch bytes ─► mkdir + write all ─► publish key ─► render ─► release
//!        │               │                 │                                      │
//!        └───── errors here do no I/O ─────┘ (partial dir removed on error)       └─ unpublish, rm -r
//! ```
//!
//! [`WorkdirManager::stage`] hands back a [`StagedWorkdir`] guard. Calling
//! [`StagedWorkdir::release`] cleans up in place; dropping the guard without
//! it (e.g. the request future was cancelled) unpublishes the key immediately
//! and removes the directory on a background task.

mod reaper;
mod sanitize;

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::StageError;

pub use sanitize::sanitize_file_name;

/// Prefix of every directory created under the staging root
pub const WORKDIR_PREFIX: &str = "pdfgenwd";

/// Source of the raw file bytes referenced by a generation request
pub trait FileSource {
    /// Bytes of the file submitted under `name`, if any
    fn file(&self, name: &str) -> Option<&[u8]>;
}

impl FileSource for HashMap<String, Vec<u8>> {
    fn file(&self, name: &str) -> Option<&[u8]> {
        self.get(name).map(Vec::as_slice)
    }
}

/// A published workdir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirHandle {
    /// Opaque lookup key, the only identifier exposed outside the process
    pub key: String,
    /// Directory holding the staged files
    pub path: PathBuf,
    /// Sanitized name of the main HTML document inside `path`
    pub main_file: String,
}

/// Key to handle map shared by the staging and serving paths
#[derive(Debug, Default)]
struct Registry {
    entries: RwLock<HashMap<String, Arc<WorkdirHandle>>>,
}

impl Registry {
    fn get(&self, key: &str) -> Option<Arc<WorkdirHandle>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn insert(&self, handle: Arc<WorkdirHandle>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(handle.key.clone(), handle);
    }

    fn remove(&self, key: &str) -> Option<Arc<WorkdirHandle>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key)
    }

    fn snapshot(&self) -> Vec<Arc<WorkdirHandle>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    registry: Registry,
}

/// Stages bundles, publishes them by key and owns their deletion
#[derive(Debug, Clone)]
pub struct WorkdirManager {
    inner: Arc<Inner>,
}

impl WorkdirManager {
    /// Create a manager staging under `root` (created on first use)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                registry: Registry::default(),
            }),
        }
    }

    /// Default staging root: `$TMPDIR/pdfgen`
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("pdfgen")
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Number of currently published workdirs
    pub fn active(&self) -> usize {
        self.inner.registry.len()
    }

    /// Write a bundle into a fresh directory and publish it
    ///
    /// All names are validated and all bytes fetched from `source` before
    /// anything touches the disk. The key is published only once every file
    /// has been written.
    pub async fn stage<S>(
        &self,
        main_file: &str,
        assets: &[String],
        source: &S,
    ) -> Result<StagedWorkdir, StageError>
    where
        S: FileSource + Sync + ?Sized,
    {
        if main_file.trim().is_empty() {
            return Err(StageError::EmptyMainFile);
        }
        let main_name = sanitize_file_name(main_file)
            .ok_or_else(|| StageError::InvalidFileName(main_file.to_string()))?;

        let mut seen = HashSet::new();
        let mut files: Vec<(String, &[u8])> = Vec::with_capacity(assets.len() + 1);

        seen.insert(main_name.clone());
        let main_bytes = source
            .file(main_file)
            .ok_or_else(|| StageError::MissingFile(main_file.to_string()))?;
        files.push((main_name.clone(), main_bytes));

        for asset in assets {
            let name = sanitize_file_name(asset)
                .ok_or_else(|| StageError::InvalidFileName(asset.clone()))?;
            if !seen.insert(name.clone()) {
                return Err(StageError::DuplicateFile(name));
            }
            // Assets are uploaded under their bare name; the raw name is a fallback
            let bytes = source
                .file(&name)
                .or_else(|| source.file(asset))
                .ok_or_else(|| StageError::MissingFile(asset.clone()))?;
            files.push((name, bytes));
        }

        let root = self.root();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| StageError::Io {
                path: root.to_path_buf(),
                source,
            })?;

        // Removed on drop until kept, so any early return below leaves nothing behind
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(root)
            .map_err(|source| StageError::Io {
                path: root.to_path_buf(),
                source,
            })?;

        for (name, bytes) in &files {
            let target = dir.path().join(name);
            tokio::fs::write(&target, bytes)
                .await
                .map_err(|source| StageError::Io {
                    path: target.clone(),
                    source,
                })?;
        }

        let handle = Arc::new(WorkdirHandle {
            key: Uuid::new_v4().simple().to_string(),
            path: dir.keep(),
            main_file: main_name,
        });
        self.inner.registry.insert(Arc::clone(&handle));

        debug!(
            key = %handle.key,
            path = %handle.path.display(),
            files = files.len(),
            "created workdir"
        );

        Ok(StagedWorkdir {
            manager: self.clone(),
            handle,
            released: false,
        })
    }

    /// Directory published under `key`, if it is currently live
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        self.inner.registry.get(key).map(|h| h.path.clone())
    }

    /// Full handle published under `key`
    pub fn handle(&self, key: &str) -> Option<Arc<WorkdirHandle>> {
        self.inner.registry.get(key)
    }

    /// Every currently published workdir
    pub fn handles(&self) -> Vec<Arc<WorkdirHandle>> {
        self.inner.registry.snapshot()
    }

    /// Unpublish `key` and delete its directory
    ///
    /// Returns `false` when the key was not published (already released or
    /// never staged). Deletion failures are logged and otherwise ignored.
    pub async fn release(&self, key: &str) -> bool {
        let Some(handle) = self.inner.registry.remove(key) else {
            debug!(key, "workdir already released");
            return false;
        };

        debug!(key, "cleaning up workdir");
        remove_workdir(&handle.path).await;
        true
    }

    /// Synchronous variant of [`release`](Self::release) used from `Drop`
    fn release_detached(&self, key: &str) {
        let Some(handle) = self.inner.registry.remove(key) else {
            return;
        };

        debug!(key, "cleaning up dropped workdir");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { remove_workdir(&handle.path).await });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_dir_all(&handle.path) {
                    warn!(path = %handle.path.display(), error = %e, "failed to clean up workdir");
                }
            }
        }
    }
}

async fn remove_workdir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "workdir already gone");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to clean up workdir");
        }
    }
}

/// Scoped ownership of a staged workdir
///
/// Exactly one release happens per guard: either [`release`](Self::release)
/// or the fallback in `Drop`.
#[derive(Debug)]
pub struct StagedWorkdir {
    manager: WorkdirManager,
    handle: Arc<WorkdirHandle>,
    released: bool,
}

impl StagedWorkdir {
    pub fn handle(&self) -> &WorkdirHandle {
        &self.handle
    }

    /// Unpublish the key and delete the directory now
    pub async fn release(mut self) {
        self.released = true;
        self.manager.release(&self.handle.key).await;
    }
}

impl Deref for StagedWorkdir {
    type Target = WorkdirHandle;

    fn deref(&self) -> &WorkdirHandle {
        &self.handle
    }
}

impl Drop for StagedWorkdir {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release_detached(&self.handle.key);
        }
    }
}
