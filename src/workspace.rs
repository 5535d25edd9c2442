//! File buffers the orchestrator reads from and persists to
//!
//! The patch engine itself only ever sees strings. A `Workspace` owns the
//! real files: an in-memory map for tests and embedding, or a directory on
//! disk with path containment and atomic, locked writes.

use crate::error::{PatchError, PatchResult};
use crate::util::resolve_repo_path_allow_new;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

const LOCK_FILE: &str = ".patchwright.lock";
const LOCK_TIMEOUT_SECS: u64 = 10;
const LOCK_RETRY_MS: u64 = 25;

pub trait Workspace: Send + Sync {
    fn read(&self, path: &str) -> PatchResult<String>;

    fn write(&self, path: &str, text: &str) -> PatchResult<()>;

    /// Delete a file; used to roll back a file created by a failed group write
    fn remove(&self, path: &str) -> PatchResult<()>;

    fn exists(&self, path: &str) -> bool;

    /// Map a model-suggested path onto a file that exists.
    ///
    /// Models often give a path relative to some other directory, so a
    /// missing path is looked up by suffix.
    fn locate(&self, path: &str) -> Option<String> {
        self.exists(path).then(|| path.to_string())
    }
}

/// Whether `candidate` ends with every component of `suffix`
fn has_path_suffix(candidate: &str, suffix: &str) -> bool {
    let suffix = suffix.trim_start_matches("./");
    !suffix.is_empty() && Path::new(candidate).ends_with(Path::new(suffix))
}

/// Files held in memory, keyed by relative path
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.files_mut().insert(path.into(), text.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files_mut().get(path).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.files_mut().clone()
    }

    fn files_mut(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock can't leave the map half-written
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Workspace for MemoryWorkspace {
    fn read(&self, path: &str) -> PatchResult<String> {
        self.get(path)
            .ok_or_else(|| PatchError::io(path, "no such file in workspace"))
    }

    fn write(&self, path: &str, text: &str) -> PatchResult<()> {
        self.files_mut().insert(path.to_string(), text.to_string());
        Ok(())
    }

    fn remove(&self, path: &str) -> PatchResult<()> {
        self.files_mut().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files_mut().contains_key(path)
    }

    fn locate(&self, path: &str) -> Option<String> {
        let files = self.files_mut();
        if files.contains_key(path) {
            return Some(path.to_string());
        }
        files.keys().find(|k| has_path_suffix(k, path)).cloned()
    }
}

/// Files under a root directory on disk
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

struct WorkspaceLock {
    file: fs::File,
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PatchResult<PathBuf> {
        resolve_repo_path_allow_new(&self.root, Path::new(path))
            .map(|p| p.absolute)
            .map_err(|e| PatchError::io(path, e))
    }

    /// Exclusive lock serializing writers across processes
    fn lock(&self) -> PatchResult<WorkspaceLock> {
        let lock_path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| PatchError::io(&lock_path, e))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(WorkspaceLock { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(PatchError::io(
                            &lock_path,
                            format!("timed out waiting for lock ({}s)", LOCK_TIMEOUT_SECS),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
                Err(err) => return Err(PatchError::io(&lock_path, err)),
            }
        }
    }
}

fn is_ignored_dir(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ignored = [
        "target",
        "node_modules",
        ".git",
        ".svn",
        ".hg",
        "dist",
        "__pycache__",
        ".pio",
        "vendor",
        ".idea",
        ".vscode",
    ];

    ignored.contains(&name) || name.starts_with('.')
}

/// Write content atomically by writing to a temp file first, then renaming.
///
/// The temp file keeps the target's permissions.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".patchwright.tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, content)?;
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&tmp_path, meta.permissions());
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

impl Workspace for FsWorkspace {
    fn read(&self, path: &str) -> PatchResult<String> {
        let absolute = self.resolve(path)?;
        fs::read_to_string(&absolute).map_err(|e| PatchError::io(path, e))
    }

    fn write(&self, path: &str, text: &str) -> PatchResult<()> {
        let absolute = self.resolve(path)?;
        let _lock = self.lock()?;
        write_atomic(&absolute, text).map_err(|e| PatchError::io(path, e))?;
        tracing::debug!(path, bytes = text.len(), "file written");
        Ok(())
    }

    fn remove(&self, path: &str) -> PatchResult<()> {
        let absolute = self.resolve(path)?;
        let _lock = self.lock()?;
        match fs::remove_file(&absolute) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PatchError::io(path, err)),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.is_file())
    }

    fn locate(&self, path: &str) -> Option<String> {
        if self.exists(path) {
            return Some(path.to_string());
        }

        let mut matches: Vec<String> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_ignored_dir(e.path())))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?;
                Some(rel.to_string_lossy().replace('\\', "/"))
            })
            .filter(|rel| has_path_suffix(rel, path))
            .collect();

        // Shallowest match wins
        matches.sort_by_key(|rel| rel.matches('/').count());
        let found = matches.into_iter().next();
        if let Some(found) = &found {
            tracing::debug!(suggested = path, found = %found, "resolved path by suffix");
        }
        found
    }
}
