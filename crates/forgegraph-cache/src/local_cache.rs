use std::{
    collections::HashMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use forgegraph_paths::AbsoluteSystemPathBuf;
use forgegraph_scheduler::{Artifact, ExecutionResult};
use parking_lot::{Mutex, RwLock};

use crate::error::CacheError;

/// Three-line sidecar written next to every artifact directory, per the
/// local cache layout: hostname, the peer that produced it (empty for a
/// purely local build), and the unix timestamp of the last read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMeta {
    pub hostname: String,
    pub peer: String,
    pub last_read_unix_seconds: u64,
}

impl CacheMeta {
    fn render(&self) -> String {
        format!("{}\n{}\n{}\n", self.hostname, self.peer, self.last_read_unix_seconds)
    }

    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let hostname = lines.next()?.to_string();
        let peer = lines.next()?.to_string();
        let last_read_unix_seconds = lines.next()?.parse().ok()?;
        Some(Self { hostname, peer, last_read_unix_seconds })
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(unix)]
fn create_symlink(target: &str, dest: &std::path::Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(windows)]
fn create_symlink(target: &str, dest: &std::path::Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, dest)
}

/// The local tier of the two-tier cache (spec.md §6's `<root>/<os>_<arch>/
/// <package>/<target>/<base64url(hash)>/<file>` layout). Keyed on the same
/// hex hash string the scheduler already threads through `CachePort`, so no
/// new hash representation needs to cross the `forgegraph-scheduler`
/// boundary.
pub struct LocalCache {
    root: AbsoluteSystemPathBuf,
    os_arch: String,
    refcounts: Mutex<HashMap<String, usize>>,
    pub(crate) eviction_lock: RwLock<()>,
}

impl LocalCache {
    pub fn new(root: AbsoluteSystemPathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(root.as_path().as_std_path()).map_err(|e| CacheError::Io(root.to_string(), e))?;
        Ok(Self {
            root,
            os_arch: format!("{}_{}", std::env::consts::OS, std::env::consts::ARCH),
            refcounts: Mutex::new(HashMap::new()),
            eviction_lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &AbsoluteSystemPathBuf {
        &self.root
    }

    fn artifact_dir(&self, package: &str, target: &str, hash_hex: &str) -> Result<AbsoluteSystemPathBuf, CacheError> {
        let bytes = hex::decode(hash_hex).map_err(|_| CacheError::InvalidHash(hash_hex.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        Ok(self.root.join(&self.os_arch).join(package).join(target).join(&encoded))
    }

    fn meta_path(dir: &AbsoluteSystemPathBuf) -> AbsoluteSystemPathBuf {
        dir.join(".meta")
    }

    /// Marks `dir` as in use: the cleaner skips refcounted paths even if
    /// they're past their age budget (spec.md §5's per-path refcounting).
    pub fn acquire(&self, package: &str, target: &str, hash_hex: &str) -> Result<(), CacheError> {
        let dir = self.artifact_dir(package, target, hash_hex)?;
        *self.refcounts.lock().entry(dir.to_string()).or_insert(0) += 1;
        Ok(())
    }

    pub fn release(&self, package: &str, target: &str, hash_hex: &str) -> Result<(), CacheError> {
        let dir = self.artifact_dir(package, target, hash_hex)?;
        let mut refcounts = self.refcounts.lock();
        if let Some(count) = refcounts.get_mut(&dir.to_string()) {
            *count -= 1;
            if *count == 0 {
                refcounts.remove(&dir.to_string());
            }
        }
        Ok(())
    }

    pub(crate) fn is_refcounted(&self, dir: &str) -> bool {
        self.refcounts.lock().contains_key(dir)
    }

    /// Drops every cached hash variant of `package`/`target` (spec.md §4.G's
    /// `delete(path)`; deletions target a logical package/target, not one
    /// specific hash, since the caller rebuilding a target has no way to
    /// know which hash used to be current).
    pub fn delete(&self, package: &str, target: &str) -> Result<(), CacheError> {
        let _guard = self.eviction_lock.read();
        let dir = self.root.join(&self.os_arch).join(package).join(target);
        if dir.as_path().as_std_path().is_dir() {
            std::fs::remove_dir_all(dir.as_path().as_std_path()).map_err(|e| CacheError::Io(dir.to_string(), e))?;
        }
        Ok(())
    }

    /// Empties this cache entirely for the local `os_arch` (spec.md §4.G's
    /// `delete_all()`).
    pub fn delete_all(&self) -> Result<(), CacheError> {
        let _guard = self.eviction_lock.read();
        let dir = self.root.join(&self.os_arch);
        if dir.as_path().as_std_path().is_dir() {
            std::fs::remove_dir_all(dir.as_path().as_std_path()).map_err(|e| CacheError::Io(dir.to_string(), e))?;
        }
        Ok(())
    }

    /// Atomically writes every artifact into `<dir>` (write-temp-then-rename
    /// per the teacher's `FSCache::put`), then writes the `.meta` sidecar.
    pub fn store(&self, package: &str, target: &str, hash_hex: &str, peer: &str, result: &ExecutionResult) -> Result<(), CacheError> {
        let _guard = self.eviction_lock.read();
        let dir = self.artifact_dir(package, target, hash_hex)?;
        std::fs::create_dir_all(dir.as_path().as_std_path()).map_err(|e| CacheError::Io(dir.to_string(), e))?;

        for artifact in &result.artifacts {
            let dest = dir.join(&artifact.name);
            if let Some(symlink_target) = &artifact.symlink_target {
                let _ = std::fs::remove_file(dest.as_path().as_std_path());
                create_symlink(symlink_target, dest.as_path().as_std_path()).map_err(|e| CacheError::Io(dest.to_string(), e))?;
                continue;
            }
            let tmp = dir.join(format!(".{}.{}.tmp", artifact.name, std::process::id()));
            std::fs::write(tmp.as_path().as_std_path(), &artifact.body).map_err(|e| CacheError::Io(tmp.to_string(), e))?;
            std::fs::rename(tmp.as_path().as_std_path(), dest.as_path().as_std_path()).map_err(|e| CacheError::Io(dest.to_string(), e))?;
        }

        let meta = CacheMeta { hostname: local_hostname(), peer: peer.to_string(), last_read_unix_seconds: now_unix() };
        std::fs::write(Self::meta_path(&dir).as_path().as_std_path(), meta.render()).map_err(|e| CacheError::Io(dir.to_string(), e))?;
        Ok(())
    }

    /// Returns `None` on a cache miss (directory absent), touching the
    /// `.meta` sidecar's `last_read_unix_seconds` on a hit so the cleaner's
    /// age-based eviction sees this artifact as freshly used.
    pub fn fetch(&self, package: &str, target: &str, hash_hex: &str) -> Result<Option<ExecutionResult>, CacheError> {
        let dir = self.artifact_dir(package, target, hash_hex)?;
        if !dir.as_path().as_std_path().is_dir() {
            return Ok(None);
        }

        let mut artifacts = Vec::new();
        let entries = std::fs::read_dir(dir.as_path().as_std_path()).map_err(|e| CacheError::Io(dir.to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Io(dir.to_string(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".meta" || name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| CacheError::Io(name.clone(), e))?;
            if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path()).map_err(|e| CacheError::Io(name.clone(), e))?;
                artifacts.push(Artifact::symlink(name, target.to_string_lossy().into_owned()));
                continue;
            }
            let body = std::fs::read(entry.path()).map_err(|e| CacheError::Io(name.clone(), e))?;
            artifacts.push(Artifact::file(name, body));
        }

        self.touch(&dir)?;
        Ok(Some(ExecutionResult { artifacts }))
    }

    /// Per spec.md §4.G, a directory with no readable three-line `.meta`
    /// sidecar is `CorruptMetadata`, not a tolerable default — `store`
    /// always writes one, so its absence means something outside this
    /// crate touched the cache directory.
    fn touch(&self, dir: &AbsoluteSystemPathBuf) -> Result<(), CacheError> {
        let meta_path = Self::meta_path(dir);
        let existing = std::fs::read_to_string(meta_path.as_path().as_std_path()).map_err(|e| CacheError::Io(dir.to_string(), e))?;
        let mut meta = CacheMeta::parse(&existing)
            .ok_or_else(|| CacheError::CorruptMetadata(dir.to_string(), "expected hostname/peer/last_read_unix_seconds lines".to_string()))?;
        meta.last_read_unix_seconds = now_unix();
        std::fs::write(meta_path.as_path().as_std_path(), meta.render()).map_err(|e| CacheError::Io(dir.to_string(), e))
    }

    pub(crate) fn read_meta(dir: &AbsoluteSystemPathBuf) -> Option<CacheMeta> {
        let text = std::fs::read_to_string(Self::meta_path(dir).as_path().as_std_path()).ok()?;
        CacheMeta::parse(&text)
    }
}

/// Implements the local tier of `forgegraph_scheduler::CachePort`. Lookups
/// that hit log through `tracing`; errors degrade to a miss rather than
/// failing the build (spec.md §7: `CacheIOError` — logged, degrades to
/// miss).
impl forgegraph_scheduler::CachePort for LocalCache {
    fn lookup_local(&self, package: &str, target: &str, hash: &str) -> Option<ExecutionResult> {
        match self.fetch(package, target, hash) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, "local cache read failed, treating as miss");
                None
            }
        }
    }

    fn lookup_shared(&self, _package: &str, _target: &str, _hash: &str) -> Option<ExecutionResult> {
        None
    }

    fn store_local(&self, package: &str, target: &str, hash: &str, result: &ExecutionResult) {
        if let Err(e) = self.store(package, target, hash, "", result) {
            tracing::warn!(error = %e, "local cache write failed");
        }
    }
}
