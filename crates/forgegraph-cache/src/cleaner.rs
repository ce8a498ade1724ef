use std::time::{Duration, SystemTime, UNIX_EPOCH};

use forgegraph_paths::AbsoluteSystemPathBuf;

use crate::{error::CacheError, local_cache::LocalCache};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: usize,
    pub bytes_freed: u64,
    pub skipped_refcounted: usize,
}

/// Age/size-bounded eviction over a [`LocalCache`]'s directory tree (spec.md
/// §4.G: age-based eviction drops anything past `max_age` unconditionally;
/// size-based eviction is hysteresis-driven — it only triggers once the
/// tree exceeds `high_water_mark`, and then removes oldest-`last_read`-first
/// only until the tree is back at or under `low_water_mark`, rather than
/// evicting down to zero every time it fires). Mirrors the teacher's
/// `FSCache` write-temp-then-rename discipline by never touching a
/// directory mid-write: the write lock this takes is the same one
/// `LocalCache::store` takes a read lock against, so a sweep can never race
/// an in-flight write to the same tree.
pub struct Cleaner {
    max_age: Duration,
    high_water_mark: u64,
    low_water_mark: u64,
}

impl Cleaner {
    pub fn new(max_age: Duration, high_water_mark: u64, low_water_mark: u64) -> Self {
        Self { max_age, high_water_mark, low_water_mark }
    }

    pub fn sweep(&self, cache: &LocalCache) -> Result<CleanReport, CacheError> {
        let _guard = cache.eviction_lock.write();
        let root = cache.root().as_path().as_std_path();
        if !root.is_dir() {
            return Ok(CleanReport::default());
        }

        let mut entries = self.collect_artifact_dirs(cache)?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();

        let mut report = CleanReport::default();
        let mut total_bytes: u64 = entries.iter().map(|e| e.bytes).sum();
        let size_sweep_triggered = total_bytes > self.high_water_mark;

        entries.sort_by_key(|e| e.last_read_unix_seconds);

        for entry in &entries {
            if cache.is_refcounted(&entry.path.to_string()) {
                report.skipped_refcounted += 1;
                continue;
            }
            let age = now.saturating_sub(entry.last_read_unix_seconds);
            let over_age_budget = age > self.max_age.as_secs();
            let still_over_low_mark = size_sweep_triggered && total_bytes > self.low_water_mark;
            if !over_age_budget && !still_over_low_mark {
                continue;
            }
            std::fs::remove_dir_all(entry.path.as_path().as_std_path()).map_err(|e| CacheError::Io(entry.path.to_string(), e))?;
            total_bytes = total_bytes.saturating_sub(entry.bytes);
            report.removed += 1;
            report.bytes_freed += entry.bytes;
        }

        Ok(report)
    }

    fn collect_artifact_dirs(&self, cache: &LocalCache) -> Result<Vec<ArtifactDirEntry>, CacheError> {
        let mut out = Vec::new();
        // <root>/<os_arch>/<package>/<target>/<hash>
        for os_arch in read_subdirs(cache.root())? {
            for package in read_subdirs(&os_arch)? {
                for target in read_subdirs(&package)? {
                    for hash_dir in read_subdirs(&target)? {
                        let meta = LocalCache::read_meta(&hash_dir);
                        let bytes = dir_size(&hash_dir)?;
                        out.push(ArtifactDirEntry {
                            last_read_unix_seconds: meta.map(|m| m.last_read_unix_seconds).unwrap_or(0),
                            bytes,
                            path: hash_dir,
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

struct ArtifactDirEntry {
    path: AbsoluteSystemPathBuf,
    last_read_unix_seconds: u64,
    bytes: u64,
}

fn read_subdirs(dir: &AbsoluteSystemPathBuf) -> Result<Vec<AbsoluteSystemPathBuf>, CacheError> {
    let std_path = dir.as_path().as_std_path();
    if !std_path.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(std_path).map_err(|e| CacheError::Io(dir.to_string(), e))? {
        let entry = entry.map_err(|e| CacheError::Io(dir.to_string(), e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push(dir.join(name));
        }
    }
    Ok(out)
}

fn dir_size(dir: &AbsoluteSystemPathBuf) -> Result<u64, CacheError> {
    let mut total = 0u64;
    let std_path = dir.as_path().as_std_path();
    for entry in std::fs::read_dir(std_path).map_err(|e| CacheError::Io(dir.to_string(), e))? {
        let entry = entry.map_err(|e| CacheError::Io(dir.to_string(), e))?;
        let metadata = entry.metadata().map_err(|e| CacheError::Io(dir.to_string(), e))?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}
