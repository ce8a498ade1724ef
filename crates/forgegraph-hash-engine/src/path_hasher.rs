use forgegraph_paths::AbsoluteSystemPathBuf;
use forgegraph_shard_map::ErrMap;

use crate::HashEngineError;

/// Caches per-absolute-path content hashes, single-flight so two targets
/// sharing a source file hash it exactly once even when built concurrently
/// (spec.md §4.E: "a PathHasher that caches per absolute-path hashes").
pub struct PathHasher {
    cache: ErrMap<AbsoluteSystemPathBuf, u64, HashEngineError>,
}

impl PathHasher {
    pub fn new(shard_count: usize) -> Self {
        Self {
            cache: ErrMap::new(shard_count),
        }
    }

    pub fn hash_path(&self, path: &AbsoluteSystemPathBuf) -> Result<u64, HashEngineError> {
        self.cache.get_or_set(path.clone(), || {
            let bytes = std::fs::read(path.as_path().as_std_path())
                .map_err(|e| HashEngineError::Io(path.to_string(), e.to_string()))?;
            Ok(forgegraph_hash::key_hash64(&bytes))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn hashes_file_content_and_caches_result() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::File::create(&file_path).unwrap().write_all(b"hello").unwrap();

        let path = AbsoluteSystemPathBuf::new(file_path.to_str().unwrap()).unwrap();
        let hasher = PathHasher::new(4);
        let first = hasher.hash_path(&path).unwrap();
        let second = hasher.hash_path(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, forgegraph_hash::key_hash64(b"hello"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = AbsoluteSystemPathBuf::new("/definitely/does/not/exist").unwrap();
        let hasher = PathHasher::new(4);
        assert!(matches!(hasher.hash_path(&path), Err(HashEngineError::Io(_, _))));
    }
}
