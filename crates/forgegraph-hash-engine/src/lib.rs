//! Stable content digests over a target's declaration (`rule_hash`) and its
//! source inputs (`source_hash`), per spec.md §4.E.
//!
//! Every field but the deps-sum is folded into one buffer as a
//! length-prefixed byte string before hashing, so that e.g. an output named
//! `"ab"` followed by one named `"c"` never collides with `"a"` followed by
//! `"bc"`. Dep contributions are the one exception: they're XORed together
//! so reordering declared deps never changes the hash.

#![forbid(unsafe_code)]

mod path_hasher;

use forgegraph_label::{PackageResolver, Target};
use forgegraph_paths::{AbsoluteSystemPathBuf, ResolvedPath};
pub use path_hasher::PathHasher;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashEngineError {
    #[error("failed to read {0}: {1}")]
    Io(String, String),
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// A stable digest over a target's rule declaration. `dep_hashes` must be
/// each direct dependency's already-computed `rule_hash`; the caller (the
/// scheduler, which knows the dependency order) supplies them since this
/// function never walks the graph itself.
pub fn rule_hash(
    target: &Target,
    dep_hashes: &[u64],
    config_fingerprint: Option<u64>,
    source_digest: Option<u64>,
) -> u64 {
    let mut buf = Vec::new();

    let mut commands: Vec<&str> = target
        .per_config_command
        .values()
        .map(|s| s.as_str())
        .collect();
    if let Some(c) = &target.command {
        commands.push(c.as_str());
    }
    if let Some(c) = &target.test_command {
        commands.push(c.as_str());
    }
    for command in &commands {
        push_len_prefixed(&mut buf, command.as_bytes());
    }

    push_len_prefixed(&mut buf, target.label.to_string().as_bytes());

    let mut visibility: Vec<String> = target.visibility.iter().map(|l| l.to_string()).collect();
    visibility.sort();
    for v in &visibility {
        push_len_prefixed(&mut buf, v.as_bytes());
    }

    let mut labels = target.labels.clone();
    labels.sort();
    for label in &labels {
        push_len_prefixed(&mut buf, label.as_bytes());
    }

    let mut requires = target.requires.clone();
    requires.sort();
    for req in &requires {
        push_len_prefixed(&mut buf, req.as_bytes());
    }

    for (key, value) in &target.provides {
        push_len_prefixed(&mut buf, key.as_bytes());
        push_len_prefixed(&mut buf, value.to_string().as_bytes());
    }

    let dep_sum = dep_hashes.iter().fold(0u64, |acc, h| acc ^ h);
    push_len_prefixed(&mut buf, &dep_sum.to_le_bytes());

    let mut outputs = target.outputs.clone();
    outputs.sort();
    for output in &outputs {
        push_len_prefixed(&mut buf, output.as_bytes());
    }

    let mut flags = Vec::new();
    flags.push(target.is_binary as u8);
    flags.push(target.test.is_some() as u8);
    flags.push(target.test_only as u8);
    flags.push(target.output_is_complete as u8);
    flags.push(target.needs_transitive_dependencies as u8);
    flags.push(target.stamp as u8);
    push_len_prefixed(&mut buf, &flags);
    push_len_prefixed(&mut buf, &target.build_timeout.unwrap_or(0).to_le_bytes());
    push_len_prefixed(&mut buf, &target.flakiness.unwrap_or(0).to_le_bytes());
    if let Some(test) = &target.test {
        push_len_prefixed(&mut buf, &test.timeout_seconds.unwrap_or(0).to_le_bytes());
        push_len_prefixed(&mut buf, &test.flakiness.unwrap_or(0).to_le_bytes());
    }

    if let Some(fingerprint) = config_fingerprint {
        push_len_prefixed(&mut buf, &fingerprint.to_le_bytes());
    }
    if let Some(digest) = source_digest {
        push_len_prefixed(&mut buf, &digest.to_le_bytes());
    }

    forgegraph_hash::key_hash64(&buf)
}

/// Digests every source path's byte content and every external (non-in-repo)
/// tool path, using `path_hasher` to avoid re-reading a file shared by
/// multiple targets. In-repo tools are skipped: their own `rule_hash`
/// already captures them, and the depending target observes that through
/// its reverse-dependency edge, not through this function.
pub fn source_hash(
    target: &Target,
    repo_root: &AbsoluteSystemPathBuf,
    resolver: &dyn PackageResolver,
    path_hasher: &PathHasher,
) -> Result<u64, HashEngineError> {
    let mut source_paths: Vec<ResolvedPath> = Vec::new();
    for input in target.sources.iter().chain(target.named_sources.values().flatten()) {
        source_paths.extend(input.paths(resolver));
    }
    source_paths.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    let mut buf = Vec::new();
    for resolved in &source_paths {
        let absolute = match resolved {
            ResolvedPath::Anchored(p) => repo_root.join_anchored(p),
            ResolvedPath::Absolute(p) => p.clone(),
        };
        let hash = path_hasher.hash_path(&absolute)?;
        push_len_prefixed(&mut buf, resolved.as_str().as_bytes());
        push_len_prefixed(&mut buf, &hash.to_le_bytes());
    }

    let mut tool_paths: Vec<String> = Vec::new();
    for tool in target.tools.iter().chain(target.named_tools.values().flatten()) {
        if let forgegraph_label::BuildInput::SystemInput { absolute_path } = tool {
            tool_paths.push(absolute_path.clone());
        }
    }
    tool_paths.sort();
    for tool_path in &tool_paths {
        let absolute = AbsoluteSystemPathBuf::new(tool_path.as_str())
            .map_err(|e| HashEngineError::Io(tool_path.clone(), e.to_string()))?;
        let hash = path_hasher.hash_path(&absolute)?;
        push_len_prefixed(&mut buf, tool_path.as_bytes());
        push_len_prefixed(&mut buf, &hash.to_le_bytes());
    }

    Ok(forgegraph_hash::key_hash64(&buf))
}

#[cfg(test)]
mod tests {
    use forgegraph_label::{Label, Target};

    use super::*;

    #[test]
    fn rule_hash_is_stable_across_identical_inputs() {
        let target = Target::new(Label::new("", "pkg", "a"));
        let h1 = rule_hash(&target, &[], None, None);
        let h2 = rule_hash(&target, &[], None, None);
        assert_eq!(h1, h2);
    }

    #[test]
    fn rule_hash_is_order_independent_over_deps() {
        let target = Target::new(Label::new("", "pkg", "a"));
        let forward = rule_hash(&target, &[1, 2, 3], None, None);
        let reversed = rule_hash(&target, &[3, 2, 1], None, None);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn rule_hash_changes_with_config_fingerprint_when_included() {
        let target = Target::new(Label::new("", "pkg", "a"));
        let without = rule_hash(&target, &[], None, None);
        let with = rule_hash(&target, &[], Some(42), None);
        assert_ne!(without, with);
    }

    #[test]
    fn rule_hash_changes_when_an_output_is_added() {
        let mut target = Target::new(Label::new("", "pkg", "a"));
        let before = rule_hash(&target, &[], None, None);
        target.outputs.push("out.bin".to_string());
        let after = rule_hash(&target, &[], None, None);
        assert_ne!(before, after);
    }

    struct NoResolver;
    impl forgegraph_label::PackageResolver for NoResolver {
        fn package_root(&self, _subrepo: &str, _package: &str) -> Option<forgegraph_paths::AnchoredSystemPathBuf> {
            None
        }
    }

    #[test]
    fn source_hash_changes_when_a_system_input_s_file_content_changes() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("tool.sh");
        std::fs::File::create(&file_path).unwrap().write_all(b"v1").unwrap();

        let repo_root = AbsoluteSystemPathBuf::new(dir.path().to_str().unwrap()).unwrap();
        let mut target = Target::new(Label::new("", "pkg", "a"));
        target.sources.push(forgegraph_label::BuildInput::SystemInput {
            absolute_path: file_path.to_str().unwrap().to_string(),
        });

        let before = source_hash(&target, &repo_root, &NoResolver, &PathHasher::new(4)).unwrap();

        std::fs::File::create(&file_path).unwrap().write_all(b"v2").unwrap();
        let after = source_hash(&target, &repo_root, &NoResolver, &PathHasher::new(4)).unwrap();

        assert_ne!(before, after);
    }
}
