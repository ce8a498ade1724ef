//! UTF-8 path newtypes.
//!
//! The graph engine moves between three different notions of "a path":
//! absolute filesystem paths (where the local cache lives), paths anchored
//! to the repository root (how a [`Target`](forgegraph-label::Target)
//! records its sources so the same build graph can be replayed from a
//! clone at a different filesystem location), and paths relative to a
//! single package (how a build-file describes its own sources). Mixing
//! these up is a recurring source of bugs in build tools, so each gets its
//! own type instead of passing `Utf8PathBuf` everywhere and hoping call
//! sites never confuse them.
//!
//! This module is a small, internally-consistent reimplementation of the
//! same idea turborepo's `turbopath` crate provides, built directly on
//! `camino::Utf8PathBuf` rather than wrapping `std::path::PathBuf`.

#![forbid(unsafe_code)]

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),
    #[error("path escapes its anchor: {0}")]
    Escapes(String),
}

/// An absolute path on the local filesystem (e.g. the cache root directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbsoluteSystemPathBuf(Utf8PathBuf);

impl AbsoluteSystemPathBuf {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(path.into_string()));
        }
        Ok(Self(path))
    }

    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    pub fn join(&self, component: impl AsRef<str>) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf(self.0.join(component.as_ref()))
    }

    pub fn join_anchored(&self, rel: &AnchoredSystemPathBuf) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf(self.0.join(&rel.0))
    }

    /// Strips this path's prefix from `other`, yielding a repo-anchored path.
    pub fn anchor(&self, other: &Utf8Path) -> Result<AnchoredSystemPathBuf, PathError> {
        let rel = other
            .strip_prefix(&self.0)
            .map_err(|_| PathError::Escapes(other.to_string()))?;
        Ok(AnchoredSystemPathBuf(rel.to_path_buf()))
    }
}

impl fmt::Display for AbsoluteSystemPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A path relative to (and never escaping) the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchoredSystemPathBuf(Utf8PathBuf);

impl AnchoredSystemPathBuf {
    pub fn from_raw(path: impl Into<Utf8PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if path.is_absolute() {
            return Err(PathError::NotAbsolute(path.into_string()));
        }
        for component in path.components() {
            if component.as_str() == ".." {
                return Err(PathError::Escapes(path.into_string()));
            }
        }
        Ok(Self(path))
    }

    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    pub fn join_package(&self, package: &PackageRelativePath) -> AnchoredSystemPathBuf {
        AnchoredSystemPathBuf(self.0.join(&package.0))
    }
}

impl fmt::Display for AnchoredSystemPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A path relative to a single package directory, always using `/`
/// separators regardless of host OS (build files are portable text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageRelativePath(Utf8PathBuf);

impl PackageRelativePath {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PackageRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PackageRelativePath {
    fn from(value: &str) -> Self {
        Self(Utf8PathBuf::from(value))
    }
}

/// A path resolved from a declared build input: either in-repo and anchored
/// to the repository root, or a system-absolute path that lives outside it
/// (e.g. a tool referenced by its absolute location). Kept as an enum
/// instead of collapsing both to `String` so callers can still tell which
/// kind of path they got when that matters (only an anchored path can be
/// joined under a repo root to read its contents).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedPath {
    Anchored(AnchoredSystemPathBuf),
    Absolute(AbsoluteSystemPathBuf),
}

impl ResolvedPath {
    pub fn as_str(&self) -> &str {
        match self {
            ResolvedPath::Anchored(p) => p.as_path().as_str(),
            ResolvedPath::Absolute(p) => p.as_path().as_str(),
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
