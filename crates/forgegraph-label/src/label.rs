use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ALL: &str = "all";
const HIDDEN_PREFIX: char = '_';
const ANNOTATION_DELIMITER: char = '|';
const HASH_DELIMITER: char = '#';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("empty label")]
    Empty,
    #[error("invalid label {0:?}: {1}")]
    Malformed(String, &'static str),
}

/// A build label: `(subrepo, package, name)`. Two labels are equal iff all
/// three components match — any `|`-separated annotation is stripped before
/// parsing and plays no part in identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    subrepo: String,
    package: String,
    name: String,
}

impl Label {
    pub fn new(subrepo: impl Into<String>, package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subrepo: subrepo.into(),
            package: package.into(),
            name: name.into(),
        }
    }

    pub fn subrepo(&self) -> &str {
        &self.subrepo
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_all(&self) -> bool {
        self.name == ALL
    }

    pub fn is_wildcard_subtree(&self) -> bool {
        self.name == "..."
    }

    /// A name beginning with `_` is internal to its package.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with(HIDDEN_PREFIX)
    }

    /// Strips any `#suffix` then the leading `_`, yielding the user-visible
    /// owning label of a hidden target. Returns `self` unchanged if not
    /// hidden.
    pub fn parent(&self) -> Label {
        if !self.is_hidden() {
            return self.clone();
        }
        let stripped_suffix = self
            .name
            .split_once(HASH_DELIMITER)
            .map(|(before, _)| before)
            .unwrap_or(&self.name);
        let parent_name = stripped_suffix.strip_prefix(HIDDEN_PREFIX).unwrap_or(stripped_suffix);
        Label::new(self.subrepo.clone(), self.package.clone(), parent_name)
    }

    /// Parses the label grammar, resolving a bare `:name` against
    /// `current_package` (empty subrepo). Annotations (`|...`) are stripped
    /// before parsing and discarded; `\:` is unescaped to a literal `:` so
    /// completion inputs can embed one.
    pub fn parse(raw: &str, current_package: &str) -> Result<Label, LabelError> {
        if raw.is_empty() {
            return Err(LabelError::Empty);
        }
        let raw = raw.split(ANNOTATION_DELIMITER).next().unwrap_or(raw);
        let raw = raw.replace("\\:", ":");

        let (subrepo, rest) = if let Some(after) = raw.strip_prefix("///") {
            let (subrepo, rest) = after
                .split_once("//")
                .ok_or(LabelError::Malformed(raw.clone(), "subrepo label missing //package"))?;
            (subrepo.to_string(), rest.to_string())
        } else if let Some(after) = raw.strip_prefix("//") {
            (String::new(), after.to_string())
        } else if let Some(after) = raw.strip_prefix(':') {
            return Ok(Label::new(String::new(), current_package, after));
        } else {
            return Err(LabelError::Malformed(
                raw,
                "must start with '//', '///subrepo//', or ':'",
            ));
        };

        match rest.split_once(':') {
            Some((package, name)) => Ok(Label::new(subrepo, package, name)),
            None => {
                let package = rest.trim_end_matches("/...");
                if rest.ends_with("/...") {
                    return Ok(Label::new(subrepo, package, "..."));
                }
                let name = package
                    .rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or(LabelError::Malformed(raw, "package path has no basename"))?;
                Ok(Label::new(subrepo, package, name))
            }
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.subrepo.is_empty() {
            write!(f, "///{}//", self.subrepo)?;
        } else {
            write!(f, "//")?;
        }
        write!(f, "{}:{}", self.package, self.name)
    }
}
