use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::label::Label;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackageError {
    #[error("output {output:?} is already produced by target {existing}")]
    DuplicateOutput { output: String, existing: String },
}

/// Identifies a package uniquely within the whole repo, subrepos included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageKey {
    pub subrepo: String,
    pub path: String,
}

impl PackageKey {
    pub fn new(subrepo: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            subrepo: subrepo.into(),
            path: path.into(),
        }
    }
}

/// A parsed build-file's declarations: the targets it registered, the
/// subincludes it referenced, and an output-name index enforcing that no two
/// targets in the package claim the same output file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Package {
    pub key: Option<PackageKey>,
    pub filename: String,
    target_order: Vec<Label>,
    pub subincludes: Vec<Label>,
    output_owners: BTreeMap<String, Label>,
}

impl Package {
    pub fn new(key: PackageKey, filename: impl Into<String>) -> Self {
        Self {
            key: Some(key),
            filename: filename.into(),
            target_order: Vec::new(),
            subincludes: Vec::new(),
            output_owners: BTreeMap::new(),
        }
    }

    pub fn targets(&self) -> &[Label] {
        &self.target_order
    }

    /// Registers `label` as declaring `outputs`. Fails if any output name is
    /// already claimed by a different target (invariant 2: every declared
    /// output maps back to exactly one owning target).
    pub fn register_target(&mut self, label: Label, outputs: &[String]) -> Result<(), PackageError> {
        for output in outputs {
            if let Some(existing) = self.output_owners.get(output) {
                if existing != &label {
                    return Err(PackageError::DuplicateOutput {
                        output: output.clone(),
                        existing: existing.to_string(),
                    });
                }
            }
        }
        for output in outputs {
            self.output_owners.insert(output.clone(), label.clone());
        }
        if !self.target_order.contains(&label) {
            self.target_order.push(label);
        }
        Ok(())
    }

    pub fn owner_of(&self, output: &str) -> Option<&Label> {
        self.output_owners.get(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_targets_in_insertion_order() {
        let mut pkg = Package::new(PackageKey::new("", "pkg"), "BUILD");
        pkg.register_target(Label::new("", "pkg", "a"), &[]).unwrap();
        pkg.register_target(Label::new("", "pkg", "b"), &[]).unwrap();
        assert_eq!(pkg.targets(), &[Label::new("", "pkg", "a"), Label::new("", "pkg", "b")]);
    }

    #[test]
    fn duplicate_output_from_different_target_is_rejected() {
        let mut pkg = Package::new(PackageKey::new("", "pkg"), "BUILD");
        pkg.register_target(Label::new("", "pkg", "a"), &["out.bin".to_string()])
            .unwrap();
        let err = pkg
            .register_target(Label::new("", "pkg", "b"), &["out.bin".to_string()])
            .unwrap_err();
        assert!(matches!(err, PackageError::DuplicateOutput { .. }));
    }

    #[test]
    fn same_target_reclaiming_its_own_output_is_fine() {
        let mut pkg = Package::new(PackageKey::new("", "pkg"), "BUILD");
        pkg.register_target(Label::new("", "pkg", "a"), &["out.bin".to_string()])
            .unwrap();
        pkg.register_target(Label::new("", "pkg", "a"), &["out.bin".to_string()])
            .unwrap();
        assert_eq!(pkg.owner_of("out.bin"), Some(&Label::new("", "pkg", "a")));
    }
}
