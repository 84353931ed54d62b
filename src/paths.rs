//! Input path resolution.
//!
//! Maps logical input names to absolute paths inside a dataset root. A path
//! spec ending in `.HEAD` denotes a header/data file pair and resolves to
//! both members. No existence check happens here; a missing input surfaces
//! as a failure of the command under test, not of resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A resolved input: a single file or a header/data pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedInput {
    File(PathBuf),
    Paired { head: PathBuf, brik: PathBuf },
}

impl ResolvedInput {
    /// The path substituted when the input is referenced without a
    /// sub-field. For a pair, the header.
    pub fn primary(&self) -> &Path {
        match self {
            ResolvedInput::File(p) => p,
            ResolvedInput::Paired { head, .. } => head,
        }
    }

    /// Sub-field lookup for template substitution (`head` / `brik`).
    pub fn field(&self, name: &str) -> Option<&Path> {
        match (self, name) {
            (ResolvedInput::Paired { head, .. }, "head") => Some(head),
            (ResolvedInput::Paired { brik, .. }, "brik") => Some(brik),
            _ => None,
        }
    }
}

/// Resolve one dataset-relative path spec against the dataset root.
pub fn resolve_one(spec: &str, data_root: &Path) -> ResolvedInput {
    let resolved = data_root.join(spec);
    if resolved.extension().is_some_and(|e| e == "HEAD") {
        let mut brik = resolved.clone();
        brik.set_extension("BRIK");
        ResolvedInput::Paired {
            head: resolved,
            brik,
        }
    } else {
        ResolvedInput::File(resolved)
    }
}

/// Resolve a whole `data_paths` declaration.
pub fn resolve(
    data_paths: &BTreeMap<String, String>,
    data_root: &Path,
) -> BTreeMap<String, ResolvedInput> {
    data_paths
        .iter()
        .map(|(name, spec)| (name.clone(), resolve_one(spec, data_root)))
        .collect()
}
