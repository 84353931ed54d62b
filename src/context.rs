//! Per-case test context.
//!
//! A `TestContext` bundles everything one case needs: resolved inputs, its
//! own output and log directories, and the comparison directory. Built fresh
//! per case, never shared across cases.

use crate::paths::{self, ResolvedInput};
use crate::session::RunSession;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Subdirectory of the case output directory holding captured logs.
pub const LOG_SUBDIR: &str = "captured_output";

/// Immutable per-case record of resolved paths and identity.
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Module (spec file) the case belongs to.
    pub module: String,
    /// Bare case name.
    pub test_name: String,
    /// Logical input names resolved to absolute paths.
    pub inputs: BTreeMap<String, ResolvedInput>,
    /// Materialized dataset directory.
    pub data_dir: PathBuf,
    /// Unique output directory for this case within the session.
    pub outdir: PathBuf,
    /// Log directory, a subdirectory of `outdir`, created eagerly.
    pub logdir: PathBuf,
    /// Reference directory holding expected outputs.
    pub comparison_dir: PathBuf,
}

impl TestContext {
    /// Build a context for one case. Creates the output and log
    /// directories (idempotent) and resolves `data_paths` against the
    /// session's dataset.
    pub fn build(
        session: &RunSession,
        module: &str,
        test_name: &str,
        data_paths: &BTreeMap<String, String>,
    ) -> std::io::Result<Self> {
        let outdir = session.output_root.join(module).join(test_name);
        let logdir = outdir.join(LOG_SUBDIR);
        std::fs::create_dir_all(&logdir)?;

        let inputs = paths::resolve(data_paths, &session.data_dir);

        Ok(Self {
            module: module.to_string(),
            test_name: test_name.to_string(),
            inputs,
            data_dir: session.data_dir.clone(),
            outdir,
            logdir,
            comparison_dir: session.comparison_dir.clone(),
        })
    }

    /// Field lookup for template substitution. Only declared fields and
    /// input names are addressable; `path` may carry one trailing sub-field
    /// segment for paired inputs (`anat.brik`).
    pub fn lookup(&self, path: &str) -> Option<String> {
        match path {
            "outdir" => return Some(self.outdir.display().to_string()),
            "logdir" => return Some(self.logdir.display().to_string()),
            "test_name" => return Some(self.test_name.clone()),
            "module" => return Some(self.module.clone()),
            "data_dir" => return Some(self.data_dir.display().to_string()),
            "comparison_dir" => return Some(self.comparison_dir.display().to_string()),
            _ => {}
        }

        match path.split_once('.') {
            None => self
                .inputs
                .get(path)
                .map(|input| input.primary().display().to_string()),
            Some((name, field)) => self
                .inputs
                .get(name)
                .and_then(|input| input.field(field))
                .map(|p| p.display().to_string()),
        }
    }
}
