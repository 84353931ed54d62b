//! Schema definitions for refcheck case-spec files.
//!
//! This module defines the structure of test case specification files and
//! the suite configuration file. Specs are written in YAML or TOML and
//! validated against these types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Suite-level configuration loaded from `refcheck.yaml` in the suite root.
///
/// Names the reference dataset, where session output goes, and where expected
/// outputs live.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SuiteConfig {
    /// Schema version (must match crate major version).
    #[serde(default = "default_version")]
    pub version: u32,

    /// Reference dataset location and remote.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Directory holding expected output files. Relative paths resolve
    /// against the dataset root. Defaults to `sample_test_output` inside the
    /// dataset root.
    #[serde(default)]
    pub comparison_dir: Option<PathBuf>,

    /// Base directory for session output. Each session writes into a fresh
    /// `output_<timestamp>` subdirectory of this. Defaults to
    /// `output_of_tests` in the suite root.
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    /// Environment variables applied to every command in the suite.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    1
}

/// Where the reference dataset lives locally and how to fetch it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DatasetConfig {
    /// Local dataset directory. Relative paths resolve against the suite
    /// root. Defaults to `test_data` in the suite root.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Remote URL the dataset is fetched from when the local directory is
    /// absent. Without this, a missing dataset is unrecoverable.
    #[serde(default)]
    pub remote: Option<String>,
}

/// Root document for a case specification file.
///
/// One file groups the cases for a single tool or workflow under test; the
/// file name (with any `test_` prefix stripped) names the module's output
/// subdirectory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CaseSpec {
    /// Schema version (must match crate major version).
    pub version: u32,

    /// Module name override. Defaults to the spec file stem with a leading
    /// `test_` stripped.
    #[serde(default)]
    pub module: Option<String>,

    /// Logical input names mapped to dataset-relative paths. A path ending
    /// in `.HEAD` resolves to a header/data file pair.
    #[serde(default)]
    pub data_paths: BTreeMap<String, String>,

    /// The cases defined in this file.
    pub cases: Vec<Case>,
}

/// A single test case: one command invocation plus output comparison.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Case {
    /// Unique name for this case within its module.
    pub name: String,

    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,

    /// Cost tier controlling default skip behavior.
    #[serde(default)]
    pub marker: Marker,

    /// Extra string variables substitutable into the command template
    /// alongside the bound context.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Command template. May span multiple lines for readability; runs of
    /// whitespace collapse to single spaces before execution. Placeholders
    /// use `{var}` for case vars and `{data.field}` for context fields.
    pub cmd: String,

    /// Additional environment variables for this command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Interleave stderr into the stdout stream (no separate stderr log).
    #[serde(default)]
    pub merge_streams: bool,

    /// Working directory for the command: "outdir" for the case output
    /// directory, or an explicit path. Defaults to the harness's current
    /// directory.
    #[serde(default)]
    pub workdir: Option<Workdir>,

    /// Output comparison against the reference directory. Omit to skip
    /// comparison (the case then only checks the exit code).
    #[serde(default)]
    pub compare: Option<Compare>,
}

/// Cost tier of a test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// Runs on every invocation.
    #[default]
    Normal,
    /// Execution time on the order of many seconds; needs `--runslow`.
    Slow,
    /// Execution time on the order of minutes to hours; needs `--runveryslow`.
    VerySlow,
}

/// Working directory selection for a case command.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(from = "String", into = "String")]
pub enum Workdir {
    /// Run inside the case's output directory.
    Outdir,
    /// Run inside a specific path.
    Path(PathBuf),
}

impl From<String> for Workdir {
    fn from(s: String) -> Self {
        if s == "outdir" {
            Workdir::Outdir
        } else {
            Workdir::Path(PathBuf::from(s))
        }
    }
}

impl From<Workdir> for String {
    fn from(w: Workdir) -> String {
        match w {
            Workdir::Outdir => "outdir".to_string(),
            Workdir::Path(p) => p.display().to_string(),
        }
    }
}

/// Output comparison configuration for a case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Compare {
    /// Patterns selecting output files compared line-by-line. Plain
    /// patterns match as substrings of the relative path; patterns with
    /// `*` or `?` match glob-style.
    #[serde(default)]
    pub text_patterns: Vec<String>,

    /// Patterns selecting output files compared byte-exact.
    #[serde(default)]
    pub binary_patterns: Vec<String>,

    /// Lines containing any of these substrings are dropped from both sides
    /// before text comparison (generation timestamps, version banners).
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Compare {
    /// Whether any selection pattern is configured at all.
    pub fn is_empty(&self) -> bool {
        self.text_patterns.is_empty() && self.binary_patterns.is_empty()
    }
}

/// Generate the JSON Schema for case specification files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(CaseSpec)
}
