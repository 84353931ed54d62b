//! Run session state.
//!
//! A session is initialized once per harness invocation: it fixes the
//! timestamped output root, ensures the reference dataset, and resolves the
//! comparison directory up front so a misconfiguration fails before any
//! case runs. Teardown prints the output root exactly once.

use crate::dataset::{DatasetError, DatasetProvider};
use std::path::{Path, PathBuf};

/// Everything a session needs to start, gathered from the suite config and
/// command-line flags.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local dataset directory.
    pub data_root: PathBuf,
    /// Remote URL for fetching an absent dataset.
    pub remote: Option<String>,
    /// Base directory under which the timestamped output root is created.
    pub output_base: PathBuf,
    /// Explicit comparison directory, overriding the default under the
    /// dataset root.
    pub comparison_override: Option<PathBuf>,
    /// Run slow-marked cases.
    pub run_slow: bool,
    /// Run very-slow-marked cases.
    pub run_very_slow: bool,
}

/// Error from session initialization.
#[derive(Debug)]
pub enum SessionError {
    Dataset(DatasetError),
    /// The comparison directory does not exist.
    ComparisonDirMissing(PathBuf),
    Io(std::io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Dataset(e) => write!(f, "{e}"),
            SessionError::ComparisonDirMissing(path) => {
                write!(f, "the comparison directory {} does not exist", path.display())
            }
            SessionError::Io(e) => write!(f, "session setup failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<DatasetError> for SessionError {
    fn from(e: DatasetError) -> Self {
        SessionError::Dataset(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// Default comparison directory name inside the dataset root.
pub const DEFAULT_COMPARISON_DIR: &str = "sample_test_output";

/// Process-wide state for one harness invocation.
#[derive(Debug)]
pub struct RunSession {
    /// Session start timestamp, `%Y_%m_%d_%H%M%S`.
    pub started: String,
    /// Fresh directory all case output is written under.
    pub output_root: PathBuf,
    /// Materialized dataset directory.
    pub data_dir: PathBuf,
    /// Reference directory holding expected output files.
    pub comparison_dir: PathBuf,
    pub run_slow: bool,
    pub run_very_slow: bool,
}

impl RunSession {
    /// Initialize a session: ensure the dataset, create the timestamped
    /// output root, and resolve the comparison directory (fail fast when it
    /// is missing rather than at comparison time).
    pub fn init(config: &SessionConfig) -> Result<Self, SessionError> {
        let provider = DatasetProvider::new(config.data_root.clone(), config.remote.clone());
        Self::init_with_provider(config, &provider)
    }

    /// Initialization with an explicit dataset provider (tests inject fake
    /// fetchers through this).
    pub fn init_with_provider(
        config: &SessionConfig,
        provider: &DatasetProvider,
    ) -> Result<Self, SessionError> {
        // Resolved inputs are substituted into commands that may run from a
        // different working directory, so the dataset path must be absolute.
        let data_dir = std::path::absolute(provider.ensure()?)?;

        let started = chrono::Local::now().format("%Y_%m_%d_%H%M%S").to_string();
        let output_root =
            std::path::absolute(config.output_base.join(format!("output_{started}")))?;
        std::fs::create_dir_all(&output_root)?;

        let comparison_dir = Self::resolve_comparison_dir(
            config.comparison_override.as_deref(),
            &data_dir,
        )?;

        Ok(Self {
            started,
            output_root,
            data_dir,
            comparison_dir,
            run_slow: config.run_slow,
            run_very_slow: config.run_very_slow,
        })
    }

    fn resolve_comparison_dir(
        comparison_override: Option<&Path>,
        data_dir: &Path,
    ) -> Result<PathBuf, SessionError> {
        let dir = match comparison_override {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => data_dir.join(p),
            None => data_dir.join(DEFAULT_COMPARISON_DIR),
        };
        let dir = std::path::absolute(dir)?;
        if !dir.exists() {
            return Err(SessionError::ComparisonDirMissing(dir));
        }
        Ok(dir)
    }

    /// Teardown report: prints where this session's output went. Called
    /// once, unconditionally, at the end of the invocation.
    pub fn report(&self) {
        println!("Test output is written to: {}", self.output_root.display());
    }
}
