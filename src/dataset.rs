//! Reference dataset acquisition.
//!
//! Ensures the versioned reference dataset exists locally, fetching it from
//! a remote on first use. Fetch backends are probed in preference order;
//! a backend that is not installed is skipped, while a backend that fails
//! mid-fetch is a hard error.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Advisory appended to acquisition errors. Parallel workers can race each
/// other to the same dataset directory; one sequential run materializes it.
const SEQUENTIAL_HINT: &str = "running the tests sequentially once may help";

/// Error from ensuring a dataset is present.
#[derive(Debug)]
pub enum DatasetError {
    /// The target directory appeared partway through a fetch, most likely a
    /// concurrent install from another test worker.
    Conflict { path: PathBuf, detail: String },
    /// No usable fetch backend, or the fetch itself failed.
    Unavailable { detail: String },
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetError::Conflict { path, detail } => write!(
                f,
                "dataset conflict at {}: {detail}; {SEQUENTIAL_HINT}",
                path.display()
            ),
            DatasetError::Unavailable { detail } => {
                write!(f, "dataset unavailable: {detail}; {SEQUENTIAL_HINT}")
            }
        }
    }
}

impl std::error::Error for DatasetError {}

/// Failure modes a fetch backend can report.
#[derive(Debug)]
pub enum FetchError {
    /// The backend refused because the destination already exists.
    AlreadyExists,
    /// The remote could not be found.
    NotFound(String),
    /// Any other fetch failure.
    Failed(String),
}

/// A fetch-and-install backend for versioned datasets.
pub trait Fetcher {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Whether the backend's tooling is usable on this host. Distinct from
    /// fetch failure: an unsupported backend is skipped, a failing one is not.
    fn available(&self) -> bool;

    /// Install the dataset at `dest` from `url`.
    fn install(&self, dest: &Path, url: &str) -> Result<(), FetchError>;
}

/// Fetches through the `datalad` CLI. Preferred because it restricts the
/// amount of data downloaded.
pub struct DataladFetcher;

impl Fetcher for DataladFetcher {
    fn name(&self) -> &'static str {
        "datalad"
    }

    fn available(&self) -> bool {
        tool_available("datalad")
    }

    fn install(&self, dest: &Path, url: &str) -> Result<(), FetchError> {
        run_fetch_tool("datalad", &["install", "-s", url], dest)
    }
}

/// Fetches with a plain `git clone`.
pub struct GitFetcher;

impl Fetcher for GitFetcher {
    fn name(&self) -> &'static str {
        "git"
    }

    fn available(&self) -> bool {
        tool_available("git")
    }

    fn install(&self, dest: &Path, url: &str) -> Result<(), FetchError> {
        run_fetch_tool("git", &["clone", url], dest)
    }
}

fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn run_fetch_tool(tool: &str, args: &[&str], dest: &Path) -> Result<(), FetchError> {
    let output = Command::new(tool)
        .args(args)
        .arg(dest)
        .output()
        .map_err(|e| FetchError::Failed(format!("could not invoke {tool}: {e}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.contains("already exists") {
        Err(FetchError::AlreadyExists)
    } else if stderr.contains("not found") || stderr.contains("could not be found") {
        Err(FetchError::NotFound(stderr.to_string()))
    } else {
        Err(FetchError::Failed(format!(
            "{tool} exited with {:?}: {stderr}",
            output.status.code()
        )))
    }
}

/// The default backend preference order.
pub fn default_fetchers() -> Vec<Box<dyn Fetcher>> {
    vec![Box::new(DataladFetcher), Box::new(GitFetcher)]
}

/// Ensures a reference dataset is materialized locally.
pub struct DatasetProvider {
    root: PathBuf,
    remote: Option<String>,
    fetchers: Vec<Box<dyn Fetcher>>,
}

impl DatasetProvider {
    pub fn new(root: PathBuf, remote: Option<String>) -> Self {
        Self {
            root,
            remote,
            fetchers: default_fetchers(),
        }
    }

    /// Replace the fetch backends (used by tests and embedders).
    pub fn with_fetchers(mut self, fetchers: Vec<Box<dyn Fetcher>>) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Ensure the dataset directory exists, fetching it if absent.
    ///
    /// Idempotent: an existing directory is returned as-is, no re-fetch.
    pub fn ensure(&self) -> Result<PathBuf, DatasetError> {
        if self.root.exists() {
            return Ok(self.root.clone());
        }

        let url = self.remote.as_deref().ok_or_else(|| DatasetError::Unavailable {
            detail: format!(
                "{} is missing and no dataset remote is configured",
                self.root.display()
            ),
        })?;

        for fetcher in &self.fetchers {
            if !fetcher.available() {
                continue;
            }
            return match fetcher.install(&self.root, url) {
                Ok(()) => Ok(self.root.clone()),
                Err(FetchError::AlreadyExists) => Err(DatasetError::Conflict {
                    path: self.root.clone(),
                    detail: format!("{} reports the target already exists", fetcher.name()),
                }),
                Err(FetchError::NotFound(detail)) => Err(DatasetError::Unavailable {
                    detail: format!("{} could not reach {url}: {detail}", fetcher.name()),
                }),
                Err(FetchError::Failed(detail)) => {
                    // A partial directory left behind by a concurrent fetch
                    // shows up as a late failure with the path now present.
                    if self.root.exists() {
                        Err(DatasetError::Conflict {
                            path: self.root.clone(),
                            detail,
                        })
                    } else {
                        Err(DatasetError::Unavailable {
                            detail: format!("{} failed: {detail}", fetcher.name()),
                        })
                    }
                }
            };
        }

        Err(DatasetError::Unavailable {
            detail: "no supported fetch tool (datalad or git) found on PATH".to_string(),
        })
    }
}
