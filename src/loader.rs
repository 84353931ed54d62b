//! Case-spec file loader.
//!
//! Discovers and parses case specification files and the suite
//! configuration from disk.

use crate::schema::{CaseSpec, SuiteConfig};
use std::path::{Path, PathBuf};

/// Error type for spec loading operations.
#[derive(Debug)]
pub enum LoadError {
    /// Failed to read the file.
    Io(std::io::Error),
    /// Failed to parse YAML.
    Yaml(serde_yaml::Error),
    /// Failed to parse TOML.
    Toml(toml::de::Error),
    /// Unsupported file extension.
    UnsupportedFormat(String),
    /// Spec file declares no cases.
    NoCases(PathBuf),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "failed to read file: {e}"),
            LoadError::Yaml(e) => write!(f, "invalid YAML: {e}"),
            LoadError::Toml(e) => write!(f, "invalid TOML: {e}"),
            LoadError::UnsupportedFormat(ext) => {
                write!(
                    f,
                    "unsupported file format: {ext} (expected .yaml, .yml, or .toml)"
                )
            }
            LoadError::NoCases(path) => {
                write!(f, "{} declares no cases", path.display())
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// The name of the suite configuration file.
pub const SUITE_CONFIG_FILENAME: &str = "refcheck.yaml";

/// Load a case spec from a file path.
pub fn load_spec(path: &Path) -> Result<CaseSpec, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(LoadError::Io)?;

    let spec: CaseSpec = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(LoadError::Yaml)?,
        "toml" => toml::from_str(&contents).map_err(LoadError::Toml)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };

    if spec.cases.is_empty() {
        return Err(LoadError::NoCases(path.to_path_buf()));
    }
    Ok(spec)
}

/// Load suite configuration from a directory.
///
/// Looks for `refcheck.yaml` in the given directory.
/// Returns `None` if the file doesn't exist, `Err` if it exists but is invalid.
pub fn load_suite_config(dir: &Path) -> Result<Option<SuiteConfig>, LoadError> {
    let config_path = dir.join(SUITE_CONFIG_FILENAME);

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&config_path).map_err(LoadError::Io)?;
    let config: SuiteConfig = serde_yaml::from_str(&contents).map_err(LoadError::Yaml)?;
    Ok(Some(config))
}

/// Module name for a spec file: explicit override, or the file stem with a
/// leading `test_` stripped.
pub fn module_name(spec: &CaseSpec, path: &Path) -> String {
    if let Some(name) = &spec.module {
        return name.clone();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("spec");
    stem.strip_prefix("test_").unwrap_or(stem).to_string()
}

/// Find all spec files in a directory or return the single file.
///
/// Directories in `exclude` are not descended into: the dataset root and
/// the session output base legitimately contain YAML/TOML files that are
/// not case specs.
pub fn find_specs(path: &Path, exclude: &[PathBuf]) -> Result<Vec<PathBuf>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let excluded: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|p| std::path::absolute(p).ok())
        .collect();

    let mut specs = Vec::new();
    collect_specs_recursive(path, &excluded, &mut specs)?;
    specs.sort();
    Ok(specs)
}

fn collect_specs_recursive(
    dir: &Path,
    excluded: &[PathBuf],
    specs: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            let abs = std::path::absolute(&path)?;
            if excluded.iter().any(|e| e == &abs) {
                continue;
            }
            collect_specs_recursive(&path, excluded, specs)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && (ext == "yaml" || ext == "yml" || ext == "toml")
        {
            // Skip suite config file
            if path.file_name().is_some_and(|f| f == SUITE_CONFIG_FILENAME) {
                continue;
            }
            specs.push(path);
        }
    }
    Ok(())
}
