//! Output comparison engine.
//!
//! Walks a case's output directory and the reference comparison directory,
//! pairs files by relative path, and checks equality: byte-exact for files
//! matching a binary pattern, line-filtered for everything else. All
//! divergences across all files are collected before failing, so one run
//! shows the full extent of the damage.

use crate::context::{LOG_SUBDIR, TestContext};
use crate::schema::Compare;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// How one compared file turned out.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Match,
    Mismatch,
    MissingInOutput,
    MissingInReference,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Outcome::Match => "match",
            Outcome::Mismatch => "mismatch",
            Outcome::MissingInOutput => "missing in output",
            Outcome::MissingInReference => "missing in reference",
        };
        f.write_str(text)
    }
}

/// One file's comparison outcome.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Finding {
    /// Path relative to the output / comparison directory.
    pub path: PathBuf,
    pub outcome: Outcome,
    /// Extra detail for mismatches (first divergent line, byte sizes).
    pub detail: Option<String>,
}

/// Error from output comparison.
#[derive(Debug)]
pub enum CompareError {
    Io(std::io::Error),
    /// One or more compared files diverged. Lists every finding, not just
    /// the first.
    Diverged(Vec<Finding>),
}

impl std::fmt::Display for CompareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareError::Io(e) => write!(f, "comparison failed: {e}"),
            CompareError::Diverged(findings) => {
                writeln!(f, "{} file(s) diverged from the reference:", findings.len())?;
                for finding in findings {
                    write!(f, "  {}: {}", finding.path.display(), finding.outcome)?;
                    if let Some(detail) = &finding.detail {
                        write!(f, " ({detail})")?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompareError {}

impl From<std::io::Error> for CompareError {
    fn from(e: std::io::Error) -> Self {
        CompareError::Io(e)
    }
}

/// Compare the case's output files against the reference directory and
/// return every outcome, matches included.
pub fn compare(ctx: &TestContext, spec: &Compare) -> Result<Vec<Finding>, CompareError> {
    let mut selected = BTreeSet::new();
    collect_matching(&ctx.outdir, spec, &mut selected)?;
    collect_matching(&ctx.comparison_dir, spec, &mut selected)?;

    let mut findings = Vec::with_capacity(selected.len());
    for rel in selected {
        let produced = ctx.outdir.join(&rel);
        let reference = ctx.comparison_dir.join(&rel);

        let finding = match (produced.is_file(), reference.is_file()) {
            (false, true) => Finding {
                path: rel,
                outcome: Outcome::MissingInOutput,
                detail: None,
            },
            (true, false) => Finding {
                path: rel,
                outcome: Outcome::MissingInReference,
                detail: None,
            },
            (true, true) => {
                if matches_any(&rel, &spec.binary_patterns) {
                    compare_binary(rel, &produced, &reference)?
                } else {
                    compare_text(rel, &produced, &reference, &spec.ignore_patterns)?
                }
            }
            // Both sides gone between the walk and the check.
            (false, false) => Finding {
                path: rel,
                outcome: Outcome::MissingInOutput,
                detail: None,
            },
        };
        findings.push(finding);
    }
    Ok(findings)
}

/// Compare and fail with an aggregate error when anything diverged.
pub fn assert_outputs_match(ctx: &TestContext, spec: &Compare) -> Result<(), CompareError> {
    let findings = compare(ctx, spec)?;
    let failures: Vec<Finding> = findings
        .into_iter()
        .filter(|f| f.outcome != Outcome::Match)
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(CompareError::Diverged(failures))
    }
}

fn collect_matching(
    root: &Path,
    spec: &Compare,
    selected: &mut BTreeSet<PathBuf>,
) -> Result<(), std::io::Error> {
    let mut files = Vec::new();
    walk_files(root, root, &mut files)?;
    for rel in files {
        // Captured logs carry per-run names and are not comparable output.
        if rel.starts_with(LOG_SUBDIR) {
            continue;
        }
        if matches_any(&rel, &spec.text_patterns) || matches_any(&rel, &spec.binary_patterns) {
            selected.insert(rel);
        }
    }
    Ok(())
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

/// Whether a relative path matches any pattern. Plain patterns are
/// substring matches; patterns containing `*` or `?` match the whole
/// relative path glob-style.
fn matches_any(rel: &Path, patterns: &[String]) -> bool {
    let text = rel.to_string_lossy();
    patterns.iter().any(|pat| {
        if pat.contains('*') || pat.contains('?') {
            glob_regex(pat).is_match(&text)
        } else {
            text.contains(pat.as_str())
        }
    })
}

fn glob_regex(pattern: &str) -> regex::Regex {
    let mut expr = String::with_capacity(pattern.len() + 4);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    // The expression is built from escaped literals plus `.*`/`.` only.
    regex::Regex::new(&expr).expect("glob translation produced invalid regex")
}

fn compare_binary(
    rel: PathBuf,
    produced: &Path,
    reference: &Path,
) -> Result<Finding, std::io::Error> {
    let ours = std::fs::read(produced)?;
    let theirs = std::fs::read(reference)?;
    if ours == theirs {
        Ok(Finding {
            path: rel,
            outcome: Outcome::Match,
            detail: None,
        })
    } else {
        Ok(Finding {
            path: rel,
            outcome: Outcome::Mismatch,
            detail: Some(format!(
                "binary contents differ ({} vs {} bytes)",
                ours.len(),
                theirs.len()
            )),
        })
    }
}

fn compare_text(
    rel: PathBuf,
    produced: &Path,
    reference: &Path,
    ignore_patterns: &[String],
) -> Result<Finding, std::io::Error> {
    let ours = filtered_lines(produced, ignore_patterns)?;
    let theirs = filtered_lines(reference, ignore_patterns)?;

    if ours == theirs {
        return Ok(Finding {
            path: rel,
            outcome: Outcome::Match,
            detail: None,
        });
    }

    let detail = ours
        .iter()
        .zip(theirs.iter())
        .position(|(a, b)| a != b)
        .map(|i| format!("first differing line: {:?} vs {:?}", ours[i], theirs[i]))
        .unwrap_or_else(|| {
            format!(
                "line counts differ after filtering ({} vs {})",
                ours.len(),
                theirs.len()
            )
        });

    Ok(Finding {
        path: rel,
        outcome: Outcome::Mismatch,
        detail: Some(detail),
    })
}

/// File contents as lines, with any line containing an ignore pattern
/// removed. Tool outputs legitimately embed generation timestamps and
/// version banners that are not a correctness signal.
fn filtered_lines(path: &Path, ignore_patterns: &[String]) -> Result<Vec<String>, std::io::Error> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text
        .lines()
        .filter(|line| !ignore_patterns.iter().any(|pat| line.contains(pat.as_str())))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DEFAULT_COMPARISON_DIR, RunSession, SessionConfig};
    use tempfile::tempdir;

    fn context_in(root: &Path) -> TestContext {
        std::fs::create_dir_all(root.join("data").join(DEFAULT_COMPARISON_DIR)).unwrap();
        let session = RunSession::init(&SessionConfig {
            data_root: root.join("data"),
            remote: None,
            output_base: root.join("out"),
            comparison_override: None,
            run_slow: false,
            run_very_slow: false,
        })
        .unwrap();
        TestContext::build(&session, "mod", "case", &Default::default()).unwrap()
    }

    fn write_pair(ctx: &TestContext, rel: &str, produced: &str, reference: &str) {
        let out = ctx.outdir.join(rel);
        let cmp = ctx.comparison_dir.join(rel);
        std::fs::create_dir_all(out.parent().unwrap()).unwrap();
        std::fs::create_dir_all(cmp.parent().unwrap()).unwrap();
        std::fs::write(out, produced).unwrap();
        std::fs::write(cmp, reference).unwrap();
    }

    fn text_spec(patterns: &[&str], ignore: &[&str]) -> Compare {
        Compare {
            text_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            binary_patterns: vec![],
            ignore_patterns: ignore.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn identical_text_files_match() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(&ctx, "stats.1D", "1 2 3\n", "1 2 3\n");

        assert_outputs_match(&ctx, &text_spec(&[".1D"], &[])).unwrap();
    }

    #[test]
    fn ignore_pattern_masks_timestamp_lines() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(
            &ctx,
            "proc.log",
            "# auto-generated 2026-08-30\nresult 42\n",
            "# auto-generated 2024-01-01\nresult 42\n",
        );

        // Only the ignored line differs: equal.
        assert_outputs_match(&ctx, &text_spec(&["proc"], &["auto-gener"])).unwrap();

        // Without the ignore pattern the same pair mismatches.
        let err = assert_outputs_match(&ctx, &text_spec(&["proc"], &[])).unwrap_err();
        match err {
            CompareError::Diverged(findings) => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].outcome, Outcome::Mismatch);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn other_line_still_mismatches_despite_ignores() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(
            &ctx,
            "proc.log",
            "# auto-generated now\nresult 42\n",
            "# auto-generated then\nresult 43\n",
        );

        let err = assert_outputs_match(&ctx, &text_spec(&["proc"], &["auto-gener"])).unwrap_err();
        assert!(matches!(err, CompareError::Diverged(_)));
    }

    #[test]
    fn binary_pattern_compares_byte_exact() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        // One byte of difference in a .HEAD file.
        write_pair(&ctx, "anat+orig.HEAD", "abcdef", "abcdXf");

        let spec = Compare {
            text_patterns: vec![],
            binary_patterns: vec![".HEAD".to_string()],
            ignore_patterns: vec![],
        };
        match assert_outputs_match(&ctx, &spec).unwrap_err() {
            CompareError::Diverged(findings) => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].outcome, Outcome::Mismatch);
                assert!(findings[0].detail.as_deref().unwrap().contains("binary"));
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn missing_files_reported_per_side() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        std::fs::write(ctx.outdir.join("only_here.1D"), "x\n").unwrap();
        std::fs::write(ctx.comparison_dir.join("only_there.1D"), "y\n").unwrap();

        match assert_outputs_match(&ctx, &text_spec(&[".1D"], &[])).unwrap_err() {
            CompareError::Diverged(findings) => {
                assert_eq!(findings.len(), 2);
                let by_path = |name: &str| {
                    findings
                        .iter()
                        .find(|f| f.path == Path::new(name))
                        .unwrap()
                        .outcome
                        .clone()
                };
                assert_eq!(by_path("only_here.1D"), Outcome::MissingInReference);
                assert_eq!(by_path("only_there.1D"), Outcome::MissingInOutput);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn all_findings_aggregate_into_one_error() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(&ctx, "a.1D", "1\n", "2\n");
        write_pair(&ctx, "b.1D", "3\n", "4\n");
        write_pair(&ctx, "c.1D", "5\n", "6\n");
        std::fs::write(ctx.comparison_dir.join("d.1D"), "7\n").unwrap();

        match assert_outputs_match(&ctx, &text_spec(&[".1D"], &[])).unwrap_err() {
            CompareError::Diverged(findings) => {
                // 3 mismatches + 1 missing: exactly 4 findings, not 1.
                assert_eq!(findings.len(), 4);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_files_are_not_compared() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(&ctx, "ignored.bak", "1\n", "2\n");
        write_pair(&ctx, "checked.1D", "same\n", "same\n");

        let findings = compare(&ctx, &text_spec(&[".1D"], &[])).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path, Path::new("checked.1D"));
    }

    #[test]
    fn captured_logs_are_excluded() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        std::fs::write(ctx.logdir.join("case_stdout.log"), "run noise\n").unwrap();

        let findings = compare(&ctx, &text_spec(&["log"], &[])).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn glob_patterns_match_whole_relative_path() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(&ctx, "sub/stats.FT.txt", "ok\n", "ok\n");

        let findings = compare(&ctx, &text_spec(&["sub/*.FT.*"], &[])).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].outcome, Outcome::Match);

        // A glob that does not span the subdirectory selects nothing.
        let findings = compare(&ctx, &text_spec(&["stats.*"], &[])).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn nested_outputs_pair_by_relative_path() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        write_pair(&ctx, "FT.results/stats.FT", "x\n", "x\n");

        assert_outputs_match(&ctx, &text_spec(&[".FT"], &[])).unwrap();
    }
}
