//! Command execution engine.
//!
//! Runs the tool under test through a shell, captures its streams to log
//! files in the case's log directory, and turns a non-zero exit into the
//! canonical "tool failed" error.

use crate::template::{self, Scope, TemplateError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable pinning the tool's internal thread count. Always set
/// to 1: tools that size thread pools from the ambient CPU count produce
/// output that differs across machines.
pub const THREAD_LIMIT_VAR: &str = "OMP_NUM_THREADS";

/// Captured result of one command invocation.
#[derive(Debug)]
pub struct CmdOutput {
    /// The command after substitution and whitespace collapsing.
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Log file the stdout stream was written to.
    pub stdout_log: PathBuf,
    /// Log file for stderr; absent when streams were merged or stderr was
    /// empty.
    pub stderr_log: Option<PathBuf>,
}

/// Error from running a command.
#[derive(Debug)]
pub enum RunError {
    /// The scope has no bound test context. A caller-usage error, raised
    /// before any side effects.
    MissingContext,
    /// Template substitution failed.
    Template(TemplateError),
    /// Filesystem trouble around log capture or directory changes.
    Io(std::io::Error),
    /// The shell itself could not be spawned.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The tool under test exited non-zero. Logs are already flushed when
    /// this is raised.
    ExitStatus {
        command: String,
        code: i32,
        stdout_log: PathBuf,
    },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::MissingContext => write!(
                f,
                "a test context must be bound to the scope (under the name \
                 '{}') before running a command",
                template::CONTEXT_VAR
            ),
            RunError::Template(e) => write!(f, "{e}"),
            RunError::Io(e) => write!(f, "command setup failed: {e}"),
            RunError::Spawn { command, source } => {
                write!(f, "failed to spawn shell for '{command}': {source}")
            }
            RunError::ExitStatus {
                command,
                code,
                stdout_log,
            } => write!(
                f,
                "command exited with code {code}: {command} (stdout captured \
                 at {})",
                stdout_log.display()
            ),
        }
    }
}

impl std::error::Error for RunError {}

impl From<TemplateError> for RunError {
    fn from(e: TemplateError) -> Self {
        RunError::Template(e)
    }
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        RunError::Io(e)
    }
}

/// Restores the previous working directory when dropped, so the change
/// holds for the duration of one command run under every exit path.
struct CwdGuard {
    prev: PathBuf,
}

impl CwdGuard {
    fn enter(dir: &Path) -> std::io::Result<Self> {
        let prev = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        Ok(Self { prev })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.prev);
    }
}

/// Configurable one-shot command runner.
#[derive(Debug, Default)]
pub struct CommandRunner {
    extra_env: BTreeMap<String, String>,
    merge_streams: bool,
    workdir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one extra environment variable for the child.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.insert(key.to_string(), value.to_string());
        self
    }

    /// Layer a map of extra environment variables onto the child.
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        for (k, v) in vars {
            self.extra_env.insert(k.clone(), v.clone());
        }
        self
    }

    /// Interleave stderr into the stdout stream (no separate stderr log).
    pub fn merge_streams(mut self, merge: bool) -> Self {
        self.merge_streams = merge;
        self
    }

    /// Working directory for the command. Defaults to the process's current
    /// directory; when set, the change is scoped to the run and restored
    /// afterwards.
    pub fn workdir(mut self, dir: &Path) -> Self {
        self.workdir = Some(dir.to_path_buf());
        self
    }

    /// Format the template against the scope, execute it through a shell,
    /// and capture its output to uniquely-named log files.
    pub fn run(&self, cmd_template: &str, scope: &Scope) -> Result<CmdOutput, RunError> {
        let ctx = scope.data().ok_or(RunError::MissingContext)?;
        let command = template::substitute(cmd_template, scope)?;

        std::fs::create_dir_all(&ctx.logdir)?;
        let stdout_log = uniquify(ctx.logdir.join(format!("{}_stdout.log", ctx.test_name)));
        let stderr_log = sibling_stderr(&stdout_log);

        // Stream merging happens in the shell so the interleaving matches
        // what a terminal would show.
        let shell_cmd = if self.merge_streams {
            format!("{command} 2>&1")
        } else {
            command.clone()
        };

        let _guard = match &self.workdir {
            Some(dir) => Some(CwdGuard::enter(dir)?),
            None => None,
        };

        let mut child = Command::new("sh");
        child.arg("-c").arg(&shell_cmd);
        child.env(THREAD_LIMIT_VAR, "1");
        for (k, v) in &self.extra_env {
            child.env(k, v);
        }

        let output = child.output().map_err(|e| RunError::Spawn {
            command: command.clone(),
            source: e,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        std::fs::write(&stdout_log, &stdout)?;
        let stderr_log = if !self.merge_streams && !stderr.is_empty() {
            std::fs::write(&stderr_log, &stderr)?;
            Some(stderr_log)
        } else {
            None
        };

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(RunError::ExitStatus {
                command,
                code: exit_code,
                stdout_log,
            });
        }

        Ok(CmdOutput {
            command,
            exit_code,
            stdout,
            stderr,
            stdout_log,
            stderr_log,
        })
    }
}

/// Return `path` unchanged if free, otherwise the first `stem_<n>.ext`
/// variant that does not exist yet. Never overwrites an existing log.
fn uniquify(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut n = 1u32;
    loop {
        let candidate = parent.join(format!("{stem}_{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Derive the stderr log path from the (already uniquified) stdout one.
fn sibling_stderr(stdout_log: &Path) -> PathBuf {
    let name = stdout_log
        .file_name()
        .map(|s| s.to_string_lossy().replace("_stdout", "_stderr"))
        .unwrap_or_else(|| "stderr.log".to_string());
    stdout_log.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;
    use crate::session::{DEFAULT_COMPARISON_DIR, RunSession, SessionConfig};
    use std::sync::Mutex;
    use tempfile::tempdir;

    // The cwd change is process-global; tests that exercise it must not
    // overlap.
    static CWD_LOCK: Mutex<()> = Mutex::new(());

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

    #[test]
    fn captures_stdout_to_log() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let out = CommandRunner::new().run("echo hello", &scope).unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(
            std::fs::read_to_string(&out.stdout_log).unwrap(),
            "hello\n"
        );
        // Empty stderr produces no stderr file.
        assert!(out.stderr_log.is_none());
    }

    #[test]
    fn writes_stderr_log_when_nonempty() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let out = CommandRunner::new().run("echo oops >&2", &scope).unwrap();
        let stderr_log = out.stderr_log.expect("stderr log should exist");
        assert_eq!(std::fs::read_to_string(&stderr_log).unwrap(), "oops\n");
        assert!(
            stderr_log
                .file_name()
                .unwrap()
                .to_string_lossy()
                .contains("_stderr")
        );
    }

    #[test]
    fn merge_streams_interleaves_into_stdout() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let out = CommandRunner::new()
            .merge_streams(true)
            .run("echo out && echo err >&2", &scope)
            .unwrap();
        assert!(out.stdout.contains("out"));
        assert!(out.stdout.contains("err"));
        assert!(out.stderr_log.is_none());
    }

    #[test]
    fn nonzero_exit_raises_with_code_and_command() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        match CommandRunner::new().run("echo partial && exit 3", &scope) {
            Err(RunError::ExitStatus {
                command,
                code,
                stdout_log,
            }) => {
                assert_eq!(code, 3);
                assert_eq!(command, "echo partial && exit 3");
                // Logs are flushed before the error is raised.
                assert_eq!(
                    std::fs::read_to_string(&stdout_log).unwrap(),
                    "partial\n"
                );
            }
            other => panic!("expected exit-status error, got {other:?}"),
        }
    }

    #[test]
    fn repeated_runs_never_overwrite_logs() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);
        let runner = CommandRunner::new();

        let first = runner.run("echo one", &scope).unwrap();
        let second = runner.run("echo two", &scope).unwrap();
        assert_ne!(first.stdout_log, second.stdout_log);
        assert_eq!(std::fs::read_to_string(&first.stdout_log).unwrap(), "one\n");
        assert_eq!(
            std::fs::read_to_string(&second.stdout_log).unwrap(),
            "two\n"
        );
    }

    #[test]
    fn missing_context_is_a_usage_error() {
        let scope = Scope::new().var("subj", "FT");
        assert!(matches!(
            CommandRunner::new().run("echo {subj}", &scope),
            Err(RunError::MissingContext)
        ));
    }

    #[test]
    fn thread_limit_is_pinned() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let out = CommandRunner::new()
            .run("echo $OMP_NUM_THREADS", &scope)
            .unwrap();
        assert_eq!(out.stdout, "1\n");
    }

    #[test]
    fn extra_env_layers_on_top() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let out = CommandRunner::new()
            .env("REFCHECK_TEST_VALUE", "marker")
            .run("echo $REFCHECK_TEST_VALUE", &scope)
            .unwrap();
        assert_eq!(out.stdout, "marker\n");
    }

    #[test]
    fn workdir_applies_for_the_run() {
        let _lock = CWD_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let before = std::env::current_dir().unwrap();
        let out = CommandRunner::new()
            .workdir(&ctx.outdir)
            .run("pwd", &scope)
            .unwrap();
        assert_eq!(
            std::fs::canonicalize(out.stdout.trim()).unwrap(),
            std::fs::canonicalize(&ctx.outdir).unwrap()
        );
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn workdir_restored_after_command_failure() {
        let _lock = CWD_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let before = std::env::current_dir().unwrap();
        let result = CommandRunner::new()
            .workdir(&ctx.outdir)
            .run("exit 1", &scope);
        assert!(result.is_err());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn workdir_untouched_when_template_fails() {
        let _lock = CWD_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path());
        let scope = Scope::with_data(&ctx);

        let before = std::env::current_dir().unwrap();
        let result = CommandRunner::new()
            .workdir(&ctx.outdir)
            .run("tool {undeclared}", &scope);
        assert!(matches!(result, Err(RunError::Template(_))));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn uniquify_appends_increasing_suffix() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("case_stdout.log");

        assert_eq!(uniquify(base.clone()), base);
        std::fs::write(&base, "").unwrap();
        let second = uniquify(base.clone());
        assert_eq!(second, dir.path().join("case_stdout_1.log"));
        std::fs::write(&second, "").unwrap();
        assert_eq!(uniquify(base), dir.path().join("case_stdout_2.log"));
    }

    #[test]
    fn sibling_stderr_swaps_stream_name() {
        assert_eq!(
            sibling_stderr(Path::new("/logs/case_stdout_1.log")),
            PathBuf::from("/logs/case_stderr_1.log")
        );
    }
}
