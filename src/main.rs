mod compare;
mod context;
mod dataset;
mod filter;
mod loader;
mod paths;
mod runner;
mod schema;
mod session;
mod template;

use clap::{Parser, Subcommand, ValueEnum};
use context::TestContext;
use filter::Decision;
use runner::CommandRunner;
use schema::{Case, SuiteConfig, Workdir};
use session::{RunSession, SessionConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use template::Scope;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
}

#[derive(Parser)]
#[command(name = "refcheck")]
#[command(about = "A reference-output test harness for command-line analysis tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute case specs
    Run {
        /// Path to case specs (file or directory)
        path: PathBuf,
        /// Run slow cases (execution time on the order of many seconds)
        #[arg(long = "runslow")]
        run_slow: bool,
        /// Run very slow cases (execution time on the order of minutes to
        /// hours); implies --runslow
        #[arg(long = "runveryslow")]
        run_very_slow: bool,
        /// Compare against a previous session's output directory instead of
        /// the default reference location
        #[arg(long = "diff-with-outdir")]
        diff_with_outdir: Option<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Filter cases by name pattern (substring match)
        #[arg(short, long)]
        filter: Option<String>,
        /// Show verbose output (substituted commands)
        #[arg(short, long)]
        verbose: bool,
    },
    /// Validate case specs without running them
    Validate {
        /// Path to case specs (file or directory)
        path: PathBuf,
    },
    /// Scaffold a new case-spec file
    Init {
        /// Output path for the new spec file
        #[arg(default_value = "cases/example.yaml")]
        path: PathBuf,
    },
    /// Output the case-spec schema (for AI consumers)
    Schema,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            path,
            run_slow,
            run_very_slow,
            diff_with_outdir,
            output,
            filter,
            verbose,
        } => {
            let code = cmd_run(
                &path,
                run_slow,
                run_very_slow,
                diff_with_outdir,
                output,
                filter.as_deref(),
                verbose,
            );
            std::process::exit(code);
        }
        Command::Validate { path } => {
            std::process::exit(cmd_validate(&path));
        }
        Command::Init { path } => {
            std::process::exit(cmd_init(&path));
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            let json = serde_json::to_string_pretty(&schema).expect("Failed to serialize schema");
            println!("{json}");
        }
    }
}

/// Result of one case, as reported.
#[derive(Debug, serde::Serialize)]
struct CaseOutcome {
    module: String,
    name: String,
    status: CaseStatus,
    #[serde(serialize_with = "serialize_duration")]
    duration: Duration,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "detail")]
enum CaseStatus {
    Passed,
    Failed(Vec<String>),
    Skipped(String),
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

fn cmd_run(
    path: &Path,
    run_slow: bool,
    run_very_slow: bool,
    diff_with_outdir: Option<PathBuf>,
    output: OutputFormat,
    filter: Option<&str>,
    verbose: bool,
) -> i32 {
    // Determine the suite root for the suite config
    let suite_root = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };

    let suite_config = match loader::load_suite_config(suite_root) {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error loading suite config: {e}");
            return 1;
        }
    };

    let session_config = session_config_for(
        suite_root,
        &suite_config,
        diff_with_outdir,
        run_slow,
        run_very_slow,
    );

    // The dataset and previous session output may contain YAML/TOML files
    // of their own; they are never case specs.
    let exclude = [
        session_config.data_root.clone(),
        session_config.output_base.clone(),
    ];
    let spec_paths = match loader::find_specs(path, &exclude) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error finding specs: {e}");
            return 1;
        }
    };

    if spec_paths.is_empty() {
        eprintln!("No spec files found at: {}", path.display());
        return 1;
    }
    let session = match RunSession::init(&session_config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error starting session: {e}");
            return 1;
        }
    };

    let mut outcomes: Vec<(PathBuf, Vec<CaseOutcome>)> = Vec::new();
    let mut load_failures = 0;

    for spec_path in &spec_paths {
        let spec = match loader::load_spec(spec_path) {
            Ok(spec) => spec,
            Err(e) => {
                eprintln!("✗ Failed to load {}: {e}", spec_path.display());
                load_failures += 1;
                continue;
            }
        };
        let module = loader::module_name(&spec, spec_path);

        let mut file_outcomes = Vec::new();
        for case in &spec.cases {
            if let Some(f) = filter
                && !case.name.contains(f)
            {
                continue;
            }

            let start = Instant::now();
            let status = match filter::decide(case.marker, session.run_slow, session.run_very_slow)
            {
                Decision::Skip(reason) => CaseStatus::Skipped(reason),
                Decision::Run => {
                    let failures = run_case(
                        &session,
                        &suite_config.env,
                        &module,
                        &spec.data_paths,
                        case,
                        verbose,
                    );
                    if failures.is_empty() {
                        CaseStatus::Passed
                    } else {
                        CaseStatus::Failed(failures)
                    }
                }
            };
            file_outcomes.push(CaseOutcome {
                module: module.clone(),
                name: case.name.clone(),
                status,
                duration: start.elapsed(),
            });
        }
        outcomes.push((spec_path.clone(), file_outcomes));
    }

    let mut total_passed = 0;
    let mut total_failed = load_failures;
    let mut total_skipped = 0;

    for (spec_path, file_outcomes) in &outcomes {
        if matches!(output, OutputFormat::Human) && !file_outcomes.is_empty() {
            println!("\n{}", spec_path.display());
        }
        for outcome in file_outcomes {
            match &outcome.status {
                CaseStatus::Passed => {
                    total_passed += 1;
                    if matches!(output, OutputFormat::Human) {
                        println!("  ✓ {} ({:.2?})", outcome.name, outcome.duration);
                    }
                }
                CaseStatus::Failed(failures) => {
                    total_failed += 1;
                    if matches!(output, OutputFormat::Human) {
                        println!("  ✗ {} ({:.2?})", outcome.name, outcome.duration);
                        for failure in failures {
                            for line in failure.lines() {
                                println!("    {line}");
                            }
                        }
                    }
                }
                CaseStatus::Skipped(reason) => {
                    total_skipped += 1;
                    if matches!(output, OutputFormat::Human) {
                        println!("  - {} (skipped: {reason})", outcome.name);
                    }
                }
            }
        }
    }

    match output {
        OutputFormat::Human => {
            println!("\n{total_passed} passed, {total_failed} failed, {total_skipped} skipped");
        }
        OutputFormat::Json => {
            let results: Vec<serde_json::Value> = outcomes
                .iter()
                .map(|(spec_path, file_outcomes)| {
                    serde_json::json!({
                        "file": spec_path.display().to_string(),
                        "cases": file_outcomes,
                    })
                })
                .collect();
            let doc = serde_json::json!({
                "passed": total_passed,
                "failed": total_failed,
                "skipped": total_skipped,
                "results": results,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&doc).expect("Failed to serialize")
            );
        }
    }

    // Teardown: always say where the output went, pass or fail.
    session.report();

    if total_failed > 0 { 1 } else { 0 }
}

fn session_config_for(
    suite_root: &Path,
    config: &SuiteConfig,
    diff_with_outdir: Option<PathBuf>,
    run_slow: bool,
    run_very_slow: bool,
) -> SessionConfig {
    let anchor = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            suite_root.join(p)
        }
    };

    let data_root = config
        .dataset
        .root
        .as_deref()
        .map(anchor)
        .unwrap_or_else(|| suite_root.join("test_data"));
    let output_base = config
        .output_root
        .as_deref()
        .map(anchor)
        .unwrap_or_else(|| suite_root.join("output_of_tests"));

    // CLI override wins over the suite config.
    let comparison_override = diff_with_outdir.or_else(|| config.comparison_dir.clone());

    SessionConfig {
        data_root,
        remote: config.dataset.remote.clone(),
        output_base,
        comparison_override,
        run_slow,
        run_very_slow,
    }
}

/// Run one case end to end: build its context, execute the command, compare
/// outputs. Returns every failure message, empty when the case passed.
fn run_case(
    session: &RunSession,
    suite_env: &BTreeMap<String, String>,
    module: &str,
    data_paths: &BTreeMap<String, String>,
    case: &Case,
    verbose: bool,
) -> Vec<String> {
    let mut failures = Vec::new();

    let ctx = match TestContext::build(session, module, &case.name, data_paths) {
        Ok(ctx) => ctx,
        Err(e) => {
            failures.push(format!("Failed to set up test context: {e}"));
            return failures;
        }
    };

    let scope = Scope::with_data(&ctx).vars(&case.vars);

    let mut runner = CommandRunner::new()
        .envs(suite_env)
        .envs(&case.env)
        .merge_streams(case.merge_streams);
    match &case.workdir {
        Some(Workdir::Outdir) => runner = runner.workdir(&ctx.outdir),
        Some(Workdir::Path(p)) => runner = runner.workdir(p),
        None => {}
    }

    match runner.run(&case.cmd, &scope) {
        Ok(out) => {
            if verbose {
                println!("  $ {}", out.command);
            }
        }
        Err(e) => {
            // A failed command makes the outputs meaningless; skip comparison.
            failures.push(e.to_string());
            return failures;
        }
    }

    if let Some(cmp) = &case.compare
        && !cmp.is_empty()
        && let Err(e) = compare::assert_outputs_match(&ctx, cmp)
    {
        failures.push(e.to_string());
    }

    failures
}

fn cmd_validate(path: &Path) -> i32 {
    let suite_root = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    let suite_config = match loader::load_suite_config(suite_root) {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error loading suite config: {e}");
            return 1;
        }
    };
    let session_config = session_config_for(suite_root, &suite_config, None, false, false);
    let exclude = [session_config.data_root, session_config.output_base];

    let specs = match loader::find_specs(path, &exclude) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error finding specs: {e}");
            return 1;
        }
    };

    if specs.is_empty() {
        eprintln!("No spec files found at: {}", path.display());
        return 1;
    }

    let mut errors = 0;
    for spec_path in &specs {
        match loader::load_spec(spec_path) {
            Ok(spec) => {
                println!("✓ {} ({} cases)", spec_path.display(), spec.cases.len());
            }
            Err(e) => {
                eprintln!("✗ {}: {e}", spec_path.display());
                errors += 1;
            }
        }
    }

    if errors > 0 {
        eprintln!("\n{errors} spec(s) failed validation");
        return 1;
    }
    println!("\nAll {} spec(s) valid", specs.len());
    0
}

fn cmd_init(path: &Path) -> i32 {
    let template = r#"version: 1

# Logical input names resolved inside the reference dataset.
# A path ending in .HEAD resolves to a header/data pair.
data_paths:
  events: study6/FT/AV1_vis.txt

cases:
  - name: example_case
    vars:
      subj: FT
    cmd: |
      analysis_tool
        -subject {subj}
        -events {data.events}
        -prefix {data.outdir}/result
    compare:
      text_patterns: ["result"]
      ignore_patterns: ["auto-gener"]
"#;
    if path.exists() {
        eprintln!("Error: file already exists: {}", path.display());
        return 1;
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Error creating directory: {e}");
        return 1;
    }
    if let Err(e) = std::fs::write(path, template) {
        eprintln!("Error writing file: {e}");
        return 1;
    }
    println!("Created: {}", path.display());
    0
}
