use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use abicheck_config::PartialConfig;
use abicheck_core::{format_matrix, MatrixRow, Report, Reporter};
use abicheck_process::command_exists;
use abicheck_types::RunResult;

#[derive(Parser, Debug)]
#[command(name = "abicheck", version)]
#[command(about = "Compatibility matrix runner for a CPython C-API source checkout")]
struct Cli {
    /// Path to a config file, overriding the usual `.abicheck.toml` discovery.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and print the compatibility matrix for a source checkout.
    Run {
        /// Path to the interpreter's source repository (local clone or bare mirror).
        source: PathBuf,

        /// Where to cache worktrees, builds, and run artifacts.
        #[arg(long = "cache_dir")]
        cache_dir: Option<PathBuf>,

        /// Directory of cases (each a subdirectory with extension.c/script.py/expected.py).
        #[arg(long = "case_dir")]
        case_dir: Option<PathBuf>,

        /// Explicit commit/tag names, overriding latest-per-minor selection (repeatable).
        #[arg(long = "commit")]
        commits: Vec<String>,

        /// Cap on concurrently spawned external processes (default: cpu count, floor 2).
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Check that `git`, a C compiler, and `make` are on PATH.
    Doctor,
    /// Clone a tiny commit range, build it, and run one case end to end.
    Demo {
        /// Scratch directory for the demo's clone/cache (default: a temp dir).
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to read current directory")?;

    match cli.cmd {
        Commands::Run {
            source,
            cache_dir,
            case_dir,
            commits,
            jobs,
        } => {
            let overlay = PartialConfig {
                cache_dir,
                case_dir,
                max_parallel_processes: jobs,
                commits: if commits.is_empty() { None } else { Some(commits) },
            };
            let config = abicheck_config::load(&cwd, cli.config.as_deref(), overlay)?;

            let mut reporter = CliReporter;
            let report = Report::new(
                source,
                config.cache_dir,
                config.case_dir.unwrap_or_else(packaged_case_dir),
                config.commits,
                config.max_parallel_processes,
            )?;

            let rows = report.build_matrix(&mut reporter).await?;
            println!("{}", format_matrix(&rows));
            print_run_table(&rows);

            if any_error(&rows) {
                std::process::exit(1);
            }
        }
        Commands::Doctor => run_doctor(),
        Commands::Demo { workdir } => run_demo(workdir).await?,
    }

    Ok(())
}

/// Cases bundled with this binary, used whenever `--case_dir` is not given.
fn packaged_case_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join("..").join("demos").join("cases")
}

fn any_error(rows: &[MatrixRow]) -> bool {
    rows.iter().flat_map(|r| &r.results).any(|(_, result)| result.is_engine_error())
}

fn print_run_table(rows: &[MatrixRow]) {
    for row in rows {
        for (exec_tag, result) in &row.results {
            println!(
                "{} {} {} -> {} : {}",
                row.case, row.compile_build_tag, row.compile_option_tag, exec_tag, result
            );
        }
    }
}

fn run_doctor() {
    for cmd in ["git", "make"] {
        report_tool(cmd);
    }
    if command_exists("cc") || command_exists("gcc") {
        println!("cc/gcc: found");
    } else {
        println!("cc/gcc: MISSING (a C compiler is required to build the interpreter and test extensions)");
    }
}

fn report_tool(cmd: &str) {
    if command_exists(cmd) {
        println!("{cmd}: found");
    } else {
        println!("{cmd}: MISSING");
    }
}

/// The original `cli.py`'s built-in smoke-test flow (§2.2): clone the
/// interpreter, build a couple of recent tags, and run one packaged case
/// against them, printing the resulting matrix.
async fn run_demo(workdir: Option<PathBuf>) -> Result<()> {
    let (_keep, workdir) = match workdir {
        Some(dir) => (None, dir),
        None => {
            let tmp = tempfile_demo_dir()?;
            let path = tmp.path().to_path_buf();
            (Some(tmp), path)
        }
    };

    println!("demo workdir: {}", workdir.display());
    println!("cloning https://github.com/python/cpython into the cache and building the two latest minor releases...");

    let mut reporter = CliReporter;
    let report = Report::new(
        "https://github.com/python/cpython".into(),
        workdir.join("cache"),
        packaged_case_dir(),
        None,
        None,
    )?;

    let rows = report.build_matrix(&mut reporter).await?;
    println!("{}", format_matrix(&rows));
    print_run_table(&rows);

    if any_error(&rows) {
        anyhow::bail!("demo run produced at least one ERROR result");
    }
    Ok(())
}

fn tempfile_demo_dir() -> Result<tempfile::TempDir> {
    tempfile::tempdir().context("failed to create a scratch directory for the demo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestReporter {
        infos: Vec<String>,
        warns: Vec<String>,
        errors: Vec<String>,
    }

    impl Reporter for TestReporter {
        fn info(&mut self, msg: &str) {
            self.infos.push(msg.to_string());
        }
        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }
        fn error(&mut self, msg: &str) {
            self.errors.push(msg.to_string());
        }
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut rep = CliReporter;
        rep.info("info");
        rep.warn("warn");
        rep.error("error");
    }

    #[test]
    fn test_reporter_collects_all_levels() {
        let mut reporter = TestReporter::default();
        reporter.info("i");
        reporter.warn("w");
        reporter.error("e");
        assert_eq!(reporter.infos, vec!["i".to_string()]);
        assert_eq!(reporter.warns, vec!["w".to_string()]);
        assert_eq!(reporter.errors, vec!["e".to_string()]);
    }

    #[test]
    fn any_error_is_false_for_empty_matrix() {
        assert!(!any_error(&[]));
    }

    #[test]
    fn any_error_detects_error_result() {
        let rows = vec![MatrixRow {
            case: "c".to_string(),
            compile_build_tag: "v3.13.0".to_string(),
            compile_option_tag: "~".to_string(),
            results: vec![("v3.13.0".to_string(), RunResult::Error)],
        }];
        assert!(any_error(&rows));
    }

    #[test]
    fn any_error_is_false_when_only_expected_failures() {
        let rows = vec![MatrixRow {
            case: "c".to_string(),
            compile_build_tag: "v3.13.0".to_string(),
            compile_option_tag: "~".to_string(),
            results: vec![("v3.13.0".to_string(), RunResult::ExpectedFailure)],
        }];
        assert!(!any_error(&rows));
    }

    #[test]
    fn cli_parses_run_with_flags() {
        let cli = Cli::parse_from([
            "abicheck",
            "run",
            "/tmp/cpython",
            "--cache_dir",
            "/tmp/cache",
            "--case_dir",
            "/tmp/cases",
            "--commit",
            "v3.13.0",
            "--commit",
            "v3.12.0",
        ]);
        match cli.cmd {
            Commands::Run { source, commits, .. } => {
                assert_eq!(source, PathBuf::from("/tmp/cpython"));
                assert_eq!(commits, vec!["v3.13.0".to_string(), "v3.12.0".to_string()]);
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn cli_parses_doctor() {
        let cli = Cli::parse_from(["abicheck", "doctor"]);
        assert!(matches!(cli.cmd, Commands::Doctor));
    }
}
