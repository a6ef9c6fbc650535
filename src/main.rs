//! TreeRunner CLI Entry Point
//!
//! Provides command-line interface for running step trees.
//!
//! # Usage
//!
//! ```bash
//! # Run every branch of a tree
//! treerunner login.yaml
//!
//! # Only high-frequency branches of the smoke group, 8 at a time
//! treerunner login.yaml --groups smoke --min-frequency high --max-instances 8
//!
//! # Re-run what failed last time
//! treerunner login.yaml --rerun-not-passed
//! ```

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use treerunner::error::RunError;
use treerunner::execution::config::{RunConfig, CONFIG_FILE};
use treerunner::report::JsonReporter;
use treerunner::tree::BranchStatus;
use treerunner::{load_tree, Runner, ShellExecutor, Step, APP_NAME, VERSION};

/// Options that take a value and are passed through to [`RunConfig::set`].
const VALUE_OPTIONS: &[&str] = &[
    "--max-instances",
    "--groups",
    "--min-frequency",
    "--headless",
    "--server-url",
    "--step-data",
    "--max-screenshots",
    "--global",
];

/// Boolean options passed through to [`RunConfig::set`].
const FLAG_OPTIONS: &[&str] = &[
    "--no-debug",
    "--no-report",
    "--pause-on-fail",
    "--rerun-not-passed",
    "--express-debug",
];

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    tree_path: Option<String>,
    config_path: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    /// `(key, value)` pairs applied on top of the config file
    overrides: Vec<(String, String)>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Declarative Test Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: treerunner [OPTIONS] <TREE_FILE>");
    println!();
    println!("Arguments:");
    println!("  <TREE_FILE>              Path to the step tree YAML file");
    println!();
    println!("Options:");
    println!("  --max-instances N        Maximum parallel branches (default: 5)");
    println!("  --groups a,b             Only run branches in one of these groups");
    println!("  --min-frequency F        Only run branches of frequency high, med or low and up");
    println!("  --no-debug               Fail if any step has a debug or only modifier");
    println!("  --no-report              Do not write a report");
    println!("  --pause-on-fail          Pause when a step fails");
    println!("  --headless true|false    Force headless browsers on or off");
    println!("  --server-url URL         Remote browser server");
    println!("  --step-data all|fail|none");
    println!("                           Which branches keep step data and screenshots");
    println!("  --max-screenshots N      Screenshot budget, -1 for unlimited");
    println!("  --rerun-not-passed       Skip branches that passed in the last report");
    println!("  --express-debug          Do not pause before debug steps");
    println!("  --global NAME=VALUE      Global variable every branch starts with (repeatable)");
    println!("  --working-dir PATH       Directory steps run in");
    println!("  --config PATH            Config file (default: ./{})", CONFIG_FILE);
    println!("  --verbose                Enable debug logging");
    println!("  --help                   Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Examples:");
    println!("  treerunner login.yaml");
    println!("  treerunner login.yaml --groups smoke --max-instances 8");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--working-dir" | "--config" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    return Err(format!("{} requires a path argument", arg));
                };
                if arg == "--config" {
                    config.config_path = Some(PathBuf::from(value));
                } else {
                    config.working_dir = Some(PathBuf::from(value));
                }
            }
            arg if VALUE_OPTIONS.contains(&arg) => {
                i += 1;
                let Some(value) = args.get(i) else {
                    return Err(format!("{} requires a value", arg));
                };
                config.overrides.push((arg[2..].to_string(), value.clone()));
            }
            arg if FLAG_OPTIONS.contains(&arg) => {
                config.overrides.push((arg[2..].to_string(), String::new()));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.tree_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.tree_path = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Loads the config file and applies command-line overrides.
fn load_run_config(cli: &Config) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config_path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::load_or_default(&env::current_dir()?)?,
    };

    for (key, value) in &cli.overrides {
        config.set(key, value)?;
    }
    if let Some(dir) = &cli.working_dir {
        if !dir.is_dir() {
            return Err(format!("Working directory does not exist: {}", dir.display()).into());
        }
        config.working_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Reads commands from stdin while the run is paused.
///
/// Returns when the run completes, is resumed to completion, or is stopped.
fn debug_prompt(runner: &mut Runner) -> Result<(), RunError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    while runner.has_paused() {
        match runner.next_ready_step() {
            Some(step) => println!("{} {}", "Paused before:".yellow().bold(), step.text),
            None => println!("{}", "Paused at the end of the branch".yellow().bold()),
        }
        print!("[c]ontinue, [n]ext, [s]kip, [r]epeat, e[x]it, or type a step > ");
        let _ = io::stdout().flush();

        let Some(Ok(line)) = lines.next() else {
            runner.stop();
            break;
        };

        match line.trim() {
            "" | "c" => {
                runner.run()?;
            }
            "n" => {
                runner.run_one_step()?;
                print_last_step(runner.last_step());
            }
            "s" => {
                runner.skip_one_step()?;
            }
            "r" => match runner.run_last_step() {
                Ok(step) => print_step(step),
                Err(RunError::NoLastStep) => println!("No step has run yet"),
                Err(e) => return Err(e),
            },
            "x" => {
                runner.stop();
            }
            text => match runner.inject_step(Step::from_text(text, None)) {
                Ok(steps) => steps.iter().for_each(print_step),
                Err(RunError::Generation(e)) => println!("{} {}", "Error:".red(), e),
                Err(e) => return Err(e),
            },
        }
    }
    Ok(())
}

fn print_last_step(step: Option<&Step>) {
    if let Some(step) = step {
        print_step(step);
    }
}

fn print_step(step: &Step) {
    let marker = if step.state.is_skipped {
        "skipped".yellow()
    } else if !step.state.as_expected {
        "failed".red()
    } else {
        "passed".green()
    };
    println!("  {} {}", marker, step.text);
    let log = step.state.log.trim_end();
    if !log.is_empty() {
        println!("{}", log.dimmed());
    }
}

/// Prints per-status branch counts. Returns true if anything failed.
fn print_summary(runner: &Runner) -> bool {
    let tree = runner.tree();
    let count = |status: BranchStatus| tree.branches.iter().filter(|b| b.status == status).count();
    let hooks_failed = tree
        .before_everything
        .iter()
        .chain(tree.after_everything.iter())
        .any(|s| s.state.is_failed);

    let passed = count(BranchStatus::Passed);
    let failed = count(BranchStatus::Failed);
    let skipped = count(BranchStatus::Skipped);
    let not_run = tree.branches.len() - passed - failed - skipped;

    println!();
    println!(
        "{}  {}  {}  {}",
        format!("{} passed", passed).green(),
        format!("{} failed", failed).red(),
        format!("{} skipped", skipped).yellow(),
        format!("{} not run", not_run).dimmed()
    );
    if let Some(ms) = tree.elapsed.as_millis().filter(|ms| *ms >= 0) {
        println!("Finished in {:.1}s", ms as f64 / 1000.0);
    }
    if hooks_failed {
        println!("{}", "A before/after-everything hook failed".red());
    }

    failed > 0 || hooks_failed
}

/// Main application entry point. Returns true if everything passed.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(cli.verbose);

    // Print banner
    print_banner();

    let Some(tree_path) = cli.tree_path.as_deref() else {
        print_usage();
        return Err("No tree file given".into());
    };
    let config = load_run_config(&cli)?;

    // Load tree
    let tree = load_tree(tree_path).map_err(|e| {
        error!("Failed to load tree: {}", e);
        format!("Could not load tree from '{}': {}", tree_path, e)
    })?;
    info!("Tree loaded: {} step(s)", tree.step_count() - 1);

    let mut executor = ShellExecutor::new();
    if let Some(dir) = &config.working_dir {
        info!("Working directory: {}", dir.display());
        executor = executor.with_working_dir(dir);
    }

    let report_path = config.report_path.clone();
    let mut runner = Runner::new(tree, config, Arc::new(executor))?
        .with_reporter(Box::new(JsonReporter::new(&report_path)));

    if runner.tree().branches.is_empty() {
        warn!("No branches to run");
    }

    // Execute
    runner.run()?;
    debug_prompt(&mut runner)?;

    Ok(!print_summary(&runner))
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("treerunner")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_tree_path_and_options() {
        let config = parse_arguments(&args(&[
            "login.yaml",
            "--max-instances",
            "3",
            "--no-debug",
            "--verbose",
        ]))
        .unwrap();

        assert_eq!(config.tree_path.as_deref(), Some("login.yaml"));
        assert!(config.verbose);
        assert_eq!(
            config.overrides,
            vec![
                ("max-instances".to_string(), "3".to_string()),
                ("no-debug".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_overrides_apply_to_run_config() {
        let cli = parse_arguments(&args(&["t.yaml", "--step-data", "fail", "--pause-on-fail"]))
            .unwrap();
        let mut config = RunConfig::default();
        for (key, value) in &cli.overrides {
            config.set(key, value).unwrap();
        }
        assert!(config.pause_on_fail);
        assert_eq!(config.step_data_mode, treerunner::tree::StepDataMode::Fail);
    }

    #[test]
    fn test_repeated_globals() {
        let cli = parse_arguments(&args(&[
            "t.yaml",
            "--global",
            "user=ann",
            "--global",
            "env=staging",
        ]))
        .unwrap();
        let mut config = RunConfig::default();
        for (key, value) in &cli.overrides {
            config.set(key, value).unwrap();
        }
        assert_eq!(config.global_init.len(), 2);
        assert_eq!(config.global_init["env"], "staging");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--max-instances"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b.yaml"])).is_err());
        assert!(parse_arguments(&args(&["--config"])).is_err());
    }
}
