// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The command-line surface: argument parsing, the task-directory lock, and the run loop
//! that drives the pipeline and maps its outcome to the process exit code.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use cache::Cache;
use pipeline::LoggingSink;
use task_executor::Executor;

use crate::config::{ConfigError, TaskConfig};
use crate::context::Ctx;
use crate::env::{Env, RunSettings, TestingTarget};
use crate::paths::INTERNALS_DIR;
use crate::task_pipeline::build_task_pipeline;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_LOCKED: i32 = 2;

const WORKER_THREADS: usize = 2;

#[derive(Parser)]
#[command(name = "taskcheck", about = "Offline test harness for contest task preparation")]
struct Cli {
    /// Task directory to operate on.
    #[arg(long, default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build everything, generate and validate inputs, run and judge every solution, and
    /// check each against its declared expectation.
    Test {
        /// Run every item to completion instead of stopping at the first failure.
        #[arg(long)]
        full: bool,

        /// Treat warnings as failures.
        #[arg(long)]
        strict: bool,

        /// Test only the named solutions (repeatable).
        #[arg(long = "solution")]
        solutions: Vec<String>,

        /// Override the configured solution time limit, in seconds.
        #[arg(long)]
        timeout: Option<f64>,

        /// Write testing_log.json with per-input timings and verdicts.
        #[arg(long)]
        testing_log: bool,

        /// Keep running all inputs even when a test's outcome is already settled.
        #[arg(long)]
        all_inputs: bool,

        /// Repeat the whole run this many times with fresh generator seeds.
        #[arg(long, default_value = "1")]
        repeat: u64,
    },

    /// Only generate and validate inputs.
    Gen {
        #[arg(long)]
        strict: bool,

        #[arg(long, default_value = "1")]
        repeat: u64,
    },
}

///
/// The single-writer advisory lock: abort if present, create on entry, remove on clean exit.
///
struct TaskLock {
    path: PathBuf,
}

impl TaskLock {
    fn acquire() -> Result<TaskLock, i32> {
        let path = Path::new(INTERNALS_DIR).join("lock");
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(TaskLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                eprintln!(
                    "Another taskcheck instance is running in this directory (lockfile '{}').",
                    path.display()
                );
                Err(EXIT_LOCKED)
            }
            Err(e) => {
                eprintln!("Cannot create lockfile '{}': {e}", path.display());
                Err(EXIT_FAILURE)
            }
        }
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub fn main() -> i32 {
    // Staged tools re-invoke this binary under their own names.
    let args: Vec<String> = std::env::args().collect();
    let invoked_as = Path::new(&args[0])
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    if let Some(code) = crate::tools::dispatch_tool(invoked_as, &args[1..]) {
        return code;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let (target, settings_base) = match cli.command {
        Command::Test {
            full,
            strict,
            solutions,
            timeout,
            testing_log,
            all_inputs,
            repeat,
        } => (
            TestingTarget::All,
            (full, strict, solutions, timeout, testing_log, all_inputs, repeat),
        ),
        Command::Gen { strict, repeat } => (
            TestingTarget::Generator,
            (false, strict, vec![], None, false, false, repeat),
        ),
    };
    let (full, strict, solutions, timeout, testing_log, all_inputs, repeat) = settings_base;

    if let Err(e) = std::env::set_current_dir(&cli.path) {
        eprintln!("Cannot enter task directory {}: {e}", cli.path.display());
        return EXIT_FAILURE;
    }

    let config = match TaskConfig::load(Path::new(".")) {
        Ok(config) => config,
        Err(ConfigError { message }) => {
            eprintln!("config error: {message}");
            return EXIT_FAILURE;
        }
    };

    let selected = match select_solutions(&config, &solutions) {
        Ok(selected) => selected,
        Err(message) => {
            eprintln!("{message}");
            return EXIT_FAILURE;
        }
    };

    let _lock = match TaskLock::acquire() {
        Ok(lock) => lock,
        Err(code) => return code,
    };

    let executor = match Executor::new_owned(WORKER_THREADS) {
        Ok(executor) => executor,
        Err(message) => {
            eprintln!("{message}");
            return EXIT_FAILURE;
        }
    };

    let mut exit = EXIT_OK;
    for iteration in 0..repeat {
        let settings = RunSettings {
            target,
            full,
            strict,
            testing_log,
            solutions: selected.clone(),
            timeout,
            all_inputs,
            iteration,
        };
        let env = Env::new(settings, config.clone());
        let run_env = match env.fork() {
            Ok(forked) => forked.lock(),
            Err(message) => {
                eprintln!("{message}");
                exit = EXIT_FAILURE;
                break;
            }
        };
        let ctx = Ctx::new(run_env, executor.clone());

        let mut cache = match Cache::open(Path::new(INTERNALS_DIR).join("cache")) {
            Ok(cache) => cache,
            Err(e) => {
                eprintln!("Cannot open cache: {e}");
                exit = EXIT_FAILURE;
                break;
            }
        };

        let mut pipeline = build_task_pipeline(ctx.env());
        let failed = pipeline.run(&ctx, &mut cache, &mut LoggingSink);
        for (item, message) in pipeline.failures() {
            eprintln!("\"{item}\": {message}");
        }
        if failed {
            exit = EXIT_FAILURE;
            break;
        }
    }

    executor.shutdown(std::time::Duration::from_secs(5));
    exit
}

/// Expand the CLI's solution selection against the config, keeping config order.
fn select_solutions(config: &TaskConfig, requested: &[String]) -> Result<Vec<String>, String> {
    if requested.is_empty() {
        return Ok(config.solutions.keys().cloned().collect());
    }
    let mut unknown = Vec::new();
    for name in requested {
        if !config.solutions.contains_key(name) {
            unknown.push(name.clone());
        }
    }
    if !unknown.is_empty() {
        return Err(format!("Unknown solutions: {}", unknown.join(", ")));
    }
    let mut selected: Vec<String> = config
        .solutions
        .keys()
        .filter(|name| requested.contains(*name))
        .cloned()
        .collect();
    // The primary solution is always tested: its outputs are the reference outputs.
    if let Some(primary) = config.primary_solution() {
        if !selected.contains(&primary.name) {
            selected.insert(0, primary.name.clone());
        }
    }
    Ok(selected)
}
