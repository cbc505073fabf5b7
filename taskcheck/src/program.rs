// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Running built programs under the sandbox: limit resolution, request assembly, and the
//! failure formatting shared by everything that launches a child.

use std::collections::BTreeMap;

use pipeline::Failure;
use sandbox::{RunRequest, RunResult, RunResultKind, StdioSink, StdioSource};

use crate::config::ProgramKind;
use crate::context::JobCtx;
use crate::paths::TaskPath;
use crate::task_job::TaskJobFiles;
use crate::text::tab;

/// Resolve the staged executable for a program name, failing if the build never produced it.
pub fn load_executable(ctx: &mut JobCtx<'_>, program: &str) -> Result<TaskPath, Failure> {
    let executable = TaskPath::executable(program);
    let present = executable.as_path().is_file() || executable.as_path().is_dir();
    if !present {
        return Err(Failure::new(format!(
            "Program {executable} does not exist, although it should have been built already."
        )));
    }
    if executable.as_path().is_file() {
        ctx.access_file(&executable);
    } else {
        // A staged directory runs through its `run` entry.
        ctx.access_file(executable.join("run"));
    }
    Ok(executable)
}

/// The path actually handed to exec: the artifact itself, or its `run` entry for staged
/// directories.
pub fn exec_path(executable: &TaskPath) -> TaskPath {
    if executable.as_path().is_dir() {
        executable.join("run")
    } else {
        executable.clone()
    }
}

///
/// Assemble a sandbox request for a program of the given kind, with the configured limits
/// attached. A CLI-level timeout override replaces the configured cpu limit for solutions.
///
pub fn build_request(
    ctx: &mut JobCtx<'_>,
    kind: ProgramKind,
    program: &str,
    args: Vec<String>,
    stdin: Option<&TaskPath>,
    stdout: Option<&TaskPath>,
    stderr: Option<&TaskPath>,
    env: BTreeMap<String, String>,
) -> Result<RunRequest, Failure> {
    let executable = load_executable(ctx, program)?;

    let limits = ctx.context().env().limits(kind);
    let mut time_limit = limits.time_limit;
    if kind.is_solution() {
        if let Some(timeout) = ctx.context().env().timeout() {
            time_limit = timeout;
        }
    }

    let mut request = RunRequest::new(exec_path(&executable).into());
    request.args = args;
    request.time_limit = time_limit;
    request.clock_limit = limits.clock_limit(Some(time_limit));
    request.mem_limit = limits.mem_limit;
    request.process_limit = limits.process_limit;
    request.env = env;

    if let Some(stdin) = stdin {
        ctx.access_file(stdin);
        request.stdin = Some(StdioSource::File(stdin.as_path().to_owned()));
    }
    if let Some(stdout) = stdout {
        ctx.access_file(stdout);
        request.stdout = Some(StdioSink::File(stdout.as_path().to_owned()));
    }
    if let Some(stderr) = stderr {
        ctx.access_file(stderr);
        request.stderr = Some(stderr.as_path().to_owned());
    }
    Ok(request)
}

///
/// Run one program to completion under the sandbox. Launch failures (missing binary,
/// unreadable interpreter) fail the job outright; resource or exit classification comes back
/// as the RunResult.
///
pub fn run_program(
    ctx: &mut JobCtx<'_>,
    kind: ProgramKind,
    program: &str,
    args: Vec<String>,
    stdin: Option<&TaskPath>,
    stdout: Option<&TaskPath>,
    stderr: Option<&TaskPath>,
    env: BTreeMap<String, String>,
) -> Result<RunResult, Failure> {
    let request = build_request(ctx, kind, program, args, stdin, stdout, stderr, env)?;
    let runner = ctx.context().runner().clone();
    ctx.context()
        .block_on(runner.run(request))
        .map_err(|launch_error| Failure::new(launch_error.to_string()))
}

/// Format a RunResult for a failure message: status line plus quoted stderr tail.
pub fn format_run_result(ctx: &mut JobCtx<'_>, result: &RunResult) -> String {
    let mut message = format!("status: {}", result.status);
    if let Some(stdout) = result.stdout.file() {
        let stdout = TaskPath::new(stdout);
        if stdout.exists() {
            message.push_str(&format!("\nstdout: {}", ctx.quote_file(&stdout)));
        }
    }
    if let Some(stderr) = &result.stderr {
        let stderr = TaskPath::new(stderr);
        if stderr.exists() {
            message.push_str(&format!("\nstderr: {}", ctx.quote_file(&stderr)));
        }
    }
    message
}

/// A Failure that quotes the offending run.
pub fn program_failure(ctx: &mut JobCtx<'_>, message: &str, result: &RunResult) -> Failure {
    Failure::new(format!("{message}\n{}", tab(&format_run_result(ctx, result))))
}

/// A synthetic OK RunResult for judging contexts with no actual solution run (samples).
pub fn synthetic_ok() -> RunResult {
    RunResult {
        kind: RunResultKind::Ok,
        returncode: 0,
        time: concrete_time::Duration::new(0, 0),
        wall_time: concrete_time::Duration::new(0, 0),
        stdout: sandbox::OutputRef::Discarded,
        stderr: None,
        status: "Finished successfully".to_owned(),
    }
}
