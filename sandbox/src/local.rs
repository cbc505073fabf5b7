// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fs::File;
use std::os::unix::io::{FromRawFd, RawFd};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::resource::{setrlimit, Resource};
use parking_lot::Mutex;
use task_executor::Executor;

use crate::children::{ExitReport, ManagedChild};
use crate::{LaunchError, OutputRef, RunRequest, RunResult, RunResultKind, StdioSink, StdioSource};

/// Fired exactly once, when the first member of a pool is observed to have terminated.
pub type PoolCallback = Box<dyn FnOnce() + Send + 'static>;

///
/// Runs executables under cpu/wall/memory/process limits.
///
/// The runner is reentrant: any number of runs may be in flight concurrently, each waiting on
/// its own blocking-task thread. Limits are applied in the child between fork and exec:
/// `setsid` puts the child in a fresh process group (so teardown can kill everything it
/// spawned), and rlimits bound cpu time, address space and process count. The wall-clock limit
/// is enforced by the parent, which polls `wait4` and kills the process group on expiry.
///
#[derive(Clone)]
pub struct CommandRunner {
    executor: Executor,
}

impl CommandRunner {
    pub fn new(executor: Executor) -> CommandRunner {
        CommandRunner { executor }
    }

    ///
    /// Run one executable to completion and classify the outcome.
    ///
    pub async fn run(&self, req: RunRequest) -> Result<RunResult, LaunchError> {
        let mut results = self.run_pool(vec![req], None).await?;
        Ok(results.pop().expect("pool of one returns one result"))
    }

    ///
    /// Run a pool of executables concurrently and wait for all of them.
    ///
    /// Results are returned in request order. If a callback is given it fires exactly once,
    /// when the first child of the pool is observed to have terminated; interactive runs use
    /// this to tear down fifos so the surviving child cannot deadlock.
    ///
    /// Children are all spawned before any is awaited; a spawn failure aborts the pool (already
    /// spawned children are killed by drop) and surfaces as a `LaunchError`.
    ///
    pub async fn run_pool(
        &self,
        reqs: Vec<RunRequest>,
        callback: Option<PoolCallback>,
    ) -> Result<Vec<RunResult>, LaunchError> {
        let mut spawned = Vec::with_capacity(reqs.len());
        for req in reqs {
            let child = spawn_child(&req)?;
            log::debug!(
                "spawned {} as pid {}",
                req.executable.display(),
                child.id()
            );
            spawned.push((req, child));
        }

        let callback_slot: Arc<Mutex<Option<PoolCallback>>> = Arc::new(Mutex::new(callback));

        let waits = spawned.into_iter().map(|(req, mut child)| {
            let callback_slot = callback_slot.clone();
            let executor = self.executor.clone();
            async move {
                let deadline = (req.clock_limit > 0.0)
                    .then(|| Instant::now() + Duration::from_secs_f64(req.clock_limit));
                let report = executor
                    .spawn_blocking(
                        move || child.wait_with_deadline(deadline),
                        |join_error| Err(format!("wait task failed: {join_error}")),
                    )
                    .await;
                if let Some(callback) = callback_slot.lock().take() {
                    callback();
                }
                report.map(|report| classify(&req, &report))
            }
        });

        futures::future::join_all(waits)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, String>>()
            .map_err(|message| LaunchError {
                executable: "<pool>".into(),
                message,
            })
    }
}

fn spawn_child(req: &RunRequest) -> Result<ManagedChild, LaunchError> {
    let launch_error = |message: String| LaunchError {
        executable: req.executable.clone(),
        message,
    };

    let mut command = Command::new(&req.executable);
    command.args(&req.args);
    command.envs(&req.env);

    command.stdin(match &req.stdin {
        Some(StdioSource::File(path)) => {
            let file = File::open(path)
                .map_err(|e| launch_error(format!("cannot open stdin {}: {e}", path.display())))?;
            Stdio::from(file)
        }
        Some(StdioSource::Fd(fd)) => dup_stdio(*fd).map_err(launch_error)?,
        None => Stdio::null(),
    });
    command.stdout(match &req.stdout {
        Some(StdioSink::File(path)) => Stdio::from(create_sink(path).map_err(launch_error)?),
        Some(StdioSink::Fd(fd)) => dup_stdio(*fd).map_err(launch_error)?,
        None => Stdio::null(),
    });
    command.stderr(match &req.stderr {
        Some(path) => Stdio::from(create_sink(path).map_err(launch_error)?),
        None => Stdio::null(),
    });

    apply_rlimits(&mut command, req);

    ManagedChild::spawn(&mut command).map_err(|e| launch_error(e.to_string()))
}

fn create_sink(path: &std::path::Path) -> Result<File, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    }
    File::create(path).map_err(|e| format!("cannot create {}: {e}", path.display()))
}

fn dup_stdio(fd: RawFd) -> Result<Stdio, String> {
    // The caller keeps its own copy of the descriptor (it closes fifos in the pool teardown
    // callback), so the child gets a duplicate.
    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(format!(
            "cannot dup fd {fd}: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(unsafe { Stdio::from_raw_fd(duped) })
}

fn apply_rlimits(command: &mut Command, req: &RunRequest) {
    use std::os::unix::process::CommandExt;

    let time_limit = req.time_limit;
    let mem_limit = req.mem_limit;
    let process_limit = req.process_limit;
    unsafe {
        command.pre_exec(move || {
            let rlimit_error = |e: nix::Error| std::io::Error::other(format!("setrlimit: {e}"));
            if time_limit > 0.0 {
                // The kernel backstop: SIGXCPU at the next whole second, hard kill one second
                // later. Sub-second classification happens in the parent from measured rusage.
                let soft = time_limit.ceil() as u64;
                setrlimit(Resource::RLIMIT_CPU, soft, soft + 1).map_err(rlimit_error)?;
            }
            if mem_limit > 0 {
                let bytes = mem_limit * 1024;
                setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(rlimit_error)?;
            }
            if process_limit > 0 {
                setrlimit(Resource::RLIMIT_NPROC, process_limit, process_limit)
                    .map_err(rlimit_error)?;
            }
            Ok(())
        });
    }
}

fn classify(req: &RunRequest, report: &ExitReport) -> RunResult {
    let cpu_time = report.cpu_time;
    let cpu_secs = cpu_time.as_secs_f64();
    let stdout = match &req.stdout {
        Some(StdioSink::File(path)) => OutputRef::File(path.clone()),
        _ => OutputRef::Discarded,
    };
    let stderr = req.stderr.clone();

    let cpu_limited = req.time_limit > 0.0;
    let cpu_exceeded = cpu_limited && cpu_secs > req.time_limit;
    let cpu_signalled = match report.signal() {
        Some(sig) => {
            sig == libc::SIGXCPU
                || (sig == libc::SIGKILL && cpu_limited && cpu_secs >= req.time_limit)
        }
        None => false,
    };

    let (kind, returncode, status) = if report.wall_killed {
        (
            RunResultKind::Timeout,
            -1,
            format!("Timeout after {}ws", req.clock_limit),
        )
    } else if cpu_exceeded || cpu_signalled {
        (
            RunResultKind::Timeout,
            -1,
            format!("Timeout after {}s", req.time_limit),
        )
    } else if let Some(sig) = report.signal() {
        (RunResultKind::RuntimeError, sig, signal_status(sig))
    } else {
        let code = report.exit_code().unwrap_or(-1);
        if code == 0 {
            (
                RunResultKind::Ok,
                0,
                "Finished successfully".to_owned(),
            )
        } else {
            (
                RunResultKind::RuntimeError,
                code,
                format!("Exited with code {code}"),
            )
        }
    };

    RunResult {
        kind,
        returncode,
        time: cpu_time.into(),
        wall_time: report.wall_time.into(),
        stdout,
        stderr,
        status,
    }
}

fn signal_status(sig: i32) -> String {
    match nix::sys::signal::Signal::try_from(sig) {
        Ok(signal) => format!("Signal {sig} ({})", signal.as_str()),
        Err(_) => format!("Signal {sig}"),
    }
}
