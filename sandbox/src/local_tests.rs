// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use task_executor::Executor;
use tempfile::TempDir;

use crate::{CommandRunner, OutputRef, RunRequest, RunResultKind, StdioSink, StdioSource};

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "{body}").unwrap();
    drop(f);
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn runner() -> CommandRunner {
    CommandRunner::new(Executor::new())
}

#[tokio::test]
async fn successful_exit() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "ok.sh", "exit 0");
    let result = runner().run(RunRequest::new(exe)).await.unwrap();
    assert_eq!(result.kind, RunResultKind::Ok);
    assert_eq!(result.returncode, 0);
    assert_eq!(result.status, "Finished successfully");
}

#[tokio::test]
async fn nonzero_exit_is_runtime_error() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "fail.sh", "exit 3");
    let result = runner().run(RunRequest::new(exe)).await.unwrap();
    assert_eq!(result.kind, RunResultKind::RuntimeError);
    assert_eq!(result.returncode, 3);
    assert_eq!(result.status, "Exited with code 3");
}

#[tokio::test]
async fn signal_death_reports_symbolic_name() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "selfkill.sh", "kill -TERM $$");
    let result = runner().run(RunRequest::new(exe)).await.unwrap();
    assert_eq!(result.kind, RunResultKind::RuntimeError);
    assert_eq!(result.returncode, libc::SIGTERM);
    assert!(result.status.contains("SIGTERM"), "{}", result.status);
}

#[tokio::test]
async fn wall_clock_timeout() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "sleep.sh", "sleep 5");
    let mut req = RunRequest::new(exe);
    req.clock_limit = 0.3;
    let result = runner().run(req).await.unwrap();
    assert_eq!(result.kind, RunResultKind::Timeout);
    assert!(result.status.ends_with("ws"), "{}", result.status);
    assert!(result.wall_time_secs() < 5.0);
}

#[tokio::test]
async fn stdio_redirection() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "cat.sh", "cat; echo err >&2");
    let input = dir.path().join("input.txt");
    std::fs::write(&input, "1 2\n").unwrap();
    let stdout = dir.path().join("out.txt");
    let stderr = dir.path().join("err.txt");

    let mut req = RunRequest::new(exe);
    req.stdin = Some(StdioSource::File(input));
    req.stdout = Some(StdioSink::File(stdout.clone()));
    req.stderr = Some(stderr.clone());
    let result = runner().run(req).await.unwrap();

    assert_eq!(result.kind, RunResultKind::Ok);
    assert_eq!(result.stdout, OutputRef::File(stdout.clone()));
    assert_eq!(std::fs::read_to_string(&stdout).unwrap(), "1 2\n");
    assert_eq!(std::fs::read_to_string(&stderr).unwrap(), "err\n");
}

#[tokio::test]
async fn missing_executable_is_launch_error() {
    let err = runner()
        .run(RunRequest::new(PathBuf::from("/nonexistent/program")))
        .await
        .expect_err("want LaunchError");
    assert_eq!(err.executable, PathBuf::from("/nonexistent/program"));
}

#[tokio::test]
async fn measures_time_for_every_kind() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "sleep.sh", "sleep 0.2");
    let result = runner().run(RunRequest::new(exe)).await.unwrap();
    assert!(result.wall_time_secs() >= 0.2);
}

#[tokio::test]
async fn pool_callback_fires_exactly_once() {
    let dir = TempDir::new().unwrap();
    let fast = script(&dir, "fast.sh", "exit 0");
    let slow = script(&dir, "slow.sh", "sleep 0.4");

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = fired.clone();
    let results = runner()
        .run_pool(
            vec![RunRequest::new(fast), RunRequest::new(slow)],
            Some(Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.kind == RunResultKind::Ok));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "echo.sh", "echo hi");
    let runner = runner();
    let (a, b) = futures::future::join(
        runner.run(RunRequest::new(exe.clone())),
        runner.run(RunRequest::new(exe)),
    )
    .await;
    assert_eq!(a.unwrap().kind, RunResultKind::Ok);
    assert_eq!(b.unwrap().kind, RunResultKind::Ok);
}
