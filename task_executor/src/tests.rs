// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Executor;

#[tokio::test]
async fn spawn_and_join() {
    let executor = Executor::new();
    let forty_two = executor.spawn(async { 42 }, |e| panic!("join error: {e}")).await;
    assert_eq!(forty_two, 42);
}

#[tokio::test]
async fn spawn_blocking_runs_off_thread() {
    let executor = Executor::new();
    let thread_id = executor
        .spawn_blocking(|| std::thread::current().id(), |e| panic!("join error: {e}"))
        .await;
    assert_ne!(thread_id, std::thread::current().id());
}

#[test]
fn owned_runtime_block_on() {
    let executor = Executor::new_owned(2).unwrap();
    let value = executor.block_on(async { 7 * 6 });
    assert_eq!(value, 42);
    executor.shutdown(std::time::Duration::from_secs(1));
}
