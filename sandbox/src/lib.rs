// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod children;
mod local;

pub use crate::local::{CommandRunner, PoolCallback};

///
/// How the outcome of one sandboxed run is classified. A program that ran to completion but
/// produced a wrong answer is still `Ok` here; judging happens elsewhere.
///
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum RunResultKind {
    Ok,
    RuntimeError,
    Timeout,
}

///
/// Where a child stream was sent. `Discarded` stands in for streams wired to inherited file
/// descriptors (interactive fifos) or to the bit bucket; there is nothing to re-read afterwards.
///
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OutputRef {
    File(PathBuf),
    Discarded,
}

impl OutputRef {
    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            OutputRef::File(path) => Some(path),
            OutputRef::Discarded => None,
        }
    }
}

///
/// The structured outcome of one sandboxed run. Measured cpu and wall times are reported for
/// every kind, including timeouts.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub kind: RunResultKind,
    /// Exit code, or the signal number for signal deaths, or -1 for wall-clock kills.
    pub returncode: i32,
    pub time: concrete_time::Duration,
    pub wall_time: concrete_time::Duration,
    pub stdout: OutputRef,
    pub stderr: Option<PathBuf>,
    pub status: String,
}

impl RunResult {
    pub fn time_secs(&self) -> f64 {
        self.time.as_secs_f64()
    }

    pub fn wall_time_secs(&self) -> f64 {
        self.wall_time.as_secs_f64()
    }
}

///
/// A source for a child's stdin: a file under the task root, or an already-open descriptor
/// (the read end of an interactive fifo). Absent means /dev/null.
///
#[derive(Clone, Debug)]
pub enum StdioSource {
    File(PathBuf),
    Fd(RawFd),
}

///
/// A sink for a child's stdout: a file to create, or an already-open descriptor (the write end
/// of an interactive fifo). Absent means /dev/null.
///
#[derive(Clone, Debug)]
pub enum StdioSink {
    File(PathBuf),
    Fd(RawFd),
}

///
/// One request to run an executable under resource limits. Limits of 0 mean unlimited.
///
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Cpu-time limit in seconds.
    pub time_limit: f64,
    /// Wall-clock limit in seconds.
    pub clock_limit: f64,
    /// Address-space limit in kilobytes.
    pub mem_limit: u64,
    /// Maximum number of processes/threads.
    pub process_limit: u64,
    pub stdin: Option<StdioSource>,
    pub stdout: Option<StdioSink>,
    pub stderr: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(executable: PathBuf) -> RunRequest {
        RunRequest {
            executable,
            args: vec![],
            time_limit: 0.0,
            clock_limit: 0.0,
            mem_limit: 0,
            process_limit: 0,
            stdin: None,
            stdout: None,
            stderr: None,
            env: BTreeMap::new(),
        }
    }
}

///
/// The sandbox could not spawn the child at all: missing executable, missing interpreter,
/// unreadable binary. Distinct from every RunResult; jobs fail outright on it.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchError {
    pub executable: PathBuf,
    pub message: String,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to launch {}: {}",
            self.executable.display(),
            self.message
        )
    }
}

impl std::error::Error for LaunchError {}

#[cfg(test)]
mod local_tests;
