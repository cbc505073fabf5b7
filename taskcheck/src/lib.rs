// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! An offline test harness for preparing programming-contest tasks.
//!
//! A task is a declarative config, a set of candidate solutions, a generator for inputs, an
//! optional validator, an optional judge, and static sample data. The harness builds every
//! participating program, generates and validates inputs, runs each solution under resource
//! limits on every applicable input, judges each output, and checks that every solution
//! attains exactly the score its author predicted.
//!
//! The heavy lifting lives in the workspace's leaf crates: the generic dependency-ordered
//! scheduler (`pipeline`), the content-addressed job cache (`cache`), and the sandboxed
//! subprocess runner (`sandbox`). This crate supplies the task semantics on top.

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

pub mod build;
pub mod cli;
pub mod completeness;
pub mod config;
pub mod context;
pub mod data;
pub mod env;
pub mod generator;
pub mod input_plan;
pub mod judge;
pub mod paths;
pub mod program;
pub mod solution;
pub mod task_job;
pub mod task_pipeline;
pub mod testcase;
pub mod testing_log;
pub mod text;
pub mod tools;
pub mod validator;
