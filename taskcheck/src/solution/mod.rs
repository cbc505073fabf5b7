// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

pub mod manager;
pub mod result;
#[allow(clippy::module_inception)]
pub mod solution;
pub mod verdicts;
