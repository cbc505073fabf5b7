// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Data plumbing jobs and the inputs manager: static inputs land in `tests/_inputs/`, every
//! solution sees its inputs through symlinks in its own directory, and the per-test input
//! plan is computed once and consumed by everything downstream.

use std::collections::BTreeMap;

use pipeline::{Failure, Job, Manager};

use crate::config::TaskType;
use crate::context::{BatchCtx, JobCtx, JobResult, ManagerCtx, TaskSpec};
use crate::paths::TaskPath;
use crate::task_job::TaskJobFiles;
use crate::testcase::{TestcaseInfo, PROBE_SEED};
use crate::tools;

/// Hard-link one static file into the shared input directory.
pub struct LinkDataJob {
    source: TaskPath,
    destination: TaskPath,
}

impl LinkDataJob {
    pub fn new(source: TaskPath, destination: TaskPath) -> LinkDataJob {
        LinkDataJob {
            source,
            destination,
        }
    }
}

impl Job<TaskSpec> for LinkDataJob {
    fn name(&self) -> String {
        format!("Link {} to {}", self.source, self.destination)
    }

    fn args(&self) -> Vec<String> {
        vec![self.source.to_string(), self.destination.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let source = self.source.clone();
        let destination = self.destination.clone();
        ctx.link_file(&source, &destination)?;
        Ok(JobResult::None)
    }
}

/// Symlink a shared input into a solution's own directory: each input file is produced once,
/// then referenced everywhere it is consumed.
pub struct SymlinkDataJob {
    source: TaskPath,
    destination: TaskPath,
}

impl SymlinkDataJob {
    pub fn new(source: TaskPath, destination: TaskPath) -> SymlinkDataJob {
        SymlinkDataJob {
            source,
            destination,
        }
    }
}

impl Job<TaskSpec> for SymlinkDataJob {
    fn name(&self) -> String {
        format!("Symlink {} to {}", self.source, self.destination)
    }

    fn args(&self) -> Vec<String> {
        vec![self.source.to_string(), self.destination.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let source = self.source.clone();
        let destination = self.destination.clone();
        ctx.symlink_file(&source, &destination)?;
        Ok(JobResult::None)
    }
}

const MEGABYTE: u64 = 1024 * 1024;

/// Check that a data file stays under a megabyte cap.
pub struct DataSmallJob {
    data: TaskPath,
    max_size_mb: u64,
    what: &'static str,
}

impl DataSmallJob {
    pub fn input(data: TaskPath, max_size_mb: u64) -> DataSmallJob {
        DataSmallJob {
            data,
            max_size_mb,
            what: "Input",
        }
    }

    pub fn output(data: TaskPath, max_size_mb: u64) -> DataSmallJob {
        DataSmallJob {
            data,
            max_size_mb,
            what: "Output",
        }
    }
}

impl Job<TaskSpec> for DataSmallJob {
    fn name(&self) -> String {
        format!(
            "{} {} is smaller than {}MB",
            self.what,
            self.data.name(),
            self.max_size_mb
        )
    }

    fn args(&self) -> Vec<String> {
        vec![self.data.to_string(), self.max_size_mb.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let data = self.data.clone();
        let size = ctx.file_size(&data)?;
        if size > self.max_size_mb * MEGABYTE {
            return Err(Failure::new(format!(
                "{} {} is bigger than {}MB: {}MB",
                self.what,
                self.data,
                self.max_size_mb,
                size.div_ceil(MEGABYTE)
            )));
        }
        Ok(JobResult::None)
    }
}

///
/// Check that a text-format file is already canonical: sanitizing it through the text
/// preprocessor must be the identity.
///
pub struct IsCleanJob {
    data: TaskPath,
}

impl IsCleanJob {
    pub fn new(data: TaskPath) -> IsCleanJob {
        IsCleanJob { data }
    }
}

impl Job<TaskSpec> for IsCleanJob {
    fn name(&self) -> String {
        format!("Check {} is clean", self.data.name())
    }

    fn args(&self) -> Vec<String> {
        vec![self.data.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let data = self.data.clone();
        let sanitized = data.to_sanitized();
        let output = tools::run_tool(ctx, tools::TEXT_PREPROC, &[], Some(&data), Some(&sanitized))?;
        if output.status.code() != Some(tools::EXIT_ACCEPT) {
            return Err(tools::quote_tool_failure(
                &format!("Text preprocessor failed on file {}", self.data),
                &output,
            ));
        }
        if !ctx.files_equal(&data, &sanitized)? {
            return Err(Failure::new(format!(
                "File {} is not clean. Check encoding, missing newline at the end or \\r.",
                self.data.name()
            )));
        }
        Ok(JobResult::None)
    }
}

///
/// The inputs manager: links static data into place, merges static inputs with the
/// generator's listing, assigns every testcase to the tests whose globs match it, and
/// publishes the per-test plan.
///
pub struct InputsManager;

impl InputsManager {
    fn static_inputs(&self, static_dir: &TaskPath) -> Result<Vec<String>, Failure> {
        let pattern = static_dir.join("*.in");
        let mut names = Vec::new();
        let paths = glob::glob(&pattern.to_string())
            .map_err(|e| Failure::new(format!("bad static glob: {e}")))?;
        for path in paths.flatten() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Manager<TaskSpec> for InputsManager {
    fn name(&self) -> String {
        "Process inputs".to_owned()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        let env = ctx.context().env();
        let static_dir = env.static_dir();
        let task_type = env.task_type();

        let static_names = self.static_inputs(&static_dir)?;

        // Static inputs (and their reference outputs, for non-interactive tasks) are linked
        // into the shared input directory.
        for name in &static_names {
            ctx.add_job(LinkDataJob::new(
                static_dir.join(name),
                TaskPath::input_path(name, None),
            ));

            if task_type == TaskType::Batch {
                let output_name = format!("{}.out", name.trim_end_matches(".in"));
                let static_output = static_dir.join(&output_name);
                if !static_output.exists() {
                    return Err(Failure::new(format!(
                        "Missing matching output '{static_output}' for static input '{}'.",
                        static_dir.join(name)
                    )));
                }
                ctx.add_job(LinkDataJob::new(
                    static_output,
                    TaskPath::static_output(&output_name),
                ));
            }
        }

        Ok(())
    }

    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        let env = ctx.context().env();
        let static_dir = env.static_dir();

        let mut testcases: Vec<TestcaseInfo> = self
            .static_inputs(&static_dir)?
            .iter()
            .map(|name| TestcaseInfo::static_data(name.trim_end_matches(".in")))
            .collect();
        if let Some(listing) = ctx
            .prerequisite("generator")
            .and_then(JobResult::as_testcases)
        {
            testcases.extend(listing.iter().cloned());
        }
        testcases.sort_by(|a, b| a.name.cmp(&b.name));

        let mut plan: BTreeMap<usize, Vec<TestcaseInfo>> = BTreeMap::new();
        for num in 0..env.tests_count() {
            let test = env.test(num);
            let mut assigned = Vec::new();
            for testcase in &testcases {
                let probe = testcase.input_name(Some(PROBE_SEED));
                if test.in_test(&probe) {
                    assigned.push(testcase.clone());
                }
            }
            if assigned.is_empty() {
                return Err(Failure::new(format!(
                    "No inputs for {} with globs {:?}.",
                    test.name, test.all_globs
                )));
            }
            plan.insert(num, assigned);
        }

        if env.checks().no_unused_inputs {
            let used: std::collections::BTreeSet<&str> = plan
                .values()
                .flatten()
                .map(|testcase| testcase.name.as_str())
                .collect();
            for testcase in &testcases {
                if !used.contains(testcase.name.as_str()) {
                    ctx.warn(format!(
                        "Unused {} input: '{}.in'",
                        if testcase.is_generated() {
                            "generated"
                        } else {
                            "static"
                        },
                        testcase.name
                    ));
                }
            }
        }

        Ok(JobResult::TestcasePlan(plan))
    }
}
