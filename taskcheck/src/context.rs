// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The application's instantiation of the generic pipeline: the per-run context (env +
//! sandbox runner) and the one result type all task jobs and managers produce.

use std::collections::BTreeMap;
use std::future::Future;

use rust_decimal::Decimal;
use sandbox::{CommandRunner, RunResult};
use serde::{Deserialize, Serialize};
use task_executor::Executor;

use pipeline::EnvView;

use crate::env::Env;
use crate::paths::TaskPath;
use crate::solution::result::{SolutionResult, SolutionSummary, Verdict};
use crate::testcase::TestcaseInfo;

///
/// Everything a running job reaches through: the locked env snapshot, the sandbox runner,
/// and the executor that jobs use to drive async runner calls to completion.
///
pub struct Ctx {
    env: Env,
    executor: Executor,
    runner: CommandRunner,
}

impl Ctx {
    pub fn new(env: Env, executor: Executor) -> Ctx {
        let runner = CommandRunner::new(executor.clone());
        Ctx {
            env,
            executor,
            runner,
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.executor.block_on(future)
    }
}

impl EnvView for Ctx {
    fn value_of(&self, name: &str) -> Option<String> {
        self.env.value_of(name)
    }

    fn drain_accesses(&self) -> std::collections::BTreeSet<String> {
        self.env.drain_accesses()
    }
}

pub struct TaskSpec;

impl pipeline::PipelineSpec for TaskSpec {
    type Context = Ctx;
    type Output = JobResult;
}

pub type JobCtx<'a> = pipeline::JobCtx<'a, TaskSpec>;
pub type BatchCtx<'a> = pipeline::BatchCtx<'a, TaskSpec>;
pub type ManagerCtx<'a> = pipeline::ManagerCtx<'a, TaskSpec>;
pub type TaskPipeline = pipeline::Pipeline<TaskSpec>;

///
/// The one result type flowing through the pipeline. Jobs produce the leaf variants;
/// managers produce the summary variants consumed downstream under their code names.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobResult {
    None,
    Run(RunResult),
    Solution(SolutionResult),
    /// A generator listing.
    Testcases(Vec<TestcaseInfo>),
    /// The per-test input plan the data manager computed.
    TestcasePlan(BTreeMap<usize, Vec<TestcaseInfo>>),
    /// Judge artifacts (logs, points files) produced while judging samples.
    JudgeOuts(Vec<TaskPath>),
    SolutionSummary(SolutionSummary),
}

impl JobResult {
    pub fn as_run(&self) -> Option<&RunResult> {
        match self {
            JobResult::Run(run_result) => Some(run_result),
            _ => None,
        }
    }

    pub fn as_solution(&self) -> Option<&SolutionResult> {
        match self {
            JobResult::Solution(solution_result) => Some(solution_result),
            _ => None,
        }
    }

    pub fn as_testcases(&self) -> Option<&[TestcaseInfo]> {
        match self {
            JobResult::Testcases(testcases) => Some(testcases),
            _ => None,
        }
    }

    pub fn as_testcase_plan(&self) -> Option<&BTreeMap<usize, Vec<TestcaseInfo>>> {
        match self {
            JobResult::TestcasePlan(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn as_judge_outs(&self) -> Option<&[TaskPath]> {
        match self {
            JobResult::JudgeOuts(paths) => Some(paths),
            _ => None,
        }
    }

    pub fn as_solution_summary(&self) -> Option<&SolutionSummary> {
        match self {
            JobResult::SolutionSummary(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.as_solution().map(SolutionResult::verdict)
    }

    pub fn points(&self, test_points: Decimal) -> Option<Decimal> {
        self.as_solution().map(|result| result.points(test_points))
    }
}
