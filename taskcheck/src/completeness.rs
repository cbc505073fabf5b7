// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Whole-task checks run after every solution: each test should have a dedicated solution
//! that passes exactly it (and its predecessors), and cms judges must keep their output to
//! one meaningful line.

use pipeline::{Failure, Manager};

use crate::config::JudgeType;
use crate::context::{BatchCtx, JobResult, ManagerCtx, TaskSpec};
use crate::paths::TaskPath;
use crate::solution::result::{SolutionSummary, Verdict};

pub struct CompletenessCheck {
    pub solutions: Vec<String>,
}

impl CompletenessCheck {
    pub fn new(solutions: Vec<String>) -> CompletenessCheck {
        CompletenessCheck { solutions }
    }

    fn summaries<'c>(&self, ctx: &'c ManagerCtx<'_>) -> Vec<&'c SolutionSummary> {
        self.solutions
            .iter()
            .filter_map(|solution| {
                ctx.prerequisite(&format!("solution_{solution}"))
                    .and_then(JobResult::as_solution_summary)
            })
            .collect()
    }

    ///
    /// A solution is dedicated to test `t` when it gets `ok` on `t` and every predecessor of
    /// `t`, and a non-ok verdict on every other non-sample test.
    ///
    fn check_dedicated_solutions(&self, ctx: &mut ManagerCtx<'_>) {
        let env = ctx.context().env();
        let tests_count = env.tests_count();
        let summaries = self.summaries(ctx);

        let mut missing = Vec::new();
        for num in 1..tests_count {
            let test = env.test(num);
            let expected_ok: std::collections::BTreeSet<usize> = std::iter::once(num)
                .chain(test.all_predecessors.iter().copied())
                .collect();

            let dedicated = summaries.iter().any(|summary| {
                (1..tests_count).all(|other| {
                    let ok = summary.tests.get(&other) == Some(&Verdict::Ok);
                    ok == expected_ok.contains(&other)
                })
            });
            if !dedicated {
                missing.push(test.name);
            }
        }
        for name in missing {
            ctx.warn(format!("{name} has no dedicated solution"));
        }
    }

    /// Every judge log produced during judging must be exactly one non-empty line.
    fn check_cms_judge_output(&self, ctx: &mut ManagerCtx<'_>) {
        let mut judge_outs: Vec<TaskPath> = ctx
            .prerequisite("judge")
            .and_then(JobResult::as_judge_outs)
            .map(<[TaskPath]>::to_vec)
            .unwrap_or_default();
        for summary in self.summaries(ctx) {
            judge_outs.extend(summary.judge_outs.iter().cloned());
        }
        judge_outs.sort();
        judge_outs.dedup();

        let mut malformed = Vec::new();
        for path in judge_outs {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let lines: Vec<&str> = content.trim_end().split('\n').collect();
            if lines.len() > 1 || lines[0].is_empty() {
                malformed.push(path);
            }
        }
        for path in malformed {
            ctx.warn(format!("{path} should contain exactly one line"));
        }
    }
}

impl Manager<TaskSpec> for CompletenessCheck {
    fn name(&self) -> String {
        "Completeness check".to_owned()
    }

    fn create_jobs(&mut self, _ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        Ok(())
    }

    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        let env = ctx.context().env();
        let is_cms_judge = matches!(
            env.judge().map(|judge| judge.judge_type),
            Some(JudgeType::CmsBatch) | Some(JudgeType::CmsCommunication)
        );
        if is_cms_judge {
            self.check_cms_judge_output(ctx);
        }
        if env.checks().solution_for_each_test {
            self.check_dedicated_solutions(ctx);
        }
        Ok(JobResult::None)
    }
}
