// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The solution manager: for one solution, build it, run it on every applicable input, judge
//! every output, group the verdicts per test, cancel what cannot change the outcome anymore,
//! and compare the aggregate against the author's declared expectation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use pipeline::{Condition, Failure, ItemId, Manager};
use rust_decimal::Decimal;

use crate::build::BuildJob;
use crate::config::{DataFormat, TaskType, TestConfig};
use crate::context::{BatchCtx, JobResult, ManagerCtx, TaskSpec};
use crate::data::{DataSmallJob, IsCleanJob, SymlinkDataJob};
use crate::input_plan::{seeds_for, InputPlanner};
use crate::judge::{JudgeVariant, RunBatchJudge};
use crate::paths::TaskPath;
use crate::solution::result::{SolutionResult, SolutionSummary, Verdict};
use crate::solution::solution::{RunBatchSolution, RunInteractive};
use crate::solution::verdicts::evaluate_verdicts;

/// The jobs of one test: judges inherited from predecessor tests, plus this test's own runs
/// and judges.
struct TestGroup {
    test: TestConfig,
    mask_char: char,
    previous_jobs: Vec<ItemId>,
    new_jobs: Vec<ItemId>,
    new_runs: Vec<ItemId>,
    cancelled: bool,
}

impl TestGroup {
    fn all_jobs(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.previous_jobs.iter().chain(self.new_jobs.iter()).copied()
    }
}

pub struct SolutionManager {
    solution: String,
    /// The first manager to visit an input owns its generation; later managers only symlink.
    generate_inputs: bool,
    groups: Vec<TestGroup>,
    /// Judge job per input file name (for interactive tasks the combined run job).
    judges: BTreeMap<String, ItemId>,
    runs: BTreeMap<String, ItemId>,
    /// How many not-yet-cancelled groups still need each run job.
    run_requires: HashMap<ItemId, usize>,
    /// Judge artifacts per input, reported for the hygiene pass when the verdict qualifies.
    judge_out_files: BTreeMap<String, Vec<TaskPath>>,
    seen_inputs: BTreeSet<String>,
}

impl SolutionManager {
    pub fn new(solution: impl Into<String>, generate_inputs: bool) -> SolutionManager {
        SolutionManager {
            solution: solution.into(),
            generate_inputs,
            groups: Vec::new(),
            judges: BTreeMap::new(),
            runs: BTreeMap::new(),
            run_requires: HashMap::new(),
            judge_out_files: BTreeMap::new(),
            seen_inputs: BTreeSet::new(),
        }
    }

    fn require_run(&mut self, run: ItemId) {
        *self.run_requires.entry(run).or_insert(0) += 1;
    }

    /// Finished verdicts of a group, with the judge job each came from.
    fn group_verdicts(
        &self,
        ctx: &ManagerCtx<'_>,
        group: &TestGroup,
    ) -> Vec<(ItemId, Verdict)> {
        group
            .all_jobs()
            .filter_map(|job| {
                ctx.result(job)
                    .and_then(JobResult::as_solution)
                    .map(|result| (job, result.verdict()))
            })
            .collect()
    }

    fn group_points(&self, ctx: &ManagerCtx<'_>, group: &TestGroup) -> Decimal {
        let test_points = Decimal::from(group.test.points);
        group
            .all_jobs()
            .filter_map(|job| {
                ctx.result(job)
                    .and_then(JobResult::as_solution)
                    .map(|result| result.points(test_points))
            })
            .min()
            .unwrap_or(test_points)
    }

    /// Whether the group's outcome is already immutable under its mask character.
    fn group_definitive(&self, ctx: &ManagerCtx<'_>, group: &TestGroup) -> bool {
        let verdicts: Vec<Verdict> = self
            .group_verdicts(ctx, group)
            .into_iter()
            .map(|(_, verdict)| verdict)
            .collect();

        // 'X' accepts any outcome, so only hitting zero points pins the group's score down.
        if group.mask_char == 'X' {
            let worst = verdicts.iter().copied().max().unwrap_or(Verdict::Ok);
            if !worst.is_zero_point() {
                return false;
            }
        }

        evaluate_verdicts(&verdicts, group.mask_char).definitive
    }
}

impl Manager<TaskSpec> for SolutionManager {
    fn name(&self) -> String {
        format!("Test solution {}", self.solution)
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        let env = ctx.context().env();
        let solution = env
            .solution(&self.solution)
            .ok_or_else(|| Failure::new(format!("unknown solution '{}'", self.solution)))?;
        let primary_label = env
            .primary_solution()
            .unwrap_or_else(|| self.solution.clone());
        let task_type = env.task_type();
        let iteration = env.iteration();
        let respects_seed = env.checks().generator_respects_seed;
        let out_format = env.out_format();
        let output_max_size = env.output_max_size();

        let plan = ctx
            .prerequisite("inputs")
            .and_then(JobResult::as_testcase_plan)
            .cloned()
            .ok_or_else(|| Failure::new("inputs manager result is missing"))?;

        let compile = ctx.add_job(BuildJob::new(solution.run.clone()));
        let mut planner = InputPlanner::new(env.generator());

        for (&test_num, testcases) in &plan {
            let test = env.test(test_num);
            let mask_char = solution
                .tests
                .chars()
                .nth(test_num)
                .expect("masks were validated against the test count");
            self.groups.push(TestGroup {
                test,
                mask_char,
                previous_jobs: vec![],
                new_jobs: vec![],
                new_runs: vec![],
                cancelled: false,
            });

            for testcase in testcases {
                let seeds = seeds_for(testcase, iteration);
                let mut skipped = false;

                for (index, &seed) in seeds.iter().enumerate() {
                    let input_name = testcase.input_name(seed);

                    if self.seen_inputs.contains(&input_name) {
                        // Scheduled by an earlier test of this solution: inherit its judge,
                        // or co-own the run when the input is also new in this test.
                        skipped = true;
                        let run = self.runs[&input_name];
                        let judge = self.judges[&input_name];
                        let group = self.groups.last_mut().expect("group was just pushed");
                        if group.test.new_in_test(&input_name) {
                            group.new_runs.push(run);
                            group.new_jobs.push(judge);
                            self.require_run(run);
                        } else {
                            group.previous_jobs.push(judge);
                        }
                        continue;
                    }
                    self.seen_inputs.insert(input_name.clone());

                    let gen_job = if self.generate_inputs {
                        planner.produce_input(ctx, testcase, seed, test_num, index == 0)?
                    } else {
                        None
                    };

                    // Each input file exists once; this solution sees it through a symlink
                    // in its own directory.
                    let shared_input = testcase.input_path(seed, None);
                    let local_input = testcase.input_path(seed, Some(&self.solution));
                    let link = ctx.add_job(SymlinkDataJob::new(
                        shared_input,
                        local_input.clone(),
                    ));
                    if let Some(gen_job) = gen_job {
                        ctx.add_prerequisite(gen_job, link, None);
                    }

                    let (run, judge) = match task_type {
                        TaskType::Batch => {
                            let run = ctx.add_job(RunBatchSolution::new(
                                solution.run.clone(),
                                solution.primary,
                                local_input.clone(),
                            ));
                            ctx.add_prerequisite(compile, run, None);
                            ctx.add_prerequisite(link, run, None);

                            let output = local_input.to_output();
                            let reference = testcase.reference_output(seed, &primary_label);
                            let judge_job = RunBatchJudge::new(
                                JudgeVariant::from_env(env, seed),
                                test_num,
                                local_input.clone(),
                                output.clone(),
                                reference,
                                None,
                            );
                            self.judge_out_files
                                .insert(input_name.clone(), judge_job.judge_outs());
                            let judge = ctx.add_job(judge_job);
                            ctx.add_prerequisite(run, judge, Some("run_solution"));

                            if out_format == DataFormat::Text {
                                let clean = ctx.add_job(IsCleanJob::new(output.clone()));
                                let admit: Condition<JobResult> = Box::new(|result| {
                                    result
                                        .as_run()
                                        .is_some_and(|rr| rr.kind == sandbox::RunResultKind::Ok)
                                });
                                ctx.add_conditional_prerequisite(run, clean, None, admit);
                            }
                            if output_max_size != 0 {
                                let small = ctx.add_job(DataSmallJob::output(
                                    output,
                                    output_max_size,
                                ));
                                ctx.add_prerequisite(run, small, None);
                            }
                            (run, judge)
                        }
                        TaskType::Interactive => {
                            let judge_config =
                                env.judge().expect("interactive tasks have a judge");
                            let judge_log = local_input.to_log(&judge_config.run);
                            let run = ctx.add_job(RunInteractive::new(
                                solution.run.clone(),
                                solution.primary,
                                judge_config,
                                test_num,
                                local_input.clone(),
                                None,
                            ));
                            ctx.add_prerequisite(compile, run, None);
                            ctx.add_prerequisite(link, run, None);
                            self.judge_out_files.insert(
                                input_name.clone(),
                                vec![judge_log.to_points(), judge_log],
                            );
                            (run, run)
                        }
                    };

                    self.runs.insert(input_name.clone(), run);
                    self.judges.insert(input_name.clone(), judge);
                    self.require_run(run);
                    let group = self.groups.last_mut().expect("group was just pushed");
                    group.new_runs.push(run);
                    group.new_jobs.push(judge);
                }

                if respects_seed
                    && testcase.seeded
                    && testcase.is_generated()
                    && !skipped
                    && self.generate_inputs
                {
                    planner.respects_seed(ctx, testcase, &seeds)?;
                }
            }
        }
        Ok(())
    }

    /// Definitive cancellation: once a group's outcome can no longer change, its remaining
    /// runs are released; a run is cancelled when no group needs it anymore.
    fn update(&mut self, ctx: &mut ManagerCtx<'_>) {
        if ctx.context().env().all_inputs() {
            return;
        }

        let definitive: Vec<usize> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, group)| !group.cancelled && self.group_definitive(ctx, group))
            .map(|(index, _)| index)
            .collect();

        for index in definitive {
            self.groups[index].cancelled = true;
            for run in self.groups[index].new_runs.clone() {
                let requires = self
                    .run_requires
                    .get_mut(&run)
                    .expect("every scheduled run is required");
                *requires -= 1;
                if *requires == 0 {
                    ctx.cancel(run);
                }
            }
        }
    }

    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        let env = ctx.context().env();
        let solution = env
            .solution(&self.solution)
            .ok_or_else(|| Failure::new(format!("unknown solution '{}'", self.solution)))?;

        let mut total = Decimal::ZERO;
        let mut tests = BTreeMap::new();
        for group in &self.groups {
            total += self.group_points(ctx, group);
            let verdict = self
                .group_verdicts(ctx, group)
                .into_iter()
                .map(|(_, verdict)| verdict)
                .max()
                .unwrap_or(Verdict::Ok);
            tests.insert(group.test.num, verdict);
        }

        // Every group must satisfy its mask character.
        for group in &self.groups {
            let with_jobs = self.group_verdicts(ctx, group);
            let verdicts: Vec<Verdict> =
                with_jobs.iter().map(|&(_, verdict)| verdict).collect();
            let evaluation = evaluate_verdicts(&verdicts, group.mask_char);
            if !evaluation.satisfied {
                let mut message = format!(
                    "Solution {}: {} did not result as expected: '{}'",
                    self.solution, group.test.name, group.mask_char
                );
                if let Some(breaker) = evaluation.breaker {
                    let (job, verdict) = with_jobs[breaker];
                    message.push_str(&format!(
                        "\n  {} got verdict '{verdict}'",
                        ctx.name(job)
                    ));
                    if let Some(result) = ctx.result(job).and_then(JobResult::as_solution) {
                        if let Some(detail) = result.message() {
                            message.push_str(&format!(": {detail}"));
                        } else if !result.solution_rr().status.is_empty() {
                            message.push_str(&format!(" ({})", result.solution_rr().status));
                        }
                    }
                }
                return Err(Failure::new(message));
            }
        }

        // And the total must match the declared expectation.
        if let Some(expected) = solution.points {
            if total != expected {
                return Err(Failure::new(format!(
                    "Solution {} should have gotten {expected} but got {total} points.",
                    self.solution
                )));
            }
        }
        if let Some(minimum) = solution.points_min {
            if total < minimum {
                return Err(Failure::new(format!(
                    "Solution {} should have gotten at least {minimum} but got {total} points.",
                    self.solution
                )));
            }
        }
        if let Some(maximum) = solution.points_max {
            if total > maximum {
                return Err(Failure::new(format!(
                    "Solution {} should have gotten at most {maximum} but got {total} points.",
                    self.solution
                )));
            }
        }

        let mut results: BTreeMap<String, Option<SolutionResult>> = BTreeMap::new();
        let mut judge_outs = Vec::new();
        for (input_name, &judge) in &self.judges {
            let result = ctx.result(judge).and_then(JobResult::as_solution).cloned();
            if let Some(result) = &result {
                if matches!(
                    result.verdict(),
                    Verdict::Ok | Verdict::PartialOk | Verdict::WrongAnswer
                ) {
                    judge_outs
                        .extend(self.judge_out_files.get(input_name).cloned().unwrap_or_default());
                }
            }
            results.insert(input_name.clone(), result);
        }

        log::info!("solution {}: {total} points", self.solution);

        Ok(JobResult::SolutionSummary(SolutionSummary {
            solution: self.solution.clone(),
            results,
            tests,
            judge_outs,
            points: total,
        }))
    }
}
