// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Per-input judging, polymorphic over the out-check mode. Every variant turns one solution
//! output into a `SolutionResult`; the solution's own run result short-circuits judging when
//! the run already failed or timed out.

use std::collections::BTreeMap;
use std::process::Command;
use std::str::FromStr;

use pipeline::{Failure, Job, Manager};
use rust_decimal::Decimal;
use sandbox::{OutputRef, RunResult, RunResultKind};

use crate::config::{JudgeType, OutCheck, ProgramKind, TaskType};
use crate::context::{BatchCtx, JobCtx, JobResult, ManagerCtx, TaskSpec};
use crate::env::Env;
use crate::paths::TaskPath;
use crate::program::{program_failure, run_program, synthetic_ok};
use crate::solution::result::{SolutionResult, Verdict};
use crate::task_job::TaskJobFiles;
use crate::text::tab;
use crate::tools;

/// Which judge protocol a batch judge job speaks.
#[derive(Clone, Debug)]
pub enum JudgeVariant {
    Diff,
    Tokens,
    Shuffle,
    /// `argv = [test, seed]`, verdict from the exit code.
    Opendata { judge: String, seed: Option<u64> },
    /// `argv = [input, correct, output]`, points fraction on stdout.
    CmsBatch { judge: String },
}

impl JudgeVariant {
    /// Pick the variant the config calls for.
    pub fn from_env(env: &Env, seed: Option<u64>) -> JudgeVariant {
        match env.out_check() {
            OutCheck::Diff => JudgeVariant::Diff,
            OutCheck::Tokens => JudgeVariant::Tokens,
            OutCheck::Shuffle => JudgeVariant::Shuffle,
            OutCheck::Judge => {
                let judge = env.judge().expect("out_check judge implies a judge section");
                match judge.judge_type {
                    JudgeType::CmsBatch => JudgeVariant::CmsBatch { judge: judge.run },
                    _ => JudgeVariant::Opendata {
                        judge: judge.run,
                        seed,
                    },
                }
            }
        }
    }

    fn judge_name(&self) -> &str {
        match self {
            JudgeVariant::Diff => "diff",
            JudgeVariant::Tokens => tools::TOKEN_JUDGE,
            JudgeVariant::Shuffle => tools::SHUFFLE_JUDGE,
            JudgeVariant::Opendata { judge, .. } => judge,
            JudgeVariant::CmsBatch { judge } => judge,
        }
    }
}

///
/// Judge one solution output against the reference. Receives the solution's RunResult under
/// the name "run_solution" (absent when judging samples, where the output being judged is
/// the reference itself).
///
pub struct RunBatchJudge {
    variant: JudgeVariant,
    test: usize,
    input: TaskPath,
    output: TaskPath,
    correct_output: TaskPath,
    judge_log: TaskPath,
    expected_verdict: Option<Verdict>,
}

impl RunBatchJudge {
    pub fn new(
        variant: JudgeVariant,
        test: usize,
        input: TaskPath,
        output: TaskPath,
        correct_output: TaskPath,
        expected_verdict: Option<Verdict>,
    ) -> RunBatchJudge {
        let judge_log = output.to_log(variant.judge_name());
        RunBatchJudge {
            variant,
            test,
            input,
            output,
            correct_output,
            judge_log,
            expected_verdict,
        }
    }

    /// The judge artifacts this job produces, for the hygiene pass.
    pub fn judge_outs(&self) -> Vec<TaskPath> {
        match &self.variant {
            JudgeVariant::CmsBatch { .. } => {
                vec![self.judge_log.clone(), self.judge_log.to_points()]
            }
            _ => vec![],
        }
    }

    fn solution_run_result(&self, ctx: &JobCtx<'_>) -> RunResult {
        ctx.prerequisite("run_solution")
            .and_then(JobResult::as_run)
            .cloned()
            .unwrap_or_else(synthetic_ok)
    }

    fn judge(&self, ctx: &mut JobCtx<'_>, solution_rr: RunResult) -> Result<SolutionResult, Failure> {
        match self.variant.clone() {
            JudgeVariant::Diff => self.judge_diff(ctx, solution_rr),
            JudgeVariant::Tokens => {
                let flags = tools::token_judge_flags(&ctx.context().env().tokens());
                self.judge_tool(ctx, solution_rr, tools::TOKEN_JUDGE, flags)
            }
            JudgeVariant::Shuffle => {
                let shuffle = ctx.context().env().shuffle();
                let mode = shuffle.mode.unwrap_or(crate::config::ShuffleMode::Tokens);
                let flags = tools::shuffle_judge_flags(mode, shuffle.ignore_case);
                self.judge_tool(ctx, solution_rr, tools::SHUFFLE_JUDGE, flags)
            }
            JudgeVariant::Opendata { judge, seed } => {
                self.judge_opendata(ctx, solution_rr, &judge, seed)
            }
            JudgeVariant::CmsBatch { judge } => self.judge_cms(ctx, solution_rr, &judge),
        }
    }

    /// `diff -Bbq`: exit 0 accepts, 1 rejects, anything else is a fatal diff failure.
    fn judge_diff(
        &self,
        ctx: &mut JobCtx<'_>,
        solution_rr: RunResult,
    ) -> Result<SolutionResult, Failure> {
        ctx.access_file(&self.output);
        ctx.access_file(&self.correct_output);
        let diff = Command::new("diff")
            .args(["-Bbq"])
            .arg(self.output.as_path())
            .arg(self.correct_output.as_path())
            .output()
            .map_err(|e| Failure::new(format!("cannot run diff: {e}")))?;

        let returncode = diff.status.code().unwrap_or(-1);
        let judge_rr = RunResult {
            kind: RunResultKind::Ok,
            returncode,
            time: concrete_time::Duration::new(0, 0),
            wall_time: concrete_time::Duration::new(0, 0),
            stdout: OutputRef::Discarded,
            stderr: None,
            status: format!(
                "{}: {} {}",
                if returncode == 0 {
                    "Files are the same"
                } else {
                    "Files differ"
                },
                self.output,
                self.correct_output
            ),
        };
        match returncode {
            0 => Ok(SolutionResult::relative(
                Verdict::Ok,
                None,
                solution_rr,
                Some(judge_rr),
                Decimal::ONE,
            )),
            1 => Ok(SolutionResult::relative(
                Verdict::WrongAnswer,
                None,
                solution_rr,
                Some(judge_rr),
                Decimal::ZERO,
            )),
            _ => Err(Failure::new(format!(
                "Diff failed:\n{}",
                tab(&String::from_utf8_lossy(&diff.stderr))
            ))),
        }
    }

    /// The bundled token/shuffle judges: exit 42 accepts, 43 rejects.
    fn judge_tool(
        &self,
        ctx: &mut JobCtx<'_>,
        solution_rr: RunResult,
        tool: &str,
        mut flags: Vec<String>,
    ) -> Result<SolutionResult, Failure> {
        ctx.access_file(&self.output);
        ctx.access_file(&self.correct_output);
        flags.push(self.output.to_string());
        flags.push(self.correct_output.to_string());
        let output = tools::run_tool(ctx, tool, &flags, None, None)?;

        let returncode = output.status.code().unwrap_or(-1);
        let stderr_first = String::from_utf8_lossy(&output.stderr)
            .lines()
            .next()
            .unwrap_or("")
            .to_owned();
        let judge_rr = RunResult {
            kind: RunResultKind::Ok,
            returncode,
            time: concrete_time::Duration::new(0, 0),
            wall_time: concrete_time::Duration::new(0, 0),
            stdout: OutputRef::Discarded,
            stderr: None,
            status: if stderr_first.is_empty() {
                "Files are equivalent".to_owned()
            } else {
                stderr_first
            },
        };
        match returncode {
            tools::EXIT_ACCEPT => Ok(SolutionResult::relative(
                Verdict::Ok,
                None,
                solution_rr,
                Some(judge_rr),
                Decimal::ONE,
            )),
            tools::EXIT_REJECT => Ok(SolutionResult::relative(
                Verdict::WrongAnswer,
                None,
                solution_rr,
                Some(judge_rr),
                Decimal::ZERO,
            )),
            _ => Err(tools::quote_tool_failure(tool, &output)),
        }
    }

    /// An opendata-v1 judge: stdin is the solution output, argv carries the test index and
    /// seed, `TEST_INPUT`/`TEST_OUTPUT` point at the data when configured.
    fn judge_opendata(
        &self,
        ctx: &mut JobCtx<'_>,
        solution_rr: RunResult,
        judge: &str,
        seed: Option<u64>,
    ) -> Result<SolutionResult, Failure> {
        let judge_config = ctx.context().env().judge().expect("judge is configured");
        let mut env = BTreeMap::new();
        if judge_config.needs_in {
            ctx.access_file(&self.input);
            env.insert("TEST_INPUT".to_owned(), self.input.to_string());
        }
        if judge_config.needs_out {
            ctx.access_file(&self.correct_output);
            env.insert("TEST_OUTPUT".to_owned(), self.correct_output.to_string());
        }

        let output = self.output.clone();
        let judge_log = self.judge_log.clone();
        let result = run_program(
            ctx,
            ProgramKind::Judge,
            judge,
            vec![
                self.test.to_string(),
                format!("{:x}", seed.unwrap_or(0)),
            ],
            Some(&output),
            None,
            Some(&judge_log),
            env,
        )?;

        match result.returncode {
            0 if result.kind == RunResultKind::Ok => Ok(SolutionResult::relative(
                Verdict::Ok,
                None,
                solution_rr,
                Some(result),
                Decimal::ONE,
            )),
            1 => Ok(SolutionResult::relative(
                Verdict::WrongAnswer,
                None,
                solution_rr,
                Some(result),
                Decimal::ZERO,
            )),
            _ => Err(program_failure(
                ctx,
                &format!("Judge failed on output {}:", self.output.name()),
                &result,
            )),
        }
    }

    /// A cms-batch judge: `argv = [input, correct, output]`, a points fraction on the first
    /// stdout line, a one-line message on stderr.
    fn judge_cms(
        &self,
        ctx: &mut JobCtx<'_>,
        solution_rr: RunResult,
        judge: &str,
    ) -> Result<SolutionResult, Failure> {
        ctx.access_file(&self.input);
        ctx.access_file(&self.output);
        ctx.access_file(&self.correct_output);

        let points_file = self.judge_log.to_points();
        let judge_log = self.judge_log.clone();
        let result = run_program(
            ctx,
            ProgramKind::Judge,
            judge,
            vec![
                self.input.to_string(),
                self.correct_output.to_string(),
                self.output.to_string(),
            ],
            None,
            Some(&points_file),
            Some(&judge_log),
            BTreeMap::new(),
        )?;

        if result.kind != RunResultKind::Ok {
            return Err(program_failure(
                ctx,
                &format!("Judge failed on output {}:", self.output.name()),
                &result,
            ));
        }

        load_cms_result(ctx, solution_rr, result, &points_file, &judge_log)
    }
}

/// Shared by cms-batch and interactive judging: read the points fraction and the one-line
/// message a cms-style judge leaves behind.
pub fn load_cms_result(
    ctx: &mut JobCtx<'_>,
    solution_rr: RunResult,
    judge_rr: RunResult,
    points_file: &TaskPath,
    judge_log: &TaskPath,
) -> Result<SolutionResult, Failure> {
    let points_text = ctx.read_file(points_file)?;
    let first_line = points_text.lines().next().unwrap_or("").trim();
    let points = Decimal::from_str(first_line).map_err(|_| {
        program_failure(ctx, "Judge didn't write points on stdout:", &judge_rr)
    })?;
    if points < Decimal::ZERO || points > Decimal::ONE {
        return Err(program_failure(
            ctx,
            "Judge must give between 0 and 1 points:",
            &judge_rr,
        ));
    }

    let verdict = if points == Decimal::ONE {
        Verdict::Ok
    } else if points == Decimal::ZERO {
        Verdict::WrongAnswer
    } else {
        Verdict::PartialOk
    };
    let message = ctx
        .read_file(judge_log)
        .ok()
        .and_then(|log| log.lines().next().map(str::to_owned))
        .filter(|line| !line.is_empty());

    Ok(SolutionResult::relative(
        verdict,
        message,
        solution_rr,
        Some(judge_rr),
        points,
    ))
}

impl Job<TaskSpec> for RunBatchJudge {
    fn name(&self) -> String {
        format!("Judge {}", self.output)
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.test.to_string(),
            self.input.to_string(),
            self.output.to_string(),
        ];
        if let JudgeVariant::Opendata { seed: Some(seed), .. } = &self.variant {
            args.push(format!("{seed:x}"));
        }
        args
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let solution_rr = self.solution_run_result(ctx);

        let result = match solution_rr.kind {
            RunResultKind::Ok => self.judge(ctx, solution_rr)?,
            RunResultKind::RuntimeError => SolutionResult::relative(
                Verdict::Error,
                None,
                solution_rr,
                None,
                Decimal::ZERO,
            ),
            RunResultKind::Timeout => SolutionResult::relative(
                Verdict::Timeout,
                None,
                solution_rr,
                None,
                Decimal::ZERO,
            ),
        };

        if let Some(expected) = self.expected_verdict {
            if result.verdict() != expected {
                return Err(Failure::new(format!(
                    "Judging output {} for input {} should have got verdict '{expected}' but got '{}'.",
                    self.output.name(),
                    self.input.name(),
                    result.verdict()
                )));
            }
        }

        Ok(JobResult::Solution(result))
    }
}

///
/// Prepares the judge and sanity-checks it on the task's samples: the reference output judged
/// against itself must come out `ok`.
///
pub struct JudgeManager {
    judge_outs: Vec<TaskPath>,
}

impl JudgeManager {
    pub fn new() -> JudgeManager {
        JudgeManager { judge_outs: vec![] }
    }
}

impl Manager<TaskSpec> for JudgeManager {
    fn name(&self) -> String {
        "Prepare judge".to_owned()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        let env = ctx.context().env();
        if env.task_type() == TaskType::Interactive {
            return Ok(());
        }

        let plan = ctx
            .prerequisite("inputs")
            .and_then(JobResult::as_testcase_plan)
            .cloned()
            .ok_or_else(|| Failure::new("inputs manager result is missing"))?;
        let samples = plan.get(&0).cloned().unwrap_or_default();

        for sample in samples {
            if sample.is_generated() {
                continue;
            }
            let input = sample.input_path(None, None);
            let reference = TaskPath::static_output(&format!("{}.out", sample.name));
            let judge = RunBatchJudge::new(
                JudgeVariant::from_env(env, Some(0)),
                0,
                input,
                reference.clone(),
                reference,
                Some(Verdict::Ok),
            );
            self.judge_outs.extend(judge.judge_outs());
            ctx.add_job(judge);
        }
        Ok(())
    }

    fn evaluate(&mut self, _ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        Ok(JobResult::JudgeOuts(self.judge_outs.clone()))
    }
}
