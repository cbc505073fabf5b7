// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Running one solution on one input: the batch shape (a run producing an output file, with
//! judging as a separate job) and the interactive shape (solution and judge joined by fifos
//! inside a single job).

use std::collections::BTreeMap;
use std::os::unix::io::RawFd;

use pipeline::{Failure, Job};
use rust_decimal::Decimal;
use sandbox::{RunResultKind, StdioSink, StdioSource};

use crate::config::{JudgeConfig, ProgramKind};
use crate::context::{JobCtx, JobResult, TaskSpec};
use crate::judge::load_cms_result;
use crate::paths::TaskPath;
use crate::program::{build_request, run_program};
use crate::solution::result::{SolutionResult, Verdict};

fn solution_kind(is_primary: bool) -> ProgramKind {
    if is_primary {
        ProgramKind::Solve
    } else {
        ProgramKind::SecSolve
    }
}

///
/// Run a batch solution on one input, producing `{input}.out` and a stderr log. The paired
/// judge job consumes this job's RunResult under the name "run_solution".
///
pub struct RunBatchSolution {
    solution: String,
    is_primary: bool,
    input: TaskPath,
}

impl RunBatchSolution {
    pub fn new(solution: String, is_primary: bool, input: TaskPath) -> RunBatchSolution {
        RunBatchSolution {
            solution,
            is_primary,
            input,
        }
    }
}

impl Job<TaskSpec> for RunBatchSolution {
    fn name(&self) -> String {
        format!("Run {} on input {}", self.solution, self.input.name())
    }

    fn args(&self) -> Vec<String> {
        vec![self.solution.clone(), self.input.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let solution = self.solution.clone();
        let input = self.input.clone();
        let output = input.to_output();
        let log = input.to_log(&solution);
        let result = run_program(
            ctx,
            solution_kind(self.is_primary),
            &solution,
            vec![],
            Some(&input),
            Some(&output),
            Some(&log),
            BTreeMap::new(),
        )?;
        Ok(JobResult::Run(result))
    }
}

///
/// Run an interactive solution: the judge and the solution share a pair of fifos (each one's
/// stdout is the other's stdin), the judge reads the input file on its own stdin and writes
/// a cms-style points fraction to its stdout. Whichever process exits first triggers a
/// teardown that closes every fifo descriptor, so the survivor cannot block forever.
///
pub struct RunInteractive {
    solution: String,
    is_primary: bool,
    judge: JudgeConfig,
    test: usize,
    input: TaskPath,
    expected_verdict: Option<Verdict>,
}

impl RunInteractive {
    pub fn new(
        solution: String,
        is_primary: bool,
        judge: JudgeConfig,
        test: usize,
        input: TaskPath,
        expected_verdict: Option<Verdict>,
    ) -> RunInteractive {
        RunInteractive {
            solution,
            is_primary,
            judge,
            test,
            input,
            expected_verdict,
        }
    }
}

const FIFO_TEARDOWN_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

impl Job<TaskSpec> for RunInteractive {
    fn name(&self) -> String {
        format!("Run {} on input {}", self.solution, self.input.name())
    }

    fn args(&self) -> Vec<String> {
        vec![
            self.solution.clone(),
            self.input.to_string(),
            self.test.to_string(),
        ]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let fifo_dir = tempfile::TempDir::new()
            .map_err(|e| Failure::new(format!("cannot create fifo directory: {e}")))?;
        let from_solution = fifo_dir.path().join("solution-to-judge");
        let to_solution = fifo_dir.path().join("judge-to-solution");
        for fifo in [&from_solution, &to_solution] {
            nix::unistd::mkfifo(fifo.as_path(), nix::sys::stat::Mode::from_bits_truncate(0o600))
                .map_err(|e| Failure::new(format!("cannot create fifo {}: {e}", fifo.display())))?;
        }

        // O_RDWR openers keep both ends alive so the directional opens cannot block, exactly
        // one reader and one writer per fifo go to the children.
        use nix::fcntl::{open, OFlag};
        use nix::sys::stat::Mode;
        let mut fds: Vec<RawFd> = Vec::new();
        let open_fifo = |path: &std::path::Path, flags: OFlag| -> Result<RawFd, Failure> {
            let fd = open(path, flags, Mode::empty())
                .map_err(|e| Failure::new(format!("cannot open fifo {}: {e}", path.display())))?;
            Ok(fd)
        };
        fds.push(open_fifo(&from_solution, OFlag::O_RDWR)?);
        fds.push(open_fifo(&to_solution, OFlag::O_RDWR)?);
        let solution_stdout = open_fifo(&from_solution, OFlag::O_WRONLY)?;
        fds.push(solution_stdout);
        let solution_stdin = open_fifo(&to_solution, OFlag::O_RDONLY)?;
        fds.push(solution_stdin);

        let solution = self.solution.clone();
        let input = self.input.clone();
        let solution_log = input.to_log(&solution);
        let judge_log = input.to_log(&self.judge.run);
        let points_file = judge_log.to_points();

        let judge_request = build_request(
            ctx,
            ProgramKind::Judge,
            &self.judge.run,
            vec![
                from_solution.to_string_lossy().into_owned(),
                to_solution.to_string_lossy().into_owned(),
            ],
            Some(&input),
            Some(&points_file),
            Some(&judge_log),
            BTreeMap::new(),
        )?;

        let mut solution_request = build_request(
            ctx,
            solution_kind(self.is_primary),
            &solution,
            vec![],
            None,
            None,
            Some(&solution_log),
            BTreeMap::new(),
        )?;
        solution_request.stdin = Some(StdioSource::Fd(solution_stdin));
        solution_request.stdout = Some(StdioSink::Fd(solution_stdout));

        let teardown_fds = fds.clone();
        let teardown: sandbox::PoolCallback = Box::new(move || {
            // Give the survivor a moment to read whatever is still buffered in the fifos.
            std::thread::sleep(FIFO_TEARDOWN_DELAY);
            for fd in teardown_fds {
                let _ = nix::unistd::close(fd);
            }
        });

        let runner = ctx.context().runner().clone();
        let results = ctx
            .context()
            .block_on(runner.run_pool(vec![judge_request, solution_request], Some(teardown)))
            .map_err(|launch_error| Failure::new(launch_error.to_string()))?;
        let [judge_rr, solution_rr] = <[sandbox::RunResult; 2]>::try_from(results)
            .expect("pool of two returns two results");

        let result = match solution_rr.kind {
            RunResultKind::RuntimeError => SolutionResult::relative(
                Verdict::Error,
                None,
                solution_rr,
                Some(judge_rr),
                Decimal::ZERO,
            ),
            RunResultKind::Timeout => SolutionResult::relative(
                Verdict::Timeout,
                None,
                solution_rr,
                Some(judge_rr),
                Decimal::ZERO,
            ),
            RunResultKind::Ok => {
                if judge_rr.kind != RunResultKind::Ok {
                    return Err(crate::program::program_failure(
                        ctx,
                        &format!("Judge failed on input {}:", self.input.name()),
                        &judge_rr,
                    ));
                }
                load_cms_result(ctx, solution_rr, judge_rr, &points_file, &judge_log)?
            }
        };

        if let Some(expected) = self.expected_verdict {
            if result.verdict() != expected {
                return Err(Failure::new(format!(
                    "Solution {} on input {} should have got verdict '{expected}' but got '{}'.",
                    self.solution,
                    self.input.name(),
                    result.verdict()
                )));
            }
        }

        Ok(JobResult::Solution(result))
    }
}
