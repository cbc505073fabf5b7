// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `testing_log.json`: a machine-readable dump of every solution's per-input timing and
//! verdict, for external analysis tools. Written at the end of the run when requested; it
//! reports over whatever finished, even when some solution missed its expectation.

use std::collections::BTreeMap;

use pipeline::{Failure, Manager};
use serde::Serialize;

use crate::context::{BatchCtx, JobResult, ManagerCtx, TaskSpec};
use crate::solution::result::SolutionResult;

pub const TESTING_LOG: &str = "testing_log.json";

#[derive(Serialize)]
struct TestingLog {
    source: &'static str,
    solutions: BTreeMap<String, SolutionEntry>,
}

#[derive(Serialize)]
struct SolutionEntry {
    results: BTreeMap<String, InputEntry>,
}

#[derive(Serialize)]
struct InputEntry {
    time: f64,
    wall_clock_time: f64,
    result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    relative_points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    absolute_points: Option<String>,
}

pub struct CreateTestingLog {
    pub solutions: Vec<String>,
}

impl CreateTestingLog {
    pub fn new(solutions: Vec<String>) -> CreateTestingLog {
        CreateTestingLog { solutions }
    }
}

impl Manager<TaskSpec> for CreateTestingLog {
    fn name(&self) -> String {
        "Create testing log".to_owned()
    }

    fn create_jobs(&mut self, _ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        Ok(())
    }

    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        let mut log = TestingLog {
            source: "taskcheck",
            solutions: BTreeMap::new(),
        };
        let mut skipped_inputs = false;
        let mut missing_solutions = false;

        for solution in &self.solutions {
            let Some(summary) = ctx
                .prerequisite(&format!("solution_{solution}"))
                .and_then(JobResult::as_solution_summary)
            else {
                missing_solutions = true;
                continue;
            };

            let mut results = BTreeMap::new();
            for (input, result) in &summary.results {
                let Some(result) = result else {
                    skipped_inputs = true;
                    continue;
                };
                let (relative_points, absolute_points) = match result {
                    SolutionResult::Relative {
                        relative_points, ..
                    } => (Some(relative_points.to_string()), None),
                    SolutionResult::Absolute {
                        absolute_points, ..
                    } => (None, Some(absolute_points.to_string())),
                };
                results.insert(
                    input.clone(),
                    InputEntry {
                        time: result.solution_rr().time_secs(),
                        wall_clock_time: result.solution_rr().wall_time_secs(),
                        result: result.verdict().to_string(),
                        relative_points,
                        absolute_points,
                    },
                );
            }
            log.solutions
                .insert(solution.clone(), SolutionEntry { results });
        }

        if log.solutions.is_empty() {
            return Err(Failure::new("No solution was tested."));
        }
        if missing_solutions {
            ctx.warn("Not all solutions were tested.");
        }
        if skipped_inputs {
            ctx.warn("Not all inputs were tested. For testing them use --all-inputs.");
        }

        let rendered =
            serde_json::to_string_pretty(&log).expect("testing log serializes");
        std::fs::write(TESTING_LOG, rendered)
            .map_err(|e| Failure::new(format!("cannot write {TESTING_LOG}: {e}")))?;
        Ok(JobResult::None)
    }
}
