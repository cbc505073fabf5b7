// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Verdicts and per-input solution results.

use rust_decimal::Decimal;
use sandbox::RunResult;
use serde::{Deserialize, Serialize};

use crate::paths::TaskPath;

///
/// How a solution fared on one input, ordered by severity: a test group's verdict is the
/// worst verdict among its inputs.
///
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Ok,
    PartialOk,
    Timeout,
    WrongAnswer,
    Error,
}

impl Verdict {
    /// The single-character mark used in compact status lines.
    pub fn mark(self) -> &'static str {
        match self {
            Verdict::Ok => "·",
            Verdict::PartialOk => "P",
            Verdict::Timeout => "T",
            Verdict::WrongAnswer => "W",
            Verdict::Error => "!",
        }
    }

    /// Whether this verdict earns zero points no matter the judge's fraction.
    pub fn is_zero_point(self) -> bool {
        matches!(self, Verdict::WrongAnswer | Verdict::Timeout | Verdict::Error)
    }
}

///
/// The outcome of judging one solution output. Relative results carry a fraction of the
/// test's points (every built-in judge speaks fractions); absolute results carry points
/// directly, capped by the test's value.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolutionResult {
    Relative {
        verdict: Verdict,
        message: Option<String>,
        solution_rr: RunResult,
        judge_rr: Option<RunResult>,
        relative_points: Decimal,
    },
    Absolute {
        verdict: Verdict,
        message: Option<String>,
        solution_rr: RunResult,
        judge_rr: Option<RunResult>,
        absolute_points: Decimal,
    },
}

impl SolutionResult {
    pub fn verdict(&self) -> Verdict {
        match self {
            SolutionResult::Relative { verdict, .. } => *verdict,
            SolutionResult::Absolute { verdict, .. } => *verdict,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            SolutionResult::Relative { message, .. } => message.as_deref(),
            SolutionResult::Absolute { message, .. } => message.as_deref(),
        }
    }

    pub fn solution_rr(&self) -> &RunResult {
        match self {
            SolutionResult::Relative { solution_rr, .. } => solution_rr,
            SolutionResult::Absolute { solution_rr, .. } => solution_rr,
        }
    }

    pub fn judge_rr(&self) -> Option<&RunResult> {
        match self {
            SolutionResult::Relative { judge_rr, .. } => judge_rr.as_ref(),
            SolutionResult::Absolute { judge_rr, .. } => judge_rr.as_ref(),
        }
    }

    /// Absolute points on a test worth `test_points`.
    pub fn points(&self, test_points: Decimal) -> Decimal {
        match self {
            SolutionResult::Relative {
                relative_points, ..
            } => relative_points * test_points,
            SolutionResult::Absolute {
                absolute_points, ..
            } => (*absolute_points).min(test_points),
        }
    }

    pub fn relative(
        verdict: Verdict,
        message: Option<String>,
        solution_rr: RunResult,
        judge_rr: Option<RunResult>,
        relative_points: Decimal,
    ) -> SolutionResult {
        SolutionResult::Relative {
            verdict,
            message,
            solution_rr,
            judge_rr,
            relative_points,
        }
    }
}

/// A solution manager's summary: per-input results, per-test verdicts, total points, and the
/// judge artifacts to hygiene-check later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolutionSummary {
    pub solution: String,
    /// Keyed by input file name; None for inputs whose judging was cancelled.
    pub results: std::collections::BTreeMap<String, Option<SolutionResult>>,
    pub tests: std::collections::BTreeMap<usize, Verdict>,
    pub judge_outs: Vec<TaskPath>,
    pub points: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sandbox::{OutputRef, RunResult, RunResultKind};

    fn ok_rr() -> RunResult {
        RunResult {
            kind: RunResultKind::Ok,
            returncode: 0,
            time: concrete_time::Duration::new(0, 0),
            wall_time: concrete_time::Duration::new(0, 0),
            stdout: OutputRef::Discarded,
            stderr: None,
            status: String::new(),
        }
    }

    #[test]
    fn severity_order() {
        assert!(Verdict::Ok < Verdict::PartialOk);
        assert!(Verdict::PartialOk < Verdict::Timeout);
        assert!(Verdict::Timeout < Verdict::WrongAnswer);
        assert!(Verdict::WrongAnswer < Verdict::Error);
    }

    #[test]
    fn relative_points_scale_with_the_test() {
        let half = SolutionResult::relative(
            Verdict::PartialOk,
            None,
            ok_rr(),
            None,
            Decimal::new(5, 1),
        );
        assert_eq!(half.points(Decimal::from(10)), Decimal::from(5));
    }

    #[test]
    fn absolute_points_are_capped() {
        let result = SolutionResult::Absolute {
            verdict: Verdict::PartialOk,
            message: None,
            solution_rr: ok_rr(),
            judge_rr: None,
            absolute_points: Decimal::from(12),
        };
        assert_eq!(result.points(Decimal::from(10)), Decimal::from(10));
    }
}
