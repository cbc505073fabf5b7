// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The input validator: one run per (input, test), fed the input on stdin and told the test
//! index in argv. A nonzero exit rejects the input and fails the job with the log quoted.

use std::collections::BTreeMap;

use pipeline::{Failure, Job};

use crate::config::ProgramKind;
use crate::context::{JobCtx, JobResult, TaskSpec};
use crate::paths::TaskPath;
use crate::program::{program_failure, run_program};

pub struct ValidatorJob {
    validator: String,
    input: TaskPath,
    test: usize,
}

impl ValidatorJob {
    pub fn new(validator: String, input: TaskPath, test: usize) -> ValidatorJob {
        ValidatorJob {
            validator,
            input,
            test,
        }
    }
}

impl Job<TaskSpec> for ValidatorJob {
    fn name(&self) -> String {
        format!("Validate {} on test {}", self.input.name(), self.test)
    }

    fn args(&self) -> Vec<String> {
        vec![self.input.to_string(), self.test.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let log = self
            .input
            .to_log(&format!("{}{}", self.validator, self.test));
        let validator = self.validator.clone();
        let input = self.input.clone();
        let result = run_program(
            ctx,
            ProgramKind::Validator,
            &validator,
            vec![self.test.to_string()],
            Some(&input),
            None,
            Some(&log),
            BTreeMap::new(),
        )?;

        if result.kind != sandbox::RunResultKind::Ok {
            return Err(program_failure(
                ctx,
                &format!("Validator rejected {} (test {}):", self.input, self.test),
                &result,
            ));
        }
        Ok(JobResult::Run(result))
    }
}
