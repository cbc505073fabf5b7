// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Scheduling input production. One planner instance per manager tracks which inputs it has
//! already visited, wires generation, determinism/respects-seed checks, validation and format
//! checks for each fresh input, and guarantees each input file is generated at most once.

use std::collections::HashMap;

use pipeline::{Failure, ItemId, Manager};

use crate::config::{DataFormat, GeneratorConfig};
use crate::context::{BatchCtx, JobResult, ManagerCtx, TaskSpec};
use crate::data::{DataSmallJob, IsCleanJob};
use crate::generator::{
    supports_determinism_check, GenerateJob, RespectsSeedJob, TestDeterminismJob,
};
use crate::testcase::{derive_seed, TestcaseInfo};
use crate::validator::ValidatorJob;

/// The seeds one testcase is run with: one derived seed per repeat, or a single unseeded run.
pub fn seeds_for(testcase: &TestcaseInfo, iteration: u64) -> Vec<Option<u64>> {
    if testcase.seeded {
        (0..testcase.repeat)
            .map(|index| Some(derive_seed(iteration, index, &testcase.name)))
            .collect()
    } else {
        vec![None]
    }
}

pub struct InputPlanner {
    generator: Option<GeneratorConfig>,
    /// The generation job per input file name, for dependents within this manager.
    gen_jobs: HashMap<String, ItemId>,
}

impl InputPlanner {
    pub fn new(generator: Option<GeneratorConfig>) -> InputPlanner {
        InputPlanner {
            generator,
            gen_jobs: HashMap::new(),
        }
    }

    pub fn gen_job(&self, input_name: &str) -> Option<ItemId> {
        self.gen_jobs.get(input_name).copied()
    }

    ///
    /// Schedule production of one fresh input: generation (for generated testcases), the
    /// determinism check on the first repeat, validation against the test's constraints, and
    /// the input format/size checks. Returns the generation job, if one was scheduled.
    ///
    pub fn produce_input(
        &mut self,
        ctx: &mut BatchCtx<'_>,
        testcase: &TestcaseInfo,
        seed: Option<u64>,
        test: usize,
        check_determinism: bool,
    ) -> Result<Option<ItemId>, Failure> {
        let env = ctx.context().env();
        let input = testcase.input_path(seed, None);
        let input_name = testcase.input_name(seed);

        let mut gen_job = None;
        if testcase.is_generated() {
            let generator = self
                .generator
                .clone()
                .ok_or_else(|| Failure::new("generated testcase without a configured generator"))?;
            let job = ctx.add_job(GenerateJob::new(
                generator.clone(),
                testcase.clone(),
                seed,
                input.clone(),
            ));
            self.gen_jobs.insert(input_name, job);
            gen_job = Some(job);

            if check_determinism
                && env.checks().generator_deterministic
                && supports_determinism_check(generator.gen_type)
            {
                let determinism = ctx.add_job(TestDeterminismJob::new(
                    generator,
                    testcase.clone(),
                    seed,
                    input.clone(),
                ));
                ctx.add_prerequisite(job, determinism, None);
            }
        }

        if env.in_format() == DataFormat::Text {
            let clean = ctx.add_job(IsCleanJob::new(input.clone()));
            if let Some(job) = gen_job {
                ctx.add_prerequisite(job, clean, None);
            }
        }
        if env.input_max_size() != 0 {
            let small = ctx.add_job(DataSmallJob::input(input.clone(), env.input_max_size()));
            if let Some(job) = gen_job {
                ctx.add_prerequisite(job, small, None);
            }
        }

        if test > 0 {
            if let Some(validator) = env.validator() {
                let validate = ctx.add_job(ValidatorJob::new(validator.run, input, test));
                if let Some(job) = gen_job {
                    ctx.add_prerequisite(job, validate, None);
                }
            }
        }

        Ok(gen_job)
    }

    ///
    /// Schedule the respects-seed check for a seeded testcase: two distinct seeds must
    /// produce different bytes. When only one repeat was scheduled, a second seed is
    /// synthesized and generated just for the comparison.
    ///
    pub fn respects_seed(
        &mut self,
        ctx: &mut BatchCtx<'_>,
        testcase: &TestcaseInfo,
        seeds: &[Option<u64>],
    ) -> Result<(), Failure> {
        debug_assert!(testcase.seeded && testcase.is_generated());
        let iteration = ctx.context().env().iteration();

        let mut seeds: Vec<u64> = seeds.iter().flatten().copied().collect();
        if seeds.len() == 1 {
            let extra = derive_seed(iteration, 1, &testcase.name);
            self.produce_input(ctx, testcase, Some(extra), 0, false)?;
            seeds.push(extra);
        }

        let (first, second) = (seeds[0], seeds[1]);
        let inputs = (
            testcase.input_path(Some(first), None),
            testcase.input_path(Some(second), None),
        );
        let check = ctx.add_job(RespectsSeedJob::new(
            testcase.clone(),
            (first, second),
            inputs,
        ));
        for seed in [first, second] {
            if let Some(job) = self.gen_job(&testcase.input_name(Some(seed))) {
                ctx.add_prerequisite(job, check, None);
            }
        }
        Ok(())
    }
}

///
/// Generates and checks every input without running any solution: the pipeline shape used
/// when only the generator is being tested, or when the task has no solutions.
///
pub struct RunGenerator {
    scheduled: usize,
}

impl RunGenerator {
    pub fn new() -> RunGenerator {
        RunGenerator { scheduled: 0 }
    }
}

impl Manager<TaskSpec> for RunGenerator {
    fn name(&self) -> String {
        "Run generator".to_owned()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        let env = ctx.context().env();
        let iteration = env.iteration();
        let respects_seed = env.checks().generator_respects_seed;
        let mut planner = InputPlanner::new(env.generator());

        let plan = ctx
            .prerequisite("inputs")
            .and_then(JobResult::as_testcase_plan)
            .cloned()
            .ok_or_else(|| Failure::new("inputs manager result is missing"))?;

        let mut seen = std::collections::BTreeSet::new();
        for (&test, testcases) in &plan {
            for testcase in testcases {
                let seeds = seeds_for(testcase, iteration);
                let mut skipped = false;
                for (index, &seed) in seeds.iter().enumerate() {
                    let input_name = testcase.input_name(seed);
                    if !seen.insert(input_name) {
                        skipped = true;
                        continue;
                    }
                    self.scheduled += 1;
                    planner.produce_input(ctx, testcase, seed, test, index == 0)?;
                }
                if respects_seed && testcase.seeded && testcase.is_generated() && !skipped {
                    planner.respects_seed(ctx, testcase, &seeds)?;
                }
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, _ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        log::info!("generated and checked {} inputs", self.scheduled);
        Ok(JobResult::None)
    }
}
