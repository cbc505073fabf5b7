// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The generator subsystem: listing the inputs a generator can produce, producing them, and
//! the determinism / respects-seed checks. Three protocols are spoken; see `GenType`.

use std::collections::BTreeMap;

use pipeline::{Failure, Job, Manager};

use crate::config::{GenType, GeneratorConfig, ProgramKind};
use crate::context::{BatchCtx, JobCtx, JobResult, ManagerCtx, TaskSpec};
use crate::paths::TaskPath;
use crate::program::{program_failure, run_program};
use crate::task_job::TaskJobFiles;
use crate::testcase::TestcaseInfo;
use crate::text::tab;

///
/// Produce the list of testcases this task's generator offers.
///
/// * opendata-v1 generators implicitly offer one seeded testcase per test index > 0, named
///   by the two-digit index; no listing run is needed.
/// * cms-old generators are run once with a destination directory and offer whatever `*.in`
///   files appear there (unseeded).
/// * pisek-v1 generators are run with no arguments and print one `name [repeat=N]
///   [seeded=true|false]` line per testcase.
///
pub struct ListInputsJob {
    generator: GeneratorConfig,
}

impl ListInputsJob {
    pub fn new(generator: GeneratorConfig) -> ListInputsJob {
        ListInputsJob { generator }
    }

    fn list_opendata(&self, ctx: &mut JobCtx<'_>) -> Result<Vec<TestcaseInfo>, Failure> {
        let tests = ctx.context().env().tests_count();
        Ok((1..tests)
            .map(|num| TestcaseInfo::generated(format!("{num:02}"), 1, true))
            .collect())
    }

    fn list_cms_old(&self, ctx: &mut JobCtx<'_>) -> Result<Vec<TestcaseInfo>, Failure> {
        let generated_dir = TaskPath::generated_path(".");
        if generated_dir.as_path().exists() {
            std::fs::remove_dir_all(&generated_dir)
                .map_err(|e| Failure::new(format!("cannot clear {generated_dir}: {e}")))?;
        }
        std::fs::create_dir_all(&generated_dir)
            .map_err(|e| Failure::new(format!("cannot create {generated_dir}: {e}")))?;

        let result = run_program(
            ctx,
            ProgramKind::InGen,
            &self.generator.run,
            vec![generated_dir.to_string()],
            None,
            None,
            Some(&TaskPath::generator_log(&self.generator.run)),
            BTreeMap::new(),
        )?;
        if result.kind != sandbox::RunResultKind::Ok {
            return Err(program_failure(ctx, "Generator failed:", &result));
        }

        let mut testcases = Vec::new();
        let entries = std::fs::read_dir(&generated_dir)
            .map_err(|e| Failure::new(format!("cannot read {generated_dir}: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| Failure::new(format!("cannot list inputs: {e}")))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".in") {
                testcases.push(TestcaseInfo::generated(stem, 1, false));
            }
        }
        testcases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(testcases)
    }

    fn list_pisek_v1(&self, ctx: &mut JobCtx<'_>) -> Result<Vec<TestcaseInfo>, Failure> {
        let listing = TaskPath::data_path("inputs_list");
        let result = run_program(
            ctx,
            ProgramKind::InGen,
            &self.generator.run,
            vec![],
            None,
            Some(&listing),
            Some(&TaskPath::generator_log(&self.generator.run)),
            BTreeMap::new(),
        )?;
        if result.kind != sandbox::RunResultKind::Ok {
            return Err(program_failure(
                ctx,
                &format!("{} failed to list inputs:", self.generator.run),
                &result,
            ));
        }

        let lines = ctx.read_file(&listing)?;
        let mut testcases: Vec<TestcaseInfo> = Vec::new();
        let mut names = std::collections::BTreeSet::new();
        for (index, line) in lines.lines().enumerate() {
            let testcase = parse_listing_line(line, index)?;
            if !names.insert(testcase.name.clone()) {
                return Err(listing_line_invalid(
                    index,
                    line,
                    &format!("Input '{}' already listed", testcase.name),
                ));
            }
            testcases.push(testcase);
        }
        Ok(testcases)
    }
}

fn listing_line_invalid(index: usize, line: &str, reason: &str) -> Failure {
    Failure::new(format!(
        "Inputs list invalid (line {}) - {reason}:\n{}",
        index + 1,
        tab(line.trim_end())
    ))
}

fn parse_listing_line(line: &str, index: usize) -> Result<TestcaseInfo, Failure> {
    let line = line.trim_end_matches('\n');
    if line.is_empty() {
        return Err(listing_line_invalid(index, line, "Line empty"));
    }

    let mut parts = line.split(' ');
    let name = parts.next().expect("split yields at least one part");
    let mut repeat: u32 = 1;
    let mut seeded = true;
    let mut seen = std::collections::BTreeSet::new();

    for part in parts {
        let Some((key, value)) = part.split_once('=') else {
            return Err(listing_line_invalid(index, line, "Missing '='"));
        };
        if value.contains('=') {
            return Err(listing_line_invalid(index, line, "Too many '='"));
        }
        if !seen.insert(key.to_owned()) {
            return Err(listing_line_invalid(
                index,
                line,
                &format!("Repeated key '{key}'"),
            ));
        }
        match key {
            "repeat" => {
                repeat = value.parse().ok().filter(|&n| n > 0).ok_or_else(|| {
                    listing_line_invalid(index, line, "'repeat' should be a positive number")
                })?;
            }
            "seeded" => {
                seeded = match value {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(listing_line_invalid(
                            index,
                            line,
                            "'seeded' should be 'true' or 'false'",
                        ));
                    }
                };
            }
            other => {
                return Err(listing_line_invalid(
                    index,
                    line,
                    &format!("Unknown argument: '{other}'"),
                ));
            }
        }
    }

    if !seeded && repeat > 1 {
        return Err(listing_line_invalid(
            index,
            line,
            "For unseeded input 'repeat' must be '1'",
        ));
    }
    Ok(TestcaseInfo::generated(name, repeat, seeded))
}

impl Job<TaskSpec> for ListInputsJob {
    fn name(&self) -> String {
        "List generator inputs".to_owned()
    }

    fn args(&self) -> Vec<String> {
        vec![self.generator.run.clone(), self.generator.gen_type.to_string()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let testcases = match self.generator.gen_type {
            GenType::OpendataV1 => self.list_opendata(ctx)?,
            GenType::CmsOld => self.list_cms_old(ctx)?,
            GenType::PisekV1 => self.list_pisek_v1(ctx)?,
        };
        Ok(JobResult::Testcases(testcases))
    }
}

/// Produce one input file (or serve it from the cms-old regeneration directory).
pub struct GenerateJob {
    generator: GeneratorConfig,
    testcase: TestcaseInfo,
    seed: Option<u64>,
    target: TaskPath,
}

impl GenerateJob {
    pub fn new(
        generator: GeneratorConfig,
        testcase: TestcaseInfo,
        seed: Option<u64>,
        target: TaskPath,
    ) -> GenerateJob {
        GenerateJob {
            generator,
            testcase,
            seed,
            target,
        }
    }
}

/// Run the generator with protocol-specific argv, stdout redirected to `target`.
fn generate_into(
    ctx: &mut JobCtx<'_>,
    generator: &GeneratorConfig,
    testcase: &TestcaseInfo,
    seed: Option<u64>,
    target: &TaskPath,
) -> Result<(), Failure> {
    let args = match generator.gen_type {
        GenType::OpendataV1 => {
            let test: usize = testcase.name.parse().map_err(|_| {
                Failure::new(format!(
                    "opendata-v1 testcase '{}' is not a test index",
                    testcase.name
                ))
            })?;
            let seed = seed.expect("opendata-v1 testcases are seeded");
            vec![test.to_string(), format!("{seed:x}")]
        }
        GenType::PisekV1 => {
            let mut args = vec![testcase.name.clone()];
            if testcase.seeded {
                let seed = seed.expect("seeded testcases take a seed");
                args.push(format!("{seed:x}"));
            }
            args
        }
        GenType::CmsOld => unreachable!("cms-old inputs are served, not generated"),
    };

    let result = run_program(
        ctx,
        ProgramKind::InGen,
        &generator.run,
        args,
        None,
        Some(target),
        Some(&target.to_log(&generator.run)),
        BTreeMap::new(),
    )?;
    if result.kind != sandbox::RunResultKind::Ok {
        let seed_text = seed.map(|s| format!(", seed {s:x}")).unwrap_or_default();
        return Err(program_failure(
            ctx,
            &format!(
                "{} failed on input {}{seed_text}:",
                generator.run, testcase.name
            ),
            &result,
        ));
    }
    Ok(())
}

impl Job<TaskSpec> for GenerateJob {
    fn name(&self) -> String {
        match self.generator.gen_type {
            GenType::CmsOld => format!("Serve {}", self.target.name()),
            _ => format!("Generate {}", self.target.name()),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![self.testcase.name.clone()];
        if let Some(seed) = self.seed {
            args.push(format!("{seed:x}"));
        }
        args
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        match self.generator.gen_type {
            GenType::CmsOld => {
                let source = TaskPath::generated_path(&self.testcase.input_name(None));
                let target = self.target.clone();
                ctx.link_file(&source, &target)?;
            }
            _ => {
                let testcase = self.testcase.clone();
                let generator = self.generator.clone();
                let target = self.target.clone();
                generate_into(ctx, &generator, &testcase, self.seed, &target)?;
            }
        }
        Ok(JobResult::None)
    }
}

///
/// Generate the same input twice with the same seed and require byte-equal results.
///
pub struct TestDeterminismJob {
    generator: GeneratorConfig,
    testcase: TestcaseInfo,
    seed: Option<u64>,
    input: TaskPath,
}

impl TestDeterminismJob {
    pub fn new(
        generator: GeneratorConfig,
        testcase: TestcaseInfo,
        seed: Option<u64>,
        input: TaskPath,
    ) -> TestDeterminismJob {
        TestDeterminismJob {
            generator,
            testcase,
            seed,
            input,
        }
    }
}

impl Job<TaskSpec> for TestDeterminismJob {
    fn name(&self) -> String {
        match self.seed {
            Some(seed) => format!(
                "Generator is deterministic ({}, seed {seed:x})",
                self.testcase.name
            ),
            None => format!("Generator is deterministic ({})", self.testcase.name),
        }
    }

    fn args(&self) -> Vec<String> {
        self.seed.map(|s| vec![format!("{s:x}")]).unwrap_or_default()
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let copy = self.input.replace_suffix(".in2");
        let testcase = self.testcase.clone();
        let generator = self.generator.clone();
        generate_into(ctx, &generator, &testcase, self.seed, &copy)?;
        if !ctx.files_equal(&self.input, &copy)? {
            let seed_text = self.seed.map(|s| format!(", seed {s:x}")).unwrap_or_default();
            return Err(Failure::new(format!(
                "Generator is not deterministic. Files {} and {} differ ({}{seed_text})",
                self.input, copy, self.testcase.name
            )));
        }
        Ok(JobResult::None)
    }
}

///
/// Require that two different seeds produce different bytes. When only one seed was
/// scheduled, the caller synthesizes a second one.
///
pub struct RespectsSeedJob {
    testcase: TestcaseInfo,
    seeds: (u64, u64),
    inputs: (TaskPath, TaskPath),
}

impl RespectsSeedJob {
    pub fn new(
        testcase: TestcaseInfo,
        seeds: (u64, u64),
        inputs: (TaskPath, TaskPath),
    ) -> RespectsSeedJob {
        RespectsSeedJob {
            testcase,
            seeds,
            inputs,
        }
    }
}

impl Job<TaskSpec> for RespectsSeedJob {
    fn name(&self) -> String {
        format!(
            "Generator respects seeds ({}, seeds {:x} {:x})",
            self.testcase.name, self.seeds.0, self.seeds.1
        )
    }

    fn args(&self) -> Vec<String> {
        vec![format!("{:x}", self.seeds.0), format!("{:x}", self.seeds.1)]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        if ctx.files_equal(&self.inputs.0, &self.inputs.1)? {
            return Err(Failure::new(format!(
                "Generator ignores seeds: files {} and {} are identical (seeds {:x}, {:x})",
                self.inputs.0, self.inputs.1, self.seeds.0, self.seeds.1
            )));
        }
        Ok(JobResult::None)
    }
}

/// Whether a protocol's generators are checked for determinism. cms-old regenerates the
/// whole dataset each listing, and its determinism is deliberately left unchecked.
pub fn supports_determinism_check(gen_type: GenType) -> bool {
    matches!(gen_type, GenType::OpendataV1 | GenType::PisekV1)
}

///
/// Prepares the generator: runs its listing protocol once the build has finished. The
/// listing is consumed by the data manager under this manager's code name.
///
pub struct PrepareGenerator {
    list_job: Option<pipeline::ItemId>,
}

impl PrepareGenerator {
    pub fn new() -> PrepareGenerator {
        PrepareGenerator { list_job: None }
    }
}

impl Manager<TaskSpec> for PrepareGenerator {
    fn name(&self) -> String {
        "Prepare generator".to_owned()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        let generator = ctx
            .context()
            .env()
            .generator()
            .ok_or_else(|| Failure::new("no generator configured"))?;
        self.list_job = Some(ctx.add_job(ListInputsJob::new(generator)));
        Ok(())
    }

    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        let list_job = self.list_job.expect("jobs were created");
        Ok(ctx
            .result(list_job)
            .cloned()
            .unwrap_or(JobResult::Testcases(vec![])))
    }
}

#[cfg(test)]
mod listing_tests;
