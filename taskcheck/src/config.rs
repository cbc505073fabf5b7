// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The validated task configuration. The `config` document under the task root is TOML; the
//! loader here is glue — everything interesting is the validated `TaskConfig` value and its
//! derived data (transitive predecessor closures, glob unions, the primary solution).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::paths::TaskPath;

///
/// The declarative inputs are inconsistent. Surfaces at load time; the pipeline never starts.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> ConfigError {
        ConfigError {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
    Batch,
    Interactive,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutCheck {
    Diff,
    Tokens,
    Shuffle,
    Judge,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JudgeType {
    OpendataV1,
    CmsBatch,
    CmsCommunication,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GenType {
    OpendataV1,
    CmsOld,
    PisekV1,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DataFormat {
    Text,
    StrictText,
    Binary,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShuffleMode {
    Lines,
    Words,
    LinesWords,
    Tokens,
}

/// Which limit table applies to a program run.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgramKind {
    InGen,
    Validator,
    Solve,
    SecSolve,
    Judge,
}

impl ProgramKind {
    pub fn is_solution(self) -> bool {
        matches!(self, ProgramKind::Solve | ProgramKind::SecSolve)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BuildStrategyName {
    Auto,
    Python,
    Shell,
    C,
    Cpp,
    Pascal,
}

/// Resource limits for one program kind. Limits of 0 mean unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Cpu-time limit in seconds.
    #[serde(default)]
    pub time_limit: f64,
    /// Wall-clock limit = max(time_limit * clock_mul, clock_min).
    #[serde(default = "default_clock_mul")]
    pub clock_mul: f64,
    #[serde(default = "default_clock_min")]
    pub clock_min: f64,
    /// Address-space limit in kilobytes.
    #[serde(default)]
    pub mem_limit: u64,
    #[serde(default = "default_process_limit")]
    pub process_limit: u64,
}

fn default_clock_mul() -> f64 {
    2.0
}
fn default_clock_min() -> f64 {
    1.0
}
// RLIMIT_NPROC counts the whole user's processes, so a nonzero cap is opt-in per task.
fn default_process_limit() -> u64 {
    0
}

impl Default for RunLimits {
    fn default() -> RunLimits {
        RunLimits {
            time_limit: 0.0,
            clock_mul: default_clock_mul(),
            clock_min: default_clock_min(),
            mem_limit: 0,
            process_limit: 0,
        }
    }
}

impl RunLimits {
    /// The wall-clock limit for a given (possibly overridden) cpu-time limit.
    pub fn clock_limit(&self, override_time_limit: Option<f64>) -> f64 {
        let time_limit = override_time_limit.unwrap_or(self.time_limit);
        if time_limit == 0.0 {
            return 0.0;
        }
        (time_limit * self.clock_mul).max(self.clock_min)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub in_gen: RunLimits,
    pub validator: RunLimits,
    pub solve: RunLimits,
    pub sec_solve: RunLimits,
    pub judge: RunLimits,
    /// Input/output size caps in megabytes; 0 disables the check.
    pub input_max_size: u64,
    pub output_max_size: u64,
}

impl LimitsConfig {
    pub fn of(&self, kind: ProgramKind) -> &RunLimits {
        match kind {
            ProgramKind::InGen => &self.in_gen,
            ProgramKind::Validator => &self.validator,
            ProgramKind::Solve => &self.solve,
            ProgramKind::SecSolve => &self.sec_solve,
            ProgramKind::Judge => &self.judge,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    pub solution_for_each_test: bool,
    pub no_unused_inputs: bool,
    pub generator_respects_seed: bool,
    pub generator_deterministic: bool,
}

impl Default for ChecksConfig {
    fn default() -> ChecksConfig {
        ChecksConfig {
            solution_for_each_test: true,
            no_unused_inputs: true,
            generator_respects_seed: true,
            generator_deterministic: true,
        }
    }
}

/// One test (a.k.a. subtask): a glob-defined group of inputs with a point value. Test 0
/// conventionally holds the samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(skip)]
    pub num: usize,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub in_globs: Vec<String>,
    #[serde(default)]
    pub predecessors: Vec<usize>,
    /// Transitive closure of `predecessors`; derived at load.
    #[serde(skip)]
    pub all_predecessors: Vec<usize>,
    /// Own globs united with every predecessor's; derived at load.
    #[serde(skip)]
    pub all_globs: Vec<String>,
}

impl TestConfig {
    /// Whether an input filename belongs to this test (own or inherited globs).
    pub fn in_test(&self, filename: &str) -> bool {
        self.all_globs
            .iter()
            .any(|g| glob::Pattern::new(g).map(|p| p.matches(filename)).unwrap_or(false))
    }

    /// Whether an input filename belongs to this test but to none of its predecessors.
    pub fn new_in_test(&self, filename: &str) -> bool {
        let own = self
            .in_globs
            .iter()
            .any(|g| glob::Pattern::new(g).map(|p| p.matches(filename)).unwrap_or(false));
        own && !self
            .all_globs
            .iter()
            .filter(|g| !self.in_globs.contains(g))
            .any(|g| glob::Pattern::new(g).map(|p| p.matches(filename)).unwrap_or(false))
    }
}

/// One candidate solution and the author's expectations for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolutionConfig {
    #[serde(skip)]
    pub name: String,
    /// The build section producing this solution's executable.
    #[serde(default)]
    pub run: String,
    #[serde(default)]
    pub primary: bool,
    /// Exact expected total points, if declared.
    pub points: Option<Decimal>,
    pub points_min: Option<Decimal>,
    pub points_max: Option<Decimal>,
    /// The per-test expected-verdict mask, one character per test.
    #[serde(default)]
    pub tests: String,
}

/// One build section: how to produce `build/{program_name}` from sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(skip)]
    pub program_name: String,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Extra data files staged next to the sources.
    #[serde(default)]
    pub extras: Vec<String>,
    #[serde(default = "default_strategy")]
    pub strategy: BuildStrategyName,
    /// Required when a python build has more than one source.
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub comp_args: Vec<String>,
}

fn default_strategy() -> BuildStrategyName {
    BuildStrategyName::Auto
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// The build section producing the judge executable.
    pub run: String,
    #[serde(default = "default_judge_type")]
    pub judge_type: JudgeType,
    #[serde(default)]
    pub needs_in: bool,
    #[serde(default)]
    pub needs_out: bool,
}

fn default_judge_type() -> JudgeType {
    JudgeType::OpendataV1
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    pub ignore_newlines: bool,
    pub ignore_case: bool,
    pub float_rel_error: Option<f64>,
    pub float_abs_error: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    pub mode: Option<ShuffleMode>,
    pub ignore_case: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// The build section producing the generator executable.
    pub run: String,
    pub gen_type: GenType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub run: String,
}

///
/// The immutable, validated task configuration.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub task_type: TaskType,
    pub out_check: OutCheck,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub validator: Option<ValidatorConfig>,
    #[serde(default)]
    pub judge: Option<JudgeConfig>,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub shuffle: ShuffleConfig,
    #[serde(default = "default_format")]
    pub in_format: DataFormat,
    #[serde(default = "default_format")]
    pub out_format: DataFormat,
    /// Where user-provided static inputs (and sample outputs) live.
    #[serde(default = "default_static_subdir")]
    pub static_subdir: String,
    pub tests: Vec<TestConfig>,
    #[serde(default)]
    pub solutions: IndexMap<String, SolutionConfig>,
    #[serde(default)]
    pub builds: BTreeMap<String, BuildConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
}

fn default_format() -> DataFormat {
    DataFormat::Text
}

fn default_static_subdir() -> String {
    "static".to_owned()
}

pub const MASK_CHARS: &str = "10XPW!T";

impl TaskConfig {
    /// Read and validate the `config` document under a task root.
    pub fn load(task_root: &Path) -> Result<TaskConfig, ConfigError> {
        let path = task_root.join("config");
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::new(format!("cannot read {}: {e}", path.display())))?;
        let mut config: TaskConfig = toml::from_str(&raw)
            .map_err(|e| ConfigError::new(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate a programmatically built config and fill in the derived fields.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for (index, test) in self.tests.iter_mut().enumerate() {
            test.num = index;
            if test.name.is_empty() {
                test.name = if index == 0 {
                    "samples".to_owned()
                } else {
                    format!("test {index:02}")
                };
            }
        }
        for (name, solution) in self.solutions.iter_mut() {
            solution.name = name.clone();
            if solution.run.is_empty() {
                solution.run = name.clone();
            }
        }
        for (name, build) in self.builds.iter_mut() {
            build.program_name = name.clone();
        }

        self.validate_references()?;
        self.compute_predecessors()?;
        self.validate_solutions()?;
        self.validate_out_check()?;
        Ok(())
    }

    fn validate_references(&self) -> Result<(), ConfigError> {
        for (index, test) in self.tests.iter().enumerate() {
            for &predecessor in &test.predecessors {
                if predecessor >= self.tests.len() {
                    return Err(ConfigError::new(format!(
                        "test {index} lists nonexistent predecessor {predecessor}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn compute_predecessors(&mut self) -> Result<(), ConfigError> {
        // Depth-first closure with an on-stack set for cycle detection.
        fn visit(
            num: usize,
            tests: &[TestConfig],
            closed: &mut Vec<Option<Vec<usize>>>,
            on_stack: &mut Vec<bool>,
        ) -> Result<Vec<usize>, ConfigError> {
            if let Some(closure) = &closed[num] {
                return Ok(closure.clone());
            }
            if on_stack[num] {
                return Err(ConfigError::new(format!(
                    "cyclic test predecessors involving test {num}"
                )));
            }
            on_stack[num] = true;
            let mut closure = Vec::new();
            for &predecessor in &tests[num].predecessors {
                closure.push(predecessor);
                closure.extend(visit(predecessor, tests, closed, on_stack)?);
            }
            on_stack[num] = false;
            closure.sort_unstable();
            closure.dedup();
            closed[num] = Some(closure.clone());
            Ok(closure)
        }

        let mut closed = vec![None; self.tests.len()];
        let mut on_stack = vec![false; self.tests.len()];
        for num in 0..self.tests.len() {
            visit(num, &self.tests, &mut closed, &mut on_stack)?;
        }

        for num in 0..self.tests.len() {
            let closure = closed[num].clone().expect("closure is computed");
            let mut globs = self.tests[num].in_globs.clone();
            for &predecessor in &closure {
                globs.extend(self.tests[predecessor].in_globs.iter().cloned());
            }
            globs.sort();
            globs.dedup();
            self.tests[num].all_predecessors = closure;
            self.tests[num].all_globs = globs;
        }
        Ok(())
    }

    fn validate_solutions(&mut self) -> Result<(), ConfigError> {
        if self.solutions.is_empty() {
            return Ok(());
        }

        let primaries: Vec<&str> = self
            .solutions
            .values()
            .filter(|s| s.primary)
            .map(|s| s.name.as_str())
            .collect();
        if primaries.len() != 1 {
            return Err(ConfigError::new(format!(
                "exactly one solution must be primary, found {}: [{}]",
                primaries.len(),
                primaries.join(", ")
            )));
        }

        let tests_count = self.tests.len();
        for solution in self.solutions.values_mut() {
            if solution.tests.is_empty() {
                solution.tests = if solution.primary {
                    "1".repeat(tests_count)
                } else {
                    "X".repeat(tests_count)
                };
            }
            if solution.tests.chars().count() != tests_count {
                return Err(ConfigError::new(format!(
                    "solution '{}' has tests mask of length {}, expected {tests_count}",
                    solution.name,
                    solution.tests.chars().count()
                )));
            }
            if let Some(bad) = solution.tests.chars().find(|c| !MASK_CHARS.contains(*c)) {
                return Err(ConfigError::new(format!(
                    "solution '{}' has invalid mask character '{bad}'",
                    solution.name
                )));
            }
            if solution.primary && solution.tests.chars().any(|c| c != '1') {
                return Err(ConfigError::new(format!(
                    "primary solution '{}' must have an all-1 tests mask, has '{}'",
                    solution.name, solution.tests
                )));
            }
        }
        Ok(())
    }

    fn validate_out_check(&self) -> Result<(), ConfigError> {
        match self.out_check {
            OutCheck::Judge => {
                if self.judge.is_none() {
                    return Err(ConfigError::new("out_check = \"judge\" needs a [judge] section"));
                }
            }
            OutCheck::Tokens => {
                let relative = self.tokens.float_rel_error.is_some();
                let absolute = self.tokens.float_abs_error.is_some();
                if relative != absolute {
                    return Err(ConfigError::new(
                        "tokens float_rel_error and float_abs_error must be set together",
                    ));
                }
            }
            _ => {}
        }
        if self.task_type == TaskType::Interactive {
            match &self.judge {
                Some(judge) if judge.judge_type == JudgeType::CmsCommunication => {}
                _ => {
                    return Err(ConfigError::new(
                        "interactive tasks need a [judge] section with judge_type = \"cms-communication\"",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn primary_solution(&self) -> Option<&SolutionConfig> {
        self.solutions.values().find(|s| s.primary)
    }

    pub fn total_points(&self) -> u32 {
        self.tests.iter().map(|t| t.points).sum()
    }

    /// The build section for a program reference, defaulting to a single-source auto build
    /// named like the program.
    pub fn build_of(&self, run: &str) -> BuildConfig {
        self.builds.get(run).cloned().unwrap_or_else(|| BuildConfig {
            program_name: run.to_owned(),
            sources: vec![run.to_owned()],
            extras: vec![],
            strategy: BuildStrategyName::Auto,
            entrypoint: String::new(),
            comp_args: vec![],
        })
    }

    pub fn static_dir(&self) -> TaskPath {
        TaskPath::new(&self.static_subdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_test_config() -> TaskConfig {
        toml::from_str(
            r#"
            name = "sum"
            task_type = "batch"
            out_check = "diff"

            [[tests]]
            name = "samples"
            points = 0
            in_globs = ["sample*.in"]

            [[tests]]
            points = 10
            in_globs = ["01*.in"]
            predecessors = [0]

            [solutions.solve]
            primary = true
            points = 10.0
            "#,
        )
        .unwrap()
    }

    #[test]
    fn derives_predecessor_closure_and_glob_union() {
        let mut config = two_test_config();
        config.validate().unwrap();
        assert_eq!(config.tests[1].all_predecessors, vec![0]);
        assert_eq!(
            config.tests[1].all_globs,
            vec!["01*.in".to_owned(), "sample*.in".to_owned()]
        );
        assert!(config.tests[1].in_test("sample01.in"));
        assert!(config.tests[1].in_test("01_abc.in"));
        assert!(config.tests[1].new_in_test("01_abc.in"));
        assert!(!config.tests[1].new_in_test("sample01.in"));
    }

    #[test]
    fn rejects_predecessor_cycles() {
        let mut config = two_test_config();
        config.tests[0].predecessors = vec![1];
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("cyclic"), "{err}");
    }

    #[test]
    fn primary_mask_defaults_to_all_ones() {
        let mut config = two_test_config();
        config.validate().unwrap();
        assert_eq!(config.solutions["solve"].tests, "11");
        assert_eq!(config.primary_solution().unwrap().name, "solve");
    }

    #[test]
    fn rejects_bad_masks() {
        let mut config = two_test_config();
        config.solutions.get_mut("solve").unwrap().tests = "1".to_owned();
        assert!(config.validate().is_err());

        let mut config = two_test_config();
        config.solutions.get_mut("solve").unwrap().tests = "1Z".to_owned();
        assert!(config.validate().is_err());

        let mut config = two_test_config();
        config.solutions.get_mut("solve").unwrap().tests = "10".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("all-1"), "{err}");
    }

    #[test]
    fn rejects_zero_or_two_primaries() {
        let mut config = two_test_config();
        config.solutions.get_mut("solve").unwrap().primary = false;
        assert!(config.validate().is_err());

        let mut config = two_test_config();
        let mut second = config.solutions["solve"].clone();
        second.name = "solve2".to_owned();
        config.solutions.insert("solve2".to_owned(), second);
        assert!(config.validate().is_err());
    }

    #[test]
    fn tokens_float_errors_come_together() {
        let mut config = two_test_config();
        config.out_check = OutCheck::Tokens;
        config.tokens.float_rel_error = Some(1e-6);
        assert!(config.validate().is_err());
        config.tokens.float_abs_error = Some(1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn clock_limit_multiplies_with_floor() {
        let limits = RunLimits {
            time_limit: 0.4,
            clock_mul: 2.0,
            clock_min: 1.0,
            ..RunLimits::default()
        };
        assert_eq!(limits.clock_limit(None), 1.0);
        assert_eq!(limits.clock_limit(Some(3.0)), 6.0);
        assert_eq!(limits.clock_limit(Some(0.0)), 0.0);
    }
}
