// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The run environment: CLI-level settings plus the task config, behind logging getters.
//!
//! Every read a job makes goes through a getter here and is recorded, so that the job's
//! signature captures the value it saw. The fields themselves are private: there is no
//! unrecorded way for job code to reach them. `value_of` renders a recorded name for
//! signature recomputation without logging anything.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{
    BuildConfig, ChecksConfig, DataFormat, GeneratorConfig, JudgeConfig, OutCheck, ProgramKind,
    RunLimits, ShuffleConfig, SolutionConfig, TaskConfig, TaskType, TestConfig, TokensConfig,
    ValidatorConfig,
};
use crate::paths::TaskPath;

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum TestingTarget {
    All,
    Generator,
    Solution,
}

/// CLI-level run settings.
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub target: TestingTarget,
    /// Verbose mode: run every item to completion even when peers fail.
    pub full: bool,
    /// Interpret warnings as failures.
    pub strict: bool,
    pub testing_log: bool,
    /// Solutions to test, in run order (the primary first when reference outputs are needed).
    pub solutions: Vec<String>,
    /// Overrides the configured solution time limit.
    pub timeout: Option<f64>,
    /// Run every input even when a test's outcome is already definitive.
    pub all_inputs: bool,
    /// Which repeat of the whole run this is; salts generator seeds.
    pub iteration: u64,
}

impl Default for RunSettings {
    fn default() -> RunSettings {
        RunSettings {
            target: TestingTarget::All,
            full: false,
            strict: false,
            testing_log: false,
            solutions: vec![],
            timeout: None,
            all_inputs: false,
            iteration: 0,
        }
    }
}

pub struct Env {
    settings: RunSettings,
    config: TaskConfig,
    accessed: Mutex<BTreeSet<String>>,
    locked: bool,
}

impl Env {
    pub fn new(settings: RunSettings, config: TaskConfig) -> Env {
        Env {
            settings,
            config,
            accessed: Mutex::new(BTreeSet::new()),
            locked: false,
        }
    }

    /// A copy with no accesses logged. Locked snapshots cannot be forked further.
    pub fn fork(&self) -> Result<Env, String> {
        if self.locked {
            return Err("cannot fork a locked env snapshot".to_owned());
        }
        Ok(Env {
            settings: self.settings.clone(),
            config: self.config.clone(),
            accessed: Mutex::new(BTreeSet::new()),
            locked: false,
        })
    }

    pub fn lock(mut self) -> Env {
        self.locked = true;
        self
    }

    fn log<T>(&self, name: &str, value: T) -> T {
        self.accessed.lock().insert(name.to_owned());
        value
    }

    pub fn drain_accesses(&self) -> BTreeSet<String> {
        std::mem::take(&mut self.accessed.lock())
    }

    // Run settings.

    pub fn target(&self) -> TestingTarget {
        self.log("target", self.settings.target)
    }

    pub fn full(&self) -> bool {
        self.log("full", self.settings.full)
    }

    pub fn strict(&self) -> bool {
        self.log("strict", self.settings.strict)
    }

    pub fn testing_log(&self) -> bool {
        self.log("testing_log", self.settings.testing_log)
    }

    pub fn solutions(&self) -> Vec<String> {
        self.log("solutions", self.settings.solutions.clone())
    }

    pub fn timeout(&self) -> Option<f64> {
        self.log("timeout", self.settings.timeout)
    }

    pub fn all_inputs(&self) -> bool {
        self.log("all_inputs", self.settings.all_inputs)
    }

    pub fn iteration(&self) -> u64 {
        self.log("iteration", self.settings.iteration)
    }

    // Config sections.

    pub fn task_name(&self) -> String {
        self.log("config.name", self.config.name.clone())
    }

    pub fn task_type(&self) -> TaskType {
        self.log("config.task_type", self.config.task_type)
    }

    pub fn out_check(&self) -> OutCheck {
        self.log("config.out_check", self.config.out_check)
    }

    pub fn generator(&self) -> Option<GeneratorConfig> {
        self.log("config.generator", self.config.generator.clone())
    }

    pub fn validator(&self) -> Option<ValidatorConfig> {
        self.log("config.validator", self.config.validator.clone())
    }

    pub fn judge(&self) -> Option<JudgeConfig> {
        self.log("config.judge", self.config.judge.clone())
    }

    pub fn tokens(&self) -> TokensConfig {
        self.log("config.tokens", self.config.tokens.clone())
    }

    pub fn shuffle(&self) -> ShuffleConfig {
        self.log("config.shuffle", self.config.shuffle.clone())
    }

    pub fn in_format(&self) -> DataFormat {
        self.log("config.in_format", self.config.in_format)
    }

    pub fn out_format(&self) -> DataFormat {
        self.log("config.out_format", self.config.out_format)
    }

    pub fn static_dir(&self) -> TaskPath {
        self.log("config.static_subdir", self.config.static_dir())
    }

    pub fn tests_count(&self) -> usize {
        self.log("config.tests", self.config.tests.len())
    }

    pub fn test(&self, num: usize) -> TestConfig {
        self.log(&format!("config.tests.{num}"), self.config.tests[num].clone())
    }

    pub fn total_points(&self) -> u32 {
        self.log("config.tests", self.config.total_points())
    }

    pub fn solution(&self, name: &str) -> Option<SolutionConfig> {
        self.log(
            &format!("config.solutions.{name}"),
            self.config.solutions.get(name).cloned(),
        )
    }

    pub fn primary_solution(&self) -> Option<String> {
        self.log(
            "config.primary_solution",
            self.config.primary_solution().map(|s| s.name.clone()),
        )
    }

    pub fn limits(&self, kind: ProgramKind) -> RunLimits {
        self.log(&format!("config.limits.{kind}"), *self.config.limits.of(kind))
    }

    pub fn input_max_size(&self) -> u64 {
        self.log("config.limits.input_max_size", self.config.limits.input_max_size)
    }

    pub fn output_max_size(&self) -> u64 {
        self.log("config.limits.output_max_size", self.config.limits.output_max_size)
    }

    pub fn build_of(&self, run: &str) -> BuildConfig {
        self.log(&format!("config.builds.{run}"), self.config.build_of(run))
    }

    pub fn checks(&self) -> ChecksConfig {
        self.log("config.checks", self.config.checks.clone())
    }

    ///
    /// Render a recorded name for signature recomputation. Must agree with what the getters
    /// return, and must not log.
    ///
    pub fn value_of(&self, name: &str) -> Option<String> {
        fn render<T: Serialize>(value: T) -> Option<String> {
            Some(serde_json::to_string(&value).expect("env values serialize"))
        }

        if let Some(rest) = name.strip_prefix("config.tests.") {
            let num: usize = rest.parse().ok()?;
            return render(self.config.tests.get(num)?);
        }
        if let Some(rest) = name.strip_prefix("config.solutions.") {
            return render(self.config.solutions.get(rest));
        }
        if let Some(rest) = name.strip_prefix("config.limits.") {
            if let Ok(kind) = rest.parse::<ProgramKind>() {
                return render(self.config.limits.of(kind));
            }
        }
        if let Some(rest) = name.strip_prefix("config.builds.") {
            return render(self.config.build_of(rest));
        }

        match name {
            "target" => render(self.settings.target.to_string()),
            "full" => render(self.settings.full),
            "strict" => render(self.settings.strict),
            "testing_log" => render(self.settings.testing_log),
            "solutions" => render(&self.settings.solutions),
            "timeout" => render(self.settings.timeout),
            "all_inputs" => render(self.settings.all_inputs),
            "iteration" => render(self.settings.iteration),
            "config.name" => render(&self.config.name),
            "config.task_type" => render(self.config.task_type),
            "config.out_check" => render(self.config.out_check),
            "config.generator" => render(&self.config.generator),
            "config.validator" => render(&self.config.validator),
            "config.judge" => render(&self.config.judge),
            "config.tokens" => render(&self.config.tokens),
            "config.shuffle" => render(&self.config.shuffle),
            "config.in_format" => render(self.config.in_format),
            "config.out_format" => render(self.config.out_format),
            "config.static_subdir" => render(&self.config.static_subdir),
            "config.tests" => render(self.config.tests.len()),
            "config.primary_solution" => {
                render(self.config.primary_solution().map(|s| &s.name))
            }
            "config.limits.input_max_size" => render(self.config.limits.input_max_size),
            "config.limits.output_max_size" => render(self.config.limits.output_max_size),
            "config.checks" => render(&self.config.checks),
            _ => None,
        }
    }
}

impl std::str::FromStr for ProgramKind {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_gen" => Ok(ProgramKind::InGen),
            "validator" => Ok(ProgramKind::Validator),
            "solve" => Ok(ProgramKind::Solve),
            "sec_solve" => Ok(ProgramKind::SecSolve),
            "judge" => Ok(ProgramKind::Judge),
            _ => Err(strum::ParseError::VariantNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;

    fn env() -> Env {
        let mut config: TaskConfig = toml::from_str(
            r#"
            name = "sum"
            task_type = "batch"
            out_check = "diff"

            [[tests]]
            points = 0
            in_globs = ["sample*.in"]

            [[tests]]
            points = 10
            in_globs = ["01*.in"]
            predecessors = [0]

            [solutions.solve]
            primary = true
            points = 10
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        Env::new(RunSettings::default(), config)
    }

    #[test]
    fn getters_log_accesses() {
        let env = env();
        let _ = env.timeout();
        let _ = env.limits(ProgramKind::Solve);
        let _ = env.test(1);
        let accessed = env.drain_accesses();
        assert_eq!(
            accessed.into_iter().collect::<Vec<_>>(),
            vec![
                "config.limits.solve".to_owned(),
                "config.tests.1".to_owned(),
                "timeout".to_owned(),
            ]
        );
        // Drained: nothing left.
        assert!(env.drain_accesses().is_empty());
    }

    #[test]
    fn value_of_does_not_log() {
        let env = env();
        assert!(env.value_of("timeout").is_some());
        assert!(env.value_of("config.tests.1").is_some());
        assert!(env.value_of("config.tests.7").is_none());
        assert!(env.value_of("no_such_field").is_none());
        assert!(env.drain_accesses().is_empty());
    }

    #[test]
    fn value_of_tracks_getter_values() {
        let env = env();
        let rendered = env.value_of("config.limits.solve").unwrap();
        let typed: crate::config::RunLimits = serde_json::from_str(&rendered).unwrap();
        assert_eq!(typed, env.limits(ProgramKind::Solve));
    }

    #[test]
    fn locked_snapshots_do_not_fork() {
        let env = env().fork().unwrap().lock();
        assert!(env.fork().is_err());
    }
}
