// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Assembling the whole-task pipeline: tools → builds → generator listing → input plan →
//! judge sanity checks → one manager per solution (the first owns input generation) →
//! testing log → completeness check.

use crate::completeness::CompletenessCheck;
use crate::context::TaskPipeline;
use crate::data::InputsManager;
use crate::env::{Env, TestingTarget};
use crate::generator::PrepareGenerator;
use crate::input_plan::RunGenerator;
use crate::judge::JudgeManager;
use crate::solution::manager::SolutionManager;
use crate::testing_log::CreateTestingLog;
use crate::tools::ToolsManager;

/// The solutions to test, primary first (its outputs double as reference outputs).
pub fn solution_order(env: &Env) -> Vec<String> {
    let mut solutions = env.solutions();
    if let Some(primary) = env.primary_solution() {
        if let Some(position) = solutions.iter().position(|name| *name == primary) {
            let primary = solutions.remove(position);
            solutions.insert(0, primary);
        }
    }
    solutions
}

pub fn build_task_pipeline(env: &Env) -> TaskPipeline {
    let mut pipeline = TaskPipeline::new(!env.full(), env.strict());

    let tools = pipeline.add_manager(ToolsManager);
    let build = pipeline.add_manager(crate::build::BuildManager);
    pipeline.add_prerequisite(tools, build, None);

    let generator = env.generator().map(|_| {
        let generator = pipeline.add_manager(PrepareGenerator::new());
        pipeline.add_prerequisite(build, generator, None);
        generator
    });

    let inputs = pipeline.add_manager(InputsManager);
    pipeline.add_prerequisite(build, inputs, None);
    if let Some(generator) = generator {
        pipeline.add_prerequisite(generator, inputs, Some("generator"));
    }

    let solutions = solution_order(env);
    if env.target() == TestingTarget::Generator || solutions.is_empty() {
        let run_generator = pipeline.add_manager(RunGenerator::new());
        pipeline.add_prerequisite(inputs, run_generator, Some("inputs"));
        return pipeline;
    }

    let judge = pipeline.add_manager(JudgeManager::new());
    pipeline.add_prerequisite(inputs, judge, Some("inputs"));

    let mut solution_managers = Vec::new();
    for (index, solution) in solutions.iter().enumerate() {
        // The first manager to visit an input owns its generation; the rest symlink.
        let manager = pipeline.add_manager(SolutionManager::new(solution.clone(), index == 0));
        pipeline.add_prerequisite(inputs, manager, Some("inputs"));
        if index == 0 {
            pipeline.add_prerequisite(judge, manager, None);
        } else {
            pipeline.add_prerequisite(solution_managers[0], manager, None);
        }
        solution_managers.push(manager);
    }

    if env.testing_log() {
        let testing_log = pipeline.add_manager(CreateTestingLog::new(solutions.clone()));
        for (solution, &manager) in solutions.iter().zip(&solution_managers) {
            pipeline.add_weak_prerequisite(
                manager,
                testing_log,
                Some(&format!("solution_{solution}")),
            );
        }
    }

    let completeness = pipeline.add_manager(CompletenessCheck::new(solutions.clone()));
    pipeline.add_prerequisite(judge, completeness, Some("judge"));
    for (solution, &manager) in solutions.iter().zip(&solution_managers) {
        pipeline.add_prerequisite(
            manager,
            completeness,
            Some(&format!("solution_{solution}")),
        );
    }

    pipeline
}
