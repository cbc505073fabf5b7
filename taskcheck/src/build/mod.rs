// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Build jobs: staging sources into a fresh workspace, picking a strategy, and moving the
//! produced artifact into `build/{program}`.

pub mod strategies;

use std::path::{Path, PathBuf};

use pipeline::{Failure, Job, Manager};

use crate::config::{BuildStrategyName, OutCheck};
use crate::context::{BatchCtx, JobCtx, JobResult, ManagerCtx, TaskSpec};
use crate::paths::{TaskPath, BUILD_DIR};
use crate::tools::StageToolJob;

const STAGE_SUBDIR: &str = "_stage";

///
/// Build one program: resolve source globs, stage everything into an empty workspace, run the
/// strategy, and atomically replace `build/{program}` with the artifact.
///
pub struct BuildJob {
    /// The build section name; the config itself is read (and logged) at run time.
    pub run: String,
}

impl BuildJob {
    pub fn new(run: impl Into<String>) -> BuildJob {
        BuildJob { run: run.into() }
    }

    fn resolve_sources(
        &self,
        ctx: &mut JobCtx<'_>,
        patterns: &[String],
    ) -> Result<Vec<PathBuf>, Failure> {
        let mut resolved = Vec::new();
        for pattern in patterns {
            let mut matches = Vec::new();
            for candidate in [
                pattern.clone(),
                format!("{pattern}.*"),
                format!("solutions/{pattern}"),
                format!("solutions/{pattern}.*"),
            ] {
                let paths = glob::glob(&candidate)
                    .map_err(|e| Failure::new(format!("bad source pattern '{candidate}': {e}")))?;
                for path in paths.flatten() {
                    if !matches.contains(&path) {
                        matches.push(path);
                    }
                }
            }
            if matches.is_empty() {
                return Err(Failure::new(format!(
                    "No source matches '{pattern}' for build '{}'",
                    self.run
                )));
            }
            for path in matches {
                if !resolved.contains(&path) {
                    resolved.push(path);
                }
            }
        }
        resolved.sort();

        let files = resolved.iter().filter(|p| p.is_file()).count();
        let directories = resolved.iter().filter(|p| p.is_dir()).count();
        if files > 0 && directories > 0 {
            return Err(Failure::new(format!(
                "Sources of build '{}' mix files and directories",
                self.run
            )));
        }

        for path in &resolved {
            if path.is_file() {
                ctx.access_file(path);
            }
        }
        Ok(resolved)
    }
}

impl Job<TaskSpec> for BuildJob {
    fn name(&self) -> String {
        format!("Build {}", self.run)
    }

    fn args(&self) -> Vec<String> {
        vec![self.run.clone()]
    }

    fn run(&mut self, ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let build = ctx.context().env().build_of(&self.run);
        let sources = self.resolve_sources(ctx, &build.sources)?;
        let extras = self.resolve_sources(ctx, &build.extras)?;

        let strategy = match build.strategy {
            BuildStrategyName::Auto => strategies::resolve_auto(&build, &sources)?,
            named => strategies::strategy_named(named).expect("non-auto strategy exists"),
        };

        // Stage into an empty per-program workspace.
        let stage = Path::new(BUILD_DIR).join(STAGE_SUBDIR).join(&build.program_name);
        if stage.exists() {
            std::fs::remove_dir_all(&stage)
                .map_err(|e| Failure::new(format!("cannot clear {}: {e}", stage.display())))?;
        }
        std::fs::create_dir_all(&stage)
            .map_err(|e| Failure::new(format!("cannot create {}: {e}", stage.display())))?;

        let mut staged_sources = Vec::new();
        for source in sources.iter().chain(extras.iter()) {
            let staged_name = source
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| Failure::new(format!("unusable source name {source:?}")))?
                .to_owned();
            if source.is_dir() {
                copy_dir(source, &stage.join(&staged_name))?;
            } else {
                std::fs::copy(source, stage.join(&staged_name))
                    .map_err(|e| Failure::new(format!("cannot stage {}: {e}", source.display())))?;
            }
            if sources.contains(source) {
                staged_sources.push(staged_name);
            }
        }

        let artifact = strategy.build(&stage, &staged_sources, &build)?;

        let destination = TaskPath::executable(&build.program_name);
        replace_artifact(&stage, &artifact, &destination)?;

        if destination.as_path().is_file() {
            ctx.access_file(&destination);
        } else {
            ctx.access_file(destination.join("run"));
        }
        Ok(JobResult::None)
    }
}

/// Atomically replace `build/{program}` with the artifact: rename over a cleared target.
fn replace_artifact(
    stage: &Path,
    artifact: &str,
    destination: &TaskPath,
) -> Result<(), Failure> {
    if let Some(parent) = destination.as_path().parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Failure::new(format!("cannot create {}: {e}", parent.display())))?;
    }
    if destination.as_path().is_dir() {
        std::fs::remove_dir_all(destination)
            .map_err(|e| Failure::new(format!("cannot clear {destination}: {e}")))?;
    } else if destination.as_path().exists() {
        std::fs::remove_file(destination)
            .map_err(|e| Failure::new(format!("cannot clear {destination}: {e}")))?;
    }

    let produced = if artifact == "." {
        stage.to_owned()
    } else {
        stage.join(artifact)
    };
    std::fs::rename(&produced, destination).map_err(|e| {
        Failure::new(format!(
            "cannot move {} to {destination}: {e}",
            produced.display()
        ))
    })?;

    // Leftover staging from file artifacts.
    if artifact != "." && stage.exists() {
        let _ = std::fs::remove_dir_all(stage);
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), Failure> {
    std::fs::create_dir_all(to)
        .map_err(|e| Failure::new(format!("cannot create {}: {e}", to.display())))?;
    let entries = std::fs::read_dir(from)
        .map_err(|e| Failure::new(format!("cannot read {}: {e}", from.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Failure::new(format!("cannot read dir entry: {e}")))?;
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| Failure::new(format!("cannot copy {:?}: {e}", entry.path())))?;
        }
    }
    Ok(())
}

///
/// Builds the task's support programs: generator, validator, and the output-check judge (a
/// compiled judge, or a staged bundled tool). Solutions are built by their own managers.
///
pub struct BuildManager;

impl Manager<TaskSpec> for BuildManager {
    fn name(&self) -> String {
        "Build programs".to_owned()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        let env = ctx.context().env();
        if let Some(generator) = env.generator() {
            ctx.add_job(BuildJob::new(generator.run));
        }
        if let Some(validator) = env.validator() {
            ctx.add_job(BuildJob::new(validator.run));
        }
        match env.out_check() {
            OutCheck::Judge => {
                let judge = env.judge().expect("out_check judge implies a judge section");
                ctx.add_job(BuildJob::new(judge.run));
            }
            OutCheck::Tokens => {
                ctx.add_job(StageToolJob::token_judge());
            }
            OutCheck::Shuffle => {
                ctx.add_job(StageToolJob::shuffle_judge());
            }
            OutCheck::Diff => {}
        }
        Ok(())
    }

    fn evaluate(&mut self, _ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        Ok(JobResult::None)
    }
}
