// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Build strategies: how one staged workspace of sources becomes an executable artifact.
//! Compilers run as plain (unsandboxed) subprocesses; they are the task author's own tools.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use pipeline::Failure;

use crate::config::{BuildConfig, BuildStrategyName};
use crate::text::tab;

const C_FLAGS: &[&str] = &["-std=c17", "-O2", "-Wall", "-lm", "-Wshadow"];
const CPP_FLAGS: &[&str] = &["-std=c++20", "-O2", "-Wall", "-lm", "-Wshadow"];
const PASCAL_FLAGS: &[&str] = &["-gl", "-O3", "-Sg"];

pub trait BuildStrategy {
    fn name(&self) -> BuildStrategyName;

    /// Whether this strategy can build the given sources (workspace-relative file names, or a
    /// single directory).
    fn applicable(&self, build: &BuildConfig, sources: &[PathBuf]) -> Result<bool, Failure>;

    ///
    /// Build inside the staged workspace and return the workspace-relative path of the
    /// produced artifact (a file, or "." for a directory artifact).
    ///
    fn build(
        &self,
        workdir: &Path,
        sources: &[String],
        build: &BuildConfig,
    ) -> Result<String, Failure>;
}

pub fn strategy_named(name: BuildStrategyName) -> Option<Box<dyn BuildStrategy>> {
    match name {
        BuildStrategyName::Auto => None,
        BuildStrategyName::Python => Some(Box::new(Python)),
        BuildStrategyName::Shell => Some(Box::new(Shell)),
        BuildStrategyName::C => Some(Box::new(C)),
        BuildStrategyName::Cpp => Some(Box::new(Cpp)),
        BuildStrategyName::Pascal => Some(Box::new(Pascal)),
    }
}

pub fn auto_strategies() -> Vec<Box<dyn BuildStrategy>> {
    vec![
        Box::new(Python),
        Box::new(Shell),
        Box::new(C),
        Box::new(Cpp),
        Box::new(Pascal),
    ]
}

fn ends_with(source: &Path, suffixes: &[&str]) -> bool {
    let name = source.to_string_lossy();
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

fn all_end_with(sources: &[PathBuf], suffixes: &[&str]) -> bool {
    sources.iter().all(|source| ends_with(source, suffixes))
}

/// Check that a tool is reachable: an absolute/relative path, or a PATH lookup.
fn check_tool(tool: &str) -> Result<(), Failure> {
    let tool = tool.split_whitespace().next().unwrap_or(tool);
    let found = if tool.contains('/') {
        Path::new(tool).exists()
    } else {
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(tool).is_file())
            })
            .unwrap_or(false)
    };
    if found {
        Ok(())
    } else {
        Err(Failure::new(format!("Missing tool: {tool}")))
    }
}

fn run_compilation(workdir: &Path, argv: &[String], program: &str) -> Result<(), Failure> {
    check_tool(&argv[0])?;
    log::debug!("compiling '{}'", argv.join(" "));

    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(workdir)
        .output()
        .map_err(|e| Failure::new(format!("cannot run {}: {e}", argv[0])))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Failure::new(format!(
            "Compilation of {program} failed:\n{}\n{}",
            tab(&argv.join(" ")),
            tab(stderr.trim_end())
        )));
    }
    Ok(())
}

/// Shebang checks plus the executable bit: what turns a script source into the artifact.
fn build_script(workdir: &Path, script: &str) -> Result<String, Failure> {
    let path = workdir.join(script);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Failure::new(format!("cannot read {script}: {e}")))?;
    let first_line = content.split_inclusive('\n').next().unwrap_or("");

    if !first_line.starts_with("#!") {
        return Err(Failure::new(format!("Missing shebang in {script}")));
    }
    if first_line.ends_with("\r\n") {
        return Err(Failure::new(format!(
            "First line ends with '\\r\\n' in {script}"
        )));
    }
    let interpreter = first_line.trim_end().trim_start_matches("#!").trim();
    check_tool(interpreter)?;

    let metadata = std::fs::metadata(&path)
        .map_err(|e| Failure::new(format!("cannot stat {script}: {e}")))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    std::fs::set_permissions(&path, permissions)
        .map_err(|e| Failure::new(format!("cannot chmod {script}: {e}")))?;

    Ok(script.to_owned())
}

struct Python;

impl BuildStrategy for Python {
    fn name(&self) -> BuildStrategyName {
        BuildStrategyName::Python
    }

    fn applicable(&self, build: &BuildConfig, sources: &[PathBuf]) -> Result<bool, Failure> {
        if !all_end_with(sources, &[".py"]) {
            return Ok(false);
        }
        if sources.len() > 1 && build.entrypoint.is_empty() {
            return Err(Failure::new(format!(
                "For multiple python files 'entrypoint' must be set (build '{}').",
                build.program_name
            )));
        }
        Ok(true)
    }

    fn build(
        &self,
        workdir: &Path,
        sources: &[String],
        build: &BuildConfig,
    ) -> Result<String, Failure> {
        if let [source] = sources {
            return build_script(workdir, source);
        }

        let with_py = format!("{}.py", build.entrypoint);
        let entrypoint = if sources.contains(&with_py) {
            with_py
        } else if sources.contains(&build.entrypoint) {
            build.entrypoint.clone()
        } else {
            return Err(Failure::new(format!(
                "Entrypoint '{}' not in sources.",
                build.entrypoint
            )));
        };

        let entrypoint = build_script(workdir, &entrypoint)?;
        std::os::unix::fs::symlink(&entrypoint, workdir.join("run"))
            .map_err(|e| Failure::new(format!("cannot create run entry: {e}")))?;
        Ok(".".to_owned())
    }
}

struct Shell;

impl BuildStrategy for Shell {
    fn name(&self) -> BuildStrategyName {
        BuildStrategyName::Shell
    }

    fn applicable(&self, _build: &BuildConfig, sources: &[PathBuf]) -> Result<bool, Failure> {
        Ok(sources.len() == 1 && ends_with(&sources[0], &[".sh"]))
    }

    fn build(
        &self,
        workdir: &Path,
        sources: &[String],
        _build: &BuildConfig,
    ) -> Result<String, Failure> {
        build_script(workdir, &sources[0])
    }
}

struct C;

impl BuildStrategy for C {
    fn name(&self) -> BuildStrategyName {
        BuildStrategyName::C
    }

    fn applicable(&self, _build: &BuildConfig, sources: &[PathBuf]) -> Result<bool, Failure> {
        Ok(all_end_with(sources, &[".h", ".c"]))
    }

    fn build(
        &self,
        workdir: &Path,
        sources: &[String],
        build: &BuildConfig,
    ) -> Result<String, Failure> {
        let target = build.program_name.clone();
        let mut argv = vec!["gcc".to_owned()];
        argv.extend(sources.iter().filter(|s| s.ends_with(".c")).cloned());
        argv.extend(["-o".to_owned(), target.clone(), "-I.".to_owned()]);
        argv.extend(C_FLAGS.iter().map(|&flag| flag.to_owned()));
        argv.extend(build.comp_args.iter().cloned());
        run_compilation(workdir, &argv, &build.program_name)?;
        Ok(target)
    }
}

struct Cpp;

impl BuildStrategy for Cpp {
    fn name(&self) -> BuildStrategyName {
        BuildStrategyName::Cpp
    }

    fn applicable(&self, _build: &BuildConfig, sources: &[PathBuf]) -> Result<bool, Failure> {
        Ok(all_end_with(sources, &[".h", ".hpp", ".cpp", ".cc"]))
    }

    fn build(
        &self,
        workdir: &Path,
        sources: &[String],
        build: &BuildConfig,
    ) -> Result<String, Failure> {
        let target = build.program_name.clone();
        let mut argv = vec!["g++".to_owned()];
        argv.extend(
            sources
                .iter()
                .filter(|s| s.ends_with(".cpp") || s.ends_with(".cc"))
                .cloned(),
        );
        argv.extend(["-o".to_owned(), target.clone(), "-I.".to_owned()]);
        argv.extend(CPP_FLAGS.iter().map(|&flag| flag.to_owned()));
        argv.extend(build.comp_args.iter().cloned());
        run_compilation(workdir, &argv, &build.program_name)?;
        Ok(target)
    }
}

struct Pascal;

impl BuildStrategy for Pascal {
    fn name(&self) -> BuildStrategyName {
        BuildStrategyName::Pascal
    }

    fn applicable(&self, _build: &BuildConfig, sources: &[PathBuf]) -> Result<bool, Failure> {
        Ok(all_end_with(sources, &[".pas"]))
    }

    fn build(
        &self,
        workdir: &Path,
        sources: &[String],
        build: &BuildConfig,
    ) -> Result<String, Failure> {
        let target = build.program_name.clone();
        let mut argv = vec!["fpc".to_owned()];
        argv.extend(PASCAL_FLAGS.iter().map(|&flag| flag.to_owned()));
        argv.push(format!("-o{target}"));
        argv.push("-FE.".to_owned());
        argv.extend(sources.iter().cloned());
        argv.extend(build.comp_args.iter().cloned());
        run_compilation(workdir, &argv, &build.program_name)?;
        Ok(target)
    }
}

///
/// Resolve the `auto` strategy: exactly one registered strategy must apply.
///
pub fn resolve_auto(
    build: &BuildConfig,
    sources: &[PathBuf],
) -> Result<Box<dyn BuildStrategy>, Failure> {
    let mut applicable = Vec::new();
    for strategy in auto_strategies() {
        if strategy.applicable(build, sources)? {
            applicable.push(strategy);
        }
    }
    match applicable.len() {
        0 => Err(Failure::new(format!(
            "No applicable build strategy for '{}' with sources:\n{}",
            build.program_name,
            tab(&sources
                .iter()
                .map(|s| s.display().to_string())
                .collect::<Vec<_>>()
                .join("\n"))
        ))),
        1 => Ok(applicable.pop().expect("one strategy")),
        _ => Err(Failure::new(format!(
            "Multiple build strategies applicable for '{}': {}",
            build.program_name,
            applicable
                .iter()
                .map(|s| s.name().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ))),
    }
}
