// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The typed path model: every file the harness touches is addressed by a normalized,
//! task-root-relative `TaskPath`. Keeping paths relative keeps job signatures stable across
//! working directories; the process chdirs into the task root once, at startup.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const BUILD_DIR: &str = "build";
pub const TESTS_DIR: &str = "tests";
pub const INTERNALS_DIR: &str = ".taskcheck";

pub const INPUTS_SUBDIR: &str = "_inputs";
pub const GENERATED_SUBDIR: &str = "_generated";
pub const SANITIZED_SUBDIR: &str = "_sanitized";

/// A normalized task-root-relative path. Equality is path equality.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPath(PathBuf);

impl TaskPath {
    pub fn new(path: impl AsRef<Path>) -> TaskPath {
        TaskPath(normalize(path.as_ref()))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// The final path component.
    pub fn name(&self) -> &str {
        self.0
            .file_name()
            .map(|name| name.to_str().expect("task paths are utf-8"))
            .unwrap_or("")
    }

    pub fn join(&self, part: impl AsRef<Path>) -> TaskPath {
        TaskPath::new(self.0.join(part))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// Replace the extension-looking suffix: `01.in` with `.in2` becomes `01.in2`.
    pub fn replace_suffix(&self, new_suffix: &str) -> TaskPath {
        let stem = match self.0.file_stem() {
            Some(stem) => self.0.with_file_name(stem),
            None => self.0.clone(),
        };
        let mut s = stem.into_os_string();
        s.push(new_suffix);
        TaskPath(PathBuf::from(s))
    }

    /// The staged executable artifact for a program name (extension dropped).
    pub fn executable(program: &str) -> TaskPath {
        let stem = Path::new(program)
            .file_stem()
            .map(|s| s.to_str().expect("program names are utf-8").to_owned())
            .unwrap_or_else(|| program.to_owned());
        TaskPath::new(Path::new(BUILD_DIR).join(stem))
    }

    /// A path under `build/`.
    pub fn executable_path(part: &str) -> TaskPath {
        TaskPath::new(Path::new(BUILD_DIR).join(part))
    }

    /// A path under `tests/`.
    pub fn data_path(part: &str) -> TaskPath {
        TaskPath::new(Path::new(TESTS_DIR).join(part))
    }

    /// The shared input directory, or a per-solution directory after deduplication.
    pub fn input_path(name: &str, solution: Option<&str>) -> TaskPath {
        match solution {
            None => TaskPath::new(Path::new(TESTS_DIR).join(INPUTS_SUBDIR).join(name)),
            Some(solution) => TaskPath::new(Path::new(TESTS_DIR).join(solution).join(name)),
        }
    }

    /// Where cms-old generators regenerate their whole dataset.
    pub fn generated_path(name: &str) -> TaskPath {
        TaskPath::new(Path::new(TESTS_DIR).join(GENERATED_SUBDIR).join(name))
    }

    /// A static reference output, colocated with the shared inputs.
    pub fn static_output(name: &str) -> TaskPath {
        TaskPath::input_path(name, None)
    }

    /// `foo.in` to `foo.out`, in place.
    pub fn to_output(&self) -> TaskPath {
        self.replace_suffix(".out")
    }

    /// The stderr capture of running `program` on this input/output.
    pub fn to_log(&self, program: &str) -> TaskPath {
        self.replace_suffix(&format!(".{program}.log"))
    }

    /// The points file a cms-style judge writes next to its log.
    pub fn to_points(&self) -> TaskPath {
        self.replace_suffix(".points")
    }

    /// The sanitized twin of a text file, under `tests/_sanitized/`.
    pub fn to_sanitized(&self) -> TaskPath {
        let mut name = format!("{}.clean", self.name());
        let parent = self
            .0
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|p| p.to_str())
            .unwrap_or("");
        if parent != INPUTS_SUBDIR && !parent.is_empty() {
            name = name.replacen('.', &format!(".{parent}."), 1);
        }
        TaskPath::new(Path::new(TESTS_DIR).join(SANITIZED_SUBDIR).join(name))
    }

    /// The stderr capture of a generator's listing run.
    pub fn generator_log(generator: &str) -> TaskPath {
        TaskPath::input_path(&format!("{generator}.log"), None)
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for TaskPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<TaskPath> for PathBuf {
    fn from(path: TaskPath) -> PathBuf {
        path.0
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes() {
        assert_eq!(TaskPath::new("tests/./_inputs//01.in"), TaskPath::new("tests/_inputs/01.in"));
        assert_eq!(TaskPath::new("tests/../build/solve").to_string(), "build/solve");
    }

    #[test]
    fn equality_is_path_equality() {
        assert_eq!(TaskPath::new("a/b"), TaskPath::new("a/./b"));
        assert_ne!(TaskPath::new("a/b"), TaskPath::new("a/c"));
    }

    #[test]
    fn executable_drops_extension() {
        assert_eq!(TaskPath::executable("solve.py").to_string(), "build/solve");
        assert_eq!(TaskPath::executable("solutions/solve.cpp").to_string(), "build/solve");
    }

    #[test]
    fn derived_variants() {
        let input = TaskPath::input_path("01_2af.in", Some("solve"));
        assert_eq!(input.to_string(), "tests/solve/01_2af.in");
        assert_eq!(input.to_output().to_string(), "tests/solve/01_2af.out");
        assert_eq!(
            input.to_output().to_log("judge").to_string(),
            "tests/solve/01_2af.judge.log"
        );
        assert_eq!(
            input.to_output().to_log("judge").to_points().to_string(),
            "tests/solve/01_2af.judge.points"
        );
    }

    #[test]
    fn sanitized_twin_disambiguates_by_directory() {
        let shared = TaskPath::input_path("01.in", None);
        assert_eq!(
            shared.to_sanitized().to_string(),
            "tests/_sanitized/01.in.clean"
        );
        let per_solution = TaskPath::input_path("01.out", Some("solve"));
        assert_eq!(
            per_solution.to_sanitized().to_string(),
            "tests/_sanitized/01.solve.out.clean"
        );
    }
}
