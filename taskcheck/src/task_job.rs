// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! File helpers shared by task jobs. Every operation that reads or writes task files goes
//! through here so that the file joins the job's accessed set (and hence its signature).

use std::path::Path;

use pipeline::Failure;

use crate::context::JobCtx;
use crate::paths::TaskPath;
use crate::text::short_text;

const QUOTE_MAX_LINES: usize = 10;
const QUOTE_MAX_CHARS: usize = 100;

pub trait TaskJobFiles {
    fn read_file(&mut self, path: &TaskPath) -> Result<String, Failure>;
    fn file_exists(&mut self, path: &TaskPath) -> bool;
    fn file_size(&mut self, path: &TaskPath) -> Result<u64, Failure>;
    fn copy_file(&mut self, from: &TaskPath, to: &TaskPath) -> Result<(), Failure>;
    /// Hard-link `from` to `to`, replacing any previous `to`.
    fn link_file(&mut self, from: &TaskPath, to: &TaskPath) -> Result<(), Failure>;
    /// Symlink `to` pointing at `from` (relative), replacing any previous `to`.
    fn symlink_file(&mut self, from: &TaskPath, to: &TaskPath) -> Result<(), Failure>;
    fn files_equal(&mut self, a: &TaskPath, b: &TaskPath) -> Result<bool, Failure>;
    /// A shortened quote of a file's contents, for failure messages.
    fn quote_file(&mut self, path: &TaskPath) -> String;
}

impl TaskJobFiles for JobCtx<'_> {
    fn read_file(&mut self, path: &TaskPath) -> Result<String, Failure> {
        self.access_file(path);
        std::fs::read_to_string(path)
            .map_err(|e| Failure::new(format!("cannot read {path}: {e}")))
    }

    fn file_exists(&mut self, path: &TaskPath) -> bool {
        self.access_file(path);
        path.as_path().is_file()
    }

    fn file_size(&mut self, path: &TaskPath) -> Result<u64, Failure> {
        self.access_file(path);
        std::fs::metadata(path)
            .map(|metadata| metadata.len())
            .map_err(|e| Failure::new(format!("cannot stat {path}: {e}")))
    }

    fn copy_file(&mut self, from: &TaskPath, to: &TaskPath) -> Result<(), Failure> {
        self.access_file(from);
        self.access_file(to);
        make_file_dirs(to)?;
        std::fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| Failure::new(format!("cannot copy {from} to {to}: {e}")))
    }

    fn link_file(&mut self, from: &TaskPath, to: &TaskPath) -> Result<(), Failure> {
        self.access_file(from);
        self.access_file(to);
        make_file_dirs(to)?;
        remove_existing(to)?;
        std::fs::hard_link(from, to)
            .map_err(|e| Failure::new(format!("cannot link {from} to {to}: {e}")))
    }

    fn symlink_file(&mut self, from: &TaskPath, to: &TaskPath) -> Result<(), Failure> {
        self.access_file(from);
        self.access_file(to);
        make_file_dirs(to)?;
        remove_existing(to)?;
        let target = relative_to(from.as_path(), to.as_path());
        std::os::unix::fs::symlink(&target, to)
            .map_err(|e| Failure::new(format!("cannot symlink {to} to {from}: {e}")))
    }

    fn files_equal(&mut self, a: &TaskPath, b: &TaskPath) -> Result<bool, Failure> {
        self.access_file(a);
        self.access_file(b);
        let content_a = std::fs::read(a)
            .map_err(|e| Failure::new(format!("cannot read {a}: {e}")))?;
        let content_b = std::fs::read(b)
            .map_err(|e| Failure::new(format!("cannot read {b}: {e}")))?;
        Ok(content_a == content_b)
    }

    fn quote_file(&mut self, path: &TaskPath) -> String {
        self.access_file(path);
        match std::fs::read_to_string(path) {
            Ok(content) => format!(
                "{path}:\n{}",
                crate::text::tab(&short_text(content.trim_end(), QUOTE_MAX_LINES, QUOTE_MAX_CHARS))
            ),
            Err(_) => format!("{path}: <unreadable>"),
        }
    }
}

pub fn make_file_dirs(path: &TaskPath) -> Result<(), Failure> {
    if let Some(parent) = path.as_path().parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Failure::new(format!("cannot create {}: {e}", parent.display())))?;
    }
    Ok(())
}

fn remove_existing(path: &TaskPath) -> Result<(), Failure> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Failure::new(format!("cannot replace {path}: {e}"))),
    }
}

/// The relative path from `link`'s directory to `target`, for readable symlinks inside the
/// task tree.
fn relative_to(target: &Path, link: &Path) -> std::path::PathBuf {
    let link_dir: Vec<_> = link.parent().map(|p| p.components().collect()).unwrap_or_default();
    let target_components: Vec<_> = target.components().collect();

    let common = link_dir
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = std::path::PathBuf::new();
    for _ in common..link_dir.len() {
        out.push("..");
    }
    for component in &target_components[common..] {
        out.push(component);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::relative_to;
    use std::path::{Path, PathBuf};

    #[test]
    fn relative_symlink_targets() {
        assert_eq!(
            relative_to(
                Path::new("tests/_inputs/01.in"),
                Path::new("tests/solve/01.in")
            ),
            PathBuf::from("../_inputs/01.in")
        );
        assert_eq!(
            relative_to(Path::new("tests/_inputs/01.in"), Path::new("tests/_inputs/x")),
            PathBuf::from("01.in")
        );
    }
}
