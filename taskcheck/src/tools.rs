// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The bundled tools: the token judge, the shuffle judge, and the text preprocessor.
//!
//! Each is staged into `build/` as a symlink back to the harness's own executable; when the
//! binary is invoked under a tool's name it dispatches straight into the implementations
//! here. The judges exit 42 to accept and 43 to reject, mirroring their invocation contract.

use std::path::Path;
use std::process::Command;

use pipeline::{Failure, Job, Manager};

use crate::config::{ShuffleMode, TokensConfig};
use crate::context::{BatchCtx, JobCtx, JobResult, ManagerCtx, TaskSpec};
use crate::paths::TaskPath;
use crate::text::tab;

pub const TOKEN_JUDGE: &str = "judge-tokens";
pub const SHUFFLE_JUDGE: &str = "judge-shuffle";
pub const TEXT_PREPROC: &str = "text-preproc";

pub const EXIT_ACCEPT: i32 = 42;
pub const EXIT_REJECT: i32 = 43;

///
/// Stage one bundled tool into `build/{tool}` as a symlink to the running executable.
///
pub struct StageToolJob {
    tool: &'static str,
}

impl StageToolJob {
    pub fn token_judge() -> StageToolJob {
        StageToolJob { tool: TOKEN_JUDGE }
    }

    pub fn shuffle_judge() -> StageToolJob {
        StageToolJob { tool: SHUFFLE_JUDGE }
    }

    pub fn text_preproc() -> StageToolJob {
        StageToolJob { tool: TEXT_PREPROC }
    }
}

impl Job<TaskSpec> for StageToolJob {
    fn name(&self) -> String {
        format!("Prepare {}", self.tool)
    }

    fn args(&self) -> Vec<String> {
        // The tool's behavior is versioned with the harness itself.
        vec![self.tool.to_owned(), env!("CARGO_PKG_VERSION").to_owned()]
    }

    fn run(&mut self, _ctx: &mut JobCtx<'_>) -> Result<JobResult, Failure> {
        let current = std::env::current_exe()
            .map_err(|e| Failure::new(format!("cannot locate own executable: {e}")))?;
        let destination = TaskPath::executable_path(self.tool);
        crate::task_job::make_file_dirs(&destination)?;
        match std::fs::remove_file(&destination) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Failure::new(format!("cannot replace {destination}: {e}"))),
        }
        std::os::unix::fs::symlink(&current, &destination)
            .map_err(|e| Failure::new(format!("cannot stage {destination}: {e}")))?;
        Ok(JobResult::None)
    }
}

///
/// Stages the tools every run needs regardless of out-check mode.
///
pub struct ToolsManager;

impl Manager<TaskSpec> for ToolsManager {
    fn name(&self) -> String {
        "Prepare tools".to_owned()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_>) -> Result<(), Failure> {
        ctx.add_job(StageToolJob::text_preproc());
        Ok(())
    }

    fn evaluate(&mut self, _ctx: &mut ManagerCtx<'_>) -> Result<JobResult, Failure> {
        Ok(JobResult::None)
    }
}

/// When invoked under a tool's name, run it and return its exit code.
pub fn dispatch_tool(invoked_as: &str, args: &[String]) -> Option<i32> {
    match invoked_as {
        TOKEN_JUDGE => Some(token_judge_main(args)),
        SHUFFLE_JUDGE => Some(shuffle_judge_main(args)),
        TEXT_PREPROC => Some(text_preproc_main()),
        _ => None,
    }
}

// --- token judge ---

struct TokenFlags {
    ignore_newlines: bool,
    ignore_case: bool,
    float_errors: Option<(f64, f64)>,
}

fn token_judge_main(args: &[String]) -> i32 {
    let mut flags = TokenFlags {
        ignore_newlines: false,
        ignore_case: false,
        float_errors: None,
    };
    let mut files = Vec::new();
    let mut relative_error = None;
    let mut absolute_error = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-t" => {}
            "-n" => flags.ignore_newlines = true,
            "-i" => flags.ignore_case = true,
            "-r" => {}
            "-e" => relative_error = iter.next().and_then(|v| v.parse().ok()),
            "-E" => absolute_error = iter.next().and_then(|v| v.parse().ok()),
            other => files.push(other.to_owned()),
        }
    }
    if let (Some(relative), Some(absolute)) = (relative_error, absolute_error) {
        flags.float_errors = Some((relative, absolute));
    }
    let [output, correct] = files.as_slice() else {
        eprintln!("usage: {TOKEN_JUDGE} [flags] <output> <correct-output>");
        return 2;
    };

    match (std::fs::read_to_string(output), std::fs::read_to_string(correct)) {
        (Ok(output), Ok(correct)) => {
            if tokens_equivalent(&output, &correct, &flags) {
                EXIT_ACCEPT
            } else {
                eprintln!("Token streams differ");
                EXIT_REJECT
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("cannot read input: {e}");
            2
        }
    }
}

fn tokens_equivalent(output: &str, correct: &str, flags: &TokenFlags) -> bool {
    let lines = |text: &str| -> Vec<Vec<String>> {
        let mut lines: Vec<Vec<String>> = if flags.ignore_newlines {
            vec![text.split_whitespace().map(str::to_owned).collect()]
        } else {
            text.lines()
                .map(|line| line.split_whitespace().map(str::to_owned).collect())
                .collect()
        };
        // Trailing blank lines never count.
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines
    };

    let output_lines = lines(output);
    let correct_lines = lines(correct);
    if output_lines.len() != correct_lines.len() {
        return false;
    }
    output_lines
        .iter()
        .zip(correct_lines.iter())
        .all(|(a_line, b_line)| {
            a_line.len() == b_line.len()
                && a_line
                    .iter()
                    .zip(b_line.iter())
                    .all(|(a, b)| tokens_match(a, b, flags))
        })
}

fn tokens_match(a: &str, b: &str, flags: &TokenFlags) -> bool {
    if let Some((relative, absolute)) = flags.float_errors {
        if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
            let diff = (x - y).abs();
            return diff <= absolute || diff <= relative * y.abs();
        }
    }
    if flags.ignore_case {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

// --- shuffle judge ---

fn shuffle_judge_main(args: &[String]) -> i32 {
    let mut mode = ShuffleMode::Tokens;
    let mut ignore_case = false;
    let mut files = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-m" => {
                mode = match iter.next().map(String::as_str) {
                    Some("lines") => ShuffleMode::Lines,
                    Some("words") => ShuffleMode::Words,
                    Some("lines_words") => ShuffleMode::LinesWords,
                    Some("tokens") | None => ShuffleMode::Tokens,
                    Some(other) => {
                        eprintln!("unknown shuffle mode '{other}'");
                        return 2;
                    }
                }
            }
            "-i" => ignore_case = true,
            other => files.push(other.to_owned()),
        }
    }
    let [output, correct] = files.as_slice() else {
        eprintln!("usage: {SHUFFLE_JUDGE} [-m mode] [-i] <output> <correct-output>");
        return 2;
    };

    match (std::fs::read_to_string(output), std::fs::read_to_string(correct)) {
        (Ok(output), Ok(correct)) => {
            if shuffled_equivalent(&output, &correct, mode, ignore_case) {
                EXIT_ACCEPT
            } else {
                eprintln!("Outputs are not a permutation of each other");
                EXIT_REJECT
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("cannot read input: {e}");
            2
        }
    }
}

fn shuffled_equivalent(output: &str, correct: &str, mode: ShuffleMode, ignore_case: bool) -> bool {
    let fold = |text: &str| {
        if ignore_case {
            text.to_ascii_lowercase()
        } else {
            text.to_owned()
        }
    };
    let sorted = |mut items: Vec<String>| {
        items.sort();
        items
    };
    let line_words = |line: &str| -> Vec<String> {
        line.split_whitespace().map(fold).collect()
    };

    match mode {
        ShuffleMode::Lines => {
            // Lines may come in any order; each line stays intact.
            sorted(output.lines().map(fold).collect())
                == sorted(correct.lines().map(fold).collect())
        }
        ShuffleMode::Words => {
            // Words may be reordered within their line.
            let normalize = |text: &str| -> Vec<Vec<String>> {
                text.lines().map(|line| sorted(line_words(line))).collect()
            };
            normalize(output) == normalize(correct)
        }
        ShuffleMode::LinesWords => {
            let normalize = |text: &str| -> Vec<Vec<String>> {
                sorted_nested(text.lines().map(|line| sorted(line_words(line))).collect())
            };
            normalize(output) == normalize(correct)
        }
        ShuffleMode::Tokens => {
            sorted(output.split_whitespace().map(fold).collect())
                == sorted(correct.split_whitespace().map(fold).collect())
        }
    }
}

fn sorted_nested(mut lines: Vec<Vec<String>>) -> Vec<Vec<String>> {
    lines.sort();
    lines
}

// --- text preprocessor ---

///
/// Canonicalize text from stdin to stdout: CRLF to LF, stray CRs dropped, trailing
/// whitespace stripped from lines, and a final newline ensured. Exits 42 on success; a file
/// that is not valid UTF-8 is rejected.
///
fn text_preproc_main() -> i32 {
    use std::io::{Read, Write};

    let mut raw = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut raw) {
        eprintln!("cannot read stdin: {e}");
        return 2;
    }
    let Ok(text) = String::from_utf8(raw) else {
        eprintln!("input is not valid utf-8");
        return 2;
    };

    let sanitized = sanitize_text(&text);
    let mut stdout = std::io::stdout();
    if let Err(e) = stdout.write_all(sanitized.as_bytes()).and_then(|()| stdout.flush()) {
        eprintln!("cannot write stdout: {e}");
        return 2;
    }
    EXIT_ACCEPT
}

pub fn sanitize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split('\n') {
        let line = line.trim_end_matches(['\r', ' ', '\t']);
        out.push_str(&line.replace('\r', ""));
        out.push('\n');
    }
    // split('\n') yields a trailing empty piece for well-terminated text.
    while out.ends_with("\n\n") {
        out.pop();
    }
    if out == "\n" {
        out.clear();
    }
    out
}

// --- invoking staged tools from jobs ---

///
/// Run a staged tool as a subprocess. Tools are the harness's own trusted code, so they run
/// outside the sandbox, like compilers do.
///
pub fn run_tool(
    ctx: &mut JobCtx<'_>,
    tool: &str,
    args: &[String],
    stdin: Option<&TaskPath>,
    stdout: Option<&TaskPath>,
) -> Result<std::process::Output, Failure> {
    let executable = TaskPath::executable_path(tool);
    if !executable.as_path().exists() {
        return Err(Failure::new(format!(
            "Tool {executable} is not staged, although it should have been."
        )));
    }

    let mut command = Command::new(executable.as_path());
    command.args(args);
    if let Some(stdin) = stdin {
        ctx.access_file(stdin);
        let file = std::fs::File::open(stdin)
            .map_err(|e| Failure::new(format!("cannot open {stdin}: {e}")))?;
        command.stdin(file);
    } else {
        command.stdin(std::process::Stdio::null());
    }
    if let Some(stdout) = stdout {
        ctx.access_file(stdout);
        crate::task_job::make_file_dirs(stdout)?;
        let file = std::fs::File::create(stdout)
            .map_err(|e| Failure::new(format!("cannot create {stdout}: {e}")))?;
        command.stdout(file);
    } else {
        command.stdout(std::process::Stdio::piped());
    }
    command.stderr(std::process::Stdio::piped());

    command
        .output()
        .map_err(|e| Failure::new(format!("cannot run {tool}: {e}")))
}

/// The token-judge flag list for the configured comparison options.
pub fn token_judge_flags(tokens: &TokensConfig) -> Vec<String> {
    let mut flags = vec!["-t".to_owned()];
    if tokens.ignore_newlines {
        flags.push("-n".to_owned());
    }
    if tokens.ignore_case {
        flags.push("-i".to_owned());
    }
    if let (Some(relative), Some(absolute)) = (tokens.float_rel_error, tokens.float_abs_error) {
        flags.extend([
            "-r".to_owned(),
            "-e".to_owned(),
            relative.to_string(),
            "-E".to_owned(),
            absolute.to_string(),
        ]);
    }
    flags
}

/// The shuffle-judge flag list.
pub fn shuffle_judge_flags(mode: ShuffleMode, ignore_case: bool) -> Vec<String> {
    let mut flags = vec!["-m".to_owned(), mode.to_string()];
    if ignore_case {
        flags.push("-i".to_owned());
    }
    flags
}

/// Whether `path` is already canonical text.
pub fn is_clean_text(path: &Path) -> Result<bool, String> {
    let raw = std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let Ok(text) = String::from_utf8(raw) else {
        return Ok(false);
    };
    Ok(sanitize_text(&text) == text)
}

pub fn quote_tool_failure(tool: &str, output: &std::process::Output) -> Failure {
    let stderr = String::from_utf8_lossy(&output.stderr);
    Failure::new(format!("{tool} failed:\n{}", tab(stderr.trim_end())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> TokenFlags {
        TokenFlags {
            ignore_newlines: false,
            ignore_case: false,
            float_errors: None,
        }
    }

    #[test]
    fn token_comparison_ignores_whitespace_amount() {
        assert!(tokens_equivalent("1  2\n", "1 2\n", &flags()));
        assert!(!tokens_equivalent("1 2\n", "1 3\n", &flags()));
        assert!(!tokens_equivalent("1 2\n", "1\n2\n", &flags()));
    }

    #[test]
    fn token_comparison_newline_and_case_flags() {
        let mut f = flags();
        f.ignore_newlines = true;
        assert!(tokens_equivalent("1 2\n", "1\n2\n", &f));

        let mut f = flags();
        f.ignore_case = true;
        assert!(tokens_equivalent("YES\n", "yes\n", &f));
    }

    #[test]
    fn token_comparison_float_errors() {
        let mut f = flags();
        f.float_errors = Some((1e-6, 1e-9));
        assert!(tokens_equivalent("1.0000001\n", "1.0\n", &f));
        assert!(!tokens_equivalent("1.1\n", "1.0\n", &f));
    }

    #[test]
    fn shuffle_modes() {
        assert!(shuffled_equivalent(
            "b\na\n",
            "a\nb\n",
            ShuffleMode::Lines,
            false
        ));
        assert!(!shuffled_equivalent(
            "b\na\n",
            "a\nb\n",
            ShuffleMode::Words,
            false
        ));
        assert!(shuffled_equivalent(
            "2 1\n",
            "1 2\n",
            ShuffleMode::Words,
            false
        ));
        assert!(shuffled_equivalent(
            "3\n2 1\n",
            "1 2\n3\n",
            ShuffleMode::LinesWords,
            false
        ));
        assert!(shuffled_equivalent(
            "1\n2 3\n",
            "3 2\n1\n",
            ShuffleMode::Tokens,
            false
        ));
    }

    #[test]
    fn sanitize_text_canonicalizes() {
        assert_eq!(sanitize_text("a \nb\t\n"), "a\nb\n");
        assert_eq!(sanitize_text("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(sanitize_text("a\nb"), "a\nb\n");
        assert_eq!(sanitize_text("clean\n"), "clean\n");
        assert_eq!(sanitize_text(""), "");
    }

    #[test]
    fn clean_text_is_a_fixed_point() {
        let clean = "1 2\n3\n";
        assert_eq!(sanitize_text(clean), clean);
        let dirty = "1 2 \r\n3";
        assert_eq!(sanitize_text(&sanitize_text(dirty)), sanitize_text(dirty));
    }
}
