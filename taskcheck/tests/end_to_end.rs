// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Whole-task scenarios: each test lays out a complete task fixture (config, generator,
//! solutions, samples — all `/bin/sh`) in a temp directory and drives the full pipeline.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use parking_lot::Mutex;
use tempfile::TempDir;

use cache::Cache;
use pipeline::{State, StatusSink};
use task_executor::Executor;
use taskcheck::config::TaskConfig;
use taskcheck::context::Ctx;
use taskcheck::env::{Env, RunSettings};
use taskcheck::task_pipeline::build_task_pipeline;

/// The pipeline works in task-root-relative paths, so every run chdirs; tests serialize on
/// this to keep the working directory sane.
static CWD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Default)]
struct RecordingSink {
    finished: Vec<(String, State, bool)>,
    warnings: Vec<String>,
}

impl StatusSink for RecordingSink {
    fn item_finished(&mut self, name: &str, state: State, cached: bool) {
        self.finished.push((name.to_owned(), state, cached));
    }

    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_owned());
    }
}

struct RunOutcome {
    failed: bool,
    failures: Vec<(String, String)>,
    finished: Vec<(String, State, bool)>,
    warnings: Vec<String>,
}

impl RunOutcome {
    fn failure_text(&self) -> String {
        self.failures
            .iter()
            .map(|(item, message)| format!("{item}: {message}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn run_task(dir: &Path, mut settings: RunSettings) -> RunOutcome {
    let _guard = CWD_LOCK.lock();
    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir).unwrap();

    let outcome = (|| {
        let config = TaskConfig::load(Path::new(".")).expect("fixture config is valid");
        if settings.solutions.is_empty() {
            settings.solutions = config.solutions.keys().cloned().collect();
        }
        let env = Env::new(settings, config).fork().unwrap().lock();
        let executor = Executor::new_owned(2).unwrap();
        let ctx = Ctx::new(env, executor.clone());

        let mut cache = Cache::open(Path::new(".taskcheck/cache")).unwrap();
        let mut pipeline = build_task_pipeline(ctx.env());
        let mut sink = RecordingSink::default();
        let failed = pipeline.run(&ctx, &mut cache, &mut sink);

        let outcome = RunOutcome {
            failed,
            failures: pipeline.failures().to_vec(),
            finished: sink.finished,
            warnings: sink.warnings,
        };
        executor.shutdown(std::time::Duration::from_secs(2));
        outcome
    })();

    std::env::set_current_dir(original).unwrap();
    outcome
}

fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
}

fn write_script(dir: &Path, relative: &str, body: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{body}").unwrap();
    drop(file);
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
}

const SUM_CONFIG: &str = r#"
name = "sum"
task_type = "batch"
out_check = "diff"
in_format = "binary"
out_format = "binary"

[generator]
run = "gen"
gen_type = "pisek-v1"

[[tests]]
name = "samples"
points = 0
in_globs = ["sample*.in"]

[[tests]]
name = "addition"
points = 10
in_globs = ["01*.in"]
predecessors = [0]

[solutions.solve]
primary = true
points = 10

[checks]
generator_respects_seed = false
solution_for_each_test = false
"#;

/// The pisek-v1 generator every fixture shares: lists one seeded testcase `01` and writes a
/// fixed input distinct from the sample.
const GEN_SH: &str = r#"if [ $# -eq 0 ]; then
  echo "01"
else
  echo "2 3"
fi"#;

const CORRECT_SOLVE: &str = "read a b\necho $((a+b))";
const OFF_BY_ONE_SOLVE: &str = "read a b\necho $((a+b-1))";
/// Correct on the sample input only, wrong on everything else.
const SAMPLE_ONLY_SOLVE: &str = r#"read a b
if [ "$a" = "1" ] && [ "$b" = "2" ]; then echo 3; else echo 0; fi"#;

fn sum_fixture(solve_body: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "config", SUM_CONFIG);
    write_script(dir.path(), "gen.sh", GEN_SH);
    write_script(dir.path(), "solutions/solve.sh", solve_body);
    write_file(dir.path(), "static/sample01.in", "1 2\n");
    write_file(dir.path(), "static/sample01.out", "3\n");
    dir
}

fn with_extra_solution(dir: &TempDir, config_section: &str, script_name: &str, body: &str) {
    let mut config = SUM_CONFIG.to_owned();
    config.push_str(config_section);
    write_file(dir.path(), "config", &config);
    write_script(dir.path(), &format!("solutions/{script_name}"), body);
}

#[test]
fn s1_correct_batch_addition_passes() {
    let dir = sum_fixture(CORRECT_SOLVE);
    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(!outcome.failed, "{}", outcome.failure_text());

    // The per-solution directory holds symlinked inputs and produced outputs.
    let entries: Vec<String> = std::fs::read_dir(dir.path().join("tests/solve"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().any(|name| name.starts_with("01_") && name.ends_with(".in")));
    assert!(entries.iter().any(|name| name.starts_with("01_") && name.ends_with(".out")));
    assert!(entries.contains(&"sample01.in".to_owned()));
}

#[test]
fn s2_off_by_one_primary_fails_with_wrong_answer() {
    let dir = sum_fixture(OFF_BY_ONE_SOLVE);
    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(outcome.failed);
    let text = outcome.failure_text();
    assert!(text.contains("solve"), "{text}");
    assert!(text.contains("wrong_answer"), "{text}");
}

#[test]
fn s2_wrong_secondary_names_the_generated_input() {
    let dir = sum_fixture(CORRECT_SOLVE);
    with_extra_solution(
        &dir,
        r#"
[solutions.cheater]
run = "cheater"
tests = "11"
"#,
        "cheater.sh",
        SAMPLE_ONLY_SOLVE,
    );

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(outcome.failed);
    let text = outcome.failure_text();
    assert!(text.contains("cheater"), "{text}");
    assert!(text.contains("01_"), "{text}");
    assert!(text.contains("wrong_answer"), "{text}");
}

#[test]
fn s3_timeout_with_declared_zero_points_passes() {
    let dir = sum_fixture(CORRECT_SOLVE);
    with_extra_solution(
        &dir,
        r#"
[solutions.sleepy]
run = "sleepy"
points = 0
tests = "00"

[limits.sec_solve]
time_limit = 0.5
"#,
        "sleepy.sh",
        "sleep 2",
    );

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(!outcome.failed, "{}", outcome.failure_text());
}

#[test]
fn s4_nondeterministic_generator_is_caught() {
    let dir = sum_fixture(CORRECT_SOLVE);
    // Ignores its seed and emits fresh randomness each invocation.
    write_script(
        dir.path(),
        "gen.sh",
        r#"if [ $# -eq 0 ]; then
  echo "01"
else
  echo "$$ $(date +%N)"
fi"#,
    );

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(outcome.failed);
    let text = outcome.failure_text();
    assert!(text.contains("not deterministic"), "{text}");
    assert!(text.contains(".in2"), "{text}");
}

#[test]
fn s5_tests_mask_accepts_then_rejects() {
    let dir = sum_fixture(CORRECT_SOLVE);
    with_extra_solution(
        &dir,
        r#"
[solutions.partial]
run = "partial"
points = 0
tests = "10"
"#,
        "partial.sh",
        SAMPLE_ONLY_SOLVE,
    );

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(!outcome.failed, "{}", outcome.failure_text());

    // Flipping the mask to expect success everywhere must fail with an expectation error.
    with_extra_solution(
        &dir,
        r#"
[solutions.partial]
run = "partial"
tests = "11"
"#,
        "partial.sh",
        SAMPLE_ONLY_SOLVE,
    );
    std::fs::remove_file(dir.path().join(".taskcheck/cache")).ok();

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(outcome.failed);
    let text = outcome.failure_text();
    assert!(text.contains("partial"), "{text}");
    assert!(text.contains("did not result as expected"), "{text}");
}

#[test]
fn s6_second_run_hits_the_cache_everywhere() {
    let dir = sum_fixture(CORRECT_SOLVE);
    let first = run_task(dir.path(), RunSettings::default());
    assert!(!first.failed, "{}", first.failure_text());

    let second = run_task(dir.path(), RunSettings::default());
    assert!(!second.failed, "{}", second.failure_text());

    // Every job short-circuits; the only uncached finishes are manager summaries.
    let manager_names = [
        "Prepare tools",
        "Build programs",
        "Prepare generator",
        "Process inputs",
        "Prepare judge",
        "Test solution solve",
        "Completeness check",
    ];
    for (name, state, cached) in &second.finished {
        assert_eq!(*state, State::Succeeded, "{name} was {state:?}");
        if !cached {
            assert!(
                manager_names.contains(&name.as_str()),
                "job '{name}' re-ran on the second pass"
            );
        }
    }
    // And exactly one generated input exists (same seed both runs).
    let inputs: Vec<_> = std::fs::read_dir(dir.path().join("tests/_inputs"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("01_") && name.ends_with(".in"))
        .collect();
    assert_eq!(inputs.len(), 1);
}

#[test]
fn definitive_cancellation_skips_remaining_inputs() {
    // Ten repeats of the generated testcase; once the first error settles the '!' group,
    // the remaining runs of that solution are cancelled.
    let dir = sum_fixture(CORRECT_SOLVE);
    write_script(
        dir.path(),
        "gen.sh",
        &GEN_SH.replace("echo \"01\"", "echo \"01 repeat=10\""),
    );
    with_extra_solution(
        &dir,
        r#"
[solutions.broken]
run = "broken"
tests = "1!"
"#,
        "broken.sh",
        r#"read a b
case "$a $b" in
  "1 2") echo 3 ;;
  *) exit 7 ;;
esac"#,
    );

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(!outcome.failed, "{}", outcome.failure_text());

    let cancelled = outcome
        .finished
        .iter()
        .filter(|(name, state, _)| {
            *state == State::Cancelled && name.starts_with("Run broken on input 01_")
        })
        .count();
    assert!(
        cancelled > 0,
        "expected some runs of the broken solution to be cancelled"
    );

    // With --all-inputs the same fixture runs everything.
    std::fs::remove_file(dir.path().join(".taskcheck/cache")).ok();
    let outcome = run_task(
        dir.path(),
        RunSettings {
            all_inputs: true,
            ..RunSettings::default()
        },
    );
    assert!(!outcome.failed, "{}", outcome.failure_text());
    let cancelled = outcome
        .finished
        .iter()
        .filter(|(name, state, _)| {
            *state == State::Cancelled && name.starts_with("Run broken on input 01_")
        })
        .count();
    assert_eq!(cancelled, 0);
}

#[test]
fn validator_rejection_fails_the_run() {
    let dir = sum_fixture(CORRECT_SOLVE);
    let mut config = SUM_CONFIG.to_owned();
    config.push_str(
        r#"
[validator]
run = "validate"
"#,
    );
    write_file(dir.path(), "config", &config);
    // Rejects everything with a diagnostic on stderr.
    write_script(
        dir.path(),
        "validate.sh",
        "echo \"line 1 malformed\" >&2\nexit 1",
    );

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(outcome.failed);
    let text = outcome.failure_text();
    assert!(text.contains("Validator rejected"), "{text}");
    assert!(text.contains("malformed"), "{text}");
}

#[test]
fn unused_inputs_warn_and_strict_mode_fails() {
    let dir = sum_fixture(CORRECT_SOLVE);
    // A static input no test's globs match.
    write_file(dir.path(), "static/stray99.in", "0 0\n");
    write_file(dir.path(), "static/stray99.out", "0\n");

    let outcome = run_task(dir.path(), RunSettings::default());
    assert!(!outcome.failed, "{}", outcome.failure_text());
    assert!(
        outcome.warnings.iter().any(|w| w.contains("stray99")),
        "{:?}",
        outcome.warnings
    );

    let outcome = run_task(
        dir.path(),
        RunSettings {
            strict: true,
            ..RunSettings::default()
        },
    );
    assert!(outcome.failed);
}

#[test]
fn testing_log_is_written_on_request() {
    let dir = sum_fixture(CORRECT_SOLVE);
    let outcome = run_task(
        dir.path(),
        RunSettings {
            testing_log: true,
            ..RunSettings::default()
        },
    );
    assert!(!outcome.failed, "{}", outcome.failure_text());

    let raw = std::fs::read_to_string(dir.path().join("testing_log.json")).unwrap();
    let log: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(log["source"], "taskcheck");
    let results = &log["solutions"]["solve"]["results"];
    assert!(results.get("sample01.in").is_some(), "{raw}");
    let sample = &results["sample01.in"];
    assert_eq!(sample["result"], "ok");
    assert_eq!(sample["relative_points"], "1");
    assert!(sample["time"].is_number());
    assert!(sample["wall_clock_time"].is_number());
}
