// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use parking_lot::Mutex;
use tempfile::TempDir;

use cache::Cache;

use crate::{
    BatchCtx, EnvView, Failure, ItemId, Job, JobCtx, LoggingSink, Manager, ManagerCtx, Pipeline,
    PipelineSpec, State,
};

struct TSpec;

impl PipelineSpec for TSpec {
    type Context = TContext;
    type Output = String;
}

#[derive(Default)]
struct TContext {
    values: BTreeMap<String, String>,
    accessed: Mutex<BTreeSet<String>>,
    runs: Mutex<Vec<String>>,
}

impl TContext {
    fn with_value(name: &str, value: &str) -> TContext {
        TContext {
            values: BTreeMap::from([(name.to_owned(), value.to_owned())]),
            ..TContext::default()
        }
    }

    fn get(&self, name: &str) -> Option<String> {
        self.accessed.lock().insert(name.to_owned());
        self.values.get(name).cloned()
    }

    fn note_run(&self, name: &str) {
        self.runs.lock().push(name.to_owned());
    }

    fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }
}

impl EnvView for TContext {
    fn value_of(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn drain_accesses(&self) -> BTreeSet<String> {
        std::mem::take(&mut self.accessed.lock())
    }
}

/// A job that emits a fixed value, optionally reading env fields and touching files.
struct Emit {
    name: String,
    value: String,
    env_reads: Vec<String>,
    files: Vec<PathBuf>,
    fail: bool,
}

impl Emit {
    fn new(name: &str, value: &str) -> Emit {
        Emit {
            name: name.to_owned(),
            value: value.to_owned(),
            env_reads: vec![],
            files: vec![],
            fail: false,
        }
    }

    fn failing(name: &str) -> Emit {
        Emit {
            fail: true,
            ..Emit::new(name, "")
        }
    }

    fn reading_env(mut self, name: &str) -> Emit {
        self.env_reads.push(name.to_owned());
        self
    }

    fn touching(mut self, path: PathBuf) -> Emit {
        self.files.push(path);
        self
    }
}

impl Job<TSpec> for Emit {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&mut self, ctx: &mut JobCtx<'_, TSpec>) -> Result<String, Failure> {
        ctx.context().note_run(&self.name);
        for env_name in &self.env_reads {
            ctx.context().get(env_name);
        }
        for file in &self.files {
            ctx.access_file(file);
        }
        if self.fail {
            return Err(Failure::new(format!("{} failed", self.name)));
        }
        let mut value = self.value.clone();
        if let Some(input) = ctx.prerequisite("input") {
            value = format!("{input}+{value}");
        }
        Ok(value)
    }
}

/// Chain wiring: (job, prerequisite indices with optional result names).
type Wiring = Vec<(Emit, Vec<(usize, Option<&'static str>)>)>;

struct TManager {
    name: String,
    wiring: Option<Wiring>,
    created: Vec<ItemId>,
    cancel_after_first: bool,
}

impl TManager {
    fn new(name: &str, wiring: Wiring) -> TManager {
        TManager {
            name: name.to_owned(),
            wiring: Some(wiring),
            created: vec![],
            cancel_after_first: false,
        }
    }
}

impl Manager<TSpec> for TManager {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_, TSpec>) -> Result<(), Failure> {
        for (job, prerequisites) in self.wiring.take().expect("created once") {
            let id = ctx.add_job(job);
            for (prerequisite_index, result_name) in prerequisites {
                ctx.add_prerequisite(self.created[prerequisite_index], id, result_name);
            }
            self.created.push(id);
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut ManagerCtx<'_, TSpec>) {
        if self.cancel_after_first && ctx.state(self.created[0]) == State::Succeeded {
            for &job in &self.created[1..] {
                ctx.cancel(job);
            }
        }
    }

    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_, TSpec>) -> Result<String, Failure> {
        let mut parts = Vec::new();
        for &job in &self.created {
            if let Some(result) = ctx.result(job) {
                parts.push(result.clone());
            }
        }
        Ok(parts.join(","))
    }
}

fn cache_in(dir: &TempDir) -> Cache {
    Cache::open(dir.path().join("cache")).unwrap()
}

#[test]
fn jobs_run_in_prerequisite_order() {
    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
    pipeline.add_manager(TManager::new(
        "chain",
        vec![
            (Emit::new("a", "1"), vec![]),
            (Emit::new("b", "2"), vec![(0, None)]),
            (Emit::new("c", "3"), vec![(1, None)]),
        ],
    ));

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(!failed);
    assert_eq!(context.runs(), vec!["a", "b", "c"]);
}

#[test]
fn named_results_are_published_before_the_dependent_runs() {
    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
    let manager = pipeline.add_manager(TManager::new(
        "plumbing",
        vec![
            (Emit::new("producer", "x"), vec![]),
            (Emit::new("consumer", "y"), vec![(0, Some("input"))]),
        ],
    ));

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(!failed);
    // The consumer saw the producer's result under the name "input".
    assert_eq!(pipeline.result_of(manager).unwrap(), "x,x+y");
}

#[test]
fn failure_cancels_the_dependent_subgraph() {
    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(false, false);
    pipeline.add_manager(TManager::new(
        "failing",
        vec![
            (Emit::failing("bad"), vec![]),
            (Emit::new("dependent", "1"), vec![(0, None)]),
            (Emit::new("transitive", "2"), vec![(1, None)]),
            (Emit::new("independent", "3"), vec![]),
        ],
    ));

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(failed);
    // Cancelled items never ran; the unrelated sibling did (verbose mode).
    assert_eq!(context.runs(), vec!["bad", "independent"]);
    assert_eq!(pipeline.failures().len(), 1);
    assert_eq!(pipeline.failures()[0].0, "bad");
}

#[test]
fn fail_fast_stops_at_the_first_failure() {
    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
    pipeline.add_manager(TManager::new(
        "first",
        vec![(Emit::failing("bad"), vec![])],
    ));
    pipeline.add_manager(TManager::new(
        "second",
        vec![(Emit::new("later", "1"), vec![])],
    ));

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(failed);
    assert_eq!(context.runs(), vec!["bad"]);
}

#[test]
fn manager_results_flow_to_downstream_managers() {
    struct Downstream {
        seen: std::sync::Arc<Mutex<Option<String>>>,
    }

    impl Manager<TSpec> for Downstream {
        fn name(&self) -> String {
            "downstream".to_owned()
        }

        fn create_jobs(&mut self, ctx: &mut BatchCtx<'_, TSpec>) -> Result<(), Failure> {
            *self.seen.lock() = ctx.prerequisite("upstream").cloned();
            Ok(())
        }

        fn evaluate(&mut self, _ctx: &mut ManagerCtx<'_, TSpec>) -> Result<String, Failure> {
            Ok(String::new())
        }
    }

    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let seen = std::sync::Arc::new(Mutex::new(None));
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
    let upstream = pipeline.add_manager(TManager::new(
        "up",
        vec![(Emit::new("a", "42"), vec![])],
    ));
    let downstream = pipeline.add_manager(Downstream { seen: seen.clone() });
    pipeline.add_prerequisite(upstream, downstream, Some("upstream"));

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(!failed);
    assert_eq!(seen.lock().clone(), Some("42".to_owned()));
}

#[test]
fn second_run_hits_the_cache() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.txt");
    std::fs::write(&source, "v1").unwrap();

    let run = |context: &TContext| {
        let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
        pipeline.add_manager(TManager::new(
            "cached",
            vec![(
                Emit::new("job", "out")
                    .reading_env("mode")
                    .touching(source.clone()),
                vec![],
            )],
        ));
        let mut cache = cache_in(&dir);
        assert!(!pipeline.run(context, &mut cache, &mut LoggingSink));
    };

    let first = TContext::with_value("mode", "fast");
    run(&first);
    assert_eq!(first.runs(), vec!["job"]);

    // Nothing changed: the job short-circuits.
    let second = TContext::with_value("mode", "fast");
    run(&second);
    assert_eq!(second.runs(), Vec::<String>::new());

    // A changed accessed file invalidates the signature.
    std::fs::write(&source, "v2").unwrap();
    let third = TContext::with_value("mode", "fast");
    run(&third);
    assert_eq!(third.runs(), vec!["job"]);

    // So does a changed accessed env field.
    let fourth = TContext::with_value("mode", "slow");
    run(&fourth);
    assert_eq!(fourth.runs(), vec!["job"]);
}

#[test]
fn definitive_cancellation_skips_queued_jobs() {
    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
    let mut manager = TManager::new(
        "short-circuit",
        vec![
            (Emit::new("first", "1"), vec![]),
            (Emit::new("rest", "2"), vec![]),
        ],
    );
    manager.cancel_after_first = true;
    let id = pipeline.add_manager(manager);

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(!failed);
    assert_eq!(context.runs(), vec!["first"]);
    // The manager still finalizes over the results it has.
    assert_eq!(pipeline.result_of(id).unwrap(), "1");
}

#[test]
fn strict_mode_upgrades_warnings() {
    struct Warner;

    impl Manager<TSpec> for Warner {
        fn name(&self) -> String {
            "warner".to_owned()
        }

        fn create_jobs(&mut self, _ctx: &mut BatchCtx<'_, TSpec>) -> Result<(), Failure> {
            Ok(())
        }

        fn evaluate(&mut self, ctx: &mut ManagerCtx<'_, TSpec>) -> Result<String, Failure> {
            ctx.warn("something looks off");
            Ok(String::new())
        }
    }

    let dir = TempDir::new().unwrap();
    let context = TContext::default();

    let mut relaxed: Pipeline<TSpec> = Pipeline::new(true, false);
    relaxed.add_manager(Warner);
    assert!(!relaxed.run(&context, &mut cache_in(&dir), &mut LoggingSink));

    let mut strict: Pipeline<TSpec> = Pipeline::new(true, true);
    strict.add_manager(Warner);
    assert!(strict.run(&context, &mut cache_in(&dir), &mut LoggingSink));
}

#[test]
fn conditional_prerequisite_gates_admission() {
    struct Gated;

    impl Manager<TSpec> for Gated {
        fn name(&self) -> String {
            "gated".to_owned()
        }

        fn create_jobs(&mut self, ctx: &mut BatchCtx<'_, TSpec>) -> Result<(), Failure> {
            let ok = ctx.add_job(Emit::new("ok-producer", "yes"));
            let admitted = ctx.add_job(Emit::new("admitted", "1"));
            ctx.add_conditional_prerequisite(ok, admitted, None, Box::new(|r| r == "yes"));

            let no = ctx.add_job(Emit::new("no-producer", "no"));
            let rejected = ctx.add_job(Emit::new("rejected", "2"));
            ctx.add_conditional_prerequisite(no, rejected, None, Box::new(|r| r == "yes"));
            Ok(())
        }

        fn evaluate(&mut self, _ctx: &mut ManagerCtx<'_, TSpec>) -> Result<String, Failure> {
            Ok(String::new())
        }
    }

    let dir = TempDir::new().unwrap();
    let context = TContext::default();
    let mut pipeline: Pipeline<TSpec> = Pipeline::new(true, false);
    pipeline.add_manager(Gated);

    let failed = pipeline.run(&context, &mut cache_in(&dir), &mut LoggingSink);
    assert!(!failed);
    assert_eq!(
        context.runs(),
        vec!["ok-producer", "admitted", "no-producer"]
    );
}
