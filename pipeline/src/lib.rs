// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::de::DeserializeOwned;
use serde::Serialize;

use cache::{Cache, CacheEntry};

mod context;
mod item;
mod signature;

pub use crate::context::{BatchCtx, EnvView, JobCtx, LoggingSink, ManagerCtx, StatusSink};
pub use crate::item::{Condition, Failure, State};
pub use crate::signature::SignatureError;

use crate::item::{Dependency, ItemNode, NodeKind};

///
/// The two application-supplied types the scheduler is generic over: the per-run context
/// (config, env, sandbox runner) and the one result type all jobs and managers produce.
///
pub trait PipelineSpec: Sized + 'static {
    type Context: EnvView;
    type Output: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + 'static;
}

///
/// One simple cacheable task in the pipeline.
///
/// A job's `name` is its cache key and must be stable across runs; `args` are the salient
/// constructor values folded into its signature. Whatever files and env fields the job
/// actually touches while running join the signature automatically through the context.
///
pub trait Job<S: PipelineSpec>: Send {
    fn name(&self) -> String;

    fn args(&self) -> Vec<String> {
        Vec::new()
    }

    fn run(&mut self, ctx: &mut JobCtx<'_, S>) -> Result<S::Output, Failure>;
}

///
/// A pipeline item that creates a batch of jobs and, once they have all finished, aggregates
/// their results into a summary consumed by downstream items under its code name.
///
pub trait Manager<S: PipelineSpec>: Send {
    fn name(&self) -> String;

    fn create_jobs(&mut self, ctx: &mut BatchCtx<'_, S>) -> Result<(), Failure>;

    /// Called after every finished job while this manager is at the head of the manager
    /// queue. The default does nothing; solution managers use this for definitive
    /// cancellation.
    fn update(&mut self, _ctx: &mut ManagerCtx<'_, S>) {}

    /// A line for the status sink; empty means nothing to show.
    fn status(&self) -> String {
        String::new()
    }

    /// Called once every job of this manager has finished and none failed. Produces the
    /// manager's summary result, or the failure that sinks it.
    fn evaluate(&mut self, ctx: &mut ManagerCtx<'_, S>) -> Result<S::Output, Failure>;
}

/// An item's address in the pipeline arena. Managers hold ids, never references.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ItemId(pub(crate) NodeIndex<u32>);

///
/// A dependency-ordered deque of jobs and managers.
///
/// The main loop pops the head: a manager creates its jobs (pushed back at the head, so the
/// batch runs before anything queued behind it) and joins the manager queue; a job runs
/// through the cache and notifies its dependents. After every item the manager-queue head is
/// drained for as long as it can advance. Scheduling is strictly single-threaded; parallelism
/// lives inside the sandbox runner that jobs call into.
///
pub struct Pipeline<S: PipelineSpec> {
    graph: DiGraph<ItemNode<S>, Dependency<S>, u32>,
    queue: VecDeque<ItemId>,
    managers: VecDeque<ItemId>,
    /// Stop at the first failure instead of running every independent subgraph to completion.
    fail_fast: bool,
    /// Upgrade warnings to a failed exit.
    strict: bool,
    failed: bool,
    failures: Vec<(String, String)>,
    warnings: Vec<String>,
}

impl<S: PipelineSpec> Pipeline<S> {
    pub fn new(fail_fast: bool, strict: bool) -> Pipeline<S> {
        Pipeline {
            graph: DiGraph::default(),
            queue: VecDeque::new(),
            managers: VecDeque::new(),
            fail_fast,
            strict,
            failed: false,
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Append a manager. Managers must be added in a topological order of their mutual
    /// prerequisites; the deque preserves that order.
    pub fn add_manager(&mut self, manager: impl Manager<S> + 'static) -> ItemId {
        let name = manager.name();
        let id = ItemId(
            self.graph
                .add_node(ItemNode::new(name, NodeKind::Manager(Some(Box::new(manager))))),
        );
        self.queue.push_back(id);
        id
    }

    /// Make one manager's summary available to another before it creates its jobs.
    pub fn add_prerequisite(
        &mut self,
        prerequisite: ItemId,
        dependent: ItemId,
        name: Option<&str>,
    ) {
        self.add_dependency(prerequisite, dependent, name, false);
    }

    /// As `add_prerequisite`, but a failed prerequisite does not cancel the dependent: it
    /// runs over whatever results exist. Used by report-style items (the testing log).
    pub fn add_weak_prerequisite(
        &mut self,
        prerequisite: ItemId,
        dependent: ItemId,
        name: Option<&str>,
    ) {
        self.add_dependency(prerequisite, dependent, name, true);
    }

    fn add_dependency(
        &mut self,
        prerequisite: ItemId,
        dependent: ItemId,
        name: Option<&str>,
        weak: bool,
    ) {
        self.graph[dependent.0].pending += 1;
        self.graph.add_edge(
            prerequisite.0,
            dependent.0,
            Dependency {
                name: name.map(str::to_owned),
                condition: None,
                weak,
            },
        );
    }

    /// Failure messages collected so far, as (item name, message) pairs.
    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn result_of(&self, id: ItemId) -> Option<&S::Output> {
        self.graph[id.0].result.as_ref()
    }

    pub fn state_of(&self, id: ItemId) -> State {
        self.graph[id.0].state
    }

    ///
    /// Run every item to completion (or to the first failure in fail-fast mode). Returns true
    /// if anything failed.
    ///
    pub fn run(
        &mut self,
        context: &S::Context,
        cache: &mut Cache,
        sink: &mut dyn StatusSink,
    ) -> bool {
        while let Some(id) = self.queue.pop_front() {
            if self.graph[id.0].is_manager() {
                self.open_manager(id, context, sink);
            } else {
                self.run_job(id, context, cache, sink);
                self.finish(id);
            }
            self.drain_managers(context, sink);
            if self.fail_fast && self.failed {
                break;
            }
        }

        for warning in &self.warnings {
            sink.warning(warning);
        }
        if self.strict && !self.warnings.is_empty() {
            self.failed = true;
        }

        // Succeeded jobs were appended as they completed; compact before handing the file
        // back to the next run.
        if let Err(e) = cache.export() {
            sink.warning(&format!("could not compact the cache file: {e}"));
        }

        self.failed
    }

    fn record_failure(&mut self, name: &str, message: &str) {
        self.failed = true;
        self.failures.push((name.to_owned(), message.to_owned()));
    }

    fn open_manager(&mut self, id: ItemId, context: &S::Context, sink: &mut dyn StatusSink) {
        if self.graph[id.0].state == State::Cancelled {
            return;
        }
        if self.graph[id.0].pending > 0 {
            let name = self.graph[id.0].name.clone();
            let failure = Failure::new(format!(
                "manager '{name}' opened with {} unfinished prerequisites",
                self.graph[id.0].pending
            ));
            self.graph[id.0].fail(failure.clone());
            self.record_failure(&name, &failure.message);
            self.finish(id);
            return;
        }

        self.graph[id.0].state = State::Running;
        sink.item_started(&self.graph[id.0].name);

        let prerequisites_results = self.graph[id.0].prerequisites_results.clone();
        let mut manager = match &mut self.graph[id.0].kind {
            NodeKind::Manager(slot) => slot.take().expect("manager is present"),
            NodeKind::Job(_) => unreachable!("open_manager on a job"),
        };
        let mut created = Vec::new();
        let outcome = manager.create_jobs(&mut BatchCtx {
            context,
            graph: &mut self.graph,
            prerequisites_results: &prerequisites_results,
            created: &mut created,
        });

        let node = &mut self.graph[id.0];
        match &mut node.kind {
            NodeKind::Manager(slot) => *slot = Some(manager),
            NodeKind::Job(_) => unreachable!(),
        }
        node.jobs = created.clone();

        match outcome {
            Ok(()) => {
                for job_id in created.iter().rev() {
                    self.queue.push_front(*job_id);
                }
                self.managers.push_back(id);
            }
            Err(failure) => {
                let name = self.graph[id.0].name.clone();
                self.record_failure(&name, &failure.message);
                self.graph[id.0].fail(failure);
                self.finish(id);
            }
        }
    }

    fn run_job(
        &mut self,
        id: ItemId,
        context: &S::Context,
        cache: &mut Cache,
        sink: &mut dyn StatusSink,
    ) {
        if self.graph[id.0].state == State::Cancelled {
            sink.item_finished(&self.graph[id.0].name, State::Cancelled, false);
            return;
        }
        let name = self.graph[id.0].name.clone();
        if self.graph[id.0].pending > 0 {
            let failure = Failure::new(format!(
                "job '{name}' scheduled with {} unfinished prerequisites",
                self.graph[id.0].pending
            ));
            self.graph[id.0].fail(failure.clone());
            self.record_failure(&name, &failure.message);
            return;
        }

        self.graph[id.0].state = State::Running;
        sink.item_started(&name);

        let mut job = match &mut self.graph[id.0].kind {
            NodeKind::Job(slot) => slot.take().expect("job is present"),
            NodeKind::Manager(_) => unreachable!("run_job on a manager"),
        };
        let args = job.args();

        let prerequisites_serialized: BTreeMap<String, String> = self.graph[id.0]
            .prerequisites_results
            .iter()
            .map(|(result_name, result)| {
                (
                    result_name.clone(),
                    serde_json::to_string(result).expect("results serialize"),
                )
            })
            .collect();

        let mut cached = false;
        if let Some(entry) = cache.get(&name) {
            if let Some(result) =
                lookup_entry::<S>(entry, &args, context, &prerequisites_serialized)
            {
                self.graph[id.0].result = Some(result);
                self.graph[id.0].state = State::Succeeded;
                cached = true;
            }
        }

        if !cached {
            // Reads made between jobs (by managers and the scheduler itself) must not be
            // attributed to this job.
            context.drain_accesses();
            let mut accessed_files = BTreeSet::new();
            let outcome = {
                let node = &self.graph[id.0];
                let mut ctx = JobCtx {
                    context,
                    accessed_files: &mut accessed_files,
                    prerequisites_results: &node.prerequisites_results,
                };
                job.run(&mut ctx)
            };
            let accessed_envs = context.drain_accesses();

            match outcome {
                Ok(result) => {
                    match signature::compute_signature(
                        &args,
                        context,
                        &accessed_envs,
                        &accessed_files,
                        &prerequisites_serialized,
                    ) {
                        Ok(inputs) => {
                            let entry = CacheEntry {
                                name: name.clone(),
                                signature: inputs.signature,
                                result: serde_json::to_string(&result)
                                    .expect("results serialize"),
                                envs: inputs.envs,
                                files: inputs.files,
                                prerequisites: inputs.prerequisites,
                            };
                            if let Err(e) = cache.add(entry) {
                                sink.warning(&format!("could not cache '{name}': {e}"));
                            }
                        }
                        Err(signature_error) => {
                            // The job succeeded but its inputs cannot be pinned down; leave it
                            // uncached so the next run redoes it.
                            sink.warning(&format!(
                                "could not compute signature of '{name}': {signature_error}"
                            ));
                        }
                    }
                    let node = &mut self.graph[id.0];
                    node.result = Some(result);
                    node.state = State::Succeeded;
                }
                Err(failure) => {
                    self.graph[id.0].fail(failure);
                }
            }
        }

        let node = &mut self.graph[id.0];
        match &mut node.kind {
            NodeKind::Job(slot) => *slot = Some(job),
            NodeKind::Manager(_) => unreachable!(),
        }
        sink.item_finished(&name, node.state, cached);
    }

    ///
    /// Notify dependents that this item finished: on success decrement pending counters and
    /// publish named results (subject to admission predicates); on failure cancel the
    /// subgraph rooted here.
    ///
    fn finish(&mut self, id: ItemId) {
        match self.graph[id.0].state {
            State::Succeeded => {
                let result = self.graph[id.0]
                    .result
                    .clone()
                    .expect("succeeded items have results");
                let mut edges = self
                    .graph
                    .neighbors_directed(id.0, Direction::Outgoing)
                    .detach();
                let mut notifications = Vec::new();
                while let Some((edge, target)) = edges.next(&self.graph) {
                    let dependency = &self.graph[edge];
                    let admitted = dependency
                        .condition
                        .as_ref()
                        .is_none_or(|condition| condition(&result));
                    notifications.push((ItemId(target), dependency.name.clone(), admitted));
                }
                for (dependent, result_name, admitted) in notifications {
                    if admitted {
                        let node = &mut self.graph[dependent.0];
                        node.pending -= 1;
                        if let Some(result_name) = result_name {
                            node.prerequisites_results
                                .insert(result_name, result.clone());
                        }
                    } else {
                        cancel_recursive(&mut self.graph, dependent);
                    }
                }
            }
            State::Failed => {
                let mut edges = self
                    .graph
                    .neighbors_directed(id.0, Direction::Outgoing)
                    .detach();
                let mut notifications = Vec::new();
                while let Some((edge, target)) = edges.next(&self.graph) {
                    notifications.push((ItemId(target), self.graph[edge].weak));
                }
                for (dependent, weak) in notifications {
                    if weak {
                        // Ordering is still honored; the dependent just sees no result.
                        self.graph[dependent.0].pending -= 1;
                    } else {
                        cancel_recursive(&mut self.graph, dependent);
                    }
                }
            }
            _ => {}
        }
    }

    ///
    /// Advance the manager queue's head for as long as it can: pop cancelled managers, sink
    /// managers whose jobs failed, finalize managers whose jobs all finished.
    ///
    fn drain_managers(&mut self, context: &S::Context, sink: &mut dyn StatusSink) {
        while let Some(&id) = self.managers.front() {
            if self.graph[id.0].state == State::Cancelled {
                self.managers.pop_front();
                continue;
            }

            self.call_update(id, context);
            let status = self.manager_status(id);
            if !status.is_empty() {
                let name = self.graph[id.0].name.clone();
                sink.manager_status(&name, &status);
            }

            let failed_jobs: Vec<ItemId> = self.graph[id.0]
                .jobs
                .iter()
                .copied()
                .filter(|job| self.graph[job.0].state == State::Failed)
                .collect();
            if !failed_jobs.is_empty() {
                for job in failed_jobs {
                    let job_name = self.graph[job.0].name.clone();
                    let message = self.graph[job.0]
                        .fail_msg
                        .clone()
                        .unwrap_or_default();
                    self.record_failure(&job_name, &message);
                }
                let failure = Failure::new("some of this manager's jobs failed");
                self.graph[id.0].fail(failure);
                self.finish(id);
                self.managers.pop_front();
                if self.fail_fast {
                    break;
                }
                continue;
            }

            let all_finished = self.graph[id.0]
                .jobs
                .iter()
                .all(|job| self.graph[job.0].state.finished());
            if !all_finished {
                break;
            }

            match self.call_evaluate(id, context) {
                Ok(result) => {
                    let node = &mut self.graph[id.0];
                    node.result = Some(result);
                    node.state = State::Succeeded;
                    let name = node.name.clone();
                    self.finish(id);
                    let status = self.manager_status(id);
                    if !status.is_empty() {
                        sink.manager_status(&name, &status);
                    }
                    sink.item_finished(&name, State::Succeeded, false);
                }
                Err(failure) => {
                    let name = self.graph[id.0].name.clone();
                    self.record_failure(&name, &failure.message);
                    self.graph[id.0].fail(failure);
                    self.finish(id);
                    sink.item_finished(&name, State::Failed, false);
                    self.managers.pop_front();
                    if self.fail_fast {
                        break;
                    }
                    continue;
                }
            }
            self.managers.pop_front();
        }
    }

    fn take_manager(&mut self, id: ItemId) -> Box<dyn Manager<S>> {
        match &mut self.graph[id.0].kind {
            NodeKind::Manager(slot) => slot.take().expect("manager is present"),
            NodeKind::Job(_) => unreachable!("item is not a manager"),
        }
    }

    fn put_manager(&mut self, id: ItemId, manager: Box<dyn Manager<S>>) {
        match &mut self.graph[id.0].kind {
            NodeKind::Manager(slot) => *slot = Some(manager),
            NodeKind::Job(_) => unreachable!(),
        }
    }

    fn call_update(&mut self, id: ItemId, context: &S::Context) {
        let prerequisites_results = self.graph[id.0].prerequisites_results.clone();
        let mut warnings = std::mem::take(&mut self.graph[id.0].warnings);
        let mut manager = self.take_manager(id);
        manager.update(&mut ManagerCtx {
            context,
            graph: &mut self.graph,
            prerequisites_results: &prerequisites_results,
            warnings: &mut warnings,
        });
        self.put_manager(id, manager);
        self.graph[id.0].warnings = warnings;
    }

    fn call_evaluate(&mut self, id: ItemId, context: &S::Context) -> Result<S::Output, Failure> {
        let prerequisites_results = self.graph[id.0].prerequisites_results.clone();
        let mut warnings = std::mem::take(&mut self.graph[id.0].warnings);
        let mut manager = self.take_manager(id);
        let outcome = manager.evaluate(&mut ManagerCtx {
            context,
            graph: &mut self.graph,
            prerequisites_results: &prerequisites_results,
            warnings: &mut warnings,
        });
        self.put_manager(id, manager);
        self.warnings.extend(warnings);
        outcome
    }

    fn manager_status(&mut self, id: ItemId) -> String {
        let manager = self.take_manager(id);
        let status = manager.status();
        self.put_manager(id, manager);
        status
    }
}

/// Check a stored entry against the current world: recompute the signature from the entry's
/// recorded env names and file paths (at their current values) plus the current prerequisite
/// results. A match makes the stored result authoritative.
fn lookup_entry<S: PipelineSpec>(
    entry: &CacheEntry,
    args: &[String],
    context: &S::Context,
    prerequisites_serialized: &BTreeMap<String, String>,
) -> Option<S::Output> {
    let env_names: BTreeSet<String> = entry.envs.keys().cloned().collect();
    let file_paths: BTreeSet<PathBuf> = entry.files.keys().map(PathBuf::from).collect();
    let inputs = signature::compute_signature(
        args,
        context,
        &env_names,
        &file_paths,
        prerequisites_serialized,
    )
    .ok()?;
    if inputs.signature != entry.signature {
        return None;
    }
    match serde_json::from_str(&entry.result) {
        Ok(result) => Some(result),
        Err(e) => {
            log::warn!("dropping undeserializable cached result for '{}': {e}", entry.name);
            None
        }
    }
}

pub(crate) fn cancel_recursive<S: PipelineSpec>(
    graph: &mut DiGraph<ItemNode<S>, Dependency<S>, u32>,
    id: ItemId,
) {
    if graph[id.0].state.finished() {
        return;
    }
    graph[id.0].state = State::Cancelled;
    let mut edges = graph.neighbors_directed(id.0, Direction::Outgoing).detach();
    let mut notifications = Vec::new();
    while let Some((edge, target)) = edges.next(&*graph) {
        notifications.push((ItemId(target), graph[edge].weak));
    }
    for (dependent, weak) in notifications {
        if weak {
            graph[dependent.0].pending -= 1;
        } else {
            cancel_recursive(graph, dependent);
        }
    }
    let jobs = graph[id.0].jobs.clone();
    for job in jobs {
        cancel_recursive(graph, job);
    }
}

#[cfg(test)]
mod tests;
