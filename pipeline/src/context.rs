// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::graph::DiGraph;

use crate::item::{Condition, Dependency, ItemNode, NodeKind, State};
use crate::{Failure, ItemId, Job, PipelineSpec};

///
/// The scheduler's window onto the application env.
///
/// Every read of a named env field by job code must be recorded by the implementor, so that
/// signatures capture it; `value_of` renders a field for signature purposes without recording
/// anything. The concrete env keeps its fields private, so there is no unrecorded way for job
/// code to read them.
///
pub trait EnvView {
    /// The signature rendering of a named env field, or None if no such field exists.
    fn value_of(&self, name: &str) -> Option<String>;

    /// Drain the set of field names read since the previous drain.
    fn drain_accesses(&self) -> BTreeSet<String>;
}

///
/// An opaque sink for human-facing progress. Rendering is not this crate's business; the
/// default implementation forwards to `log`.
///
pub trait StatusSink {
    fn item_started(&mut self, _name: &str) {}
    fn item_finished(&mut self, _name: &str, _state: State, _cached: bool) {}
    fn manager_status(&mut self, _name: &str, _status: &str) {}
    fn warning(&mut self, _message: &str) {}
}

pub struct LoggingSink;

impl StatusSink for LoggingSink {
    fn item_started(&mut self, name: &str) {
        log::debug!("running: {name}");
    }

    fn item_finished(&mut self, name: &str, state: State, cached: bool) {
        let suffix = if cached { " (cached)" } else { "" };
        log::debug!("finished: {name} {state:?}{suffix}");
    }

    fn manager_status(&mut self, name: &str, status: &str) {
        log::info!("{name}: {status}");
    }

    fn warning(&mut self, message: &str) {
        log::warn!("{message}");
    }
}

///
/// Everything a running job may touch. File accesses recorded here (and env accesses recorded
/// by the context) become part of the job's signature.
///
pub struct JobCtx<'a, S: PipelineSpec> {
    pub(crate) context: &'a S::Context,
    pub(crate) accessed_files: &'a mut BTreeSet<PathBuf>,
    pub(crate) prerequisites_results: &'a HashMap<String, S::Output>,
}

impl<'a, S: PipelineSpec> JobCtx<'a, S> {
    pub fn context(&self) -> &'a S::Context {
        self.context
    }

    /// Declare a file this job depends on (or produces). Its content hash at completion time
    /// joins the signature.
    pub fn access_file(&mut self, path: impl AsRef<Path>) {
        self.accessed_files.insert(normalize(path.as_ref()));
    }

    /// Withdraw a declaration, for files created and deleted within this job.
    pub fn unaccess_file(&mut self, path: impl AsRef<Path>) {
        self.accessed_files.remove(&normalize(path.as_ref()));
    }

    pub fn prerequisite(&self, name: &str) -> Option<&'a S::Output> {
        self.prerequisites_results.get(name)
    }

    pub fn prerequisites_results(&self) -> &'a HashMap<String, S::Output> {
        self.prerequisites_results
    }
}

fn normalize(path: &Path) -> PathBuf {
    // Lexical normalization only: signatures must be stable across working directories, and
    // the pipeline works in task-root-relative paths throughout.
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

///
/// Handed to a manager while it creates its batch of jobs. Jobs are inserted into the arena
/// immediately; dependencies may reference any already-inserted item of this batch.
///
pub struct BatchCtx<'a, S: PipelineSpec> {
    pub(crate) context: &'a S::Context,
    pub(crate) graph: &'a mut DiGraph<ItemNode<S>, Dependency<S>>,
    pub(crate) prerequisites_results: &'a HashMap<String, S::Output>,
    pub(crate) created: &'a mut Vec<ItemId>,
}

impl<'a, S: PipelineSpec> BatchCtx<'a, S> {
    pub fn context(&self) -> &'a S::Context {
        self.context
    }

    pub fn prerequisite(&self, name: &str) -> Option<&'a S::Output> {
        self.prerequisites_results.get(name)
    }

    pub fn add_job(&mut self, job: impl Job<S> + 'static) -> ItemId {
        let name = job.name();
        let id = ItemId(
            self.graph
                .add_node(ItemNode::new(name, NodeKind::Job(Some(Box::new(job))))),
        );
        self.created.push(id);
        id
    }

    /// Make `prerequisite` run before `dependent`. With a name, the prerequisite's result is
    /// published to the dependent under that name before it runs.
    pub fn add_prerequisite(
        &mut self,
        prerequisite: ItemId,
        dependent: ItemId,
        name: Option<&str>,
    ) {
        self.add_dependency(prerequisite, dependent, name, None);
    }

    /// As `add_prerequisite`, but the dependent is admitted only if the prerequisite's result
    /// satisfies the condition; otherwise it is cancelled.
    pub fn add_conditional_prerequisite(
        &mut self,
        prerequisite: ItemId,
        dependent: ItemId,
        name: Option<&str>,
        condition: Condition<S::Output>,
    ) {
        self.add_dependency(prerequisite, dependent, name, Some(condition));
    }

    fn add_dependency(
        &mut self,
        prerequisite: ItemId,
        dependent: ItemId,
        name: Option<&str>,
        condition: Option<Condition<S::Output>>,
    ) {
        self.graph[dependent.0].pending += 1;
        self.graph.add_edge(
            prerequisite.0,
            dependent.0,
            Dependency {
                name: name.map(str::to_owned),
                condition,
                weak: false,
            },
        );
    }
}

///
/// A manager's view of the arena during `update` and `evaluate`: its jobs' states and
/// results, cancellation, and warnings.
///
pub struct ManagerCtx<'a, S: PipelineSpec> {
    pub(crate) context: &'a S::Context,
    pub(crate) graph: &'a mut DiGraph<ItemNode<S>, Dependency<S>>,
    pub(crate) prerequisites_results: &'a HashMap<String, S::Output>,
    pub(crate) warnings: &'a mut Vec<String>,
}

impl<'a, S: PipelineSpec> ManagerCtx<'a, S> {
    pub fn context(&self) -> &'a S::Context {
        self.context
    }

    pub fn prerequisite(&self, name: &str) -> Option<&'a S::Output> {
        self.prerequisites_results.get(name)
    }

    pub fn prerequisites_results(&self) -> &'a HashMap<String, S::Output> {
        self.prerequisites_results
    }

    pub fn state(&self, id: ItemId) -> State {
        self.graph[id.0].state
    }

    pub fn result(&self, id: ItemId) -> Option<&S::Output> {
        self.graph[id.0].result.as_ref()
    }

    pub fn fail_message(&self, id: ItemId) -> Option<&str> {
        self.graph[id.0].fail_msg.as_deref()
    }

    pub fn name(&self, id: ItemId) -> &str {
        &self.graph[id.0].name
    }

    /// Cancel an item and, recursively, everything that requires it. Idempotent; a cancelled
    /// item is never run and contributes no cache entry.
    pub fn cancel(&mut self, id: ItemId) {
        crate::cancel_recursive(self.graph, id);
    }

    /// Emit a non-fatal finding. In strict mode the pipeline upgrades warnings to a failed
    /// exit.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl<S: PipelineSpec> ManagerCtx<'_, S> {
    /// Convenience used by managers evaluating expectation failures.
    pub fn failure(&self, message: impl Into<String>) -> Failure {
        Failure::new(message)
    }
}
