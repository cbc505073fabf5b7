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

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use hashing::Fingerprint;
use serde::{Deserialize, Serialize};

///
/// A persistent cache of prior job outcomes, keyed by job name.
///
/// The store is a single file under the task root with one JSON entry per line. Within a run
/// the file is append-only (a re-run job simply appends a fresh entry); on writer close the
/// file is compacted so that only the newest entry per job name survives. For each name the
/// in-memory map always holds the authoritative (most recently written) entry.
///
pub struct Cache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

///
/// One cached job outcome, together with everything its signature was computed from: the env
/// entries and file digests observed at run time, and the names of prerequisite results. A
/// later run recomputes the signature from current values of exactly these inputs; a match
/// short-circuits the job.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub signature: Fingerprint,
    /// The job's result, serialized to JSON by the pipeline.
    pub result: String,
    /// Accessed env entries with their values at run time.
    pub envs: BTreeMap<String, String>,
    /// Accessed files with their content fingerprints at run time.
    pub files: BTreeMap<String, Fingerprint>,
    /// Names of the prerequisite results that fed the signature.
    pub prerequisites: Vec<String>,
}

impl Cache {
    ///
    /// Load the cache file at `path`, or start empty if it does not exist yet. Later entries
    /// for the same job name win. Unparseable lines are dropped with a warning, so a cache
    /// truncated by a crash degrades to re-running jobs rather than failing the run.
    ///
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Cache> {
        let path = path.as_ref().to_owned();
        let mut entries = HashMap::new();

        match File::open(&path) {
            Ok(file) => {
                for (index, line) in BufReader::new(file).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CacheEntry>(&line) {
                        Ok(entry) => {
                            entries.insert(entry.name.clone(), entry);
                        }
                        Err(e) => {
                            log::warn!(
                                "dropping unreadable cache entry at {}:{}: {e}",
                                path.display(),
                                index + 1
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Cache { path, entries })
    }

    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    ///
    /// Record a fresh entry: authoritative immediately, durable via an appended line.
    ///
    pub fn add(&mut self, entry: CacheEntry) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(&entry)?;
        writeln!(file, "{line}")?;
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    ///
    /// Rewrite the cache file keeping only the authoritative entry per job name. Called once
    /// when the run finishes.
    ///
    pub fn export(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        let mut file = File::create(&self.path)?;
        for name in names {
            let line = serde_json::to_string(&self.entries[name])?;
            writeln!(file, "{line}")?;
        }
        file.flush()
    }
}

#[cfg(test)]
mod tests;
