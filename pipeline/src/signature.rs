// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use hashing::{Digest, Fingerprint, Signer};

use crate::EnvView;

///
/// Signature inputs could not be resolved: a declared file vanished mid-run, or a recorded env
/// field no longer exists. The affected cache entry is not written (or not trusted), so the
/// job simply re-runs next time.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureError {
    pub message: String,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The resolved signature inputs of one job, in canonical order.
pub(crate) struct SignatureInputs {
    pub envs: BTreeMap<String, String>,
    pub files: BTreeMap<String, Fingerprint>,
    pub prerequisites: Vec<String>,
    pub signature: Fingerprint,
}

///
/// Resolve env names and file paths to their current values/digests and fold everything into
/// a signature: positional args, env `name=value` records, file `path=digest` records, and
/// prerequisite `name=serialized_result` records, each group in canonical (sorted) order.
///
pub(crate) fn compute_signature(
    args: &[String],
    env: &dyn EnvView,
    env_names: &BTreeSet<String>,
    file_paths: &BTreeSet<PathBuf>,
    prerequisites_results: &BTreeMap<String, String>,
) -> Result<SignatureInputs, SignatureError> {
    let mut envs = BTreeMap::new();
    for name in env_names {
        let value = env.value_of(name).ok_or_else(|| SignatureError {
            message: format!("env field '{name}' does not exist"),
        })?;
        envs.insert(name.clone(), value);
    }

    let mut files = BTreeMap::new();
    for path in file_paths {
        let digest = Digest::of_file(path).map_err(|e| SignatureError {
            message: format!(
                "cannot hash {}: {e}. Check if something else is changing files in the task directory.",
                path.display()
            ),
        })?;
        files.insert(path.to_string_lossy().into_owned(), digest.hash);
    }

    let mut signer = Signer::new();
    for (i, arg) in args.iter().enumerate() {
        signer.record(&i.to_string(), arg);
    }
    for (name, value) in &envs {
        signer.record(&format!("env:{name}"), value);
    }
    for (path, fingerprint) in &files {
        signer.record(&format!("file:{path}"), &fingerprint.to_hex());
    }
    for (name, serialized) in prerequisites_results {
        signer.record(&format!("result:{name}"), serialized);
    }

    Ok(SignatureInputs {
        envs,
        files,
        prerequisites: prerequisites_results.keys().cloned().collect(),
        signature: signer.finish(),
    })
}
