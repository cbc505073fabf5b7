// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;

use hashing::Digest;
use tempfile::TempDir;

use crate::{Cache, CacheEntry};

fn entry(name: &str, result: &str) -> CacheEntry {
    CacheEntry {
        name: name.to_owned(),
        signature: Digest::of_bytes(result.as_bytes()).hash,
        result: result.to_owned(),
        envs: BTreeMap::from([("verbosity".to_owned(), "0".to_owned())]),
        files: BTreeMap::from([("gen.py".to_owned(), Digest::of_bytes(b"src").hash)]),
        prerequisites: vec!["compile".to_owned()],
    }
}

#[test]
fn empty_when_file_missing() {
    let dir = TempDir::new().unwrap();
    let cache = Cache::open(dir.path().join("cache")).unwrap();
    assert_eq!(cache.len(), 0);
}

#[test]
fn add_then_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");

    let mut cache = Cache::open(&path).unwrap();
    cache.add(entry("build solve", "\"ok\"")).unwrap();
    drop(cache);

    let cache = Cache::open(&path).unwrap();
    assert_eq!(cache.get("build solve"), Some(&entry("build solve", "\"ok\"")));
}

#[test]
fn newest_entry_wins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");

    let mut cache = Cache::open(&path).unwrap();
    cache.add(entry("job", "\"first\"")).unwrap();
    cache.add(entry("job", "\"second\"")).unwrap();
    drop(cache);

    // Both lines are on disk, but reload resolves to the newest.
    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 2);
    let cache = Cache::open(&path).unwrap();
    assert_eq!(cache.get("job").unwrap().result, "\"second\"");
}

#[test]
fn export_compacts_duplicates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");

    let mut cache = Cache::open(&path).unwrap();
    cache.add(entry("job", "\"first\"")).unwrap();
    cache.add(entry("job", "\"second\"")).unwrap();
    cache.add(entry("other", "\"third\"")).unwrap();
    cache.export().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 2);
    let cache = Cache::open(&path).unwrap();
    assert_eq!(cache.get("job").unwrap().result, "\"second\"");
    assert_eq!(cache.get("other").unwrap().result, "\"third\"");
}

#[test]
fn corrupt_lines_are_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");

    let mut cache = Cache::open(&path).unwrap();
    cache.add(entry("job", "\"kept\"")).unwrap();
    drop(cache);

    // Simulate a crash mid-append.
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "{{\"name\": \"trunc").unwrap();
    drop(file);

    let cache = Cache::open(&path).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("job"));
}
