// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{Digest, Signer};

#[test]
fn deterministic() {
    let mut a = Signer::new();
    a.record("name", "build gen");
    a.record("file", "gen.py");
    let mut b = Signer::new();
    b.record("name", "build gen");
    b.record("file", "gen.py");
    assert_eq!(a.finish(), b.finish());
}

#[test]
fn sensitive_to_values() {
    let mut a = Signer::new();
    a.record("timeout", "1");
    let mut b = Signer::new();
    b.record("timeout", "2");
    assert_ne!(a.finish(), b.finish());
}

#[test]
fn sensitive_to_keys() {
    let mut a = Signer::new();
    a.record("a", "x");
    let mut b = Signer::new();
    b.record("b", "x");
    assert_ne!(a.finish(), b.finish());
}

#[test]
fn matches_flat_hash_of_records() {
    let mut signer = Signer::new();
    signer.record("k", "v");
    signer.record("k2", "v2");
    assert_eq!(
        signer.finish(),
        Digest::of_bytes(b"k=v\nk2=v2\n").hash,
    );
}
