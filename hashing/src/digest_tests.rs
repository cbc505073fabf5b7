// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::io::Write;

use crate::{Digest, Fingerprint, WriterHasher, EMPTY_FINGERPRINT};

#[test]
fn of_bytes() {
    assert_eq!(
        Digest::of_bytes("meep".as_bytes()),
        Digest::new(
            Fingerprint::from_hex_string(
                "23e92dfba8fb0c93cfba31ad2962b4e35a47054296d1d375d7f7e13e0185de7a",
            )
            .unwrap(),
            4,
        )
    );
}

#[test]
fn of_empty_bytes() {
    assert_eq!(
        Digest::of_bytes(&[]),
        Digest::new(EMPTY_FINGERPRINT, 0)
    );
}

#[test]
fn of_file_matches_of_bytes() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("meep.txt");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(b"meep").unwrap();
    drop(f);

    assert_eq!(Digest::of_file(&path).unwrap(), Digest::of_bytes(b"meep"));
}

#[test]
fn writer_hasher_hashes() {
    let mut src = "meep".as_bytes();

    let dst = Vec::with_capacity(10);
    let mut hasher = WriterHasher::new(dst);
    assert_eq!(std::io::copy(&mut src, &mut hasher).unwrap(), 4);
    let want = (Digest::of_bytes(b"meep"), "meep".as_bytes().to_vec());
    assert_eq!(hasher.finish(), want);
}
