// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Duration;

#[test]
fn std_roundtrip() {
    let std = std::time::Duration::new(3, 141_592_653);
    let concrete: Duration = std.into();
    assert_eq!(concrete, Duration::new(3, 141_592_653));
    let back: std::time::Duration = concrete.into();
    assert_eq!(back, std);
}

#[test]
fn secs_f64() {
    assert_eq!(Duration::new(2, 500_000_000).as_secs_f64(), 2.5);
    assert_eq!(Duration::from_secs_f64(2.5), Duration::new(2, 500_000_000));
    // Negative inputs clamp rather than panic.
    assert_eq!(Duration::from_secs_f64(-1.0), Duration::new(0, 0));
}

#[test]
fn serde_roundtrip() {
    let duration = Duration::new(1, 250_000_000);
    let json = serde_json::to_string(&duration).unwrap();
    assert_eq!(json, r#"{"secs":1,"nanos":250000000}"#);
    let back: Duration = serde_json::from_str(&json).unwrap();
    assert_eq!(back, duration);
}
