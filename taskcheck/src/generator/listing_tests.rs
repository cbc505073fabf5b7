// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use super::parse_listing_line;
use crate::testcase::TestcaseInfo;

#[test]
fn parses_bare_names() {
    assert_eq!(
        parse_listing_line("01_tree", 0).unwrap(),
        TestcaseInfo::generated("01_tree", 1, true)
    );
}

#[test]
fn parses_repeat_and_seeded() {
    assert_eq!(
        parse_listing_line("02_random repeat=5", 0).unwrap(),
        TestcaseInfo::generated("02_random", 5, true)
    );
    assert_eq!(
        parse_listing_line("03_fixed seeded=false", 0).unwrap(),
        TestcaseInfo::generated("03_fixed", 1, false)
    );
    assert_eq!(
        parse_listing_line("04 repeat=2 seeded=true", 0).unwrap(),
        TestcaseInfo::generated("04", 2, true)
    );
}

#[test]
fn rejects_malformed_lines() {
    assert!(parse_listing_line("", 0).is_err());
    assert!(parse_listing_line("01 repeat", 0).is_err());
    assert!(parse_listing_line("01 repeat=1=2", 0).is_err());
    assert!(parse_listing_line("01 repeat=0", 0).is_err());
    assert!(parse_listing_line("01 repeat=x", 0).is_err());
    assert!(parse_listing_line("01 seeded=maybe", 0).is_err());
    assert!(parse_listing_line("01 color=red", 0).is_err());
    assert!(parse_listing_line("01 repeat=1 repeat=2", 0).is_err());
}

#[test]
fn unseeded_inputs_cannot_repeat() {
    let err = parse_listing_line("01 seeded=false repeat=3", 0).unwrap_err();
    assert!(err.message.contains("'repeat' must be '1'"), "{err}");
}

#[test]
fn error_cites_one_based_line_numbers() {
    let err = parse_listing_line("", 4).unwrap_err();
    assert!(err.message.contains("line 5"), "{err}");
}
