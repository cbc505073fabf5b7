// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Fingerprint;

#[test]
fn from_hex_string() {
    assert_eq!(
        Fingerprint::from_hex_string(
            "0123456789abcdefFEDCBA98765432100000000000000000ffFFfFfFFfFfFFff",
        )
        .unwrap(),
        Fingerprint([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54,
            0x32, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff,
        ],)
    )
}

#[test]
fn from_hex_string_not_long_enough() {
    Fingerprint::from_hex_string("abcd").expect_err("Want err");
}

#[test]
fn from_hex_string_too_long() {
    Fingerprint::from_hex_string(
        "0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0",
    )
    .expect_err("Want err");
}

#[test]
fn from_hex_string_invalid_chars() {
    Fingerprint::from_hex_string(
        "Q123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF",
    )
    .expect_err("Want err");
}

#[test]
fn hex_roundtrip() {
    let hex = "0123456789abcdeffedcba98765432100000000000000000ffffffffffffffff";
    assert_eq!(Fingerprint::from_hex_string(hex).unwrap().to_hex(), hex);
}

#[test]
fn display_is_hex() {
    let fp = Fingerprint([0xab; 32]);
    assert_eq!(format!("{fp}"), fp.to_hex());
    assert_eq!(format!("{fp:?}"), format!("Fingerprint<{}>", fp.to_hex()));
}

#[test]
fn serde_as_hex_string() {
    let fp = Fingerprint([0xab; 32]);
    let json = serde_json::to_string(&fp).unwrap();
    assert_eq!(json, format!("\"{}\"", fp.to_hex()));
    let back: Fingerprint = serde_json::from_str(&json).unwrap();
    assert_eq!(back, fp);
}
