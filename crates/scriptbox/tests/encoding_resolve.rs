// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Encoding resolution across the default, declared and explicit paths.

use scriptbox::encoding::{resolve, EncodingError, EncodingSource};

#[test]
fn clean_default_bytes_use_the_default_encoding() {
    let source = "// coding: latin-1\nlet x = \"héllo\";\n";
    let decoded = resolve(source.as_bytes(), None, "utf-8").unwrap();

    // Valid under the default: the declaration is never consulted.
    assert_eq!(decoded.encoding, "utf-8");
    assert_eq!(decoded.source, EncodingSource::Default);
    assert_eq!(decoded.text, source);
}

#[test]
fn invalid_default_bytes_fall_back_to_the_declaration() {
    let mut raw = b"#!/usr/bin/env scriptbox\n// -*- coding: latin-1 -*-\nlet x = \"caf".to_vec();
    raw.push(0xe9);
    raw.extend_from_slice(b"\";\n");

    let decoded = resolve(&raw, None, "utf-8").unwrap();

    assert_eq!(decoded.encoding, "latin-1");
    assert_eq!(decoded.source, EncodingSource::Declared);
    // Strict decode with the declared encoding, not the lossy scan text.
    assert!(decoded.text.contains("café"));
    assert!(!decoded.text.contains('\u{fffd}'));
}

#[test]
fn declaration_may_appear_on_any_line() {
    let mut raw = b"let a = 1;\nlet b = 2;\n# vim: fileencoding=windows-1252\nlet c = \"".to_vec();
    raw.push(0x80);
    raw.extend_from_slice(b"\";\n");

    let decoded = resolve(&raw, None, "utf-8").unwrap();

    assert_eq!(decoded.encoding, "windows-1252");
    assert!(decoded.text.contains('€'));
}

#[test]
fn missing_declaration_is_unresolved() {
    let raw = [b'l', b'e', b't', b' ', 0xff, 0xfe, b';'];

    let err = resolve(&raw, None, "utf-8").unwrap_err();

    assert_eq!(
        err,
        EncodingError::Unresolved {
            default: "utf-8".to_string()
        }
    );
    assert_eq!(err.code(), "E_ENCODING_UNRESOLVED");
}

#[test]
fn declared_encoding_that_cannot_decode_is_a_decode_error() {
    // Odd-length UTF-16 input cannot decode strictly.
    let mut raw = b"// coding: utf-16le\n".to_vec();
    raw.push(0xff);

    let err = resolve(&raw, None, "utf-8").unwrap_err();

    assert_eq!(err.code(), "E_DECODE");
}

#[test]
fn declared_unknown_encoding_is_unsupported() {
    let mut raw = b"// coding: martian-7\n".to_vec();
    raw.push(0xff);

    let err = resolve(&raw, None, "utf-8").unwrap_err();

    assert_eq!(err.code(), "E_ENCODING_UNSUPPORTED");
}

#[test]
fn explicit_encoding_skips_detection() {
    let raw = [b'l', b'e', b't', b' ', b'x', b'=', b'"', 0xe9, b'"', b';'];

    let decoded = resolve(&raw, Some("latin-1"), "utf-8").unwrap();

    assert_eq!(decoded.encoding, "latin-1");
    assert_eq!(decoded.source, EncodingSource::Explicit);
    assert_eq!(decoded.text, "let x=\"é\";");
}

#[test]
fn default_encoding_is_configurable() {
    let raw = [b'/', b'/', b' ', 0xe9];

    let decoded = resolve(&raw, None, "iso-8859-1").unwrap();

    assert_eq!(decoded.encoding, "iso-8859-1");
    assert_eq!(decoded.source, EncodingSource::Default);
}

#[test]
fn hash_comment_latin1_header_is_honoured() {
    let mut raw = b"# coding: latin-1\n".to_vec();
    raw.extend_from_slice(&[b'x', b'=', 0xe9, b'\n']);

    let decoded = resolve(&raw, None, "utf-8").unwrap();

    assert_eq!(decoded.encoding, "latin-1");
    assert_eq!(decoded.source, EncodingSource::Declared);
    assert_eq!(decoded.text, "# coding: latin-1\nx=é\n");
}

#[test]
fn latin1_maps_c1_bytes_to_their_own_code_points() {
    let raw: Vec<u8> = (0x80..=0x9f).collect();

    for label in ["latin-1", "iso-8859-1", "latin_1", "L1"] {
        let decoded = resolve(&raw, Some(label), "utf-8").unwrap();
        let code_points: Vec<u32> = decoded.text.chars().map(u32::from).collect();
        assert_eq!(code_points, (0x80..=0x9f).collect::<Vec<u32>>(), "label {label}");
    }
}

#[test]
fn underscore_codec_names_resolve() {
    let decoded = resolve("let x = 1;".as_bytes(), Some("utf_8"), "utf-8").unwrap();
    assert_eq!(decoded.text, "let x = 1;");

    let decoded = resolve(&[0xe9], None, "latin_1").unwrap();
    assert_eq!(decoded.text, "é");
}
