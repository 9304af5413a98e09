//! Source encoding resolution.
//!
//! Scripts are read as raw bytes and decoded in one of three ways:
//!
//! - with an explicitly supplied encoding (strict),
//! - with the default encoding when the bytes are valid under it,
//! - with the encoding named by a declaration comment such as
//!   `// -*- coding: latin-1 -*-`, found by scanning a lossy decode of the
//!   bytes line by line. The first matching line wins.
//!
//! Encoding labels are looked up with [`encoding_rs::Encoding::for_label`]
//! after normalization, so WHATWG labels and the usual codec spellings
//! (`utf_8`, `Latin-1`, `euc_jp`, `shift_jis`, `utf-16le`, ...) are accepted.
//! The latin-1 family is decoded as true ISO-8859-1 rather than the WHATWG
//! windows-1252 superset.

use encoding_rs::Encoding;
use miette::Diagnostic;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// How the resolved encoding was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingSource {
    /// Supplied by the caller.
    Explicit,
    /// The default encoding decoded the bytes cleanly.
    Default,
    /// Named by a declaration comment in the source.
    Declared,
}

/// Decoded script text plus the encoding it was decoded with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedSource {
    /// Encoding label as supplied, defaulted or declared.
    pub encoding: String,
    pub source: EncodingSource,
    pub text: String,
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unknown file encoding: bytes are not valid {default} and no coding declaration was found")]
    #[diagnostic(
        code(E_ENCODING_UNRESOLVED),
        help("add a declaration comment such as `// -*- coding: latin-1 -*-` or pass an explicit encoding")
    )]
    Unresolved { default: String },

    #[error("unsupported encoding {label:?}")]
    #[diagnostic(code(E_ENCODING_UNSUPPORTED))]
    Unsupported { label: String },

    #[error("source is not valid {encoding}")]
    #[diagnostic(code(E_DECODE))]
    Decode { encoding: String },
}

impl EncodingError {
    /// Stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unresolved { .. } => "E_ENCODING_UNRESOLVED",
            Self::Unsupported { .. } => "E_ENCODING_UNSUPPORTED",
            Self::Decode { .. } => "E_DECODE",
        }
    }
}

fn declaration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Both `#` and `//` comment leaders are recognised.
        #[allow(clippy::expect_used)]
        Regex::new(r"^\s*(?:#|//).*coding[:=]\s*([-\w.]+)").expect("declaration pattern is valid")
    })
}

/// Labels for ISO-8859-1 proper, after [`normalize_label`].
///
/// WHATWG maps these to windows-1252; here they decode byte for byte to
/// U+0000..=U+00FF instead, so 0x80..=0x9F stay C1 controls.
const LATIN1_LABELS: &[&str] = &[
    "latin-1",
    "latin1",
    "latin",
    "l1",
    "iso-8859-1",
    "iso8859-1",
    "iso-8859-1:1987",
    "iso-ir-100",
    "8859",
    "cp819",
    "ibm819",
];

/// A resolved text codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    /// ISO-8859-1: every byte is its own code point.
    Latin1,
    /// Any other encoding from the WHATWG table.
    Whatwg(&'static Encoding),
}

impl Codec {
    fn decode_strict(self, raw: &[u8]) -> Option<String> {
        match self {
            Self::Latin1 => Some(raw.iter().copied().map(char::from).collect()),
            Self::Whatwg(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(raw)
                .map(std::borrow::Cow::into_owned),
        }
    }

    fn decode_lossy(self, raw: &[u8]) -> String {
        match self {
            Self::Latin1 => raw.iter().copied().map(char::from).collect(),
            Self::Whatwg(encoding) => encoding.decode_without_bom_handling(raw).0.into_owned(),
        }
    }

    /// Canonical name of the codec.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Latin1 => "iso-8859-1",
            Self::Whatwg(encoding) => encoding.name(),
        }
    }
}

/// Lowercase `label` and turn `_` and spaces into `-`, so `UTF_8`,
/// `Latin_1` and `euc_jp` match their hyphenated spellings.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Look up an encoding by label.
///
/// The label is tried as given, then normalized, then normalized with `_`
/// in place of `-` (WHATWG spells some labels that way, e.g. `shift_jis`).
pub fn lookup(label: &str) -> Result<Codec, EncodingError> {
    let normalized = normalize_label(label);
    if LATIN1_LABELS.contains(&normalized.as_str()) {
        return Ok(Codec::Latin1);
    }
    [
        label.trim().to_string(),
        normalized.clone(),
        normalized.replace('-', "_"),
    ]
    .iter()
    .find_map(|candidate| Encoding::for_label(candidate.as_bytes()))
    .map(Codec::Whatwg)
    .ok_or_else(|| EncodingError::Unsupported {
        label: label.to_string(),
    })
}

/// Decode `raw` strictly with `label`. A leading byte-order mark is dropped.
pub fn decode_strict(raw: &[u8], label: &str) -> Result<String, EncodingError> {
    let text = lookup(label)?
        .decode_strict(raw)
        .ok_or_else(|| EncodingError::Decode {
            encoding: label.to_string(),
        })?;
    Ok(strip_bom(&text).to_string())
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Return the encoding named by the first declaration comment in `text`.
#[must_use]
pub fn find_declaration(text: &str) -> Option<String> {
    let pattern = declaration_pattern();
    text.lines().find_map(|line| {
        pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|name| name.as_str().to_string())
    })
}

/// Resolve the encoding of `raw` and decode it.
///
/// `explicit` wins when given. Otherwise the bytes are decoded with
/// `default_encoding`; only when that fails is the text scanned for a
/// declaration comment.
pub fn resolve(
    raw: &[u8],
    explicit: Option<&str>,
    default_encoding: &str,
) -> Result<DecodedSource, EncodingError> {
    if let Some(label) = explicit {
        let text = decode_strict(raw, label)?;
        return Ok(DecodedSource {
            encoding: label.to_string(),
            source: EncodingSource::Explicit,
            text,
        });
    }

    let default = lookup(default_encoding)?;
    if let Some(text) = default.decode_strict(raw) {
        return Ok(DecodedSource {
            encoding: default_encoding.to_string(),
            source: EncodingSource::Default,
            text: strip_bom(&text).to_string(),
        });
    }

    tracing::debug!(
        default = default_encoding,
        "source is not valid under the default encoding; scanning for a coding declaration"
    );
    let scanned = default.decode_lossy(raw);
    let declared = find_declaration(&scanned).ok_or_else(|| EncodingError::Unresolved {
        default: default_encoding.to_string(),
    })?;
    let text = decode_strict(raw, &declared)?;
    Ok(DecodedSource {
        encoding: declared,
        source: EncodingSource::Declared,
        text,
    })
}
