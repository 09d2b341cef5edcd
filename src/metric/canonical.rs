//! Canonical metric identity rendering.
//!
//! `canonicalize` is the single naming authority for the pipeline: every
//! window, baseline, emission, and dead-letter record is keyed by the string
//! it produces. It is pure and stateless, so any number of ingest tasks can
//! call it concurrently without coordination.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::event::CriteriaKind;
use crate::metric::MetricName;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("criteria value for {kind} contains unescapable character {byte:#04x}")]
    InvalidCriteriaValue { kind: CriteriaKind, byte: u8 },
}

/// Render `NAME` or `NAME{K1=v1,K2=v2,...}`.
///
/// Criteria kinds appear in their declaration order (the `Ord` of
/// [`CriteriaKind`]), never insertion order, so two maps with the same
/// (kind, value) pairs always render identically. The delimiters `{` `}`
/// `=` `,` and the escape character `\` are backslash-escaped inside
/// values, which keeps distinct criteria sets from colliding on a shared
/// substring. Control characters have no escaped form and are rejected.
pub fn canonicalize(
    name: MetricName,
    criteria: &BTreeMap<CriteriaKind, String>,
) -> Result<String, CanonicalError> {
    if criteria.is_empty() {
        return Ok(name.to_string());
    }

    let mut out = name.to_string();
    out.push('{');
    let mut first = true;
    // BTreeMap iterates in CriteriaKind declaration order.
    for (kind, value) in criteria {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&kind.to_string());
        out.push('=');
        escape_into(*kind, value, &mut out)?;
    }
    out.push('}');
    Ok(out)
}

fn escape_into(kind: CriteriaKind, value: &str, out: &mut String) -> Result<(), CanonicalError> {
    for b in value.bytes() {
        if b.is_ascii_control() {
            return Err(CanonicalError::InvalidCriteriaValue { kind, byte: b });
        }
    }
    for c in value.chars() {
        match c {
            '\\' | '{' | '}' | '=' | ',' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    Ok(())
}
