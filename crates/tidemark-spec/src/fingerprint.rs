use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tidemark_core::{Fingerprint, FingerprintError, Fingerprints, ReportDef, SourceDef};

use crate::config::PipelineConfig;

/// Digest length in hex chars. Short enough to read in reports, long enough
/// that collisions across a pipeline's handful of definitions are a non-issue.
const FINGERPRINT_LEN: usize = 12;

fn digest(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex = hex::encode(hasher.finalize());
    Fingerprint::from_str(&hex[..FINGERPRINT_LEN])
}

/// Fingerprint of a source definition: hash of the query's normalized form,
/// so reformatting or re-commenting never triggers a rebuild while any change
/// to the executable text does.
pub fn source_fingerprint(def: &SourceDef) -> Result<Fingerprint, FingerprintError> {
    let normalized = normalize_query(&def.query).map_err(|reason| FingerprintError {
        artifact_id: def.id.clone(),
        reason,
    })?;
    Ok(digest(normalized.as_bytes()))
}

/// Canonical serialization of the parts of a report that affect its output:
/// dependency set (order-insensitive), template identity, parameters.
#[derive(Serialize)]
struct CanonicalReport<'a> {
    depends_on: Vec<&'a str>,
    template: &'a str,
    params: &'a BTreeMap<String, String>,
}

pub fn report_fingerprint(def: &ReportDef) -> Fingerprint {
    let mut depends_on: Vec<&str> = def.depends_on.iter().map(String::as_str).collect();
    depends_on.sort_unstable();
    let canonical = CanonicalReport { depends_on, template: &def.template, params: &def.params };
    // BTreeMap params and the sorted dependency list make the JSON stable.
    let bytes = serde_json::to_vec(&canonical).expect("canonical report serializable");
    digest(&bytes)
}

/// Fingerprint every configured definition. Definitions that fail to
/// normalize are returned as errors and left out of the set, which downstream
/// treats as always-stale rather than aborting the run.
pub fn compute_fingerprints(config: &PipelineConfig) -> (Fingerprints, Vec<FingerprintError>) {
    let mut fingerprints = Fingerprints::new();
    let mut errors = Vec::new();

    for def in config.source_defs() {
        match source_fingerprint(&def) {
            Ok(fp) => fingerprints.insert(def.id, fp),
            Err(e) => errors.push(e),
        }
    }
    for def in config.report_defs() {
        let fp = report_fingerprint(&def);
        fingerprints.insert(def.id, fp);
    }

    (fingerprints, errors)
}

/// Strip `--` line comments and `/* */` block comments, collapse whitespace
/// runs outside string literals to single spaces, and trim. String literals
/// (with `''` doubling and backslash escapes) pass through verbatim.
fn normalize_query(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for c2 in chars.by_ref() {
                    if c2 == '\n' {
                        break;
                    }
                }
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut closed = false;
                while let Some(c2) = chars.next() {
                    if c2 == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated block comment".to_string());
                }
                pending_space = true;
            }
            '\'' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push('\'');
                let mut closed = false;
                while let Some(c2) = chars.next() {
                    out.push(c2);
                    match c2 {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        '\'' => {
                            if chars.peek() == Some(&'\'') {
                                // doubled quote: literal ' inside the string
                                chars.next();
                                out.push('\'');
                            } else {
                                closed = true;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }

    if out.is_empty() {
        return Err("query has no executable text".to_string());
    }
    Ok(out)
}
