// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Image reference canonicalization

use regex::Regex;
use std::sync::OnceLock;

use crate::errors::{TekgraphError, TekgraphResult};

const DEFAULT_DOMAIN: &str = "docker.io";
const OFFICIAL_NAMESPACE: &str = "library";
const DEFAULT_TAG: &str = "latest";

fn path_component() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("static regex")
    })
}

fn tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("static regex"))
}

fn digest() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("static regex")
    })
}

/// Expand a short image name to its fully qualified form.
///
/// `alpine` becomes `docker.io/library/alpine:latest`; references with an
/// explicit registry, tag or digest keep them.
pub fn canonicalize(reference: &str) -> TekgraphResult<String> {
    let reference = reference.trim();
    let invalid = |reason: &str| {
        TekgraphError::invalid(format!("image '{}'", reference), reason.to_string())
    };
    if reference.is_empty() {
        return Err(invalid("empty image reference"));
    }

    let (name, digest_part) = match reference.split_once('@') {
        Some((name, d)) => {
            if !digest().is_match(d) {
                return Err(invalid("malformed digest"));
            }
            (name, Some(d))
        }
        None => (reference, None),
    };

    let (domain, remainder) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest)
        }
        _ => (DEFAULT_DOMAIN.to_string(), name),
    };

    let (path, tag_part) = match remainder.rsplit_once(':') {
        Some((path, t)) if !t.contains('/') => (path, Some(t)),
        _ => (remainder, None),
    };

    if path.is_empty() {
        return Err(invalid("missing repository name"));
    }
    for component in path.split('/') {
        if !path_component().is_match(component) {
            return Err(invalid(
                "repository name must be lowercase alphanumerics separated by '.', '_' or '-'",
            ));
        }
    }
    if let Some(t) = tag_part {
        if !tag().is_match(t) {
            return Err(invalid("malformed tag"));
        }
    }

    let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
        format!("{}/{}", OFFICIAL_NAMESPACE, path)
    } else {
        path.to_string()
    };

    let mut out = format!("{}/{}", domain, path);
    match (tag_part, digest_part) {
        (Some(t), _) => {
            out.push(':');
            out.push_str(t);
        }
        (None, None) => {
            out.push(':');
            out.push_str(DEFAULT_TAG);
        }
        (None, Some(_)) => {}
    }
    if let Some(d) = digest_part {
        out.push('@');
        out.push_str(d);
    }
    Ok(out)
}
