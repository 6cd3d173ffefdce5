// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Build options
//!
//! Options arrive as a flat string map (the frontend's `--opt` values or
//! `build-arg:` entries). A fixed set of keys configures loading and the
//! feature flags used during substitution and validation; the rest are
//! ignored.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::errors::{TekgraphError, TekgraphResult};

/// Conventional name of the main document
pub const DEFAULT_FILENAME: &str = "task.yaml";

const BUILD_ARG_PREFIX: &str = "build-arg:";

/// Which API fields are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ApiFields {
    #[default]
    Stable,
    Beta,
    Alpha,
}

impl std::str::FromStr for ApiFields {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "alpha" => Ok(Self::Alpha),
            _ => Err(format!("Unknown API fields level: {}", s)),
        }
    }
}

impl std::fmt::Display for ApiFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Beta => write!(f, "beta"),
            Self::Alpha => write!(f, "alpha"),
        }
    }
}

/// Feature flags consulted during resolution and validation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    pub enable_api_fields: ApiFields,
    pub enable_oci_bundles: bool,
}

/// Parsed build options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Main document name
    pub filename: String,
    pub features: FeatureFlags,
    /// Per-fetch deadline for bundle resolution
    pub bundle_fetch_timeout: Duration,
    /// Ask the solver not to reuse cached exec results
    pub no_cache: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            filename: DEFAULT_FILENAME.to_string(),
            features: FeatureFlags::default(),
            bundle_fetch_timeout: Duration::from_secs(60),
            no_cache: false,
        }
    }
}

impl BuildOptions {
    /// Parse options from a flat key/value map
    pub fn parse(opts: &BTreeMap<String, String>) -> TekgraphResult<Self> {
        let mut options = Self::default();

        for (raw_name, value) in opts {
            let name = raw_name.strip_prefix(BUILD_ARG_PREFIX).unwrap_or(raw_name);
            match name {
                "filename" => {
                    if !value.is_empty() {
                        options.filename = value.clone();
                    }
                }
                "enable-api-fields" => {
                    options.features.enable_api_fields =
                        value.parse().map_err(|e: String| option_error(name, e))?;
                }
                "enable-tekton-oci-bundles" => {
                    options.features.enable_oci_bundles = parse_bool(name, value)?;
                }
                "bundle-fetch-timeout" => {
                    let secs: u64 = value
                        .trim()
                        .trim_end_matches('s')
                        .parse()
                        .map_err(|_| option_error(name, format!("not a number of seconds: {}", value)))?;
                    options.bundle_fetch_timeout = Duration::from_secs(secs);
                }
                "no-cache" => {
                    options.no_cache = value.is_empty() || parse_bool(name, value)?;
                }
                _ => debug!("Ignoring unknown option '{}'", raw_name),
            }
        }

        Ok(options)
    }

    /// Parse `key=value` pairs as given on a command line
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> TekgraphResult<Self> {
        let mut map = BTreeMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(k.to_string(), v.to_string());
        }
        Self::parse(&map)
    }
}

fn parse_bool(name: &str, value: &str) -> TekgraphResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(option_error(name, format!("not a boolean: {}", value))),
    }
}

fn option_error(name: &str, reason: impl Into<String>) -> TekgraphError {
    TekgraphError::invalid(format!("option '{}'", name), reason)
}
