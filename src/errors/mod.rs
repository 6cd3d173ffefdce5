// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Error types
//!
//! Every failure carries a stable [`ErrorKind`] plus enough location
//! context (document, task, step, field) to point at the offending
//! definition. Nothing here is retried: these errors describe a definition
//! problem, not a transient one.

use miette::Diagnostic;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for tekgraph operations
pub type TekgraphResult<T> = Result<T, TekgraphError>;

/// Stable error kinds surfaced to the invoking layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AmbiguousRunRequest,
    DecodeError,
    ReferenceNotFound,
    BundleResolutionError,
    MissingResourceKey,
    UnresolvedParameter,
    InvalidSpecification,
    UnsupportedFeature,
    DependencyCycle,
    Io,
}

impl ErrorKind {
    /// Process exit code the CLI uses for this kind
    pub fn exit_code(self) -> i32 {
        match self {
            Self::AmbiguousRunRequest => 10,
            Self::DecodeError => 11,
            Self::ReferenceNotFound => 12,
            Self::BundleResolutionError => 13,
            Self::MissingResourceKey => 14,
            Self::UnresolvedParameter => 15,
            Self::InvalidSpecification => 16,
            Self::UnsupportedFeature => 17,
            Self::DependencyCycle => 18,
            Self::Io => 74,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AmbiguousRunRequest => "AmbiguousRunRequest",
            Self::DecodeError => "DecodeError",
            Self::ReferenceNotFound => "ReferenceNotFound",
            Self::BundleResolutionError => "BundleResolutionError",
            Self::MissingResourceKey => "MissingResourceKey",
            Self::UnresolvedParameter => "UnresolvedParameter",
            Self::InvalidSpecification => "InvalidSpecification",
            Self::UnsupportedFeature => "UnsupportedFeature",
            Self::DependencyCycle => "DependencyCycle",
            Self::Io => "Io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for tekgraph
#[derive(Error, Debug, Diagnostic)]
pub enum TekgraphError {
    // ─────────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Expected exactly one TaskRun or PipelineRun, found {task_runs} TaskRun(s) and {pipeline_runs} PipelineRun(s)")]
    #[diagnostic(
        code(tekgraph::ambiguous_run_request),
        help("Keep a single TaskRun or PipelineRun across the main file and the context files")
    )]
    AmbiguousRunRequest {
        task_runs: usize,
        pipeline_runs: usize,
    },

    #[error("Failed to decode {location}: {reason}")]
    #[diagnostic(code(tekgraph::decode_error))]
    DecodeError { location: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────────
    #[error("{kind} '{name}' not found in context")]
    #[diagnostic(
        code(tekgraph::reference_not_found),
        help("Add the definition to the context directory or embed it in the run")
    )]
    ReferenceNotFound { kind: String, name: String },

    #[error("Failed to resolve '{name}' in bundle {bundle}: {reason}")]
    #[diagnostic(code(tekgraph::bundle_resolution))]
    BundleResolution {
        bundle: String,
        name: String,
        reason: String,
    },

    #[error("Key '{key}' from {kind} '{name}' not found")]
    #[diagnostic(code(tekgraph::missing_resource_key))]
    MissingResourceKey {
        kind: String,
        name: String,
        key: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Substitution and validation
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Parameter '{param}' of {owner} has no value and no default")]
    #[diagnostic(
        code(tekgraph::unresolved_parameter),
        help("Bind '{param}' in the run's params or give it a default")
    )]
    UnresolvedParameter { owner: String, param: String },

    #[error("Invalid specification ({location}): {reason}")]
    #[diagnostic(code(tekgraph::invalid_specification))]
    InvalidSpecification { location: String, reason: String },

    #[error("{location}: {field} not supported")]
    #[diagnostic(code(tekgraph::unsupported_feature))]
    UnsupportedFeature { location: String, field: String },

    #[error("Circular dependency detected: {}", tasks.join(" -> "))]
    #[diagnostic(
        code(tekgraph::dependency_cycle),
        help("Review runAfter, result references and shared workspaces to remove the cycle")
    )]
    DependencyCycle { tasks: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(tekgraph::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(tekgraph::io_error))]
    Io { message: String },
}

impl From<std::io::Error> for TekgraphError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for TekgraphError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::DecodeError {
            location: "YAML document".into(),
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for TekgraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io { message: format!("JSON encoding failed: {}", e) }
    }
}

impl TekgraphError {
    /// The stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AmbiguousRunRequest { .. } => ErrorKind::AmbiguousRunRequest,
            Self::DecodeError { .. } => ErrorKind::DecodeError,
            Self::ReferenceNotFound { .. } => ErrorKind::ReferenceNotFound,
            Self::BundleResolution { .. } => ErrorKind::BundleResolutionError,
            Self::MissingResourceKey { .. } => ErrorKind::MissingResourceKey,
            Self::UnresolvedParameter { .. } => ErrorKind::UnresolvedParameter,
            Self::InvalidSpecification { .. } => ErrorKind::InvalidSpecification,
            Self::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            Self::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            Self::FileReadError { .. } | Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpecification {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(location: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            location: location.into(),
            field: field.into(),
        }
    }

    pub fn decode(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecodeError {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn bundle(bundle: &str, name: &str, reason: impl Into<String>) -> Self {
        Self::BundleResolution {
            bundle: bundle.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Prefix the location of a located error with an outer scope.
    ///
    /// Used when a task-level failure bubbles up through a pipeline task so
    /// the message names both.
    pub fn within(self, scope: &str) -> Self {
        match self {
            Self::InvalidSpecification { location, reason } => Self::InvalidSpecification {
                location: format!("{}, {}", scope, location),
                reason,
            },
            Self::UnsupportedFeature { location, field } => Self::UnsupportedFeature {
                location: format!("{}, {}", scope, location),
                field,
            },
            Self::UnresolvedParameter { owner, param } => Self::UnresolvedParameter {
                owner: format!("{} ({})", owner, scope),
                param,
            },
            other => other,
        }
    }
}
