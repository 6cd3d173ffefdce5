// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! # tekgraph - Tekton run compiler
//!
//! `tekgraph` turns a Tekton `TaskRun` or `PipelineRun`, together with the
//! Tasks, Pipelines, Secrets and ConfigMaps it refers to, into a
//! content-addressed build graph for an external solver.
//!
//! ## Stages
//!
//! - **Load** - split and decode documents, find the single run request
//! - **Resolve** - embedded, named or bundled Task/Pipeline references
//! - **Substitute** - params, context, workspaces and results
//! - **Validate** - structure and the supported feature set
//! - **Graph** - pipeline task ordering
//! - **Lower** - chained exec nodes with script, workspace and result mounts
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a run and everything next to it
//! tekgraph validate -d ci/ -f pipelinerun.yaml
//!
//! # Emit the build graph
//! tekgraph lower -d ci/ -f pipelinerun.yaml > graph.json
//!
//! # Show the task order
//! tekgraph plan -d ci/ -f pipelinerun.yaml --format mermaid
//! ```

pub mod cli;
pub mod compiler;
pub mod config;
pub mod dag;
pub mod errors;
pub mod lower;
pub mod resolve;
pub mod resources;
pub mod solver;
pub mod substitution;
pub mod validation;

// Re-export commonly used types
pub use compiler::{Checked, Compiler};
pub use config::BuildOptions;
pub use errors::{ErrorKind, TekgraphError, TekgraphResult};
pub use lower::{BuildGraph, Lowered};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
