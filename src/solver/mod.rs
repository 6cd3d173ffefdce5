// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Build graph solver seam
//!
//! The compiler never executes anything itself. The only place it needs
//! a solver is bundle resolution: load an image and read one file back.
//! [`DirectorySolver`] serves images from a local directory tree and
//! [`MemorySolver`] from an in-memory table.

mod directory;
mod memory;

pub use directory::DirectorySolver;
pub use memory::MemorySolver;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{TekgraphError, TekgraphResult};
use crate::lower::{BuildGraph, NodeId, Op};

/// A graph submitted for solving
#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub graph: BuildGraph,
    pub root: NodeId,

    /// Named local directory snapshots made available to the graph
    pub local_dirs: BTreeMap<String, PathBuf>,
}

impl SolveRequest {
    pub fn new(graph: BuildGraph, root: NodeId) -> Self {
        Self {
            graph,
            root,
            local_dirs: BTreeMap::new(),
        }
    }

    /// Image reference of the root node, for solvers that only load images
    pub fn root_image(&self) -> TekgraphResult<&str> {
        match &self.graph.get(self.root).op {
            Op::Image { reference } => Ok(reference),
            other => Err(TekgraphError::Io {
                message: format!("solver can only load images, got {:?} at root", op_name(other)),
            }),
        }
    }
}

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::Image { .. } => "image",
        Op::Scratch => "scratch",
        Op::File { .. } => "file",
        Op::Exec(_) => "exec",
    }
}

/// Handle to a solved result filesystem
#[async_trait]
pub trait SolvedRef: Send + Sync {
    /// Read a file from the result filesystem
    async fn read_file(&self, path: &str) -> TekgraphResult<Vec<u8>>;
}

/// An external build graph solver
#[async_trait]
pub trait Solver: Send + Sync {
    /// Solve the request and return a handle to its root's filesystem
    async fn solve(&self, request: SolveRequest) -> TekgraphResult<Box<dyn SolvedRef>>;
}

/// Relative form of a path inside a result filesystem.
///
/// Returns `None` when the path would leave the root.
pub(crate) fn relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            p => out.push(p),
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
