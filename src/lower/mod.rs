// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Lowering prepared runs into a build graph
//!
//! Each step becomes one exec node chained to the previous step through
//! its results directory. Pipelines lower their tasks in dependency order
//! and finish with an aggregate tree holding every task's `/tekton`.

pub mod files;
pub mod graph;
pub mod image;
mod pipeline;
mod task;

pub use graph::{BuildGraph, CacheSharing, ExecOp, FileAction, Mount, MountSource, Node, NodeId, Op};
pub use pipeline::lower_pipeline;
pub use task::lower_task;

use serde::Serialize;
use tracing::info;

use crate::config::BuildOptions;
use crate::dag::TaskGraph;
use crate::errors::TekgraphResult;
use crate::resources::ResourceBundle;
use crate::substitution::{PreparedPipeline, PreparedTask};

/// Per-step results directory
pub const RESULTS_DIR: &str = "/tekton/results";
/// Per-step metadata such as exit codes
pub const STEPS_DIR: &str = "/tekton/steps";
/// Where predecessor task results are mounted
pub const FROM_TASK_DIR: &str = "/tekton/from-task";
/// Where the previous step's results are mounted
pub const PREVIOUS_RESULTS_DIR: &str = "/tekton/steps/previous/results";
pub const TEKTON_DIR: &str = "/tekton";
/// Root of the aggregate pipeline output
pub const AGGREGATE_DIR: &str = "/task";

/// Shared inputs for lowering
#[derive(Debug, Clone, Copy)]
pub struct LowerContext<'a> {
    pub resources: &'a ResourceBundle,
    pub options: &'a BuildOptions,
}

/// Lowering output: the graph, the node to build, and the task order
#[derive(Debug, Clone, Serialize)]
pub struct Lowered {
    pub root: NodeId,
    pub plan: Vec<String>,
    pub graph: BuildGraph,
}

impl Lowered {
    pub fn to_json(&self) -> TekgraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_dot(&self) -> String {
        self.graph.to_dot()
    }

    pub fn root_node(&self) -> &Node {
        self.graph.get(self.root)
    }
}

/// Lower the task of a TaskRun; the root is its last step
pub fn lower_task_run(task: &PreparedTask, ctx: LowerContext<'_>) -> TekgraphResult<Lowered> {
    let mut graph = BuildGraph::new();
    let root = lower_task(&mut graph, task, &[], ctx)?;
    info!("Lowered {} steps into {} nodes", task.spec.steps.len(), graph.len());
    Ok(Lowered {
        root,
        plan: vec![task.label().to_string()],
        graph,
    })
}

/// Lower every task of a PipelineRun; the root is the aggregate tree
pub fn lower_pipeline_run(
    pipeline: &PreparedPipeline,
    dag: &TaskGraph,
    ctx: LowerContext<'_>,
) -> TekgraphResult<Lowered> {
    let mut graph = BuildGraph::new();
    let root = lower_pipeline(&mut graph, pipeline, dag, ctx)?;
    info!("Lowered {} tasks into {} nodes", pipeline.tasks.len(), graph.len());
    Ok(Lowered {
        root,
        plan: dag.order_names(),
        graph,
    })
}
