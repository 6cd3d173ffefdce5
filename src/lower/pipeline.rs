// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Pipeline lowering

use std::collections::HashMap;
use tracing::debug;

use super::graph::{BuildGraph, FileAction, Mount, NodeId};
use super::task::lower_task;
use super::{LowerContext, AGGREGATE_DIR, FROM_TASK_DIR, RESULTS_DIR, TEKTON_DIR};
use crate::dag::TaskGraph;
use crate::errors::{TekgraphError, TekgraphResult};
use crate::substitution::PreparedPipeline;

const AGGREGATE_DIR_MODE: u32 = 0o777;

/// Lower every pipeline task in dependency order and return the aggregate
/// node holding each task's `/tekton` under `/task/<name>`.
pub fn lower_pipeline(
    graph: &mut BuildGraph,
    pipeline: &PreparedPipeline,
    dag: &TaskGraph,
    ctx: LowerContext<'_>,
) -> TekgraphResult<NodeId> {
    let mut terminals: HashMap<&str, NodeId> = HashMap::new();
    let mut lowered: Vec<(&str, NodeId)> = Vec::new();

    for &idx in dag.order() {
        let name = pipeline.spec.tasks[idx].name.as_str();
        let task = &pipeline.tasks[idx];

        let mut inputs = Vec::new();
        for dep in dag.dependencies(name).unwrap_or_default() {
            let node = terminals.get(dep.as_str()).copied().ok_or_else(|| {
                TekgraphError::invalid(
                    format!("pipeline task '{}'", name),
                    format!("predecessor '{}' was not lowered first", dep),
                )
            })?;
            inputs.push(Mount::node(format!("{}/{}", FROM_TASK_DIR, dep), node, RESULTS_DIR));
        }
        debug!("{}: {} predecessor mounts", name, inputs.len());

        let terminal = lower_task(graph, task, &inputs, ctx)?;
        terminals.insert(name, terminal);
        lowered.push((name, terminal));
    }

    let mut actions = vec![FileAction::Mkdir {
        path: AGGREGATE_DIR.to_string(),
        mode: AGGREGATE_DIR_MODE,
        parents: true,
    }];
    actions.extend(lowered.iter().map(|(name, node)| FileAction::Copy {
        source: *node,
        src: TEKTON_DIR.to_string(),
        dest: format!("{}/{}", AGGREGATE_DIR, name),
        contents_only: true,
    }));

    let scratch = graph.scratch();
    Ok(graph.file(
        Some(scratch),
        actions,
        format!("[tekton] {}: collecting task results", pipeline.name),
    ))
}
