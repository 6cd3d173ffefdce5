// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Defaults applied to resolved definitions

use crate::resources::{ParamSpec, ParamType, PipelineSpec, ResultType, TaskSpec};

const DEFAULT_TASK_KIND: &str = "Task";

/// Fill in step names, param/result types and workspace mount paths
pub fn apply_task_defaults(spec: &mut TaskSpec) {
    apply_param_defaults(&mut spec.params);

    for (i, step) in spec.steps.iter_mut().enumerate() {
        if step.name.is_empty() {
            step.name = format!("unnamed-{}", i);
        }
    }

    for result in &mut spec.results {
        result.result_type.get_or_insert(ResultType::String);
    }

    for ws in &mut spec.workspaces {
        if ws.mount_path.is_empty() {
            ws.mount_path = ws.path();
        }
    }
}

/// Fill in implicit param types and task reference kinds
pub fn apply_pipeline_defaults(spec: &mut PipelineSpec) {
    apply_param_defaults(&mut spec.params);

    for task in &mut spec.tasks {
        if let Some(task_ref) = &mut task.task_ref {
            task_ref
                .kind
                .get_or_insert_with(|| DEFAULT_TASK_KIND.to_string());
        }
    }
}

fn apply_param_defaults(params: &mut [ParamSpec]) {
    for param in params {
        if param.param_type.is_none() {
            let inferred = param
                .default
                .as_ref()
                .map(|d| d.param_type())
                .unwrap_or(ParamType::String);
            param.param_type = Some(inferred);
        }
    }
}
