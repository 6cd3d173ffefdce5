// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Structural validation of substituted definitions

use std::collections::HashSet;

use crate::errors::{TekgraphError, TekgraphResult};
use crate::resources::{PipelineSpec, Step, TaskSpec, WorkspaceBinding};
use crate::substitution::{find_unresolved, BoundWorkspace};

/// Placeholder families that must be gone after substitution
pub const UNRESOLVED_PREFIXES: &[&str] = &["params", "workspaces.", "results."];

/// Every substitutable string of a step, with a field label
pub fn step_fields(step: &Step) -> Vec<(String, &str)> {
    let mut fields = vec![("image".to_string(), step.image.as_str())];
    fields.extend(
        step.command
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("command[{}]", i), c.as_str())),
    );
    fields.extend(
        step.args
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("args[{}]", i), a.as_str())),
    );
    fields.push(("script".to_string(), step.script.as_str()));
    fields.push(("workingDir".to_string(), step.working_dir.as_str()));
    fields.extend(
        step.env
            .iter()
            .map(|e| (format!("env {}", e.name), e.value.as_str())),
    );
    fields
}

fn unique<'a>(
    location: &str,
    what: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> TekgraphResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(TekgraphError::invalid(location, format!("{} name is required", what)));
        }
        if !seen.insert(name) {
            return Err(TekgraphError::invalid(
                location,
                format!("duplicate {} name '{}'", what, name),
            ));
        }
    }
    Ok(())
}

/// Check a substituted task against its bound workspaces
pub fn check_task(owner: &str, spec: &TaskSpec, workspaces: &[BoundWorkspace]) -> TekgraphResult<()> {
    if spec.steps.is_empty() {
        return Err(TekgraphError::invalid(owner, "at least one step is required"));
    }
    unique(owner, "step", spec.steps.iter().map(|s| s.name.as_str()))?;
    unique(owner, "param", spec.params.iter().map(|p| p.name.as_str()))?;
    unique(owner, "workspace", spec.workspaces.iter().map(|w| w.name.as_str()))?;
    unique(owner, "result", spec.results.iter().map(|r| r.name.as_str()))?;
    unique(owner, "workspace binding", workspaces.iter().map(|w| w.name.as_str()))?;

    for (i, step) in spec.merged_steps().iter().enumerate() {
        let location = format!("{}, step {} ('{}')", owner, i, step.name);
        if step.image.is_empty() {
            return Err(TekgraphError::invalid(location, "image is required"));
        }
        if !step.script.is_empty() && !step.command.is_empty() {
            return Err(TekgraphError::invalid(location, "script cannot be combined with command"));
        }
        for (field, text) in step_fields(step) {
            if let Some(placeholder) = find_unresolved(text, UNRESOLVED_PREFIXES) {
                return Err(TekgraphError::invalid(
                    location,
                    format!("unresolved placeholder {} in {}", placeholder, field),
                ));
            }
        }
    }

    for decl in &spec.workspaces {
        if let Some(placeholder) = find_unresolved(&decl.mount_path, UNRESOLVED_PREFIXES) {
            return Err(TekgraphError::invalid(
                owner,
                format!("unresolved placeholder {} in workspace '{}' mountPath", placeholder, decl.name),
            ));
        }
        let bound = workspaces.iter().any(|w| w.name == decl.name);
        if !bound && !decl.optional {
            return Err(TekgraphError::invalid(
                owner,
                format!("workspace '{}' is not bound", decl.name),
            ));
        }
    }

    for ws in workspaces {
        if !spec.workspaces.iter().any(|d| d.name == ws.name) {
            return Err(TekgraphError::invalid(
                owner,
                format!("workspace binding '{}' does not match a declared workspace", ws.name),
            ));
        }
        ws.binding.source().map_err(|e| e.within(owner))?;
    }

    Ok(())
}

/// Check a pipeline and the run's workspace bindings
pub fn check_pipeline(owner: &str, spec: &PipelineSpec, bindings: &[WorkspaceBinding]) -> TekgraphResult<()> {
    if spec.tasks.is_empty() {
        return Err(TekgraphError::invalid(owner, "at least one task is required"));
    }
    unique(owner, "task", spec.tasks.iter().map(|t| t.name.as_str()))?;
    unique(owner, "param", spec.params.iter().map(|p| p.name.as_str()))?;
    unique(owner, "workspace", spec.workspaces.iter().map(|w| w.name.as_str()))?;
    unique(owner, "workspace binding", bindings.iter().map(|b| b.name.as_str()))?;

    let declared = |name: &str| spec.workspaces.iter().any(|w| w.name == name);

    for task in &spec.tasks {
        let location = format!("{}, task '{}'", owner, task.name);
        for after in &task.run_after {
            if spec.get_task(after).is_none() {
                return Err(TekgraphError::invalid(
                    location,
                    format!("runAfter names unknown task '{}'", after),
                ));
            }
        }
        for ws in &task.workspaces {
            if !declared(ws.pipeline_workspace()) {
                return Err(TekgraphError::invalid(
                    location,
                    format!("workspace '{}' is not declared by the pipeline", ws.pipeline_workspace()),
                ));
            }
        }
    }

    for binding in bindings {
        if !declared(&binding.name) {
            return Err(TekgraphError::invalid(
                owner,
                format!("workspace binding '{}' does not match a declared workspace", binding.name),
            ));
        }
        binding.source().map_err(|e| e.within(owner))?;
    }

    for ws in &spec.workspaces {
        if !ws.optional && !bindings.iter().any(|b| b.name == ws.name) {
            return Err(TekgraphError::invalid(
                owner,
                format!("workspace '{}' is not bound", ws.name),
            ));
        }
    }

    Ok(())
}
