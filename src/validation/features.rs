// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Feature allow-list
//!
//! Every field the resource models is supported. Anything else ends up in
//! a flattened `extra` map; those keys are either on a per-type ignore
//! list (they change nothing about what gets built) or rejected.

use tracing::debug;

use crate::config::{ApiFields, FeatureFlags};
use crate::errors::{TekgraphError, TekgraphResult};
use crate::resources::{
    Extra, ParamSpec, PipelineRun, PipelineSpec, ResultType, Step, TaskRun, TaskSpec,
};

const STEP_IGNORED: &[&str] = &[
    "ports",
    "readinessProbe",
    "livenessProbe",
    "startupProbe",
    "lifecycle",
    "terminationMessagePath",
    "terminationMessagePolicy",
    "resources",
    "computeResources",
    "imagePullPolicy",
    "stdin",
    "stdinOnce",
    "tty",
];

const TASK_IGNORED: &[&str] = &["displayName"];

/// JSON schema for object params and results, informational only
const SCHEMA_IGNORED: &[&str] = &["properties"];

const TASK_RUN_IGNORED: &[&str] = &[
    "serviceAccountName",
    "status",
    "statusMessage",
    "retries",
];

const PIPELINE_IGNORED: &[&str] = &["displayName"];

const PIPELINE_TASK_IGNORED: &[&str] = &["retries", "displayName", "description"];

const PIPELINE_RUN_IGNORED: &[&str] = &["serviceAccountName", "serviceAccountNames", "status"];

/// Rejects definitions that use fields lowering cannot honor
#[derive(Debug, Clone)]
pub struct FeatureValidator<'a> {
    flags: &'a FeatureFlags,
}

impl<'a> FeatureValidator<'a> {
    pub fn new(flags: &'a FeatureFlags) -> Self {
        Self { flags }
    }

    /// Check a task definition
    pub fn check_task(&self, owner: &str, spec: &TaskSpec) -> TekgraphResult<()> {
        check_extra(owner, &spec.extra, TASK_IGNORED)?;
        check_params(owner, &spec.params)?;
        for ws in &spec.workspaces {
            check_extra(&format!("{}, workspace '{}'", owner, ws.name), &ws.extra, &[])?;
        }

        if let Some(template) = &spec.step_template {
            check_step(&format!("{}, stepTemplate", owner), template)?;
        }
        for (i, step) in spec.steps.iter().enumerate() {
            check_step(&format!("{}, step {}", owner, i), step)?;
        }

        for result in &spec.results {
            check_extra(
                &format!("{}, result '{}'", owner, result.name),
                &result.extra,
                SCHEMA_IGNORED,
            )?;
            let kind = match result.result_type.unwrap_or(ResultType::String) {
                ResultType::String => continue,
                ResultType::Array => "array",
                ResultType::Object => "object",
            };
            if self.flags.enable_api_fields < ApiFields::Alpha {
                return Err(TekgraphError::unsupported(
                    owner,
                    format!(
                        "result '{}' of type {} (requires enable-api-fields=alpha)",
                        result.name, kind
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Check the fields of a TaskRun itself
    pub fn check_task_run(&self, run: &TaskRun) -> TekgraphResult<()> {
        let location = format!("TaskRun '{}'", run.metadata.name);
        check_extra(&location, &run.spec.extra, TASK_RUN_IGNORED)
    }

    /// Check a pipeline definition (its tasks are checked separately)
    pub fn check_pipeline(&self, owner: &str, spec: &PipelineSpec) -> TekgraphResult<()> {
        check_extra(owner, &spec.extra, PIPELINE_IGNORED)?;
        check_params(owner, &spec.params)?;
        for ws in &spec.workspaces {
            check_extra(&format!("{}, workspace '{}'", owner, ws.name), &ws.extra, &[])?;
        }
        for task in &spec.tasks {
            check_extra(
                &format!("{}, task '{}'", owner, task.name),
                &task.extra,
                PIPELINE_TASK_IGNORED,
            )?;
        }
        Ok(())
    }

    /// Check the fields of a PipelineRun itself
    pub fn check_pipeline_run(&self, run: &PipelineRun) -> TekgraphResult<()> {
        let location = format!("PipelineRun '{}'", run.metadata.name);
        check_extra(&location, &run.spec.extra, PIPELINE_RUN_IGNORED)
    }
}

fn check_params(owner: &str, params: &[ParamSpec]) -> TekgraphResult<()> {
    for param in params {
        check_extra(
            &format!("{}, param '{}'", owner, param.name),
            &param.extra,
            SCHEMA_IGNORED,
        )?;
    }
    Ok(())
}

fn check_step(location: &str, step: &Step) -> TekgraphResult<()> {
    check_extra(location, &step.extra, STEP_IGNORED)?;

    if let Some(sc) = &step.security_context {
        for key in sc.extra.keys() {
            debug!("{}: ignoring securityContext.{}", location, key);
        }
    }
    for var in &step.env {
        if var.extra.contains_key("valueFrom") {
            return Err(TekgraphError::unsupported(
                location,
                format!("env '{}' valueFrom", var.name),
            ));
        }
        check_extra(&format!("{}, env '{}'", location, var.name), &var.extra, &[])?;
    }
    Ok(())
}

fn check_extra(location: &str, extra: &Extra, ignored: &[&str]) -> TekgraphResult<()> {
    for (key, value) in extra {
        if ignored.contains(&key.as_str()) {
            debug!("{}: ignoring {}", location, key);
            continue;
        }
        if is_empty_value(value) {
            continue;
        }
        return Err(TekgraphError::unsupported(location, key.clone()));
    }
    Ok(())
}

/// `null`, `[]`, `{}` and `""` count as not populated
fn is_empty_value(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Null => true,
        serde_yaml::Value::Sequence(s) => s.is_empty(),
        serde_yaml::Value::Mapping(m) => m.is_empty(),
        serde_yaml::Value::String(s) => s.is_empty(),
        _ => false,
    }
}
