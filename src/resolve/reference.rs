// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Run request targets
//!
//! A run request or pipeline task names its definition in one of three
//! mutually exclusive ways; [`TargetRef`] makes that explicit before any
//! lookup happens.

use super::bundle::BundleCoordinate;
use crate::errors::{TekgraphError, TekgraphResult};
use crate::resources::{PipelineRef, ResourceBundle, Task, TaskRef, Pipeline};

/// Canonical name of an embedded definition
pub const EMBEDDED_NAME: &str = "embedded";

const TASK_KINDS: &[&str] = &["Task", "ClusterTask"];

/// Where a definition comes from
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRef<S> {
    /// Spec carried inline by the referrer
    Embedded(S),
    /// Definition present in the loaded context
    Named(String),
    /// Definition stored in a bundle image
    Bundle(BundleCoordinate),
}

impl<S> TargetRef<S> {
    /// Name downstream stages know the definition by
    pub fn canonical_name(&self) -> &str {
        match self {
            Self::Embedded(_) => EMBEDDED_NAME,
            Self::Named(name) => name,
            Self::Bundle(coord) => &coord.name,
        }
    }

    pub fn bundle(&self) -> Option<&BundleCoordinate> {
        match self {
            Self::Bundle(coord) => Some(coord),
            _ => None,
        }
    }
}

/// Classify a task target
pub fn task_target<S>(
    location: &str,
    task_ref: Option<&TaskRef>,
    embedded: Option<S>,
    bundles_enabled: bool,
) -> TekgraphResult<TargetRef<S>> {
    if let Some(r) = task_ref {
        let custom_api = r
            .api_version
            .as_deref()
            .is_some_and(|v| !v.is_empty() && !v.starts_with("tekton.dev/"));
        let kind = r.kind.as_deref().unwrap_or("Task");
        if custom_api || !TASK_KINDS.contains(&kind) {
            return Err(TekgraphError::unsupported(
                location,
                format!("custom task kind '{}'", kind),
            ));
        }
    }

    classify(
        location,
        "taskRef",
        task_ref.map(|r| (r.name.as_str(), r.bundle.as_deref())),
        embedded,
        bundles_enabled,
    )
}

/// Classify a pipeline target
pub fn pipeline_target<S>(
    location: &str,
    pipeline_ref: Option<&PipelineRef>,
    embedded: Option<S>,
    bundles_enabled: bool,
) -> TekgraphResult<TargetRef<S>> {
    classify(
        location,
        "pipelineRef",
        pipeline_ref.map(|r| (r.name.as_str(), r.bundle.as_deref())),
        embedded,
        bundles_enabled,
    )
}

fn classify<S>(
    location: &str,
    field: &str,
    reference: Option<(&str, Option<&str>)>,
    embedded: Option<S>,
    bundles_enabled: bool,
) -> TekgraphResult<TargetRef<S>> {
    let spec_field = field.replace("Ref", "Spec");
    match (reference, embedded) {
        (Some(_), Some(_)) => Err(TekgraphError::invalid(
            location,
            format!("{} and {} are mutually exclusive", field, spec_field),
        )),
        (None, None) => Err(TekgraphError::invalid(
            location,
            format!("one of {} or {} is required", field, spec_field),
        )),
        (None, Some(spec)) => Ok(TargetRef::Embedded(spec)),
        (Some((name, bundle)), None) => {
            if name.is_empty() {
                return Err(TekgraphError::invalid(location, format!("{}.name is required", field)));
            }
            match bundle.filter(|b| !b.is_empty()) {
                Some(_) if !bundles_enabled => Err(TekgraphError::unsupported(
                    location,
                    format!("{}.bundle (enable-tekton-oci-bundles is off)", field),
                )),
                Some(image) => Ok(TargetRef::Bundle(BundleCoordinate::new(image, name))),
                None => Ok(TargetRef::Named(name.to_string())),
            }
        }
    }
}

/// Look up a Task in the loaded context
pub fn lookup_task<'a>(resources: &'a ResourceBundle, name: &str) -> TekgraphResult<&'a Task> {
    resources
        .tasks
        .get(name)
        .ok_or_else(|| TekgraphError::ReferenceNotFound {
            kind: "Task".into(),
            name: name.to_string(),
        })
}

/// Look up a Pipeline in the loaded context
pub fn lookup_pipeline<'a>(resources: &'a ResourceBundle, name: &str) -> TekgraphResult<&'a Pipeline> {
    resources
        .pipelines
        .get(name)
        .ok_or_else(|| TekgraphError::ReferenceNotFound {
            kind: "Pipeline".into(),
            name: name.to_string(),
        })
}
