// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Reference resolution
//!
//! Turns the bundle's run request into a [`ResolvedRun`]: the run plus
//! the concrete Task or Pipeline it targets, with every pipeline task's
//! Task resolved as well. Bundle references at the same level are fetched
//! in one concurrent batch.

mod bundle;
mod defaults;
mod reference;

pub use bundle::{BundleCoordinate, BundleResolver};
pub use defaults::{apply_pipeline_defaults, apply_task_defaults};
pub use reference::{lookup_pipeline, lookup_task, pipeline_target, task_target, TargetRef, EMBEDDED_NAME};

use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{TekgraphError, TekgraphResult};
use crate::resources::{
    Document, PipelineRun, PipelineSpec, ResourceBundle, RunRequest, TaskRun, TaskSpec,
};

/// A Task definition with its canonical name
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub name: String,
    pub spec: TaskSpec,
}

/// A Pipeline definition with the Task of each pipeline task resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPipeline {
    pub name: String,
    pub spec: PipelineSpec,
    /// One entry per `spec.tasks`, same order
    pub tasks: Vec<ResolvedTask>,
}

impl ResolvedPipeline {
    /// Resolved task for the pipeline task named `name`
    pub fn task(&self, name: &str) -> Option<&ResolvedTask> {
        self.spec
            .tasks
            .iter()
            .position(|t| t.name == name)
            .map(|i| &self.tasks[i])
    }
}

/// The run request together with what it targets
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRun {
    Task { run: TaskRun, task: ResolvedTask },
    Pipeline { run: PipelineRun, pipeline: ResolvedPipeline },
}

impl ResolvedRun {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Task { .. } => "TaskRun",
            Self::Pipeline { .. } => "PipelineRun",
        }
    }
}

/// Resolves a bundle's run request against its context
pub struct Resolver<'a> {
    resources: &'a ResourceBundle,
    bundles: &'a BundleResolver,
}

impl<'a> Resolver<'a> {
    pub fn new(resources: &'a ResourceBundle, bundles: &'a BundleResolver) -> Self {
        Self { resources, bundles }
    }

    pub async fn resolve(&self, cancel: &CancellationToken) -> TekgraphResult<ResolvedRun> {
        match &self.resources.run {
            RunRequest::Task(run) => {
                let location = format!("TaskRun '{}'", run.metadata.name);
                let target = task_target(
                    &location,
                    run.spec.task_ref.as_ref(),
                    run.spec.task_spec.clone(),
                    self.bundles.enabled(),
                )?;
                let mut tasks = self.resolve_tasks(vec![target], cancel).await?;
                let task = tasks.remove(0);
                info!("Resolved TaskRun target '{}'", task.name);
                Ok(ResolvedRun::Task {
                    run: run.clone(),
                    task,
                })
            }
            RunRequest::Pipeline(run) => {
                let pipeline = self.resolve_pipeline(run, cancel).await?;
                info!(
                    "Resolved PipelineRun target '{}' with {} task(s)",
                    pipeline.name,
                    pipeline.tasks.len()
                );
                Ok(ResolvedRun::Pipeline {
                    run: run.clone(),
                    pipeline,
                })
            }
        }
    }

    async fn resolve_pipeline(
        &self,
        run: &PipelineRun,
        cancel: &CancellationToken,
    ) -> TekgraphResult<ResolvedPipeline> {
        let location = format!("PipelineRun '{}'", run.metadata.name);
        let target = pipeline_target(
            &location,
            run.spec.pipeline_ref.as_ref(),
            run.spec.pipeline_spec.clone(),
            self.bundles.enabled(),
        )?;
        let name = target.canonical_name().to_string();

        let mut spec = match target {
            TargetRef::Embedded(spec) => spec,
            TargetRef::Named(name) => lookup_pipeline(self.resources, &name)?.spec.clone(),
            TargetRef::Bundle(coord) => {
                let mut fetched = self
                    .bundles
                    .fetch_all(BTreeSet::from([coord.clone()]), "Pipeline", cancel)
                    .await?;
                match fetched.remove(&coord) {
                    Some(Document::Pipeline(p)) => p.spec,
                    _ => return Err(TekgraphError::bundle(&coord.image, &coord.name, "not a Pipeline")),
                }
            }
        };
        apply_pipeline_defaults(&mut spec);

        let mut targets = Vec::with_capacity(spec.tasks.len());
        for pt in &spec.tasks {
            let location = format!("pipeline task '{}'", pt.name);
            if let Some(embedded) = &pt.task_spec {
                if !embedded.is_tekton_task() {
                    return Err(TekgraphError::unsupported(
                        location,
                        format!(
                            "custom task kind '{}'",
                            embedded.kind.as_deref().unwrap_or_default()
                        ),
                    ));
                }
            }
            targets.push(task_target(
                &location,
                pt.task_ref.as_ref(),
                pt.task_spec.as_ref().map(|e| e.spec.clone()),
                self.bundles.enabled(),
            )?);
        }

        let tasks = self.resolve_tasks(targets, cancel).await?;
        Ok(ResolvedPipeline { name, spec, tasks })
    }

    /// Resolve task targets, fetching all bundle references in one batch
    async fn resolve_tasks(
        &self,
        targets: Vec<TargetRef<TaskSpec>>,
        cancel: &CancellationToken,
    ) -> TekgraphResult<Vec<ResolvedTask>> {
        let coords: BTreeSet<_> = targets.iter().filter_map(|t| t.bundle().cloned()).collect();
        let fetched = self.bundles.fetch_all(coords, "Task", cancel).await?;

        targets
            .into_iter()
            .map(|target| {
                let name = target.canonical_name().to_string();
                let mut spec = match target {
                    TargetRef::Embedded(spec) => spec,
                    TargetRef::Named(name) => lookup_task(self.resources, &name)?.spec.clone(),
                    TargetRef::Bundle(coord) => match fetched.get(&coord) {
                        Some(Document::Task(task)) => task.spec.clone(),
                        _ => return Err(TekgraphError::bundle(&coord.image, &coord.name, "not a Task")),
                    },
                };
                apply_task_defaults(&mut spec);
                debug!("Resolved task '{}' with {} step(s)", name, spec.steps.len());
                Ok(ResolvedTask { name, spec })
            })
            .collect()
    }
}
