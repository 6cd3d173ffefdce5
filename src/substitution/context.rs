// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! `$(context.*)` values

use super::placeholder::Replacements;
use crate::resources::ObjectMeta;

const DEFAULT_NAMESPACE: &str = "default";

/// Name, namespace and uid of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl RunIdentity {
    pub fn new(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        let namespace = namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string();
        let uid = derive_uid(kind, &namespace, name);
        Self {
            name: name.to_string(),
            namespace,
            uid,
        }
    }

    pub fn from_meta(kind: &str, name: &str, meta: &ObjectMeta) -> Self {
        Self::new(kind, name, meta.namespace.as_deref())
    }
}

/// Stable UUID-shaped id for a run
fn derive_uid(kind: &str, namespace: &str, name: &str) -> String {
    let hash = blake3::hash(format!("{}/{}/{}", kind, namespace, name).as_bytes()).to_hex();
    let h = hash.as_str();
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

/// Identifiers visible to one task's placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_run: RunIdentity,
    /// Canonical task name
    pub task_name: String,
    pub pipeline: Option<PipelineContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    pub pipeline_run: RunIdentity,
    /// Canonical pipeline name
    pub pipeline_name: String,
}

impl PipelineContext {
    pub fn replacements(&self) -> Replacements {
        let mut r = Replacements::new();
        r.insert("context.pipelineRun.name", &self.pipeline_run.name);
        r.insert("context.pipelineRun.namespace", &self.pipeline_run.namespace);
        r.insert("context.pipelineRun.uid", &self.pipeline_run.uid);
        r.insert("context.pipeline.name", &self.pipeline_name);
        r.insert("context.pipelineTask.retries", "0");
        r
    }
}

impl TaskContext {
    pub fn replacements(&self) -> Replacements {
        let mut r = match &self.pipeline {
            Some(p) => p.replacements(),
            None => Replacements::new(),
        };
        r.insert("context.taskRun.name", &self.task_run.name);
        r.insert("context.taskRun.namespace", &self.task_run.namespace);
        r.insert("context.taskRun.uid", &self.task_run.uid);
        r.insert("context.task.name", &self.task_name);
        r.insert("context.task.retry-count", "0");
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_defaults_and_uid() {
        let a = RunIdentity::new("TaskRun", "run", None);
        let b = RunIdentity::new("TaskRun", "run", Some("default"));
        assert_eq!(a.namespace, "default");
        assert_eq!(a, b);
        assert_eq!(a.uid.len(), 36);
        assert_ne!(a.uid, RunIdentity::new("TaskRun", "other", None).uid);
    }

    #[test]
    fn test_task_context_replacements() {
        let ctx = TaskContext {
            task_run: RunIdentity::new("TaskRun", "pr-build", Some("ci")),
            task_name: "build".into(),
            pipeline: Some(PipelineContext {
                pipeline_run: RunIdentity::new("PipelineRun", "pr", Some("ci")),
                pipeline_name: "embedded".into(),
            }),
        };
        let r = ctx.replacements();
        assert_eq!(
            r.apply("$(context.taskRun.name)/$(context.task.name)/$(context.pipelineRun.namespace)"),
            "pr-build/build/ci"
        );
        assert_eq!(r.apply("$(context.pipeline.name)"), "embedded");
    }
}
