// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Resource definition structures
//!
//! Serde models for the `tekton.dev/v1beta1` kinds and the two core kinds
//! (Secret, ConfigMap) we read. Only the fields lowering understands are
//! modelled; everything else is kept in a flattened `extra` map so the
//! feature validator can decide whether to ignore or reject it.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{TekgraphError, TekgraphResult};

/// Fields a struct does not model, keyed by their YAML name
pub type Extra = BTreeMap<String, serde_yaml::Value>;

/// Kubernetes object metadata (the parts we use)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub generate_name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Name used for a run: explicit name, or `generateName` + "generated"
    pub fn run_name(&self) -> Option<String> {
        if !self.name.is_empty() {
            Some(self.name.clone())
        } else if !self.generate_name.is_empty() {
            Some(format!("{}generated", self.generate_name))
        } else {
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

/// A named Task definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TaskSpec,
}

/// Task specification: steps plus the interface they expose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default)]
    pub description: Option<String>,

    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Declared parameters
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    /// Declared workspaces
    #[serde(default)]
    pub workspaces: Vec<WorkspaceDeclaration>,

    /// Declared results
    #[serde(default)]
    pub results: Vec<TaskResult>,

    /// Defaults merged into every step
    #[serde(default)]
    pub step_template: Option<Step>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl TaskSpec {
    /// Steps with the step template merged in
    pub fn merged_steps(&self) -> Vec<Step> {
        match &self.step_template {
            Some(template) => self.steps.iter().map(|s| s.merged_with(template)).collect(),
            None => self.steps.clone(),
        }
    }
}

/// A single containerized step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Inline script body, mutually exclusive with `command`
    #[serde(default)]
    pub script: String,

    #[serde(default)]
    pub working_dir: String,

    #[serde(default)]
    pub env: Vec<EnvVar>,

    #[serde(default)]
    pub security_context: Option<SecurityContext>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Step {
    /// Numeric user the step runs as, if any
    pub fn run_as_user(&self) -> Option<i64> {
        self.security_context.as_ref().and_then(|sc| sc.run_as_user)
    }

    /// Merge step template defaults into this step.
    ///
    /// Scalars and lists set on the step win; env vars merge by name with
    /// the step's value overriding the template's.
    pub fn merged_with(&self, template: &Step) -> Step {
        let pick = |own: &String, dflt: &String| {
            if own.is_empty() {
                dflt.clone()
            } else {
                own.clone()
            }
        };
        let pick_list = |own: &Vec<String>, dflt: &Vec<String>| {
            if own.is_empty() {
                dflt.clone()
            } else {
                own.clone()
            }
        };

        let mut env: Vec<EnvVar> = template.env.clone();
        for var in &self.env {
            match env.iter_mut().find(|e| e.name == var.name) {
                Some(existing) => *existing = var.clone(),
                None => env.push(var.clone()),
            }
        }

        let security_context = match (&self.security_context, &template.security_context) {
            (Some(own), Some(dflt)) => {
                let mut extra = dflt.extra.clone();
                extra.extend(own.extra.clone());
                Some(SecurityContext {
                    run_as_user: own.run_as_user.or(dflt.run_as_user),
                    extra,
                })
            }
            (Some(own), None) => Some(own.clone()),
            (None, dflt) => dflt.clone(),
        };

        let mut extra = template.extra.clone();
        extra.extend(self.extra.clone());

        Step {
            name: self.name.clone(),
            image: pick(&self.image, &template.image),
            command: pick_list(&self.command, &template.command),
            args: pick_list(&self.args, &template.args),
            script: self.script.clone(),
            working_dir: pick(&self.working_dir, &template.working_dir),
            env,
            security_context,
            extra,
        }
    }
}

/// Environment variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,

    #[serde(default)]
    pub value: String,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    #[serde(default)]
    pub run_as_user: Option<i64>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Array,
    Object,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// A parameter value: string, array of strings or string map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Array(Vec<String>),
    Object(BTreeMap<String, String>),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::String(_) => ParamType::String,
            Self::Array(_) => ParamType::Array,
            Self::Object(_) => ParamType::Object,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default, rename = "type")]
    pub param_type: Option<ParamType>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub default: Option<ParamValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Bound parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

/// Workspace declared by a Task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDeclaration {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Where the workspace is mounted; `/workspace/<name>` when empty
    #[serde(default)]
    pub mount_path: String,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub optional: bool,

    #[serde(flatten)]
    pub extra: Extra,
}

impl WorkspaceDeclaration {
    pub fn path(&self) -> String {
        if self.mount_path.is_empty() {
            format!("/workspace/{}", self.name)
        } else {
            self.mount_path.clone()
        }
    }
}

/// Result types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    String,
    Array,
    Object,
}

/// Declared task result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,

    #[serde(default, rename = "type")]
    pub result_type: Option<ResultType>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Reference to a Task by name, optionally inside a bundle image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    pub bundle: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskRun
// ─────────────────────────────────────────────────────────────────────────────

/// A request to run one Task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TaskRunSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    #[serde(default)]
    pub params: Vec<Param>,

    #[serde(default)]
    pub task_ref: Option<TaskRef>,

    #[serde(default)]
    pub task_spec: Option<TaskSpec>,

    #[serde(default)]
    pub workspaces: Vec<WorkspaceBinding>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Concrete volume bound to a workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,

    #[serde(default)]
    pub sub_path: String,

    #[serde(default)]
    pub persistent_volume_claim: Option<ClaimSource>,

    #[serde(default)]
    pub volume_claim_template: Option<serde_yaml::Value>,

    #[serde(default)]
    pub empty_dir: Option<serde_yaml::Value>,

    #[serde(default)]
    pub config_map: Option<ConfigMapSource>,

    #[serde(default)]
    pub secret: Option<SecretSource>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// The one volume source a binding selects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindingSource<'a> {
    Claim(&'a ClaimSource),
    ClaimTemplate,
    EmptyDir,
    ConfigMap(&'a ConfigMapSource),
    Secret(&'a SecretSource),
}

impl WorkspaceBinding {
    /// The binding's volume source; exactly one must be set
    pub fn source(&self) -> TekgraphResult<BindingSource<'_>> {
        let mut found = Vec::new();
        if let Some(claim) = &self.persistent_volume_claim {
            found.push(BindingSource::Claim(claim));
        }
        if self.volume_claim_template.is_some() {
            found.push(BindingSource::ClaimTemplate);
        }
        if self.empty_dir.is_some() {
            found.push(BindingSource::EmptyDir);
        }
        if let Some(cm) = &self.config_map {
            found.push(BindingSource::ConfigMap(cm));
        }
        if let Some(secret) = &self.secret {
            found.push(BindingSource::Secret(secret));
        }

        match found.len() {
            1 => Ok(found[0]),
            0 if !self.extra.is_empty() => Err(TekgraphError::unsupported(
                format!("workspace binding '{}'", self.name),
                self.extra.keys().cloned().collect::<Vec<_>>().join(", "),
            )),
            0 => Err(TekgraphError::invalid(
                format!("workspace binding '{}'", self.name),
                "no volume source set",
            )),
            _ => Err(TekgraphError::invalid(
                format!("workspace binding '{}'", self.name),
                "more than one volume source set",
            )),
        }
    }

    /// Whether tasks bound to this volume see each other's writes
    pub fn is_persistent(&self) -> bool {
        matches!(
            self.source(),
            Ok(BindingSource::Claim(_) | BindingSource::ClaimTemplate)
        )
    }

    /// Claim name, when bound to a persistent volume claim
    pub fn claim_name(&self) -> &str {
        self.persistent_volume_claim
            .as_ref()
            .map(|c| c.claim_name.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSource {
    pub claim_name: String,

    #[serde(default)]
    pub read_only: bool,
}

/// Key selection for projecting a Secret or ConfigMap into files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToPath {
    pub key: String,
    pub path: String,

    #[serde(default)]
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapSource {
    pub name: String,

    #[serde(default)]
    pub items: Vec<KeyToPath>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,

    #[serde(default)]
    pub items: Vec<KeyToPath>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// A named Pipeline definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PipelineSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub description: Option<String>,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: Vec<PipelineTask>,

    #[serde(default)]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub workspaces: Vec<PipelineWorkspaceDeclaration>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl PipelineSpec {
    pub fn get_task(&self, name: &str) -> Option<&PipelineTask> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineWorkspaceDeclaration {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub optional: bool,

    #[serde(flatten)]
    pub extra: Extra,
}

/// One task slot in a Pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,

    #[serde(default)]
    pub task_ref: Option<TaskRef>,

    #[serde(default)]
    pub task_spec: Option<EmbeddedTask>,

    #[serde(default)]
    pub params: Vec<Param>,

    /// Task workspace name -> pipeline workspace name
    #[serde(default)]
    pub workspaces: Vec<WorkspacePipelineTaskBinding>,

    /// Tasks that must complete before this one starts
    #[serde(default)]
    pub run_after: Vec<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Task spec embedded in a pipeline task, possibly typed as a custom task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedTask {
    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub metadata: Option<serde_yaml::Value>,

    #[serde(flatten)]
    pub spec: TaskSpec,
}

impl EmbeddedTask {
    /// Whether this is a plain Tekton task rather than a custom task
    pub fn is_tekton_task(&self) -> bool {
        match (self.api_version.as_deref(), self.kind.as_deref()) {
            (None | Some(""), None | Some("")) => true,
            (Some("tekton.dev/v1beta1"), Some("Task")) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePipelineTaskBinding {
    /// Workspace name as declared by the task
    pub name: String,

    /// Pipeline workspace bound to it; defaults to `name`
    #[serde(default)]
    pub workspace: String,

    #[serde(default)]
    pub sub_path: String,
}

impl WorkspacePipelineTaskBinding {
    pub fn pipeline_workspace(&self) -> &str {
        if self.workspace.is_empty() {
            &self.name
        } else {
            &self.workspace
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRef {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub bundle: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// PipelineRun
// ─────────────────────────────────────────────────────────────────────────────

/// A request to run one Pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PipelineRunSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default)]
    pub params: Vec<Param>,

    #[serde(default)]
    pub pipeline_ref: Option<PipelineRef>,

    #[serde(default)]
    pub pipeline_spec: Option<PipelineSpec>,

    #[serde(default)]
    pub workspaces: Vec<WorkspaceBinding>,

    #[serde(flatten)]
    pub extra: Extra,
}

// ─────────────────────────────────────────────────────────────────────────────
// Secret / ConfigMap
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Base64-encoded values
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Plain-text values, overriding `data`
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
}

impl Secret {
    /// Decoded key -> bytes map
    pub fn entries(&self) -> TekgraphResult<BTreeMap<String, Vec<u8>>> {
        let mut out = decode_base64_map(&self.data, "Secret", &self.metadata.name)?;
        for (k, v) in &self.string_data {
            out.insert(k.clone(), v.clone().into_bytes());
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Base64-encoded binary values
    #[serde(default)]
    pub binary_data: BTreeMap<String, String>,
}

impl ConfigMap {
    /// Key -> bytes map across `data` and `binaryData`
    pub fn entries(&self) -> TekgraphResult<BTreeMap<String, Vec<u8>>> {
        let mut out = decode_base64_map(&self.binary_data, "ConfigMap", &self.metadata.name)?;
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone().into_bytes());
        }
        Ok(out)
    }
}

fn decode_base64_map(
    map: &BTreeMap<String, String>,
    kind: &str,
    name: &str,
) -> TekgraphResult<BTreeMap<String, Vec<u8>>> {
    let engine = base64::engine::general_purpose::STANDARD;
    map.iter()
        .map(|(k, v)| {
            engine
                .decode(v.trim())
                .map(|bytes| (k.clone(), bytes))
                .map_err(|e| {
                    TekgraphError::decode(format!("{} '{}' key '{}'", kind, name, k), e.to_string())
                })
        })
        .collect()
}
