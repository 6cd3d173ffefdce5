// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Resource loading
//!
//! Splits multi-document YAML into typed documents through an immutable
//! [`KindRegistry`] and gathers them into a [`ResourceBundle`] holding
//! exactly one run request.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::definition::{ConfigMap, Pipeline, PipelineRun, Secret, Task, TaskRun};
use crate::errors::{TekgraphError, TekgraphResult};

/// A decoded document of a recognized kind
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Task(Task),
    TaskRun(TaskRun),
    Pipeline(Pipeline),
    PipelineRun(PipelineRun),
    Secret(Secret),
    ConfigMap(ConfigMap),
}

impl Document {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Task(_) => "Task",
            Self::TaskRun(_) => "TaskRun",
            Self::Pipeline(_) => "Pipeline",
            Self::PipelineRun(_) => "PipelineRun",
            Self::Secret(_) => "Secret",
            Self::ConfigMap(_) => "ConfigMap",
        }
    }
}

/// Decoder for one registered kind
pub type DecodeFn = fn(serde_yaml::Value) -> Result<Document, serde_yaml::Error>;

/// One row of the registry
#[derive(Clone, Copy)]
pub struct KindEntry {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub decode: DecodeFn,
}

/// Table mapping `(apiVersion, kind)` to a decoder.
///
/// Built once and never mutated; a loader owns its registry.
#[derive(Clone)]
pub struct KindRegistry {
    entries: Vec<KindEntry>,
    known_groups: Vec<&'static str>,
}

impl KindRegistry {
    /// Create a registry from explicit entries and known API groups
    pub fn new(entries: Vec<KindEntry>, known_groups: Vec<&'static str>) -> Self {
        Self {
            entries,
            known_groups,
        }
    }

    /// The kinds lowering understands
    pub fn standard() -> Self {
        Self::new(
            vec![
                KindEntry {
                    api_version: "tekton.dev/v1beta1",
                    kind: "Task",
                    decode: |v| serde_yaml::from_value(v).map(Document::Task),
                },
                KindEntry {
                    api_version: "tekton.dev/v1beta1",
                    kind: "TaskRun",
                    decode: |v| serde_yaml::from_value(v).map(Document::TaskRun),
                },
                KindEntry {
                    api_version: "tekton.dev/v1beta1",
                    kind: "Pipeline",
                    decode: |v| serde_yaml::from_value(v).map(Document::Pipeline),
                },
                KindEntry {
                    api_version: "tekton.dev/v1beta1",
                    kind: "PipelineRun",
                    decode: |v| serde_yaml::from_value(v).map(Document::PipelineRun),
                },
                KindEntry {
                    api_version: "v1",
                    kind: "Secret",
                    decode: |v| serde_yaml::from_value(v).map(Document::Secret),
                },
                KindEntry {
                    api_version: "v1",
                    kind: "ConfigMap",
                    decode: |v| serde_yaml::from_value(v).map(Document::ConfigMap),
                },
            ],
            // "" is the core group (`apiVersion: v1`)
            vec!["tekton.dev", "", "apps", "batch"],
        )
    }

    pub fn lookup(&self, api_version: &str, kind: &str) -> Option<&KindEntry> {
        self.entries
            .iter()
            .find(|e| e.api_version == api_version && e.kind == kind)
    }

    /// Whether the API group of `api_version` is one we know about
    pub fn knows_group(&self, api_version: &str) -> bool {
        let group = match api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        };
        self.known_groups.contains(&group)
    }

    /// Decode one document.
    ///
    /// Returns `Ok(None)` for a blank document or a known group with an
    /// unregistered kind.
    pub fn decode(&self, text: &str, location: &str) -> TekgraphResult<Option<Document>> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| TekgraphError::decode(location, e.to_string()))?;

        let mapping = match &value {
            serde_yaml::Value::Null => return Ok(None),
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(TekgraphError::decode(
                    location,
                    "document is not a YAML mapping",
                ))
            }
        };

        let field = |name: &str| {
            mapping
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };
        let api_version = field("apiVersion")
            .ok_or_else(|| TekgraphError::decode(location, "missing apiVersion"))?;
        let kind = field("kind").ok_or_else(|| TekgraphError::decode(location, "missing kind"))?;

        if !self.knows_group(&api_version) {
            return Err(TekgraphError::decode(
                location,
                format!("unknown API group in '{}'", api_version),
            ));
        }

        let Some(entry) = self.lookup(&api_version, &kind) else {
            warn!(
                "Skipping {} ({}/{}): not a resource we can resolve",
                location, api_version, kind
            );
            return Ok(None);
        };

        (entry.decode)(value)
            .map(Some)
            .map_err(|e| TekgraphError::decode(format!("{} ({})", location, kind), e.to_string()))
    }

    /// Decode text that must hold exactly one recognized document
    pub fn decode_single(&self, text: &str, location: &str) -> TekgraphResult<Document> {
        let docs = split_documents(text);
        match docs.as_slice() {
            [] => Err(TekgraphError::decode(location, "empty document")),
            [one] => self
                .decode(one, location)?
                .ok_or_else(|| TekgraphError::decode(location, "not a Tekton resource")),
            _ => Err(TekgraphError::decode(
                location,
                format!("expected one document, found {}", docs.len()),
            )),
        }
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"(?m)^---[ \t]*\r?$").expect("static regex"))
}

/// Split a multi-document stream, dropping blank and comment-only documents
pub fn split_documents(text: &str) -> Vec<&str> {
    separator()
        .split(text)
        .filter(|doc| {
            doc.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
        })
        .collect()
}

/// The single run request of a bundle
#[derive(Debug, Clone, PartialEq)]
pub enum RunRequest {
    Task(TaskRun),
    Pipeline(PipelineRun),
}

impl RunRequest {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Task(_) => "TaskRun",
            Self::Pipeline(_) => "PipelineRun",
        }
    }

    /// Effective run name
    pub fn name(&self) -> TekgraphResult<String> {
        let meta = match self {
            Self::Task(tr) => &tr.metadata,
            Self::Pipeline(pr) => &pr.metadata,
        };
        meta.run_name().ok_or_else(|| {
            TekgraphError::invalid(self.kind_name(), "metadata.name or metadata.generateName is required")
        })
    }
}

/// Typed collections loaded from the main text plus context texts
#[derive(Debug, Clone)]
pub struct ResourceBundle {
    pub run: RunRequest,
    pub tasks: BTreeMap<String, Task>,
    pub pipelines: BTreeMap<String, Pipeline>,
    pub secrets: BTreeMap<String, Secret>,
    pub config_maps: BTreeMap<String, ConfigMap>,
}

/// Loads resource bundles
#[derive(Clone, Default)]
pub struct ResourceLoader {
    registry: KindRegistry,
}

impl ResourceLoader {
    pub fn new(registry: KindRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Load the main text and any supplementary texts into a bundle
    pub fn load(&self, main: &str, additionals: &[String]) -> TekgraphResult<ResourceBundle> {
        let mut task_runs = Vec::new();
        let mut pipeline_runs = Vec::new();
        let mut tasks = BTreeMap::new();
        let mut pipelines = BTreeMap::new();
        let mut secrets = BTreeMap::new();
        let mut config_maps = BTreeMap::new();

        let sources = std::iter::once(("main file".to_string(), main)).chain(
            additionals
                .iter()
                .enumerate()
                .map(|(i, text)| (format!("context file {}", i), text.as_str())),
        );

        for (source, text) in sources {
            for (idx, doc) in split_documents(text).into_iter().enumerate() {
                let location = format!("{}, document {}", source, idx);
                let Some(document) = self.registry.decode(doc, &location)? else {
                    continue;
                };
                debug!("{}: {}", location, document.kind_name());

                match document {
                    Document::TaskRun(tr) => task_runs.push(tr),
                    Document::PipelineRun(pr) => pipeline_runs.push(pr),
                    Document::Task(t) => insert_named(&mut tasks, t.metadata.name.clone(), t, "Task"),
                    Document::Pipeline(p) => {
                        insert_named(&mut pipelines, p.metadata.name.clone(), p, "Pipeline")
                    }
                    Document::Secret(s) => {
                        insert_named(&mut secrets, s.metadata.name.clone(), s, "Secret")
                    }
                    Document::ConfigMap(c) => {
                        insert_named(&mut config_maps, c.metadata.name.clone(), c, "ConfigMap")
                    }
                }
            }
        }

        let run = match (task_runs.len(), pipeline_runs.len()) {
            (1, 0) => RunRequest::Task(task_runs.remove(0)),
            (0, 1) => RunRequest::Pipeline(pipeline_runs.remove(0)),
            (t, p) => {
                return Err(TekgraphError::AmbiguousRunRequest {
                    task_runs: t,
                    pipeline_runs: p,
                })
            }
        };

        info!(
            "Loaded {} with {} task(s), {} pipeline(s), {} secret(s), {} configmap(s)",
            run.kind_name(),
            tasks.len(),
            pipelines.len(),
            secrets.len(),
            config_maps.len()
        );

        Ok(ResourceBundle {
            run,
            tasks,
            pipelines,
            secrets,
            config_maps,
        })
    }
}

fn insert_named<T>(map: &mut BTreeMap<String, T>, name: String, value: T, kind: &str) {
    if name.is_empty() {
        warn!("Ignoring {} without a name", kind);
        return;
    }
    if map.insert(name.clone(), value).is_some() {
        warn!("{} '{}' defined more than once, keeping the last one", kind, name);
    }
}
