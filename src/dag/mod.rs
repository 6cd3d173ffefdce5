// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Pipeline task dependency graph
//!
//! Edges come from `runAfter`, from `$(tasks.X.results.Y)` references and
//! from shared workspaces: when two tasks bind the same pipeline workspace,
//! the run backs it with a persistent volume and the earlier task may write
//! to it, the later one runs after it unless that would contradict an
//! ordering that already exists. `emptyDir`, Secret and ConfigMap bindings
//! give each task its own copy and never order tasks.

use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

use crate::errors::{TekgraphError, TekgraphResult};
use crate::resolve::ResolvedPipeline;
use crate::resources::{ParamValue, WorkspaceBinding};
use crate::substitution::task_result_refs;
use crate::validation::step_fields;

/// Why one task runs after another
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    RunAfter,
    Result(String),
    Workspace(String),
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunAfter => write!(f, "runAfter"),
            Self::Result(r) => write!(f, "result {}", r),
            Self::Workspace(w) => write!(f, "workspace {}", w),
        }
    }
}

/// Dependency graph over the tasks of one pipeline
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<usize, EdgeKind>,
    names: Vec<String>,
    task_refs: Vec<String>,
    index: HashMap<String, NodeIndex>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Build and check the graph for a resolved pipeline and the run's
    /// workspace bindings
    pub fn build(pipeline: &ResolvedPipeline, bindings: &[WorkspaceBinding]) -> TekgraphResult<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let names: Vec<String> = pipeline.spec.tasks.iter().map(|t| t.name.clone()).collect();

        for (idx, name) in names.iter().enumerate() {
            let node = graph.add_node(idx);
            index.insert(name.clone(), node);
        }

        let lookup = |task: &str, referrer: &str, what: &str| {
            index.get(task).copied().ok_or_else(|| {
                TekgraphError::invalid(
                    format!("pipeline task '{}'", referrer),
                    format!("{} names unknown task '{}'", what, task),
                )
            })
        };

        // runAfter
        for pt in &pipeline.spec.tasks {
            let node = index[&pt.name];
            for after in &pt.run_after {
                let dep = lookup(after.as_str(), pt.name.as_str(), "runAfter")?;
                if !graph.contains_edge(dep, node) {
                    graph.add_edge(dep, node, EdgeKind::RunAfter);
                }
            }
        }

        // Result references in params and in the task's own steps
        for (pt, resolved) in pipeline.spec.tasks.iter().zip(&pipeline.tasks) {
            let node = index[&pt.name];
            let steps = resolved.spec.merged_steps();
            let mut texts: Vec<&str> = Vec::new();
            for param in &pt.params {
                match &param.value {
                    ParamValue::String(s) => texts.push(s),
                    ParamValue::Array(items) => texts.extend(items.iter().map(String::as_str)),
                    ParamValue::Object(map) => texts.extend(map.values().map(String::as_str)),
                }
            }
            for step in &steps {
                texts.extend(step_fields(step).into_iter().map(|(_, text)| text));
            }

            for text in texts {
                for (task, result) in task_result_refs(text) {
                    let dep = lookup(task.as_str(), pt.name.as_str(), "result reference")?;
                    if !graph.contains_edge(dep, node) {
                        graph.add_edge(dep, node, EdgeKind::Result(result));
                    }
                }
            }
        }

        // Shared writable workspaces, in declaration order
        let persistent = |workspace: &str| {
            bindings
                .iter()
                .any(|b| b.name == workspace && b.is_persistent())
        };
        let tasks = &pipeline.spec.tasks;
        for (i, earlier) in tasks.iter().enumerate() {
            for later in &tasks[i + 1..] {
                for ws in &earlier.workspaces {
                    let shared = ws.pipeline_workspace();
                    if !persistent(shared)
                        || !later.workspaces.iter().any(|w| w.pipeline_workspace() == shared)
                    {
                        continue;
                    }
                    let writable = pipeline.tasks[i]
                        .spec
                        .workspaces
                        .iter()
                        .find(|d| d.name == ws.name)
                        .is_some_and(|d| !d.read_only);
                    let (a, b) = (index[&earlier.name], index[&later.name]);
                    if writable
                        && !graph.contains_edge(a, b)
                        && !has_path_connecting(&graph, b, a, None)
                    {
                        debug!(
                            "'{}' runs after '{}' (shared workspace '{}')",
                            later.name, earlier.name, shared
                        );
                        graph.add_edge(a, b, EdgeKind::Workspace(shared.to_string()));
                    }
                }
            }
        }

        let task_refs = pipeline.tasks.iter().map(|t| t.name.clone()).collect();
        let mut dag = Self {
            graph,
            names,
            task_refs,
            index,
            order: Vec::new(),
        };
        dag.validate_acyclic()?;
        dag.order = dag.stable_order();
        Ok(dag)
    }

    fn validate_acyclic(&self) -> TekgraphResult<()> {
        let cyclic = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .min_by_key(|scc| scc.iter().map(|n| self.graph[*n]).min());

        match cyclic {
            Some(scc) => Err(TekgraphError::DependencyCycle {
                tasks: self.cycle_path(&scc),
            }),
            None => Ok(()),
        }
    }

    /// A concrete cycle through the strongly connected component
    fn cycle_path(&self, scc: &[NodeIndex]) -> Vec<String> {
        let start = *scc
            .iter()
            .min_by_key(|n| self.graph[**n])
            .unwrap_or(&scc[0]);

        // DFS restricted to the component, following the lowest index first
        let mut path = vec![start];
        let mut visited = vec![start];
        while let Some(&current) = path.last() {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| scc.contains(n))
                .collect();
            next.sort_by_key(|n| self.graph[*n]);

            if next.contains(&start) {
                break;
            }
            match next.into_iter().find(|n| !visited.contains(n)) {
                Some(n) => {
                    visited.push(n);
                    path.push(n);
                }
                None => {
                    path.pop();
                }
            }
        }

        let mut names: Vec<String> = path.iter().map(|n| self.names[self.graph[*n]].clone()).collect();
        names.push(self.names[self.graph[start]].clone());
        names
    }

    /// Kahn's algorithm, always taking the earliest declared ready task
    fn stable_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            let node = self.index[&self.names[idx]];
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let j = self.graph[next];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }
        order
    }

    /// Task indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Task names in execution order
    pub fn order_names(&self) -> Vec<String> {
        self.order.iter().map(|i| self.names[*i].clone()).collect()
    }

    /// Direct predecessors of a task, in declaration order
    pub fn dependencies(&self, task: &str) -> Option<Vec<String>> {
        self.neighbors(task, Direction::Incoming)
    }

    /// Direct successors of a task, in declaration order
    pub fn dependents(&self, task: &str) -> Option<Vec<String>> {
        self.neighbors(task, Direction::Outgoing)
    }

    fn neighbors(&self, task: &str, dir: Direction) -> Option<Vec<String>> {
        let node = self.index.get(task)?;
        let mut idx: Vec<usize> = self
            .graph
            .neighbors_directed(*node, dir)
            .map(|n| self.graph[n])
            .collect();
        idx.sort_unstable();
        idx.dedup();
        Some(idx.into_iter().map(|i| self.names[i].clone()).collect())
    }

    /// Whether `task_a` depends, directly or transitively, on `task_b`
    pub fn depends_on(&self, task_a: &str, task_b: &str) -> bool {
        let (Some(a), Some(b)) = (self.index.get(task_a), self.index.get(task_b)) else {
            return false;
        };
        a != b && has_path_connecting(&self.graph, *b, *a, None)
    }

    fn edges(&self) -> Vec<(&str, &str, &EdgeKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some((self.graph[from], self.graph[to], &self.graph[e]))
            })
            .collect();
        edges.sort_by_key(|(from, to, _)| (*from, *to));
        edges
            .into_iter()
            .map(|(from, to, kind)| (self.names[from].as_str(), self.names[to].as_str(), kind))
            .collect()
    }

    /// Mermaid diagram
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for name in &self.names {
            out.push_str(&format!("    {}[{}]\n", mermaid_id(name), name));
        }
        for (from, to, kind) in self.edges() {
            match kind {
                EdgeKind::RunAfter => {
                    out.push_str(&format!("    {} --> {}\n", mermaid_id(from), mermaid_id(to)))
                }
                other => out.push_str(&format!(
                    "    {} -->|{}| {}\n",
                    mermaid_id(from),
                    other,
                    mermaid_id(to)
                )),
            }
        }
        out
    }

    /// Graphviz DOT diagram
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for name in &self.names {
            out.push_str(&format!("    \"{}\";\n", name));
        }
        for (from, to, kind) in self.edges() {
            match kind {
                EdgeKind::RunAfter => out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to)),
                other => out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"{}\", style=dashed];\n",
                    from, to, other
                )),
            }
        }

        out.push_str("}\n");
        out
    }

    /// Numbered execution order with each task's predecessors
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, idx) in self.order.iter().enumerate() {
            let name = &self.names[*idx];
            out.push_str(&format!("{}. {} (task: {})", i + 1, name, self.task_refs[*idx]));
            let deps = self.dependencies(name).unwrap_or_default();
            if !deps.is_empty() {
                out.push_str(&format!(" [after: {}]", deps.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

fn mermaid_id(name: &str) -> String {
    name.replace('-', "_")
}
