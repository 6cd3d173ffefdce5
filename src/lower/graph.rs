// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Build graph IR
//!
//! An arena of immutable nodes addressed by [`NodeId`]. Every node gets a
//! BLAKE3 digest over its operation and the digests of the nodes it
//! references, so identical sub-graphs collapse to one node and the solver
//! can cache by content. Labels are not part of the digest; a node reached
//! under a second label keeps it as an alias.

use blake3::Hasher;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Index of a node in its [`BuildGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// How concurrent users of a cache mount share it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
    Shared,
    Private,
    Locked,
}

/// Where a mount's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MountSource {
    /// A directory of another node's output
    Node { node: NodeId, path: String },
    /// A persistent cache directory shared across solves
    Cache { id: String, sharing: CacheSharing },
    /// Empty scratch space discarded after the exec
    Tmpfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub target: String,
    pub source: MountSource,
    pub readonly: bool,

    /// Sub-directory of the source to mount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl Mount {
    pub fn node(target: impl Into<String>, node: NodeId, path: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: MountSource::Node {
                node,
                path: path.into(),
            },
            readonly: true,
            selector: None,
        }
    }

    pub fn cache(target: impl Into<String>, id: impl Into<String>, sharing: CacheSharing) -> Self {
        Self {
            target: target.into(),
            source: MountSource::Cache {
                id: id.into(),
                sharing,
            },
            readonly: false,
            selector: None,
        }
    }

    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: MountSource::Tmpfs,
            readonly: false,
            selector: None,
        }
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector;
        self
    }

    /// The node this mount reads from, if any
    pub fn source_node(&self) -> Option<NodeId> {
        match &self.source {
            MountSource::Node { node, .. } => Some(*node),
            _ => None,
        }
    }
}

/// Filesystem edits applied by a `File` op, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    Mkdir {
        path: String,
        mode: u32,
        parents: bool,
    },
    Mkfile {
        path: String,
        mode: u32,
        #[serde(serialize_with = "serialize_bytes")]
        data: Vec<u8>,
    },
    Copy {
        source: NodeId,
        src: String,
        dest: String,
        /// Copy the directory's contents rather than the directory itself
        contents_only: bool,
    },
}

fn serialize_bytes<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// A container process run on top of `root`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOp {
    pub root: NodeId,
    pub args: Vec<String>,
    /// `NAME=value` pairs
    pub env: Vec<String>,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub mounts: Vec<Mount>,
    pub ignore_cache: bool,
}

impl ExecOp {
    pub fn new(root: NodeId, args: Vec<String>) -> Self {
        Self {
            root,
            args,
            env: Vec::new(),
            cwd: "/".to_string(),
            user: None,
            mounts: Vec::new(),
            ignore_cache: false,
        }
    }

    pub fn mount_at(&self, target: &str) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.target == target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Image { reference: String },
    Scratch,
    File {
        base: Option<NodeId>,
        actions: Vec<FileAction>,
    },
    Exec(ExecOp),
}

impl Op {
    /// Nodes this op reads from, in a fixed order
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            Self::Image { .. } | Self::Scratch => vec![],
            Self::File { base, actions } => base
                .iter()
                .copied()
                .chain(actions.iter().filter_map(|a| match a {
                    FileAction::Copy { source, .. } => Some(*source),
                    _ => None,
                }))
                .collect(),
            Self::Exec(exec) => std::iter::once(exec.root)
                .chain(exec.mounts.iter().filter_map(Mount::source_node))
                .collect(),
        }
    }

    pub fn as_exec(&self) -> Option<&ExecOp> {
        match self {
            Self::Exec(exec) => Some(exec),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub digest: String,
    pub label: String,
    /// Other labels this node was added under
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(flatten)]
    pub op: Op,
}

impl Node {
    /// Primary label followed by any aliases
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.label.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Arena of build graph nodes
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildGraph {
    nodes: Vec<Node>,
    #[serde(skip)]
    by_digest: HashMap<String, NodeId>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning the existing id when an identical op exists
    pub fn add(&mut self, op: Op, label: impl Into<String>) -> NodeId {
        let label = label.into();
        let digest = self.digest_of(&op);
        if let Some(&id) = self.by_digest.get(&digest) {
            let node = &mut self.nodes[id.0];
            if !node.labels().any(|l| l == label) {
                node.aliases.push(label);
            }
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            digest: digest.clone(),
            label,
            aliases: Vec::new(),
            op,
        });
        self.by_digest.insert(digest, id);
        id
    }

    pub fn image(&mut self, reference: &str) -> NodeId {
        self.add(
            Op::Image {
                reference: reference.to_string(),
            },
            format!("load metadata from {}", reference),
        )
    }

    pub fn scratch(&mut self) -> NodeId {
        self.add(Op::Scratch, "scratch")
    }

    pub fn file(
        &mut self,
        base: Option<NodeId>,
        actions: Vec<FileAction>,
        label: impl Into<String>,
    ) -> NodeId {
        self.add(Op::File { base, actions }, label)
    }

    pub fn exec(&mut self, exec: ExecOp, label: impl Into<String>) -> NodeId {
        self.add(Op::Exec(exec), label)
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn exec_op(&self, id: NodeId) -> Option<&ExecOp> {
        self.get(id).op.as_exec()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `to` is reachable from `from` by following inputs
    pub fn depends_on(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            stack.extend(self.get(id).op.inputs());
        }
        false
    }

    /// Render the graph in Graphviz DOT format
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph build {\n");
        out.push_str("    rankdir=BT;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in &self.nodes {
            let label = node
                .labels()
                .map(|l| l.replace('"', "\\\""))
                .collect::<Vec<_>>()
                .join("\\n");
            out.push_str(&format!("    \"{}\" [label=\"{}\"];\n", node.id, label));
        }
        out.push('\n');
        for node in &self.nodes {
            for input in node.op.inputs() {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", node.id, input));
            }
        }

        out.push_str("}\n");
        out
    }

    fn digest_of(&self, op: &Op) -> String {
        let mut h = OpHasher::new(self);
        h.op(op);
        h.finalize()
    }
}

/// Canonical, length-prefixed encoding of an op into BLAKE3
struct OpHasher<'a> {
    graph: &'a BuildGraph,
    hasher: Hasher,
}

impl<'a> OpHasher<'a> {
    fn new(graph: &'a BuildGraph) -> Self {
        Self {
            graph,
            hasher: Hasher::new(),
        }
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.hasher.update(&(b.len() as u64).to_le_bytes());
        self.hasher.update(b);
    }

    fn u32(&mut self, n: u32) {
        self.hasher.update(&n.to_le_bytes());
    }

    fn flag(&mut self, b: bool) {
        self.hasher.update(&[b as u8]);
    }

    fn node(&mut self, id: NodeId) {
        let digest = self.graph.get(id).digest.clone();
        self.str(&digest);
    }

    fn op(&mut self, op: &Op) {
        match op {
            Op::Image { reference } => {
                self.str("image");
                self.str(reference);
            }
            Op::Scratch => self.str("scratch"),
            Op::File { base, actions } => {
                self.str("file");
                match base {
                    Some(id) => self.node(*id),
                    None => self.str(""),
                }
                for action in actions {
                    self.file_action(action);
                }
            }
            Op::Exec(exec) => {
                self.str("exec");
                self.node(exec.root);
                self.u32(exec.args.len() as u32);
                for arg in &exec.args {
                    self.str(arg);
                }
                self.u32(exec.env.len() as u32);
                for env in &exec.env {
                    self.str(env);
                }
                self.str(&exec.cwd);
                self.str(exec.user.as_deref().unwrap_or(""));
                self.flag(exec.ignore_cache);
                for mount in &exec.mounts {
                    self.mount(mount);
                }
            }
        }
    }

    fn file_action(&mut self, action: &FileAction) {
        match action {
            FileAction::Mkdir {
                path,
                mode,
                parents,
            } => {
                self.str("mkdir");
                self.str(path);
                self.u32(*mode);
                self.flag(*parents);
            }
            FileAction::Mkfile { path, mode, data } => {
                self.str("mkfile");
                self.str(path);
                self.u32(*mode);
                self.bytes(data);
            }
            FileAction::Copy {
                source,
                src,
                dest,
                contents_only,
            } => {
                self.str("copy");
                self.node(*source);
                self.str(src);
                self.str(dest);
                self.flag(*contents_only);
            }
        }
    }

    fn mount(&mut self, mount: &Mount) {
        self.str("mount");
        self.str(&mount.target);
        self.flag(mount.readonly);
        self.str(mount.selector.as_deref().unwrap_or(""));
        match &mount.source {
            MountSource::Node { node, path } => {
                self.str("node");
                self.node(*node);
                self.str(path);
            }
            MountSource::Cache { id, sharing } => {
                self.str("cache");
                self.str(id);
                self.str(match sharing {
                    CacheSharing::Shared => "shared",
                    CacheSharing::Private => "private",
                    CacheSharing::Locked => "locked",
                });
            }
            MountSource::Tmpfs => self.str("tmpfs"),
        }
    }

    fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_ops_deduplicate() {
        let mut graph = BuildGraph::new();
        let a = graph.image("docker.io/library/alpine:latest");
        let b = graph.image("docker.io/library/alpine:latest");
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_digest_ignores_label_and_insertion_order() {
        let mut g1 = BuildGraph::new();
        let img = g1.image("docker.io/library/alpine:latest");
        let e1 = g1.exec(ExecOp::new(img, vec!["true".into()]), "first");

        let mut g2 = BuildGraph::new();
        g2.scratch();
        let img2 = g2.image("docker.io/library/alpine:latest");
        let e2 = g2.exec(ExecOp::new(img2, vec!["true".into()]), "other label");

        assert_ne!(e1, e2);
        assert_eq!(g1.get(e1).digest, g2.get(e2).digest);
    }

    #[test]
    fn test_deduplicated_node_keeps_every_label() {
        let mut graph = BuildGraph::new();
        let img = graph.image("docker.io/library/alpine:latest");
        let lint = graph.exec(ExecOp::new(img, vec!["make".into()]), "[tekton] lint: run");
        let check = graph.exec(ExecOp::new(img, vec!["make".into()]), "[tekton] check: run");
        graph.exec(ExecOp::new(img, vec!["make".into()]), "[tekton] lint: run");

        assert_eq!(lint, check);
        let node = graph.get(lint);
        assert_eq!(node.label, "[tekton] lint: run");
        assert_eq!(node.aliases, vec!["[tekton] check: run"]);
        assert!(graph
            .to_dot()
            .contains("[label=\"[tekton] lint: run\\n[tekton] check: run\"]"));

        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["nodes"][1]["aliases"][0], "[tekton] check: run");
        assert!(json["nodes"][0].get("aliases").is_none());
    }

    #[test]
    fn test_digest_changes_with_input() {
        let mut graph = BuildGraph::new();
        let alpine = graph.image("docker.io/library/alpine:latest");
        let busybox = graph.image("docker.io/library/busybox:latest");
        let a = graph.exec(ExecOp::new(alpine, vec!["true".into()]), "a");
        let b = graph.exec(ExecOp::new(busybox, vec!["true".into()]), "b");
        assert_ne!(graph.get(a).digest, graph.get(b).digest);
    }

    #[test]
    fn test_inputs_and_reachability() {
        let mut graph = BuildGraph::new();
        let img = graph.image("docker.io/library/alpine:latest");
        let first = graph.exec(ExecOp::new(img, vec!["a".into()]), "first");
        let mut exec = ExecOp::new(img, vec!["b".into()]);
        exec.mounts.push(Mount::node("/prev", first, "/tekton/results"));
        let second = graph.exec(exec, "second");

        assert_eq!(graph.get(second).op.inputs(), vec![img, first]);
        assert!(graph.depends_on(second, first));
        assert!(!graph.depends_on(first, second));
    }

    #[test]
    fn test_serialize_and_dot() {
        let mut graph = BuildGraph::new();
        let file = graph.file(
            None,
            vec![FileAction::Mkfile {
                path: "/a".into(),
                mode: 0o644,
                data: b"1".to_vec(),
            }],
            "make a",
        );
        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["nodes"][0]["op"], "file");
        assert_eq!(json["nodes"][0]["actions"][0]["data"], "MQ==");
        assert!(graph.to_dot().contains(&format!("\"{}\"", file)));
    }
}
