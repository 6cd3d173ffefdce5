// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Synthesized files: step scripts and projected Secrets/ConfigMaps
//!
//! Everything here is a pure function of its inputs so the resulting
//! nodes hash identically across invocations.

use std::collections::{BTreeMap, BTreeSet};

use super::graph::{BuildGraph, FileAction, NodeId};
use crate::errors::{TekgraphError, TekgraphResult};
use crate::resources::{ConfigMap, KeyToPath, Secret};

/// Prepended to scripts without a shebang
pub const DEFAULT_SCRIPT_PREAMBLE: &str = "#!/bin/sh\nset -e\n";

/// Where step scripts are mounted
pub const SCRIPTS_DIR: &str = "/tekton/scripts";

const DEFAULT_FILE_MODE: u32 = 0o644;
const SCRIPT_MODE: u32 = 0o755;
const DIR_MODE: u32 = 0o755;

/// Add the default preamble unless the script carries its own shebang
pub fn normalize_script(script: &str) -> String {
    if script.trim_start().starts_with("#!") {
        script.to_string()
    } else {
        format!("{}{}", DEFAULT_SCRIPT_PREAMBLE, script)
    }
}

/// A script written into its own file tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    /// File name inside [`SCRIPTS_DIR`]
    pub filename: String,
    /// Node whose root holds the file
    pub node: NodeId,
}

impl ScriptFile {
    /// Absolute path of the script once mounted
    pub fn path(&self) -> String {
        format!("{}/{}", SCRIPTS_DIR, self.filename)
    }
}

/// Write step `index`'s script to a fresh file tree
pub fn script(graph: &mut BuildGraph, label: &str, index: usize, body: &str) -> ScriptFile {
    let content = normalize_script(body);
    let hash = blake3::hash(content.as_bytes()).to_hex();
    let filename = format!("script-{}-{}", index, &hash.as_str()[..8]);

    let node = graph.file(
        None,
        vec![FileAction::Mkfile {
            path: format!("/{}", filename),
            mode: SCRIPT_MODE,
            data: content.into_bytes(),
        }],
        format!("[tekton] {}: preparing script {}", label, filename),
    );
    ScriptFile { filename, node }
}

/// Project a Secret into a file tree
pub fn secret(graph: &mut BuildGraph, secret: &Secret, items: &[KeyToPath]) -> TekgraphResult<NodeId> {
    let entries = secret.entries()?;
    project(graph, "Secret", &secret.metadata.name, &entries, items)
}

/// Project a ConfigMap into a file tree
pub fn config_map(graph: &mut BuildGraph, config: &ConfigMap, items: &[KeyToPath]) -> TekgraphResult<NodeId> {
    let entries = config.entries()?;
    project(graph, "ConfigMap", &config.metadata.name, &entries, items)
}

/// One file per selected key; all keys when `items` is empty
fn project(
    graph: &mut BuildGraph,
    kind: &str,
    name: &str,
    entries: &BTreeMap<String, Vec<u8>>,
    items: &[KeyToPath],
) -> TekgraphResult<NodeId> {
    let location = || format!("{} '{}'", kind, name);
    let mut files: BTreeMap<String, (u32, Vec<u8>)> = BTreeMap::new();

    if items.is_empty() {
        for (key, value) in entries {
            let path = clean_path(key).ok_or_else(|| {
                TekgraphError::invalid(location(), format!("key '{}' is not a valid file name", key))
            })?;
            files.insert(path, (DEFAULT_FILE_MODE, value.clone()));
        }
    } else {
        for item in items {
            let value = entries
                .get(&item.key)
                .ok_or_else(|| TekgraphError::MissingResourceKey {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    key: item.key.clone(),
                })?;
            let target = if item.path.is_empty() { &item.key } else { &item.path };
            let path = clean_path(target).ok_or_else(|| {
                TekgraphError::invalid(location(), format!("item path '{}' escapes the volume", target))
            })?;
            files.insert(path, (item.mode.unwrap_or(DEFAULT_FILE_MODE), value.clone()));
        }
    }

    let dirs: BTreeSet<String> = files
        .keys()
        .flat_map(|path| {
            let parts: Vec<&str> = path.split('/').collect();
            (1..parts.len())
                .map(|n| parts[..n].join("/"))
                .collect::<Vec<_>>()
        })
        .collect();

    let actions = dirs
        .into_iter()
        .map(|dir| FileAction::Mkdir {
            path: format!("/{}", dir),
            mode: DIR_MODE,
            parents: true,
        })
        .chain(files.into_iter().map(|(path, (mode, data))| FileAction::Mkfile {
            path: format!("/{}", path),
            mode,
            data,
        }))
        .collect();

    Ok(graph.file(None, actions, format!("[tekton] {} {}: preparing files", kind, name)))
}

/// Relative path with no empty, `.` or `..` components
fn clean_path(path: &str) -> Option<String> {
    let parts: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() || parts.iter().any(|p| *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::lower::graph::Op;

    fn mkfiles(graph: &BuildGraph, id: NodeId) -> Vec<(String, u32, Vec<u8>)> {
        match &graph.get(id).op {
            Op::File { actions, .. } => actions
                .iter()
                .filter_map(|a| match a {
                    FileAction::Mkfile { path, mode, data } => Some((path.clone(), *mode, data.clone())),
                    _ => None,
                })
                .collect(),
            other => panic!("expected file op, got {:?}", other),
        }
    }

    fn config(data: &[(&str, &str)]) -> ConfigMap {
        let mut cm = ConfigMap::default();
        cm.metadata.name = "settings".into();
        for (k, v) in data {
            cm.data.insert(k.to_string(), v.to_string());
        }
        cm
    }

    #[test]
    fn test_script_preamble() {
        let body = "echo hello\n";
        assert_eq!(normalize_script(body), format!("{}{}", DEFAULT_SCRIPT_PREAMBLE, body));

        let shebang = "\n  #!/usr/bin/env python3\nprint('hi')\n";
        assert_eq!(normalize_script(shebang), shebang);
    }

    #[test]
    fn test_script_file_is_deterministic() {
        let mut graph = BuildGraph::new();
        let a = script(&mut graph, "build/compile", 0, "make");
        let b = script(&mut graph, "build/compile", 0, "make");
        assert_eq!(a, b);
        assert!(a.filename.starts_with("script-0-"));
        assert_eq!(a.filename.len(), "script-0-".len() + 8);
        assert!(a.path().starts_with("/tekton/scripts/"));

        let files = mkfiles(&graph, a.node);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, 0o755);
        assert_eq!(files[0].2, b"#!/bin/sh\nset -e\nmake".to_vec());
    }

    #[test]
    fn test_project_all_keys() {
        let mut graph = BuildGraph::new();
        let id = config_map(&mut graph, &config(&[("a", "1"), ("b", "2")]), &[]).unwrap();
        let files = mkfiles(&graph, id);
        assert_eq!(
            files,
            vec![
                ("/a".to_string(), 0o644, b"1".to_vec()),
                ("/b".to_string(), 0o644, b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn test_project_items_with_nested_path() {
        let mut graph = BuildGraph::new();
        let items = vec![KeyToPath {
            key: "a".into(),
            path: "conf/app/a.txt".into(),
            mode: Some(0o400),
        }];
        let id = config_map(&mut graph, &config(&[("a", "1"), ("b", "2")]), &items).unwrap();
        let Op::File { actions, .. } = &graph.get(id).op else {
            panic!("expected file op");
        };
        assert_eq!(actions.len(), 3);
        assert!(matches!(&actions[0], FileAction::Mkdir { path, .. } if path == "/conf"));
        assert!(matches!(&actions[1], FileAction::Mkdir { path, .. } if path == "/conf/app"));
        assert_eq!(mkfiles(&graph, id), vec![("/conf/app/a.txt".to_string(), 0o400, b"1".to_vec())]);
    }

    #[test]
    fn test_project_missing_key() {
        let mut graph = BuildGraph::new();
        let mut secret = Secret::default();
        secret.metadata.name = "creds".into();
        secret.string_data.insert("user".into(), "admin".into());
        let items = vec![KeyToPath {
            key: "token".into(),
            path: "token".into(),
            mode: None,
        }];
        let err = super::secret(&mut graph, &secret, &items).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingResourceKey);
    }

    #[test]
    fn test_project_rejects_escaping_path() {
        let mut graph = BuildGraph::new();
        let items = vec![KeyToPath {
            key: "a".into(),
            path: "../etc/passwd".into(),
            mode: None,
        }];
        let err = config_map(&mut graph, &config(&[("a", "1")]), &items).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpecification);
    }
}
