// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Task lowering

use tracing::debug;

use super::graph::{BuildGraph, CacheSharing, ExecOp, FileAction, Mount, NodeId};
use super::{files, image, LowerContext, PREVIOUS_RESULTS_DIR, RESULTS_DIR};
use crate::errors::{TekgraphError, TekgraphResult};
use crate::resources::{BindingSource, Step, WorkspaceDeclaration};
use crate::substitution::{BoundWorkspace, PreparedTask};

const RESULTS_DIR_MODE: u32 = 0o755;

/// Lower one task into a chain of exec nodes.
///
/// `inputs` are extra mounts placed on every step, used by pipelines to
/// expose predecessor results. Returns the last step's node, whose root
/// holds the task's final `/tekton/results`.
pub fn lower_task(
    graph: &mut BuildGraph,
    task: &PreparedTask,
    inputs: &[Mount],
    ctx: LowerContext<'_>,
) -> TekgraphResult<NodeId> {
    let label = task.label();

    // Workspace trees are shared by every step
    let mut workspace_mounts = Vec::new();
    for decl in &task.spec.workspaces {
        match task.workspace(&decl.name) {
            Some(bound) => workspace_mounts.push(
                workspace_mount(graph, decl, bound, ctx)
                    .map_err(|e| e.within(&format!("task '{}'", label)))?,
            ),
            None => debug!("{}: workspace '{}' left unbound", label, decl.name),
        }
    }

    let mut previous: Option<NodeId> = None;
    for (index, step) in task.spec.merged_steps().iter().enumerate() {
        let location = format!("task '{}', step {}", label, index);

        let reference = image::canonicalize(&step.image).map_err(|e| e.within(&location))?;
        let root = step_root(graph, label, step, &reference, previous);

        let mut exec = ExecOp::new(root, Vec::new());
        if step.script.is_empty() {
            exec.args = step.command.iter().chain(&step.args).cloned().collect();
        } else {
            let script = files::script(graph, label, index, &step.script);
            exec.args = std::iter::once(script.path())
                .chain(step.args.iter().cloned())
                .collect();
            exec.mounts.push(Mount::node(files::SCRIPTS_DIR, script.node, "/"));
        }

        exec.env = step
            .env
            .iter()
            .map(|var| format!("{}={}", var.name, var.value))
            .collect();
        if !step.working_dir.is_empty() {
            exec.cwd = step.working_dir.clone();
        }
        exec.user = step.run_as_user().map(|uid| uid.to_string());
        exec.ignore_cache = ctx.options.no_cache;

        if let Some(prev) = previous {
            exec.mounts.push(Mount::node(PREVIOUS_RESULTS_DIR, prev, RESULTS_DIR));
        }
        exec.mounts.extend(inputs.iter().cloned());
        exec.mounts.extend(workspace_mounts.iter().cloned());

        debug!(
            "{}: step '{}' on {} with {} mounts",
            label,
            step.name,
            reference,
            exec.mounts.len()
        );
        previous = Some(graph.exec(exec, format!("[tekton] {}: {}", label, step.name)));
    }

    previous.ok_or_else(|| TekgraphError::invalid(format!("task '{}'", label), "task has no steps"))
}

/// Image plus an empty results directory, seeded with the previous
/// step's results when there is one
fn step_root(
    graph: &mut BuildGraph,
    label: &str,
    step: &Step,
    reference: &str,
    previous: Option<NodeId>,
) -> NodeId {
    let base = graph.image(reference);
    let mut actions = vec![FileAction::Mkdir {
        path: RESULTS_DIR.to_string(),
        mode: RESULTS_DIR_MODE,
        parents: true,
    }];
    if let Some(prev) = previous {
        actions.push(FileAction::Copy {
            source: prev,
            src: RESULTS_DIR.to_string(),
            dest: RESULTS_DIR.to_string(),
            contents_only: true,
        });
    }
    graph.file(
        Some(base),
        actions,
        format!("[tekton] {}: preparing {}", label, step.name),
    )
}

fn workspace_mount(
    graph: &mut BuildGraph,
    decl: &WorkspaceDeclaration,
    bound: &BoundWorkspace,
    ctx: LowerContext<'_>,
) -> TekgraphResult<Mount> {
    let binding = &bound.binding;
    let target = decl.mount_path.as_str();
    let sub_path = binding.sub_path.trim_matches('/');
    let selector = (!sub_path.is_empty()).then(|| sub_path.to_string());

    let mount = match binding.source()? {
        BindingSource::Claim(claim) => Mount::cache(target, &bound.volume, CacheSharing::Shared)
            .readonly(decl.read_only || claim.read_only)
            .with_selector(selector),
        BindingSource::ClaimTemplate => Mount::cache(target, &bound.volume, CacheSharing::Shared)
            .readonly(decl.read_only)
            .with_selector(selector),
        BindingSource::EmptyDir => Mount::tmpfs(target),
        BindingSource::Secret(source) => {
            let secret = ctx.resources.secrets.get(&source.secret_name).ok_or_else(|| {
                TekgraphError::ReferenceNotFound {
                    kind: "Secret".into(),
                    name: source.secret_name.clone(),
                }
            })?;
            let node = files::secret(graph, secret, &source.items)?;
            Mount::node(target, node, format!("/{}", sub_path))
        }
        BindingSource::ConfigMap(source) => {
            let config = ctx.resources.config_maps.get(&source.name).ok_or_else(|| {
                TekgraphError::ReferenceNotFound {
                    kind: "ConfigMap".into(),
                    name: source.name.clone(),
                }
            })?;
            let node = files::config_map(graph, config, &source.items)?;
            Mount::node(target, node, format!("/{}", sub_path))
        }
    };

    debug!("workspace '{}' mounted at {} ({:?})", decl.name, target, mount.source);
    Ok(mount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildOptions;
    use crate::errors::ErrorKind;
    use crate::lower::graph::{MountSource, Op};
    use crate::resolve::{BundleResolver, Resolver};
    use crate::resources::{KindRegistry, ResourceBundle, ResourceLoader};
    use crate::substitution::{prepare, PreparedRun};
    use tokio_util::sync::CancellationToken;

    async fn prepared(main: &str, context: &[&str]) -> (ResourceBundle, PreparedTask) {
        let context: Vec<String> = context.iter().map(|s| s.to_string()).collect();
        let resources = ResourceLoader::new(KindRegistry::standard())
            .load(main, &context)
            .unwrap();
        let bundles = BundleResolver::disabled();
        let resolved = Resolver::new(&resources, &bundles)
            .resolve(&CancellationToken::new())
            .await
            .unwrap();
        match prepare(&resolved).unwrap() {
            PreparedRun::Task(task) => (resources, task),
            other => panic!("expected a task, got {:?}", other),
        }
    }

    fn lower(resources: &ResourceBundle, task: &PreparedTask, options: &BuildOptions) -> (BuildGraph, TekgraphResult<NodeId>) {
        let mut graph = BuildGraph::new();
        let ctx = LowerContext { resources, options };
        let result = lower_task(&mut graph, task, &[], ctx);
        (graph, result)
    }

    fn exec_chain(graph: &BuildGraph, last: NodeId) -> Vec<NodeId> {
        let mut chain = vec![last];
        let mut current = last;
        while let Some(prev) = graph
            .exec_op(current)
            .and_then(|e| e.mount_at(PREVIOUS_RESULTS_DIR))
            .and_then(Mount::source_node)
        {
            chain.push(prev);
            current = prev;
        }
        chain.reverse();
        chain
    }

    const THREE_STEPS: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: TaskRun
metadata:
  name: tr
spec:
  taskSpec:
    steps:
      - name: one
        image: alpine
        command: [sh, -c, "echo 1 > /tekton/results/a"]
      - name: two
        image: alpine
        command: [cat, /tekton/steps/previous/results/a]
      - name: three
        image: busybox:1.36
        args: [echo, done]
"#;

    #[tokio::test]
    async fn test_steps_form_a_chain() {
        let (resources, task) = prepared(THREE_STEPS, &[]).await;
        let (graph, last) = lower(&resources, &task, &BuildOptions::default());
        let last = last.unwrap();

        let chain = exec_chain(&graph, last);
        assert_eq!(chain.len(), 3);
        let execs = graph.nodes().iter().filter(|n| n.op.as_exec().is_some()).count();
        assert_eq!(execs, 3);

        for pair in chain.windows(2) {
            let mount = graph.exec_op(pair[1]).unwrap().mount_at(PREVIOUS_RESULTS_DIR).unwrap();
            assert!(mount.readonly);
            assert_eq!(
                mount.source,
                MountSource::Node {
                    node: pair[0],
                    path: RESULTS_DIR.into()
                }
            );
        }
        assert!(graph.exec_op(chain[0]).unwrap().mount_at(PREVIOUS_RESULTS_DIR).is_none());

        let first = graph.exec_op(chain[0]).unwrap();
        assert_eq!(first.args, vec!["sh", "-c", "echo 1 > /tekton/results/a"]);
        let root = graph.get(first.root);
        match &root.op {
            Op::File { base: Some(base), actions } => {
                assert_eq!(
                    graph.get(*base).op,
                    Op::Image {
                        reference: "docker.io/library/alpine:latest".into()
                    }
                );
                assert_eq!(actions.len(), 1);
            }
            other => panic!("unexpected root {:?}", other),
        }

        // Later roots carry the previous results forward
        let third = graph.exec_op(chain[2]).unwrap();
        match &graph.get(third.root).op {
            Op::File { actions, .. } => assert!(matches!(
                actions.last(),
                Some(FileAction::Copy { source, .. }) if *source == chain[1]
            )),
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lowering_is_deterministic() {
        let (resources, task) = prepared(THREE_STEPS, &[]).await;
        let (a, _) = lower(&resources, &task, &BuildOptions::default());
        let (b, _) = lower(&resources, &task, &BuildOptions::default());
        let digests = |g: &BuildGraph| g.nodes().iter().map(|n| n.digest.clone()).collect::<Vec<_>>();
        assert_eq!(digests(&a), digests(&b));
    }

    #[tokio::test]
    async fn test_script_step() {
        let (resources, task) = prepared(
            r#"
apiVersion: tekton.dev/v1beta1
kind: TaskRun
metadata:
  name: tr
spec:
  params:
    - name: who
      value: world
  taskSpec:
    params:
      - name: who
    stepTemplate:
      env:
        - name: LANG
          value: C
      workingDir: /src
    steps:
      - name: greet
        image: alpine
        args: [--verbose]
        script: echo hello $(params.who)
        securityContext:
          runAsUser: 1000
"#,
            &[],
        )
        .await;
        let (graph, last) = lower(&resources, &task, &BuildOptions::default());
        let exec = graph.exec_op(last.unwrap()).unwrap();

        assert!(exec.args[0].starts_with("/tekton/scripts/script-0-"));
        assert_eq!(exec.args[1], "--verbose");
        assert_eq!(exec.env, vec!["LANG=C"]);
        assert_eq!(exec.cwd, "/src");
        assert_eq!(exec.user.as_deref(), Some("1000"));

        let mount = exec.mount_at(files::SCRIPTS_DIR).unwrap();
        assert!(mount.readonly);
        let script_node = mount.source_node().unwrap();
        match &graph.get(script_node).op {
            Op::File { actions, .. } => match &actions[0] {
                FileAction::Mkfile { data, mode, .. } => {
                    assert_eq!(*mode, 0o755);
                    assert_eq!(
                        String::from_utf8_lossy(data),
                        "#!/bin/sh\nset -e\necho hello world"
                    );
                }
                other => panic!("unexpected action {:?}", other),
            },
            other => panic!("unexpected op {:?}", other),
        }
    }

    const WORKSPACES: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: TaskRun
metadata:
  name: tr
spec:
  workspaces:
    - name: source
      persistentVolumeClaim:
        claimName: src-pvc
      subPath: repo
    - name: creds
      secret:
        secretName: git-creds
    - name: scratch
      emptyDir: {}
    - name: settings
      configMap:
        name: settings
        items:
          - key: app.conf
            path: conf/app.conf
  taskSpec:
    workspaces:
      - name: source
      - name: creds
        readOnly: true
        mountPath: /creds
      - name: scratch
      - name: settings
    steps:
      - name: build
        image: golang:1.22
        command: [go, build, ./...]
"#;

    const SECRET: &str = r#"
apiVersion: v1
kind: Secret
metadata:
  name: git-creds
stringData:
  token: abc
"#;

    const CONFIG: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  app.conf: debug=true
"#;

    #[tokio::test]
    async fn test_workspace_mounts() {
        let (resources, task) = prepared(WORKSPACES, &[SECRET, CONFIG]).await;
        let (graph, last) = lower(&resources, &task, &BuildOptions::default());
        let exec = graph.exec_op(last.unwrap()).unwrap();

        let source = exec.mount_at("/workspace/source").unwrap();
        assert_eq!(
            source.source,
            MountSource::Cache {
                id: "tr/source".into(),
                sharing: CacheSharing::Shared
            }
        );
        assert!(!source.readonly);
        assert_eq!(source.selector.as_deref(), Some("repo"));

        let creds = exec.mount_at("/creds").unwrap();
        assert!(creds.readonly);
        assert!(creds.source_node().is_some());

        let scratch = exec.mount_at("/workspace/scratch").unwrap();
        assert_eq!(scratch.source, MountSource::Tmpfs);

        let settings = exec.mount_at("/workspace/settings").unwrap();
        match &graph.get(settings.source_node().unwrap()).op {
            Op::File { actions, .. } => assert!(actions.iter().any(|a| matches!(
                a,
                FileAction::Mkfile { path, .. } if path == "/conf/app.conf"
            ))),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let (resources, task) = prepared(WORKSPACES, &[CONFIG]).await;
        let (_, result) = lower(&resources, &task, &BuildOptions::default());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);
        assert!(err.to_string().contains("git-creds"));
    }

    #[tokio::test]
    async fn test_missing_config_key() {
        let config = CONFIG.replace("app.conf: debug=true", "other.conf: x");
        let (resources, task) = prepared(WORKSPACES, &[SECRET, &config]).await;
        let (_, result) = lower(&resources, &task, &BuildOptions::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::MissingResourceKey);
    }

    #[tokio::test]
    async fn test_no_cache() {
        let (resources, task) = prepared(THREE_STEPS, &[]).await;
        let options = BuildOptions {
            no_cache: true,
            ..Default::default()
        };
        let (graph, _) = lower(&resources, &task, &options);
        assert!(graph
            .nodes()
            .iter()
            .filter_map(|n| n.op.as_exec())
            .all(|e| e.ignore_cache));
    }

    #[tokio::test]
    async fn test_bad_image_names_step() {
        let main = THREE_STEPS.replace("busybox:1.36", "Not A Valid Image");
        let (resources, task) = prepared(&main, &[]).await;
        let (_, result) = lower(&resources, &task, &BuildOptions::default());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpecification);
        assert!(err.to_string().contains("step 2"));
    }
}
