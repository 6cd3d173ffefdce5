// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Compilation driver
//!
//! Runs the stages strictly in sequence:
//! Load → Resolve → Substitute → Validate → Graph-Build → Lower.
//! Only resolution performs I/O (bundle fetches through the solver).

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BuildOptions;
use crate::dag::TaskGraph;
use crate::errors::{TekgraphError, TekgraphResult};
use crate::lower::{lower_pipeline_run, lower_task_run, LowerContext, Lowered};
use crate::resolve::{BundleResolver, ResolvedRun, Resolver};
use crate::resources::{KindRegistry, ResourceBundle, ResourceLoader, RunRequest};
use crate::solver::Solver;
use crate::substitution::{prepare, PreparedRun};
use crate::validation::FeatureValidator;

/// Everything known about a run once it has passed validation
#[derive(Debug, Clone)]
pub struct Checked {
    pub resources: ResourceBundle,
    pub resolved: ResolvedRun,
    pub prepared: PreparedRun,
    /// Task dependency graph, for pipelines
    pub dag: Option<TaskGraph>,
}

impl Checked {
    /// Names of the tasks that will be lowered, in order
    pub fn plan(&self) -> Vec<String> {
        match (&self.prepared, &self.dag) {
            (PreparedRun::Pipeline(_), Some(dag)) => dag.order_names(),
            (PreparedRun::Task(task), _) => vec![task.label().to_string()],
            (PreparedRun::Pipeline(p), None) => {
                p.spec.tasks.iter().map(|t| t.name.clone()).collect()
            }
        }
    }
}

/// Compiles run requests into build graphs
pub struct Compiler {
    loader: ResourceLoader,
    options: BuildOptions,
    solver: Option<Arc<dyn Solver>>,
}

impl Compiler {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            loader: ResourceLoader::new(KindRegistry::standard()),
            options,
            solver: None,
        }
    }

    /// Solver used to fetch bundle images
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Load, resolve, substitute and validate without lowering
    pub async fn check(
        &self,
        main: &str,
        context: &[String],
        cancel: &CancellationToken,
    ) -> TekgraphResult<Checked> {
        let resources = self.loader.load(main, context)?;
        info!(
            "Loaded {} '{}' with {} task(s), {} pipeline(s)",
            resources.run.kind_name(),
            resources.run.name()?,
            resources.tasks.len(),
            resources.pipelines.len()
        );

        let bundles = BundleResolver::new(
            self.solver.clone(),
            self.options.bundle_fetch_timeout,
            self.options.features.enable_oci_bundles,
        )
        .with_registry(self.loader.registry().clone());
        let resolved = Resolver::new(&resources, &bundles).resolve(cancel).await?;
        info!("Resolved {}", resolved.kind_name());

        let prepared = prepare(&resolved)?;

        self.validate(&resources.run, &prepared)?;
        info!("Validation passed");

        let dag = match &resolved {
            ResolvedRun::Pipeline { run, pipeline } => {
                let dag = TaskGraph::build(pipeline, &run.spec.workspaces)?;
                info!("Execution order: {}", dag.order_names().join(", "));
                Some(dag)
            }
            ResolvedRun::Task { .. } => None,
        };

        Ok(Checked {
            resources,
            resolved,
            prepared,
            dag,
        })
    }

    /// Run every stage and return the build graph
    pub async fn compile(
        &self,
        main: &str,
        context: &[String],
        cancel: &CancellationToken,
    ) -> TekgraphResult<Lowered> {
        let checked = self.check(main, context, cancel).await?;
        self.lower(&checked)
    }

    /// Lower an already checked run
    pub fn lower(&self, checked: &Checked) -> TekgraphResult<Lowered> {
        let ctx = LowerContext {
            resources: &checked.resources,
            options: &self.options,
        };
        match (&checked.prepared, &checked.dag) {
            (PreparedRun::Task(task), _) => lower_task_run(task, ctx),
            (PreparedRun::Pipeline(pipeline), Some(dag)) => lower_pipeline_run(pipeline, dag, ctx),
            (PreparedRun::Pipeline(_), None) => Err(TekgraphError::invalid(
                "PipelineRun",
                "pipeline has no dependency graph",
            )),
        }
    }

    /// Feature allow-list over the run request and everything it targets
    fn validate(&self, run: &RunRequest, prepared: &PreparedRun) -> TekgraphResult<()> {
        let validator = FeatureValidator::new(&self.options.features);
        match (run, prepared) {
            (RunRequest::Task(tr), PreparedRun::Task(task)) => {
                validator.check_task_run(tr)?;
                validator.check_task(&format!("Task '{}'", task.name), &task.spec)
            }
            (RunRequest::Pipeline(pr), PreparedRun::Pipeline(pipeline)) => {
                validator.check_pipeline_run(pr)?;
                validator.check_pipeline(&format!("Pipeline '{}'", pipeline.name), &pipeline.spec)?;
                for task in &pipeline.tasks {
                    validator.check_task(&format!("task '{}'", task.label()), &task.spec)?;
                }
                Ok(())
            }
            _ => Err(TekgraphError::invalid(
                run.kind_name(),
                "run request does not match its resolved target",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::lower::Op;
    use crate::solver::MemorySolver;
    use std::time::Duration;

    const TASK_RUN: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: TaskRun
metadata:
  name: hello-run
spec:
  params:
    - name: greeting
      value: hi
  taskRef:
    name: hello
"#;

    const HELLO: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: Task
metadata:
  name: hello
spec:
  params:
    - name: greeting
      default: hello
  steps:
    - name: say
      image: alpine
      command: [echo, $(params.greeting), $(context.taskRun.name)]
"#;

    fn context(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_compile_task_run() {
        let lowered = Compiler::new(BuildOptions::default())
            .compile(TASK_RUN, &context(&[HELLO]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(lowered.plan, vec!["hello"]);
        let exec = lowered.root_node().op.as_exec().unwrap();
        assert_eq!(exec.args, vec!["echo", "hi", "hello-run"]);
    }

    #[tokio::test]
    async fn test_ambiguous_run_request() {
        let err = Compiler::new(BuildOptions::default())
            .compile(TASK_RUN, &context(&[TASK_RUN, HELLO]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousRunRequest);
    }

    #[tokio::test]
    async fn test_unsupported_run_field() {
        let run = TASK_RUN.replace("spec:\n", "spec:\n  timeout: 1h\n");
        let err = Compiler::new(BuildOptions::default())
            .compile(&run, &context(&[HELLO]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
    }

    fn embedded_task_run(task_spec: &str) -> String {
        format!(
            "apiVersion: tekton.dev/v1beta1\nkind: TaskRun\nmetadata:\n  name: templated\nspec:\n  taskSpec: {}\n",
            task_spec
        )
    }

    #[tokio::test]
    async fn test_image_from_step_template() {
        let run = embedded_task_run(
            r#"{stepTemplate: {image: alpine, env: [{name: CI, value: "1"}]}, steps: [{name: s, command: ["true"]}]}"#,
        );
        let lowered = Compiler::new(BuildOptions::default())
            .compile(&run, &[], &CancellationToken::new())
            .await
            .unwrap();
        let exec = lowered.root_node().op.as_exec().unwrap();
        assert_eq!(exec.args, vec!["true"]);
        assert_eq!(exec.env, vec!["CI=1"]);
    }

    #[tokio::test]
    async fn test_script_with_template_command() {
        let run = embedded_task_run(
            r#"{stepTemplate: {image: alpine, command: [sh, -c]}, steps: [{name: s, script: "echo hi"}]}"#,
        );
        let err = Compiler::new(BuildOptions::default())
            .compile(&run, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpecification);
    }

    const BUNDLED_PIPELINE_RUN: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: PipelineRun
metadata:
  name: nightly
spec:
  pipelineRef:
    name: nightly
    bundle: registry.local/pipelines:v1
"#;

    const BUNDLED_PIPELINE: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: Pipeline
metadata:
  name: nightly
spec:
  tasks:
    - name: fetch
      taskRef:
        name: fetch
        bundle: registry.local/tasks:v1
    - name: report
      runAfter: [fetch]
      taskRef:
        name: report
        bundle: registry.local/tasks:v1
"#;

    fn bundle_task(name: &str) -> String {
        format!(
            "apiVersion: tekton.dev/v1beta1\nkind: Task\nmetadata:\n  name: {name}\nspec:\n  steps:\n    - name: run\n      image: alpine\n      command: [{name}]\n"
        )
    }

    #[tokio::test]
    async fn test_compile_bundled_pipeline() {
        let solver = MemorySolver::new()
            .with_file("registry.local/pipelines:v1", "nightly", BUNDLED_PIPELINE)
            .with_file("registry.local/tasks:v1", "fetch", bundle_task("fetch"))
            .with_file("registry.local/tasks:v1", "report", bundle_task("report"));
        let options = BuildOptions::parse_pairs(&["enable-tekton-oci-bundles=true"]).unwrap();

        let lowered = Compiler::new(options)
            .with_solver(Arc::new(solver))
            .compile(BUNDLED_PIPELINE_RUN, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(lowered.plan, vec!["fetch", "report"]);
        assert!(matches!(lowered.root_node().op, Op::File { .. }));
    }

    #[tokio::test]
    async fn test_bundles_disabled() {
        let err = Compiler::new(BuildOptions::default())
            .with_solver(Arc::new(MemorySolver::new()))
            .compile(BUNDLED_PIPELINE_RUN, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
    }

    #[tokio::test]
    async fn test_bundle_timeout() {
        let solver = MemorySolver::new()
            .with_file("registry.local/pipelines:v1", "nightly", BUNDLED_PIPELINE)
            .with_delay("registry.local/pipelines:v1", Duration::from_secs(30));
        let options = BuildOptions::parse_pairs(&[
            "enable-tekton-oci-bundles=true",
            "bundle-fetch-timeout=1",
        ])
        .unwrap();

        let err = Compiler::new(options)
            .with_solver(Arc::new(solver))
            .compile(BUNDLED_PIPELINE_RUN, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BundleResolutionError);
    }

    #[tokio::test]
    async fn test_check_pipeline_cycle() {
        let run = r#"
apiVersion: tekton.dev/v1beta1
kind: PipelineRun
metadata:
  name: loop
spec:
  pipelineSpec:
    tasks:
      - name: a
        runAfter: [b]
        taskSpec:
          steps: [{name: s, image: alpine, command: ["true"]}]
      - name: b
        runAfter: [a]
        taskSpec:
          steps: [{name: s, image: alpine, command: ["true"]}]
"#;
        let err = Compiler::new(BuildOptions::default())
            .check(run, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyCycle);
    }
}
