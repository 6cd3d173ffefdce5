// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Variable substitution
//!
//! Rewrites the string fields of a resolved Task in four passes, always in
//! this order: params, context, workspaces, results. Pipelines first
//! substitute their own params and context into each pipeline task's
//! params, which then bind the task's params.
//!
//! The output of this module is a [`PreparedRun`]: every task with its
//! substituted spec and concrete workspace bindings, structurally checked.

mod context;
mod placeholder;

pub use context::{PipelineContext, RunIdentity, TaskContext};
pub use placeholder::{
    find_unresolved, normalize_key, rewrite_task_results, task_result_refs, Replacements,
};

use tracing::{debug, info};

use crate::errors::{TekgraphError, TekgraphResult};
use crate::lower::{FROM_TASK_DIR, RESULTS_DIR, STEPS_DIR};
use crate::resolve::{ResolvedPipeline, ResolvedRun, ResolvedTask};
use crate::resources::{
    Param, ParamSpec, ParamValue, PipelineRun, PipelineSpec, PipelineTask, Step, TaskRun,
    TaskSpec, WorkspaceBinding,
};
use crate::validation::{check_pipeline, check_task, step_fields};

/// A workspace binding as a task sees it
#[derive(Debug, Clone, PartialEq)]
pub struct BoundWorkspace {
    /// Workspace name declared by the task
    pub name: String,
    pub binding: WorkspaceBinding,
    /// Cache scope shared by everything bound to the same volume
    pub volume: String,
}

/// A task ready for lowering
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTask {
    /// Canonical task name
    pub name: String,
    /// Pipeline task name, when part of a pipeline
    pub pipeline_task: Option<String>,
    pub context: TaskContext,
    pub spec: TaskSpec,
    pub workspaces: Vec<BoundWorkspace>,
}

impl PreparedTask {
    /// Name used in labels: the pipeline task name or the canonical name
    pub fn label(&self) -> &str {
        self.pipeline_task.as_deref().unwrap_or(&self.name)
    }

    pub fn workspace(&self, name: &str) -> Option<&BoundWorkspace> {
        self.workspaces.iter().find(|w| w.name == name)
    }
}

/// A pipeline ready for dependency analysis and lowering
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPipeline {
    /// Canonical pipeline name
    pub name: String,
    pub run: RunIdentity,
    /// Pipeline spec with pipeline task params substituted
    pub spec: PipelineSpec,
    /// One entry per `spec.tasks`, same order
    pub tasks: Vec<PreparedTask>,
}

impl PreparedPipeline {
    pub fn task(&self, name: &str) -> Option<&PreparedTask> {
        self.tasks
            .iter()
            .find(|t| t.pipeline_task.as_deref() == Some(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreparedRun {
    Task(PreparedTask),
    Pipeline(PreparedPipeline),
}

/// Substitute and structurally check a resolved run
pub fn prepare(resolved: &ResolvedRun) -> TekgraphResult<PreparedRun> {
    let prepared = match resolved {
        ResolvedRun::Task { run, task } => PreparedRun::Task(prepare_task_run(run, task)?),
        ResolvedRun::Pipeline { run, pipeline } => {
            PreparedRun::Pipeline(prepare_pipeline_run(run, pipeline)?)
        }
    };
    info!("Substitution complete");
    Ok(prepared)
}

fn run_name(kind: &str, meta: &crate::resources::ObjectMeta) -> TekgraphResult<String> {
    meta.run_name().ok_or_else(|| {
        TekgraphError::invalid(kind, "metadata.name or metadata.generateName is required")
    })
}

/// Prepare the Task targeted by a TaskRun
pub fn prepare_task_run(run: &TaskRun, task: &ResolvedTask) -> TekgraphResult<PreparedTask> {
    let name = run_name("TaskRun", &run.metadata)?;
    let workspaces = run
        .spec
        .workspaces
        .iter()
        .map(|b| BoundWorkspace {
            name: b.name.clone(),
            binding: b.clone(),
            volume: format!("{}/{}", name, b.name),
        })
        .collect();
    let context = TaskContext {
        task_run: RunIdentity::from_meta("TaskRun", &name, &run.metadata),
        task_name: task.name.clone(),
        pipeline: None,
    };
    substitute_task(
        &format!("Task '{}'", task.name),
        task,
        &run.spec.params,
        workspaces,
        context,
        None,
    )
}

/// Prepare every task of the Pipeline targeted by a PipelineRun
pub fn prepare_pipeline_run(
    run: &PipelineRun,
    pipeline: &ResolvedPipeline,
) -> TekgraphResult<PreparedPipeline> {
    let name = run_name("PipelineRun", &run.metadata)?;
    let identity = RunIdentity::from_meta("PipelineRun", &name, &run.metadata);
    let owner = format!("Pipeline '{}'", pipeline.name);

    check_pipeline(&owner, &pipeline.spec, &run.spec.workspaces)?;

    let pipeline_ctx = PipelineContext {
        pipeline_run: identity.clone(),
        pipeline_name: pipeline.name.clone(),
    };
    let passes = [
        param_replacements(&owner, &pipeline.spec.params, &run.spec.params)?,
        pipeline_ctx.replacements(),
    ];

    let mut spec = pipeline.spec.clone();
    let mut tasks = Vec::with_capacity(spec.tasks.len());

    for (pt, resolved) in spec.tasks.iter_mut().zip(&pipeline.tasks) {
        for param in &mut pt.params {
            param.value = substitute_value(&param.value, &passes);
        }

        let context = TaskContext {
            task_run: RunIdentity::new(
                "TaskRun",
                &format!("{}-{}", name, pt.name),
                Some(identity.namespace.as_str()),
            ),
            task_name: resolved.name.clone(),
            pipeline: Some(pipeline_ctx.clone()),
        };
        let workspaces = pipeline_task_workspaces(&name, pt, &run.spec.workspaces);
        tasks.push(substitute_task(
            &format!("pipeline task '{}'", pt.name),
            resolved,
            &pt.params,
            workspaces,
            context,
            Some(pt.name.as_str()),
        )?);
    }

    Ok(PreparedPipeline {
        name: pipeline.name.clone(),
        run: identity,
        spec,
        tasks,
    })
}

/// Map a pipeline task's workspaces onto the run's bindings
fn pipeline_task_workspaces(
    run_name: &str,
    pt: &PipelineTask,
    bindings: &[WorkspaceBinding],
) -> Vec<BoundWorkspace> {
    pt.workspaces
        .iter()
        .filter_map(|ws| {
            let pipeline_ws = ws.pipeline_workspace();
            let Some(run_binding) = bindings.iter().find(|b| b.name == pipeline_ws) else {
                debug!("Pipeline workspace '{}' is unbound, skipping for '{}'", pipeline_ws, pt.name);
                return None;
            };
            let mut binding = run_binding.clone();
            binding.name = ws.name.clone();
            binding.sub_path = join_sub_path(&run_binding.sub_path, &ws.sub_path);
            Some(BoundWorkspace {
                name: ws.name.clone(),
                binding,
                volume: format!("{}/{}", run_name, pipeline_ws),
            })
        })
        .collect()
}

fn join_sub_path(outer: &str, inner: &str) -> String {
    match (outer.trim_matches('/'), inner.trim_matches('/')) {
        ("", inner) => inner.to_string(),
        (outer, "") => outer.to_string(),
        (outer, inner) => format!("{}/{}", outer, inner),
    }
}

/// Run the four passes over one task
fn substitute_task(
    owner: &str,
    task: &ResolvedTask,
    params: &[Param],
    workspaces: Vec<BoundWorkspace>,
    context: TaskContext,
    pipeline_task: Option<&str>,
) -> TekgraphResult<PreparedTask> {
    let mut spec = task.spec.clone();

    let params = param_replacements(owner, &spec.params, params)?;
    rewrite_spec(&mut spec, &params);

    rewrite_spec(&mut spec, &context.replacements());

    let workspace_values = workspace_replacements(&spec, &workspaces);
    rewrite_spec(&mut spec, &workspace_values);

    let result_values = result_replacements(&spec);
    rewrite_spec(&mut spec, &result_values);

    if pipeline_task.is_some() {
        rewrite_result_refs(owner, &mut spec)?;
    }

    check_task(owner, &spec, &workspaces)?;
    debug!("{}: substituted {} step(s)", owner, spec.steps.len());

    Ok(PreparedTask {
        name: task.name.clone(),
        pipeline_task: pipeline_task.map(String::from),
        context,
        spec,
        workspaces,
    })
}

/// Bound values, falling back to declared defaults
fn param_replacements(
    owner: &str,
    declared: &[ParamSpec],
    bound: &[Param],
) -> TekgraphResult<Replacements> {
    let mut r = Replacements::new();

    for decl in declared {
        let value = bound
            .iter()
            .find(|p| p.name == decl.name)
            .map(|p| &p.value)
            .or(decl.default.as_ref())
            .ok_or_else(|| TekgraphError::UnresolvedParameter {
                owner: owner.to_string(),
                param: decl.name.clone(),
            })?;

        if let Some(expected) = decl.param_type {
            if value.param_type() != expected {
                return Err(TekgraphError::invalid(
                    owner,
                    format!(
                        "param '{}' expects {}, got {}",
                        decl.name,
                        expected,
                        value.param_type()
                    ),
                ));
            }
        }

        let key = format!("params.{}", decl.name);
        match value {
            ParamValue::String(s) => r.insert(key, s.clone()),
            ParamValue::Array(items) => r.insert_array(key, items.clone()),
            ParamValue::Object(map) => {
                for (k, v) in map {
                    r.insert(format!("{}.{}", key, k), v.clone());
                }
            }
        }
    }

    for param in bound {
        if !declared.iter().any(|d| d.name == param.name) {
            debug!("{}: ignoring undeclared param '{}'", owner, param.name);
        }
    }

    Ok(r)
}

fn workspace_replacements(spec: &TaskSpec, workspaces: &[BoundWorkspace]) -> Replacements {
    let mut r = Replacements::new();
    for decl in &spec.workspaces {
        let key = format!("workspaces.{}", decl.name);
        let bound = workspaces.iter().find(|w| w.name == decl.name);
        let path = match bound {
            Some(_) => decl.path(),
            None if decl.optional => String::new(),
            None => decl.path(),
        };
        r.insert(format!("{}.path", key), path);
        r.insert(format!("{}.bound", key), bound.is_some().to_string());
        r.insert(
            format!("{}.claim", key),
            bound.map(|w| w.binding.claim_name()).unwrap_or_default(),
        );
        r.insert(
            format!("{}.volume", key),
            bound.map(|w| w.binding.name.as_str()).unwrap_or_default(),
        );
    }
    r
}

fn result_replacements(spec: &TaskSpec) -> Replacements {
    let mut r = Replacements::new();
    for result in &spec.results {
        r.insert(
            format!("results.{}.path", result.name),
            format!("{}/{}", RESULTS_DIR, result.name),
        );
    }
    for step in &spec.steps {
        let exit_code = format!("{}/step-{}/exitCode", STEPS_DIR, step.name);
        r.insert(format!("steps.step-{}.exitCode.path", step.name), exit_code.clone());
        r.insert(format!("steps.{}.exitCode.path", step.name), exit_code);
    }
    r
}

/// `$(tasks.<t>.results.<r>)` becomes a file read in scripts only
fn rewrite_result_refs(owner: &str, spec: &mut TaskSpec) -> TekgraphResult<()> {
    for (i, step) in spec.steps.iter_mut().enumerate() {
        step.script = rewrite_task_results(&step.script, FROM_TASK_DIR);
        for (field, text) in step_fields(step) {
            if !task_result_refs(text).is_empty() {
                return Err(TekgraphError::unsupported(
                    format!("{}, step {}", owner, i),
                    format!("task result reference in {}", field),
                ));
            }
        }
    }
    Ok(())
}

fn substitute_value(value: &ParamValue, passes: &[Replacements]) -> ParamValue {
    match value {
        ParamValue::String(s) => {
            ParamValue::String(passes.iter().fold(s.clone(), |acc, r| r.apply(&acc)))
        }
        ParamValue::Array(items) => {
            ParamValue::Array(passes.iter().fold(items.clone(), |acc, r| r.apply_list(&acc)))
        }
        ParamValue::Object(map) => ParamValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), passes.iter().fold(v.clone(), |acc, r| r.apply(&acc))))
                .collect(),
        ),
    }
}

fn rewrite_spec(spec: &mut TaskSpec, r: &Replacements) {
    if r.is_empty() {
        return;
    }
    for ws in &mut spec.workspaces {
        ws.mount_path = r.apply(&ws.mount_path);
    }
    if let Some(template) = &mut spec.step_template {
        rewrite_step(template, r);
    }
    for step in &mut spec.steps {
        rewrite_step(step, r);
    }
}

fn rewrite_step(step: &mut Step, r: &Replacements) {
    step.image = r.apply(&step.image);
    step.command = r.apply_list(&step.command);
    step.args = r.apply_list(&step.args);
    step.script = r.apply(&step.script);
    step.working_dir = r.apply(&step.working_dir);
    for var in &mut step.env {
        var.value = r.apply(&var.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::resolve::apply_task_defaults;

    fn resolved(yaml: &str) -> ResolvedTask {
        let mut spec: TaskSpec = serde_yaml::from_str(yaml).unwrap();
        apply_task_defaults(&mut spec);
        ResolvedTask {
            name: "build".into(),
            spec,
        }
    }

    fn task_run(yaml: &str) -> TaskRun {
        serde_yaml::from_str(yaml).unwrap()
    }

    const TASK: &str = r#"
params:
  - name: target
  - name: flags
    type: array
    default: ["-v"]
  - name: image
    default: golang
  - name: opts
    type: object
    default: {mode: fast}
workspaces:
  - name: source
results:
  - name: digest
steps:
  - name: compile
    image: $(params.image)
    command: [go, build, "$(params.flags[*])", "$(params['target'])"]
    workingDir: $(workspaces.source.path)
    env:
      - name: RUN
        value: $(context.taskRun.name)-$(context.task.name)
      - name: MODE
        value: $(params.opts.mode)
  - name: report
    image: alpine
    script: |
      cat $(steps.step-compile.exitCode.path)
      echo done > $(results.digest.path)
      echo $(workspaces.source.bound) $(workspaces.source.claim)
"#;

    const RUN: &str = r#"
metadata:
  name: run-1
spec:
  params:
    - name: target
      value: ./cmd/app
    - name: unused
      value: x
  workspaces:
    - name: source
      persistentVolumeClaim:
        claimName: src-pvc
"#;

    #[test]
    fn test_task_run_substitution() {
        let prepared = prepare_task_run(&task_run(RUN), &resolved(TASK)).unwrap();
        let compile = &prepared.spec.steps[0];
        assert_eq!(compile.image, "golang");
        assert_eq!(compile.command, vec!["go", "build", "-v", "./cmd/app"]);
        assert_eq!(compile.working_dir, "/workspace/source");
        assert_eq!(compile.env[0].value, "run-1-build");
        assert_eq!(compile.env[1].value, "fast");

        let script = &prepared.spec.steps[1].script;
        assert!(script.contains("cat /tekton/steps/step-compile/exitCode"));
        assert!(script.contains("echo done > /tekton/results/digest"));
        assert!(script.contains("echo true src-pvc"));

        assert_eq!(prepared.workspaces[0].volume, "run-1/source");
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let first = prepare_task_run(&task_run(RUN), &resolved(TASK)).unwrap();
        let again = ResolvedTask {
            name: first.name.clone(),
            spec: first.spec.clone(),
        };
        let second = prepare_task_run(&task_run(RUN), &again).unwrap();
        assert_eq!(first.spec, second.spec);
    }

    #[test]
    fn test_missing_param() {
        let run = task_run("metadata: {name: r}\nspec:\n  workspaces:\n    - {name: source, emptyDir: {}}");
        let err = prepare_task_run(&run, &resolved(TASK)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedParameter);
        assert!(err.to_string().contains("'target'"));
    }

    #[test]
    fn test_param_type_mismatch() {
        let run = task_run(
            "metadata: {name: r}\nspec:\n  params:\n    - {name: target, value: [a, b]}\n  workspaces:\n    - {name: source, emptyDir: {}}",
        );
        let err = prepare_task_run(&run, &resolved(TASK)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpecification);
    }

    #[test]
    fn test_unresolved_placeholder_is_structural_error() {
        let task = resolved("steps:\n  - {image: alpine, args: [\"$(params.ghost)\"]}");
        let err = prepare_task_run(&task_run("metadata: {name: r}"), &task).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpecification);
    }

    #[test]
    fn test_optional_unbound_workspace() {
        let task = resolved(
            "workspaces: [{name: cache, optional: true}]\nsteps:\n  - {image: alpine, script: \"echo [$(workspaces.cache.path)] $(workspaces.cache.bound)\"}",
        );
        let prepared = prepare_task_run(&task_run("metadata: {name: r}"), &task).unwrap();
        assert_eq!(prepared.spec.steps[0].script, "echo [] false");
    }

    fn pipeline(yaml: &str, tasks: &[(&str, &str)]) -> ResolvedPipeline {
        let spec: PipelineSpec = serde_yaml::from_str(yaml).unwrap();
        let tasks = tasks
            .iter()
            .map(|(name, task)| {
                let mut r = resolved(task);
                r.name = name.to_string();
                r
            })
            .collect();
        ResolvedPipeline {
            name: "embedded".into(),
            spec,
            tasks,
        }
    }

    const SHOW: &str = r#"
params:
  - name: msg
workspaces:
  - name: src
steps:
  - name: show
    image: alpine
    script: echo "$(params.msg)" in $(workspaces.src.path)
"#;

    #[test]
    fn test_pipeline_substitution() {
        let pipeline = pipeline(
            r#"
params:
  - name: greeting
    default: hello
workspaces:
  - name: shared
tasks:
  - name: first
    taskRef: {name: show}
    params:
      - name: msg
        value: $(params.greeting) from $(context.pipelineRun.name)
    workspaces:
      - name: src
        workspace: shared
        subPath: first
  - name: second
    taskRef: {name: show}
    runAfter: [first]
    params:
      - name: msg
        value: $(tasks.first.results.out)
    workspaces:
      - name: src
        workspace: shared
"#,
            &[("show", SHOW), ("show", SHOW)],
        );
        let run: PipelineRun = serde_yaml::from_str(
            "metadata: {name: pr}\nspec:\n  workspaces:\n    - {name: shared, subPath: root, volumeClaimTemplate: {}}",
        )
        .unwrap();

        let prepared = prepare_pipeline_run(&run, &pipeline).unwrap();
        let first = prepared.task("first").unwrap();
        assert_eq!(first.spec.steps[0].script, "echo \"hello from pr\" in /workspace/src");
        assert_eq!(first.workspaces[0].volume, "pr/shared");
        assert_eq!(first.workspaces[0].binding.sub_path, "root/first");
        assert_eq!(first.context.task_run.name, "pr-first");

        let second = prepared.task("second").unwrap();
        assert_eq!(
            second.spec.steps[0].script,
            "echo \"$(cat /tekton/from-task/first/out)\" in /workspace/src"
        );
    }

    #[test]
    fn test_task_result_ref_outside_script() {
        let pipeline = pipeline(
            "tasks:\n  - name: a\n    taskRef: {name: t}\n  - name: b\n    taskRef: {name: t}\n    params:\n      - {name: msg, value: $(tasks.a.results.x)}",
            &[
                ("t", "params: [{name: msg, default: x}]\nsteps:\n  - {image: alpine, args: [\"$(params.msg)\"]}"),
                ("t", "params: [{name: msg, default: x}]\nsteps:\n  - {image: alpine, args: [\"$(params.msg)\"]}"),
            ],
        );
        let run: PipelineRun = serde_yaml::from_str("metadata: {name: pr}").unwrap();
        let err = prepare_pipeline_run(&run, &pipeline).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
        assert!(err.to_string().contains("pipeline task 'b', step 0"));
    }
}
