// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const TASK_RUN: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: TaskRun
metadata:
  name: greet-run
spec:
  params:
    - name: who
      value: world
  taskRef:
    name: greet
"#;

const GREET: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: Task
metadata:
  name: greet
spec:
  params:
    - name: who
  steps:
    - name: hello
      image: alpine
      script: echo hello $(params.who)
    - name: bye
      image: alpine
      command: [echo, bye]
"#;

const PIPELINE_RUN: &str = r#"
apiVersion: tekton.dev/v1beta1
kind: PipelineRun
metadata:
  name: ci
spec:
  pipelineSpec:
    tasks:
      - name: test
        runAfter: [build]
        taskSpec:
          steps:
            - name: unit
              image: golang:1.22
              command: [go, test, ./...]
      - name: build
        taskSpec:
          steps:
            - name: compile
              image: golang:1.22
              command: [go, build, ./...]
"#;

fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

fn tekgraph(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("tekgraph").unwrap();
    cmd.args(args).arg("-d").arg(dir).env("RUST_LOG", "off");
    cmd
}

#[test]
fn validate_task_run() {
    let dir = workspace(&[("task.yaml", TASK_RUN), ("greet.yaml", GREET)]);
    tekgraph(dir.path(), &["validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run is valid!"));
}

#[test]
fn lower_task_run_to_json() {
    let dir = workspace(&[("run.yaml", TASK_RUN), ("greet.yml", GREET)]);
    let output = tekgraph(dir.path(), &["lower", "-f", "run.yaml"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["plan"], serde_json::json!(["greet"]));
    let nodes = json["graph"]["nodes"].as_array().unwrap();
    assert!(nodes
        .iter()
        .any(|n| n["reference"] == "docker.io/library/alpine:latest"));
    assert_eq!(nodes.iter().filter(|n| n["op"] == "exec").count(), 2);
}

#[test]
fn lower_to_dot_file() {
    let dir = workspace(&[("task.yaml", TASK_RUN), ("greet.yaml", GREET)]);
    let out = dir.path().join("graph.dot");
    tekgraph(dir.path(), &["lower", "--format", "dot", "-o"])
        .arg(&out)
        .assert()
        .success();
    let dot = std::fs::read_to_string(out).unwrap();
    assert!(dot.starts_with("digraph build {"));
}

#[test]
fn plan_pipeline_as_mermaid() {
    let dir = workspace(&[("pr.yaml", PIPELINE_RUN)]);
    tekgraph(dir.path(), &["plan", "-f", "pr.yaml", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("build --> test"));
}

#[test]
fn plan_pipeline_as_text() {
    let dir = workspace(&[("pr.yaml", PIPELINE_RUN)]);
    tekgraph(dir.path(), &["plan", "-f", "pr.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. build").and(predicate::str::contains("2. test")));
}

#[test]
fn missing_parameter_exit_code() {
    let run = TASK_RUN.replace("  params:\n    - name: who\n      value: world\n", "");
    let dir = workspace(&[("task.yaml", run.as_str()), ("greet.yaml", GREET)]);
    tekgraph(dir.path(), &["lower"])
        .assert()
        .code(15)
        .stderr(predicate::str::contains("who"));
}

#[test]
fn unsupported_field_exit_code() {
    let task = GREET.replace("  steps:\n", "  sidecars:\n    - name: db\n      image: postgres\n  steps:\n");
    let dir = workspace(&[("task.yaml", TASK_RUN), ("greet.yaml", task.as_str())]);
    tekgraph(dir.path(), &["validate"])
        .assert()
        .code(17)
        .stderr(predicate::str::contains("sidecars"));
}

#[test]
fn missing_main_file() {
    let dir = workspace(&[]);
    tekgraph(dir.path(), &["lower", "-f", "nope.yaml"])
        .assert()
        .code(74);
}

#[test]
fn ambiguous_run_request() {
    let dir = workspace(&[("task.yaml", TASK_RUN), ("other.yaml", PIPELINE_RUN), ("greet.yaml", GREET)]);
    tekgraph(dir.path(), &["validate"]).assert().code(10);
}
