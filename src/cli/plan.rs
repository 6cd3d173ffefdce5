// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Plan command - show the order tasks will be lowered in

use super::{interrupt_token, GraphFormat, InputArgs};
use crate::errors::TekgraphResult;
use crate::substitution::{PreparedRun, PreparedTask};

/// Run the plan command
pub async fn run(input: InputArgs, format: GraphFormat, _verbose: bool) -> TekgraphResult<()> {
    let inputs = input.read()?;
    let cancel = interrupt_token();
    let checked = inputs
        .compiler
        .check(&inputs.main, &inputs.context, &cancel)
        .await?;

    let output = match (&checked.prepared, &checked.dag) {
        (PreparedRun::Pipeline(_), Some(dag)) => match format {
            GraphFormat::Text => dag.to_text(),
            GraphFormat::Dot => dag.to_dot(),
            GraphFormat::Mermaid => dag.to_mermaid(),
        },
        (PreparedRun::Task(task), _) => step_plan(task, format),
        (PreparedRun::Pipeline(_), None) => checked.plan().join("\n"),
    };

    println!("{}", output);
    Ok(())
}

/// A TaskRun's plan is its chain of steps
fn step_plan(task: &PreparedTask, format: GraphFormat) -> String {
    let steps: Vec<&str> = task.spec.steps.iter().map(|s| s.name.as_str()).collect();
    match format {
        GraphFormat::Text => steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {} (task: {})\n", i + 1, s, task.name))
            .collect(),
        GraphFormat::Mermaid => {
            let mut out = String::from("graph TD\n");
            for (i, s) in steps.iter().enumerate() {
                out.push_str(&format!("    step{}[{}]\n", i, s));
            }
            for i in 1..steps.len() {
                out.push_str(&format!("    step{} --> step{}\n", i - 1, i));
            }
            out
        }
        GraphFormat::Dot => {
            let mut out = String::from("digraph task {\n    rankdir=TB;\n    node [shape=box, style=rounded];\n\n");
            for s in &steps {
                out.push_str(&format!("    \"{}\";\n", s));
            }
            for pair in steps.windows(2) {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", pair[0], pair[1]));
            }
            out.push_str("}\n");
            out
        }
    }
}
