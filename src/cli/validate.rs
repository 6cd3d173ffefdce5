// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Validate command - check a run without lowering it

use colored::Colorize;

use super::{interrupt_token, InputArgs};
use crate::errors::TekgraphResult;
use crate::substitution::{PreparedRun, PreparedTask};

/// Run the validate command
pub async fn run(input: InputArgs, verbose: bool) -> TekgraphResult<()> {
    println!("{}", "Validating run...".bold());
    println!();

    let inputs = input.read()?;
    println!(
        "  {} Read {} and {} context file(s)",
        "✓".green(),
        inputs.main_path.display(),
        inputs.context.len()
    );

    let cancel = interrupt_token();
    let checked = match inputs
        .compiler
        .check(&inputs.main, &inputs.context, &cancel)
        .await
    {
        Ok(checked) => checked,
        Err(e) => {
            eprintln!("  {} {}", "✗".red(), e.kind().as_str());
            eprintln!();
            return Err(e);
        }
    };

    println!(
        "  {} {} '{}' resolved, substituted and validated",
        "✓".green(),
        checked.resources.run.kind_name(),
        checked.resources.run.name()?
    );

    if verbose {
        println!();
        println!("{}:", "Run summary".bold());
        match &checked.prepared {
            PreparedRun::Task(task) => print_task(task, "  "),
            PreparedRun::Pipeline(pipeline) => {
                println!("  Pipeline: {}", pipeline.name);
                for name in checked.plan() {
                    if let Some(task) = pipeline.task(&name) {
                        let deps = checked
                            .dag
                            .as_ref()
                            .and_then(|dag| dag.dependencies(&name))
                            .unwrap_or_default();
                        let after = if deps.is_empty() {
                            String::new()
                        } else {
                            format!(" [after: {}]", deps.join(", "))
                        };
                        println!("    - {}{}", name, after.dimmed());
                        print_task(task, "      ");
                    }
                }
            }
        }
    }

    println!();
    println!("{}", "Run is valid!".green().bold());
    Ok(())
}

fn print_task(task: &PreparedTask, indent: &str) {
    println!("{}Task: {} ({} steps)", indent, task.name, task.spec.steps.len());
    for step in &task.spec.steps {
        println!("{}  - {} ({})", indent, step.name, step.image.dimmed());
    }
}
