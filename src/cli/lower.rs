// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Lower command - emit the build graph

use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use super::{interrupt_token, InputArgs, LowerFormat};
use crate::errors::TekgraphResult;

/// Run the lower command
pub async fn run(
    input: InputArgs,
    format: LowerFormat,
    output: Option<PathBuf>,
    verbose: bool,
) -> TekgraphResult<()> {
    let inputs = input.read()?;
    let cancel = interrupt_token();

    let lowered = inputs
        .compiler
        .compile(&inputs.main, &inputs.context, &cancel)
        .await?;

    let rendered = match format {
        LowerFormat::Json => lowered.to_json()?,
        LowerFormat::Dot => lowered.to_dot(),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered)?;
            info!("Wrote {} nodes to {}", lowered.graph.len(), path.display());
        }
        None => println!("{}", rendered),
    }

    if verbose {
        eprintln!(
            "{} {} nodes, root {} ({})",
            "✓".green(),
            lowered.graph.len(),
            lowered.root,
            lowered.root_node().label.dimmed()
        );
    }

    Ok(())
}
