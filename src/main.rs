// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! tekgraph - Tekton run compiler
//!
//! Lower TaskRuns and PipelineRuns into content-addressed build graphs.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tekgraph::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tekgraph=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Dispatch to command handlers
    let result = match cli.command {
        Commands::Lower {
            input,
            format,
            output,
        } => tekgraph::cli::lower::run(input, format, output, cli.verbose).await,
        Commands::Validate { input } => tekgraph::cli::validate::run(input, cli.verbose).await,
        Commands::Plan { input, format } => {
            tekgraph::cli::plan::run(input, format, cli.verbose).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.kind().exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
