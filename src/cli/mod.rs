// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for tekgraph.

pub mod lower;
pub mod plan;
pub mod validate;

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::compiler::Compiler;
use crate::config::BuildOptions;
use crate::errors::{TekgraphError, TekgraphResult};
use crate::solver::DirectorySolver;

/// Tekton run compiler
///
/// Lower TaskRuns and PipelineRuns into content-addressed build graphs.
#[derive(Parser, Debug)]
#[clap(
    name = "tekgraph",
    version,
    about = "Compile Tekton TaskRuns and PipelineRuns into build graphs",
    long_about = None,
    after_help = "Examples:\n\
        tekgraph validate -f run.yaml            Check a run and its context\n\
        tekgraph lower -d ci/ -f pr.yaml         Emit the build graph as JSON\n\
        tekgraph plan -d ci/ --format mermaid    Show the pipeline task order\n\n\
        See 'tekgraph <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lower a run into a build graph
    Lower {
        #[clap(flatten)]
        input: InputArgs,

        /// Output format
        #[clap(long, default_value = "json")]
        format: LowerFormat,

        /// Write the graph to a file instead of stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Load, resolve and validate a run without lowering it
    Validate {
        #[clap(flatten)]
        input: InputArgs,
    },

    /// Show the order tasks will be lowered in
    Plan {
        #[clap(flatten)]
        input: InputArgs,

        /// Output format
        #[clap(long, default_value = "text")]
        format: GraphFormat,
    },
}

/// Where the run and its context come from
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Main document, relative to the context directory
    #[clap(short, long)]
    pub filename: Option<String>,

    /// Context directory; every other *.yaml/*.yml file in it is loaded too
    #[clap(short = 'd', long = "dir", default_value = ".", value_name = "DIR")]
    pub dir: PathBuf,

    /// Build option as key=value (repeatable)
    #[clap(long = "opt", value_name = "KEY=VALUE")]
    pub opts: Vec<String>,

    /// Directory serving bundle images, one sub-directory per image
    #[clap(long, value_name = "DIR")]
    pub bundle_root: Option<PathBuf>,
}

/// Inputs read from disk, ready for the compiler
pub struct Inputs {
    pub main_path: PathBuf,
    pub main: String,
    pub context: Vec<String>,
    pub compiler: Compiler,
}

impl InputArgs {
    /// Parse options and read the main and context files
    pub fn read(&self) -> TekgraphResult<Inputs> {
        let mut options = BuildOptions::parse_pairs(&self.opts)?;
        if let Some(filename) = &self.filename {
            options.filename = filename.clone();
        }

        let main_path = self.dir.join(&options.filename);
        let main = read_file(&main_path)?;

        let mut context = Vec::new();
        for path in context_files(&self.dir, &main_path)? {
            debug!("Context file {}", path.display());
            context.push(read_file(&path)?);
        }

        let mut compiler = Compiler::new(options);
        if let Some(root) = &self.bundle_root {
            compiler = compiler.with_solver(Arc::new(DirectorySolver::new(root)));
        }

        Ok(Inputs {
            main_path,
            main,
            context,
            compiler,
        })
    }
}

fn read_file(path: &Path) -> TekgraphResult<String> {
    std::fs::read_to_string(path).map_err(|e| TekgraphError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// YAML files of `dir` other than the main document, sorted
fn context_files(dir: &Path, main: &Path) -> TekgraphResult<Vec<PathBuf>> {
    let main = std::fs::canonicalize(main)?;
    let mut files = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| TekgraphError::Io {
            message: format!("bad context pattern: {}", e),
        })?;
        for entry in entries {
            let path = entry.map_err(|e| TekgraphError::Io {
                message: e.to_string(),
            })?;
            if path.is_file() && std::fs::canonicalize(&path)? != main {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Cancellation token tripped by Ctrl-C
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

/// Output format for the lower command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerFormat {
    Json,
    Dot,
}

impl std::str::FromStr for LowerFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "dot" => Ok(Self::Dot),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output format for the plan command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_files_skip_main() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["run.yaml", "task.yml", "b.yaml", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let main = dir.path().join("run.yaml");
        let files = context_files(dir.path(), &main).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.yaml", "task.yml"]);
    }

    #[test]
    fn test_formats() {
        assert_eq!("DOT".parse::<LowerFormat>().unwrap(), LowerFormat::Dot);
        assert_eq!("mermaid".parse::<GraphFormat>().unwrap(), GraphFormat::Mermaid);
        assert!("svg".parse::<GraphFormat>().is_err());
    }
}
