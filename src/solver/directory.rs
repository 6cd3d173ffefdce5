// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Solver serving image filesystems from a local directory tree

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{relative_path, SolveRequest, SolvedRef, Solver};
use crate::errors::{TekgraphError, TekgraphResult};

/// Serves `Image` nodes from `<root>/<sanitized reference>/`.
///
/// The directory name is the canonical image reference with `/`, `:` and
/// `@` replaced by `_`, e.g. `registry.local_bundles_build_v1`.
#[derive(Debug, Clone)]
pub struct DirectorySolver {
    root: PathBuf,
}

impl DirectorySolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory that holds the filesystem of `reference`
    pub fn image_dir(&self, reference: &str) -> PathBuf {
        self.root.join(sanitize(reference))
    }
}

fn sanitize(reference: &str) -> String {
    reference
        .chars()
        .map(|c| match c {
            '/' | ':' | '@' => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl Solver for DirectorySolver {
    async fn solve(&self, request: SolveRequest) -> TekgraphResult<Box<dyn SolvedRef>> {
        let reference = request.root_image()?;
        let dir = self.image_dir(reference);
        debug!("Serving {} from {}", reference, dir.display());

        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(TekgraphError::Io {
                message: format!("image {} not found under {}", reference, self.root.display()),
            });
        }
        Ok(Box::new(DirectoryRef { dir }))
    }
}

struct DirectoryRef {
    dir: PathBuf,
}

#[async_trait]
impl SolvedRef for DirectoryRef {
    async fn read_file(&self, path: &str) -> TekgraphResult<Vec<u8>> {
        let rel = relative_path(path).ok_or_else(|| TekgraphError::Io {
            message: format!("invalid path '{}'", path),
        })?;
        let full: PathBuf = Path::new(&self.dir).join(rel);
        tokio::fs::read(&full)
            .await
            .map_err(|e| TekgraphError::FileReadError {
                path: full,
                error: e.to_string(),
            })
    }
}
