// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! In-memory solver

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::{relative_path, SolveRequest, SolvedRef, Solver};
use crate::errors::{TekgraphError, TekgraphResult};

type Files = BTreeMap<String, Vec<u8>>;

/// Serves image filesystems from a table, with an optional per-image delay
#[derive(Debug, Clone, Default)]
pub struct MemorySolver {
    images: HashMap<String, Arc<Files>>,
    delays: HashMap<String, Duration>,
}

impl MemorySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the filesystem of `reference`
    pub fn with_file(mut self, reference: &str, path: &str, data: impl Into<Vec<u8>>) -> Self {
        let files = self.images.entry(reference.to_string()).or_default();
        Arc::make_mut(files).insert(normalize(path), data.into());
        self
    }

    /// Make solving `reference` take at least `delay`
    pub fn with_delay(mut self, reference: &str, delay: Duration) -> Self {
        self.delays.insert(reference.to_string(), delay);
        self
    }
}

fn normalize(path: &str) -> String {
    relative_path(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Solver for MemorySolver {
    async fn solve(&self, request: SolveRequest) -> TekgraphResult<Box<dyn SolvedRef>> {
        let reference = request.root_image()?;
        if let Some(delay) = self.delays.get(reference) {
            tokio::time::sleep(*delay).await;
        }
        let files = self.images.get(reference).cloned().ok_or_else(|| TekgraphError::Io {
            message: format!("image {} not found", reference),
        })?;
        Ok(Box::new(MemoryRef { files }))
    }
}

struct MemoryRef {
    files: Arc<Files>,
}

#[async_trait]
impl SolvedRef for MemoryRef {
    async fn read_file(&self, path: &str) -> TekgraphResult<Vec<u8>> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| TekgraphError::Io {
            message: format!("{}: no such file", path),
        })
    }
}
