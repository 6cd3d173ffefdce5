// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Bundle resolution
//!
//! A bundle is an image whose filesystem holds definition files named
//! after the definition. Fetching one means asking the solver to load the
//! image and reading the file back. Independent fetches run concurrently;
//! the first failure cancels the rest.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{TekgraphError, TekgraphResult};
use crate::lower::{image, BuildGraph};
use crate::resources::{Document, KindRegistry};
use crate::solver::{SolveRequest, Solver};

/// Image plus definition name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BundleCoordinate {
    pub image: String,
    pub name: String,
}

impl BundleCoordinate {
    pub fn new(image: &str, name: &str) -> Self {
        Self {
            image: image.to_string(),
            name: name.to_string(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> TekgraphError {
        TekgraphError::bundle(&self.image, &self.name, reason)
    }
}

impl std::fmt::Display for BundleCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.image)
    }
}

/// Fetches definitions from bundle images through a [`Solver`]
#[derive(Clone)]
pub struct BundleResolver {
    solver: Option<Arc<dyn Solver>>,
    registry: KindRegistry,
    timeout: Duration,
    enabled: bool,
}

impl BundleResolver {
    pub fn new(solver: Option<Arc<dyn Solver>>, timeout: Duration, enabled: bool) -> Self {
        Self {
            solver,
            registry: KindRegistry::standard(),
            timeout,
            enabled,
        }
    }

    /// A resolver that refuses every bundle reference
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(60), false)
    }

    pub fn with_registry(mut self, registry: KindRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Fetch every coordinate concurrently, expecting documents of `kind`
    pub async fn fetch_all(
        &self,
        coords: BTreeSet<BundleCoordinate>,
        kind: &str,
        cancel: &CancellationToken,
    ) -> TekgraphResult<BTreeMap<BundleCoordinate, Document>> {
        let mut fetched = BTreeMap::new();
        let Some(first) = coords.first() else {
            return Ok(fetched);
        };
        let Some(solver) = self.solver.as_deref() else {
            return Err(first.error("no solver configured for bundle resolution"));
        };

        info!("Resolving {} {} bundle reference(s)", coords.len(), kind);
        let token = cancel.child_token();
        let mut in_flight = FuturesUnordered::new();

        for coord in coords {
            let token = token.clone();
            in_flight.push(async move {
                let result = tokio::select! {
                    _ = token.cancelled() => Err(coord.error("cancelled")),
                    outcome = tokio::time::timeout(self.timeout, self.fetch_one(solver, &coord)) => {
                        outcome.unwrap_or_else(|_| {
                            Err(coord.error(format!("timed out after {}s", self.timeout.as_secs())))
                        })
                    }
                };
                (coord, result)
            });
        }

        while let Some((coord, result)) = in_flight.next().await {
            let checked = result.and_then(|doc| {
                if doc.kind_name() == kind {
                    Ok(doc)
                } else {
                    Err(coord.error(format!("expected a {}, found a {}", kind, doc.kind_name())))
                }
            });
            match checked {
                Ok(doc) => {
                    debug!("Fetched {}", coord);
                    fetched.insert(coord, doc);
                }
                Err(e) => {
                    token.cancel();
                    return Err(e);
                }
            }
        }

        Ok(fetched)
    }

    async fn fetch_one(&self, solver: &dyn Solver, coord: &BundleCoordinate) -> TekgraphResult<Document> {
        let reference = image::canonicalize(&coord.image).map_err(|e| coord.error(e.to_string()))?;

        let mut graph = BuildGraph::new();
        let root = graph.image(&reference);
        let solved = solver
            .solve(SolveRequest::new(graph, root))
            .await
            .map_err(|e| coord.error(format!("loading image: {}", e)))?;

        let bytes = solved
            .read_file(&coord.name)
            .await
            .map_err(|e| coord.error(format!("reading '{}': {}", coord.name, e)))?;
        let text = String::from_utf8(bytes).map_err(|_| coord.error("file is not UTF-8"))?;

        self.registry
            .decode_single(&text, &coord.to_string())
            .map_err(|e| coord.error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::solver::MemorySolver;

    const IMAGE: &str = "registry.local/bundles/build:v1";
    const TASK: &str = "apiVersion: tekton.dev/v1beta1\nkind: Task\nmetadata:\n  name: build\nspec:\n  steps: []\n";

    fn resolver(solver: MemorySolver, timeout: Duration) -> BundleResolver {
        BundleResolver::new(Some(Arc::new(solver)), timeout, true)
    }

    fn coords(items: &[(&str, &str)]) -> BTreeSet<BundleCoordinate> {
        items.iter().map(|(i, n)| BundleCoordinate::new(i, n)).collect()
    }

    #[tokio::test]
    async fn test_fetch_task() {
        let solver = MemorySolver::new().with_file(IMAGE, "build", TASK);
        let fetched = resolver(solver, Duration::from_secs(5))
            .fetch_all(coords(&[(IMAGE, "build")]), "Task", &CancellationToken::new())
            .await
            .unwrap();
        let doc = &fetched[&BundleCoordinate::new(IMAGE, "build")];
        assert!(matches!(doc, Document::Task(t) if t.metadata.name == "build"));
    }

    #[tokio::test]
    async fn test_fetch_failures() {
        let solver = MemorySolver::new()
            .with_file(IMAGE, "build", TASK)
            .with_file(IMAGE, "garbage", "::: not yaml")
            .with_file(IMAGE, "pipe", "apiVersion: tekton.dev/v1beta1\nkind: Pipeline");
        let r = resolver(solver, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        for (image, name) in [
            ("registry.local/missing:v1", "build"),
            (IMAGE, "absent"),
            (IMAGE, "garbage"),
            (IMAGE, "pipe"),
        ] {
            let err = r
                .fetch_all(coords(&[(image, name)]), "Task", &cancel)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BundleResolutionError, "{} {}", image, name);
        }
    }

    #[tokio::test]
    async fn test_first_failure_wins_over_slow_sibling() {
        let slow = "registry.local/slow:v1";
        let solver = MemorySolver::new()
            .with_file(slow, "build", TASK)
            .with_delay(slow, Duration::from_secs(30));
        let r = resolver(solver, Duration::from_secs(60));

        let started = std::time::Instant::now();
        let err = r
            .fetch_all(
                coords(&[(slow, "build"), ("registry.local/missing:v1", "build")]),
                "Task",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout() {
        let solver = MemorySolver::new()
            .with_file(IMAGE, "build", TASK)
            .with_delay(IMAGE, Duration::from_secs(30));
        let err = resolver(solver, Duration::from_millis(50))
            .fetch_all(coords(&[(IMAGE, "build")]), "Task", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_by_caller() {
        let solver = MemorySolver::new()
            .with_file(IMAGE, "build", TASK)
            .with_delay(IMAGE, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver(solver, Duration::from_secs(60))
            .fetch_all(coords(&[(IMAGE, "build")]), "Task", &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_no_solver() {
        let r = BundleResolver::new(None, Duration::from_secs(1), true);
        let err = r
            .fetch_all(coords(&[(IMAGE, "build")]), "Task", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BundleResolutionError);
    }
}
