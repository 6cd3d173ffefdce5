// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Resource documents and their loading
//!
//! This module defines the Task, Pipeline, run request, Secret and
//! ConfigMap shapes, and the loader that turns YAML streams into a
//! [`ResourceBundle`].

mod definition;
mod loader;

pub use definition::*;
pub use loader::{
    split_documents, DecodeFn, Document, KindEntry, KindRegistry, ResourceBundle, ResourceLoader,
    RunRequest,
};
