// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! Validation
//!
//! Structural checks run right after substitution; the feature allow-list
//! runs once the whole run has been prepared.

pub mod features;
pub mod structure;

pub use features::FeatureValidator;
pub use structure::{check_pipeline, check_task, step_fields};
