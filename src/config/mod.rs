// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads mooring.yaml, resolves variable interpolation, validates values,
// and computes a deterministic config hash for startup logs.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use defaults::{default_config, ECHO_MODEL_ID};
pub use error::ConfigError;
pub use loader::{compute_hash, load_config, load_or_default};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;
