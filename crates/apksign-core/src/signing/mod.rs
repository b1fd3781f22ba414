//! Android package signing.
//!
//! This module provides:
//! - the [`SigningBackend`] and [`ApkVerifier`] traits
//! - a build-tools backend running `apksigner` / `zipalign` as subprocesses
//! - an in-process zip aligner
//! - keystore inspection through `keytool`

pub mod align;
pub mod backend;
pub mod build_tools;
pub mod keystore;
pub mod runner;

pub use align::*;
pub use backend::*;
pub use build_tools::*;
pub use keystore::*;
pub use runner::{ToolOutput, redact, run_tool};
