//! apksign core library
//!
//! Signs Android packages in three stages (V1 sign, zip align, V1+V2+V3
//! sign) on top of the SDK build-tools or the in-process aligner.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod signing;

pub use error::{ApksignError, ErrorKind, Result};
pub use pipeline::{PipelineEvent, PipelineOptions, SignRequest, SigningPipeline, sign_apk};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
