//! Backend abstraction for the cryptographic and zip work.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::models::{AlignOptions, SignatureSchemes, SigningCredentials, VerifyReport};

/// Performs the two primitive operations the signing pipeline is built from.
///
/// Implementations can be:
/// - BuildToolsBackend: runs the SDK `apksigner` / `zipalign` commands
/// - NativeAligner-backed alignment inside BuildToolsBackend
/// - test doubles that record calls and fabricate outputs
///
/// Both operations must leave no file at `output` when they fail.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Signs `input` into `output` with the given schemes.
    ///
    /// Credential problems (unreadable keystore, wrong password, unknown
    /// alias) must be reported as [`crate::ApksignError::Credential`].
    async fn sign(
        &self,
        input: &Path,
        output: &Path,
        credentials: &SigningCredentials,
        schemes: SignatureSchemes,
    ) -> Result<()>;

    /// Re-packs `input` into `output` with aligned entry data.
    ///
    /// A malformed archive must be reported as [`crate::ApksignError::Alignment`].
    async fn align(&self, input: &Path, output: &Path, options: &AlignOptions) -> Result<()>;
}

/// Checks the signatures of a signed package.
#[async_trait]
pub trait ApkVerifier: Send + Sync {
    async fn verify(&self, apk: &Path) -> Result<VerifyReport>;
}
