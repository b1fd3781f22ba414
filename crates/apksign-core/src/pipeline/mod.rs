//! The three-stage signing pipeline.
//!
//! An unsigned package goes through V1 signing, zip alignment and V1+V2+V3
//! signing. Each stage consumes the previous stage's intermediate and deletes
//! it once its own output is written. The final output only appears through
//! a rename from a temp file in the destination directory.

pub mod paths;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;

use crate::error::{ApksignError, ErrorKind, Result};
use crate::models::{
    AlignOptions, RunToken, SidecarPolicy, SignReport, SignatureSchemes, SigningCredentials, Stage,
    StageTiming,
};
use crate::signing::{BuildToolsBackend, SigningBackend};

pub use paths::WorkPaths;

/// Input of one signing run.
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// Unsigned package. Never modified.
    pub unsigned: PathBuf,
    /// Where the signed package is written.
    pub signed: PathBuf,
    pub credentials: SigningCredentials,
}

impl SignRequest {
    pub fn new(
        unsigned: impl Into<PathBuf>,
        signed: impl Into<PathBuf>,
        credentials: SigningCredentials,
    ) -> Self {
        Self {
            unsigned: unsigned.into(),
            signed: signed.into(),
            credentials,
        }
    }
}

/// Tunables of a [`SigningPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Alignment applied in stage 2.
    pub align: AlignOptions,
    /// What to do with a `.idsig` sidecar after stage 3.
    pub sidecar_policy: SidecarPolicy,
    /// Embed a per-run token in intermediate names.
    pub unique_intermediates: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            align: AlignOptions::default(),
            sidecar_policy: SidecarPolicy::Remove,
            unique_intermediates: true,
        }
    }
}

/// Progress notification emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted { stage: Stage },
    StageFinished { stage: Stage, elapsed_ms: u64 },
    StageFailed { stage: Stage },
}

type Observer = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Runs the signing stages against a [`SigningBackend`].
#[derive(Clone)]
pub struct SigningPipeline {
    backend: Arc<dyn SigningBackend>,
    options: PipelineOptions,
    observer: Option<Observer>,
}

impl SigningPipeline {
    pub fn new(backend: Arc<dyn SigningBackend>) -> Self {
        Self {
            backend,
            options: PipelineOptions::default(),
            observer: None,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a callback receiving [`PipelineEvent`]s.
    pub fn with_observer(mut self, observer: impl Fn(&PipelineEvent) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Signs `request.unsigned` into `request.signed`.
    ///
    /// On failure no intermediate, temp file or final output is left behind
    /// and the error carries the stage that failed.
    pub async fn sign(&self, request: &SignRequest) -> Result<SignReport> {
        let token = self.options.unique_intermediates.then(RunToken::new);
        let work = WorkPaths::new(&request.unsigned, &request.signed, token.as_ref());

        // Nothing has been written yet; a rejected request counts as a stage 1 failure.
        preflight(request, &work)
            .await
            .map_err(|e| e.in_stage(Stage::V1Sign))?;
        tracing::debug!(
            "Signing {} -> {} (v1: {}, aligned: {})",
            request.unsigned.display(),
            request.signed.display(),
            work.v1.display(),
            work.aligned.display()
        );

        match self.run(request, &work).await {
            Ok(report) => {
                tracing::info!(
                    "Signed {} ({} bytes, sha256 {}) in {} ms",
                    report.output.display(),
                    report.size,
                    report.sha256,
                    report.total_elapsed_ms()
                );
                Ok(report)
            }
            Err(e) => {
                for path in work.scratch() {
                    paths::discard(path).await;
                }
                Err(e)
            }
        }
    }

    async fn run(&self, request: &SignRequest, work: &WorkPaths) -> Result<SignReport> {
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let credentials = &request.credentials;

        // Stage 1: V1 only
        let started = self.begin(Stage::V1Sign);
        self.backend
            .sign(&request.unsigned, &work.v1, credentials, SignatureSchemes::v1_only())
            .await
            .map_err(|e| self.fail(Stage::V1Sign, signing_failure(e)))?;
        stages.push(self.complete(Stage::V1Sign, started));

        // Stage 2: align, then drop the V1 intermediate
        let started = self.begin(Stage::Align);
        self.backend
            .align(&work.v1, &work.aligned, &self.options.align)
            .await
            .map_err(|e| self.fail(Stage::Align, e))?;
        stages.push(self.complete(Stage::Align, started));
        paths::discard(&work.v1).await;

        // Stage 3: full signing into a temp file, then rename into place
        let started = self.begin(Stage::FullSign);
        let keep_sidecar = self.options.sidecar_policy == SidecarPolicy::Keep;
        let (sha256, size) = self
            .finalize(credentials, work, keep_sidecar)
            .await
            .map_err(|e| self.fail(Stage::FullSign, e))?;
        stages.push(self.complete(Stage::FullSign, started));
        paths::discard(&work.aligned).await;

        let (sidecar_removed, sidecar) = self.apply_sidecar_policy(work).await;

        Ok(SignReport {
            output: work.signed.clone(),
            sha256,
            size,
            stages,
            sidecar_removed,
            sidecar,
            finished_at: chrono::Utc::now(),
        })
    }

    /// Signs the aligned intermediate and moves the result to the final path.
    /// Returns the digest and size of the final package.
    async fn finalize(
        &self,
        credentials: &SigningCredentials,
        work: &WorkPaths,
        with_v4: bool,
    ) -> Result<(String, u64)> {
        let schemes = SignatureSchemes::full().with_v4(with_v4);
        self.backend
            .sign(&work.aligned, &work.temp_output, credentials, schemes)
            .await
            .map_err(signing_failure)?;

        let digest = digest_file(&work.temp_output).await?;
        tokio::fs::rename(&work.temp_output, &work.signed).await?;
        Ok(digest)
    }

    async fn apply_sidecar_policy(&self, work: &WorkPaths) -> (bool, Option<PathBuf>) {
        match self.options.sidecar_policy {
            SidecarPolicy::Remove => {
                let temp = paths::discard(&work.temp_sidecar).await;
                let beside = paths::discard(&work.sidecar).await;
                (temp || beside, None)
            }
            SidecarPolicy::Keep => {
                match tokio::fs::rename(&work.temp_sidecar, &work.sidecar).await {
                    Ok(()) => (false, Some(work.sidecar.clone())),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        let kept = work.sidecar.exists().then(|| work.sidecar.clone());
                        (false, kept)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Failed to move sidecar to {}: {}",
                            work.sidecar.display(),
                            e
                        );
                        paths::discard(&work.temp_sidecar).await;
                        (false, None)
                    }
                }
            }
        }
    }

    fn begin(&self, stage: Stage) -> Instant {
        tracing::debug!("{}", stage.description());
        self.emit(PipelineEvent::StageStarted { stage });
        Instant::now()
    }

    fn complete(&self, stage: Stage, started: Instant) -> StageTiming {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!("Stage {} finished in {} ms", stage, elapsed_ms);
        self.emit(PipelineEvent::StageFinished { stage, elapsed_ms });
        StageTiming { stage, elapsed_ms }
    }

    fn fail(&self, stage: Stage, error: ApksignError) -> ApksignError {
        let error = error.in_stage(stage);
        tracing::debug!("{}", error);
        self.emit(PipelineEvent::StageFailed { stage });
        error
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

/// Signs an APK with a build-tools backend configured from the environment.
///
/// # Arguments
/// * `unsigned_path` - Unsigned input package
/// * `signed_path` - Destination of the signed package
/// * `keystore_path` - JKS or PKCS12 keystore
/// * `keystore_password` - Password of the keystore
/// * `key_alias` - Alias of the signing key
/// * `key_password` - Password of the key entry
pub async fn sign_apk(
    unsigned_path: impl AsRef<Path>,
    signed_path: impl AsRef<Path>,
    keystore_path: impl AsRef<Path>,
    keystore_password: &str,
    key_alias: &str,
    key_password: &str,
) -> Result<SignReport> {
    let backend = BuildToolsBackend::from_env()?;
    let credentials = SigningCredentials::new(
        keystore_path.as_ref(),
        keystore_password,
        key_alias,
        key_password,
    );
    let request = SignRequest::new(
        unsigned_path.as_ref(),
        signed_path.as_ref(),
        credentials,
    );
    SigningPipeline::new(Arc::new(backend)).sign(&request).await
}

/// Checks the request before any file is written.
async fn preflight(request: &SignRequest, work: &WorkPaths) -> Result<()> {
    let input = tokio::fs::metadata(&request.unsigned).await.map_err(|e| {
        ApksignError::Io(std::io::Error::new(
            e.kind(),
            format!("Unsigned package {}: {}", request.unsigned.display(), e),
        ))
    })?;
    if !input.is_file() {
        return Err(ApksignError::Configuration(format!(
            "Unsigned package is not a file: {}",
            request.unsigned.display()
        )));
    }

    if !request.credentials.keystore.is_file() {
        return Err(ApksignError::Credential(format!(
            "Keystore not found: {}",
            request.credentials.keystore.display()
        )));
    }

    if same_file(&request.unsigned, &request.signed).await {
        return Err(ApksignError::Configuration(format!(
            "Output must differ from input: {}",
            request.signed.display()
        )));
    }

    // The pipeline deletes its scratch files, so the output must not be one.
    for scratch in work.scratch() {
        if same_file(scratch, &request.signed).await {
            return Err(ApksignError::Configuration(format!(
                "Output {} collides with intermediate file {}",
                request.signed.display(),
                scratch.display()
            )));
        }
    }

    let out_dir = paths::parent_dir(&request.signed);
    if !tokio::fs::metadata(out_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(ApksignError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Output directory does not exist: {}", out_dir.display()),
        )));
    }

    Ok(())
}

/// Whether `a` and `b` name the same file. Either may not exist yet.
async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (resolve(a).await, resolve(b).await) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Canonical form of `path`, going through its parent when the file itself
/// does not exist.
async fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(full) = tokio::fs::canonicalize(path).await {
        return Some(full);
    }
    let name = path.file_name()?;
    let parent = tokio::fs::canonicalize(paths::parent_dir(path)).await.ok()?;
    Some(parent.join(name))
}

/// Backend sign failures are either credential problems or signing failures.
fn signing_failure(e: ApksignError) -> ApksignError {
    match e.kind() {
        ErrorKind::Credential | ErrorKind::Signing | ErrorKind::Configuration => e,
        _ => ApksignError::Signing(e.to_string()),
    }
}

/// Hex SHA-256 and size of a file.
async fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}
