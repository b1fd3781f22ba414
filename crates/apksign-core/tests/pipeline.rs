//! End-to-end runs of the signing pipeline over real zip archives.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use apksign_core::models::{AlignOptions, SignatureSchemes, SigningCredentials, Stage};
use apksign_core::signing::{NativeAligner, SigningBackend, check_alignment};
use apksign_core::{ErrorKind, PipelineOptions, Result, SignRequest, SigningPipeline};
use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Signs by copying and aligns with the real in-process aligner.
struct CopySigner {
    aligner: NativeAligner,
}

#[async_trait]
impl SigningBackend for CopySigner {
    async fn sign(
        &self,
        input: &Path,
        output: &Path,
        _credentials: &SigningCredentials,
        _schemes: SignatureSchemes,
    ) -> Result<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn align(&self, input: &Path, output: &Path, options: &AlignOptions) -> Result<()> {
        self.aligner.align(input, output, options).await?;
        Ok(())
    }
}

fn pipeline() -> SigningPipeline {
    SigningPipeline::new(Arc::new(CopySigner {
        aligner: NativeAligner::new(),
    }))
}

fn write_apk(path: &Path) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file("AndroidManifest.xml", deflated).unwrap();
    zip.write_all(b"<manifest package=\"com.example.app\"/>").unwrap();
    zip.start_file("classes.dex", deflated).unwrap();
    zip.write_all(&[0x64, 0x65, 0x78, 0x0a, 0x30, 0x33, 0x35, 0x00]).unwrap();
    zip.start_file("resources.arsc", deflated).unwrap();
    zip.write_all(&[2u8; 1021]).unwrap();
    zip.start_file("res/raw/b", stored).unwrap();
    zip.write_all(b"xyz").unwrap();
    zip.start_file("lib/x86_64/libnative.so", stored).unwrap();
    zip.write_all(&[0x7f, b'E', b'L', b'F']).unwrap();
    zip.finish().unwrap();
}

struct Fixture {
    dir: tempfile::TempDir,
    request: SignRequest,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let unsigned = dir.path().join("app-release-unsigned.apk");
    write_apk(&unsigned);
    let keystore = dir.path().join("upload.p12");
    std::fs::write(&keystore, [0x30, 0x82, 0x0a, 0x00]).unwrap();
    let credentials = SigningCredentials::new(keystore, "android", "upload", "android");
    let request = SignRequest::new(
        unsigned,
        dir.path().join("app-release.apk"),
        credentials,
    );
    Fixture { dir, request }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_output_is_aligned_with_stored_resource_table() {
    let fx = fixture();

    let report = pipeline().sign(&fx.request).await.unwrap();

    assert_eq!(report.output, fx.request.signed);
    let check = check_alignment(&report.output, &AlignOptions::default()).unwrap();
    assert!(check.is_aligned(), "misaligned: {:?}", check.misaligned);

    let mut archive = ZipArchive::new(File::open(&report.output).unwrap()).unwrap();
    let mut arsc = archive.by_name("resources.arsc").unwrap();
    assert_eq!(arsc.compression(), CompressionMethod::Stored);
    let mut data = Vec::new();
    arsc.read_to_end(&mut data).unwrap();
    assert_eq!(data, vec![2u8; 1021]);

    assert_eq!(
        listing(fx.dir.path()),
        ["app-release-unsigned.apk", "app-release.apk", "upload.p12"]
    );
}

#[tokio::test]
async fn test_corrupt_input_fails_in_align_stage_without_output() {
    let fx = fixture();
    std::fs::write(&fx.request.unsigned, b"this is not a zip archive").unwrap();

    let err = pipeline().sign(&fx.request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Alignment);
    assert_eq!(err.stage(), Some(Stage::Align));
    assert_eq!(
        listing(fx.dir.path()),
        ["app-release-unsigned.apk", "upload.p12"]
    );
}

#[tokio::test]
async fn test_concurrent_runs_do_not_collide() {
    let fx = fixture();
    let second = SignRequest {
        signed: fx.dir.path().join("app-release-2.apk"),
        ..fx.request.clone()
    };

    let pipeline = pipeline();
    let (a, b) = tokio::join!(pipeline.sign(&fx.request), pipeline.sign(&second));
    a.unwrap();
    b.unwrap();

    assert_eq!(
        listing(fx.dir.path()),
        [
            "app-release-2.apk",
            "app-release-unsigned.apk",
            "app-release.apk",
            "upload.p12"
        ]
    );
}

#[tokio::test]
async fn test_stable_names_match_legacy_layout() {
    let fx = fixture();
    let seen = Arc::new(std::sync::Mutex::new(Vec::<PathBuf>::new()));

    struct Recording {
        inner: CopySigner,
        seen: Arc<std::sync::Mutex<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl SigningBackend for Recording {
        async fn sign(
            &self,
            input: &Path,
            output: &Path,
            credentials: &SigningCredentials,
            schemes: SignatureSchemes,
        ) -> Result<()> {
            self.seen.lock().unwrap().push(output.to_path_buf());
            self.inner.sign(input, output, credentials, schemes).await
        }

        async fn align(&self, input: &Path, output: &Path, options: &AlignOptions) -> Result<()> {
            self.seen.lock().unwrap().push(output.to_path_buf());
            self.inner.align(input, output, options).await
        }
    }

    let backend = Recording {
        inner: CopySigner {
            aligner: NativeAligner::new(),
        },
        seen: seen.clone(),
    };
    let options = PipelineOptions {
        unique_intermediates: false,
        ..PipelineOptions::default()
    };
    SigningPipeline::new(Arc::new(backend))
        .with_options(options)
        .sign(&fx.request)
        .await
        .unwrap();

    let names: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        [
            "app-release-unsigned_v1.apk",
            "app-release-unsigned_v1_align.apk",
            ".app-release.apk.partial.tmp"
        ]
    );
}

#[cfg(unix)]
mod build_tools {
    use super::*;
    use apksign_core::config::{ToolCommand, ToolConfig};
    use apksign_core::signing::BuildToolsBackend;
    use std::os::unix::fs::PermissionsExt;

    /// Stands in for apksigner: checks both password env vars and copies
    /// the input to `--out`.
    const FAKE_APKSIGNER: &str = r#"#!/bin/sh
[ "$APKSIGN_KS_PASS" = "android" ] || { echo "Keystore was tampered with, or password was incorrect" >&2; exit 1; }
[ "$APKSIGN_KEY_PASS" = "android" ] || { echo "Cannot recover key" >&2; exit 1; }
out=""; last=""
while [ $# -gt 0 ]; do
  case "$1" in --out) out="$2"; shift ;; esac
  last="$1"; shift
done
cp "$last" "$out"
"#;

    fn backend(dir: &Path) -> BuildToolsBackend {
        let script = dir.join("apksigner");
        std::fs::write(&script, FAKE_APKSIGNER).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        BuildToolsBackend::with_config(ToolConfig {
            apksigner: ToolCommand::new(script),
            native_align: true,
            ..ToolConfig::default()
        })
    }

    #[tokio::test]
    async fn test_build_tools_backend_end_to_end() {
        let fx = fixture();
        let tools = tempfile::tempdir().unwrap();

        let report = SigningPipeline::new(Arc::new(backend(tools.path())))
            .sign(&fx.request)
            .await
            .unwrap();

        assert!(check_alignment(&report.output, &AlignOptions::default())
            .unwrap()
            .is_aligned());
        assert_eq!(report.stages.len(), 3);
    }

    #[tokio::test]
    async fn test_wrong_key_password_leaves_nothing() {
        let fx = fixture();
        let tools = tempfile::tempdir().unwrap();
        let mut request = fx.request.clone();
        request.credentials =
            SigningCredentials::new(&request.credentials.keystore, "android", "upload", "wrong");

        let err = SigningPipeline::new(Arc::new(backend(tools.path())))
            .sign(&request)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Credential);
        assert_eq!(err.stage(), Some(Stage::V1Sign));
        assert_eq!(
            listing(fx.dir.path()),
            ["app-release-unsigned.apk", "upload.p12"]
        );
    }
}
