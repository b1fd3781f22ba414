//! Signing backend built on the Android SDK build-tools.
//!
//! Runs `apksigner` for signing and verification and `zipalign` (or the
//! in-process [`NativeAligner`]) for alignment.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::ffi::OsString;
use std::path::Path;

use crate::config::ToolConfig;
use crate::error::{ApksignError, Result};
use crate::models::{AlignOptions, SignatureSchemes, SigningCredentials, VerifyReport};
use crate::signing::align::{needs_recompression, NativeAligner};
use crate::signing::backend::{ApkVerifier, SigningBackend};
use crate::signing::keystore::resolve_keystore_type;
use crate::signing::runner::run_tool;

/// Environment variables carrying passwords to `apksigner` (`--ks-pass env:...`).
const KS_PASS_ENV: &str = "APKSIGN_KS_PASS";
const KEY_PASS_ENV: &str = "APKSIGN_KEY_PASS";

/// apksigner output fragments that indicate a keystore or key problem.
const CREDENTIAL_FAILURE_MARKERS: &[&str] = &[
    "password was incorrect",
    "Failed to load signer",
    "Failed to obtain key",
    "does not contain a key",
    "UnrecoverableKeyException",
    "Cannot recover key",
    "not found in keystore",
    "No key with alias",
    "Invalid keystore format",
    "Keystore file not found",
];

/// Backend that shells out to the SDK build-tools.
pub struct BuildToolsBackend {
    config: ToolConfig,
    aligner: NativeAligner,
}

impl BuildToolsBackend {
    /// Creates a backend with tool locations from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(ToolConfig::from_env()?))
    }

    /// Creates a backend with explicit tool locations.
    pub fn with_config(config: ToolConfig) -> Self {
        Self {
            config,
            aligner: NativeAligner::new(),
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Builds the `apksigner sign` argument list. Passwords are referenced
    /// through environment variables, never inlined.
    fn sign_args(
        input: &Path,
        output: &Path,
        credentials: &SigningCredentials,
        keystore_type: &str,
        schemes: SignatureSchemes,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "sign".into(),
            "--ks".into(),
            credentials.keystore.clone().into(),
            "--ks-type".into(),
            keystore_type.into(),
            "--ks-key-alias".into(),
            credentials.key_alias.clone().into(),
            "--ks-pass".into(),
            format!("env:{}", KS_PASS_ENV).into(),
            "--key-pass".into(),
            format!("env:{}", KEY_PASS_ENV).into(),
        ];

        for (flag, enabled) in [
            ("--v1-signing-enabled", schemes.v1),
            ("--v2-signing-enabled", schemes.v2),
            ("--v3-signing-enabled", schemes.v3),
            ("--v4-signing-enabled", schemes.v4),
        ] {
            args.push(flag.into());
            args.push(enabled.to_string().into());
        }

        args.push("--out".into());
        args.push(output.into());
        args.push(input.into());
        args
    }

    async fn align_with_zipalign(
        &self,
        input: &Path,
        output: &Path,
        options: &AlignOptions,
    ) -> Result<()> {
        let mut args: Vec<OsString> = vec!["-f".into()];
        if options.page_align_shared_libs {
            args.push("-p".into());
        }
        args.push(options.boundary.to_string().into());
        args.push(input.into());
        args.push(output.into());

        let result = run_tool(&self.config.zipalign, &args, &[], self.config.timeout_secs).await;
        let output_result = match result {
            Ok(out) => out,
            Err(e) => {
                remove_partial(output).await;
                return Err(e);
            }
        };

        if !output_result.success() {
            remove_partial(output).await;
            return Err(ApksignError::Alignment(format!(
                "zipalign exited with code {}: {}",
                output_result.exit_code(),
                output_result.diagnostics()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl SigningBackend for BuildToolsBackend {
    async fn sign(
        &self,
        input: &Path,
        output: &Path,
        credentials: &SigningCredentials,
        schemes: SignatureSchemes,
    ) -> Result<()> {
        if !credentials.keystore.is_file() {
            return Err(ApksignError::Credential(format!(
                "Keystore not found: {}",
                credentials.keystore.display()
            )));
        }

        let keystore_type = resolve_keystore_type(credentials).await?;
        let args = Self::sign_args(input, output, credentials, keystore_type.java_name(), schemes);

        let result = run_tool(
            &self.config.apksigner,
            &args,
            &[
                (KS_PASS_ENV, credentials.keystore_password.expose_secret()),
                (KEY_PASS_ENV, credentials.key_password.expose_secret()),
            ],
            self.config.timeout_secs,
        )
        .await;

        let tool_output = match result {
            Ok(out) => out,
            Err(e) => {
                remove_partial(output).await;
                return Err(e);
            }
        };

        if !tool_output.success() {
            remove_partial(output).await;
            return Err(classify_apksigner_failure(
                tool_output.exit_code(),
                tool_output.raw_diagnostics(),
                &tool_output.diagnostics(),
            ));
        }

        Ok(())
    }

    async fn align(&self, input: &Path, output: &Path, options: &AlignOptions) -> Result<()> {
        if self.config.native_align {
            self.aligner.align(input, output, options).await?;
            return Ok(());
        }

        // zipalign keeps each entry's compression, so an archive with a
        // compressed resource table has to go through the native aligner.
        let check_input = input.to_path_buf();
        let check_options = options.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            needs_recompression(&check_input, &check_options)
        })
        .await
        .map_err(|e| ApksignError::Alignment(format!("Archive inspection failed: {}", e)))??;

        if !compressed.is_empty() {
            tracing::warn!(
                "{} stored compressed in {}, aligning in-process instead of zipalign",
                compressed.join(", "),
                input.display()
            );
            self.aligner.align(input, output, options).await?;
            return Ok(());
        }

        self.align_with_zipalign(input, output, options).await
    }
}

#[async_trait]
impl ApkVerifier for BuildToolsBackend {
    async fn verify(&self, apk: &Path) -> Result<VerifyReport> {
        let args: Vec<OsString> = vec!["verify".into(), "--verbose".into(), apk.into()];
        let output = run_tool(&self.config.apksigner, &args, &[], self.config.timeout_secs).await?;

        let report = parse_verify_output(&output.stdout, &output.stderr);
        if !output.success() && report.errors.is_empty() {
            // Not a verification verdict, e.g. the file could not be read
            return Err(ApksignError::Signing(format!(
                "apksigner verify exited with code {}: {}",
                output.exit_code(),
                output.diagnostics()
            )));
        }

        Ok(VerifyReport {
            verified: output.success() && report.verified,
            ..report
        })
    }
}

/// Maps a failed `apksigner sign` run to a credential or signing error.
///
/// Markers are matched against the raw output; only the redacted `detail`
/// ends up in the error.
fn classify_apksigner_failure(exit_code: i32, raw: &str, detail: &str) -> ApksignError {
    if CREDENTIAL_FAILURE_MARKERS
        .iter()
        .any(|marker| raw.contains(marker))
    {
        return ApksignError::Credential(detail.to_string());
    }

    ApksignError::Signing(format!(
        "apksigner exited with code {}: {}",
        exit_code, detail
    ))
}

/// Parses `apksigner verify --verbose` output.
fn parse_verify_output(stdout: &str, stderr: &str) -> VerifyReport {
    let mut report = VerifyReport::default();

    for line in stdout.lines().chain(stderr.lines()).map(str::trim) {
        if line == "Verifies" {
            report.verified = true;
        } else if let Some(rest) = line.strip_prefix("Verified using v") {
            let Some((version, _)) = rest.split_once(" scheme") else {
                continue;
            };
            let enabled = rest.ends_with(": true");
            // v3.1 (key rotation targeting newer platforms) is reported but not tracked
            match version {
                "1" => report.v1 = enabled,
                "2" => report.v2 = enabled,
                "3" => report.v3 = enabled,
                "4" => report.v4 = enabled,
                _ => {}
            }
        } else if let Some(n) = line.strip_prefix("Number of signers:") {
            report.signers = n.trim().parse().unwrap_or(0);
        } else if line.starts_with("WARNING:") {
            report.warnings.push(line.to_string());
        } else if line.starts_with("ERROR:") || line == "DOES NOT VERIFY" {
            report.errors.push(line.to_string());
        }
    }

    report
}

/// Removes a partially written output, ignoring a missing file.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use crate::signing::runner;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_sign_args_v1_only() {
        let creds = SigningCredentials::new("/keys/release.jks", "storepass", "upload", "keypass");
        let args = BuildToolsBackend::sign_args(
            Path::new("/work/app-unsigned.apk"),
            Path::new("/work/app-unsigned_v1.apk"),
            &creds,
            "JKS",
            SignatureSchemes::v1_only(),
        );
        let args = args_as_strings(&args);

        assert_eq!(args[0], "sign");
        let joined = args.join(" ");
        assert!(joined.contains("--ks /keys/release.jks"));
        assert!(joined.contains("--ks-key-alias upload"));
        assert!(joined.contains("--ks-pass env:APKSIGN_KS_PASS"));
        assert!(joined.contains("--v1-signing-enabled true"));
        assert!(joined.contains("--v2-signing-enabled false"));
        assert!(joined.contains("--v3-signing-enabled false"));
        assert!(joined.contains("--v4-signing-enabled false"));
        assert!(joined.ends_with("--out /work/app-unsigned_v1.apk /work/app-unsigned.apk"));
        // Passwords never appear on the command line
        assert!(!joined.contains("storepass"));
        assert!(!joined.contains("keypass"));
    }

    #[test]
    fn test_sign_args_full() {
        let creds = SigningCredentials::new("/keys/release.p12", "a", "upload", "b");
        let args = BuildToolsBackend::sign_args(
            Path::new("in.apk"),
            Path::new("out.apk"),
            &creds,
            "PKCS12",
            SignatureSchemes::full(),
        );
        let joined = args_as_strings(&args).join(" ");
        assert!(joined.contains("--ks-type PKCS12"));
        assert!(joined.contains("--v1-signing-enabled true"));
        assert!(joined.contains("--v2-signing-enabled true"));
        assert!(joined.contains("--v3-signing-enabled true"));
        assert!(joined.contains("--v4-signing-enabled false"));
    }

    #[test]
    fn test_classify_apksigner_failure() {
        let text = "Failed to load signer \"signer #1\"\njava.io.IOException: Keystore was tampered with, or password was incorrect";
        let err = classify_apksigner_failure(1, text, text);
        assert_eq!(err.kind(), crate::ErrorKind::Credential);

        let text = "java.util.zip.ZipException: invalid CEN header";
        let err = classify_apksigner_failure(1, text, text);
        assert_eq!(err.kind(), crate::ErrorKind::Signing);
        assert!(err.to_string().contains("code 1"));
    }

    #[test]
    fn test_parse_verify_output() {
        let stdout = "\
Verifies
Verified using v1 scheme (JAR signing): true
Verified using v2 scheme (APK Signature Scheme v2): true
Verified using v3 scheme (APK Signature Scheme v3): true
Verified using v3.1 scheme (APK Signature Scheme v3.1): false
Verified using v4 scheme (APK Signature Scheme v4): false
Verified for SourceStamp: false
Number of signers: 1
";
        let stderr = "WARNING: META-INF/com/android/build/gradle/app-metadata.properties not protected by signature.";
        let report = parse_verify_output(stdout, stderr);
        assert!(report.verified);
        assert!(report.v1 && report.v2 && report.v3);
        assert!(!report.v4);
        assert_eq!(report.signers, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_classify_apksigner_failure_with_common_password() {
        // A password that occurs inside the marker text must not hide it
        let raw = "java.io.IOException: Keystore was tampered with, or password was incorrect";
        let detail = runner::redact(raw, &["password"]);

        let err = classify_apksigner_failure(1, raw, &detail);
        assert_eq!(err.kind(), crate::ErrorKind::Credential);
        assert!(!err.to_string().contains("password"));
    }

    #[test]
    fn test_parse_verify_output_ignores_unknown_versions() {
        let stdout = "\
Verified using v3 scheme (APK Signature Scheme v3): true
Verified using v3.1 scheme (APK Signature Scheme v3.1): false
Verified using v31 scheme (APK Signature Scheme v3.1): false
Verified using v5 scheme (future): true
";
        let report = parse_verify_output(stdout, "");
        assert!(report.v3);
        assert!(!report.v1 && !report.v2 && !report.v4);
    }

    #[test]
    fn test_parse_verify_output_failure() {
        let report = parse_verify_output("DOES NOT VERIFY\nERROR: Missing META-INF/MANIFEST.MF", "");
        assert!(!report.verified);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_sign_missing_keystore_is_credential_error() {
        let backend = BuildToolsBackend::with_config(ToolConfig::default());
        let creds = SigningCredentials::new("/definitely/missing.jks", "a", "upload", "b");
        let err = backend
            .sign(
                Path::new("in.apk"),
                Path::new("out.apk"),
                &creds,
                SignatureSchemes::v1_only(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Credential);
    }

    #[cfg(unix)]
    mod fake_tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        /// Fake apksigner: copies input to --out, emits an .idsig when v4 is
        /// enabled, and rejects any store password other than "storepass".
        const FAKE_APKSIGNER: &str = r#"#!/bin/sh
if [ "$1" = "verify" ]; then
  echo "Verifies"
  echo "Verified using v1 scheme (JAR signing): true"
  echo "Verified using v2 scheme (APK Signature Scheme v2): true"
  exit 0
fi
if [ "$APKSIGN_KS_PASS" != "storepass" ]; then
  echo "Failed to load signer \"signer #1\"" >&2
  echo "java.io.IOException: Keystore was tampered with, or password was incorrect" >&2
  exit 2
fi
out=""; v4=false; last=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
    --v4-signing-enabled) v4="$2"; shift ;;
  esac
  last="$1"; shift
done
cp "$last" "$out" || exit 1
if [ "$v4" = "true" ]; then echo idsig > "$out.idsig"; fi
"#;

        /// Fake zipalign: records its arguments next to itself and copies
        /// the input to the output.
        const FAKE_ZIPALIGN: &str = r#"#!/bin/sh
echo "$@" > "$(dirname "$0")/zipalign.args"
for a in "$@"; do last2="$last"; last="$a"; done
head -c 4 "$last2" | grep -q PK || { echo "Unable to open '$last2' as zip archive" >&2; exit 1; }
cp "$last2" "$last"
"#;

        /// zipalign that leaves a truncated output behind and fails.
        const FAILING_ZIPALIGN: &str = r#"#!/bin/sh
for a in "$@"; do last="$a"; done
printf 'PK' > "$last"
echo "Unable to rename temp file" >&2
exit 1
"#;

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn backend(dir: &Path) -> BuildToolsBackend {
            backend_with_zipalign(dir, FAKE_ZIPALIGN)
        }

        fn backend_with_zipalign(dir: &Path, zipalign: &str) -> BuildToolsBackend {
            let config = ToolConfig {
                apksigner: ToolCommand::new(write_script(dir, "apksigner", FAKE_APKSIGNER)),
                zipalign: ToolCommand::new(write_script(dir, "zipalign", zipalign)),
                ..ToolConfig::default()
            };
            BuildToolsBackend::with_config(config)
        }

        fn write_apk(path: &Path, resources: zip::CompressionMethod) {
            use std::io::Write;
            use zip::write::SimpleFileOptions;

            let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
            let deflated =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            zip.start_file("classes.dex", deflated).unwrap();
            zip.write_all(b"dex\n035\0").unwrap();
            zip.start_file(
                "resources.arsc",
                SimpleFileOptions::default().compression_method(resources),
            )
            .unwrap();
            zip.write_all(&[7u8; 513]).unwrap();
            zip.finish().unwrap();
        }

        fn keystore(dir: &Path) -> PathBuf {
            let path = dir.join("release.jks");
            std::fs::write(&path, [0xFE, 0xED, 0xFE, 0xED]).unwrap();
            path
        }

        #[tokio::test]
        async fn test_sign_runs_apksigner() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend(dir.path());
            let input = dir.path().join("app.apk");
            let output = dir.path().join("app-signed.apk");
            std::fs::write(&input, b"PK\x03\x04apk").unwrap();

            let creds = SigningCredentials::new(keystore(dir.path()), "storepass", "upload", "keypass");
            backend
                .sign(&input, &output, &creds, SignatureSchemes::full().with_v4(true))
                .await
                .unwrap();

            assert_eq!(std::fs::read(&output).unwrap(), b"PK\x03\x04apk");
            assert!(dir.path().join("app-signed.apk.idsig").exists());
        }

        #[tokio::test]
        async fn test_sign_wrong_password_is_credential_error() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend(dir.path());
            let input = dir.path().join("app.apk");
            let output = dir.path().join("app-signed.apk");
            std::fs::write(&input, b"PK\x03\x04apk").unwrap();

            let creds = SigningCredentials::new(keystore(dir.path()), "nope", "upload", "keypass");
            let err = backend
                .sign(&input, &output, &creds, SignatureSchemes::v1_only())
                .await
                .unwrap_err();

            assert_eq!(err.kind(), crate::ErrorKind::Credential);
            assert!(!output.exists());
        }

        #[tokio::test]
        async fn test_align_with_zipalign_rejects_non_zip() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend(dir.path());
            let input = dir.path().join("v1.apk");
            let output = dir.path().join("aligned.apk");
            std::fs::write(&input, b"garbage").unwrap();

            // needs_recompression rejects it before zipalign runs
            let err = backend
                .align(&input, &output, &AlignOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Alignment);
            assert!(!output.exists());
        }

        #[tokio::test]
        async fn test_align_runs_zipalign_with_page_alignment() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend(dir.path());
            let input = dir.path().join("app_v1.apk");
            let output = dir.path().join("app_v1_align.apk");
            write_apk(&input, zip::CompressionMethod::Stored);

            backend
                .align(&input, &output, &AlignOptions::default())
                .await
                .unwrap();

            assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
            let args = std::fs::read_to_string(dir.path().join("zipalign.args")).unwrap();
            assert_eq!(
                args.trim(),
                format!("-f -p 4 {} {}", input.display(), output.display())
            );
        }

        #[tokio::test]
        async fn test_zipalign_failure_is_alignment_error() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend_with_zipalign(dir.path(), FAILING_ZIPALIGN);
            let input = dir.path().join("app_v1.apk");
            let output = dir.path().join("app_v1_align.apk");
            write_apk(&input, zip::CompressionMethod::Stored);

            let err = backend
                .align(&input, &output, &AlignOptions::default())
                .await
                .unwrap_err();

            assert_eq!(err.kind(), crate::ErrorKind::Alignment);
            assert!(err.to_string().contains("Unable to rename temp file"));
            assert!(!output.exists());
        }

        #[tokio::test]
        async fn test_compressed_resource_table_skips_zipalign() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend(dir.path());
            let input = dir.path().join("app_v1.apk");
            let output = dir.path().join("app_v1_align.apk");
            write_apk(&input, zip::CompressionMethod::Deflated);

            backend
                .align(&input, &output, &AlignOptions::default())
                .await
                .unwrap();

            assert!(!dir.path().join("zipalign.args").exists());
            let check = crate::signing::check_alignment(&output, &AlignOptions::default()).unwrap();
            assert!(check.is_aligned());
            assert!(needs_recompression(&output, &AlignOptions::default())
                .unwrap()
                .is_empty());
        }

        #[tokio::test]
        async fn test_verify_parses_report() {
            let dir = tempfile::tempdir().unwrap();
            let backend = backend(dir.path());
            let report = backend.verify(&dir.path().join("any.apk")).await.unwrap();
            assert!(report.verified);
            assert!(report.v1 && report.v2);
            assert!(!report.v3);
        }
    }
}
