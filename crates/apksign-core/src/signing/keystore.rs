//! Android keystore inspection.
//!
//! Detects the keystore container type and validates that a key alias can be
//! opened with the given store password, using the JDK `keytool` CLI.

use std::ffi::OsString;
use std::path::Path;

use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::config::ToolCommand;
use crate::error::{ApksignError, Result};
use crate::models::{KeystoreType, SigningCredentials};
use crate::signing::runner::run_tool;

/// Environment variable carrying the store password to `keytool`.
const KEYTOOL_STOREPASS_ENV: &str = "APKSIGN_KEYTOOL_STOREPASS";

/// Information extracted from a keystore.
#[derive(Debug, Clone, Serialize)]
pub struct KeystoreInfo {
    /// Type of the keystore (JKS or PKCS12).
    pub keystore_type: KeystoreType,
    /// Alias that was checked.
    pub alias: String,
    /// Entry type reported by keytool, e.g. `PrivateKeyEntry`.
    pub entry_type: Option<String>,
    /// SHA-256 fingerprint of the entry's certificate.
    pub sha256_fingerprint: Option<String>,
    /// Certificate validity period as printed by keytool.
    pub valid: Option<String>,
}

impl KeystoreInfo {
    /// Whether the alias holds a private key usable for signing.
    pub fn has_private_key(&self) -> bool {
        self.entry_type.as_deref() == Some("PrivateKeyEntry")
    }
}

/// Detects the keystore type from its magic bytes.
pub fn detect_keystore_type(data: &[u8]) -> KeystoreType {
    // PKCS12 files start with 0x30 (ASN.1 SEQUENCE)
    // JKS files start with magic bytes 0xFEEDFEED
    if data.starts_with(&[0xFE, 0xED, 0xFE, 0xED]) {
        return KeystoreType::Jks;
    }

    // Default to PKCS12 for other formats
    KeystoreType::Pkcs12
}

/// Reads the first bytes of a keystore file and detects its type.
pub async fn detect_keystore_type_at(path: &Path) -> Result<KeystoreType> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        ApksignError::Credential(format!("Cannot open keystore {}: {}", path.display(), e))
    })?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).await?;
    Ok(detect_keystore_type(&magic[..read]))
}

/// Resolves the keystore type to pass to signing tools.
pub async fn resolve_keystore_type(credentials: &SigningCredentials) -> Result<KeystoreType> {
    match credentials.keystore_type {
        Some(t) => Ok(t),
        None => detect_keystore_type_at(&credentials.keystore).await,
    }
}

/// Validates a keystore and extracts info.
///
/// Uses the `keytool` CLI to check that the store password opens the keystore
/// and that the alias exists. `keytool -list` does not need the key password,
/// so a wrong key password is only detected when signing.
pub async fn validate_keystore(
    credentials: &SigningCredentials,
    keytool: &ToolCommand,
    timeout_secs: u64,
) -> Result<KeystoreInfo> {
    let keystore_type = resolve_keystore_type(credentials).await?;

    let args: Vec<OsString> = vec![
        "-list".into(),
        "-v".into(),
        "-keystore".into(),
        credentials.keystore.clone().into(),
        "-storetype".into(),
        keystore_type.java_name().into(),
        "-storepass:env".into(),
        KEYTOOL_STOREPASS_ENV.into(),
        "-alias".into(),
        credentials.key_alias.clone().into(),
    ];

    let output = run_tool(
        keytool,
        &args,
        &[(
            KEYTOOL_STOREPASS_ENV,
            credentials.keystore_password.expose_secret(),
        )],
        timeout_secs,
    )
    .await?;

    if !output.success() {
        return Err(classify_keytool_failure(
            &format!("{}\n{}", output.stdout, output.stderr),
            &output.diagnostics(),
            &credentials.key_alias,
        ));
    }

    let info = parse_keytool_listing(&output.stdout, keystore_type, &credentials.key_alias);
    tracing::debug!(
        "Keystore {} alias '{}' is a {}",
        credentials.keystore.display(),
        info.alias,
        info.entry_type.as_deref().unwrap_or("unknown entry")
    );

    Ok(info)
}

/// Maps keytool error output to a credential error.
///
/// `text` is the raw output to match on; `detail` is the redacted form
/// used in the message.
fn classify_keytool_failure(text: &str, detail: &str, alias: &str) -> ApksignError {
    // Check for specific error messages
    if text.contains("password was incorrect") {
        return ApksignError::Credential("Invalid keystore password".to_string());
    }
    if text.contains("does not exist") {
        return ApksignError::Credential(format!("Alias '{}' not found in keystore", alias));
    }
    if text.contains("Invalid keystore format") || text.contains("Unrecognized keystore format") {
        return ApksignError::Credential("Invalid keystore format".to_string());
    }

    ApksignError::Credential(format!("Failed to validate keystore: {}", detail.trim()))
}

/// Extracts the interesting fields from `keytool -list -v` output.
fn parse_keytool_listing(stdout: &str, keystore_type: KeystoreType, alias: &str) -> KeystoreInfo {
    let mut info = KeystoreInfo {
        keystore_type,
        alias: alias.to_string(),
        entry_type: None,
        sha256_fingerprint: None,
        valid: None,
    };

    for line in stdout.lines().map(str::trim) {
        if let Some(v) = line.strip_prefix("Entry type:") {
            info.entry_type.get_or_insert_with(|| v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("SHA256:") {
            info.sha256_fingerprint
                .get_or_insert_with(|| v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Valid from:") {
            info.valid.get_or_insert_with(|| v.trim().to_string());
        }
    }

    info
}
