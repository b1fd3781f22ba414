//! Signing inputs: keystore credentials, scheme selection and alignment options.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Android keystore type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreType {
    Jks,
    Pkcs12,
}

impl KeystoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeystoreType::Jks => "jks",
            KeystoreType::Pkcs12 => "pkcs12",
        }
    }

    /// Name understood by `apksigner --ks-type` and `keytool -storetype`.
    pub fn java_name(&self) -> &'static str {
        match self {
            KeystoreType::Jks => "JKS",
            KeystoreType::Pkcs12 => "PKCS12",
        }
    }
}

impl std::str::FromStr for KeystoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jks" => Ok(KeystoreType::Jks),
            "pkcs12" | "p12" => Ok(KeystoreType::Pkcs12),
            _ => Err(format!("Unknown keystore type: {}", s)),
        }
    }
}

impl std::fmt::Display for KeystoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keystore location and the secrets needed to unlock one key in it.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    /// Path to the keystore file.
    pub keystore: PathBuf,
    /// Password protecting the keystore itself.
    pub keystore_password: SecretString,
    /// Alias of the signing key entry.
    pub key_alias: String,
    /// Password protecting the key entry.
    pub key_password: SecretString,
    /// Explicit keystore type. Detected from the file when `None`.
    pub keystore_type: Option<KeystoreType>,
}

impl SigningCredentials {
    pub fn new(
        keystore: impl Into<PathBuf>,
        keystore_password: impl Into<String>,
        key_alias: impl Into<String>,
        key_password: impl Into<String>,
    ) -> Self {
        Self {
            keystore: keystore.into(),
            keystore_password: SecretString::from(keystore_password.into()),
            key_alias: key_alias.into(),
            key_password: SecretString::from(key_password.into()),
            keystore_type: None,
        }
    }

    /// Sets an explicit keystore type.
    pub fn with_keystore_type(mut self, keystore_type: KeystoreType) -> Self {
        self.keystore_type = Some(keystore_type);
        self
    }
}

/// Which APK signature schemes a signing call enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSchemes {
    pub v1: bool,
    pub v2: bool,
    pub v3: bool,
    pub v4: bool,
}

impl SignatureSchemes {
    /// Legacy JAR signing only, used by the first stage.
    pub const fn v1_only() -> Self {
        Self {
            v1: true,
            v2: false,
            v3: false,
            v4: false,
        }
    }

    /// V1 + V2 + V3, used by the final stage.
    pub const fn full() -> Self {
        Self {
            v1: true,
            v2: true,
            v3: true,
            v4: false,
        }
    }

    /// Returns these schemes with V4 (the `.idsig` sidecar) toggled.
    pub const fn with_v4(mut self, enabled: bool) -> Self {
        self.v4 = enabled;
        self
    }
}

/// What to do with a `.idsig` sidecar found next to the final output.
///
/// `Remove` drops incremental-install support on devices that could use it,
/// `Keep` ships the sidecar and enables V4 signing to produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarPolicy {
    #[default]
    Remove,
    Keep,
}

/// Resource table name; must be stored uncompressed for mmap access on device.
pub const RESOURCE_TABLE: &str = "resources.arsc";

/// Alignment used for stored native libraries so they can be mapped directly.
pub const PAGE_ALIGNMENT: u16 = 4096;

/// Options controlling zip alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignOptions {
    /// Byte boundary for stored entry data (zipalign's `4`).
    pub boundary: u16,
    /// Align stored `.so` entries to [`PAGE_ALIGNMENT`] instead of `boundary`.
    pub page_align_shared_libs: bool,
    /// Entries forced to be stored uncompressed.
    pub uncompressed_entries: Vec<String>,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            boundary: 4,
            page_align_shared_libs: true,
            uncompressed_entries: vec![RESOURCE_TABLE.to_string()],
        }
    }
}

impl AlignOptions {
    /// Alignment required for an entry with the given name.
    pub fn alignment_for(&self, name: &str) -> u16 {
        if self.page_align_shared_libs && name.ends_with(".so") {
            PAGE_ALIGNMENT
        } else {
            self.boundary
        }
    }

    /// Whether the entry must be written uncompressed.
    pub fn forces_stored(&self, name: &str) -> bool {
        self.uncompressed_entries.iter().any(|e| e == name)
    }
}
