//! Signing profiles: the HUML config file and how it merges with env and flags.
//!
//! Supports profile-based signing configuration from `~/.apksign/config.huml`
//! with priority order: CLI flags > environment variables > config file > defaults.

use anyhow::{Context, Result, bail};
use apksign_core::config::{ToolCommand, ToolConfig};
use apksign_core::models::{KeystoreType, SigningCredentials};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Contents of `config.huml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    /// Profile used when `--profile` is not given.
    pub default_profile: String,
    /// Signing profiles by name.
    pub profiles: HashMap<String, Profile>,
}

/// A named signing profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Path to the keystore.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystore: Option<String>,
    /// Alias of the signing key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_alias: Option<String>,
    /// `jks` or `pkcs12`. Detected from the file when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystore_type: Option<String>,
    /// Keystore password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ks_pass: Option<String>,
    /// Key password. Falls back to the keystore password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pass: Option<String>,
    /// SDK build-tools directory holding apksigner and zipalign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_tools: Option<String>,
}

/// Values given on the command line (or through clap's `env` fallbacks).
#[derive(Debug, Clone, Default)]
pub struct SigningFlags {
    pub keystore: Option<PathBuf>,
    pub key_alias: Option<String>,
    pub keystore_type: Option<KeystoreType>,
    pub ks_pass: Option<String>,
    pub key_pass: Option<String>,
}

/// Signing settings after merging file, env and flags.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub keystore: Option<PathBuf>,
    pub key_alias: Option<String>,
    pub keystore_type: Option<KeystoreType>,
    pub ks_pass: Option<SecretString>,
    pub key_pass: Option<SecretString>,
    pub build_tools: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Credentials for signing. Fails with a hint when a required value is missing.
    pub fn credentials(&self) -> Result<SigningCredentials> {
        let keystore = self.keystore.clone().context(
            "No keystore given. Pass --ks, set APKSIGN_KEYSTORE or add 'keystore' to a profile.",
        )?;
        let key_alias = self.key_alias.clone().context(
            "No key alias given. Pass --ks-key-alias, set APKSIGN_KEY_ALIAS or add 'key_alias' to a profile.",
        )?;
        let keystore_password = self
            .ks_pass
            .clone()
            .context("No keystore password given. Pass --ks-pass or set APKSIGN_KS_PASS.")?;
        let key_password = self
            .key_pass
            .clone()
            .unwrap_or_else(|| keystore_password.clone());

        Ok(SigningCredentials {
            keystore,
            keystore_password,
            key_alias,
            key_password,
            keystore_type: self.keystore_type,
        })
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), Profile::default());
        Self {
            default_profile: "default".to_string(),
            profiles,
        }
    }
}

/// Returns the default config file path (~/.apksign/config.huml).
pub fn default_config_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".apksign/config.huml"))
        .context("Could not determine home directory")
}

/// Path of the config file in effect, honouring `APKSIGN_CONFIG`.
pub fn config_path() -> Result<PathBuf> {
    match std::env::var("APKSIGN_CONFIG") {
        Ok(p) => Ok(PathBuf::from(p)),
        Err(_) => default_config_path(),
    }
}

/// Reads and validates the config file.
///
/// A missing file is `Ok(None)`; an unreadable or invalid one is an error.
pub fn load_config() -> Result<Option<CliConfig>> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(None);
    }

    let content =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let config: CliConfig = huml_rs::serde::from_str(&content)
        .with_context(|| format!("Invalid HUML in {}", path.display()))?;

    validate_config(&config)?;
    check_file_permissions(&path);

    Ok(Some(config))
}

/// Checks the default profile exists and every keystore type parses.
fn validate_config(config: &CliConfig) -> Result<()> {
    if config.profiles.is_empty() {
        bail!("Config file must contain at least one profile");
    }

    if !config.profiles.contains_key(&config.default_profile) {
        bail!(
            "Default profile '{}' not found in profiles",
            config.default_profile
        );
    }

    for (name, profile) in &config.profiles {
        if profile.keystore.as_deref() == Some("") {
            bail!("Profile '{}' has an empty keystore path", name);
        }
        if let Some(t) = &profile.keystore_type {
            t.parse::<KeystoreType>()
                .map_err(|e| anyhow::anyhow!("Profile '{}': {}", name, e))?;
        }
    }

    Ok(())
}

/// Warns when the file is readable by other users.
///
/// Profiles may hold keystore passwords.
#[cfg(unix)]
fn check_file_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        // group/other bits
        if mode & 0o077 != 0 {
            eprintln!(
                "Warning: {} is accessible by other users (mode {:o}); run chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &std::path::Path) {}

/// Merges the signing settings for one run.
///
/// Priority order (highest to lowest):
/// 1. CLI flags (`--ks`, `--ks-key-alias`, `--ks-pass`, ...), with clap's
///    `APKSIGN_KS_PASS` / `APKSIGN_KEY_PASS` fallbacks
/// 2. Environment variables (`APKSIGN_KEYSTORE`, `APKSIGN_KEY_ALIAS`)
/// 3. Config file profile
/// 4. Defaults (key password = keystore password)
pub fn resolve_config(
    profile_flag: Option<&str>,
    flags: &SigningFlags,
    file_config: Option<CliConfig>,
) -> Result<ResolvedConfig> {
    let mut keystore: Option<PathBuf> = None;
    let mut key_alias: Option<String> = None;
    let mut keystore_type: Option<KeystoreType> = None;
    let mut ks_pass: Option<String> = None;
    let mut key_pass: Option<String> = None;
    let mut build_tools: Option<PathBuf> = None;

    // profile values first
    if let Some(config) = file_config {
        let profile_name = profile_flag.unwrap_or(&config.default_profile);
        if let Some(profile) = config.profiles.get(profile_name) {
            keystore = profile.keystore.as_ref().map(PathBuf::from);
            key_alias = profile.key_alias.clone();
            keystore_type = match &profile.keystore_type {
                Some(t) => Some(t.parse().map_err(anyhow::Error::msg)?),
                None => None,
            };
            ks_pass = profile.ks_pass.clone();
            key_pass = profile.key_pass.clone();
            build_tools = profile.build_tools.as_ref().map(PathBuf::from);
        } else if profile_flag.is_some() {
            bail!(
                "Profile '{}' not found. Run 'apksign config profiles' to see available profiles.",
                profile_name
            );
        }
    } else if let Some(requested_profile) = profile_flag {
        // --profile without a config file
        if requested_profile != "default" {
            bail!(
                "Profile '{}' not found. No config file exists. Run 'apksign config init' to create one.",
                requested_profile
            );
        }
    }

    // Apply environment variables (medium priority)
    if let Ok(v) = std::env::var("APKSIGN_KEYSTORE") {
        keystore = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("APKSIGN_KEY_ALIAS") {
        key_alias = Some(v);
    }

    // flags win
    if let Some(ks) = &flags.keystore {
        keystore = Some(ks.clone());
    }
    if let Some(alias) = &flags.key_alias {
        key_alias = Some(alias.clone());
    }
    if let Some(t) = flags.keystore_type {
        keystore_type = Some(t);
    }
    if let Some(p) = &flags.ks_pass {
        ks_pass = Some(p.clone());
    }
    if let Some(p) = &flags.key_pass {
        key_pass = Some(p.clone());
    }

    // apksigner's own default: the key password is the keystore password
    let key_pass = key_pass.or_else(|| ks_pass.clone());

    Ok(ResolvedConfig {
        keystore,
        key_alias,
        keystore_type,
        ks_pass: ks_pass.map(SecretString::from),
        key_pass: key_pass.map(SecretString::from),
        build_tools,
    })
}

/// Loads the config file, warning instead of failing on a broken file.
pub fn load_config_or_warn() -> Option<CliConfig> {
    load_config().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config file: {:#}", e);
        None
    })
}

/// Builds the tool configuration: environment first, then the profile's
/// build-tools directory for tools the environment does not pin.
pub fn tool_config(resolved: &ResolvedConfig, native_align: bool) -> Result<ToolConfig> {
    let mut tools = ToolConfig::from_env()?;

    if let Some(dir) = &resolved.build_tools {
        if std::env::var_os("APKSIGN_BUILD_TOOLS").is_none() {
            let from_profile = ToolConfig::with_build_tools(dir);
            if std::env::var_os("APKSIGN_APKSIGNER").is_none() {
                tools.apksigner = from_profile.apksigner;
            }
            if std::env::var_os("APKSIGN_ZIPALIGN").is_none() {
                tools.zipalign = from_profile.zipalign;
            }
        }
    }

    if native_align {
        tools.native_align = true;
    }

    Ok(tools)
}

/// Short description of a tool for status output.
pub fn describe_tool(tool: &ToolCommand) -> String {
    match tool.resolve() {
        Some(path) if tool.prefix_args.is_empty() => path.display().to_string(),
        Some(path) => format!("{} {}", path.display(), tool.prefix_args.join(" ")),
        None => format!("{} (not found)", tool),
    }
}
