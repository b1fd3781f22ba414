//! `apksign config` commands for managing signing profiles.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use apksign_core::models::KeystoreType;

use crate::config::{CliConfig, Profile, config_path, load_config};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create a new config file with a default profile
    Init {
        /// Keystore path for the default profile
        #[arg(long = "ks")]
        keystore: Option<String>,

        /// Key alias for the default profile
        #[arg(long = "ks-key-alias")]
        key_alias: Option<String>,

        /// Replace a config file that already exists
        #[arg(long)]
        force: bool,
    },

    /// Update a signing profile, creating it when missing
    Set {
        /// Profile to update
        #[arg(long, default_value = "default")]
        profile: String,

        /// Keystore path
        #[arg(long = "ks")]
        keystore: Option<String>,

        /// Key alias
        #[arg(long = "ks-key-alias")]
        key_alias: Option<String>,

        /// Keystore format: jks or pkcs12
        #[arg(long = "ks-type")]
        keystore_type: Option<KeystoreType>,

        /// Keystore password (stored in plain text, file is chmod 600)
        #[arg(long = "ks-pass")]
        ks_pass: Option<String>,

        /// Key password
        #[arg(long = "key-pass")]
        key_pass: Option<String>,

        /// SDK build-tools directory
        #[arg(long)]
        build_tools: Option<String>,

        /// Make this the profile used when --profile is omitted
        #[arg(long)]
        default: bool,
    },

    /// Print every profile with secrets masked
    Show {
        /// Show password values (masked by default)
        #[arg(long)]
        show_secrets: bool,
    },

    /// List profile names
    Profiles,

    /// Show config file path
    Path,
}

/// Values `config set` applies to a profile.
#[derive(Default)]
struct ProfileUpdate {
    keystore: Option<String>,
    key_alias: Option<String>,
    keystore_type: Option<KeystoreType>,
    ks_pass: Option<String>,
    key_pass: Option<String>,
    build_tools: Option<String>,
}

impl ProfileUpdate {
    /// Applies the update, returning whether anything was given.
    fn apply(self, profile: &mut Profile) -> bool {
        let mut updated = false;
        if let Some(v) = self.keystore {
            profile.keystore = Some(v);
            updated = true;
        }
        if let Some(v) = self.key_alias {
            profile.key_alias = Some(v);
            updated = true;
        }
        if let Some(v) = self.keystore_type {
            profile.keystore_type = Some(v.as_str().to_string());
            updated = true;
        }
        if let Some(v) = self.ks_pass {
            profile.ks_pass = Some(v);
            updated = true;
        }
        if let Some(v) = self.key_pass {
            profile.key_pass = Some(v);
            updated = true;
        }
        if let Some(v) = self.build_tools {
            profile.build_tools = Some(v);
            updated = true;
        }
        updated
    }
}

pub fn handle_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init {
            keystore,
            key_alias,
            force,
        } => init_config(keystore, key_alias, force),
        ConfigCommands::Set {
            profile,
            keystore,
            key_alias,
            keystore_type,
            ks_pass,
            key_pass,
            build_tools,
            default,
        } => set_config(
            profile,
            ProfileUpdate {
                keystore,
                key_alias,
                keystore_type,
                ks_pass,
                key_pass,
                build_tools,
            },
            default,
        ),
        ConfigCommands::Show { show_secrets } => show_config(show_secrets),
        ConfigCommands::Profiles => list_profiles(),
        ConfigCommands::Path => show_path(),
    }
}

/// Writes a fresh config file holding one `default` profile.
fn init_config(keystore: Option<String>, key_alias: Option<String>, force: bool) -> Result<()> {
    let path = config_path()?;

    if path.exists() && !force {
        bail!(
            "{} already exists (pass --force to replace it)",
            path.display()
        );
    }

    let mut profiles = HashMap::new();
    profiles.insert(
        "default".to_string(),
        Profile {
            keystore,
            key_alias,
            ..Profile::default()
        },
    );
    let config = CliConfig {
        default_profile: "default".to_string(),
        profiles,
    };

    ensure_parent_dir(&path)?;
    write_config(&path, &config)?;

    println!("Created config file at {}", path.display());
    println!();
    println!("To add a release profile:");
    println!("  apksign config set --profile release --ks ~/keys/release.jks --ks-key-alias upload");
    println!();
    println!("Passwords are best passed through APKSIGN_KS_PASS / APKSIGN_KEY_PASS.");

    Ok(())
}

/// Applies `config set` to one profile.
fn set_config(profile_name: String, update: ProfileUpdate, set_default: bool) -> Result<()> {
    let path = config_path()?;

    let mut config = load_config()?.unwrap_or_else(|| CliConfig {
        default_profile: profile_name.clone(),
        profiles: HashMap::new(),
    });

    let profile = config.profiles.entry(profile_name.clone()).or_default();
    let mut updated = update.apply(profile);

    if set_default && config.default_profile != profile_name {
        config.default_profile = profile_name.clone();
        updated = true;
    }

    if !updated && !set_default {
        println!("No changes specified. Use --ks, --ks-key-alias, --ks-type, --ks-pass, --key-pass, --build-tools or --default.");
        return Ok(());
    }

    ensure_parent_dir(&path)?;
    write_config(&path, &config)?;

    println!("Profile '{}' saved", profile_name);
    if set_default {
        println!("Default profile is now '{}'", profile_name);
    }

    Ok(())
}

/// Prints the profiles, masking passwords unless asked not to.
fn show_config(show_secrets: bool) -> Result<()> {
    let path = config_path()?;

    let config = match load_config()? {
        Some(c) => c,
        None => {
            println!("No config file found at {}", path.display());
            println!();
            println!("Run 'apksign config init' to create a config file.");
            return Ok(());
        }
    };

    println!("Config file: {}", path.display());
    println!("Default profile: {}", config.default_profile);
    println!();

    let mut names: Vec<_> = config.profiles.keys().collect();
    names.sort();

    for name in names {
        let profile = &config.profiles[name];
        let marker = if name == &config.default_profile { " *" } else { "" };

        println!("[{}]{}", name, marker);
        println!("  Keystore:    {}", profile.keystore.as_deref().unwrap_or("(not set)"));
        println!("  Key alias:   {}", profile.key_alias.as_deref().unwrap_or("(not set)"));
        println!(
            "  Type:        {}",
            profile.keystore_type.as_deref().unwrap_or("(detect)")
        );
        println!("  Build tools: {}", profile.build_tools.as_deref().unwrap_or("(auto)"));
        for (label, secret) in [("Ks pass: ", &profile.ks_pass), ("Key pass:", &profile.key_pass)] {
            match secret {
                Some(value) if show_secrets => println!("  {}    {}", label, value),
                Some(value) => println!(
                    "  {}    {} (use --show-secrets to reveal)",
                    label,
                    mask_secret(value)
                ),
                None => println!("  {}    (not set)", label),
            }
        }
        println!();
    }

    Ok(())
}

/// List profile names.
fn list_profiles() -> Result<()> {
    let config = match load_config()? {
        Some(c) => c,
        None => {
            println!("No config file found. Run 'apksign config init' to create one.");
            return Ok(());
        }
    };

    let mut names: Vec<_> = config.profiles.keys().collect();
    names.sort();

    println!("Profiles:");
    for name in names {
        if name == &config.default_profile {
            println!("  {} *", name);
        } else {
            println!("  {}", name);
        }
    }
    println!();
    println!("(* marks the default)");

    Ok(())
}

fn show_path() -> Result<()> {
    println!("{}", config_path()?.display());

    if let Ok(env_path) = std::env::var("APKSIGN_CONFIG") {
        println!();
        println!("Note: APKSIGN_CONFIG is set to: {}", env_path);
    }

    Ok(())
}

/// Mask a secret for display (show first 2 and last 2 characters).
/// Requires at least 10 characters to show partial content.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 10 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Creates the config directory (owner-only) if needed.
fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.exists() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        #[cfg(unix)]
        {
            let permissions = fs::Permissions::from_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

/// Writes the config as HUML, readable by the owner only.
fn write_config(path: &Path, config: &CliConfig) -> Result<()> {
    let content = serialize_to_huml(config);

    fs::write(path, &content).with_context(|| format!("Failed to write {}", path.display()))?;

    // Owner read/write only, profiles can hold passwords
    #[cfg(unix)]
    {
        let permissions = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

/// HUML string literal with `\` and `"` escaped.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn serialize_to_huml(config: &CliConfig) -> String {
    let mut output = String::new();

    output.push_str("%HUML v0.2.0\n");
    output.push_str(&format!("default_profile: {}\n", quote(&config.default_profile)));
    output.push('\n');
    output.push_str("profiles::\n");

    // Stable order keeps diffs of the file small
    let mut profile_names: Vec<_> = config.profiles.keys().collect();
    profile_names.sort();

    for name in profile_names {
        let profile = &config.profiles[name];
        let fields = [
            ("keystore", &profile.keystore),
            ("key_alias", &profile.key_alias),
            ("keystore_type", &profile.keystore_type),
            ("ks_pass", &profile.ks_pass),
            ("key_pass", &profile.key_pass),
            ("build_tools", &profile.build_tools),
        ];

        if fields.iter().all(|(_, v)| v.is_none()) {
            output.push_str(&format!("  {}:: {{}}\n", name));
        } else {
            output.push_str(&format!("  {}::\n", name));
            for (key, value) in fields {
                if let Some(v) = value {
                    output.push_str(&format!("    {}: {}\n", key, quote(v)));
                }
            }
        }
        output.push('\n');
    }

    output
}
