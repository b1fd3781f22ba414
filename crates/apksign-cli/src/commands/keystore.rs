//! `apksign keystore` commands for inspecting signing keystores.

use anyhow::{Context, Result, bail};
use apksign_core::signing::{KeystoreInfo, detect_keystore_type_at, validate_keystore};
use clap::Subcommand;
use console::style;

use super::sign::KeystoreArgs;
use crate::config::{load_config_or_warn, resolve_config, tool_config};

#[derive(Subcommand)]
pub enum KeystoreCommands {
    /// Check that the password opens the keystore and the alias holds a key
    Check {
        #[command(flatten)]
        keystore: KeystoreArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the detected keystore type
    Info {
        #[command(flatten)]
        keystore: KeystoreArgs,
    },
}

pub async fn handle_keystore_command(profile: Option<&str>, cmd: KeystoreCommands) -> Result<()> {
    match cmd {
        KeystoreCommands::Check { keystore, json } => check_keystore(profile, keystore, json).await,
        KeystoreCommands::Info { keystore } => keystore_info(profile, keystore).await,
    }
}

async fn check_keystore(profile: Option<&str>, args: KeystoreArgs, json: bool) -> Result<()> {
    let resolved = resolve_config(profile, &args.flags(), load_config_or_warn())?;
    let credentials = resolved.credentials()?;
    let tools = tool_config(&resolved, false)?;

    let info = validate_keystore(&credentials, &tools.keytool, tools.timeout_secs)
        .await
        .with_context(|| format!("Keystore check failed for {}", credentials.keystore.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }

    if !info.has_private_key() {
        bail!(
            "Alias '{}' is a {}, not a private key entry",
            info.alias,
            info.entry_type.as_deref().unwrap_or("unknown entry")
        );
    }

    Ok(())
}

async fn keystore_info(profile: Option<&str>, args: KeystoreArgs) -> Result<()> {
    let resolved = resolve_config(profile, &args.flags(), load_config_or_warn())?;
    let Some(path) = resolved.keystore else {
        bail!("No keystore given. Pass --ks, set APKSIGN_KEYSTORE or add 'keystore' to a profile.");
    };

    let detected = detect_keystore_type_at(&path).await?;
    let size = tokio::fs::metadata(&path).await?.len();

    println!("Keystore: {}", path.display());
    println!("  Type:   {} (detected)", detected.java_name());
    if let Some(configured) = resolved.keystore_type {
        if configured != detected {
            println!(
                "  {} configured type {} differs from detected type",
                style("!").yellow(),
                configured.java_name()
            );
        }
    }
    println!("  Size:   {} bytes", size);

    Ok(())
}

fn print_info(info: &KeystoreInfo) {
    println!(
        "{} {} keystore opens, alias '{}' found",
        style("✓").green().bold(),
        info.keystore_type.java_name(),
        info.alias
    );
    if let Some(entry_type) = &info.entry_type {
        println!("  {} {}", style("Entry type:").dim(), entry_type);
    }
    if let Some(fingerprint) = &info.sha256_fingerprint {
        println!("  {} {}", style("SHA-256:").dim(), fingerprint);
    }
    if let Some(valid) = &info.valid {
        println!("  {} {}", style("Valid from:").dim(), valid);
    }
}
