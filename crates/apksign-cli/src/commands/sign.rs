//! `apksign sign`: run the three-stage signing pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apksign_core::models::{KeystoreType, SidecarPolicy, SignReport};
use apksign_core::signing::BuildToolsBackend;
use apksign_core::{PipelineEvent, PipelineOptions, SignRequest, SigningPipeline};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{SigningFlags, load_config_or_warn, resolve_config, tool_config};

#[derive(Args)]
pub struct SignArgs {
    /// Unsigned APK
    pub unsigned: PathBuf,

    /// Where to write the signed APK
    pub signed: PathBuf,

    #[command(flatten)]
    pub keystore: KeystoreArgs,

    /// Keep the .idsig sidecar (enables v4 signing)
    #[arg(long)]
    pub keep_idsig: bool,

    /// Align in-process instead of running zipalign
    #[arg(long)]
    pub native_align: bool,

    /// Name intermediates <name>_v1.apk / <name>_v1_align.apk without a run token
    #[arg(long)]
    pub stable_names: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Keystore selection shared by the signing and keystore commands.
#[derive(Args, Clone, Default)]
pub struct KeystoreArgs {
    /// Keystore file (JKS or PKCS12)
    #[arg(long = "ks")]
    pub keystore: Option<PathBuf>,

    /// Alias of the signing key
    #[arg(long = "ks-key-alias")]
    pub key_alias: Option<String>,

    /// Keystore type: jks or pkcs12 (detected when omitted)
    #[arg(long = "ks-type")]
    pub keystore_type: Option<KeystoreType>,

    /// Keystore password
    #[arg(long = "ks-pass", env = "APKSIGN_KS_PASS", hide_env_values = true)]
    pub ks_pass: Option<String>,

    /// Key password (defaults to the keystore password)
    #[arg(long = "key-pass", env = "APKSIGN_KEY_PASS", hide_env_values = true)]
    pub key_pass: Option<String>,
}

impl KeystoreArgs {
    pub fn flags(&self) -> SigningFlags {
        SigningFlags {
            keystore: self.keystore.clone(),
            key_alias: self.key_alias.clone(),
            keystore_type: self.keystore_type,
            ks_pass: self.ks_pass.clone(),
            key_pass: self.key_pass.clone(),
        }
    }
}

pub async fn handle_sign_command(profile: Option<&str>, args: SignArgs) -> Result<()> {
    let resolved = resolve_config(profile, &args.keystore.flags(), load_config_or_warn())?;
    let credentials = resolved.credentials()?;
    let tools = tool_config(&resolved, args.native_align)?;
    tracing::debug!("apksigner: {}, zipalign: {}", tools.apksigner, tools.zipalign);

    let options = PipelineOptions {
        sidecar_policy: if args.keep_idsig {
            SidecarPolicy::Keep
        } else {
            SidecarPolicy::Remove
        },
        unique_intermediates: !args.stable_names,
        ..PipelineOptions::default()
    };

    let mut pipeline =
        SigningPipeline::new(Arc::new(BuildToolsBackend::with_config(tools))).with_options(options);

    let spinner = if args.json { None } else { Some(stage_spinner()?) };
    if let Some(spinner) = &spinner {
        let spinner = spinner.clone();
        pipeline = pipeline.with_observer(move |event| report_progress(&spinner, event));
    }

    let request = SignRequest::new(&args.unsigned, &args.signed, credentials);
    let result = pipeline.sign(&request).await;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = result.with_context(|| format!("Failed to sign {}", args.unsigned.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn stage_spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.yellow} {msg}")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

fn report_progress(spinner: &ProgressBar, event: &PipelineEvent) {
    match event {
        PipelineEvent::StageStarted { stage } => {
            spinner.set_message(format!("{}...", stage.description()));
        }
        PipelineEvent::StageFinished { stage, elapsed_ms } => {
            spinner.println(format!(
                "{} {} {}",
                style("✓").green().bold(),
                stage.description(),
                style(format!("({} ms)", elapsed_ms)).dim()
            ));
        }
        PipelineEvent::StageFailed { stage } => {
            spinner.println(format!("{} {}", style("x").red(), stage.description()));
        }
    }
}

fn print_report(report: &SignReport) {
    println!();
    println!(
        "{} Signed {}",
        style("✓").green().bold(),
        style(report.output.display()).cyan()
    );
    println!("  {} {} bytes", style("Size:").dim(), report.size);
    println!("  {} {}", style("SHA-256:").dim(), report.sha256);
    println!("  {} {} ms", style("Time:").dim(), report.total_elapsed_ms());
    if let Some(sidecar) = &report.sidecar {
        println!("  {} {}", style("Sidecar:").dim(), sidecar.display());
    } else if report.sidecar_removed {
        println!("  {} removed", style("Sidecar:").dim());
    }
}
