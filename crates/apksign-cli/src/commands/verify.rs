//! `apksign verify`: check the signatures of a signed APK.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use apksign_core::models::VerifyReport;
use apksign_core::signing::{ApkVerifier, BuildToolsBackend};
use clap::Args;
use console::style;

use crate::config::{SigningFlags, load_config_or_warn, resolve_config, tool_config};

#[derive(Args)]
pub struct VerifyArgs {
    /// Signed APK to verify
    pub apk: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn handle_verify_command(profile: Option<&str>, args: VerifyArgs) -> Result<()> {
    let resolved = resolve_config(profile, &SigningFlags::default(), load_config_or_warn())?;
    let backend = BuildToolsBackend::with_config(tool_config(&resolved, false)?);

    let report = backend
        .verify(&args.apk)
        .await
        .with_context(|| format!("Failed to verify {}", args.apk.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&args.apk, &report);
    }

    if !report.verified {
        bail!("{} does not verify", args.apk.display());
    }

    Ok(())
}

fn print_report(apk: &std::path::Path, report: &VerifyReport) {
    let mark = |ok: bool| {
        if ok {
            style("yes").green()
        } else {
            style("no").dim()
        }
    };

    if report.verified {
        println!("{} {} verifies", style("✓").green().bold(), apk.display());
    } else {
        println!("{} {} does not verify", style("x").red().bold(), apk.display());
    }
    println!("  v1 (JAR):  {}", mark(report.v1));
    println!("  v2:        {}", mark(report.v2));
    println!("  v3:        {}", mark(report.v3));
    println!("  v4:        {}", mark(report.v4));
    println!("  Signers:   {}", report.signers);

    for warning in &report.warnings {
        println!("  {}", style(warning).yellow());
    }
    for error in &report.errors {
        println!("  {}", style(error).red());
    }
}
