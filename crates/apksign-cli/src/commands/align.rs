//! `apksign align`: zip-align an archive or report its alignment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use apksign_core::models::AlignOptions;
use apksign_core::signing::{AlignmentCheck, BuildToolsBackend, NativeAligner, SigningBackend};
use clap::Args;
use console::style;

use crate::config::{SigningFlags, load_config_or_warn, resolve_config, tool_config};

#[derive(Args)]
pub struct AlignArgs {
    /// Archive to align (or inspect with --check)
    pub input: PathBuf,

    /// Where to write the aligned archive
    #[arg(required_unless_present = "check")]
    pub output: Option<PathBuf>,

    /// Alignment boundary in bytes for stored entries
    #[arg(long, default_value_t = 4)]
    pub boundary: u16,

    /// Only report misaligned entries; exits non-zero if any are found
    #[arg(long)]
    pub check: bool,

    /// Align in-process instead of running zipalign
    #[arg(long)]
    pub native: bool,
}

pub async fn handle_align_command(profile: Option<&str>, args: AlignArgs) -> Result<()> {
    let options = AlignOptions {
        boundary: args.boundary,
        ..AlignOptions::default()
    };

    if args.check {
        return check(&args.input, &options).await;
    }

    let Some(output) = args.output.as_deref() else {
        bail!("An output path is required unless --check is given");
    };

    let resolved = resolve_config(profile, &SigningFlags::default(), load_config_or_warn())?;
    let backend = BuildToolsBackend::with_config(tool_config(&resolved, args.native)?);
    backend
        .align(&args.input, output, &options)
        .await
        .with_context(|| format!("Failed to align {}", args.input.display()))?;

    let result = NativeAligner::new().check(output, &options).await?;
    println!(
        "{} Aligned {} entries into {}",
        style("✓").green().bold(),
        result.entries,
        style(output.display()).cyan()
    );

    Ok(())
}

async fn check(apk: &Path, options: &AlignOptions) -> Result<()> {
    let result = NativeAligner::new()
        .check(apk, options)
        .await
        .with_context(|| format!("Failed to inspect {}", apk.display()))?;

    print_check(apk, &result);

    if !result.is_aligned() {
        bail!("{} is not aligned", apk.display());
    }
    Ok(())
}

fn print_check(apk: &Path, result: &AlignmentCheck) {
    if result.is_aligned() {
        println!(
            "{} {} ({} entries) is aligned",
            style("✓").green().bold(),
            apk.display(),
            result.entries
        );
        return;
    }

    println!("{} {} is not aligned", style("x").red().bold(), apk.display());
    for entry in &result.misaligned {
        println!(
            "  {} at offset {} (needs {})",
            entry.name, entry.data_offset, entry.required
        );
    }
    for name in &result.compressed_required_stored {
        println!("  {} is compressed but must be stored", name);
    }
}
