use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    align::{AlignArgs, handle_align_command},
    config::{ConfigCommands, handle_config_command},
    keystore::{KeystoreCommands, handle_keystore_command},
    sign::{SignArgs, handle_sign_command},
    tools::handle_tools_command,
    verify::{VerifyArgs, handle_verify_command},
};

#[derive(Parser)]
#[command(name = "apksign")]
#[command(about = "Sign, align and verify Android APKs", long_about = None)]
struct Cli {
    /// Configuration profile to use
    #[arg(long, global = true)]
    profile: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an unsigned APK: v1 sign, align, then v1 + v2 + v3 sign
    Sign(SignArgs),

    /// Verify the signatures of an APK
    Verify(VerifyArgs),

    /// Zip-align an archive, or check its alignment
    Align(AlignArgs),

    /// Keystore inspection
    #[command(subcommand)]
    Keystore(KeystoreCommands),

    /// Show the resolved apksigner, zipalign and keytool
    Tools,

    /// Show CLI version
    Version,

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "apksign_core=info,apksign_cli=info",
        1 => "apksign_core=debug,apksign_cli=debug",
        _ => "apksign_core=trace,apksign_cli=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (doesn't override existing env vars)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Sign(args) => handle_sign_command(profile, args).await?,
        Commands::Verify(args) => handle_verify_command(profile, args).await?,
        Commands::Align(args) => handle_align_command(profile, args).await?,
        Commands::Keystore(cmd) => handle_keystore_command(profile, cmd).await?,
        Commands::Tools => handle_tools_command(profile)?,
        Commands::Version => println!("apksign {}", apksign_core::VERSION),
        Commands::Config(cmd) => handle_config_command(cmd)?,
    }

    Ok(())
}
