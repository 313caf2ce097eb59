use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use tipcast::{update, Config, Paths, Release};

#[derive(Parser, Debug)]
#[command(
    name = "tipcast",
    about = "Add a tip build to a Sparkle appcast, pruning old and duplicate entries"
)]
struct Args {
    /// Existing appcast to read
    #[arg(long, value_name = "FILE", default_value = "appcast.xml")]
    appcast: PathBuf,

    /// Output of Sparkle's sign_update for the new build
    #[arg(long, value_name = "FILE", default_value = "sign_update.txt")]
    signature: PathBuf,

    /// Where to write the new appcast (must differ from --appcast)
    #[arg(long, value_name = "FILE", default_value = "appcast_new.xml")]
    output: PathBuf,

    /// Optional TOML config file
    #[arg(long, value_name = "FILE", default_value = "tipcast.toml")]
    config: PathBuf,

    /// Build number of the new release
    #[arg(long, env = "GHOSTTY_BUILD")]
    build: Option<String>,

    /// Short commit hash of the new release
    #[arg(long, env = "GHOSTTY_COMMIT")]
    commit: Option<String>,

    /// Full commit hash of the new release
    #[arg(long, env = "GHOSTTY_COMMIT_LONG")]
    commit_long: Option<String>,

    /// Override the number of existing entries to keep
    #[arg(long, value_name = "N")]
    retention: Option<usize>,

    /// Override the minimum macOS version of the new entry
    #[arg(long, value_name = "VERSION")]
    minimum_system_version: Option<String>,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the summary line.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    if let Some(retention) = args.retention {
        config.retention = retention;
    }
    if let Some(minimum) = args.minimum_system_version {
        config.minimum_system_version = minimum;
    }
    config.validate().context("Invalid configuration")?;
    tracing::debug!(?config, "Effective configuration");

    let release = Release::new(args.build, args.commit, args.commit_long)
        .context("Set --build/--commit/--commit-long or GHOSTTY_BUILD/GHOSTTY_COMMIT/GHOSTTY_COMMIT_LONG")?;

    let paths = Paths {
        appcast: args.appcast,
        signature: args.signature,
        output: args.output,
    };

    let report = update(&paths, &release, &config, Utc::now())?;

    println!(
        "Wrote {} with build {} ({} kept, {} duplicate, {} invalid, {} pruned)",
        paths.output.display(),
        release.build,
        report.retained,
        report.dropped_duplicate,
        report.dropped_invalid,
        report.pruned
    );
    Ok(())
}
