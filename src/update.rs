use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::appcast;
use crate::config::Config;
use crate::error::read_capped;
use crate::output::{ensure_distinct, write_atomic};
use crate::reconcile::{build_entry, reconcile, ReconcileReport, Release};
use crate::signature::SignatureAttributes;

/// Appcasts are bounded by the retention cap; anything near this is not one.
const MAX_APPCAST_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Files touched by one run.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Prior appcast (read only).
    pub appcast: PathBuf,
    /// `sign_update` output for the new artifact.
    pub signature: PathBuf,
    /// Where the new appcast is written. Must differ from `appcast`.
    pub output: PathBuf,
}

/// Runs the whole update: load inputs, reconcile, write the new appcast.
///
/// Every input is read and validated before the output is touched, so a
/// failure leaves no output file behind.
pub fn update(
    paths: &Paths,
    release: &Release,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    ensure_distinct(&paths.appcast, &paths.output)?;

    let signature = SignatureAttributes::load(&paths.signature)
        .with_context(|| format!("Failed to load signature from '{}'", paths.signature.display()))?;

    let document = read_capped(&paths.appcast, MAX_APPCAST_SIZE)?;
    let feed = appcast::parse(&document)
        .with_context(|| format!("Failed to parse appcast '{}'", paths.appcast.display()))?;

    let candidate = build_entry(release, &signature, config, now);
    let reconciliation = reconcile(&feed, candidate, config.retention)?;

    let rendered = appcast::serialize(&reconciliation.feed)?;
    write_atomic(&paths.output, &rendered)?;

    tracing::info!(
        build = %release.build,
        commit = %release.commit,
        output = %paths.output.display(),
        entries = reconciliation.feed.channel.entries.len(),
        "Appcast updated"
    );
    Ok(reconciliation.report)
}
