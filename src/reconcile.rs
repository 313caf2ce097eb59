//! Merges one new build into a prior appcast.
//!
//! The prior [`Feed`] is read-only; [`reconcile`] constructs the next feed:
//!
//! 1. entries without a parseable `pubDate` are dropped
//! 2. entries with the candidate's version are dropped
//! 3. the remainder is sorted by publish time and the oldest are pruned
//!    until at most `retention` are left
//! 4. the candidate is appended
//!
//! Pruning runs against the pre-insertion list, so a full channel holds
//! `retention + 1` entries after a run and is trimmed back on the next one.
use chrono::{DateTime, Utc};

use crate::appcast::{Channel, Enclosure, Entry, Feed, PUBDATE_FORMAT};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::signature::SignatureAttributes;

/// Identifiers of the build being published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub build: String,
    pub commit: String,
    pub commit_long: String,
}

impl Release {
    /// # Errors
    ///
    /// [`Error::MissingRequiredInput`] naming the first identifier that is
    /// absent or blank.
    pub fn new(
        build: Option<String>,
        commit: Option<String>,
        commit_long: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            build: required("build", build)?,
            commit: required("commit", commit)?,
            commit_long: required("commit_long", commit_long)?,
        })
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::MissingRequiredInput(name.to_string())),
    }
}

/// What a reconciliation pass removed and kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Entries dropped for a missing or unparseable `pubDate`.
    pub dropped_invalid: usize,
    /// Entries dropped because they carried the candidate's version.
    pub dropped_duplicate: usize,
    /// Oldest entries dropped by the retention cap.
    pub pruned: usize,
    /// Pre-existing entries that survived.
    pub retained: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub feed: Feed,
    pub report: ReconcileReport,
}

/// Builds the entry announcing `release`, published at `now`.
pub fn build_entry(
    release: &Release,
    signature: &SignatureAttributes,
    config: &Config,
    now: DateTime<Utc>,
) -> Entry {
    let date = now.format("%Y-%m-%d").to_string();
    let repo = config.repository();

    let description = format!(
        r#"
<p>
Automated build from commit <code><a href="{repo}/commits/{commit_long}">{commit}</a></code>
on {date}.
</p>
<p>
These are automatic per-commit builds generated from the main Git branch.
We do not generate any release notes for these builds. You can view the full
commit history <a href="{repo}">on GitHub</a> for all changes.
</p>
"#,
        commit_long = release.commit_long,
        commit = release.commit,
    );

    let mut enclosure = Enclosure::default();
    enclosure.set("url", config.download_url(&release.commit_long));
    enclosure.set("type", config.enclosure_type.as_str());
    for (key, value) in signature.iter() {
        enclosure.set(key, value);
    }

    Entry {
        title: Some(format!("Build {}", release.build)),
        pub_date: Some(now.format(PUBDATE_FORMAT).to_string()),
        version: Some(release.build.clone()),
        short_version: Some(format!("{} ({date})", release.commit)),
        minimum_system_version: Some(config.minimum_system_version.clone()),
        description: Some(description),
        enclosure: Some(enclosure),
        extra: Vec::new(),
    }
}

/// Produces the next feed from `feed` plus `candidate`.
///
/// # Errors
///
/// [`Error::MissingRequiredInput`] if the candidate has no version.
pub fn reconcile(feed: &Feed, candidate: Entry, retention: usize) -> Result<Reconciliation> {
    let version = candidate
        .version
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingRequiredInput("version".to_string()))?;

    let mut report = ReconcileReport::default();
    let mut dated = Vec::with_capacity(feed.channel.entries.len());

    for entry in &feed.channel.entries {
        let Some(published) = entry.published() else {
            tracing::warn!(
                version = entry.version.as_deref().unwrap_or("<none>"),
                pub_date = entry.pub_date.as_deref().unwrap_or("<none>"),
                "Dropping entry without a parseable pubDate"
            );
            report.dropped_invalid += 1;
            continue;
        };

        if entry.version.as_deref() == Some(version.as_str()) {
            tracing::info!(version = %version, "Replacing existing entry for this version");
            report.dropped_duplicate += 1;
            continue;
        }

        dated.push((published, entry));
    }

    // Stable: entries published at the same instant keep document order.
    dated.sort_by_key(|(published, _)| *published);

    if dated.len() > retention {
        let excess = dated.len() - retention;
        for (published, entry) in dated.drain(..excess) {
            tracing::debug!(
                version = entry.version.as_deref().unwrap_or("<none>"),
                published = %published,
                "Pruning entry beyond retention"
            );
        }
        report.pruned = excess;
    }
    report.retained = dated.len();

    let mut entries: Vec<Entry> = dated.into_iter().map(|(_, entry)| entry.clone()).collect();
    entries.push(candidate);

    tracing::info!(
        version = %version,
        retained = report.retained,
        dropped_invalid = report.dropped_invalid,
        dropped_duplicate = report.dropped_duplicate,
        pruned = report.pruned,
        "Reconciled appcast"
    );

    Ok(Reconciliation {
        feed: Feed {
            name: feed.name.clone(),
            attributes: feed.attributes.clone(),
            before_channel: feed.before_channel.clone(),
            channel: Channel {
                attributes: feed.channel.attributes.clone(),
                metadata: feed.channel.metadata.clone(),
                entries,
            },
            after_channel: feed.after_channel.clone(),
        },
        report,
    })
}
