//! Maintains the Sparkle appcast for automated tip builds.
//!
//! Each run takes the previous appcast, the `sign_update` output for a fresh
//! build, and that build's identifiers, and writes a new appcast in which:
//!
//! - the new build is the last entry,
//! - no other entry shares its version,
//! - entries with an unreadable `pubDate` are gone,
//! - at most [`Config::retention`] older entries remain, newest kept.
//!
//! ```ignore
//! use tipcast::{update, Config, Paths, Release};
//!
//! let release = Release::new(Some("1234".into()), Some("abc1234".into()), Some(long))?;
//! let report = update(&paths, &release, &Config::default(), chrono::Utc::now())?;
//! ```

pub mod appcast;
pub mod config;
pub mod error;
pub mod output;
pub mod reconcile;
pub mod signature;
mod update;

pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use reconcile::{build_entry, reconcile, ReconcileReport, Reconciliation, Release};
pub use signature::SignatureAttributes;
pub use update::{update, Paths};
