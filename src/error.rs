use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that abort an appcast update.
///
/// Every variant is fatal for the run: the caller must not write an output
/// document when one of these is returned. Entries with an unparseable
/// `pubDate` are not represented here; the reconciler drops them locally.
#[derive(Debug, Error)]
pub enum Error {
    /// The prior appcast is not well-formed XML or lacks a `<channel>`.
    #[error("Malformed appcast: {0}")]
    MalformedFeed(String),

    /// The `sign_update` output does not follow the `key=value` grammar.
    #[error("Malformed signature block: {0}")]
    MalformedSignatureBlock(String),

    /// A required build identifier was absent or blank.
    #[error("Missing required input: {0}")]
    MissingRequiredInput(String),

    /// Reading an input file failed.
    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SEC-014: Input file exceeds the size allowed for its kind.
    #[error("'{}' is too large: {size} bytes (max {max} bytes)", .path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    /// The XML writer rejected an event while rendering the appcast.
    #[error("Failed to render appcast: {0}")]
    Render(String),
}

impl Error {
    pub(crate) fn malformed_feed(err: impl std::fmt::Display) -> Self {
        Error::MalformedFeed(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reads a whole file into memory, refusing anything larger than `max` bytes.
///
/// The handle is dropped before returning; nothing is streamed.
pub(crate) fn read_capped(path: &std::path::Path, max: u64) -> Result<Vec<u8>> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let meta = std::fs::metadata(path).map_err(io_err)?;
    if meta.len() > max {
        return Err(Error::TooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max,
        });
    }

    std::fs::read(path).map_err(io_err)
}
