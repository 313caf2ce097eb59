//! Parser for the output of Sparkle's `sign_update` tool.
//!
//! `sign_update` prints one line of enclosure attributes:
//!
//! ```text
//! sparkle:edSignature="MEUCIQ...==" length="41094400"
//! ```
//!
//! Values may contain `=` and, when quoted, spaces. There is no escape for an
//! embedded `"`.
use std::path::Path;

use crate::error::{read_capped, Error, Result};

/// SEC-014: `sign_update` output is a single short line.
const MAX_SIGNATURE_FILE_SIZE: u64 = 64 * 1024;

/// Ordered `key=value` attributes taken verbatim from a signature block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureAttributes {
    pairs: Vec<(String, String)>,
}

impl SignatureAttributes {
    /// Parses a signature block.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedSignatureBlock`] if the block is empty, a token has
    /// no `=`, a key is empty, or a quoted value is never closed.
    pub fn parse(text: &str) -> Result<Self> {
        let mut attrs = SignatureAttributes::default();

        for token in tokenize(text)? {
            let (key, raw_value) = token.split_once('=').ok_or_else(|| {
                Error::MalformedSignatureBlock(format!("token '{token}' has no '='"))
            })?;
            if key.is_empty() {
                return Err(Error::MalformedSignatureBlock(format!(
                    "token '{token}' has an empty key"
                )));
            }

            let value = match raw_value.strip_prefix('"') {
                Some(quoted) => quoted.strip_suffix('"').ok_or_else(|| {
                    Error::MalformedSignatureBlock(format!(
                        "value of '{key}' has an unterminated quote"
                    ))
                })?,
                None => raw_value,
            };
            attrs.insert(key, value);
        }

        if attrs.is_empty() {
            return Err(Error::MalformedSignatureBlock(
                "no attributes found".to_string(),
            ));
        }

        Ok(attrs)
    }

    /// Reads and parses a signature file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = read_capped(path, MAX_SIGNATURE_FILE_SIZE)?;
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::MalformedSignatureBlock(format!("{} is not UTF-8: {e}", path.display()))
        })?;
        let attrs = Self::parse(&text)?;
        tracing::debug!(
            path = %path.display(),
            keys = ?attrs.keys().collect::<Vec<_>>(),
            "Loaded signature attributes"
        );
        Ok(attrs)
    }

    /// Last write wins; a repeated key keeps its first position.
    fn insert(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Splits on whitespace that is not inside double quotes.
fn tokenize(text: &str) -> Result<Vec<&str>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;

    for (idx, c) in text.char_indices() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                start.get_or_insert(idx);
            }
            c if c.is_whitespace() && !in_quotes => {
                if let Some(s) = start.take() {
                    tokens.push(&text[s..idx]);
                }
            }
            _ => {
                start.get_or_insert(idx);
            }
        }
    }

    if in_quotes {
        return Err(Error::MalformedSignatureBlock(
            "unterminated quote".to_string(),
        ));
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }

    Ok(tokens)
}
