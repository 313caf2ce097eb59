//! Appcast document model.
//!
//! An appcast is an RSS 2.0 document whose single `<channel>` lists update
//! `<item>`s, with Sparkle's vendor elements under [`SPARKLE_NS`].
//!
//! - [`xml`] - owned element tree read with `quick-xml`'s namespace-aware reader
//! - [`model`] - [`Feed`], [`Channel`], [`Entry`] and the conversion to/from the tree

mod model;
mod xml;

pub use model::{parse, serialize, Channel, Enclosure, Entry, Feed, PUBDATE_FORMAT};
pub use xml::{Element, Node, SPARKLE_NS, SPARKLE_PREFIX};
