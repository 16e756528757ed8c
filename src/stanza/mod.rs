//! Stanza object model.
//!
//! The federation stream hands the gateway fully decoded stanzas; this module
//! is the owned element tree the rest of the crate reads and builds. Elements
//! carry a local name, an optional namespace, ordered attributes and either
//! text or child elements.

mod attrs;
mod builder;
mod node;

pub use attrs::AttrParser;
pub use builder::NodeBuilder;
pub use node::{Attrs, Node, NodeContent};

use thiserror::Error;

/// Errors raised while reading stanza content.
#[derive(Debug, Clone, Error)]
pub enum StanzaError {
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),

    #[error("missing required element: {0}")]
    MissingElement(&'static str),

    #[error("parse error: {0}")]
    Parse(String),
}
