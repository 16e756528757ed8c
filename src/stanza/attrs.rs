use super::StanzaError;
use super::node::Node;

/// Attribute extraction helper with explicit required/optional accessors.
pub struct AttrParser<'a> {
    node: &'a Node,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self { node }
    }

    pub fn optional_string(&self, key: &str) -> Option<&'a str> {
        self.node.attrs.get(key)
    }

    /// Get a required string attribute, returning an error if missing.
    pub fn required_string(&self, key: &'static str) -> Result<&'a str, StanzaError> {
        self.optional_string(key)
            .ok_or(StanzaError::MissingAttr(key))
    }

    pub fn optional_u32(&self, key: &str) -> Option<u32> {
        self.optional_string(key).and_then(|s| s.parse().ok())
    }

    pub fn required_u32(&self, key: &'static str) -> Result<u32, StanzaError> {
        let raw = self.required_string(key)?;
        raw.parse().map_err(|_| {
            StanzaError::Parse(format!("attribute '{key}' is not a number: '{raw}'"))
        })
    }

    pub fn required_u16(&self, key: &'static str) -> Result<u16, StanzaError> {
        let raw = self.required_string(key)?;
        raw.parse()
            .map_err(|_| StanzaError::Parse(format!("attribute '{key}' is not a port: '{raw}'")))
    }
}
