use super::attrs::AttrParser;

/// A collection of element attributes stored as key-value pairs.
/// Uses a Vec internally for better cache locality with small attribute
/// counts (typically 3-6).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attrs(pub Vec<(String, String)>);

impl Attrs {
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Get the value for a key, or None if not found.
    /// Linear search is efficient for small attribute counts.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert a key-value pair. If the key already exists, update the value.
    #[inline]
    pub fn insert(&mut self, key: String, value: String) {
        if let Some(pos) = self.0.iter().position(|(k, _)| k == &key) {
            self.0[pos].1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over key-value pairs.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(String, String)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Text(String),
    Nodes(Vec<Node>),
}

/// One element of the stanza tree: a local name, an optional namespace,
/// attributes and either text or child elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub ns: Option<String>,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    /// True when the element carries the given qualified name.
    #[inline]
    pub fn is(&self, tag: &str, ns: &str) -> bool {
        self.tag == tag && self.ns.as_deref() == Some(ns)
    }

    #[inline]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key)
    }

    pub fn attrs(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.children().and_then(|nodes| nodes.first())
    }

    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.tag == tag))
    }

    /// First child with the given qualified (namespace, name) pair.
    pub fn get_child_ns(&self, tag: &str, ns: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.is(tag, ns)))
    }

    pub fn get_children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children()
            .into_iter()
            .flatten()
            .filter(move |c| c.tag == tag)
    }

    /// Normalized text content: direct text trimmed of surrounding whitespace,
    /// empty when the element holds child elements instead.
    pub fn text(&self) -> String {
        match &self.content {
            Some(NodeContent::Text(s)) => s.trim().to_string(),
            _ => String::new(),
        }
    }
}
