use super::node::{Attrs, Node, NodeContent};

#[derive(Debug, Default)]
pub struct NodeBuilder {
    tag: String,
    ns: Option<String>,
    attrs: Attrs,
    content: Option<NodeContent>,
}

impl NodeBuilder {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn ns(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        let mut nodes: Vec<Node> = match self.content.take() {
            Some(NodeContent::Nodes(nodes)) => nodes,
            _ => Vec::new(),
        };
        nodes.extend(children);
        self.content = Some(NodeContent::Nodes(nodes));
        self
    }

    /// Append a single child element, keeping any already added.
    pub fn child(self, child: Node) -> Self {
        self.children(std::iter::once(child))
    }

    pub fn text(mut self, s: impl Into<String>) -> Self {
        self.content = Some(NodeContent::Text(s.into()));
        self
    }

    pub fn build(self) -> Node {
        Node {
            tag: self.tag,
            ns: self.ns,
            attrs: self.attrs,
            content: self.content,
        }
    }
}
