//! Minimal container tree handed over by the transport layer.

use std::collections::BTreeMap;

/// Payload carried by a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NodeContent {
    #[default]
    None,
    Bytes(Vec<u8>),
    Children(Vec<Node>),
}

/// A tagged element with string attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub content: NodeContent,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.content = NodeContent::Bytes(bytes);
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.content = NodeContent::Children(children);
        self
    }

    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Children(children) => children,
            _ => &[],
        }
    }

    /// First direct child with the given tag.
    pub fn child_by_tag(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|child| child.tag == tag)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn attr_reader(&self) -> AttrReader<'_> {
        AttrReader {
            attrs: &self.attrs,
            errors: Vec::new(),
        }
    }
}

/// Reads attributes while collecting failures instead of stopping at the first one.
pub struct AttrReader<'a> {
    attrs: &'a BTreeMap<String, String>,
    errors: Vec<String>,
}

impl<'a> AttrReader<'a> {
    fn get(&mut self, key: &str, required: bool) -> Option<&'a str> {
        let value = self.attrs.get(key).map(String::as_str);
        if value.is_none() && required {
            self.errors
                .push(format!("didn't find required attribute '{}'", key));
        }
        value
    }

    pub fn string(&mut self, key: &str) -> &'a str {
        self.get(key, true).unwrap_or_default()
    }

    /// Missing attribute reads as `false`; an unparsable one is recorded.
    pub fn optional_bool(&mut self, key: &str) -> bool {
        let Some(raw) = self.get(key, false) else {
            return false;
        };
        match raw {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => true,
            "0" | "f" | "F" | "false" | "FALSE" | "False" => false,
            other => {
                self.errors.push(format!(
                    "failed to parse bool in attribute '{}': invalid value '{}'",
                    key, other
                ));
                false
            }
        }
    }

    /// Record a failure discovered while interpreting an attribute value.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_reader_collects_every_error() {
        let node = Node::new("collection").with_attr("has_more_patches", "maybe");
        let mut reader = node.attr_reader();

        assert_eq!(reader.string("name"), "");
        assert!(!reader.optional_bool("has_more_patches"));

        let errors = reader.into_errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("name"));
        assert!(errors[1].contains("has_more_patches"));
    }

    #[test]
    fn child_lookup_ignores_byte_content() {
        let node = Node::new("sync").with_children(vec![
            Node::new("collection").with_bytes(vec![1, 2]),
            Node::new("collection").with_attr("name", "regular"),
        ]);
        let first = node.child_by_tag("collection").expect("child");
        assert_eq!(first.bytes(), Some(&[1u8, 2][..]));
        assert!(first.children().is_empty());
        assert!(node.child_by_tag("missing").is_none());
    }
}
