use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tag name used for text nodes in a captured snapshot
pub const TEXT_TAG: &str = "#text";

/// Tags stripped from a snapshot before it is compared
const NOISE_TAGS: [&str; 5] = ["script", "style", "noscript", "link", "meta"];

/// A captured DOM element as produced by the driver's extraction script.
///
/// This is the owned, serializable form of a snapshot. It is converted into a
/// [`DocumentTree`](crate::dom::DocumentTree) arena before any comparison runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementNode {
    /// HTML tag name (e.g., "div", "button"), or `#text` for text nodes
    pub tag_name: String,

    /// Element attributes (e.g., id, class, href, etc.)
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Text content of the element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,

    /// Child elements, in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementNode>,

    /// Whether the element was rendered when the snapshot was taken
    #[serde(default = "default_visible")]
    pub is_visible: bool,

    /// Bounding box information (x, y, width, height)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

fn default_visible() -> bool {
    true
}

/// Axis-aligned rectangle in page pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementNode {
    /// Create a new ElementNode
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            attributes: HashMap::new(),
            text_content: None,
            children: Vec::new(),
            is_visible: true,
            bounding_box: None,
        }
    }

    /// Create a text node
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(TEXT_TAG).with_text(content)
    }

    /// Builder method: set attributes
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Builder method: set a single attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_attribute(key, value);
        self
    }

    /// Builder method: set text content
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_content = Some(text.into());
        self
    }

    /// Builder method: append one child
    pub fn with_child(mut self, child: ElementNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder method: set visibility
    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.is_visible = visible;
        self
    }

    /// Builder method: set bounding box
    pub fn with_bounding_box(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bounding_box = Some(BoundingBox { x, y, width, height });
        self
    }

    /// Add a single attribute
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Add a child element
    pub fn add_child(&mut self, child: ElementNode) {
        self.children.push(child);
    }

    /// Get attribute value by key
    pub fn get_attribute(&self, key: &str) -> Option<&String> {
        self.attributes.get(key)
    }

    /// Check if element is a specific tag
    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag_name.eq_ignore_ascii_case(tag)
    }

    /// Whether this is a text node
    pub fn is_text(&self) -> bool {
        self.is_tag(TEXT_TAG)
    }

    /// Remove cosmetic noise before comparison: script/style-like subtrees and
    /// whitespace-only text nodes
    pub fn simplify(&mut self) {
        let mut stack = vec![self];
        while let Some(element) = stack.pop() {
            element.children.retain(|child| {
                if NOISE_TAGS.iter().any(|tag| child.is_tag(tag)) {
                    return false;
                }
                if child.is_text() {
                    return child
                        .text_content
                        .as_deref()
                        .is_some_and(|text| !text.trim().is_empty());
                }
                true
            });
            stack.extend(element.children.iter_mut());
        }
    }
}

impl BoundingBox {
    /// Create a new BoundingBox
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Calculate the area of the bounding box
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Smallest box covering both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_node_creation() {
        let mut attrs = HashMap::new();
        attrs.insert("id".to_string(), "test-id".to_string());

        let element = ElementNode::new("button")
            .with_attributes(attrs)
            .with_text("Click me")
            .with_visibility(false);

        assert_eq!(element.tag_name, "button");
        assert_eq!(element.get_attribute("id"), Some(&"test-id".to_string()));
        assert_eq!(element.text_content, Some("Click me".to_string()));
        assert!(!element.is_visible);
    }

    #[test]
    fn test_text_node() {
        let text = ElementNode::text("hello");
        assert!(text.is_text());
        assert_eq!(text.text_content.as_deref(), Some("hello"));
        assert!(!ElementNode::new("div").is_text());
    }

    #[test]
    fn test_simplify() {
        let mut parent = ElementNode::new("div");
        parent.add_child(ElementNode::new("p").with_child(ElementNode::text("Content")));
        parent.add_child(ElementNode::new("script").with_text("alert('test')"));
        parent.add_child(ElementNode::new("style").with_text(".test { color: red; }"));
        parent.add_child(ElementNode::text("   \n  "));
        parent.add_child(ElementNode::new("span").with_child(ElementNode::new("noscript")));

        parent.simplify();

        assert_eq!(parent.children.len(), 2);
        assert!(parent.children[0].is_tag("p"));
        assert_eq!(parent.children[0].children.len(), 1);
        assert!(parent.children[1].is_tag("span"));
        assert!(parent.children[1].children.is_empty());
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r##"{"tag_name": "div", "children": [{"tag_name": "#text", "text_content": "x"}]}"##;
        let node: ElementNode = serde_json::from_str(json).unwrap();

        assert!(node.is_visible);
        assert!(node.attributes.is_empty());
        assert_eq!(node.children.len(), 1);
        assert!(node.children[0].is_text());
    }

    #[test]
    fn test_serialization() {
        let element = ElementNode::new("button")
            .with_text("Click")
            .with_bounding_box(1.0, 2.0, 3.0, 4.0);

        let json = serde_json::to_string(&element).unwrap();
        let deserialized: ElementNode = serde_json::from_str(&json).unwrap();

        assert_eq!(element, deserialized);
    }

    #[test]
    fn test_bounding_box() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 5.0, 10.0, 10.0);

        assert_eq!(a.area(), 100.0);
        assert_eq!(b.right(), 30.0);
        assert_eq!(b.bottom(), 15.0);
        assert_eq!(a.union(&b), BoundingBox::new(0.0, 0.0, 30.0, 15.0));
    }
}
