use crate::config::LabelMode;
use crate::dom::{DocumentTree, NodeId, TEXT_TAG};
use crate::error::{Result, StateError};

/// Pixel size of one position/size bucket in visual labels
const VISUAL_BUCKET: f64 = 32.0;

/// Computes the string a node is compared by
pub trait NodeLabeler {
    fn label(&self, tree: &DocumentTree, node: NodeId) -> String;
}

/// Labels by tag name; text nodes by their whole text, lowercased with whitespace collapsed
#[derive(Debug, Clone, Copy, Default)]
pub struct TagLabeler;

/// Labels by tag name plus the bucketed bounding box of the element
#[derive(Debug, Clone, Copy)]
pub struct VisualLabeler {
    pub bucket: f64,
}

impl Default for VisualLabeler {
    fn default() -> Self {
        Self { bucket: VISUAL_BUCKET }
    }
}

fn text_label(tree: &DocumentTree, node: NodeId) -> String {
    let text = tree.node(node).text.as_deref().unwrap_or_default();
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{}:{}", TEXT_TAG, normalized)
}

impl NodeLabeler for TagLabeler {
    fn label(&self, tree: &DocumentTree, node: NodeId) -> String {
        if tree.is_text(node) {
            return text_label(tree, node);
        }
        tree.node(node).tag_name.to_lowercase()
    }
}

impl NodeLabeler for VisualLabeler {
    fn label(&self, tree: &DocumentTree, node: NodeId) -> String {
        if tree.is_text(node) {
            return text_label(tree, node);
        }
        let n = tree.node(node);
        let tag = n.tag_name.to_lowercase();
        match n.bounding_box {
            Some(bbox) => {
                let bucket = |v: f64| (v / self.bucket).floor() as i64;
                format!(
                    "{}@{}:{}:{}:{}",
                    tag,
                    bucket(bbox.x),
                    bucket(bbox.y),
                    bucket(bbox.width),
                    bucket(bbox.height)
                )
            }
            None => tag,
        }
    }
}

impl NodeLabeler for LabelMode {
    fn label(&self, tree: &DocumentTree, node: NodeId) -> String {
        match self {
            LabelMode::Structure => TagLabeler.label(tree, node),
            LabelMode::Visual => VisualLabeler::default().label(tree, node),
        }
    }
}

/// A node of the comparison tree: a document node with its computed label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledTreeNode {
    pub node: NodeId,
    pub label: String,
    pub children: Vec<LabeledTreeNode>,
}

impl Drop for LabeledTreeNode {
    // unnest first so deep trees drop without recursion
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// Output of [`extract`]: the post-order listing and the labeled tree over the
/// same nodes
#[derive(Debug, Clone)]
pub struct ExtractedTree {
    /// Nodes in post-order; alignment position `k` refers to `post_order[k - 1]`
    pub post_order: Vec<NodeId>,
    /// Labels aligned with `post_order`
    pub labels: Vec<String>,
    pub root: LabeledTreeNode,
}

impl ExtractedTree {
    pub fn len(&self) -> usize {
        self.post_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.post_order.is_empty()
    }

    /// Node at a 1-based alignment position
    pub fn node_at(&self, position: usize) -> Option<NodeId> {
        position.checked_sub(1).and_then(|i| self.post_order.get(i)).copied()
    }

    /// Label at a 1-based alignment position
    pub fn label_at(&self, position: usize) -> Option<&str> {
        position.checked_sub(1).and_then(|i| self.labels.get(i)).map(String::as_str)
    }
}

/// Build the comparison tree of a document, starting at its body.
///
/// `select` elements are cut down to their first child so long option lists do
/// not dominate the distance.
pub fn extract(tree: &DocumentTree, labeler: &dyn NodeLabeler) -> Result<ExtractedTree> {
    tree.validate()?;

    let mut post_order = Vec::new();
    let mut labels = Vec::new();
    let root = build(tree, tree.comparison_root(), labeler, &mut post_order, &mut labels)?;

    Ok(ExtractedTree { post_order, labels, root })
}

fn leaf(tree: &DocumentTree, node: NodeId, labeler: &dyn NodeLabeler, post_order: &mut Vec<NodeId>, labels: &mut Vec<String>) -> LabeledTreeNode {
    let label = labeler.label(tree, node);
    post_order.push(node);
    labels.push(label.clone());
    LabeledTreeNode { node, label, children: Vec::new() }
}

/// A node whose children are still being built
struct Frame {
    node: NodeId,
    /// Children left to visit, last one first
    pending: Vec<NodeId>,
    children: Vec<LabeledTreeNode>,
}

impl Frame {
    fn open(tree: &DocumentTree, node: NodeId, labeler: &dyn NodeLabeler, post_order: &mut Vec<NodeId>, labels: &mut Vec<String>) -> Self {
        if tree.node(node).tag_name == "select" {
            let children = tree
                .children(node)
                .first()
                .map(|first| vec![leaf(tree, *first, labeler, post_order, labels)])
                .unwrap_or_default();
            return Self { node, pending: Vec::new(), children };
        }
        let pending = tree.children(node).iter().rev().copied().collect();
        Self { node, pending, children: Vec::new() }
    }
}

fn build(
    tree: &DocumentTree,
    root: NodeId,
    labeler: &dyn NodeLabeler,
    post_order: &mut Vec<NodeId>,
    labels: &mut Vec<String>,
) -> Result<LabeledTreeNode> {
    let mut stack = vec![Frame::open(tree, root, labeler, post_order, labels)];

    while let Some(frame) = stack.last_mut() {
        if let Some(child) = frame.pending.pop() {
            let opened = Frame::open(tree, child, labeler, post_order, labels);
            stack.push(opened);
            continue;
        }

        let Some(frame) = stack.pop() else { break };
        let label = labeler.label(tree, frame.node);
        post_order.push(frame.node);
        labels.push(label.clone());
        let done = LabeledTreeNode { node: frame.node, label, children: frame.children };
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => return Ok(done),
        }
    }

    Err(StateError::MalformedTree(format!("no comparison tree under {}", root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementNode;

    fn page() -> DocumentTree {
        DocumentTree::from_element(
            &ElementNode::new("html").with_child(
                ElementNode::new("BODY")
                    .with_child(ElementNode::new("div").with_bounding_box(0.0, 40.0, 100.0, 20.0).with_text("Hello  World"))
                    .with_child(
                        ElementNode::new("select")
                            .with_child(ElementNode::new("option").with_text("one"))
                            .with_child(ElementNode::new("option").with_text("two"))
                            .with_child(ElementNode::new("option").with_text("three")),
                    ),
            ),
        )
    }

    #[test]
    fn test_post_order_starts_at_body() {
        let tree = page();
        let extracted = extract(&tree, &TagLabeler).unwrap();

        assert_eq!(extracted.labels, vec!["#text:hello world", "div", "option", "select", "body"]);
        assert_eq!(extracted.post_order.last(), tree.body().as_ref());
        assert_eq!(extracted.root.label, "body");
        assert_eq!(extracted.root.children.len(), 2);
    }

    #[test]
    fn test_select_keeps_first_child_as_leaf() {
        let tree = page();
        let extracted = extract(&tree, &TagLabeler).unwrap();
        let select = &extracted.root.children[1];

        assert_eq!(select.label, "select");
        assert_eq!(select.children.len(), 1);
        assert_eq!(select.children[0].label, "option");
        assert!(select.children[0].children.is_empty());
    }

    #[test]
    fn test_labels_are_deterministic() {
        let tree = page();
        let first = extract(&tree, &LabelMode::Visual).unwrap();
        let second = extract(&tree, &LabelMode::Visual).unwrap();

        assert_eq!(first.labels, second.labels);
        assert_eq!(first.post_order, second.post_order);
        assert_eq!(first.root, second.root);
    }

    #[test]
    fn test_visual_label() {
        let tree = page();
        let div = tree.find_by_tag("div").unwrap();

        assert_eq!(VisualLabeler::default().label(&tree, div), "div@0:1:3:0");
        assert_eq!(TagLabeler.label(&tree, div), "div");
        assert_eq!(VisualLabeler::default().label(&tree, tree.body().unwrap()), "body");
    }

    #[test]
    fn test_text_label_keeps_whole_text() {
        let paragraph = |tail: &str| {
            DocumentTree::from_element(&ElementNode::new("p").with_text(format!("{}{}", "A".repeat(200), tail)))
        };
        let (a, b) = (paragraph("x"), paragraph("y"));
        let label_a = TagLabeler.label(&a, a.children(a.root())[0]);
        let label_b = TagLabeler.label(&b, b.children(b.root())[0]);

        assert_eq!(label_a.len(), "#text:".len() + 201);
        assert!(label_a.ends_with("ax"));
        assert_ne!(label_a, label_b);
        assert_eq!(crate::ted::edit_distance(&a, &b, &TagLabeler).unwrap(), 1.0);
    }

    #[test]
    fn test_position_accessors() {
        let tree = page();
        let extracted = extract(&tree, &TagLabeler).unwrap();

        assert_eq!(extracted.node_at(0), None);
        assert_eq!(extracted.label_at(2), Some("div"));
        assert_eq!(extracted.node_at(extracted.len()), tree.body());
        assert_eq!(extracted.node_at(extracted.len() + 1), None);
    }

    #[test]
    fn test_deep_chain_distance() {
        let chain = |text: &str| {
            let mut element = ElementNode::new("span").with_text(text);
            for _ in 0..1000 {
                element = ElementNode::new("div").with_child(element);
            }
            DocumentTree::from_element(&ElementNode::new("body").with_child(element))
        };
        let (a, b) = (chain("x"), chain("y"));
        let extracted = extract(&a, &TagLabeler).unwrap();

        // body, 1000 divs, span, #text
        assert_eq!(extracted.len(), 1003);
        assert_eq!(extracted.labels[0], "#text:x");
        assert_eq!(extracted.label_at(1003), Some("body"));
        assert_eq!(crate::ted::edit_distance(&a, &b, &TagLabeler).unwrap(), 1.0);
    }
}
