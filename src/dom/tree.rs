use crate::dom::element::{BoundingBox, ElementNode, TEXT_TAG};
use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Index of a node inside its [`DocumentTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One node of a document tree.
///
/// Structure is immutable once the tree is built. The `displayed` and `dynamic`
/// bits are annotations written by later passes and may be flipped through a
/// shared reference.
#[derive(Debug)]
pub struct Node {
    /// Lower-cased tag name, `#text` for text nodes
    pub tag_name: String,
    pub attributes: HashMap<String, String>,
    /// Own text for text nodes; `None` for elements
    pub text: Option<String>,
    pub bounding_box: Option<BoundingBox>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,
    displayed: AtomicBool,
    dynamic: AtomicBool,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            tag_name: self.tag_name.clone(),
            attributes: self.attributes.clone(),
            text: self.text.clone(),
            bounding_box: self.bounding_box,
            parent: self.parent,
            children: self.children.clone(),
            depth: self.depth,
            displayed: AtomicBool::new(self.displayed.load(Ordering::Relaxed)),
            dynamic: AtomicBool::new(self.dynamic.load(Ordering::Relaxed)),
        }
    }
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_text(&self) -> bool {
        self.tag_name == TEXT_TAG
    }

    pub fn get_attribute(&self, key: &str) -> Option<&String> {
        self.attributes.get(key)
    }

    pub fn is_displayed(&self) -> bool {
        self.displayed.load(Ordering::Relaxed)
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.load(Ordering::Relaxed)
    }
}

/// An ordered, labeled tree built from one document snapshot.
///
/// Nodes live in an arena in pre-order; `NodeId(0)` is the document root.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: Vec<Node>,
}

impl DocumentTree {
    /// Build the arena from a captured snapshot.
    ///
    /// Elements that carry `text_content` but no children get a synthesized
    /// `#text` child so text changes show up as node changes.
    pub fn from_element(root: &ElementNode) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.push_element(root);
        tree
    }

    /// Build the arena after stripping cosmetic noise from the snapshot
    pub fn from_element_cleaned(root: &ElementNode) -> Self {
        let mut cleaned = root.clone();
        cleaned.simplify();
        Self::from_element(&cleaned)
    }

    /// Parse a JSON snapshot (the format emitted by the extraction script).
    ///
    /// `serde_json` rejects documents nested deeper than 128 levels; deeper
    /// trees can still be built with [`DocumentTree::from_element`].
    pub fn from_json(json: &str) -> Result<Self> {
        let root: ElementNode = serde_json::from_str(json)?;
        Ok(Self::from_element_cleaned(&root))
    }

    fn push_element(&mut self, root: &ElementNode) {
        let mut stack = vec![(root, None, true)];
        while let Some((element, parent, parent_displayed)) = stack.pop() {
            let displayed = parent_displayed && element.is_visible;

            if element.is_text() {
                let text = element.text_content.clone().unwrap_or_default();
                self.push_node(TEXT_TAG.to_string(), element.attributes.clone(), Some(text), element.bounding_box, parent, displayed);
                continue;
            }

            let id = self.push_node(
                element.tag_name.to_ascii_lowercase(),
                element.attributes.clone(),
                None,
                element.bounding_box,
                parent,
                displayed,
            );

            if element.children.is_empty()
                && let Some(text) = element.text_content.as_deref().filter(|t| !t.trim().is_empty())
            {
                self.push_node(TEXT_TAG.to_string(), HashMap::new(), Some(text.to_string()), None, Some(id), displayed);
            }

            stack.extend(element.children.iter().rev().map(|child| (child, Some(id), displayed)));
        }
    }

    fn push_node(
        &mut self,
        tag_name: String,
        attributes: HashMap<String, String>,
        text: Option<String>,
        bounding_box: Option<BoundingBox>,
        parent: Option<NodeId>,
        displayed: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = parent.map_or(0, |p| self.nodes[p.0].depth + 1);
        self.nodes.push(Node {
            tag_name,
            attributes,
            text,
            bounding_box,
            parent,
            children: Vec::new(),
            depth,
            displayed: AtomicBool::new(displayed),
            dynamic: AtomicBool::new(false),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    /// Number of nodes in the whole document
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The document root
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The first `body` element in document order
    pub fn body(&self) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.tag_name == "body").map(NodeId)
    }

    /// The node comparisons start from: `body` when present, the root otherwise
    pub fn comparison_root(&self) -> NodeId {
        self.body().unwrap_or_else(|| self.root())
    }

    /// Get a node by id
    ///
    /// # Panics
    /// If `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Children that are elements (text nodes skipped)
    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).iter().copied().filter(move |c| !self.node(*c).is_text())
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.node(id).is_text()
    }

    pub fn set_displayed(&self, id: NodeId, displayed: bool) {
        self.node(id).displayed.store(displayed, Ordering::Relaxed);
    }

    /// Mark a node as carrying content that changes between visits
    pub fn set_dynamic(&self, id: NodeId) {
        self.node(id).dynamic.store(true, Ordering::Relaxed);
    }

    /// Default visibility predicate: rendered and not known to be dynamic
    pub fn is_displayed(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.is_displayed() && !node.is_dynamic()
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let target_depth = self.node(ancestor).depth;
        let mut current = Some(node);
        while let Some(id) = current {
            let n = self.node(id);
            if id == ancestor {
                return true;
            }
            if n.depth <= target_depth {
                return false;
            }
            current = n.parent;
        }
        false
    }

    /// Lowest common ancestor of a set of nodes; the node itself for a single node
    pub fn lca(&self, nodes: &[NodeId]) -> Option<NodeId> {
        let (first, rest) = nodes.split_first()?;
        rest.iter().try_fold(*first, |acc, n| self.lca_pair(acc, *n))
    }

    fn lca_pair(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let (mut a, mut b) = (a, b);
        while self.node(a).depth > self.node(b).depth {
            a = self.node(a).parent?;
        }
        while self.node(b).depth > self.node(a).depth {
            b = self.node(b).parent?;
        }
        while a != b {
            a = self.node(a).parent?;
            b = self.node(b).parent?;
        }
        Some(a)
    }

    /// Nodes of the subtree rooted at `id`, in pre-order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Node count of the subtree rooted at `id`, including `id`
    pub fn subtree_size(&self, id: NodeId) -> usize {
        self.descendants(id).len()
    }

    /// Concatenated text of the subtree rooted at `id`
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.node(n).text.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First element carrying `key=value`
    pub fn find_by_attribute(&self, key: &str, value: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.attributes.get(key).is_some_and(|v| v == value))
            .map(NodeId)
    }

    /// First element with the given tag name
    pub fn find_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.tag_name.eq_ignore_ascii_case(tag))
            .map(NodeId)
    }

    fn step_name(&self, id: NodeId) -> String {
        let node = self.node(id);
        if node.is_text() { "text()".to_string() } else { node.tag_name.clone() }
    }

    /// Positional XPath, e.g. `/html[1]/body[1]/div[2]/text()[1]`
    pub fn xpath(&self, id: NodeId) -> String {
        let mut steps = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let name = self.step_name(node_id);
            let position = match self.parent(node_id) {
                Some(parent) => {
                    self.children(parent)
                        .iter()
                        .take_while(|c| **c != node_id)
                        .filter(|c| self.step_name(**c) == name)
                        .count()
                        + 1
                }
                None => 1,
            };
            steps.push(format!("{}[{}]", name, position));
            current = self.parent(node_id);
        }
        steps.reverse();
        format!("/{}", steps.join("/"))
    }

    /// Tag-only path used in log lines, e.g. `/HTML/BODY/DIV`
    pub fn skeleton_xpath(&self, id: NodeId) -> String {
        let mut steps = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            steps.push(self.step_name(node_id).to_ascii_uppercase());
            current = self.parent(node_id);
        }
        steps.reverse();
        format!("/{}", steps.join("/"))
    }

    /// Resolve a positional XPath produced by [`DocumentTree::xpath`]
    pub fn resolve_xpath(&self, xpath: &str) -> Result<NodeId> {
        let not_found = || StateError::NodeNotFound(xpath.to_string());
        let mut steps = xpath.trim_start_matches('/').split('/').map(parse_step);

        let (root_name, root_pos) = steps.next().flatten().ok_or_else(not_found)?;
        let root = self.root();
        if root_pos != 1 || self.step_name(root) != root_name {
            return Err(not_found());
        }

        let mut current = root;
        for step in steps {
            let (name, position) = step.ok_or_else(not_found)?;
            current = self
                .children(current)
                .iter()
                .copied()
                .filter(|c| self.step_name(*c) == name)
                .nth(position.wrapping_sub(1))
                .ok_or_else(not_found)?;
        }
        Ok(current)
    }

    /// Check structural integrity: single root, consistent parent links, no node
    /// reachable twice
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(StateError::MalformedTree("tree has no root".to_string()));
        }
        if self.nodes[0].parent.is_some() {
            return Err(StateError::MalformedTree("root node has a parent".to_string()));
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                return Err(StateError::MalformedTree(format!("node {} reachable twice", id)));
            }
            for child in self.children(id) {
                let child_node = self.get(*child).ok_or_else(|| {
                    StateError::MalformedTree(format!("dangling child {} of {}", child, id))
                })?;
                if child_node.parent != Some(id) {
                    return Err(StateError::MalformedTree(format!("child {} does not point back to {}", child, id)));
                }
                stack.push(*child);
            }
        }
        Ok(())
    }

    /// Serialize a subtree back into the snapshot form
    pub fn to_element(&self, id: NodeId) -> ElementNode {
        // reverse pre-order visits every child before its parent
        let mut built: HashMap<NodeId, ElementNode> = HashMap::new();
        for current in self.descendants(id).into_iter().rev() {
            let mut element = self.shallow_element(current);
            element.children = self.children(current).iter().filter_map(|c| built.remove(c)).collect();
            built.insert(current, element);
        }
        built.remove(&id).unwrap_or_else(|| self.shallow_element(id))
    }

    fn shallow_element(&self, id: NodeId) -> ElementNode {
        let node = self.node(id);
        let mut element = ElementNode::new(node.tag_name.clone())
            .with_attributes(node.attributes.clone())
            .with_visibility(node.is_displayed());
        element.text_content = node.text.clone();
        element.bounding_box = node.bounding_box;
        element
    }

    /// Convert the tree to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_element(self.root()))?)
    }

    #[cfg(test)]
    pub(crate) fn link_child_unchecked(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.push(child);
    }
}

fn parse_step(step: &str) -> Option<(String, usize)> {
    let open = step.find('[')?;
    let name = step[..open].to_ascii_lowercase();
    let position = step[open + 1..].strip_suffix(']')?.parse().ok()?;
    Some((name, position))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tree() -> DocumentTree {
        let root = ElementNode::new("html").with_child(
            ElementNode::new("body")
                .with_child(
                    ElementNode::new("header").with_child(
                        ElementNode::new("button")
                            .with_attribute("id", "nav-btn")
                            .with_text("Menu"),
                    ),
                )
                .with_child(
                    ElementNode::new("main")
                        .with_child(ElementNode::new("a").with_attribute("href", "/page").with_text("Click here"))
                        .with_child(ElementNode::new("div").with_visibility(false).with_text("Hidden")),
                ),
        );
        DocumentTree::from_element(&root)
    }

    #[test]
    fn test_dom_tree_creation() {
        let tree = create_test_tree();

        assert_eq!(tree.node(tree.root()).tag_name, "html");
        let body = tree.body().unwrap();
        assert_eq!(tree.children(body).len(), 2);
        assert_eq!(tree.comparison_root(), body);
        // html, body, header, button, #text, main, a, #text, div, #text
        assert_eq!(tree.len(), 10);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_text_synthesis_and_visibility() {
        let tree = create_test_tree();
        let div = tree.find_by_tag("div").unwrap();
        let text = tree.children(div)[0];

        assert!(tree.is_text(text));
        assert_eq!(tree.node(text).text.as_deref(), Some("Hidden"));
        assert!(!tree.is_displayed(div));
        assert!(!tree.is_displayed(text));

        let button = tree.find_by_attribute("id", "nav-btn").unwrap();
        assert!(tree.is_displayed(button));
        tree.set_dynamic(button);
        assert!(!tree.is_displayed(button));
    }

    #[test]
    fn test_contains_and_lca() {
        let tree = create_test_tree();
        let body = tree.body().unwrap();
        let button = tree.find_by_tag("button").unwrap();
        let link = tree.find_by_tag("a").unwrap();
        let main = tree.find_by_tag("main").unwrap();

        assert!(tree.contains(body, button));
        assert!(tree.contains(button, button));
        assert!(!tree.contains(button, body));
        assert!(!tree.contains(main, button));

        assert_eq!(tree.lca(&[button, link]), Some(body));
        assert_eq!(tree.lca(&[link]), Some(link));
        assert_eq!(tree.lca(&[]), None);
    }

    #[test]
    fn test_subtree_size() {
        let tree = create_test_tree();
        let main = tree.find_by_tag("main").unwrap();
        assert_eq!(tree.subtree_size(main), 5);
        assert_eq!(tree.subtree_size(tree.root()), tree.len());
    }

    #[test]
    fn test_xpath_round_trip() {
        let tree = create_test_tree();
        let link = tree.find_by_tag("a").unwrap();
        let text = tree.children(link)[0];

        assert_eq!(tree.xpath(link), "/html[1]/body[1]/main[1]/a[1]");
        assert_eq!(tree.xpath(text), "/html[1]/body[1]/main[1]/a[1]/text()[1]");
        assert_eq!(tree.skeleton_xpath(link), "/HTML/BODY/MAIN/A");

        for id in [link, text, tree.root()] {
            assert_eq!(tree.resolve_xpath(&tree.xpath(id)).unwrap(), id);
        }
        assert!(tree.resolve_xpath("/html[1]/body[1]/table[1]").is_err());
        assert!(tree.resolve_xpath("garbage").is_err());
    }

    #[test]
    fn test_validate_detects_shared_child() {
        let mut tree = create_test_tree();
        let header = tree.find_by_tag("header").unwrap();
        let link = tree.find_by_tag("a").unwrap();
        tree.link_child_unchecked(header, link);

        assert!(matches!(tree.validate(), Err(StateError::MalformedTree(_))));
    }

    #[test]
    fn test_from_json_cleans_noise() {
        let json = r##"{"tag_name": "body", "children": [
            {"tag_name": "script", "text_content": "var x = 1;"},
            {"tag_name": "p", "text_content": "Hello"}
        ]}"##;
        let tree = DocumentTree::from_json(json).unwrap();

        assert_eq!(tree.len(), 3);
        assert!(tree.find_by_tag("script").is_none());
        assert_eq!(tree.text_content(tree.root()), "Hello");
    }

    #[test]
    fn test_to_json() {
        let tree = create_test_tree();
        let json = tree.to_json().unwrap();

        assert!(json.contains("\"tag_name\": \"html\""));
        assert!(json.contains("nav-btn"));
        assert!(json.contains("Click here"));
    }

    #[test]
    fn test_deep_tree() {
        let mut element = ElementNode::new("span").with_text("leaf");
        for _ in 0..2000 {
            element = ElementNode::new("div").with_child(element);
        }
        let tree = DocumentTree::from_element(&ElementNode::new("body").with_child(element));

        // body, 2000 divs, span, #text
        assert_eq!(tree.len(), 2003);
        let text = NodeId(2002);
        assert!(tree.is_text(text));
        assert_eq!(tree.node(text).depth(), 2002);
        assert!(tree.validate().is_ok());

        let copy = DocumentTree::from_element(&tree.to_element(tree.root()));
        assert_eq!(copy.len(), tree.len());
        assert_eq!(copy.xpath(NodeId(2001)), tree.xpath(NodeId(2001)));
    }

    #[test]
    fn test_from_json_nesting_limit() {
        let json = format!(
            "{}{}{}",
            r#"{"tag_name": "div", "children": ["#.repeat(200),
            r#"{"tag_name": "p"}"#,
            "]}".repeat(200)
        );
        assert!(matches!(DocumentTree::from_json(&json), Err(StateError::Json(_))));
    }
}
