use crate::dom::tree::{DocumentTree, NodeId};
use crate::driver::Identification;
use crate::fragment::FragmentId;
use indexmap::IndexMap;
use std::sync::OnceLock;

const INTERACTIVE_TAGS: [&str; 6] = ["button", "a", "input", "select", "textarea", "label"];
const CLICKABLE_ROLES: [&str; 4] = ["button", "link", "tab", "menuitem"];

/// An interactive element the crawler may fire events on
#[derive(Debug, Clone)]
pub struct CandidateElement {
    /// Node in the owning state's document
    pub node: NodeId,

    /// How to find the element again in the browser
    pub identification: Identification,

    pub tag_name: String,

    /// Element's text content (truncated for display)
    pub text: Option<String>,

    closest_fragment: OnceLock<FragmentId>,
    closest_dom_fragment: OnceLock<FragmentId>,
}

impl CandidateElement {
    /// Create a candidate for `node`, identified by its positional XPath
    pub fn new(tree: &DocumentTree, node: NodeId) -> Self {
        let text = tree.text_content(node);
        let text = text.trim();
        let text = if text.is_empty() {
            None
        } else if text.chars().count() > 50 {
            Some(format!("{}...", text.chars().take(47).collect::<String>()))
        } else {
            Some(text.to_string())
        };

        Self {
            node,
            identification: Identification::xpath(tree.xpath(node)),
            tag_name: tree.node(node).tag_name.clone(),
            text,
            closest_fragment: OnceLock::new(),
            closest_dom_fragment: OnceLock::new(),
        }
    }

    /// Cached closest fragment in the visual hierarchy, if already computed
    pub fn cached_closest_fragment(&self) -> Option<FragmentId> {
        self.closest_fragment.get().copied()
    }

    /// Cached closest fragment in the DOM hierarchy, if already computed
    pub fn cached_closest_dom_fragment(&self) -> Option<FragmentId> {
        self.closest_dom_fragment.get().copied()
    }

    /// Record the closest fragment. Recording the same answer twice is harmless;
    /// the first recorded value wins.
    pub(crate) fn cache_closest_fragment(&self, fragment: FragmentId) -> FragmentId {
        *self.closest_fragment.get_or_init(|| fragment)
    }

    pub(crate) fn cache_closest_dom_fragment(&self, fragment: FragmentId) -> FragmentId {
        *self.closest_dom_fragment.get_or_init(|| fragment)
    }
}

/// Whether a node looks interactive (clickable, input, etc.)
pub fn is_interactive(tree: &DocumentTree, node: NodeId) -> bool {
    let node = tree.node(node);
    if node.is_text() {
        return false;
    }

    let tag_is_interactive = INTERACTIVE_TAGS.iter().any(|tag| node.tag_name.eq_ignore_ascii_case(tag));
    let has_event_handler = node.attributes.keys().any(|k| k.starts_with("on"));
    let has_clickable_role = node
        .get_attribute("role")
        .is_some_and(|r| CLICKABLE_ROLES.contains(&r.as_str()));

    tag_is_interactive || has_event_handler || has_clickable_role
}

/// Candidate elements of one state, indexed in discovery order.
/// Uses IndexMap to preserve insertion order
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    map: IndexMap<usize, CandidateElement>,

    /// Next available index
    next_index: usize,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
            next_index: 0,
        }
    }

    /// Collect every displayed interactive element of the document
    pub fn discover(tree: &DocumentTree) -> Self {
        let mut set = Self::new();
        for node in tree.descendants(tree.root()) {
            if tree.is_displayed(node) && is_interactive(tree, node) {
                set.register(CandidateElement::new(tree, node));
            }
        }
        set
    }

    /// Register a new element and return its assigned index
    pub fn register(&mut self, candidate: CandidateElement) -> usize {
        let index = self.next_index;
        self.map.insert(index, candidate);
        self.next_index += 1;
        index
    }

    pub fn get(&self, index: usize) -> Option<&CandidateElement> {
        self.map.get(&index)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over all (index, candidate) pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &CandidateElement)> {
        self.map.iter().map(|(i, c)| (*i, c))
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.map.keys().copied()
    }

    /// Find index by document node
    pub fn find_by_node(&self, node: NodeId) -> Option<usize> {
        self.map.iter().find(|(_, c)| c.node == node).map(|(idx, _)| *idx)
    }
}
