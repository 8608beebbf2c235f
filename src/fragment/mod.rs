//! Page fragments: reusable regions of a state anchored to DOM nodes
//!
//! Fragments live in an arena keyed by [`FragmentId`]. The visual nesting
//! (mirroring the segmentation rectangles) and the DOM nesting (computed by
//! [`FragmentBuilder`]) are kept as two separate [`Hierarchy`] maps over the
//! same arena, both rooted at the page root fragment.

pub mod builder;
pub mod export;
pub mod policy;

pub use builder::{FragmentBuilder, highest_differentiator, is_a_differentiator};
pub use export::{export_fragments, export_overlay};
pub use policy::{MinSizePolicy, UsefulnessPolicy};

use crate::dom::{BoundingBox, CandidateElement, CandidateSet, DocumentTree, NodeId};
use crate::error::{Result, StateError};
use indexmap::IndexMap;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identifier of a fragment, unique within one state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId(pub u32);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A region reported by the segmentation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Rectangle {
    pub id: u32,
    /// `None` for the page root
    pub parent_id: Option<u32>,
    /// Leaf DOM nodes enclosed by the region
    pub nested_blocks: Vec<NodeId>,
    pub rect: BoundingBox,
}

impl Rectangle {
    pub fn new(id: u32, parent_id: Option<u32>, rect: BoundingBox) -> Self {
        Self {
            id,
            parent_id,
            nested_blocks: Vec::new(),
            rect,
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<NodeId>) -> Self {
        self.nested_blocks = blocks;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Stored form of a [`Rectangle`]: nested blocks as XPaths, `-1` parent for the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectangleSpec {
    pub id: u32,
    #[serde(default = "root_parent")]
    pub parent_id: i64,
    #[serde(default)]
    pub nested_blocks: Vec<String>,
    pub rect: BoundingBox,
}

fn root_parent() -> i64 {
    -1
}

impl RectangleSpec {
    /// Resolve the block paths against a document
    pub fn resolve(&self, tree: &DocumentTree) -> Result<Rectangle> {
        let parent_id = if self.parent_id < 0 {
            None
        } else {
            Some(u32::try_from(self.parent_id).map_err(|_| {
                StateError::SegmentationFailed(format!("parent id {} out of range", self.parent_id))
            })?)
        };
        let nested_blocks = self
            .nested_blocks
            .iter()
            .map(|xpath| tree.resolve_xpath(xpath))
            .collect::<Result<Vec<_>>>()?;

        Ok(Rectangle {
            id: self.id,
            parent_id,
            nested_blocks,
            rect: self.rect,
        })
    }

    /// Parse a JSON list of rectangles and resolve them against a document
    pub fn load_all(json: &str, tree: &DocumentTree) -> Result<Vec<Rectangle>> {
        let specs: Vec<RectangleSpec> = serde_json::from_str(json)?;
        specs.iter().map(|spec| spec.resolve(tree)).collect()
    }
}

/// One fragment of a state
#[derive(Debug)]
pub struct Fragment {
    id: FragmentId,
    state_id: usize,
    rect: BoundingBox,
    nested_blocks: Vec<NodeId>,
    /// DOM node the fragment is anchored at, once known
    anchor: Option<NodeId>,
    useful: bool,
    dynamic: AtomicBool,
    /// Indices into the owning state's candidate set
    candidates: Vec<usize>,
}

impl Clone for Fragment {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state_id: self.state_id,
            rect: self.rect,
            nested_blocks: self.nested_blocks.clone(),
            anchor: self.anchor,
            useful: self.useful,
            dynamic: AtomicBool::new(self.is_dynamic()),
            candidates: self.candidates.clone(),
        }
    }
}

impl Fragment {
    pub fn new(id: FragmentId, state_id: usize, rect: BoundingBox, nested_blocks: Vec<NodeId>) -> Self {
        Self {
            id,
            state_id,
            rect,
            nested_blocks,
            anchor: None,
            useful: true,
            dynamic: AtomicBool::new(false),
            candidates: Vec::new(),
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    /// Id of the state owning this fragment
    pub fn state_id(&self) -> usize {
        self.state_id
    }

    pub fn rect(&self) -> BoundingBox {
        self.rect
    }

    pub fn nested_blocks(&self) -> &[NodeId] {
        &self.nested_blocks
    }

    pub fn anchor(&self) -> Option<NodeId> {
        self.anchor
    }

    pub fn is_useful(&self) -> bool {
        self.useful
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.load(Ordering::Relaxed)
    }

    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    /// Whether `node` lies inside the fragment: under its anchor when anchored,
    /// otherwise under one of its nested blocks
    pub fn contains_node(&self, tree: &DocumentTree, node: NodeId) -> bool {
        match self.anchor {
            Some(anchor) => tree.contains(anchor, node),
            None => self.nested_blocks.iter().any(|block| tree.contains(*block, node)),
        }
    }

    fn add_candidate(&mut self, index: usize) {
        if !self.candidates.contains(&index) {
            self.candidates.push(index);
        }
    }
}

/// Parent/children relation over fragment ids
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    parent: IndexMap<FragmentId, FragmentId>,
    children: IndexMap<FragmentId, Vec<FragmentId>>,
}

impl Hierarchy {
    pub fn parent(&self, id: FragmentId) -> Option<FragmentId> {
        self.parent.get(&id).copied()
    }

    pub fn children(&self, id: FragmentId) -> &[FragmentId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// `id` followed by its ancestors up to the root
    pub fn ancestors(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether `ancestor` is `id` or one of its ancestors
    pub fn is_ancestor(&self, ancestor: FragmentId, id: FragmentId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Make `child` a child of `parent`, moving it away from any previous parent.
    /// Returns false, leaving the relation untouched, when the edge would close a cycle.
    pub(crate) fn link(&mut self, parent: FragmentId, child: FragmentId) -> bool {
        if self.is_ancestor(child, parent) {
            return false;
        }
        match self.parent.insert(child, parent) {
            Some(previous) if previous == parent => return true,
            Some(previous) => {
                if let Some(siblings) = self.children.get_mut(&previous) {
                    siblings.retain(|c| *c != child);
                }
            }
            None => {}
        }
        self.children.entry(parent).or_default().push(child);
        true
    }
}

/// Which of the two fragment hierarchies to walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyKind {
    #[default]
    Visual,
    Dom,
}

/// All fragments of one state
#[derive(Debug, Clone)]
pub struct FragmentTree {
    fragments: IndexMap<FragmentId, Fragment>,
    root: FragmentId,
    visual: Hierarchy,
    dom: Hierarchy,
    /// Owning fragment of each anchor node; the first fragment anchored at a node keeps it
    anchors: HashMap<NodeId, FragmentId>,
}

impl FragmentTree {
    pub(crate) fn with_root(root: Fragment) -> Self {
        let id = root.id;
        let mut fragments = IndexMap::new();
        fragments.insert(id, root);
        Self {
            fragments,
            root: id,
            visual: Hierarchy::default(),
            dom: Hierarchy::default(),
            anchors: HashMap::new(),
        }
    }

    pub fn get(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(&id)
    }

    pub fn root(&self) -> FragmentId {
        self.root
    }

    pub fn root_fragment(&self) -> Option<&Fragment> {
        self.get(self.root)
    }

    /// Fragments in creation order
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = FragmentId> + '_ {
        self.fragments.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn visual(&self) -> &Hierarchy {
        &self.visual
    }

    pub fn dom(&self) -> &Hierarchy {
        &self.dom
    }

    pub fn hierarchy(&self, kind: HierarchyKind) -> &Hierarchy {
        match kind {
            HierarchyKind::Visual => &self.visual,
            HierarchyKind::Dom => &self.dom,
        }
    }

    /// One past the largest id in use, 0 when there are no fragments. Once the
    /// largest id is `u32::MAX`, the smallest id not in use.
    pub fn next_fragment_id(&self) -> FragmentId {
        let Some(max) = self.fragments.keys().max() else {
            return FragmentId(0);
        };
        match max.0.checked_add(1) {
            Some(next) => FragmentId(next),
            None => {
                let free = self.smallest_free_id();
                warn!("Fragment id {} is taken, reusing free id {}", max, free);
                free
            }
        }
    }

    /// Fewer than `u32::MAX` fragments exist, so `0..=len` holds a free id
    fn smallest_free_id(&self) -> FragmentId {
        let bound = u32::try_from(self.fragments.len()).unwrap_or(u32::MAX);
        (0..=bound)
            .map(FragmentId)
            .find(|id| !self.fragments.contains_key(id))
            .unwrap_or(FragmentId(bound))
    }

    /// Fragment anchored at `node`, if any
    pub fn anchor_owner(&self, node: NodeId) -> Option<FragmentId> {
        self.anchors.get(&node).copied()
    }

    /// Whether the fragment takes part in the DOM hierarchy
    pub fn in_dom_hierarchy(&self, id: FragmentId) -> bool {
        id == self.root || self.dom.parent(id).is_some()
    }

    pub(crate) fn insert(&mut self, fragment: Fragment) -> FragmentId {
        let id = fragment.id;
        self.fragments.insert(id, fragment);
        id
    }

    pub(crate) fn get_mut(&mut self, id: FragmentId) -> Option<&mut Fragment> {
        self.fragments.get_mut(&id)
    }

    pub(crate) fn set_anchor(&mut self, id: FragmentId, node: NodeId) {
        if let Some(fragment) = self.fragments.get_mut(&id) {
            fragment.anchor = Some(node);
            self.anchors.entry(node).or_insert(id);
        }
    }

    pub(crate) fn link_visual(&mut self, parent: FragmentId, child: FragmentId) -> bool {
        self.visual.link(parent, child)
    }

    pub(crate) fn link_dom(&mut self, parent: FragmentId, child: FragmentId) -> bool {
        self.dom.link(parent, child)
    }

    fn is_useful(&self, id: FragmentId) -> bool {
        self.get(id).is_some_and(Fragment::is_useful)
    }

    fn contains_node(&self, id: FragmentId, tree: &DocumentTree, node: NodeId) -> bool {
        self.get(id).is_some_and(|f| f.contains_node(tree, node))
    }

    /// Deepest fragment containing `node`, walking the visual hierarchy from the
    /// root and only descending into useful children
    pub fn closest_fragment(&self, tree: &DocumentTree, node: NodeId) -> Option<FragmentId> {
        if !self.contains_node(self.root, tree, node) {
            return None;
        }

        let mut current = self.root;
        loop {
            let containing = self
                .visual
                .children(current)
                .iter()
                .copied()
                .find(|child| self.contains_node(*child, tree, node));
            match containing {
                Some(child) if self.is_useful(child) => current = child,
                _ => break,
            }
        }
        debug!("Closest fragment for {} is {}", tree.skeleton_xpath(node), current);
        Some(current)
    }

    /// Nearest useful fragment anchored at `node` or one of its DOM ancestors
    pub fn closest_dom_fragment(&self, tree: &DocumentTree, node: NodeId) -> Option<FragmentId> {
        let mut current = Some(node);
        while let Some(n) = current {
            if let Some(owner) = self.anchor_owner(n).filter(|id| self.is_useful(*id)) {
                debug!("Closest dom fragment for {} is {}", tree.skeleton_xpath(node), owner);
                return Some(owner);
            }
            current = tree.parent(n);
        }
        None
    }

    /// Closest visual fragment of a candidate, memoized on the candidate
    pub fn closest_fragment_for(&self, tree: &DocumentTree, candidate: &CandidateElement) -> Option<FragmentId> {
        if let Some(cached) = candidate.cached_closest_fragment() {
            return Some(cached);
        }
        let closest = self.closest_fragment(tree, candidate.node)?;
        self.contains_node(closest, tree, candidate.node)
            .then(|| candidate.cache_closest_fragment(closest))
    }

    /// Closest DOM fragment of a candidate, memoized on the candidate
    pub fn closest_dom_fragment_for(&self, tree: &DocumentTree, candidate: &CandidateElement) -> Option<FragmentId> {
        if let Some(cached) = candidate.cached_closest_dom_fragment() {
            return Some(cached);
        }
        let closest = self.closest_dom_fragment(tree, candidate.node)?;
        self.contains_node(closest, tree, candidate.node)
            .then(|| candidate.cache_closest_dom_fragment(closest))
    }

    /// Attribute every candidate to its closest useful fragment and to all of
    /// that fragment's ancestors in both hierarchies
    pub fn attach_candidates(&mut self, tree: &DocumentTree, candidates: &CandidateSet) {
        for fragment in self.fragments.values_mut() {
            fragment.candidates.clear();
        }

        for (index, candidate) in candidates.iter() {
            let Some(closest) = self.closest_fragment(tree, candidate.node) else {
                error!("Could not find closest fragment for {}", tree.skeleton_xpath(candidate.node));
                continue;
            };
            let closest_dom = match self.get(closest).and_then(Fragment::anchor) {
                Some(_) => Some(closest),
                None => self.closest_dom_fragment(tree, candidate.node),
            };

            let visual_chain = self.visual.ancestors(closest);
            candidate.cache_closest_fragment(closest);
            for id in visual_chain {
                if let Some(fragment) = self.fragments.get_mut(&id) {
                    fragment.add_candidate(index);
                }
            }

            if let Some(closest_dom) = closest_dom {
                let dom_chain = self.dom.ancestors(closest_dom);
                candidate.cache_closest_dom_fragment(closest_dom);
                for id in dom_chain {
                    if let Some(fragment) = self.fragments.get_mut(&id) {
                        fragment.add_candidate(index);
                    }
                }
            }
        }
    }

    /// Flag a fragment dynamic. Returns true if it was not flagged before.
    pub fn set_dynamic(&self, id: FragmentId) -> bool {
        self.get(id)
            .is_some_and(|fragment| !fragment.dynamic.swap(true, Ordering::Relaxed))
    }

    pub fn dynamic_fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments().filter(|f| f.is_dynamic())
    }

    /// Whether `node` lies inside any fragment flagged dynamic
    pub fn in_dynamic_fragment(&self, tree: &DocumentTree, node: NodeId) -> bool {
        self.dynamic_fragments().any(|f| f.contains_node(tree, node))
    }

    /// Render one hierarchy as an indented tree of ids
    pub fn render_tree(&self, kind: HierarchyKind) -> String {
        let mut out = String::new();
        self.render(self.root, kind, "", "", &mut out);
        out
    }

    fn render(&self, id: FragmentId, kind: HierarchyKind, prefix: &str, children_prefix: &str, out: &mut String) {
        out.push_str(prefix);
        out.push_str(&id.to_string());
        out.push('\n');

        let children = self.hierarchy(kind).children(id);
        for (i, child) in children.iter().enumerate() {
            if i + 1 < children.len() {
                self.render(
                    *child,
                    kind,
                    &format!("{children_prefix}├── "),
                    &format!("{children_prefix}│   "),
                    out,
                );
            } else {
                self.render(
                    *child,
                    kind,
                    &format!("{children_prefix}└── "),
                    &format!("{children_prefix}    "),
                    out,
                );
            }
        }
    }
}
