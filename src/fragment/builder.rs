use crate::dom::{BoundingBox, DocumentTree, NodeId};
use crate::driver::Driver;
use crate::fragment::policy::UsefulnessPolicy;
use crate::fragment::{Fragment, FragmentId, FragmentTree, Rectangle};
use log::{debug, error, info, warn};

/// Whether `candidate` can anchor a fragment without swallowing a sibling: false
/// when it is, or contains, any of the sibling LCAs
pub fn is_a_differentiator(tree: &DocumentTree, sibling_lcas: &[NodeId], candidate: NodeId) -> bool {
    !sibling_lcas.iter().any(|sibling| tree.contains(candidate, *sibling))
}

fn sibling_lcas(tree: &DocumentTree, fragments: &FragmentTree, siblings: &[FragmentId], exclude: FragmentId) -> Vec<NodeId> {
    siblings
        .iter()
        .filter(|id| **id != exclude)
        .filter_map(|id| fragments.get(*id))
        .filter_map(|f| tree.lca(f.nested_blocks()))
        .collect()
}

/// LCA of a fragment's nested blocks, if it differentiates the fragment from its siblings
pub fn highest_differentiator(
    tree: &DocumentTree,
    fragments: &FragmentTree,
    fragment: FragmentId,
    siblings: &[FragmentId],
) -> Option<NodeId> {
    let lca = tree.lca(fragments.get(fragment)?.nested_blocks())?;
    let sibling_lcas = sibling_lcas(tree, fragments, siblings, fragment);
    tree.lca(&sibling_lcas)?;

    is_a_differentiator(tree, &sibling_lcas, lca).then_some(lca)
}

/// Builds the fragment tree of one state from its segmentation rectangles
pub struct FragmentBuilder<'a> {
    tree: &'a DocumentTree,
    policy: &'a dyn UsefulnessPolicy,
    driver: Option<&'a dyn Driver>,
    state_id: usize,
}

impl<'a> FragmentBuilder<'a> {
    pub fn new(tree: &'a DocumentTree, policy: &'a dyn UsefulnessPolicy) -> Self {
        Self {
            tree,
            policy,
            driver: None,
            state_id: 0,
        }
    }

    /// Re-measure element geometry through a live driver
    pub fn with_driver(mut self, driver: &'a dyn Driver) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_state_id(mut self, state_id: usize) -> Self {
        self.state_id = state_id;
        self
    }

    /// Run every construction pass. Returns `None` when there is nothing to
    /// build from (no rectangles, or no root rectangle).
    pub fn build(&self, rectangles: &[Rectangle]) -> Option<FragmentTree> {
        if rectangles.is_empty() {
            debug!("No rectangles for state {}, skipping fragmentation", self.state_id);
            return None;
        }

        let mut fragments = self.initial_fragments(rectangles)?;
        self.anchor_fragments(&mut fragments);
        let from_dom = self.generate_dom_fragments(&mut fragments);
        let divided = self.clean_fragments(&mut fragments);

        info!(
            "Built {} fragments for state {} ({} from DOM structure, {} from DOM division)",
            fragments.len(),
            self.state_id,
            from_dom.len(),
            divided.len()
        );
        Some(fragments)
    }

    /// Geometry of `node`: driver first, then the snapshot, then the union of the blocks
    fn measure(&self, node: NodeId, blocks: &[NodeId]) -> BoundingBox {
        if let Some(driver) = self.driver {
            match driver.measure_element_rect(self.tree, node) {
                Ok(rect) => return rect,
                Err(e) => debug!("Falling back to snapshot geometry for {}: {}", self.tree.skeleton_xpath(node), e),
            }
        }
        self.tree
            .node(node)
            .bounding_box
            .or_else(|| {
                blocks
                    .iter()
                    .filter_map(|b| self.tree.node(*b).bounding_box)
                    .reduce(|a, b| a.union(&b))
            })
            .unwrap_or_default()
    }

    fn fragment_from(&self, rectangle: &Rectangle) -> Fragment {
        let mut fragment = Fragment::new(
            FragmentId(rectangle.id),
            self.state_id,
            rectangle.rect,
            rectangle.nested_blocks.clone(),
        );
        fragment.useful = self.policy.is_useful(&rectangle.rect);
        fragment
    }

    /// One fragment per rectangle, linked visually by parent id
    fn initial_fragments(&self, rectangles: &[Rectangle]) -> Option<FragmentTree> {
        let Some(root_rect) = rectangles.iter().find(|r| r.is_root()) else {
            error!("No root rectangle among {} rectangles of state {}", rectangles.len(), self.state_id);
            return None;
        };
        let root = FragmentId(root_rect.id);
        let mut fragments = FragmentTree::with_root(self.fragment_from(root_rect));

        let mut accepted = Vec::new();
        for rectangle in rectangles {
            if std::ptr::eq(rectangle, root_rect) {
                continue;
            }
            if fragments.get(FragmentId(rectangle.id)).is_some() {
                warn!("Duplicate rectangle id {}, ignoring", rectangle.id);
                continue;
            }
            fragments.insert(self.fragment_from(rectangle));
            accepted.push(rectangle);
        }

        for rectangle in accepted {
            let id = FragmentId(rectangle.id);
            let parent = match rectangle.parent_id {
                Some(p) if fragments.get(FragmentId(p)).is_some() => FragmentId(p),
                Some(p) => {
                    warn!("Rectangle {} has unknown parent {}, attaching to root", rectangle.id, p);
                    root
                }
                None => {
                    warn!("Extra root rectangle {}, attaching to {}", rectangle.id, root);
                    root
                }
            };
            if !fragments.link_visual(parent, id) {
                warn!("Rectangle {} under {} would form a cycle, attaching to root", rectangle.id, parent);
                fragments.link_visual(root, id);
            }
        }

        Some(fragments)
    }

    /// Anchor the root at the LCA of its blocks and every child of a multi-child
    /// fragment at its highest differentiator
    fn anchor_fragments(&self, fragments: &mut FragmentTree) {
        let root = fragments.root();
        let root_anchor = fragments.root_fragment().and_then(|f| self.tree.lca(f.nested_blocks()));
        match root_anchor {
            Some(node) => fragments.set_anchor(root, node),
            None => warn!("Root fragment of state {} has no nested blocks to anchor on", self.state_id),
        }
        self.anchor_children(fragments, root);
    }

    fn anchor_children(&self, fragments: &mut FragmentTree, id: FragmentId) {
        let children = fragments.visual().children(id).to_vec();
        if children.len() == 1 {
            self.anchor_children(fragments, children[0]);
            return;
        }

        for child in &children {
            let anchor = highest_differentiator(self.tree, fragments, *child, &children).or_else(|| {
                match fragments.get(*child)?.nested_blocks() {
                    [single] => {
                        warn!(
                            "No differentiator for single node {} of fragment {} in state {}",
                            self.tree.skeleton_xpath(*single),
                            child,
                            self.state_id
                        );
                        Some(*single)
                    }
                    _ => None,
                }
            });
            match anchor {
                Some(node) => fragments.set_anchor(*child, node),
                None => debug!("Fragment {} left without a DOM anchor", child),
            }
            self.anchor_children(fragments, *child);
        }
    }

    /// Walk the DOM from the root anchor, linking anchored fragments into the DOM
    /// hierarchy and synthesizing fragments at unclaimed LCAs of several blocks
    fn generate_dom_fragments(&self, fragments: &mut FragmentTree) -> Vec<FragmentId> {
        let root = fragments.root();
        let Some(root_fragment) = fragments.root_fragment() else {
            return Vec::new();
        };
        let start = root_fragment.anchor().unwrap_or_else(|| self.tree.root());
        let blocks = root_fragment.nested_blocks().to_vec();

        let mut added = Vec::new();
        self.dom_fragments(fragments, start, &blocks, root, &mut added);
        added
    }

    fn dom_fragments(
        &self,
        fragments: &mut FragmentTree,
        node: NodeId,
        blocks: &[NodeId],
        parent: FragmentId,
        added: &mut Vec<FragmentId>,
    ) {
        let tree = self.tree;
        let mut parent = parent;

        if let Some(owner) = fragments.anchor_owner(node) {
            if owner != parent
                && let Some(visual_parent) = fragments.visual().parent(owner)
            {
                if visual_parent != parent {
                    debug!("Fragment {} sits under {} visually but under {} in the DOM", owner, visual_parent, parent);
                }
                // fragments found below an owned node nest under its owner in the DOM hierarchy
                if fragments.link_dom(parent, owner) {
                    parent = owner;
                } else {
                    warn!("Cannot place fragment {} under {} in the DOM hierarchy", owner, parent);
                }
            }
            debug!("{} already anchors fragment {}", tree.skeleton_xpath(node), owner);

            if blocks.len() <= 1 {
                debug!("No DOM division needed for {}", owner);
                return;
            }
            if !fragments.get(owner).is_some_and(Fragment::is_useful) {
                return;
            }
        } else {
            let Some(lca) = tree.lca(blocks) else {
                return;
            };
            if lca == node {
                if blocks.len() > 1
                    && let Some(created) = self.create_dom_fragment(fragments, node, blocks, parent)
                {
                    added.push(created);
                    parent = created;
                }
            } else if tree.contains(node, lca) {
                self.dom_fragments(fragments, lca, blocks, parent, added);
                return;
            }
        }

        for &child in tree.children(node) {
            if tree.is_text(child) {
                continue;
            }
            if let Some(owner) = fragments.anchor_owner(child) {
                let owner_blocks = fragments
                    .get(owner)
                    .map(|f| f.nested_blocks().to_vec())
                    .unwrap_or_default();
                self.dom_fragments(fragments, child, &owner_blocks, parent, added);
            } else {
                let contained: Vec<NodeId> = blocks.iter().copied().filter(|b| tree.contains(child, *b)).collect();
                if !contained.is_empty() {
                    self.dom_fragments(fragments, child, &contained, parent, added);
                }
            }
        }
    }

    fn create_dom_fragment(
        &self,
        fragments: &mut FragmentTree,
        node: NodeId,
        blocks: &[NodeId],
        parent: FragmentId,
    ) -> Option<FragmentId> {
        let rect = self.measure(node, blocks);
        if !self.policy.is_useful(&rect) {
            debug!("Skipping small DOM fragment at {}", self.tree.skeleton_xpath(node));
            return None;
        }

        let id = fragments.next_fragment_id();
        fragments.insert(Fragment::new(id, self.state_id, rect, blocks.to_vec()));
        fragments.set_anchor(id, node);
        fragments.link_visual(parent, id);
        fragments.link_dom(parent, id);

        info!("Created DOM fragment {}, child of {}, for {}", id, parent, self.tree.skeleton_xpath(node));
        Some(id)
    }

    /// Subdivide useful fragments that never got a DOM anchor
    fn clean_fragments(&self, fragments: &mut FragmentTree) -> Vec<FragmentId> {
        let mut added = Vec::new();
        let ids: Vec<FragmentId> = fragments.ids().collect();

        for id in ids {
            let has_anchored_child = fragments
                .visual()
                .children(id)
                .iter()
                .filter_map(|c| fragments.get(*c))
                .any(|c| c.anchor().is_some() && c.is_useful());
            if has_anchored_child {
                continue;
            }
            if fragments.get(id).is_some_and(|f| f.anchor().is_none() && f.is_useful()) {
                added.extend(self.divide_fragment_by_dom(fragments, id));
            }
        }
        added
    }

    fn divide_fragment_by_dom(&self, fragments: &mut FragmentTree, id: FragmentId) -> Vec<FragmentId> {
        let Some(visual_parent) = fragments.visual().parent(id) else {
            return Vec::new();
        };
        let Some(blocks) = fragments.get(id).map(|f| f.nested_blocks().to_vec()) else {
            return Vec::new();
        };
        let Some(parent_box) = self.tree.lca(&blocks) else {
            debug!("Fragment {} has no nested blocks to divide", id);
            return Vec::new();
        };

        let siblings = fragments.visual().children(visual_parent).to_vec();
        let sibling_lcas = sibling_lcas(self.tree, fragments, &siblings, id);
        let mut found = Vec::new();
        self.differentiating_nodes(&blocks, &sibling_lcas, parent_box, &mut found);
        if found.is_empty() {
            return Vec::new();
        }

        let dom_parent = fragments
            .visual()
            .ancestors(id)
            .into_iter()
            .find(|a| fragments.in_dom_hierarchy(*a))
            .unwrap_or_else(|| fragments.root());

        let mut added = Vec::new();
        for (node, contained, rect) in found {
            let child = fragments.next_fragment_id();
            fragments.insert(Fragment::new(child, self.state_id, rect, contained));
            fragments.set_anchor(child, node);
            fragments.link_visual(id, child);
            fragments.link_dom(dom_parent, child);
            info!("Added fragment {} to {} using DOM division", child, id);
            added.push(child);
        }

        self.adjust_rectangle(fragments, id);
        added
    }

    fn differentiating_nodes(
        &self,
        blocks: &[NodeId],
        sibling_lcas: &[NodeId],
        parent_box: NodeId,
        found: &mut Vec<(NodeId, Vec<NodeId>, BoundingBox)>,
    ) {
        for &child in self.tree.children(parent_box) {
            if self.tree.is_text(child) {
                continue;
            }
            let contained: Vec<NodeId> = blocks.iter().copied().filter(|b| self.tree.contains(child, *b)).collect();
            let rect = self.measure(child, &contained);
            if !self.policy.is_useful(&rect) || contained.is_empty() {
                continue;
            }

            if is_a_differentiator(self.tree, sibling_lcas, child) {
                found.push((child, contained, rect));
            } else {
                self.differentiating_nodes(blocks, sibling_lcas, child, found);
            }
        }
    }

    /// Grow a fragment's rectangle to cover its visual children
    fn adjust_rectangle(&self, fragments: &mut FragmentTree, id: FragmentId) {
        let Some(current) = fragments.get(id).map(Fragment::rect) else {
            return;
        };
        let covered = fragments
            .visual()
            .children(id)
            .iter()
            .filter_map(|c| fragments.get(*c))
            .fold(current, |acc, child| acc.union(&child.rect()));
        if let Some(fragment) = fragments.get_mut(id) {
            fragment.rect = covered;
        }
    }
}
