use crate::fragment::FragmentId;
use crate::state::{StatePayload, StateVertex};
use log::{debug, error, info, warn};

impl StateVertex {
    /// Flag the fragments of this state whose content differs from a
    /// near-duplicate `reference` as dynamic.
    ///
    /// Every node that differs is marked dynamic on this state's document, so
    /// later hidden checks skip it. Returns the fragments flagged by this call,
    /// in discovery order. Both states must be hybrid; anything else yields an
    /// empty list.
    pub fn assign_dynamic_fragments(&self, reference: &StateVertex) -> Vec<FragmentId> {
        let (StatePayload::Hybrid(current), StatePayload::Hybrid(near_duplicate)) = (&self.payload, &reference.payload)
        else {
            warn!(
                "Dynamic fragments need two hybrid states, got {} and {}",
                self.payload.kind(),
                reference.payload.kind()
            );
            return Vec::new();
        };

        let comparison = match current.structure().compare(near_duplicate.structure()) {
            Ok(comparison) => comparison,
            Err(e) => {
                error!("Could not diff {} against {}: {}", self, reference, e);
                return Vec::new();
            }
        };
        let diff_nodes = comparison.diff_nodes_first();
        debug!("{} nodes of {} differ from {}", diff_nodes.len(), self, reference);

        let tree = current.tree();
        let mut dynamic = Vec::new();
        for node in diff_nodes {
            if tree.get(node).is_none() {
                error!("Diff node {} is not part of {}", node, self);
                continue;
            }
            tree.set_dynamic(node);

            let Some(fragments) = current.fragments() else {
                continue;
            };
            let Some(closest) = fragments.closest_fragment(tree, node) else {
                error!("Could not find closest fragment for {}", tree.skeleton_xpath(node));
                continue;
            };
            if !dynamic.contains(&closest) {
                fragments.set_dynamic(closest);
                dynamic.push(closest);
            }
        }

        if !dynamic.is_empty() {
            info!("Marked {} fragments of {} dynamic", dynamic.len(), self);
        }
        dynamic
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ComparisonConfig, HybridPolicy};
    use crate::dom::{BoundingBox, DocumentTree, ElementNode, NodeId};
    use crate::fragment::{FragmentBuilder, FragmentId, MinSizePolicy, Rectangle};
    use crate::state::{HybridPayload, StatePayload, StateVertex, TreeEditPayload};

    fn page(headline: &str) -> DocumentTree {
        DocumentTree::from_element(
            &ElementNode::new("body").with_child(
                ElementNode::new("main")
                    .with_child(
                        ElementNode::new("section")
                            .with_child(ElementNode::new("p").with_text(headline))
                            .with_child(ElementNode::new("p").with_text("Weather")),
                    )
                    .with_child(ElementNode::new("section").with_child(ElementNode::new("p").with_text("About us"))),
            ),
        )
    }

    fn at(tree: &DocumentTree, xpath: &str) -> NodeId {
        tree.resolve_xpath(xpath).unwrap()
    }

    fn hybrid_state(id: usize, headline: &str, config: ComparisonConfig) -> StateVertex {
        let tree = page(headline);
        let p1 = at(&tree, "/body[1]/main[1]/section[1]/p[1]");
        let p2 = at(&tree, "/body[1]/main[1]/section[1]/p[2]");
        let p3 = at(&tree, "/body[1]/main[1]/section[2]/p[1]");
        let rectangles = vec![
            Rectangle::new(0, None, BoundingBox::new(0.0, 0.0, 1000.0, 1000.0)).with_blocks(vec![p1, p2, p3]),
            Rectangle::new(1, Some(0), BoundingBox::new(0.0, 0.0, 1000.0, 400.0)).with_blocks(vec![p1, p2]),
            Rectangle::new(2, Some(0), BoundingBox::new(0.0, 500.0, 1000.0, 400.0)).with_blocks(vec![p3]),
        ];
        let policy = MinSizePolicy::default();
        let fragments = FragmentBuilder::new(&tree, &policy).with_state_id(id).build(&rectangles);

        let payload = HybridPayload::new(tree, config).with_fragments(fragments);
        StateVertex::new(id, format!("state{id}"), StatePayload::Hybrid(payload))
    }

    #[test]
    fn test_identical_reference_marks_nothing() {
        let state = hybrid_state(1, "Breaking news", ComparisonConfig::default());
        let reference = hybrid_state(2, "Breaking news", ComparisonConfig::default());

        assert!(state.assign_dynamic_fragments(&reference).is_empty());
        assert_eq!(state.fragments().unwrap().dynamic_fragments().count(), 0);
    }

    #[test]
    fn test_changed_headline_marks_its_fragment() {
        let state = hybrid_state(1, "Breaking news", ComparisonConfig::default());
        let reference = hybrid_state(2, "Other news", ComparisonConfig::default());

        let dynamic = state.assign_dynamic_fragments(&reference);

        assert_eq!(dynamic, vec![FragmentId(1)]);
        let fragments = state.fragments().unwrap();
        assert!(fragments.get(FragmentId(1)).unwrap().is_dynamic());
        assert!(!fragments.get(FragmentId(2)).unwrap().is_dynamic());

        let tree = state.document().unwrap();
        let headline = tree.children(at(tree, "/body[1]/main[1]/section[1]/p[1]"))[0];
        assert!(tree.node(headline).is_dynamic());
        assert!(!tree.is_displayed(headline));
    }

    #[test]
    fn test_dynamic_fragments_are_masked() {
        let config = ComparisonConfig::new().hybrid_policy(HybridPolicy::MaskDynamic);
        let state = hybrid_state(1, "Breaking news", config);
        let reference = hybrid_state(2, "Other news", config);

        assert!(!state.equals(&reference));
        state.assign_dynamic_fragments(&reference);
        assert!(state.equals(&reference));
        assert!(reference.equals(&state));
    }

    #[test]
    fn test_requires_hybrid_states() {
        let state = hybrid_state(1, "Breaking news", ComparisonConfig::default());
        let plain = StateVertex::new(
            2,
            "plain",
            StatePayload::TreeEdit(TreeEditPayload::new(page("Other news"), ComparisonConfig::default())),
        );

        assert!(state.assign_dynamic_fragments(&plain).is_empty());
        assert!(plain.assign_dynamic_fragments(&state).is_empty());
    }
}
