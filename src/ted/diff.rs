use crate::dom::{DocumentTree, NodeId};
use crate::error::Result;
use crate::ted::engine::{Alignment, EditOp, TreeEditDistance};
use crate::ted::extract::{ExtractedTree, NodeLabeler, extract};
use log::debug;

/// Nodes that differ between two documents, per side
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedNodes {
    /// Changed or removed nodes of the first document
    pub doc1: Vec<NodeId>,
    /// Changed or inserted nodes of the second document
    pub doc2: Vec<NodeId>,
}

impl ChangedNodes {
    pub fn is_empty(&self) -> bool {
        self.doc1.is_empty() && self.doc2.is_empty()
    }

    pub fn len(&self) -> usize {
        self.doc1.len() + self.doc2.len()
    }

    /// True when every changed node on both sides fails `is_displayed`.
    /// Vacuously true when nothing changed.
    pub fn all_hidden<F>(&self, doc1: &DocumentTree, doc2: &DocumentTree, is_displayed: F) -> bool
    where
        F: Fn(&DocumentTree, NodeId) -> bool,
    {
        self.doc1.iter().all(|n| !is_displayed(doc1, *n)) && self.doc2.iter().all(|n| !is_displayed(doc2, *n))
    }

    /// Number of changed nodes on both sides that fail `is_displayed`
    pub fn hidden_count<F>(&self, doc1: &DocumentTree, doc2: &DocumentTree, is_displayed: F) -> usize
    where
        F: Fn(&DocumentTree, NodeId) -> bool,
    {
        self.doc1.iter().filter(|n| !is_displayed(doc1, **n)).count()
            + self.doc2.iter().filter(|n| !is_displayed(doc2, **n)).count()
    }
}

/// One edit-distance run between two documents, kept around so the alignment
/// can be classified several ways
#[derive(Debug)]
pub struct TreeComparison<'a> {
    doc1: &'a DocumentTree,
    doc2: &'a DocumentTree,
    first: ExtractedTree,
    second: ExtractedTree,
    distance: f64,
    alignment: Alignment,
}

impl<'a> TreeComparison<'a> {
    /// Extract both documents, compute their distance and one witnessing alignment
    pub fn run(doc1: &'a DocumentTree, doc2: &'a DocumentTree, labeler: &dyn NodeLabeler) -> Result<Self> {
        let first = extract(doc1, labeler)?;
        let second = extract(doc2, labeler)?;

        let mut engine = TreeEditDistance::compute(&first.root, &second.root);
        let distance = engine.distance();
        let alignment = engine.alignment();
        debug!(
            "Edit distance {} between trees of {} and {} nodes ({} aligned pairs)",
            distance,
            first.len(),
            second.len(),
            alignment.len()
        );

        Ok(Self {
            doc1,
            doc2,
            first,
            second,
            distance,
            alignment,
        })
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn alignment(&self) -> &Alignment {
        &self.alignment
    }

    pub fn first(&self) -> &ExtractedTree {
        &self.first
    }

    pub fn second(&self) -> &ExtractedTree {
        &self.second
    }

    fn labels_differ(&self, a: usize, b: usize) -> bool {
        match (self.first.label_at(a), self.second.label_at(b)) {
            (Some(l1), Some(l2)) => l1.to_lowercase() != l2.to_lowercase(),
            _ => true,
        }
    }

    fn texts_differ(&self, n1: NodeId, n2: NodeId) -> bool {
        let text = |tree: &DocumentTree, n: NodeId| tree.node(n).text.as_deref().unwrap_or_default().trim().to_lowercase();
        text(self.doc1, n1) != text(self.doc2, n2)
    }

    fn classify(&self, compare_text: bool) -> ChangedNodes {
        let mut changed = ChangedNodes::default();
        for op in self.alignment.ops() {
            match op {
                EditOp::Delete(a) => changed.doc1.extend(self.first.node_at(a)),
                EditOp::Insert(b) => changed.doc2.extend(self.second.node_at(b)),
                EditOp::Map(a, b) => {
                    let (Some(n1), Some(n2)) = (self.first.node_at(a), self.second.node_at(b)) else {
                        continue;
                    };
                    let differ = self.labels_differ(a, b)
                        || (compare_text
                            && self.doc1.is_text(n1)
                            && self.doc2.is_text(n2)
                            && self.texts_differ(n1, n2));
                    if differ {
                        changed.doc1.push(n1);
                        changed.doc2.push(n2);
                    }
                }
            }
        }
        changed
    }

    /// Unmatched nodes plus matched nodes whose labels differ
    pub fn changed_nodes(&self) -> ChangedNodes {
        self.classify(false)
    }

    /// Like [`changed_nodes`](Self::changed_nodes), but matched text nodes are
    /// also compared by their full trimmed text
    pub fn diff_nodes(&self) -> ChangedNodes {
        self.classify(true)
    }

    /// First-document side of [`diff_nodes`](Self::diff_nodes)
    pub fn diff_nodes_first(&self) -> Vec<NodeId> {
        self.diff_nodes().doc1
    }

    /// Whether every changed node is hidden under the documents' own
    /// displayed/dynamic annotations
    pub fn changed_all_hidden(&self) -> bool {
        self.changed_nodes()
            .all_hidden(self.doc1, self.doc2, |tree, n| tree.is_displayed(n))
    }

    /// Edit distance minus the changed nodes that are not displayed
    pub fn hidden_adjusted_distance(&self) -> f64 {
        let hidden = self
            .changed_nodes()
            .hidden_count(self.doc1, self.doc2, |tree, n| tree.is_displayed(n));
        (self.distance - hidden as f64).max(0.0)
    }

    /// Cost of the alignment with every operation touching a masked node left out
    pub fn masked_distance<M1, M2>(&self, masked1: M1, masked2: M2) -> f64
    where
        M1: Fn(NodeId) -> bool,
        M2: Fn(NodeId) -> bool,
    {
        let is_masked1 = |pos: usize| self.first.node_at(pos).is_some_and(&masked1);
        let is_masked2 = |pos: usize| self.second.node_at(pos).is_some_and(&masked2);

        let cost = self
            .alignment
            .ops()
            .filter(|op| match *op {
                EditOp::Delete(a) => !is_masked1(a),
                EditOp::Insert(b) => !is_masked2(b),
                EditOp::Map(a, b) => self.labels_differ(a, b) && !is_masked1(a) && !is_masked2(b),
            })
            .count();
        cost as f64
    }
}

/// Edit distance between two documents
pub fn edit_distance(doc1: &DocumentTree, doc2: &DocumentTree, labeler: &dyn NodeLabeler) -> Result<f64> {
    Ok(TreeComparison::run(doc1, doc2, labeler)?.distance())
}
