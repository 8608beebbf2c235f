//! Ordered tree edit distance with unit costs.
//!
//! Zhang–Shasha keyroot decomposition. Nodes are addressed by 1-based post-order
//! position; position 0 in an [`Alignment`] means "no counterpart".

use crate::ted::extract::LabeledTreeNode;
use std::collections::HashMap;

/// Post-order arrays of one tree, index 0 unused
#[derive(Debug, Default)]
struct Flat {
    labels: Vec<u32>,
    leftmost: Vec<usize>,
    keyroots: Vec<usize>,
}

impl Flat {
    fn new(root: &LabeledTreeNode, interner: &mut HashMap<String, u32>) -> Self {
        let mut flat = Flat {
            labels: vec![0],
            leftmost: vec![0],
            keyroots: Vec::new(),
        };
        flat.push(root, interner);

        let n = flat.len();
        let mut seen = vec![false; n + 1];
        for i in (1..=n).rev() {
            let l = flat.leftmost[i];
            if !seen[l] {
                seen[l] = true;
                flat.keyroots.push(i);
            }
        }
        flat.keyroots.reverse();
        flat
    }

    /// Append the subtree in post-order
    fn push(&mut self, root: &LabeledTreeNode, interner: &mut HashMap<String, u32>) {
        // node, next child to visit, leftmost leaf of its first child
        let mut stack = vec![(root, 0usize, None::<usize>)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(child) = node.children.get(top.1) {
                top.1 += 1;
                stack.push((child, 0, None));
                continue;
            }

            let Some((node, _, first_leaf)) = stack.pop() else { break };
            let next_id = interner.len() as u32 + 1;
            let label = *interner.entry(node.label.to_lowercase()).or_insert(next_id);
            self.labels.push(label);
            let position = self.labels.len() - 1;
            let leftmost = first_leaf.unwrap_or(position);
            self.leftmost.push(leftmost);

            if let Some(parent) = stack.last_mut() {
                parent.2.get_or_insert(leftmost);
            }
        }
    }

    fn len(&self) -> usize {
        self.labels.len() - 1
    }
}

/// One edit operation of an alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Node of the first tree has no counterpart
    Delete(usize),
    /// Node of the second tree has no counterpart
    Insert(usize),
    /// Nodes are matched, possibly with a relabel
    Map(usize, usize),
}

/// Node-to-node correspondence witnessing a minimum edit distance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alignment {
    pairs: Vec<(usize, usize)>,
}

impl Alignment {
    /// Raw `(positionInTree1 | 0, positionInTree2 | 0)` pairs
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = EditOp> + '_ {
        self.pairs.iter().map(|&(a, b)| match (a, b) {
            (a, 0) => EditOp::Delete(a),
            (0, b) => EditOp::Insert(b),
            (a, b) => EditOp::Map(a, b),
        })
    }
}

/// Edit distance between two labeled trees, with the alignment available on demand
#[derive(Debug)]
pub struct TreeEditDistance {
    a: Flat,
    b: Flat,
    /// Tree distances, `(n + 1) * (m + 1)`
    td: Vec<u32>,
    /// Forest distance scratch for the current subtree pair
    fd: Vec<u32>,
    fd_cols: usize,
    distance: u32,
}

impl TreeEditDistance {
    /// Compute the distance between two trees
    pub fn compute(a: &LabeledTreeNode, b: &LabeledTreeNode) -> Self {
        let mut interner = HashMap::new();
        let a = Flat::new(a, &mut interner);
        let b = Flat::new(b, &mut interner);
        let (n, m) = (a.len(), b.len());

        let mut engine = Self {
            a,
            b,
            td: vec![0; (n + 1) * (m + 1)],
            fd: Vec::new(),
            fd_cols: 0,
            distance: 0,
        };

        let keyroots_a = engine.a.keyroots.clone();
        let keyroots_b = engine.b.keyroots.clone();
        for &i in &keyroots_a {
            for &j in &keyroots_b {
                engine.forest_dist(i, j, true);
            }
        }
        engine.distance = engine.td(n, m);
        engine
    }

    /// Minimum number of insertions, deletions and relabels
    pub fn distance(&self) -> f64 {
        f64::from(self.distance)
    }

    /// Node counts of the two trees
    pub fn sizes(&self) -> (usize, usize) {
        (self.a.len(), self.b.len())
    }

    fn td(&self, i: usize, j: usize) -> u32 {
        self.td[i * (self.b.len() + 1) + j]
    }

    fn rename(&self, i: usize, j: usize) -> u32 {
        u32::from(self.a.labels[i] != self.b.labels[j])
    }

    /// Fill the forest-distance table of subtrees `i` and `j`. Rows run from
    /// `leftmost(i) - 1` to `i`, columns from `leftmost(j) - 1` to `j`.
    fn forest_dist(&mut self, i: usize, j: usize, record: bool) {
        let (li, lj) = (self.a.leftmost[i], self.b.leftmost[j]);
        let rows = i - li + 2;
        let cols = j - lj + 2;
        self.fd.clear();
        self.fd.resize(rows * cols, 0);
        self.fd_cols = cols;
        let m1 = self.b.len() + 1;

        let at = |x: usize, y: usize| (x + 1 - li) * cols + (y + 1 - lj);

        for x in li..=i {
            self.fd[at(x, lj - 1)] = self.fd[at(x - 1, lj - 1)] + 1;
        }
        for y in lj..=j {
            self.fd[at(li - 1, y)] = self.fd[at(li - 1, y - 1)] + 1;
        }

        for x in li..=i {
            for y in lj..=j {
                let delete = self.fd[at(x - 1, y)] + 1;
                let insert = self.fd[at(x, y - 1)] + 1;
                let value = if self.a.leftmost[x] == li && self.b.leftmost[y] == lj {
                    let value = delete.min(insert).min(self.fd[at(x - 1, y - 1)] + self.rename(x, y));
                    if record {
                        self.td[x * m1 + y] = value;
                    }
                    value
                } else {
                    let subtree = self.fd[at(self.a.leftmost[x] - 1, self.b.leftmost[y] - 1)] + self.td(x, y);
                    delete.min(insert).min(subtree)
                };
                self.fd[at(x, y)] = value;
            }
        }
    }

    fn fd_at(&self, li: usize, lj: usize, x: usize, y: usize) -> u32 {
        self.fd[(x + 1 - li) * self.fd_cols + (y + 1 - lj)]
    }

    /// Recover one minimum-cost alignment.
    ///
    /// Ties prefer matching, then deletion, then insertion, so identical inputs
    /// always yield the identical alignment.
    pub fn alignment(&mut self) -> Alignment {
        let (n, m) = (self.a.len(), self.b.len());
        let mut pairs = Vec::with_capacity(n.max(m));
        let mut stack = vec![(n, m)];

        while let Some((i, j)) = stack.pop() {
            self.forest_dist(i, j, false);
            let (li, lj) = (self.a.leftmost[i], self.b.leftmost[j]);
            let (mut r, mut c) = (i, j);

            while r >= li || c >= lj {
                let current = self.fd_at(li, lj, r, c);

                if r >= li && c >= lj {
                    let (lr, lc) = (self.a.leftmost[r], self.b.leftmost[c]);
                    if lr == li && lc == lj {
                        if current == self.fd_at(li, lj, r - 1, c - 1) + self.rename(r, c) {
                            pairs.push((r, c));
                            r -= 1;
                            c -= 1;
                            continue;
                        }
                    } else if current == self.fd_at(li, lj, lr - 1, lc - 1) + self.td(r, c) {
                        stack.push((r, c));
                        r = lr - 1;
                        c = lc - 1;
                        continue;
                    }
                }

                if r >= li && current == self.fd_at(li, lj, r - 1, c) + 1 {
                    pairs.push((r, 0));
                    r -= 1;
                } else if c >= lj {
                    pairs.push((0, c));
                    c -= 1;
                } else {
                    pairs.push((r, 0));
                    r -= 1;
                }
            }
        }

        pairs.reverse();
        Alignment { pairs }
    }

    /// Cost of an alignment under the unit cost model
    pub fn alignment_cost(&self, alignment: &Alignment) -> f64 {
        let cost: u32 = alignment
            .ops()
            .map(|op| match op {
                EditOp::Delete(_) | EditOp::Insert(_) => 1,
                EditOp::Map(a, b) => self.rename(a, b),
            })
            .sum();
        f64::from(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeId;

    fn t(label: &str, children: Vec<LabeledTreeNode>) -> LabeledTreeNode {
        LabeledTreeNode {
            node: NodeId(0),
            label: label.to_string(),
            children,
        }
    }

    fn leaf(label: &str) -> LabeledTreeNode {
        t(label, vec![])
    }

    fn distance(a: &LabeledTreeNode, b: &LabeledTreeNode) -> f64 {
        TreeEditDistance::compute(a, b).distance()
    }

    fn assert_alignment_valid(a: &LabeledTreeNode, b: &LabeledTreeNode) {
        let mut ted = TreeEditDistance::compute(a, b);
        let alignment = ted.alignment();
        let (n, m) = ted.sizes();

        assert_eq!(ted.alignment_cost(&alignment), ted.distance());

        let mut seen_a = vec![0; n + 1];
        let mut seen_b = vec![0; m + 1];
        for &(x, y) in alignment.pairs() {
            assert!(x != 0 || y != 0);
            seen_a[x] += 1;
            seen_b[y] += 1;
        }
        assert!(seen_a[1..].iter().all(|c| *c == 1), "every node of A appears once");
        assert!(seen_b[1..].iter().all(|c| *c == 1), "every node of B appears once");
    }

    #[test]
    fn test_identical_single_node() {
        let a = leaf("div");
        let mut ted = TreeEditDistance::compute(&a, &a);
        assert_eq!(ted.distance(), 0.0);
        assert_eq!(ted.alignment().pairs(), &[(1, 1)]);
    }

    #[test]
    fn test_single_relabel() {
        let a = t("div", vec![t("span", vec![leaf("#text:x")])]);
        let b = t("div", vec![t("span", vec![leaf("#text:y")])]);
        let mut ted = TreeEditDistance::compute(&a, &b);

        assert_eq!(ted.distance(), 1.0);
        assert_eq!(ted.alignment().pairs(), &[(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_insert_and_delete() {
        let a = t("ul", vec![leaf("li"), leaf("li")]);
        let b = t("ul", vec![leaf("li"), leaf("li"), leaf("li")]);

        assert_eq!(distance(&a, &b), 1.0);
        assert_eq!(distance(&b, &a), 1.0);
        assert_alignment_valid(&a, &b);
        assert_alignment_valid(&b, &a);
    }

    #[test]
    fn test_classic_example() {
        // f(d(a, c(b)), e) vs f(c(d(a, b)), e): distance 2
        let a = t("f", vec![t("d", vec![leaf("a"), t("c", vec![leaf("b")])]), leaf("e")]);
        let b = t("f", vec![t("c", vec![t("d", vec![leaf("a"), leaf("b")])]), leaf("e")]);

        assert_eq!(distance(&a, &b), 2.0);
        assert_eq!(distance(&b, &a), 2.0);
        assert_alignment_valid(&a, &b);
        assert_alignment_valid(&b, &a);
    }

    #[test]
    fn test_order_matters() {
        let a = t("div", vec![leaf("p"), leaf("span")]);
        let b = t("div", vec![leaf("span"), leaf("p")]);

        assert_eq!(distance(&a, &b), 2.0);
        assert_alignment_valid(&a, &b);
    }

    #[test]
    fn test_labels_compared_case_insensitively() {
        assert_eq!(distance(&leaf("DIV"), &leaf("div")), 0.0);
    }

    #[test]
    fn test_disjoint_trees() {
        let a = t("a", vec![leaf("b"), leaf("c")]);
        let b = t("x", vec![t("y", vec![leaf("z"), leaf("w")])]);

        assert_eq!(distance(&a, &b), 4.0);
        assert_alignment_valid(&a, &b);
    }

    #[test]
    fn test_alignment_is_deterministic() {
        let a = t("body", vec![t("div", vec![leaf("p"), leaf("p")]), leaf("footer")]);
        let b = t("body", vec![t("div", vec![leaf("p")]), t("section", vec![leaf("p")]), leaf("footer")]);

        let first = TreeEditDistance::compute(&a, &b).alignment();
        let second = TreeEditDistance::compute(&a, &b).alignment();
        assert_eq!(first, second);
        assert_alignment_valid(&a, &b);
    }

    #[test]
    fn test_ops_classification() {
        let alignment = Alignment {
            pairs: vec![(1, 0), (0, 1), (2, 2)],
        };
        let ops: Vec<_> = alignment.ops().collect();
        assert_eq!(ops, vec![EditOp::Delete(1), EditOp::Insert(1), EditOp::Map(2, 2)]);
    }

    #[test]
    fn test_deep_chain() {
        let chain = |text: &str| {
            let mut node = leaf(text);
            for _ in 0..1000 {
                node = t("div", vec![node]);
            }
            node
        };
        let (a, b) = (chain("#text:x"), chain("#text:y"));
        let ted = TreeEditDistance::compute(&a, &b);

        assert_eq!(ted.sizes(), (1001, 1001));
        assert_eq!(ted.distance(), 1.0);
    }
}
