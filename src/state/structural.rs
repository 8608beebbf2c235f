//! DOM-based state payloads: plain tree edit distance and the hybrid
//! structure-plus-fragments variant

use crate::config::{ComparisonConfig, HybridPolicy, LabelMode};
use crate::dom::{CandidateSet, DocumentTree, NodeId};
use crate::error::Result;
use crate::fragment::FragmentTree;
use crate::state::Equivalence;
use crate::ted::{TreeComparison, edit_distance};
use image::DynamicImage;
use log::debug;
use std::sync::OnceLock;

/// Cleaned document compared by edit distance
#[derive(Debug, Clone)]
pub struct TreeEditPayload {
    tree: DocumentTree,
    config: ComparisonConfig,
    /// Node count under the comparison root, computed on first use
    size: OnceLock<usize>,
}

impl TreeEditPayload {
    pub fn new(tree: DocumentTree, config: ComparisonConfig) -> Self {
        Self {
            tree,
            config,
            size: OnceLock::new(),
        }
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn config(&self) -> &ComparisonConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        *self
            .size
            .get_or_init(|| self.tree.subtree_size(self.tree.comparison_root()))
    }

    /// Visual labels only when both sides ask for them
    fn label_mode(&self, other: &Self) -> LabelMode {
        if self.config.label_mode == LabelMode::Visual && other.config.label_mode == LabelMode::Visual {
            LabelMode::Visual
        } else {
            LabelMode::Structure
        }
    }

    fn threshold(&self, other: &Self) -> f64 {
        self.config.threshold.min(other.config.threshold)
    }

    /// Size pre-check, run only when both sides enable it
    fn sizes_differ(&self, other: &Self) -> bool {
        if !(self.config.fast_compare && other.config.fast_compare) {
            return false;
        }
        let differ = self.size() != other.size();
        if differ {
            debug!("Fast compare: sizes {} and {} differ", self.size(), other.size());
        }
        differ
    }

    pub fn compare<'a>(&'a self, other: &'a Self) -> Result<TreeComparison<'a>> {
        TreeComparison::run(&self.tree, &other.tree, &self.label_mode(other))
    }

    /// Edit distance minus the changed nodes that are not displayed
    pub fn hidden_adjusted_distance(&self, other: &Self) -> Result<f64> {
        Ok(self.compare(other)?.hidden_adjusted_distance())
    }
}

impl Equivalence for TreeEditPayload {
    fn distance(&self, other: &Self) -> Result<f64> {
        edit_distance(&self.tree, &other.tree, &self.label_mode(other))
    }

    fn equivalent(&self, other: &Self) -> Result<bool> {
        if self.sizes_differ(other) {
            return Ok(false);
        }
        Ok(self.distance(other)? <= self.threshold(other))
    }
}

/// Document plus screenshot and fragment tree
#[derive(Debug, Clone)]
pub struct HybridPayload {
    structure: TreeEditPayload,
    screenshot: Option<DynamicImage>,
    fragments: Option<FragmentTree>,
}

impl HybridPayload {
    pub fn new(tree: DocumentTree, config: ComparisonConfig) -> Self {
        Self {
            structure: TreeEditPayload::new(tree, config),
            screenshot: None,
            fragments: None,
        }
    }

    pub fn with_screenshot(mut self, screenshot: DynamicImage) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    pub fn with_fragments(mut self, fragments: Option<FragmentTree>) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn structure(&self) -> &TreeEditPayload {
        &self.structure
    }

    pub fn tree(&self) -> &DocumentTree {
        self.structure.tree()
    }

    pub fn screenshot(&self) -> Option<&DynamicImage> {
        self.screenshot.as_ref()
    }

    pub fn fragments(&self) -> Option<&FragmentTree> {
        self.fragments.as_ref()
    }

    pub(crate) fn attach_candidates(&mut self, candidates: &CandidateSet) {
        if let Some(fragments) = self.fragments.as_mut() {
            fragments.attach_candidates(self.structure.tree(), candidates);
        }
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragments.is_some()
    }

    /// Whether `node` is known dynamic, directly or through its fragment
    fn is_masked(&self, node: NodeId) -> bool {
        let tree = self.tree();
        tree.node(node).is_dynamic() || self.fragments.as_ref().is_some_and(|f| f.in_dynamic_fragment(tree, node))
    }

    fn policy(&self, other: &Self) -> HybridPolicy {
        let (mine, theirs) = (self.structure.config.hybrid_policy, other.structure.config.hybrid_policy);
        if mine == theirs {
            mine
        } else {
            debug!("Hybrid policies {:?} and {:?} disagree, comparing by distance", mine, theirs);
            HybridPolicy::Distance
        }
    }
}

impl Equivalence for HybridPayload {
    fn distance(&self, other: &Self) -> Result<f64> {
        self.structure.distance(&other.structure)
    }

    fn equivalent(&self, other: &Self) -> Result<bool> {
        if self.structure.sizes_differ(&other.structure) {
            return Ok(false);
        }
        let threshold = self.structure.threshold(&other.structure);

        match self.policy(other) {
            HybridPolicy::Distance => Ok(self.distance(other)? <= threshold),
            HybridPolicy::MaskDynamic => {
                let comparison = self.structure.compare(&other.structure)?;
                let masked = comparison.masked_distance(|n| self.is_masked(n), |n| other.is_masked(n));
                Ok(masked <= threshold)
            }
            HybridPolicy::ChangedNodesAllHidden => Ok(self.structure.compare(&other.structure)?.changed_all_hidden()),
        }
    }
}
