//! Browser states and their equivalence strategies
//!
//! A [`StateVertex`] is one observed page. What it is compared by lives in its
//! [`StatePayload`]: a cleaned document (edit distance), a document with
//! fragments (hybrid), a perceptual hash, or a screenshot (SSIM). Every payload
//! implements [`Equivalence`]; the vertex adds the identity shortcut, a stable
//! comparison order and the "never fail" boundary.

pub mod dynamic;
pub mod factory;
pub mod structural;
pub mod visual;

pub use factory::{HashStateFactory, HybridStateFactory, SsimStateFactory, StateFactory, TreeEditStateFactory};
pub use structural::{HybridPayload, TreeEditPayload};
pub use visual::{BlockMeanHash, ColorMomentHash, HashPayload, ImageHasher, SimilarityScorer, SsimPayload, WindowedSsim};

use crate::dom::{CandidateSet, DocumentTree, NodeId};
use crate::error::{Result, StateError};
use crate::fragment::{Fragment, FragmentTree, export_fragments};
use image::DynamicImage;
use log::{debug, error, warn};
use std::fmt;
use std::path::{Path, PathBuf};

/// Distance reported when two states cannot be compared
pub const INCOMPARABLE_DISTANCE: f64 = -1.0;

/// Comparison capability of one payload variant
pub trait Equivalence {
    /// Variant-specific distance; larger means further apart
    fn distance(&self, other: &Self) -> Result<f64>;

    /// Whether the two payloads describe the same state
    fn equivalent(&self, other: &Self) -> Result<bool>;
}

/// Variant-specific data a state is compared by
#[derive(Debug, Clone)]
pub enum StatePayload {
    TreeEdit(TreeEditPayload),
    Hybrid(HybridPayload),
    PerceptualHash(HashPayload),
    Ssim(SsimPayload),
}

impl StatePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            StatePayload::TreeEdit(_) => "tree-edit",
            StatePayload::Hybrid(_) => "hybrid",
            StatePayload::PerceptualHash(_) => "perceptual-hash",
            StatePayload::Ssim(_) => "ssim",
        }
    }

    /// The cleaned document, for variants that carry one
    pub fn document(&self) -> Option<&DocumentTree> {
        match self {
            StatePayload::TreeEdit(payload) => Some(payload.tree()),
            StatePayload::Hybrid(payload) => Some(payload.tree()),
            _ => None,
        }
    }

    fn structure(&self) -> Option<&TreeEditPayload> {
        match self {
            StatePayload::TreeEdit(payload) => Some(payload),
            StatePayload::Hybrid(payload) => Some(payload.structure()),
            _ => None,
        }
    }

    fn incomparable(&self, other: &Self) -> StateError {
        StateError::Incomparable {
            left: self.kind().to_string(),
            right: other.kind().to_string(),
            reason: "payload variants differ".to_string(),
        }
    }
}

impl Equivalence for StatePayload {
    fn distance(&self, other: &Self) -> Result<f64> {
        match (self, other) {
            (StatePayload::TreeEdit(a), StatePayload::TreeEdit(b)) => a.distance(b),
            (StatePayload::Hybrid(a), StatePayload::Hybrid(b)) => a.distance(b),
            (StatePayload::PerceptualHash(a), StatePayload::PerceptualHash(b)) => a.distance(b),
            (StatePayload::Ssim(a), StatePayload::Ssim(b)) => a.distance(b),
            _ => Err(self.incomparable(other)),
        }
    }

    fn equivalent(&self, other: &Self) -> Result<bool> {
        match (self, other) {
            (StatePayload::TreeEdit(a), StatePayload::TreeEdit(b)) => a.equivalent(b),
            (StatePayload::Hybrid(a), StatePayload::Hybrid(b)) => a.equivalent(b),
            (StatePayload::PerceptualHash(a), StatePayload::PerceptualHash(b)) => a.equivalent(b),
            (StatePayload::Ssim(a), StatePayload::Ssim(b)) => a.equivalent(b),
            _ => Err(self.incomparable(other)),
        }
    }
}

/// One discovered browser state
#[derive(Debug, Clone)]
pub struct StateVertex {
    id: usize,
    name: String,
    url: Option<String>,
    /// Snapshot as captured
    dom: String,
    /// Snapshot after cosmetic cleaning
    stripped_dom: String,
    candidates: CandidateSet,
    payload: StatePayload,
}

impl StateVertex {
    pub fn new(id: usize, name: impl Into<String>, payload: StatePayload) -> Self {
        Self {
            id,
            name: name.into(),
            url: None,
            dom: String::new(),
            stripped_dom: String::new(),
            candidates: CandidateSet::new(),
            payload,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the raw and the cleaned snapshot strings
    pub fn with_dom(mut self, dom: impl Into<String>, stripped_dom: impl Into<String>) -> Self {
        self.dom = dom.into();
        self.stripped_dom = stripped_dom.into();
        self
    }

    pub fn with_candidates(mut self, candidates: CandidateSet) -> Self {
        self.set_candidates(candidates);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn dom(&self) -> &str {
        &self.dom
    }

    pub fn stripped_dom(&self) -> &str {
        &self.stripped_dom
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    pub fn payload(&self) -> &StatePayload {
        &self.payload
    }

    pub fn document(&self) -> Option<&DocumentTree> {
        self.payload.document()
    }

    /// Replace the candidate elements and attribute them to fragments
    pub fn set_candidates(&mut self, candidates: CandidateSet) {
        if let StatePayload::Hybrid(payload) = &mut self.payload {
            payload.attach_candidates(&candidates);
        }
        self.candidates = candidates;
    }

    /// Both states in id order, so either call direction computes the same thing
    fn ordered<'a>(&'a self, other: &'a Self) -> (&'a Self, &'a Self) {
        if self.id <= other.id { (self, other) } else { (other, self) }
    }

    /// Whether the two states are the same. Never fails: a comparison error is
    /// logged and answered `false`.
    pub fn equals(&self, other: &Self) -> bool {
        if self.id == other.id {
            return true;
        }
        let (first, second) = self.ordered(other);
        match first.payload.equivalent(&second.payload) {
            Ok(equal) => {
                debug!("{} and {} equal: {}", first, second, equal);
                equal
            }
            Err(e) => {
                log_failure("Comparing", first, second, &e);
                false
            }
        }
    }

    /// Variant-specific distance, or [`INCOMPARABLE_DISTANCE`] when the states
    /// cannot be compared
    pub fn distance(&self, other: &Self) -> f64 {
        let (first, second) = self.ordered(other);
        first.payload.distance(&second.payload).unwrap_or_else(|e| {
            log_failure("Distance between", first, second, &e);
            INCOMPARABLE_DISTANCE
        })
    }

    /// Hash range check without the perfect-match shortcut. False for
    /// non-hash states.
    pub fn in_threshold(&self, other: &Self) -> bool {
        let (first, second) = self.ordered(other);
        let result = match (&first.payload, &second.payload) {
            (StatePayload::PerceptualHash(a), StatePayload::PerceptualHash(b)) => a.in_threshold(b),
            (a, b) => Err(a.incomparable(b)),
        };
        result.unwrap_or_else(|e| {
            log_failure("Threshold check between", first, second, &e);
            false
        })
    }

    /// Edit distance minus the changed nodes that are not displayed, or
    /// [`INCOMPARABLE_DISTANCE`] for states without documents
    pub fn hidden_adjusted_distance(&self, other: &Self) -> f64 {
        let (first, second) = self.ordered(other);
        let result = match (first.payload.structure(), second.payload.structure()) {
            (Some(a), Some(b)) => a.hidden_adjusted_distance(b),
            _ => Err(first.payload.incomparable(&second.payload)),
        };
        result.unwrap_or_else(|e| {
            log_failure("Adjusted distance between", first, second, &e);
            INCOMPARABLE_DISTANCE
        })
    }

    fn hybrid(&self) -> Option<&HybridPayload> {
        match &self.payload {
            StatePayload::Hybrid(payload) => Some(payload),
            _ => None,
        }
    }

    /// The fragment tree, for hybrid states that could be fragmented
    pub fn fragments(&self) -> Option<&FragmentTree> {
        self.hybrid().and_then(HybridPayload::fragments)
    }

    pub fn screenshot(&self) -> Option<&DynamicImage> {
        self.hybrid().and_then(HybridPayload::screenshot)
    }

    pub fn root_fragment(&self) -> Option<&Fragment> {
        self.fragments().and_then(FragmentTree::root_fragment)
    }

    /// Deepest useful fragment containing `node` in the visual hierarchy
    pub fn closest_fragment(&self, node: NodeId) -> Option<&Fragment> {
        let payload = self.hybrid()?;
        let fragments = payload.fragments()?;
        fragments
            .closest_fragment(payload.tree(), node)
            .and_then(|id| fragments.get(id))
    }

    /// Closest visual fragment of the candidate at `index`
    pub fn closest_fragment_for(&self, index: usize) -> Option<&Fragment> {
        let payload = self.hybrid()?;
        let fragments = payload.fragments()?;
        let candidate = self.candidates.get(index)?;
        fragments
            .closest_fragment_for(payload.tree(), candidate)
            .and_then(|id| fragments.get(id))
    }

    /// Nearest useful fragment anchored at `node` or a DOM ancestor of it
    pub fn closest_dom_fragment(&self, node: NodeId) -> Option<&Fragment> {
        let payload = self.hybrid()?;
        let fragments = payload.fragments()?;
        fragments
            .closest_dom_fragment(payload.tree(), node)
            .and_then(|id| fragments.get(id))
    }

    /// Closest DOM fragment of the candidate at `index`
    pub fn closest_dom_fragment_for(&self, index: usize) -> Option<&Fragment> {
        let payload = self.hybrid()?;
        let fragments = payload.fragments()?;
        let candidate = self.candidates.get(index)?;
        fragments
            .closest_dom_fragment_for(payload.tree(), candidate)
            .and_then(|id| fragments.get(id))
    }

    /// Crop every useful fragment out of `viewport` into `<dir>/<state name>/`.
    /// States without fragments export nothing.
    pub fn export_fragments(&self, dir: &Path, viewport: &DynamicImage) -> Result<Vec<PathBuf>> {
        match self.fragments() {
            Some(fragments) => export_fragments(fragments, dir, &self.name, viewport),
            None => {
                debug!("{} has no fragments to export", self);
                Ok(Vec::new())
            }
        }
    }
}

/// Fatal errors mean a broken input rather than an incomparable pair
fn log_failure(action: &str, first: &StateVertex, second: &StateVertex, e: &StateError) {
    if e.is_fatal() {
        error!("{} {} and {} failed: {}", action, first, second, e);
    } else {
        warn!("{} {} and {} failed: {}", action, first, second, e);
    }
}

impl fmt::Display for StateVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
