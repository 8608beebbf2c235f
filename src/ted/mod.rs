//! Ordered tree edit distance over document snapshots
//!
//! - extract: post-order labeled tree of a document (`select` cut to its first option)
//! - engine: unit-cost edit distance and a deterministic witnessing alignment
//! - diff: classification of the alignment into changed nodes per document

pub mod diff;
pub mod engine;
pub mod extract;

pub use diff::{ChangedNodes, TreeComparison, edit_distance};
pub use engine::{Alignment, EditOp, TreeEditDistance};
pub use extract::{ExtractedTree, LabeledTreeNode, NodeLabeler, TagLabeler, VisualLabeler, extract};
