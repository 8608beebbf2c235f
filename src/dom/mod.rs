//! Document snapshots and their tree representation
//!
//! This module provides the structures every comparison runs on:
//! - ElementNode: serializable snapshot of a DOM element as captured by the driver
//! - DocumentTree: immutable arena of nodes with parent links, used by all passes
//! - CandidateSet: the interactive elements of a state

pub mod candidates;
pub mod element;
pub mod tree;

pub use candidates::{CandidateElement, CandidateSet};
pub use element::{BoundingBox, ElementNode, TEXT_TAG};
pub use tree::{DocumentTree, Node, NodeId};
