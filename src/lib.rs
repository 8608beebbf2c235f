//! # crawl-state
//!
//! State-equivalence core for web crawlers. Given two observed browser states
//! it decides whether they are the same page, and it splits a page into
//! fragments so a crawler can tell *where* a page changed.
//!
//! ## Features
//!
//! - **Tree edit distance**: ordered, unit-cost edit distance between two
//!   document snapshots, with a witnessing node alignment
//! - **DOM diffing**: changed, inserted and removed nodes, with hidden-node filters
//! - **Fragments**: visual segmentation reconciled with the DOM into a dual
//!   (visual / DOM) fragment hierarchy
//! - **Equivalence strategies**: structural, perceptual hash, SSIM and a hybrid
//!   that masks fragments known to be dynamic
//!
//! ## Comparing two snapshots
//!
//! ```rust
//! use crawl_state::config::ComparisonConfig;
//! use crawl_state::dom::{DocumentTree, ElementNode};
//! use crawl_state::state::{StatePayload, StateVertex, TreeEditPayload};
//!
//! let page = |text: &str| {
//!     DocumentTree::from_element(&ElementNode::new("div").with_child(ElementNode::new("span").with_text(text)))
//! };
//! let config = ComparisonConfig::new().threshold(1.0);
//! let a = StateVertex::new(1, "index", StatePayload::TreeEdit(TreeEditPayload::new(page("x"), config)));
//! let b = StateVertex::new(2, "index-again", StatePayload::TreeEdit(TreeEditPayload::new(page("y"), config)));
//!
//! assert_eq!(a.distance(&b), 1.0);
//! assert!(a.equals(&b));
//! ```
//!
//! ## Live browser
//!
//! With the `chrome` feature, [`browser::BrowserSession`] implements
//! [`driver::Driver`] on top of headless Chrome, and the state factories build
//! states straight from the open page:
//!
//! ```rust,no_run
//! # #[cfg(feature = "chrome")]
//! # fn main() -> crawl_state::Result<()> {
//! use crawl_state::browser::{BrowserSession, LaunchOptions};
//! use crawl_state::state::{StateFactory, TreeEditStateFactory};
//!
//! let session = BrowserSession::launch(LaunchOptions::default())?;
//! session.navigate("https://example.com")?;
//!
//! let factory = TreeEditStateFactory::default();
//! let state = factory.new_state(0, "index", Some("https://example.com"), &session)?;
//! println!("{} candidates", state.candidates().len());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "chrome"))]
//! # fn main() {}
//! ```

#[cfg(feature = "chrome")]
pub mod browser;
pub mod config;
pub mod dom;
pub mod driver;
pub mod error;
pub mod fragment;
pub mod state;
pub mod ted;

#[cfg(feature = "chrome")]
pub use browser::{BrowserSession, ConnectionOptions, LaunchOptions};
pub use config::{ComparisonConfig, FragmentConfig, HybridPolicy, LabelMode, VisualConfig};
pub use dom::{BoundingBox, CandidateElement, CandidateSet, DocumentTree, ElementNode, NodeId};
pub use driver::{Driver, ExpectedElementCondition, Identification, Segmenter};
pub use error::{Result, StateError};
pub use fragment::{Fragment, FragmentBuilder, FragmentId, FragmentTree, Rectangle};
pub use state::{Equivalence, StateFactory, StatePayload, StateVertex};
pub use ted::{TreeComparison, edit_distance};
