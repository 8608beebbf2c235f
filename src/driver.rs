//! Capabilities consumed from the browser driver and the page segmentation pass.
//!
//! The core never talks to a browser directly. Everything it needs goes through
//! [`Driver`] (document capture, screenshots, geometry) and [`Segmenter`]
//! (visual rectangles), so states can be built from a live session or from
//! stored snapshots alike.

use crate::dom::{BoundingBox, DocumentTree, NodeId};
use crate::error::{Result, StateError};
use crate::fragment::Rectangle;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How an element is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum How {
    Xpath,
    Id,
    Tag,
    Name,
    Text,
}

/// A way to find one element on a page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identification {
    pub how: How,
    pub value: String,
}

impl Identification {
    pub fn new(how: How, value: impl Into<String>) -> Self {
        Self { how, value: value.into() }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(How::Xpath, value)
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(How::Id, value)
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self::new(How::Tag, value)
    }

    /// Locate the element in a captured document
    pub fn resolve(&self, tree: &DocumentTree) -> Option<NodeId> {
        match self.how {
            How::Xpath => tree.resolve_xpath(&self.value).ok(),
            How::Id => tree.find_by_attribute("id", &self.value),
            How::Name => tree.find_by_attribute("name", &self.value),
            How::Tag => tree.find_by_tag(&self.value),
            How::Text => tree
                .descendants(tree.root())
                .into_iter()
                .find(|n| {
                    tree.node(*n).text.as_deref().is_some_and(|t| t.trim() == self.value.trim())
                })
                .and_then(|text| tree.parent(text)),
        }
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.how, self.value)
    }
}

/// Browser capability used by state factories and fragment re-anchoring
pub trait Driver {
    /// Capture the current page as a document tree
    fn get_document(&self) -> Result<DocumentTree>;

    /// Whether an element matching `identification` is present
    fn element_exists(&self, identification: &Identification) -> bool;

    /// Capture the viewport
    fn take_screenshot(&self, timeout: Duration) -> Result<DynamicImage>;

    /// Measure the current on-page rectangle of `node`. May be slow.
    fn measure_element_rect(&self, tree: &DocumentTree, node: NodeId) -> Result<BoundingBox>;
}

/// Vision-based page segmentation
pub trait Segmenter {
    fn segment(&self, image: &DynamicImage, tree: &DocumentTree) -> Result<Vec<Rectangle>>;
}

/// Segmentation that was computed elsewhere and stored with the snapshot
#[derive(Debug, Clone, Default)]
pub struct PrecomputedSegmentation {
    rectangles: Vec<Rectangle>,
}

impl PrecomputedSegmentation {
    pub fn new(rectangles: Vec<Rectangle>) -> Self {
        Self { rectangles }
    }
}

impl Segmenter for PrecomputedSegmentation {
    fn segment(&self, _image: &DynamicImage, _tree: &DocumentTree) -> Result<Vec<Rectangle>> {
        Ok(self.rectangles.clone())
    }
}

/// Driver over a stored snapshot: answers from the captured document and
/// screenshot instead of a live browser
#[derive(Debug, Clone)]
pub struct SnapshotDriver {
    document: DocumentTree,
    screenshot: Option<DynamicImage>,
}

impl SnapshotDriver {
    pub fn new(document: DocumentTree) -> Self {
        Self { document, screenshot: None }
    }

    pub fn with_screenshot(mut self, screenshot: DynamicImage) -> Self {
        self.screenshot = Some(screenshot);
        self
    }
}

impl Driver for SnapshotDriver {
    fn get_document(&self) -> Result<DocumentTree> {
        Ok(self.document.clone())
    }

    fn element_exists(&self, identification: &Identification) -> bool {
        identification.resolve(&self.document).is_some()
    }

    fn take_screenshot(&self, _timeout: Duration) -> Result<DynamicImage> {
        self.screenshot
            .clone()
            .ok_or_else(|| StateError::DriverFailed("snapshot has no screenshot".to_string()))
    }

    fn measure_element_rect(&self, tree: &DocumentTree, node: NodeId) -> Result<BoundingBox> {
        tree.get(node)
            .and_then(|n| n.bounding_box)
            .ok_or_else(|| StateError::DriverFailed(format!("no recorded geometry for {}", tree.xpath(node))))
    }
}

/// Wait condition satisfied once an element is present on the page
#[derive(Debug, Clone)]
pub struct ExpectedElementCondition {
    identification: Identification,
}

impl ExpectedElementCondition {
    pub fn new(identification: Identification) -> Self {
        Self { identification }
    }

    pub fn is_satisfied(&self, driver: &dyn Driver) -> bool {
        driver.element_exists(&self.identification)
    }
}

impl fmt::Display for ExpectedElementCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExpectedElementCondition: {}", self.identification)
    }
}
