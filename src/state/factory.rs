//! Building states from a driver, one factory per comparison variant

use crate::config::{ComparisonConfig, FragmentConfig, VisualConfig};
use crate::dom::{CandidateSet, DocumentTree};
use crate::driver::{Driver, Segmenter};
use crate::error::Result;
use crate::fragment::{FragmentBuilder, FragmentTree, MinSizePolicy, Rectangle};
use crate::state::{BlockMeanHash, ColorMomentHash, HashPayload, HybridPayload, ImageHasher, SsimPayload, StatePayload, StateVertex, TreeEditPayload};
use image::DynamicImage;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates states of one variant from the page the driver is on
pub trait StateFactory {
    fn new_state(&self, id: usize, name: &str, url: Option<&str>, driver: &dyn Driver) -> Result<StateVertex>;
}

/// The captured document, its cleaned form and their JSON strings
struct Capture {
    dom: String,
    stripped_dom: String,
    cleaned: DocumentTree,
}

fn capture(driver: &dyn Driver) -> Result<Capture> {
    let raw = driver.get_document()?;
    let cleaned = DocumentTree::from_element_cleaned(&raw.to_element(raw.root()));
    Ok(Capture {
        dom: raw.to_json()?,
        stripped_dom: cleaned.to_json()?,
        cleaned,
    })
}

fn assemble(id: usize, name: &str, url: Option<&str>, capture: Capture, payload: StatePayload) -> StateVertex {
    let candidates = CandidateSet::discover(&capture.cleaned);
    let mut state = StateVertex::new(id, name, payload).with_dom(capture.dom, capture.stripped_dom);
    if let Some(url) = url {
        state = state.with_url(url);
    }
    debug!("Created {} state {} with {} candidates", state.payload().kind(), state, candidates.len());
    state.with_candidates(candidates)
}

/// States compared by plain tree edit distance
#[derive(Debug, Clone, Default)]
pub struct TreeEditStateFactory {
    config: ComparisonConfig,
}

impl TreeEditStateFactory {
    pub fn new(config: ComparisonConfig) -> Self {
        Self { config }
    }
}

impl StateFactory for TreeEditStateFactory {
    fn new_state(&self, id: usize, name: &str, url: Option<&str>, driver: &dyn Driver) -> Result<StateVertex> {
        let capture = capture(driver)?;
        let payload = StatePayload::TreeEdit(TreeEditPayload::new(capture.cleaned.clone(), self.config));
        Ok(assemble(id, name, url, capture, payload))
    }
}

/// Build a fragmented hybrid payload from a stored document, screenshot and
/// segmentation. Geometry comes from the snapshot's recorded bounding boxes.
pub fn offline_hybrid_payload(
    tree: DocumentTree,
    screenshot: Option<DynamicImage>,
    rectangles: &[Rectangle],
    config: ComparisonConfig,
    fragment_config: FragmentConfig,
) -> HybridPayload {
    let policy = MinSizePolicy::new(fragment_config);
    let fragments = FragmentBuilder::new(&tree, &policy).build(rectangles);
    let payload = HybridPayload::new(tree, config).with_fragments(fragments);
    match screenshot {
        Some(screenshot) => payload.with_screenshot(screenshot),
        None => payload,
    }
}

/// States compared structurally, fragmented from the page segmentation
pub struct HybridStateFactory {
    config: ComparisonConfig,
    fragment_config: FragmentConfig,
    segmenter: Arc<dyn Segmenter + Send + Sync>,
}

impl HybridStateFactory {
    pub fn new(config: ComparisonConfig, segmenter: Arc<dyn Segmenter + Send + Sync>) -> Self {
        Self {
            config,
            fragment_config: FragmentConfig::default(),
            segmenter,
        }
    }

    pub fn with_fragment_config(mut self, fragment_config: FragmentConfig) -> Self {
        self.fragment_config = fragment_config;
        self
    }

    fn fragments(&self, id: usize, tree: &DocumentTree, screenshot: &DynamicImage, driver: &dyn Driver) -> Option<FragmentTree> {
        let rectangles = match self.segmenter.segment(screenshot, tree) {
            Ok(rectangles) => rectangles,
            Err(e) => {
                error!("Segmentation of state {} failed, continuing without fragments: {}", id, e);
                return None;
            }
        };
        let policy = MinSizePolicy::new(self.fragment_config);
        FragmentBuilder::new(tree, &policy)
            .with_driver(driver)
            .with_state_id(id)
            .build(&rectangles)
    }
}

impl StateFactory for HybridStateFactory {
    fn new_state(&self, id: usize, name: &str, url: Option<&str>, driver: &dyn Driver) -> Result<StateVertex> {
        let capture = capture(driver)?;
        let tree = capture.cleaned.clone();

        let payload = match driver.take_screenshot(SCREENSHOT_TIMEOUT) {
            Ok(screenshot) => {
                let fragments = self.fragments(id, &tree, &screenshot, driver);
                if let Some(fragments) = &fragments {
                    info!("State {} has {} fragments", id, fragments.len());
                }
                HybridPayload::new(tree, self.config)
                    .with_fragments(fragments)
                    .with_screenshot(screenshot)
            }
            Err(e) => {
                error!("No screenshot for state {}, continuing without fragments: {}", id, e);
                HybridPayload::new(tree, self.config)
            }
        };
        Ok(assemble(id, name, url, capture, StatePayload::Hybrid(payload)))
    }
}

/// States compared by a perceptual hash of their screenshot
#[derive(Debug, Clone)]
pub struct HashStateFactory {
    hasher: Arc<dyn ImageHasher>,
    config: VisualConfig,
}

impl Default for HashStateFactory {
    fn default() -> Self {
        Self::new(Arc::new(BlockMeanHash), VisualConfig::default())
    }
}

impl HashStateFactory {
    pub fn new(hasher: Arc<dyn ImageHasher>, config: VisualConfig) -> Self {
        Self { hasher, config }
    }

    /// States hashed by the color moments of their screenshot
    pub fn color_moment(config: VisualConfig) -> Self {
        Self::new(Arc::new(ColorMomentHash), config)
    }
}

impl StateFactory for HashStateFactory {
    fn new_state(&self, id: usize, name: &str, url: Option<&str>, driver: &dyn Driver) -> Result<StateVertex> {
        let capture = capture(driver)?;
        let screenshot = driver.take_screenshot(SCREENSHOT_TIMEOUT)?;
        let payload = HashPayload::new(self.hasher.clone(), &screenshot, &self.config)?;
        Ok(assemble(id, name, url, capture, StatePayload::PerceptualHash(payload)))
    }
}

/// States compared by SSIM of their screenshot
#[derive(Debug, Clone, Default)]
pub struct SsimStateFactory {
    config: VisualConfig,
}

impl SsimStateFactory {
    pub fn new(config: VisualConfig) -> Self {
        Self { config }
    }
}

impl StateFactory for SsimStateFactory {
    fn new_state(&self, id: usize, name: &str, url: Option<&str>, driver: &dyn Driver) -> Result<StateVertex> {
        let capture = capture(driver)?;
        let screenshot = driver.take_screenshot(SCREENSHOT_TIMEOUT)?;
        let payload = SsimPayload::new(screenshot, &self.config);
        Ok(assemble(id, name, url, capture, StatePayload::Ssim(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{BoundingBox, ElementNode};
    use crate::driver::{PrecomputedSegmentation, SnapshotDriver};
    use crate::error::StateError;
    use image::{Rgba, RgbaImage};

    fn snapshot() -> DocumentTree {
        DocumentTree::from_element(
            &ElementNode::new("body")
                .with_bounding_box(0.0, 0.0, 200.0, 200.0)
                .with_child(ElementNode::new("script").with_text("track()"))
                .with_child(
                    ElementNode::new("nav")
                        .with_bounding_box(0.0, 0.0, 200.0, 50.0)
                        .with_child(ElementNode::new("a").with_text("Home").with_bounding_box(0.0, 0.0, 50.0, 20.0))
                        .with_child(ElementNode::new("a").with_text("Blog").with_bounding_box(60.0, 0.0, 50.0, 20.0)),
                )
                .with_child(ElementNode::new("button").with_text("Buy").with_bounding_box(0.0, 100.0, 80.0, 30.0)),
        )
    }

    fn screenshot() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 200, Rgba([250, 250, 250, 255])))
    }

    struct FailingSegmenter;

    impl Segmenter for FailingSegmenter {
        fn segment(&self, _image: &DynamicImage, _tree: &DocumentTree) -> Result<Vec<Rectangle>> {
            Err(StateError::SegmentationFailed("model unavailable".to_string()))
        }
    }

    #[test]
    fn test_tree_edit_factory_cleans_snapshot() {
        let driver = SnapshotDriver::new(snapshot());
        let state = TreeEditStateFactory::default()
            .new_state(1, "index", Some("http://localhost/"), &driver)
            .unwrap();

        assert_eq!(state.url(), Some("http://localhost/"));
        assert!(state.dom().contains("script"));
        assert!(!state.stripped_dom().contains("script"));
        assert!(state.document().unwrap().find_by_tag("script").is_none());
        assert_eq!(state.candidates().len(), 3);
    }

    #[test]
    fn test_hybrid_factory_builds_fragments() {
        let raw = snapshot();
        let cleaned = DocumentTree::from_element_cleaned(&raw.to_element(raw.root()));
        let nav = cleaned.find_by_tag("nav").unwrap();
        let button = cleaned.find_by_tag("button").unwrap();
        let segmentation = PrecomputedSegmentation::new(vec![
            Rectangle::new(0, None, BoundingBox::new(0.0, 0.0, 200.0, 200.0)).with_blocks(vec![nav, button]),
            Rectangle::new(1, Some(0), BoundingBox::new(0.0, 0.0, 200.0, 50.0)).with_blocks(vec![nav]),
        ]);
        let factory = HybridStateFactory::new(ComparisonConfig::default(), Arc::new(segmentation));
        let driver = SnapshotDriver::new(snapshot()).with_screenshot(screenshot());

        let state = factory.new_state(4, "state4", None, &driver).unwrap();

        let fragments = state.fragments().unwrap();
        assert_eq!(fragments.root(), crate::fragment::FragmentId(0));
        assert!(state.screenshot().is_some());
        // every candidate is attributed to the root
        assert_eq!(state.root_fragment().unwrap().candidates().len(), 3);
    }

    #[test]
    fn test_hybrid_factory_survives_segmentation_failure() {
        let factory = HybridStateFactory::new(ComparisonConfig::default(), Arc::new(FailingSegmenter));
        let driver = SnapshotDriver::new(snapshot()).with_screenshot(screenshot());

        let state = factory.new_state(1, "state1", None, &driver).unwrap();
        assert!(state.fragments().is_none());
        assert!(state.document().is_some());

        let without_screenshot = factory.new_state(2, "state2", None, &SnapshotDriver::new(snapshot())).unwrap();
        assert!(without_screenshot.fragments().is_none());
        assert!(state.equals(&without_screenshot));
    }

    #[test]
    fn test_visual_factories_need_a_screenshot() {
        let driver = SnapshotDriver::new(snapshot());
        assert!(HashStateFactory::default().new_state(1, "s", None, &driver).is_err());
        assert!(SsimStateFactory::default().new_state(1, "s", None, &driver).is_err());

        let driver = driver.with_screenshot(screenshot());
        let a = HashStateFactory::default().new_state(1, "a", None, &driver).unwrap();
        let b = HashStateFactory::default().new_state(2, "b", None, &driver).unwrap();
        assert!(a.equals(&b));

        let c = SsimStateFactory::default().new_state(3, "c", None, &driver).unwrap();
        let d = SsimStateFactory::default().new_state(4, "d", None, &driver).unwrap();
        assert_eq!(c.distance(&d), 0.0);
        assert!(!a.equals(&c));
        assert_eq!(c.candidates().len(), 3);
    }

    #[test]
    fn test_color_moment_factory() {
        let factory = HashStateFactory::color_moment(VisualConfig::default());

        let driver = SnapshotDriver::new(snapshot()).with_screenshot(screenshot());
        let a = factory.new_state(1, "a", None, &driver).unwrap();
        let b = factory.new_state(2, "b", None, &driver).unwrap();
        assert!(a.equals(&b));
        assert_eq!(a.distance(&b), 0.0);

        // hashes of different families never compare
        let block_mean = HashStateFactory::default().new_state(3, "c", None, &driver).unwrap();
        assert!(!a.equals(&block_mean));
        assert_eq!(a.distance(&block_mean), crate::state::INCOMPARABLE_DISTANCE);
    }

    #[test]
    fn test_offline_hybrid_payload() {
        let tree = snapshot();
        let root = Rectangle::new(0, None, BoundingBox::new(0.0, 0.0, 200.0, 200.0))
            .with_blocks(vec![tree.find_by_tag("nav").unwrap()]);
        let payload = offline_hybrid_payload(tree, None, &[root], ComparisonConfig::default(), FragmentConfig::default());

        assert_eq!(payload.fragments().unwrap().len(), 1);
        assert!(payload.screenshot().is_none());
    }
}
