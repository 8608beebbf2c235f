//! Screenshot-based state payloads: perceptual hashes and SSIM

use crate::config::VisualConfig;
use crate::error::{Result, StateError};
use crate::state::Equivalence;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage};
use std::fmt;
use std::sync::Arc;

/// A perceptual hash family
pub trait ImageHasher: fmt::Debug + Send + Sync {
    /// Family name, used to refuse comparisons across families
    fn name(&self) -> &str;

    fn hash(&self, image: &DynamicImage) -> Result<Vec<u8>>;

    /// Family-specific dissimilarity of two hashes
    fn compare(&self, a: &[u8], b: &[u8]) -> Result<f64>;

    /// Largest raw score the family produces for near-duplicates
    fn max_raw(&self) -> f64;

    /// Score meaning "identical"
    fn perfect_match(&self) -> f64 {
        0.0
    }
}

/// Block-mean hash: 16x16 blocks of a 256x256 grayscale thumbnail, one bit per
/// block set when the block is brighter than the median block
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMeanHash;

const THUMBNAIL_SIDE: u32 = 256;
const BLOCK_SIDE: u32 = 16;
const BLOCKS_PER_SIDE: u32 = THUMBNAIL_SIDE / BLOCK_SIDE;

fn ensure_non_empty(image: &DynamicImage) -> Result<()> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(StateError::ImageMismatch("empty image".to_string()));
    }
    Ok(())
}

impl ImageHasher for BlockMeanHash {
    fn name(&self) -> &str {
        "BlockMeanHash"
    }

    fn hash(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        ensure_non_empty(image)?;
        let thumb = imageops::resize(&image.to_luma8(), THUMBNAIL_SIDE, THUMBNAIL_SIDE, FilterType::Triangle);

        let mut means = Vec::with_capacity((BLOCKS_PER_SIDE * BLOCKS_PER_SIDE) as usize);
        for by in 0..BLOCKS_PER_SIDE {
            for bx in 0..BLOCKS_PER_SIDE {
                let mut sum = 0u32;
                for y in 0..BLOCK_SIDE {
                    for x in 0..BLOCK_SIDE {
                        sum += u32::from(thumb.get_pixel(bx * BLOCK_SIDE + x, by * BLOCK_SIDE + y)[0]);
                    }
                }
                means.push(f64::from(sum) / f64::from(BLOCK_SIDE * BLOCK_SIDE));
            }
        }

        let mut sorted = means.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = (sorted[mid - 1] + sorted[mid]) / 2.0;

        let mut bits = vec![0u8; means.len() / 8];
        for (i, mean) in means.iter().enumerate() {
            if *mean > median {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(bits)
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Result<f64> {
        if a.len() != b.len() {
            return Err(StateError::ImageMismatch(format!("hash lengths {} and {} differ", a.len(), b.len())));
        }
        let differing: u32 = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
        Ok(f64::from(differing))
    }

    fn max_raw(&self) -> f64 {
        52.0
    }
}

/// Color-moment hash: mean, standard deviation and skewness of each HSV and
/// YCrCb channel of a 200x200 thumbnail, compared by Euclidean distance.
///
/// Moments ignore pixel positions, so mirrored or shuffled layouts with the
/// same palette hash alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorMomentHash;

const MOMENT_THUMBNAIL_SIDE: u32 = 200;
const MOMENT_CHANNELS: usize = 6;
const COLOR_MOMENTS: usize = MOMENT_CHANNELS * 3;

/// HSV then YCrCb of one pixel, every channel scaled to `[0, 1]`
fn color_channels(r: u8, g: u8, b: u8) -> [f64; MOMENT_CHANNELS] {
    let (r, g, b) = (f64::from(r) / 255.0, f64::from(g) / 255.0, f64::from(b) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let sector = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    let hue = sector / 6.0;
    let saturation = if max > 0.0 { delta / max } else { 0.0 };

    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cr = (r - y) * 0.713 + 0.5;
    let cb = (b - y) * 0.564 + 0.5;

    [hue, saturation, max, y, cr, cb]
}

fn decode_moments(hash: &[u8]) -> Result<Vec<f64>> {
    if hash.len() != COLOR_MOMENTS * 8 {
        return Err(StateError::ImageMismatch(format!(
            "color moment hash has {} bytes, expected {}",
            hash.len(),
            COLOR_MOMENTS * 8
        )));
    }
    Ok(hash
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

impl ImageHasher for ColorMomentHash {
    fn name(&self) -> &str {
        "ColorMomentHash"
    }

    fn hash(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        ensure_non_empty(image)?;
        let thumb = imageops::resize(&image.to_rgb8(), MOMENT_THUMBNAIL_SIDE, MOMENT_THUMBNAIL_SIDE, FilterType::Triangle);

        let mut channels = vec![Vec::with_capacity(thumb.len() / 3); MOMENT_CHANNELS];
        for pixel in thumb.pixels() {
            let [r, g, b] = pixel.0;
            for (channel, value) in channels.iter_mut().zip(color_channels(r, g, b)) {
                channel.push(value);
            }
        }

        let mut moments = Vec::with_capacity(COLOR_MOMENTS * 8);
        for values in &channels {
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let third = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
            for moment in [mean, variance.sqrt(), third.cbrt()] {
                moments.extend_from_slice(&moment.to_le_bytes());
            }
        }
        Ok(moments)
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Result<f64> {
        let (a, b) = (decode_moments(a)?, decode_moments(b)?);
        Ok(a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt())
    }

    fn max_raw(&self) -> f64 {
        0.1
    }
}

/// Perceptual hash of a screenshot plus the accepted score range
#[derive(Debug, Clone)]
pub struct HashPayload {
    hasher: Arc<dyn ImageHasher>,
    hash: Vec<u8>,
    min_threshold: f64,
    max_threshold: f64,
}

impl HashPayload {
    /// Hash `image`; near-duplicates score up to `coefficient * max_raw`
    pub fn new(hasher: Arc<dyn ImageHasher>, image: &DynamicImage, config: &VisualConfig) -> Result<Self> {
        let hash = hasher.hash(image)?;
        let max_threshold = config.hash_threshold_coefficient * hasher.max_raw();
        Ok(Self {
            hasher,
            hash,
            min_threshold: 0.0,
            max_threshold,
        })
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// Override the upper bound of the accepted range
    pub fn with_max_threshold(mut self, threshold: f64) -> Self {
        self.max_threshold = threshold;
        self
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.min_threshold, self.max_threshold)
    }

    fn score(&self, other: &Self) -> Result<f64> {
        if self.hasher.name() != other.hasher.name() {
            return Err(StateError::Incomparable {
                left: self.hasher.name().to_string(),
                right: other.hasher.name().to_string(),
                reason: "different hash families".to_string(),
            });
        }
        self.hasher.compare(&self.hash, &other.hash)
    }

    /// The narrower of the two accepted ranges
    fn range(&self, other: &Self) -> (f64, f64) {
        (
            self.min_threshold.max(other.min_threshold),
            self.max_threshold.min(other.max_threshold),
        )
    }

    /// Range check alone, without the perfect-match shortcut
    pub fn in_threshold(&self, other: &Self) -> Result<bool> {
        let score = self.score(other)?;
        let (min, max) = self.range(other);
        Ok(score >= min && score <= max)
    }
}

impl Equivalence for HashPayload {
    fn distance(&self, other: &Self) -> Result<f64> {
        self.score(other)
    }

    fn equivalent(&self, other: &Self) -> Result<bool> {
        let score = self.score(other)?;
        let (min, max) = self.range(other);
        Ok((score >= min && score <= max) || score == self.hasher.perfect_match())
    }
}

/// Structural similarity of two images, 1.0 for identical
pub trait SimilarityScorer: fmt::Debug + Send + Sync {
    fn score(&self, a: &DynamicImage, b: &DynamicImage) -> Result<f64>;
}

/// Mean SSIM over non-overlapping square windows of the luma channel
#[derive(Debug, Clone, Copy)]
pub struct WindowedSsim {
    pub window: u32,
}

impl Default for WindowedSsim {
    fn default() -> Self {
        Self { window: 8 }
    }
}

fn window_ssim(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (da, db) = (x - mean_a, y - mean_b);
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    let c1 = (0.01f64 * 255.0).powi(2);
    let c2 = (0.03f64 * 255.0).powi(2);
    let numerator = (2.0 * mean_a * mean_b + c1) * (2.0 * cov + c2);
    let denominator = (mean_a.powi(2) + mean_b.powi(2) + c1) * (var_a + var_b + c2);
    (numerator / denominator).clamp(-1.0, 1.0)
}

fn window_values(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> Vec<f64> {
    let mut values = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            values.push(f64::from(image.get_pixel(x, y)[0]));
        }
    }
    values
}

impl SimilarityScorer for WindowedSsim {
    fn score(&self, a: &DynamicImage, b: &DynamicImage) -> Result<f64> {
        ensure_non_empty(a)?;
        if a.dimensions() != b.dimensions() {
            let ((aw, ah), (bw, bh)) = (a.dimensions(), b.dimensions());
            return Err(StateError::ImageMismatch(format!("{}x{} vs {}x{}", aw, ah, bw, bh)));
        }
        let window = self.window.max(1);
        let (la, lb) = (a.to_luma8(), b.to_luma8());
        let (width, height) = la.dimensions();

        let mut total = 0.0;
        let mut windows = 0u32;
        for y0 in (0..height).step_by(window as usize) {
            for x0 in (0..width).step_by(window as usize) {
                let (x1, y1) = ((x0 + window).min(width), (y0 + window).min(height));
                total += window_ssim(&window_values(&la, x0, y0, x1, y1), &window_values(&lb, x0, y0, x1, y1));
                windows += 1;
            }
        }
        Ok(total / f64::from(windows))
    }
}

/// Screenshot compared by SSIM against a minimum score
#[derive(Debug, Clone)]
pub struct SsimPayload {
    image: DynamicImage,
    threshold: f64,
    scorer: Arc<dyn SimilarityScorer>,
}

impl SsimPayload {
    pub fn new(image: DynamicImage, config: &VisualConfig) -> Self {
        Self {
            image,
            threshold: config.ssim_threshold,
            scorer: Arc::new(WindowedSsim::default()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn similarity(&self, other: &Self) -> Result<f64> {
        self.scorer.score(&self.image, &other.image)
    }
}

impl Equivalence for SsimPayload {
    /// `1 - similarity`
    fn distance(&self, other: &Self) -> Result<f64> {
        Ok(1.0 - self.similarity(other)?)
    }

    fn equivalent(&self, other: &Self) -> Result<bool> {
        let threshold = self.threshold.max(other.threshold);
        Ok(self.similarity(other)? >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba, RgbaImage};

    fn solid(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255])))
    }

    fn split(w: u32, h: u32, left_dark: bool) -> DynamicImage {
        let mut img = GrayImage::new(w, h);
        for (x, _, px) in img.enumerate_pixels_mut() {
            let dark = (x < w / 2) == left_dark;
            *px = Luma([if dark { 0 } else { 255 }]);
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_block_mean_hash_identical() {
        let hasher = BlockMeanHash;
        let a = hasher.hash(&split(64, 64, true)).unwrap();
        let b = hasher.hash(&split(64, 64, true)).unwrap();

        assert_eq!(a.len(), 32);
        assert_eq!(hasher.compare(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_block_mean_hash_detects_change() {
        let hasher = BlockMeanHash;
        let a = hasher.hash(&split(64, 64, true)).unwrap();
        let b = hasher.hash(&split(64, 64, false)).unwrap();

        assert!(hasher.compare(&a, &b).unwrap() > hasher.max_raw());
        assert!(hasher.hash(&solid(0, 0, 0)).is_err());
        assert!(hasher.compare(&a, &a[..4]).is_err());
    }

    fn colored(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([rgb[0], rgb[1], rgb[2], 255])))
    }

    #[test]
    fn test_color_channels() {
        let red = color_channels(255, 0, 0);
        assert_eq!(&red[..3], &[0.0, 1.0, 1.0]);
        let blue = color_channels(0, 0, 255);
        assert!((blue[0] - 2.0 / 3.0).abs() < 1e-9);

        let gray = color_channels(128, 128, 128);
        assert_eq!(gray[0], 0.0);
        assert_eq!(gray[1], 0.0);
        assert!((gray[4] - 0.5).abs() < 1e-9);
        assert!((gray[5] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_color_moment_hash() {
        let hasher = ColorMomentHash;
        let red = hasher.hash(&colored(40, 30, [255, 0, 0])).unwrap();
        let blue = hasher.hash(&colored(40, 30, [0, 0, 255])).unwrap();

        assert_eq!(red.len(), COLOR_MOMENTS * 8);
        assert_eq!(hasher.compare(&red, &red).unwrap(), 0.0);
        assert!(hasher.compare(&red, &blue).unwrap() > hasher.max_raw());
        assert!(hasher.hash(&solid(0, 0, 0)).is_err());
        assert!(matches!(hasher.compare(&red, &red[..8]), Err(StateError::ImageMismatch(_))));
    }

    #[test]
    fn test_color_moment_hash_ignores_layout() {
        let hasher = ColorMomentHash;
        let a = hasher.hash(&split(64, 64, true)).unwrap();
        let b = hasher.hash(&split(64, 64, false)).unwrap();

        assert!(hasher.compare(&a, &b).unwrap() < hasher.max_raw());
        // the same pair is far apart under the block-mean hash
        let (x, y) = (BlockMeanHash.hash(&split(64, 64, true)).unwrap(), BlockMeanHash.hash(&split(64, 64, false)).unwrap());
        assert!(BlockMeanHash.compare(&x, &y).unwrap() > BlockMeanHash.max_raw());
    }

    #[test]
    fn test_hash_payload_range_and_sentinel() {
        let hasher: Arc<dyn ImageHasher> = Arc::new(BlockMeanHash);
        let strict = VisualConfig::default();
        let a = HashPayload::new(hasher.clone(), &split(64, 64, true), &strict).unwrap();
        let b = HashPayload::new(hasher.clone(), &split(64, 64, true), &strict).unwrap();
        let c = HashPayload::new(hasher, &split(64, 64, false), &strict).unwrap();

        assert!(a.equivalent(&b).unwrap());
        assert!(a.in_threshold(&b).unwrap());
        assert!(!a.equivalent(&c).unwrap());
        assert_eq!(a.distance(&b).unwrap(), 0.0);

        let empty_range = a.clone().with_max_threshold(-1.0);
        assert!(!empty_range.in_threshold(&b).unwrap());
        assert!(empty_range.equivalent(&b).unwrap());
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let scorer = WindowedSsim::default();
        let score = scorer.score(&split(20, 12, true), &split(20, 12, true)).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_dissimilar_and_mismatched() {
        let scorer = WindowedSsim::default();
        let score = scorer.score(&split(16, 16, true), &split(16, 16, false)).unwrap();
        assert!(score < 0.5);

        let err = scorer.score(&solid(10, 10, 0), &solid(10, 12, 0)).unwrap_err();
        assert!(matches!(err, StateError::ImageMismatch(_)));
    }

    #[test]
    fn test_ssim_payload() {
        let config = VisualConfig::default();
        let a = SsimPayload::new(split(16, 16, true), &config);
        let b = SsimPayload::new(split(16, 16, true), &config);
        let c = SsimPayload::new(split(16, 16, false), &config.ssim_threshold(0.2));

        assert!(a.equivalent(&b).unwrap());
        assert!(a.distance(&b).unwrap().abs() < 1e-9);
        assert!(!a.equivalent(&c).unwrap());
        assert!(!c.equivalent(&a).unwrap());
    }
}
