use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};

/// What a node label encodes in the edit-distance tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// Tag name only
    #[default]
    Structure,
    /// Tag name plus a bucketed position/size signature
    Visual,
}

/// How the hybrid strategy decides equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridPolicy {
    /// Raw edit distance against the threshold
    #[default]
    Distance,
    /// Edit distance with operations touching dynamic fragments left out
    MaskDynamic,
    /// Equal when every changed node on both sides is hidden
    ChangedNodesAllHidden,
}

/// Configuration of structural comparisons
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Maximum edit distance for two states to be equal
    pub threshold: f64,

    pub label_mode: LabelMode,

    /// Reject states whose subtree sizes differ before running the edit distance
    pub fast_compare: bool,

    pub hybrid_policy: HybridPolicy,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            label_mode: LabelMode::Structure,
            fast_compare: false,
            hybrid_policy: HybridPolicy::Distance,
        }
    }
}

impl ComparisonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set distance threshold
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Builder method: set label mode
    pub fn label_mode(mut self, mode: LabelMode) -> Self {
        self.label_mode = mode;
        self
    }

    /// Builder method: enable the size pre-check
    pub fn fast_compare(mut self, enabled: bool) -> Self {
        self.fast_compare = enabled;
        self
    }

    /// Builder method: set hybrid policy
    pub fn hybrid_policy(mut self, policy: HybridPolicy) -> Self {
        self.hybrid_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(StateError::InvalidConfig(format!("threshold must be >= 0, got {}", self.threshold)));
        }
        Ok(())
    }

    /// Load from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Minimum geometry for a fragment to be worth tracking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    pub min_width: f64,
    pub min_height: f64,
    pub min_area: f64,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            min_width: 10.0,
            min_height: 10.0,
            min_area: 500.0,
        }
    }
}

impl FragmentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set minimum width and height
    pub fn min_size(mut self, width: f64, height: f64) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    /// Builder method: set minimum area
    pub fn min_area(mut self, area: f64) -> Self {
        self.min_area = area;
        self
    }
}

/// Configuration of screenshot-based comparisons
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// SSIM score at or above which two screenshots are equal; 1.0 is a perfect match
    pub ssim_threshold: f64,

    /// Fraction of the hash family's raw maximum accepted as near-duplicate
    pub hash_threshold_coefficient: f64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            ssim_threshold: 1.0,
            hash_threshold_coefficient: 0.0,
        }
    }
}

impl VisualConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ssim_threshold(mut self, threshold: f64) -> Self {
        self.ssim_threshold = threshold;
        self
    }

    pub fn hash_threshold_coefficient(mut self, coefficient: f64) -> Self {
        self.hash_threshold_coefficient = coefficient;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_config_builder() {
        let config = ComparisonConfig::new()
            .threshold(2.5)
            .label_mode(LabelMode::Visual)
            .fast_compare(true)
            .hybrid_policy(HybridPolicy::MaskDynamic);

        assert_eq!(config.threshold, 2.5);
        assert_eq!(config.label_mode, LabelMode::Visual);
        assert!(config.fast_compare);
        assert_eq!(config.hybrid_policy, HybridPolicy::MaskDynamic);
    }

    #[test]
    fn test_fast_compare_off_by_default() {
        assert!(!ComparisonConfig::default().fast_compare);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ComparisonConfig::from_json(r#"{"threshold": 3, "hybrid_policy": "changed_nodes_all_hidden"}"#).unwrap();

        assert_eq!(config.threshold, 3.0);
        assert_eq!(config.label_mode, LabelMode::Structure);
        assert_eq!(config.hybrid_policy, HybridPolicy::ChangedNodesAllHidden);
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let err = ComparisonConfig::from_json(r#"{"threshold": -1}"#).unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));
    }

    #[test]
    fn test_fragment_config_builder() {
        let config = FragmentConfig::new().min_size(5.0, 6.0).min_area(30.0);
        assert_eq!(config.min_width, 5.0);
        assert_eq!(config.min_height, 6.0);
        assert_eq!(config.min_area, 30.0);
    }
}
