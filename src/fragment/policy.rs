use crate::config::FragmentConfig;
use crate::dom::BoundingBox;

/// Decides whether a region is large enough to be tracked as a fragment
pub trait UsefulnessPolicy {
    fn is_useful(&self, rect: &BoundingBox) -> bool;
}

/// Minimum width, height and area
#[derive(Debug, Clone, Copy, Default)]
pub struct MinSizePolicy {
    config: FragmentConfig,
}

impl MinSizePolicy {
    pub fn new(config: FragmentConfig) -> Self {
        Self { config }
    }
}

impl UsefulnessPolicy for MinSizePolicy {
    fn is_useful(&self, rect: &BoundingBox) -> bool {
        rect.width >= self.config.min_width && rect.height >= self.config.min_height && rect.area() >= self.config.min_area
    }
}

impl<F> UsefulnessPolicy for F
where
    F: Fn(&BoundingBox) -> bool,
{
    fn is_useful(&self, rect: &BoundingBox) -> bool {
        self(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_size_policy() {
        let policy = MinSizePolicy::default();

        assert!(policy.is_useful(&BoundingBox::new(0.0, 0.0, 100.0, 50.0)));
        assert!(!policy.is_useful(&BoundingBox::new(0.0, 0.0, 5.0, 500.0)));
        assert!(!policy.is_useful(&BoundingBox::new(0.0, 0.0, 20.0, 20.0)));
        assert!(!policy.is_useful(&BoundingBox::default()));
    }

    #[test]
    fn test_closure_policy() {
        let everything = |_: &BoundingBox| true;
        assert!(everything.is_useful(&BoundingBox::default()));
    }
}
