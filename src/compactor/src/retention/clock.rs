//! Trim height computation and height sources.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::store::StoreError;
use crate::table::Height;

/// Computes the boundary below which non-current history may be trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionClock {
    retention_depth: Height,
}

impl RetentionClock {
    /// `retention_depth` is clamped to zero.
    pub fn new(retention_depth: Height) -> Self {
        Self {
            retention_depth: retention_depth.max(0),
        }
    }

    pub fn retention_depth(&self) -> Height {
        self.retention_depth
    }

    /// `max(0, current_height - retention_depth)`
    pub fn trim_height(&self, current_height: Height) -> Height {
        current_height.saturating_sub(self.retention_depth).max(0)
    }
}

/// Source of the current chain height and the rollback depth.
#[async_trait]
pub trait HeightSource: Send + Sync {
    async fn current_height(&self) -> Result<Height, StoreError>;

    fn retention_depth(&self) -> Height;
}

/// Height source driven by the caller, e.g. the block processor.
#[derive(Debug, Default)]
pub struct FixedHeightSource {
    height: AtomicI64,
    retention_depth: Height,
}

impl FixedHeightSource {
    pub fn new(height: Height, retention_depth: Height) -> Self {
        Self {
            height: AtomicI64::new(height),
            retention_depth,
        }
    }

    pub fn set_height(&self, height: Height) {
        self.height.store(height, Ordering::SeqCst);
    }
}

#[async_trait]
impl HeightSource for FixedHeightSource {
    async fn current_height(&self) -> Result<Height, StoreError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    fn retention_depth(&self) -> Height {
        self.retention_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_height() {
        let clock = RetentionClock::new(800);
        assert_eq!(clock.trim_height(1000), 200);
        assert_eq!(clock.trim_height(800), 0);
        assert_eq!(clock.trim_height(10), 0);
        assert_eq!(clock.trim_height(Height::MIN), 0);
    }

    #[test]
    fn test_zero_depth_trims_up_to_current_height() {
        let clock = RetentionClock::new(0);
        assert_eq!(clock.trim_height(42), 42);
    }

    #[test]
    fn test_negative_depth_is_clamped() {
        let clock = RetentionClock::new(-5);
        assert_eq!(clock.retention_depth(), 0);
        assert_eq!(clock.trim_height(7), 7);
    }

    #[tokio::test]
    async fn test_fixed_height_source() {
        let source = FixedHeightSource::new(10, 3);
        assert_eq!(source.current_height().await.unwrap(), 10);
        source.set_height(25);
        assert_eq!(source.current_height().await.unwrap(), 25);
        assert_eq!(source.retention_depth(), 3);
    }
}
