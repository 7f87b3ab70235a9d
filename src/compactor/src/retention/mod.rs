//! Retention policy for multi-version tables.
//!
//! ## Architecture
//!
//! - `clock`: trim height from the current height and the rollback depth
//! - `config`: validated trim settings
//! - `scheduler`: per-table trim frequency throttling
//! - `metrics`: counters for trim runs
//!
//! ## Usage
//!
//! ```
//! use compactor::retention::RetentionClock;
//!
//! let clock = RetentionClock::new(800);
//! assert_eq!(clock.trim_height(1_000), 200);
//! ```

pub mod clock;
pub mod config;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use clock::{FixedHeightSource, HeightSource, RetentionClock};
pub use config::{TrimConfigError, TrimSettings};
pub use metrics::{MetricsSummary, TrimMetrics};
pub use scheduler::TrimScheduler;
