//! Frequency capping: bounded per-(user, rule) delivery counters over fixed
//! calendar periods.

pub mod limiter;
pub mod window;

pub use limiter::{FrequencyLimiter, LimiterSettings};
pub use window::PeriodBucket;
