//! Delivery log and performance reporting.

pub mod aggregator;
pub mod recorder;
pub mod store;

pub use aggregator::{AnalyticsAggregator, AnalyticsReport, AnalyticsWindow};
pub use recorder::DeliveryRecorder;
pub use store::InMemoryDeliveryStore;
