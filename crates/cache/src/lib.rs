#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;

pub use client::RedisFrequencyStore;
pub use local::LocalFrequencyStore;
