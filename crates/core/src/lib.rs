pub mod catalog;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod profile;
pub mod store;
pub mod types;

pub use catalog::RuleCatalog;
pub use config::AppConfig;
pub use error::{EngageError, EngageResult};
