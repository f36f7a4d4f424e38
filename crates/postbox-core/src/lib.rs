//! Transactional message store with reactive views and time-based
//! background managers.

pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod managers;
pub mod models;
pub mod runtime;
pub mod seed;
pub mod stats;
pub mod store;
pub mod tracing_setup;

pub use config::CoreConfig;
pub use error::{ConfigError, PostboxError, StorageError};
pub use runtime::CoreRuntime;
pub use seed::{SeedConfiguration, SeedConfigurationBuilder};
pub use store::{Postbox, PostboxView, Transaction, ViewKey, ViewSubscription, ViewUpdate};
