//! Publishing of package archives.
//!
//! Accepted uploads are copied into each archive's pool, the APT indexes of
//! changed suites are regenerated, and signed Release manifests are
//! written. See [`orchestrator::DistributionPublisher`] for the entry point.

pub mod cache;
pub mod config;
pub mod distscopy;
pub mod error;
pub mod indexes;
pub mod layout;
pub mod librarian;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod pool;
pub mod process;
pub mod publisher;
pub mod release;
pub mod signing;
pub mod store;

pub use error::{ErrorKind, PublishError, PublishResult};
