//! Per-path coordination
//!
//! Every store path opened in the process has one `Coordinator`, found
//! through a `CoordinatorRegistry`. The coordinator:
//!
//! - fixes the path's configuration on first open and rejects later
//!   openers that disagree
//! - caches one live handle per thread
//! - owns the commit notifier and runs the async query update cycle

mod cached_handle;
#[allow(clippy::module_inception)]
mod coordinator;
mod config;
mod errors;
mod registry;

pub use config::{ConfigField, StoreConfig, NOT_VERSIONED};
pub use coordinator::Coordinator;
pub use errors::{CoordinatorError, CoordinatorResult};
pub use registry::CoordinatorRegistry;
