//! Store handles
//!
//! A `StoreHandle` is what a thread holds to read, write and receive async
//! query results for one store path. Handles are obtained from the path's
//! coordinator, which may hand the same thread its cached handle again.

mod results;
mod store_handle;

pub use results::Results;
pub use store_handle::{HandleId, StoreHandle, WriteTransaction};
