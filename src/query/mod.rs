//! Async queries
//!
//! An `AsyncQuery` is created from a store handle with a query and a sort
//! order. The coordinator's update cycle recomputes it on a background
//! session and hands the results to every observer as a version-stamped
//! capsule. Observers collect them on their own thread as
//! `DeliveryAction`s.
//!
//! ```ignore
//! let query = handle.async_query(Query::table("dogs"), SortOrder::new().by(0, true))?;
//! let _token = query.observe(
//!     CallbackObserver::new(|results| println!("{} dogs", results.len()), |err| eprintln!("{err}"))
//!         .into_arc(),
//! );
//! // later, on the same thread
//! handle.deliver_ready();
//! ```

mod async_query;
mod errors;
mod observer;

pub use async_query::{AsyncQuery, DeliveryAction, DeliveryKind};
pub use errors::{QueryError, QueryResult};
pub use observer::{CallbackObserver, ObserverToken, QueryObserver};
