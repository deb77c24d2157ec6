//! Coordination core for disaster relief: incident reports, resource stock
//! and the requests that connect them, persisted in SQLite.

pub mod error;
pub mod geo;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod priority;
pub mod requests;
pub mod store;

pub use error::{ReliefError, Result};
pub use store::Store;
