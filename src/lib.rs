//! Roster aggregation core for academic proctors: student records, status
//! classification, role-gated roster queries and the dashboard activity feed.

pub mod error;
pub mod feed;
pub mod models;
pub mod query;
pub mod report;
pub mod risk;
pub mod session;
pub mod store;

pub use error::{ErrorKind, RosterError, RosterResult};
