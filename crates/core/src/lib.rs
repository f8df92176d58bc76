//! Domain types and rules for the team directory, the absence ledger and the
//! initiative tracker.
//!
//! Everything here is pure: storage and HTTP live in the `boss-storage` and
//! `boss-app` crates, which call into these functions inside their
//! transactions.

pub mod directory;
pub mod error;
pub mod progress;
pub mod quarter;
pub mod schedule;
pub mod tracker;
pub mod types;
pub mod vacation;

pub use error::ValidationError;
