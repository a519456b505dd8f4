//! Guard defaults: raw behavioural records and their per-date aggregation.

mod aggregate;
mod models;

pub use aggregate::*;
pub use models::*;
