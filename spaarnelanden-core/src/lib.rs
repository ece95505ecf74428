//! Core types and refresh machinery for the Spaarnelanden container sensors.

/// Refresh cache with a time-to-live in front of the page fetch.
pub mod cache;
/// Tracker configuration.
pub mod config;
/// Refresh scheduling and fan-out to consumers.
pub mod coordinator;
/// Extraction of the container model from the map page.
pub mod extract;
/// Domain models and identifiers.
pub mod model;
/// Traits describing the fetcher and consumer seams.
pub mod ports;
/// Per-container views.
pub mod view;

#[cfg(test)]
mod testing;

pub use cache::*;
pub use config::*;
pub use coordinator::*;
pub use extract::*;
pub use model::*;
pub use ports::*;
pub use view::*;
