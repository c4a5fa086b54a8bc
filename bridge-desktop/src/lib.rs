//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for hosts running the sync
//! pipeline as a regular process.
//!
//! ## Overview
//!
//! - [`HttpFaultSource`] pulls fault pages from an upstream HTTP service using `reqwest`
//! - [`SyntheticFaultSource`] generates deterministic records for demos and rehearsals
//! - [`InMemoryBroker`] provides ordered, at-least-once delivery with a dead-letter
//!   route inside a single process
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{InMemoryBroker, SyntheticFaultSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(SyntheticFaultSource::new(12_000));
//!     let broker = Arc::new(InMemoryBroker::new());
//!
//!     // Hand both to the sync service
//! }
//! ```

mod broker;
mod http;
mod synthetic;

pub use broker::{
    BrokerSettings, InMemoryBroker, DEFAULT_DEFER_INTERVAL, DEFAULT_MAX_DEFERRALS, DEFAULT_PARTITIONS,
};
pub use http::HttpFaultSource;
pub use synthetic::SyntheticFaultSource;
