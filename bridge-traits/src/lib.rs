//! # Host Bridge Traits
//!
//! Contracts between the sync pipeline and the systems it does not own.
//!
//! ## Overview
//!
//! The pipeline talks to three external collaborators: the upstream fault
//! record source, the message broker that decouples producers from consumers,
//! and the wall clock. Each is a trait here so that hosts can plug in
//! production adapters (see `bridge-desktop`) while tests inject fakes.
//!
//! ## Traits
//!
//! ### Upstream
//! - [`FaultSource`](source::FaultSource) - Cursor-paged pull of one domain and date
//!
//! ### Messaging
//! - [`MessageBroker`](broker::MessageBroker) - Ordered, at-least-once publish and subscribe
//! - [`MessageHandler`](broker::MessageHandler) - Consumer callback; a [`HandlerError`](broker::HandlerError) requests redelivery
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! should keep transport failures (`Transport`, `Timeout`) distinct from
//! contract violations (`InvalidResponse`), because callers treat them
//! differently from a legitimate empty result.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! worker pool and the broker's dispatch tasks.

pub mod broker;
pub mod error;
pub mod source;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use broker::{
    dead_letter_topic, is_dead_letter_topic, Delivery, HandlerError, MessageBroker,
    MessageHandler, MessageId, OutboundMessage, PublishReceipt, Subscription, DEAD_LETTER_PREFIX,
};
pub use source::{FaultRecord, FaultSource, PageRequest};
pub use time::{Clock, FixedClock, LogLevel, SystemClock};
