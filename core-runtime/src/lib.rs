//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the fault sync pipeline:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus of sync lifecycle events
//!
//! ## Overview
//!
//! This crate contains the ambient utilities that the pipeline crates depend
//! on. It establishes the configuration knobs, logging conventions, and event
//! broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{FaultSyncConfig, FaultSyncConfigBuilder};
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent};
