//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `core-sync`). Schedulers embedding
//! the fault-data sync pipeline can depend on `fault-sync-workspace` and enable
//! the documented features without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::{FaultSyncService, RunSummary};
#[cfg(feature = "desktop-shims")]
pub use core_sync::{SyncParams, SyncStatus, SyncTask};
