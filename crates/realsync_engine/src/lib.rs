//! # realsync engine
//!
//! Keeps local entity collections in sync with a change-notification backend.
//!
//! This crate provides:
//! - The sync orchestrator (`SyncOrchestrator`)
//! - Options with exponential reconnect backoff (`SyncOptions`)
//! - The path to topic mapping (`SyncConfig`)
//! - Event application against sync targets (`apply_event`)
//!
//! ## Architecture
//!
//! The orchestrator drives any [`Adapter`](realsync_core::Adapter):
//! 1. Connect and register the connectivity listener
//! 2. Subscribe every configured topic, applying delivered events to the
//!    collection registered under the same path
//! 3. On connection loss, reconnect after `reconnect_delay * 2^min(n, 5)`
//!
//! ## Key Invariants
//!
//! - At most one reconnect timer is armed at a time
//! - At most one live subscription per path
//! - A manual disconnect cancels pending reconnects and silences every callback
//! - Inserts and updates replace the stored entity; deletes remove by id

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod binding;
mod config;
mod orchestrator;
mod registry;

pub use binding::{apply_event, Applied};
pub use config::{SyncConfig, SyncOptions, MAX_BACKOFF_EXPONENT};
pub use orchestrator::{SyncOrchestrator, SyncStats};

pub use realsync_core::{
    Adapter, CleanupHandle, ConnectionSnapshot, ConnectionStateView, ConnectionStatus,
    EntityCollection, EntityId, EventFilter, EventKind, NormalizedEvent, SubscriptionDescriptor,
    SyncError, SyncResult, SyncTarget, TargetRegistry, TopicSpec,
};
