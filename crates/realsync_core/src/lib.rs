//! # realsync core
//!
//! Building blocks shared by the realsync crates.
//!
//! This crate provides:
//! - The connection state machine (`ConnectionState`) and its read-only view
//! - The backend adapter contract (`Adapter`, `CleanupHandle`)
//! - Canonical change events (`NormalizedEvent`, `TopicSpec`)
//! - Subscription descriptors mapping a topic onto a local collection
//! - Entity collections and the typed registry that addresses them
//!
//! This is a pure crate with no I/O; the orchestrator lives in
//! `realsync_engine` and a concrete adapter in `realsync_channel`.
//!
//! ## Key Invariants
//!
//! - Entering `Connected` clears the error and the reconnect counter
//! - Setting an error forces the `Error` status
//! - An adapter has at most one connectivity listener
//! - Releasing a cleanup handle silences its callback immediately

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod collection;
mod descriptor;
mod entity;
mod error;
mod event;
mod state;

pub use adapter::{
    Adapter, CleanupHandle, ConnectionCallback, ConnectionChange, EventCallback, ListenerSlot,
};
pub use collection::{EntityCollection, SyncTarget, TargetRegistry};
pub use descriptor::{RawIdFn, SelectIdFn, SubscriptionDescriptor, TransformFn};
pub use entity::{EntityId, DEFAULT_ID_FIELD};
pub use error::{SyncError, SyncResult};
pub use event::{EventFilter, EventKind, NormalizedEvent, TopicSpec};
pub use state::{ConnectionSnapshot, ConnectionState, ConnectionStateView, ConnectionStatus};
