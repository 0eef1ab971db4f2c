//! # realsync channel
//!
//! A channel-multiplexing adapter for realsync.
//!
//! This crate provides:
//! - `ChannelAdapter`, an [`Adapter`](realsync_core::Adapter) that joins one
//!   channel per subscription over a single backend connection
//! - JSON wire frames and change payload normalization
//! - Row filter expressions (`column=op.value`)
//! - `LoopbackHub`, an in-process backend speaking the same protocol
//!
//! # Protocol
//!
//! Frames are JSON objects `{topic, event, payload, ref}`:
//! 1. The client opens a connection and sends `phx_join` per channel
//! 2. The backend replies `phx_reply` with `ok` or an error reason
//! 3. Row changes arrive as `postgres_changes` on the joined channel
//! 4. `phx_close` / `phx_error` on the `phoenix` topic end the connection
//!
//! # Example
//!
//! ```rust,ignore
//! use realsync_channel::{ChannelAdapter, ChannelConfig, LoopbackHub};
//!
//! let hub = LoopbackHub::new();
//! let adapter = ChannelAdapter::new(hub.clone(), ChannelConfig::default());
//! adapter.connect().await?;
//! hub.insert("items", serde_json::json!({"id": 1, "name": "A"}))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod config;
mod error;
mod filter;
mod hub;
mod wire;

pub use adapter::{BackendConnection, ChannelAdapter, ChannelBackend, FrameSink};
pub use config::ChannelConfig;
pub use error::{ChannelError, ChannelResult};
pub use filter::{FilterExpr, FilterOp};
pub use hub::{LoopbackHub, DEFAULT_SCHEMA};
pub use wire::{
    ChangePayload, ChangeSubscription, Frame, JoinConfig, JoinPayload, CONNECTION_TOPIC,
    EVENT_CHANGES, EVENT_CLOSE, EVENT_ERROR, EVENT_JOIN, EVENT_LEAVE, EVENT_REPLY,
};
