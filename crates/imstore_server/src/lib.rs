//! # imstore Server
//!
//! RPC facade over the imstore storage engine.
//!
//! This crate provides:
//! - [`RpcHandler`]: maps requests onto [`Storage`](imstore_core::Storage)
//! - [`RpcServer`]: length-prefixed CBOR frames over TCP, one task per
//!   connection
//! - [`RpcClient`]: sequential calls with a per-call deadline
//!
//! # Message encoding
//!
//! Requests carry a command and the message body encoded at the default
//! version. Bodies that do not decode are rejected. Stored messages are
//! returned with their bodies re-encoded at the default version.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imstore_core::{Storage, StorageConfig};
//! use imstore_server::{RpcHandler, RpcServer, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(Storage::open("data".as_ref(), StorageConfig::default())?);
//! let server = Arc::new(RpcServer::new(RpcHandler::new(storage), ServerConfig::default()));
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! server.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod error;
mod handler;
mod server;

pub use client::{RpcClient, DEFAULT_CALL_TIMEOUT};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{decode_raw, RpcHandler, SyncLimits};
pub use server::RpcServer;
