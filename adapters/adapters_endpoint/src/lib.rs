//! Adapters Layer: Resilient TCP Endpoint
//!
//! Wraps a raw IPv4 TCP socket in a small state machine with deterministic
//! retry and error-propagation rules.
//!
//! ## Overview
//!
//! The `adapters_endpoint` crate provides:
//! - **Endpoint**: one socket handle and its lifecycle (create, configure,
//!   bind, listen, accept, connect, send, read, shutdown, close)
//! - **Bounded read retry**: reads retry while the OS reports "resource
//!   temporarily unavailable", at most [`READ_RETRY_ATTEMPTS`] times
//! - **Listening startup**: [`start_listening`] runs the fixed server sequence
//! - **Readiness wait**: [`select()`] over sets of endpoints
//! - **Receive loop**: [`receive_until`] feeds accumulated reads to a parser
//!
//! ## Architecture
//!
//! OS calls go through the [`SocketHandle`] trait. [`SystemSocket`] implements
//! it with `socket2` and `libc`; the endpoint never calls the OS directly.
//!
//! ## Example
//!
//! ```no_run
//! use adapters_endpoint::{start_listening, ListenerConfig};
//!
//! let listener = start_listening(&ListenerConfig::default())?;
//! if let Some(client) = listener.accept()? {
//!     let request = client.read(1024)?;
//!     client.send(&request)?;
//! }
//! # Ok::<(), adapters_endpoint::EndpointError>(())
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod listener;
pub mod receive;
pub mod select;
pub mod state;

pub use config::{ListenerConfig, ReceiveTimeout};
pub use endpoint::{
    Endpoint, DEFAULT_ADDRESS, DEFAULT_BACKLOG, DEFAULT_PORT, READ_RETRY_ATTEMPTS,
    READ_RETRY_INTERVAL, RESOURCE_TEMPORARILY_UNAVAILABLE,
};
pub use error::{EndpointError, Operation};
pub use handle::{SocketHandle, SocketOption, SystemSocket};
pub use listener::start_listening;
pub use receive::receive_until;
pub use select::select;
pub use state::EndpointState;
