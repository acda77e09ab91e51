//! Listener Configuration
//!
//! Settings consumed by [`start_listening`](crate::start_listening). Every field
//! has a default, so a partial document deserializes to a usable config.

use serde::Deserialize;

use crate::endpoint::{DEFAULT_ADDRESS, DEFAULT_BACKLOG, DEFAULT_PORT};

/// Receive timeout applied through `SO_RCVTIMEO`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReceiveTimeout {
    pub seconds: u64,
    pub microseconds: u32,
}

impl Default for ReceiveTimeout {
    fn default() -> Self {
        Self {
            seconds: 0,
            microseconds: 100,
        }
    }
}

/// Listening endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// IPv4 address to bind
    pub address: String,
    /// Port to bind; 0 lets the OS pick one
    pub port: u16,
    /// Maximum number of queued connections
    pub backlog: i32,
    pub receive_timeout: ReceiveTimeout,
    /// Apply `receive_timeout` between setting reuse-address and binding.
    /// When false the receive timeout is left untouched.
    pub apply_receive_timeout_before_bind: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            receive_timeout: ReceiveTimeout::default(),
            apply_receive_timeout_before_bind: false,
        }
    }
}

impl ListenerConfig {
    /// Default config bound to `address:port`
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Self::default()
        }
    }
}
