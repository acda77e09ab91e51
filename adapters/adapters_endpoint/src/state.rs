//! Endpoint State
//!
//! The lifecycle an [`Endpoint`](crate::Endpoint) moves through. The state is
//! only advanced after the corresponding OS call has succeeded.

use std::fmt;

/// Lifecycle state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// No handle has been allocated yet
    Unbound,
    /// A handle exists but nothing has been applied to it
    Created,
    /// Blocking mode or a socket option has been applied
    Configured,
    /// Bound to the endpoint's address and port
    Bound,
    /// Accepting connections (server path)
    Listening,
    /// Connected to a peer, either by `connect` or as the result of `accept`
    Connected,
    /// The handle has been released
    Closed,
}

/// States in which the endpoint owns a live handle.
pub(crate) const LIVE: &[EndpointState] = &[
    EndpointState::Created,
    EndpointState::Configured,
    EndpointState::Bound,
    EndpointState::Listening,
    EndpointState::Connected,
];

impl EndpointState {
    /// Whether an endpoint in this state owns a live handle
    pub fn has_handle(self) -> bool {
        LIVE.contains(&self)
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointState::Unbound => "unbound",
            EndpointState::Created => "created",
            EndpointState::Configured => "configured",
            EndpointState::Bound => "bound",
            EndpointState::Listening => "listening",
            EndpointState::Connected => "connected",
            EndpointState::Closed => "closed",
        };
        f.write_str(name)
    }
}
