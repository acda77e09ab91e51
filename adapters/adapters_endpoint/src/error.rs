//! Error Module
//!
//! A single error type for every endpoint operation. OS failures keep the
//! underlying [`io::Error`], so the native error number stays available through
//! [`EndpointError::code`].

use std::fmt;
use std::io;
use std::net::AddrParseError;

use thiserror::Error;

use crate::state::EndpointState;

/// The endpoint operation an error was raised by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Allocating a socket
    Create,
    /// Switching between blocking and non-blocking mode
    SetBlocking,
    /// Applying a socket option
    SetOption,
    Bind,
    Listen,
    Connect,
    Accept,
    Send,
    Read,
    /// Reading while recording the sender
    ReadFrom,
    Shutdown,
    /// Releasing the handle
    Close,
    /// Querying the bound local address
    LocalName,
    /// Querying the connected peer's address
    PeerName,
    /// Waiting for readiness over several endpoints
    Select,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::SetBlocking => "set blocking mode",
            Operation::SetOption => "set option",
            Operation::Bind => "bind",
            Operation::Listen => "listen",
            Operation::Connect => "connect",
            Operation::Accept => "accept",
            Operation::Send => "send",
            Operation::Read => "read",
            Operation::ReadFrom => "read from",
            Operation::Shutdown => "shutdown",
            Operation::Close => "close",
            Operation::LocalName => "get local name",
            Operation::PeerName => "get peer name",
            Operation::Select => "select",
        };
        f.write_str(name)
    }
}

/// Endpoint error
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The operating system rejected the operation
    #[error("{op} failed: {source}")]
    Io {
        op: Operation,
        #[source]
        source: io::Error,
    },

    /// An operation failed and closing the handle afterwards failed too.
    ///
    /// `primary` is the reported failure; the close failure is exposed as the
    /// error source.
    #[error("{primary}; closing the socket afterwards failed as well")]
    Compound {
        primary: Box<EndpointError>,
        #[source]
        secondary: Box<EndpointError>,
    },

    /// The operation is not valid in the endpoint's current state
    #[error("cannot {op} while the endpoint is {state}")]
    InvalidState { op: Operation, state: EndpointState },

    /// The configured address is not an IPv4 literal.
    ///
    /// Hostnames are rejected rather than resolved, so `bind` and `connect`
    /// never block on name lookup. No OS call was made and the handle stays open.
    #[error("invalid IPv4 address `{address}`")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },
}

impl EndpointError {
    pub(crate) fn io(op: Operation, source: io::Error) -> Self {
        EndpointError::Io { op, source }
    }

    /// OS error number of the reported failure.
    ///
    /// For a compound failure this is always the code of the primary error.
    pub fn code(&self) -> Option<i32> {
        match self {
            EndpointError::Io { source, .. } => source.raw_os_error(),
            EndpointError::Compound { primary, .. } => primary.code(),
            EndpointError::InvalidState { .. } | EndpointError::InvalidAddress { .. } => None,
        }
    }

    /// The operation the reported failure belongs to
    pub fn operation(&self) -> Option<Operation> {
        match self {
            EndpointError::Io { op, .. } | EndpointError::InvalidState { op, .. } => Some(*op),
            EndpointError::Compound { primary, .. } => primary.operation(),
            EndpointError::InvalidAddress { .. } => None,
        }
    }

    /// The chained close failure of a compound error
    pub fn cause(&self) -> Option<&EndpointError> {
        match self {
            EndpointError::Compound { secondary, .. } => Some(secondary),
            _ => None,
        }
    }

    /// Whether the OS reported "resource temporarily unavailable"
    pub fn is_temporarily_unavailable(&self) -> bool {
        self.code() == Some(crate::RESOURCE_TEMPORARILY_UNAVAILABLE)
    }
}
