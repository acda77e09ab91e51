//! Listening Endpoint
//!
//! The fixed server startup sequence: create, blocking mode, reuse-address,
//! optionally the receive timeout, bind, listen.

use std::io;

use tracing::info;

use crate::config::ListenerConfig;
use crate::endpoint::Endpoint;
use crate::error::EndpointError;
use crate::handle::{SocketHandle, SystemSocket};

/// Create an endpoint and bring it into the `Listening` state.
///
/// Errors from any step are returned unchanged. Bind and listen failures have
/// already closed the handle; for earlier failures the handle is released when
/// the partially started endpoint is dropped.
pub fn start_listening(config: &ListenerConfig) -> Result<Endpoint, EndpointError> {
    start_listening_with(config, || {
        let socket = SystemSocket::open()?;
        Ok(Box::new(socket) as Box<dyn SocketHandle>)
    })
}

fn start_listening_with<F>(config: &ListenerConfig, open: F) -> Result<Endpoint, EndpointError>
where
    F: FnOnce() -> io::Result<Box<dyn SocketHandle>>,
{
    let mut endpoint = Endpoint::with_address(config.address.clone(), config.port);
    endpoint.set_backlog(config.backlog);

    endpoint.create_with(open)?;
    endpoint.set_block()?;
    endpoint.set_reuse_addr(true)?;
    if config.apply_receive_timeout_before_bind {
        let timeout = config.receive_timeout;
        endpoint.set_receive_timeout(timeout.seconds, timeout.microseconds)?;
    }
    endpoint.bind()?;
    endpoint.listen()?;

    info!(
        address = %config.address,
        port = config.port,
        backlog = config.backlog,
        "endpoint listening"
    );
    Ok(endpoint)
}
