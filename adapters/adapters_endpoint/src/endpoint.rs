//! Endpoint Module
//!
//! [`Endpoint`] owns at most one socket handle and drives it through an
//! explicit lifecycle:
//!
//! ```text
//! Unbound -> Created -> Configured -> Bound -> Listening   (server)
//!                                          \-> Connected   (client)
//! any live state -> Closed
//! ```
//!
//! Operations check the current [`EndpointState`] before touching the OS and
//! advance it only after the OS call succeeded. Reads retry a bounded number of
//! times while the OS reports "resource temporarily unavailable".

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddrV4};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{EndpointError, Operation};
use crate::handle::{SocketHandle, SocketOption, SystemSocket};
use crate::state::{EndpointState, LIVE};

/// OS error number for "resource temporarily unavailable" (`EAGAIN`)
pub const RESOURCE_TEMPORARILY_UNAVAILABLE: i32 = libc::EAGAIN;

/// Maximum number of attempts a single `read`/`read_from` makes
pub const READ_RETRY_ATTEMPTS: u32 = 10;

/// Pause between two read attempts (100 000 µs)
pub const READ_RETRY_INTERVAL: Duration = Duration::from_micros(100_000);

/// Address used when none is configured
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Port used when none is configured; 0 lets the OS pick one
pub const DEFAULT_PORT: u16 = 0;

/// Default maximum number of queued connections
pub const DEFAULT_BACKLOG: i32 = 100;

/// A single IPv4 TCP endpoint
///
/// Server path: [`create`](Self::create), optional configuration,
/// [`bind`](Self::bind), [`listen`](Self::listen), then [`accept`](Self::accept).
/// Client path: [`create`](Self::create) then [`connect`](Self::connect).
///
/// The endpoint releases its handle on [`close`](Self::close), or silently when
/// dropped.
pub struct Endpoint {
    handle: Option<Box<dyn SocketHandle>>,
    address: String,
    port: u16,
    backlog: i32,
    blocking: bool,
    state: EndpointState,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("backlog", &self.backlog)
            .field("blocking", &self.blocking)
            .field("state", &self.state)
            .field("fd", &self.raw_fd())
            .finish()
    }
}

impl Endpoint {
    /// An endpoint without a handle, addressed at `127.0.0.1:0`
    pub fn new() -> Self {
        Self::with_address(DEFAULT_ADDRESS, DEFAULT_PORT)
    }

    /// An endpoint without a handle, addressed at `address:port`
    pub fn with_address(address: impl Into<String>, port: u16) -> Self {
        Self {
            handle: None,
            address: address.into(),
            port,
            backlog: DEFAULT_BACKLOG,
            blocking: false,
            state: EndpointState::Unbound,
        }
    }

    /// Wrap a fresh handle created elsewhere. The endpoint starts out `Created`.
    ///
    /// For a handle that is already connected use
    /// [`from_connected`](Self::from_connected).
    pub fn from_handle(handle: Box<dyn SocketHandle>) -> Self {
        let mut endpoint = Self::new();
        endpoint.handle = Some(handle);
        endpoint.state = EndpointState::Created;
        endpoint
    }

    /// Wrap a handle that is already connected to a peer
    ///
    /// # Arguments
    ///
    /// * `handle` - Connected stream handle
    ///
    /// # Returns
    ///
    /// * `Ok(Endpoint)` - `Connected` endpoint addressed at the peer, ready for I/O
    /// * `Err(EndpointError)` - The peer address could not be read (typically
    ///   `ENOTCONN`); the handle is dropped
    pub fn from_connected(handle: Box<dyn SocketHandle>) -> Result<Self, EndpointError> {
        let peer = handle
            .peer_addr()
            .map_err(|source| EndpointError::io(Operation::PeerName, source))?;
        Ok(Self::connected_to(handle, peer))
    }

    fn connected_to(handle: Box<dyn SocketHandle>, peer: SocketAddrV4) -> Self {
        let mut endpoint = Self::with_address(peer.ip().to_string(), peer.port());
        endpoint.handle = Some(handle);
        endpoint.state = EndpointState::Connected;
        endpoint
    }

    /// The configured address, or the peer's after an accept or a successful
    /// [`read_from`](Self::read_from)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Set the address used by [`bind`](Self::bind) and [`connect`](Self::connect).
    ///
    /// Only IPv4 literals are accepted there; hostnames are not resolved.
    pub fn set_address(&mut self, address: impl Into<String>) -> &mut Self {
        self.address = address.into();
        self
    }

    /// The configured port, or the peer's after an accept or a successful
    /// [`read_from`](Self::read_from)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Set the port used by [`bind`](Self::bind) and [`connect`](Self::connect);
    /// 0 lets the OS pick one on bind
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// Maximum number of queued connections passed to [`listen`](Self::listen)
    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// Set the backlog for a later [`listen`](Self::listen)
    pub fn set_backlog(&mut self, backlog: i32) -> &mut Self {
        self.backlog = backlog;
        self
    }

    /// The blocking mode last applied successfully.
    ///
    /// This is the endpoint's own record; the OS is never queried. A freshly
    /// created or accepted endpoint reports `false` until a mode is set.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Current lifecycle state
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// The descriptor of the owned handle
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.handle.as_ref().and_then(|handle| handle.raw_fd())
    }

    /// Borrow the handle if the current state permits `op`
    fn handle_for(
        &self,
        op: Operation,
        allowed: &[EndpointState],
    ) -> Result<&dyn SocketHandle, EndpointError> {
        match &self.handle {
            Some(handle) if allowed.contains(&self.state) => Ok(handle.as_ref()),
            _ => Err(EndpointError::InvalidState {
                op,
                state: self.state,
            }),
        }
    }

    fn transition(&mut self, next: EndpointState) {
        trace!(from = %self.state, to = %next, "endpoint state change");
        self.state = next;
    }

    fn mark_configured(&mut self) {
        if self.state == EndpointState::Created {
            self.transition(EndpointState::Configured);
        }
    }

    fn socket_addr(&self) -> Result<SocketAddrV4, EndpointError> {
        let ip: Ipv4Addr = self
            .address
            .parse()
            .map_err(|source| EndpointError::InvalidAddress {
                address: self.address.clone(),
                source,
            })?;
        Ok(SocketAddrV4::new(ip, self.port))
    }

    /// Allocate a new IPv4 TCP handle.
    ///
    /// A handle the endpoint already owns is released first. The blocking flag
    /// is reset since no mode has been applied to the new handle.
    pub fn create(&mut self) -> Result<(), EndpointError> {
        self.create_with(|| {
            let socket = SystemSocket::open()?;
            Ok(Box::new(socket) as Box<dyn SocketHandle>)
        })
    }

    pub(crate) fn create_with<F>(&mut self, open: F) -> Result<(), EndpointError>
    where
        F: FnOnce() -> io::Result<Box<dyn SocketHandle>>,
    {
        let handle = open().map_err(|source| EndpointError::io(Operation::Create, source))?;
        if self.handle.replace(handle).is_some() {
            debug!(state = %self.state, "released previous handle on create");
        }
        self.blocking = false;
        self.transition(EndpointState::Created);
        Ok(())
    }

    /// Put the handle into blocking mode
    pub fn set_block(&mut self) -> Result<(), EndpointError> {
        self.apply_blocking(true)
    }

    /// Put the handle into non-blocking mode
    pub fn set_no_block(&mut self) -> Result<(), EndpointError> {
        self.apply_blocking(false)
    }

    fn apply_blocking(&mut self, blocking: bool) -> Result<(), EndpointError> {
        self.handle_for(Operation::SetBlocking, LIVE)?
            .set_nonblocking(!blocking)
            .map_err(|source| EndpointError::io(Operation::SetBlocking, source))?;
        self.blocking = blocking;
        debug!(blocking, "blocking mode applied");
        self.mark_configured();
        Ok(())
    }

    /// Apply a socket option.
    ///
    /// On failure the handle is closed and the option error is returned; if
    /// the close fails too the result is [`EndpointError::Compound`].
    pub fn set_option(&mut self, option: SocketOption) -> Result<(), EndpointError> {
        let result = self.handle_for(Operation::SetOption, LIVE)?.set_option(option);
        if let Err(source) = result {
            warn!(option = option.name(), error = %source, "socket option rejected");
            return Err(self.close_after_failure(Operation::SetOption, source));
        }
        trace!(?option, "socket option applied");
        self.mark_configured();
        Ok(())
    }

    /// Toggle `SO_REUSEADDR`; failure closes the handle like [`set_option`](Self::set_option)
    pub fn set_reuse_addr(&mut self, reuse: bool) -> Result<(), EndpointError> {
        self.set_option(SocketOption::ReuseAddress(reuse))
    }

    /// Set the receive timeout; a zero duration disables it
    pub fn set_receive_timeout(&mut self, seconds: u64, microseconds: u32) -> Result<(), EndpointError> {
        self.set_option(SocketOption::ReceiveTimeout {
            seconds,
            microseconds,
        })
    }

    /// Configure `SO_LINGER`
    ///
    /// # Arguments
    ///
    /// * `enabled` - Whether close waits for unsent data
    /// * `seconds` - How long close may wait when enabled
    pub fn set_linger(&mut self, enabled: bool, seconds: u64) -> Result<(), EndpointError> {
        self.set_option(SocketOption::Linger { enabled, seconds })
    }

    /// Bind to the endpoint's address and port.
    ///
    /// On an OS failure the handle is closed and the bind error is returned;
    /// if the close fails too the result is [`EndpointError::Compound`].
    pub fn bind(&mut self) -> Result<(), EndpointError> {
        let addr = self.socket_addr()?;
        let result = self
            .handle_for(Operation::Bind, &[EndpointState::Created, EndpointState::Configured])?
            .bind(addr);
        if let Err(source) = result {
            return Err(self.close_after_failure(Operation::Bind, source));
        }
        debug!(%addr, "endpoint bound");
        self.transition(EndpointState::Bound);
        Ok(())
    }

    /// Start listening with the configured backlog.
    ///
    /// Failure follows the same close-then-report protocol as [`bind`](Self::bind).
    pub fn listen(&mut self) -> Result<(), EndpointError> {
        let backlog = self.backlog;
        let result = self
            .handle_for(Operation::Listen, &[EndpointState::Bound])?
            .listen(backlog);
        if let Err(source) = result {
            return Err(self.close_after_failure(Operation::Listen, source));
        }
        debug!(backlog, "endpoint listening");
        self.transition(EndpointState::Listening);
        Ok(())
    }

    /// Connect to the endpoint's address and port
    pub fn connect(&mut self) -> Result<(), EndpointError> {
        let addr = self.socket_addr()?;
        self.handle_for(
            Operation::Connect,
            &[EndpointState::Created, EndpointState::Configured, EndpointState::Bound],
        )?
        .connect(addr)
        .map_err(|source| EndpointError::io(Operation::Connect, source))?;
        debug!(%addr, "endpoint connected");
        self.transition(EndpointState::Connected);
        Ok(())
    }

    /// Accept a pending connection.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Endpoint))` - A new, independently owned endpoint in the
    ///   `Connected` state, addressed at the peer
    /// * `Ok(None)` - Non-blocking endpoint and the accept call failed, i.e.
    ///   no connection is pending yet
    /// * `Err(EndpointError)` - Blocking endpoint and the accept call failed
    pub fn accept(&self) -> Result<Option<Endpoint>, EndpointError> {
        match self.handle_for(Operation::Accept, &[EndpointState::Listening])?.accept() {
            Ok((handle, peer)) => {
                debug!(%peer, "accepted connection");
                Ok(Some(Endpoint::connected_to(handle, peer)))
            }
            Err(source) if self.blocking => Err(EndpointError::io(Operation::Accept, source)),
            Err(source) => {
                if source.raw_os_error() == Some(RESOURCE_TEMPORARILY_UNAVAILABLE) {
                    trace!("no pending connection");
                } else {
                    warn!(error = %source, "non-blocking accept failed, reporting no pending connection");
                }
                Ok(None)
            }
        }
    }

    /// Write `data` once and return the number of bytes written, which may
    /// be less than `data.len()`
    pub fn send(&self, data: &[u8]) -> Result<usize, EndpointError> {
        let written = self
            .handle_for(Operation::Send, &[EndpointState::Connected])?
            .send(data)
            .map_err(|source| EndpointError::io(Operation::Send, source))?;
        trace!(written, requested = data.len(), "sent");
        Ok(written)
    }

    /// Read up to `length` bytes.
    ///
    /// Returns fewer bytes when fewer are available and an empty buffer at end
    /// of stream. While the OS reports "resource temporarily unavailable" the
    /// read is retried, at most [`READ_RETRY_ATTEMPTS`] attempts in total with
    /// [`READ_RETRY_INTERVAL`] between them.
    pub fn read(&self, length: usize) -> Result<Vec<u8>, EndpointError> {
        self.read_paced(length, thread::sleep)
    }

    fn read_paced(&self, length: usize, sleep: impl FnMut(Duration)) -> Result<Vec<u8>, EndpointError> {
        let handle = self.handle_for(Operation::Read, &[EndpointState::Connected])?;
        let mut buf = vec![0u8; length];
        let n = retry_transient(Operation::Read, sleep, || handle.recv(&mut buf))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read up to `length` bytes and record the sender.
    ///
    /// Retries like [`read`](Self::read). On success the sender's address and
    /// port replace the endpoint's own `address` and `port`. When the OS cannot
    /// name the sender the bytes are still returned and the last known address
    /// is kept.
    pub fn read_from(&mut self, length: usize, flags: i32) -> Result<Vec<u8>, EndpointError> {
        self.read_from_paced(length, flags, thread::sleep)
    }

    fn read_from_paced(
        &mut self,
        length: usize,
        flags: i32,
        sleep: impl FnMut(Duration),
    ) -> Result<Vec<u8>, EndpointError> {
        let handle = self.handle_for(Operation::ReadFrom, &[EndpointState::Connected])?;
        let mut buf = vec![0u8; length];
        let (n, sender) =
            retry_transient(Operation::ReadFrom, sleep, || handle.recv_from(&mut buf, flags))?;
        buf.truncate(n);
        match sender {
            Some(sender) => {
                self.address = sender.ip().to_string();
                self.port = sender.port();
            }
            None => debug!(received = n, "sender unknown, keeping last known address"),
        }
        Ok(buf)
    }

    /// Shut down one or both directions. The handle stays owned; call
    /// [`close`](Self::close) to release it.
    pub fn shutdown(&self, how: Shutdown) -> Result<(), EndpointError> {
        self.handle_for(Operation::Shutdown, &[EndpointState::Connected])?
            .shutdown(how)
            .map_err(|source| EndpointError::io(Operation::Shutdown, source))?;
        debug!(?how, "endpoint shut down");
        Ok(())
    }

    /// Release the handle.
    ///
    /// The endpoint is `Closed` afterwards even if the OS reports an error,
    /// since the descriptor is consumed by the attempt.
    pub fn close(&mut self) -> Result<(), EndpointError> {
        let mut handle = match self.handle.take() {
            Some(handle) if self.state.has_handle() => handle,
            handle => {
                self.handle = handle;
                return Err(EndpointError::InvalidState {
                    op: Operation::Close,
                    state: self.state,
                });
            }
        };
        self.transition(EndpointState::Closed);
        handle
            .close()
            .map_err(|source| EndpointError::io(Operation::Close, source))
    }

    /// Close after `op` failed with `source`; the `op` error always stays the
    /// reported one.
    fn close_after_failure(&mut self, op: Operation, source: io::Error) -> EndpointError {
        let primary = EndpointError::io(op, source);
        debug!(error = %primary, "closing handle after failure");
        match self.close() {
            Ok(()) => primary,
            Err(secondary) => {
                warn!(error = %secondary, "close after failed {op} failed as well");
                EndpointError::Compound {
                    primary: Box::new(primary),
                    secondary: Box::new(secondary),
                }
            }
        }
    }

    /// The local address the handle is bound to
    pub fn local_name(&self) -> Result<SocketAddrV4, EndpointError> {
        self.handle_for(Operation::LocalName, LIVE)?
            .local_addr()
            .map_err(|source| EndpointError::io(Operation::LocalName, source))
    }

    /// The address of the connected peer
    pub fn peer_name(&self) -> Result<SocketAddrV4, EndpointError> {
        self.handle_for(Operation::PeerName, &[EndpointState::Connected])?
            .peer_addr()
            .map_err(|source| EndpointError::io(Operation::PeerName, source))
    }
}

/// Run `attempt` until it succeeds, fails with anything other than
/// [`RESOURCE_TEMPORARILY_UNAVAILABLE`], or [`READ_RETRY_ATTEMPTS`] attempts
/// have been made.
fn retry_transient<T>(
    op: Operation,
    mut sleep: impl FnMut(Duration),
    mut attempt: impl FnMut() -> io::Result<T>,
) -> Result<T, EndpointError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(source)
                if source.raw_os_error() == Some(RESOURCE_TEMPORARILY_UNAVAILABLE)
                    && attempts < READ_RETRY_ATTEMPTS =>
            {
                debug!(%op, attempts, "resource temporarily unavailable, retrying");
                sleep(READ_RETRY_INTERVAL);
            }
            Err(source) => {
                if attempts > 1 {
                    warn!(%op, attempts, error = %source, "giving up");
                }
                return Err(EndpointError::io(op, source));
            }
        }
    }
}
