//! Handle Module
//!
//! The seam between an [`Endpoint`](crate::Endpoint) and the operating system.
//! [`SocketHandle`] lists the raw socket primitives the endpoint needs and
//! [`SystemSocket`] implements them over the `socket2` crate.

use std::io;
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// A socket option, applied through [`SocketHandle::set_option`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// `SO_REUSEADDR`
    ReuseAddress(bool),
    /// `SO_RCVTIMEO`; a zero duration disables the timeout
    ReceiveTimeout { seconds: u64, microseconds: u32 },
    /// `SO_LINGER`
    Linger { enabled: bool, seconds: u64 },
}

impl SocketOption {
    /// The option's C name, for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            SocketOption::ReuseAddress(_) => "SO_REUSEADDR",
            SocketOption::ReceiveTimeout { .. } => "SO_RCVTIMEO",
            SocketOption::Linger { .. } => "SO_LINGER",
        }
    }
}

/// Raw socket primitives
///
/// Each method maps to exactly one OS call and reports the OS error unchanged.
/// State tracking, retries and error policy live in the endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait SocketHandle: Send {
    /// Switch `O_NONBLOCK` on or off
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Apply one socket option at the `SOL_SOCKET` level
    fn set_option(&self, option: SocketOption) -> io::Result<()>;

    /// Assign the local address
    fn bind(&self, addr: SocketAddrV4) -> io::Result<()>;

    /// Mark the socket passive with room for `backlog` pending connections
    fn listen(&self, backlog: i32) -> io::Result<()>;

    /// Connect to a remote address, blocking or not per the current mode
    fn connect(&self, addr: SocketAddrV4) -> io::Result<()>;

    /// Accept a pending connection, returning the new handle and the peer address
    fn accept(&self) -> io::Result<(Box<dyn SocketHandle>, SocketAddrV4)>;

    /// Write once; the count may be short
    fn send(&self, data: &[u8]) -> io::Result<usize>;

    /// Read once into `buf`
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Read once into `buf` with `recvfrom(2)` flags, reporting the sender
    ///
    /// # Returns
    ///
    /// * `Ok((usize, Some(addr)))` - Bytes read and the sender
    /// * `Ok((usize, None))` - Bytes read; the sender could not be determined
    /// * `Err(io::Error)` - Nothing was read
    fn recv_from(&self, buf: &mut [u8], flags: i32) -> io::Result<(usize, Option<SocketAddrV4>)>;

    /// Shut down one or both directions of a connected socket
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    /// Release the descriptor. The handle is unusable afterwards, even on error.
    fn close(&mut self) -> io::Result<()>;

    /// The bound local address
    fn local_addr(&self) -> io::Result<SocketAddrV4>;

    /// The connected peer's address
    fn peer_addr(&self) -> io::Result<SocketAddrV4>;

    /// The descriptor, if the handle still owns one
    fn raw_fd(&self) -> Option<RawFd>;
}

/// OS-backed stream socket
///
/// Dropping a `SystemSocket` that was never closed releases its descriptor.
#[derive(Debug)]
pub struct SystemSocket {
    inner: Option<Socket>,
}

impl SystemSocket {
    /// Allocate a new IPv4 TCP stream socket
    ///
    /// # Returns
    ///
    /// * `Ok(SystemSocket)` - Created socket
    /// * `Err(io::Error)` - The OS refused to allocate a socket
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an existing `socket2` socket
    pub fn from_socket(socket: Socket) -> Self {
        Self {
            inner: Some(socket),
        }
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.inner
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }
}

fn to_ipv4(addr: SockAddr) -> io::Result<SocketAddrV4> {
    match addr.as_socket() {
        Some(SocketAddr::V4(addr)) => Ok(addr),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not an IPv4 socket address",
        )),
    }
}

fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // Safety: `u8` and `MaybeUninit<u8>` share a layout, and the kernel only
    // writes initialized bytes into the buffer.
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len()) }
}

fn receive_timeout(seconds: u64, microseconds: u32) -> Option<Duration> {
    let timeout = Duration::from_secs(seconds) + Duration::from_micros(u64::from(microseconds));
    (!timeout.is_zero()).then_some(timeout)
}

impl SocketHandle for SystemSocket {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket()?.set_nonblocking(nonblocking)
    }

    fn set_option(&self, option: SocketOption) -> io::Result<()> {
        let socket = self.socket()?;
        match option {
            SocketOption::ReuseAddress(reuse) => socket.set_reuse_address(reuse),
            SocketOption::ReceiveTimeout {
                seconds,
                microseconds,
            } => socket.set_read_timeout(receive_timeout(seconds, microseconds)),
            SocketOption::Linger { enabled, seconds } => {
                socket.set_linger(enabled.then(|| Duration::from_secs(seconds)))
            }
        }
    }

    fn bind(&self, addr: SocketAddrV4) -> io::Result<()> {
        self.socket()?.bind(&SockAddr::from(addr))
    }

    fn listen(&self, backlog: i32) -> io::Result<()> {
        self.socket()?.listen(backlog)
    }

    fn connect(&self, addr: SocketAddrV4) -> io::Result<()> {
        self.socket()?.connect(&SockAddr::from(addr))
    }

    fn accept(&self) -> io::Result<(Box<dyn SocketHandle>, SocketAddrV4)> {
        let (socket, addr) = self.socket()?.accept()?;
        let peer = to_ipv4(addr)?;
        Ok((Box::new(SystemSocket::from_socket(socket)), peer))
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket()?.send(data)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket()?.recv(as_uninit(buf))
    }

    fn recv_from(&self, buf: &mut [u8], flags: i32) -> io::Result<(usize, Option<SocketAddrV4>)> {
        let (n, addr) = self.socket()?.recv_from_with_flags(as_uninit(buf), flags)?;
        // Stream sockets leave the source address empty; the sender is the peer.
        // The bytes are already consumed, so a failed lookup must not turn into an error.
        let sender = match addr.as_socket() {
            Some(SocketAddr::V4(addr)) => Some(addr),
            _ => self.peer_addr().ok(),
        };
        Ok((n, sender))
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.socket()?.shutdown(how)
    }

    fn close(&mut self) -> io::Result<()> {
        let socket = self
            .inner
            .take()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        let fd = socket.into_raw_fd();
        // Safety: `into_raw_fd` transferred sole ownership of `fd` to us.
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddrV4> {
        to_ipv4(self.socket()?.local_addr()?)
    }

    fn peer_addr(&self) -> io::Result<SocketAddrV4> {
        to_ipv4(self.socket()?.peer_addr()?)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.inner.as_ref().map(AsRawFd::as_raw_fd)
    }
}
