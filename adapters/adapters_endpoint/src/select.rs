//! Readiness Wait
//!
//! A thin passthrough to `select(2)` over sets of endpoints. Each set is an
//! in/out parameter: on return it holds only the endpoints that became ready.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use tracing::trace;

use crate::endpoint::Endpoint;
use crate::error::{EndpointError, Operation};

struct DescriptorSet {
    raw: libc::fd_set,
}

impl DescriptorSet {
    fn new(endpoints: &[&Endpoint], highest: &mut RawFd) -> Result<Self, EndpointError> {
        // Safety: `fd_set` is a plain bit array; FD_ZERO initializes it.
        let mut raw: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe { libc::FD_ZERO(&mut raw) };

        for endpoint in endpoints {
            let fd = descriptor(endpoint)?;
            // Safety: `descriptor` checked that `fd` fits into the set.
            unsafe { libc::FD_SET(fd, &mut raw) };
            *highest = (*highest).max(fd);
        }
        Ok(Self { raw })
    }

    fn contains(&self, endpoint: &Endpoint) -> bool {
        match endpoint.raw_fd() {
            // Safety: every fd in a set passed the range check in `descriptor`.
            Some(fd) => unsafe { libc::FD_ISSET(fd, &self.raw) },
            None => false,
        }
    }
}

fn descriptor(endpoint: &Endpoint) -> Result<RawFd, EndpointError> {
    let fd = endpoint.raw_fd().ok_or(EndpointError::InvalidState {
        op: Operation::Select,
        state: endpoint.state(),
    })?;
    if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
        return Err(EndpointError::io(
            Operation::Select,
            io::Error::from_raw_os_error(libc::EINVAL),
        ));
    }
    Ok(fd)
}

/// Wait until some of the given endpoints are ready.
///
/// * `read` - Endpoints to watch for readable data or pending connections
/// * `write` - Endpoints to watch for writability
/// * `except` - Endpoints to watch for exceptional conditions
/// * `timeout` - `None` blocks indefinitely, `Some(Duration::ZERO)` polls
///
/// # Returns
///
/// * `Ok(usize)` - Number of ready descriptors; each set now holds only its
///   ready endpoints
/// * `Err(EndpointError)` - An endpoint has no handle, or `select(2)` failed
pub fn select(
    read: &mut Vec<&Endpoint>,
    write: &mut Vec<&Endpoint>,
    except: &mut Vec<&Endpoint>,
    timeout: Option<Duration>,
) -> Result<usize, EndpointError> {
    let mut highest: RawFd = -1;
    let mut read_set = DescriptorSet::new(read, &mut highest)?;
    let mut write_set = DescriptorSet::new(write, &mut highest)?;
    let mut except_set = DescriptorSet::new(except, &mut highest)?;

    let mut timeval = timeout.map(|timeout| libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    });
    let timeval_ptr = timeval
        .as_mut()
        .map_or(ptr::null_mut(), |timeval| timeval as *mut libc::timeval);

    // Safety: all sets are initialized and outlive the call.
    let ready = unsafe {
        libc::select(
            highest + 1,
            &mut read_set.raw,
            &mut write_set.raw,
            &mut except_set.raw,
            timeval_ptr,
        )
    };
    if ready < 0 {
        return Err(EndpointError::io(Operation::Select, io::Error::last_os_error()));
    }

    read.retain(|endpoint| read_set.contains(endpoint));
    write.retain(|endpoint| write_set.contains(endpoint));
    except.retain(|endpoint| except_set.contains(endpoint));
    trace!(
        ready,
        read = read.len(),
        write = write.len(),
        except = except.len(),
        "select returned"
    );
    Ok(ready as usize)
}
