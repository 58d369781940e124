//! Anonymous pipes over raw file descriptors.
//!
//! Timeouts are implemented with `poll` before every read, so the descriptor
//! itself always stays in blocking mode.

use core::time::Duration;
use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
};

use super::Source;

/// Creates a pipe, returning its read and write ends.
///
/// # Errors
///
/// An error is returned if the pipe cannot be created.
pub fn pipe() -> io::Result<(Pipe, PipeWriter)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    // SAFETY: The array has room for two descriptors.
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    match ret {
        0 => {}
        -1 => return Err(io::Error::last_os_error()),
        _ => unreachable!("pipe: unexpected return {ret}"),
    }
    // SAFETY: Both descriptors were just created and are owned by no one else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((Pipe::from(read), PipeWriter::from(write)))
}

/// The read end of a pipe.
#[derive(Debug)]
pub struct Pipe {
    /// The descriptor, taken out when closed.
    fd: Option<OwnedFd>,
    timeout: Option<Duration>,
}

impl Pipe {
    /// Returns `true` once the pipe has been closed.
    #[inline(always)]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    fn raw_fd(&self) -> io::Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe: closed"))
    }

    /// Waits until the pipe is readable, or the timeout elapses.
    fn wait(fd: RawFd, timeout: Duration) -> io::Result<()> {
        let mut millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        if millis == 0 && !timeout.is_zero() {
            millis = 1;
        }
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: A single valid `pollfd` is passed.
            let ret = unsafe { libc::poll(&mut pollfd, 1, millis) };
            match ret {
                0 if timeout.is_zero() => return Err(io::ErrorKind::WouldBlock.into()),
                0 => return Err(io::ErrorKind::TimedOut.into()),
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
                1 => return Ok(()),
                _ => unreachable!("poll: unexpected return {ret}"),
            }
        }
    }
}

impl From<OwnedFd> for Pipe {
    fn from(fd: OwnedFd) -> Self {
        Self {
            fd: Some(fd),
            timeout: None,
        }
    }
}

impl io::Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.raw_fd()?;
        if let Some(timeout) = self.timeout {
            Pipe::wait(fd, timeout)?;
        }
        loop {
            // SAFETY: The buffer is valid for writes of its length.
            let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
            if ret >= 0 {
                #[allow(clippy::cast_sign_loss)]
                return Ok(ret as usize);
            } else if ret == -1 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            } else {
                unreachable!("read: unexpected return {ret}")
            }
        }
    }
}

impl Source for Pipe {
    #[inline(always)]
    fn timeout(&self) -> io::Result<Option<Duration>> {
        Ok(self.timeout)
    }

    #[inline(always)]
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };
        // SAFETY: The descriptor is owned and not used afterwards.
        let ret = unsafe { libc::close(fd.into_raw_fd()) };
        match ret {
            0 => Ok(()),
            -1 => Err(io::Error::last_os_error()),
            _ => unreachable!("close: unexpected return {ret}"),
        }
    }
}

/// The write end of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    fd: OwnedFd,
}

impl From<OwnedFd> for PipeWriter {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            // SAFETY: The buffer is valid for reads of its length.
            let ret = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if ret >= 0 {
                #[allow(clippy::cast_sign_loss)]
                return Ok(ret as usize);
            } else if ret == -1 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            } else {
                unreachable!("write: unexpected return {ret}")
            }
        }
    }

    #[inline(always)]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
