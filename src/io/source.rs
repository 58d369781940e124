//! Sources of pipe and socket buckets.

use core::time::Duration;
use std::{io, net::TcpStream};

/// A readable stream with a read timeout.
///
/// Pipe and socket buckets read from a source. A non-blocking read sets the
/// timeout to `Some(Duration::ZERO)` for a single read, and expects a read
/// without data available to fail with [`io::ErrorKind::WouldBlock`]. A read
/// returning zero bytes means the source has ended.
pub trait Source: io::Read {
    /// Returns the read timeout, `None` if reads block indefinitely.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn timeout(&self) -> io::Result<Option<Duration>>;

    /// Sets the read timeout. `Some(Duration::ZERO)` makes reads
    /// non-blocking.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Closes the source once it has ended. The default does nothing.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Implements [`Source`] for std streams, which take a zero timeout as an
/// error, so it is mapped to the non-blocking mode instead.
///
/// The non-blocking mode is not reported by `timeout`. A stream switched to it
/// by other means reports its read timeout.
macro_rules! impl_stream_source {
    ($($stream:ty),*) => {$(
        impl Source for $stream {
            fn timeout(&self) -> io::Result<Option<Duration>> {
                self.read_timeout()
            }

            fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
                if timeout == Some(Duration::ZERO) {
                    return self.set_nonblocking(true);
                }
                self.set_nonblocking(false)?;
                self.set_read_timeout(timeout)
            }
        }
    )*};
}

impl_stream_source!(TcpStream);
#[cfg(unix)]
impl_stream_source!(std::os::unix::net::UnixStream);
