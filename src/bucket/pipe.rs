//! Pipe and socket buckets.
//!
//! The length of the data is unknown until it is read. Every read takes at
//! most [`BUFFER_SIZE`] bytes from the source into a heap bucket, and returns
//! a new pipe bucket holding the source for the rest. A source that ends
//! leaves an empty immortal bucket behind. Pipes are closed at that point,
//! sockets are left for their owner to shut down.
//!
//! Non-blocking reads set the source's timeout to zero for the duration of a
//! single read, then restore it.

use core::{mem, time::Duration};
use std::io;

use super::{Bucket, Kind, ReadMode, BUFFER_SIZE};
use crate::io::Source;

impl<'a> Bucket<'a> {
    /// Creates a bucket reading from a pipe until it ends. The pipe is closed
    /// once it does.
    #[must_use]
    pub fn pipe(source: impl Source + 'static) -> Bucket<'a> {
        Bucket {
            start: 0,
            length: None,
            kind: Kind::Pipe(Box::new(source)),
        }
    }

    /// Creates a bucket reading from a socket until it ends.
    #[must_use]
    pub fn socket(source: impl Source + 'static) -> Bucket<'a> {
        Bucket {
            start: 0,
            length: None,
            kind: Kind::Socket(Box::new(source)),
        }
    }

    pub(super) fn read_source(&mut self, mode: ReadMode) -> io::Result<Option<Bucket<'a>>> {
        let (Kind::Pipe(source) | Kind::Socket(source)) = &mut self.kind else {
            unreachable!("bucket: not a pipe or socket bucket");
        };
        let mut buf = vec![0; BUFFER_SIZE].into_boxed_slice();
        let n = read_chunk(source.as_mut(), mode, &mut buf)?;

        let kind = mem::replace(&mut self.kind, Kind::Eos);
        if n > 0 {
            *self = Bucket::heap_partial(buf, n);
            let kind = match kind {
                Kind::Socket(source) => Kind::Socket(source),
                Kind::Pipe(source) => Kind::Pipe(source),
                _ => unreachable!("bucket: not a pipe or socket bucket"),
            };
            return Ok(Some(Bucket {
                start: 0,
                length: None,
                kind,
            }));
        }

        if let Kind::Pipe(mut source) = kind {
            if let Err(err) = source.close() {
                tracing::debug!(%err, "pipe bucket: close failed");
            }
            tracing::trace!("pipe bucket: end of data, closed");
        }
        *self = Bucket::immortal(b"");
        Ok(None)
    }
}

/// Reads once from `source`. Without blocking, the timeout is zeroed for the
/// read and restored afterwards, even if the read fails.
fn read_chunk(source: &mut dyn Source, mode: ReadMode, buf: &mut [u8]) -> io::Result<usize> {
    if mode == ReadMode::Block {
        return retry_interrupted(source, buf);
    }
    let timeout = source.timeout()?;
    source.set_timeout(Some(Duration::ZERO))?;
    let result = retry_interrupted(source, buf);
    let restored = source.set_timeout(timeout);
    let n = result?;
    restored?;
    Ok(n)
}

fn retry_interrupted(source: &mut dyn Source, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}
