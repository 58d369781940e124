//! Buckets: handles to spans of bytes.
//!
//! A [`Bucket`] describes `length` bytes starting at `start` of some backing
//! data. The data may be in memory already (immortal, transient, heap and
//! memory-mapped buckets), or only become available on [`Bucket::read`]
//! (file, pipe and socket buckets). End-of-stream and flush buckets carry no
//! data at all, they are metadata for whoever consumes the stream.
//!
//! Backing data of heap, memory-mapped and file buckets is reference-counted.
//! [`Bucket::split`] and [`Bucket::copy`] produce more buckets over the same
//! data, and the data is released when the last of them is dropped.
//!
//! Reading may turn a bucket into another variant. A file bucket reads a
//! chunk, becomes a heap bucket holding just that chunk, and returns a file
//! bucket for the rest of the file, which the caller links right after it.
//! Brigades do that linking on their own, see
//! [`Cursor::read`](crate::brigade::Cursor::read).
//!
//! ```text
//!   before:  [FILE 0..20000]
//!   read:    [HEAP 0..8000] -> returned [FILE 8000..20000]
//! ```
//!
//! Transient buckets borrow the bytes for `'a`, which is the lifetime
//! parameter of [`Bucket`]. Before the bytes go away, the bucket must be set
//! aside with [`Bucket::set_aside`] or [`Bucket::into_owned`], which copy the
//! bytes to the heap.

use core::fmt;
use std::{io, rc::Rc};

use crate::{io::Source, pool::Pool};

#[cfg(feature = "mmap")]
use crate::io::Mmap;

mod file;
mod heap;
#[cfg(feature = "mmap")]
mod mmap;
mod pipe;

pub use file::{FileOptions, MMAP_LIMIT};

use file::FileShared;
use heap::HeapBuffer;

/// The default size of a read chunk and of a brigade write buffer.
pub const BUFFER_SIZE: usize = 8000;

/// Whether a read may wait for data.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ReadMode {
    /// Wait until some data is available, or the source ends.
    #[default]
    Block,
    /// Return whatever is available now. If nothing is, the read fails with
    /// [`io::ErrorKind::WouldBlock`].
    NonBlock,
}

/// The variant of a [`Bucket`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BucketKind {
    /// Bytes that outlive any use of the bucket.
    Immortal,
    /// Borrowed bytes that must be set aside before they go away.
    Transient,
    /// A reference-counted heap buffer.
    Heap,
    /// A reference-counted memory map.
    Mmap,
    /// A region of an open file.
    File,
    /// A pipe, read until it ends.
    Pipe,
    /// A socket, read until it ends.
    Socket,
    /// End of the stream.
    Eos,
    /// A request to flush data buffered downstream.
    Flush,
}

impl BucketKind {
    /// Returns the name of the variant.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Immortal => "IMMORTAL",
            Self::Transient => "TRANSIENT",
            Self::Heap => "HEAP",
            Self::Mmap => "MMAP",
            Self::File => "FILE",
            Self::Pipe => "PIPE",
            Self::Socket => "SOCKET",
            Self::Eos => "EOS",
            Self::Flush => "FLUSH",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error specific to buckets and brigades.
///
/// When returned within [`io::Error`], the value can be recovered with
/// [`BucketError::of`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BucketError {
    /// The operation in the first value is not supported by the variant. The
    /// caller may read the bucket, which turns it into a variant that does
    /// support it, and retry.
    NotImplemented(&'static str, BucketKind),
    /// An offset is past the end of the data.
    OffsetOutOfRange {
        /// The offending offset.
        offset: usize,
        /// The length of the data.
        length: usize,
    },
    /// The backing storage has been released by its pool.
    Released,
    /// The allocator is out of memory.
    OutOfMemory,
    /// An offset is beyond the data available in a brigade.
    NotFound,
}

impl BucketError {
    /// Returns the bucket error carried by `err`, if any.
    #[must_use]
    pub fn of(err: &io::Error) -> Option<BucketError> {
        err.get_ref()?.downcast_ref::<BucketError>().copied()
    }

    /// Returns the [`io::ErrorKind`] the error is reported with.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::NotImplemented(..) => io::ErrorKind::Unsupported,
            Self::OffsetOutOfRange { .. } => io::ErrorKind::InvalidInput,
            Self::Released => io::ErrorKind::Other,
            Self::OutOfMemory => io::ErrorKind::OutOfMemory,
            Self::NotFound => io::ErrorKind::UnexpectedEof,
        }
    }
}

impl std::error::Error for BucketError {}

impl fmt::Display for BucketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotImplemented(op, kind) => {
                write!(f, "bucket: {op} is not implemented for {kind} buckets")
            }
            Self::OffsetOutOfRange { offset, length } => {
                write!(f, "bucket: offset {offset} out of range for length {length}")
            }
            Self::Released => {
                write!(f, "bucket: backing storage has been released")
            }
            Self::OutOfMemory => {
                write!(f, "bucket: out of memory")
            }
            Self::NotFound => {
                write!(f, "bucket: offset beyond the available data")
            }
        }
    }
}

impl From<BucketError> for io::Error {
    #[inline(always)]
    fn from(err: BucketError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// A handle to a span of bytes.
///
/// See the [module documentation](self) for an overview.
pub struct Bucket<'a> {
    /// The offset into the backing data.
    start: usize,
    /// The number of bytes, unknown for pipes and sockets until read.
    length: Option<usize>,
    kind: Kind<'a>,
}

enum Kind<'a> {
    Immortal(&'static [u8]),
    Transient(&'a [u8]),
    Heap(Rc<HeapBuffer>),
    #[cfg(feature = "mmap")]
    Mmap(Mmap),
    File(Rc<FileShared>),
    Pipe(Box<dyn Source>),
    Socket(Box<dyn Source>),
    Eos,
    Flush,
}

impl<'a> Bucket<'a> {
    /// Creates a bucket over bytes that outlive any use of it. The bytes are
    /// never copied, not even when set aside.
    #[inline(always)]
    #[must_use]
    pub fn immortal(data: &'static [u8]) -> Bucket<'a> {
        Bucket {
            start: 0,
            length: Some(data.len()),
            kind: Kind::Immortal(data),
        }
    }

    /// Creates a bucket borrowing `data`. The bytes are copied to the heap
    /// once the bucket is set aside.
    #[inline(always)]
    #[must_use]
    pub fn transient(data: &'a [u8]) -> Bucket<'a> {
        Bucket {
            start: 0,
            length: Some(data.len()),
            kind: Kind::Transient(data),
        }
    }

    /// Creates an end-of-stream bucket.
    #[inline(always)]
    #[must_use]
    pub fn eos() -> Bucket<'a> {
        Bucket {
            start: 0,
            length: Some(0),
            kind: Kind::Eos,
        }
    }

    /// Creates a flush bucket.
    #[inline(always)]
    #[must_use]
    pub fn flush() -> Bucket<'a> {
        Bucket {
            start: 0,
            length: Some(0),
            kind: Kind::Flush,
        }
    }

    /// Returns the variant of the bucket.
    #[must_use]
    pub fn kind(&self) -> BucketKind {
        match self.kind {
            Kind::Immortal(_) => BucketKind::Immortal,
            Kind::Transient(_) => BucketKind::Transient,
            Kind::Heap(_) => BucketKind::Heap,
            #[cfg(feature = "mmap")]
            Kind::Mmap(_) => BucketKind::Mmap,
            Kind::File(_) => BucketKind::File,
            Kind::Pipe(_) => BucketKind::Pipe,
            Kind::Socket(_) => BucketKind::Socket,
            Kind::Eos => BucketKind::Eos,
            Kind::Flush => BucketKind::Flush,
        }
    }

    /// Returns the number of bytes, or `None` if it is not known before the
    /// bucket is read.
    #[inline(always)]
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Returns the offset into the backing data.
    #[inline(always)]
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns `true` for an end-of-stream bucket.
    #[inline(always)]
    #[must_use]
    pub fn is_eos(&self) -> bool {
        matches!(self.kind, Kind::Eos)
    }

    /// Returns `true` for a flush bucket.
    #[inline(always)]
    #[must_use]
    pub fn is_flush(&self) -> bool {
        matches!(self.kind, Kind::Flush)
    }

    /// Returns `true` for buckets that carry no data, only meaning.
    #[inline(always)]
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        matches!(self.kind, Kind::Eos | Kind::Flush)
    }

    /// Returns the bytes if they are available without IO.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            Kind::Immortal(data) => Some(self.span(data)),
            Kind::Transient(data) => Some(self.span(data)),
            Kind::Heap(buffer) => Some(self.span(buffer.as_slice())),
            #[cfg(feature = "mmap")]
            Kind::Mmap(map) => map.resolve(self.start, self.length.unwrap_or(0)).ok(),
            Kind::Eos | Kind::Flush => Some(&[]),
            Kind::File(_) | Kind::Pipe(_) | Kind::Socket(_) => None,
        }
    }

    /// Reads the bucket, returning its bytes.
    ///
    /// Buckets that are in memory already return their bytes as is. File,
    /// pipe and socket buckets read a chunk of data and turn into heap or
    /// memory-mapped buckets holding that chunk. If there is more data to
    /// read, a bucket for the rest of it is returned as the second value,
    /// which is supposed to follow this one in the stream.
    ///
    /// A pipe that ends turns into an empty immortal bucket, and the pipe is
    /// closed. Reading an empty immortal bucket does no IO.
    ///
    /// # Errors
    ///
    /// IO errors of the source are returned as is. With
    /// [`ReadMode::NonBlock`], pipes and sockets that have no data fail with
    /// [`io::ErrorKind::WouldBlock`]. Memory maps and files released by their
    /// pool fail with [`BucketError::Released`]. The bucket is left unchanged
    /// on error.
    pub fn read(&mut self, mode: ReadMode) -> io::Result<(&[u8], Option<Bucket<'a>>)> {
        let rest = self.materialize(mode)?;
        Ok((self.data()?, rest))
    }

    /// Turns the bucket into one whose bytes are in memory, returning the
    /// bucket for the data that follows, if any.
    pub(crate) fn materialize(&mut self, mode: ReadMode) -> io::Result<Option<Bucket<'a>>> {
        match self.kind {
            Kind::File(_) => self.read_file(),
            Kind::Pipe(_) | Kind::Socket(_) => self.read_source(mode),
            _ => Ok(None),
        }
    }

    /// Returns the bytes of a materialized bucket.
    fn data(&self) -> io::Result<&[u8]> {
        match &self.kind {
            #[cfg(feature = "mmap")]
            Kind::Mmap(map) => map.resolve(self.start, self.length.unwrap_or(0)),
            Kind::File(_) | Kind::Pipe(_) | Kind::Socket(_) => {
                unreachable!("bucket: {} read before materializing", self.kind())
            }
            _ => Ok(self.bytes().unwrap_or_default()),
        }
    }

    #[inline(always)]
    fn span<'d>(&self, data: &'d [u8]) -> &'d [u8] {
        &data[self.start..self.start + self.length.unwrap_or(0)]
    }

    /// Splits the bucket at `at`. The bucket keeps the first `at` bytes, and
    /// a bucket over the same backing data is returned for the rest.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotImplemented`] for pipes, sockets and
    /// metadata, and [`BucketError::OffsetOutOfRange`] if `at` is past the
    /// length. The bucket is left unchanged on error.
    pub fn split(&mut self, at: usize) -> Result<Bucket<'a>, BucketError> {
        let length = match (&self.kind, self.length) {
            (Kind::Eos | Kind::Flush, _) | (_, None) => {
                return Err(BucketError::NotImplemented("split", self.kind()));
            }
            (_, Some(length)) => length,
        };
        if at > length {
            return Err(BucketError::OffsetOutOfRange { offset: at, length });
        }
        let mut tail = self.copy()?;
        tail.start += at;
        tail.length = Some(length - at);
        self.length = Some(at);
        Ok(tail)
    }

    /// Returns another bucket over the same bytes, sharing the backing data.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotImplemented`] for pipes and sockets.
    pub fn copy(&self) -> Result<Bucket<'a>, BucketError> {
        let kind = match &self.kind {
            Kind::Immortal(data) => Kind::Immortal(*data),
            Kind::Transient(data) => Kind::Transient(*data),
            Kind::Heap(buffer) => Kind::Heap(Rc::clone(buffer)),
            #[cfg(feature = "mmap")]
            Kind::Mmap(map) => Kind::Mmap(map.clone()),
            Kind::File(shared) => Kind::File(Rc::clone(shared)),
            Kind::Eos => Kind::Eos,
            Kind::Flush => Kind::Flush,
            Kind::Pipe(_) | Kind::Socket(_) => {
                return Err(BucketError::NotImplemented("copy", self.kind()));
            }
        };
        Ok(Bucket {
            start: self.start,
            length: self.length,
            kind,
        })
    }

    /// Makes sure the bucket stays valid for as long as `pool` exists.
    ///
    /// Transient buckets copy their bytes to the heap. Files and memory maps
    /// are moved to `pool`, unless the pool they belong to already outlives
    /// it. For the rest, this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotImplemented`] for pipes and sockets, and
    /// [`BucketError::Released`] if the backing storage is gone. Errors of
    /// duplicating a file handle are returned as is.
    pub fn set_aside(&mut self, pool: &Pool) -> io::Result<()> {
        if let Kind::Transient(data) = self.kind {
            *self = Bucket::heap(self.span(data));
            return Ok(());
        }
        match &mut self.kind {
            Kind::Transient(_) => unreachable!("bucket: transient set aside above"),
            #[cfg(feature = "mmap")]
            Kind::Mmap(map) => mmap::set_aside(map, pool),
            Kind::File(shared) => shared.set_aside(pool),
            Kind::Pipe(_) | Kind::Socket(_) => {
                Err(BucketError::NotImplemented("set_aside", self.kind()).into())
            }
            Kind::Immortal(_) | Kind::Heap(_) | Kind::Eos | Kind::Flush => Ok(()),
        }
    }

    /// Converts the bucket into one not borrowing anything, copying the
    /// bytes of a transient bucket to the heap.
    #[must_use]
    pub fn into_owned(self) -> Bucket<'static> {
        let Bucket {
            start,
            length,
            kind,
        } = self;
        let kind = match kind {
            Kind::Transient(data) => {
                return Bucket::heap(&data[start..start + length.unwrap_or(0)]);
            }
            Kind::Immortal(data) => Kind::Immortal(data),
            Kind::Heap(buffer) => Kind::Heap(buffer),
            #[cfg(feature = "mmap")]
            Kind::Mmap(map) => Kind::Mmap(map),
            Kind::File(shared) => Kind::File(shared),
            Kind::Pipe(source) => Kind::Pipe(source),
            Kind::Socket(source) => Kind::Socket(source),
            Kind::Eos => Kind::Eos,
            Kind::Flush => Kind::Flush,
        };
        Bucket {
            start,
            length,
            kind,
        }
    }
}

impl fmt::Debug for Bucket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("kind", &self.kind())
            .field("start", &self.start)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
