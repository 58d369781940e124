//! The IO buckets read from.
//!
//! Files and memory maps belong to a [`Pool`](crate::Pool): when the pool is
//! cleared, files are closed and memory maps are invalidated, and buckets
//! referring to them fail to read with
//! [`BucketError::Released`](crate::BucketError::Released). Pipes and sockets
//! are anything implementing [`Source`].

mod fs;
#[cfg(feature = "mmap")]
mod mmap;
#[cfg(all(unix, feature = "libc"))]
mod pipe;
mod source;

pub use fs::File;
#[cfg(feature = "mmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "mmap")))]
pub use mmap::Mmap;
#[cfg(all(unix, feature = "libc"))]
#[cfg_attr(docsrs, doc(cfg(all(unix, feature = "libc"))))]
pub use pipe::{pipe, Pipe, PipeWriter};
pub use source::Source;
