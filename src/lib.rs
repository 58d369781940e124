//! Buckets and brigades: zero-copy byte streams.
//!
//! Data flowing through a program rarely sits in one place. Some of it is
//! a constant, some was just read from a socket, some is a region of a file
//! that has not been read at all yet. A [`Bucket`] is a uniform handle to
//! any of those, and a [`Brigade`] is an ordered sequence of buckets, so a
//! stream can be assembled, split and passed along without copying the
//! data, which is only read when someone actually needs the bytes.
//!
//! Lifetimes of backing storage are tied to a [`Pool`], a scope that runs
//! registered cleanups when cleared. Files are closed, memory maps are
//! invalidated and brigades are emptied together with their pool. Bucket
//! structures themselves come from a [`BucketAllocator`], a free-list
//! allocator of small cells carved out of larger blocks.
//!
//! Everything here is single-threaded: handles are reference-counted with
//! [`Rc`](std::rc::Rc), and nothing is [`Send`]. Use one pool, allocator and
//! set of brigades per thread.
//!
//! ```
//! use brigade::{Brigade, Bucket, BucketAllocator, Pool};
//!
//! let pool = Pool::new();
//! let allocator = BucketAllocator::new(&pool);
//! let mut bb = Brigade::new(&pool, &allocator);
//! bb.push_back(Bucket::immortal(b"hello, "));
//! bb.puts(None, "world")?;
//! assert_eq!(bb.flatten_to_vec()?, b"hello, world");
//! # Ok::<(), std::io::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::inline_always)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod allocator;
pub mod brigade;
pub mod bucket;
pub mod io;
pub mod pool;
pub mod ring;

#[doc(inline)]
pub use allocator::BucketAllocator;
#[doc(inline)]
pub use brigade::Brigade;
#[doc(inline)]
pub use bucket::{Bucket, BucketError, BucketKind, FileOptions, ReadMode, BUFFER_SIZE};
#[doc(inline)]
pub use pool::Pool;
