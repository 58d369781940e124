//! File buckets.
//!
//! A file bucket refers to a region of an open [`File`]. Reading it reads at
//! most [`FileOptions::read_size`] bytes into a heap bucket, or, if memory
//! mapping is enabled and the region is large enough, maps up to
//! [`FileOptions::mmap_limit`] bytes and becomes a memory-mapped bucket
//! instead. Either way, the rest of the region is returned as a new file
//! bucket.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("file buckets work only on 64-bit platforms");

use core::cell::{Cell, RefCell};
use std::{io, rc::Rc};

use super::{Bucket, BucketError, Kind, BUFFER_SIZE};
use crate::{io::File, pool::Pool};

#[cfg(feature = "mmap")]
use crate::io::Mmap;

/// The largest region mapped by a single read.
pub const MMAP_LIMIT: usize = 4 * 1024 * 1024;

/// How file buckets read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FileOptions {
    /// Whether reads may memory-map the file. Without the `mmap` feature,
    /// this has no effect.
    pub mmap: bool,
    /// Regions shorter than this are read into the heap instead of mapped.
    pub mmap_threshold: usize,
    /// The most bytes mapped by a single read.
    pub mmap_limit: usize,
    /// The most bytes read into the heap by a single read.
    pub read_size: usize,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            mmap: cfg!(feature = "mmap"),
            mmap_threshold: 1,
            mmap_limit: MMAP_LIMIT,
            read_size: BUFFER_SIZE,
        }
    }
}

/// File state shared by the buckets split or copied from one file bucket.
pub(super) struct FileShared {
    file: RefCell<File>,
    /// The pool memory maps are created in.
    readpool: RefCell<Pool>,
    options: Cell<FileOptions>,
}

impl FileShared {
    /// Re-homes the file into `pool`, unless its pool outlives `pool`.
    pub(super) fn set_aside(&self, pool: &Pool) -> io::Result<()> {
        let file = self.file.borrow().clone();
        if file.pool().is_ancestor_of(pool) {
            return Ok(());
        }
        if !self.readpool.borrow().is_ancestor_of(pool) {
            *self.readpool.borrow_mut() = pool.clone();
        }
        *self.file.borrow_mut() = file.set_aside(pool)?;
        Ok(())
    }
}

impl<'a> Bucket<'a> {
    /// Creates a bucket over `length` bytes of `file` starting at `offset`,
    /// reading with default [`FileOptions`]. Memory maps of the file are
    /// created in `pool`.
    #[inline(always)]
    #[must_use]
    pub fn file(file: File, offset: u64, length: usize, pool: &Pool) -> Bucket<'a> {
        Bucket::file_with_options(file, offset, length, pool, FileOptions::default())
    }

    /// Creates a file bucket reading with `options`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn file_with_options(
        file: File,
        offset: u64,
        length: usize,
        pool: &Pool,
        options: FileOptions,
    ) -> Bucket<'a> {
        Bucket {
            start: offset as usize,
            length: Some(length),
            kind: Kind::File(Rc::new(FileShared {
                file: RefCell::new(file),
                readpool: RefCell::new(pool.clone()),
                options: Cell::new(options),
            })),
        }
    }

    /// Enables or disables memory mapping on reads of a file bucket and the
    /// buckets sharing its file.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotImplemented`] if this is not a file bucket,
    /// or if mapping is enabled without the `mmap` feature.
    pub fn set_mmap_enabled(&mut self, enabled: bool) -> Result<(), BucketError> {
        match &self.kind {
            Kind::File(shared) if !enabled || cfg!(feature = "mmap") => {
                shared.options.set(FileOptions {
                    mmap: enabled,
                    ..shared.options.get()
                });
                Ok(())
            }
            _ => Err(BucketError::NotImplemented("set_mmap_enabled", self.kind())),
        }
    }

    /// Sets the most bytes a read of a file bucket places on the heap.
    /// Sizes below [`BUFFER_SIZE`] are raised to it.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotImplemented`] if this is not a file bucket.
    pub fn set_read_size(&mut self, size: usize) -> Result<(), BucketError> {
        let Kind::File(shared) = &self.kind else {
            return Err(BucketError::NotImplemented("set_read_size", self.kind()));
        };
        shared.options.set(FileOptions {
            read_size: size.max(BUFFER_SIZE),
            ..shared.options.get()
        });
        Ok(())
    }

    pub(super) fn read_file(&mut self) -> io::Result<Option<Bucket<'a>>> {
        let (Kind::File(shared), Some(length)) = (&self.kind, self.length) else {
            unreachable!("bucket: not a file bucket");
        };
        let shared = Rc::clone(shared);

        #[cfg(feature = "mmap")]
        if let Some(rest) = self.promote_to_mmap(&shared, length) {
            return Ok(rest);
        }

        let file = shared.file.borrow().clone();
        let size = length.min(shared.options.get().read_size);
        let mut buf = vec![0; size];
        let mut filled = 0;
        let mut eof = false;
        while filled < size {
            match file.read_at(&mut buf[filled..], (self.start + filled) as u64) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        buf.truncate(filled);

        let rest = (!eof && filled < length).then(|| Bucket {
            start: self.start + filled,
            length: Some(length - filled),
            kind: Kind::File(shared),
        });
        *self = Bucket::heap_adopt(buf);
        Ok(rest)
    }

    /// Turns the bucket into a memory-mapped one, if the options allow it.
    /// Returns `None` if the region should be read instead.
    #[cfg(feature = "mmap")]
    fn promote_to_mmap(
        &mut self,
        shared: &Rc<FileShared>,
        length: usize,
    ) -> Option<Option<Bucket<'a>>> {
        let options = shared.options.get();
        if !options.mmap || length < options.mmap_threshold {
            return None;
        }
        // Pages past the end of the file cannot be touched.
        let size = shared.file.borrow().size().ok()?;
        let available =
            usize::try_from(size.saturating_sub(self.start as u64)).unwrap_or(usize::MAX);
        let span = length.min(options.mmap_limit).min(available);
        if span == 0 {
            return None;
        }
        let pool = shared.readpool.borrow().clone();
        let map = match Mmap::create(&shared.file.borrow(), self.start as u64, span, &pool) {
            Ok(map) => map,
            Err(err) => {
                tracing::debug!(%err, offset = self.start, span, "file bucket: mmap failed, reading instead");
                return None;
            }
        };
        tracing::trace!(offset = self.start, span, "file bucket: mapped");
        let rest = (span < length.min(available)).then(|| Bucket {
            start: self.start + span,
            length: Some(length - span),
            kind: Kind::File(Rc::clone(shared)),
        });
        *self = Bucket::mmap(map);
        Some(rest)
    }
}
