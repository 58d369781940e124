//! Heap buckets over reference-counted buffers.

use core::{fmt, mem};
use std::rc::Rc;

use super::{Bucket, Kind};
use crate::allocator::CellBuf;

/// A buffer shared by heap buckets. It may be larger than the bytes in use,
/// in which case a bucket holding the only reference can grow into the rest.
pub(super) struct HeapBuffer {
    storage: Storage,
    /// Receives the buffer once the last bucket is gone.
    release: Option<Box<dyn FnOnce(Box<[u8]>)>>,
}

enum Storage {
    Boxed(Box<[u8]>),
    Cell(CellBuf),
}

impl HeapBuffer {
    #[inline(always)]
    pub(super) fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Boxed(data) => data,
            Storage::Cell(data) => data,
        }
    }

    #[inline(always)]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Boxed(data) => data,
            Storage::Cell(data) => data,
        }
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        if let (Some(release), Storage::Boxed(data)) = (self.release.take(), &mut self.storage) {
            release(mem::take(data));
        }
    }
}

impl fmt::Debug for HeapBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBuffer")
            .field("capacity", &self.as_slice().len())
            .field("release", &self.release.is_some())
            .finish()
    }
}

impl<'a> Bucket<'a> {
    /// Creates a heap bucket holding a copy of `data`.
    #[inline(always)]
    #[must_use]
    pub fn heap(data: &[u8]) -> Bucket<'a> {
        Bucket::heap_adopt(data)
    }

    /// Creates a heap bucket taking over `data` without copying.
    #[must_use]
    pub fn heap_adopt(data: impl Into<Box<[u8]>>) -> Bucket<'a> {
        let data = data.into();
        let length = data.len();
        Bucket::with_storage(Storage::Boxed(data), None, length)
    }

    /// Creates a heap bucket taking over `data`. Once the last bucket over
    /// the data is dropped, the data is passed to `release` instead of being
    /// deallocated.
    #[must_use]
    pub fn heap_with_release(
        data: Box<[u8]>,
        release: impl FnOnce(Box<[u8]>) + 'static,
    ) -> Bucket<'a> {
        let length = data.len();
        Bucket::with_storage(Storage::Boxed(data), Some(Box::new(release)), length)
    }

    /// Creates an empty heap bucket over a buffer that writes grow into.
    pub(crate) fn write_buffer(buffer: CellBuf) -> Bucket<'a> {
        Bucket::with_storage(Storage::Cell(buffer), None, 0)
    }

    /// Creates a heap bucket with the first `length` bytes of `data` in use.
    pub(super) fn heap_partial(data: Box<[u8]>, length: usize) -> Bucket<'a> {
        debug_assert!(length <= data.len());
        Bucket::with_storage(Storage::Boxed(data), None, length)
    }

    fn with_storage(
        storage: Storage,
        release: Option<Box<dyn FnOnce(Box<[u8]>)>>,
        length: usize,
    ) -> Bucket<'a> {
        Bucket {
            start: 0,
            length: Some(length),
            kind: Kind::Heap(Rc::new(HeapBuffer { storage, release })),
        }
    }

    /// Returns the unused space after the bytes of a heap bucket, if this
    /// bucket is the only one referencing the buffer. Buffers handed back to
    /// a release function are never written to.
    pub(crate) fn spare_capacity(&mut self) -> Option<&mut [u8]> {
        let Kind::Heap(buffer) = &mut self.kind else {
            return None;
        };
        let end = self.start + self.length?;
        let buffer = Rc::get_mut(buffer).filter(|buffer| buffer.release.is_none())?;
        Some(&mut buffer.as_mut_slice()[end..])
    }

    /// Appends `data` into the spare space of the buffer. Returns `false`,
    /// leaving the bucket unchanged, if it does not fit.
    pub(crate) fn extend_in_place(&mut self, data: &[u8]) -> bool {
        match self.spare_capacity() {
            Some(spare) if spare.len() >= data.len() => {
                spare[..data.len()].copy_from_slice(data);
            }
            _ => return false,
        }
        self.length = self.length.map(|length| length + data.len());
        true
    }
}
