//! Read-only memory maps scoped to a pool.

use core::cell::Cell;
use std::{io, rc::Rc};

use super::File;
use crate::{
    pool::{Cleanup, Pool},
    BucketError,
};

/// A read-only memory map of a file region belonging to a [`Pool`].
///
/// Handles are cheap to clone and refer to the same mapping. When the pool is
/// cleared or [`Mmap::delete`] is called, the mapping is invalidated, and all
/// further resolves fail with [`BucketError::Released`]. The region itself
/// is unmapped once no handle refers to it anymore.
#[derive(Clone)]
pub struct Mmap(Rc<Inner>);

struct Inner {
    map: Rc<memmap2::Mmap>,
    live: Cell<bool>,
    pool: Pool,
    cleanup: Cell<Option<Cleanup>>,
}

impl Mmap {
    /// Maps `len` bytes of `file` starting at `offset`. The mapping is
    /// invalidated when `pool` is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the file is closed, otherwise
    /// errors of mapping the file as is. Mapping zero bytes is an error.
    pub fn create(file: &File, offset: u64, len: usize, pool: &Pool) -> io::Result<Mmap> {
        let map = file.with_std(|file| {
            // SAFETY: The mapping is read-only. Changes to the file made by
            // other processes while it is mapped are visible in the slices.
            unsafe {
                memmap2::MmapOptions::new()
                    .offset(offset)
                    .len(len)
                    .map(file)
            }
        })?;
        Ok(Mmap::register(Rc::new(map), pool))
    }

    fn register(map: Rc<memmap2::Mmap>, pool: &Pool) -> Mmap {
        let inner = Rc::new(Inner {
            map,
            live: Cell::new(true),
            pool: pool.clone(),
            cleanup: Cell::new(None),
        });
        let weak = Rc::downgrade(&inner);
        let cleanup = pool.register(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cleanup.set(None);
                inner.live.set(false);
            }
        });
        inner.cleanup.set(Some(cleanup));
        Mmap(inner)
    }

    /// Returns a handle to the same region that belongs to `pool` instead.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the mapping is invalidated.
    pub fn duplicate_into(&self, pool: &Pool) -> io::Result<Mmap> {
        if !self.is_live() {
            return Err(BucketError::Released.into());
        }
        Ok(Mmap::register(Rc::clone(&self.0.map), pool))
    }

    /// Invalidates the mapping now.
    pub fn delete(&self) {
        if let Some(cleanup) = self.0.cleanup.take() {
            self.0.pool.cancel(cleanup);
        }
        self.0.live.set(false);
    }

    /// Returns `len` bytes starting at `offset` of the mapping.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the mapping is invalidated, and
    /// [`BucketError::OffsetOutOfRange`] if the range is past its end.
    pub fn resolve(&self, offset: usize, len: usize) -> io::Result<&[u8]> {
        if !self.is_live() {
            return Err(BucketError::Released.into());
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(&self.0.map[offset..end]),
            _ => Err(BucketError::OffsetOutOfRange {
                offset: offset.saturating_add(len),
                length: self.len(),
            }
            .into()),
        }
    }

    /// Returns `true` until the mapping is invalidated.
    #[inline(always)]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.0.live.get()
    }

    /// Returns the size of the mapping in bytes.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.map.len()
    }

    /// Returns `true` if the mapping has no bytes.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the pool the mapping belongs to.
    #[inline(always)]
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.0.pool
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            self.pool.cancel(cleanup);
        }
    }
}

impl core::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mmap")
            .field("len", &self.len())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
