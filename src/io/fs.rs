//! Files scoped to a pool.
//!
//! Reads are positional and never move a file cursor, so any number of file
//! buckets can share one handle. With `libc` on unix, reads are done with
//! `pread` directly; otherwise, with a seek followed by a read.

use core::cell::{Cell, RefCell};
use std::{
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    pool::{Cleanup, Pool},
    BucketError,
};

#[cfg(not(all(feature = "libc", unix)))]
use std::io::{Read, Seek};

#[cfg(all(feature = "libc", unix))]
use std::os::fd::AsRawFd;

/// An open file belonging to a [`Pool`].
///
/// Handles are cheap to clone and refer to the same file. The file is closed
/// when the pool is cleared, when [`File::close`] is called, or when the last
/// handle is dropped, whichever comes first. Operations on a closed file fail
/// with [`BucketError::Released`].
#[derive(Clone)]
pub struct File(Rc<Inner>);

struct Inner {
    /// The open file, taken out when closed.
    file: RefCell<Option<fs::File>>,
    /// The path the file was opened with, if any.
    path: Option<PathBuf>,
    pool: Pool,
    /// The callback closing the file with the pool.
    cleanup: Cell<Option<Cleanup>>,
}

impl File {
    /// Opens a file for reading, closed when `pool` is cleared.
    ///
    /// # Errors
    ///
    /// Errors of opening the file are returned as is.
    pub fn open<P: AsRef<Path>>(path: P, pool: &Pool) -> io::Result<File> {
        let file = fs::File::open(&path)?;
        Ok(File::register(file, Some(path.as_ref().to_path_buf()), pool))
    }

    /// Takes over an open file, closed when `pool` is cleared.
    #[must_use]
    pub fn from_std(file: fs::File, pool: &Pool) -> File {
        File::register(file, None, pool)
    }

    fn register(file: fs::File, path: Option<PathBuf>, pool: &Pool) -> File {
        let inner = Rc::new(Inner {
            file: RefCell::new(Some(file)),
            path,
            pool: pool.clone(),
            cleanup: Cell::new(None),
        });
        let weak = Rc::downgrade(&inner);
        let cleanup = pool.register(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cleanup.set(None);
                inner.file.borrow_mut().take();
            }
        });
        inner.cleanup.set(Some(cleanup));
        File(inner)
    }

    /// Returns the path the file was opened with.
    #[inline(always)]
    #[must_use]
    pub fn name(&self) -> Option<&Path> {
        self.0.path.as_deref()
    }

    /// Returns the pool the file belongs to.
    #[inline(always)]
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.0.pool
    }

    /// Returns `true` until the file is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.file.borrow().is_some()
    }

    /// Returns the size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the file is closed, otherwise IO
    /// errors as is.
    pub fn size(&self) -> io::Result<u64> {
        self.with_std(|file| Ok(file.metadata()?.len()))
    }

    /// Reads into `buf` starting at `offset` of the file. Returns the number
    /// of bytes read, zero at the end of the file.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the file is closed, otherwise IO
    /// errors as is.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.with_std(|file| read_at(file, buf, offset))
    }

    /// Closes the file now. Closing a closed file is a no-op.
    pub fn close(&self) {
        if let Some(cleanup) = self.0.cleanup.take() {
            self.0.pool.cancel(cleanup);
        }
        self.0.file.borrow_mut().take();
    }

    /// Returns a handle to the same file that belongs to `pool` instead. The
    /// file descriptor is duplicated, so this handle stays open until its
    /// own pool is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the file is closed, otherwise
    /// errors of duplicating the descriptor as is.
    pub fn set_aside(&self, pool: &Pool) -> io::Result<File> {
        let file = self.with_std(fs::File::try_clone)?;
        Ok(File::register(file, self.0.path.clone(), pool))
    }

    /// Calls `f` with the open file.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Released`] if the file is closed, otherwise
    /// whatever `f` returns.
    pub fn with_std<R>(&self, f: impl FnOnce(&fs::File) -> io::Result<R>) -> io::Result<R> {
        match self.0.file.borrow().as_ref() {
            Some(file) => f(file),
            None => Err(BucketError::Released.into()),
        }
    }
}

#[cfg(all(feature = "libc", unix))]
fn read_at(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    loop {
        // SAFETY: The buffer is valid for writes of its length.
        let ret = unsafe {
            // Offsets past `off_t::MAX` are rejected by the kernel.
            #[allow(clippy::cast_possible_wrap)]
            libc::pread(
                file.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                offset as libc::off_t,
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
            unreachable!("pread: unexpected return {ret}")
        }
    }
}

#[cfg(not(all(feature = "libc", unix)))]
fn read_at(mut file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.seek(io::SeekFrom::Start(offset))?;
    file.read(buf)
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            self.pool.cancel(cleanup);
        }
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.0.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
