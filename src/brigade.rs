//! Brigades: ordered sequences of buckets.
//!
//! A [`Brigade`] is a [`Ring`] of buckets belonging to a [`Pool`]. Buckets
//! move in and out of brigades in constant time, and whole brigades are
//! concatenated and split without touching the data.
//!
//! Reading a bucket inside a brigade may produce a successor bucket for the
//! rest of its data. [`Cursor::read`] links it right after the bucket read,
//! so a brigade always describes the whole stream:
//!
//! ```text
//!   before:  [HEAP "GET "] [FILE 0..20000] [EOS]
//!   read 1:  [HEAP "GET "] [HEAP 0..8000] [FILE 8000..20000] [EOS]
//! ```
//!
//! # Scope
//!
//! When the pool is cleared, the brigade is emptied. Buckets may borrow data
//! for `'a`, so they cannot be dropped from within the pool's cleanup. The
//! cleanup only marks the brigade released: from then on it reports itself
//! empty, and its buckets are dropped by the next call that takes it mutably,
//! which also re-registers the brigade with the pool.
//!
//! # Writing
//!
//! The write family appends bytes at the tail. Small writes are copied into a
//! write buffer of [`BUFFER_SIZE`] bytes, a heap bucket allocated from the
//! brigade's [`BucketAllocator`], and consecutive writes grow it in place.
//! Data larger than a write buffer is not copied into one. Callers may pass a
//! flush callback, which is invoked when a full write buffer is left behind or
//! large data is appended, so that the brigade can be passed downstream and
//! emptied instead of growing.

use core::{cell::Cell, fmt, mem};
use std::{io, rc::Rc};

use crate::{
    allocator::{BucketAllocator, CellBuf},
    bucket::BUFFER_SIZE,
    io::File,
    pool::{Cleanup, Pool},
    ring::{self, Ring},
    Bucket, BucketError, ReadMode,
};

/// The largest file region a single file bucket inserted by
/// [`Brigade::insert_file`] covers.
pub const MAX_FILE_BUCKET: usize = 1 << 30;

/// A callback passing a brigade downstream, used by the write family.
pub type Flush<'f, 'a> = &'f mut dyn FnMut(&mut Brigade<'a>) -> io::Result<()>;

/// An ordered sequence of buckets.
///
/// See the [module documentation](self) for an overview.
pub struct Brigade<'a> {
    buckets: Ring<Bucket<'a>>,
    pool: Pool,
    /// Set by the pool cleanup.
    released: Rc<Cell<bool>>,
    cleanup: Option<Cleanup>,
}

impl<'a> Brigade<'a> {
    /// Creates an empty brigade belonging to `pool`, with bucket nodes and
    /// write buffers allocated from `allocator`.
    #[must_use]
    pub fn new(pool: &Pool, allocator: &BucketAllocator) -> Brigade<'a> {
        Brigade::from_ring(pool, Ring::new_in(allocator))
    }

    fn from_ring(pool: &Pool, buckets: Ring<Bucket<'a>>) -> Brigade<'a> {
        let released = Rc::new(Cell::new(false));
        let cleanup = Brigade::register(pool, &released);
        Brigade {
            buckets,
            pool: pool.clone(),
            released,
            cleanup: Some(cleanup),
        }
    }

    fn register(pool: &Pool, released: &Rc<Cell<bool>>) -> Cleanup {
        let released = Rc::clone(released);
        pool.register(move || released.set(true))
    }

    /// Drops the buckets of a released brigade.
    fn settle(&mut self) {
        if self.released.replace(false) {
            tracing::trace!(buckets = self.buckets.len(), "brigade: released with its pool");
            self.buckets.clear();
            self.cleanup = Some(Brigade::register(&self.pool, &self.released));
        }
    }

    /// Returns the pool the brigade belongs to.
    #[inline(always)]
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Returns the allocator bucket nodes and write buffers come from.
    #[inline(always)]
    #[must_use]
    pub fn allocator(&self) -> &BucketAllocator {
        self.buckets.allocator()
    }

    /// Drops all buckets. The brigade stays usable.
    pub fn cleanup(&mut self) {
        self.settle();
        self.buckets.clear();
    }

    /// Drops all buckets and the brigade, detaching it from its pool.
    #[inline(always)]
    pub fn destroy(mut self) {
        self.cleanup();
    }

    /// Returns the number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.released.get() {
            0
        } else {
            self.buckets.len()
        }
    }

    /// Returns `true` if the brigade has no buckets.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the first bucket.
    #[must_use]
    pub fn front(&self) -> Option<&Bucket<'a>> {
        self.iter().next()
    }

    /// Returns the last bucket.
    #[must_use]
    pub fn back(&self) -> Option<&Bucket<'a>> {
        self.iter().next_back()
    }

    /// Returns the first bucket, mutably.
    pub fn front_mut(&mut self) -> Option<&mut Bucket<'a>> {
        self.settle();
        self.buckets.front_mut()
    }

    /// Returns the last bucket, mutably.
    pub fn back_mut(&mut self) -> Option<&mut Bucket<'a>> {
        self.settle();
        self.buckets.back_mut()
    }

    /// Appends a bucket at the tail.
    pub fn push_back(&mut self, bucket: Bucket<'a>) {
        self.settle();
        self.buckets.push_back(bucket);
    }

    /// Inserts a bucket at the head.
    pub fn push_front(&mut self, bucket: Bucket<'a>) {
        self.settle();
        self.buckets.push_front(bucket);
    }

    /// Removes the first bucket.
    pub fn pop_front(&mut self) -> Option<Bucket<'a>> {
        self.settle();
        self.buckets.pop_front()
    }

    /// Removes the last bucket.
    pub fn pop_back(&mut self) -> Option<Bucket<'a>> {
        self.settle();
        self.buckets.pop_back()
    }

    /// Returns an iterator over the buckets, from head to tail.
    pub fn iter(&self) -> core::iter::Take<ring::Iter<'_, Bucket<'a>>> {
        self.buckets.iter().take(self.len())
    }

    /// Returns an iterator over the buckets that allows modifying them.
    pub fn iter_mut(&mut self) -> ring::IterMut<'_, Bucket<'a>> {
        self.settle();
        self.buckets.iter_mut()
    }

    /// Returns a cursor at the first bucket, or at the ghost position if the
    /// brigade is empty.
    pub fn cursor_front_mut(&mut self) -> Cursor<'_, 'a> {
        self.settle();
        Cursor {
            inner: self.buckets.cursor_front_mut(),
        }
    }

    /// Moves all buckets of `other` to the tail of this brigade.
    pub fn concat(&mut self, other: &mut Brigade<'a>) {
        self.settle();
        other.settle();
        self.buckets.append(&mut other.buckets);
    }

    /// Moves all buckets of `other` to the head of this brigade.
    pub fn prepend(&mut self, other: &mut Brigade<'a>) {
        self.settle();
        other.settle();
        self.buckets.prepend(&mut other.buckets);
    }

    /// Splits the brigade before the bucket at `index`. Returns a new brigade
    /// with the same pool and allocator holding that bucket and all after it.
    /// Splitting at the length returns an empty brigade.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the length.
    #[must_use]
    pub fn split_at(&mut self, index: usize) -> Brigade<'a> {
        self.settle();
        let tail = self.buckets.split_off(index);
        Brigade::from_ring(&self.pool, tail)
    }

    /// Like [`Brigade::split_at`], but moves the buckets into `dest`, which
    /// is emptied first.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the length.
    pub fn split_into(&mut self, index: usize, dest: &mut Brigade<'a>) {
        self.settle();
        dest.cleanup();
        let mut tail = self.buckets.split_off(index);
        dest.buckets.append(&mut tail);
    }

    /// Makes sure that a bucket boundary falls exactly `offset` bytes into
    /// the brigade, and returns the index of the bucket starting there. If
    /// `offset` is the total length, the index is the length of the brigade.
    ///
    /// Buckets that cannot be split, pipes and sockets, are read first.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotFound`] if the brigade has fewer bytes than
    /// `offset`, or an end-of-stream bucket comes before it. Errors of
    /// reading buckets are returned as is.
    pub fn partition(&mut self, offset: usize) -> io::Result<usize> {
        if offset == 0 {
            self.settle();
            return Ok(0);
        }
        let mut point = offset;
        let mut index = 0;
        let mut cursor = self.cursor_front_mut();
        while let Some(bucket) = cursor.inner.current() {
            if bucket.is_eos() {
                return Err(BucketError::NotFound.into());
            }
            if bucket.length().map_or(true, |length| point < length) {
                match bucket.split(point) {
                    Ok(tail) => {
                        cursor.inner.insert_after(tail);
                        return Ok(index + 1);
                    }
                    Err(BucketError::NotImplemented(..)) => {}
                    Err(err) => return Err(err.into()),
                }
                cursor.read(ReadMode::Block)?;
                if point < cursor.current_length() {
                    cursor.split(point)?;
                    return Ok(index + 1);
                }
            }
            let length = cursor.current_length();
            if point == length {
                return Ok(index + 1);
            }
            point -= length;
            index += 1;
            cursor.move_next();
        }
        Err(BucketError::NotFound.into())
    }

    /// Returns the total number of bytes in the brigade.
    ///
    /// If a bucket's length is unknown, `None` is returned, unless `read_all`
    /// is set, in which case such buckets are read until their length is
    /// known. Reading links successor buckets into the brigade.
    ///
    /// # Errors
    ///
    /// Errors of reading buckets are returned as is.
    pub fn length(&mut self, read_all: bool) -> io::Result<Option<usize>> {
        let mut total = 0;
        let mut cursor = self.cursor_front_mut();
        while let Some(bucket) = cursor.inner.current() {
            if bucket.length().is_none() {
                if !read_all {
                    return Ok(None);
                }
                cursor.read(ReadMode::Block)?;
            }
            total += cursor.current_length();
            cursor.move_next();
        }
        Ok(Some(total))
    }

    /// Copies the bytes of the brigade into `buf`, reading buckets as needed.
    /// Returns the number of bytes copied, which is less than the length of
    /// `buf` only if the brigade has fewer bytes. The buckets stay in place.
    ///
    /// # Errors
    ///
    /// Errors of reading buckets are returned as is.
    pub fn flatten(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        let mut cursor = self.cursor_front_mut();
        while filled < buf.len() && !cursor.is_ghost() {
            let data = cursor.read(ReadMode::Block)?;
            let n = data.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&data[..n]);
            filled += n;
            cursor.move_next();
        }
        Ok(filled)
    }

    /// Returns all bytes of the brigade, reading every bucket.
    ///
    /// # Errors
    ///
    /// Errors of reading buckets are returned as is.
    pub fn flatten_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let total = self.length(true)?.unwrap_or_default();
        let mut buf = vec![0; total];
        let n = self.flatten(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Moves the buckets up to and including the first line feed to the tail
    /// of `out`, splitting the bucket holding it.
    ///
    /// Small buckets without a line feed are copied into `out`'s write
    /// buffer and dropped; metadata and buckets larger than a quarter of
    /// [`BUFFER_SIZE`] are moved as is. Without a line feed, the search stops
    /// once `max_bytes` bytes have been moved, or the brigade is empty.
    ///
    /// # Errors
    ///
    /// Errors of reading buckets are returned as is; with
    /// [`ReadMode::NonBlock`], that includes [`io::ErrorKind::WouldBlock`].
    /// Buckets moved before the error stay in `out`.
    pub fn split_line(
        &mut self,
        out: &mut Brigade<'a>,
        mode: ReadMode,
        max_bytes: usize,
    ) -> io::Result<()> {
        let mut moved = 0;
        loop {
            let mut cursor = self.cursor_front_mut();
            let Some(metadata) = cursor.current().map(|bucket| bucket.is_metadata()) else {
                return Ok(());
            };
            let data = cursor.read(mode)?;
            let len = data.len();
            if let Some(pos) = data.iter().position(|&byte| byte == b'\n') {
                cursor.split(pos + 1)?;
                if let Some(line) = cursor.remove_current() {
                    out.push_back(line);
                }
                return Ok(());
            }
            if metadata || len > BUFFER_SIZE / 4 {
                if let Some(bucket) = cursor.remove_current() {
                    out.push_back(bucket);
                }
            } else {
                if len > 0 {
                    out.put(None, data)?;
                }
                drop(cursor.remove_current());
            }
            moved += len;
            if moved >= max_bytes {
                return Ok(());
            }
        }
    }

    /// Returns the bytes of up to `max` buckets from the head, for vectored
    /// writes. Buckets are read without blocking first.
    ///
    /// # Errors
    ///
    /// Errors of reading buckets are returned as is, including
    /// [`io::ErrorKind::WouldBlock`] for pipes and sockets without data.
    pub fn to_iovec(&mut self, max: usize) -> io::Result<Vec<io::IoSlice<'_>>> {
        let mut cursor = self.cursor_front_mut();
        for _ in 0..max {
            if cursor.is_ghost() {
                break;
            }
            cursor.read(ReadMode::NonBlock)?;
            cursor.move_next();
        }
        self.buckets
            .iter()
            .take(max)
            .map(|bucket| {
                bucket
                    .bytes()
                    .map(io::IoSlice::new)
                    .ok_or_else(|| io::Error::from(BucketError::Released))
            })
            .collect()
    }

    /// Appends file buckets for `length` bytes of `file` starting at
    /// `offset`. Regions larger than [`MAX_FILE_BUCKET`] are covered by
    /// several buckets.
    pub fn insert_file(&mut self, file: File, offset: u64, length: usize, pool: &Pool) {
        self.settle();
        let mut bucket = Bucket::file(file, offset, length, pool);
        while bucket.length().is_some_and(|length| length > MAX_FILE_BUCKET) {
            match bucket.split(MAX_FILE_BUCKET) {
                Ok(tail) => self.buckets.push_back(mem::replace(&mut bucket, tail)),
                Err(err) => unreachable!("brigade: file bucket split failed: {err}"),
            }
        }
        self.buckets.push_back(bucket);
    }

    /// Sets aside every bucket into `pool`, see [`Bucket::set_aside`].
    ///
    /// # Errors
    ///
    /// The first error of setting aside a bucket is returned as is. Buckets
    /// before it are set aside.
    pub fn set_aside(&mut self, pool: &Pool) -> io::Result<()> {
        self.iter_mut().try_for_each(|bucket| bucket.set_aside(pool))
    }

    /// Converts the brigade into one not borrowing anything, see
    /// [`Bucket::into_owned`].
    #[must_use]
    pub fn into_owned(mut self) -> Brigade<'static> {
        self.settle();
        let mut owned = Brigade::new(&self.pool, self.buckets.allocator());
        while let Some(bucket) = self.buckets.pop_front() {
            owned.buckets.push_back(bucket.into_owned());
        }
        owned
    }

    /// Appends `data` at the tail.
    ///
    /// Data that fits the tail write buffer is copied into it. Otherwise,
    /// with a flush callback, data that is larger than a write buffer or
    /// would leave a full write buffer behind is appended as a transient
    /// bucket and the callback is invoked. Without one, it is copied as
    /// [`Brigade::put`] does.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::OutOfMemory`] if a write buffer cannot be
    /// allocated, and whatever the flush callback returns.
    pub fn write(&mut self, flush: Option<Flush<'_, 'a>>, data: &'a [u8]) -> io::Result<()> {
        self.settle();
        if let Some(flush) = flush {
            let spare = self.tail_spare();
            let fits = spare.is_some_and(|spare| spare >= data.len());
            if !fits && (data.len() > BUFFER_SIZE || spare.is_some()) {
                self.buckets.push_back(Bucket::transient(data));
                return flush(self);
            }
            return self.put(Some(flush), data);
        }
        self.put(None, data)
    }

    /// Appends each of `data` at the tail. If together they are larger than
    /// a write buffer, they are appended as buckets of their own: transient
    /// with a flush callback, which is then invoked, copies on the heap
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::OutOfMemory`] if a write buffer cannot be
    /// allocated, and whatever the flush callback returns.
    pub fn writev(&mut self, flush: Option<Flush<'_, 'a>>, data: &[&'a [u8]]) -> io::Result<()> {
        self.settle();
        let total: usize = data.iter().map(|data| data.len()).sum();
        if total > BUFFER_SIZE {
            if let Some(flush) = flush {
                for &data in data {
                    self.buckets.push_back(Bucket::transient(data));
                }
                return flush(self);
            }
            for data in data {
                self.buckets.push_back(Bucket::heap(data));
            }
            return Ok(());
        }
        let mut retired = false;
        for data in data {
            retired |= self.copy_in(data)?;
        }
        self.flush_if(flush, retired)
    }

    /// Copies `data` to the tail. The bytes are never borrowed.
    ///
    /// The flush callback is invoked after a full write buffer is left
    /// behind, or data larger than a write buffer is copied.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::OutOfMemory`] if a write buffer cannot be
    /// allocated, and whatever the flush callback returns.
    pub fn put(&mut self, flush: Option<Flush<'_, 'a>>, data: &[u8]) -> io::Result<()> {
        self.settle();
        let retired = self.copy_in(data)?;
        self.flush_if(flush, retired)
    }

    /// Copies a string to the tail, see [`Brigade::put`].
    ///
    /// # Errors
    ///
    /// See [`Brigade::put`].
    #[inline(always)]
    pub fn puts(&mut self, flush: Option<Flush<'_, 'a>>, s: &str) -> io::Result<()> {
        self.put(flush, s.as_bytes())
    }

    /// Copies a single byte to the tail, see [`Brigade::put`].
    ///
    /// # Errors
    ///
    /// See [`Brigade::put`].
    #[inline(always)]
    pub fn putc(&mut self, flush: Option<Flush<'_, 'a>>, byte: u8) -> io::Result<()> {
        self.put(flush, &[byte])
    }

    /// Copies strings to the tail, in order, see [`Brigade::put`].
    ///
    /// # Errors
    ///
    /// See [`Brigade::put`].
    pub fn putstrs(&mut self, flush: Option<Flush<'_, 'a>>, strs: &[&str]) -> io::Result<()> {
        self.settle();
        let mut retired = false;
        for s in strs {
            retired |= self.copy_in(s.as_bytes())?;
        }
        self.flush_if(flush, retired)
    }

    /// Formats `args` into the tail, see [`Brigade::put`]. Use with
    /// [`format_args!`].
    ///
    /// # Errors
    ///
    /// See [`Brigade::put`]. A formatting trait implementation returning an
    /// error fails with [`io::ErrorKind::Other`].
    pub fn printf(&mut self, flush: Option<Flush<'_, 'a>>, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.settle();
        let mut printf = Printf {
            brigade: &mut *self,
            retired: false,
            error: None,
        };
        let result = fmt::write(&mut printf, args);
        let Printf { retired, error, .. } = printf;
        if let Some(err) = error {
            return Err(err);
        }
        if result.is_err() {
            return Err(io::Error::other("brigade: formatter error"));
        }
        self.flush_if(flush, retired)
    }

    /// Copies `data` into the tail write buffer, starting a new one if it
    /// does not fit. Returns `true` if a write buffer was left behind, or
    /// the data did not go into one.
    fn copy_in(&mut self, data: &[u8]) -> io::Result<bool> {
        if data.is_empty() {
            return Ok(false);
        }
        let spare = self.tail_spare();
        if let Some(tail) = self.buckets.back_mut() {
            if tail.extend_in_place(data) {
                return Ok(false);
            }
        }
        if data.len() > BUFFER_SIZE {
            self.buckets.push_back(Bucket::heap(data));
            return Ok(true);
        }
        let buffer =
            CellBuf::zeroed(self.buckets.allocator(), BUFFER_SIZE).ok_or(BucketError::OutOfMemory)?;
        let mut bucket = Bucket::write_buffer(buffer);
        bucket.extend_in_place(data);
        self.buckets.push_back(bucket);
        Ok(spare.is_some())
    }

    /// Returns the spare space of the tail write buffer, if there is one.
    fn tail_spare(&mut self) -> Option<usize> {
        self.buckets
            .back_mut()
            .and_then(Bucket::spare_capacity)
            .map(|spare| spare.len())
    }

    fn flush_if(&mut self, flush: Option<Flush<'_, 'a>>, retired: bool) -> io::Result<()> {
        match flush {
            Some(flush) if retired => flush(self),
            _ => Ok(()),
        }
    }
}

/// Collects the output of [`Brigade::printf`].
struct Printf<'b, 'a> {
    brigade: &'b mut Brigade<'a>,
    retired: bool,
    error: Option<io::Error>,
}

impl fmt::Write for Printf<'_, '_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self.brigade.copy_in(s.as_bytes()) {
            Ok(retired) => {
                self.retired |= retired;
                Ok(())
            }
            Err(err) => {
                self.error = Some(err);
                Err(fmt::Error)
            }
        }
    }
}

impl fmt::Write for Brigade<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put(None, s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl io::Write for Brigade<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.put(None, buf)?;
        Ok(buf.len())
    }

    #[inline(always)]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Brigade<'_> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            self.pool.cancel(cleanup);
        }
    }
}

impl fmt::Debug for Brigade<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Brigade")
            .field("buckets", &self.iter().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<'b, 'a> IntoIterator for &'b Brigade<'a> {
    type Item = &'b Bucket<'a>;
    type IntoIter = core::iter::Take<ring::Iter<'b, Bucket<'a>>>;

    #[inline(always)]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> Extend<Bucket<'a>> for Brigade<'a> {
    fn extend<I: IntoIterator<Item = Bucket<'a>>>(&mut self, iter: I) {
        self.settle();
        self.buckets.extend(iter);
    }
}

/// A cursor over the buckets of a brigade, able to read, split and remove
/// them in place.
///
/// Besides the buckets, the cursor may point at the ghost position between
/// the tail and the head.
pub struct Cursor<'b, 'a> {
    inner: ring::CursorMut<'b, Bucket<'a>>,
}

impl<'b, 'a> Cursor<'b, 'a> {
    /// Returns the index of the current bucket, or `None` at the ghost.
    #[inline(always)]
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.inner.index()
    }

    /// Returns `true` at the ghost position.
    #[inline(always)]
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.inner.is_ghost()
    }

    /// Returns the current bucket.
    #[inline(always)]
    pub fn current(&mut self) -> Option<&mut Bucket<'a>> {
        self.inner.current()
    }

    /// Returns the bucket after the current one.
    #[inline(always)]
    pub fn peek_next(&mut self) -> Option<&mut Bucket<'a>> {
        self.inner.peek_next()
    }

    /// Moves to the next position.
    #[inline(always)]
    pub fn move_next(&mut self) {
        self.inner.move_next();
    }

    /// Moves to the previous position.
    #[inline(always)]
    pub fn move_prev(&mut self) {
        self.inner.move_prev();
    }

    /// Inserts a bucket after the current one.
    #[inline(always)]
    pub fn insert_after(&mut self, bucket: Bucket<'a>) {
        self.inner.insert_after(bucket);
    }

    /// Inserts a bucket before the current one.
    #[inline(always)]
    pub fn insert_before(&mut self, bucket: Bucket<'a>) {
        self.inner.insert_before(bucket);
    }

    /// Removes the current bucket and moves to the next one.
    #[inline(always)]
    pub fn remove_current(&mut self) -> Option<Bucket<'a>> {
        self.inner.remove_current()
    }

    /// Reads the current bucket, see [`Bucket::read`]. A successor bucket
    /// for the rest of the data is inserted right after it. At the ghost,
    /// nothing is read.
    ///
    /// # Errors
    ///
    /// See [`Bucket::read`].
    pub fn read(&mut self, mode: ReadMode) -> io::Result<&[u8]> {
        let rest = match self.inner.current() {
            Some(bucket) => bucket.materialize(mode)?,
            None => return Ok(&[]),
        };
        if let Some(rest) = rest {
            self.inner.insert_after(rest);
        }
        match self.inner.current() {
            Some(bucket) => Ok(bucket.read(mode)?.0),
            None => Ok(&[]),
        }
    }

    /// Splits the current bucket at `at`, inserting the rest after it, see
    /// [`Bucket::split`].
    ///
    /// # Errors
    ///
    /// See [`Bucket::split`]. At the ghost, [`BucketError::NotFound`] is
    /// returned.
    pub fn split(&mut self, at: usize) -> Result<(), BucketError> {
        let bucket = self.inner.current().ok_or(BucketError::NotFound)?;
        let tail = bucket.split(at)?;
        self.inner.insert_after(tail);
        Ok(())
    }

    /// Inserts a copy of the current bucket after it, see [`Bucket::copy`].
    ///
    /// # Errors
    ///
    /// See [`Bucket::copy`]. At the ghost, [`BucketError::NotFound`] is
    /// returned.
    pub fn copy_after(&mut self) -> Result<(), BucketError> {
        let bucket = self.inner.current().ok_or(BucketError::NotFound)?;
        let copy = bucket.copy()?;
        self.inner.insert_after(copy);
        Ok(())
    }

    fn current_length(&mut self) -> usize {
        self.inner
            .current()
            .and_then(|bucket| bucket.length())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Cursor<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("index", &self.index())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::collections::VecDeque;

    use super::*;
    use crate::{io::Source, BucketKind};

    fn setup() -> (Pool, BucketAllocator) {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        (pool, allocator)
    }

    /// Yields scripted chunks, then ends.
    struct Chunks(VecDeque<&'static [u8]>);

    impl io::Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.0.pop_front() else {
                return Ok(0);
            };
            assert!(chunk.len() <= buf.len(), "chunk fits the read buffer");
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    impl Source for Chunks {
        fn timeout(&self) -> io::Result<Option<Duration>> {
            Ok(None)
        }

        fn set_timeout(&mut self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn chunks(chunks: &[&'static [u8]]) -> Bucket<'static> {
        Bucket::pipe(Chunks(chunks.iter().copied().collect()))
    }

    fn kinds(bb: &Brigade<'_>) -> Vec<BucketKind> {
        bb.iter().map(Bucket::kind).collect()
    }

    #[test]
    fn brigade_flatten() {
        let (pool, allocator) = setup();
        let hello = b"hello".to_vec();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(Bucket::transient(&hello));
        bb.push_back(Bucket::immortal(b", "));
        bb.push_back(Bucket::heap(b"world"));
        assert_eq!(bb.len(), 3);

        let case = "exact buffer";
        let mut buf = [0; 12];
        assert_eq!(bb.flatten(&mut buf).expect(case), 12, "{case}");
        assert_eq!(&buf, b"hello, world", "{case}");

        let case = "short buffer";
        let mut buf = [0; 8];
        assert_eq!(bb.flatten(&mut buf).expect(case), 8, "{case}");
        assert_eq!(&buf, b"hello, w", "{case}");

        let case = "long buffer";
        let mut buf = [0; 64];
        assert_eq!(bb.flatten(&mut buf).expect(case), 12, "{case}");
        assert_eq!(bb.len(), 3, "buckets stay in place");
    }

    #[test]
    fn brigade_write_many() {
        const LINE: &[u8] = b"The quick brown fox jumps over the lazy dog.\n";
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        for _ in 0..3000 {
            bb.write(None, LINE).expect("write");
        }
        assert_eq!(bb.length(true).expect("length"), Some(3000 * LINE.len()));
        assert!(
            bb.iter().all(|bucket| bucket.kind() == BucketKind::Heap),
            "copied into write buffers"
        );
        let expected = (3000 * LINE.len()).div_ceil(BUFFER_SIZE);
        assert!(bb.len() <= expected + 1, "{} buffers", bb.len());
        let flat = bb.flatten_to_vec().expect("flatten");
        assert!(flat.chunks(LINE.len()).all(|line| line == LINE));
    }

    #[test]
    fn brigade_write_flush() {
        let (pool, allocator) = setup();
        let mut sink = Vec::new();
        let mut flushes = 0;
        let mut flush = |bb: &mut Brigade<'_>| -> io::Result<()> {
            flushes += 1;
            sink.extend(bb.flatten_to_vec()?);
            bb.cleanup();
            Ok(())
        };

        let small = [b'a'; 100];
        let large = vec![b'b'; BUFFER_SIZE + 1];
        let mut bb = Brigade::new(&pool, &allocator);

        let case = "small data is buffered";
        bb.write(Some(&mut flush), &small).expect(case);
        assert_eq!(bb.len(), 1, "{case}");
        assert_eq!(bb.front().map(Bucket::kind), Some(BucketKind::Heap), "{case}");

        let case = "large data is flushed";
        bb.write(Some(&mut flush), &large).expect(case);
        assert!(bb.is_empty(), "{case}");

        drop(flush);
        assert_eq!(flushes, 1);
        assert_eq!(sink.len(), small.len() + large.len());
        assert!(sink[..100].iter().all(|&byte| byte == b'a'));
        assert!(sink[100..].iter().all(|&byte| byte == b'b'));
    }

    #[test]
    fn brigade_write_without_flush() {
        let (pool, allocator) = setup();
        let large = vec![7u8; BUFFER_SIZE * 2];
        let mut bb = Brigade::new(&pool, &allocator);
        bb.write(None, &large).expect("large");
        assert_eq!(kinds(&bb), [BucketKind::Heap], "copied as is");
        assert_eq!(bb.front().and_then(Bucket::length), Some(BUFFER_SIZE * 2));

        let case = "no write buffer after a plain heap bucket";
        bb.put(None, b"tail").expect(case);
        assert_eq!(bb.len(), 2, "{case}");
        bb.put(None, b" more").expect(case);
        assert_eq!(bb.len(), 2, "{case}");
        assert_eq!(bb.back().and_then(Bucket::bytes), Some(&b"tail more"[..]), "{case}");
    }

    #[test]
    fn brigade_put_family() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.puts(None, "GET").expect("puts");
        bb.putc(None, b' ').expect("putc");
        bb.putstrs(None, &["/index.html", " ", "HTTP/1.1"]).expect("putstrs");
        bb.printf(None, format_args!("\r\nContent-Length: {}\r\n", 42)).expect("printf");
        {
            use std::io::Write;
            bb.write_all(b"\r\n").expect("io");
        }
        {
            use core::fmt::Write;
            write!(bb, "{}", "body").expect("fmt");
        }
        assert_eq!(bb.len(), 1, "all in one write buffer");
        assert_eq!(
            bb.flatten_to_vec().expect("flatten"),
            b"GET /index.html HTTP/1.1\r\nContent-Length: 42\r\n\r\nbody"
        );
    }

    #[test]
    fn brigade_put_flushes_full_buffer() {
        let (pool, allocator) = setup();
        let mut flushed = Vec::new();
        let mut flush = |bb: &mut Brigade<'_>| -> io::Result<()> {
            flushed.push(bb.length(false)?);
            Ok(())
        };
        let mut bb = Brigade::new(&pool, &allocator);
        let chunk = [b'x'; 3000];
        for _ in 0..3 {
            bb.put(Some(&mut flush), &chunk).expect("put");
        }
        drop(flush);
        assert_eq!(flushed, [Some(9000)], "flushed once the first buffer was full");
        assert_eq!(bb.len(), 2);
    }

    #[test]
    fn brigade_split_line() {
        let (pool, allocator) = setup();
        let first = b"blah blah blah-".to_vec();
        let second = b"end of line.\nfoo foo foo".to_vec();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(Bucket::transient(&first));
        bb.push_back(Bucket::transient(&second));

        let mut line = Brigade::new(&pool, &allocator);
        bb.split_line(&mut line, ReadMode::Block, 100).expect("split line");
        assert_eq!(
            line.flatten_to_vec().expect("line"),
            b"blah blah blah-end of line.\n"
        );
        assert_eq!(bb.flatten_to_vec().expect("rest"), b"foo foo foo");

        let case = "no line feed within max bytes";
        let mut rest = Brigade::new(&pool, &allocator);
        bb.split_line(&mut rest, ReadMode::Block, 4).expect(case);
        assert!(bb.is_empty(), "{case}");
        assert_eq!(rest.flatten_to_vec().expect(case), b"foo foo foo", "{case}");
    }

    #[test]
    fn brigade_split_line_pipe() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(chunks(&[b"first ", b"line\nsecond"]));
        bb.push_back(Bucket::eos());

        let mut line = Brigade::new(&pool, &allocator);
        bb.split_line(&mut line, ReadMode::Block, usize::MAX).expect("line");
        assert_eq!(line.flatten_to_vec().expect("line"), b"first line\n");

        let mut rest = Brigade::new(&pool, &allocator);
        bb.split_line(&mut rest, ReadMode::Block, usize::MAX).expect("rest");
        assert!(bb.is_empty());
        assert_eq!(rest.back().map(Bucket::kind), Some(BucketKind::Eos), "metadata moved");
        assert_eq!(rest.flatten_to_vec().expect("rest"), b"second");
    }

    #[test]
    fn brigade_partition() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(Bucket::immortal(b"hello, "));
        bb.push_back(Bucket::heap(b"world"));

        let case = "zero";
        assert_eq!(bb.partition(0).expect(case), 0, "{case}");
        assert_eq!(bb.len(), 2, "{case}");

        let case = "on a boundary";
        assert_eq!(bb.partition(7).expect(case), 1, "{case}");
        assert_eq!(bb.len(), 2, "{case}");

        let case = "inside a bucket";
        assert_eq!(bb.partition(9).expect(case), 2, "{case}");
        let lengths: Vec<_> = bb.iter().map(Bucket::length).collect();
        assert_eq!(lengths, [Some(7), Some(2), Some(3)], "{case}");

        let case = "total length";
        assert_eq!(bb.partition(12).expect(case), 3, "{case}");
        assert_eq!(bb.len(), 3, "{case}");

        let case = "past the end";
        let err = bb.partition(13).expect_err(case);
        assert_eq!(BucketError::of(&err), Some(BucketError::NotFound), "{case}");

        let case = "end of stream first";
        bb.push_back(Bucket::eos());
        bb.push_back(Bucket::immortal(b"after"));
        let err = bb.partition(14).expect_err(case);
        assert_eq!(BucketError::of(&err), Some(BucketError::NotFound), "{case}");
    }

    #[test]
    fn brigade_partition_pipe() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(chunks(&[b"0123", b"456789"]));

        let case = "inside the first chunk";
        assert_eq!(bb.partition(2).expect(case), 1, "{case}");
        assert_eq!(
            kinds(&bb),
            [BucketKind::Heap, BucketKind::Heap, BucketKind::Pipe],
            "{case}"
        );

        let case = "inside the second chunk";
        assert_eq!(bb.partition(6).expect(case), 3, "{case}");
        assert_eq!(bb.flatten_to_vec().expect(case), b"0123456789", "{case}");
        let lengths: Vec<_> = bb.iter().map(Bucket::length).collect();
        assert_eq!(
            lengths,
            [Some(2), Some(2), Some(2), Some(4), Some(0)],
            "{case}"
        );
    }

    #[test]
    fn brigade_length() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(Bucket::immortal(b"abc"));
        bb.push_back(chunks(&[b"defg"]));
        bb.push_back(Bucket::eos());

        assert_eq!(bb.length(false).expect("unknown"), None);
        assert_eq!(bb.len(), 3, "nothing read");
        assert_eq!(bb.length(true).expect("read all"), Some(7));
        assert_eq!(
            kinds(&bb),
            [BucketKind::Immortal, BucketKind::Heap, BucketKind::Immortal, BucketKind::Eos]
        );
        assert_eq!(bb.length(false).expect("known"), Some(7));
    }

    #[test]
    fn brigade_concat_and_split() {
        let (pool, allocator) = setup();
        let mut a = Brigade::new(&pool, &allocator);
        let mut b = Brigade::new(&pool, &allocator);
        a.push_back(Bucket::immortal(b"b"));
        b.push_back(Bucket::immortal(b"c"));
        b.push_back(Bucket::immortal(b"d"));

        a.concat(&mut b);
        assert!(b.is_empty());
        b.push_back(Bucket::immortal(b"a"));
        a.prepend(&mut b);
        assert_eq!(a.flatten_to_vec().expect("concat"), b"abcd");

        let case = "split at";
        let mut tail = a.split_at(3);
        assert_eq!(a.flatten_to_vec().expect(case), b"abc", "{case}");
        assert_eq!(tail.flatten_to_vec().expect(case), b"d", "{case}");
        assert!(tail.pool().ptr_eq(&pool), "{case}");
        assert!(a.split_at(3).is_empty(), "{case}");

        let case = "split into";
        let mut dest = Brigade::new(&pool, &allocator);
        dest.push_back(Bucket::immortal(b"dropped"));
        a.split_into(1, &mut dest);
        assert_eq!(a.flatten_to_vec().expect(case), b"a", "{case}");
        assert_eq!(dest.flatten_to_vec().expect(case), b"bc", "{case}");
    }

    #[test]
    fn brigade_shares_buffers() {
        let (pool, allocator) = setup();
        let released = Rc::new(Cell::new(0));
        let counter = Rc::clone(&released);
        let bucket = Bucket::heap_with_release(b"shared".to_vec().into_boxed_slice(), move |_| {
            counter.set(counter.get() + 1);
        });

        let mut a = Brigade::new(&pool, &allocator);
        let mut b = Brigade::new(&pool, &allocator);
        b.push_back(bucket.copy().expect("copy"));
        a.push_back(bucket);
        {
            let mut cursor = a.cursor_front_mut();
            cursor.copy_after().expect("copy after");
            cursor.split(2).expect("split");
        }
        assert_eq!(a.flatten_to_vec().expect("a"), b"sharedshared");
        a.destroy();
        assert_eq!(released.get(), 0, "still referenced by the other brigade");
        assert_eq!(b.flatten_to_vec().expect("b"), b"shared");
        drop(b);
        assert_eq!(released.get(), 1, "released exactly once");
    }

    #[test]
    fn brigade_to_iovec() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.push_back(Bucket::immortal(b"one "));
        bb.push_back(chunks(&[b"two "]));
        bb.push_back(Bucket::heap(b"three"));

        {
            let vec = bb.to_iovec(16).expect("all");
            let joined: Vec<u8> = vec.iter().flat_map(|slice| slice.iter().copied()).collect();
            assert_eq!(joined, b"one two three");
            assert_eq!(vec.len(), 4, "the pipe left an empty bucket");
        }

        let vec = bb.to_iovec(2).expect("two");
        assert_eq!(vec.len(), 2);
        assert_eq!(&*vec[1], b"two ");
    }

    #[test]
    fn brigade_cursor() {
        let (pool, allocator) = setup();
        let mut bb = Brigade::new(&pool, &allocator);
        bb.extend([Bucket::immortal(b"a"), Bucket::flush(), Bucket::immortal(b"c")]);
        {
            let mut cursor = bb.cursor_front_mut();
            cursor.move_next();
            assert_eq!(cursor.index(), Some(1));
            let flush = cursor.remove_current().expect("flush");
            assert!(flush.is_flush());
            cursor.insert_before(Bucket::immortal(b"b"));
            assert_eq!(cursor.index(), Some(2));
            assert_eq!(cursor.read(ReadMode::Block).expect("read"), b"c");
            cursor.move_next();
            assert!(cursor.is_ghost());
            assert_eq!(cursor.read(ReadMode::Block).expect("ghost"), b"");
            assert_eq!(cursor.split(0), Err(BucketError::NotFound));
            cursor.insert_before(Bucket::eos());
        }
        assert_eq!(bb.flatten_to_vec().expect("flatten"), b"abc");
        assert!(bb.back().is_some_and(Bucket::is_eos));
    }

    #[test]
    fn brigade_released_with_pool() {
        let (pool, allocator) = setup();
        let scope = pool.create_child();
        let mut bb = Brigade::new(&scope, &allocator);
        bb.push_back(Bucket::heap(b"gone"));

        scope.clear();
        assert!(bb.is_empty(), "released");
        assert!(bb.front().is_none(), "released");
        assert_eq!(bb.iter().count(), 0, "released");

        let case = "usable after release";
        bb.push_back(Bucket::heap(b"again"));
        assert_eq!(bb.flatten_to_vec().expect(case), b"again", "{case}");
        scope.clear();
        assert!(bb.is_empty(), "released again");

        let case = "release functions run with the next change";
        let released = Rc::new(Cell::new(0));
        let counter = Rc::clone(&released);
        bb.push_back(Bucket::heap_with_release(
            b"owned".to_vec().into_boxed_slice(),
            move |_| counter.set(counter.get() + 1),
        ));
        scope.clear();
        assert!(bb.is_empty(), "{case}");
        bb.push_back(Bucket::immortal(b"registered again"));
        assert_eq!(released.get(), 1, "{case}");

        let case = "destroy detaches";
        let pending = scope.pending();
        bb.destroy();
        assert_eq!(scope.pending(), pending - 1, "{case}");
    }

    #[test]
    fn brigade_set_aside_and_into_owned() {
        let (pool, allocator) = setup();
        let owned: Brigade<'static> = {
            let data = b"borrowed".to_vec();
            let mut bb = Brigade::new(&pool, &allocator);
            bb.push_back(Bucket::transient(&data));
            bb.push_back(Bucket::transient(&data[..3]));
            bb.set_aside(&pool).expect("set aside");
            assert!(bb.iter().all(|bucket| bucket.kind() == BucketKind::Heap));
            bb.into_owned()
        };
        let mut owned = owned;
        assert_eq!(owned.flatten_to_vec().expect("owned"), b"borrowedbor");

        let case = "pipes cannot be set aside";
        owned.push_back(chunks(&[]));
        let err = owned.set_aside(&pool).expect_err(case);
        assert_eq!(
            BucketError::of(&err),
            Some(BucketError::NotImplemented("set_aside", BucketKind::Pipe)),
            "{case}"
        );
    }
}
