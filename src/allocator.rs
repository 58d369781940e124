//! A small-object allocator for bucket metadata.
//!
//! Buckets are created and destroyed at a very high rate, and so are the list
//! nodes that hold them. [`BucketAllocator`] amortizes that by carving many
//! fixed-size cells out of one large block requested from an [`Arena`], and
//! by recycling freed cells through an intrusive free list. Requests that do
//! not fit a cell bypass the free list and get a dedicated block of their own.
//!
//! Each cell is prefixed with a hidden header:
//!
//! ```text
//!   block: |Header|payload.........|Header|payload.........|Header|...
//!           ^      ^
//!           |      +-- pointer returned by `alloc`
//!           +-- owner allocator, owning block, size class
//! ```
//!
//! The header is what allows [`BucketAllocator::free`] to work with a bare
//! pointer, without the caller passing the size or the allocator back in.
//!
//! # Lifetime
//!
//! The allocator is bound to a [`Pool`]. When the pool is cleared, or when
//! [`BucketAllocator::destroy`] is called, all arena blocks are returned to
//! the arena, unless some cells are still live. Every live cell holds a strong
//! reference to its allocator, so the blocks backing live cells are returned
//! only once the last cell is freed and the last handle is dropped.

use core::{
    cell::{Cell, RefCell},
    mem,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};
use std::{alloc::Layout, rc::Rc};

use crate::pool::{Cleanup, Pool};

/// Alignment of arena blocks and of every cell payload.
pub const CELL_ALIGN: usize = 16;

/// Bookkeeping overhead an arena is assumed to keep per block.
const ARENA_NODE_OVERHEAD: usize = 64;

/// The size of arena blocks that small cells are carved out of, such that
/// a block with the arena's own bookkeeping fits in 8 KiB.
pub const ARENA_BLOCK_SIZE: usize = 8192 - ARENA_NODE_OVERHEAD;

/// The size of a small cell, including its header. Enough for a list node
/// holding a bucket, or for a small variant-private structure.
pub const SMALL_CELL_SIZE: usize = 256;

/// The size of the hidden header in front of every cell payload.
const HEADER_SIZE: usize = mem::size_of::<Header>();

/// The size class of cells carved out of shared blocks.
const SMALL: usize = 0;

/// A provider of large memory blocks.
///
/// # Safety
///
/// Blocks returned by `alloc_block` must be valid for reads and writes of
/// `size` bytes, aligned to [`CELL_ALIGN`], and must not overlap any other
/// live block. They must stay valid until passed to `free_block`.
pub unsafe trait Arena {
    /// Allocates a block of `size` bytes, or returns `None` if out of memory.
    fn alloc_block(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns a block back to the arena.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by `alloc_block` of this arena with the
    /// same `size`, and must not be used afterwards.
    unsafe fn free_block(&self, block: NonNull<u8>, size: usize);
}

/// An [`Arena`] over the global allocator.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct SystemArena;

unsafe impl Arena for SystemArena {
    #[inline(always)]
    fn alloc_block(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, CELL_ALIGN).ok()?;
        // SAFETY: The layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    #[inline(always)]
    unsafe fn free_block(&self, block: NonNull<u8>, size: usize) {
        // SAFETY: The same layout was valid when the block was allocated.
        std::alloc::dealloc(
            block.as_ptr(),
            Layout::from_size_align_unchecked(size, CELL_ALIGN),
        );
    }
}

/// The hidden cell header. Its size is a multiple of the alignment, so the
/// payload that follows is aligned as well.
#[repr(C, align(16))]
struct Header {
    /// The allocator the cell was allocated from.
    owner: NonNull<Inner>,
    /// The arena block the cell lives in.
    block: NonNull<u8>,
    /// Either [`SMALL`], or the size of the dedicated block.
    class: usize,
}

/// A handle to an allocator of small cells.
///
/// Handles are cheap to clone and refer to the same allocator. The allocator
/// is not synchronized, use one per thread.
#[derive(Clone)]
pub struct BucketAllocator(Rc<Inner>);

struct Inner {
    /// The provider of blocks.
    arena: Box<dyn Arena>,
    /// Blocks that small cells are carved out of. Cells are carved from the
    /// last one.
    blocks: RefCell<Vec<NonNull<u8>>>,
    /// The number of bytes already carved out of the last block.
    carved: Cell<usize>,
    /// The head of the free list. A free cell keeps the link to the next free
    /// cell at the start of its payload.
    free_list: Cell<Option<NonNull<Header>>>,
    /// The number of live dedicated blocks.
    dedicated: Cell<usize>,
    /// The number of live cells, small and dedicated.
    live: Cell<usize>,
    /// The pool and the release callback registered on it.
    scope: RefCell<Option<(Pool, Cleanup)>>,
}

impl BucketAllocator {
    /// Creates an allocator over [`SystemArena`], bound to `pool`.
    #[inline(always)]
    #[must_use]
    pub fn new(pool: &Pool) -> BucketAllocator {
        BucketAllocator::with_arena(pool, SystemArena)
    }

    /// Creates an allocator over `arena`, bound to `pool`. One block is
    /// acquired up front, the rest on demand.
    #[must_use]
    pub fn with_arena(pool: &Pool, arena: impl Arena + 'static) -> BucketAllocator {
        let inner = Rc::new(Inner {
            arena: Box::new(arena),
            blocks: RefCell::default(),
            carved: Cell::new(0),
            free_list: Cell::new(None),
            dedicated: Cell::new(0),
            live: Cell::new(0),
            scope: RefCell::new(None),
        });
        if let Some(block) = inner.arena.alloc_block(ARENA_BLOCK_SIZE) {
            inner.blocks.borrow_mut().push(block);
        }
        let weak = Rc::downgrade(&inner);
        let cleanup = pool.register(move || {
            if let Some(inner) = weak.upgrade() {
                inner.trim();
            }
        });
        *inner.scope.borrow_mut() = Some((pool.clone(), cleanup));
        BucketAllocator(inner)
    }

    /// Allocates `size` bytes aligned to [`CELL_ALIGN`]. The memory is not
    /// initialized. Returns `None` if the arena is out of memory.
    ///
    /// If `size` and the header fit into [`SMALL_CELL_SIZE`], the cell is
    /// taken from the free list, or carved out of the current block, or out of
    /// a newly acquired block. Otherwise a dedicated block is acquired.
    #[must_use]
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let owner = NonNull::from(&*self.0);
        let header = match size.checked_add(HEADER_SIZE)? {
            total if total <= SMALL_CELL_SIZE => self.0.alloc_small(owner)?,
            total => self.0.alloc_dedicated(owner, total)?,
        };
        self.0.live.set(self.0.live.get() + 1);
        // SAFETY: Balanced by `decrement_strong_count` in `free`.
        unsafe { Rc::increment_strong_count(Rc::as_ptr(&self.0)) };
        // SAFETY: The payload follows the header within the same cell.
        Some(unsafe { NonNull::new_unchecked(header.as_ptr().add(1).cast::<u8>()) })
    }

    /// Frees a cell. The owning allocator and the size are recovered from
    /// the hidden header.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`BucketAllocator::alloc`] and must
    /// not be used afterwards.
    pub unsafe fn free(ptr: NonNull<u8>) {
        let header = ptr.as_ptr().cast::<Header>().sub(1);
        let Header {
            owner,
            block,
            class,
        } = header.read();
        {
            // SAFETY: The cell holds a strong reference to the owner.
            let inner = owner.as_ref();
            inner.live.set(inner.live.get() - 1);
            if class == SMALL {
                ptr.as_ptr()
                    .cast::<Option<NonNull<Header>>>()
                    .write(inner.free_list.get());
                inner.free_list.set(Some(NonNull::new_unchecked(header)));
            } else {
                inner.dedicated.set(inner.dedicated.get() - 1);
                inner.arena.free_block(block, class);
            }
        }
        Rc::decrement_strong_count(owner.as_ptr());
    }

    /// Returns all arena blocks if there are no live cells. Returns the number
    /// of blocks released.
    ///
    /// This is what runs when the pool is cleared.
    #[inline(always)]
    pub fn trim(&self) -> usize {
        self.0.trim()
    }

    /// Runs the release callback registered on the pool now, instead of when
    /// the pool is cleared, and drops this handle.
    pub fn destroy(self) {
        let scope = self.0.scope.borrow_mut().take();
        if let Some((pool, cleanup)) = scope {
            pool.run_cleanup(cleanup);
        }
        self.0.trim();
    }

    /// Returns the number of arena blocks currently held, including dedicated
    /// blocks of large cells.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.0.blocks.borrow().len() + self.0.dedicated.get()
    }

    /// Returns the number of cells allocated and not yet freed.
    #[inline(always)]
    #[must_use]
    pub fn live_cells(&self) -> usize {
        self.0.live.get()
    }

    /// Returns `true` if both handles refer to the same allocator.
    #[inline(always)]
    #[must_use]
    pub fn ptr_eq(&self, other: &BucketAllocator) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Inner {
    fn alloc_small(&self, owner: NonNull<Inner>) -> Option<NonNull<Header>> {
        if let Some(header) = self.free_list.get() {
            // SAFETY: A free cell keeps the next link at the start of payload.
            let next = unsafe { header.as_ptr().add(1).cast::<Option<NonNull<Header>>>().read() };
            self.free_list.set(next);
            return Some(header);
        }

        let mut blocks = self.blocks.borrow_mut();
        let block = match blocks.last() {
            Some(&block) if self.carved.get() + SMALL_CELL_SIZE <= ARENA_BLOCK_SIZE => block,
            _ => {
                let block = self.arena.alloc_block(ARENA_BLOCK_SIZE)?;
                blocks.push(block);
                self.carved.set(0);
                tracing::debug!(blocks = blocks.len(), "bucket allocator: acquired arena block");
                block
            }
        };
        let offset = self.carved.get();
        self.carved.set(offset + SMALL_CELL_SIZE);
        // SAFETY: The cell lies within the block. Both the block and the cell
        // offset are aligned to `CELL_ALIGN`.
        let header = unsafe { block.as_ptr().add(offset).cast::<Header>() };
        // SAFETY: The cell is unused memory owned by this allocator.
        unsafe {
            header.write(Header {
                owner,
                block,
                class: SMALL,
            });
        }
        NonNull::new(header)
    }

    fn alloc_dedicated(&self, owner: NonNull<Inner>, total: usize) -> Option<NonNull<Header>> {
        let block = self.arena.alloc_block(total)?;
        let header = block.cast::<Header>();
        // SAFETY: The block is at least a header large and aligned.
        unsafe {
            header.as_ptr().write(Header {
                owner,
                block,
                class: total,
            });
        }
        self.dedicated.set(self.dedicated.get() + 1);
        Some(header)
    }

    fn trim(&self) -> usize {
        if self.live.get() != 0 {
            return 0;
        }
        self.free_list.set(None);
        self.carved.set(0);
        let blocks: Vec<_> = self.blocks.borrow_mut().drain(..).collect();
        for &block in &blocks {
            // SAFETY: No live cells, so no one references the blocks.
            unsafe { self.arena.free_block(block, ARENA_BLOCK_SIZE) };
        }
        if !blocks.is_empty() {
            tracing::debug!(blocks = blocks.len(), "bucket allocator: released arena blocks");
        }
        blocks.len()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug_assert_eq!(self.live.get(), 0, "live cells hold their allocator");
        self.trim();
        if let Some((pool, cleanup)) = self.scope.get_mut().take() {
            pool.cancel(cleanup);
        }
    }
}

impl core::fmt::Debug for BucketAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BucketAllocator")
            .field("blocks", &self.0.blocks.borrow().len())
            .field("dedicated", &self.0.dedicated)
            .field("live", &self.0.live)
            .finish_non_exhaustive()
    }
}

/// A zero-initialized, fixed-size byte buffer living in a [`BucketAllocator`]
/// cell. The cell is freed on drop.
pub struct CellBuf {
    ptr: NonNull<u8>,
    len: usize,
}

impl CellBuf {
    /// Allocates a buffer of `len` zero bytes. Returns `None` if the arena is
    /// out of memory.
    #[must_use]
    pub fn zeroed(allocator: &BucketAllocator, len: usize) -> Option<CellBuf> {
        let ptr = allocator.alloc(len)?;
        // SAFETY: The cell payload is at least `len` bytes.
        unsafe { ptr.as_ptr().write_bytes(0, len) };
        Some(CellBuf { ptr, len })
    }
}

impl Deref for CellBuf {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        // SAFETY: The payload is initialized and owned by this buffer.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for CellBuf {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: The payload is initialized and owned by this buffer.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for CellBuf {
    #[inline(always)]
    fn drop(&mut self) {
        // SAFETY: The pointer came from `alloc` and is not used afterwards.
        unsafe { BucketAllocator::free(self.ptr) };
    }
}

impl core::fmt::Debug for CellBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CellBuf").field("len", &self.len).finish()
    }
}
