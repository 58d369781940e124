//! A circular doubly-linked list with a sentinel.
//!
//! [`Ring`] is the list brigades keep their buckets in. The sentinel makes
//! the ring closed: the first node's `prev` and the last node's `next` point
//! at the sentinel, and an empty ring is the sentinel pointing at itself, so
//! no traversal ever meets a null link. Whole runs of nodes can be spliced in
//! and out in constant time, which is what brigade concatenation and splits
//! are built on.
//!
//! Nodes live in cells of a [`BucketAllocator`]. A node is freed through its
//! hidden cell header, so runs of nodes can move between rings created with
//! different allocators.

use core::{fmt, marker::PhantomData, mem, ptr::NonNull};
use std::alloc::{handle_alloc_error, Layout};

use crate::allocator::{BucketAllocator, CELL_ALIGN};

#[repr(C)]
struct Link {
    next: NonNull<Link>,
    prev: NonNull<Link>,
}

#[repr(C)]
struct Node<T> {
    link: Link,
    value: T,
}

/// A circular doubly-linked list with constant-time splicing.
pub struct Ring<T> {
    /// The sentinel. Heap-allocated so that moving the ring does not move it.
    head: NonNull<Link>,
    len: usize,
    allocator: BucketAllocator,
    _marker: PhantomData<Box<Node<T>>>,
}

impl<T> Ring<T> {
    const ALIGNED: () = assert!(
        mem::align_of::<Node<T>>() <= CELL_ALIGN,
        "ring values must not be over-aligned"
    );

    /// Creates an empty ring with nodes allocated from `allocator`.
    #[must_use]
    pub fn new_in(allocator: &BucketAllocator) -> Ring<T> {
        let () = Self::ALIGNED;
        let head = NonNull::from(Box::leak(Box::new(Link {
            next: NonNull::dangling(),
            prev: NonNull::dangling(),
        })));
        // SAFETY: The sentinel was just allocated.
        unsafe {
            (*head.as_ptr()).next = head;
            (*head.as_ptr()).prev = head;
        }
        Ring {
            head,
            len: 0,
            allocator: allocator.clone(),
            _marker: PhantomData,
        }
    }

    /// Returns the allocator new nodes are allocated from.
    #[inline(always)]
    #[must_use]
    pub fn allocator(&self) -> &BucketAllocator {
        &self.allocator
    }

    /// Returns the number of values.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the ring holds no values, that is, the sentinel
    /// points at itself.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the first value.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        // SAFETY: Any link but the sentinel is a node.
        (!self.is_empty()).then(|| unsafe { value(self.first()) })
    }

    /// Returns the last value.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        // SAFETY: Any link but the sentinel is a node.
        (!self.is_empty()).then(|| unsafe { value(self.last()) })
    }

    /// Returns the first value, mutably.
    #[must_use]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        // SAFETY: Any link but the sentinel is a node.
        (!self.is_empty()).then(|| unsafe { value_mut(self.first()) })
    }

    /// Returns the last value, mutably.
    #[must_use]
    pub fn back_mut(&mut self) -> Option<&mut T> {
        // SAFETY: Any link but the sentinel is a node.
        (!self.is_empty()).then(|| unsafe { value_mut(self.last()) })
    }

    /// Appends a value at the tail.
    pub fn push_back(&mut self, value: T) {
        let node = self.alloc_node(value);
        // SAFETY: The tail and the sentinel are adjacent links of this ring.
        unsafe { link_between(node, self.last(), self.head) };
        self.len += 1;
    }

    /// Inserts a value at the head.
    pub fn push_front(&mut self, value: T) {
        let node = self.alloc_node(value);
        // SAFETY: The sentinel and the first node are adjacent links.
        unsafe { link_between(node, self.head, self.first()) };
        self.len += 1;
    }

    /// Removes the first value.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: The ring is not empty, so the link is a node of this ring.
        Some(unsafe { self.remove(self.first()) })
    }

    /// Removes the last value.
    pub fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: The ring is not empty, so the link is a node of this ring.
        Some(unsafe { self.remove(self.last()) })
    }

    /// Moves all values of `other` to the tail, leaving `other` empty.
    pub fn append(&mut self, other: &mut Ring<T>) {
        // SAFETY: The tail and the sentinel are adjacent links.
        unsafe { self.splice(other, self.last(), self.head) };
    }

    /// Moves all values of `other` to the head, leaving `other` empty.
    pub fn prepend(&mut self, other: &mut Ring<T>) {
        // SAFETY: The sentinel and the first node are adjacent links.
        unsafe { self.splice(other, self.head, self.first()) };
    }

    /// Splits the ring in two at `at`. Returns the values from `at` to the
    /// tail, keeping the values before `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at > len`.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Ring<T> {
        assert!(at <= self.len, "ring: split index {at} out of {}", self.len);
        let first = if at <= self.len / 2 {
            (0..at).fold(self.first(), |link, _| next(link))
        } else {
            (at..self.len).fold(self.head, |link, _| prev(link))
        };
        // SAFETY: `first` is the link at index `at` of this ring.
        unsafe { self.detach_from(first, self.len - at) }
    }

    /// Drops all values.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }

    /// Returns an iterator over the values, from head to tail.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            front: self.first(),
            back: self.last(),
            remaining: self.len,
            _marker: PhantomData,
        }
    }

    /// Returns an iterator over mutable values, from head to tail.
    #[must_use]
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            front: self.first(),
            back: self.last(),
            remaining: self.len,
            _marker: PhantomData,
        }
    }

    /// Returns a cursor at the first value, or at the sentinel if the ring
    /// is empty.
    #[must_use]
    pub fn cursor_front_mut(&mut self) -> CursorMut<'_, T> {
        CursorMut {
            current: self.first(),
            index: 0,
            ring: self,
        }
    }

    #[inline(always)]
    fn first(&self) -> NonNull<Link> {
        next(self.head)
    }

    #[inline(always)]
    fn last(&self) -> NonNull<Link> {
        prev(self.head)
    }

    fn alloc_node(&self, value: T) -> NonNull<Link> {
        let layout = Layout::new::<Node<T>>();
        let Some(cell) = self.allocator.alloc(layout.size()) else {
            handle_alloc_error(layout);
        };
        let node = cell.cast::<Node<T>>();
        // SAFETY: The cell is large enough and aligned for a node.
        unsafe {
            node.as_ptr().write(Node {
                link: Link {
                    next: NonNull::dangling(),
                    prev: NonNull::dangling(),
                },
                value,
            });
        }
        node.cast()
    }

    /// Unlinks and frees a node, returning its value.
    ///
    /// # Safety
    ///
    /// `link` must be a node of this ring.
    unsafe fn remove(&mut self, link: NonNull<Link>) -> T {
        unlink(link);
        self.len -= 1;
        let Node { value, .. } = link.cast::<Node<T>>().as_ptr().read();
        BucketAllocator::free(link.cast());
        value
    }

    /// Moves all nodes of `other` between `before` and `after`.
    ///
    /// # Safety
    ///
    /// `before` and `after` must be adjacent links of this ring.
    unsafe fn splice(&mut self, other: &mut Ring<T>, before: NonNull<Link>, after: NonNull<Link>) {
        if other.is_empty() {
            return;
        }
        let first = other.first();
        let last = other.last();
        (*before.as_ptr()).next = first;
        (*first.as_ptr()).prev = before;
        (*last.as_ptr()).next = after;
        (*after.as_ptr()).prev = last;
        (*other.head.as_ptr()).next = other.head;
        (*other.head.as_ptr()).prev = other.head;
        self.len += other.len;
        other.len = 0;
    }

    /// Moves `count` nodes from `first` up to the tail into a new ring.
    ///
    /// # Safety
    ///
    /// `first` must be a link of this ring with exactly `count` nodes from it
    /// to the tail, inclusive.
    unsafe fn detach_from(&mut self, first: NonNull<Link>, count: usize) -> Ring<T> {
        let mut tail = Ring::new_in(&self.allocator);
        if count == 0 {
            return tail;
        }
        let last = self.last();
        let before = prev(first);
        (*before.as_ptr()).next = self.head;
        (*self.head.as_ptr()).prev = before;
        (*first.as_ptr()).prev = tail.head;
        (*last.as_ptr()).next = tail.head;
        (*tail.head.as_ptr()).next = first;
        (*tail.head.as_ptr()).prev = last;
        self.len -= count;
        tail.len = count;
        tail
    }
}

#[inline(always)]
fn next(link: NonNull<Link>) -> NonNull<Link> {
    // SAFETY: Links of a ring are always valid.
    unsafe { (*link.as_ptr()).next }
}

#[inline(always)]
fn prev(link: NonNull<Link>) -> NonNull<Link> {
    // SAFETY: Links of a ring are always valid.
    unsafe { (*link.as_ptr()).prev }
}

unsafe fn link_between(node: NonNull<Link>, before: NonNull<Link>, after: NonNull<Link>) {
    (*node.as_ptr()).prev = before;
    (*node.as_ptr()).next = after;
    (*before.as_ptr()).next = node;
    (*after.as_ptr()).prev = node;
}

unsafe fn unlink(node: NonNull<Link>) {
    let before = (*node.as_ptr()).prev;
    let after = (*node.as_ptr()).next;
    (*before.as_ptr()).next = after;
    (*after.as_ptr()).prev = before;
}

unsafe fn value<'r, T>(link: NonNull<Link>) -> &'r T {
    &(*link.cast::<Node<T>>().as_ptr()).value
}

unsafe fn value_mut<'r, T>(link: NonNull<Link>) -> &'r mut T {
    &mut (*link.cast::<Node<T>>().as_ptr()).value
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        self.clear();
        // SAFETY: The sentinel was leaked from a box in `new_in`.
        drop(unsafe { Box::from_raw(self.head.as_ptr()) });
    }
}

impl<T: fmt::Debug> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Extend<T> for Ring<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}

impl<'r, T> IntoIterator for &'r Ring<T> {
    type Item = &'r T;
    type IntoIter = Iter<'r, T>;

    fn into_iter(self) -> Iter<'r, T> {
        self.iter()
    }
}

impl<'r, T> IntoIterator for &'r mut Ring<T> {
    type Item = &'r mut T;
    type IntoIter = IterMut<'r, T>;

    fn into_iter(self) -> IterMut<'r, T> {
        self.iter_mut()
    }
}

impl<T> IntoIterator for Ring<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter(self)
    }
}

/// A borrowing iterator over a [`Ring`].
pub struct Iter<'r, T> {
    front: NonNull<Link>,
    back: NonNull<Link>,
    remaining: usize,
    _marker: PhantomData<&'r T>,
}

impl<'r, T> Iterator for Iter<'r, T> {
    type Item = &'r T;

    fn next(&mut self) -> Option<&'r T> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let link = self.front;
        self.front = next(link);
        // SAFETY: `remaining` nodes are left between `front` and `back`.
        Some(unsafe { value(link) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'r, T> DoubleEndedIterator for Iter<'r, T> {
    fn next_back(&mut self) -> Option<&'r T> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let link = self.back;
        self.back = prev(link);
        // SAFETY: `remaining` nodes are left between `front` and `back`.
        Some(unsafe { value(link) })
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

/// A mutable iterator over a [`Ring`].
pub struct IterMut<'r, T> {
    front: NonNull<Link>,
    back: NonNull<Link>,
    remaining: usize,
    _marker: PhantomData<&'r mut T>,
}

impl<'r, T> Iterator for IterMut<'r, T> {
    type Item = &'r mut T;

    fn next(&mut self) -> Option<&'r mut T> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let link = self.front;
        self.front = next(link);
        // SAFETY: Each node is yielded once.
        Some(unsafe { value_mut(link) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'r, T> DoubleEndedIterator for IterMut<'r, T> {
    fn next_back(&mut self) -> Option<&'r mut T> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let link = self.back;
        self.back = prev(link);
        // SAFETY: Each node is yielded once.
        Some(unsafe { value_mut(link) })
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}

/// An owning iterator over a [`Ring`].
pub struct IntoIter<T>(Ring<T>);

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    #[inline(always)]
    fn next(&mut self) -> Option<T> {
        self.0.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.0.len, Some(self.0.len))
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    #[inline(always)]
    fn next_back(&mut self) -> Option<T> {
        self.0.pop_back()
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}

/// A cursor over a [`Ring`] that can edit the ring around it.
///
/// Besides the values, the cursor may point at the sentinel, the "ghost"
/// position between the tail and the head. Its index is the ring length.
pub struct CursorMut<'r, T> {
    ring: &'r mut Ring<T>,
    current: NonNull<Link>,
    index: usize,
}

impl<'r, T> CursorMut<'r, T> {
    /// Returns the index of the current value, or `None` at the ghost.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (!self.is_ghost()).then_some(self.index)
    }

    /// Returns `true` if the cursor points at the sentinel.
    #[inline(always)]
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.current == self.ring.head
    }

    /// Returns the current value.
    #[must_use]
    pub fn current(&mut self) -> Option<&mut T> {
        // SAFETY: Any link but the sentinel is a node.
        (!self.is_ghost()).then(|| unsafe { value_mut(self.current) })
    }

    /// Returns the value after the current one. After the ghost, that is
    /// the head.
    #[must_use]
    pub fn peek_next(&mut self) -> Option<&mut T> {
        let link = next(self.current);
        // SAFETY: Any link but the sentinel is a node.
        (link != self.ring.head).then(|| unsafe { value_mut(link) })
    }

    /// Moves to the next position. From the tail it moves to the ghost, and
    /// from the ghost to the head.
    pub fn move_next(&mut self) {
        self.index = if self.is_ghost() { 0 } else { self.index + 1 };
        self.current = next(self.current);
    }

    /// Moves to the previous position. From the head it moves to the ghost,
    /// and from the ghost to the tail.
    pub fn move_prev(&mut self) {
        let link = prev(self.current);
        self.index = if link == self.ring.head {
            self.ring.len
        } else if self.is_ghost() {
            self.ring.len - 1
        } else {
            self.index - 1
        };
        self.current = link;
    }

    /// Inserts a value after the current position. At the ghost, the value
    /// becomes the new head.
    pub fn insert_after(&mut self, value: T) {
        let node = self.ring.alloc_node(value);
        // SAFETY: The current link and the next one are adjacent.
        unsafe { link_between(node, self.current, next(self.current)) };
        self.ring.len += 1;
        if self.is_ghost() {
            self.index = self.ring.len;
        }
    }

    /// Inserts a value before the current position. At the ghost, the value
    /// becomes the new tail.
    pub fn insert_before(&mut self, value: T) {
        let node = self.ring.alloc_node(value);
        // SAFETY: The previous link and the current one are adjacent.
        unsafe { link_between(node, prev(self.current), self.current) };
        self.ring.len += 1;
        self.index += 1;
    }

    /// Removes the current value and moves to the next position. Returns
    /// `None` at the ghost.
    pub fn remove_current(&mut self) -> Option<T> {
        if self.is_ghost() {
            return None;
        }
        let link = self.current;
        self.current = next(link);
        // SAFETY: The link is a node of this ring.
        Some(unsafe { self.ring.remove(link) })
    }

    /// Splits the ring at the current position. Returns the values from the
    /// current one to the tail, and leaves the cursor at the ghost. At the
    /// ghost, an empty ring is returned.
    #[must_use]
    pub fn split_here(&mut self) -> Ring<T> {
        let count = self.ring.len - self.index;
        let first = self.current;
        self.current = self.ring.head;
        // SAFETY: There are `count` nodes from the current one to the tail.
        let tail = unsafe { self.ring.detach_from(first, count) };
        self.index = self.ring.len;
        tail
    }

    /// Returns the ring the cursor edits.
    #[inline(always)]
    #[must_use]
    pub fn ring(&self) -> &Ring<T> {
        self.ring
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::pool::Pool;

    fn ring_of(allocator: &BucketAllocator, values: &[u32]) -> Ring<u32> {
        let mut ring = Ring::new_in(allocator);
        ring.extend(values.iter().copied());
        ring
    }

    fn collect(ring: &Ring<u32>) -> Vec<u32> {
        ring.iter().copied().collect()
    }

    #[test]
    fn ring_push_pop() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = Ring::new_in(&allocator);
        assert!(ring.is_empty());
        assert_eq!(ring.front(), None);
        assert_eq!(ring.pop_back(), None);

        ring.push_back(2);
        ring.push_back(3);
        ring.push_front(1);
        assert_eq!(collect(&ring), [1, 2, 3]);
        assert_eq!(ring.iter().rev().copied().collect::<Vec<_>>(), [3, 2, 1]);
        assert_eq!((ring.front(), ring.back()), (Some(&1), Some(&3)));
        assert_eq!(allocator.live_cells(), 3);

        *ring.back_mut().expect("back") = 30;
        assert_eq!(ring.pop_back(), Some(30));
        assert_eq!(ring.pop_front(), Some(1));
        assert_eq!(ring.pop_front(), Some(2));
        assert_eq!(ring.pop_front(), None);
        assert_eq!(allocator.live_cells(), 0);
    }

    #[test]
    fn ring_append_prepend() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = ring_of(&allocator, &[3, 4]);

        let case = "append";
        let mut other = ring_of(&allocator, &[5, 6]);
        ring.append(&mut other);
        assert_eq!(collect(&ring), [3, 4, 5, 6], "{case}");
        assert!(other.is_empty(), "{case}");

        let case = "prepend";
        let mut other = ring_of(&allocator, &[1, 2]);
        ring.prepend(&mut other);
        assert_eq!(collect(&ring), [1, 2, 3, 4, 5, 6], "{case}");
        assert_eq!(ring.len(), 6, "{case}");

        let case = "empty other";
        ring.append(&mut other);
        assert_eq!(ring.len(), 6, "{case}");

        let case = "other is reusable";
        other.push_back(7);
        ring.append(&mut other);
        assert_eq!(ring.back(), Some(&7), "{case}");
    }

    #[test]
    fn ring_split_off() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        for at in 0..=5 {
            let mut ring = ring_of(&allocator, &[0, 1, 2, 3, 4]);
            let tail = ring.split_off(at);
            let case = format!("split at {at}");
            assert_eq!(collect(&ring), (0..at as u32).collect::<Vec<_>>(), "{case}");
            assert_eq!(collect(&tail), (at as u32..5).collect::<Vec<_>>(), "{case}");
            assert_eq!((ring.len(), tail.len()), (at, 5 - at), "{case}");
            assert_eq!(tail.iter().rev().count(), 5 - at, "{case}");
        }
    }

    #[test]
    #[should_panic(expected = "out of")]
    fn ring_split_off_out_of_range() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = ring_of(&allocator, &[1]);
        let _ = ring.split_off(2);
    }

    #[test]
    fn ring_cursor_moves() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = ring_of(&allocator, &[1, 2, 3]);
        let mut cursor = ring.cursor_front_mut();

        assert_eq!(cursor.index(), Some(0));
        assert_eq!(cursor.current().copied(), Some(1));
        assert_eq!(cursor.peek_next().copied(), Some(2));
        cursor.move_next();
        cursor.move_next();
        assert_eq!(cursor.index(), Some(2));

        let case = "past the tail is the ghost";
        cursor.move_next();
        assert!(cursor.is_ghost(), "{case}");
        assert_eq!(cursor.index(), None, "{case}");
        assert_eq!(cursor.current(), None, "{case}");
        assert_eq!(cursor.peek_next().copied(), Some(1), "{case}");

        let case = "the ring is closed";
        cursor.move_next();
        assert_eq!(cursor.index(), Some(0), "{case}");
        cursor.move_prev();
        assert!(cursor.is_ghost(), "{case}");
        cursor.move_prev();
        assert_eq!(cursor.index(), Some(2), "{case}");
        assert_eq!(cursor.current().copied(), Some(3), "{case}");
    }

    #[test]
    fn ring_cursor_edits() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = ring_of(&allocator, &[1, 3]);
        let mut cursor = ring.cursor_front_mut();

        cursor.insert_after(2);
        cursor.insert_before(0);
        assert_eq!(cursor.index(), Some(1));
        assert_eq!(cursor.current().copied(), Some(1));

        let case = "remove moves to the next value";
        assert_eq!(cursor.remove_current(), Some(1), "{case}");
        assert_eq!(cursor.current().copied(), Some(2), "{case}");
        assert_eq!(cursor.index(), Some(1), "{case}");

        let case = "insert at the ghost";
        cursor.move_next();
        cursor.move_next();
        assert!(cursor.is_ghost(), "{case}");
        cursor.insert_before(4);
        cursor.insert_after(u32::MAX);
        assert_eq!(cursor.remove_current(), None, "{case}");
        assert_eq!(cursor.ring().len(), 5, "{case}");
        assert_eq!(collect(&ring), [u32::MAX, 0, 2, 3, 4], "{case}");
    }

    #[test]
    fn ring_cursor_split_here() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = ring_of(&allocator, &[1, 2, 3, 4]);

        let mut cursor = ring.cursor_front_mut();
        cursor.move_next();
        let tail = cursor.split_here();
        assert!(cursor.is_ghost());
        let at_ghost = cursor.split_here();
        assert!(at_ghost.is_empty());
        assert_eq!(collect(&ring), [1]);
        assert_eq!(collect(&tail), [2, 3, 4]);
    }

    #[test]
    fn ring_drops_values_once() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let shared = Rc::new(());
        let mut ring = Ring::new_in(&allocator);
        for _ in 0..100 {
            ring.push_back(Rc::clone(&shared));
        }
        let mut tail = ring.split_off(40);
        tail.pop_front();
        assert_eq!(Rc::strong_count(&shared), 100);
        drop(ring);
        drop(tail);
        assert_eq!(Rc::strong_count(&shared), 1);
        assert_eq!(allocator.live_cells(), 0);
    }

    #[test]
    fn ring_moves_between_allocators() {
        let pool = Pool::new();
        let first = BucketAllocator::new(&pool);
        let second = BucketAllocator::new(&pool);
        let mut a = ring_of(&first, &[1, 2]);
        let mut b = ring_of(&second, &[3]);
        b.prepend(&mut a);
        drop(a);
        assert_eq!(first.live_cells(), 2);
        assert_eq!(b.into_iter().collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(first.live_cells() + second.live_cells(), 0);
    }

    #[test]
    fn ring_iter_mut() {
        let pool = Pool::new();
        let allocator = BucketAllocator::new(&pool);
        let mut ring = ring_of(&allocator, &[1, 2, 3]);
        for value in &mut ring {
            *value *= 10;
        }
        assert_eq!(collect(&ring), [10, 20, 30]);
        assert_eq!(ring.iter_mut().len(), 3);
        assert_eq!(format!("{ring:?}"), "[10, 20, 30]");
    }
}
