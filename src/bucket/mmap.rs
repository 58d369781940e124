//! Memory-mapped buckets.

use std::io;

use super::{Bucket, BucketError, Kind};
use crate::{io::Mmap, pool::Pool};

impl<'a> Bucket<'a> {
    /// Creates a bucket over the whole of `map`. Use [`Bucket::split`] to
    /// narrow it down.
    #[must_use]
    pub fn mmap(map: Mmap) -> Bucket<'a> {
        Bucket {
            start: 0,
            length: Some(map.len()),
            kind: Kind::Mmap(map),
        }
    }
}

/// Moves the mapping to `pool`, unless its pool outlives `pool`.
pub(super) fn set_aside(map: &mut Mmap, pool: &Pool) -> io::Result<()> {
    if !map.is_live() {
        return Err(BucketError::Released.into());
    }
    if map.pool().is_ancestor_of(pool) {
        return Ok(());
    }
    *map = map.duplicate_into(pool)?;
    Ok(())
}
