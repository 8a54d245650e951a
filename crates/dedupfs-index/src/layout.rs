//! Offset arithmetic between logical byte space and slot space.

use std::ops::RangeInclusive;

use dedupfs_cas::HASH_SIZE;

/// Slot holding logical byte `offset`.
#[inline]
pub fn slot_of(offset: u64, block_size: u64) -> u64 {
    offset / block_size
}

/// Number of slots needed to cover `len` logical bytes.
#[inline]
pub fn slots_for(len: u64, block_size: u64) -> u64 {
    len.div_ceil(block_size)
}

/// Physical byte offset of `slot` within an index file.
///
/// `None` when the offset does not fit in an `off_t`.
#[inline]
pub fn physical_offset(slot: u64) -> Option<u64> {
    slot.checked_mul(HASH_SIZE as u64)
        .filter(|offset| *offset <= i64::MAX as u64)
}

/// Physical end of the region holding slots `..=last`.
pub fn physical_end(last: u64) -> Option<u64> {
    last.checked_add(1).and_then(physical_offset)
}

/// Logical size assumed for a record with no recorded size: every slot
/// region on disk holds a full block.
pub fn estimated_size(physical_len: u64, block_size: u64) -> u64 {
    physical_len
        .div_ceil(HASH_SIZE as u64)
        .saturating_mul(block_size)
}

/// Slots touched by the logical range `[offset, offset + len)`.
///
/// Returns `None` for an empty range.
pub fn covering_slots(offset: u64, len: u64, block_size: u64) -> Option<RangeInclusive<u64>> {
    if len == 0 {
        return None;
    }
    let end = offset.checked_add(len)?;
    Some(slot_of(offset, block_size)..=slot_of(end - 1, block_size))
}

/// Length of the chunk at `slot` in a file of `logical_size` bytes.
///
/// Zero for slots at or past the end of the file.
pub fn chunk_len(slot: u64, logical_size: u64, block_size: u64) -> u64 {
    let start = slot * block_size;
    logical_size.saturating_sub(start).min(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covering_slots() {
        assert_eq!(covering_slots(0, 8, 4), Some(0..=1));
        assert_eq!(covering_slots(3, 2, 4), Some(0..=1));
        assert_eq!(covering_slots(4, 4, 4), Some(1..=1));
        assert_eq!(covering_slots(5, 1, 4), Some(1..=1));
        assert_eq!(covering_slots(0, 0, 4), None);
        assert_eq!(covering_slots(u64::MAX, 2, 4), None);
    }

    #[test]
    fn test_chunk_len() {
        // "abcdef" with 4-byte blocks
        assert_eq!(chunk_len(0, 6, 4), 4);
        assert_eq!(chunk_len(1, 6, 4), 2);
        assert_eq!(chunk_len(2, 6, 4), 0);
        assert_eq!(chunk_len(1, 8, 4), 4);
    }

    #[test]
    fn test_slots_for_and_physical_offset() {
        assert_eq!(slots_for(0, 4), 0);
        assert_eq!(slots_for(6, 4), 2);
        assert_eq!(slots_for(8, 4), 2);
        assert_eq!(physical_offset(3), Some(3 * HASH_SIZE as u64));
    }

    #[test]
    fn test_physical_offset_overflow() {
        // 2^58 slots of 64 bytes wrap a u64
        assert_eq!(physical_offset(1 << 58), None);
        assert_eq!(physical_offset(1 << 57), None);
        assert!(physical_offset((1 << 57) - 1).is_some());
        assert_eq!(physical_end(u64::MAX), None);
        assert_eq!(physical_end(0), Some(HASH_SIZE as u64));
    }

    #[test]
    fn test_estimated_size() {
        assert_eq!(estimated_size(0, 4), 0);
        assert_eq!(estimated_size(128, 4), 8);
        // partial trailing region counts as a slot
        assert_eq!(estimated_size(130, 4), 12);
    }
}
