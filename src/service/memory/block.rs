use crate::service::address::Address;
use itertools::Itertools;
use smallvec::SmallVec;

/// Single octet of a memory read result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryByte {
    pub value: u8,
    /// False if octet can't be read from target, in this case `value` is always `0`.
    pub valid: bool,
}

impl MemoryByte {
    pub const INVALID: MemoryByte = MemoryByte {
        value: 0,
        valid: false,
    };

    pub fn new(value: u8) -> Self {
        Self { value, valid: true }
    }
}

/// Range of target memory with known content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    start: Address,
    units: u64,
    octets: u64,
    bytes: Vec<u8>,
}

impl MemoryBlock {
    /// Create a block from an octet buffer.
    /// Trailing octets that not form a whole addressable unit are dropped.
    pub fn new(start: Address, word_size: usize, mut bytes: Vec<u8>) -> Self {
        let units = (bytes.len() / word_size) as u64;
        bytes.truncate(units as usize * word_size);
        Self {
            start,
            units,
            octets: bytes.len() as u64,
            bytes,
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn octets(&self) -> u64 {
        self.octets
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Exclusive end position of the block.
    pub fn end(&self) -> u128 {
        self.start.end(self.units)
    }

    fn overlaps(&self, start: u128, end: u128) -> bool {
        self.start.as_u128() < end && self.end() > start
    }

    /// Copy block part that intersects `dst` range into `dst`.
    ///
    /// # Arguments
    ///
    /// * `dst`: output buffer
    /// * `dst_start`: address of a first unit in output buffer
    /// * `word_size`: size of addressable unit
    pub fn copy_into(&self, dst: &mut [MemoryByte], dst_start: Address, word_size: usize) {
        let dst_begin = dst_start.as_u128();
        let dst_end = dst_begin + (dst.len() / word_size) as u128;
        let from = self.start.as_u128().max(dst_begin);
        let to = self.end().min(dst_end);
        if from >= to {
            return;
        }

        let src_off = (from - self.start.as_u128()) as usize * word_size;
        let dst_off = (from - dst_begin) as usize * word_size;
        let len = (to - from) as usize * word_size;
        dst[dst_off..dst_off + len]
            .iter_mut()
            .zip(&self.bytes[src_off..src_off + len])
            .for_each(|(d, s)| *d = MemoryByte::new(*s));
    }
}

/// Part of a requested range not present in cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub start: Address,
    pub units: u64,
}

impl Gap {
    pub fn end(&self) -> u128 {
        self.start.end(self.units)
    }
}

/// Ordered collection of non-overlapping cached memory blocks.
///
/// Contiguous blocks are merged on insert unless merged block would be longer than
/// `max_block_units`. In this case blocks stay separate (but adjacent), all operations
/// take such neighbors into account.
#[derive(Debug)]
pub struct SortedBlockList {
    blocks: Vec<MemoryBlock>,
    word_size: usize,
    max_block_units: u64,
}

impl SortedBlockList {
    pub fn new(word_size: usize, max_block_units: u64) -> Self {
        debug_assert!(word_size >= 1);
        Self {
            blocks: vec![],
            word_size,
            max_block_units,
        }
    }

    pub fn word_size(&self) -> usize {
        self.word_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.iter()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Index of a first block that ends after `pos`.
    fn first_ending_after(&self, pos: u128) -> usize {
        self.blocks.partition_point(|b| b.end() <= pos)
    }

    /// Insert a block, merge it with contiguous neighbors.
    /// Cached data overlapped by a new block is replaced by new block content.
    pub fn insert(&mut self, block: MemoryBlock) {
        debug_assert_eq!(block.octets, block.units * self.word_size as u64);
        if block.units == 0 {
            return;
        }

        let ws = self.word_size;
        let begin = block.start.as_u128();
        let end = block.end();

        let first = self.first_ending_after(begin);
        let last = first
            + self.blocks[first..]
                .iter()
                .take_while(|b| b.start.as_u128() < end)
                .count();

        let block = if first == last {
            block
        } else {
            let union_begin = self.blocks[first].start.as_u128().min(begin);
            let union_end = self.blocks[last - 1].end().max(end);
            let mut bytes = vec![0; (union_end - union_begin) as usize * ws];
            for old in self.blocks[first..last].iter().chain(std::iter::once(&block)) {
                let off = (old.start.as_u128() - union_begin) as usize * ws;
                bytes[off..off + old.bytes.len()].copy_from_slice(&old.bytes);
            }
            MemoryBlock::new(Address::from_position(union_begin), ws, bytes)
        };

        self.blocks.splice(first..last, std::iter::once(block));

        let mut idx = first;
        if idx > 0 && self.can_merge(idx - 1, idx) {
            let next = self.blocks.remove(idx);
            self.merge_into(idx - 1, next);
            idx -= 1;
        }
        if idx + 1 < self.blocks.len() && self.can_merge(idx, idx + 1) {
            let next = self.blocks.remove(idx + 1);
            self.merge_into(idx, next);
        }

        debug_assert!(self
            .blocks
            .iter()
            .tuple_windows()
            .all(|(l, r)| l.end() <= r.start.as_u128()));
    }

    fn can_merge(&self, left: usize, right: usize) -> bool {
        let (l, r) = (&self.blocks[left], &self.blocks[right]);
        l.end() == r.start.as_u128()
            && l.units
                .checked_add(r.units)
                .map(|units| units <= self.max_block_units)
                .unwrap_or_default()
    }

    fn merge_into(&mut self, idx: usize, next: MemoryBlock) {
        let block = &mut self.blocks[idx];
        block.units += next.units;
        block.octets += next.octets;
        block.bytes.extend_from_slice(&next.bytes);
    }

    /// Return parts of range `[start, start + units)` that are not cached, in ascending order.
    pub fn find_gaps(&self, start: Address, units: u64) -> SmallVec<[Gap; 4]> {
        let mut gaps = SmallVec::new();
        let end = start.end(units);
        let mut cursor = start.as_u128();

        for block in &self.blocks[self.first_ending_after(cursor)..] {
            if cursor >= end || block.start.as_u128() >= end {
                break;
            }
            if block.start.as_u128() > cursor {
                gaps.push(Gap {
                    start: Address::from_position(cursor),
                    units: (block.start.as_u128() - cursor) as u64,
                });
            }
            cursor = cursor.max(block.end());
        }

        if cursor < end {
            gaps.push(Gap {
                start: Address::from_position(cursor),
                units: (end - cursor) as u64,
            });
        }
        gaps
    }

    /// True if at least one unit of a range is cached.
    pub fn contains_any(&self, start: Address, units: u64) -> bool {
        let end = start.end(units);
        self.blocks[self.first_ending_after(start.as_u128())..]
            .first()
            .map(|b| b.overlaps(start.as_u128(), end))
            .unwrap_or_default()
    }

    /// Read cached range. Units not covered by cache are returned as invalid bytes.
    pub fn read_range(&self, start: Address, units: u64) -> Vec<MemoryByte> {
        let mut result = vec![MemoryByte::INVALID; units as usize * self.word_size];
        let end = start.end(units);
        self.blocks[self.first_ending_after(start.as_u128())..]
            .iter()
            .take_while(|b| b.start.as_u128() < end)
            .for_each(|b| b.copy_into(&mut result, start, self.word_size));
        result
    }

    /// Update content of cached blocks overlapped by a modified range.
    /// Parts of a range that are not cached stay uncached.
    ///
    /// # Arguments
    ///
    /// * `start`: first modified unit
    /// * `units`: number of modified units
    /// * `bytes`: new content, `units * word size` octets
    pub fn write_range(&mut self, start: Address, units: u64, bytes: &[u8]) {
        let ws = self.word_size;
        let begin = start.as_u128();
        let end = start.end(units).min(begin + (bytes.len() / ws) as u128);

        let first = self.first_ending_after(begin);
        for block in self.blocks[first..]
            .iter_mut()
            .take_while(|b| b.start.as_u128() < end)
        {
            let from = block.start.as_u128().max(begin);
            let to = block.end().min(end);
            let dst_off = (from - block.start.as_u128()) as usize * ws;
            let src_off = (from - begin) as usize * ws;
            let len = (to - from) as usize * ws;
            block.bytes[dst_off..dst_off + len].copy_from_slice(&bytes[src_off..src_off + len]);
        }
    }
}
