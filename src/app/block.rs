//! File blocks and block planning
//!
//! A [`FileBlock`] is one contiguous, inclusive byte range of the logical file
//! together with the source it is fetched from. The planning functions split a
//! file of known length into blocks that partition `[0, total_length - 1]`
//! exactly: contiguous, non-overlapping and ordered by index.

use crate::app::source::Source;

/// One inclusive byte range of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    source: Source,
    index: u32,
    start: u64,
    end: u64,
}

impl FileBlock {
    pub fn new(source: Source, index: u32, start: u64, end: u64) -> Self {
        debug_assert!(end >= start, "block end before start");
        Self {
            source,
            index,
            start,
            end,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// First byte, inclusive
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte, inclusive
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Decide how many blocks a file is split into
///
/// Servers without range support and files below `min_block_size` always get
/// a single block. Otherwise the per-request thread count is used, capped by
/// `max_block_count` and by the file length so no block is empty.
pub fn block_count(
    total_length: u64,
    resume_supported: bool,
    min_block_size: u64,
    threads_per_request: usize,
    max_block_count: usize,
) -> usize {
    if !resume_supported || total_length < min_block_size {
        return 1;
    }

    let count = threads_per_request.min(max_block_count).max(1) as u64;
    count.min(total_length.max(1)) as usize
}

/// Split `[0, total_length - 1]` into `count` equal blocks
///
/// The last block absorbs the remainder. Returns the blocks and the nominal
/// block size (`total_length / count`).
pub fn plan_blocks(source: &Source, total_length: u64, count: usize) -> (Vec<FileBlock>, u64) {
    if total_length == 0 {
        return (Vec::new(), 0);
    }

    let count = (count.max(1) as u64).min(total_length);
    let block_size = total_length / count;

    let blocks = (0..count)
        .map(|i| {
            let start = i * block_size;
            let end = if i + 1 == count {
                total_length - 1
            } else {
                start + block_size - 1
            };
            FileBlock::new(source.clone(), i as u32, start, end)
        })
        .collect();

    (blocks, block_size)
}

/// Check that `(start, end)` ranges, in index order, partition the file
pub fn is_partition<I>(ranges: I, total_length: u64) -> bool
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut next = 0u64;
    for (start, end) in ranges {
        if start != next || end < start {
            return false;
        }
        next = end + 1;
    }
    total_length > 0 && next == total_length
}
