//! sdmmc-logger - Block Device support
//!
//! Generic code for handling block devices.
//!
//! The required methods of [`BlockDevice`] are the partial primitives an SD
//! card over SPI offers natively: read any byte range of one block, and write
//! one block as an open / stream / finalize sequence. Whole-block reads and
//! writes are provided on top of them.

mod block;
pub use block::*;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// One step of a single-block write.
#[derive(Debug, Copy, Clone)]
pub enum WritePhase<'a> {
    /// Start writing the given block. Nothing else may touch the device
    /// until the matching `Finalize`.
    Open(BlockIdx),
    /// Send the next bytes of the block. Bytes past the end of the block
    /// are not consumed.
    Stream(&'a [u8]),
    /// Pad the block with zeros and commit it.
    Finalize,
}

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;

    /// Bring the device into a usable state. Called again after a failure.
    fn initialize(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Read `count` bytes starting at `offset` within one block.
    ///
    /// With no buffer the bytes are clocked through and dropped.
    /// `offset + count` must not exceed [`Block::LEN`].
    fn read_partial(
        &mut self,
        buffer: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Self::Error>;

    /// Perform one phase of a single-block write. Returns how many bytes a
    /// `Stream` phase consumed, and zero for the other phases.
    fn write_partial(&mut self, phase: WritePhase<'_>) -> Result<usize, Self::Error>;

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error>;

    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        trace!(
            "read {} blocks @ {} for {}",
            blocks.len(),
            start_block_idx.0,
            reason
        );
        let mut idx = start_block_idx;
        for block in blocks.iter_mut() {
            self.read_partial(Some(&mut block.contents[..]), idx, 0, Block::LEN)?;
            idx += BlockCount(1);
        }
        Ok(())
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        trace!("write {} blocks @ {}", blocks.len(), start_block_idx.0);
        let mut idx = start_block_idx;
        for block in blocks.iter() {
            self.write_partial(WritePhase::Open(idx))?;
            let mut rest = &block.contents[..];
            while !rest.is_empty() {
                let sent = self.write_partial(WritePhase::Stream(rest))?;
                if sent == 0 {
                    break;
                }
                rest = &rest[sent..];
            }
            self.write_partial(WritePhase::Finalize)?;
            idx += BlockCount(1);
        }
        Ok(())
    }

    /// Read a single block.
    fn read_block(&mut self, block_idx: BlockIdx) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx, "read_block")?;
        let [block] = blocks;
        Ok(block)
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        (*self).initialize()
    }

    fn read_partial(
        &mut self,
        buffer: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Self::Error> {
        (*self).read_partial(buffer, block_idx, offset, count)
    }

    fn write_partial(&mut self, phase: WritePhase<'_>) -> Result<usize, Self::Error> {
        (*self).write_partial(phase)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        (*self).num_blocks()
    }
}

/// The errors a [`MemoryBlockDevice`] can report.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The block is past the end of the backing memory
    OutOfRange(BlockIdx),
    /// The offset and count do not fit in one block
    InvalidArgument,
    /// A write phase arrived out of order
    BadState,
}

/// A block device backed by a byte slice, e.g. a disk image in RAM.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
    pending: Option<(BlockIdx, usize)>,
    staged: Block,
}

impl<'a> MemoryBlockDevice<'a> {
    /// Wrap some memory. Any trailing partial block is ignored.
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self {
            memory,
            pending: None,
            staged: Block::new(),
        }
    }

    /// The raw contents of the device.
    pub fn memory(&self) -> &[u8] {
        self.memory
    }

    fn block_start(&self, block_idx: BlockIdx) -> Result<usize, MemoryError> {
        let start = block_idx.0 as usize * Block::LEN;
        if start + Block::LEN > self.memory.len() {
            Err(MemoryError::OutOfRange(block_idx))
        } else {
            Ok(start)
        }
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = MemoryError;

    fn read_partial(
        &mut self,
        buffer: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Self::Error> {
        if count == 0 || offset + count > Block::LEN {
            return Err(MemoryError::InvalidArgument);
        }
        let start = self.block_start(block_idx)? + offset;
        if let Some(buffer) = buffer {
            if buffer.len() < count {
                return Err(MemoryError::InvalidArgument);
            }
            buffer[..count].copy_from_slice(&self.memory[start..start + count]);
        }
        Ok(())
    }

    fn write_partial(&mut self, phase: WritePhase<'_>) -> Result<usize, Self::Error> {
        match phase {
            WritePhase::Open(block_idx) => {
                if self.pending.is_some() {
                    return Err(MemoryError::BadState);
                }
                self.block_start(block_idx)?;
                self.staged = Block::new();
                self.pending = Some((block_idx, 0));
                Ok(0)
            }
            WritePhase::Stream(data) => {
                let (block_idx, filled) = self.pending.ok_or(MemoryError::BadState)?;
                let count = data.len().min(Block::LEN - filled);
                self.staged.contents[filled..filled + count].copy_from_slice(&data[..count]);
                self.pending = Some((block_idx, filled + count));
                Ok(count)
            }
            WritePhase::Finalize => {
                let (block_idx, _) = self.pending.take().ok_or(MemoryError::BadState)?;
                let start = self.block_start(block_idx)?;
                self.memory[start..start + Block::LEN].copy_from_slice(&self.staged.contents);
                Ok(0)
            }
        }
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        Ok(BlockCount((self.memory.len() / Block::LEN) as u32))
    }
}
