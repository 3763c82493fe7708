//! Logging straight into a range of blocks, with no filesystem.
//!
//! Every write covers whole blocks: the data is streamed in and the device
//! pads the last block with zeros. A region that has been logged to before
//! is resumed at its first block that starts with 0x00 or 0xFF.

use crate::block_device::WritePhase;
use crate::{Block, BlockCount, BlockDevice, BlockIdx};

use super::StorageBackend;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

/// The errors a [`RawBlockStorage`] can return.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RawError<E> {
    /// The block device failed
    Device(E),
    /// Every block in the region has been written
    RegionFull,
    /// `write` before `open_append`
    NotOpen,
}

/// Appends to the blocks `[start, start + len)` of a device.
pub struct RawBlockStorage<D>
where
    D: BlockDevice,
{
    device: D,
    region_start: BlockIdx,
    region_len: BlockCount,
    next: Option<BlockIdx>,
}

impl<D> RawBlockStorage<D>
where
    D: BlockDevice,
{
    pub fn new(device: D, region_start: BlockIdx, region_len: BlockCount) -> Self {
        Self {
            device,
            region_start,
            region_len,
            next: None,
        }
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn release(self) -> D {
        self.device
    }

    /// The block the next write starts at, while open.
    pub fn next_block(&self) -> Option<BlockIdx> {
        self.next
    }

    fn region_end(&self) -> BlockIdx {
        self.region_start + self.region_len
    }

    /// Has this block been logged to? Only its first byte is read.
    fn is_used(&mut self, block_idx: BlockIdx) -> Result<bool, RawError<D::Error>> {
        let mut first = [0u8; 1];
        self.device
            .read_partial(Some(&mut first), block_idx, 0, 1)
            .map_err(RawError::Device)?;
        Ok(first[0] != 0x00 && first[0] != 0xFF)
    }

    /// Logged blocks are contiguous from the region start, so the first free
    /// one can be found by bisection.
    fn find_first_free(&mut self) -> Result<BlockIdx, RawError<D::Error>> {
        let mut low = self.region_start.0;
        let mut high = self.region_end().0;
        while low < high {
            let mid = low + (high - low) / 2;
            if self.is_used(BlockIdx(mid))? {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(BlockIdx(low))
    }
}

impl<D> StorageBackend for RawBlockStorage<D>
where
    D: BlockDevice,
{
    type Error = RawError<D::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.next = None;
        self.device.initialize().map_err(RawError::Device)
    }

    /// The region has no names, so `name` is ignored.
    fn open_append(&mut self, _name: &str) -> Result<(), Self::Error> {
        let next = self.find_first_free()?;
        debug!("Raw log resumes at block {}", next.0);
        if next >= self.region_end() {
            return Err(RawError::RegionFull);
        }
        self.next = Some(next);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let end = self.region_end();
        for chunk in data.chunks(Block::LEN) {
            let block_idx = self.next.ok_or(RawError::NotOpen)?;
            if block_idx >= end {
                return Err(RawError::RegionFull);
            }
            self.device
                .write_partial(WritePhase::Open(block_idx))
                .map_err(RawError::Device)?;
            let mut rest = chunk;
            while !rest.is_empty() {
                let sent = self
                    .device
                    .write_partial(WritePhase::Stream(rest))
                    .map_err(RawError::Device)?;
                if sent == 0 {
                    break;
                }
                rest = &rest[sent..];
            }
            self.device
                .write_partial(WritePhase::Finalize)
                .map_err(RawError::Device)?;
            self.next = Some(block_idx + BlockCount(1));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.next = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlockDevice;

    #[test]
    fn writes_whole_blocks_and_resumes_after_them() {
        let mut disk = vec![0u8; 16 * Block::LEN];
        {
            let mut storage =
                RawBlockStorage::new(MemoryBlockDevice::new(&mut disk), BlockIdx(4), BlockCount(8));
            storage.init().unwrap();
            storage.open_append("ignored").unwrap();
            assert_eq!(storage.next_block(), Some(BlockIdx(4)));
            storage.write(&[b'a'; 600]).unwrap();
            storage.write(b"bc").unwrap();
            assert_eq!(storage.next_block(), Some(BlockIdx(7)));
            storage.close().unwrap();
            assert_eq!(storage.next_block(), None);
        }
        assert_eq!(disk[4 * Block::LEN], b'a');
        assert_eq!(disk[5 * Block::LEN + 87], b'a');
        assert_eq!(disk[5 * Block::LEN + 88], 0);
        assert_eq!(&disk[6 * Block::LEN..6 * Block::LEN + 3], b"bc\0");

        let mut storage =
            RawBlockStorage::new(MemoryBlockDevice::new(&mut disk), BlockIdx(4), BlockCount(8));
        storage.init().unwrap();
        storage.open_append("ignored").unwrap();
        assert_eq!(storage.next_block(), Some(BlockIdx(7)));
    }

    #[test]
    fn erased_blocks_count_as_free() {
        let mut disk = vec![0xFFu8; 8 * Block::LEN];
        disk[0] = b'x';
        let mut storage =
            RawBlockStorage::new(MemoryBlockDevice::new(&mut disk), BlockIdx(0), BlockCount(8));
        storage.open_append("").unwrap();
        assert_eq!(storage.next_block(), Some(BlockIdx(1)));
    }

    #[test]
    fn full_region_and_unopened_writes_fail() {
        let mut disk = vec![b'x'; 4 * Block::LEN];
        let mut storage =
            RawBlockStorage::new(MemoryBlockDevice::new(&mut disk), BlockIdx(0), BlockCount(4));
        assert_eq!(storage.write(b"data"), Err(RawError::NotOpen));
        assert_eq!(storage.open_append(""), Err(RawError::RegionFull));
    }
}
