use crate::block_device::WritePhase;
use crate::{Block, BlockCount, BlockDevice};

use super::{cluster::Cluster, directory::DirEntry, FatError, FatVolume};

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// A root directory file opened for appending.
#[derive(Debug, Clone)]
pub struct AppendFile {
    dir_entry: DirEntry,
    /// The cluster holding the last byte written, once there is one
    tail: Option<Cluster>,
}

impl AppendFile {
    /// Open an existing entry and find where its data ends.
    pub fn open<BD>(
        volume: &FatVolume,
        device: &mut BD,
        dir_entry: DirEntry,
    ) -> Result<Self, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        if dir_entry.is_dir() {
            return Err(FatError::IsDirectory);
        }
        let size = dir_entry.file_size();
        let mut tail = None;
        if size > 0 && dir_entry.first_cluster().is_data() {
            let mut cluster = dir_entry.first_cluster();
            for _ in 0..(size - 1) / volume.bytes_per_cluster() {
                match volume.next_cluster(device, cluster)? {
                    Some(next) => cluster = next,
                    None => break,
                }
            }
            tail = Some(cluster);
        }
        Ok(Self { dir_entry, tail })
    }

    pub fn dir_entry(&self) -> &DirEntry {
        &self.dir_entry
    }

    pub fn size(&self) -> u32 {
        self.dir_entry.file_size()
    }

    /// The cluster the next byte goes into, allocating one if needed.
    fn cluster_for_next_byte<BD>(
        &mut self,
        volume: &mut FatVolume,
        device: &mut BD,
    ) -> Result<Cluster, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        let size = self.size();
        match self.tail {
            None if self.dir_entry.first_cluster().is_data() => Ok(self.dir_entry.first_cluster()),
            None => {
                let cluster = volume.allocate_cluster(device, None)?;
                self.dir_entry.set_first_cluster(cluster);
                Ok(cluster)
            }
            Some(tail) if size % volume.bytes_per_cluster() == 0 => {
                match volume.next_cluster(device, tail)? {
                    Some(next) => Ok(next),
                    None => volume.allocate_cluster(device, Some(tail)),
                }
            }
            Some(tail) => Ok(tail),
        }
    }

    /// Add `data` to the end of the file and update the directory entry.
    pub fn append<BD>(
        &mut self,
        volume: &mut FatVolume,
        device: &mut BD,
        data: &[u8],
    ) -> Result<(), FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        let mut rest = data;
        while !rest.is_empty() {
            let size = self.size();
            let cluster = self.cluster_for_next_byte(volume, device)?;
            let offset = size % volume.bytes_per_cluster();
            let block_idx =
                volume.cluster_start(cluster) + BlockCount(offset / Block::LEN_U32);
            let in_block = (offset % Block::LEN_U32) as usize;
            let count = rest.len().min(Block::LEN - in_block);
            let new_size = size
                .checked_add(count as u32)
                .ok_or(FatError::FileTooLarge)?;

            trace!("append {} bytes at block {} + {}", count, block_idx.0, in_block);
            if in_block == 0 {
                // Fresh block: stream it and let the device zero the rest.
                device
                    .write_partial(WritePhase::Open(block_idx))
                    .and_then(|_| device.write_partial(WritePhase::Stream(&rest[..count])))
                    .and_then(|_| device.write_partial(WritePhase::Finalize))
                    .map_err(FatError::DeviceError)?;
            } else {
                let mut block = device
                    .read_block(block_idx)
                    .map_err(FatError::DeviceError)?;
                block[in_block..in_block + count].copy_from_slice(&rest[..count]);
                device
                    .write(core::slice::from_ref(&block), block_idx)
                    .map_err(FatError::DeviceError)?;
            }

            self.tail = Some(cluster);
            self.dir_entry.set_file_size(new_size);
            rest = &rest[count..];
        }
        self.sync(volume, device)
    }

    /// Write the size and first cluster back to the directory.
    pub fn sync<BD>(&self, volume: &FatVolume, device: &mut BD) -> Result<(), FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        volume
            .write_entry(device, &self.dir_entry)
            .map_err(FatError::DeviceError)
    }
}
