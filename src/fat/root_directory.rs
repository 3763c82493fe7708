use crate::{BlockCount, BlockDevice, BlockIdx};

use super::{cluster::ClusterIterator, Cluster, FatError, FatVolume, SectorIter};

/// Where the root directory lives: a fixed region on FAT16, a cluster chain
/// on FAT32.
#[derive(Debug, Clone, Copy)]
pub enum RootDirectorySectors {
    Cluster(Cluster),
    Region {
        start_block: BlockIdx,
        len: BlockCount,
    },
}

impl RootDirectorySectors {
    pub fn iter(&self, volume: &FatVolume) -> RootDirIter {
        match *self {
            RootDirectorySectors::Cluster(cluster) => {
                RootDirIter::Chain(ClusterIterator::new(cluster, volume))
            }
            RootDirectorySectors::Region { start_block, len } => {
                RootDirIter::Region { start_block, len }
            }
        }
    }
}

#[derive(Debug)]
pub enum RootDirIter {
    Chain(ClusterIterator),
    Region {
        start_block: BlockIdx,
        len: BlockCount,
    },
}

impl SectorIter for RootDirIter {
    fn next_sector<BD>(
        &mut self,
        volume: &FatVolume,
        device: &mut BD,
    ) -> Result<Option<BlockIdx>, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        match self {
            RootDirIter::Chain(clusters) => clusters.next_sector(volume, device),
            RootDirIter::Region { start_block, len } => {
                if *len == BlockCount(0) {
                    Ok(None)
                } else {
                    let res = *start_block;
                    *len -= BlockCount(1);
                    *start_block += BlockCount(1);
                    Ok(Some(res))
                }
            }
        }
    }
}
