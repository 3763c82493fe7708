use crate::block_device::BlockIter;
use crate::{BlockDevice, BlockIdx};

use super::{FatError, FatVolume, SectorIter};

/// A cluster number. Data clusters start at 2.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cluster(pub u32);

impl Cluster {
    /// The first cluster of the data region
    pub const FIRST_DATA: Cluster = Cluster(2);

    /// Does this refer to a data cluster at all? Empty files have cluster 0.
    pub fn is_data(&self) -> bool {
        self.0 >= Self::FIRST_DATA.0
    }

    pub fn all_sectors(&self, volume: &FatVolume) -> ClusterIterator {
        ClusterIterator::new(*self, volume)
    }
}

/// Walks every block of a cluster chain.
#[derive(Debug, Clone)]
pub struct ClusterIterator {
    current_cluster: Cluster,
    cluster_sectors: BlockIter,
}

impl ClusterIterator {
    pub fn new(start: Cluster, volume: &FatVolume) -> Self {
        Self {
            current_cluster: start,
            cluster_sectors: volume
                .cluster_start(start)
                .range(volume.bpb().sectors_per_cluster()),
        }
    }
}

impl SectorIter for ClusterIterator {
    fn next_sector<BD>(
        &mut self,
        volume: &FatVolume,
        device: &mut BD,
    ) -> Result<Option<BlockIdx>, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        if let Some(next_sector) = self.cluster_sectors.next() {
            return Ok(Some(next_sector));
        }
        match volume.next_cluster(device, self.current_cluster)? {
            Some(next_cluster) => {
                self.current_cluster = next_cluster;
                self.cluster_sectors = volume
                    .cluster_start(next_cluster)
                    .range(volume.bpb().sectors_per_cluster());
                Ok(self.cluster_sectors.next())
            }
            None => Ok(None),
        }
    }
}

