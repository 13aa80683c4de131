use crate::error::FatError;
use crate::volume::Volume;

/// Smallest entry value that terminates a cluster chain.
pub(crate) const END_OF_CHAIN: u16 = 0xFF8;

/// Terminator written when ending a chain.
pub(crate) const CHAIN_TERMINATOR: u16 = 0xFFF;

/// Entry value of an unallocated cluster.
pub(crate) const FREE_CLUSTER: u16 = 0x000;

impl<B: AsRef<[u8]>> Volume<B> {
    /// Byte offset of a 12-bit entry inside one FAT copy.
    ///
    /// Entries are packed three bytes per two clusters, so the entry for
    /// cluster `n` starts at byte `n * 3 / 2` and spans two bytes; odd
    /// clusters take the high 12 bits of that little-endian word, even
    /// clusters the low 12.
    fn fat_entry_offset(&self, cluster: u16) -> Result<usize, FatError> {
        if cluster >= self.layout.max_clusters {
            return Err(FatError::ClusterOutOfRange(cluster));
        }
        let offset = cluster as usize * 3 / 2;
        if offset + 2 > self.layout.fat_copy_bytes {
            return Err(FatError::EntryOutOfFat(cluster));
        }
        Ok(offset)
    }

    pub(crate) fn read_fat_entry(&self, cluster: u16) -> Result<u16, FatError> {
        let offset = self.fat_entry_offset(cluster)?;
        let bytes = self
            .slice(self.layout.fat_offset + offset, 2)
            .ok_or(FatError::EntryOutOfFat(cluster))?;
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        let entry = if cluster % 2 == 1 {
            word >> 4
        } else {
            word & 0x0FFF
        };
        Ok(entry)
    }

    /// First free data cluster, scanning upwards from cluster 2.
    pub(crate) fn find_free_cluster(&self) -> Result<u16, FatError> {
        for cluster in 2..self.layout.max_clusters {
            if self.read_fat_entry(cluster)? == FREE_CLUSTER {
                return Ok(cluster);
            }
        }
        Err(FatError::NoFreeCluster)
    }

    /// Walks the chain starting at `start`, yielding each cluster in order.
    ///
    /// Errors are delivered in-stream: an out-of-range start, a link that
    /// points at a free or out-of-range cluster, or a walk longer than the
    /// volume has clusters (a cycle) each end the iteration with an `Err`
    /// item. The link out of a cluster is only checked once the caller asks
    /// for the cluster after it, so stopping early never trips over a bad
    /// tail link.
    pub(crate) fn chain_from(&self, start: u16) -> ClusterChain<'_, B> {
        let first = if (2..self.layout.max_clusters).contains(&start) {
            Some(Ok(start))
        } else {
            Some(Err(FatError::ClusterOutOfRange(start)))
        };
        ClusterChain {
            volume: self,
            staged: first,
            budget: self.layout.max_clusters,
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Volume<B> {
    /// Stores a 12-bit entry, mirrored into every FAT copy.
    pub(crate) fn write_fat_entry(&mut self, cluster: u16, value: u16) -> Result<(), FatError> {
        let offset = self.fat_entry_offset(cluster)?;
        let value = value & 0x0FFF;
        for copy in 0..self.layout.num_fats {
            let at = self.layout.fat_offset + copy * self.layout.fat_copy_bytes + offset;
            let bytes = self
                .slice_mut(at, 2)
                .ok_or(FatError::EntryOutOfFat(cluster))?;
            let word = u16::from_le_bytes([bytes[0], bytes[1]]);
            let merged = if cluster % 2 == 1 {
                (word & 0x000F) | (value << 4)
            } else {
                (word & 0xF000) | value
            };
            bytes.copy_from_slice(&merged.to_le_bytes());
        }
        Ok(())
    }

    /// Marks every cluster of a chain free.
    pub(crate) fn free_chain(&mut self, start: u16) -> Result<(), FatError> {
        let clusters: Vec<u16> = self.chain_from(start).collect::<Result<_, _>>()?;
        for cluster in clusters {
            self.write_fat_entry(cluster, FREE_CLUSTER)?;
        }
        Ok(())
    }
}

pub(crate) struct ClusterChain<'a, B> {
    volume: &'a Volume<B>,
    staged: Option<Result<u16, FatError>>,
    budget: u16,
}

impl<B: AsRef<[u8]>> Iterator for ClusterChain<'_, B> {
    type Item = Result<u16, FatError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.staged.take()?;
        let Ok(current) = item else {
            return Some(item);
        };

        // stage the successor before handing out the current cluster
        if self.budget == 0 {
            self.staged = Some(Err(FatError::CorruptChain(current)));
        } else {
            self.budget -= 1;
            self.staged = match self.volume.read_fat_entry(current) {
                Ok(entry) if entry >= END_OF_CHAIN => None,
                Ok(entry) if entry < 2 || entry >= self.volume.layout.max_clusters => {
                    Some(Err(FatError::CorruptChain(entry)))
                }
                Ok(entry) => Some(Ok(entry)),
                Err(e) => Some(Err(e)),
            };
        }
        Some(Ok(current))
    }
}

#[cfg(test)]
use crate::volume::floppy_image;

#[test]
fn entries_pack_three_bytes_per_pair() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 0xABC).unwrap();
    volume.write_fat_entry(3, 0xDEF).unwrap();

    // clusters 2 and 3 share bytes 3..6 of the FAT: BC FA DE
    let fat = &volume.as_bytes()[512..512 + 6];
    assert_eq!(fat, &[0x00, 0x00, 0x00, 0xBC, 0xFA, 0xDE]);

    assert_eq!(volume.read_fat_entry(2).unwrap(), 0xABC);
    assert_eq!(volume.read_fat_entry(3).unwrap(), 0xDEF);
}

#[test]
fn writes_mirror_into_every_fat_copy() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 0x123).unwrap();

    let first = &volume.as_bytes()[512 + 3..512 + 5];
    let second_copy = 512 + 9 * 512;
    let second = &volume.as_bytes()[second_copy + 3..second_copy + 5];
    assert_eq!(first, second);
    assert_eq!(first, &[0x23, 0x01]);
}

#[test]
fn neighbouring_entries_do_not_clobber_each_other() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(4, 0xFFF).unwrap();
    volume.write_fat_entry(5, 0x005).unwrap();
    assert_eq!(volume.read_fat_entry(4).unwrap(), 0xFFF);
    assert_eq!(volume.read_fat_entry(5).unwrap(), 0x005);

    volume.write_fat_entry(4, 0x000).unwrap();
    assert_eq!(volume.read_fat_entry(5).unwrap(), 0x005);
}

#[test]
fn free_scan_starts_at_cluster_two() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    assert_eq!(volume.find_free_cluster().unwrap(), 2);

    volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();
    assert_eq!(volume.find_free_cluster().unwrap(), 3);
}

#[test]
fn chain_walk_follows_links_to_the_terminator() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 5).unwrap();
    volume.write_fat_entry(5, 9).unwrap();
    volume.write_fat_entry(9, CHAIN_TERMINATOR).unwrap();

    let clusters: Vec<u16> = volume.chain_from(2).collect::<Result<_, _>>().unwrap();
    assert_eq!(clusters, vec![2, 5, 9]);
}

#[test]
fn chain_walk_reports_cycles() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 3).unwrap();
    volume.write_fat_entry(3, 2).unwrap();

    let outcome: Result<Vec<u16>, FatError> = volume.chain_from(2).collect();
    assert!(matches!(outcome, Err(FatError::CorruptChain(_))));
}

#[test]
fn chain_walk_reports_a_link_to_a_free_cluster() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 3).unwrap();
    // cluster 3 is still free, so the chain is corrupt

    let outcome: Result<Vec<u16>, FatError> = volume.chain_from(2).collect();
    assert!(matches!(outcome, Err(FatError::CorruptChain(3))));
}

#[test]
fn early_stop_ignores_a_bad_tail_link() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 1).unwrap();

    let first = volume.chain_from(2).next().unwrap();
    assert_eq!(first.unwrap(), 2);
}

#[test]
fn freeing_a_chain_releases_every_cluster() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    volume.write_fat_entry(2, 4).unwrap();
    volume.write_fat_entry(4, CHAIN_TERMINATOR).unwrap();
    volume.write_fat_entry(7, CHAIN_TERMINATOR).unwrap();

    volume.free_chain(2).unwrap();
    assert_eq!(volume.read_fat_entry(2).unwrap(), FREE_CLUSTER);
    assert_eq!(volume.read_fat_entry(4).unwrap(), FREE_CLUSTER);
    assert_eq!(volume.read_fat_entry(7).unwrap(), CHAIN_TERMINATOR);
}

#[test]
fn entries_past_the_fat_copy_are_rejected() {
    let mut image = floppy_image();
    // shrink the FAT to one sector so high clusters fall outside it
    image[22] = 1;
    image[23] = 0;
    let volume = Volume::mount(image).unwrap();

    assert!(matches!(
        volume.read_fat_entry(400),
        Err(FatError::EntryOutOfFat(400))
    ));
}
