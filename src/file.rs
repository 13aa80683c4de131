use crate::dir::{DirEntry, DirName, Directory};
use crate::error::{DirError, ReadError, WriteError};
use crate::fat::CHAIN_TERMINATOR;
use crate::volume::Volume;

impl<B: AsRef<[u8]>> Volume<B> {
    /// Reads a file out of the root directory.
    ///
    /// Follows the entry's cluster chain, taking at most `file_size` bytes;
    /// slack after the size in the final cluster is never handed out. An
    /// entry with size zero or no cluster reads as empty.
    pub fn read_file(&self, name: &DirName) -> Result<Vec<u8>, ReadError> {
        self.read_from(Directory::Root, name)
    }

    /// Reads a file out of a root-level subdirectory.
    pub fn read_file_in_dir(&self, dir: &DirName, name: &DirName) -> Result<Vec<u8>, ReadError> {
        let cluster = self.find_directory(dir)?;
        self.read_from(Directory::Cluster(cluster), name)
    }

    pub(crate) fn read_from(&self, dir: Directory, name: &DirName) -> Result<Vec<u8>, ReadError> {
        let (_, entry) = self.find_in(dir, name)?;
        let size = entry.file_size();
        let first = entry.first_cluster();
        if size == 0 || first < 2 {
            return Ok(Vec::new());
        }

        let mut data = Vec::with_capacity(size as usize);
        let mut remaining = size as usize;
        for cluster in self.chain_from(first) {
            let chunk = self.cluster_bytes(cluster?)?;
            let take = remaining.min(chunk.len());
            data.extend_from_slice(&chunk[..take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }
        if remaining > 0 {
            return Err(ReadError::SizeBeyondChain {
                size,
                available: size - remaining as u32,
            });
        }
        Ok(data)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Volume<B> {
    /// Creates or overwrites a file in the root directory.
    ///
    /// Data larger than one cluster is rejected. The cluster and its FAT
    /// entry always land before the directory entry points at them, and an
    /// overwrite frees the previous chain only after the entry has moved,
    /// so an interrupted write leaks a cluster at worst.
    pub fn write_file(&mut self, name: &DirName, data: &[u8]) -> Result<(), WriteError> {
        let max = self.layout.bytes_per_cluster;
        if data.len() > max {
            return Err(WriteError::DataTooLarge {
                size: data.len() as u32,
                max: max as u32,
            });
        }

        match self.find_in(Directory::Root, name) {
            Ok((offset, mut entry)) => {
                let old_cluster = entry.first_cluster();
                let new_cluster = self.store_data(data)?;
                entry.cluster_low = new_cluster.to_le();
                entry.file_size = (data.len() as u32).to_le();
                self.write_entry_at(offset, &entry);
                if old_cluster >= 2 {
                    self.free_chain(old_cluster)?;
                }
                Ok(())
            }
            Err(DirError::NotFound(_)) => {
                let slot = self.find_free_root_slot()?;
                let cluster = self.store_data(data)?;
                let entry = DirEntry::for_file(*name, cluster, data.len() as u32);
                self.write_entry_at(slot, &entry);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fills one freshly allocated cluster, or returns cluster 0 for empty data.
    fn store_data(&mut self, data: &[u8]) -> Result<u16, WriteError> {
        if data.is_empty() {
            return Ok(0);
        }
        let cluster = self.find_free_cluster()?;
        self.write_fat_entry(cluster, CHAIN_TERMINATOR)?;
        self.cluster_bytes_mut(cluster)?[..data.len()].copy_from_slice(data);
        Ok(cluster)
    }
}

#[cfg(test)]
use crate::dir::{DIR_ENTRY_SIZE, Attributes};
#[cfg(test)]
use crate::error::FatError;
#[cfg(test)]
use crate::volume::floppy_image;

#[cfg(test)]
fn place_file(image: &mut [u8], slot: usize, name: &str, cluster: u16, size: u32) {
    let entry = DirEntry::for_file(DirName::new(name), cluster, size);
    let offset = 9728 + slot * DIR_ENTRY_SIZE;
    image[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(bytemuck::bytes_of(&entry));
}

#[test]
fn reads_a_file_stored_at_cluster_two() {
    let mut image = floppy_image();
    place_file(&mut image, 0, "hello.txt", 2, 3);
    image[16896..16896 + 3].copy_from_slice(b"hi\n");
    let mut volume = Volume::mount(image).unwrap();
    volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();

    let data = volume.read_file(&DirName::new("hello.txt")).unwrap();
    assert_eq!(data, b"hi\n");
}

#[test]
fn read_concatenates_a_multi_cluster_chain() {
    let mut image = floppy_image();
    place_file(&mut image, 0, "big.bin", 2, 700);
    image[16896..16896 + 512].fill(0xAA);
    image[16896 + 512..16896 + 1024].fill(0xBB);
    let mut volume = Volume::mount(image).unwrap();
    volume.write_fat_entry(2, 3).unwrap();
    volume.write_fat_entry(3, CHAIN_TERMINATOR).unwrap();

    let data = volume.read_file(&DirName::new("big.bin")).unwrap();
    assert_eq!(data.len(), 700);
    assert!(data[..512].iter().all(|&b| b == 0xAA));
    assert!(data[512..].iter().all(|&b| b == 0xBB));
}

#[test]
fn read_stops_exactly_at_a_cluster_boundary() {
    let mut image = floppy_image();
    place_file(&mut image, 0, "page.bin", 2, 512);
    let mut volume = Volume::mount(image).unwrap();
    volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();

    let data = volume.read_file(&DirName::new("page.bin")).unwrap();
    assert_eq!(data.len(), 512);
}

#[test]
fn read_rejects_a_size_past_the_chain_end() {
    let mut image = floppy_image();
    place_file(&mut image, 0, "liar.bin", 2, 600);
    let mut volume = Volume::mount(image).unwrap();
    volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();

    assert!(matches!(
        volume.read_file(&DirName::new("liar.bin")),
        Err(ReadError::SizeBeyondChain {
            size: 600,
            available: 512,
        })
    ));
}

#[test]
fn empty_and_clusterless_entries_read_as_empty() {
    let mut image = floppy_image();
    place_file(&mut image, 0, "empty.txt", 0, 0);
    let volume = Volume::mount(image).unwrap();

    assert_eq!(volume.read_file(&DirName::new("empty.txt")).unwrap(), b"");
    assert!(matches!(
        volume.read_file(&DirName::new("absent.txt")),
        Err(ReadError::Dir(DirError::NotFound(_)))
    ));
}

#[test]
fn reads_from_a_subdirectory() {
    let mut image = floppy_image();
    let mut sub = DirEntry::for_file(DirName::new("core"), 2, 0);
    sub.attributes = Attributes::DIRECTORY.bits();
    image[9728..9728 + DIR_ENTRY_SIZE].copy_from_slice(bytemuck::bytes_of(&sub));

    let inner = DirEntry::for_file(DirName::new("note.txt"), 3, 4);
    image[16896..16896 + DIR_ENTRY_SIZE].copy_from_slice(bytemuck::bytes_of(&inner));
    image[16896 + 512..16896 + 516].copy_from_slice(b"ok!\n");

    let mut volume = Volume::mount(image).unwrap();
    volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();
    volume.write_fat_entry(3, CHAIN_TERMINATOR).unwrap();

    let data = volume
        .read_file_in_dir(&DirName::new("core"), &DirName::new("note.txt"))
        .unwrap();
    assert_eq!(data, b"ok!\n");
}

#[test]
fn write_then_read_round_trips() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    let name = DirName::new("hello.txt");
    volume.write_file(&name, b"hi\n").unwrap();

    assert_eq!(volume.read_file(&name).unwrap(), b"hi\n");
    assert_eq!(volume.read_fat_entry(2).unwrap(), CHAIN_TERMINATOR);

    // the entry landed in the first root slot
    let entry_bytes = &volume.as_bytes()[9728..9728 + DIR_ENTRY_SIZE];
    let entry: DirEntry = bytemuck::pod_read_unaligned(entry_bytes);
    assert_eq!(entry.name(), name);
    assert_eq!(entry.first_cluster(), 2);
    assert_eq!(entry.file_size(), 3);
}

#[test]
fn data_and_fat_land_before_any_directory_entry() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    let cluster = volume.store_data(b"early").unwrap();

    assert_eq!(cluster, 2);
    assert_eq!(volume.read_fat_entry(2).unwrap(), CHAIN_TERMINATOR);
    assert_eq!(&volume.as_bytes()[16896..16896 + 5], b"early");
    // the root directory is still untouched at this point
    assert!(volume.list_root().unwrap().is_empty());
}

#[test]
fn overwrite_moves_to_a_fresh_cluster_and_frees_the_old_one() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    let name = DirName::new("swap.txt");
    volume.write_file(&name, b"first").unwrap();
    volume.write_file(&name, b"second").unwrap();

    assert_eq!(volume.read_file(&name).unwrap(), b"second");
    // the new data went to cluster 3 and cluster 2 was released
    assert_eq!(volume.read_fat_entry(2).unwrap(), 0);
    assert_eq!(volume.read_fat_entry(3).unwrap(), CHAIN_TERMINATOR);

    let files = volume.list_root().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].size, 6);
}

#[test]
fn overwriting_with_nothing_releases_the_chain() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    let name = DirName::new("gone.txt");
    volume.write_file(&name, b"data").unwrap();
    volume.write_file(&name, b"").unwrap();

    assert_eq!(volume.read_file(&name).unwrap(), b"");
    assert_eq!(volume.read_fat_entry(2).unwrap(), 0);
    assert_eq!(volume.list_root().unwrap()[0].size, 0);
}

#[test]
fn write_rejects_data_larger_than_a_cluster() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    let data = vec![0u8; 513];
    assert!(matches!(
        volume.write_file(&DirName::new("big.bin"), &data),
        Err(WriteError::DataTooLarge { size: 513, max: 512 })
    ));
}

#[test]
fn write_fails_when_the_root_directory_is_full() {
    let mut image = floppy_image();
    for slot in 0..224 {
        place_file(&mut image, slot, &format!("f{slot}"), 0, 0);
    }
    let mut volume = Volume::mount(image).unwrap();

    assert!(matches!(
        volume.write_file(&DirName::new("overflow"), b"x"),
        Err(WriteError::Dir(DirError::RootDirectoryFull))
    ));
}

#[test]
fn write_fails_when_no_cluster_is_free() {
    let mut volume = Volume::mount(floppy_image()).unwrap();
    let max = volume.layout.max_clusters;
    for cluster in 2..max {
        volume.write_fat_entry(cluster, CHAIN_TERMINATOR).unwrap();
    }

    assert!(matches!(
        volume.write_file(&DirName::new("full"), b"x"),
        Err(WriteError::Chain(FatError::NoFreeCluster))
    ));
}
