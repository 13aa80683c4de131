use checked_num::CheckedU64;

use crate::SECTOR_SIZE;
use crate::boot::{self, BiosParameterBlock, VolumeLayout};
use crate::error::{FatError, MountError};

/// A mounted FAT12 volume backed by an in-memory image.
///
/// Mounting validates the boot sector and computes the region layout once;
/// afterwards every FAT, directory and data access goes through checked
/// slicing of the backing image. The volume is a plain value: operations
/// needing mutation take `&mut self`, so exclusive access is enforced by
/// the borrow rules rather than by an internal lock.
///
/// FAT, directory and file operations live in their own modules as further
/// `impl` blocks on this type.
#[derive(Debug)]
pub struct Volume<B> {
    pub(crate) image: B,
    pub(crate) layout: VolumeLayout,
}

impl<B: AsRef<[u8]>> Volume<B> {
    /// Mounts a FAT12 image.
    ///
    /// Scans sector-aligned offsets in the first 2KB for a boot signature,
    /// validates the BIOS parameter block found there and checks that the
    /// image really contains the volume the BPB claims.
    pub fn mount(image: B) -> Result<Self, MountError> {
        let bytes = image.as_ref();
        let base = boot::locate_boot_sector(bytes)?;
        // the scan only returns offsets with a whole sector behind them
        let bpb: BiosParameterBlock =
            bytemuck::pod_read_unaligned(&bytes[base..base + size_of::<BiosParameterBlock>()]);
        bpb.validate()?;

        let layout = VolumeLayout::try_new(&bpb, base)?;
        let need = (CheckedU64::new(base as u64)
            + bpb.total_sectors() as u64 * SECTOR_SIZE as u64)
            .ok_or(MountError::LayoutOverflow)?;
        // a BPB may claim fewer total sectors than its own FAT and root
        // regions span; the image must reach the data region either way
        let need = need.max(layout.data_offset as u64);
        let have = bytes.len() as u64;
        if have < need {
            return Err(MountError::ImageTruncated { need, have });
        }

        Ok(Volume { image, layout })
    }

    /// The raw backing image, e.g. for writing a modified volume back out.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_ref()
    }

    /// Consumes the volume and returns the backing image.
    pub fn into_inner(self) -> B {
        self.image
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.image.as_ref().get(offset..end)
    }

    /// Byte offset of a data cluster, rejecting indices outside `2..max_clusters`.
    pub(crate) fn cluster_offset(&self, cluster: u16) -> Result<usize, FatError> {
        if cluster < 2 || cluster >= self.layout.max_clusters {
            return Err(FatError::ClusterOutOfRange(cluster));
        }
        Ok(self.layout.data_offset + (cluster as usize - 2) * self.layout.bytes_per_cluster)
    }

    pub(crate) fn cluster_bytes(&self, cluster: u16) -> Result<&[u8], FatError> {
        let offset = self.cluster_offset(cluster)?;
        self.slice(offset, self.layout.bytes_per_cluster)
            .ok_or(FatError::ClusterOutOfRange(cluster))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Volume<B> {
    pub(crate) fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        self.image.as_mut().get_mut(offset..end)
    }

    pub(crate) fn cluster_bytes_mut(&mut self, cluster: u16) -> Result<&mut [u8], FatError> {
        let offset = self.cluster_offset(cluster)?;
        let len = self.layout.bytes_per_cluster;
        self.slice_mut(offset, len)
            .ok_or(FatError::ClusterOutOfRange(cluster))
    }
}

#[cfg(test)]
pub(crate) fn floppy_image() -> Vec<u8> {
    let mut image = vec![0u8; 2880 * SECTOR_SIZE];
    image[..size_of::<BiosParameterBlock>()]
        .copy_from_slice(bytemuck::bytes_of(&boot::floppy_bpb()));
    image[510] = 0x55;
    image[511] = 0xAA;
    image
}

#[test]
fn mounts_a_floppy_image() {
    let volume = Volume::mount(floppy_image()).unwrap();
    assert_eq!(volume.layout.fat_offset, 512);
    assert_eq!(volume.layout.root_dir_offset, 9728);
    assert_eq!(volume.layout.data_offset, 16896);
}

#[test]
fn mounts_with_leading_junk_sectors() {
    let mut image = vec![0u8; 1024];
    image.extend_from_slice(&floppy_image());
    let volume = Volume::mount(image).unwrap();
    assert_eq!(volume.layout.fat_offset, 1024 + 512);
    assert_eq!(volume.layout.data_offset, 1024 + 16896);
}

#[test]
fn mount_requires_a_boot_signature() {
    let image = vec![0u8; 4096];
    assert!(matches!(
        Volume::mount(image),
        Err(MountError::MissingBootSignature)
    ));
}

#[test]
fn mount_rejects_an_image_shorter_than_the_volume() {
    let mut image = floppy_image();
    image.truncate(100 * SECTOR_SIZE);
    assert!(matches!(
        Volume::mount(image),
        Err(MountError::ImageTruncated {
            need: 1_474_560,
            have: 51_200,
        })
    ));
}

#[test]
fn mount_rejects_a_total_count_smaller_than_the_layout() {
    // 20 claimed sectors cannot hold 18 FAT sectors plus the root region
    let mut image = floppy_image();
    image.truncate(20 * SECTOR_SIZE);
    image[19] = 20;
    image[20] = 0;
    assert!(matches!(
        Volume::mount(image),
        Err(MountError::ImageTruncated {
            need: 16_896,
            have: 10_240,
        })
    ));
}

#[test]
fn cluster_addressing_rejects_reserved_and_out_of_range_indices() {
    let volume = Volume::mount(floppy_image()).unwrap();
    assert!(matches!(
        volume.cluster_offset(0),
        Err(FatError::ClusterOutOfRange(0))
    ));
    assert!(matches!(
        volume.cluster_offset(1),
        Err(FatError::ClusterOutOfRange(1))
    ));
    assert_eq!(volume.cluster_offset(2).unwrap(), 16896);
    assert_eq!(volume.cluster_offset(3).unwrap(), 16896 + 512);

    let past_end = volume.layout.max_clusters;
    assert!(matches!(
        volume.cluster_offset(past_end),
        Err(FatError::ClusterOutOfRange(_))
    ));
}
