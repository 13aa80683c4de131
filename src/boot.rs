use bytemuck::{Pod, Zeroable};
use checked_num::CheckedU64;

use crate::SECTOR_SIZE;
use crate::dir::DIR_ENTRY_SIZE;
use crate::error::MountError;

/// Identifies a sector as a boot sector.
/// Stored little-endian at offset 510, so the raw bytes are `0x55 0xAA`.
pub(crate) const BOOT_SIGNATURE: u16 = 0xAA55;

/// Byte offset of the boot signature within its sector.
pub(crate) const BOOT_SIGNATURE_OFFSET: usize = 510;

/// How far into the image the boot-sector scan looks (sector-aligned candidates only).
pub(crate) const BOOT_SCAN_SPAN: usize = 2048;

/// The classic BIOS Parameter Block, as laid down at the start of a FAT12 boot
/// sector. Field values are little-endian on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub(crate) struct BiosParameterBlock {
    /// Jump instruction over the parameter block.
    /// - Conventionally `0xEB 0x3C 0x90`; not interpreted here.
    pub(crate) jump_boot: [u8; 3],

    /// Name of the formatting system, space-padded.
    pub(crate) oem_name: [u8; 8],

    /// Bytes per sector.
    /// - Must be `512`.
    pub(crate) bytes_per_sector: u16,

    /// Sectors per allocation cluster.
    /// - Must be between `1` and `128`.
    pub(crate) sectors_per_cluster: u8,

    /// Sectors before the first FAT, including this boot sector.
    /// - Must not be zero.
    pub(crate) reserved_sectors: u16,

    /// Number of FAT copies.
    /// - Conventionally `2`; every copy is kept consistent on writes.
    pub(crate) num_fats: u8,

    /// Number of 32-byte entries in the fixed root directory region.
    pub(crate) root_entry_count: u16,

    /// Total sector count if it fits 16 bits, else `0`.
    /// - Consulted only when [`Self::total_sectors_32`] is zero.
    pub(crate) total_sectors_16: u16,

    /// Media descriptor byte.
    /// - `0xF0` for removable media; mirrored into FAT entry 0.
    pub(crate) media_descriptor: u8,

    /// Sectors occupied by one FAT copy.
    /// - Must not be zero.
    pub(crate) sectors_per_fat: u16,

    /// CHS geometry, unused by the engine.
    pub(crate) sectors_per_track: u16,

    /// CHS geometry, unused by the engine.
    pub(crate) num_heads: u16,

    /// Sectors preceding this volume on the medium, unused by the engine.
    pub(crate) hidden_sectors: u32,

    /// Total sector count when it exceeds 16 bits.
    /// - Takes precedence over [`Self::total_sectors_16`] when nonzero.
    pub(crate) total_sectors_32: u32,
}

impl BiosParameterBlock {
    pub(crate) fn bytes_per_sector(&self) -> u16 {
        u16::from_le(self.bytes_per_sector)
    }

    pub(crate) fn reserved_sectors(&self) -> u16 {
        u16::from_le(self.reserved_sectors)
    }

    pub(crate) fn root_entry_count(&self) -> u16 {
        u16::from_le(self.root_entry_count)
    }

    pub(crate) fn sectors_per_fat(&self) -> u16 {
        u16::from_le(self.sectors_per_fat)
    }

    /// The effective sector count: the 32-bit field when nonzero, else the 16-bit one.
    pub(crate) fn total_sectors(&self) -> u32 {
        let total32 = u32::from_le(self.total_sectors_32);
        if total32 != 0 {
            total32
        } else {
            u16::from_le(self.total_sectors_16) as u32
        }
    }

    pub(crate) fn validate(&self) -> Result<(), MountError> {
        let bytes_per_sector = self.bytes_per_sector();
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(MountError::UnsupportedSectorSize(bytes_per_sector));
        }
        if !(1..=128).contains(&self.sectors_per_cluster) {
            return Err(MountError::InvalidSectorsPerCluster(self.sectors_per_cluster));
        }
        if self.reserved_sectors() == 0 {
            return Err(MountError::NoReservedSectors);
        }
        if self.sectors_per_fat() == 0 {
            return Err(MountError::NoFatSectors);
        }
        if self.total_sectors() == 0 {
            return Err(MountError::NoTotalSectors);
        }
        Ok(())
    }
}

/// Byte offsets and bounds derived from a validated BPB, fixed at mount time.
/// All offsets are absolute within the image (the located boot-sector offset is
/// already folded in).
#[derive(Debug, Clone, Copy)]
pub(crate) struct VolumeLayout {
    /// Start of the first FAT copy.
    pub(crate) fat_offset: usize,
    /// Bytes per FAT copy; copies are laid out back to back.
    pub(crate) fat_copy_bytes: usize,
    pub(crate) num_fats: usize,
    /// Start of the fixed root directory region.
    pub(crate) root_dir_offset: usize,
    pub(crate) root_entry_count: usize,
    /// Start of the data region (cluster 2).
    pub(crate) data_offset: usize,
    pub(crate) bytes_per_cluster: usize,
    /// One past the highest addressable cluster index.
    pub(crate) max_clusters: u16,
}

impl VolumeLayout {
    /// Computes the layout for a BPB found at byte `base` of the image.
    pub(crate) fn try_new(bpb: &BiosParameterBlock, base: usize) -> Result<VolumeLayout, MountError> {
        let sector = SECTOR_SIZE as u64;
        let reserved = bpb.reserved_sectors() as u64;
        let num_fats = bpb.num_fats as u64;
        let sectors_per_fat = bpb.sectors_per_fat() as u64;
        let root_entries = bpb.root_entry_count() as u64;
        let total_sectors = bpb.total_sectors() as u64;

        let fat_offset =
            (CheckedU64::new(base as u64) + reserved * sector).ok_or(MountError::LayoutOverflow)?;
        let fat_copy_bytes = sectors_per_fat * sector;
        let root_dir_offset = (CheckedU64::new(fat_offset) + num_fats * fat_copy_bytes)
            .ok_or(MountError::LayoutOverflow)?;
        let root_bytes = root_entries * DIR_ENTRY_SIZE as u64;
        let data_offset =
            (CheckedU64::new(root_dir_offset) + root_bytes).ok_or(MountError::LayoutOverflow)?;

        // cluster indices start at 2, hence the +2 on the data capacity
        let overhead_sectors = reserved + num_fats * sectors_per_fat + root_bytes.div_ceil(sector);
        let data_sectors = total_sectors.saturating_sub(overhead_sectors);
        let max_clusters = (data_sectors / bpb.sectors_per_cluster as u64 + 2)
            .min(u16::MAX as u64) as u16;

        let layout = VolumeLayout {
            fat_offset: to_usize(fat_offset)?,
            fat_copy_bytes: to_usize(fat_copy_bytes)?,
            num_fats: bpb.num_fats as usize,
            root_dir_offset: to_usize(root_dir_offset)?,
            root_entry_count: bpb.root_entry_count() as usize,
            data_offset: to_usize(data_offset)?,
            bytes_per_cluster: bpb.sectors_per_cluster as usize * SECTOR_SIZE,
            max_clusters,
        };
        Ok(layout)
    }
}

fn to_usize(value: u64) -> Result<usize, MountError> {
    value.try_into().map_err(|_| MountError::LayoutOverflow)
}

/// Scans sector-aligned offsets within the first 2KB for a boot signature and
/// returns the offset of the first candidate sector carrying one.
pub(crate) fn locate_boot_sector(image: &[u8]) -> Result<usize, MountError> {
    for offset in (0..BOOT_SCAN_SPAN).step_by(SECTOR_SIZE) {
        let Some(sector) = image.get(offset..offset + SECTOR_SIZE) else {
            break;
        };
        let signature = u16::from_le_bytes([
            sector[BOOT_SIGNATURE_OFFSET],
            sector[BOOT_SIGNATURE_OFFSET + 1],
        ]);
        if signature == BOOT_SIGNATURE {
            return Ok(offset);
        }
    }
    Err(MountError::MissingBootSignature)
}

#[cfg(test)]
pub(crate) fn floppy_bpb() -> BiosParameterBlock {
    BiosParameterBlock {
        jump_boot: [0xEB, 0x3C, 0x90],
        oem_name: *b"FAT12FS ",
        bytes_per_sector: 512u16.to_le(),
        sectors_per_cluster: 1,
        reserved_sectors: 1u16.to_le(),
        num_fats: 2,
        root_entry_count: 224u16.to_le(),
        total_sectors_16: 2880u16.to_le(),
        media_descriptor: 0xF0,
        sectors_per_fat: 9u16.to_le(),
        sectors_per_track: 18u16.to_le(),
        num_heads: 2u16.to_le(),
        hidden_sectors: 0,
        total_sectors_32: 0,
    }
}

#[test]
fn bpb_layout_is_36_bytes() {
    assert_eq!(size_of::<BiosParameterBlock>(), 36);
}

#[test]
fn floppy_layout_offsets() {
    let layout = VolumeLayout::try_new(&floppy_bpb(), 0).unwrap();

    // 1 reserved + 2*9 FAT sectors, then 224 * 32 bytes of root entries
    assert_eq!(layout.fat_offset, 512);
    assert_eq!(layout.fat_copy_bytes, 9 * 512);
    assert_eq!(layout.root_dir_offset, 19 * 512);
    assert_eq!(layout.data_offset, 19 * 512 + 224 * 32);
    assert_eq!(layout.bytes_per_cluster, 512);
    assert_eq!(layout.max_clusters, (2880 - 33) + 2);
}

#[test]
fn layout_respects_base_offset() {
    let layout = VolumeLayout::try_new(&floppy_bpb(), 1024).unwrap();
    assert_eq!(layout.fat_offset, 1024 + 512);
    assert_eq!(layout.root_dir_offset, 1024 + 19 * 512);
}

#[test]
fn signature_scan_checks_aligned_candidates_only() {
    let mut image = vec![0u8; 4096];
    // a stray signature off-alignment must not match
    image[700] = 0x55;
    image[701] = 0xAA;
    assert!(matches!(
        locate_boot_sector(&image),
        Err(MountError::MissingBootSignature)
    ));

    image[1024 + 510] = 0x55;
    image[1024 + 511] = 0xAA;
    assert_eq!(locate_boot_sector(&image).unwrap(), 1024);
}

#[test]
fn validation_rejects_each_bad_field() {
    let mut bpb = floppy_bpb();
    bpb.bytes_per_sector = 1024u16.to_le();
    assert!(matches!(
        bpb.validate(),
        Err(MountError::UnsupportedSectorSize(1024))
    ));

    let mut bpb = floppy_bpb();
    bpb.sectors_per_cluster = 0;
    assert!(matches!(
        bpb.validate(),
        Err(MountError::InvalidSectorsPerCluster(0))
    ));

    let mut bpb = floppy_bpb();
    bpb.reserved_sectors = 0;
    assert!(matches!(bpb.validate(), Err(MountError::NoReservedSectors)));

    let mut bpb = floppy_bpb();
    bpb.sectors_per_fat = 0;
    assert!(matches!(bpb.validate(), Err(MountError::NoFatSectors)));

    let mut bpb = floppy_bpb();
    bpb.total_sectors_16 = 0;
    bpb.total_sectors_32 = 0;
    assert!(matches!(bpb.validate(), Err(MountError::NoTotalSectors)));
}
