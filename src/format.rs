use std::io::Write;

use derive_builder::Builder;

use crate::SECTOR_SIZE;
use crate::boot::{BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, BiosParameterBlock};
use crate::dir::{DIR_ENTRY_SIZE, DirEntry};
use crate::error::FormatError;

const JUMP_BOOT: [u8; 3] = [0xEB, 0x3C, 0x90];
const OEM_NAME: [u8; 8] = *b"FAT12FS ";

/// Geometry and cosmetics for a fresh volume. The defaults describe a
/// 1.44MB floppy: 2880 sectors, one sector per cluster, two FATs of nine
/// sectors each and 224 root entries.
#[derive(Builder, Debug, Clone)]
pub struct FormatVolumeOptions {
    #[builder(default = "2880")]
    pub total_sectors: u32,
    #[builder(default = "1")]
    pub sectors_per_cluster: u8,
    #[builder(default = "1")]
    pub reserved_sectors: u16,
    #[builder(default = "2")]
    pub num_fats: u8,
    #[builder(default = "224")]
    pub root_entry_count: u16,
    #[builder(default = "9")]
    pub sectors_per_fat: u16,
    #[builder(default = "0xF0")]
    pub media_descriptor: u8,
    /// Volume label, written as the first root entry when set.
    #[builder(setter(into, strip_option), default)]
    pub label: Option<String>,
}

/// A validated format plan. Build one with [`TryFrom<FormatVolumeOptions>`],
/// then materialize the image with [`Formatter::build_image`] or stream it
/// with [`Formatter::write`].
#[derive(Debug, Clone)]
pub struct Formatter {
    options: FormatVolumeOptions,
    bpb: BiosParameterBlock,
    label: Option<[u8; 11]>,
}

impl TryFrom<FormatVolumeOptions> for Formatter {
    type Error = FormatError;

    fn try_from(options: FormatVolumeOptions) -> Result<Formatter, FormatError> {
        if !options.sectors_per_cluster.is_power_of_two() {
            return Err(FormatError::InvalidSectorsPerCluster(
                options.sectors_per_cluster,
            ));
        }
        if options.reserved_sectors == 0 {
            return Err(FormatError::NoReservedSectors);
        }
        if options.num_fats == 0 || options.num_fats > 2 {
            return Err(FormatError::InvalidNumberOfFats(options.num_fats));
        }
        let root_bytes_exact = options.root_entry_count as usize * DIR_ENTRY_SIZE;
        if options.root_entry_count == 0 || root_bytes_exact % SECTOR_SIZE != 0 {
            return Err(FormatError::InvalidRootEntryCount(options.root_entry_count));
        }
        if options.sectors_per_fat == 0 {
            return Err(FormatError::NoFatSectors);
        }

        let overhead = options.reserved_sectors as u32
            + options.num_fats as u32 * options.sectors_per_fat as u32
            + (root_bytes_exact / SECTOR_SIZE) as u32;
        let min = overhead + options.sectors_per_cluster as u32;
        if options.total_sectors < min {
            return Err(FormatError::VolumeTooSmall {
                sectors: options.total_sectors,
                min,
            });
        }

        let data_sectors = options.total_sectors - overhead;
        let max_clusters = data_sectors / options.sectors_per_cluster as u32 + 2;
        // the highest cluster's 12-bit entry must still fit in one FAT copy
        let fat_capacity = options.sectors_per_fat as u64 * SECTOR_SIZE as u64;
        let needed = (max_clusters as u64 - 1) * 3 / 2 + 2;
        if needed > fat_capacity {
            return Err(FormatError::FatTooSmall {
                fat_sectors: options.sectors_per_fat,
                clusters: max_clusters.min(u16::MAX as u32) as u16,
            });
        }

        let label = match &options.label {
            None => None,
            Some(text) => {
                if text.len() > 11 {
                    return Err(FormatError::LabelTooLong(text.clone()));
                }
                let mut padded = [b' '; 11];
                for (out, byte) in padded.iter_mut().zip(text.bytes()) {
                    *out = byte.to_ascii_uppercase();
                }
                Some(padded)
            }
        };

        let (total_16, total_32) = if options.total_sectors <= u16::MAX as u32 {
            (options.total_sectors as u16, 0)
        } else {
            (0, options.total_sectors)
        };
        let bpb = BiosParameterBlock {
            jump_boot: JUMP_BOOT,
            oem_name: OEM_NAME,
            bytes_per_sector: (SECTOR_SIZE as u16).to_le(),
            sectors_per_cluster: options.sectors_per_cluster,
            reserved_sectors: options.reserved_sectors.to_le(),
            num_fats: options.num_fats,
            root_entry_count: options.root_entry_count.to_le(),
            total_sectors_16: total_16.to_le(),
            media_descriptor: options.media_descriptor,
            sectors_per_fat: options.sectors_per_fat.to_le(),
            sectors_per_track: 18u16.to_le(),
            num_heads: 2u16.to_le(),
            hidden_sectors: 0,
            total_sectors_32: total_32.to_le(),
        };

        Ok(Formatter {
            options,
            bpb,
            label,
        })
    }
}

impl Formatter {
    /// Produces the formatted image: boot sector, seeded FATs, an empty root
    /// directory and a zeroed data region.
    pub fn build_image(&self) -> Vec<u8> {
        let o = &self.options;
        let mut image = vec![0u8; o.total_sectors as usize * SECTOR_SIZE];

        image[..size_of::<BiosParameterBlock>()].copy_from_slice(bytemuck::bytes_of(&self.bpb));
        image[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2]
            .copy_from_slice(&BOOT_SIGNATURE.to_le_bytes());

        let fat_offset = o.reserved_sectors as usize * SECTOR_SIZE;
        let fat_bytes = o.sectors_per_fat as usize * SECTOR_SIZE;
        for copy in 0..o.num_fats as usize {
            // entries 0 and 1: the media descriptor and an end marker
            let base = fat_offset + copy * fat_bytes;
            image[base] = o.media_descriptor;
            image[base + 1] = 0xFF;
            image[base + 2] = 0xFF;
        }

        if let Some(label) = self.label {
            let root_offset = fat_offset + o.num_fats as usize * fat_bytes;
            image[root_offset..root_offset + DIR_ENTRY_SIZE]
                .copy_from_slice(bytemuck::bytes_of(&DirEntry::volume_label(label)));
        }
        image
    }

    /// Streams the formatted image to a writer.
    pub fn write<T: Write>(&self, f: &mut T) -> Result<(), FormatError> {
        f.write_all(&self.build_image())?;
        Ok(())
    }
}

#[cfg(test)]
use crate::volume::Volume;

#[test]
fn default_options_describe_a_floppy() {
    let options = FormatVolumeOptionsBuilder::default().build().unwrap();
    let image = Formatter::try_from(options).unwrap().build_image();
    assert_eq!(image.len(), 1_474_560);

    let volume = Volume::mount(image).unwrap();
    assert_eq!(volume.layout.root_dir_offset, 9728);
    assert_eq!(volume.layout.data_offset, 16896);
    assert!(volume.list_root().unwrap().is_empty());
    assert_eq!(volume.find_free_cluster().unwrap(), 2);
}

#[test]
fn fats_start_with_the_media_descriptor() {
    let options = FormatVolumeOptionsBuilder::default().build().unwrap();
    let image = Formatter::try_from(options).unwrap().build_image();

    assert_eq!(&image[512..515], &[0xF0, 0xFF, 0xFF]);
    let second_copy = 512 + 9 * 512;
    assert_eq!(&image[second_copy..second_copy + 3], &[0xF0, 0xFF, 0xFF]);
}

#[test]
fn a_label_lands_in_the_first_root_slot_but_stays_out_of_listings() {
    let options = FormatVolumeOptionsBuilder::default()
        .label("bootdisk")
        .build()
        .unwrap();
    let image = Formatter::try_from(options).unwrap().build_image();

    assert_eq!(&image[9728..9739], b"BOOTDISK   ");
    assert_eq!(image[9728 + 11], 0x08);

    let volume = Volume::mount(image).unwrap();
    assert!(volume.list_root().unwrap().is_empty());
}

#[test]
fn formatted_volumes_accept_writes() {
    use crate::dir::DirName;

    let options = FormatVolumeOptionsBuilder::default()
        .label("bootdisk")
        .build()
        .unwrap();
    let image = Formatter::try_from(options).unwrap().build_image();
    let mut volume = Volume::mount(image).unwrap();

    let name = DirName::new("hello.txt");
    volume.write_file(&name, b"hi\n").unwrap();
    assert_eq!(volume.read_file(&name).unwrap(), b"hi\n");

    // the label keeps slot 0, so the file took slot 1
    let files = volume.list_root().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, name);
}

#[test]
fn write_streams_the_whole_image() {
    use std::io::Cursor;

    let options = FormatVolumeOptionsBuilder::default().build().unwrap();
    let formatter = Formatter::try_from(options).unwrap();

    let mut cursor = Cursor::new(Vec::new());
    formatter.write(&mut cursor).unwrap();
    let buffer = cursor.into_inner();
    assert_eq!(buffer.len(), 1_474_560);
    Volume::mount(buffer).unwrap();
}

#[test]
fn bad_geometry_is_rejected() {
    let options = FormatVolumeOptionsBuilder::default()
        .sectors_per_cluster(3)
        .build()
        .unwrap();
    assert!(matches!(
        Formatter::try_from(options),
        Err(FormatError::InvalidSectorsPerCluster(3))
    ));

    let options = FormatVolumeOptionsBuilder::default()
        .total_sectors(20)
        .build()
        .unwrap();
    assert!(matches!(
        Formatter::try_from(options),
        Err(FormatError::VolumeTooSmall { sectors: 20, min: 34 })
    ));

    let options = FormatVolumeOptionsBuilder::default()
        .sectors_per_fat(1)
        .build()
        .unwrap();
    assert!(matches!(
        Formatter::try_from(options),
        Err(FormatError::FatTooSmall {
            fat_sectors: 1,
            clusters: 2865,
        })
    ));

    let options = FormatVolumeOptionsBuilder::default()
        .num_fats(3)
        .build()
        .unwrap();
    assert!(matches!(
        Formatter::try_from(options),
        Err(FormatError::InvalidNumberOfFats(3))
    ));

    // 100 entries span 6.25 sectors
    let options = FormatVolumeOptionsBuilder::default()
        .root_entry_count(100)
        .build()
        .unwrap();
    assert!(matches!(
        Formatter::try_from(options),
        Err(FormatError::InvalidRootEntryCount(100))
    ));

    let options = FormatVolumeOptionsBuilder::default()
        .label("far too long for fat")
        .build()
        .unwrap();
    assert!(matches!(
        Formatter::try_from(options),
        Err(FormatError::LabelTooLong(_))
    ));
}
