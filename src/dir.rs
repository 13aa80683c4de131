use std::fmt;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::{DirError, FatError};
use crate::volume::Volume;

/// On-disk size of one directory entry.
pub(crate) const DIR_ENTRY_SIZE: usize = 32;

bitflags! {
    /// Attribute byte of a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY    = 0x01;
        const HIDDEN       = 0x02;
        const SYSTEM       = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY    = 0x10;
        const ARCHIVE      = 0x20;
        /// All four low bits at once mark a long-file-name entry.
        const LONG_NAME    = 0x0F;
    }
}

/// A name in the fixed 11-byte 8.3 form: eight base characters and a three
/// character extension, space-padded, no dot stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirName(pub(crate) [u8; 11]);

impl DirName {
    /// Converts a human name to its 8.3 form.
    ///
    /// Uppercases, copies up to eight characters of the base stopping at the
    /// first dot, skips that dot, then copies up to three further characters
    /// as the extension. Overlong names are truncated rather than rejected,
    /// so `verylongname.txt` becomes `VERYLONG.NAM` and distinct inputs can
    /// collide.
    pub fn new(name: &str) -> DirName {
        let bytes = name.as_bytes();
        let mut out = [b' '; 11];
        let mut i = 0;

        let mut base = 0;
        while i < bytes.len() && base < 8 && bytes[i] != b'.' {
            out[base] = bytes[i].to_ascii_uppercase();
            base += 1;
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
        }
        let mut ext = 0;
        while i < bytes.len() && ext < 3 {
            out[8 + ext] = bytes[i].to_ascii_uppercase();
            ext += 1;
            i += 1;
        }
        DirName(out)
    }

    pub(crate) fn raw(bytes: [u8; 11]) -> DirName {
        DirName(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// Whether the extension field holds anything but padding.
    pub(crate) fn has_extension(&self) -> bool {
        self.0[8..11] != *b"   "
    }

    /// The same base with the extension field replaced.
    pub(crate) fn with_extension(&self, ext: [u8; 3]) -> DirName {
        let mut out = self.0;
        out[8..11].copy_from_slice(&ext);
        DirName(out)
    }
}

impl fmt::Display for DirName {
    /// Lower-cased `base.ext` form; the dot appears only when the extension
    /// field holds anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = core::str::from_utf8(&self.0[..8]).unwrap_or("").trim_end();
        let ext = core::str::from_utf8(&self.0[8..]).unwrap_or("").trim_end();
        let mut text = base.to_ascii_lowercase();
        if !ext.is_empty() {
            text.push('.');
            text.push_str(&ext.to_ascii_lowercase());
        }
        f.pad(&text)
    }
}

/// One 32-byte directory entry. Multi-byte fields are little-endian on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub(crate) struct DirEntry {
    /// 8.3 name; byte 0 doubles as the end (`0x00`) and deleted (`0xE5`) marker.
    pub(crate) name: [u8; 11],
    pub(crate) attributes: u8,
    pub(crate) _reserved: u8,
    pub(crate) create_time_fine: u8,
    pub(crate) create_time: u16,
    pub(crate) create_date: u16,
    pub(crate) access_date: u16,
    /// High half of the cluster index; always zero on FAT12.
    pub(crate) cluster_high: u16,
    pub(crate) modified_time: u16,
    pub(crate) modified_date: u16,
    /// First cluster of the entry's chain, or zero for an empty file.
    pub(crate) cluster_low: u16,
    pub(crate) file_size: u32,
}

impl DirEntry {
    pub(crate) const END: u8 = 0x00;
    pub(crate) const DELETED: u8 = 0xE5;

    /// A fresh file entry with zeroed timestamps.
    pub(crate) fn for_file(name: DirName, first_cluster: u16, size: u32) -> DirEntry {
        let mut entry = DirEntry::zeroed();
        entry.name = name.0;
        entry.attributes = Attributes::ARCHIVE.bits();
        entry.cluster_low = first_cluster.to_le();
        entry.file_size = size.to_le();
        entry
    }

    /// The volume-label entry written at format time.
    pub(crate) fn volume_label(label: [u8; 11]) -> DirEntry {
        let mut entry = DirEntry::zeroed();
        entry.name = label;
        entry.attributes = Attributes::VOLUME_LABEL.bits();
        entry
    }

    pub(crate) fn name(&self) -> DirName {
        DirName::raw(self.name)
    }

    pub(crate) fn attributes(&self) -> Attributes {
        Attributes::from_bits_retain(self.attributes)
    }

    pub(crate) fn first_cluster(&self) -> u16 {
        u16::from_le(self.cluster_low)
    }

    pub(crate) fn file_size(&self) -> u32 {
        u32::from_le(self.file_size)
    }

    pub(crate) fn is_end(&self) -> bool {
        self.name[0] == Self::END
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.name[0] == Self::DELETED
    }

    pub(crate) fn is_long_name(&self) -> bool {
        self.attributes() == Attributes::LONG_NAME
    }

    pub(crate) fn is_volume_label(&self) -> bool {
        self.attributes().contains(Attributes::VOLUME_LABEL)
    }

    pub(crate) fn is_directory(&self) -> bool {
        self.attributes().contains(Attributes::DIRECTORY)
    }

    /// Entries a listing shows: not deleted, not a long-name fragment, not the label.
    fn is_visible(&self) -> bool {
        !self.is_deleted() && !self.is_long_name() && !self.is_volume_label()
    }
}

/// Where a directory scan reads its entries from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directory {
    /// The fixed root region.
    Root,
    /// A subdirectory stored as a cluster chain.
    Cluster(u16),
}

/// One visible entry, as reported by the listing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: DirName,
    pub size: u32,
    pub directory: bool,
}

impl<B: AsRef<[u8]>> Volume<B> {
    /// Every slot of a directory in storage order, paired with its image offset.
    pub(crate) fn directory_slots(
        &self,
        dir: Directory,
    ) -> Result<Vec<(usize, DirEntry)>, FatError> {
        let mut slots = Vec::new();
        match dir {
            Directory::Root => {
                // mount checked the image reaches data_offset, where this
                // region ends
                let root_bytes = self.layout.root_entry_count * DIR_ENTRY_SIZE;
                let region = &self.image.as_ref()[self.layout.root_dir_offset..][..root_bytes];
                for (index, raw) in region.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                    let offset = self.layout.root_dir_offset + index * DIR_ENTRY_SIZE;
                    slots.push((offset, bytemuck::pod_read_unaligned(raw)));
                }
            }
            Directory::Cluster(start) => {
                for cluster in self.chain_from(start) {
                    let cluster = cluster?;
                    let base = self.cluster_offset(cluster)?;
                    let data = self.cluster_bytes(cluster)?;
                    for (index, raw) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                        let offset = base + index * DIR_ENTRY_SIZE;
                        slots.push((offset, bytemuck::pod_read_unaligned(raw)));
                    }
                }
            }
        }
        Ok(slots)
    }

    /// Finds a name in a directory, returning the slot offset and entry.
    ///
    /// The scan stops at the first end marker and skips deleted, long-name
    /// and label slots on the way.
    pub(crate) fn find_in(
        &self,
        dir: Directory,
        name: &DirName,
    ) -> Result<(usize, DirEntry), DirError> {
        for (offset, entry) in self.directory_slots(dir)? {
            if entry.is_end() {
                break;
            }
            if !entry.is_visible() {
                continue;
            }
            if entry.name == name.0 {
                return Ok((offset, entry));
            }
        }
        Err(DirError::NotFound(name.to_string()))
    }

    /// Resolves a root-level name to a subdirectory's first cluster.
    pub(crate) fn find_directory(&self, name: &DirName) -> Result<u16, DirError> {
        let (_, entry) = self.find_in(Directory::Root, name)?;
        if !entry.is_directory() {
            return Err(DirError::NotADirectory(name.to_string()));
        }
        Ok(entry.first_cluster())
    }

    fn list(&self, dir: Directory) -> Result<Vec<FileInfo>, DirError> {
        let mut files = Vec::new();
        for (_, entry) in self.directory_slots(dir)? {
            if entry.is_end() {
                break;
            }
            if !entry.is_visible() {
                continue;
            }
            files.push(FileInfo {
                name: entry.name(),
                size: entry.file_size(),
                directory: entry.is_directory(),
            });
        }
        Ok(files)
    }

    /// Lists the visible entries of the root directory.
    pub fn list_root(&self) -> Result<Vec<FileInfo>, DirError> {
        self.list(Directory::Root)
    }

    /// Lists the visible entries of a root-level subdirectory.
    pub fn list_dir(&self, name: &DirName) -> Result<Vec<FileInfo>, DirError> {
        let cluster = self.find_directory(name)?;
        self.list(Directory::Cluster(cluster))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Volume<B> {
    /// First reusable root slot: a deleted entry or the end marker.
    pub(crate) fn find_free_root_slot(&self) -> Result<usize, DirError> {
        for (offset, entry) in self.directory_slots(Directory::Root)? {
            if entry.is_end() || entry.is_deleted() {
                return Ok(offset);
            }
        }
        Err(DirError::RootDirectoryFull)
    }

    pub(crate) fn write_entry_at(&mut self, offset: usize, entry: &DirEntry) {
        // slot offsets come from directory scans, which stay inside the mounted image
        self.image.as_mut()[offset..offset + DIR_ENTRY_SIZE]
            .copy_from_slice(bytemuck::bytes_of(entry));
    }
}

#[cfg(test)]
use crate::volume::floppy_image;

#[cfg(test)]
const ROOT: usize = 9728;

#[cfg(test)]
fn place_entry(image: &mut [u8], slot: usize, entry: &DirEntry) {
    let offset = ROOT + slot * DIR_ENTRY_SIZE;
    image[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(bytemuck::bytes_of(entry));
}

#[test]
fn dir_entry_is_32_bytes() {
    assert_eq!(size_of::<DirEntry>(), 32);
}

#[test]
fn names_convert_to_8_3_form() {
    assert_eq!(DirName::new("hello.txt").as_bytes(), b"HELLO   TXT");
    assert_eq!(DirName::new("ls").as_bytes(), b"LS         ");
    assert_eq!(DirName::new("a.b").as_bytes(), b"A       B  ");
    assert_eq!(DirName::new("README.md").as_bytes(), b"README  MD ");
}

#[test]
fn overlong_names_truncate_instead_of_failing() {
    assert_eq!(DirName::new("verylongname.txt").as_bytes(), b"VERYLONGNAM");
    assert_eq!(DirName::new("database.sqlite").as_bytes(), b"DATABASESQL");
}

#[test]
fn names_display_lower_cased_with_a_dot_only_when_extended() {
    assert_eq!(DirName::new("hello.txt").to_string(), "hello.txt");
    assert_eq!(DirName::new("LS").to_string(), "ls");
    assert_eq!(format!("{:<12}|", DirName::new("a.b")), "a.b         |");
}

#[test]
fn name_conversion_is_case_insensitive_and_idempotent() {
    let first = DirName::new("Hello.Txt");
    assert_eq!(first, DirName::new("HELLO.TXT"));
    assert_eq!(first, DirName::new("hello.txt"));
    assert_eq!(DirName::new(&first.to_string()), first);
}

#[test]
fn extension_probes_and_rewrites() {
    let name = DirName::new("ls");
    assert!(!name.has_extension());
    assert_eq!(name.with_extension(*b"ELF").as_bytes(), b"LS      ELF");
    assert!(DirName::new("cat.elf").has_extension());
}

#[test]
fn lookup_skips_deleted_and_long_name_slots() {
    let mut image = floppy_image();
    let mut ghost = DirEntry::for_file(DirName::new("hello.txt"), 5, 3);
    ghost.name[0] = DirEntry::DELETED;
    place_entry(&mut image, 0, &ghost);

    let mut fragment = DirEntry::for_file(DirName::new("hello.txt"), 0, 0);
    fragment.attributes = Attributes::LONG_NAME.bits();
    place_entry(&mut image, 1, &fragment);

    let real = DirEntry::for_file(DirName::new("hello.txt"), 7, 3);
    place_entry(&mut image, 2, &real);

    let volume = Volume::mount(image).unwrap();
    let (offset, entry) = volume
        .find_in(Directory::Root, &DirName::new("hello.txt"))
        .unwrap();
    assert_eq!(offset, ROOT + 2 * DIR_ENTRY_SIZE);
    assert_eq!(entry.first_cluster(), 7);
}

#[test]
fn lookup_stops_at_the_end_marker() {
    let mut image = floppy_image();
    // slot 0 stays an end marker; an entry after it must be unreachable
    let orphan = DirEntry::for_file(DirName::new("late.txt"), 9, 1);
    place_entry(&mut image, 1, &orphan);

    let volume = Volume::mount(image).unwrap();
    assert!(matches!(
        volume.find_in(Directory::Root, &DirName::new("late.txt")),
        Err(DirError::NotFound(_))
    ));
}

#[test]
fn listing_reports_visible_entries_only() {
    let mut image = floppy_image();
    place_entry(&mut image, 0, &DirEntry::volume_label(*b"BOOTDISK   "));
    place_entry(
        &mut image,
        1,
        &DirEntry::for_file(DirName::new("hello.txt"), 5, 3),
    );
    let mut gone = DirEntry::for_file(DirName::new("old.txt"), 6, 1);
    gone.name[0] = DirEntry::DELETED;
    place_entry(&mut image, 2, &gone);
    let mut sub = DirEntry::for_file(DirName::new("core"), 8, 0);
    sub.attributes = Attributes::DIRECTORY.bits();
    place_entry(&mut image, 3, &sub);

    let volume = Volume::mount(image).unwrap();
    let files = volume.list_root().unwrap();
    assert_eq!(
        files,
        vec![
            FileInfo {
                name: DirName::new("hello.txt"),
                size: 3,
                directory: false,
            },
            FileInfo {
                name: DirName::new("core"),
                size: 0,
                directory: true,
            },
        ]
    );
}

#[test]
fn listing_a_subdirectory_walks_its_chain() {
    let mut image = floppy_image();
    let mut sub = DirEntry::for_file(DirName::new("core"), 2, 0);
    sub.attributes = Attributes::DIRECTORY.bits();
    place_entry(&mut image, 0, &sub);

    // cluster 2 holds the subdirectory's entries
    let inner = DirEntry::for_file(DirName::new("ls.elf"), 4, 100);
    image[16896..16896 + DIR_ENTRY_SIZE].copy_from_slice(bytemuck::bytes_of(&inner));

    let mut volume = Volume::mount(image).unwrap();
    volume.write_fat_entry(2, crate::fat::CHAIN_TERMINATOR).unwrap();

    let files = volume.list_dir(&DirName::new("core")).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, DirName::new("ls.elf"));
    assert_eq!(files[0].size, 100);
}

#[test]
fn listing_a_file_as_a_directory_fails() {
    let mut image = floppy_image();
    place_entry(
        &mut image,
        0,
        &DirEntry::for_file(DirName::new("hello.txt"), 5, 3),
    );

    let volume = Volume::mount(image).unwrap();
    assert!(matches!(
        volume.list_dir(&DirName::new("hello.txt")),
        Err(DirError::NotADirectory(_))
    ));
    assert!(matches!(
        volume.list_dir(&DirName::new("nope")),
        Err(DirError::NotFound(_))
    ));
}

#[test]
fn free_slot_search_reuses_deleted_slots() {
    let mut image = floppy_image();
    place_entry(
        &mut image,
        0,
        &DirEntry::for_file(DirName::new("a.txt"), 5, 1),
    );
    let mut gone = DirEntry::for_file(DirName::new("b.txt"), 6, 1);
    gone.name[0] = DirEntry::DELETED;
    place_entry(&mut image, 1, &gone);

    let volume = Volume::mount(image).unwrap();
    assert_eq!(
        volume.find_free_root_slot().unwrap(),
        ROOT + DIR_ENTRY_SIZE
    );
}

#[test]
fn a_full_root_directory_has_no_free_slot() {
    let mut image = floppy_image();
    for slot in 0..224 {
        let name = DirName::new(&format!("f{slot}.txt"));
        place_entry(&mut image, slot, &DirEntry::for_file(name, 0, 0));
    }

    let volume = Volume::mount(image).unwrap();
    assert!(matches!(
        volume.find_free_root_slot(),
        Err(DirError::RootDirectoryFull)
    ));
}
