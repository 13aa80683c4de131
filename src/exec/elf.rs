use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::LoadError;

/// Fixed size of the memory a program is loaded into. Segment addresses are
/// offsets into this window.
pub const ARENA_SIZE: usize = 1 << 20;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const PT_LOAD: u32 = 1;
const PROGRAM_HEADER_SIZE: usize = size_of::<ProgramHeader>();

/// ELF32 file header. Little-endian fields.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct ElfHeader {
    pub(crate) ident: [u8; 16],
    pub(crate) elf_type: u16,
    pub(crate) machine: u16,
    pub(crate) version: u32,
    pub(crate) entry: u32,
    pub(crate) ph_offset: u32,
    pub(crate) sh_offset: u32,
    pub(crate) flags: u32,
    pub(crate) header_size: u16,
    pub(crate) ph_entry_size: u16,
    pub(crate) ph_count: u16,
    pub(crate) sh_entry_size: u16,
    pub(crate) sh_count: u16,
    pub(crate) string_table_index: u16,
}

impl ElfHeader {
    fn magic(&self) -> [u8; 4] {
        [self.ident[0], self.ident[1], self.ident[2], self.ident[3]]
    }
}

/// ELF32 program header. Little-endian fields.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct ProgramHeader {
    pub(crate) p_type: u32,
    pub(crate) offset: u32,
    pub(crate) vaddr: u32,
    pub(crate) paddr: u32,
    pub(crate) file_size: u32,
    pub(crate) mem_size: u32,
    pub(crate) flags: u32,
    pub(crate) align: u32,
}

/// The flat memory window programs are loaded into and run from.
pub struct ProgramArena {
    memory: Box<[u8]>,
}

impl ProgramArena {
    pub fn new() -> ProgramArena {
        ProgramArena {
            memory: vec![0u8; ARENA_SIZE].into_boxed_slice(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.memory
    }
}

impl Default for ProgramArena {
    fn default() -> ProgramArena {
        ProgramArena::new()
    }
}

impl fmt::Debug for ProgramArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramArena")
            .field("size", &self.memory.len())
            .finish()
    }
}

/// A successfully loaded program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedProgram {
    /// Entry point, as an offset into the arena.
    pub entry_offset: u32,
    /// How many `PT_LOAD` segments were copied in.
    pub loaded_segments: usize,
}

/// Loads an ELF32 image into the arena.
///
/// Every `PT_LOAD` segment is validated first: its file range must lie
/// inside the blob and its memory range inside the arena, and the entry
/// point must land in the arena too. Only when all checks pass is anything
/// copied, so a rejected image leaves the arena exactly as it was. Each
/// segment's bytes past `file_size` up to `mem_size` are zero-filled.
pub fn load(image: &[u8], arena: &mut ProgramArena) -> Result<LoadedProgram, LoadError> {
    let header_bytes = image
        .get(..size_of::<ElfHeader>())
        .ok_or(LoadError::TruncatedHeader(image.len()))?;
    let header: ElfHeader = bytemuck::pod_read_unaligned(header_bytes);
    if header.magic() != ELF_MAGIC {
        return Err(LoadError::BadMagic(header.magic()));
    }

    let ph_offset = u32::from_le(header.ph_offset) as usize;
    let ph_count = u16::from_le(header.ph_count) as usize;
    let entry = u32::from_le(header.entry);

    let table_len = ph_count
        .checked_mul(PROGRAM_HEADER_SIZE)
        .ok_or(LoadError::TruncatedProgramTable)?;
    let table_end = ph_offset
        .checked_add(table_len)
        .ok_or(LoadError::TruncatedProgramTable)?;
    let table = image
        .get(ph_offset..table_end)
        .ok_or(LoadError::TruncatedProgramTable)?;

    let headers: Vec<ProgramHeader> = table
        .chunks_exact(PROGRAM_HEADER_SIZE)
        .map(bytemuck::pod_read_unaligned)
        .collect();

    if entry as usize >= ARENA_SIZE {
        return Err(LoadError::EntryOutOfArena(entry));
    }

    // validate everything before touching the arena
    for (index, phdr) in headers.iter().enumerate() {
        if u32::from_le(phdr.p_type) != PT_LOAD {
            continue;
        }
        let offset = u32::from_le(phdr.offset) as u64;
        let file_size = u32::from_le(phdr.file_size) as u64;
        let vaddr = u32::from_le(phdr.vaddr) as u64;
        let mem_size = u32::from_le(phdr.mem_size) as u64;

        if offset + file_size > image.len() as u64 {
            return Err(LoadError::TruncatedSegment(index));
        }
        let end = vaddr + mem_size;
        if file_size > mem_size || end > ARENA_SIZE as u64 {
            return Err(LoadError::SegmentOutOfArena { index, end });
        }
    }

    let mut loaded_segments = 0;
    for phdr in &headers {
        if u32::from_le(phdr.p_type) != PT_LOAD {
            continue;
        }
        let offset = u32::from_le(phdr.offset) as usize;
        let file_size = u32::from_le(phdr.file_size) as usize;
        let vaddr = u32::from_le(phdr.vaddr) as usize;
        let mem_size = u32::from_le(phdr.mem_size) as usize;

        let target = &mut arena.memory[vaddr..vaddr + mem_size];
        target[..file_size].copy_from_slice(&image[offset..offset + file_size]);
        target[file_size..].fill(0);
        loaded_segments += 1;
    }

    Ok(LoadedProgram {
        entry_offset: entry,
        loaded_segments,
    })
}

#[cfg(test)]
struct TestSegment {
    vaddr: u32,
    data: Vec<u8>,
    mem_size: u32,
}

#[cfg(test)]
fn build_elf(entry: u32, segments: &[TestSegment]) -> Vec<u8> {
    let ph_offset = size_of::<ElfHeader>();
    let mut data_offset = ph_offset + segments.len() * PROGRAM_HEADER_SIZE;

    let mut header = ElfHeader::zeroed();
    header.ident[..4].copy_from_slice(&ELF_MAGIC);
    header.ident[4] = 1; // 32-bit
    header.ident[5] = 1; // little-endian
    header.elf_type = 2u16.to_le();
    header.machine = 3u16.to_le(); // EM_386
    header.entry = entry.to_le();
    header.ph_offset = (ph_offset as u32).to_le();
    header.ph_entry_size = (PROGRAM_HEADER_SIZE as u16).to_le();
    header.ph_count = (segments.len() as u16).to_le();

    let mut image = bytemuck::bytes_of(&header).to_vec();
    for segment in segments {
        let mut phdr = ProgramHeader::zeroed();
        phdr.p_type = PT_LOAD.to_le();
        phdr.offset = (data_offset as u32).to_le();
        phdr.vaddr = segment.vaddr.to_le();
        phdr.file_size = (segment.data.len() as u32).to_le();
        phdr.mem_size = segment.mem_size.to_le();
        image.extend_from_slice(bytemuck::bytes_of(&phdr));
        data_offset += segment.data.len();
    }
    for segment in segments {
        image.extend_from_slice(&segment.data);
    }
    image
}

#[test]
fn header_sizes_match_the_wire_format() {
    assert_eq!(size_of::<ElfHeader>(), 52);
    assert_eq!(size_of::<ProgramHeader>(), 32);
}

#[test]
fn loads_a_segment_at_its_virtual_address() {
    let image = build_elf(
        0x1000,
        &[TestSegment {
            vaddr: 0x1000,
            data: b"CODE".to_vec(),
            mem_size: 4,
        }],
    );
    let mut arena = ProgramArena::new();
    let program = load(&image, &mut arena).unwrap();

    assert_eq!(program.entry_offset, 0x1000);
    assert_eq!(program.loaded_segments, 1);
    assert_eq!(&arena.bytes()[0x1000..0x1004], b"CODE");
}

#[test]
fn zero_fills_the_segment_tail() {
    let mut arena = ProgramArena::new();
    arena.memory.fill(0xFF);

    let image = build_elf(
        0x2000,
        &[TestSegment {
            vaddr: 0x2000,
            data: b"AB".to_vec(),
            mem_size: 10,
        }],
    );
    load(&image, &mut arena).unwrap();

    assert_eq!(&arena.bytes()[0x2000..0x2002], b"AB");
    assert_eq!(&arena.bytes()[0x2002..0x200A], &[0u8; 8]);
    // bytes outside the segment are not cleared
    assert_eq!(arena.bytes()[0x200A], 0xFF);
}

#[test]
fn rejects_a_short_header() {
    let mut arena = ProgramArena::new();
    assert!(matches!(
        load(&[0u8; 20], &mut arena),
        Err(LoadError::TruncatedHeader(20))
    ));
}

#[test]
fn rejects_a_bad_magic() {
    let mut image = build_elf(0, &[]);
    image[3] = b'X';
    let mut arena = ProgramArena::new();
    assert!(matches!(
        load(&image, &mut arena),
        Err(LoadError::BadMagic([0x7F, b'E', b'L', b'X']))
    ));
}

#[test]
fn rejects_a_program_table_past_the_blob() {
    let mut image = build_elf(0, &[]);
    image[44] = 200; // ph_count
    let mut arena = ProgramArena::new();
    assert!(matches!(
        load(&image, &mut arena),
        Err(LoadError::TruncatedProgramTable)
    ));
}

#[test]
fn rejects_a_segment_whose_bytes_are_missing() {
    let mut image = build_elf(
        0,
        &[TestSegment {
            vaddr: 0,
            data: b"PAYLOAD".to_vec(),
            mem_size: 7,
        }],
    );
    image.truncate(image.len() - 3);
    let mut arena = ProgramArena::new();
    assert!(matches!(
        load(&image, &mut arena),
        Err(LoadError::TruncatedSegment(0))
    ));
}

#[test]
fn rejects_a_segment_reaching_past_the_arena() {
    let image = build_elf(
        0,
        &[TestSegment {
            vaddr: (ARENA_SIZE - 2) as u32,
            data: b"1234".to_vec(),
            mem_size: 4,
        }],
    );
    let mut arena = ProgramArena::new();
    let end = ARENA_SIZE as u64 + 2;
    assert!(matches!(
        load(&image, &mut arena),
        Err(LoadError::SegmentOutOfArena { index: 0, end: e }) if e == end
    ));
}

#[test]
fn rejects_an_entry_outside_the_arena() {
    let image = build_elf(ARENA_SIZE as u32, &[]);
    let mut arena = ProgramArena::new();
    assert!(matches!(
        load(&image, &mut arena),
        Err(LoadError::EntryOutOfArena(_))
    ));
}

#[test]
fn a_rejected_image_leaves_the_arena_untouched() {
    let mut arena = ProgramArena::new();
    arena.memory.fill(0xAB);

    // first segment is fine, second lands outside the arena
    let image = build_elf(
        0,
        &[
            TestSegment {
                vaddr: 0,
                data: b"GOOD".to_vec(),
                mem_size: 4,
            },
            TestSegment {
                vaddr: ARENA_SIZE as u32,
                data: b"BAD".to_vec(),
                mem_size: 3,
            },
        ],
    );
    assert!(load(&image, &mut arena).is_err());
    assert!(arena.bytes().iter().all(|&b| b == 0xAB));
}

#[test]
fn non_load_segments_are_ignored() {
    let mut image = build_elf(
        0,
        &[TestSegment {
            vaddr: 0,
            data: b"OK".to_vec(),
            mem_size: 2,
        }],
    );
    // rewrite the segment type to PT_NOTE; its ranges no longer matter
    let type_offset = size_of::<ElfHeader>();
    image[type_offset..type_offset + 4].copy_from_slice(&4u32.to_le_bytes());

    let mut arena = ProgramArena::new();
    let program = load(&image, &mut arena).unwrap();
    assert_eq!(program.loaded_segments, 0);
}
