//! Error types, one enum per failure domain.

/// Errors produced while locating and validating a boot sector.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("No boot signature (`0x55 0xAA`) found in the first 2KB of the image.")]
    MissingBootSignature,
    #[error("Unsupported sector size: {0}. Must be `512`.")]
    UnsupportedSectorSize(u16),
    #[error("Invalid sectors per cluster: {0}. Must be between `1` and `128`.")]
    InvalidSectorsPerCluster(u8),
    #[error("Reserved sector count must not be zero.")]
    NoReservedSectors,
    #[error("Sectors per FAT must not be zero.")]
    NoFatSectors,
    #[error("Total sector count must not be zero.")]
    NoTotalSectors,
    #[error("Image is truncated: the layout needs {need} bytes, the image holds {have}.")]
    ImageTruncated { need: u64, have: u64 },
    #[error("Volume layout does not fit into addressable bytes.")]
    LayoutOverflow,
}

/// Errors from the 12-bit FAT entry engine and chain traversal.
#[derive(Debug, thiserror::Error)]
pub enum FatError {
    #[error("Cluster #{0} is outside the valid range of this volume.")]
    ClusterOutOfRange(u16),
    #[error("FAT entry for cluster #{0} lies outside the FAT region.")]
    EntryOutOfFat(u16),
    #[error("Corrupt cluster chain starting at #{0}: no end-of-chain marker within the cluster count.")]
    CorruptChain(u16),
    #[error("No free cluster left on the volume.")]
    NoFreeCluster,
}

/// Errors from directory lookup and root-slot allocation.
#[derive(Debug, thiserror::Error)]
pub enum DirError {
    #[error("No directory entry named `{0}`.")]
    NotFound(String),
    #[error("Entry `{0}` is not a directory.")]
    NotADirectory(String),
    #[error("The root directory is full.")]
    RootDirectoryFull,
    #[error("{0}")]
    Chain(#[from] FatError),
}

/// Errors while reading a file's data out of its cluster chain.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("{0}")]
    Dir(#[from] DirError),
    #[error("{0}")]
    Chain(#[from] FatError),
    #[error("Directory entry claims {size} bytes but the chain holds only {available}.")]
    SizeBeyondChain { size: u32, available: u32 },
}

/// Errors while writing a file.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Data size {size} exceeds the single-cluster write limit of {max} bytes.")]
    DataTooLarge { size: u32, max: u32 },
    #[error("{0}")]
    Dir(#[from] DirError),
    #[error("{0}")]
    Chain(#[from] FatError),
}

/// Errors while formatting a fresh volume.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Invalid sectors per cluster: {0}. Must be a power of `2` between `1` and `128`.")]
    InvalidSectorsPerCluster(u8),
    #[error("Reserved sector count must not be zero.")]
    NoReservedSectors,
    #[error("Invalid number of FATs (must be 1 or 2): {0}.")]
    InvalidNumberOfFats(u8),
    #[error("Invalid root entry count: {0}. Must be nonzero and fill whole sectors.")]
    InvalidRootEntryCount(u16),
    #[error("Sectors per FAT must not be zero.")]
    NoFatSectors,
    #[error("Volume of {sectors} sectors is too small for its own layout ({min} sectors needed).")]
    VolumeTooSmall { sectors: u32, min: u32 },
    #[error("A FAT of {fat_sectors} sectors cannot index {clusters} clusters.")]
    FatTooSmall { fat_sectors: u16, clusters: u16 },
    #[error("Volume label `{0}` does not fit into 11 bytes.")]
    LabelTooLong(String),
    #[error("I/O error: {0}.")]
    Io(#[from] std::io::Error),
}

/// Errors while validating and loading an ELF image into the arena.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Image of {0} bytes is shorter than an ELF32 header.")]
    TruncatedHeader(usize),
    #[error("Bad ELF magic: {0:02x?}.")]
    BadMagic([u8; 4]),
    #[error("Program header table lies outside the image.")]
    TruncatedProgramTable,
    #[error("Segment #{0}: file range lies outside the image.")]
    TruncatedSegment(usize),
    #[error("Segment #{index} ends at {end:#x}, beyond the execution arena.")]
    SegmentOutOfArena { index: usize, end: u64 },
    #[error("Entry point {0:#x} lies outside the execution arena.")]
    EntryOutOfArena(u32),
}

/// Errors from command resolution and the run pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Unknown command: `{0}`.")]
    UnknownCommand(String),
    #[error("No active session; mount a volume and install a session first.")]
    NoSession,
    #[error("Program entry requires an x86 host; this build only loads and validates.")]
    UnsupportedHost,
    #[error("{0}")]
    Load(#[from] LoadError),
    #[error("Command line contains a NUL byte.")]
    NulInCommandLine(#[from] std::ffi::NulError),
}
