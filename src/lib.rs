//! # fat12-fs
//!
//! A FAT12 volume engine with an ELF32 program loader: the storage and
//! execution core of a small teaching operating system.
//!
//! ## Usage
//!
//! ```rust
//! use fat12_fs::dir::DirName;
//! use fat12_fs::format::{FormatVolumeOptionsBuilder, Formatter};
//! use fat12_fs::volume::Volume;
//!
//! // A blank 1.44 MB floppy image with a volume label.
//! let options = FormatVolumeOptionsBuilder::default()
//!     .label("demo")
//!     .build()
//!     .unwrap();
//! let image = Formatter::try_from(options).unwrap().build_image();
//!
//! let mut volume = Volume::mount(image).unwrap();
//! volume
//!     .write_file(&DirName::new("hello.txt"), b"hi there\n")
//!     .unwrap();
//!
//! let data = volume.read_file(&DirName::new("hello.txt")).unwrap();
//! assert_eq!(data, b"hi there\n");
//! ```
//!
//! ## Limitations
//! Names are plain 8.3, written files cap out at one cluster, and loaded
//! programs are 32-bit x86, so actually entering one needs an x86 host.

/// Boot sector layout and mount-time validation
pub(crate) mod boot;
pub mod console;
/// 8.3 names and directory records
pub mod dir;
pub mod error;
/// Program loading and the entry register convention
pub mod exec;
pub(crate) mod fat;
pub(crate) mod file;
/// Blank-volume formatting
pub mod format;
pub mod initramfs;
pub mod shell;
pub mod volume;

pub const SECTOR_SIZE: usize = 512;
