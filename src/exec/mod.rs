//! ELF32 program loading and the register-based calling convention
//! handed to loaded programs.

pub mod abi;
pub mod args;
pub mod elf;
pub(crate) mod trampoline;

pub use abi::{CapabilityTable, Session, install_session, take_session};
pub use args::ProgramArgs;
pub use elf::{ARENA_SIZE, LoadedProgram, ProgramArena};
