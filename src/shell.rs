//! Turns typed command lines into running programs.
//!
//! The first word of a line names the program. It is looked up as an 8.3
//! name in the volume root, then in `/core`, then in the initramfs, and at
//! each stop an `ELF` extension is also tried when the typed name carries
//! none. The first blob found is loaded and entered with the whole line as
//! its command tail.

use std::ffi::CString;

use crate::dir::DirName;
use crate::error::ExecError;
use crate::exec::abi;
use crate::exec::args::ArgvPool;
use crate::exec::elf::{self, ProgramArena};
use crate::exec::trampoline::{self, EntryContext};

/// The command interpreter. Owns the arena that launched programs run in,
/// so one `Shell` reuses the same memory across commands.
pub struct Shell {
    arena: ProgramArena,
}

impl Shell {
    pub fn new() -> Shell {
        Shell {
            arena: ProgramArena::new(),
        }
    }

    /// Resolves the first word of `line` to a program, loads it and enters
    /// it. Blank lines do nothing.
    ///
    /// Lookup misses move on to the next spot in the search order. A name
    /// that resolves but does not load as a program is reported, not
    /// skipped.
    pub fn run_line(&mut self, line: &str) -> Result<(), ExecError> {
        let Some(command) = line.split([' ', '\t']).find(|word| !word.is_empty()) else {
            return Ok(());
        };
        let image = resolve_program(command)
            .ok_or(ExecError::NoSession)?
            .ok_or_else(|| ExecError::UnknownCommand(command.to_string()))?;

        let program = elf::load(&image, &mut self.arena)?;
        let command_line = CString::new(line)?;
        let mut argv = ArgvPool::parse(line);
        let context = EntryContext {
            command_line: command_line.as_ptr(),
            capabilities: abi::capability_table(),
            args: argv.program_args(),
        };
        // SAFETY: the image came off the mounted volume or the initramfs,
        // which only carry programs built for this entry convention.
        unsafe { trampoline::enter(&self.arena, &program, context) }
    }
}

impl Default for Shell {
    fn default() -> Shell {
        Shell::new()
    }
}

/// Walks the search order for `command` inside the active session.
///
/// The outer `None` means no session is installed; the inner one means the
/// name is nowhere to be found.
fn resolve_program(command: &str) -> Option<Option<Vec<u8>>> {
    abi::with_session(|session| {
        let name = DirName::new(command);
        let mut candidates = vec![name];
        if !name.has_extension() {
            candidates.push(name.with_extension(*b"ELF"));
        }

        for candidate in &candidates {
            if let Ok(data) = session.volume.read_file(candidate) {
                return Some(data);
            }
        }
        let core = DirName::new("core");
        for candidate in &candidates {
            if let Ok(data) = session.volume.read_file_in_dir(&core, candidate) {
                return Some(data);
            }
        }
        for candidate in &candidates {
            if let Some(data) = session.initramfs.find(candidate) {
                return Some(data.to_vec());
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::SharedConsole;
    use crate::dir::{Attributes, DIR_ENTRY_SIZE, DirEntry};
    use crate::error::LoadError;
    use crate::exec::Session;
    use crate::exec::abi::{install_session, take_session, test_guard};
    use crate::fat::CHAIN_TERMINATOR;
    use crate::format::{FormatVolumeOptionsBuilder, Formatter};
    use crate::initramfs::Initramfs;
    use crate::volume::Volume;

    fn fresh_volume() -> Volume<Vec<u8>> {
        let options = FormatVolumeOptionsBuilder::default().build().unwrap();
        let image = Formatter::try_from(options).unwrap().build_image();
        Volume::mount(image).unwrap()
    }

    fn install(volume: Volume<Vec<u8>>) -> SharedConsole {
        let console = SharedConsole::default();
        let _ = install_session(Session::new(volume, Box::new(console.clone())));
        console
    }

    /// A header-only image with magic, no segments, entry at offset zero.
    /// Loads fine; there is just nothing to copy.
    fn minimal_elf() -> Vec<u8> {
        let mut image = vec![0u8; 52];
        image[..4].copy_from_slice(b"\x7fELF");
        image
    }

    /// Puts a `CORE` directory at cluster 2 holding one program at cluster 3.
    fn add_core_program(volume: &mut Volume<Vec<u8>>, name: &str, data: &[u8]) {
        let mut sub = DirEntry::for_file(DirName::new("core"), 2, 0);
        sub.attributes = Attributes::DIRECTORY.bits();
        volume.write_entry_at(9728, &sub);

        let inner = DirEntry::for_file(DirName::new(name), 3, data.len() as u32);
        volume
            .slice_mut(16896, DIR_ENTRY_SIZE)
            .unwrap()
            .copy_from_slice(bytemuck::bytes_of(&inner));
        volume
            .slice_mut(16896 + 512, data.len())
            .unwrap()
            .copy_from_slice(data);
        volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();
        volume.write_fat_entry(3, CHAIN_TERMINATOR).unwrap();
    }

    #[test]
    fn blank_lines_do_nothing() {
        let _guard = test_guard();
        let _ = take_session();

        let mut shell = Shell::new();
        assert!(shell.run_line("").is_ok());
        assert!(shell.run_line("   \t ").is_ok());
    }

    #[test]
    fn commands_need_a_session() {
        let _guard = test_guard();
        let _ = take_session();

        let mut shell = Shell::new();
        let result = shell.run_line("ls");
        assert!(matches!(result, Err(ExecError::NoSession)));
    }

    #[test]
    fn unknown_names_are_reported() {
        let _guard = test_guard();
        let _ = install(fresh_volume());

        let mut shell = Shell::new();
        let result = shell.run_line("nosuch -l");
        match result {
            Err(ExecError::UnknownCommand(name)) => assert_eq!(name, "nosuch"),
            other => panic!("expected unknown command, got {other:?}"),
        }
        let _ = take_session();
    }

    #[test]
    fn a_resolved_file_that_is_no_program_is_reported() {
        let _guard = test_guard();
        let mut volume = fresh_volume();
        volume
            .write_file(&DirName::new("notes.txt"), b"plain text, no magic")
            .unwrap();
        let _ = install(volume);

        let mut shell = Shell::new();
        let result = shell.run_line("notes.txt");
        assert!(matches!(
            result,
            Err(ExecError::Load(LoadError::BadMagic(_)))
        ));
        let _ = take_session();
    }

    #[test]
    fn the_volume_root_is_searched_before_the_initramfs() {
        let _guard = test_guard();
        let mut volume = fresh_volume();
        volume
            .write_file(&DirName::new("ls.elf"), b"not a program")
            .unwrap();

        let console = SharedConsole::default();
        let mut session = Session::new(volume, Box::new(console.clone()));
        let mut ramfs = Initramfs::new();
        ramfs.insert("ls.elf", minimal_elf());
        session.set_initramfs(ramfs);
        let _ = install_session(session);

        let mut shell = Shell::new();
        let result = shell.run_line("ls");
        assert!(matches!(
            result,
            Err(ExecError::Load(LoadError::BadMagic(_)))
        ));
        let _ = take_session();
    }

    #[test]
    fn a_line_with_an_interior_nul_is_rejected() {
        let _guard = test_guard();
        let mut volume = fresh_volume();
        volume
            .write_file(&DirName::new("hi.elf"), &minimal_elf())
            .unwrap();
        let _ = install(volume);

        let mut shell = Shell::new();
        let result = shell.run_line("hi.elf \0oops");
        assert!(matches!(result, Err(ExecError::NulInCommandLine(_))));
        let _ = take_session();
    }

    // These runs make it all the way to the jump, which only a 32-bit x86
    // host can take. Everywhere else the refusal doubles as proof that the
    // name resolved and the image loaded.
    #[cfg(not(target_arch = "x86"))]
    mod resolution {
        use super::*;

        #[test]
        fn a_root_program_resolves_without_the_typed_extension() {
            let _guard = test_guard();
            let mut volume = fresh_volume();
            volume
                .write_file(&DirName::new("hi.elf"), &minimal_elf())
                .unwrap();
            let _ = install(volume);

            let mut shell = Shell::new();
            assert!(matches!(
                shell.run_line("hi"),
                Err(ExecError::UnsupportedHost)
            ));
            assert!(matches!(
                shell.run_line("hi.elf"),
                Err(ExecError::UnsupportedHost)
            ));
            let _ = take_session();
        }

        #[test]
        fn core_programs_resolve() {
            let _guard = test_guard();
            let mut volume = fresh_volume();
            add_core_program(&mut volume, "cat.elf", &minimal_elf());
            let _ = install(volume);

            let mut shell = Shell::new();
            assert!(matches!(
                shell.run_line("cat readme.txt"),
                Err(ExecError::UnsupportedHost)
            ));
            let _ = take_session();
        }

        #[test]
        fn the_initramfs_is_the_last_resort() {
            let _guard = test_guard();
            let console = SharedConsole::default();
            let mut session = Session::new(fresh_volume(), Box::new(console.clone()));
            let mut ramfs = Initramfs::new();
            ramfs.insert("probe.elf", minimal_elf());
            session.set_initramfs(ramfs);
            let _ = install_session(session);

            let mut shell = Shell::new();
            assert!(matches!(
                shell.run_line("probe"),
                Err(ExecError::UnsupportedHost)
            ));
            let _ = take_session();
        }
    }
}
