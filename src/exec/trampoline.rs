use std::ffi::c_char;

use crate::error::ExecError;

use super::abi::CapabilityTable;
use super::args::ProgramArgs;
use super::elf::{LoadedProgram, ProgramArena};

/// Everything handed to a program at its entry point, and the register
/// each piece travels in: the raw command line in `EBX`, the capability
/// table in `ESI`, the argument block in `EDX`.
#[cfg_attr(not(target_arch = "x86"), allow(dead_code))]
pub(crate) struct EntryContext<'a> {
    pub(crate) command_line: *const c_char,
    pub(crate) capabilities: &'a CapabilityTable,
    pub(crate) args: &'a ProgramArgs,
}

/// Jumps into a loaded program with the entry registers set up.
///
/// # Safety
///
/// The arena must hold machine code for this architecture at the program's
/// entry offset, and that code must follow the register convention above.
#[cfg(target_arch = "x86")]
pub(crate) unsafe fn enter(
    arena: &ProgramArena,
    program: &LoadedProgram,
    context: EntryContext<'_>,
) -> Result<(), ExecError> {
    // load() checked the entry offset against the arena bounds
    let entry = arena.bytes()[program.entry_offset as usize..].as_ptr();
    let line = context.command_line;
    let capabilities: *const CapabilityTable = context.capabilities;
    let args: *const ProgramArgs = context.args;

    // ebx is reserved by the compiler, so the command line rides in eax
    // and moves over inside the asm block
    unsafe {
        core::arch::asm!(
            "push ebx",
            "mov ebx, eax",
            "call ecx",
            "pop ebx",
            inout("eax") line => _,
            inout("ecx") entry => _,
            inout("esi") capabilities => _,
            inout("edx") args => _,
        );
    }
    Ok(())
}

#[cfg(not(target_arch = "x86"))]
pub(crate) unsafe fn enter(
    _arena: &ProgramArena,
    _program: &LoadedProgram,
    _context: EntryContext<'_>,
) -> Result<(), ExecError> {
    Err(ExecError::UnsupportedHost)
}
