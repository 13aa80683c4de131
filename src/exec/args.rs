use std::ffi::{CStr, c_char};
use std::ptr;

/// Capacity of the argv pointer array, including the terminating null.
pub const MAX_ARGV: usize = 64;

/// Bytes available for the argument strings themselves.
pub const ARG_POOL_SIZE: usize = 1024;

/// The C-shaped argument block a program receives in `EDX`: a count and a
/// null-terminated pointer array, each pointer a NUL-terminated string.
#[repr(C)]
pub struct ProgramArgs {
    pub argc: i32,
    pub argv: [*const c_char; MAX_ARGV],
}

/// Owns the bytes behind a [`ProgramArgs`] view.
///
/// Tokens are copied into a fixed pool at parse time and only offsets are
/// kept; [`ArgvPool::program_args`] materializes the pointer array on
/// demand. Both the pool and the argument block are boxed, so the pool can
/// be moved around freely while handed-out pointers stay valid.
pub struct ArgvPool {
    pool: Box<[u8]>,
    offsets: Vec<u16>,
    args: Box<ProgramArgs>,
}

impl ArgvPool {
    /// Tokenizes a command line on runs of spaces and tabs.
    ///
    /// The first token is the command itself, so programs see it as
    /// `argv[0]`. Tokens past the pointer capacity or the pool capacity
    /// are silently dropped.
    pub fn parse(line: &str) -> ArgvPool {
        let mut pool = vec![0u8; ARG_POOL_SIZE].into_boxed_slice();
        let mut offsets = Vec::new();
        let mut cursor = 0usize;

        for token in line.split([' ', '\t']).filter(|t| !t.is_empty()) {
            if offsets.len() == MAX_ARGV - 1 {
                break;
            }
            let bytes = token.as_bytes();
            if cursor + bytes.len() + 1 > ARG_POOL_SIZE {
                break;
            }
            pool[cursor..cursor + bytes.len()].copy_from_slice(bytes);
            pool[cursor + bytes.len()] = 0;
            offsets.push(cursor as u16);
            cursor += bytes.len() + 1;
        }

        ArgvPool {
            pool,
            offsets,
            args: Box::new(ProgramArgs {
                argc: 0,
                argv: [ptr::null(); MAX_ARGV],
            }),
        }
    }

    pub fn argc(&self) -> usize {
        self.offsets.len()
    }

    pub fn token(&self, index: usize) -> Option<&CStr> {
        let offset = *self.offsets.get(index)? as usize;
        CStr::from_bytes_until_nul(&self.pool[offset..]).ok()
    }

    /// Fills in the pointer array and hands out the argument block.
    pub fn program_args(&mut self) -> &ProgramArgs {
        self.args.argc = self.offsets.len() as i32;
        self.args.argv = [ptr::null(); MAX_ARGV];
        for (slot, &offset) in self.args.argv.iter_mut().zip(&self.offsets) {
            *slot = self.pool[offset as usize..].as_ptr().cast();
        }
        &self.args
    }
}

#[test]
fn tokenizes_on_spaces_and_tabs() {
    let pool = ArgvPool::parse("cat hello.txt\t extra");
    assert_eq!(pool.argc(), 3);
    assert_eq!(pool.token(0).unwrap().to_str().unwrap(), "cat");
    assert_eq!(pool.token(1).unwrap().to_str().unwrap(), "hello.txt");
    assert_eq!(pool.token(2).unwrap().to_str().unwrap(), "extra");
}

#[test]
fn whitespace_runs_collapse() {
    let pool = ArgvPool::parse("  ls   -l ");
    assert_eq!(pool.argc(), 2);
    assert_eq!(pool.token(0).unwrap().to_str().unwrap(), "ls");
    assert_eq!(pool.token(1).unwrap().to_str().unwrap(), "-l");
}

#[test]
fn an_empty_line_has_no_arguments() {
    let mut pool = ArgvPool::parse("   ");
    assert_eq!(pool.argc(), 0);
    let args = pool.program_args();
    assert_eq!(args.argc, 0);
    assert!(args.argv[0].is_null());
}

#[test]
fn token_count_is_capped_below_the_pointer_capacity() {
    let line = (0..80).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
    let pool = ArgvPool::parse(&line);
    assert_eq!(pool.argc(), MAX_ARGV - 1);
}

#[test]
fn tokens_stop_when_the_pool_fills() {
    let token = "x".repeat(100);
    let line = vec![token; 15].join(" ");
    let pool = ArgvPool::parse(&line);
    // 101 bytes per token with its NUL: ten fit in 1024
    assert_eq!(pool.argc(), 10);
}

#[test]
fn the_argument_block_points_into_the_pool() {
    let mut pool = ArgvPool::parse("echo hi");
    let args = pool.program_args();
    assert_eq!(args.argc, 2);
    assert!(args.argv[2].is_null());

    let first = unsafe { CStr::from_ptr(args.argv[0]) };
    let second = unsafe { CStr::from_ptr(args.argv[1]) };
    assert_eq!(first.to_str().unwrap(), "echo");
    assert_eq!(second.to_str().unwrap(), "hi");
}
