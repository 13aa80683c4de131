use std::ffi::{CStr, c_char};
use std::fmt;
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use crate::console::Console;
use crate::dir::{DirName, Directory, FileInfo};
use crate::error::DirError;
use crate::initramfs::Initramfs;
use crate::volume::Volume;

/// Version stamped into the first field of the capability table. Programs
/// check it before trusting the slot layout.
pub const CAPABILITY_ABI_VERSION: u32 = 1;

const CWD_CAPACITY: usize = 64;

/// Services a loaded program may call, passed by address in `ESI`.
///
/// The layout is part of the ABI: the version comes first, then one slot
/// per service in a fixed order. Empty slots are null, so programs probe
/// a slot before calling it; the trailing slots are reserved for services
/// that do not exist yet.
#[repr(C)]
pub struct CapabilityTable {
    pub abi_version: u32,
    pub print: Option<extern "C" fn(*const c_char)>,
    pub put_char: Option<extern "C" fn(c_char)>,
    pub clear: Option<extern "C" fn()>,
    pub backspace: Option<extern "C" fn()>,
    pub set_color: Option<extern "C" fn(u8, u8)>,
    pub print_int: Option<extern "C" fn(i32)>,
    pub read_file: Option<extern "C" fn(*const c_char, *mut u8, u32) -> i32>,
    pub write_file: Option<extern "C" fn(*const c_char, *const u8, u32) -> i32>,
    pub list_files: Option<extern "C" fn()>,
    pub get_cwd: Option<extern "C" fn() -> *const c_char>,
    pub set_cwd: Option<extern "C" fn(*const c_char) -> i32>,
    pub list_files_in_dir: Option<extern "C" fn(*const c_char)>,
    pub create_dir: Option<extern "C" fn(*const c_char) -> i32>,
    pub delete_file: Option<extern "C" fn(*const c_char) -> i32>,
    pub copy_file: Option<extern "C" fn(*const c_char, *const c_char) -> i32>,
    pub move_file: Option<extern "C" fn(*const c_char, *const c_char) -> i32>,
}

static CAPABILITIES: CapabilityTable = CapabilityTable {
    abi_version: CAPABILITY_ABI_VERSION,
    print: Some(cap_print),
    put_char: Some(cap_put_char),
    clear: Some(cap_clear),
    backspace: Some(cap_backspace),
    set_color: Some(cap_set_color),
    print_int: Some(cap_print_int),
    read_file: Some(cap_read_file),
    write_file: Some(cap_write_file),
    list_files: Some(cap_list_files),
    get_cwd: Some(cap_get_cwd),
    set_cwd: Some(cap_set_cwd),
    list_files_in_dir: Some(cap_list_files_in_dir),
    create_dir: None,
    delete_file: None,
    copy_file: None,
    move_file: None,
};

pub fn capability_table() -> &'static CapabilityTable {
    &CAPABILITIES
}

/// Current working directory, kept NUL-terminated in place so `get_cwd`
/// can hand its address straight to programs.
struct CwdBuf {
    bytes: [u8; CWD_CAPACITY],
}

impl CwdBuf {
    fn root() -> CwdBuf {
        let mut cwd = CwdBuf {
            bytes: [0; CWD_CAPACITY],
        };
        cwd.set("/");
        cwd
    }

    fn set(&mut self, path: &str) {
        let n = path.len().min(self.bytes.len() - 1);
        self.bytes[..n].copy_from_slice(&path.as_bytes()[..n]);
        self.bytes[n] = 0;
    }

    fn as_str(&self) -> &str {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        core::str::from_utf8(&self.bytes[..end]).unwrap_or("/")
    }

    fn as_ptr(&self) -> *const c_char {
        self.bytes.as_ptr().cast()
    }
}

/// Everything the capability shims operate on: the mounted volume, the
/// working directory, the console and the built-in program table.
///
/// One session at a time is installed into process-wide state; the shims
/// reach it through there because loaded programs call them with nothing
/// but registers.
pub struct Session {
    pub(crate) volume: Volume<Vec<u8>>,
    cwd: CwdBuf,
    pub(crate) console: Box<dyn Console + Send>,
    pub(crate) initramfs: Initramfs,
}

impl Session {
    pub fn new(volume: Volume<Vec<u8>>, console: Box<dyn Console + Send>) -> Session {
        Session {
            volume,
            cwd: CwdBuf::root(),
            console,
            initramfs: Initramfs::new(),
        }
    }

    pub fn set_initramfs(&mut self, initramfs: Initramfs) {
        self.initramfs = initramfs;
    }

    pub fn cwd(&self) -> &str {
        self.cwd.as_str()
    }

    /// The directory the working path names right now.
    pub(crate) fn resolve_cwd(&self) -> Result<Directory, DirError> {
        match self.cwd.as_str() {
            "/" => Ok(Directory::Root),
            path => {
                let name = path.trim_start_matches('/');
                let cluster = self.volume.find_directory(&DirName::new(name))?;
                Ok(Directory::Cluster(cluster))
            }
        }
    }

    /// Moves to `/`, `..` (also the root) or a root-level directory.
    pub(crate) fn change_dir(&mut self, path: &str) -> Result<(), DirError> {
        match path.trim() {
            "/" | ".." => {
                self.cwd.set("/");
                Ok(())
            }
            name => {
                let name = DirName::new(name.trim_start_matches('/'));
                self.volume.find_directory(&name)?;
                self.cwd.set(&format!("/{name}"));
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("cwd", &self.cwd()).finish()
    }
}

static ACTIVE_SESSION: Mutex<Option<Session>> = Mutex::new(None);

fn active() -> MutexGuard<'static, Option<Session>> {
    // a shim panicking mid-call must not wedge every later command
    ACTIVE_SESSION
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Makes a session current, returning the one it displaced.
pub fn install_session(session: Session) -> Option<Session> {
    active().replace(session)
}

/// Removes the current session, e.g. to get the volume image back out.
pub fn take_session() -> Option<Session> {
    active().take()
}

pub(crate) fn with_session<R>(f: impl FnOnce(&mut Session) -> R) -> Option<R> {
    active().as_mut().map(f)
}

fn cstr_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { CStr::from_ptr(ptr) };
    text.to_str().ok()
}

fn print_listing(console: &mut dyn Console, files: &[FileInfo]) {
    for file in files {
        let line = if file.directory {
            format!("{:<12} <DIR>\n", file.name)
        } else {
            format!("{:<12} {}\n", file.name, file.size)
        };
        console.print(&line);
    }
}

extern "C" fn cap_print(text: *const c_char) {
    if text.is_null() {
        return;
    }
    let text = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    with_session(|s| s.console.print(&text));
}

extern "C" fn cap_put_char(c: c_char) {
    with_session(|s| s.console.put_char(c as u8 as char));
}

extern "C" fn cap_clear() {
    with_session(|s| s.console.clear());
}

extern "C" fn cap_backspace() {
    with_session(|s| s.console.backspace());
}

extern "C" fn cap_set_color(foreground: u8, background: u8) {
    with_session(|s| s.console.set_color(foreground, background));
}

extern "C" fn cap_print_int(value: i32) {
    with_session(|s| s.console.print(&value.to_string()));
}

/// Reads a file from the working directory into a caller buffer.
/// Returns the number of bytes copied, at most `capacity`, or -1.
extern "C" fn cap_read_file(name: *const c_char, buffer: *mut u8, capacity: u32) -> i32 {
    let Some(name) = cstr_arg(name) else {
        return -1;
    };
    if buffer.is_null() && capacity > 0 {
        return -1;
    }
    with_session(|s| {
        let dir = match s.resolve_cwd() {
            Ok(dir) => dir,
            Err(_) => return -1,
        };
        match s.volume.read_from(dir, &DirName::new(name)) {
            Ok(data) => {
                let n = data.len().min(capacity as usize);
                if n > 0 {
                    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buffer, n) };
                }
                n as i32
            }
            Err(_) => -1,
        }
    })
    .unwrap_or(-1)
}

/// Creates or overwrites a root-directory file. Returns 0, or -1.
extern "C" fn cap_write_file(name: *const c_char, data: *const u8, len: u32) -> i32 {
    let Some(name) = cstr_arg(name) else {
        return -1;
    };
    if data.is_null() && len > 0 {
        return -1;
    }
    let data = if len == 0 {
        &[][..]
    } else {
        unsafe { core::slice::from_raw_parts(data, len as usize) }
    };
    with_session(|s| match s.volume.write_file(&DirName::new(name), data) {
        Ok(()) => 0,
        Err(_) => -1,
    })
    .unwrap_or(-1)
}

extern "C" fn cap_list_files() {
    with_session(|s| {
        if let Ok(files) = s.volume.list_root() {
            print_listing(s.console.as_mut(), &files);
        }
    });
}

extern "C" fn cap_get_cwd() -> *const c_char {
    // the session lives in process-wide state, so the pointer stays valid
    // until it is replaced or taken
    with_session(|s| s.cwd.as_ptr()).unwrap_or(ptr::null())
}

extern "C" fn cap_set_cwd(path: *const c_char) -> i32 {
    let Some(path) = cstr_arg(path) else {
        return -1;
    };
    with_session(|s| match s.change_dir(path) {
        Ok(()) => 0,
        Err(_) => -1,
    })
    .unwrap_or(-1)
}

extern "C" fn cap_list_files_in_dir(dir: *const c_char) {
    let Some(dir) = cstr_arg(dir) else {
        return;
    };
    with_session(|s| {
        // "/" is the root listing, so `ls` works against any cwd value
        let listed = match dir.trim() {
            "" | "/" => s.volume.list_root(),
            path => s.volume.list_dir(&DirName::new(path.trim_start_matches('/'))),
        };
        if let Ok(files) = listed {
            print_listing(s.console.as_mut(), &files);
        }
    });
}

#[cfg(test)]
pub(crate) static TEST_SESSION_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
pub(crate) fn test_guard() -> MutexGuard<'static, ()> {
    TEST_SESSION_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::SharedConsole;
    use crate::dir::{DIR_ENTRY_SIZE, Attributes, DirEntry};
    use crate::fat::CHAIN_TERMINATOR;
    use crate::format::FormatVolumeOptionsBuilder;
    use crate::format::Formatter;

    fn fresh_volume() -> Volume<Vec<u8>> {
        let options = FormatVolumeOptionsBuilder::default().build().unwrap();
        let image = Formatter::try_from(options).unwrap().build_image();
        Volume::mount(image).unwrap()
    }

    /// Adds a `CORE` subdirectory at cluster 2 holding one file at cluster 3.
    fn add_core_dir(volume: &mut Volume<Vec<u8>>) {
        let mut sub = DirEntry::for_file(DirName::new("core"), 2, 0);
        sub.attributes = Attributes::DIRECTORY.bits();
        volume.write_entry_at(9728, &sub);

        let inner = DirEntry::for_file(DirName::new("note.txt"), 3, 5);
        let inner_bytes = bytemuck::bytes_of(&inner).to_vec();
        volume.slice_mut(16896, DIR_ENTRY_SIZE)
            .unwrap()
            .copy_from_slice(&inner_bytes);
        volume
            .slice_mut(16896 + 512, 5)
            .unwrap()
            .copy_from_slice(b"inner");
        volume.write_fat_entry(2, CHAIN_TERMINATOR).unwrap();
        volume.write_fat_entry(3, CHAIN_TERMINATOR).unwrap();
    }

    fn install_test_session() -> SharedConsole {
        let console = SharedConsole::default();
        let mut volume = fresh_volume();
        add_core_dir(&mut volume);
        volume
            .write_file(&DirName::new("hello.txt"), b"hi\n")
            .unwrap();
        let _ = install_session(Session::new(volume, Box::new(console.clone())));
        console
    }

    #[test]
    fn table_is_versioned_and_reserved_slots_are_null() {
        let table = capability_table();
        assert_eq!(table.abi_version, 1);
        assert!(table.print.is_some());
        assert!(table.list_files_in_dir.is_some());
        assert!(table.create_dir.is_none());
        assert!(table.delete_file.is_none());
        assert!(table.copy_file.is_none());
        assert!(table.move_file.is_none());
    }

    #[test]
    fn console_shims_forward_to_the_session_console() {
        let _guard = test_guard();
        let console = install_test_session();

        cap_print(c"hello ".as_ptr());
        cap_put_char(b'!' as c_char);
        cap_print_int(-5);
        assert_eq!(console.contents(), "hello !-5");

        let _ = take_session();
    }

    #[test]
    fn read_shim_copies_up_to_capacity() {
        let _guard = test_guard();
        install_test_session();

        let mut buffer = [0u8; 16];
        let n = cap_read_file(c"hello.txt".as_ptr(), buffer.as_mut_ptr(), 16);
        assert_eq!(n, 3);
        assert_eq!(&buffer[..3], b"hi\n");

        let n = cap_read_file(c"hello.txt".as_ptr(), buffer.as_mut_ptr(), 2);
        assert_eq!(n, 2);

        assert_eq!(cap_read_file(c"absent.txt".as_ptr(), buffer.as_mut_ptr(), 16), -1);
        assert_eq!(cap_read_file(ptr::null(), buffer.as_mut_ptr(), 16), -1);

        let _ = take_session();
    }

    #[test]
    fn write_shim_lands_in_the_root_directory() {
        let _guard = test_guard();
        install_test_session();

        let data = b"fresh";
        let rc = cap_write_file(c"new.txt".as_ptr(), data.as_ptr(), data.len() as u32);
        assert_eq!(rc, 0);

        let session = take_session().unwrap();
        assert_eq!(
            session.volume.read_file(&DirName::new("new.txt")).unwrap(),
            b"fresh"
        );
    }

    #[test]
    fn cwd_shims_move_between_root_and_a_subdirectory() {
        let _guard = test_guard();
        install_test_session();

        let cwd = unsafe { CStr::from_ptr(cap_get_cwd()) };
        assert_eq!(cwd.to_str().unwrap(), "/");

        assert_eq!(cap_set_cwd(c"CORE".as_ptr()), 0);
        let cwd = unsafe { CStr::from_ptr(cap_get_cwd()) };
        assert_eq!(cwd.to_str().unwrap(), "/core");

        // reads now resolve inside /core
        let mut buffer = [0u8; 16];
        let n = cap_read_file(c"note.txt".as_ptr(), buffer.as_mut_ptr(), 16);
        assert_eq!(n, 5);
        assert_eq!(&buffer[..5], b"inner");

        assert_eq!(cap_set_cwd(c"hello.txt".as_ptr()), -1);
        assert_eq!(cap_set_cwd(c"..".as_ptr()), 0);
        let cwd = unsafe { CStr::from_ptr(cap_get_cwd()) };
        assert_eq!(cwd.to_str().unwrap(), "/");

        let _ = take_session();
    }

    #[test]
    fn listing_shims_print_names_and_sizes() {
        let _guard = test_guard();
        let console = install_test_session();

        cap_list_files();
        let root_listing = console.take();
        assert!(root_listing.contains("core"));
        assert!(root_listing.contains("<DIR>"));
        assert!(root_listing.contains("hello.txt"));

        cap_list_files_in_dir(c"core".as_ptr());
        let core_listing = console.take();
        assert!(core_listing.contains("note.txt"));
        assert!(core_listing.contains('5'));

        cap_list_files_in_dir(c"/".as_ptr());
        assert!(console.take().contains("hello.txt"));

        let _ = take_session();
    }

    #[test]
    fn shims_without_a_session_are_inert() {
        let _guard = test_guard();
        let _ = take_session();

        cap_print(c"nowhere".as_ptr());
        let mut buffer = [0u8; 4];
        assert_eq!(cap_read_file(c"x".as_ptr(), buffer.as_mut_ptr(), 4), -1);
        assert!(cap_get_cwd().is_null());
    }
}
