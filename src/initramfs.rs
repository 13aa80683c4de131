use std::borrow::Cow;

use crate::dir::DirName;

/// Built-in programs carried outside the volume, keyed by 8.3 name.
///
/// Command resolution falls back to this table when a name is on neither
/// the mounted volume nor its `/core` directory, so a bootable setup works
/// even from an empty disk. Blobs are typically `include_bytes!` data.
#[derive(Debug, Default)]
pub struct Initramfs {
    entries: Vec<(DirName, Cow<'static, [u8]>)>,
}

impl Initramfs {
    pub fn new() -> Initramfs {
        Initramfs::default()
    }

    /// Registers a program, replacing any previous blob under the same name.
    pub fn insert(&mut self, name: &str, data: impl Into<Cow<'static, [u8]>>) {
        let name = DirName::new(name);
        let data = data.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = data,
            None => self.entries.push((name, data)),
        }
    }

    pub fn find(&self, name: &DirName) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, data)| data.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[test]
fn lookup_is_by_8_3_name() {
    let mut ramfs = Initramfs::new();
    ramfs.insert("ls.elf", &b"\x7fELF..."[..]);

    assert!(ramfs.find(&DirName::new("ls.elf")).is_some());
    assert_eq!(
        ramfs.find(&DirName::raw(*b"LS      ELF")).unwrap(),
        b"\x7fELF..."
    );
    assert!(ramfs.find(&DirName::new("cat.elf")).is_none());
}

#[test]
fn inserting_twice_replaces_the_blob() {
    let mut ramfs = Initramfs::new();
    ramfs.insert("ls.elf", &b"one"[..]);
    ramfs.insert("ls.elf", b"two".to_vec());

    assert_eq!(ramfs.find(&DirName::new("ls.elf")).unwrap(), b"two");
}
