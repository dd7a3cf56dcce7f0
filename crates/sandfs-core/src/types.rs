// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for SandFS

/// Internal node (inode) identifier. Assigned once from a monotonically
/// increasing counter and never reused within an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Mount identifier into the mount arena. Ordered so mount sets can live in
/// ordered collections during unmount eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MountId(pub u64);

/// File descriptor: an index into the stream table.
pub type Fd = usize;

/// Identifier for the `{flags, position}` state shared between duplicated
/// descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamStateId(pub u64);

// POSIX mode bits. The VFS is self-contained, so these are fixed values
// rather than host libc constants.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Permission bits plus setuid/setgid/sticky.
pub const MODE_BITS: u32 = 0o7777;
/// Permission bits only.
pub const PERM_BITS: u32 = 0o777;

// Open flags (Linux ABI values, as exposed by the embedding runtime).
pub const O_RDONLY: u32 = 0o0;
pub const O_WRONLY: u32 = 0o1;
pub const O_RDWR: u32 = 0o2;
pub const O_ACCMODE: u32 = 0o3;
pub const O_CREAT: u32 = 0o100;
pub const O_EXCL: u32 = 0o200;
pub const O_TRUNC: u32 = 0o1000;
pub const O_APPEND: u32 = 0o2000;
pub const O_DIRECTORY: u32 = 0o200000;
pub const O_NOFOLLOW: u32 = 0o400000;

// Seek whence values.
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

// mmap protection and flag bits (only the ones the stream layer inspects).
pub const PROT_READ: u32 = 0x1;
pub const PROT_WRITE: u32 = 0x2;
pub const MAP_PRIVATE: u32 = 0x02;
pub const MAP_SHARED: u32 = 0x01;

/// Pack a device number from its major/minor halves: `(major << 8) | minor`.
pub fn make_dev(major: u32, minor: u32) -> u64 {
    (((major & 0xff) << 8) | (minor & 0xff)) as u64
}

pub fn dev_major(dev: u64) -> u32 {
    ((dev >> 8) & 0xff) as u32
}

pub fn dev_minor(dev: u64) -> u32 {
    (dev & 0xff) as u32
}

/// File attributes as reported by `getattr`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub blksize: u32,
    pub blocks: u64,
}

/// Attribute changes accepted by `setattr`. Unset fields are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub size: Option<u64>,
    pub timestamp: Option<i64>,
}

/// Result of an mmap request: the mapped bytes and whether fresh backing
/// memory was allocated for them (as opposed to aliasing existing storage).
#[derive(Clone, Debug)]
pub struct MappedRegion {
    pub data: Vec<u8>,
    pub allocated: bool,
}
