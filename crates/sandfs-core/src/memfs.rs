// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The in-memory backing store.
//!
//! Directories keep a name → node map, files keep their bytes in a
//! [`FileStorage`], symlinks their target string. Directory lookup always
//! misses: the VFS name table is the only cache, and everything reachable
//! here was entered into it at creation time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::perms::{is_blkdev, is_chrdev, is_dir, is_fifo};
use crate::storage::FileStorage;
use crate::types::*;
use crate::vfs::{now_millis, Fs, FsType, NodeData, NodeOps, StreamOps};

/// The in-memory filesystem type.
pub struct MemFs;

impl FsType for MemFs {
    fn name(&self) -> &'static str {
        "memfs"
    }

    fn mount(&self, fs: &mut Fs, mount: MountId) -> FsResult<NodeId> {
        create_memfs_node(fs, None, Some(mount), "/", S_IFDIR | 0o777, 0)
    }
}

/// Create a memfs node of the type encoded in `mode` and wire it under
/// `parent`. Block devices and FIFOs are not supported.
pub(crate) fn create_memfs_node(
    fs: &mut Fs,
    parent: Option<NodeId>,
    mount: Option<MountId>,
    name: &str,
    mode: u32,
    rdev: u64,
) -> FsResult<NodeId> {
    if is_blkdev(mode) || is_fifo(mode) {
        return Err(FsError::NotPermitted);
    }
    let (node_ops, stream_ops, data): (Arc<dyn NodeOps>, Arc<dyn StreamOps>, NodeData) =
        match mode & S_IFMT {
            S_IFDIR => (
                Arc::new(DirNodeOps),
                Arc::new(DirStreamOps),
                NodeData::Directory {
                    children: HashMap::new(),
                },
            ),
            S_IFREG => (
                Arc::new(FileNodeOps),
                Arc::new(FileStreamOps),
                NodeData::File {
                    contents: FileStorage::new(),
                },
            ),
            S_IFLNK => (
                Arc::new(LinkNodeOps),
                Arc::new(NoStreamOps),
                NodeData::Symlink {
                    target: String::new(),
                },
            ),
            S_IFCHR => (
                Arc::new(ChardevNodeOps),
                Arc::new(crate::devices::ChrdevOps),
                NodeData::Empty,
            ),
            _ => return Err(FsError::InvalidArgument),
        };
    let id = fs.create_node(parent, mount, name, mode, rdev, node_ops, stream_ops, data)?;
    if let Some(parent) = parent {
        let timestamp = fs.node(id)?.timestamp;
        children_mut(fs, parent)?.insert(name.to_string(), id);
        fs.node_mut(parent)?.timestamp = timestamp;
    }
    Ok(id)
}

fn children(fs: &Fs, node: NodeId) -> FsResult<&HashMap<String, NodeId>> {
    match &fs.node(node)?.data {
        NodeData::Directory { children } => Ok(children),
        _ => Err(FsError::NotADirectory),
    }
}

fn children_mut(fs: &mut Fs, node: NodeId) -> FsResult<&mut HashMap<String, NodeId>> {
    match &mut fs.node_mut(node)?.data {
        NodeData::Directory { children } => Ok(children),
        _ => Err(FsError::NotADirectory),
    }
}

fn storage(fs: &Fs, node: NodeId) -> FsResult<&FileStorage> {
    match &fs.node(node)?.data {
        NodeData::File { contents } => Ok(contents),
        _ => Err(FsError::InvalidArgument),
    }
}

fn storage_mut(fs: &mut Fs, node: NodeId) -> FsResult<&mut FileStorage> {
    match &mut fs.node_mut(node)?.data {
        NodeData::File { contents } => Ok(contents),
        _ => Err(FsError::InvalidArgument),
    }
}

fn memfs_getattr(fs: &Fs, node: NodeId) -> FsResult<Attributes> {
    let n = fs.node(node)?;
    let size = match &n.data {
        NodeData::File { contents } => contents.used_bytes(),
        NodeData::Symlink { target } => target.len(),
        NodeData::Directory { .. } => 4096,
        NodeData::Empty => 0,
    } as u64;
    let blksize = 4096u32;
    Ok(Attributes {
        dev: if is_chrdev(n.mode) { n.id.0 } else { 1 },
        ino: n.id.0,
        mode: n.mode,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: n.rdev,
        size,
        atime: n.timestamp,
        mtime: n.timestamp,
        ctime: n.timestamp,
        blksize,
        blocks: size.div_ceil(u64::from(blksize)),
    })
}

fn memfs_setattr(fs: &mut Fs, node: NodeId, attr: &SetAttr) -> FsResult<()> {
    if let Some(mode) = attr.mode {
        fs.node_mut(node)?.mode = mode;
    }
    if let Some(timestamp) = attr.timestamp {
        fs.node_mut(node)?.timestamp = timestamp;
    }
    if let Some(size) = attr.size {
        if let Ok(contents) = storage_mut(fs, node) {
            contents.resize(size as usize);
        }
    }
    Ok(())
}

/// Seek target for memfs streams. `SEEK_END` is relative to the file length
/// for regular files and to 0 for everything else.
fn memfs_llseek(fs: &mut Fs, fd: Fd, offset: i64, whence: i32) -> FsResult<i64> {
    let mut position = offset;
    if whence == SEEK_CUR {
        position += fs.stream_position(fd)? as i64;
    } else if whence == SEEK_END {
        let node = fs.stream(fd)?.node;
        if let Ok(contents) = storage(fs, node) {
            position += contents.used_bytes() as i64;
        }
    }
    if position < 0 {
        return Err(FsError::InvalidArgument);
    }
    Ok(position)
}

pub(crate) struct DirNodeOps;

impl NodeOps for DirNodeOps {
    fn getattr(&self, fs: &Fs, node: NodeId) -> FsResult<Attributes> {
        memfs_getattr(fs, node)
    }

    fn setattr(&self, fs: &mut Fs, node: NodeId, attr: &SetAttr) -> FsResult<()> {
        memfs_setattr(fs, node, attr)
    }

    // The name table is authoritative; a miss means the entry is gone.
    fn lookup(&self, _fs: &mut Fs, _parent: NodeId, _name: &str) -> FsResult<NodeId> {
        Err(FsError::NotFound)
    }

    fn mknod(
        &self,
        fs: &mut Fs,
        parent: NodeId,
        name: &str,
        mode: u32,
        rdev: u64,
    ) -> FsResult<NodeId> {
        create_memfs_node(fs, Some(parent), None, name, mode, rdev)
    }

    fn rename(&self, fs: &mut Fs, node: NodeId, new_dir: NodeId, new_name: &str) -> FsResult<()> {
        // An existing destination may only be replaced if it is empty.
        if let Ok(existing) = fs.lookup_node(new_dir, new_name) {
            if is_dir(fs.node(node)?.mode) && !children(fs, existing)?.is_empty() {
                return Err(FsError::NotEmpty);
            }
            children_mut(fs, new_dir)?.remove(new_name);
            fs.destroy_node(existing);
        }
        let old_parent = fs.node(node)?.parent;
        let old_name = fs.node(node)?.name.clone();
        children_mut(fs, old_parent)?.remove(&old_name);
        children_mut(fs, new_dir)?.insert(new_name.to_string(), node);
        fs.node_mut(node)?.name = new_name.to_string();
        let now = now_millis();
        fs.node_mut(old_parent)?.timestamp = now;
        fs.node_mut(new_dir)?.timestamp = now;
        Ok(())
    }

    fn unlink(&self, fs: &mut Fs, parent: NodeId, name: &str) -> FsResult<()> {
        children_mut(fs, parent)?.remove(name);
        fs.node_mut(parent)?.timestamp = now_millis();
        Ok(())
    }

    fn rmdir(&self, fs: &mut Fs, parent: NodeId, name: &str) -> FsResult<()> {
        let node = fs.lookup_node(parent, name)?;
        if !children(fs, node)?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        children_mut(fs, parent)?.remove(name);
        fs.node_mut(parent)?.timestamp = now_millis();
        Ok(())
    }

    fn readdir(&self, fs: &Fs, node: NodeId) -> FsResult<Vec<String>> {
        let mut entries = vec![".".to_string(), "..".to_string()];
        let mut names: Vec<String> = children(fs, node)?.keys().cloned().collect();
        names.sort();
        entries.extend(names);
        Ok(entries)
    }

    fn symlink(&self, fs: &mut Fs, parent: NodeId, name: &str, target: &str) -> FsResult<NodeId> {
        let id = create_memfs_node(fs, Some(parent), None, name, S_IFLNK | 0o777, 0)?;
        if let NodeData::Symlink { target: t } = &mut fs.node_mut(id)?.data {
            *t = target.to_string();
        }
        Ok(id)
    }
}

pub(crate) struct FileNodeOps;

impl NodeOps for FileNodeOps {
    fn getattr(&self, fs: &Fs, node: NodeId) -> FsResult<Attributes> {
        memfs_getattr(fs, node)
    }

    fn setattr(&self, fs: &mut Fs, node: NodeId, attr: &SetAttr) -> FsResult<()> {
        memfs_setattr(fs, node, attr)
    }
}

pub(crate) struct LinkNodeOps;

impl NodeOps for LinkNodeOps {
    fn getattr(&self, fs: &Fs, node: NodeId) -> FsResult<Attributes> {
        memfs_getattr(fs, node)
    }

    fn setattr(&self, fs: &mut Fs, node: NodeId, attr: &SetAttr) -> FsResult<()> {
        memfs_setattr(fs, node, attr)
    }

    fn readlink(&self, fs: &Fs, node: NodeId) -> FsResult<String> {
        match &fs.node(node)?.data {
            NodeData::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

pub(crate) struct ChardevNodeOps;

impl NodeOps for ChardevNodeOps {
    fn getattr(&self, fs: &Fs, node: NodeId) -> FsResult<Attributes> {
        memfs_getattr(fs, node)
    }

    fn setattr(&self, fs: &mut Fs, node: NodeId, attr: &SetAttr) -> FsResult<()> {
        memfs_setattr(fs, node, attr)
    }
}

pub(crate) struct FileStreamOps;

impl StreamOps for FileStreamOps {
    fn llseek(&self, fs: &mut Fs, fd: Fd, offset: i64, whence: i32) -> FsResult<i64> {
        memfs_llseek(fs, fd, offset, whence)
    }

    fn read(&self, fs: &mut Fs, fd: Fd, buf: &mut [u8], position: u64) -> FsResult<usize> {
        let node = fs.stream(fd)?.node;
        Ok(storage(fs, node)?.read(position as usize, buf))
    }

    fn write(
        &self,
        fs: &mut Fs,
        fd: Fd,
        data: &[u8],
        position: u64,
        can_own: bool,
    ) -> FsResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let node = fs.stream(fd)?.node;
        fs.node_mut(node)?.timestamp = now_millis();
        Ok(storage_mut(fs, node)?.write(position as usize, data, can_own))
    }

    fn allocate(&self, fs: &mut Fs, fd: Fd, offset: u64, length: u64) -> FsResult<()> {
        let node = fs.stream(fd)?.node;
        let contents = storage_mut(fs, node)?;
        contents.expand((offset + length) as usize);
        contents.set_used_bytes(contents.used_bytes().max((offset + length) as usize));
        Ok(())
    }

    fn mmap(
        &self,
        fs: &mut Fs,
        fd: Fd,
        length: usize,
        position: u64,
        _prot: u32,
        _flags: u32,
    ) -> FsResult<MappedRegion> {
        let node = fs.stream(fd)?.node;
        // Mappings always copy; bytes past EOF read as zero.
        let mut data = vec![0u8; length];
        storage(fs, node)?.read(position as usize, &mut data);
        Ok(MappedRegion {
            data,
            allocated: true,
        })
    }

    fn msync(&self, fs: &mut Fs, fd: Fd, data: &[u8], position: u64, _flags: u32) -> FsResult<()> {
        self.write(fs, fd, data, position, false)?;
        Ok(())
    }
}

pub(crate) struct DirStreamOps;

impl StreamOps for DirStreamOps {
    fn llseek(&self, fs: &mut Fs, fd: Fd, offset: i64, whence: i32) -> FsResult<i64> {
        memfs_llseek(fs, fd, offset, whence)
    }
}

/// Stream ops for nodes that cannot be used through a stream (symlinks).
pub(crate) struct NoStreamOps;

impl StreamOps for NoStreamOps {}
