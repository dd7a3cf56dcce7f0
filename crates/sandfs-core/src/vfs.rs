// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The virtual filesystem core.
//!
//! [`Fs`] owns every piece of state: the node arena, the mount table, the
//! (parent, name) hash table that accelerates child lookup, the open-stream
//! table and the shared stream states behind dup'd descriptors. Backing
//! stores plug in through [`FsType`], per-node behavior through [`NodeOps`]
//! and [`StreamOps`].
//!
//! All operations are synchronous and take `&mut self`; there is no global
//! instance. Paths are virtual and never touch the host filesystem.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::path;
use crate::perms::{is_chrdev, is_dir, is_link};
use crate::types::*;

/// Milliseconds since the Unix epoch, the timestamp unit nodes carry.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Per-node operation table. Backing stores implement the hooks their node
/// kinds support; the defaults return the errno a missing hook maps to.
pub trait NodeOps {
    fn getattr(&self, _fs: &Fs, _node: NodeId) -> FsResult<Attributes> {
        Err(FsError::NotPermitted)
    }
    fn setattr(&self, _fs: &mut Fs, _node: NodeId, _attr: &SetAttr) -> FsResult<()> {
        Err(FsError::NotPermitted)
    }
    fn lookup(&self, _fs: &mut Fs, _parent: NodeId, _name: &str) -> FsResult<NodeId> {
        Err(FsError::AccessDenied)
    }
    fn mknod(
        &self,
        _fs: &mut Fs,
        _parent: NodeId,
        _name: &str,
        _mode: u32,
        _rdev: u64,
    ) -> FsResult<NodeId> {
        Err(FsError::NotPermitted)
    }
    fn rename(&self, _fs: &mut Fs, _node: NodeId, _new_dir: NodeId, _new_name: &str) -> FsResult<()> {
        Err(FsError::NotPermitted)
    }
    fn unlink(&self, _fs: &mut Fs, _parent: NodeId, _name: &str) -> FsResult<()> {
        Err(FsError::NotPermitted)
    }
    fn rmdir(&self, _fs: &mut Fs, _parent: NodeId, _name: &str) -> FsResult<()> {
        Err(FsError::NotPermitted)
    }
    fn readdir(&self, _fs: &Fs, _node: NodeId) -> FsResult<Vec<String>> {
        Err(FsError::NotADirectory)
    }
    fn symlink(&self, _fs: &mut Fs, _parent: NodeId, _name: &str, _target: &str) -> FsResult<NodeId> {
        Err(FsError::NotPermitted)
    }
    fn readlink(&self, _fs: &Fs, _node: NodeId) -> FsResult<String> {
        Err(FsError::InvalidArgument)
    }
}

/// Per-stream operation table, attached to a stream when it is opened.
/// Character devices swap their own table in during `open`.
pub trait StreamOps {
    fn open(&self, _fs: &mut Fs, _fd: Fd) -> FsResult<()> {
        Ok(())
    }
    fn close(&self, _fs: &mut Fs, _fd: Fd) -> FsResult<()> {
        Ok(())
    }
    fn llseek(&self, _fs: &mut Fs, _fd: Fd, _offset: i64, _whence: i32) -> FsResult<i64> {
        Err(FsError::IllegalSeek)
    }
    fn read(&self, _fs: &mut Fs, _fd: Fd, _buf: &mut [u8], _position: u64) -> FsResult<usize> {
        Err(FsError::InvalidArgument)
    }
    fn write(
        &self,
        _fs: &mut Fs,
        _fd: Fd,
        _data: &[u8],
        _position: u64,
        _can_own: bool,
    ) -> FsResult<usize> {
        Err(FsError::InvalidArgument)
    }
    fn allocate(&self, _fs: &mut Fs, _fd: Fd, _offset: u64, _length: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    fn mmap(
        &self,
        _fs: &mut Fs,
        _fd: Fd,
        _length: usize,
        _position: u64,
        _prot: u32,
        _flags: u32,
    ) -> FsResult<MappedRegion> {
        Err(FsError::NoDevice)
    }
    fn msync(&self, _fs: &mut Fs, _fd: Fd, _data: &[u8], _position: u64, _flags: u32) -> FsResult<()> {
        Ok(())
    }
    fn ioctl(&self, _fs: &mut Fs, _fd: Fd, _op: u32) -> FsResult<i32> {
        Err(FsError::NotATerminal)
    }
    fn dup(&self, _fs: &mut Fs, _fd: Fd) -> FsResult<()> {
        Ok(())
    }
}

/// Completion callback for [`FsType::syncfs`].
pub type SyncDone = Box<dyn FnOnce(FsResult<()>)>;

/// A mountable backing store.
pub trait FsType {
    fn name(&self) -> &'static str;

    /// Build the root node of a new mount and return it.
    fn mount(&self, fs: &mut Fs, mount: MountId) -> FsResult<NodeId>;

    /// Flush (or, with `populate`, load) persistent state. Completion is
    /// reported through `done`; stores with nothing to sync complete
    /// immediately.
    fn syncfs(&self, _fs: &mut Fs, _mount: MountId, _populate: bool, done: SyncDone) {
        done(Ok(()));
    }
}

/// Mount options, free-form key/value pairs interpreted by the backing store.
pub type MountOpts = HashMap<String, String>;

/// Type-specific payload of a node.
pub enum NodeData {
    Directory { children: HashMap<String, NodeId> },
    File { contents: crate::storage::FileStorage },
    Symlink { target: String },
    /// Nodes without payload (character devices, pseudo entries).
    Empty,
}

/// A node in the tree. The root of a mount is its own parent.
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub mode: u32,
    pub rdev: u64,
    /// Single mtime/atime/ctime timestamp, in milliseconds.
    pub timestamp: i64,
    pub parent: NodeId,
    pub mount: MountId,
    /// Set when another filesystem is grafted onto this directory.
    pub mounted: Option<MountId>,
    pub node_ops: Arc<dyn NodeOps>,
    pub stream_ops: Arc<dyn StreamOps>,
    pub data: NodeData,
}

/// A mounted filesystem instance.
pub struct Mount {
    pub id: MountId,
    pub fstype: Arc<dyn FsType>,
    pub opts: MountOpts,
    pub mountpoint: String,
    /// Mounts grafted onto directories inside this one.
    pub mounts: Vec<MountId>,
    pub root: NodeId,
}

/// Flags and position shared between a descriptor and its dups.
pub(crate) struct StreamState {
    pub flags: u32,
    pub position: u64,
    pub refs: u32,
}

/// An open stream, indexed by file descriptor.
pub struct Stream {
    pub node: NodeId,
    /// The node's path when the stream was opened.
    pub path: String,
    pub state: StreamStateId,
    pub seekable: bool,
    pub ungotten: Vec<u8>,
    pub ops: Arc<dyn StreamOps>,
}

/// Options for [`Fs::lookup_path`].
pub struct LookupOpts {
    /// Stop at the parent of the last component.
    pub parent: bool,
    /// Follow a symlink in the last component.
    pub follow: bool,
    /// Descend into a mount grafted on the last component.
    pub follow_mount: bool,
    /// Depth of symlink-triggered re-resolution, bounded at 8.
    pub recurse_count: u32,
}

impl Default for LookupOpts {
    fn default() -> Self {
        Self {
            parent: false,
            follow: false,
            follow_mount: true,
            recurse_count: 0,
        }
    }
}

/// Result of a path lookup: the resolved path and the node it landed on.
pub struct Lookup {
    pub path: String,
    pub node: Option<NodeId>,
}

/// The filesystem instance.
pub struct Fs {
    pub(crate) config: FsConfig,
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) mounts: HashMap<MountId, Mount>,
    pub(crate) root: Option<NodeId>,
    pub(crate) root_mount: Option<MountId>,
    /// Registered character devices, keyed by packed device number.
    pub(crate) devices: HashMap<u64, Arc<dyn StreamOps>>,
    pub(crate) streams: Vec<Option<Stream>>,
    pub(crate) stream_states: HashMap<StreamStateId, StreamState>,
    /// Buckets of node ids hashed by (parent id, name).
    name_table: Vec<Vec<NodeId>>,
    next_inode: u64,
    next_mount_id: u64,
    next_state_id: u64,
    pub(crate) next_device_major: u32,
    current_path: String,
    /// Bypass permission checks. On while the default tree is built.
    pub(crate) ignore_permissions: bool,
    /// Paths opened with read intent, when tracking is enabled.
    read_files: BTreeSet<String>,
    /// Number of syncfs operations currently in flight.
    syncfs_requests: Rc<Cell<u32>>,
}

impl Fs {
    /// Build an instance with a memfs root, the default directory tree and
    /// the default device nodes. Standard streams are not opened; call
    /// [`Fs::init_standard_streams`] for that.
    pub fn new(config: FsConfig) -> FsResult<Self> {
        let name_table_size = config.limits.name_table_size.max(1);
        let mut fs = Self {
            config,
            nodes: HashMap::new(),
            mounts: HashMap::new(),
            root: None,
            root_mount: None,
            devices: HashMap::new(),
            streams: Vec::new(),
            stream_states: HashMap::new(),
            name_table: vec![Vec::new(); name_table_size],
            next_inode: 1,
            next_mount_id: 1,
            next_state_id: 1,
            next_device_major: 64,
            current_path: "/".to_string(),
            ignore_permissions: true,
            read_files: BTreeSet::new(),
            syncfs_requests: Rc::new(Cell::new(0)),
        };
        fs.mount(Arc::new(crate::memfs::MemFs), MountOpts::new(), "/")?;
        fs.create_default_directories()?;
        fs.create_default_devices()?;
        fs.create_special_directories()?;
        tracing::debug!("filesystem bootstrapped");
        Ok(fs)
    }

    fn create_default_directories(&mut self) -> FsResult<()> {
        self.mkdir("/tmp", 0o777)?;
        self.mkdir("/home", 0o777)?;
        Ok(())
    }

    // ---- arena accessors ----

    pub fn node(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    pub fn node_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    pub(crate) fn mount_ref(&self, id: MountId) -> FsResult<&Mount> {
        self.mounts.get(&id).ok_or(FsError::InvalidArgument)
    }

    pub fn stream(&self, fd: Fd) -> FsResult<&Stream> {
        self.streams
            .get(fd)
            .and_then(|s| s.as_ref())
            .ok_or(FsError::BadFileDescriptor)
    }

    pub fn stream_mut(&mut self, fd: Fd) -> FsResult<&mut Stream> {
        self.streams
            .get_mut(fd)
            .and_then(|s| s.as_mut())
            .ok_or(FsError::BadFileDescriptor)
    }

    fn stream_state(&self, fd: Fd) -> FsResult<&StreamState> {
        let id = self.stream(fd)?.state;
        self.stream_states.get(&id).ok_or(FsError::BadFileDescriptor)
    }

    fn stream_state_mut(&mut self, fd: Fd) -> FsResult<&mut StreamState> {
        let id = self.stream(fd)?.state;
        self.stream_states
            .get_mut(&id)
            .ok_or(FsError::BadFileDescriptor)
    }

    /// Open flags of a descriptor (shared with its dups).
    pub fn stream_flags(&self, fd: Fd) -> FsResult<u32> {
        Ok(self.stream_state(fd)?.flags)
    }

    /// Current position of a descriptor (shared with its dups).
    pub fn stream_position(&self, fd: Fd) -> FsResult<u64> {
        Ok(self.stream_state(fd)?.position)
    }

    pub fn root(&self) -> FsResult<NodeId> {
        self.root.ok_or(FsError::NotFound)
    }

    /// Whether a node is the root of its mount.
    pub fn is_root(&self, node: NodeId) -> FsResult<bool> {
        Ok(self.node(node)?.parent == node)
    }

    /// Whether another filesystem is grafted onto this node.
    pub fn is_mountpoint(&self, node: NodeId) -> FsResult<bool> {
        Ok(self.node(node)?.mounted.is_some())
    }

    // ---- name table ----

    fn hash_name(&self, parent: NodeId, name: &str) -> usize {
        let mut hash: u32 = 0;
        for byte in name.bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(u32::from(byte));
        }
        ((parent.0 as u32).wrapping_add(hash) as usize) % self.name_table.len()
    }

    pub(crate) fn hash_add_node(&mut self, id: NodeId) {
        let (parent, name) = match self.nodes.get(&id) {
            Some(node) => (node.parent, node.name.clone()),
            None => return,
        };
        let bucket = self.hash_name(parent, &name);
        self.name_table[bucket].push(id);
    }

    pub(crate) fn hash_remove_node(&mut self, id: NodeId) {
        let (parent, name) = match self.nodes.get(&id) {
            Some(node) => (node.parent, node.name.clone()),
            None => return,
        };
        let bucket = self.hash_name(parent, &name);
        self.name_table[bucket].retain(|n| *n != id);
    }

    fn hash_lookup(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let bucket = self.hash_name(parent, name);
        self.name_table[bucket].iter().copied().find(|id| {
            self.nodes
                .get(id)
                .is_some_and(|node| node.parent == parent && node.name == name)
        })
    }

    // ---- node lifecycle ----

    /// Allocate a node, wire it under `parent` (or self-parented as a mount
    /// root) and enter it into the name table.
    pub fn create_node(
        &mut self,
        parent: Option<NodeId>,
        mount: Option<MountId>,
        name: &str,
        mode: u32,
        rdev: u64,
        node_ops: Arc<dyn NodeOps>,
        stream_ops: Arc<dyn StreamOps>,
        data: NodeData,
    ) -> FsResult<NodeId> {
        let id = NodeId(self.next_inode);
        self.next_inode += 1;
        let mount = match parent {
            Some(p) => self.node(p)?.mount,
            None => mount.ok_or(FsError::InvalidArgument)?,
        };
        let node = Node {
            id,
            name: name.to_string(),
            mode,
            rdev,
            timestamp: now_millis(),
            parent: parent.unwrap_or(id),
            mount,
            mounted: None,
            node_ops,
            stream_ops,
            data,
        };
        self.nodes.insert(id, node);
        self.hash_add_node(id);
        Ok(id)
    }

    /// Allocate a node outside the name table. Used for entries fabricated
    /// on every lookup, like `/proc/self/fd` descriptors.
    pub(crate) fn alloc_transient_node(
        &mut self,
        mount: MountId,
        name: &str,
        mode: u32,
        node_ops: Arc<dyn NodeOps>,
        stream_ops: Arc<dyn StreamOps>,
        data: NodeData,
    ) -> NodeId {
        let id = NodeId(self.next_inode);
        self.next_inode += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                mode,
                rdev: 0,
                timestamp: now_millis(),
                parent: id,
                mount,
                mounted: None,
                node_ops,
                stream_ops,
                data,
            },
        );
        id
    }

    /// Remove a node from the name table and the arena.
    pub fn destroy_node(&mut self, id: NodeId) {
        self.hash_remove_node(id);
        self.nodes.remove(&id);
    }

    /// Find `name` under `parent`: name-table hit first, then the backing
    /// store's lookup hook.
    pub fn lookup_node(&mut self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.may_lookup(parent)?;
        if let Some(id) = self.hash_lookup(parent, name) {
            return Ok(id);
        }
        let ops = self.node(parent)?.node_ops.clone();
        ops.lookup(self, parent, name)
    }

    // ---- path resolution ----

    /// Walk `path` from the root, crossing mountpoints and following
    /// symlinks as requested. Resolution recursing more than 8 deep or
    /// following more than 40 symlink hops in one component fails with
    /// [`FsError::FilesystemLoop`].
    pub fn lookup_path(&mut self, path: &str, opts: LookupOpts) -> FsResult<Lookup> {
        let abs = path::resolve(&self.current_path, path);
        if abs.is_empty() {
            return Ok(Lookup {
                path: String::new(),
                node: None,
            });
        }
        if opts.recurse_count > 8 {
            return Err(FsError::FilesystemLoop);
        }
        let parts: Vec<String> = abs
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let mut current = self.root()?;
        let mut current_path = "/".to_string();
        for (i, part) in parts.iter().enumerate() {
            let islast = i == parts.len() - 1;
            if islast && opts.parent {
                break;
            }
            current = self.lookup_node(current, part)?;
            current_path = path::join(&current_path, part);
            if let Some(mounted) = self.node(current)?.mounted {
                if !islast || opts.follow_mount {
                    current = self.mount_ref(mounted)?.root;
                }
            }
            if !islast || opts.follow {
                let mut count = 0u32;
                while is_link(self.node(current)?.mode) {
                    let ops = self.node(current)?.node_ops.clone();
                    let target = ops.readlink(self, current)?;
                    let resolved = path::resolve(&path::dirname(&current_path), &target);
                    let lookup = self.lookup_path(
                        &resolved,
                        LookupOpts {
                            recurse_count: opts.recurse_count + 1,
                            ..Default::default()
                        },
                    )?;
                    current = lookup.node.ok_or(FsError::NotFound)?;
                    current_path = lookup.path;
                    count += 1;
                    if count > 40 {
                        return Err(FsError::FilesystemLoop);
                    }
                }
            }
        }
        Ok(Lookup {
            path: current_path,
            node: Some(current),
        })
    }

    /// Absolute path of a node, built by walking parents up to the mount
    /// root and prepending the mountpoint.
    pub fn get_path(&self, node: NodeId) -> FsResult<String> {
        let mut current = node;
        let mut rel = String::new();
        loop {
            if self.is_root(current)? {
                let mountpoint = &self.mount_ref(self.node(current)?.mount)?.mountpoint;
                return Ok(if rel.is_empty() {
                    mountpoint.clone()
                } else if mountpoint.ends_with('/') {
                    format!("{}{}", &mountpoint[..mountpoint.len() - 1], rel)
                } else {
                    format!("{mountpoint}/{rel}")
                });
            }
            let n = self.node(current)?;
            rel = format!("/{}{}", n.name, rel);
            current = n.parent;
        }
    }

    // ---- mount management ----

    /// Mount a backing store. `"/"` installs the root filesystem, a normal
    /// path grafts onto an existing directory, and the empty string creates
    /// a pseudo mount attached nowhere.
    pub fn mount(
        &mut self,
        fstype: Arc<dyn FsType>,
        opts: MountOpts,
        mountpoint: &str,
    ) -> FsResult<NodeId> {
        let is_root = mountpoint == "/";
        let pseudo = mountpoint.is_empty();
        let mut graft_node = None;
        let mut mountpoint = mountpoint.to_string();
        if is_root && self.root.is_some() {
            return Err(FsError::Busy);
        } else if !is_root && !pseudo {
            let lookup = self.lookup_path(
                &mountpoint,
                LookupOpts {
                    follow_mount: false,
                    ..Default::default()
                },
            )?;
            mountpoint = lookup.path;
            let node = lookup.node.ok_or(FsError::NotFound)?;
            if self.is_mountpoint(node)? {
                return Err(FsError::Busy);
            }
            if !is_dir(self.node(node)?.mode) {
                return Err(FsError::NotADirectory);
            }
            graft_node = Some(node);
        }

        let id = MountId(self.next_mount_id);
        self.next_mount_id += 1;
        self.mounts.insert(
            id,
            Mount {
                id,
                fstype: fstype.clone(),
                opts,
                mountpoint: mountpoint.clone(),
                mounts: Vec::new(),
                root: NodeId(0),
            },
        );
        let mount_root = match fstype.mount(self, id) {
            Ok(root) => root,
            Err(e) => {
                self.mounts.remove(&id);
                return Err(e);
            }
        };
        if let Some(mount) = self.mounts.get_mut(&id) {
            mount.root = mount_root;
        }
        self.node_mut(mount_root)?.mount = id;

        if is_root {
            self.root = Some(mount_root);
            self.root_mount = Some(id);
        } else if let Some(node) = graft_node {
            self.node_mut(node)?.mounted = Some(id);
            let parent_mount = self.node(node)?.mount;
            if let Some(parent) = self.mounts.get_mut(&parent_mount) {
                parent.mounts.push(id);
            }
        }
        tracing::debug!(fstype = fstype.name(), mountpoint = %mountpoint, "mounted filesystem");
        Ok(mount_root)
    }

    /// Detach the mount grafted at `mountpoint` and evict its nodes.
    pub fn unmount(&mut self, mountpoint: &str) -> FsResult<()> {
        let lookup = self.lookup_path(
            mountpoint,
            LookupOpts {
                follow_mount: false,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        let mount = self.node(node)?.mounted.ok_or(FsError::InvalidArgument)?;
        let detached: BTreeSet<MountId> = self.get_mounts(mount).into_iter().collect();

        let evicted: Vec<NodeId> = self
            .name_table
            .iter()
            .flatten()
            .copied()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| detached.contains(&n.mount))
            })
            .collect();
        for id in evicted {
            self.destroy_node(id);
        }

        self.node_mut(node)?.mounted = None;
        let parent_mount = self.node(node)?.mount;
        if let Some(parent) = self.mounts.get_mut(&parent_mount) {
            parent.mounts.retain(|m| *m != mount);
        }
        for id in &detached {
            self.mounts.remove(id);
        }
        tracing::debug!(mountpoint = %lookup.path, "unmounted filesystem");
        Ok(())
    }

    /// All mounts in the subtree rooted at `mount`, the root first.
    pub fn get_mounts(&self, mount: MountId) -> Vec<MountId> {
        let mut mounts = Vec::new();
        let mut check = vec![mount];
        while let Some(m) = check.pop() {
            mounts.push(m);
            if let Some(entry) = self.mounts.get(&m) {
                check.extend(entry.mounts.iter().copied());
            }
        }
        mounts
    }

    /// Sync every mount, fanning out to each backing store and invoking
    /// `callback` once: with the first error, or with `Ok` after all mounts
    /// complete.
    pub fn syncfs(&mut self, populate: bool, callback: impl FnOnce(FsResult<()>) + 'static) {
        let requests = self.syncfs_requests.clone();
        requests.set(requests.get() + 1);
        if requests.get() > 1 {
            tracing::warn!(
                in_flight = requests.get(),
                "multiple syncfs operations in flight at once, probably just doing extra work"
            );
        }

        let mounts = match self.root_mount {
            Some(root) => self.get_mounts(root),
            None => Vec::new(),
        };

        struct SyncProgress {
            completed: usize,
            total: usize,
            callback: Option<Box<dyn FnOnce(FsResult<()>)>>,
            requests: Rc<Cell<u32>>,
        }
        let progress = Rc::new(RefCell::new(SyncProgress {
            completed: 0,
            total: mounts.len(),
            callback: Some(Box::new(callback)),
            requests,
        }));

        let finish = |progress: &Rc<RefCell<SyncProgress>>, result: FsResult<()>| {
            let callback = {
                let mut p = progress.borrow_mut();
                // The first error short-circuits; later completions are ignored.
                if p.callback.is_none() {
                    return;
                }
                match result {
                    Err(_) => {
                        p.requests.set(p.requests.get().saturating_sub(1));
                        p.callback.take()
                    }
                    Ok(()) => {
                        p.completed += 1;
                        if p.completed >= p.total {
                            p.requests.set(p.requests.get().saturating_sub(1));
                            p.callback.take()
                        } else {
                            None
                        }
                    }
                }
            };
            if let Some(cb) = callback {
                cb(result);
            }
        };

        if mounts.is_empty() {
            progress.borrow_mut().total = 1;
            finish(&progress, Ok(()));
            return;
        }
        for mount in mounts {
            let fstype = match self.mounts.get(&mount) {
                Some(entry) => entry.fstype.clone(),
                None => continue,
            };
            let shared = progress.clone();
            let done: SyncDone = Box::new(move |result| finish(&shared, result));
            fstype.syncfs(self, mount, populate, done);
        }
    }

    // ---- node actions ----

    /// Create a node of arbitrary type under the parent of `path`.
    pub fn mknod(&mut self, path: &str, mode: u32, dev: u64) -> FsResult<NodeId> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                parent: true,
                ..Default::default()
            },
        )?;
        let parent = lookup.node.ok_or(FsError::NotFound)?;
        let name = path::basename(path);
        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::InvalidArgument);
        }
        self.may_create(parent, &name)?;
        let ops = self.node(parent)?.node_ops.clone();
        ops.mknod(self, parent, &name, mode, dev)
    }

    /// Create a regular file.
    pub fn create(&mut self, path: &str, mode: u32) -> FsResult<NodeId> {
        let mode = (mode & MODE_BITS) | S_IFREG;
        self.mknod(path, mode, 0)
    }

    /// Create a directory.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> FsResult<NodeId> {
        let mode = (mode & (PERM_BITS | 0o1000)) | S_IFDIR;
        self.mknod(path, mode, 0)
    }

    /// Create every missing directory along `path`, which is taken as
    /// absolute.
    pub fn mkdir_tree(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let mut dir = String::new();
        for part in path.split('/') {
            if part.is_empty() {
                continue;
            }
            dir.push('/');
            dir.push_str(part);
            match self.mkdir(&dir, mode) {
                Ok(_) | Err(FsError::AlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Create a character device node.
    pub fn mkdev(&mut self, path: &str, mode: u32, dev: u64) -> FsResult<NodeId> {
        self.mknod(path, mode | S_IFCHR, dev)
    }

    /// Create a symlink at `newpath` pointing to `oldpath`.
    pub fn symlink(&mut self, oldpath: &str, newpath: &str) -> FsResult<NodeId> {
        if path::resolve(self.cwd(), oldpath).is_empty() {
            return Err(FsError::NotFound);
        }
        let lookup = self.lookup_path(
            newpath,
            LookupOpts {
                parent: true,
                ..Default::default()
            },
        )?;
        let parent = lookup.node.ok_or(FsError::NotPermitted)?;
        let name = path::basename(newpath);
        if name.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        self.may_create(parent, &name)?;
        let ops = self.node(parent)?.node_ops.clone();
        ops.symlink(self, parent, &name, oldpath)
    }

    /// Rename within one mount. The name-table entry is removed before the
    /// backing store runs and re-added afterwards whether or not it
    /// succeeded, so the node is never left unreachable.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> FsResult<()> {
        let old_dirname = path::dirname(old_path);
        let new_dirname = path::dirname(new_path);
        let old_name = path::basename(old_path);
        let new_name = path::basename(new_path);
        let old_dir = self
            .lookup_path(
                old_path,
                LookupOpts {
                    parent: true,
                    ..Default::default()
                },
            )?
            .node
            .ok_or(FsError::NotFound)?;
        let new_dir = self
            .lookup_path(
                new_path,
                LookupOpts {
                    parent: true,
                    ..Default::default()
                },
            )?
            .node
            .ok_or(FsError::NotFound)?;
        if self.node(old_dir)?.mount != self.node(new_dir)?.mount {
            return Err(FsError::CrossesDevices);
        }
        let old_node = self.lookup_node(old_dir, &old_name)?;

        // A directory cannot be moved into its own subtree, and a path
        // cannot be renamed onto one of its ancestors.
        let cwd = self.cwd().to_string();
        let relative = path::relative(
            &path::resolve(&cwd, old_path),
            &path::resolve(&cwd, &new_dirname),
        );
        if !relative.starts_with('.') {
            return Err(FsError::InvalidArgument);
        }
        let relative = path::relative(
            &path::resolve(&cwd, new_path),
            &path::resolve(&cwd, &old_dirname),
        );
        if !relative.starts_with('.') {
            return Err(FsError::NotEmpty);
        }

        let new_node = self.lookup_node(new_dir, &new_name).ok();
        if new_node == Some(old_node) {
            return Ok(());
        }
        let isdir = is_dir(self.node(old_node)?.mode);
        self.may_delete(old_dir, &old_name, isdir)?;
        match new_node {
            Some(_) => self.may_delete(new_dir, &new_name, isdir)?,
            None => self.may_create(new_dir, &new_name)?,
        }
        if self.is_mountpoint(old_node)?
            || new_node.map_or(Ok(false), |n| self.is_mountpoint(n))?
        {
            return Err(FsError::Busy);
        }
        // Moving between directories also needs write access to the source.
        if new_dir != old_dir {
            self.node_permissions(old_dir, "w")?;
        }

        self.hash_remove_node(old_node);
        let ops = self.node(old_dir)?.node_ops.clone();
        let result = ops.rename(self, old_node, new_dir, &new_name);
        if result.is_ok() {
            if let Ok(node) = self.node_mut(old_node) {
                node.parent = new_dir;
            }
        }
        self.hash_add_node(old_node);
        result
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let parent = self
            .lookup_path(
                path,
                LookupOpts {
                    parent: true,
                    ..Default::default()
                },
            )?
            .node
            .ok_or(FsError::NotFound)?;
        let name = path::basename(path);
        let node = self.lookup_node(parent, &name)?;
        self.may_delete(parent, &name, true)?;
        if self.is_mountpoint(node)? {
            return Err(FsError::Busy);
        }
        let ops = self.node(parent)?.node_ops.clone();
        ops.rmdir(self, parent, &name)?;
        self.destroy_node(node);
        Ok(())
    }

    /// Remove a non-directory entry.
    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let parent = self
            .lookup_path(
                path,
                LookupOpts {
                    parent: true,
                    ..Default::default()
                },
            )?
            .node
            .ok_or(FsError::NotFound)?;
        let name = path::basename(path);
        let node = self.lookup_node(parent, &name)?;
        self.may_delete(parent, &name, false)?;
        if self.is_mountpoint(node)? {
            return Err(FsError::Busy);
        }
        let ops = self.node(parent)?.node_ops.clone();
        ops.unlink(self, parent, &name)?;
        self.destroy_node(node);
        Ok(())
    }

    /// List a directory, including `.` and `..`.
    pub fn readdir(&mut self, path: &str) -> FsResult<Vec<String>> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        let ops = self.node(node)?.node_ops.clone();
        ops.readdir(self, node)
    }

    /// Read a symlink's target, resolved against its parent directory.
    pub fn readlink(&mut self, path: &str) -> FsResult<String> {
        let lookup = self.lookup_path(path, LookupOpts::default())?;
        let link = lookup.node.ok_or(FsError::NotFound)?;
        let ops = self.node(link)?.node_ops.clone();
        let target = ops.readlink(self, link)?;
        let parent = self.node(link)?.parent;
        let parent_path = self.get_path(parent)?;
        Ok(path::resolve(&parent_path, &target))
    }

    fn stat_node(&mut self, node: NodeId) -> FsResult<Attributes> {
        let ops = self.node(node)?.node_ops.clone();
        ops.getattr(self, node)
    }

    /// Attributes of the node at `path`, following symlinks.
    pub fn stat(&mut self, path: &str) -> FsResult<Attributes> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.stat_node(node)
    }

    /// Attributes of the node at `path`, not following a final symlink.
    pub fn lstat(&mut self, path: &str) -> FsResult<Attributes> {
        let lookup = self.lookup_path(path, LookupOpts::default())?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.stat_node(node)
    }

    /// Attributes of an open descriptor's node.
    pub fn fstat(&mut self, fd: Fd) -> FsResult<Attributes> {
        let node = self.stream(fd)?.node;
        self.stat_node(node)
    }

    pub(crate) fn do_chmod(&mut self, node: NodeId, mode: u32) -> FsResult<()> {
        let current = self.node(node)?.mode;
        let ops = self.node(node)?.node_ops.clone();
        ops.setattr(
            self,
            node,
            &SetAttr {
                mode: Some((mode & MODE_BITS) | (current & !MODE_BITS)),
                timestamp: Some(now_millis()),
                ..Default::default()
            },
        )
    }

    /// Change permission bits, following symlinks.
    pub fn chmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.do_chmod(node, mode)
    }

    /// Change permission bits without following a final symlink.
    pub fn lchmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let lookup = self.lookup_path(path, LookupOpts::default())?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.do_chmod(node, mode)
    }

    /// Change permission bits of an open descriptor's node.
    pub fn fchmod(&mut self, fd: Fd, mode: u32) -> FsResult<()> {
        let node = self.stream(fd)?.node;
        self.do_chmod(node, mode)
    }

    fn do_chown(&mut self, node: NodeId) -> FsResult<()> {
        // Ownership is not tracked; only the ctime moves.
        let ops = self.node(node)?.node_ops.clone();
        ops.setattr(
            self,
            node,
            &SetAttr {
                timestamp: Some(now_millis()),
                ..Default::default()
            },
        )
    }

    pub fn chown(&mut self, path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.do_chown(node)
    }

    pub fn lchown(&mut self, path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        let lookup = self.lookup_path(path, LookupOpts::default())?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.do_chown(node)
    }

    pub fn fchown(&mut self, fd: Fd, _uid: u32, _gid: u32) -> FsResult<()> {
        let node = self.stream(fd)?.node;
        self.do_chown(node)
    }

    pub(crate) fn do_truncate(&mut self, node: NodeId, len: i64) -> FsResult<()> {
        if len < 0 {
            return Err(FsError::InvalidArgument);
        }
        let mode = self.node(node)?.mode;
        if is_dir(mode) {
            return Err(FsError::IsADirectory);
        }
        if !crate::perms::is_file(mode) {
            return Err(FsError::InvalidArgument);
        }
        self.node_permissions(node, "w")?;
        let ops = self.node(node)?.node_ops.clone();
        ops.setattr(
            self,
            node,
            &SetAttr {
                size: Some(len as u64),
                timestamp: Some(now_millis()),
                ..Default::default()
            },
        )
    }

    /// Set a file's length, following symlinks.
    pub fn truncate(&mut self, path: &str, len: i64) -> FsResult<()> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        self.do_truncate(node, len)
    }

    /// Set an open file's length. The descriptor must be writable.
    pub fn ftruncate(&mut self, fd: Fd, len: i64) -> FsResult<()> {
        let flags = self.stream_flags(fd)?;
        if flags & O_ACCMODE == O_RDONLY {
            return Err(FsError::InvalidArgument);
        }
        let node = self.stream(fd)?.node;
        self.do_truncate(node, len)
    }

    /// Set a node's timestamp to the later of the two times.
    pub fn utime(&mut self, path: &str, atime: i64, mtime: i64) -> FsResult<()> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        let ops = self.node(node)?.node_ops.clone();
        ops.setattr(
            self,
            node,
            &SetAttr {
                timestamp: Some(atime.max(mtime)),
                ..Default::default()
            },
        )
    }

    /// Open (and possibly create) the node at `path`, returning a new file
    /// descriptor.
    pub fn open(&mut self, path: &str, flags: u32, mode: u32) -> FsResult<Fd> {
        if path.is_empty() {
            return Err(FsError::NotFound);
        }
        let mut flags = flags;
        let mode = if flags & O_CREAT != 0 {
            (mode & MODE_BITS) | S_IFREG
        } else {
            0
        };
        let npath = path::normalize(path);
        let mut node = self
            .lookup_path(
                &npath,
                LookupOpts {
                    follow: flags & O_NOFOLLOW == 0,
                    ..Default::default()
                },
            )
            .ok()
            .and_then(|lookup| lookup.node);
        let mut created = false;
        if flags & O_CREAT != 0 {
            if node.is_some() {
                if flags & O_EXCL != 0 {
                    return Err(FsError::AlreadyExists);
                }
            } else {
                node = Some(self.mknod(&npath, mode, 0)?);
                created = true;
            }
        }
        let node = node.ok_or(FsError::NotFound)?;
        // Character devices ignore truncation.
        if is_chrdev(self.node(node)?.mode) {
            flags &= !O_TRUNC;
        }
        if flags & O_DIRECTORY != 0 && !is_dir(self.node(node)?.mode) {
            return Err(FsError::NotADirectory);
        }
        if !created {
            self.may_open(node, flags)?;
        }
        if flags & O_TRUNC != 0 && !created {
            self.do_truncate(node, 0)?;
        }
        // These only matter while opening.
        flags &= !(O_EXCL | O_TRUNC | O_NOFOLLOW);

        let stream_path = self.get_path(node)?;
        let ops = self.node(node)?.stream_ops.clone();
        let fd = self.create_stream(node, stream_path, flags, true, ops.clone())?;
        if let Err(e) = ops.open(self, fd) {
            self.close_stream(fd);
            return Err(e);
        }
        if self.config.track_read_files && flags & O_ACCMODE != O_WRONLY {
            self.read_files.insert(npath.clone());
            tracing::trace!(path = %npath, "tracked read open");
        }
        Ok(fd)
    }

    /// Paths opened with read intent since creation, if tracking is on.
    pub fn tracked_read_files(&self) -> &BTreeSet<String> {
        &self.read_files
    }

    // ---- stream layer ----

    fn next_fd(&self) -> FsResult<Fd> {
        for (fd, slot) in self.streams.iter().enumerate() {
            if slot.is_none() {
                return Ok(fd);
            }
        }
        if self.streams.len() < self.config.limits.max_open_files {
            Ok(self.streams.len())
        } else {
            Err(FsError::TooManyOpenFiles)
        }
    }

    /// Install a stream at the lowest free descriptor.
    pub(crate) fn create_stream(
        &mut self,
        node: NodeId,
        path: String,
        flags: u32,
        seekable: bool,
        ops: Arc<dyn StreamOps>,
    ) -> FsResult<Fd> {
        let fd = self.next_fd()?;
        let state = StreamStateId(self.next_state_id);
        self.next_state_id += 1;
        self.stream_states.insert(
            state,
            StreamState {
                flags,
                position: 0,
                refs: 1,
            },
        );
        if fd >= self.streams.len() {
            self.streams.resize_with(fd + 1, || None);
        }
        self.streams[fd] = Some(Stream {
            node,
            path,
            state,
            seekable,
            ungotten: Vec::new(),
            ops,
        });
        Ok(fd)
    }

    /// Duplicate a descriptor. The two descriptors share flags and position
    /// until both are closed.
    pub fn dup(&mut self, fd: Fd) -> FsResult<Fd> {
        let (node, path, state, seekable, ops) = {
            let stream = self.stream(fd)?;
            (
                stream.node,
                stream.path.clone(),
                stream.state,
                stream.seekable,
                stream.ops.clone(),
            )
        };
        if let Some(shared) = self.stream_states.get_mut(&state) {
            shared.refs += 1;
        }
        let new_fd = self.next_fd()?;
        if new_fd >= self.streams.len() {
            self.streams.resize_with(new_fd + 1, || None);
        }
        self.streams[new_fd] = Some(Stream {
            node,
            path,
            state,
            seekable,
            ungotten: Vec::new(),
            ops: ops.clone(),
        });
        if let Err(e) = ops.dup(self, new_fd) {
            self.close_stream(new_fd);
            return Err(e);
        }
        Ok(new_fd)
    }

    /// Free a descriptor slot and drop its shared state when the last
    /// reference goes.
    pub(crate) fn close_stream(&mut self, fd: Fd) {
        let stream = match self.streams.get_mut(fd).and_then(Option::take) {
            Some(stream) => stream,
            None => return,
        };
        if let Some(state) = self.stream_states.get_mut(&stream.state) {
            state.refs -= 1;
            if state.refs == 0 {
                self.stream_states.remove(&stream.state);
            }
        }
    }

    /// Close a descriptor. The slot is freed even if the close hook fails.
    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let ops = self.stream(fd)?.ops.clone();
        let result = ops.close(self, fd);
        self.close_stream(fd);
        result
    }

    /// Reposition a seekable descriptor.
    pub fn llseek(&mut self, fd: Fd, offset: i64, whence: i32) -> FsResult<i64> {
        if !self.stream(fd)?.seekable {
            return Err(FsError::IllegalSeek);
        }
        if !(SEEK_SET..=SEEK_END).contains(&whence) {
            return Err(FsError::InvalidArgument);
        }
        let ops = self.stream(fd)?.ops.clone();
        let position = ops.llseek(self, fd, offset, whence)?;
        self.stream_state_mut(fd)?.position = position as u64;
        self.stream_mut(fd)?.ungotten.clear();
        Ok(position)
    }

    /// Read into `buf`, either at the shared position (advancing it) or at
    /// an explicit `position` (leaving it alone).
    pub fn read(&mut self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> FsResult<usize> {
        let stream = self.stream(fd)?;
        let seekable = stream.seekable;
        let node_mode = self.node(stream.node)?.mode;
        let flags = self.stream_flags(fd)?;
        if flags & O_ACCMODE == O_WRONLY {
            return Err(FsError::BadFileDescriptor);
        }
        if is_dir(node_mode) {
            return Err(FsError::IsADirectory);
        }
        let seeking = position.is_some();
        let position = match position {
            Some(p) => {
                if !seekable {
                    return Err(FsError::IllegalSeek);
                }
                p
            }
            None => self.stream_position(fd)?,
        };
        let ops = self.stream(fd)?.ops.clone();
        let bytes_read = ops.read(self, fd, buf, position)?;
        if !seeking {
            self.stream_state_mut(fd)?.position += bytes_read as u64;
        }
        Ok(bytes_read)
    }

    /// Write `data`, either at the shared position (advancing it) or at an
    /// explicit `position`. With `O_APPEND` the stream seeks to the end
    /// first. `can_own` lets the backing store adopt the buffer.
    pub fn write(
        &mut self,
        fd: Fd,
        data: &[u8],
        position: Option<u64>,
        can_own: bool,
    ) -> FsResult<usize> {
        let stream = self.stream(fd)?;
        let seekable = stream.seekable;
        let node_mode = self.node(stream.node)?.mode;
        let flags = self.stream_flags(fd)?;
        if flags & O_ACCMODE == O_RDONLY {
            return Err(FsError::BadFileDescriptor);
        }
        if is_dir(node_mode) {
            return Err(FsError::IsADirectory);
        }
        if seekable && flags & O_APPEND != 0 {
            self.llseek(fd, 0, SEEK_END)?;
        }
        let seeking = position.is_some();
        let position = match position {
            Some(p) => {
                if !seekable {
                    return Err(FsError::IllegalSeek);
                }
                p
            }
            None => self.stream_position(fd)?,
        };
        let ops = self.stream(fd)?.ops.clone();
        let bytes_written = ops.write(self, fd, data, position, can_own)?;
        if !seeking {
            self.stream_state_mut(fd)?.position += bytes_written as u64;
        }
        Ok(bytes_written)
    }

    /// Reserve storage for a byte range.
    pub fn allocate(&mut self, fd: Fd, offset: i64, length: i64) -> FsResult<()> {
        if offset < 0 || length <= 0 {
            return Err(FsError::InvalidArgument);
        }
        let flags = self.stream_flags(fd)?;
        if flags & O_ACCMODE == O_RDONLY {
            return Err(FsError::BadFileDescriptor);
        }
        let mode = self.node(self.stream(fd)?.node)?.mode;
        if !crate::perms::is_file(mode) && !is_dir(mode) {
            return Err(FsError::NoDevice);
        }
        let ops = self.stream(fd)?.ops.clone();
        ops.allocate(self, fd, offset as u64, length as u64)
    }

    /// Map a byte range, returning a copy of the mapped bytes.
    pub fn mmap(
        &mut self,
        fd: Fd,
        length: usize,
        position: u64,
        prot: u32,
        flags: u32,
    ) -> FsResult<MappedRegion> {
        let accmode = self.stream_flags(fd)? & O_ACCMODE;
        // A shared writable mapping needs a read/write descriptor.
        if prot & PROT_WRITE != 0 && flags & MAP_PRIVATE == 0 && accmode != O_RDWR {
            return Err(FsError::AccessDenied);
        }
        if accmode == O_WRONLY {
            return Err(FsError::AccessDenied);
        }
        let ops = self.stream(fd)?.ops.clone();
        ops.mmap(self, fd, length, position, prot, flags)
    }

    /// Write mapped bytes back to the underlying file.
    pub fn msync(&mut self, fd: Fd, data: &[u8], position: u64, flags: u32) -> FsResult<()> {
        let ops = self.stream(fd)?.ops.clone();
        ops.msync(self, fd, data, position, flags)
    }

    /// Device-specific control.
    pub fn ioctl(&mut self, fd: Fd, op: u32) -> FsResult<i32> {
        let ops = self.stream(fd)?.ops.clone();
        ops.ioctl(self, fd, op)
    }

    /// Close every open descriptor.
    pub fn quit(&mut self) {
        for fd in 0..self.streams.len() {
            if self.streams[fd].is_some() {
                if let Err(e) = self.close(fd) {
                    tracing::warn!(fd, error = %e, "close failed during shutdown");
                }
            }
        }
    }

    // ---- working directory ----

    pub fn cwd(&self) -> &str {
        &self.current_path
    }

    pub fn chdir(&mut self, path: &str) -> FsResult<()> {
        let lookup = self.lookup_path(
            path,
            LookupOpts {
                follow: true,
                ..Default::default()
            },
        )?;
        let node = lookup.node.ok_or(FsError::NotFound)?;
        if !is_dir(self.node(node)?.mode) {
            return Err(FsError::NotADirectory);
        }
        self.node_permissions(node, "x")?;
        self.current_path = lookup.path;
        Ok(())
    }

    // ---- bulk helpers ----

    /// Create every directory along `path` under `parent`, ignoring the
    /// ones that already exist. Returns the full path.
    pub fn create_path(&mut self, parent: &str, path: &str) -> FsResult<String> {
        let mut current = parent.to_string();
        for part in path.split('/') {
            if part.is_empty() {
                continue;
            }
            current = path::join(&current, part);
            match self.mkdir(&current, 0o777) {
                Ok(_) | Err(FsError::AlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(current)
    }

    /// Create a file with `data` as contents and read/write permissions
    /// derived from the two flags. The file is made temporarily writable
    /// while it is populated.
    pub fn create_data_file(
        &mut self,
        parent: &str,
        name: &str,
        data: Vec<u8>,
        can_read: bool,
        can_write: bool,
        can_own: bool,
    ) -> FsResult<NodeId> {
        let path = if name.is_empty() {
            parent.to_string()
        } else {
            path::join(parent, name)
        };
        let mode = get_mode(can_read, can_write);
        let node = self.create(&path, mode)?;
        if !data.is_empty() {
            self.do_chmod(node, mode | 0o222)?;
            let fd = self.open(&path, O_WRONLY | O_CREAT | O_TRUNC, 0)?;
            self.write(fd, &data, Some(0), can_own)?;
            self.close(fd)?;
            self.do_chmod(node, mode)?;
        }
        Ok(node)
    }

    /// Replace the contents of the file at `path`.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> FsResult<()> {
        let fd = self.open(path, O_WRONLY | O_CREAT | O_TRUNC, 0o666)?;
        let result = self.write(fd, data, None, false);
        self.close(fd)?;
        result.map(|_| ())
    }

    /// Read the whole file at `path`.
    pub fn read_file(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let fd = self.open(path, O_RDONLY, 0)?;
        let size = self.fstat(fd)?.size as usize;
        let mut buf = vec![0u8; size];
        let result = self.read(fd, &mut buf, None);
        self.close(fd)?;
        let n = result?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Permission mode from read/write capability flags.
pub fn get_mode(can_read: bool, can_write: bool) -> u32 {
    let mut mode = 0;
    if can_read {
        mode |= 0o444;
    }
    if can_write {
        mode |= 0o222;
    }
    mode
}

/// Translate an fopen-style mode string into open flags. An `x` suffix adds
/// `O_EXCL`.
pub fn mode_string_to_flags(mode: &str) -> FsResult<u32> {
    let (mode, excl) = match mode.strip_suffix('x') {
        Some(rest) => (rest, O_EXCL),
        None => (mode, 0),
    };
    let flags = match mode {
        "r" => O_RDONLY,
        "r+" => O_RDWR,
        "w" => O_TRUNC | O_CREAT | O_WRONLY,
        "w+" => O_TRUNC | O_CREAT | O_RDWR,
        "a" => O_APPEND | O_CREAT | O_WRONLY,
        "a+" => O_APPEND | O_CREAT | O_RDWR,
        _ => return Err(FsError::InvalidArgument),
    };
    Ok(flags | excl)
}
