// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mode predicates and permission gates.
//!
//! Gates check the r/w/x bits of a mode against the access an operation
//! needs. Ownership is not modeled, so a permission bit must be granted in
//! any of the user/group/other positions to pass. All checks are bypassed
//! while [`Fs::new`](crate::Fs::new) builds the default tree.

use crate::error::{FsError, FsResult};
use crate::types::*;
use crate::vfs::Fs;

pub fn is_file(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

pub fn is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

pub fn is_link(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

pub fn is_chrdev(mode: u32) -> bool {
    mode & S_IFMT == S_IFCHR
}

pub fn is_blkdev(mode: u32) -> bool {
    mode & S_IFMT == S_IFBLK
}

pub fn is_fifo(mode: u32) -> bool {
    mode & S_IFMT == S_IFIFO
}

pub fn is_socket(mode: u32) -> bool {
    mode & S_IFMT == S_IFSOCK
}

/// The permission string (`"r"`, `"w"` or `"rw"`) an open with `flags`
/// requires. Truncation needs write access on top of the access mode.
pub fn flags_to_permission_string(flags: u32) -> String {
    let mut perms = match flags & O_ACCMODE {
        O_RDONLY => "r",
        O_WRONLY => "w",
        _ => "rw",
    }
    .to_string();
    if flags & O_TRUNC != 0 {
        perms.push('w');
    }
    perms
}

impl Fs {
    /// Check that a node's mode grants every permission in `perms`.
    pub(crate) fn node_permissions(&self, node: NodeId, perms: &str) -> FsResult<()> {
        if self.ignore_permissions {
            return Ok(());
        }
        let mode = self.node(node)?.mode;
        if perms.contains('r') && mode & 0o444 == 0 {
            return Err(FsError::AccessDenied);
        }
        if perms.contains('w') && mode & 0o222 == 0 {
            return Err(FsError::AccessDenied);
        }
        if perms.contains('x') && mode & 0o111 == 0 {
            return Err(FsError::AccessDenied);
        }
        Ok(())
    }

    /// Whether children of `dir` may be resolved.
    pub(crate) fn may_lookup(&self, dir: NodeId) -> FsResult<()> {
        if !is_dir(self.node(dir)?.mode) {
            return Err(FsError::NotADirectory);
        }
        self.node_permissions(dir, "x")
    }

    /// Whether `name` may be created under `dir`.
    pub(crate) fn may_create(&mut self, dir: NodeId, name: &str) -> FsResult<()> {
        if self.lookup_node(dir, name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        self.node_permissions(dir, "wx")
    }

    /// Whether `name` may be removed from `dir`. `isdir` selects directory
    /// vs. non-directory semantics; the root and the working directory are
    /// always busy.
    pub(crate) fn may_delete(&mut self, dir: NodeId, name: &str, isdir: bool) -> FsResult<()> {
        let node = self.lookup_node(dir, name)?;
        self.node_permissions(dir, "wx")?;
        let mode = self.node(node)?.mode;
        if isdir {
            if !is_dir(mode) {
                return Err(FsError::NotADirectory);
            }
            if self.is_root(node)? || self.get_path(node)? == self.cwd() {
                return Err(FsError::Busy);
            }
        } else if is_dir(mode) {
            return Err(FsError::IsADirectory);
        }
        Ok(())
    }

    /// Whether a node may be opened with `flags`. Symlinks that survived
    /// resolution fail, and directories only open read-only without
    /// create/truncate.
    pub(crate) fn may_open(&self, node: NodeId, flags: u32) -> FsResult<()> {
        let mode = self.node(node)?.mode;
        if is_link(mode) {
            return Err(FsError::FilesystemLoop);
        }
        let perms = flags_to_permission_string(flags);
        if is_dir(mode) && (perms != "r" || flags & (O_TRUNC | O_CREAT) != 0) {
            return Err(FsError::IsADirectory);
        }
        self.node_permissions(node, &perms)
    }
}
