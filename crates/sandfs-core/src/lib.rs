// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SandFS Core, a POSIX-like in-memory virtual filesystem.
//!
//! An [`Fs`] instance owns a node tree, a mount table, and a file-descriptor
//! layer with POSIX semantics: permissions, symlinks, character devices and
//! pseudo entries like `/proc/self/fd`. Backing stores plug in through
//! [`FsType`]; the built-in [`MemFs`] keeps everything in memory.
//!
//! # Example
//!
//! ```
//! use sandfs_core::{Fs, FsConfig, O_CREAT, O_RDWR};
//!
//! let mut fs = Fs::new(FsConfig::default())?;
//! fs.mkdir("/data", 0o755)?;
//! let fd = fs.open("/data/hello.txt", O_RDWR | O_CREAT, 0o644)?;
//! fs.write(fd, b"hello", None, false)?;
//! fs.close(fd)?;
//! assert_eq!(fs.read_file("/data/hello.txt")?, b"hello");
//! # Ok::<(), sandfs_core::FsError>(())
//! ```

pub mod config;
pub mod devices;
pub mod error;
pub mod memfs;
pub mod path;
pub mod perms;
pub mod storage;
pub mod types;
pub mod vfs;

pub use config::{FsConfig, FsLimits, SecurityPolicy};
pub use devices::{StdinFn, StdoutFn};
pub use error::{FsError, FsResult};
pub use memfs::MemFs;
pub use storage::FileStorage;
pub use types::*;
pub use vfs::{
    get_mode, mode_string_to_flags, Fs, FsType, Lookup, LookupOpts, Mount, MountOpts, Node,
    NodeData, NodeOps, Stream, StreamOps, SyncDone,
};

#[cfg(test)]
mod test_posix;
