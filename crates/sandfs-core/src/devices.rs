// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Character devices and pseudo filesystems.
//!
//! Devices register a [`StreamOps`] table under a packed device number.
//! Opening a character-device node swaps the registered table into the
//! stream, so the node itself stays a plain memfs chardev entry.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FsError, FsResult};
use crate::memfs::NoStreamOps;
use crate::path;
use crate::types::*;
use crate::vfs::{get_mode, now_millis, Fs, FsType, MountOpts, NodeData, NodeOps, StreamOps};

/// Byte source for an input device. `None` means end of input.
pub type StdinFn = Box<dyn FnMut() -> Option<u8>>;
/// Byte sink for an output device.
pub type StdoutFn = Box<dyn FnMut(u8)>;

impl Fs {
    /// Register a stream-ops table for a device number.
    pub fn register_device(&mut self, dev: u64, ops: Arc<dyn StreamOps>) {
        self.devices.insert(dev, ops);
    }

    pub fn get_device(&self, dev: u64) -> Option<Arc<dyn StreamOps>> {
        self.devices.get(&dev).cloned()
    }

    /// Create a device node backed by byte-level input/output hooks. Each
    /// call allocates a fresh major number starting at 64.
    pub fn create_device(
        &mut self,
        parent: &str,
        name: &str,
        input: Option<StdinFn>,
        output: Option<StdoutFn>,
    ) -> FsResult<NodeId> {
        let mode = get_mode(input.is_some(), output.is_some());
        let dev = make_dev(self.next_device_major, 0);
        self.next_device_major += 1;
        self.register_device(
            dev,
            Arc::new(HookDeviceOps {
                input: RefCell::new(input),
                output: RefCell::new(output),
            }),
        );
        self.mkdev(&path::join(parent, name), mode, dev)
    }

    /// Toggle permission enforcement at runtime.
    pub fn set_ignore_permissions(&mut self, ignore: bool) {
        self.ignore_permissions = ignore;
    }

    pub(crate) fn create_default_devices(&mut self) -> FsResult<()> {
        self.mkdir("/dev", 0o777)?;

        self.register_device(make_dev(1, 3), Arc::new(NullOps));
        self.mkdev("/dev/null", 0o666, make_dev(1, 3))?;

        self.register_device(make_dev(5, 0), Arc::new(TtyOps::new(false)));
        self.register_device(make_dev(6, 0), Arc::new(TtyOps::new(true)));
        self.mkdev("/dev/tty", 0o666, make_dev(5, 0))?;
        self.mkdev("/dev/tty1", 0o666, make_dev(6, 0))?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            | 1;
        self.register_device(make_dev(1, 8), Arc::new(RandomOps::new(seed)));
        self.register_device(
            make_dev(1, 9),
            Arc::new(RandomOps::new(seed ^ 0x9e37_79b9_7f4a_7c15)),
        );
        self.mkdev("/dev/random", 0o666, make_dev(1, 8))?;
        self.mkdev("/dev/urandom", 0o666, make_dev(1, 9))?;

        self.mkdir("/dev/shm", 0o777)?;
        self.mkdir("/dev/shm/tmp", 0o777)?;
        Ok(())
    }

    pub(crate) fn create_special_directories(&mut self) -> FsResult<()> {
        self.mkdir("/proc", 0o777)?;
        self.mkdir("/proc/self", 0o777)?;
        self.mkdir("/proc/self/fd", 0o777)?;
        self.mount(Arc::new(ProcSelfFd), MountOpts::new(), "/proc/self/fd")?;
        Ok(())
    }

    /// Open descriptors 0, 1 and 2. A missing hook falls back to the
    /// default terminal devices via `/dev/tty` symlinks. Once the streams
    /// are open, permission enforcement follows the configured policy.
    pub fn init_standard_streams(
        &mut self,
        stdin: Option<StdinFn>,
        stdout: Option<StdoutFn>,
        stderr: Option<StdoutFn>,
    ) -> FsResult<()> {
        match stdin {
            Some(input) => {
                self.create_device("/dev", "stdin", Some(input), None)?;
            }
            None => {
                self.symlink("/dev/tty", "/dev/stdin")?;
            }
        }
        match stdout {
            Some(output) => {
                self.create_device("/dev", "stdout", None, Some(output))?;
            }
            None => {
                self.symlink("/dev/tty", "/dev/stdout")?;
            }
        }
        match stderr {
            Some(output) => {
                self.create_device("/dev", "stderr", None, Some(output))?;
            }
            None => {
                self.symlink("/dev/tty1", "/dev/stderr")?;
            }
        }
        let stdin_fd = self.open("/dev/stdin", O_RDONLY, 0)?;
        let stdout_fd = self.open("/dev/stdout", O_WRONLY, 0)?;
        let stderr_fd = self.open("/dev/stderr", O_WRONLY, 0)?;
        debug_assert_eq!((stdin_fd, stdout_fd, stderr_fd), (0, 1, 2));
        tracing::debug!(stdin_fd, stdout_fd, stderr_fd, "standard streams open");
        self.ignore_permissions = !self.config.security.enforce_permissions;
        Ok(())
    }
}

/// Stream ops every character-device node starts with. `open` swaps in the
/// table registered for the node's device number.
pub(crate) struct ChrdevOps;

impl StreamOps for ChrdevOps {
    fn open(&self, fs: &mut Fs, fd: Fd) -> FsResult<()> {
        let rdev = fs.node(fs.stream(fd)?.node)?.rdev;
        let device = fs.get_device(rdev).ok_or(FsError::DeviceNotConfigured)?;
        fs.stream_mut(fd)?.ops = device.clone();
        device.open(fs, fd)
    }

    fn llseek(&self, _fs: &mut Fs, _fd: Fd, _offset: i64, _whence: i32) -> FsResult<i64> {
        Err(FsError::IllegalSeek)
    }
}

/// `/dev/null`: reads hit EOF, writes are swallowed.
struct NullOps;

impl StreamOps for NullOps {
    fn read(&self, _fs: &mut Fs, _fd: Fd, _buf: &mut [u8], _position: u64) -> FsResult<usize> {
        Ok(0)
    }

    fn write(
        &self,
        _fs: &mut Fs,
        _fd: Fd,
        data: &[u8],
        _position: u64,
        _can_own: bool,
    ) -> FsResult<usize> {
        Ok(data.len())
    }
}

/// Default terminal device. Without hooks installed, reads hit EOF and
/// writes are line-buffered into the log.
struct TtyOps {
    pending: RefCell<Vec<u8>>,
    log_as_error: bool,
}

impl TtyOps {
    fn new(log_as_error: bool) -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
            log_as_error,
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        if self.log_as_error {
            tracing::warn!(target: "sandfs::tty", "{line}");
        } else {
            tracing::info!(target: "sandfs::tty", "{line}");
        }
    }
}

impl StreamOps for TtyOps {
    fn read(&self, _fs: &mut Fs, _fd: Fd, _buf: &mut [u8], _position: u64) -> FsResult<usize> {
        Ok(0)
    }

    fn write(
        &self,
        fs: &mut Fs,
        fd: Fd,
        data: &[u8],
        _position: u64,
        _can_own: bool,
    ) -> FsResult<usize> {
        {
            let mut pending = self.pending.borrow_mut();
            for &byte in data {
                if byte == b'\n' {
                    self.emit(&pending);
                    pending.clear();
                } else {
                    pending.push(byte);
                }
            }
        }
        if !data.is_empty() {
            let node = fs.stream(fd)?.node;
            fs.node_mut(node)?.timestamp = now_millis();
        }
        Ok(data.len())
    }

    fn close(&self, _fs: &mut Fs, _fd: Fd) -> FsResult<()> {
        let mut pending = self.pending.borrow_mut();
        if !pending.is_empty() {
            self.emit(&pending);
            pending.clear();
        }
        Ok(())
    }
}

/// `/dev/random` and `/dev/urandom`: xorshift64* keystream. Not
/// cryptographic; deterministic given the boot seed.
struct RandomOps {
    state: Cell<u64>,
}

impl RandomOps {
    fn new(seed: u64) -> Self {
        Self {
            state: Cell::new(seed.max(1)),
        }
    }
}

impl StreamOps for RandomOps {
    fn read(&self, _fs: &mut Fs, _fd: Fd, buf: &mut [u8], _position: u64) -> FsResult<usize> {
        let mut x = self.state.get();
        for slot in buf.iter_mut() {
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            *slot = (x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 32) as u8;
        }
        self.state.set(x);
        Ok(buf.len())
    }
}

/// Device backed by caller-supplied byte hooks ([`Fs::create_device`]).
struct HookDeviceOps {
    input: RefCell<Option<StdinFn>>,
    output: RefCell<Option<StdoutFn>>,
}

impl StreamOps for HookDeviceOps {
    fn open(&self, fs: &mut Fs, fd: Fd) -> FsResult<()> {
        fs.stream_mut(fd)?.seekable = false;
        Ok(())
    }

    fn read(&self, fs: &mut Fs, fd: Fd, buf: &mut [u8], _position: u64) -> FsResult<usize> {
        let mut bytes_read = 0;
        {
            let mut input = self.input.borrow_mut();
            let input = input.as_mut().ok_or(FsError::DeviceNotConfigured)?;
            for slot in buf.iter_mut() {
                match input() {
                    Some(byte) => {
                        *slot = byte;
                        bytes_read += 1;
                    }
                    None => break,
                }
            }
        }
        if bytes_read > 0 {
            let node = fs.stream(fd)?.node;
            fs.node_mut(node)?.timestamp = now_millis();
        }
        Ok(bytes_read)
    }

    fn write(
        &self,
        fs: &mut Fs,
        fd: Fd,
        data: &[u8],
        _position: u64,
        _can_own: bool,
    ) -> FsResult<usize> {
        {
            let mut output = self.output.borrow_mut();
            let output = output.as_mut().ok_or(FsError::DeviceNotConfigured)?;
            for &byte in data {
                output(byte);
            }
        }
        if !data.is_empty() {
            let node = fs.stream(fd)?.node;
            fs.node_mut(node)?.timestamp = now_millis();
        }
        Ok(data.len())
    }
}

/// Pseudo filesystem grafted at `/proc/self/fd`. Each lookup of a numeric
/// name fabricates a fresh symlink to the open stream's path.
struct ProcSelfFd;

impl FsType for ProcSelfFd {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn mount(&self, fs: &mut Fs, mount: MountId) -> FsResult<NodeId> {
        fs.create_node(
            None,
            Some(mount),
            "/",
            S_IFDIR | 0o555,
            0,
            Arc::new(ProcFdDirOps),
            Arc::new(NoStreamOps),
            NodeData::Empty,
        )
    }
}

struct ProcFdDirOps;

impl NodeOps for ProcFdDirOps {
    fn lookup(&self, fs: &mut Fs, parent: NodeId, name: &str) -> FsResult<NodeId> {
        let fd: Fd = name.parse().map_err(|_| FsError::BadFileDescriptor)?;
        let target = fs.stream(fd)?.path.clone();
        let mount = fs.node(parent)?.mount;
        Ok(fs.alloc_transient_node(
            mount,
            name,
            S_IFLNK | 0o777,
            Arc::new(ProcFdLinkOps),
            Arc::new(NoStreamOps),
            NodeData::Symlink { target },
        ))
    }
}

struct ProcFdLinkOps;

impl NodeOps for ProcFdLinkOps {
    fn readlink(&self, fs: &Fs, node: NodeId) -> FsResult<String> {
        match &fs.node(node)?.data {
            NodeData::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }
}
