// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte storage for regular files.
//!
//! A file's bytes live in a buffer whose allocated capacity grows ahead of
//! the logical length (`used_bytes`), so repeated appends don't reallocate on
//! every write. Capacity doubles until 1 MiB, then grows by 12.5% per step.

/// Capacity threshold above which growth switches from 2.0x to 1.125x.
const CAPACITY_DOUBLING_MAX: usize = 1024 * 1024;

/// Minimum capacity once a file has ever held data.
const MIN_CAPACITY: usize = 256;

/// Growable byte buffer with a separate logical length.
///
/// `contents.len()` is the allocated capacity; bytes past `used_bytes` are
/// zero and not part of the file.
#[derive(Clone, Debug, Default)]
pub struct FileStorage {
    contents: Vec<u8>,
    used_bytes: usize,
}

impl FileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build storage holding exactly `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let used_bytes = data.len();
        Self {
            contents: data,
            used_bytes,
        }
    }

    /// Logical file length.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Allocated capacity.
    pub fn capacity(&self) -> usize {
        self.contents.len()
    }

    /// Extend the logical length into already-allocated capacity, e.g. after
    /// a preallocation. Clamped to the capacity; never shrinks.
    pub(crate) fn set_used_bytes(&mut self, used: usize) {
        self.used_bytes = self.used_bytes.max(used.min(self.contents.len()));
    }

    /// The file's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.contents[..self.used_bytes]
    }

    /// Grow allocated capacity to at least `new_capacity` without changing
    /// the logical length. Geometric growth: `prev * 2.0` below 1 MiB,
    /// `prev * 1.125` above, floored at 256 bytes once any capacity existed.
    pub fn expand(&mut self, new_capacity: usize) {
        let prev_capacity = self.contents.len();
        if prev_capacity >= new_capacity {
            return;
        }
        let factor = if prev_capacity < CAPACITY_DOUBLING_MAX {
            2.0
        } else {
            1.125
        };
        let mut new_capacity = new_capacity.max((prev_capacity as f64 * factor) as usize);
        if prev_capacity != 0 {
            new_capacity = new_capacity.max(MIN_CAPACITY);
        }
        let mut grown = vec![0u8; new_capacity];
        grown[..self.used_bytes].copy_from_slice(&self.contents[..self.used_bytes]);
        self.contents = grown;
    }

    /// Set the logical length to exactly `new_size`, reallocating to fit.
    /// Growth zero-fills; shrinking drops the tail.
    pub fn resize(&mut self, new_size: usize) {
        if self.used_bytes == new_size {
            return;
        }
        if new_size == 0 {
            self.contents = Vec::new();
            self.used_bytes = 0;
            return;
        }
        let mut resized = vec![0u8; new_size];
        let keep = new_size.min(self.used_bytes);
        resized[..keep].copy_from_slice(&self.contents[..keep]);
        self.contents = resized;
        self.used_bytes = new_size;
    }

    /// Read up to `buf.len()` bytes starting at `position`. Returns the byte
    /// count: `min(used_bytes - position, len)`, 0 at or past EOF.
    pub fn read(&self, position: usize, buf: &mut [u8]) -> usize {
        if position >= self.used_bytes {
            return 0;
        }
        let size = buf.len().min(self.used_bytes - position);
        buf[..size].copy_from_slice(&self.contents[position..position + size]);
        size
    }

    /// Write `data` at `position`. Fast paths in order: adopt the incoming
    /// buffer outright when the caller grants ownership (position must be 0),
    /// become the whole file when empty and writing at 0, overwrite in place
    /// when the range fits within `used_bytes`; otherwise expand and copy.
    pub fn write(&mut self, position: usize, data: &[u8], can_own: bool) -> usize {
        if data.is_empty() {
            return 0;
        }
        if can_own {
            debug_assert_eq!(position, 0, "ownership writes start at position 0");
            self.contents = data.to_vec();
            self.used_bytes = data.len();
            return data.len();
        }
        if self.used_bytes == 0 && position == 0 {
            self.contents = data.to_vec();
            self.used_bytes = data.len();
            return data.len();
        }
        if position + data.len() <= self.used_bytes {
            self.contents[position..position + data.len()].copy_from_slice(data);
            return data.len();
        }
        self.expand(position + data.len());
        self.contents[position..position + data.len()].copy_from_slice(data);
        self.used_bytes = self.used_bytes.max(position + data.len());
        data.len()
    }
}
