// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for SandFS Core

/// Core filesystem error type.
///
/// One variant per errno in the fixed taxonomy the VFS can surface. All
/// failures are synchronous; `syncfs` is the only operation that defers a
/// single error to its completion callback.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    #[error("operation not permitted")]
    NotPermitted,
    #[error("no such file or directory")]
    NotFound,
    #[error("i/o error")]
    Io,
    #[error("no such device or address")]
    DeviceNotConfigured,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("permission denied")]
    AccessDenied,
    #[error("resource busy")]
    Busy,
    #[error("file exists")]
    AlreadyExists,
    #[error("cross-device link")]
    CrossesDevices,
    #[error("no such device")]
    NoDevice,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("inappropriate ioctl for device")]
    NotATerminal,
    #[error("illegal seek")]
    IllegalSeek,
    #[error("directory not empty")]
    NotEmpty,
    #[error("too many levels of symbolic links")]
    FilesystemLoop,
    #[error("operation not supported")]
    Unsupported,
}

impl FsError {
    /// Numeric errno for this error (classic Linux values).
    pub const fn errno(&self) -> i32 {
        match self {
            FsError::NotPermitted => 1,
            FsError::NotFound => 2,
            FsError::Io => 5,
            FsError::DeviceNotConfigured => 6,
            FsError::BadFileDescriptor => 9,
            FsError::AccessDenied => 13,
            FsError::Busy => 16,
            FsError::AlreadyExists => 17,
            FsError::CrossesDevices => 18,
            FsError::NoDevice => 19,
            FsError::NotADirectory => 20,
            FsError::IsADirectory => 21,
            FsError::InvalidArgument => 22,
            FsError::TooManyOpenFiles => 24,
            FsError::NotATerminal => 25,
            FsError::IllegalSeek => 29,
            FsError::NotEmpty => 39,
            FsError::FilesystemLoop => 40,
            FsError::Unsupported => 95,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
