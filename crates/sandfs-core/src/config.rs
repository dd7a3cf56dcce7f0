// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for SandFS Core

use serde::{Deserialize, Serialize};

/// Filesystem instance configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FsConfig {
    pub limits: FsLimits,
    pub security: SecurityPolicy,
    /// Record the path of every file opened with read intent.
    pub track_read_files: bool,
}

/// Hard limits for a filesystem instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsLimits {
    /// Capacity of the file-descriptor table.
    pub max_open_files: usize,
    /// Number of buckets in the (parent, name) hash table.
    pub name_table_size: usize,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_open_files: 4096,
            name_table_size: 4096,
        }
    }
}

/// Permission enforcement policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Enforce r/w/x mode bits once the instance is initialized. Permission
    /// checks are always bypassed while the default tree is being built.
    pub enforce_permissions: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enforce_permissions: true,
        }
    }
}
