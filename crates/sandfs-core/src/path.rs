// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path string helpers for the VFS.
//!
//! These operate on virtual paths only; they never touch the host filesystem.
//! Absolute paths stay absolute, `.` and duplicate slashes collapse, and `..`
//! above the root clamps instead of escaping it.

/// Whether `path` is absolute.
pub fn is_abs(path: &str) -> bool {
    path.starts_with('/')
}

/// Collapse `.`, `..` and duplicate slashes. Relative paths may keep leading
/// `..` segments; absolute paths clamp them at the root.
pub fn normalize(path: &str) -> String {
    let abs = is_abs(path);
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|p| *p != "..") {
                    stack.pop();
                } else if !abs {
                    stack.push("..");
                }
            }
            p => stack.push(p),
        }
    }
    let joined = stack.join("/");
    if abs {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Join two path fragments and normalize the result.
pub fn join(left: &str, right: &str) -> String {
    if left.is_empty() {
        return normalize(right);
    }
    if right.is_empty() {
        return normalize(left);
    }
    normalize(&format!("{left}/{right}"))
}

/// Everything up to the last component; `/` for a single-component absolute
/// path, `.` for a single-component relative one.
pub fn dirname(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => ".".to_string(),
    }
}

/// The last component; empty for the root itself.
pub fn basename(path: &str) -> String {
    let path = normalize(path);
    if path == "/" {
        return String::new();
    }
    match path.rfind('/') {
        Some(pos) => path[pos + 1..].to_string(),
        None => path,
    }
}

/// Resolve `path` against `base`: absolute paths win, relative paths join.
/// An empty `path` resolves to the empty string.
pub fn resolve(base: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if is_abs(path) {
        normalize(path)
    } else {
        join(base, path)
    }
}

/// Relative path from `from` to `to` (both treated as absolute). Returns the
/// empty string when they resolve to the same path; descendants of `from`
/// come back without a leading `..` segment, everything else with one.
pub fn relative(from: &str, to: &str) -> String {
    let from = normalize(from);
    let to = normalize(to);
    let f: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let t: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let common = f.iter().zip(t.iter()).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<&str> = Vec::with_capacity(f.len() - common + t.len() - common);
    parts.resize(f.len() - common, "..");
    parts.extend(&t[common..]);
    parts.join("/")
}
