// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end POSIX semantics scenarios against a bootstrapped instance.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::{FsConfig, FsLimits, SecurityPolicy};
use crate::error::FsError;
use crate::memfs::{create_memfs_node, MemFs};
use crate::types::*;
use crate::vfs::{Fs, FsType, LookupOpts, MountOpts, SyncDone};

fn fs() -> Fs {
    Fs::new(FsConfig::default()).unwrap()
}

#[test]
fn test_lookup_normalizes_dot_and_slash_segments() {
    let mut fs = fs();
    fs.mkdir("/a", 0o777).unwrap();
    fs.mkdir("/a/b", 0o777).unwrap();
    fs.mkdir("/a/b/c", 0o777).unwrap();

    let plain = fs.stat("/a/b/c").unwrap().ino;
    assert_eq!(fs.stat("/a//b/./c").unwrap().ino, plain);
    assert_eq!(fs.stat("/a/b/../b/c").unwrap().ino, plain);
    let lookup = fs.lookup_path("/a//b/./c/", LookupOpts::default()).unwrap();
    assert_eq!(lookup.path, "/a/b/c");
}

#[test]
fn test_create_lookup_destroy() {
    let mut fs = fs();
    let id = fs.create("/f", 0o666).unwrap();
    let root = fs.root().unwrap();
    assert_eq!(fs.lookup_node(root, "f").unwrap(), id);

    fs.unlink("/f").unwrap();
    assert_eq!(fs.lookup_node(root, "f"), Err(FsError::NotFound));
    assert_eq!(fs.stat("/f"), Err(FsError::NotFound));
}

#[test]
fn test_mkdir_write_read_scenario() {
    let mut fs = fs();
    fs.mkdir("/a", 0o777).unwrap();
    fs.mkdir("/a/b", 0o777).unwrap();
    fs.write_file("/a/b/f", b"hi").unwrap();
    assert_eq!(fs.read_file("/a/b/f").unwrap(), b"hi");
}

#[test]
fn test_create_mode_scenario() {
    let mut fs = fs();
    fs.create("/x", 0o644).unwrap();
    let attr = fs.stat("/x").unwrap();
    assert_eq!(attr.mode & 0o777, 0o644);
    assert_eq!(attr.mode & S_IFMT, S_IFREG);
}

#[test]
fn test_rename_preserves_identity_and_content() {
    let mut fs = fs();
    fs.mkdir("/a", 0o777).unwrap();
    fs.mkdir("/b", 0o777).unwrap();
    fs.write_file("/a/f", b"content").unwrap();
    let ino = fs.stat("/a/f").unwrap().ino;

    fs.rename("/a/f", "/b/g").unwrap();
    assert_eq!(fs.stat("/b/g").unwrap().ino, ino);
    assert_eq!(fs.read_file("/b/g").unwrap(), b"content");
    assert_eq!(fs.stat("/a/f"), Err(FsError::NotFound));
}

#[test]
fn test_rename_to_same_node_is_noop() {
    let mut fs = fs();
    fs.write_file("/f", b"data").unwrap();
    fs.rename("/f", "/f").unwrap();
    assert_eq!(fs.read_file("/f").unwrap(), b"data");
}

#[test]
fn test_rename_into_own_subtree_fails() {
    let mut fs = fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.mkdir("/d/sub", 0o777).unwrap();
    assert_eq!(fs.rename("/d", "/d/sub/x"), Err(FsError::InvalidArgument));
    assert_eq!(fs.rename("/d/sub", "/d"), Err(FsError::NotEmpty));
}

#[test]
fn test_rename_over_nonempty_directory_fails() {
    let mut fs = fs();
    fs.mkdir("/p", 0o777).unwrap();
    fs.mkdir("/p/a", 0o777).unwrap();
    fs.mkdir("/p/b", 0o777).unwrap();
    fs.create("/p/b/keep", 0o666).unwrap();

    assert_eq!(fs.rename("/p/a", "/p/b"), Err(FsError::NotEmpty));
    // The source survives a failed rename.
    assert!(fs.stat("/p/a").is_ok());
}

#[test]
fn test_rename_replaces_empty_directory() {
    let mut fs = fs();
    fs.mkdir("/p", 0o777).unwrap();
    fs.mkdir("/p/a", 0o777).unwrap();
    fs.create("/p/a/inner", 0o666).unwrap();
    fs.mkdir("/p/b", 0o777).unwrap();

    fs.rename("/p/a", "/p/b").unwrap();
    assert!(fs.stat("/p/b/inner").is_ok());
    assert_eq!(fs.stat("/p/a"), Err(FsError::NotFound));
}

#[test]
fn test_symlink_cycle_hits_hop_limit() {
    let mut fs = fs();
    fs.symlink("/cyc-b", "/cyc-a").unwrap();
    fs.symlink("/cyc-a", "/cyc-b").unwrap();
    assert_eq!(fs.stat("/cyc-a"), Err(FsError::FilesystemLoop));
}

#[test]
fn test_symlink_nesting_hits_recursion_limit() {
    let mut fs = fs();
    // Each link's target drags resolution through the next link as a
    // non-final component, nesting one level per hop.
    for i in 1..=12 {
        fs.symlink(&format!("/l{}/x", i + 1), &format!("/l{i}"))
            .unwrap();
    }
    fs.mkdir("/l13", 0o777).unwrap();
    fs.write_file("/l13/x", b"deep").unwrap();
    assert_eq!(fs.stat("/l1/x"), Err(FsError::FilesystemLoop));
}

#[test]
fn test_symlink_resolution_and_readlink() {
    let mut fs = fs();
    fs.mkdir("/real", 0o777).unwrap();
    fs.write_file("/real/f", b"via link").unwrap();
    fs.symlink("/real", "/alias").unwrap();

    assert_eq!(fs.read_file("/alias/f").unwrap(), b"via link");
    assert_eq!(fs.readlink("/alias").unwrap(), "/real");
    // lstat sees the link itself, stat follows it.
    assert_eq!(fs.lstat("/alias").unwrap().mode & S_IFMT, S_IFLNK);
    assert_eq!(fs.stat("/alias").unwrap().mode & S_IFMT, S_IFDIR);

    fs.symlink("f", "/real/rel").unwrap();
    assert_eq!(fs.read_file("/real/rel").unwrap(), b"via link");
    assert_eq!(fs.readlink("/real/rel").unwrap(), "/real/f");
}

#[test]
fn test_fd_table_exhaustion() {
    let config = FsConfig {
        limits: FsLimits {
            max_open_files: 8,
            name_table_size: 64,
        },
        security: SecurityPolicy {
            enforce_permissions: true,
        },
        track_read_files: false,
    };
    let mut fs = Fs::new(config).unwrap();
    fs.create("/f", 0o666).unwrap();
    let fds: Vec<Fd> = (0..8).map(|_| fs.open("/f", O_RDONLY, 0).unwrap()).collect();
    assert_eq!(fs.open("/f", O_RDONLY, 0), Err(FsError::TooManyOpenFiles));

    // Closing any descriptor frees its slot for reuse.
    fs.close(fds[3]).unwrap();
    assert_eq!(fs.open("/f", O_RDONLY, 0).unwrap(), fds[3]);
}

#[test]
fn test_delete_root_and_cwd_are_busy() {
    let mut fs = fs();
    let root = fs.root().unwrap();
    assert_eq!(fs.may_delete(root, "/", true), Err(FsError::Busy));

    fs.mkdir("/w", 0o777).unwrap();
    fs.chdir("/w").unwrap();
    assert_eq!(fs.rmdir("/w"), Err(FsError::Busy));
    fs.chdir("/").unwrap();
    fs.rmdir("/w").unwrap();
}

#[test]
fn test_mount_and_unmount() {
    let mut fs = fs();
    fs.mkdir("/mnt", 0o777).unwrap();
    fs.mount(Arc::new(MemFs), MountOpts::new(), "/mnt").unwrap();
    fs.write_file("/mnt/file", b"inner").unwrap();
    assert_eq!(fs.read_file("/mnt/file").unwrap(), b"inner");

    // A mountpoint cannot be stacked or deleted.
    assert_eq!(
        fs.mount(Arc::new(MemFs), MountOpts::new(), "/mnt"),
        Err(FsError::Busy)
    );
    assert_eq!(fs.rmdir("/mnt"), Err(FsError::Busy));

    fs.unmount("/mnt").unwrap();
    assert_eq!(fs.stat("/mnt/file"), Err(FsError::NotFound));
    // The graft directory itself is intact and empty again.
    assert_eq!(fs.readdir("/mnt").unwrap(), vec![".", ".."]);
    assert_eq!(fs.unmount("/tmp"), Err(FsError::InvalidArgument));
}

#[test]
fn test_get_path_keeps_doubled_slash_under_mount() {
    // Joining a mountpoint without a trailing slash onto a child path
    // yields a doubled separator. Long-standing behavior; callers rely on
    // normalization to clean it up.
    let mut fs = fs();
    fs.mkdir("/mnt", 0o777).unwrap();
    fs.mount(Arc::new(MemFs), MountOpts::new(), "/mnt").unwrap();
    fs.write_file("/mnt/data.txt", b"x").unwrap();

    let fd = fs.open("/mnt/data.txt", O_RDONLY, 0).unwrap();
    assert_eq!(fs.stream(fd).unwrap().path, "/mnt//data.txt");
    fs.close(fd).unwrap();

    let fd = fs.open("/tmp/../x", O_WRONLY | O_CREAT, 0o666).unwrap();
    assert_eq!(fs.stream(fd).unwrap().path, "/x");
    fs.close(fd).unwrap();
}

#[test]
fn test_proc_self_fd_resolves_to_stream_path() {
    let mut fs = fs();
    fs.mkdir("/a", 0o777).unwrap();
    fs.write_file("/a/f", b"payload").unwrap();
    let fd = fs.open("/a/f", O_RDONLY, 0).unwrap();

    let link = format!("/proc/self/fd/{fd}");
    assert_eq!(fs.readlink(&link).unwrap(), "/a/f");
    assert_eq!(fs.stat(&link).unwrap().size, 7);

    assert_eq!(
        fs.readlink("/proc/self/fd/999"),
        Err(FsError::BadFileDescriptor)
    );
    assert_eq!(
        fs.readlink("/proc/self/fd/junk"),
        Err(FsError::BadFileDescriptor)
    );
    fs.close(fd).unwrap();
}

#[test]
fn test_dup_shares_flags_and_position() {
    let mut fs = fs();
    fs.write_file("/f", b"abcdef").unwrap();
    let fd = fs.open("/f", O_RDONLY, 0).unwrap();
    let dup = fs.dup(fd).unwrap();
    assert_ne!(fd, dup);
    assert_eq!(fs.stream_flags(dup).unwrap(), fs.stream_flags(fd).unwrap());

    let mut buf = [0u8; 2];
    fs.read(fd, &mut buf, None).unwrap();
    assert_eq!(&buf, b"ab");
    // The duplicate continues where the original stopped.
    fs.read(dup, &mut buf, None).unwrap();
    assert_eq!(&buf, b"cd");

    // Shared state survives closing one of the two.
    fs.close(fd).unwrap();
    fs.read(dup, &mut buf, None).unwrap();
    assert_eq!(&buf, b"ef");
    fs.close(dup).unwrap();
}

#[test]
fn test_syncfs_reports_first_error() {
    struct FailingFs;
    impl FsType for FailingFs {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn mount(&self, fs: &mut Fs, mount: MountId) -> crate::FsResult<NodeId> {
            create_memfs_node(fs, None, Some(mount), "/", S_IFDIR | 0o777, 0)
        }
        fn syncfs(&self, _fs: &mut Fs, _mount: MountId, _populate: bool, done: SyncDone) {
            done(Err(FsError::Io));
        }
    }

    let mut fs = fs();
    let result = Rc::new(Cell::new(None));
    let seen = result.clone();
    fs.syncfs(false, move |r| seen.set(Some(r)));
    assert_eq!(result.get(), Some(Ok(())));

    fs.mkdir("/flaky", 0o777).unwrap();
    fs.mount(Arc::new(FailingFs), MountOpts::new(), "/flaky")
        .unwrap();
    let result = Rc::new(Cell::new(None));
    let seen = result.clone();
    fs.syncfs(false, move |r| seen.set(Some(r)));
    assert_eq!(result.get(), Some(Err(FsError::Io)));
}

#[test]
fn test_permissions_enforced_after_init() {
    let mut fs = fs();
    fs.create("/ro", 0o444).unwrap();
    fs.mkdir("/locked", 0o555).unwrap();
    fs.set_ignore_permissions(false);

    assert_eq!(fs.open("/ro", O_WRONLY, 0), Err(FsError::AccessDenied));
    assert!(fs.open("/ro", O_RDONLY, 0).is_ok());
    assert_eq!(
        fs.create("/locked/new", 0o666),
        Err(FsError::AccessDenied)
    );
    // Truncation needs write access even on a read-only open.
    assert_eq!(
        fs.open("/ro", O_RDONLY | O_TRUNC, 0),
        Err(FsError::AccessDenied)
    );
}

#[test]
fn test_open_flag_semantics() {
    let mut fs = fs();
    fs.create("/exists", 0o666).unwrap();
    assert_eq!(
        fs.open("/exists", O_WRONLY | O_CREAT | O_EXCL, 0o666),
        Err(FsError::AlreadyExists)
    );
    assert_eq!(
        fs.open("/exists", O_RDONLY | O_DIRECTORY, 0),
        Err(FsError::NotADirectory)
    );
    assert_eq!(fs.open("/missing", O_RDONLY, 0), Err(FsError::NotFound));

    fs.symlink("/exists", "/ln").unwrap();
    assert_eq!(
        fs.open("/ln", O_RDONLY | O_NOFOLLOW, 0),
        Err(FsError::FilesystemLoop)
    );

    // Directories only open read-only.
    assert_eq!(fs.open("/tmp", O_RDWR, 0), Err(FsError::IsADirectory));
    let fd = fs.open("/tmp", O_RDONLY, 0).unwrap();
    fs.close(fd).unwrap();
}

#[test]
fn test_append_and_seek() {
    let mut fs = fs();
    let fd = fs
        .open("/log", O_WRONLY | O_CREAT | O_APPEND, 0o666)
        .unwrap();
    fs.write(fd, b"aa", None, false).unwrap();
    fs.llseek(fd, 0, SEEK_SET).unwrap();
    // O_APPEND snaps back to the end before writing.
    fs.write(fd, b"bb", None, false).unwrap();
    fs.close(fd).unwrap();
    assert_eq!(fs.read_file("/log").unwrap(), b"aabb");

    let fd = fs.open("/log", O_RDONLY, 0).unwrap();
    assert_eq!(fs.llseek(fd, -2, SEEK_END).unwrap(), 2);
    let mut buf = [0u8; 2];
    fs.read(fd, &mut buf, None).unwrap();
    assert_eq!(&buf, b"bb");
    assert_eq!(fs.llseek(fd, -10, SEEK_CUR), Err(FsError::InvalidArgument));
    assert_eq!(fs.llseek(fd, 0, 7), Err(FsError::InvalidArgument));
    fs.close(fd).unwrap();
}

#[test]
fn test_positioned_io_leaves_cursor_alone() {
    let mut fs = fs();
    fs.write_file("/f", b"0123456789").unwrap();
    let fd = fs.open("/f", O_RDWR, 0).unwrap();

    let mut buf = [0u8; 4];
    fs.read(fd, &mut buf, Some(6)).unwrap();
    assert_eq!(&buf, b"6789");
    assert_eq!(fs.stream_position(fd).unwrap(), 0);

    fs.write(fd, b"AB", Some(2), false).unwrap();
    assert_eq!(fs.stream_position(fd).unwrap(), 0);
    fs.close(fd).unwrap();
    assert_eq!(fs.read_file("/f").unwrap(), b"01AB456789");
}

#[test]
fn test_read_write_access_mode_checks() {
    let mut fs = fs();
    fs.write_file("/f", b"data").unwrap();
    let mut buf = [0u8; 4];

    let fd = fs.open("/f", O_WRONLY, 0).unwrap();
    assert_eq!(
        fs.read(fd, &mut buf, None),
        Err(FsError::BadFileDescriptor)
    );
    fs.close(fd).unwrap();

    let fd = fs.open("/f", O_RDONLY, 0).unwrap();
    assert_eq!(
        fs.write(fd, b"x", None, false),
        Err(FsError::BadFileDescriptor)
    );
    assert_eq!(fs.ftruncate(fd, 0), Err(FsError::InvalidArgument));
    fs.close(fd).unwrap();

    let fd = fs.open("/tmp", O_RDONLY, 0).unwrap();
    assert_eq!(fs.read(fd, &mut buf, None), Err(FsError::IsADirectory));
    fs.close(fd).unwrap();
}

#[test]
fn test_truncate_rejects_bad_targets() {
    let mut fs = fs();
    fs.write_file("/f", b"data").unwrap();
    assert_eq!(fs.truncate("/f", -1), Err(FsError::InvalidArgument));
    assert_eq!(fs.truncate("/tmp", 0), Err(FsError::IsADirectory));
    fs.truncate("/f", 2).unwrap();
    assert_eq!(fs.read_file("/f").unwrap(), b"da");
}

#[test]
fn test_unlink_and_rmdir_type_checks() {
    let mut fs = fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.create("/d/f", 0o666).unwrap();

    assert_eq!(fs.unlink("/d"), Err(FsError::IsADirectory));
    assert_eq!(fs.rmdir("/d/f"), Err(FsError::NotADirectory));
    assert_eq!(fs.rmdir("/d"), Err(FsError::NotEmpty));
    fs.unlink("/d/f").unwrap();
    fs.rmdir("/d").unwrap();
}

#[test]
fn test_mkdir_tree_creates_missing_levels() {
    let mut fs = fs();
    fs.mkdir("/q", 0o777).unwrap();
    fs.mkdir_tree("/q/w/e", 0o777).unwrap();
    assert!(fs.stat("/q/w/e").is_ok());
    // Existing levels are fine, a file in the way is not.
    fs.mkdir_tree("/q/w/e", 0o777).unwrap();
    fs.create("/q/file", 0o666).unwrap();
    assert!(fs.mkdir_tree("/q/file/sub", 0o777).is_err());
}

#[test]
fn test_create_path_returns_full_path() {
    let mut fs = fs();
    let path = fs.create_path("/home", "user/work").unwrap();
    assert_eq!(path, "/home/user/work");
    assert!(fs.stat("/home/user/work").is_ok());
}

#[test]
fn test_create_data_file_respects_permissions() {
    let mut fs = fs();
    fs.create_data_file("/", "blob", b"abc".to_vec(), true, false, false)
        .unwrap();
    assert_eq!(fs.read_file("/blob").unwrap(), b"abc");
    assert_eq!(fs.stat("/blob").unwrap().mode & 0o777, 0o444);

    fs.set_ignore_permissions(false);
    assert_eq!(fs.open("/blob", O_WRONLY, 0), Err(FsError::AccessDenied));
}

#[test]
fn test_chmod_preserves_type_bits() {
    let mut fs = fs();
    fs.create("/f", 0o644).unwrap();
    fs.chmod("/f", 0o600).unwrap();
    let attr = fs.stat("/f").unwrap();
    assert_eq!(attr.mode & MODE_BITS, 0o600);
    assert_eq!(attr.mode & S_IFMT, S_IFREG);

    let fd = fs.open("/f", O_RDONLY, 0).unwrap();
    fs.fchmod(fd, 0o640).unwrap();
    assert_eq!(fs.fstat(fd).unwrap().mode & MODE_BITS, 0o640);
    // Path-based and descriptor-based stat agree on the whole record.
    assert_eq!(fs.fstat(fd).unwrap(), fs.stat("/f").unwrap());
    fs.close(fd).unwrap();
}

#[test]
fn test_utime_takes_the_later_time() {
    let mut fs = fs();
    fs.create("/f", 0o666).unwrap();
    fs.utime("/f", 1_000, 2_000).unwrap();
    assert_eq!(fs.stat("/f").unwrap().mtime, 2_000);
    fs.utime("/f", 5_000, 3_000).unwrap();
    assert_eq!(fs.stat("/f").unwrap().mtime, 5_000);
}

#[test]
fn test_mkdev_reports_device_numbers() {
    let mut fs = fs();
    let dev = make_dev(3, 7);
    fs.mkdev("/dev/custom", 0o666, dev).unwrap();
    let attr = fs.stat("/dev/custom").unwrap();
    assert_eq!(attr.mode & S_IFMT, S_IFCHR);
    assert_eq!(attr.rdev, dev);
    assert_eq!(attr.dev, attr.ino);
}

#[test]
fn test_chdir_resolves_relative_paths() {
    let mut fs = fs();
    fs.mkdir("/x", 0o777).unwrap();
    fs.mkdir("/x/y", 0o777).unwrap();
    fs.write_file("/x/y/f", b"rel").unwrap();

    fs.chdir("/x").unwrap();
    assert_eq!(fs.cwd(), "/x");
    assert_eq!(fs.read_file("y/f").unwrap(), b"rel");
    fs.chdir("y").unwrap();
    assert_eq!(fs.cwd(), "/x/y");
    fs.chdir("..").unwrap();
    assert_eq!(fs.cwd(), "/x");
    assert_eq!(fs.chdir("y/f"), Err(FsError::NotADirectory));
}

#[test]
fn test_mmap_and_msync() {
    let mut fs = fs();
    fs.write_file("/f", b"hello world").unwrap();
    let fd = fs.open("/f", O_RDWR, 0).unwrap();

    let region = fs.mmap(fd, 5, 6, PROT_READ | PROT_WRITE, MAP_SHARED).unwrap();
    assert_eq!(region.data, b"world");
    assert!(region.allocated);

    fs.msync(fd, b"WORLD", 6, MAP_SHARED).unwrap();
    fs.close(fd).unwrap();
    assert_eq!(fs.read_file("/f").unwrap(), b"hello WORLD");

    let fd = fs.open("/f", O_WRONLY, 0).unwrap();
    assert!(matches!(
        fs.mmap(fd, 4, 0, PROT_READ, MAP_SHARED),
        Err(FsError::AccessDenied)
    ));
    fs.close(fd).unwrap();
}

#[test]
fn test_allocate_extends_file() {
    let mut fs = fs();
    fs.create("/f", 0o666).unwrap();
    let fd = fs.open("/f", O_RDWR, 0).unwrap();
    fs.allocate(fd, 0, 100).unwrap();
    assert_eq!(fs.fstat(fd).unwrap().size, 100);
    assert_eq!(fs.allocate(fd, -1, 10), Err(FsError::InvalidArgument));
    assert_eq!(fs.allocate(fd, 0, 0), Err(FsError::InvalidArgument));
    fs.close(fd).unwrap();
}

#[test]
fn test_tracked_read_files() {
    let mut fs = Fs::new(FsConfig {
        track_read_files: true,
        ..FsConfig::default()
    })
    .unwrap();
    fs.write_file("/f", b"x").unwrap();
    let fd = fs.open("/f", O_RDONLY, 0).unwrap();
    fs.close(fd).unwrap();
    assert!(fs.tracked_read_files().contains("/f"));
    // Write-only opens are not read intent.
    assert!(!fs.tracked_read_files().contains("/tmp"));
}

#[test]
fn test_standard_streams_occupy_first_descriptors() {
    let mut fs = fs();
    let written: Rc<std::cell::RefCell<Vec<u8>>> = Rc::default();
    let sink = written.clone();
    fs.init_standard_streams(
        None,
        Some(Box::new(move |byte| sink.borrow_mut().push(byte))),
        None,
    )
    .unwrap();

    assert_eq!(fs.write(1, b"out\n", None, false).unwrap(), 4);
    assert_eq!(&*written.borrow(), b"out\n");
    // Default stdin is the terminal device, which is at EOF.
    let mut buf = [0u8; 4];
    assert_eq!(fs.read(0, &mut buf, None).unwrap(), 0);
    // Descriptor 2 exists and is write-only.
    assert_eq!(fs.read(2, &mut buf, None), Err(FsError::BadFileDescriptor));

    fs.quit();
    assert_eq!(fs.write(1, b"x", None, false), Err(FsError::BadFileDescriptor));
}
