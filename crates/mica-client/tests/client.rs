//! End-to-end filesystem behavior over the full local stack: extent server,
//! lock server, and client.

use mica_client::{FsClient, FsError};
use mica_fs::{ExtentStore, FileType, ROOT_INUM};
use mica_lock::{LockClient, LockServer};
use mica_storage::ExtentServer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

fn stack(name: &str) -> (FsClient, Arc<ExtentServer>) {
    let _ = env_logger::builder().is_test(true).try_init();
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let path: PathBuf = std::env::temp_dir().join(format!(
        "mica-client-{}-{}-{}.log",
        name,
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let ec = Arc::new(ExtentServer::new(path).unwrap());
    let ls = Arc::new(LockServer::new());
    let fs = FsClient::new(ec.clone(), LockClient::new(ls, 1));
    (fs, ec)
}

#[test]
fn root_directory_is_a_formatted_dir_inode() {
    let (fs, ec) = stack("root");
    let attr = ec.getattr(ROOT_INUM).unwrap();
    assert_eq!(attr.ftype, FileType::Dir);
    assert!(fs.isdir(ROOT_INUM));
    assert!(fs.readdir(ROOT_INUM).unwrap().is_empty());
}

#[test]
fn create_lookup_and_duplicate() {
    let (fs, _ec) = stack("create");
    let ino = fs.create(ROOT_INUM, "a.txt").unwrap();
    assert!(ino >= 2);
    assert_eq!(fs.lookup(ROOT_INUM, "a.txt").unwrap(), Some(ino));
    assert_eq!(fs.lookup(ROOT_INUM, "b.txt").unwrap(), None);
    assert_eq!(fs.create(ROOT_INUM, "a.txt"), Err(FsError::Exist));
    assert!(fs.isfile(ino));
    assert!(!fs.isdir(ino));
}

#[test]
fn read_write_at_offsets() {
    let (fs, _ec) = stack("rw");
    let ino = fs.create(ROOT_INUM, "hello.txt").unwrap();
    assert_eq!(fs.write(ino, 0, b"hello").unwrap(), 5);

    assert_eq!(fs.read(ino, 10, 0).unwrap(), b"hello");
    assert_eq!(fs.read(ino, 3, 2).unwrap(), b"llo");
    assert_eq!(fs.read(ino, 1, 5), Err(FsError::Io));
    assert_eq!(fs.getfile(ino).unwrap().size, 5);
}

#[test]
fn write_past_eof_zero_pads_the_hole() {
    let (fs, _ec) = stack("hole");
    let ino = fs.create(ROOT_INUM, "sparse").unwrap();
    fs.write(ino, 10, b"end").unwrap();
    assert_eq!(fs.read(ino, 13, 0).unwrap(), b"\0\0\0\0\0\0\0\0\0\0end");
    assert_eq!(fs.getfile(ino).unwrap().size, 13);
}

#[test]
fn overlapping_write_extends_in_place() {
    let (fs, _ec) = stack("overlap");
    let ino = fs.create(ROOT_INUM, "o").unwrap();
    fs.write(ino, 0, b"hello").unwrap();
    fs.write(ino, 3, b"xyz").unwrap();
    assert_eq!(fs.read(ino, 16, 0).unwrap(), b"helxyz");
}

#[test]
fn setattr_truncates_and_extends() {
    let (fs, _ec) = stack("setattr");
    let ino = fs.create(ROOT_INUM, "t").unwrap();
    fs.write(ino, 0, b"truncate me").unwrap();
    fs.setattr(ino, 8).unwrap();
    assert_eq!(fs.read(ino, 64, 0).unwrap(), b"truncate");
    fs.setattr(ino, 10).unwrap();
    assert_eq!(fs.read(ino, 64, 0).unwrap(), b"truncate\0\0");
    assert_eq!(fs.getfile(ino).unwrap().size, 10);
}

#[test]
fn commit_write_rollback_restores_content() {
    let (fs, _ec) = stack("rollback");
    let ino = fs.create(ROOT_INUM, "versioned").unwrap();
    fs.write(ino, 0, b"committed state").unwrap();
    fs.commit().unwrap();

    fs.write(ino, 0, b"HE").unwrap();
    assert_eq!(fs.read(ino, 64, 0).unwrap(), b"HEmmitted state");
    fs.rollback().unwrap();
    assert_eq!(fs.read(ino, 64, 0).unwrap(), b"committed state");

    fs.forward().unwrap();
    assert_eq!(fs.read(ino, 64, 0).unwrap(), b"HEmmitted state");
}

#[test]
fn rollback_undoes_creates_and_directory_changes() {
    let (fs, _ec) = stack("undo-create");
    fs.commit().unwrap();
    let ino = fs.create(ROOT_INUM, "ephemeral").unwrap();
    assert_eq!(fs.lookup(ROOT_INUM, "ephemeral").unwrap(), Some(ino));

    fs.rollback().unwrap();
    assert_eq!(fs.lookup(ROOT_INUM, "ephemeral").unwrap(), None);
    assert!(!fs.isfile(ino));
}

#[test]
fn mkdir_readdir_and_rmdir() {
    let (fs, _ec) = stack("dirs");
    let sub = fs.mkdir(ROOT_INUM, "sub").unwrap();
    assert!(fs.isdir(sub));
    assert_eq!(fs.mkdir(ROOT_INUM, "sub"), Err(FsError::Exist));

    let file = fs.create(sub, "inner.txt").unwrap();
    let names: Vec<String> = fs
        .readdir(sub)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["inner.txt"]);

    // a populated directory refuses to go
    assert_eq!(fs.rmdir(ROOT_INUM, "sub"), Err(FsError::Io));
    assert_eq!(fs.lookup(ROOT_INUM, "sub").unwrap(), Some(sub));

    fs.unlink(sub, "inner.txt").unwrap();
    assert!(!fs.isfile(file));
    fs.rmdir(ROOT_INUM, "sub").unwrap();
    assert_eq!(fs.lookup(ROOT_INUM, "sub").unwrap(), None);
}

#[test]
fn unlink_applies_to_files_only() {
    let (fs, _ec) = stack("unlink");
    fs.mkdir(ROOT_INUM, "d").unwrap();
    assert_eq!(fs.unlink(ROOT_INUM, "d"), Err(FsError::Io));
    assert_eq!(fs.unlink(ROOT_INUM, "missing"), Err(FsError::Io));

    let ino = fs.create(ROOT_INUM, "f").unwrap();
    fs.write(ino, 0, b"payload").unwrap();
    fs.unlink(ROOT_INUM, "f").unwrap();
    assert_eq!(fs.lookup(ROOT_INUM, "f").unwrap(), None);
    // rmdir refuses files the same way
    let ino2 = fs.create(ROOT_INUM, "g").unwrap();
    assert_eq!(fs.rmdir(ROOT_INUM, "g"), Err(FsError::Io));
    assert!(fs.isfile(ino2));
}

#[test]
fn symlink_round_trip() {
    let (fs, _ec) = stack("symlink");
    let ino = fs.symlink(ROOT_INUM, "/target/path", "link").unwrap();
    assert_eq!(fs.lookup(ROOT_INUM, "link").unwrap(), Some(ino));
    assert_eq!(fs.readslink(ino).unwrap(), "/target/path");
    let info = fs.getslink(ino).unwrap();
    assert_eq!(info.size, 12);
}

#[test]
fn concurrent_creates_do_not_lose_entries() {
    let (fs, _ec) = stack("concurrent");
    let fs = Arc::new(fs);

    let mut handles = Vec::new();
    for t in 0..2 {
        let fs = fs.clone();
        handles.push(thread::spawn(move || {
            for i in 0..10 {
                fs.create(ROOT_INUM, &format!("f-{}-{}", t, i)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(fs.readdir(ROOT_INUM).unwrap().len(), 20);
}
