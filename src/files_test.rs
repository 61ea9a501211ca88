use std::convert::TryFrom;

use super::*;
use crate::{btidx::BtIndex, mph::Mph, seg};

fn write_slice(dir: &ffi::OsStr, base: &str, from_step: u64, to_step: u64) {
    let fname = |ext| FileName::new(base, from_step, to_step, ext).to_location(dir);

    let mut builder = seg::Builder::create(&fname(Ext::Kv), seg::FLUSH_QUEUE_SIZE).unwrap();
    let mut pairs = vec![];
    for i in 0..10_u64 {
        let key = i.to_be_bytes().to_vec();
        let fpos = builder.add_word(&key).unwrap();
        builder.add_word(b"value").unwrap();
        pairs.push((key, fpos));
    }
    builder.finish(seg::Stats::default()).unwrap();

    Mph::build(&pairs).unwrap().write(&fname(Ext::Kvi)).unwrap();
    BtIndex::build(&pairs).write(&fname(Ext::Bt)).unwrap();
}

fn temp_dir(name: &str) -> ffi::OsString {
    let dir = std::env::temp_dir().join("strata-files-test").join(name);
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir.into_os_string()
}

#[test]
fn test_file_name() {
    let fname = FileName::new("accounts", 0, 1, Ext::Kv);
    assert_eq!(fname.to_string(), "accounts.0-1.kv");

    let fname = FileName::try_from("storage.8-16.ef").unwrap();
    assert_eq!(fname.base, "storage");
    assert_eq!(fname.from_step, 8);
    assert_eq!(fname.to_step, 16);
    assert_eq!(fname.ext, Ext::Ef);

    assert!(FileName::try_from("storage.8-16.dat").is_err());
    assert!(FileName::try_from("storage.16.ef").is_err());
    assert!(FileName::try_from("storage.a-b.ef").is_err());
    assert!(FileName::try_from("not-a-slice").is_err());
}

#[test]
fn test_registry_scan() {
    let dir = temp_dir("scan");
    let step = 4;

    write_slice(&dir, "accounts", 0, 1);
    write_slice(&dir, "accounts", 1, 2);
    write_slice(&dir, "storage", 0, 1); // different base, ignored here

    // missing siblings: only the data file exists.
    let loc = FileName::new("accounts", 2, 3, Ext::Kv).to_location(&dir);
    let builder = seg::Builder::create(&loc, seg::FLUSH_QUEUE_SIZE).unwrap();
    builder.finish(seg::Stats::default()).unwrap();

    let set = FileSet::new(&dir, "accounts", FileKind::Values, step);
    set.scan_dir().unwrap();

    let items = set.walk();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].start_txnum, 0);
    assert_eq!(items[0].end_txnum, 4);
    assert_eq!(items[1].start_txnum, 4);
    assert_eq!(items[1].end_txnum, 8);
    assert!(!items[0].frozen);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_registry_frozen_subsume() {
    let dir = temp_dir("subsume");
    let step = 4;

    write_slice(&dir, "accounts", 0, 32); // frozen
    write_slice(&dir, "accounts", 0, 8); // subset, stale
    write_slice(&dir, "accounts", 8, 16); // subset, stale
    write_slice(&dir, "accounts", 32, 33); // outside

    let set = FileSet::new(&dir, "accounts", FileKind::Values, step);
    set.scan_dir().unwrap();

    let items = set.walk();
    assert_eq!(items.len(), 2);
    assert_eq!((items[0].start_txnum, items[0].end_txnum), (0, 32 * step));
    assert!(items[0].frozen);
    assert_eq!(
        (items[1].start_txnum, items[1].end_txnum),
        (32 * step, 33 * step)
    );

    // subsumed files are gone from disk.
    let loc = FileName::new("accounts", 0, 8, Ext::Kv).to_location(&dir);
    assert!(!path::Path::new(&loc).exists());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_registry_retire_with_readers() {
    let dir = temp_dir("retire");
    let step = 4;

    write_slice(&dir, "accounts", 0, 1);
    write_slice(&dir, "accounts", 1, 2);

    let set = FileSet::new(&dir, "accounts", FileKind::Values, step);
    set.scan_dir().unwrap();

    // a reader pins the current projection.
    let pinned = set.pin_snapshot();
    assert_eq!(pinned.len(), 2);
    assert_eq!(pinned[0].to_refcount(), 1);

    // merge retires the first item while the reader is live.
    let retired = vec![pinned[0].clone()];
    set.retire(&retired);

    assert_eq!(set.ro_files().len(), 1);
    assert!(retired[0].is_can_delete());
    let loc = FileName::new("accounts", 0, 1, Ext::Kv).to_location(&dir);
    assert!(path::Path::new(&loc).exists(), "reader still pins the file");

    // reader releases; files go away.
    for item in pinned.iter() {
        if item.unpin() {
            item.remove_files();
        }
    }
    assert!(!path::Path::new(&loc).exists());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_item_ordering() {
    let dir = temp_dir("ordering");
    let step = 4;

    write_slice(&dir, "accounts", 0, 1);
    write_slice(&dir, "accounts", 1, 2);
    write_slice(&dir, "accounts", 0, 2);

    let set = FileSet::new(&dir, "accounts", FileKind::Values, step);
    set.scan_dir().unwrap();

    let items = set.walk();
    let spans: Vec<(u64, u64)> = items
        .iter()
        .map(|item| (item.start_txnum / step, item.end_txnum / step))
        .collect();
    // ascending end, descending start; reversed iteration puts the
    // merged slice ahead of its parts.
    assert_eq!(spans, vec![(0, 1), (1, 2), (0, 2)]);

    assert!(items[0].is_subset_of(&items[2]));
    assert!(items[1].is_subset_of(&items[2]));
    assert!(!items[2].is_subset_of(&items[2]));

    std::fs::remove_dir_all(&dir).unwrap();
}
