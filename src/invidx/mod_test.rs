use super::*;
use crate::kv::Mdb;

fn temp_dir(name: &str) -> ffi::OsString {
    let dir = std::env::temp_dir().join("strata-invidx-test").join(name);
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir.into_os_string()
}

fn collect(iter: TxnumIter) -> Vec<u64> {
    iter.map(|txnum| txnum.unwrap()).collect()
}

#[test]
fn test_invidx_recent_posts() {
    let dir = temp_dir("recent");
    let db = Mdb::new("test_invidx_recent_posts");
    let tx = db.begin();

    let mut ii = InvertedIndex::new(&dir, "logaddrs", 4, 1024 * 1024, false);
    for txnum in [3_u64, 17, 17, 42].iter() {
        ii.set_txnum(*txnum);
        ii.add(&tx, b"X").unwrap();
    }
    ii.set_txnum(5);
    ii.add(&tx, b"Y").unwrap();
    ii.flush(&tx).unwrap();

    let rdr = ii.reader(false);
    assert_eq!(collect(rdr.iter(&tx, b"X", 0, 50).unwrap()), vec![3, 17, 42]);
    assert_eq!(collect(rdr.iter(&tx, b"X", 4, 42).unwrap()), vec![17]);
    assert_eq!(collect(rdr.iter(&tx, b"Y", 0, 50).unwrap()), vec![5]);
    assert_eq!(collect(rdr.iter(&tx, b"Z", 0, 50).unwrap()), vec![]);

    assert_eq!(rdr.seek(&tx, b"X", 0).unwrap(), Some(3));
    assert_eq!(rdr.seek(&tx, b"X", 18).unwrap(), Some(42));
    assert_eq!(rdr.seek(&tx, b"X", 43).unwrap(), None);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invidx_collate_build_prune() {
    let dir = temp_dir("collate");
    let db = Mdb::new("test_invidx_collate_build_prune");
    let tx = db.begin();
    let cancel = Cancel::new();

    let mut ii = InvertedIndex::new(&dir, "logaddrs", 4, 1024 * 1024, false);
    // step 0: txnums 0..4, step 1: txnums 4..8
    for txnum in 0..8_u64 {
        ii.set_txnum(txnum);
        ii.add(&tx, b"every").unwrap();
        if txnum % 2 == 0 {
            ii.add(&tx, b"even").unwrap();
        }
    }
    ii.flush(&tx).unwrap();

    let collation = ii.collate(&tx, 0, &cancel).unwrap();
    assert_eq!(collation.txfrom, 0);
    assert_eq!(collation.txto, 4);
    assert_eq!(collation.postings(b"every"), vec![0, 1, 2, 3]);
    assert_eq!(collation.postings(b"even"), vec![0, 2]);
    assert_eq!(collation.postings(b"missing"), Vec::<u64>::new());

    let item = ii.build(&collation, &cancel).unwrap();
    assert_eq!((item.start_txnum, item.end_txnum), (0, 4));
    ii.integrate(item);

    let victims = ii.prune(&tx, 0, 4, &cancel).unwrap();
    assert_eq!(victims.len(), 6);
    // pruning again converges to nothing.
    assert_eq!(ii.prune(&tx, 0, 4, &cancel).unwrap().len(), 0);

    // reads stay identical after prune: file serves [0, 4), store [4, 8).
    assert_eq!(ii.as_files().ro_files().len(), 1);
    let rdr = ii.reader(false);
    assert_eq!(
        collect(rdr.iter(&tx, b"every", 0, 100).unwrap()),
        (0..8).collect::<Vec<u64>>()
    );
    assert_eq!(collect(rdr.iter(&tx, b"even", 0, 100).unwrap()), vec![0, 2, 4, 6]);
    assert_eq!(rdr.seek(&tx, b"even", 1).unwrap(), Some(2));
    assert_eq!(rdr.seek(&tx, b"even", 5).unwrap(), Some(6));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invidx_merge() {
    let dir = temp_dir("merge");
    let db = Mdb::new("test_invidx_merge");
    let tx = db.begin();
    let cancel = Cancel::new();

    let mut ii = InvertedIndex::new(&dir, "tracesfrom", 2, 1024 * 1024, false);
    for step_num in 0..4_u64 {
        for txnum in (step_num * 2)..(step_num * 2 + 2) {
            ii.set_txnum(txnum);
            ii.add(&tx, b"K").unwrap();
        }
        ii.flush(&tx).unwrap();
        let collation = ii.collate(&tx, step_num, &cancel).unwrap();
        let item = ii.build(&collation, &cancel).unwrap();
        ii.integrate(item);
        ii.prune(&tx, step_num * 2, step_num * 2 + 2, &cancel).unwrap();
    }
    assert_eq!(ii.as_files().ro_files().len(), 4);

    // one merge pass folds the four 1-step files into [0, 8).
    let retired = ii.merge_step(&cancel).unwrap().unwrap();
    assert_eq!(retired.len(), 4);
    let files = ii.as_files().ro_files();
    assert_eq!(files.len(), 1);
    assert_eq!((files[0].start_txnum, files[0].end_txnum), (0, 8));

    // reads identical before and after the merge.
    assert_eq!(
        collect(ii.reader(false).iter(&tx, b"K", 0, 100).unwrap()),
        (0..8).collect::<Vec<u64>>()
    );

    // nothing left to merge.
    assert!(ii.merge_step(&cancel).unwrap().is_none());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invidx_cancel() {
    let dir = temp_dir("cancel");
    let db = Mdb::new("test_invidx_cancel");
    let tx = db.begin();

    let mut ii = InvertedIndex::new(&dir, "logtopics", 4, 1024 * 1024, false);
    ii.set_txnum(1);
    ii.add(&tx, b"T").unwrap();
    ii.flush(&tx).unwrap();

    let cancel = Cancel::new();
    cancel.cancel();
    assert!(ii.collate(&tx, 0, &cancel).is_err());
    assert!(ii.prune(&tx, 0, 4, &cancel).is_err());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invidx_discard_wal() {
    let dir = temp_dir("discard");
    let db = Mdb::new("test_invidx_discard_wal");
    let tx = db.begin();

    let mut ii = InvertedIndex::new(&dir, "logaddrs", 4, 1024 * 1024, true /*discard*/);
    ii.set_txnum(1);
    ii.add(&tx, b"X").unwrap();
    ii.flush(&tx).unwrap();

    assert_eq!(collect(ii.reader(false).iter(&tx, b"X", 0, 10).unwrap()), vec![]);

    std::fs::remove_dir_all(&dir).unwrap();
}
