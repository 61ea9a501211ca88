use super::*;
use crate::kv::Mdb;

fn temp_dir(name: &str) -> ffi::OsString {
    let dir = std::env::temp_dir().join("strata-history-test").join(name);
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir.into_os_string()
}

// write value v_t at every even txnum in [0, upto); previous value is
// recorded at the overwriting txnum.
fn load_history(hist: &mut History, tx: &dyn KvTx, upto: u64) {
    for txnum in (0..upto).step_by(2) {
        hist.set_txnum(txnum);
        let prev = match txnum {
            0 => vec![],
            t => value_at(t - 2),
        };
        hist.add_prev(tx, b"K", &prev).unwrap();
    }
    hist.flush(tx).unwrap();
}

fn value_at(txnum: u64) -> Vec<u8> {
    format!("v{}", txnum).into_bytes()
}

#[test]
fn test_history_recent() {
    let dir = temp_dir("recent");
    let db = Mdb::new("test_history_recent");
    let tx = db.begin();

    let mut hist = History::new(&dir, "accounts", 4, 1024 * 1024, false);
    load_history(&mut hist, &tx, 8);

    let rdr = hist.reader(false);

    // before the first write the key did not exist.
    assert_eq!(rdr.get_before(&tx, b"K", 0).unwrap(), Some(vec![]));
    // value as of txnum 3 was written at txnum 2, recorded as the
    // previous value of the overwrite at txnum 4.
    assert_eq!(rdr.get_before(&tx, b"K", 3).unwrap(), Some(value_at(2)));
    assert_eq!(rdr.get_before(&tx, b"K", 6).unwrap(), Some(value_at(4)));
    // no overwrite at or after txnum 7: latest value applies.
    assert_eq!(rdr.get_before(&tx, b"K", 7).unwrap(), None);
    // unknown key.
    assert_eq!(rdr.get_before(&tx, b"J", 3).unwrap(), None);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_history_frozen() {
    let dir = temp_dir("frozen");
    let db = Mdb::new("test_history_frozen");
    let tx = db.begin();
    let cancel = Cancel::new();

    let mut hist = History::new(&dir, "accounts", 4, 1024 * 1024, false);
    load_history(&mut hist, &tx, 16);

    // freeze steps 0 and 1, prune their store copy.
    for step_num in 0..2_u64 {
        let collation = hist.collate(&tx, step_num, &cancel).unwrap();
        let (v_item, ef_item) = hist.build(&tx, &collation, &cancel).unwrap();
        hist.integrate(v_item, ef_item);
        let n = hist.prune(&tx, step_num * 4, step_num * 4 + 4, &cancel).unwrap();
        assert_eq!(n, 2);
    }
    assert_eq!(hist.prune(&tx, 0, 8, &cancel).unwrap(), 0, "prune converged");

    assert_eq!(hist.as_files().ro_files().len(), 2);
    assert_eq!(hist.as_index().as_files().ro_files().len(), 2);

    // every even txnum in (0, 16] sees the value two txnums back,
    // served from files below txnum 8 and from the store above.
    let rdr = hist.reader(false);
    for t in (2..=16_u64).step_by(2) {
        assert_eq!(
            rdr.get_before(&tx, b"K", t).unwrap(),
            match t {
                16 => None, // nothing overwrites at or after 16
                t => Some(value_at(t - 2)),
            },
            "txnum {}",
            t
        );
    }

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_history_merge() {
    let dir = temp_dir("merge");
    let db = Mdb::new("test_history_merge");
    let tx = db.begin();
    let cancel = Cancel::new();

    let mut hist = History::new(&dir, "storage", 2, 1024 * 1024, false);
    load_history(&mut hist, &tx, 16);
    for step_num in 0..8_u64 {
        let collation = hist.collate(&tx, step_num, &cancel).unwrap();
        let (v_item, ef_item) = hist.build(&tx, &collation, &cancel).unwrap();
        hist.integrate(v_item, ef_item);
        hist.prune(&tx, step_num * 2, step_num * 2 + 2, &cancel).unwrap();
    }

    let (v_retired, ef_retired) = hist.merge_step(&cancel).unwrap().unwrap();
    assert_eq!(v_retired.len(), 8);
    assert_eq!(ef_retired.len(), 8);

    let v_files = hist.as_files().ro_files();
    assert_eq!(v_files.len(), 1);
    assert_eq!((v_files[0].start_txnum, v_files[0].end_txnum), (0, 16));

    // reads identical after the merge.
    let rdr = hist.reader(false);
    for t in (2..14_u64).step_by(2) {
        assert_eq!(
            rdr.get_before(&tx, b"K", t).unwrap(),
            Some(value_at(t - 2)),
            "txnum {}",
            t
        );
    }

    std::fs::remove_dir_all(&dir).unwrap();
}
