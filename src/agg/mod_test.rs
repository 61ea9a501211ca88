use super::*;
use crate::{
    account::{Account, Balance},
    files::{Ext, FileName},
    kv::Mdb,
    seg,
};

fn temp_dirs(name: &str) -> (ffi::OsString, ffi::OsString) {
    let base = std::env::temp_dir().join("strata-agg-test").join(name);
    std::fs::remove_dir_all(&base).ok();
    let dir = base.join("data");
    let tmp = base.join("tmp");
    (dir.into_os_string(), tmp.into_os_string())
}

fn small_config(name: &str, step: u64) -> Config {
    let (dir, tmp) = temp_dirs(name);
    let mut cfg = Config::new(&dir, &tmp);
    cfg.set_step(step).set_wal_budget(1024 * 1024);
    cfg
}

fn new_agg(cfg: &Config, db: &Mdb) -> Aggregator {
    let mut agg = Aggregator::open(cfg.clone()).unwrap();
    agg.set_tx(Box::new(db.begin()));
    agg
}

// commit the writer transaction and hand the aggregator a fresh one, so
// that reader snapshots observe everything written so far.
fn commit(agg: &mut Aggregator, db: &Mdb) {
    agg.take_tx().unwrap().commit().unwrap();
    agg.set_tx(Box::new(db.begin()));
}

fn view(agg: &Aggregator, db: &Mdb) -> ReaderContext {
    agg.make_context(Box::new(db.view()))
}

fn enc_account(nonce: u64, balance: u64) -> Vec<u8> {
    Account::new(nonce, Balance::from_u64(balance), None, 0).encode()
}

#[test]
fn test_agg_account_lifecycle() {
    let step = 4;
    let cfg = small_config("account_lifecycle", step);
    let db = Mdb::new("test_agg_account_lifecycle");
    let mut agg = new_agg(&cfg, &db);

    // A written at txnum 0, rewritten at txnum 5, finish through txnum 7.
    for txnum in 0..8_u64 {
        agg.set_txnum(txnum);
        match txnum {
            0 => agg.update_account_data(b"A", &enc_account(1, 10)).unwrap(),
            5 => agg.update_account_data(b"A", &enc_account(2, 20)).unwrap(),
            _ => (),
        }
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);

    // the closed step 0 landed on disk with A's old value.
    let loc = FileName::new("accounts", 0, 1, Ext::Kv).to_location(&cfg.dir);
    let decomp = seg::Decompressor::open(&loc).unwrap();
    let words: Vec<Vec<u8>> = decomp.iter().map(|w| w.unwrap().1).collect();
    assert_eq!(words, vec![b"A".to_vec(), enc_account(1, 10)]);

    let ctx = view(&agg, &db);
    assert_eq!(ctx.read_account_data(b"A").unwrap(), Some(enc_account(2, 20)));
    assert_eq!(
        ctx.read_account_data_before_txnum(b"A", 5).unwrap(),
        Some(enc_account(1, 10))
    );
    assert_eq!(ctx.read_account_data_before_txnum(b"A", 0).unwrap(), None);
    assert_eq!(ctx.read_account_data(b"missing").unwrap(), None);

    drop(ctx);
    assert!(!agg.has_pinned_readers());
}

#[test]
fn test_agg_single_key_history() {
    let step = 2;
    let cfg = small_config("single_key", step);
    let db = Mdb::new("test_agg_single_key_history");
    let mut agg = new_agg(&cfg, &db);

    // one key rewritten at every even txnum across 64 steps.
    for txnum in 0..128_u64 {
        agg.set_txnum(txnum);
        if txnum % 2 == 0 {
            agg.update_account_data(b"K", &enc_account(txnum, txnum)).unwrap();
        }
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);

    // merging stopped at the frozen size: steps 0-32 in one file.
    let frozen = agg
        .accounts
        .as_files()
        .ro_files()
        .into_iter()
        .find(|item| item.frozen)
        .expect("frozen accounts slice");
    assert_eq!((frozen.start_txnum, frozen.end_txnum), (0, 32 * step));
    let loc = FileName::new("accounts", 0, 32, Ext::Kv).to_location(&cfg.dir);
    assert!(std::path::Path::new(&loc).exists());

    // the value as of any even txnum is the one written two back.
    let ctx = view(&agg, &db);
    for t in (2..=126_u64).step_by(2) {
        assert_eq!(
            ctx.read_account_data_before_txnum(b"K", t).unwrap(),
            Some(enc_account(t - 2, t - 2)),
            "txnum {}",
            t
        );
    }
    assert_eq!(ctx.read_account_data_before_txnum(b"K", 0).unwrap(), None);
}

#[test]
fn test_agg_storage_merge() {
    let step = 4;
    let cfg = small_config("storage_merge", step);
    let db = Mdb::new("test_agg_storage_merge");
    let mut agg = new_agg(&cfg, &db);

    // eight steps of storage writes, aggregated as txnums advance.
    for txnum in 0..(9 * step) {
        agg.set_txnum(txnum);
        agg.write_account_storage(b"AA", &txnum.to_be_bytes(), b"v").unwrap();
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);

    // the merge loop folded the eight 1-step slices into [0, 8 steps).
    let files = agg.storage.as_files().ro_files();
    assert_eq!(files.len(), 1);
    assert_eq!((files[0].start_txnum, files[0].end_txnum), (0, 8 * step));

    // merged-away inputs are gone from disk.
    let loc = FileName::new("storage", 0, 1, Ext::Kv).to_location(&cfg.dir);
    assert!(!std::path::Path::new(&loc).exists());

    // reads are served identically through the merged slice.
    let ctx = view(&agg, &db);
    for txnum in 0..(8 * step) {
        assert_eq!(
            ctx.read_account_storage(b"AA", &txnum.to_be_bytes()).unwrap(),
            Some(b"v".to_vec()),
            "slot {}",
            txnum
        );
    }
}

#[test]
fn test_agg_prefix_iteration() {
    let step = 4;
    let cfg = small_config("prefix_iteration", step);
    let db = Mdb::new("test_agg_prefix_iteration");
    let mut agg = new_agg(&cfg, &db);

    // 100 slots under one address, split across three steps, a few
    // rewritten later with latest-wins expectations.
    let mut txnum = 0;
    for i in 0..100_u64 {
        agg.set_txnum(txnum);
        agg.write_account_storage(b"AA", &i.to_be_bytes(), format!("v{}", i).as_bytes())
            .unwrap();
        agg.finish_tx().unwrap();
        if i % 33 == 32 {
            txnum += step; // hop into the next step now and then
        }
    }
    for txnum in txnum..(4 * step) {
        agg.set_txnum(txnum);
        if txnum == 3 * step {
            agg.write_account_storage(b"AA", &7_u64.to_be_bytes(), b"rewritten").unwrap();
            agg.write_account_storage(b"BB", &0_u64.to_be_bytes(), b"other").unwrap();
        }
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);

    let ctx = view(&agg, &db);
    let got: Vec<(Vec<u8>, Vec<u8>)> = ctx
        .storage_prefix_iter(b"AA")
        .unwrap()
        .map(|pair| pair.unwrap())
        .collect();
    assert_eq!(got.len(), 100);
    for (i, (key, value)) in got.iter().enumerate() {
        let mut want_key = b"AA".to_vec();
        want_key.extend_from_slice(&(i as u64).to_be_bytes());
        assert_eq!(key, &want_key);
        let want_value = match i {
            7 => b"rewritten".to_vec(),
            i => format!("v{}", i).into_bytes(),
        };
        assert_eq!(value, &want_value, "slot {}", i);
    }
}

#[test]
fn test_agg_log_index() {
    let step = 4;
    let cfg = small_config("log_index", step);
    let db = Mdb::new("test_agg_log_index");
    let mut agg = new_agg(&cfg, &db);

    for txnum in 0..48_u64 {
        agg.set_txnum(txnum);
        if let 3 | 17 | 42 = txnum {
            agg.add_log_addr(b"X").unwrap();
            if txnum == 17 {
                agg.add_log_addr(b"X").unwrap(); // duplicate, collapsed
            }
            agg.add_log_topic(b"T").unwrap();
            agg.add_trace_from(b"F").unwrap();
            agg.add_trace_to(b"O").unwrap();
        }
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);

    let ctx = view(&agg, &db);
    let collect = |iter: TxnumIter| -> Vec<u64> { iter.map(|t| t.unwrap()).collect() };

    assert_eq!(collect(ctx.log_addr_iter(b"X", 0, 50).unwrap()), vec![3, 17, 42]);
    assert_eq!(collect(ctx.log_addr_iter(b"X", 4, 42).unwrap()), vec![17]);
    assert_eq!(collect(ctx.log_topic_iter(b"T", 0, 50).unwrap()), vec![3, 17, 42]);
    assert_eq!(collect(ctx.trace_from_iter(b"F", 0, 50).unwrap()), vec![3, 17, 42]);
    assert_eq!(collect(ctx.trace_to_iter(b"O", 0, 50).unwrap()), vec![3, 17, 42]);
    assert_eq!(collect(ctx.log_addr_iter(b"Y", 0, 50).unwrap()), vec![]);
}

#[test]
fn test_agg_empty_step() {
    let step = 4;
    let cfg = small_config("empty_step", step);
    let db = Mdb::new("test_agg_empty_step");
    let mut agg = new_agg(&cfg, &db);
    let roots = agg.aggregated_roots().unwrap();

    // writes in step 0 and step 2 only; step 1 stays empty.
    for txnum in 0..(4 * step) {
        agg.set_txnum(txnum);
        if txnum / step == 0 || txnum / step == 2 {
            agg.update_account_data(b"A", &enc_account(txnum, 1)).unwrap();
        }
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);

    let emitted: Vec<u64> = roots.try_iter().map(|(step_num, _)| step_num).collect();
    assert_eq!(emitted, vec![0, 2], "empty step 1 must not emit");

    // the empty step produced no files either.
    let loc = FileName::new("accounts", 1, 2, Ext::Kv).to_location(&cfg.dir);
    assert!(!std::path::Path::new(&loc).exists());
}

#[test]
fn test_agg_delete_account() {
    let step = 4;
    let cfg = small_config("delete_account", step);
    let db = Mdb::new("test_agg_delete_account");
    let mut agg = new_agg(&cfg, &db);

    agg.set_txnum(0);
    agg.update_account_data(b"A", &enc_account(1, 1)).unwrap();
    agg.update_account_code(b"A", b"code").unwrap();
    agg.write_account_storage(b"A", b"L1", b"s1").unwrap();
    agg.write_account_storage(b"A", b"L2", b"s2").unwrap();
    agg.finish_tx().unwrap();

    agg.set_txnum(1);
    agg.delete_account(b"A").unwrap();
    agg.finish_tx().unwrap();
    commit(&mut agg, &db);

    let ctx = view(&agg, &db);
    assert_eq!(ctx.read_account_data(b"A").unwrap(), None);
    assert_eq!(ctx.read_account_code(b"A").unwrap(), None);
    assert_eq!(ctx.read_account_storage(b"A", b"L1").unwrap(), None);
    assert_eq!(ctx.read_account_storage(b"A", b"L2").unwrap(), None);

    // the pre-delete state stays reachable through history.
    assert_eq!(
        ctx.read_account_data_before_txnum(b"A", 1).unwrap(),
        Some(enc_account(1, 1))
    );
    assert_eq!(
        ctx.read_account_storage_before_txnum(b"A", b"L1", 1).unwrap(),
        Some(b"s1".to_vec())
    );
    assert_eq!(ctx.read_account_code_before_txnum(b"A", 1).unwrap(), Some(b"code".to_vec()));
}

fn write_workload(agg: &mut Aggregator, txnum: u64) {
    let addr = [b'A' + (txnum % 3) as u8];
    agg.update_account_data(&addr, &enc_account(txnum, txnum * 7)).unwrap();
    if txnum % 5 == 0 {
        agg.write_account_storage(&addr, b"L", &txnum.to_be_bytes()).unwrap();
    }
}

#[test]
fn test_agg_recovery_replay() {
    let step = 4;
    let total = 12 * step; // 12 steps worth of txnums

    // clean run, one uninterrupted aggregator.
    let cfg_clean = small_config("recovery_clean", step);
    let db_clean = Mdb::new("test_agg_recovery_clean");
    let mut clean = new_agg(&cfg_clean, &db_clean);
    for txnum in 0..total {
        clean.set_txnum(txnum);
        write_workload(&mut clean, txnum);
        clean.finish_tx().unwrap();
    }
    let clean_root = clean.compute_commitment(false, false).unwrap();

    // interrupted run: stop mid step 9, reopen, replay from the marker.
    let cfg = small_config("recovery_crash", step);
    let db = Mdb::new("test_agg_recovery_crash");
    let mut agg = new_agg(&cfg, &db);
    let stop = 9 * step + 2;
    for txnum in 0..stop {
        agg.set_txnum(txnum);
        write_workload(&mut agg, txnum);
        agg.finish_tx().unwrap();
    }
    commit(&mut agg, &db);
    drop(agg.close());

    let mut agg = new_agg(&cfg, &db);
    let (_block, marker_txnum) = agg.seek_commitment().unwrap();
    // the last boundary before the crash saved the marker.
    assert_eq!(marker_txnum, 9 * step - 1);
    assert_eq!(agg.to_txnum(), 9 * step);

    // files through step 7 were already built before the crash.
    assert!(agg.to_seek_txnum() >= 8 * step);

    for txnum in agg.to_txnum()..total {
        agg.set_txnum(txnum);
        write_workload(&mut agg, txnum);
        agg.finish_tx().unwrap();
    }
    let replay_root = agg.compute_commitment(false, false).unwrap();

    assert_eq!(replay_root, clean_root, "recovery must converge");
}

#[test]
fn test_agg_commitment_modes() {
    let step = 4;

    // mode None never computes anything.
    let mut cfg = small_config("mode_none", step);
    cfg.set_commitment_mode(CommitmentMode::None);
    let db = Mdb::new("test_agg_mode_none");
    let mut agg = new_agg(&cfg, &db);
    agg.set_txnum(0);
    agg.update_account_data(b"A", &enc_account(1, 1)).unwrap();
    agg.finish_tx().unwrap();
    assert_eq!(
        agg.compute_commitment(false, false).unwrap(),
        commitment::empty_root()
    );

    // identical inputs yield identical roots, for either trie fanout.
    for variant in [TrieVariant::HexNibble, TrieVariant::BinNibble].iter() {
        let mut roots = vec![];
        for run in 0..2 {
            let mut cfg =
                small_config(&format!("mode_direct_{:?}_{}", variant, run), step);
            cfg.set_trie_variant(*variant);
            let db = Mdb::new("test_agg_mode_direct");
            let mut agg = new_agg(&cfg, &db);
            for txnum in 0..(2 * step) {
                agg.set_txnum(txnum);
                write_workload(&mut agg, txnum);
                agg.finish_tx().unwrap();
            }
            roots.push(agg.compute_commitment(false, false).unwrap());
        }
        assert_eq!(roots[0], roots[1], "{:?}", variant);
        assert_ne!(roots[0], commitment::empty_root());
    }
}
