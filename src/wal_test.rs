use super::*;
use crate::kv::Mdb;

#[test]
fn test_parse_byte_size() {
    assert_eq!(parse_byte_size("1024").unwrap(), 1024);
    assert_eq!(parse_byte_size("4KB").unwrap(), 4 * 1024);
    assert_eq!(parse_byte_size("64MB").unwrap(), 64 * 1024 * 1024);
    assert_eq!(parse_byte_size("1GB").unwrap(), 1024 * 1024 * 1024);
    assert_eq!(parse_byte_size(" 8 MB ").unwrap(), 8 * 1024 * 1024);
    assert!(parse_byte_size("12TB").is_err());
    assert!(parse_byte_size("abc").is_err());
}

#[test]
fn test_collector_flush() {
    let db = Mdb::new("test_collector_flush");
    let tx = db.begin();

    let mut collector = Collector::new("t", true /*dup*/, 1024 * 1024);
    collector.collect(&tx, b"k", b"b").unwrap();
    collector.collect(&tx, b"k", b"a").unwrap();
    collector.collect(&tx, b"k", b"a").unwrap(); // duplicate, collapsed
    collector.collect(&tx, b"j", b"x").unwrap();

    // nothing in the store until flush.
    assert_eq!(tx.get_one("t", b"k").unwrap(), None);

    collector.flush(&tx).unwrap();
    assert!(collector.is_empty());
    assert_eq!(collector.footprint(), 0);

    let mut cursor = tx.cursor("t").unwrap();
    assert_eq!(
        cursor.seek_exact(b"k").unwrap(),
        Some((b"k".to_vec(), b"a".to_vec()))
    );
    assert_eq!(cursor.count().unwrap(), 3);
}

#[test]
fn test_collector_budget_spill() {
    let db = Mdb::new("test_collector_budget_spill");
    let tx = db.begin();

    // tiny budget, every second entry forces a spill.
    let mut collector = Collector::new("t", false /*dup*/, 100);
    for i in 0..100_u64 {
        let key = i.to_be_bytes();
        collector.collect(&tx, &key, &[0xAB; 40]).unwrap();
        assert!(collector.footprint() <= 100, "budget exceeded");
    }
    collector.flush(&tx).unwrap();

    let mut cursor = tx.cursor("t").unwrap();
    assert_eq!(cursor.count().unwrap(), 100);
}

#[test]
fn test_collector_latest_wins() {
    let db = Mdb::new("test_collector_latest_wins");
    let tx = db.begin();

    let mut collector = Collector::new("t", false /*dup*/, 1024);
    collector.collect(&tx, b"k", b"old").unwrap();
    collector.collect(&tx, b"k", b"new").unwrap();
    collector.flush(&tx).unwrap();

    assert_eq!(tx.get_one("t", b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_collector_discard() {
    let db = Mdb::new("test_collector_discard");
    let tx = db.begin();

    let mut collector = Collector::discard("t");
    collector.collect(&tx, b"k", b"v").unwrap();
    collector.flush(&tx).unwrap();

    assert!(collector.is_discard());
    assert_eq!(tx.get_one("t", b"k").unwrap(), None);
}
