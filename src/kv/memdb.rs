//! Module `memdb` implement the in-memory provider for the [KvTx] contract.
//!
//! [Mdb] keeps every table as a copy-on-write snapshot behind a spinlock.
//! Read handles share the snapshot without copying. The write handle
//! clones a table lazily the first time it touches it, and publishes the
//! whole snapshot back on commit. Writers are expected to be serialized
//! by the caller, the engine is single-writer by contract.

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, Mutex},
};

use crate::{
    kv::{CursorDupSort, KvPair, KvTx},
    util::Spinlock,
    Error, Result,
};

type Dups = Vec<Vec<u8>>; // sorted, de-duplicated
type Table = BTreeMap<Vec<u8>, Dups>;
type Tables = BTreeMap<String, Arc<Table>>;

#[derive(Default)]
struct Inner {
    tables: Tables,
}

/// In-memory store of named dup-sorted tables.
///
/// Cloning an Mdb shares the underlying snapshot, similar to how
/// file-backed stores share a single environment.
#[derive(Clone)]
pub struct Mdb {
    name: String,

    mu: Arc<Mutex<u32>>,
    inner: Arc<Spinlock<Arc<Inner>>>,
}

impl Mdb {
    pub fn new(name: &str) -> Mdb {
        Mdb {
            name: name.to_string(),
            mu: Arc::new(Mutex::new(0)),
            inner: Arc::new(Spinlock::new(Arc::new(Inner::default()))),
        }
    }

    /// Identify this store instance.
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Begin a read-write transaction. There shall be only one writer
    /// at a time.
    pub fn begin(&self) -> MemTx {
        let inner = Arc::clone(&self.inner.read());
        MemTx {
            db: self.clone(),
            write: true,
            tables: Mutex::new(inner.tables.clone()),
        }
    }

    /// Begin a read-only transaction, a zero-copy snapshot of the store.
    pub fn view(&self) -> MemTx {
        let inner = Arc::clone(&self.inner.read());
        MemTx {
            db: self.clone(),
            write: false,
            tables: Mutex::new(inner.tables.clone()),
        }
    }

    fn apply(&self, tables: Tables) {
        let _w = self.mu.lock();
        *self.inner.write() = Arc::new(Inner { tables });
    }
}

/// Transaction handle over [Mdb]. Read handles see the snapshot taken
/// at creation, the write handle additionally sees its own writes.
pub struct MemTx {
    db: Mdb,
    write: bool,
    tables: Mutex<Tables>,
}

impl MemTx {
    fn read_table<R, F>(&self, table: &str, callb: F) -> R
    where
        F: FnOnce(Option<&Table>) -> R,
    {
        let tables = self.tables.lock().unwrap();
        callb(tables.get(table).map(|t| t.as_ref()))
    }

    fn write_table<R, F>(&self, table: &str, callb: F) -> Result<R>
    where
        F: FnOnce(&mut Table) -> R,
    {
        if !self.write {
            return err_at!(InvalidInput, msg: "write on read-only tx");
        }
        let mut tables = self.tables.lock().unwrap();
        let t = tables.entry(table.to_string()).or_default();
        Ok(callb(Arc::make_mut(t)))
    }
}

impl KvTx for MemTx {
    fn get_one(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let val = self.read_table(table, |t| {
            t.and_then(|t| t.get(key)).and_then(|dups| dups.first().cloned())
        });
        Ok(val)
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_table(table, |t| {
            t.insert(key.to_vec(), vec![value.to_vec()]);
        })
    }

    fn put_dup(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_table(table, |t| {
            let dups = t.entry(key.to_vec()).or_default();
            if let Err(n) = dups.binary_search_by(|d| d.as_slice().cmp(value)) {
                dups.insert(n, value.to_vec());
            }
        })
    }

    fn delete(&self, table: &str, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.write_table(table, |t| match value {
            Some(value) => {
                let empty = match t.get_mut(key) {
                    Some(dups) => {
                        if let Ok(n) = dups.binary_search_by(|d| d.as_slice().cmp(value))
                        {
                            dups.remove(n);
                        }
                        dups.is_empty()
                    }
                    None => false,
                };
                if empty {
                    t.remove(key);
                }
            }
            None => {
                t.remove(key);
            }
        })
    }

    fn cursor<'a>(&'a self, table: &str) -> Result<Box<dyn CursorDupSort + 'a>> {
        let cursor = MemCursor {
            tx: self,
            table: table.to_string(),
            pos: Pos::Unset,
        };
        Ok(Box::new(cursor))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.write {
            let db = self.db.clone();
            db.apply(self.tables.into_inner().unwrap());
        }
        Ok(())
    }
}

enum Pos {
    Unset,
    At(Vec<u8>, Vec<u8>),
    // delete_current() computes its successor up front; next() shall
    // resume there.
    Pending(Option<KvPair>),
}

struct MemCursor<'a> {
    tx: &'a MemTx,
    table: String,
    pos: Pos,
}

impl<'a> MemCursor<'a> {
    fn set_at(&mut self, pair: Option<KvPair>) -> Option<KvPair> {
        match &pair {
            Some((key, val)) => self.pos = Pos::At(key.clone(), val.clone()),
            None => self.pos = Pos::Unset,
        }
        pair
    }

    fn current(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        match &self.pos {
            Pos::At(key, val) => Ok((key.clone(), val.clone())),
            _ => err_at!(InvalidInput, msg: "cursor not positioned"),
        }
    }

    // smallest (key, val) strictly greater than the given pair, in
    // (key asc, dup asc) order.
    fn successor(&self, key: &[u8], val: &[u8], same_key: bool) -> Option<KvPair> {
        self.tx.read_table(&self.table, |t| {
            let t = t?;
            if let Some(dups) = t.get(key) {
                let n = match dups.binary_search_by(|d| d.as_slice().cmp(val)) {
                    Ok(n) => n + 1,
                    Err(n) => n,
                };
                if let Some(dup) = dups.get(n) {
                    return Some((key.to_vec(), dup.clone()));
                }
            }
            if same_key {
                return None;
            }
            let bounds = (Bound::Excluded(key.to_vec()), Bound::<Vec<u8>>::Unbounded);
            t.range(bounds)
                .next()
                .map(|(k, dups)| (k.clone(), dups[0].clone()))
        })
    }

    fn next_key(&self, key: &[u8]) -> Option<KvPair> {
        self.tx.read_table(&self.table, |t| {
            let bounds = (Bound::Excluded(key.to_vec()), Bound::<Vec<u8>>::Unbounded);
            t?.range(bounds)
                .next()
                .map(|(k, dups)| (k.clone(), dups[0].clone()))
        })
    }
}

impl<'a> CursorDupSort for MemCursor<'a> {
    fn first(&mut self) -> Result<Option<KvPair>> {
        let pair = self.tx.read_table(&self.table, |t| {
            t.and_then(|t| t.iter().next())
                .map(|(k, dups)| (k.clone(), dups[0].clone()))
        });
        Ok(self.set_at(pair))
    }

    fn next(&mut self) -> Result<Option<KvPair>> {
        match std::mem::replace(&mut self.pos, Pos::Unset) {
            Pos::Unset => self.first(),
            Pos::At(key, val) => {
                let pair = self.successor(&key, &val, false /*same_key*/);
                self.pos = Pos::At(key, val);
                match pair {
                    Some(pair) => Ok(self.set_at(Some(pair))),
                    None => Ok(None), // cursor stays at the last pair
                }
            }
            Pos::Pending(pair) => Ok(self.set_at(pair)),
        }
    }

    fn next_no_dup(&mut self) -> Result<Option<KvPair>> {
        match &self.pos {
            Pos::Unset => self.first(),
            Pos::Pending(_) => match self.next()? {
                Some(pair) => Ok(Some(pair)),
                None => Ok(None),
            },
            Pos::At(key, _) => {
                let pair = self.next_key(&key.clone());
                Ok(self.set_at(pair))
            }
        }
    }

    fn next_dup(&mut self) -> Result<Option<KvPair>> {
        let (key, val) = self.current()?;
        let pair = self.successor(&key, &val, true /*same_key*/);
        match pair {
            Some(pair) => Ok(self.set_at(Some(pair))),
            None => Ok(None), // cursor stays where it is
        }
    }

    fn prev_dup(&mut self) -> Result<Option<KvPair>> {
        let (key, val) = self.current()?;
        let pair = self.tx.read_table(&self.table, |t| {
            let dups = t?.get(&key)?;
            let n = match dups.binary_search_by(|d| d.as_slice().cmp(&val)) {
                Ok(n) | Err(n) => n,
            };
            match n {
                0 => None,
                n => Some((key.clone(), dups[n - 1].clone())),
            }
        });
        match pair {
            Some(pair) => Ok(self.set_at(Some(pair))),
            None => Ok(None),
        }
    }

    fn seek(&mut self, key: &[u8]) -> Result<Option<KvPair>> {
        let pair = self.tx.read_table(&self.table, |t| {
            t.and_then(|t| t.range(key.to_vec()..).next())
                .map(|(k, dups)| (k.clone(), dups[0].clone()))
        });
        Ok(self.set_at(pair))
    }

    fn seek_exact(&mut self, key: &[u8]) -> Result<Option<KvPair>> {
        let pair = self.tx.read_table(&self.table, |t| {
            t.and_then(|t| t.get(key))
                .map(|dups| (key.to_vec(), dups[0].clone()))
        });
        Ok(self.set_at(pair))
    }

    fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let pair = self.tx.read_table(&self.table, |t| {
            let dups = t?.get(key)?;
            let n = match dups.binary_search_by(|d| d.as_slice().cmp(value)) {
                Ok(n) | Err(n) => n,
            };
            dups.get(n).map(|dup| (key.to_vec(), dup.clone()))
        });
        Ok(self.set_at(pair).map(|(_, val)| val))
    }

    fn last_dup(&mut self) -> Result<Option<Vec<u8>>> {
        let (key, _) = self.current()?;
        let val = self.tx.read_table(&self.table, |t| {
            t.and_then(|t| t.get(&key)).and_then(|dups| dups.last().cloned())
        });
        Ok(val)
    }

    fn count(&mut self) -> Result<usize> {
        let n = self.tx.read_table(&self.table, |t| {
            t.map(|t| t.values().map(|dups| dups.len()).sum()).unwrap_or(0)
        });
        Ok(n)
    }

    fn delete_current(&mut self) -> Result<()> {
        let (key, val) = self.current()?;
        let succ = self.successor(&key, &val, false /*same_key*/);
        self.tx.delete(&self.table, &key, Some(&val))?;
        self.pos = Pos::Pending(succ);
        Ok(())
    }

    fn delete_current_duplicates(&mut self) -> Result<()> {
        let (key, _) = self.current()?;
        let succ = self.next_key(&key);
        self.tx.delete(&self.table, &key, None)?;
        self.pos = Pos::Pending(succ);
        Ok(())
    }

    fn range_dup_sort(
        &mut self,
        key: &[u8],
        asc: bool,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let mut dups = self.tx.read_table(&self.table, |t| {
            t.and_then(|t| t.get(key)).cloned().unwrap_or_default()
        });
        if !asc {
            dups.reverse();
        }
        if limit > 0 {
            dups.truncate(limit);
        }
        Ok(dups)
    }
}

#[cfg(test)]
#[path = "memdb_test.rs"]
mod memdb_test;
