//! Module `wal` implement RAM-budgeted write buffers in front of the
//! key-value store.
//!
//! Every column table gets a [Collector]: writes accumulate sorted in RAM
//! and spill to the store when the byte budget is crossed, the remainder
//! drains on flush at the step boundary. A `discard` collector drops
//! everything, used by history-free modes and by tests.

use lazy_static::lazy_static;

use std::collections::BTreeMap;

use crate::{kv::KvTx, Error, Result};

/// Baseline buffer size the default collector budget derives from.
pub const ETL_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Environment variable overriding the per-collector RAM budget. Accepts
/// a byte-size string: "1024", "64KB", "256MB", "1GB".
pub const WAL_RAM_VAR: &str = "STRATA_WAL_RAM";

// per-entry bookkeeping overhead charged against the budget.
const ENTRY_OVERHEAD: usize = 32;

lazy_static! {
    static ref WAL_RAM_BUDGET: usize = {
        match std::env::var(WAL_RAM_VAR) {
            Ok(val) => match parse_byte_size(&val) {
                Ok(n) => n,
                Err(_) => default_budget(),
            },
            Err(_) => default_budget(),
        }
    };
}

fn default_budget() -> usize {
    2 * ETL_BUFFER_SIZE / 8
}

/// Resolve the per-collector RAM budget, environment override included.
pub fn ram_budget() -> usize {
    *WAL_RAM_BUDGET
}

/// Parse a byte-size string, "64MB" and friends.
pub fn parse_byte_size(val: &str) -> Result<usize> {
    let val = val.trim();
    let (digits, mult) = match val.find(|ch: char| !ch.is_ascii_digit()) {
        None => (val, 1),
        Some(n) => {
            let mult = match val[n..].trim().to_uppercase().as_str() {
                "B" => 1,
                "KB" => 1024,
                "MB" => 1024 * 1024,
                "GB" => 1024 * 1024 * 1024,
                unit => return err_at!(InvalidInput, msg: "byte-size unit {:?}", unit),
            };
            (&val[..n], mult)
        }
    };
    let n = err_at!(InvalidInput, digits.parse::<usize>(), "{:?}", val)?;
    Ok(n * mult)
}

/// Buffered writes for one table.
pub struct Collector {
    table: String,
    dup: bool,
    discard: bool,
    budget: usize,

    used: usize,
    buf: BTreeMap<Vec<u8>, Vec<Vec<u8>>>,
}

impl Collector {
    /// `dup` tables keep every distinct value per key, sorted; plain
    /// tables keep the latest value.
    pub fn new(table: &str, dup: bool, budget: usize) -> Collector {
        Collector {
            table: table.to_string(),
            dup,
            discard: false,
            budget,
            used: 0,
            buf: BTreeMap::new(),
        }
    }

    /// A collector that drops all writes.
    pub fn discard(table: &str) -> Collector {
        let mut collector = Collector::new(table, false, 0);
        collector.discard = true;
        collector
    }

    pub fn to_table(&self) -> String {
        self.table.clone()
    }

    pub fn is_discard(&self) -> bool {
        self.discard
    }

    /// Bytes currently held in RAM.
    pub fn footprint(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Buffer one write. Crossing the budget spills the buffer to `tx`
    /// before accepting the entry.
    pub fn collect(&mut self, tx: &dyn KvTx, key: &[u8], value: &[u8]) -> Result<()> {
        if self.discard {
            return Ok(());
        }

        let cost = key.len() + value.len() + ENTRY_OVERHEAD;
        if self.used + cost > self.budget && !self.buf.is_empty() {
            self.flush(tx)?;
        }

        let dups = self.buf.entry(key.to_vec()).or_default();
        if self.dup {
            if let Err(n) = dups.binary_search_by(|d| d.as_slice().cmp(value)) {
                dups.insert(n, value.to_vec());
                self.used += cost;
            }
        } else {
            if dups.is_empty() {
                dups.push(value.to_vec());
            } else {
                dups[0] = value.to_vec();
            }
            self.used += cost;
        }
        Ok(())
    }

    /// Buffered value for `key`, smallest duplicate first.
    pub fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.buf.get(key).and_then(|dups| dups.first())
    }

    /// Whether a write for `key` is sitting in the buffer.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.buf.contains_key(key)
    }

    /// Drain the buffer into `tx`, in key order.
    pub fn flush(&mut self, tx: &dyn KvTx) -> Result<()> {
        for (key, dups) in std::mem::take(&mut self.buf).into_iter() {
            if self.dup {
                for value in dups.into_iter() {
                    tx.put_dup(&self.table, &key, &value)?;
                }
            } else if let Some(value) = dups.into_iter().next_back() {
                tx.put(&self.table, &key, &value)?;
            }
        }
        self.used = 0;
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_test.rs"]
mod wal_test;
