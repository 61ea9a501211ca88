//! Strata aggregate a continuous stream of per-transaction state mutations
//! into a layered set of immutable on-disk files, while serving point-in-time
//! reads at any historical transaction.
//!
//! Every mutation is stamped with a caller supplied, monotonically increasing
//! transaction number, `txnum`. A fixed window of txnums is called a _step_,
//! and the step is the unit at which recent activity is frozen into files.
//! Recent writes live in a transactional key-value store supplied by the
//! caller, refer to [kv] module for the interface contract. On every step
//! boundary the [Aggregator] collates the closed step into compressed and
//! indexed files, prunes the store-resident copy, and merges adjacent files
//! into bigger ones in the background.
//!
//! Components are structured as below:
//!
//! * [seg], word-stream file codec backing `.kv`, `.v` and `.ef` files.
//! * [ef], Elias-Fano codec for monotone posting lists.
//! * [mph], minimal-perfect-hash index, key to file-offset.
//! * [btidx], btree lookup over sorted word-files.
//! * [files], unit of immutable state and its live registry.
//! * [invidx], per-key posting list of txnums.
//! * [history], per-key stream of previous values.
//! * [domain], versioned key-value column, latest plus history.
//! * [commitment], deterministic trie over account/storage state.
//! * [agg], the aggregator driving all columns in lockstep.

/// Short form to compose Error values.
///
/// Here are few possible ways,
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, std::fs::read(file_path));
/// err_at!(IOError, std::fs::read(file_path), "reading {:?}", file_path);
/// err_at!(Fatal, msg: "refcount underflow for {:?}", file_path);
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod account;
pub mod agg;
pub mod btidx;
pub mod commitment;
pub mod domain;
pub mod ef;
mod error;
pub mod files;
pub mod history;
pub mod invidx;
pub mod kv;
pub mod mph;
pub mod seg;
pub mod util;
pub mod wal;

pub use crate::agg::{Aggregator, Config, ReaderContext};
pub use crate::error::Error;

/// Type alias for Result return type, used by this package.
pub type Result<T> = std::result::Result<T, Error>;

/// Number of txnums in one aggregation step, default.
pub const AGGREGATION_STEP: u64 = 8192;

/// A file spanning this many steps is frozen, never merged or superseded.
pub const STEPS_IN_BIGGEST_FILE: u64 = 32;
