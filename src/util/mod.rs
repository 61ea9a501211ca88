//! Module implement common utility functions and types.

use cbordata::{Cbor, FromCbor, IntoCbor};

use std::{
    ffi, fs,
    io::Write,
    path,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
};

use crate::{Error, Result};

pub mod spinlock;

pub use spinlock::Spinlock;

/// Encode `val` in LEB128 format, append into `buf`, return encoded length.
pub fn encode_varint(mut val: u64, buf: &mut Vec<u8>) -> usize {
    let mut n = 0;
    loop {
        let byte = (val & 0x7f) as u8;
        val >>= 7;
        n += 1;
        if val == 0 {
            buf.push(byte);
            break n;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode LEB128 value from `buf`, return (value, bytes-consumed).
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut val = 0_u64;
    for (n, byte) in buf.iter().enumerate() {
        if n >= 10 {
            break;
        }
        val |= u64::from(byte & 0x7f) << (n * 7);
        if byte & 0x80 == 0 {
            return Ok((val, n + 1));
        }
    }
    err_at!(InvalidInput, msg: "malformed varint {} bytes", buf.len())
}

/// Cbor-encode `val` into a byte-string.
pub fn to_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    err_at!(FailCbor, err_at!(FailCbor, val.into_cbor())?.encode(&mut data))?;
    Ok(data)
}

/// Decode a value of type `T` from the head of `data`, trailing bytes
/// ignored.
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<T>
where
    T: FromCbor,
{
    let (val, _) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    err_at!(FailCbor, T::from_cbor(val))
}

/// Persist one cbor value as a file at `loc`: the encoded value followed
/// by an 8-byte big-endian `marker` tail, so that a later open can tell a
/// finished index apart from the debris of an interrupted build. The
/// `.kvi`, `.bt`, `.vi` and `.efi` index files are all written this way.
pub fn write_tagged_file<T>(loc: &ffi::OsStr, val: T, marker: u64) -> Result<()>
where
    T: IntoCbor,
{
    let mut data = to_cbor_bytes(val)?;
    data.extend_from_slice(&marker.to_be_bytes());

    let mut fd = create_file(loc)?;
    let n = err_at!(IOError, fd.write(&data), "{:?}", loc)?;
    if n != data.len() {
        err_at!(IOError, msg: "partial write {}/{} to {:?}", n, data.len(), loc)?
    }
    err_at!(IOError, fd.sync_all(), "{:?}", loc)
}

/// Load a file written by [write_tagged_file], verifying its marker.
pub fn read_tagged_file<T>(loc: &ffi::OsStr, marker: u64) -> Result<T>
where
    T: FromCbor,
{
    let data = err_at!(IOError, fs::read(loc), "{:?}", loc)?;
    if data.len() < 8 {
        err_at!(InvalidFile, msg: "truncated index file {:?}", loc)?
    }
    let (body, tail) = data.split_at(data.len() - 8);
    if tail != marker.to_be_bytes() {
        err_at!(InvalidFile, msg: "bad marker in {:?}", loc)?
    }
    from_cbor_bytes(body)
}

/// Create a fresh file at `loc` for writing, parent directories
/// included. An existing file at `loc` is replaced.
pub fn create_file(loc: &ffi::OsStr) -> Result<fs::File> {
    let os_path = path::Path::new(loc);
    match os_path.parent() {
        Some(parent) => err_at!(IOError, fs::create_dir_all(parent), "{:?}", parent)?,
        None => err_at!(InvalidFile, msg: "{:?}", loc)?,
    };
    fs::remove_file(os_path).ok(); // NOTE: ignore remove errors.

    let mut opts = fs::OpenOptions::new();
    err_at!(IOError, opts.append(true).create_new(true).open(os_path), "{:?}", loc)
}

/// Open the file at `loc` for reading.
pub fn open_file(loc: &ffi::OsStr) -> Result<fs::File> {
    err_at!(IOError, fs::OpenOptions::new().read(true).open(loc), "{:?}", loc)
}

/// Cooperative cancellation token, shared by the aggregator with every
/// long running collate/build/prune/merge loop. Cancellation is a one-way
/// latch.
///
/// A [child][Cancel::child] token trips when either it or any ancestor is
/// canceled; canceling the child leaves the ancestors alone. Worker
/// batches use one child per pass, so a failing sibling aborts the pass
/// without killing the engine.
#[derive(Clone)]
pub struct Cancel {
    flags: Vec<Arc<AtomicBool>>,
}

impl Default for Cancel {
    fn default() -> Cancel {
        Cancel::new()
    }
}

impl Cancel {
    pub fn new() -> Cancel {
        Cancel {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// Derive a token observing this one, with its own latch on top.
    pub fn child(&self) -> Cancel {
        let mut flags = self.flags.clone();
        flags.push(Arc::new(AtomicBool::new(false)));
        Cancel { flags }
    }

    /// Latch the token. Loops polling this token shall abort with
    /// [Error::Canceled] at the next bounded interval.
    pub fn cancel(&self) {
        self.flags.last().unwrap().store(true, SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.flags.iter().any(|flag| flag.load(SeqCst))
    }

    /// Poll point. Return Canceled error if the token is latched.
    pub fn check(&self, who: &str) -> Result<()> {
        if self.is_canceled() {
            err_at!(Canceled, msg: "{}", who)
        } else {
            Ok(())
        }
    }
}
