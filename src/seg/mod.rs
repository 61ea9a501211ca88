//! Module `seg` implement the word-stream file codec.
//!
//! A segment file is a flat sequence of byte-string _words_. Words are
//! varint-framed, and words crossing a size threshold are stored as zstd
//! frames when that actually saves space. The file ends with a cbor
//! encoded [Stats] trailer and a fixed footer, so that readers can locate
//! the data boundary without an external manifest.
//!
//! Domain value files interleave `key, value, key, value, ..` words in
//! key-sorted order. History value files carry one word per previous
//! value. Posting-list files interleave `key, elias-fano, ..` words.
//! The codec itself is oblivious to such pairing.
//!
//! Writes are batched through a background [Flusher] thread over a bounded
//! channel, a slow disk blocks the producer, refer to [Builder]. Reads are
//! positional and thread-safe, refer to [Decompressor].

use cbordata::Cborize;

use std::{
    convert::{TryFrom, TryInto},
    ffi, fs,
    os::unix::fs::FileExt,
    path,
};

use crate::{util, Error, Result};

mod flush;

pub use flush::Flusher;

/// Words this size onwards are candidates for zstd compression.
pub const COMPRESS_THRESHOLD: usize = 64;

/// Zstd compression level for word payloads.
pub const COMPRESS_LEVEL: i32 = 3;

/// Default number of word-batches queued to the flusher thread.
pub const FLUSH_QUEUE_SIZE: usize = 64;

// word batches accumulate to this size before they are queued.
const BATCH_SIZE: usize = 1024 * 1024;

const STATS_VER: u32 = 0x00010001;

// marks the tail of a finished segment file.
const FILE_MARKER: u64 = 0x5354_5241_5347_0001;

/// Statistic for one segment file, persisted as its trailer.
#[derive(Clone, Default, Debug, Cborize)]
pub struct Stats {
    /// Base name of the column this file belongs to.
    pub name: String,
    /// Number of words in the file.
    pub n_words: u64,
    /// Lower txnum bound covered by this file, inclusive.
    pub start_txnum: u64,
    /// Upper txnum bound covered by this file, exclusive.
    pub end_txnum: u64,
    /// Time taken to build this file, in nanoseconds.
    pub build_time: u64,
    /// Timestamp when this file was built, from UNIX EPOCH, in secs.
    pub epoch: u64,
}

impl Stats {
    const ID: u32 = STATS_VER;
}

/// Build a new segment file, one word at a time.
pub struct Builder {
    loc: ffi::OsString,
    flusher: Flusher,
    batch: Vec<u8>,
    fpos: u64,
    n_words: u64,
}

impl Builder {
    pub fn create(loc: &ffi::OsStr, chan_size: usize) -> Result<Builder> {
        let val = Builder {
            loc: loc.to_os_string(),
            flusher: Flusher::new(loc, chan_size)?,
            batch: Vec::with_capacity(BATCH_SIZE),
            fpos: 0,
            n_words: 0,
        };
        Ok(val)
    }

    /// Append `word`, return the file offset the word is addressable at.
    pub fn add_word(&mut self, word: &[u8]) -> Result<u64> {
        let fpos = self.fpos;
        let n = encode_word(word, &mut self.batch)?;
        self.fpos += u64::try_from(n).unwrap();
        self.n_words += 1;

        if self.batch.len() >= BATCH_SIZE {
            let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(BATCH_SIZE));
            self.flusher.flush(batch)?;
        }
        Ok(fpos)
    }

    pub fn to_fpos(&self) -> u64 {
        self.fpos
    }

    pub fn to_n_words(&self) -> u64 {
        self.n_words
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    /// Write the stats trailer, sync and close the file. Return the
    /// number of words written.
    pub fn finish(mut self, mut stats: Stats) -> Result<u64> {
        stats.n_words = self.n_words;

        let mut trailer = util::to_cbor_bytes(stats)?;
        let stats_len = u64::try_from(trailer.len()).unwrap();
        trailer.extend_from_slice(&stats_len.to_be_bytes());
        trailer.extend_from_slice(&FILE_MARKER.to_be_bytes());

        let expected = self.fpos + u64::try_from(trailer.len()).unwrap();
        if !self.batch.is_empty() {
            let batch = std::mem::take(&mut self.batch);
            self.flusher.flush(batch)?;
        }
        self.flusher.flush(trailer)?;
        let flushed = self.flusher.close()?;
        if flushed != expected {
            err_at!(Fatal, msg: "segment {:?} flushed {}/{}", self.loc, flushed, expected)?
        }

        Ok(self.n_words)
    }

    /// Cancellation path, close the flusher and remove the partial file.
    pub fn abort(mut self) -> Result<()> {
        self.batch.clear();
        self.flusher.abort()
    }
}

/// Read-only handle over a finished segment file. Reads are positional,
/// a `&Decompressor` can be shared across threads.
pub struct Decompressor {
    loc: ffi::OsString,
    fd: fs::File,
    data_end: u64,
    stats: Stats,
}

impl Decompressor {
    pub fn open(loc: &ffi::OsStr) -> Result<Decompressor> {
        let fd = util::open_file(loc)?;
        let file_len = err_at!(IOError, fd.metadata())?.len();
        if file_len < 16 {
            err_at!(InvalidFile, msg: "truncated segment file {:?}", loc)?
        }

        let mut footer = [0_u8; 16];
        err_at!(IOError, fd.read_exact_at(&mut footer, file_len - 16))?;
        let stats_len = u64::from_be_bytes(footer[..8].try_into().unwrap());
        let marker = u64::from_be_bytes(footer[8..].try_into().unwrap());
        if marker != FILE_MARKER {
            err_at!(InvalidFile, msg: "bad marker in {:?}", loc)?
        }
        if stats_len + 16 > file_len {
            err_at!(InvalidFile, msg: "bad stats length in {:?}", loc)?
        }

        let data_end = file_len - 16 - stats_len;
        let stats = {
            let mut buf = vec![0; usize::try_from(stats_len).unwrap()];
            err_at!(IOError, fd.read_exact_at(&mut buf, data_end))?;
            util::from_cbor_bytes::<Stats>(&buf)?
        };

        let val = Decompressor {
            loc: loc.to_os_string(),
            fd,
            data_end,
            stats,
        };
        Ok(val)
    }

    pub fn as_stats(&self) -> &Stats {
        &self.stats
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    pub fn to_file_name(&self) -> Option<String> {
        let loc = path::PathBuf::from(&self.loc);
        loc.file_name().map(|s| s.to_string_lossy().to_string())
    }

    pub fn len(&self) -> u64 {
        self.stats.n_words
    }

    pub fn is_empty(&self) -> bool {
        self.stats.n_words == 0
    }

    pub fn data_end(&self) -> u64 {
        self.data_end
    }

    /// Read the word at `fpos`. Return the word and the offset of the
    /// following word.
    pub fn word_at(&self, fpos: u64) -> Result<(Vec<u8>, u64)> {
        if fpos >= self.data_end {
            err_at!(InvalidInput, msg: "fpos {} beyond data {}", fpos, self.data_end)?
        }

        // headers are at most two 10-byte varints.
        let head = self.pread(fpos, 20)?;
        let (header, mut n) = util::decode_varint(&head)?;
        let raw_len = usize::try_from(header >> 1).unwrap();

        if header & 0x1 == 1 {
            let (comp_len, m) = util::decode_varint(&head[n..])?;
            n += m;
            let comp = self.pread(fpos + n as u64, usize::try_from(comp_len).unwrap())?;
            let word = err_at!(IOError, zstd::decode_all(comp.as_slice()))?;
            if word.len() != raw_len {
                err_at!(InvalidFile, msg: "zstd frame {}/{}", word.len(), raw_len)?
            }
            Ok((word, fpos + (n as u64) + comp_len))
        } else {
            let word = self.pread(fpos + n as u64, raw_len)?;
            Ok((word, fpos + (n as u64) + (raw_len as u64)))
        }
    }

    /// Iterate all words from the start of the file, yielding
    /// `(offset, word)` pairs.
    pub fn iter(&self) -> WordIter {
        WordIter {
            decomp: self,
            fpos: 0,
            done: false,
        }
    }

    // positional read; short reads near data_end are trimmed, not errors.
    fn pread(&self, fpos: u64, n: usize) -> Result<Vec<u8>> {
        let n = match self.data_end.checked_sub(fpos) {
            Some(avail) => std::cmp::min(n as u64, avail) as usize,
            None => return err_at!(InvalidInput, msg: "read past data end"),
        };
        let mut buf = vec![0; n];
        err_at!(IOError, self.fd.read_exact_at(&mut buf, fpos), "{:?}", self.loc)?;
        Ok(buf)
    }
}

/// Forward iterator over a segment file's words.
pub struct WordIter<'a> {
    decomp: &'a Decompressor,
    fpos: u64,
    done: bool,
}

impl<'a> Iterator for WordIter<'a> {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.fpos >= self.decomp.data_end {
            self.done = true;
            return None;
        }
        match self.decomp.word_at(self.fpos) {
            Ok((word, next)) => {
                let fpos = self.fpos;
                self.fpos = next;
                Some(Ok((fpos, word)))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn encode_word(word: &[u8], out: &mut Vec<u8>) -> Result<usize> {
    let start = out.len();
    let raw_len = u64::try_from(word.len()).unwrap();

    if word.len() >= COMPRESS_THRESHOLD {
        let comp = err_at!(IOError, zstd::encode_all(word, COMPRESS_LEVEL))?;
        if comp.len() < word.len() {
            util::encode_varint((raw_len << 1) | 0x1, out);
            util::encode_varint(u64::try_from(comp.len()).unwrap(), out);
            out.extend_from_slice(&comp);
            return Ok(out.len() - start);
        }
    }

    util::encode_varint(raw_len << 1, out);
    out.extend_from_slice(word);
    Ok(out.len() - start)
}
