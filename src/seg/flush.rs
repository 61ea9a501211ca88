//! Background writer for one segment file under construction.
//!
//! The builder compresses words and queues finished batches here over a
//! bounded channel; once the writer lags `chan_size` batches behind,
//! queueing blocks. That is the engine's back-pressure path: a slow
//! disk stalls the compressor, a stalled compressor stalls the store
//! scan feeding it.
//!
//! Cancellation is the producer's job, loops polling their token stop
//! queueing and call [Flusher::abort], which tears the writer down and
//! removes the partial output.

use fs2::FileExt;

use std::{convert::TryFrom, ffi, fs, io::Write, sync::mpsc, thread};

use crate::{util, Error, Result};

pub struct Flusher {
    loc: ffi::OsString,
    batches: Option<mpsc::SyncSender<Vec<u8>>>,
    writer: Option<thread::JoinHandle<Result<u64>>>,
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.batches.take();
        if let Some(writer) = self.writer.take() {
            writer.join().ok();
        }
    }
}

impl Flusher {
    pub fn new(loc: &ffi::OsStr, chan_size: usize) -> Result<Flusher> {
        let fd = util::create_file(loc)?;

        let (batches, rx) = mpsc::sync_channel(chan_size);
        let writer = {
            let loc = loc.to_os_string();
            thread::spawn(move || write_batches(loc, fd, rx))
        };

        let val = Flusher {
            loc: loc.to_os_string(),
            batches: Some(batches),
            writer: Some(writer),
        };
        Ok(val)
    }

    /// Queue one batch of encoded words. Blocks while the writer is
    /// `chan_size` batches behind.
    pub fn flush(&mut self, batch: Vec<u8>) -> Result<()> {
        match self.batches.as_ref() {
            Some(batches) => err_at!(IPCFail, batches.send(batch), "{:?}", self.loc),
            None => err_at!(Fatal, msg: "flusher {:?} is closed", self.loc),
        }
    }

    /// Close the queue, wait for the writer to drain and sync. Return
    /// the number of bytes on disk.
    pub fn close(&mut self) -> Result<u64> {
        self.batches.take();
        match self.writer.take() {
            Some(writer) => match writer.join() {
                Ok(res) => res,
                Err(err) => err_at!(ThreadFail, msg: "flusher {:?} {:?}", self.loc, err),
            },
            None => Ok(0),
        }
    }

    /// Cancellation path: stop the writer and remove the partial output.
    pub fn abort(&mut self) -> Result<()> {
        self.close().ok();
        err_at!(IOError, fs::remove_file(&self.loc), "removing {:?}", self.loc)
    }
}

// writer side: drain batches until the producer hangs up, then sync.
// Holds a shared advisory lock for the lifetime of the build.
fn write_batches(
    loc: ffi::OsString,
    mut fd: fs::File,
    rx: mpsc::Receiver<Vec<u8>>,
) -> Result<u64> {
    err_at!(IOError, fd.lock_shared(), "fail lock for {:?}", loc)?;

    let mut fpos = 0;
    for batch in rx {
        let n = err_at!(IOError, fd.write(&batch), "{:?}", loc)?;
        if n != batch.len() {
            err_at!(Fatal, msg: "partial flush {}/{} to {:?}", n, batch.len(), loc)?
        }
        fpos += u64::try_from(n).unwrap();
    }

    err_at!(IOError, fd.sync_all(), "fail sync_all {:?}", loc)?;
    err_at!(IOError, fd.unlock(), "fail unlock {:?}", loc)?;

    Ok(fpos)
}
