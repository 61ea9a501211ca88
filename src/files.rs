//! Module `files` implement the unit of immutable on-disk state and its
//! live registry.
//!
//! A [FileItem] is one frozen slice of a column, `[start_txnum, end_txnum)`,
//! backed by a data file, a minimal-perfect-hash index and, for domain
//! values, a btree index. Items spanning [crate::STEPS_IN_BIGGEST_FILE]
//! steps are frozen for good; smaller items are immutable in content but
//! may be superseded by a merged item and deleted once the last reader
//! lets go.
//!
//! The registry keeps items in a snapshot-swapped sorted vector. Readers
//! pin a garbage-free projection of the live items; merge and prune never
//! mutate existing items, they insert new ones and retire the old.

use log::{debug, info, warn};

use std::{
    cmp,
    convert::TryFrom,
    ffi, fmt, fs, path, result,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering::SeqCst},
        Arc,
    },
};

use crate::{btidx, mph, seg, util::Spinlock, Error, Result, STEPS_IN_BIGGEST_FILE};

/// On-disk extensions understood by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ext {
    Kv,
    Kvi,
    Bt,
    V,
    Vi,
    Ef,
    Efi,
}

impl Ext {
    fn as_str(&self) -> &'static str {
        match self {
            Ext::Kv => "kv",
            Ext::Kvi => "kvi",
            Ext::Bt => "bt",
            Ext::V => "v",
            Ext::Vi => "vi",
            Ext::Ef => "ef",
            Ext::Efi => "efi",
        }
    }
}

impl TryFrom<&str> for Ext {
    type Error = Error;

    fn try_from(s: &str) -> Result<Ext> {
        match s {
            "kv" => Ok(Ext::Kv),
            "kvi" => Ok(Ext::Kvi),
            "bt" => Ok(Ext::Bt),
            "v" => Ok(Ext::V),
            "vi" => Ok(Ext::Vi),
            "ef" => Ok(Ext::Ef),
            "efi" => Ok(Ext::Efi),
            s => err_at!(InvalidFile, msg: "unknown extension {:?}", s),
        }
    }
}

/// What one registry slot stores, deciding the sibling files an item needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Domain values, `.kv` + `.kvi` + `.bt`.
    Values,
    /// History values, `.v` + `.vi`.
    History,
    /// Posting lists, `.ef` + `.efi`.
    Postings,
}

impl FileKind {
    pub fn data_ext(&self) -> Ext {
        match self {
            FileKind::Values => Ext::Kv,
            FileKind::History => Ext::V,
            FileKind::Postings => Ext::Ef,
        }
    }

    pub fn index_ext(&self) -> Ext {
        match self {
            FileKind::Values => Ext::Kvi,
            FileKind::History => Ext::Vi,
            FileKind::Postings => Ext::Efi,
        }
    }

    pub fn exts(&self) -> Vec<Ext> {
        match self {
            FileKind::Values => vec![Ext::Kv, Ext::Kvi, Ext::Bt],
            FileKind::History => vec![Ext::V, Ext::Vi],
            FileKind::Postings => vec![Ext::Ef, Ext::Efi],
        }
    }
}

/// File name in the `<base>.<from_step>-<to_step>.<ext>` layout.
#[derive(Clone, Debug, PartialEq)]
pub struct FileName {
    pub base: String,
    pub from_step: u64,
    pub to_step: u64,
    pub ext: Ext,
}

impl FileName {
    pub fn new(base: &str, from_step: u64, to_step: u64, ext: Ext) -> FileName {
        FileName {
            base: base.to_string(),
            from_step,
            to_step,
            ext,
        }
    }

    /// Compose the file location under `dir`.
    pub fn to_location(&self, dir: &ffi::OsStr) -> ffi::OsString {
        let loc: path::PathBuf = [dir.to_os_string(), self.to_string().into()]
            .iter()
            .collect();
        loc.into_os_string()
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "{}.{}-{}.{}",
            self.base,
            self.from_step,
            self.to_step,
            self.ext.as_str()
        )
    }
}

impl TryFrom<&str> for FileName {
    type Error = Error;

    fn try_from(name: &str) -> Result<FileName> {
        let mut parts = name.split('.');
        let (base, span, ext) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(span), Some(ext), None) => (base, span, ext),
            _ => return err_at!(InvalidFile, msg: "{:?} not a slice file", name),
        };

        let mut span_parts = span.split('-');
        let (from, to) = match (span_parts.next(), span_parts.next(), span_parts.next()) {
            (Some(from), Some(to), None) => (from, to),
            _ => return err_at!(InvalidFile, msg: "{:?} bad step span", name),
        };
        let from_step = err_at!(InvalidFile, from.parse::<u64>(), "{:?}", name)?;
        let to_step = err_at!(InvalidFile, to.parse::<u64>(), "{:?}", name)?;

        let val = FileName {
            base: base.to_string(),
            from_step,
            to_step,
            ext: Ext::try_from(ext)?,
        };
        Ok(val)
    }
}

/// One immutable slice of a column, with its open readers.
pub struct FileItem {
    pub start_txnum: u64,
    pub end_txnum: u64,
    pub decomp: seg::Decompressor,
    pub index: mph::Mph,
    pub bindex: Option<btidx::BtIndex>,
    pub frozen: bool,

    refcount: AtomicU32,
    can_delete: AtomicBool,
    locs: Vec<ffi::OsString>,
}

impl FileItem {
    /// Open the slice `[from_step, to_step)` of column `base` under `dir`.
    pub fn open(
        dir: &ffi::OsStr,
        base: &str,
        kind: FileKind,
        from_step: u64,
        to_step: u64,
        step: u64,
    ) -> Result<FileItem> {
        if from_step >= to_step {
            panic!("file slice {}.{}-{} inverted span", base, from_step, to_step);
        }

        let locs: Vec<ffi::OsString> = kind
            .exts()
            .into_iter()
            .map(|ext| FileName::new(base, from_step, to_step, ext).to_location(dir))
            .collect();

        let decomp = seg::Decompressor::open(&locs[0])?;
        let index = mph::Mph::open(&locs[1])?;
        let bindex = match kind {
            FileKind::Values => Some(btidx::BtIndex::open(&locs[2])?),
            _ => None,
        };

        let item = FileItem {
            start_txnum: from_step * step,
            end_txnum: to_step * step,
            decomp,
            index,
            bindex,
            frozen: (to_step - from_step) == STEPS_IN_BIGGEST_FILE,
            refcount: AtomicU32::new(0),
            can_delete: AtomicBool::new(false),
            locs,
        };
        debug!(target: "strata", "opened {}.{}-{}", base, from_step, to_step);
        Ok(item)
    }

    /// Whether self's span is a strict subset of `other`'s span.
    pub fn is_subset_of(&self, other: &FileItem) -> bool {
        let covered =
            other.start_txnum <= self.start_txnum && self.end_txnum <= other.end_txnum;
        let same =
            other.start_txnum == self.start_txnum && self.end_txnum == other.end_txnum;
        covered && !same
    }

    /// Ordering over items: ascending `end_txnum`, then descending
    /// `start_txnum`. Read paths iterate this order reversed.
    pub fn cmp_order(&self, other: &FileItem) -> cmp::Ordering {
        match self.end_txnum.cmp(&other.end_txnum) {
            cmp::Ordering::Equal => other.start_txnum.cmp(&self.start_txnum),
            order => order,
        }
    }

    /// Pin for reading. Frozen items are shared freely without counting.
    pub fn pin(&self) {
        if !self.frozen {
            self.refcount.fetch_add(1, SeqCst);
        }
    }

    /// Release a pin. Return whether the caller must physically remove
    /// the files, that is: last reference gone and the item is retired.
    pub fn unpin(&self) -> bool {
        if self.frozen {
            return false;
        }
        match self.refcount.fetch_sub(1, SeqCst) {
            0 => panic!("refcount underflow on {:?}", self.locs[0]),
            1 => self.can_delete.load(SeqCst),
            _ => false,
        }
    }

    /// One-way latch: the item is superseded and shall be deleted once
    /// every reference is gone.
    pub fn mark_can_delete(&self) {
        if self.frozen {
            panic!("frozen file {:?} marked for delete", self.locs[0]);
        }
        self.can_delete.store(true, SeqCst);
    }

    pub fn is_can_delete(&self) -> bool {
        self.can_delete.load(SeqCst)
    }

    pub fn to_refcount(&self) -> u32 {
        self.refcount.load(SeqCst)
    }

    /// Remove this item's files from disk.
    pub fn remove_files(&self) {
        for loc in self.locs.iter() {
            match fs::remove_file(loc) {
                Ok(_) => debug!(target: "strata", "removed {:?}", loc),
                Err(err) => warn!(target: "strata", "removing {:?}: {}", loc, err),
            }
        }
    }
}

struct SetInner {
    items: Vec<Arc<FileItem>>, // sorted by FileItem::cmp_order
    ro: Vec<Arc<FileItem>>,    // garbage-free projection of `items`
}

impl SetInner {
    fn project_ro(items: &[Arc<FileItem>]) -> Vec<Arc<FileItem>> {
        items
            .iter()
            .filter(|item| !item.is_can_delete())
            .cloned()
            .collect()
    }
}

/// Registry of live [FileItem]s for one column slot.
pub struct FileSet {
    dir: ffi::OsString,
    base: String,
    kind: FileKind,
    step: u64,

    inner: Arc<Spinlock<Arc<SetInner>>>,
}

impl FileSet {
    pub fn new(dir: &ffi::OsStr, base: &str, kind: FileKind, step: u64) -> FileSet {
        let inner = SetInner {
            items: Vec::default(),
            ro: Vec::default(),
        };
        FileSet {
            dir: dir.to_os_string(),
            base: base.to_string(),
            kind,
            step,
            inner: Arc::new(Spinlock::new(Arc::new(inner))),
        }
    }

    pub fn to_base(&self) -> String {
        self.base.clone()
    }

    pub fn to_kind(&self) -> FileKind {
        self.kind
    }

    /// Insert a freshly built item.
    pub fn insert(&self, item: Arc<FileItem>) {
        let mut guard = self.inner.write();
        let mut items = guard.items.clone();
        let n = items
            .binary_search_by(|probe| probe.cmp_order(&item))
            .unwrap_or_else(|n| n);
        items.insert(n, item);
        let ro = SetInner::project_ro(&items);
        *guard = Arc::new(SetInner { items, ro });
    }

    /// Whether an item with the exact span is registered.
    pub fn contains(&self, start_txnum: u64, end_txnum: u64) -> bool {
        let inner = Arc::clone(&self.inner.read());
        inner
            .items
            .iter()
            .any(|item| item.start_txnum == start_txnum && item.end_txnum == end_txnum)
    }

    /// Snapshot iteration over all live items, in registry order.
    pub fn walk(&self) -> Vec<Arc<FileItem>> {
        let inner = Arc::clone(&self.inner.read());
        inner.items.clone()
    }

    /// Snapshot of the garbage-free projection, in registry order.
    pub fn ro_files(&self) -> Vec<Arc<FileItem>> {
        let inner = Arc::clone(&self.inner.read());
        inner.ro.clone()
    }

    /// Snapshot and pin the garbage-free projection for a reader context.
    /// Items stay alive, files included, until every pin is released.
    pub fn pin_snapshot(&self) -> Vec<Arc<FileItem>> {
        let guard = self.inner.read();
        for item in guard.ro.iter() {
            item.pin();
        }
        guard.ro.clone()
    }

    /// Retire items superseded by a merge: latch `can_delete`, drop them
    /// from the registry, and remove files for items nobody holds.
    pub fn retire(&self, retired: &[Arc<FileItem>]) {
        let mut guard = self.inner.write();

        for item in retired.iter() {
            item.mark_can_delete();
        }
        let items: Vec<Arc<FileItem>> = guard
            .items
            .iter()
            .filter(|item| !retired.iter().any(|r| Arc::ptr_eq(r, item)))
            .cloned()
            .collect();
        let ro = SetInner::project_ro(&items);
        *guard = Arc::new(SetInner { items, ro });

        for item in retired.iter() {
            if item.to_refcount() == 0 {
                item.remove_files();
            }
        }
    }

    /// Find the biggest power-of-two window of adjacent live items that
    /// can merge into one bigger slice.
    ///
    /// A window qualifies when it is step-aligned to its own size, fully
    /// tiled by more than one live item, and not already covered by a
    /// single item. Return `(start_txnum, end_txnum, tiles)`.
    pub fn find_merge_range(&self) -> Option<(u64, u64, Vec<Arc<FileItem>>)> {
        let items = self.ro_files();
        let max_end = items.iter().map(|item| item.end_txnum).max()?;

        let mut size_steps = STEPS_IN_BIGGEST_FILE;
        while size_steps >= 2 {
            let span = size_steps * self.step;
            let mut from = 0;
            while from + span <= max_end {
                if let Some(tiles) = tile_window(&items, from, from + span) {
                    return Some((from, from + span, tiles));
                }
                from += span;
            }
            size_steps /= 2;
        }
        None
    }

    /// Live items exactly tiling `[from, to)`, when more than one is
    /// needed to do so.
    pub fn tiles_of(&self, from: u64, to: u64) -> Option<Vec<Arc<FileItem>>> {
        tile_window(&self.ro_files(), from, to)
    }

    /// Highest `end_txnum` covered by the registered items.
    pub fn end_txnum_max(&self) -> u64 {
        let inner = Arc::clone(&self.inner.read());
        inner.items.last().map(|item| item.end_txnum).unwrap_or(0)
    }

    /// Scan `dir` for this column's slice files and open the valid ones.
    ///
    /// Integrity rules: a slice with a missing sibling file is skipped
    /// with a warning, an inverted step span likewise. Slices that are a
    /// strict subset of a frozen slice are garbage from an interrupted
    /// retire, their files are removed.
    pub fn scan_dir(&self) -> Result<()> {
        let dirs = match fs::read_dir(&self.dir) {
            Ok(dirs) => dirs,
            Err(_) => return Ok(()), // nothing aggregated yet
        };

        let mut spans: Vec<(u64, u64)> = vec![];
        for entry in dirs {
            let entry = err_at!(IOError, entry)?;
            let file_name = entry.file_name();
            let name = match file_name.to_str() {
                Some(name) => name,
                None => continue,
            };
            let fname = match FileName::try_from(name) {
                Ok(fname) => fname,
                Err(_) => continue, // not a slice file
            };
            if fname.base != self.base || fname.ext != self.kind.data_ext() {
                continue;
            }
            if fname.from_step >= fname.to_step {
                warn!(target: "strata", "skipping {}, inverted span", name);
                continue;
            }

            let missing: Vec<Ext> = self
                .kind
                .exts()
                .into_iter()
                .filter(|ext| {
                    let sib = FileName::new(&self.base, fname.from_step, fname.to_step, *ext);
                    !path::Path::new(&sib.to_location(&self.dir)).exists()
                })
                .collect();
            if !missing.is_empty() {
                warn!(target: "strata", "skipping {}, missing {:?}", name, missing);
                continue;
            }

            spans.push((fname.from_step, fname.to_step));
        }

        spans.sort_unstable();

        // frozen slices subsume their strict subsets.
        let frozen: Vec<(u64, u64)> = spans
            .iter()
            .filter(|(from, to)| (to - from) == STEPS_IN_BIGGEST_FILE)
            .cloned()
            .collect();
        let (live, garbage): (Vec<(u64, u64)>, Vec<(u64, u64)>) =
            spans.into_iter().partition(|(from, to)| {
                !frozen
                    .iter()
                    .any(|(f, t)| f <= from && to <= t && !(f == from && t == to))
            });

        for (from, to) in garbage.into_iter() {
            info!(
                target: "strata",
                "{}.{}-{} subsumed by a frozen slice, removing", self.base, from, to
            );
            for ext in self.kind.exts() {
                let loc = FileName::new(&self.base, from, to, ext).to_location(&self.dir);
                fs::remove_file(&loc).ok();
            }
        }

        for (from, to) in live.into_iter() {
            if self.contains(from * self.step, to * self.step) {
                continue;
            }
            match FileItem::open(&self.dir, &self.base, self.kind, from, to, self.step) {
                Ok(item) => self.insert(Arc::new(item)),
                Err(err) => {
                    // unfinished output of an interrupted build.
                    warn!(
                        target: "strata",
                        "skipping {}.{}-{}: {}", self.base, from, to, err
                    );
                }
            }
        }

        Ok(())
    }
}

// items fully tiling [from, to), when more than one of them is needed.
// Slices that are strict subsets of another candidate are ignored; they
// can linger after an interrupted retire and must not block the window.
fn tile_window(
    items: &[Arc<FileItem>],
    from: u64,
    to: u64,
) -> Option<Vec<Arc<FileItem>>> {
    let candidates: Vec<&Arc<FileItem>> = items
        .iter()
        .filter(|item| from <= item.start_txnum && item.end_txnum <= to)
        .collect();
    let mut inside: Vec<Arc<FileItem>> = candidates
        .iter()
        .filter(|item| {
            !candidates.iter().any(|other| item.is_subset_of(other.as_ref()))
        })
        .map(|item| Arc::clone(*item))
        .collect();
    inside.sort_by(|a, b| a.start_txnum.cmp(&b.start_txnum));

    if inside.len() < 2 {
        return None;
    }
    let mut cursor = from;
    for item in inside.iter() {
        if item.start_txnum != cursor {
            return None;
        }
        cursor = item.end_txnum;
    }
    match cursor == to {
        true => Some(inside),
        false => None,
    }
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
