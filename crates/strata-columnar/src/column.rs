#![forbid(unsafe_code)]

use crate::chunk::{integral, Chunk};
use crate::context::Platform;
use crate::error::{ColumnarError, Result};
use crate::group::ColumnGroup;
use crate::rollup::{Partial, RollupState, RollupStats};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::{Arc, OnceLock};
use strata_store::{run_over_chunks, Key, Store};

/// Hard ceiling on categorical cardinality. A conversion that would
/// exceed it fails whole; no truncated domain is ever produced.
pub const MAX_DOMAIN_SIZE: usize = 10_000;

/// What a column's rows are backed by.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum ColumnKind {
    /// Rows live in this column's own chunks.
    Plain,
    /// A row-subset view: `rows` is a plain column of 0-based row
    /// numbers into `master`. Shares no data chunks with the master.
    Subset { master: Key, rows: Key },
    /// A value-remap view over `master`: a read of value `v` yields
    /// `targets[i]` where `values[i] == v` (or `i` itself when `targets`
    /// is absent). Stores no chunks at all.
    Remap {
        master: Key,
        values: Vec<i64>,
        targets: Option<Vec<i64>>,
    },
}

/// A column: a logically contiguous sequence of values partitioned into
/// compressed chunks.
///
/// The struct is its own header document; it serializes (minus the
/// store handle and caches) to JSON under the column key. Everything a
/// reader needs is in here: chunk boundaries, categorical domain, time
/// code, view structure, rollup state. Chunk keys are derived from the
/// column key, so there is no chunk index to keep in sync.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Column {
    pub(crate) key: Key,
    /// Cumulative row starts; `boundaries[i]..boundaries[i+1]` is chunk
    /// `i`, `boundaries.last()` is the row count. Never empty.
    pub(crate) boundaries: Vec<u64>,
    pub(crate) domain: Option<Vec<String>>,
    pub(crate) time: Option<u8>,
    pub(crate) kind: ColumnKind,
    pub(crate) rollup: RollupState,
    #[serde(skip)]
    pub(crate) store: Store,
    #[serde(skip)]
    master_cache: OnceLock<Arc<Column>>,
    #[serde(skip)]
    rows_cache: OnceLock<Arc<Column>>,
}

impl Column {
    pub(crate) fn new_plain(store: Store, key: Key, boundaries: Vec<u64>) -> Column {
        debug_assert!(!boundaries.is_empty() && boundaries[0] == 0);
        Column {
            key,
            boundaries,
            domain: None,
            time: None,
            kind: ColumnKind::Plain,
            rollup: RollupState::NotComputed,
            store,
            master_cache: OnceLock::new(),
            rows_cache: OnceLock::new(),
        }
    }

    /// Load a column header from the store.
    pub fn load(store: &Store, key: &Key) -> Result<Column> {
        let bytes = store.get(key).ok_or_else(|| {
            tracing::error!(?key, "column header missing");
            ColumnarError::StoreInconsistency(format!("column header missing for {key:?}"))
        })?;
        let mut column: Column = serde_json::from_slice(&bytes)?;
        column.store = store.clone();
        Ok(column)
    }

    /// Write this header to the store, making the column visible to any
    /// other handle.
    pub fn publish(&self) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        self.store.put(self.key.clone(), bytes);
        Ok(())
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn len(&self) -> u64 {
        *self.boundaries.last().expect("boundaries never empty")
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn boundaries(&self) -> &[u64] {
        &self.boundaries
    }

    pub fn domain(&self) -> Option<&[String]> {
        self.domain.as_deref()
    }

    pub fn is_categorical(&self) -> bool {
        self.domain.is_some()
    }

    /// Number of categorical levels; 0 for numeric columns.
    pub fn cardinality(&self) -> usize {
        self.domain.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// The domain string for level `level`.
    pub fn factor(&self, level: usize) -> Option<&str> {
        self.domain.as_ref()?.get(level).map(String::as_str)
    }

    pub fn is_time(&self) -> bool {
        self.time.is_some()
    }

    /// Time parse code, when every chunk agreed the column holds
    /// timestamps.
    pub fn time_code(&self) -> Option<u8> {
        self.time
    }

    pub fn is_view(&self) -> bool {
        !matches!(self.kind, ColumnKind::Plain)
    }

    /// The group this column belongs to.
    pub fn group(&self) -> ColumnGroup {
        ColumnGroup::with_store(self.store.clone(), self.key.group_of())
    }

    /// Index of the chunk holding `row`. Binary search over the
    /// boundaries; zero-length chunks are skipped naturally because the
    /// search finds the first boundary strictly past the row.
    pub fn chunk_index_of(&self, row: u64) -> Result<usize> {
        if row >= self.len() {
            return Err(ColumnarError::InvalidState(format!(
                "row {row} out of range for a column of {} rows",
                self.len()
            )));
        }
        Ok(self.boundaries[1..].partition_point(|&b| b <= row))
    }

    pub(crate) fn chunk_key(&self, cidx: usize) -> Key {
        self.key.chunk_of(cidx as u32)
    }

    pub(crate) fn fetch_chunk(&self, cidx: usize) -> Result<Chunk> {
        let key = self.chunk_key(cidx);
        let bytes = self.store.get(&key).ok_or_else(|| {
            tracing::error!(?key, "chunk missing");
            ColumnarError::StoreInconsistency(format!("chunk missing for {key:?}"))
        })?;
        let chunk = Chunk::from_bytes(&bytes)?;
        let expected = (self.boundaries[cidx + 1] - self.boundaries[cidx]) as usize;
        if chunk.len() != expected {
            return Err(ColumnarError::StoreInconsistency(format!(
                "chunk {cidx} holds {} rows, layout says {expected}",
                chunk.len()
            )));
        }
        Ok(chunk)
    }

    fn load_dependency(&self, key: &Key, role: &str) -> Result<Column> {
        match self.store.get(key) {
            None => Err(ColumnarError::InvalidState(format!(
                "{role} column of this view was deleted"
            ))),
            Some(bytes) => {
                let mut column: Column = serde_json::from_slice(&bytes)?;
                column.store = self.store.clone();
                Ok(column)
            }
        }
    }

    /// The master column of a view, loaded once per handle.
    pub(crate) fn master(&self) -> Result<&Column> {
        let key = match &self.kind {
            ColumnKind::Plain => unreachable!("plain columns have no master"),
            ColumnKind::Subset { master, .. } | ColumnKind::Remap { master, .. } => master,
        };
        if let Some(cached) = self.master_cache.get() {
            return Ok(cached.as_ref());
        }
        let loaded = self.load_dependency(key, "master")?;
        let _ = self.master_cache.set(Arc::new(loaded));
        Ok(self.master_cache.get().expect("set above").as_ref())
    }

    fn rows_column(&self) -> Result<&Column> {
        let key = match &self.kind {
            ColumnKind::Subset { rows, .. } => rows,
            _ => unreachable!("only subset views carry a rows column"),
        };
        if let Some(cached) = self.rows_cache.get() {
            return Ok(cached.as_ref());
        }
        let loaded = self.load_dependency(key, "row-index")?;
        let _ = self.rows_cache.set(Arc::new(loaded));
        Ok(self.rows_cache.get().expect("set above").as_ref())
    }

    /// A read cursor over chunk `cidx`, resolving view indirection.
    pub(crate) fn cursor(&self, cidx: usize) -> Result<Cursor<'_>> {
        match &self.kind {
            ColumnKind::Plain => Ok(Cursor::Plain(self.fetch_chunk(cidx)?)),
            ColumnKind::Subset { .. } => {
                let rows = self.rows_column()?.fetch_chunk(cidx)?;
                Ok(Cursor::Subset {
                    rows,
                    master: self.master()?,
                    master_at: RefCell::new(None),
                })
            }
            ColumnKind::Remap {
                values, targets, ..
            } => Ok(Cursor::Remap {
                base: Box::new(self.master()?.cursor(cidx)?),
                values,
                targets: targets.as_deref(),
            }),
        }
    }

    fn read_opt(&self, row: u64) -> Result<Option<f64>> {
        let cidx = self.chunk_index_of(row)?;
        let cursor = self.cursor(cidx)?;
        cursor.get_f64((row - self.boundaries[cidx]) as usize)
    }

    fn read_opt_i64(&self, row: u64) -> Result<Option<i64>> {
        let cidx = self.chunk_index_of(row)?;
        let cursor = self.cursor(cidx)?;
        cursor.get_i64((row - self.boundaries[cidx]) as usize)
    }

    /// The value at `row` as a double; missing reads as NaN.
    pub fn at(&self, row: u64) -> Result<f64> {
        Ok(self.read_opt(row)?.unwrap_or(f64::NAN))
    }

    /// The value at `row` as a long. Missing is an error here; the long
    /// range has no value to spare for it.
    pub fn at_i64(&self, row: u64) -> Result<i64> {
        self.read_opt_i64(row)?
            .ok_or(ColumnarError::MissingValue { row })
    }

    pub fn is_missing(&self, row: u64) -> Result<bool> {
        Ok(self.read_opt(row)?.is_none())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_view() {
            return Err(ColumnarError::InvalidState(
                "views are read-only; write through the master column".into(),
            ));
        }
        Ok(())
    }

    /// Open a write session: park the published rollup state at
    /// write-in-progress so concurrent readers fail fast instead of
    /// computing stats over half-written chunks. Idempotent.
    pub fn begin_write(&mut self) -> Result<()> {
        self.ensure_writable()?;
        if self.rollup == RollupState::WriteInProgress {
            return Ok(());
        }
        self.rollup = RollupState::WriteInProgress;
        self.swap_published_rollup(|_| Some(RollupState::WriteInProgress))
    }

    /// Close a write session: stats are stale, not gone. The next
    /// rollup request recomputes them.
    pub fn end_write(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.rollup = RollupState::NotComputed;
        self.swap_published_rollup(|_| Some(RollupState::NotComputed))
    }

    /// Atomically rewrite the rollup state inside the published header.
    /// The closure sees the current state and returns the replacement,
    /// or `None` to leave the header untouched.
    fn swap_published_rollup<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&RollupState) -> Option<RollupState>,
    {
        let mut failure = None;
        self.store.compare_and_update(&self.key, |old| {
            let bytes = match old {
                Some(bytes) => bytes,
                // Header not published yet; nothing to swap.
                None => return None,
            };
            let mut header: Column = match serde_json::from_slice(bytes) {
                Ok(header) => header,
                Err(err) => {
                    failure = Some(ColumnarError::Header(err));
                    return Some(bytes.to_vec());
                }
            };
            let next = match f(&header.rollup) {
                Some(next) => next,
                None => return Some(bytes.to_vec()),
            };
            header.rollup = next;
            match serde_json::to_vec(&header) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    failure = Some(ColumnarError::Header(err));
                    Some(bytes.to_vec())
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The write path: try the operation against the chunk as stored,
    /// inflate on refusal, widen to doubles as the last resort. A write
    /// downgrades compression, never fails on representation.
    fn write_with<F>(&mut self, row: u64, op: F, what: &str) -> Result<()>
    where
        F: Fn(&mut Chunk, usize) -> bool,
    {
        self.begin_write()?;
        let cidx = self.chunk_index_of(row)?;
        let idx = (row - self.boundaries[cidx]) as usize;
        let mut chunk = self.fetch_chunk(cidx)?;
        if !op(&mut chunk, idx) {
            chunk = chunk.inflate();
            if !op(&mut chunk, idx) {
                chunk = chunk.widen_to_f64();
                if !op(&mut chunk, idx) {
                    return Err(ColumnarError::Incompatibility(format!(
                        "no chunk representation can hold {what} at row {row}"
                    )));
                }
            }
        }
        self.store.put(self.chunk_key(cidx), chunk.to_bytes());
        Ok(())
    }

    pub fn set(&mut self, row: u64, value: f64) -> Result<()> {
        self.write_with(row, |c, i| c.try_set_f64(i, value), "a double")
    }

    pub fn set_i64(&mut self, row: u64, value: i64) -> Result<()> {
        self.write_with(row, |c, i| c.try_set_i64(i, value), "a long")
    }

    pub fn set_missing(&mut self, row: u64) -> Result<()> {
        self.write_with(row, |c, i| c.try_set_missing(i), "a missing value")
    }

    /// Rollup statistics, computed on first request and cached in the
    /// published header. Requesting them during an open write session is
    /// an error, not a stale answer.
    pub fn rollup(&mut self) -> Result<RollupStats> {
        // The published header is authoritative; this handle's copy may
        // predate another handle's writes.
        let published = Column::load(&self.store, &self.key)?;
        self.rollup = published.rollup;
        match &self.rollup {
            RollupState::Valid(stats) => return Ok(*stats),
            RollupState::WriteInProgress => {
                return Err(ColumnarError::InvalidState(
                    "rollup requested during an active write".into(),
                ))
            }
            RollupState::NotComputed => {}
        }
        let stats = self.compute_rollup()?;
        // Cache only if nobody opened a write while we were counting.
        self.swap_published_rollup(|state| match state {
            RollupState::NotComputed => Some(RollupState::Valid(stats)),
            _ => None,
        })?;
        self.rollup = RollupState::Valid(stats);
        Ok(stats)
    }

    fn compute_rollup(&self) -> Result<RollupStats> {
        let merged = run_over_chunks(
            self.num_chunks(),
            |cidx| {
                let cursor = self.cursor(cidx)?;
                let len = (self.boundaries[cidx + 1] - self.boundaries[cidx]) as usize;
                partial_of_cursor(&cursor, len)
            },
            Partial::merge,
        )?;
        Ok(merged.map(Partial::finish).unwrap_or_else(RollupStats::empty))
    }

    /// Delete this column's keys. A view deletes only its own storage;
    /// the master column is untouched.
    pub fn remove(self) {
        match &self.kind {
            ColumnKind::Plain => {
                for cidx in 0..self.num_chunks() {
                    self.store.remove(&self.chunk_key(cidx));
                }
            }
            ColumnKind::Subset { rows, .. } => {
                // The rows column is owned by this view.
                if let Ok(rows) = Column::load(&self.store, rows) {
                    rows.remove();
                }
            }
            ColumnKind::Remap { .. } => {}
        }
        self.store.remove(&self.key);
    }

    /// A fresh plain column of `len` copies of `value`, chunked to the
    /// platform's target chunk size.
    pub fn make_const(platform: &Platform, len: u64, value: f64) -> Result<Column> {
        let key = ColumnGroup::fresh(platform).fresh_member_key()?;
        let boundaries = even_boundaries(len, platform.chunk_rows());
        let column = Column::new_plain(platform.store().clone(), key, boundaries);
        for cidx in 0..column.num_chunks() {
            let rows = (column.boundaries[cidx + 1] - column.boundaries[cidx]) as usize;
            let chunk = if integral(value) {
                Chunk::ConstI64 {
                    value: value as i64,
                    len: rows,
                }
            } else {
                Chunk::ConstF64 { value, len: rows }
            };
            platform.store().put(column.chunk_key(cidx), chunk.to_bytes());
        }
        column.publish()?;
        Ok(column)
    }

    /// A fresh plain column holding the row numbers `0..len`.
    pub fn make_seq(platform: &Platform, len: u64) -> Result<Column> {
        let key = ColumnGroup::fresh(platform).fresh_member_key()?;
        let boundaries = even_boundaries(len, platform.chunk_rows());
        let column = Column::new_plain(platform.store().clone(), key, boundaries);
        for cidx in 0..column.num_chunks() {
            let chunk = Chunk::RawI64(
                (column.boundaries[cidx]..column.boundaries[cidx + 1])
                    .map(|r| r as i64)
                    .collect(),
            );
            platform.store().put(column.chunk_key(cidx), chunk.to_bytes());
        }
        column.publish()?;
        Ok(column)
    }
}

pub(crate) fn even_boundaries(len: u64, chunk_rows: usize) -> Vec<u64> {
    let chunk_rows = chunk_rows.max(1) as u64;
    let mut boundaries = Vec::with_capacity((len / chunk_rows + 2) as usize);
    boundaries.push(0);
    let mut at = 0;
    while at < len {
        at = (at + chunk_rows).min(len);
        boundaries.push(at);
    }
    if boundaries.len() == 1 {
        boundaries.push(0); // a zero-row column still has one empty chunk slot
    }
    boundaries
}

/// A positioned read over one chunk's worth of rows, with view
/// indirection resolved per access.
pub(crate) enum Cursor<'a> {
    Plain(Chunk),
    Subset {
        rows: Chunk,
        master: &'a Column,
        /// Last-resolved master cursor. Consecutive reads usually land
        /// in the same master chunk; resolving it once per crossing
        /// keeps a scan over a subset view at one fetch per chunk, not
        /// one per row.
        master_at: RefCell<Option<(usize, Box<Cursor<'a>>)>>,
    },
    Remap {
        base: Box<Cursor<'a>>,
        values: &'a [i64],
        targets: Option<&'a [i64]>,
    },
}

impl<'a> Cursor<'a> {
    pub fn get_f64(&self, idx: usize) -> Result<Option<f64>> {
        match self {
            Cursor::Plain(chunk) => Ok(chunk.get_f64(idx)),
            Cursor::Subset {
                rows,
                master,
                master_at,
            } => match checked_row(rows, master, idx) {
                None => Ok(None),
                Some(row) => with_master_cursor(master, master_at, row, Cursor::get_f64),
            },
            Cursor::Remap {
                base,
                values,
                targets,
            } => Ok(remap(base.get_i64(idx)?, values, *targets).map(|v| v as f64)),
        }
    }

    pub fn get_i64(&self, idx: usize) -> Result<Option<i64>> {
        match self {
            Cursor::Plain(chunk) => Ok(chunk.get_i64(idx)),
            Cursor::Subset {
                rows,
                master,
                master_at,
            } => match checked_row(rows, master, idx) {
                None => Ok(None),
                Some(row) => with_master_cursor(master, master_at, row, Cursor::get_i64),
            },
            Cursor::Remap {
                base,
                values,
                targets,
            } => Ok(remap(base.get_i64(idx)?, values, *targets)),
        }
    }

    /// Bytes of storage the column itself owns behind this cursor. A
    /// subset view owns its row-index chunk; a remap view owns no
    /// chunks at all. Master storage is never counted twice.
    fn byte_size(&self) -> usize {
        match self {
            Cursor::Plain(chunk) => chunk.byte_size(),
            Cursor::Subset { rows, .. } => rows.byte_size(),
            Cursor::Remap { .. } => 0,
        }
    }
}

/// The master row a subset-view slot points at, or `None` when the slot
/// is missing or out of the master's range.
fn checked_row(rows: &Chunk, master: &Column, idx: usize) -> Option<u64> {
    match rows.get_i64(idx) {
        None => None,
        Some(row) if row < 0 || row as u64 >= master.len() => None,
        Some(row) => Some(row as u64),
    }
}

/// Read through the memoized master cursor, re-resolving it only when
/// `row` falls outside the chunk it currently covers.
fn with_master_cursor<'a, T>(
    master: &'a Column,
    cache: &RefCell<Option<(usize, Box<Cursor<'a>>)>>,
    row: u64,
    read: impl FnOnce(&Cursor<'a>, usize) -> Result<Option<T>>,
) -> Result<Option<T>> {
    let cidx = master.chunk_index_of(row)?;
    let mut slot = cache.borrow_mut();
    let hit = matches!(slot.as_ref(), Some((at, _)) if *at == cidx);
    if !hit {
        *slot = Some((cidx, Box::new(master.cursor(cidx)?)));
    }
    let (_, cursor) = slot.as_ref().expect("filled above");
    read(&**cursor, (row - master.boundaries[cidx]) as usize)
}

/// Apply a remap table: the read value is looked up in the sorted
/// `values` and replaced by the target at the same position (the
/// position itself when no explicit targets exist). Values outside the
/// table read as missing.
fn remap(value: Option<i64>, values: &[i64], targets: Option<&[i64]>) -> Option<i64> {
    let value = value?;
    let pos = values.binary_search(&value).ok()?;
    Some(match targets {
        Some(targets) => targets[pos],
        None => pos as i64,
    })
}

fn partial_of_cursor(cursor: &Cursor<'_>, len: usize) -> Result<Partial> {
    let mut na_count = 0u64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut is_integral = true;
    for idx in 0..len {
        match cursor.get_f64(idx)? {
            None => na_count += 1,
            Some(v) => {
                sum += v;
                min = min.min(v);
                max = max.max(v);
                is_integral &= integral(v);
            }
        }
    }
    let present = len as u64 - na_count;
    let mean = if present > 0 { sum / present as f64 } else { 0.0 };
    // Second pass for the squared deviations keeps m2 numerically sane
    // even when values dwarf their spread.
    let mut m2 = 0.0;
    if present > 0 {
        for idx in 0..len {
            if let Some(v) = cursor.get_f64(idx)? {
                m2 += (v - mean) * (v - mean);
            }
        }
    }
    Ok(Partial {
        rows: len as u64,
        na_count,
        min,
        max,
        mean,
        m2,
        is_integral,
        byte_size: cursor.byte_size() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_platform() -> Platform {
        Platform::new(crate::context::PlatformOptions {
            chunk_rows: 4,
            nodes: 1,
        })
    }

    #[test]
    fn const_column_reads_everywhere() {
        let platform = small_platform();
        let col = Column::make_const(&platform, 10, 2.5).unwrap();
        assert_eq!(col.len(), 10);
        assert_eq!(col.num_chunks(), 3);
        for row in 0..10 {
            assert_eq!(col.at(row).unwrap(), 2.5);
        }
        assert!(matches!(
            col.at(10),
            Err(ColumnarError::InvalidState(_))
        ));
    }

    #[test]
    fn seq_column_counts_rows() {
        let platform = small_platform();
        let col = Column::make_seq(&platform, 9).unwrap();
        for row in 0..9 {
            assert_eq!(col.at_i64(row).unwrap(), row as i64);
        }
    }

    #[test]
    fn chunk_index_respects_boundaries() {
        let platform = small_platform();
        let col = Column::make_seq(&platform, 10).unwrap();
        assert_eq!(col.boundaries(), &[0, 4, 8, 10]);
        assert_eq!(col.chunk_index_of(0).unwrap(), 0);
        assert_eq!(col.chunk_index_of(3).unwrap(), 0);
        assert_eq!(col.chunk_index_of(4).unwrap(), 1);
        assert_eq!(col.chunk_index_of(9).unwrap(), 2);
    }

    #[test]
    fn writes_inflate_constant_chunks() {
        let platform = small_platform();
        let mut col = Column::make_const(&platform, 8, 7.0).unwrap();
        col.set(2, 9.0).unwrap();
        col.set_missing(3).unwrap();
        col.end_write().unwrap();
        assert_eq!(col.at(2).unwrap(), 9.0);
        assert!(col.is_missing(3).unwrap());
        assert_eq!(col.at(1).unwrap(), 7.0);
        // The sibling chunk is still the original constant encoding.
        assert!(matches!(
            col.fetch_chunk(1).unwrap(),
            Chunk::ConstI64 { .. }
        ));
    }

    #[test]
    fn float_write_widens_an_integer_chunk() {
        let platform = small_platform();
        let mut col = Column::make_seq(&platform, 4).unwrap();
        col.set(1, 0.5).unwrap();
        col.end_write().unwrap();
        assert_eq!(col.at(1).unwrap(), 0.5);
        assert_eq!(col.at_i64(0).unwrap(), 0);
    }

    #[test]
    fn rollup_is_computed_cached_and_write_fenced() {
        let platform = small_platform();
        let mut col = Column::make_seq(&platform, 10).unwrap();
        let stats = col.rollup().unwrap();
        assert_eq!(stats.rows, 10);
        assert_eq!(stats.na_count, 0);
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(9.0));
        assert_eq!(stats.mean, Some(4.5));
        assert!(stats.is_integral);

        // A second handle sees the cached stats without recomputing.
        let mut other = Column::load(platform.store(), col.key()).unwrap();
        assert_eq!(other.rollup().unwrap(), stats);

        // An open write session fences rollup requests on every handle.
        col.begin_write().unwrap();
        assert!(matches!(
            other.rollup(),
            Err(ColumnarError::InvalidState(_))
        ));
        col.set_i64(0, 100).unwrap();
        col.end_write().unwrap();
        let stats = col.rollup().unwrap();
        assert_eq!(stats.max, Some(100.0));
    }

    #[test]
    fn subset_cursor_resolves_each_master_chunk_once() {
        let platform = small_platform();
        let master = Column::make_seq(&platform, 8).unwrap();
        let group = ColumnGroup::fresh(&platform);
        let appendable =
            crate::builder::AppendableColumn::new(&platform, group.fresh_member_key().unwrap());
        let mut b = appendable.chunk_builder(0);
        for row in [0, 1, 5, 6] {
            b.append_i64(row);
        }
        b.close().unwrap();
        let rows = appendable.seal().unwrap();
        let view = master.make_subset(&platform, &rows).unwrap();

        let cursor = view.cursor(0).unwrap();
        assert_eq!(cursor.get_i64(0).unwrap(), Some(0));
        // Later reads in the same master chunk are served from the
        // memoized cursor; deleting the chunk behind it proves no
        // refetch happens.
        platform.store().remove(&master.chunk_key(0));
        assert_eq!(cursor.get_i64(1).unwrap(), Some(1));
        assert_eq!(cursor.get_f64(1).unwrap(), Some(1.0));
        // Crossing into another master chunk resolves that chunk fresh.
        assert_eq!(cursor.get_i64(2).unwrap(), Some(5));
        assert_eq!(cursor.get_i64(3).unwrap(), Some(6));
    }

    #[test]
    fn remove_deletes_header_and_chunks() {
        let platform = small_platform();
        let col = Column::make_const(&platform, 8, 1.0).unwrap();
        let key = col.key().clone();
        let chunk0 = col.chunk_key(0);
        assert!(platform.store().contains(&key));
        assert!(platform.store().contains(&chunk0));
        col.remove();
        assert!(!platform.store().contains(&key));
        assert!(!platform.store().contains(&chunk0));
    }

    #[test]
    fn published_header_roundtrips() {
        let platform = small_platform();
        let col = Column::make_const(&platform, 5, 3.0).unwrap();
        let loaded = Column::load(platform.store(), col.key()).unwrap();
        assert_eq!(loaded.boundaries(), col.boundaries());
        assert_eq!(loaded.len(), 5);
        assert!(!loaded.is_view());
    }

    #[test]
    fn even_boundaries_cover_all_rows() {
        assert_eq!(even_boundaries(10, 4), vec![0, 4, 8, 10]);
        assert_eq!(even_boundaries(8, 4), vec![0, 4, 8]);
        assert_eq!(even_boundaries(3, 4), vec![0, 3]);
        assert_eq!(even_boundaries(0, 4), vec![0, 0]);
    }
}
