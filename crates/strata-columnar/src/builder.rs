#![forbid(unsafe_code)]

//! The build protocol: chunks are appended independently (typically one
//! per parser task, in any order and from any thread), each reporting
//! its row count and content flags on close, and `seal` assembles the
//! finished column once every chunk has reported.

use crate::chunk::{BitsChunk, Chunk};
use crate::column::Column;
use crate::context::Platform;
use crate::error::{ColumnarError, Result};
use std::sync::Mutex;
use strata_store::{Key, Store};

/// Content flags reported by a closed chunk.
const HAS_MISSING: u8 = 1;
const HAS_CATEGORY: u8 = 2;
const HAS_NUMBER: u8 = 4;
const HAS_TIME: u8 = 8;

/// Number of recognized timestamp parse formats.
const TIME_CODES: usize = 8;

/// One appended value, held uncompressed until the chunk closes.
#[derive(Clone, Copy, Debug)]
enum Slot {
    Int(i64),
    Float(f64),
    Category(u32),
    Missing,
}

/// What one closed chunk told the accumulator about itself.
#[derive(Clone, Copy, Debug)]
struct ChunkReport {
    rows: u64,
    flags: u8,
    time_counts: [u64; TIME_CODES],
}

#[derive(Debug, Default)]
struct Accumulator {
    reports: Vec<Option<ChunkReport>>,
    domain: Option<Vec<String>>,
}

/// A column under construction. Cheap to share by reference across the
/// tasks filling its chunks; sealed exactly once when they are done.
#[derive(Debug)]
pub struct AppendableColumn {
    key: Key,
    store: Store,
    state: Mutex<Accumulator>,
}

impl AppendableColumn {
    pub fn new(platform: &Platform, key: Key) -> AppendableColumn {
        AppendableColumn {
            key,
            store: platform.store().clone(),
            state: Mutex::new(Accumulator::default()),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Start chunk `cidx`. Chunks may be built and closed in any order;
    /// the same index must not be built twice. The slot is registered
    /// immediately, so a builder abandoned before `close` shows up as a
    /// gap (or as trailing trim) at seal time.
    pub fn chunk_builder(&self, cidx: usize) -> ChunkBuilder<'_> {
        let mut state = self.state.lock().expect("builder state poisoned");
        if state.reports.len() <= cidx {
            state.reports.resize(cidx + 1, None);
        }
        drop(state);
        ChunkBuilder {
            column: self,
            cidx,
            slots: Vec::new(),
            time_counts: [0; TIME_CODES],
        }
    }

    /// Attach the categorical domain the category indices refer to.
    pub fn set_domain(&self, domain: Vec<String>) {
        self.state.lock().expect("builder state poisoned").domain = Some(domain);
    }

    fn report(&self, cidx: usize, report: ChunkReport) {
        let mut state = self.state.lock().expect("builder state poisoned");
        if state.reports.len() <= cidx {
            state.reports.resize(cidx + 1, None);
        }
        debug_assert!(state.reports[cidx].is_none(), "chunk {cidx} closed twice");
        state.reports[cidx] = Some(report);
    }

    /// Finish the build and publish the column header.
    ///
    /// Trailing never-built chunk slots are trimmed (a parser may
    /// over-reserve); an interior gap is an error. When both category
    /// and number chunks were appended the categories lose: those chunks
    /// are overwritten with all-missing constants and the domain is
    /// dropped. The time code survives only when every timestamp chunk
    /// agreed on one format.
    pub fn seal(self) -> Result<Column> {
        let state = self.state.into_inner().expect("builder state poisoned");
        let mut reports = state.reports;
        while matches!(reports.last(), Some(None)) {
            reports.pop();
        }
        let mut closed = Vec::with_capacity(reports.len());
        for (cidx, report) in reports.into_iter().enumerate() {
            match report {
                Some(report) => closed.push(report),
                None => {
                    return Err(ColumnarError::InvalidState(format!(
                        "cannot seal: chunk {cidx} was never closed"
                    )))
                }
            }
        }

        let merged_flags = closed.iter().fold(0u8, |f, r| f | r.flags);
        let has_number = merged_flags & HAS_NUMBER != 0;
        let has_category = merged_flags & HAS_CATEGORY != 0;

        let mut boundaries = Vec::with_capacity(closed.len() + 1);
        boundaries.push(0u64);
        for report in &closed {
            boundaries.push(boundaries.last().expect("non-empty") + report.rows);
        }
        if boundaries.len() == 1 {
            boundaries.push(0);
        }

        if has_number && has_category {
            // Mixed build: the numbers win and category chunks become
            // all-missing. Loud, because data is being discarded.
            for (cidx, report) in closed.iter().enumerate() {
                let is_category_chunk =
                    report.flags & HAS_CATEGORY != 0 && report.flags & HAS_NUMBER == 0;
                if is_category_chunk {
                    tracing::warn!(
                        chunk = cidx,
                        rows = report.rows,
                        "category chunk in a numeric column; overwriting with missing values"
                    );
                    let blank = Chunk::ConstF64 {
                        value: f64::NAN,
                        len: report.rows as usize,
                    };
                    self.store.put(self.key.chunk_of(cidx as u32), blank.to_bytes());
                }
            }
        }

        let mut column = Column::new_plain(self.store, self.key, boundaries);
        if has_category && !has_number {
            column.domain = state.domain;
        }
        column.time = agreed_time_code(&closed);
        column.publish()?;
        Ok(column)
    }
}

/// The single time code every timestamp chunk used, if there is exactly
/// one; any disagreement (or no timestamps at all) yields none and the
/// column stays plainly numeric.
fn agreed_time_code(reports: &[ChunkReport]) -> Option<u8> {
    let mut totals = [0u64; TIME_CODES];
    for report in reports {
        for (code, count) in report.time_counts.iter().enumerate() {
            totals[code] += count;
        }
    }
    let mut used = totals.iter().enumerate().filter(|(_, &n)| n > 0);
    match (used.next(), used.next()) {
        (Some((code, _)), None) => Some(code as u8),
        _ => None,
    }
}

/// Appends rows to one chunk of an [`AppendableColumn`], compressing
/// and storing them on close.
#[derive(Debug)]
pub struct ChunkBuilder<'a> {
    column: &'a AppendableColumn,
    cidx: usize,
    slots: Vec<Slot>,
    time_counts: [u64; TIME_CODES],
}

impl ChunkBuilder<'_> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn append_i64(&mut self, value: i64) {
        // The raw-long sentinel routes through the double path.
        if value == i64::MIN {
            self.slots.push(Slot::Float(value as f64));
        } else {
            self.slots.push(Slot::Int(value));
        }
    }

    /// Append a double. Integral doubles are stored as longs so a
    /// column parsed as "1.0, 2.0" still compresses as integers.
    pub fn append_f64(&mut self, value: f64) {
        if value.is_nan() {
            self.slots.push(Slot::Missing);
        } else if value.fract() == 0.0
            && value.abs() <= MAX_EXACT_DOUBLE
            && value as i64 != i64::MIN
        {
            self.slots.push(Slot::Int(value as i64));
        } else {
            self.slots.push(Slot::Float(value));
        }
    }

    /// Append a categorical level by its domain index.
    pub fn append_category(&mut self, index: u32) {
        self.slots.push(Slot::Category(index));
    }

    /// Append a timestamp (epoch milliseconds) parsed with format
    /// `code`.
    pub fn append_time(&mut self, millis: i64, code: u8) {
        debug_assert!((code as usize) < TIME_CODES);
        self.time_counts[code as usize] += 1;
        self.append_i64(millis);
    }

    pub fn append_missing(&mut self) {
        self.slots.push(Slot::Missing);
    }

    /// Compress, store, and report this chunk.
    pub fn close(self) -> Result<()> {
        let mut flags = 0u8;
        for slot in &self.slots {
            flags |= match slot {
                Slot::Int(_) | Slot::Float(_) => HAS_NUMBER,
                Slot::Category(_) => HAS_CATEGORY,
                Slot::Missing => HAS_MISSING,
            };
        }
        if self.time_counts.iter().any(|&n| n > 0) {
            flags |= HAS_TIME;
        }
        let chunk = compress(&self.slots);
        self.column
            .store
            .put(self.column.key.chunk_of(self.cidx as u32), chunk.to_bytes());
        self.column.report(
            self.cidx,
            ChunkReport {
                rows: self.slots.len() as u64,
                flags,
                time_counts: self.time_counts,
            },
        );
        Ok(())
    }
}

/// Largest magnitude a double holds exactly as an integer (2^53).
const MAX_EXACT_DOUBLE: f64 = 9_007_199_254_740_992.0;

/// Pick the tightest encoding for a closed chunk's slots.
fn compress(slots: &[Slot]) -> Chunk {
    let len = slots.len();
    let mut ints: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut all_int = true;
    let mut any_present = false;
    for slot in slots {
        match slot {
            Slot::Int(v) => {
                any_present = true;
                ints.push(Some(*v));
            }
            Slot::Category(v) => {
                any_present = true;
                ints.push(Some(*v as i64));
            }
            Slot::Missing => ints.push(None),
            Slot::Float(_) => {
                all_int = false;
                break;
            }
        }
    }

    if !any_present && all_int {
        return Chunk::ConstF64 {
            value: f64::NAN,
            len,
        };
    }

    if all_int {
        let present: Vec<i64> = ints.iter().filter_map(|v| *v).collect();
        let has_missing = present.len() < len;
        let constant = present.windows(2).all(|w| w[0] == w[1]);
        if constant && !has_missing {
            return Chunk::ConstI64 {
                value: present[0],
                len,
            };
        }
        if present.iter().all(|&v| v == 0 || v == 1) {
            let bits: Vec<Option<bool>> = ints.iter().map(|v| v.map(|v| v == 1)).collect();
            return Chunk::Bits(BitsChunk::pack(&bits, if has_missing { 2 } else { 1 }));
        }
        return Chunk::RawI64(
            ints.into_iter().map(|v| v.unwrap_or(i64::MIN)).collect(),
        );
    }

    // Float path: anything the integer encodings cannot hold.
    let floats: Vec<f64> = slots
        .iter()
        .map(|slot| match slot {
            Slot::Int(v) => *v as f64,
            Slot::Float(v) => *v,
            Slot::Category(v) => *v as f64,
            Slot::Missing => f64::NAN,
        })
        .collect();
    let first = floats[0];
    if !first.is_nan() && floats.iter().all(|v| *v == first) {
        return Chunk::ConstF64 { value: first, len };
    }
    Chunk::RawF64(floats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PlatformOptions;
    use pretty_assertions::assert_eq;

    fn small_platform() -> Platform {
        Platform::new(PlatformOptions {
            chunk_rows: 4,
            nodes: 1,
        })
    }

    fn fresh_appendable(platform: &Platform) -> AppendableColumn {
        let key = crate::group::ColumnGroup::fresh(platform)
            .fresh_member_key()
            .unwrap();
        AppendableColumn::new(platform, key)
    }

    #[test]
    fn append_and_seal_roundtrips_values() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b0 = appendable.chunk_builder(0);
        b0.append_i64(1);
        b0.append_f64(2.5);
        b0.append_missing();
        b0.close().unwrap();
        let mut b1 = appendable.chunk_builder(1);
        b1.append_i64(4);
        b1.close().unwrap();

        let col = appendable.seal().unwrap();
        assert_eq!(col.len(), 4);
        assert_eq!(col.boundaries(), &[0, 3, 4]);
        assert_eq!(col.at(0).unwrap(), 1.0);
        assert_eq!(col.at(1).unwrap(), 2.5);
        assert!(col.is_missing(2).unwrap());
        assert_eq!(col.at_i64(3).unwrap(), 4);
    }

    #[test]
    fn chunks_close_in_any_order_from_any_thread() {
        let platform = small_platform();
        let appendable = std::sync::Arc::new(fresh_appendable(&platform));
        let handles: Vec<_> = (0..4)
            .rev()
            .map(|cidx| {
                let appendable = appendable.clone();
                std::thread::spawn(move || {
                    let mut b = appendable.chunk_builder(cidx);
                    for i in 0..5 {
                        b.append_i64((cidx * 5 + i) as i64);
                    }
                    b.close().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().expect("builder thread");
        }
        let appendable =
            std::sync::Arc::into_inner(appendable).expect("all builder handles dropped");
        let col = appendable.seal().unwrap();
        assert_eq!(col.len(), 20);
        for row in 0..20 {
            assert_eq!(col.at_i64(row).unwrap(), row as i64);
        }
    }

    #[test]
    fn sealing_with_an_interior_gap_fails() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b0 = appendable.chunk_builder(0);
        b0.append_i64(1);
        b0.close().unwrap();
        let mut b2 = appendable.chunk_builder(2);
        b2.append_i64(3);
        b2.close().unwrap();
        assert!(matches!(
            appendable.seal(),
            Err(ColumnarError::InvalidState(_))
        ));
    }

    #[test]
    fn trailing_unbuilt_chunks_are_trimmed() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        // Touch slot 3 without ever closing chunks 1..3.
        let mut b0 = appendable.chunk_builder(0);
        b0.append_i64(7);
        b0.close().unwrap();
        let b3 = appendable.chunk_builder(3);
        drop(b3);
        let col = appendable.seal().unwrap();
        assert_eq!(col.num_chunks(), 1);
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn constant_and_boolean_chunks_compress() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b0 = appendable.chunk_builder(0);
        for _ in 0..100 {
            b0.append_i64(7);
        }
        b0.close().unwrap();
        let mut b1 = appendable.chunk_builder(1);
        for i in 0..100 {
            b1.append_i64(i % 2);
        }
        b1.close().unwrap();
        let col = appendable.seal().unwrap();
        assert!(matches!(
            col.fetch_chunk(0).unwrap(),
            Chunk::ConstI64 { value: 7, .. }
        ));
        let bits = col.fetch_chunk(1).unwrap();
        assert!(matches!(bits, Chunk::Bits(_)));
        assert!(bits.byte_size() < 100);
        assert_eq!(col.at_i64(101).unwrap(), 1);
    }

    #[test]
    fn integral_doubles_compress_as_integers() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b = appendable.chunk_builder(0);
        for v in [1.0, 2.0, 3.0] {
            b.append_f64(v);
        }
        b.close().unwrap();
        let col = appendable.seal().unwrap();
        assert!(!col.fetch_chunk(0).unwrap().has_float());
        assert_eq!(col.at_i64(2).unwrap(), 3);
    }

    #[test]
    fn category_chunks_carry_the_domain() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        appendable.set_domain(vec!["red".into(), "blue".into()]);
        let mut b = appendable.chunk_builder(0);
        b.append_category(1);
        b.append_category(0);
        b.append_missing();
        b.close().unwrap();
        let col = appendable.seal().unwrap();
        assert!(col.is_categorical());
        assert_eq!(col.domain().unwrap(), &["red".to_string(), "blue".to_string()]);
        assert_eq!(col.at_i64(0).unwrap(), 1);
    }

    #[test]
    fn mixed_category_and_number_chunks_blank_the_categories() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        appendable.set_domain(vec!["x".into()]);
        let mut b0 = appendable.chunk_builder(0);
        b0.append_category(0);
        b0.append_category(0);
        b0.close().unwrap();
        let mut b1 = appendable.chunk_builder(1);
        b1.append_i64(5);
        b1.close().unwrap();
        let col = appendable.seal().unwrap();
        assert!(!col.is_categorical());
        assert!(col.is_missing(0).unwrap());
        assert!(col.is_missing(1).unwrap());
        assert_eq!(col.at_i64(2).unwrap(), 5);
    }

    #[test]
    fn a_single_time_format_survives_sealing() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b = appendable.chunk_builder(0);
        b.append_time(1_000_000, 3);
        b.append_time(2_000_000, 3);
        b.close().unwrap();
        let col = appendable.seal().unwrap();
        assert_eq!(col.time_code(), Some(3));
    }

    #[test]
    fn disagreeing_time_formats_fall_back_to_numbers() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b0 = appendable.chunk_builder(0);
        b0.append_time(1_000, 1);
        b0.close().unwrap();
        let mut b1 = appendable.chunk_builder(1);
        b1.append_time(2_000, 2);
        b1.close().unwrap();
        let col = appendable.seal().unwrap();
        assert_eq!(col.time_code(), None);
        assert_eq!(col.at_i64(0).unwrap(), 1_000);
    }

    #[test]
    fn an_all_missing_chunk_is_one_constant() {
        let platform = small_platform();
        let appendable = fresh_appendable(&platform);
        let mut b = appendable.chunk_builder(0);
        for _ in 0..50 {
            b.append_missing();
        }
        b.close().unwrap();
        let col = appendable.seal().unwrap();
        assert!(matches!(
            col.fetch_chunk(0).unwrap(),
            Chunk::ConstF64 { .. }
        ));
        assert!(col.is_missing(25).unwrap());
    }
}
