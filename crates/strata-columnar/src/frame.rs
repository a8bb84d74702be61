#![forbid(unsafe_code)]

use crate::builder::AppendableColumn;
use crate::column::{Column, Cursor};
use crate::context::Platform;
use crate::error::{ColumnarError, Result};
use crate::group::ColumnGroup;

/// Below this row count, columns from different groups may share a
/// frame as long as their boundaries agree; above it, matching layouts
/// from different groups are treated as coincidence and rejected.
pub const SMALL_COLUMN_ROWS: u64 = 10_000;

/// Which rows a [`Frame::deep_slice`] copies. Row numbers are 0-based.
#[derive(Clone, Debug)]
pub enum RowSelection {
    All,
    /// Exactly these rows, in this order (duplicates allowed). Rows
    /// past the end of the frame come out as missing values.
    Include(Vec<u64>),
    /// Every row except these. Must be sorted ascending.
    Exclude(Vec<u64>),
}

/// A named collection of layout-compatible columns.
///
/// The frame is a client-side object: it holds column handles and
/// names, nothing in the store. Columns keep their identity when added,
/// so two frames can share a column; `remove_all` is the only operation
/// that deletes storage.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(names: Vec<String>, columns: Vec<Column>) -> Result<Frame> {
        debug_assert_eq!(names.len(), columns.len());
        let mut frame = Frame::default();
        for (name, column) in names.into_iter().zip(columns) {
            frame.add(name, column)?;
        }
        Ok(frame)
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn column_at(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Per-column categorical domains, `None` for numeric columns.
    pub fn domains(&self) -> Vec<Option<&[String]>> {
        self.columns.iter().map(Column::domain).collect()
    }

    fn check_compatible(&self, column: &Column) -> Result<()> {
        let Some(first) = self.columns.first() else {
            return Ok(());
        };
        if first.boundaries() != column.boundaries() {
            return Err(ColumnarError::Incompatibility(format!(
                "chunk layouts differ: {:?} vs {:?}",
                first.boundaries(),
                column.boundaries()
            )));
        }
        if first.len() > SMALL_COLUMN_ROWS
            && first.key().group_of() != column.key().group_of()
        {
            return Err(ColumnarError::Incompatibility(
                "large columns from different groups cannot share a frame".into(),
            ));
        }
        Ok(())
    }

    pub fn add(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if self.position(&name).is_some() {
            return Err(ColumnarError::Incompatibility(format!(
                "duplicate column name {name:?}"
            )));
        }
        self.check_compatible(&column)?;
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Detach a column by name. The column keeps its storage.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        Some(self.remove_at(self.position(name)?))
    }

    pub fn remove_at(&mut self, idx: usize) -> Column {
        self.names.remove(idx);
        self.columns.remove(idx)
    }

    /// Swap the column at `idx`, returning the old one.
    pub fn replace(&mut self, idx: usize, column: Column) -> Result<Column> {
        // Check against the others, not the column being replaced.
        if let Some(other) = self.columns.iter().enumerate().find(|(i, _)| *i != idx) {
            let mut probe = Frame::default();
            probe.columns.push(other.1.clone());
            probe.check_compatible(&column)?;
        }
        Ok(std::mem::replace(&mut self.columns[idx], column))
    }

    /// A new frame holding handles to the named columns, in the order
    /// given. No data is copied.
    pub fn subframe(&self, names: &[&str]) -> Result<Frame> {
        let mut frame = Frame::default();
        for &name in names {
            let column = self.column(name).ok_or_else(|| {
                ColumnarError::Incompatibility(format!("no column named {name:?}"))
            })?;
            frame.add(name, column.clone())?;
        }
        Ok(frame)
    }

    /// Delete every column's storage and drop the frame.
    pub fn remove_all(self) {
        for column in self.columns {
            column.remove();
        }
    }

    /// Materialize selected rows (and optionally a subset of columns)
    /// as fresh plain columns in a new group. Views are flattened: the
    /// output never reads through the sources again.
    pub fn deep_slice(
        &self,
        platform: &Platform,
        rows: &RowSelection,
        cols: Option<&[usize]>,
    ) -> Result<Frame> {
        let picked: Vec<usize> = match cols {
            Some(cols) => cols.to_vec(),
            None => (0..self.num_cols()).collect(),
        };
        if picked.is_empty() {
            return Ok(Frame::default());
        }

        let group = ColumnGroup::fresh(platform);
        let first = group.reserve(picked.len() as u32)?;
        let outputs: Vec<AppendableColumn> = (0..picked.len() as u32)
            .map(|i| AppendableColumn::new(platform, group.member_key(first + i)))
            .collect();

        match rows {
            RowSelection::Include(include) => {
                self.slice_include(platform, &picked, &outputs, include)?
            }
            RowSelection::All => self.slice_exclude(&picked, &outputs, &[])?,
            RowSelection::Exclude(exclude) => {
                debug_assert!(exclude.windows(2).all(|w| w[0] < w[1]));
                self.slice_exclude(&picked, &outputs, exclude)?
            }
        }

        let mut names = Vec::with_capacity(picked.len());
        let mut columns = Vec::with_capacity(picked.len());
        for (output, &src) in outputs.into_iter().zip(&picked) {
            let mut column = output.seal()?;
            // The copies inherit the source's interpretation.
            column.domain = self.columns[src].domain().map(<[String]>::to_vec);
            column.time = self.columns[src].time_code();
            column.publish()?;
            names.push(self.names[src].clone());
            columns.push(column);
        }
        Frame::new(names, columns)
    }

    /// One ordered pass over an explicit row list, re-fetching cursors
    /// only when the walk crosses into another source chunk.
    fn slice_include(
        &self,
        platform: &Platform,
        picked: &[usize],
        outputs: &[AppendableColumn],
        include: &[u64],
    ) -> Result<()> {
        let num_rows = self.num_rows();
        let layout = self.columns[picked[0]].boundaries();
        let chunk_rows = platform.chunk_rows().max(1);

        let mut cursors: Option<(usize, Vec<Cursor<'_>>)> = None;
        let mut builders: Vec<_> = outputs.iter().map(|o| o.chunk_builder(0)).collect();
        let mut out_cidx = 0;

        for &row in include {
            if builders[0].len() == chunk_rows {
                for builder in builders.drain(..) {
                    builder.close()?;
                }
                out_cidx += 1;
                builders = outputs.iter().map(|o| o.chunk_builder(out_cidx)).collect();
            }
            if row >= num_rows {
                for builder in &mut builders {
                    builder.append_missing();
                }
                continue;
            }
            let cidx = self.columns[picked[0]].chunk_index_of(row)?;
            let fresh = match &cursors {
                Some((at, _)) if *at == cidx => false,
                _ => true,
            };
            if fresh {
                let set = picked
                    .iter()
                    .map(|&c| self.columns[c].cursor(cidx))
                    .collect::<Result<Vec<_>>>()?;
                cursors = Some((cidx, set));
            }
            let (_, set) = cursors.as_ref().expect("set above");
            let idx = (row - layout[cidx]) as usize;
            for (cursor, builder) in set.iter().zip(&mut builders) {
                copy_value(cursor, idx, builder)?;
            }
        }
        for builder in builders {
            if builder.is_empty() {
                drop(builder); // trimmed at seal
            } else {
                builder.close()?;
            }
        }
        Ok(())
    }

    /// Chunk-parallel shape: one output chunk per source chunk, with the
    /// sorted exclusion list consumed by a moving pointer.
    fn slice_exclude(
        &self,
        picked: &[usize],
        outputs: &[AppendableColumn],
        exclude: &[u64],
    ) -> Result<()> {
        let layout = self.columns[picked[0]].boundaries().to_vec();
        let mut skip = 0usize;
        for cidx in 0..layout.len() - 1 {
            let cursors = picked
                .iter()
                .map(|&c| self.columns[c].cursor(cidx))
                .collect::<Result<Vec<_>>>()?;
            let mut builders: Vec<_> = outputs.iter().map(|o| o.chunk_builder(cidx)).collect();
            for row in layout[cidx]..layout[cidx + 1] {
                if skip < exclude.len() && exclude[skip] == row {
                    skip += 1;
                    continue;
                }
                let idx = (row - layout[cidx]) as usize;
                for (cursor, builder) in cursors.iter().zip(&mut builders) {
                    copy_value(cursor, idx, builder)?;
                }
            }
            for builder in builders {
                builder.close()?;
            }
        }
        Ok(())
    }
}

/// Copy one value, preserving long precision past the exact-double
/// range.
fn copy_value(
    cursor: &Cursor<'_>,
    idx: usize,
    builder: &mut crate::builder::ChunkBuilder<'_>,
) -> Result<()> {
    match cursor.get_f64(idx)? {
        None => builder.append_missing(),
        Some(v) if v.fract() == 0.0 => match cursor.get_i64(idx)? {
            Some(v) => builder.append_i64(v),
            None => builder.append_missing(),
        },
        Some(v) => builder.append_f64(v),
    }
    Ok(())
}
