#![forbid(unsafe_code)]

//! Derived views: columns that read through another column instead of
//! owning data chunks. A subset view reorders or filters rows, a remap
//! view substitutes values. Neither materializes the master's data, and
//! deleting a view never touches the master.

use crate::column::{Column, ColumnKind, MAX_DOMAIN_SIZE};
use crate::context::Platform;
use crate::error::{ColumnarError, Result};
use std::collections::BTreeSet;
use strata_store::run_over_chunks;

impl Column {
    /// A view over this column whose row `i` reads the master's row
    /// `rows.at_i64(i)`. Row numbers outside the master read as missing.
    ///
    /// The view takes ownership of the `rows` column: removing the view
    /// removes `rows` too. The view joins the rows column's group, so it
    /// shares chunk layout with `rows`, not with the master.
    pub fn make_subset(&self, platform: &Platform, rows: &Column) -> Result<Column> {
        let key = rows.group().fresh_member_key()?;
        let mut view = Column::new_plain(platform.store().clone(), key, rows.boundaries.clone());
        view.kind = ColumnKind::Subset {
            master: self.key.clone(),
            rows: rows.key.clone(),
        };
        view.domain = self.domain.clone();
        view.time = self.time;
        view.publish()?;
        Ok(view)
    }

    /// A view over this column that replaces each read value by its
    /// target in a sorted lookup table. With no explicit targets the
    /// mapped value is the position in `values`; values outside the
    /// table read as missing.
    ///
    /// Remapping a remap view composes the tables into one flat view
    /// over the underlying column, so reads never chain lookups.
    pub fn make_remap(
        &self,
        platform: &Platform,
        values: Vec<i64>,
        targets: Option<Vec<i64>>,
        domain: Option<Vec<String>>,
    ) -> Result<Column> {
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]), "table must be sorted");
        let (master, values, targets) = match &self.kind {
            ColumnKind::Remap {
                master,
                values: inner_values,
                targets: inner_targets,
            } => {
                let (values, targets) =
                    compose_tables(inner_values, inner_targets.as_deref(), &values, targets.as_deref());
                (master.clone(), values, targets)
            }
            _ => (self.key.clone(), values, targets),
        };
        let key = self.group().fresh_member_key()?;
        let mut view = Column::new_plain(platform.store().clone(), key, self.boundaries.clone());
        view.kind = ColumnKind::Remap {
            master,
            values,
            targets,
        };
        view.domain = domain;
        view.publish()?;
        Ok(view)
    }

    /// A categorical rendition of this column: reads yield dense domain
    /// indices, and the domain holds the distinct source values in
    /// ascending order (as strings).
    ///
    /// A categorical column converts to an identity view of itself. A
    /// column with any non-integer value cannot convert, and a distinct
    /// count past [`MAX_DOMAIN_SIZE`] fails outright rather than
    /// truncating the domain.
    pub fn to_categorical(&self, platform: &Platform) -> Result<Column> {
        if let Some(domain) = self.domain.clone() {
            let values = (0..domain.len() as i64).collect();
            return self.make_remap(platform, values, None, Some(domain));
        }
        let distinct = self.distinct_values()?;
        if distinct.len() > MAX_DOMAIN_SIZE {
            return Err(ColumnarError::CardinalityExceeded {
                found: distinct.len(),
                max: MAX_DOMAIN_SIZE,
            });
        }
        let values: Vec<i64> = distinct.into_iter().collect();
        let domain: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.make_remap(platform, values, None, Some(domain))
    }

    /// The distinct values of an integer column, gathered per chunk and
    /// merged. Fails on the first non-integer value.
    fn distinct_values(&self) -> Result<BTreeSet<i64>> {
        let merged = run_over_chunks(
            self.num_chunks(),
            |cidx| {
                let cursor = self.cursor(cidx)?;
                let len = (self.boundaries[cidx + 1] - self.boundaries[cidx]) as usize;
                let mut seen = BTreeSet::new();
                for idx in 0..len {
                    if let Some(v) = cursor.get_f64(idx)? {
                        if v.fract() != 0.0 {
                            return Err(ColumnarError::Incompatibility(format!(
                                "cannot make a categorical from non-integer value {v}"
                            )));
                        }
                        seen.insert(v as i64);
                    }
                }
                Ok(seen)
            },
            |mut a, b| {
                a.extend(b);
                a
            },
        )?;
        Ok(merged.unwrap_or_default())
    }
}

/// Flatten `outer` applied after `inner` into one table. Entries whose
/// intermediate value falls outside the outer table are dropped, so the
/// composed view reads them as missing just as chained views would.
fn compose_tables(
    inner_values: &[i64],
    inner_targets: Option<&[i64]>,
    outer_values: &[i64],
    outer_targets: Option<&[i64]>,
) -> (Vec<i64>, Option<Vec<i64>>) {
    let mut values = Vec::with_capacity(inner_values.len());
    let mut targets = Vec::with_capacity(inner_values.len());
    for (pos, &v) in inner_values.iter().enumerate() {
        let mid = match inner_targets {
            Some(t) => t[pos],
            None => pos as i64,
        };
        if let Ok(outer_pos) = outer_values.binary_search(&mid) {
            values.push(v);
            targets.push(match outer_targets {
                Some(t) => t[outer_pos],
                None => outer_pos as i64,
            });
        }
    }
    (values, Some(targets))
}
