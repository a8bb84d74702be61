#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Summary statistics over a whole column.
///
/// `min`/`max`/`mean`/`sigma` are `None` when every row is missing (and
/// `sigma` additionally needs at least two non-missing rows). Keeping
/// them optional rather than NaN also keeps the header JSON-clean.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollupStats {
    pub rows: u64,
    pub na_count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub sigma: Option<f64>,
    /// True when every non-missing value is an exact integer.
    pub is_integral: bool,
    /// Total serialized size of the storage this column itself owns: its
    /// data chunks, or for a subset view its row-index chunks. Remap
    /// views own no chunks and report 0; a master's storage is never
    /// counted again through its views.
    pub byte_size: u64,
}

impl RollupStats {
    pub fn empty() -> RollupStats {
        RollupStats {
            rows: 0,
            na_count: 0,
            min: None,
            max: None,
            mean: None,
            sigma: None,
            is_integral: true,
            byte_size: 0,
        }
    }
}

/// Rollup lifecycle, stored inside the column header.
///
/// Writes invalidate to `NotComputed`; an open write session parks the
/// state at `WriteInProgress` so concurrent readers fail fast instead of
/// computing stats over a half-written column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RollupState {
    NotComputed,
    WriteInProgress,
    Valid(RollupStats),
}

/// Partial rollup of one chunk, merged pairwise across chunks.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Partial {
    pub rows: u64,
    pub na_count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sum of squared deviations from `mean` (for parallel variance).
    pub m2: f64,
    pub is_integral: bool,
    pub byte_size: u64,
}

impl Partial {
    /// Merge two partials. Uses the pairwise update for mean and m2 so
    /// the result is independent of merge order up to rounding.
    pub fn merge(a: Partial, b: Partial) -> Partial {
        let (na, nb) = (a.present() as f64, b.present() as f64);
        let (mean, m2) = if na == 0.0 {
            (b.mean, b.m2)
        } else if nb == 0.0 {
            (a.mean, a.m2)
        } else {
            let delta = b.mean - a.mean;
            let n = na + nb;
            (
                (a.mean * na + b.mean * nb) / n,
                a.m2 + b.m2 + delta * delta * na * nb / n,
            )
        };
        Partial {
            rows: a.rows + b.rows,
            na_count: a.na_count + b.na_count,
            min: a.min.min(b.min),
            max: a.max.max(b.max),
            mean,
            m2,
            is_integral: a.is_integral && b.is_integral,
            byte_size: a.byte_size + b.byte_size,
        }
    }

    fn present(&self) -> u64 {
        self.rows - self.na_count
    }

    pub fn finish(self) -> RollupStats {
        let present = self.present();
        let some = present > 0;
        RollupStats {
            rows: self.rows,
            na_count: self.na_count,
            min: some.then_some(self.min),
            max: some.then_some(self.max),
            mean: some.then_some(self.mean),
            sigma: (present > 1).then(|| (self.m2 / (present - 1) as f64).sqrt()),
            is_integral: self.is_integral,
            byte_size: self.byte_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn partial_of(values: &[Option<f64>]) -> Partial {
        let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
        let n = present.len() as f64;
        let mean = if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / n
        };
        let m2 = present.iter().map(|v| (v - mean) * (v - mean)).sum();
        Partial {
            rows: values.len() as u64,
            na_count: (values.len() - present.len()) as u64,
            min: present.iter().copied().fold(f64::INFINITY, f64::min),
            max: present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            m2,
            is_integral: present.iter().all(|v| v.fract() == 0.0),
            byte_size: 0,
        }
    }

    #[test]
    fn merged_stats_match_a_single_pass() {
        let left = partial_of(&[Some(1.0), Some(2.0), None]);
        let right = partial_of(&[Some(3.0), Some(4.0), Some(5.0)]);
        let merged = Partial::merge(left, right).finish();

        let whole = partial_of(&[Some(1.0), Some(2.0), None, Some(3.0), Some(4.0), Some(5.0)])
            .finish();
        assert_eq!(merged.rows, 6);
        assert_eq!(merged.na_count, 1);
        assert_eq!(merged.min, Some(1.0));
        assert_eq!(merged.max, Some(5.0));
        assert_eq!(merged.mean, whole.mean);
        let (a, b) = (merged.sigma.unwrap(), whole.sigma.unwrap());
        assert!((a - b).abs() < 1e-12, "{a} vs {b}");
    }

    #[test]
    fn all_missing_yields_no_moments() {
        let stats = partial_of(&[None, None]).finish();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.na_count, 2);
        assert_eq!(stats.min, None);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.sigma, None);
    }

    #[test]
    fn sigma_needs_two_present_rows() {
        let stats = partial_of(&[Some(4.0), None]).finish();
        assert_eq!(stats.mean, Some(4.0));
        assert_eq!(stats.sigma, None);
    }

    #[test]
    fn merging_an_empty_side_is_identity_on_moments() {
        let some = partial_of(&[Some(2.0), Some(6.0)]);
        let none = partial_of(&[None]);
        let merged = Partial::merge(none, some).finish();
        assert_eq!(merged.mean, Some(4.0));
        assert_eq!(merged.rows, 3);
        assert_eq!(merged.na_count, 1);
    }
}
