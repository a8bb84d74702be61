//! Property checks for the build protocol and row slicing: whatever the
//! chunking, a sealed column reads back exactly what was appended, and a
//! slice agrees with direct indexing.

use proptest::prelude::*;
use strata_columnar::{
    AppendableColumn, ColumnGroup, Frame, Platform, PlatformOptions, RowSelection,
};

fn platform() -> Platform {
    Platform::new(PlatformOptions {
        chunk_rows: 16,
        nodes: 3,
    })
}

/// Split `values` into chunks at the given relative cut sizes and build
/// a column from them.
fn build(platform: &Platform, values: &[Option<i64>], cuts: &[usize]) -> strata_columnar::Column {
    let group = ColumnGroup::fresh(platform);
    let appendable = AppendableColumn::new(platform, group.fresh_member_key().unwrap());
    let mut at = 0;
    let mut cidx = 0;
    let mut cuts = cuts.iter();
    while at < values.len() {
        let take = cuts.next().copied().unwrap_or(usize::MAX).clamp(1, values.len() - at);
        let mut b = appendable.chunk_builder(cidx);
        for v in &values[at..at + take] {
            match v {
                Some(v) => b.append_i64(*v),
                None => b.append_missing(),
            }
        }
        b.close().unwrap();
        at += take;
        cidx += 1;
    }
    appendable.seal().unwrap()
}

fn values_and_cuts() -> impl Strategy<Value = (Vec<Option<i64>>, Vec<usize>)> {
    (
        prop::collection::vec(
            prop_oneof![
                3 => any::<i32>().prop_map(|v| Some(v as i64)),
                1 => Just(None),
            ],
            1..120,
        ),
        prop::collection::vec(1usize..40, 1..10),
    )
}

proptest! {
    #[test]
    fn sealed_columns_read_back_exactly((values, cuts) in values_and_cuts()) {
        let platform = platform();
        let col = build(&platform, &values, &cuts);

        prop_assert_eq!(col.len(), values.len() as u64);
        let boundaries = col.boundaries();
        prop_assert_eq!(boundaries[0], 0);
        prop_assert!(boundaries.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(*boundaries.last().unwrap(), values.len() as u64);

        for (row, v) in values.iter().enumerate() {
            match v {
                Some(v) => prop_assert_eq!(col.at_i64(row as u64).unwrap(), *v),
                None => prop_assert!(col.is_missing(row as u64).unwrap()),
            }
        }
    }

    #[test]
    fn rollups_match_a_direct_scan((values, cuts) in values_and_cuts()) {
        let platform = platform();
        let mut col = build(&platform, &values, &cuts);
        let stats = col.rollup().unwrap();

        let present: Vec<i64> = values.iter().filter_map(|v| *v).collect();
        prop_assert_eq!(stats.rows, values.len() as u64);
        prop_assert_eq!(stats.na_count, (values.len() - present.len()) as u64);
        prop_assert_eq!(stats.min, present.iter().min().map(|&v| v as f64));
        prop_assert_eq!(stats.max, present.iter().max().map(|&v| v as f64));
        if let Some(mean) = stats.mean {
            let expect = present.iter().map(|&v| v as f64).sum::<f64>() / present.len() as f64;
            prop_assert!((mean - expect).abs() < 1e-6 * (1.0 + expect.abs()));
        }
        prop_assert!(stats.is_integral);
    }

    #[test]
    fn slices_agree_with_direct_indexing(
        (values, cuts) in values_and_cuts(),
        picks in prop::collection::vec(0u64..200, 0..40),
    ) {
        let platform = platform();
        let col = build(&platform, &values, &cuts);
        let frame = Frame::new(vec!["v".into()], vec![col]).unwrap();
        let sliced = frame
            .deep_slice(&platform, &RowSelection::Include(picks.clone()), None)
            .unwrap();

        prop_assert_eq!(sliced.num_rows(), picks.len() as u64);
        let out = sliced.column_at(0);
        for (i, &row) in picks.iter().enumerate() {
            let expect = values.get(row as usize).copied().flatten();
            match expect {
                Some(v) => prop_assert_eq!(out.at_i64(i as u64).unwrap(), v),
                None => prop_assert!(out.is_missing(i as u64).unwrap()),
            }
        }
    }
}
