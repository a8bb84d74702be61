#![forbid(unsafe_code)]

use rayon::prelude::*;

/// Run `map` once per chunk index and fold the partial results pairwise
/// with `reduce`.
///
/// `reduce` must be commutative and associative: partials are merged in
/// whatever order the rayon join tree produces them. Any map error
/// aborts the whole run (fail-fast); no partial result is retained.
///
/// Returns `None` when `chunks == 0`.
pub fn run_over_chunks<T, E, M, R>(chunks: usize, map: M, reduce: R) -> Result<Option<T>, E>
where
    T: Send,
    E: Send,
    M: Fn(usize) -> Result<T, E> + Sync,
    R: Fn(T, T) -> T + Sync,
{
    (0..chunks)
        .into_par_iter()
        .map(|cidx| map(cidx).map(Some))
        .try_reduce(
            || None,
            |a, b| {
                Ok(match (a, b) {
                    (Some(a), Some(b)) => Some(reduce(a, b)),
                    (Some(a), None) => Some(a),
                    (None, b) => b,
                })
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sums_across_chunks() {
        let out: Result<_, ()> = run_over_chunks(100, |cidx| Ok(cidx as u64), |a, b| a + b);
        assert_eq!(out, Ok(Some(4950)));
    }

    #[test]
    fn empty_plan_yields_none() {
        let out: Result<Option<u64>, ()> = run_over_chunks(0, |_| Ok(0), |a, b| a + b);
        assert_eq!(out, Ok(None));
    }

    #[test]
    fn map_error_aborts() {
        let out = run_over_chunks(
            16,
            |cidx| if cidx == 7 { Err("boom") } else { Ok(1u64) },
            |a, b| a + b,
        );
        assert_eq!(out, Err("boom"));
    }
}
