//! Aggregation kernel tests: cache-aware sweeps, NaN semantics, agreement
//! between the global, per-column and per-row reductions.

use bufmat::BufferedMatrix;
use tempfile::tempdir;

/// rows=5 matrix with A[i][j] = i + j, cache too small to hold it all.
fn counting_matrix(dir: &std::path::Path) -> BufferedMatrix {
    let mut m = BufferedMatrix::new(2, 2, "agg", dir).unwrap();
    m.set_rows(5).unwrap();
    for j in 0..5 {
        m.append_column().unwrap();
        for i in 0..5 {
            m.set(i, j, (i + j) as f64).unwrap();
        }
    }
    m
}

/// rows=3 matrix: col 0 = {1, NaN, 3}, col 1 = {NaN, 5, 6}, col 2 = {7, 8, 9}.
fn nan_matrix(dir: &std::path::Path) -> BufferedMatrix {
    let mut m = BufferedMatrix::new(2, 2, "nan", dir).unwrap();
    m.set_rows(3).unwrap();
    for _ in 0..3 {
        m.append_column().unwrap();
    }
    m.write_columns(
        &[0, 1, 2],
        &[1.0, f64::NAN, 3.0, f64::NAN, 5.0, 6.0, 7.0, 8.0, 9.0],
    )
    .unwrap();
    m
}

#[test]
fn col_sums_under_eviction_pressure() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    assert_eq!(
        m.col_sums(false).unwrap(),
        vec![10.0, 15.0, 20.0, 25.0, 30.0]
    );
    assert_eq!(m.sum(false).unwrap(), 100.0);
}

#[test]
fn row_sums_constant_rows() {
    let dir = tempdir().unwrap();
    let mut m = BufferedMatrix::new(2, 2, "agg", dir.path()).unwrap();
    m.set_rows(10).unwrap();
    for j in 0..10 {
        m.append_column().unwrap();
        for i in 0..10 {
            m.set(i, j, j as f64).unwrap();
        }
    }

    assert_eq!(m.row_sums(false).unwrap(), vec![45.0; 10]);
}

#[test]
fn reduction_agreement() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    let total = m.sum(false).unwrap();
    let by_cols: f64 = m.col_sums(false).unwrap().iter().sum();
    let by_rows: f64 = m.row_sums(false).unwrap().iter().sum();
    assert!((total - by_cols).abs() < 1e-9);
    assert!((total - by_rows).abs() < 1e-9);
}

#[test]
fn nan_propagates_when_not_ignored() {
    let dir = tempdir().unwrap();
    let mut m = nan_matrix(dir.path());

    assert!(m.sum(false).unwrap().is_nan());
    assert!(m.mean(false).unwrap().is_nan());
    assert!(m.var(false).unwrap().is_nan());
    let (max, _) = m.max(false).unwrap();
    assert!(max.is_nan());
    let (min, _) = m.min(false).unwrap();
    assert!(min.is_nan());

    let sums = m.col_sums(false).unwrap();
    assert!(sums[0].is_nan());
    assert!(sums[1].is_nan());
    assert_eq!(sums[2], 24.0);

    let row_sums = m.row_sums(false).unwrap();
    assert!(row_sums[0].is_nan());
    assert!(row_sums[1].is_nan());
    assert_eq!(row_sums[2], 18.0);
}

#[test]
fn nan_skipped_when_ignored() {
    let dir = tempdir().unwrap();
    let mut m = nan_matrix(dir.path());

    assert_eq!(m.sum(true).unwrap(), 39.0);
    assert_eq!(m.col_means(true).unwrap(), vec![2.0, 5.5, 8.0]);

    let means = m.col_means(false).unwrap();
    assert!(means[0].is_nan());
    assert!(means[1].is_nan());
    assert_eq!(means[2], 8.0);

    let (max, any_finite) = m.max(true).unwrap();
    assert_eq!(max, 9.0);
    assert!(any_finite);
    let (min, any_finite) = m.min(true).unwrap();
    assert_eq!(min, 1.0);
    assert!(any_finite);
}

#[test]
fn global_extremes_and_mean() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    let (max, any_finite) = m.max(false).unwrap();
    assert_eq!(max, 8.0);
    assert!(any_finite);
    let (min, _) = m.min(false).unwrap();
    assert_eq!(min, 0.0);
    assert_eq!(m.mean(false).unwrap(), 4.0);
}

#[test]
fn col_ranges_agree_with_min_max() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    let ranges = m.col_ranges(false).unwrap();
    let mins = m.col_min(false).unwrap();
    let maxs = m.col_max(false).unwrap();
    for j in 0..5 {
        assert_eq!(ranges[j].0, mins[j]);
        assert_eq!(ranges[j].1, maxs[j]);
    }
    assert_eq!(ranges[0], (0.0, 4.0));
    assert_eq!(ranges[4], (4.0, 8.0));
}

#[test]
fn col_vars_and_medians() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    // Every column is {j, j+1, j+2, j+3, j+4}: variance 2.5, median j+2.
    let vars = m.col_vars(false).unwrap();
    for v in vars {
        assert!((v - 2.5).abs() < 1e-12);
    }
    assert_eq!(
        m.col_medians(false).unwrap(),
        vec![2.0, 3.0, 4.0, 5.0, 6.0]
    );
}

#[test]
fn row_reductions_on_counting_matrix() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    // Row i is {i, i+1, i+2, i+3, i+4}.
    assert_eq!(
        m.row_means(false).unwrap(),
        vec![2.0, 3.0, 4.0, 5.0, 6.0]
    );
    assert_eq!(m.row_max(false).unwrap(), vec![4.0, 5.0, 6.0, 7.0, 8.0]);
    assert_eq!(m.row_min(false).unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    let vars = m.row_vars(false).unwrap();
    for v in vars {
        assert!((v - 2.5).abs() < 1e-12);
    }
}

#[test]
fn row_medians_in_row_mode() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());
    m.set_row_mode(true).unwrap();

    // Row i has odd count: median is i + 2.
    assert_eq!(
        m.row_medians(false).unwrap(),
        vec![2.0, 3.0, 4.0, 5.0, 6.0]
    );

    // Knock one value out per row: even non-NaN count averages the two
    // central order statistics.
    for i in 0..5 {
        m.set(i, 4, f64::NAN).unwrap();
    }
    let medians = m.row_medians(true).unwrap();
    assert_eq!(medians, vec![1.5, 2.5, 3.5, 4.5, 5.5]);

    let strict = m.row_medians(false).unwrap();
    assert!(strict.iter().all(|v| v.is_nan()));
}

#[test]
fn aggregates_agree_across_modes() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    let col_sums = m.col_sums(false).unwrap();
    let var = m.var(false).unwrap();

    m.set_row_mode(true).unwrap();
    assert_eq!(m.col_sums(false).unwrap(), col_sums);
    assert!((m.var(false).unwrap() - var).abs() < 1e-12);
}

#[test]
fn kernels_leave_values_intact() {
    let dir = tempdir().unwrap();
    let mut m = counting_matrix(dir.path());

    let _ = m.sum(false).unwrap();
    let _ = m.col_medians(false).unwrap();
    let _ = m.row_vars(true).unwrap();

    for i in 0..5 {
        for j in 0..5 {
            assert_eq!(m.get(i, j).unwrap(), (i + j) as f64);
        }
    }
}
