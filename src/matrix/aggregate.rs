//! Whole-matrix aggregation kernels
//!
//! Every kernel takes an `ignore_na` flag; NaN is the missing-value
//! sentinel. The outer loops share one structure: columns already resident
//! in the cache are processed first and marked done, then the remaining
//! columns are streamed in ascending order. Nothing is evicted before it
//! has been used, so each on-disk column is read at most once per sweep.
//!
//! Variance uses the one-pass Welford update rather than the naive
//! `sum(x^2) - sum(x)^2 / n` form, which cancels catastrophically on
//! large matrices.

use crate::Result;

use super::BufferedMatrix;

/// Median of a non-empty buffer with no NaNs, by partial-sort selection.
/// For an even count the two central order statistics are averaged.
fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    let mid = n / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let (_, lower, _) = values.select_nth_unstable_by(mid - 1, f64::total_cmp);
        (upper + *lower) / 2.0
    }
}

impl BufferedMatrix {
    /// Largest cell value, plus a flag reporting whether any comparison
    /// succeeded.
    ///
    /// A non-ignored NaN makes the result NaN. With `ignore_na` and no
    /// comparable element the result is `-inf` and the flag is false.
    pub fn max(&mut self, ignore_na: bool) -> Result<(f64, bool)> {
        let mut best = f64::NEG_INFINITY;
        let mut any_finite = false;
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        return Ok((f64::NAN, any_finite));
                    }
                    continue;
                }
                if best < v {
                    best = v;
                    any_finite = true;
                }
            }
        }
        if !any_finite {
            log::warn!("max: no finite arguments, returning -inf");
        }
        Ok((best, any_finite))
    }

    /// Smallest cell value, plus a flag reporting whether any comparison
    /// succeeded. Mirror of [`max`](Self::max); the empty result is `+inf`.
    pub fn min(&mut self, ignore_na: bool) -> Result<(f64, bool)> {
        let mut best = f64::INFINITY;
        let mut any_finite = false;
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        return Ok((f64::NAN, any_finite));
                    }
                    continue;
                }
                if best > v {
                    best = v;
                    any_finite = true;
                }
            }
        }
        if !any_finite {
            log::warn!("min: no finite arguments, returning inf");
        }
        Ok((best, any_finite))
    }

    /// Sum of every cell.
    pub fn sum(&mut self, ignore_na: bool) -> Result<f64> {
        let mut total = 0.0;
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        return Ok(f64::NAN);
                    }
                    continue;
                }
                total += v;
            }
        }
        Ok(total)
    }

    /// Mean over the non-NaN cells. NaN when there are none.
    pub fn mean(&mut self, ignore_na: bool) -> Result<f64> {
        let mut total = 0.0;
        let mut count = 0usize;
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        return Ok(f64::NAN);
                    }
                    continue;
                }
                total += v;
                count += 1;
            }
        }
        Ok(total / count as f64)
    }

    /// Sample variance over the non-NaN cells, by Welford's one-pass
    /// update. NaN with fewer than two observations.
    pub fn var(&mut self, ignore_na: bool) -> Result<f64> {
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        return Ok(f64::NAN);
                    }
                    continue;
                }
                count += 1;
                if count == 1 {
                    mean = v;
                } else {
                    let k = count as f64;
                    let delta = v - mean;
                    m2 += (k - 1.0) * delta * delta / k;
                    mean += delta / k;
                }
            }
        }
        if count < 2 {
            Ok(f64::NAN)
        } else {
            Ok(m2 / (count - 1) as f64)
        }
    }

    /// Per-column sums.
    pub fn col_sums(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.for_each_column(|m, col| m.column_sum(col, ignore_na))
    }

    /// Per-column means.
    pub fn col_means(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.for_each_column(|m, col| m.column_mean(col, ignore_na))
    }

    /// Per-column sample variances.
    pub fn col_vars(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.for_each_column(|m, col| m.column_var(col, ignore_na))
    }

    /// Per-column maxima.
    pub fn col_max(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.for_each_column(|m, col| m.column_extremum(col, ignore_na, false))
    }

    /// Per-column minima.
    pub fn col_min(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.for_each_column(|m, col| m.column_extremum(col, ignore_na, true))
    }

    /// Per-column medians, by partial-sort selection on a compaction of
    /// the non-NaN values.
    pub fn col_medians(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.for_each_column(|m, col| m.column_median(col, ignore_na))
    }

    /// Per-column `(min, max)` pairs.
    pub fn col_ranges(&mut self, ignore_na: bool) -> Result<Vec<(f64, f64)>> {
        let mut out = vec![(0.0, 0.0); self.cols()];
        for col in self.sweep_order() {
            out[col] = self.column_range(col, ignore_na)?;
        }
        Ok(out)
    }

    /// Per-row sums.
    pub fn row_sums(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        let mut sums = vec![0.0; self.rows()];
        let mut saw_nan = vec![false; self.rows()];
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        saw_nan[row] = true;
                    }
                    continue;
                }
                sums[row] += v;
            }
        }
        for (sum, &nan) in sums.iter_mut().zip(&saw_nan) {
            if nan {
                *sum = f64::NAN;
            }
        }
        Ok(sums)
    }

    /// Per-row means. An all-NaN row is NaN even with `ignore_na`.
    pub fn row_means(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        let mut sums = vec![0.0; self.rows()];
        let mut counts = vec![0usize; self.rows()];
        let mut saw_nan = vec![false; self.rows()];
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        saw_nan[row] = true;
                    }
                    continue;
                }
                sums[row] += v;
                counts[row] += 1;
            }
        }
        let means = sums
            .iter()
            .zip(&counts)
            .zip(&saw_nan)
            .map(|((&sum, &count), &nan)| {
                if nan {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            })
            .collect();
        Ok(means)
    }

    /// Per-row sample variances, Welford update applied per row. NaN for
    /// rows with fewer than two observations.
    pub fn row_vars(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        let mut counts = vec![0usize; self.rows()];
        let mut means = vec![0.0; self.rows()];
        let mut m2 = vec![0.0; self.rows()];
        let mut saw_nan = vec![false; self.rows()];
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        saw_nan[row] = true;
                    }
                    continue;
                }
                counts[row] += 1;
                if counts[row] == 1 {
                    means[row] = v;
                } else {
                    let k = counts[row] as f64;
                    let delta = v - means[row];
                    m2[row] += (k - 1.0) * delta * delta / k;
                    means[row] += delta / k;
                }
            }
        }
        let vars = m2
            .iter()
            .zip(&counts)
            .zip(&saw_nan)
            .map(|((&m2, &count), &nan)| {
                if nan || count < 2 {
                    f64::NAN
                } else {
                    m2 / (count - 1) as f64
                }
            })
            .collect();
        Ok(vars)
    }

    /// Per-row maxima. An all-NaN row is NaN even with `ignore_na`.
    pub fn row_max(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.row_extrema(ignore_na, false)
    }

    /// Per-row minima. An all-NaN row is NaN even with `ignore_na`.
    pub fn row_min(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        self.row_extrema(ignore_na, true)
    }

    /// Per-row medians.
    ///
    /// Each row is gathered in full before selecting, so this walks the
    /// matrix row-major; it is only efficient when row mode is active with
    /// a window tall enough to amortize the loads.
    pub fn row_medians(&mut self, ignore_na: bool) -> Result<Vec<f64>> {
        let mut out = vec![0.0; self.rows()];
        let mut buffer = Vec::with_capacity(self.cols());
        for row in 0..self.rows() {
            buffer.clear();
            let mut saw_nan = false;
            for col in 0..self.cols() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        saw_nan = true;
                        break;
                    }
                } else {
                    buffer.push(v);
                }
            }
            out[row] = if saw_nan || buffer.is_empty() {
                f64::NAN
            } else {
                median_in_place(&mut buffer)
            };
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Per-column helpers, reused by the cache-ordered outer loops
    // ------------------------------------------------------------------

    fn for_each_column<F>(&mut self, mut per_column: F) -> Result<Vec<f64>>
    where
        F: FnMut(&mut Self, usize) -> Result<f64>,
    {
        let mut out = vec![0.0; self.cols()];
        for col in self.sweep_order() {
            out[col] = per_column(self, col)?;
        }
        Ok(out)
    }

    fn column_sum(&mut self, col: usize, ignore_na: bool) -> Result<f64> {
        let mut sum = 0.0;
        for row in 0..self.rows() {
            let v = self.cell(row, col)?;
            if v.is_nan() {
                if !ignore_na {
                    return Ok(f64::NAN);
                }
                continue;
            }
            sum += v;
        }
        Ok(sum)
    }

    fn column_mean(&mut self, col: usize, ignore_na: bool) -> Result<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for row in 0..self.rows() {
            let v = self.cell(row, col)?;
            if v.is_nan() {
                if !ignore_na {
                    return Ok(f64::NAN);
                }
                continue;
            }
            sum += v;
            count += 1;
        }
        Ok(sum / count as f64)
    }

    fn column_var(&mut self, col: usize, ignore_na: bool) -> Result<f64> {
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for row in 0..self.rows() {
            let v = self.cell(row, col)?;
            if v.is_nan() {
                if !ignore_na {
                    return Ok(f64::NAN);
                }
                continue;
            }
            count += 1;
            if count == 1 {
                mean = v;
            } else {
                let k = count as f64;
                let delta = v - mean;
                m2 += (k - 1.0) * delta * delta / k;
                mean += delta / k;
            }
        }
        if count < 2 {
            Ok(f64::NAN)
        } else {
            Ok(m2 / (count - 1) as f64)
        }
    }

    fn column_extremum(&mut self, col: usize, ignore_na: bool, minimum: bool) -> Result<f64> {
        let mut best = if minimum {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        for row in 0..self.rows() {
            let v = self.cell(row, col)?;
            if v.is_nan() {
                if !ignore_na {
                    return Ok(f64::NAN);
                }
                continue;
            }
            if (minimum && v < best) || (!minimum && v > best) {
                best = v;
            }
        }
        Ok(best)
    }

    fn column_median(&mut self, col: usize, ignore_na: bool) -> Result<f64> {
        let mut buffer = Vec::with_capacity(self.rows());
        for row in 0..self.rows() {
            let v = self.cell(row, col)?;
            if v.is_nan() {
                if !ignore_na {
                    return Ok(f64::NAN);
                }
            } else {
                buffer.push(v);
            }
        }
        if buffer.is_empty() {
            Ok(f64::NAN)
        } else {
            Ok(median_in_place(&mut buffer))
        }
    }

    fn column_range(&mut self, col: usize, ignore_na: bool) -> Result<(f64, f64)> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for row in 0..self.rows() {
            let v = self.cell(row, col)?;
            if v.is_nan() {
                if !ignore_na {
                    return Ok((f64::NAN, f64::NAN));
                }
                continue;
            }
            if v < lo {
                lo = v;
            }
            if v > hi {
                hi = v;
            }
        }
        Ok((lo, hi))
    }

    fn row_extrema(&mut self, ignore_na: bool, minimum: bool) -> Result<Vec<f64>> {
        let init = if minimum {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        let mut best = vec![init; self.rows()];
        let mut seen = vec![false; self.rows()];
        let mut saw_nan = vec![false; self.rows()];
        for col in self.sweep_order() {
            for row in 0..self.rows() {
                let v = self.cell(row, col)?;
                if v.is_nan() {
                    if !ignore_na {
                        saw_nan[row] = true;
                    }
                    continue;
                }
                seen[row] = true;
                if (minimum && v < best[row]) || (!minimum && v > best[row]) {
                    best[row] = v;
                }
            }
        }
        for row in 0..best.len() {
            if saw_nan[row] || !seen[row] {
                best[row] = f64::NAN;
            }
        }
        Ok(best)
    }
}
