//! Reducers over full per-group sample vectors. Keeping the whole sample
//! around (rather than streaming accumulators) keeps the standard-error
//! computation exact on the sample.

pub fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Standard error of the mean: sample standard deviation (n - 1 in the
/// denominator) over sqrt(n). A single sample has no spread estimate, so
/// n = 1 yields NaN; callers must not paper over that with 0.
pub fn std_err(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (n - 1.0);
    (var / n).sqrt()
}

/// Median, averaging the two middle values for even-sized samples.
pub fn median(xs: &[f64]) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

pub fn max(xs: &[f64]) -> f64 {
    xs.iter().cloned().fold(f64::NAN, f64::max)
}
