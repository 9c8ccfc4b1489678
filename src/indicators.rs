//! Numerical building blocks for the regression channel
//!
//! All functions treat the position in the slice as the x-axis (bar space),
//! never the timestamp.

/// Ordinary least-squares fit of `values[i] = slope * i + intercept`
///
/// Returns `None` for fewer than two points or when the fit produces
/// non-finite coefficients.
pub fn linear_regression(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }

    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    if slope.is_finite() && intercept.is_finite() {
        Some((slope, intercept))
    } else {
        None
    }
}

/// Population standard deviation of `values[i] - (slope * i + intercept)`
pub fn residual_std_dev(values: &[f64], slope: f64, intercept: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = values
        .iter()
        .enumerate()
        .map(|(i, &y)| {
            let residual = y - (slope * i as f64 + intercept);
            residual * residual
        })
        .sum();

    (sum_sq / values.len() as f64).sqrt()
}

/// `count` evenly spaced points from `start` to `end` inclusive
///
/// A single point resolves to `start`.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|k| if k == count - 1 { end } else { start + step * k as f64 })
                .collect()
        }
    }
}
