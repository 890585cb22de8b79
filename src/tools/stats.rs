use serde::{Deserialize, Serialize};

pub const HISTOGRAM_BINS: usize = 20;

/// Thresholds reported in the cumulative retention table.
pub const RETENTION_GRID: [f64; 8] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];

/// Which side of a threshold counts as a passing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDirection {
    /// Higher is better: a value passes when value >= threshold (IoU).
    AtLeast,
    /// Lower is better: a value passes when value <= threshold (center distance).
    AtMost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    /// bins + 1 edges over [0, 1].
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retention {
    pub thresholds: Vec<f64>,
    /// Percentage of values passing at each threshold.
    pub percent_passing: Vec<f64>,
}

/// Everything the UI needs to pick a threshold for one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub histogram: Histogram,
    pub percentiles: Option<Percentiles>,
    pub cumulative: Retention,
    pub suggested_threshold: f64,
}

pub fn summarize_metric(values: &[f64], direction: PassDirection, fallback: f64) -> MetricSummary {
    let histogram = histogram(values);
    MetricSummary {
        percentiles: percentiles(values),
        cumulative: retention(values, direction),
        suggested_threshold: otsu_threshold(&histogram, fallback),
        histogram,
    }
}

/// Fixed-bin histogram over [0, 1]. Bins are [lo, hi) except the last,
/// which also includes 1.0. Out-of-range values are clamped.
pub fn histogram(values: &[f64]) -> Histogram {
    let width = 1.0 / HISTOGRAM_BINS as f64;
    let edges = (0..=HISTOGRAM_BINS).map(|i| i as f64 * width).collect();
    let mut counts = vec![0u64; HISTOGRAM_BINS];
    for v in values {
        let idx = ((v.clamp(0.0, 1.0) * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
        counts[idx] += 1;
    }
    Histogram { edges, counts }
}

/// Order statistics with linear interpolation between neighbors when the
/// rank is non-integral. None for an empty input.
pub fn percentiles(values: &[f64]) -> Option<Percentiles> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let at = |p: f64| -> f64 {
        let rank = p / 100.0 * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            sorted[lo]
        } else {
            sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
        }
    };
    Some(Percentiles {
        p5: at(5.0),
        p25: at(25.0),
        p50: at(50.0),
        p75: at(75.0),
        p95: at(95.0),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
    })
}

pub fn retention(values: &[f64], direction: PassDirection) -> Retention {
    let thresholds: Vec<f64> = RETENTION_GRID.to_vec();
    let percent_passing = thresholds
        .iter()
        .map(|t| {
            if values.is_empty() {
                return 0.0;
            }
            let passing = values
                .iter()
                .filter(|v| match direction {
                    PassDirection::AtLeast => **v >= *t,
                    PassDirection::AtMost => **v <= *t,
                })
                .count();
            passing as f64 / values.len() as f64 * 100.0
        })
        .collect();
    Retention { thresholds, percent_passing }
}

/// Otsu's method over the fixed-bin histogram: pick the bin edge that
/// maximizes the between-class variance w0*w1*(mu0-mu1)^2. Degenerate
/// distributions (fewer than two nonzero bins) return the fallback.
pub fn otsu_threshold(histogram: &Histogram, fallback: f64) -> f64 {
    let nonzero = histogram.counts.iter().filter(|c| **c > 0).count();
    if nonzero < 2 {
        return fallback;
    }

    let total: u64 = histogram.counts.iter().sum();
    let bins = histogram.counts.len();
    let width = 1.0 / bins as f64;
    let center = |i: usize| (i as f64 + 0.5) * width;

    let weighted_total: f64 = histogram
        .counts
        .iter()
        .enumerate()
        .map(|(i, c)| center(i) * *c as f64)
        .sum();

    let mut best_threshold = fallback;
    let mut best_variance = -1.0;
    let mut count0 = 0u64;
    let mut sum0 = 0.0;

    for split in 1..bins {
        count0 += histogram.counts[split - 1];
        sum0 += center(split - 1) * histogram.counts[split - 1] as f64;
        let count1 = total - count0;
        if count0 == 0 || count1 == 0 {
            continue;
        }
        let w0 = count0 as f64 / total as f64;
        let w1 = count1 as f64 / total as f64;
        let mu0 = sum0 / count0 as f64;
        let mu1 = (weighted_total - sum0) / count1 as f64;
        let variance = w0 * w1 * (mu0 - mu1).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_threshold = split as f64 * width;
        }
    }

    best_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_bins_are_half_open_except_last() {
        let h = histogram(&[0.0, 0.05, 0.049999, 0.95, 1.0]);
        assert_eq!(h.counts.len(), 20);
        assert_eq!(h.edges.len(), 21);
        assert_eq!(h.counts[0], 2); // 0.0 and 0.049999
        assert_eq!(h.counts[1], 1); // 0.05 lands in [0.05, 0.10)
        assert_eq!(h.counts[19], 2); // 0.95 and the inclusive 1.0
    }

    #[test]
    fn empty_input_gives_zero_histogram_and_no_percentiles() {
        let h = histogram(&[]);
        assert!(h.counts.iter().all(|c| *c == 0));
        assert!(percentiles(&[]).is_none());
        let r = retention(&[], PassDirection::AtLeast);
        assert!(r.percent_passing.iter().all(|p| *p == 0.0));
    }

    #[test]
    fn percentile_interpolation_between_order_statistics() {
        let p = percentiles(&[0.0, 1.0]).unwrap();
        assert!((p.p50 - 0.5).abs() < 1e-12);
        assert!((p.p25 - 0.25).abs() < 1e-12);
        assert_eq!(p.min, 0.0);
        assert_eq!(p.max, 1.0);
        assert!((p.mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn retention_directions() {
        let values = [0.15, 0.35, 0.55, 0.75];
        let at_least = retention(&values, PassDirection::AtLeast);
        // >= 0.3 keeps three of four values.
        assert!((at_least.percent_passing[2] - 75.0).abs() < 1e-9);
        let at_most = retention(&values, PassDirection::AtMost);
        // <= 0.3 keeps one of four values.
        assert!((at_most.percent_passing[2] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn otsu_separates_two_modes() {
        // Tight cluster near 0.1 and another near 0.9.
        let mut values = vec![];
        values.extend(std::iter::repeat(0.08).take(50));
        values.extend(std::iter::repeat(0.12).take(50));
        values.extend(std::iter::repeat(0.88).take(50));
        values.extend(std::iter::repeat(0.92).take(50));
        let t = otsu_threshold(&histogram(&values), 0.3);
        assert!(t > 0.12 && t < 0.88, "threshold {} should split the modes", t);
    }

    #[test]
    fn otsu_degenerate_returns_fallback() {
        let single_mode = vec![0.42; 100];
        assert_eq!(otsu_threshold(&histogram(&single_mode), 0.3), 0.3);
        assert_eq!(otsu_threshold(&histogram(&[]), 0.4), 0.4);
    }
}
