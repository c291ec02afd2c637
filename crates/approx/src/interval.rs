//! Confidence intervals over replica results.
//!
//! For confidence level `c` the interval is bounded by the `p`-th and
//! `(100 - p)`-th percentiles of the sample, where `p = 100 * (1 + c) / 2`.
//! The point estimate is the midpoint of the bounds and the error margin is
//! half their distance.
//!
//! Percentiles interpolate linearly between order statistics at the
//! 1-based position `h = p * (n + 1) / 100` of the ascending sample `x`,
//! clamped to the smallest and largest value outside `[1, n]`:
//!
//! ```text
//! percentile(p) = x[floor(h)] + (h - floor(h)) * (x[floor(h) + 1] - x[floor(h)])
//! ```
//!
//! Partial results computed on different workers are formatted with this
//! same rule, so it must not change without changing every peer.

use std::fmt::{self, Display};

use crate::error::{BootstrapError, BootstrapResult};

pub(crate) fn check_confidence(confidence: f64) -> BootstrapResult<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(BootstrapError::invalid_argument(format!(
            "confidence must be strictly between 0 and 1, got {confidence}"
        )));
    }
    Ok(())
}

/// `p`-th percentile (`0 <= p <= 100`) of a non-empty ascending sample.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    debug_assert!((0.0..=100.0).contains(&p));

    let n = sorted.len();
    let pos = p * (n as f64 + 1.0) / 100.0;
    if pos < 1.0 {
        return sorted[0];
    }
    if pos >= n as f64 {
        return sorted[n - 1];
    }

    // 1-based, so `sorted[rank - 1]` is the lower neighbour.
    let rank = pos.floor();
    let fraction = pos - rank;
    let rank = rank as usize;
    sorted[rank - 1] + fraction * (sorted[rank] - sorted[rank - 1])
}

/// Point estimate with a symmetric error margin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceInterval {
    pub estimate: f64,
    pub error: f64,
}

impl ConfidenceInterval {
    /// Computes the interval of `sample` at `confidence`.
    ///
    /// Fails on an empty sample or a confidence outside `(0, 1)`.  A
    /// negative (or NaN) error margin is reported as an internal invariant
    /// violation, never clamped.
    pub fn from_sample(sample: &[f64], confidence: f64) -> BootstrapResult<Self> {
        check_confidence(confidence)?;
        if sample.is_empty() {
            return Err(BootstrapError::invalid_argument(
                "cannot compute a confidence interval over an empty sample",
            ));
        }

        let mut sorted = sample.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);

        let p = 100.0 * (1.0 + confidence) / 2.0;
        let upper = percentile(&sorted, p);
        let lower = percentile(&sorted, 100.0 - p);

        let error = (upper - lower) / 2.0;
        if !(error >= 0.0) {
            return Err(BootstrapError::InternalInvariant(format!(
                "error margin is negative: upper bound {upper}, lower bound {lower}"
            )));
        }

        Ok(Self {
            estimate: (upper + lower) / 2.0,
            error,
        })
    }
}

/// Formats as `<estimate> +/- <error>`, each the shortest decimal string
/// that parses back to the same `f64`.
impl Display for ConfidenceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = ryu::Buffer::new();
        f.write_str(buffer.format(self.estimate))?;
        f.write_str(" +/- ")?;
        f.write_str(buffer.format(self.error))
    }
}

/// Formats the confidence interval of `sample` at `confidence`.
pub fn format_approximate_output(sample: &[f64], confidence: f64) -> BootstrapResult<String> {
    Ok(ConfidenceInterval::from_sample(sample, confidence)?.to_string())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::{format_approximate_output, percentile, ConfidenceInterval};
    use crate::BootstrapError;

    #[test]
    fn three_values() {
        // p = 97.5: h = 3.9, clamped to 30
        // p = 2.5:  h = 0.1, clamped to 10
        assert_eq!(
            format_approximate_output(&[30.0, 10.0, 20.0], 0.95).unwrap(),
            "20.0 +/- 10.0"
        );
        // p = 75: h = 3.0 -> 30, p = 25: h = 1.0 -> 10
        assert_eq!(
            format_approximate_output(&[10.0, 20.0, 30.0], 0.5).unwrap(),
            "20.0 +/- 10.0"
        );
    }

    #[test]
    fn nine_values() {
        // p = 75: h = 7.5 -> 7.5, p = 25: h = 2.5 -> 2.5
        let sample: Vec<f64> = (1..=9).map(f64::from).collect();
        assert_eq!(
            format_approximate_output(&sample, 0.5).unwrap(),
            "5.0 +/- 2.5"
        );
    }

    #[test]
    fn higher_confidence_wider_margin() {
        let sample = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0];
        let wide = ConfidenceInterval::from_sample(&sample, 0.95).unwrap();
        let narrow = ConfidenceInterval::from_sample(&sample, 0.5).unwrap();
        // [1, 9] against [1.75, 5.25]
        assert_eq!(wide.error, 4.0);
        assert!(wide.error > narrow.error);
    }

    #[test]
    fn single_value() {
        assert_eq!(
            format_approximate_output(&[4.25], 0.9).unwrap(),
            "4.25 +/- 0.0"
        );
    }

    #[test]
    fn percentiles() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 10.0), 1.0);
        assert_eq!(percentile(&sorted, 25.0), 1.5);
        assert_eq!(percentile(&sorted, 50.0), 3.0);
        assert_eq!(percentile(&sorted, 90.0), 5.0);
        assert_eq!(percentile(&sorted, 100.0), 5.0);
        assert_eq!(percentile(&[2.0, 4.0], 50.0), 3.0);
        assert_eq!(percentile(&[7.0], 30.0), 7.0);
        assert_eq!(percentile(&[7.0], 80.0), 7.0);
    }

    #[test]
    fn number_rendering() {
        let render = |estimate, error| ConfidenceInterval { estimate, error }.to_string();
        assert_eq!(render(1234.5, 0.25), "1234.5 +/- 0.25");
        assert_eq!(render(-3.0, 1.0), "-3.0 +/- 1.0");
        assert_eq!(render(1e16, 0.5), "1e16 +/- 0.5");
        assert_eq!(render(1e-7, 0.0), "1e-7 +/- 0.0");
    }

    #[test]
    fn invalid_arguments() {
        assert!(matches!(
            format_approximate_output(&[], 0.95),
            Err(BootstrapError::InvalidArgument(_))
        ));
        for confidence in [0.0, 1.0, -0.5, 2.0, f64::NAN] {
            assert!(matches!(
                format_approximate_output(&[1.0, 2.0], confidence),
                Err(BootstrapError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn nan_margin_fails_loudly() {
        assert!(matches!(
            format_approximate_output(&[1.0, f64::NAN, 3.0], 0.95),
            Err(BootstrapError::InternalInvariant(_))
        ));
    }

    #[test]
    fn integer_valued_output() {
        let sample: Vec<f64> = (1..=100).map(f64::from).collect();
        let interval = ConfidenceInterval::from_sample(&sample, 0.9).unwrap();
        // p = 95: h = 95.95, p = 5: h = 5.05
        assert!((interval.estimate - 50.5).abs() < 1e-9);
        assert!((interval.error - 45.45).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn wider_confidence_wider_margin(
            sample in proptest::collection::vec(-1.0e6f64..1.0e6, 2..200),
            narrow in 0.01f64..0.5,
            wide in 0.5f64..0.99,
        ) {
            let narrow = ConfidenceInterval::from_sample(&sample, narrow).unwrap();
            let wide = ConfidenceInterval::from_sample(&sample, wide).unwrap();
            // Interpolation rounding may cost an ulp at order-statistic
            // boundaries.
            let slack = 1e-9 * sample.iter().fold(1.0f64, |max, x| max.max(x.abs()));
            prop_assert!(narrow.error >= 0.0);
            prop_assert!(wide.error + slack >= narrow.error);
        }
    }
}
