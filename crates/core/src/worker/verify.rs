//! Output duration verification (§4.3, §8): a best-effort, warn-only signal.

/// True iff a warning should be logged for the given input/output
/// durations: `|d_in - d_out| > max(1s, 0.01 * d_in)`. Never fails the
/// item; the caller only decides whether to log.
pub fn duration_mismatch_warrants_warning(input_secs: f64, output_secs: f64) -> bool {
    let tolerance = (1.0f64).max(0.01 * input_secs);
    (input_secs - output_secs).abs() > tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_within_tolerance_no_warning() {
        assert!(!duration_mismatch_warrants_warning(100.0, 100.5));
    }

    #[test]
    fn test_small_absolute_input_uses_one_second_floor() {
        // input_secs = 10 -> tolerance = max(1, 0.1) = 1s
        assert!(!duration_mismatch_warrants_warning(10.0, 10.9));
        assert!(duration_mismatch_warrants_warning(10.0, 11.1));
    }

    #[test]
    fn test_large_input_uses_percentage() {
        // input_secs = 10000 -> tolerance = 100s
        assert!(!duration_mismatch_warrants_warning(10000.0, 10099.0));
        assert!(duration_mismatch_warrants_warning(10000.0, 10101.0));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_matches_spec_formula(input in 0.1f64..100000.0, delta in -500.0f64..500.0) {
            let output = input + delta;
            let expected = (input - output).abs() > (1.0f64).max(0.01 * input);
            prop_assert_eq!(duration_mismatch_warrants_warning(input, output), expected);
        }
    }
}
