//! Calibration of the artifact probability threshold from one pass worth of posteriors

use crate::{VfilterError, VfilterResult, EPSILON};
use rayon::prelude::*;

const THRESHOLD_FOR_FILTERING_NONE: f64 = 1.0;
const THRESHOLD_FOR_FILTERING_ALL: f64 = 0.0;

fn sort_posteriors(posteriors: &mut [f64]) {
    posteriors.par_sort_unstable_by(|a, b| a.total_cmp(b));
}

/// Compute the threshold that keeps the expected false discovery rate among
/// passing calls at or below `requested_fdr`.
///
/// Each posterior is the probability that the call is an artifact, so the
/// expected FDR of passing the `i + 1` most confident calls is their mean
/// posterior. That mean is non-decreasing in `i` over a sorted list, so a
/// single forward scan finds the cutoff. `posteriors` is sorted in place.
pub fn calculate_threshold_based_on_false_discovery_rate(
    posteriors: &mut [f64],
    requested_fdr: f64,
) -> VfilterResult<f64> {
    if requested_fdr < 0.0 || requested_fdr.is_nan() {
        return Err(VfilterError::InvalidConfig(
            "requested FDR must be non-negative".to_string(),
        ));
    }

    sort_posteriors(posteriors);

    let mut cumulative_expected_fps = 0.0;
    for (i, &posterior) in posteriors.iter().enumerate() {
        let expected_fdr = (cumulative_expected_fps + posterior) / (i + 1) as f64;
        if expected_fdr > requested_fdr + EPSILON {
            return Ok(if i > 0 {
                posteriors[i - 1]
            } else {
                THRESHOLD_FOR_FILTERING_ALL
            });
        }
        cumulative_expected_fps += posterior;
    }

    Ok(THRESHOLD_FOR_FILTERING_NONE)
}

/// Compute the threshold that maximizes the expected F-beta score.
///
/// `beta` is the weight of recall relative to precision. Starting from
/// filtering everything, calls are passed in order of increasing posterior;
/// ties in the score go to the larger passing set. `posteriors` is sorted in
/// place.
pub fn calculate_threshold_based_on_optimal_f_score(
    posteriors: &mut [f64],
    beta: f64,
) -> VfilterResult<f64> {
    if beta < 0.0 || beta.is_nan() {
        return Err(VfilterError::InvalidConfig(
            "requested F-score beta must be non-negative".to_string(),
        ));
    }

    sort_posteriors(posteriors);

    let beta_squared = beta * beta;
    let expected_true_positives: f64 = posteriors.iter().map(|p| 1.0 - p).sum();

    let mut true_positives = 0.0;
    let mut false_positives = 0.0;
    let mut false_negatives = expected_true_positives;

    // None filters everything; recall is zero there
    let mut optimal_index_inclusive: Option<usize> = None;
    let mut optimal_f_score = 0.0;

    for (n, &posterior) in posteriors.iter().enumerate() {
        true_positives += 1.0 - posterior;
        false_positives += posterior;
        false_negatives -= 1.0 - posterior;

        let f_score = (1.0 + beta_squared) * true_positives
            / ((1.0 + beta_squared) * true_positives
                + beta_squared * false_negatives
                + false_positives);

        if f_score >= optimal_f_score {
            optimal_index_inclusive = Some(n);
            optimal_f_score = f_score;
        }
    }

    Ok(match optimal_index_inclusive {
        None => THRESHOLD_FOR_FILTERING_ALL,
        Some(n) if n == posteriors.len() - 1 => THRESHOLD_FOR_FILTERING_NONE,
        Some(n) => posteriors[n],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fdr_accepts_two_lowest() {
        let mut posteriors = vec![0.9, 0.1, 0.2];
        let threshold =
            calculate_threshold_based_on_false_discovery_rate(&mut posteriors, 0.15).unwrap();
        assert_eq!(threshold, 0.2);
        assert_eq!(posteriors, vec![0.1, 0.2, 0.9]);
    }

    #[test]
    fn test_fdr_boundaries() {
        assert_eq!(
            calculate_threshold_based_on_false_discovery_rate(&mut [], 0.05).unwrap(),
            1.0
        );
        assert_eq!(
            calculate_threshold_based_on_false_discovery_rate(&mut [0.3, 0.5, 0.99], 1.0).unwrap(),
            1.0
        );
        // first call already exceeds the requested rate
        assert_eq!(
            calculate_threshold_based_on_false_discovery_rate(&mut [0.4, 0.5], 0.1).unwrap(),
            0.0
        );
        assert_eq!(
            calculate_threshold_based_on_false_discovery_rate(&mut [1.0, 1.0], 0.5).unwrap(),
            0.0
        );
        assert_eq!(
            calculate_threshold_based_on_false_discovery_rate(&mut [0.0, 0.0, 0.0], 0.0).unwrap(),
            1.0
        );
    }

    #[test]
    fn test_fdr_monotone_in_requested_rate() {
        let posteriors = vec![0.01, 0.02, 0.05, 0.1, 0.3, 0.35, 0.6, 0.8, 0.95, 0.99];
        let mut previous = 0.0;
        for step in 0..=20 {
            let rate = step as f64 * 0.05;
            let threshold =
                calculate_threshold_based_on_false_discovery_rate(&mut posteriors.clone(), rate)
                    .unwrap();
            assert!(threshold >= previous);
            previous = threshold;
        }
    }

    #[test]
    fn test_fdr_rejects_negative_rate() {
        assert!(calculate_threshold_based_on_false_discovery_rate(&mut [0.1], -0.01).is_err());
    }

    #[test]
    fn test_f_score_optimal_prefix() {
        let mut posteriors = vec![0.7, 0.3];
        let threshold = calculate_threshold_based_on_optimal_f_score(&mut posteriors, 1.0).unwrap();
        assert_eq!(threshold, 0.3);
    }

    #[test]
    fn test_f_score_boundaries() {
        assert_eq!(
            calculate_threshold_based_on_optimal_f_score(&mut [], 1.0).unwrap(),
            0.0
        );
        assert_eq!(
            calculate_threshold_based_on_optimal_f_score(&mut [0.0, 0.0, 0.0], 1.0).unwrap(),
            1.0
        );
        // nothing is ever a true positive; ties go to passing everything
        assert_eq!(
            calculate_threshold_based_on_optimal_f_score(&mut [1.0, 1.0], 1.0).unwrap(),
            1.0
        );
    }

    #[test]
    fn test_f_score_beta_weights_recall() {
        let posteriors = vec![0.05, 0.1, 0.4, 0.5, 0.6, 0.9];
        let precise =
            calculate_threshold_based_on_optimal_f_score(&mut posteriors.clone(), 0.1).unwrap();
        let sensitive =
            calculate_threshold_based_on_optimal_f_score(&mut posteriors.clone(), 10.0).unwrap();
        assert!(sensitive >= precise);
    }

    #[test]
    fn test_f_score_rejects_negative_beta() {
        assert!(calculate_threshold_based_on_optimal_f_score(&mut [0.1], -1.0).is_err());
    }
}
