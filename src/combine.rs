//! Combination of per-filter artifact probabilities into one record-level probability

/// Overall and technical-only artifact probabilities of one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArtifactProbabilities {
    pub overall: f64,
    pub technical: f64,
    pub non_technical: f64,
}

/// Combine `(is_technical, probability)` pairs.
///
/// Filters of the same class measure overlapping failure modes, so only the
/// strongest signal within a class counts. The two classes are then combined
/// as independent causes (noisy-OR).
pub fn combine_artifact_probabilities<I>(probabilities: I) -> ArtifactProbabilities
where
    I: IntoIterator<Item = (bool, f64)>,
{
    let mut technical: f64 = 0.0;
    let mut non_technical: f64 = 0.0;

    for (is_technical, probability) in probabilities {
        let probability = probability.clamp(0.0, 1.0);
        if is_technical {
            technical = technical.max(probability);
        } else {
            non_technical = non_technical.max(probability);
        }
    }

    ArtifactProbabilities {
        overall: 1.0 - (1.0 - technical) * (1.0 - non_technical),
        technical,
        non_technical,
    }
}
