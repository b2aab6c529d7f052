use gambit_common::task::EloInterval;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Logistic Elo with a 95% confidence interval for a histogram over
/// equally spaced outcomes in `[0, 1]`.
///
/// Use `[L, D, W]` for single games and `[LL, LD, DD, DW, WW]` for
/// game pairs. Histograms with less than two observations or less
/// than two buckets yield all zeroes.
#[must_use]
pub fn elo(results: &[u64]) -> EloInterval {
    let n: u64 = results.iter().sum();
    if n <= 1 || results.len() < 2 {
        return EloInterval::default();
    }

    let n = n as f64;
    let div = (results.len() - 1) as f64;

    let mu = results
        .iter()
        .enumerate()
        .map(|(i, &count)| (i as f64 / div) * count as f64)
        .sum::<f64>()
        / n;

    let variance = results
        .iter()
        .enumerate()
        .map(|(i, &count)| (i as f64 / div - mu).powi(2) * count as f64)
        .sum::<f64>()
        / n;

    let Ok(t) = StudentsT::new(0.0, 1.0, n - 1.0) else {
        return EloInterval::default();
    };

    let margin = variance.sqrt() / n.sqrt();

    EloInterval {
        lower: logistic_elo(mu + t.inverse_cdf(0.025) * margin),
        elo: logistic_elo(mu),
        upper: logistic_elo(mu + t.inverse_cdf(0.975) * margin),
    }
}

/// Convert an expected score to logistic Elo.
///
/// The score is clamped to `[0.001, 0.999]`.
#[must_use]
pub fn logistic_elo(score: f64) -> f64 {
    let score = score.clamp(1e-3, 1.0 - 1e-3);
    -400.0 * (1.0 / score - 1.0).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_inputs() {
        assert_eq!(elo(&[]), EloInterval::default());
        assert_eq!(elo(&[0, 0, 0]), EloInterval::default());
        assert_eq!(elo(&[0, 1, 0]), EloInterval::default());
        assert_eq!(elo(&[0, 0, 1, 0, 0]), EloInterval::default());
    }

    #[test]
    fn even_score_is_zero_elo() {
        let estimate = elo(&[100, 200, 100]);
        assert!(estimate.elo.abs() < 1e-9);
        assert!(estimate.lower < 0.0);
        assert!(estimate.upper > 0.0);
        assert!((estimate.lower + estimate.upper).abs() < 1e-6);
    }

    #[test]
    fn interval_contains_estimate() {
        let estimate = elo(&[39, 8843, 26675, 9240, 44]);
        assert!(estimate.lower < estimate.elo);
        assert!(estimate.elo < estimate.upper);
        assert!(estimate.elo > 0.0);
    }

    #[test]
    fn logistic_clamps() {
        assert!((logistic_elo(0.5)).abs() < 1e-12);
        assert_eq!(logistic_elo(1.0), logistic_elo(0.999));
        assert_eq!(logistic_elo(-3.0), logistic_elo(0.001));
        assert!((logistic_elo(0.75) - 190.848_501_887_865).abs() < 1e-6);
    }
}
