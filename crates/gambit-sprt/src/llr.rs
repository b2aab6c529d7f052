use std::f64::consts::{LN_10, SQRT_2};

use crate::Error;

const MIN_COUNT: f64 = 1e-3;
const MLE_ITERATIONS: usize = 10;
const MLE_TOLERANCE: f64 = 1e-9;
const SECULAR_ITERATIONS: usize = 100;
const SECULAR_MARGIN: f64 = 1e-9;
const SECULAR_TOLERANCE: f64 = 1e-12;
const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// A point of a discrete distribution.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    /// The outcome value.
    pub value: f64,
    /// The probability of the value.
    pub probability: f64,
}

impl Point {
    fn new(value: f64, probability: f64) -> Self {
        Self { value, probability }
    }
}

/// Log-likelihood ratio of `elo1` against `elo0` for the
/// `[LL, LD, DD, DW, WW]` counts.
///
/// # Errors
///
/// Fails if `results` does not have five buckets, or if the
/// tilted distributions cannot be computed.
pub fn pentanomial_sprt(results: &[u64], elo0: f64, elo1: f64) -> Result<f64, Error> {
    if results.len() != 5 {
        return Err(Error::InvalidLength(results.len()));
    }

    let counts: Vec<f64> = results
        .iter()
        .map(|&count| (count as f64).max(MIN_COUNT))
        .collect();

    let nelo_per_nt = 800.0 / LN_10;
    let t0 = elo0 / nelo_per_nt * SQRT_2;
    let t1 = elo1 / nelo_per_nt * SQRT_2;

    let n: f64 = counts.iter().sum();

    let pdf: Vec<Point> = counts
        .iter()
        .enumerate()
        .map(|(i, &count)| Point::new(i as f64 / 4.0, count / n))
        .collect();

    let pdf0 = mle(&pdf, 0.5, t0)?;
    let pdf1 = mle(&pdf, 0.5, t1)?;

    let log_ratios: Vec<Point> = pdf
        .iter()
        .zip(pdf0.iter().zip(&pdf1))
        .map(|(hat, (p0, p1))| Point::new(p1.probability.ln() - p0.probability.ln(), hat.probability))
        .collect();

    let (mean, _) = stats(&log_ratios)?;
    Ok(n * mean)
}

/// The distribution closest to `pdfhat` whose normalized
/// mean shift from `reference` is `t`.
///
/// # Errors
///
/// Fails if the secular equation cannot be solved, or if an
/// intermediate distribution is not a probability distribution.
pub fn mle(pdfhat: &[Point], reference: f64, t: f64) -> Result<Vec<Point>, Error> {
    let mut pdf_mle = uniform(pdfhat);

    for _ in 0..MLE_ITERATIONS {
        let prev = pdf_mle.clone();
        let (mu, var) = stats(&pdf_mle)?;
        let sigma = var.sqrt();

        let tilted: Vec<Point> = pdfhat
            .iter()
            .map(|p| {
                let a = p.value
                    - reference
                    - t * sigma * (1.0 + ((mu - p.value) / sigma).powi(2)) / 2.0;
                Point::new(a, p.probability)
            })
            .collect();

        let x = secular(&tilted)?;

        pdf_mle = pdfhat
            .iter()
            .zip(&tilted)
            .map(|(p, a)| Point::new(p.value, p.probability / (1.0 + x * a.value)))
            .collect();

        let max_diff = prev
            .iter()
            .zip(&pdf_mle)
            .map(|(prev, next)| (prev.probability - next.probability).abs())
            .fold(0.0, f64::max);

        if max_diff < MLE_TOLERANCE {
            break;
        }
    }

    stats(&pdf_mle)?;
    Ok(pdf_mle)
}

/// Solve `Σ pᵢ·aᵢ / (1 + x·aᵢ) = 0` for `x` by bisection,
/// where `aᵢ` is the value and `pᵢ` the probability of each point.
///
/// # Errors
///
/// Fails if the values do not straddle zero, if the root is not
/// bracketed, or if the bisection does not converge.
pub fn secular(pdf: &[Point]) -> Result<f64, Error> {
    let min = pdf.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
    let max = pdf.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);

    if pdf.is_empty() || min * max >= 0.0 {
        return Err(Error::DegenerateSupport { min, max });
    }

    let f = |x: f64| -> f64 {
        pdf.iter()
            .map(|p| p.probability * p.value / (1.0 + x * p.value))
            .sum()
    };

    let mut a = -1.0 / max + SECULAR_MARGIN;
    let mut b = -1.0 / min - SECULAR_MARGIN;
    let mut fa = f(a);
    let fb = f(b);

    if fa * fb > 0.0 {
        return Err(Error::NotBracketed);
    }

    for _ in 0..SECULAR_ITERATIONS {
        let c = (a + b) / 2.0;
        let fc = f(c);

        if fc.abs() < SECULAR_TOLERANCE || (b - a) / 2.0 < SECULAR_TOLERANCE {
            return Ok(c);
        }

        if fa * fc < 0.0 {
            b = c;
        } else {
            a = c;
            fa = fc;
        }
    }

    Err(Error::NoConvergence(SECULAR_ITERATIONS))
}

/// Mean and variance of a distribution.
///
/// A distribution that does not sum to one or has a probability
/// outside of `[0, 1]` means the tilting went wrong.
fn stats(pdf: &[Point]) -> Result<(f64, f64), Error> {
    let mut total = 0.0;
    for p in pdf {
        if p.probability < -DISTRIBUTION_TOLERANCE || p.probability > 1.0 + DISTRIBUTION_TOLERANCE {
            return Err(Error::InvalidDistribution("probability out of bounds"));
        }
        total += p.probability;
    }

    if (total - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(Error::InvalidDistribution("probabilities do not sum to 1"));
    }

    let mean: f64 = pdf.iter().map(|p| p.probability * p.value).sum();
    let variance: f64 = pdf
        .iter()
        .map(|p| p.probability * (p.value - mean).powi(2))
        .sum();

    Ok((mean, variance))
}

fn uniform(pdf: &[Point]) -> Vec<Point> {
    let n = pdf.len() as f64;
    pdf.iter().map(|p| Point::new(p.value, 1.0 / n)).collect()
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn golden_llr() {
        let llr = pentanomial_sprt(&[39, 8843, 26675, 9240, 44], 0.5, 2.5).unwrap();
        assert!((llr - 2.941_675).abs() < 5e-7, "llr = {llr}");
    }

    #[test]
    fn llr_is_deterministic() {
        let results = [120, 900, 2400, 1000, 80];
        let first = pentanomial_sprt(&results, -1.0, 3.0).unwrap();
        for _ in 0..10 {
            let again = pentanomial_sprt(&results, -1.0, 3.0).unwrap();
            assert_eq!(first.to_bits(), again.to_bits());
        }
    }

    #[test]
    fn wrong_length() {
        assert!(matches!(
            pentanomial_sprt(&[1, 2, 3], 0.0, 5.0),
            Err(Error::InvalidLength(3))
        ));
        assert!(matches!(
            pentanomial_sprt(&[1, 2, 3, 4, 5, 6], 0.0, 5.0),
            Err(Error::InvalidLength(6))
        ));
    }

    #[test]
    fn empty_results_do_not_divide_by_zero() {
        let llr = pentanomial_sprt(&[0, 0, 0, 0, 0], 0.0, 5.0).unwrap();
        assert!(llr.is_finite());
    }

    #[test]
    fn mle_stays_normalized() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut checked = 0;

        for _ in 0..500 {
            let counts: Vec<f64> = (0..5)
                .map(|_| f64::from(rng.gen_range(0u32..5000)).max(MIN_COUNT))
                .collect();
            let n: f64 = counts.iter().sum();
            let pdf: Vec<Point> = counts
                .iter()
                .enumerate()
                .map(|(i, &c)| Point::new(i as f64 / 4.0, c / n))
                .collect();
            let elo: f64 = rng.gen_range(-10.0..10.0);
            let t = elo / (800.0 / LN_10) * SQRT_2;

            let out = match mle(&pdf, 0.5, t) {
                Ok(out) => out,
                Err(Error::InvalidDistribution(reason)) => {
                    panic!("counts {counts:?}: {reason}")
                }
                Err(_) => continue,
            };
            checked += 1;

            let total: f64 = out.iter().map(|p| p.probability).sum();
            assert!((total - 1.0).abs() < 1e-6, "counts {counts:?}: sum {total}");
            assert!(out
                .iter()
                .all(|p| p.probability >= 0.0 && p.probability <= 1.0 + 1e-9));
        }

        assert!(checked > 450);
    }

    #[test]
    fn unnormalized_input_is_rejected() {
        let pdf: Vec<Point> = [0.1, 0.2, 0.6, 0.4, 0.2]
            .iter()
            .enumerate()
            .map(|(i, &p)| Point::new(i as f64 / 4.0, p))
            .collect();
        assert!(matches!(
            mle(&pdf, 0.5, 0.01),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn secular_rejects_one_sided_support() {
        let pdf = [Point::new(0.1, 0.5), Point::new(0.2, 0.5)];
        assert!(matches!(
            secular(&pdf),
            Err(Error::DegenerateSupport { .. })
        ));
    }

    #[test]
    fn secular_finds_root() {
        let pdf = [
            Point::new(-0.5, 0.25),
            Point::new(0.25, 0.5),
            Point::new(0.5, 0.25),
        ];
        let x = secular(&pdf).unwrap();
        let residual: f64 = pdf
            .iter()
            .map(|p| p.probability * p.value / (1.0 + x * p.value))
            .sum();
        assert!(residual.abs() < 1e-9);
    }
}
