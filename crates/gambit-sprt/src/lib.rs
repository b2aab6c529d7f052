//! Sequential probability ratio test for engine matches.
//!
//! Everything here is a pure function of its inputs and can be
//! called concurrently without synchronization.
//!
//! The LLR follows the normalized Elo model of
//! <https://hardy.uhasselt.be/Fishtest/normalized_elo_practical.pdf>,
//! computed over pentanomial game pair outcomes.

#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::cast_precision_loss)]

use gambit_common::{status::Code, task::{EloInterval, Pentanomial}};

mod bounds;
mod elo;
mod llr;

pub use bounds::{SprtBounds, Verdict};
pub use elo::{elo, logistic_elo};
pub use llr::{mle, pentanomial_sprt, secular, Point};

/// SPRT errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input did not have five buckets.
    #[error("expected 5 pentanomial buckets, got {0}")]
    InvalidLength(usize),
    /// Error rates outside of `(0, 1)`.
    #[error("invalid error rates: alpha = {alpha}, beta = {beta}")]
    InvalidErrorRates {
        /// Type I error rate.
        alpha: f64,
        /// Type II error rate.
        beta: f64,
    },
    /// The support of the secular equation does not straddle zero.
    #[error("secular equation support does not straddle zero (min {min}, max {max})")]
    DegenerateSupport {
        /// Smallest value.
        min: f64,
        /// Largest value.
        max: f64,
    },
    /// Both ends of the search interval have the same sign.
    #[error("secular equation root is not bracketed")]
    NotBracketed,
    /// The bisection ran out of iterations.
    #[error("secular equation did not converge after {0} iterations")]
    NoConvergence(usize),
    /// A distribution produced during tilting is not a probability distribution.
    #[error("invalid probability distribution: {0}")]
    InvalidDistribution(&'static str),
}

impl Error {
    /// The client-visible category of the error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidLength(_) | Error::InvalidErrorRates { .. } => Code::InvalidArgument,
            Error::DegenerateSupport { .. } | Error::NotBracketed | Error::NoConvergence(_) => {
                Code::Internal
            }
            Error::InvalidDistribution(_) => Code::FailedPrecondition,
        }
    }
}

/// The outcome of evaluating accumulated results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Log-likelihood ratio.
    pub llr: f64,
    /// The decision for the LLR.
    pub verdict: Verdict,
    /// Elo estimate from the same results.
    pub elo: EloInterval,
}

/// Compute the LLR, the verdict and the Elo estimate for the given results.
///
/// # Errors
///
/// Fails if the LLR cannot be computed, see [`pentanomial_sprt`].
pub fn evaluate(
    results: &Pentanomial,
    elo0: f64,
    elo1: f64,
    bounds: SprtBounds,
) -> Result<Evaluation, Error> {
    let counts = results.as_array();
    let llr = pentanomial_sprt(&counts, elo0, elo1)?;
    Ok(Evaluation {
        llr,
        verdict: bounds.decide(llr),
        elo: elo(&counts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lopsided_results_accept_h1() {
        let results = Pentanomial::from([10, 400, 2000, 1400, 90]);
        let bounds = SprtBounds::new(0.05, 0.05).unwrap();
        let evaluation = evaluate(&results, 0.0, 5.0, bounds).unwrap();
        assert_eq!(evaluation.verdict, Verdict::AcceptH1);
        assert!(evaluation.elo.elo > 5.0);
    }

    #[test]
    fn codes() {
        assert_eq!(Error::InvalidLength(3).code(), Code::InvalidArgument);
        assert_eq!(Error::NotBracketed.code(), Code::Internal);
        assert_eq!(
            Error::InvalidDistribution("sum").code(),
            Code::FailedPrecondition
        );
    }
}
