use crate::Error;

/// The decision of the sequential test for a given LLR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Play more games.
    Continue,
    /// The alternative hypothesis (`elo1`) is accepted.
    AcceptH1,
    /// The null hypothesis (`elo0`) is accepted.
    AcceptH0,
}

impl Verdict {
    /// Whether the test is over.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Continue)
    }
}

/// Stopping boundaries derived from the error rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SprtBounds {
    lower: f64,
    upper: f64,
}

impl SprtBounds {
    /// Bounds for type I error rate `alpha` and type II error rate `beta`.
    ///
    /// # Errors
    ///
    /// Both rates must be in `(0, 1)` and sum to less than one.
    pub fn new(alpha: f64, beta: f64) -> Result<Self, Error> {
        let valid = |r: f64| r > 0.0 && r < 1.0;
        if !valid(alpha) || !valid(beta) || alpha + beta >= 1.0 {
            return Err(Error::InvalidErrorRates { alpha, beta });
        }

        Ok(Self {
            lower: (beta / (1.0 - alpha)).ln(),
            upper: ((1.0 - beta) / alpha).ln(),
        })
    }

    /// `ln(β / (1 - α))`
    #[must_use]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// `ln((1 - β) / α)`
    #[must_use]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Decide for the given LLR.
    #[must_use]
    pub fn decide(&self, llr: f64) -> Verdict {
        if llr >= self.upper {
            Verdict::AcceptH1
        } else if llr <= self.lower {
            Verdict::AcceptH0
        } else {
            Verdict::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_bounds() {
        let bounds = SprtBounds::new(0.05, 0.05).unwrap();
        assert!((bounds.upper() - 19f64.ln()).abs() < 1e-12);
        assert!((bounds.lower() + 19f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn decisions() {
        let bounds = SprtBounds::new(0.05, 0.05).unwrap();
        assert_eq!(bounds.decide(0.0), Verdict::Continue);
        assert_eq!(bounds.decide(3.0), Verdict::AcceptH1);
        assert_eq!(bounds.decide(-3.0), Verdict::AcceptH0);
        assert_eq!(bounds.decide(bounds.upper()), Verdict::AcceptH1);
        assert!(!bounds.decide(2.941_675).is_terminal());
    }

    #[test]
    fn rejects_invalid_rates() {
        assert!(SprtBounds::new(0.0, 0.05).is_err());
        assert!(SprtBounds::new(0.05, 1.0).is_err());
        assert!(SprtBounds::new(0.6, 0.5).is_err());
        assert!(SprtBounds::new(f64::NAN, 0.05).is_err());
    }
}
