use crate::errors::{EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::{OptionType, PricingInputs, PricingModel};

/// Volatility bracket searched by the solver.
const MIN_VOL: f64 = 1e-6;
const MAX_VOL: f64 = 10.0;

/// Vega below this is treated as flat and the step falls back to bisection.
const MIN_VEGA: f64 = 1e-12;

/// Solver settings. The default seed of 2% matches the dashboard's historic
/// behaviour; it is known to be a poor start for deep ITM/OTM strikes, which
/// is why the bracket fallback exists.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SolverConfig {
    pub initial_guess: f64,
    pub max_iterations: u32,
    /// Absolute tolerance on the price residual.
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            initial_guess: 0.02,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// Why a volatility could not be recovered.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unsolved {
    /// Observed price violates the no-arbitrage band for this contract.
    OutsideBounds { lower: f64, upper: f64 },
    /// No time value left to invert.
    ExpiryDay,
    /// Iteration budget exhausted.
    NoConvergence { last_residual: f64 },
}

/// Outcome of one inversion. Unsolved is a normal result: callers
/// substitute a fallback volatility.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VolEstimate {
    Solved { sigma: f64, iterations: u32 },
    Unsolved(Unsolved),
}

impl VolEstimate {
    pub fn sigma(&self) -> Option<f64> {
        match self {
            Self::Solved { sigma, .. } => Some(*sigma),
            Self::Unsolved(_) => None,
        }
    }
}

/// Recovers the Black-Scholes volatility that reproduces an observed price.
///
/// Safeguarded Newton-Raphson: Newton steps on the price residual using
/// vega, with the root kept inside a shrinking bracket. A step that leaves
/// the bracket (or a flat vega) is replaced by bisection, so the solver
/// cannot diverge from a bad seed.
pub struct ImpliedVolSolver {
    model: BlackScholes,
    config: SolverConfig,
}

impl ImpliedVolSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            model: BlackScholes::new(),
            config,
        }
    }

    pub fn solve(
        &self,
        observed_price: f64,
        spot: f64,
        strike: f64,
        rate_pct: f64,
        days: u32,
        option_type: OptionType,
    ) -> EngineResult<VolEstimate> {
        if !observed_price.is_finite() || observed_price < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "observed price must be finite and non-negative, got {observed_price}"
            )));
        }
        let seed = self.config.initial_guess.clamp(MIN_VOL, MAX_VOL);
        let inputs = PricingInputs::new(spot, strike, rate_pct, seed, days, option_type)?;

        if days == 0 {
            return Ok(VolEstimate::Unsolved(Unsolved::ExpiryDay));
        }

        let pvk = inputs.pv_strike();
        let (lower, upper) = match option_type {
            OptionType::Call => ((spot - pvk).max(0.0), spot),
            OptionType::Put => ((pvk - spot).max(0.0), pvk),
        };
        let tol = self.config.tolerance;
        if observed_price < lower - tol || observed_price >= upper {
            tracing::debug!(observed_price, lower, upper, strike, "price outside no-arbitrage band");
            return Ok(VolEstimate::Unsolved(Unsolved::OutsideBounds { lower, upper }));
        }

        let mut lo = MIN_VOL;
        let mut hi = MAX_VOL;
        let mut sigma = seed;
        let mut residual = f64::NAN;

        for iteration in 1..=self.config.max_iterations {
            let g = self.model.price(&inputs.with_sigma(sigma));
            residual = g.price - observed_price;

            if residual.abs() < tol {
                return Ok(VolEstimate::Solved { sigma, iterations: iteration });
            }

            // Price is increasing in sigma.
            if residual > 0.0 {
                hi = sigma;
            } else {
                lo = sigma;
            }

            let newton = if g.vega > MIN_VEGA {
                sigma - residual / g.vega
            } else {
                f64::NAN
            };
            sigma = if newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        }

        tracing::debug!(
            observed_price,
            strike,
            last_sigma = sigma,
            last_residual = residual,
            "implied vol did not converge"
        );
        Ok(VolEstimate::Unsolved(Unsolved::NoConvergence { last_residual: residual }))
    }
}

impl Default for ImpliedVolSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

/// Solve with the default configuration.
pub fn solve_implied_volatility(
    observed_price: f64,
    spot: f64,
    strike: f64,
    rate_pct: f64,
    days: u32,
    option_type: OptionType,
) -> EngineResult<VolEstimate> {
    ImpliedVolSolver::default().solve(observed_price, spot, strike, rate_pct, days, option_type)
}

/// Median of the given values (mean of the two middle values for even counts).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Replace missing volatilities with the median of the present ones.
///
/// `needed[i]` marks entries whose volatility will actually be used. A
/// missing entry that is not needed takes the median when there is one and
/// 0.0 otherwise; only a needed entry with nothing to fall back to fails.
pub fn fill_with_median(vols: &[Option<f64>], needed: &[bool]) -> EngineResult<Vec<f64>> {
    if needed.len() != vols.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} need flags given for {} volatilities",
            needed.len(),
            vols.len()
        )));
    }
    let present: Vec<f64> = vols.iter().flatten().copied().collect();
    let fallback = median(&present);
    let missing_needed = vols.iter().zip(needed).any(|(v, &n)| n && v.is_none());
    if missing_needed && fallback.is_none() {
        return Err(EngineError::NoConvergence {
            legs: needed.iter().filter(|n| **n).count(),
        });
    }
    Ok(vols
        .iter()
        .map(|v| v.or(fallback).unwrap_or(0.0))
        .collect())
}
