pub mod black_scholes;
pub mod implied_vol;

use crate::errors::{ensure_positive, EngineError, EngineResult};
use std::ops::{Add, AddAssign, Mul};
use std::str::FromStr;

/// Trading days per year. Rates and vols are annualised on this basis.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Convert a nominal annual rate quoted in percent (SELIC style, 13.75 = 13.75%)
/// into the continuously-compounded rate.
#[inline]
pub fn continuous_rate(rate_pct: f64) -> f64 {
    (1.0 + rate_pct / 100.0).ln()
}

/// Year fraction for a count of trading days.
#[inline]
pub fn years_from_days(days: u32) -> f64 {
    days as f64 / TRADING_DAYS_PER_YEAR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Payoff if exercised now, floored at zero.
    #[inline]
    pub fn intrinsic(self, spot: f64, strike: f64) -> f64 {
        match self {
            Self::Call => (spot - strike).max(0.0),
            Self::Put => (strike - spot).max(0.0),
        }
    }

    #[inline]
    pub fn is_itm(self, spot: f64, strike: f64) -> bool {
        match self {
            Self::Call => spot > strike,
            Self::Put => spot < strike,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

impl FromStr for OptionType {
    type Err = EngineError;

    /// Accepts the plain labels and the B3 series-list labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "call" | "opcoes compra" => Ok(Self::Call),
            "put" | "opcoes venda" => Ok(Self::Put),
            other => Err(EngineError::InvalidInput(format!(
                "unrecognized option type: {other:?}"
            ))),
        }
    }
}

/// Exercise style as listed by the exchange. Carried as data only:
/// every leg is priced as a European option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStyle {
    American,
    European,
}

impl FromStr for ExerciseStyle {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "american" | "americano" | "amer" => Ok(Self::American),
            "european" | "europeu" | "euro" => Ok(Self::European),
            other => Err(EngineError::InvalidInput(format!(
                "unrecognized exercise style: {other:?}"
            ))),
        }
    }
}

/// Price and sensitivities of one option (or a quantity-weighted sum of them).
/// Theta and rho are per year of 252 trading days.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Greeks {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta: f64,
    pub rho: f64,
}

impl Add for Greeks {
    type Output = Greeks;

    fn add(self, rhs: Greeks) -> Greeks {
        Greeks {
            price: self.price + rhs.price,
            delta: self.delta + rhs.delta,
            gamma: self.gamma + rhs.gamma,
            vega: self.vega + rhs.vega,
            theta: self.theta + rhs.theta,
            rho: self.rho + rhs.rho,
        }
    }
}

impl AddAssign for Greeks {
    fn add_assign(&mut self, rhs: Greeks) {
        *self = *self + rhs;
    }
}

impl Mul<f64> for Greeks {
    type Output = Greeks;

    fn mul(self, qty: f64) -> Greeks {
        Greeks {
            price: self.price * qty,
            delta: self.delta * qty,
            gamma: self.gamma * qty,
            vega: self.vega * qty,
            theta: self.theta * qty,
            rho: self.rho * qty,
        }
    }
}

/// Validated inputs for a single valuation, with the shared terms precomputed.
#[derive(Debug, Clone, Copy)]
pub struct PricingInputs {
    pub spot: f64,
    pub strike: f64,
    pub sigma: f64,
    pub days: u32,
    pub option_type: OptionType,
    // Precomputed
    pub rate: f64,
    pub ttl_years: f64,
    pub sqrt_t: f64,
    pub sigma_sqrt_t: f64,
    pub discount: f64,
    pub ln_s_k: f64,
}

impl PricingInputs {
    pub fn new(
        spot: f64,
        strike: f64,
        rate_pct: f64,
        sigma: f64,
        days: u32,
        option_type: OptionType,
    ) -> EngineResult<Self> {
        ensure_positive("spot", spot)?;
        ensure_positive("strike", strike)?;
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "sigma must be finite and non-negative, got {sigma}"
            )));
        }
        if !rate_pct.is_finite() || rate_pct <= -100.0 {
            return Err(EngineError::InvalidInput(format!(
                "risk-free rate must be finite and above -100%, got {rate_pct}"
            )));
        }
        Ok(Self::new_unchecked(spot, strike, rate_pct, sigma, days, option_type))
    }

    /// Caller guarantees the values already passed `new`'s checks.
    #[inline]
    pub(crate) fn new_unchecked(
        spot: f64,
        strike: f64,
        rate_pct: f64,
        sigma: f64,
        days: u32,
        option_type: OptionType,
    ) -> Self {
        let rate = continuous_rate(rate_pct);
        let ttl_years = years_from_days(days);
        let sqrt_t = ttl_years.sqrt();
        Self {
            spot,
            strike,
            sigma,
            days,
            option_type,
            rate,
            ttl_years,
            sqrt_t,
            sigma_sqrt_t: sigma * sqrt_t,
            discount: (-rate * ttl_years).exp(),
            ln_s_k: (spot / strike).ln(),
        }
    }

    /// Same contract with a different volatility.
    #[inline]
    pub fn with_sigma(&self, sigma: f64) -> Self {
        Self {
            sigma,
            sigma_sqrt_t: sigma * self.sqrt_t,
            ..*self
        }
    }

    /// Strike discounted to today.
    #[inline]
    pub fn pv_strike(&self) -> f64 {
        self.strike * self.discount
    }
}

/// All pricing models implement this trait.
/// price() must be a pure function of its inputs and must never return NaN
/// for inputs that passed `PricingInputs::new`.
/// Send + Sync required for use across simulation threads.
pub trait PricingModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn price(&self, inputs: &PricingInputs) -> Greeks;
}
