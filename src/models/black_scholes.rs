use crate::errors::{EngineError, EngineResult};
use crate::models::{Greeks, OptionType, PricingInputs, PricingModel};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Below this sigma*sqrt(T) the diffusion term is treated as absent.
const MIN_SIGMA_SQRT_T: f64 = 1e-12;

/// European Black-Scholes pricing with Greeks.
///
/// d1 = (ln(S/K) + (r + sigma^2/2)*T) / (sigma * sqrt(T))
/// d2 = d1 - sigma * sqrt(T)
/// call = N(d1)*S - N(d2)*K*e^(-rT)
/// put  = K*e^(-rT) - S + call
///
/// r is the continuously-compounded equivalent of the quoted rate and
/// T = trading days / 252.
pub struct BlackScholes {
    /// Standard normal distribution (created once, reused)
    normal: Normal,
}

impl BlackScholes {
    pub fn new() -> Self {
        Self {
            normal: Normal::standard(),
        }
    }

    /// Price several contracts in one call. Each row is priced exactly as
    /// `PricingModel::price` would price it on its own.
    pub fn price_batch(
        &self,
        spot: SpotInput<'_>,
        rows: &[BatchRow],
        rate_pct: f64,
        days: u32,
    ) -> EngineResult<Vec<Greeks>> {
        if let SpotInput::Vector(spots) = spot {
            if spots.len() != rows.len() {
                return Err(EngineError::InvalidInput(format!(
                    "spot vector has {} entries but {} rows were given",
                    spots.len(),
                    rows.len()
                )));
            }
        }

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let s = match spot {
                    SpotInput::Scalar(s) => s,
                    SpotInput::Vector(spots) => spots[i],
                };
                let inputs =
                    PricingInputs::new(s, row.strike, rate_pct, row.sigma, days, row.option_type)?;
                Ok(self.price(&inputs))
            })
            .collect()
    }

    /// T = 0: the option is worth its exercise value and delta is a step.
    fn at_expiry(&self, p: &PricingInputs) -> Greeks {
        let itm = p.option_type.is_itm(p.spot, p.strike);
        let delta = match (p.option_type, itm) {
            (OptionType::Call, true) => 1.0,
            (OptionType::Put, true) => -1.0,
            _ => 0.0,
        };
        Greeks {
            price: p.option_type.intrinsic(p.spot, p.strike),
            delta,
            ..Greeks::default()
        }
    }

    /// sigma = 0 with T > 0: the spot grows deterministically, so the option
    /// is worth its exercise value against the discounted strike.
    fn zero_vol(&self, p: &PricingInputs) -> Greeks {
        let pvk = p.pv_strike();
        let itm = p.option_type.is_itm(p.spot, pvk);
        let ind = if itm { 1.0 } else { 0.0 };
        match p.option_type {
            OptionType::Call => Greeks {
                price: (p.spot - pvk).max(0.0),
                delta: ind,
                gamma: 0.0,
                vega: 0.0,
                theta: -p.rate * pvk * ind,
                rho: p.strike * p.ttl_years * p.discount * ind,
            },
            OptionType::Put => Greeks {
                price: (pvk - p.spot).max(0.0),
                delta: -ind,
                gamma: 0.0,
                vega: 0.0,
                theta: p.rate * pvk * ind,
                rho: -p.strike * p.ttl_years * p.discount * ind,
            },
        }
    }
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingModel for BlackScholes {
    #[inline]
    fn name(&self) -> &'static str {
        "Black-Scholes"
    }

    fn price(&self, p: &PricingInputs) -> Greeks {
        if p.days == 0 {
            return self.at_expiry(p);
        }
        if p.sigma_sqrt_t < MIN_SIGMA_SQRT_T {
            return self.zero_vol(p);
        }

        let d1 = (p.ln_s_k + (p.rate + 0.5 * p.sigma * p.sigma) * p.ttl_years) / p.sigma_sqrt_t;
        let d2 = d1 - p.sigma_sqrt_t;
        let pvk = p.pv_strike();

        let nd1 = self.normal.cdf(d1);
        let nd2 = self.normal.cdf(d2);
        let pdf_d1 = self.normal.pdf(d1);

        let call_price = nd1 * p.spot - nd2 * pvk;
        let gamma = pdf_d1 / (p.spot * p.sigma_sqrt_t);
        let vega = p.spot * pdf_d1 * p.sqrt_t;
        let decay = -(p.spot * pdf_d1 * p.sigma) / (2.0 * p.sqrt_t);

        match p.option_type {
            OptionType::Call => Greeks {
                price: call_price,
                delta: nd1,
                gamma,
                vega,
                theta: decay - p.rate * pvk * nd2,
                rho: p.strike * p.ttl_years * p.discount * nd2,
            },
            OptionType::Put => {
                let n_minus_d2 = self.normal.cdf(-d2);
                Greeks {
                    // Parity keeps put and call consistent; clamp only rounding noise.
                    price: (pvk - p.spot + call_price).max(0.0),
                    delta: nd1 - 1.0,
                    gamma,
                    vega,
                    theta: decay + p.rate * pvk * n_minus_d2,
                    rho: -p.strike * p.ttl_years * p.discount * n_minus_d2,
                }
            }
        }
    }
}

/// Spot for a batch: one shared value or one per row.
#[derive(Debug, Clone, Copy)]
pub enum SpotInput<'a> {
    Scalar(f64),
    Vector(&'a [f64]),
}

/// One contract in a batch valuation.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct BatchRow {
    pub strike: f64,
    pub sigma: f64,
    pub option_type: OptionType,
}

/// Validate and price a single option.
pub fn price_option(
    spot: f64,
    strike: f64,
    rate_pct: f64,
    sigma: f64,
    days: u32,
    option_type: OptionType,
) -> EngineResult<Greeks> {
    let inputs = PricingInputs::new(spot, strike, rate_pct, sigma, days, option_type)?;
    Ok(BlackScholes::new().price(&inputs))
}
