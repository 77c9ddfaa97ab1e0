use crate::errors::{EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::position::valuer::PositionValuer;
use crate::position::{MarketContext, Position};
use std::str::FromStr;

/// Upper bound on grid size, so a tiny step over a wide range cannot stall a refresh.
const MAX_GRID_POINTS: usize = 2_000_000;

/// Half-width of the grid, as a fraction of spot, for a position without legs.
const NO_LEG_SPAN: f64 = 0.10;

/// Unit in which payoffs (and the price axis) are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoffUnit {
    /// Payoff in currency, price axis in currency.
    #[default]
    Currency,
    /// Payoff as % of entry cost, price axis as % move from spot.
    Percent,
}

impl FromStr for PayoffUnit {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "currency" | "brl" | "r$" => Ok(Self::Currency),
            "percent" | "pct" | "%" => Ok(Self::Percent),
            other => Err(EngineError::InvalidInput(format!("unknown payoff unit: {other:?}"))),
        }
    }
}

impl PayoffUnit {
    /// Rescale a payoff. Percent mode divides by the entry cost, which
    /// must be non-zero.
    pub fn convert_value(self, value: f64, cost: f64) -> EngineResult<f64> {
        match self {
            Self::Currency => Ok(value),
            Self::Percent => {
                ensure_scalable(cost)?;
                Ok(100.0 * value / cost)
            }
        }
    }

    /// Rescale an underlying price into the reported axis.
    #[inline]
    pub fn convert_price(self, price: f64, spot: f64) -> f64 {
        match self {
            Self::Currency => price,
            Self::Percent => 100.0 * (price / spot - 1.0),
        }
    }
}

pub(crate) fn ensure_scalable(cost: f64) -> EngineResult<()> {
    if cost.abs() < f64::EPSILON {
        return Err(EngineError::DegenerateScale(
            "percentage payoff requires a non-zero entry cost".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProjectionConfig {
    /// Grid spacing in currency units.
    pub grid_step: f64,
    pub unit: PayoffUnit,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            grid_step: 0.01,
            unit: PayoffUnit::Currency,
        }
    }
}

/// Where today's spot sits on the chart, with both curves' values there.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpotMarker {
    pub x: f64,
    pub at_expiry: f64,
    pub before_expiry: f64,
}

/// Two payoff curves over one shared price grid.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PayoffProjection {
    pub unit: PayoffUnit,
    /// Underlying prices of the grid, always in currency.
    pub underlying_prices: Vec<f64>,
    /// Grid in the reported unit (equal to `underlying_prices` in currency mode).
    pub x: Vec<f64>,
    /// Exercise-value payoff on expiry day.
    pub at_expiry: Vec<f64>,
    /// Model payoff one trading day before expiry.
    pub before_expiry: Vec<f64>,
    /// Entry cost in currency.
    pub cost: f64,
    pub spot_marker: SpotMarker,
}

impl PayoffProjection {
    pub fn expiry_curve(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.at_expiry.iter().copied())
    }

    pub fn pre_expiry_curve(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.before_expiry.iter().copied())
    }
}

/// Builds the payoff chart of a position.
///
/// Grid: [min(K) - 2*max(premium) - 1, max(K) + 2*max(premium) + 1] on whole
/// multiples of the step, so strikes quoted in steps fall on grid points, and
/// never below one step. Premium is the quoted market price where a leg has
/// one, the model price otherwise. The expiry curve uses exercise values; the
/// pre-expiry curve revalues every leg with one trading day fewer.
pub struct PayoffProjector {
    config: ProjectionConfig,
}

impl PayoffProjector {
    pub fn new(config: ProjectionConfig) -> EngineResult<Self> {
        if !config.grid_step.is_finite() || config.grid_step <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "grid step must be positive, got {}",
                config.grid_step
            )));
        }
        Ok(Self { config })
    }

    pub fn project(&self, valuer: &PositionValuer<'_>) -> EngineResult<PayoffProjection> {
        let position = valuer.position();
        let spot = position.spot();
        let unit = self.config.unit;
        let cost = valuer.cost();
        if unit == PayoffUnit::Percent {
            ensure_scalable(cost)?;
        }

        let (lo, hi) = self.bounds(valuer)?;
        let grid = self.grid(lo, hi)?;
        let prior_day = valuer.days_to_expiry().saturating_sub(1);

        let mut at_expiry = Vec::with_capacity(grid.len());
        let mut before_expiry = Vec::with_capacity(grid.len());
        for &price in &grid {
            at_expiry.push(unit.convert_value(valuer.expiry_value_at(price), cost)?);
            before_expiry.push(unit.convert_value(valuer.value_at(price, prior_day)?, cost)?);
        }

        let spot_marker = SpotMarker {
            x: unit.convert_price(spot, spot),
            at_expiry: unit.convert_value(valuer.expiry_value_at(spot), cost)?,
            before_expiry: unit.convert_value(valuer.value_at(spot, prior_day)?, cost)?,
        };

        tracing::debug!(
            points = grid.len(),
            lo,
            hi,
            cost,
            unit = ?unit,
            "payoff projected"
        );

        Ok(PayoffProjection {
            unit,
            x: grid.iter().map(|&p| unit.convert_price(p, spot)).collect(),
            underlying_prices: grid,
            at_expiry,
            before_expiry,
            cost,
            spot_marker,
        })
    }

    fn bounds(&self, valuer: &PositionValuer<'_>) -> EngineResult<(f64, f64)> {
        let position = valuer.position();
        let spot = position.spot();
        let step = self.config.grid_step;

        if position.legs.is_empty() {
            let lo = (spot * (1.0 - NO_LEG_SPAN)).max(step);
            return Ok((lo, spot * (1.0 + NO_LEG_SPAN)));
        }

        let model_prices = valuer.leg_greeks(spot, valuer.days_to_expiry())?;
        let max_premium = position
            .legs
            .iter()
            .zip(&model_prices)
            .map(|(leg, g)| leg.market_price.unwrap_or(g.price))
            .fold(0.0_f64, f64::max);
        let min_strike = position.legs.iter().map(|l| l.strike).fold(f64::INFINITY, f64::min);
        let max_strike = position.legs.iter().map(|l| l.strike).fold(f64::NEG_INFINITY, f64::max);

        let lo = (min_strike - 2.0 * max_premium - 1.0).max(step);
        let hi = max_strike + 2.0 * max_premium + 1.0;
        Ok((lo, hi))
    }

    /// Points `k * step` for every k from floor(lo/step) (at least 1) up to
    /// floor(hi/step).
    fn grid(&self, lo: f64, hi: f64) -> EngineResult<Vec<f64>> {
        let step = self.config.grid_step;
        let first = (lo / step).floor().max(1.0);
        let last = (hi / step).floor();
        let count = last - first + 1.0;
        if !count.is_finite() || count < 1.0 || count >= MAX_GRID_POINTS as f64 {
            return Err(EngineError::InvalidInput(format!(
                "grid [{lo}, {hi}] with step {step} is unusable"
            )));
        }
        Ok((0..count as usize).map(|i| (first + i as f64) * step).collect())
    }
}

/// Project the payoff of a position under Black-Scholes.
pub fn project_payoff(
    position: &Position,
    ctx: &MarketContext,
    vols: &[f64],
    config: ProjectionConfig,
) -> EngineResult<PayoffProjection> {
    let model = BlackScholes::new();
    let valuer = PositionValuer::new(&model, position, ctx, vols)?;
    PayoffProjector::new(config)?.project(&valuer)
}
