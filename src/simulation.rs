use crate::calendar::TradingCalendar;
use crate::errors::{EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::TRADING_DAYS_PER_YEAR;
use crate::payoff::{ensure_scalable, PayoffUnit};
use crate::position::valuer::PositionValuer;
use crate::position::{MarketContext, Position};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use rayon::prelude::*;

/// Stride between per-path seeds. Paths get independent streams and a run is
/// reproducible from its base seed regardless of thread scheduling.
const SEED_STRIDE: u64 = 7_919;

/// Where the simulation's randomness comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomSource {
    Seeded(u64),
    Entropy,
}

impl RandomSource {
    fn base_seed(self) -> u64 {
        match self {
            Self::Seeded(seed) => seed,
            Self::Entropy => rand::random(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulationConfig {
    pub path_count: usize,
    pub random_source: RandomSource,
    pub unit: PayoffUnit,
    /// Diffusion volatility to use instead of the largest leg volatility.
    pub vol_override: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            path_count: 100,
            random_source: RandomSource::Entropy,
            unit: PayoffUnit::Currency,
            vol_override: None,
        }
    }
}

/// One trading day on one simulated path.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathPoint {
    pub date: NaiveDate,
    pub days_remaining: u32,
    pub spot: f64,
    pub payoff: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulatedPath {
    pub index: usize,
    pub points: Vec<PathPoint>,
}

/// Output of one run, with what is needed to reproduce it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulationRun {
    pub sigma: f64,
    pub base_seed: u64,
    pub unit: PayoffUnit,
    pub paths: Vec<SimulatedPath>,
}

impl SimulationRun {
    /// Payoff on the last simulated day of every path.
    pub fn terminal_payoffs(&self) -> Vec<f64> {
        self.paths
            .iter()
            .filter_map(|p| p.points.last().map(|pt| pt.payoff))
            .collect()
    }
}

/// Geometric Brownian motion fan of position payoffs.
///
/// Daily log-returns ~ N(0, sigma^2 / 252), summed along each path, so
/// S(k) = S0 * exp(sum of the first k+1 returns). Point k of a path is valued
/// with D - k trading days remaining (D down to 1) and dated that many
/// business days before expiry. Sigma is the largest leg volatility.
pub struct MonteCarloSimulator {
    config: SimulationConfig,
}

impl MonteCarloSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn simulate(
        &self,
        valuer: &PositionValuer<'_>,
        ctx: &MarketContext,
        calendar: &dyn TradingCalendar,
    ) -> EngineResult<SimulationRun> {
        let unit = self.config.unit;
        let cost = valuer.cost();
        if unit == PayoffUnit::Percent {
            ensure_scalable(cost)?;
        }

        let sigma = self.diffusion_vol(valuer)?;
        let daily = Normal::new(0.0, sigma / TRADING_DAYS_PER_YEAR.sqrt())
            .map_err(|e| EngineError::InvalidInput(format!("diffusion volatility {sigma}: {e}")))?;

        let days = ctx.days_to_expiry;
        let mut dates: Vec<NaiveDate> = Vec::with_capacity(days as usize);
        let mut date = ctx.expiry_date;
        for _ in 0..days {
            date = calendar.offset_business_days(date, -1)?;
            dates.push(date);
        }
        dates.reverse();

        let spot0 = valuer.position().spot();
        let base_seed = self.config.random_source.base_seed();

        let paths = (0..self.config.path_count)
            .into_par_iter()
            .map(|index| -> EngineResult<SimulatedPath> {
                let seed = base_seed.wrapping_add((index as u64).wrapping_mul(SEED_STRIDE));
                let mut rng = StdRng::seed_from_u64(seed);
                let mut cumulative = 0.0_f64;
                let mut points = Vec::with_capacity(dates.len());

                for (k, &date) in dates.iter().enumerate() {
                    cumulative += rng.sample(daily);
                    let spot = spot0 * cumulative.exp();
                    let days_remaining = days - k as u32;
                    let payoff = unit.convert_value(valuer.value_at(spot, days_remaining)?, cost)?;
                    points.push(PathPoint {
                        date,
                        days_remaining,
                        spot,
                        payoff,
                    });
                }

                Ok(SimulatedPath { index, points })
            })
            .collect::<EngineResult<Vec<SimulatedPath>>>()?;

        tracing::debug!(
            paths = paths.len(),
            days,
            sigma,
            base_seed,
            "simulation finished"
        );

        Ok(SimulationRun {
            sigma,
            base_seed,
            unit,
            paths,
        })
    }

    /// Override, else the largest vol among held legs. Inert legs count only
    /// when nothing is held.
    fn diffusion_vol(&self, valuer: &PositionValuer<'_>) -> EngineResult<f64> {
        let legs = &valuer.position().legs;
        let largest = |held_only: bool| {
            legs.iter()
                .zip(valuer.vols())
                .filter(|(leg, _)| !held_only || leg.quantity != 0)
                .map(|(_, &sigma)| sigma)
                .reduce(f64::max)
        };
        let sigma = match self.config.vol_override {
            Some(sigma) => sigma,
            None => largest(true).or_else(|| largest(false)).ok_or_else(|| {
                EngineError::InvalidInput(
                    "simulation needs an option leg or a volatility override".into(),
                )
            })?,
        };
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "diffusion volatility must be finite and non-negative, got {sigma}"
            )));
        }
        Ok(sigma)
    }
}

/// Simulate a position under Black-Scholes revaluation.
pub fn simulate_paths(
    position: &Position,
    ctx: &MarketContext,
    vols: &[f64],
    config: SimulationConfig,
    calendar: &dyn TradingCalendar,
) -> EngineResult<SimulationRun> {
    let model = BlackScholes::new();
    let valuer = PositionValuer::new(&model, position, ctx, vols)?;
    MonteCarloSimulator::new(config).simulate(&valuer, ctx, calendar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::HolidayCalendar;
    use crate::models::OptionType;
    use crate::position::OptionLeg;
    use approx::assert_abs_diff_eq;

    fn setup(days: u32) -> (Position, MarketContext, HolidayCalendar) {
        let cal = HolidayCalendar::with_holidays([NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()]);
        let today = NaiveDate::from_ymd_opt(2024, 4, 22).unwrap();
        let ctx = MarketContext::with_days(10.5, days, today, &cal).unwrap();
        let position = Position::new(
            [
                OptionLeg::new(30.0, OptionType::Call, 1),
                OptionLeg::new(33.0, OptionType::Call, -1),
            ],
            31.0,
            0,
        );
        (position, ctx, cal)
    }

    fn seeded(seed: u64) -> SimulationConfig {
        SimulationConfig {
            random_source: RandomSource::Seeded(seed),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_path_count_and_length() {
        let (position, ctx, cal) = setup(21);
        let run = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(7), &cal).unwrap();
        assert_eq!(run.paths.len(), 100);
        for path in &run.paths {
            assert_eq!(path.points.len(), 21);
        }
        assert_abs_diff_eq!(run.sigma, 0.3);
    }

    #[test]
    fn test_days_count_down_and_dates_step_back_from_expiry() {
        let (position, ctx, cal) = setup(8);
        let run = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(1), &cal).unwrap();
        let points = &run.paths[0].points;
        let remaining: Vec<u32> = points.iter().map(|p| p.days_remaining).collect();
        assert_eq!(remaining, vec![8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(points[0].date, ctx.valuation_date);
        assert_eq!(cal.offset_business_days(points[7].date, 1).unwrap(), ctx.expiry_date);
        assert!(points.iter().all(|p| cal.is_business_day(p.date)));
    }

    #[test]
    fn test_seeded_runs_reproduce() {
        let (position, ctx, cal) = setup(10);
        let a = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(42), &cal).unwrap();
        let b = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(42), &cal).unwrap();
        assert_eq!(a, b);
        let c = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(43), &cal).unwrap();
        assert_ne!(a.paths[0].points, c.paths[0].points);
    }

    #[test]
    fn test_paths_are_independent() {
        let (position, ctx, cal) = setup(10);
        let run = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(3), &cal).unwrap();
        assert_ne!(run.paths[0].points[0].spot, run.paths[1].points[0].spot);
    }

    #[test]
    fn test_zero_vol_override_keeps_spot() {
        let (position, ctx, cal) = setup(5);
        let config = SimulationConfig { vol_override: Some(0.0), ..seeded(9) };
        let run = simulate_paths(&position, &ctx, &[0.3, 0.25], config, &cal).unwrap();
        for path in &run.paths {
            for point in &path.points {
                assert_abs_diff_eq!(point.spot, 31.0, epsilon = 1e-12);
            }
            assert_abs_diff_eq!(path.points[0].payoff, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_expiry_day_has_empty_paths() {
        let (position, ctx, cal) = setup(0);
        let run = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(5), &cal).unwrap();
        assert_eq!(run.paths.len(), 100);
        assert!(run.paths.iter().all(|p| p.points.is_empty()));
        assert!(run.terminal_payoffs().is_empty());
    }

    #[test]
    fn test_no_legs_needs_override() {
        let (_, ctx, cal) = setup(5);
        let shares = Position::new([], 31.0, 100);
        let result = simulate_paths(&shares, &ctx, &[], seeded(1), &cal);
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));

        let config = SimulationConfig { vol_override: Some(0.2), path_count: 10, ..seeded(1) };
        let run = simulate_paths(&shares, &ctx, &[], config, &cal).unwrap();
        let point = run.paths[0].points[0];
        assert_abs_diff_eq!(point.payoff, 100.0 * (point.spot - 31.0), epsilon = 1e-9);
    }

    #[test]
    fn test_inert_leg_vol_ignored_for_diffusion() {
        let (_, ctx, cal) = setup(5);
        let position = Position::new(
            [
                OptionLeg::new(30.0, OptionType::Call, 1),
                OptionLeg::new(33.0, OptionType::Call, 0),
            ],
            31.0,
            0,
        );
        let run = simulate_paths(&position, &ctx, &[0.25, 0.9], seeded(2), &cal).unwrap();
        assert_abs_diff_eq!(run.sigma, 0.25);

        let inert = Position::new([OptionLeg::new(33.0, OptionType::Call, 0)], 31.0, 100);
        let run = simulate_paths(&inert, &ctx, &[0.4], seeded(2), &cal).unwrap();
        assert_abs_diff_eq!(run.sigma, 0.4);
    }

    #[test]
    fn test_dates_walk_back_across_holiday() {
        // 22 Apr + 9 trading days with 1 May closed lands on Mon 6 May
        let (position, ctx, cal) = setup(9);
        assert_eq!(ctx.expiry_date, NaiveDate::from_ymd_opt(2024, 5, 6).unwrap());
        let run = simulate_paths(&position, &ctx, &[0.3, 0.25], seeded(4), &cal).unwrap();
        let dates: Vec<NaiveDate> = run.paths[0].points.iter().map(|p| p.date).collect();
        assert_eq!(dates.len(), 9);
        assert_eq!(dates[0], ctx.valuation_date);
        assert!(!dates.contains(&NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*dates.last().unwrap(), NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
    }

    #[test]
    fn test_percent_needs_cost() {
        let (_, ctx, cal) = setup(5);
        let flat = Position::new([OptionLeg::new(30.0, OptionType::Call, 0)], 31.0, 0);
        let config = SimulationConfig { unit: PayoffUnit::Percent, ..seeded(1) };
        let result = simulate_paths(&flat, &ctx, &[0.3], config, &cal);
        assert!(matches!(result, Err(EngineError::DegenerateScale(_))));
    }
}
