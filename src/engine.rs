use crate::calendar::{HolidayCalendar, TradingCalendar};
use crate::config::AppConfig;
use crate::errors::EngineResult;
use crate::models::black_scholes::BlackScholes;
use crate::models::implied_vol::{fill_with_median, ImpliedVolSolver, VolEstimate};
use crate::models::{Greeks, OptionType, PricingModel};
use crate::payoff::{PayoffProjection, PayoffProjector, ProjectionConfig};
use crate::position::valuer::PositionValuer;
use crate::position::{MarketContext, Moneyness, OptionLeg, Position};
use crate::simulation::{MonteCarloSimulator, SimulationConfig, SimulationRun};
use chrono::NaiveDate;

/// How a leg's volatility was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolSource {
    Given,
    Solved,
    /// Median of the other legs, substituted for a missing or unsolved vol.
    /// A leg that needs no vol gets 0.0 when nothing resolved.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LegVolatility {
    pub sigma: f64,
    pub source: VolSource,
    /// Solver outcome, when the leg carried a market price.
    pub estimate: Option<VolEstimate>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LegReport {
    pub ticker: Option<String>,
    pub strike: f64,
    pub option_type: OptionType,
    pub quantity: i64,
    pub moneyness: Moneyness,
    pub volatility: LegVolatility,
    /// Per-contract Greeks at today's spot.
    pub greeks: Greeks,
}

/// Everything the dashboard renders for one position.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PositionAnalysis {
    pub model: String,
    pub context: MarketContext,
    pub cost: f64,
    pub legs: Vec<LegReport>,
    /// Quantity-weighted Greeks of legs and shares together.
    pub position_greeks: Greeks,
    pub payoff: PayoffProjection,
    pub simulation: SimulationRun,
}

/// Plain-data request as the hosting application sends it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnalysisRequest {
    pub spot: f64,
    #[serde(default)]
    pub underlying_quantity: i64,
    #[serde(default)]
    pub legs: Vec<OptionLeg>,
    pub risk_free_rate_pct: f64,
    pub valuation_date: NaiveDate,
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl AnalysisRequest {
    pub fn into_parts(self) -> EngineResult<(Position, MarketContext, HolidayCalendar)> {
        let calendar = HolidayCalendar::with_holidays(self.holidays);
        let ctx = MarketContext::from_calendar(
            self.risk_free_rate_pct,
            self.valuation_date,
            self.expiry_date,
            &calendar,
        )?;
        let position = Position::new(self.legs, self.spot, self.underlying_quantity);
        position.validate()?;
        Ok((position, ctx, calendar))
    }
}

/// Runs the full pipeline for one position: volatilities, Greeks, payoff
/// chart and simulated fan. Stateless between calls.
pub struct Engine {
    model: BlackScholes,
    solver: ImpliedVolSolver,
    projection: ProjectionConfig,
    simulation: SimulationConfig,
}

impl Engine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            model: BlackScholes::new(),
            solver: ImpliedVolSolver::new(config.solver),
            projection: config.projection,
            simulation: config.simulation,
        }
    }

    /// Given vol, else solved from the market price, else the median of the
    /// legs that resolved. One failing leg never aborts the others.
    ///
    /// A volatility is only required for legs that are held (non-zero
    /// quantity) while time remains. Inert legs and every leg on expiry day
    /// are priced without one, so a gap there is filled but never fatal.
    pub fn resolve_volatilities(
        &self,
        position: &Position,
        ctx: &MarketContext,
    ) -> EngineResult<Vec<LegVolatility>> {
        let mut resolved: Vec<(Option<f64>, VolSource, Option<VolEstimate>)> =
            Vec::with_capacity(position.legs.len());

        for (i, leg) in position.legs.iter().enumerate() {
            if let Some(sigma) = leg.implied_vol {
                resolved.push((Some(sigma), VolSource::Given, None));
                continue;
            }
            let Some(price) = leg.market_price else {
                tracing::warn!(leg = i, strike = leg.strike, "leg has neither vol nor market price");
                resolved.push((None, VolSource::Fallback, None));
                continue;
            };

            let estimate = self.solver.solve(
                price,
                position.spot(),
                leg.strike,
                ctx.risk_free_rate_pct,
                ctx.days_to_expiry,
                leg.option_type,
            )?;
            match estimate.sigma() {
                Some(sigma) => resolved.push((Some(sigma), VolSource::Solved, Some(estimate))),
                None => {
                    tracing::warn!(
                        leg = i,
                        strike = leg.strike,
                        price,
                        estimate = ?estimate,
                        "implied vol unsolved, using fallback"
                    );
                    resolved.push((None, VolSource::Fallback, Some(estimate)));
                }
            }
        }

        let raw: Vec<Option<f64>> = resolved.iter().map(|(sigma, _, _)| *sigma).collect();
        let needed: Vec<bool> = position
            .legs
            .iter()
            .map(|leg| leg.quantity != 0 && ctx.days_to_expiry > 0)
            .collect();
        let filled = fill_with_median(&raw, &needed)?;

        Ok(resolved
            .into_iter()
            .zip(filled)
            .map(|((_, source, estimate), sigma)| LegVolatility { sigma, source, estimate })
            .collect())
    }

    pub fn analyze(
        &self,
        position: &Position,
        ctx: &MarketContext,
        calendar: &dyn TradingCalendar,
    ) -> EngineResult<PositionAnalysis> {
        let volatilities = self.resolve_volatilities(position, ctx)?;
        let sigmas: Vec<f64> = volatilities.iter().map(|v| v.sigma).collect();

        let valuer = PositionValuer::new(&self.model, position, ctx, &sigmas)?;
        let leg_greeks = valuer.leg_greeks(position.spot(), ctx.days_to_expiry)?;

        let legs: Vec<LegReport> = position
            .legs
            .iter()
            .zip(volatilities)
            .zip(leg_greeks)
            .map(|((leg, volatility), greeks)| LegReport {
                ticker: leg.ticker.clone(),
                strike: leg.strike,
                option_type: leg.option_type,
                quantity: leg.quantity,
                moneyness: Moneyness::classify(leg.option_type, position.spot(), leg.strike),
                volatility,
                greeks,
            })
            .collect();

        let payoff = PayoffProjector::new(self.projection)?.project(&valuer)?;
        let simulation = MonteCarloSimulator::new(self.simulation).simulate(&valuer, ctx, calendar)?;

        let analysis = PositionAnalysis {
            model: self.model.name().to_string(),
            context: *ctx,
            cost: valuer.cost(),
            legs,
            position_greeks: valuer.position_greeks(),
            payoff,
            simulation,
        };

        tracing::info!(
            legs = analysis.legs.len(),
            days = ctx.days_to_expiry,
            cost = analysis.cost,
            delta = analysis.position_greeks.delta,
            paths = analysis.simulation.paths.len(),
            "position analysed"
        );

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::models::black_scholes::price_option;
    use crate::models::implied_vol::Unsolved;
    use crate::simulation::RandomSource;
    use approx::assert_abs_diff_eq;

    fn engine() -> Engine {
        let mut config = AppConfig::default();
        config.projection.grid_step = 0.1;
        config.simulation.random_source = RandomSource::Seeded(11);
        config.simulation.path_count = 20;
        Engine::new(&config)
    }

    fn request(legs: Vec<OptionLeg>) -> AnalysisRequest {
        AnalysisRequest {
            spot: 31.0,
            underlying_quantity: 0,
            legs,
            risk_free_rate_pct: 10.5,
            valuation_date: NaiveDate::from_ymd_opt(2024, 4, 22).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            holidays: vec![NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()],
        }
    }

    #[test]
    fn test_unsolved_leg_gets_median_fallback() {
        let (position, ctx, _) = request(vec![]).into_parts().unwrap();
        let days = ctx.days_to_expiry;
        let p1 = price_option(31.0, 30.0, 10.5, 0.30, days, OptionType::Call).unwrap().price;
        let p2 = price_option(31.0, 32.0, 10.5, 0.40, days, OptionType::Call).unwrap().price;
        let legs = vec![
            OptionLeg::new(30.0, OptionType::Call, 1).with_market_price(p1),
            OptionLeg::new(32.0, OptionType::Call, -1).with_market_price(p2),
            // Above spot: no volatility can produce it.
            OptionLeg::new(34.0, OptionType::Call, 1).with_market_price(40.0),
        ];
        let position = Position { legs: legs.into_iter().collect(), ..position };

        let vols = engine().resolve_volatilities(&position, &ctx).unwrap();
        assert_eq!(vols[0].source, VolSource::Solved);
        assert_eq!(vols[1].source, VolSource::Solved);
        assert_eq!(vols[2].source, VolSource::Fallback);
        assert_abs_diff_eq!(vols[0].sigma, 0.30, epsilon = 1e-4);
        assert_abs_diff_eq!(vols[2].sigma, 0.5 * (vols[0].sigma + vols[1].sigma), epsilon = 1e-12);
        assert!(matches!(vols[2].estimate, Some(VolEstimate::Unsolved(_))));
    }

    #[test]
    fn test_no_resolvable_vol_is_error() {
        let legs = vec![OptionLeg::new(30.0, OptionType::Call, 1)];
        let (position, ctx, _) = request(legs).into_parts().unwrap();
        let result = engine().resolve_volatilities(&position, &ctx);
        assert!(matches!(result, Err(EngineError::NoConvergence { legs: 1 })));
    }

    #[test]
    fn test_expiry_day_analysis_needs_no_vol() {
        let mut req = request(vec![OptionLeg::new(30.0, OptionType::Call, 1).with_market_price(1.2)]);
        req.expiry_date = req.valuation_date;
        let (position, ctx, calendar) = req.into_parts().unwrap();
        assert_eq!(ctx.days_to_expiry, 0);

        let analysis = engine().analyze(&position, &ctx, &calendar).unwrap();
        let leg = &analysis.legs[0];
        assert_eq!(leg.volatility.source, VolSource::Fallback);
        assert_eq!(leg.volatility.estimate, Some(VolEstimate::Unsolved(Unsolved::ExpiryDay)));
        // Intrinsic only: 31 - 30.
        assert_abs_diff_eq!(analysis.cost, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(leg.greeks.delta, 1.0);
        assert!(analysis.simulation.paths.iter().all(|p| p.points.is_empty()));
        for (_, value) in analysis.payoff.expiry_curve() {
            assert!(value >= -1.0 - 1e-12);
        }
    }

    #[test]
    fn test_inert_leg_without_vol_keeps_share_payoff() {
        let mut req = request(vec![OptionLeg::new(30.0, OptionType::Call, 0)]);
        req.underlying_quantity = 100;
        let (position, ctx, calendar) = req.into_parts().unwrap();

        let vols = engine().resolve_volatilities(&position, &ctx).unwrap();
        assert_eq!(vols[0].source, VolSource::Fallback);
        assert_eq!(vols[0].sigma, 0.0);

        let analysis = engine().analyze(&position, &ctx, &calendar).unwrap();
        assert_abs_diff_eq!(analysis.cost, 3100.0, epsilon = 1e-9);
        for (price, value) in analysis.payoff.expiry_curve() {
            assert_abs_diff_eq!(value, 100.0 * (price - 31.0), epsilon = 1e-6);
        }
        assert_abs_diff_eq!(analysis.position_greeks.delta, 100.0);
    }

    #[test]
    fn test_full_analysis() {
        let legs = vec![
            OptionLeg::new(30.0, OptionType::Call, 1).with_vol(0.3),
            OptionLeg::new(33.0, OptionType::Call, -1).with_vol(0.28),
        ];
        let (position, ctx, calendar) = request(legs).into_parts().unwrap();
        let analysis = engine().analyze(&position, &ctx, &calendar).unwrap();

        assert_eq!(analysis.model, "Black-Scholes");
        assert_eq!(analysis.legs.len(), 2);
        assert_eq!(analysis.legs[0].moneyness, Moneyness::Itm);
        assert_eq!(analysis.legs[1].moneyness, Moneyness::Otm);
        assert!(analysis.cost > 0.0, "bull call spread is a debit");
        assert!(analysis.position_greeks.delta > 0.0);
        assert_eq!(analysis.simulation.paths.len(), 20);
        assert!(analysis
            .simulation
            .paths
            .iter()
            .all(|p| p.points.len() == ctx.days_to_expiry as usize));
        assert_abs_diff_eq!(analysis.simulation.sigma, 0.3);
        assert_eq!(analysis.payoff.x.len(), analysis.payoff.at_expiry.len());

        let json = serde_json::to_string(&analysis).unwrap();
        assert!(json.contains("\"position_greeks\""));
    }

    #[test]
    fn test_request_from_json() {
        let raw = r#"{
            "spot": 118.5,
            "underlying_quantity": 100,
            "legs": [{"strike": 120.0, "option_type": "call", "quantity": -1, "market_price": 2.1}],
            "risk_free_rate_pct": 13.75,
            "valuation_date": "2024-04-22",
            "expiry_date": "2024-05-17",
            "holidays": ["2024-05-01"]
        }"#;
        let request: AnalysisRequest = serde_json::from_str(raw).unwrap();
        let (position, ctx, _) = request.into_parts().unwrap();
        assert_eq!(position.legs.len(), 1);
        assert_eq!(position.underlying.quantity, 100);
        // 22 Apr .. 17 May exclusive, minus 1 May
        assert_eq!(ctx.days_to_expiry, 18);
    }

    #[test]
    fn test_request_rejects_bad_spot() {
        let mut bad = request(vec![]);
        bad.spot = -3.0;
        assert!(matches!(bad.into_parts(), Err(EngineError::InvalidInput(_))));
    }
}
