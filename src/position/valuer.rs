use crate::errors::{ensure_positive, EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::{Greeks, PricingInputs, PricingModel};
use crate::position::{MarketContext, Position};
use smallvec::SmallVec;

/// Marks a position to model and measures every revaluation against the
/// entry cost, so all outputs are payoffs rather than absolute values.
///
/// cost     = sum(q_i * price_i(S, D)) + q_u * S
/// value(s) = sum(q_i * price_i(s, d)) + q_u * s - cost
///
/// Pure: holds borrowed inputs and the precomputed cost only.
pub struct PositionValuer<'a> {
    model: &'a dyn PricingModel,
    position: &'a Position,
    vols: &'a [f64],
    rate_pct: f64,
    days_to_expiry: u32,
    cost: f64,
}

impl<'a> PositionValuer<'a> {
    /// `vols` holds one resolved volatility per leg, in leg order.
    pub fn new(
        model: &'a dyn PricingModel,
        position: &'a Position,
        ctx: &MarketContext,
        vols: &'a [f64],
    ) -> EngineResult<Self> {
        position.validate()?;
        if vols.len() != position.legs.len() {
            return Err(EngineError::InvalidInput(format!(
                "{} volatilities given for {} legs",
                vols.len(),
                position.legs.len()
            )));
        }
        if let Some(bad) = vols.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "leg volatility must be finite and non-negative, got {bad}"
            )));
        }

        let mut valuer = Self {
            model,
            position,
            vols,
            rate_pct: ctx.risk_free_rate_pct,
            days_to_expiry: ctx.days_to_expiry,
            cost: 0.0,
        };
        valuer.cost = valuer.gross_value(position.spot(), ctx.days_to_expiry);
        Ok(valuer)
    }

    #[inline]
    pub fn cost(&self) -> f64 {
        self.cost
    }

    #[inline]
    pub fn position(&self) -> &Position {
        self.position
    }

    #[inline]
    pub fn vols(&self) -> &[f64] {
        self.vols
    }

    #[inline]
    pub fn days_to_expiry(&self) -> u32 {
        self.days_to_expiry
    }

    /// Per-contract Greeks of every leg at `spot` with `days` remaining.
    pub fn leg_greeks(&self, spot: f64, days: u32) -> EngineResult<SmallVec<[Greeks; 4]>> {
        ensure_positive("spot", spot)?;
        Ok(self.leg_greeks_unchecked(spot, days))
    }

    /// Quantity-weighted Greeks of the whole position at the current spot.
    /// Shares add delta only.
    pub fn position_greeks(&self) -> Greeks {
        let legs = self.leg_greeks_unchecked(self.position.spot(), self.days_to_expiry);
        let mut total = Greeks::default();
        for (leg, g) in self.position.legs.iter().zip(&legs) {
            total += *g * leg.quantity as f64;
        }
        total.delta += self.position.underlying.quantity as f64;
        total
    }

    /// Payoff if the underlying were at `spot` with `days` trading days left.
    pub fn value_at(&self, spot: f64, days: u32) -> EngineResult<f64> {
        ensure_positive("spot", spot)?;
        Ok(self.gross_value(spot, days) - self.cost)
    }

    /// Payoff at expiry: exercise value of every leg instead of a model price.
    pub fn expiry_value_at(&self, spot: f64) -> f64 {
        let options: f64 = self.position.legs.iter().map(|leg| leg.expiry_value(spot)).sum();
        options + self.position.underlying.quantity as f64 * spot - self.cost
    }

    fn gross_value(&self, spot: f64, days: u32) -> f64 {
        let options: f64 = self
            .position
            .legs
            .iter()
            .zip(self.vols)
            .filter(|(leg, _)| leg.quantity != 0)
            .map(|(leg, &sigma)| {
                let inputs = PricingInputs::new_unchecked(
                    spot,
                    leg.strike,
                    self.rate_pct,
                    sigma,
                    days,
                    leg.option_type,
                );
                self.model.price(&inputs).price * leg.quantity as f64
            })
            .sum();
        options + self.position.underlying.quantity as f64 * spot
    }

    fn leg_greeks_unchecked(&self, spot: f64, days: u32) -> SmallVec<[Greeks; 4]> {
        self.position
            .legs
            .iter()
            .zip(self.vols)
            .map(|(leg, &sigma)| {
                let inputs = PricingInputs::new_unchecked(
                    spot,
                    leg.strike,
                    self.rate_pct,
                    sigma,
                    days,
                    leg.option_type,
                );
                self.model.price(&inputs)
            })
            .collect()
    }
}

/// Entry cost of a position under Black-Scholes.
pub fn compute_position_cost(
    position: &Position,
    ctx: &MarketContext,
    vols: &[f64],
) -> EngineResult<f64> {
    let model = BlackScholes::new();
    Ok(PositionValuer::new(&model, position, ctx, vols)?.cost())
}

/// Payoff of a position revalued at a hypothetical spot and day count.
pub fn value_position(
    position: &Position,
    ctx: &MarketContext,
    vols: &[f64],
    hypothetical_spot: f64,
    days_remaining: u32,
) -> EngineResult<f64> {
    let model = BlackScholes::new();
    PositionValuer::new(&model, position, ctx, vols)?.value_at(hypothetical_spot, days_remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::HolidayCalendar;
    use crate::models::black_scholes::price_option;
    use crate::models::OptionType;
    use crate::position::OptionLeg;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn ctx(days: u32) -> MarketContext {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        MarketContext::with_days(10.0, days, today, &HolidayCalendar::weekends_only()).unwrap()
    }

    #[test]
    fn test_cost_sums_legs_and_shares() {
        let position = Position::new(
            [
                OptionLeg::new(50.0, OptionType::Call, 2),
                OptionLeg::new(60.0, OptionType::Call, -1),
            ],
            55.0,
            100,
        );
        let vols = [0.3, 0.25];
        let cost = compute_position_cost(&position, &ctx(30), &vols).unwrap();
        let c50 = price_option(55.0, 50.0, 10.0, 0.3, 30, OptionType::Call).unwrap().price;
        let c60 = price_option(55.0, 60.0, 10.0, 0.25, 30, OptionType::Call).unwrap().price;
        assert_relative_eq!(cost, 2.0 * c50 - c60 + 5500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_value_at_entry_is_zero() {
        let position = Position::new([OptionLeg::new(50.0, OptionType::Put, -3)], 48.0, 200);
        let vols = [0.4];
        let v = value_position(&position, &ctx(12), &vols, 48.0, 12).unwrap();
        assert!(v.abs() < 1e-9, "revaluing at entry should give zero payoff, got {v}");
    }

    #[test]
    fn test_shares_only_linear() {
        let position = Position::new([OptionLeg::new(50.0, OptionType::Call, 0)], 50.0, 100);
        let model = BlackScholes::new();
        let vols = [0.3];
        let c = ctx(10);
        let valuer = PositionValuer::new(&model, &position, &c, &vols).unwrap();
        assert_relative_eq!(valuer.cost(), 5000.0);
        assert_relative_eq!(valuer.value_at(52.0, 9).unwrap(), 200.0, epsilon = 1e-9);
        assert_relative_eq!(valuer.expiry_value_at(47.0), -300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_position_greeks_aggregate() {
        let position = Position::new(
            [
                OptionLeg::new(50.0, OptionType::Call, 1),
                OptionLeg::new(50.0, OptionType::Put, 1),
            ],
            50.0,
            -1,
        );
        let model = BlackScholes::new();
        let vols = [0.3, 0.3];
        let c = ctx(30);
        let valuer = PositionValuer::new(&model, &position, &c, &vols).unwrap();
        let legs = valuer.leg_greeks(50.0, 30).unwrap();
        let total = valuer.position_greeks();
        assert_relative_eq!(total.delta, legs[0].delta + legs[1].delta - 1.0, epsilon = 1e-12);
        assert_relative_eq!(total.gamma, 2.0 * legs[0].gamma, epsilon = 1e-12);
        assert_relative_eq!(total.price, legs[0].price + legs[1].price, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_mismatched_vols() {
        let position = Position::new([OptionLeg::new(50.0, OptionType::Call, 1)], 50.0, 0);
        let model = BlackScholes::new();
        let c = ctx(5);
        assert!(PositionValuer::new(&model, &position, &c, &[]).is_err());
        assert!(PositionValuer::new(&model, &position, &c, &[f64::NAN]).is_err());
    }

    #[test]
    fn test_value_at_rejects_non_positive_spot() {
        let position = Position::new([OptionLeg::new(50.0, OptionType::Call, 1)], 50.0, 0);
        let model = BlackScholes::new();
        let vols = [0.3];
        let c = ctx(5);
        let valuer = PositionValuer::new(&model, &position, &c, &vols).unwrap();
        assert!(valuer.value_at(0.0, 4).is_err());
    }
}
