pub mod valuer;

use crate::calendar::TradingCalendar;
use crate::errors::{ensure_positive, EngineError, EngineResult};
use crate::models::{ExerciseStyle, OptionType};
use chrono::NaiveDate;
use smallvec::SmallVec;

/// Relative distance from the strike inside which a contract counts as ATM.
const ATM_BAND: f64 = 0.005;

/// One option contract within a position. Rebuilt on every refresh.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionLeg {
    pub strike: f64,
    pub option_type: OptionType,
    /// Positive = long, negative = short, zero = inert.
    pub quantity: i64,
    /// Known volatility for this leg, if any.
    #[serde(default)]
    pub implied_vol: Option<f64>,
    /// Last traded premium, used to solve for `implied_vol`.
    #[serde(default)]
    pub market_price: Option<f64>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub exercise_style: Option<ExerciseStyle>,
}

impl OptionLeg {
    pub fn new(strike: f64, option_type: OptionType, quantity: i64) -> Self {
        Self {
            strike,
            option_type,
            quantity,
            implied_vol: None,
            market_price: None,
            ticker: None,
            exercise_style: None,
        }
    }

    pub fn with_vol(mut self, sigma: f64) -> Self {
        self.implied_vol = Some(sigma);
        self
    }

    pub fn with_market_price(mut self, price: f64) -> Self {
        self.market_price = Some(price);
        self
    }

    /// Quantity-weighted exercise value at `spot`. The floor is applied per
    /// contract before the sign, so a short leg contributes -max(..., 0).
    #[inline]
    pub fn expiry_value(&self, spot: f64) -> f64 {
        self.option_type.intrinsic(spot, self.strike) * self.quantity as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UnderlyingPosition {
    pub spot_price: f64,
    pub quantity: i64,
}

/// Option legs (usually a handful) plus shares of the underlying.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub legs: SmallVec<[OptionLeg; 4]>,
    pub underlying: UnderlyingPosition,
}

impl Position {
    pub fn new<I>(legs: I, spot_price: f64, underlying_quantity: i64) -> Self
    where
        I: IntoIterator<Item = OptionLeg>,
    {
        Self {
            legs: legs.into_iter().collect(),
            underlying: UnderlyingPosition {
                spot_price,
                quantity: underlying_quantity,
            },
        }
    }

    #[inline]
    pub fn spot(&self) -> f64 {
        self.underlying.spot_price
    }

    /// Reject anything that would make a valuation meaningless.
    pub fn validate(&self) -> EngineResult<()> {
        ensure_positive("spot price", self.underlying.spot_price)?;
        for (i, leg) in self.legs.iter().enumerate() {
            ensure_positive(&format!("strike of leg {i}"), leg.strike)?;
            if let Some(sigma) = leg.implied_vol {
                ensure_positive(&format!("implied vol of leg {i}"), sigma)?;
            }
            if let Some(price) = leg.market_price {
                if !price.is_finite() || price < 0.0 {
                    return Err(EngineError::InvalidInput(format!(
                        "market price of leg {i} must be finite and non-negative, got {price}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_flat(&self) -> bool {
        self.underlying.quantity == 0 && self.legs.iter().all(|l| l.quantity == 0)
    }
}

/// Rate and time inputs shared by every leg of one valuation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarketContext {
    /// Annual nominal rate in percent (13.75 = 13.75%).
    pub risk_free_rate_pct: f64,
    /// Trading days from the valuation date to expiry.
    pub days_to_expiry: u32,
    pub valuation_date: NaiveDate,
    pub expiry_date: NaiveDate,
}

impl MarketContext {
    /// Derive the trading-day count from the calendar.
    pub fn from_calendar(
        risk_free_rate_pct: f64,
        valuation_date: NaiveDate,
        expiry_date: NaiveDate,
        calendar: &dyn TradingCalendar,
    ) -> EngineResult<Self> {
        let days = calendar.business_days_between(valuation_date, expiry_date);
        let days_to_expiry = u32::try_from(days).map_err(|_| {
            EngineError::Calendar(format!(
                "expiry {expiry_date} is before valuation date {valuation_date}"
            ))
        })?;
        Self::validated(risk_free_rate_pct, days_to_expiry, valuation_date, expiry_date)
    }

    /// Derive the expiry date from a trading-day count.
    pub fn with_days(
        risk_free_rate_pct: f64,
        days_to_expiry: u32,
        valuation_date: NaiveDate,
        calendar: &dyn TradingCalendar,
    ) -> EngineResult<Self> {
        let expiry_date = calendar.offset_business_days(valuation_date, days_to_expiry as i64)?;
        Self::validated(risk_free_rate_pct, days_to_expiry, valuation_date, expiry_date)
    }

    fn validated(
        risk_free_rate_pct: f64,
        days_to_expiry: u32,
        valuation_date: NaiveDate,
        expiry_date: NaiveDate,
    ) -> EngineResult<Self> {
        if !risk_free_rate_pct.is_finite() || risk_free_rate_pct <= -100.0 {
            return Err(EngineError::InvalidInput(format!(
                "risk-free rate must be finite and above -100%, got {risk_free_rate_pct}"
            )));
        }
        Ok(Self {
            risk_free_rate_pct,
            days_to_expiry,
            valuation_date,
            expiry_date,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Moneyness {
    Itm,
    Atm,
    Otm,
}

impl Moneyness {
    pub fn classify(option_type: OptionType, spot: f64, strike: f64) -> Self {
        if (spot / strike - 1.0).abs() <= ATM_BAND {
            Self::Atm
        } else if option_type.is_itm(spot, strike) {
            Self::Itm
        } else {
            Self::Otm
        }
    }
}
