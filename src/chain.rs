use crate::models::{ExerciseStyle, OptionType};
use crate::position::OptionLeg;
use chrono::NaiveDate;

/// Length of the root shared by a stock ticker and its option tickers
/// (PETR4 -> PETR, PETRA123 -> PETR).
const BASE_TICKER_LEN: usize = 4;

pub fn base_ticker(ticker: &str) -> &str {
    match ticker.trim().char_indices().nth(BASE_TICKER_LEN) {
        Some((idx, _)) => &ticker.trim()[..idx],
        None => ticker.trim(),
    }
}

/// One listed option series, as the exchange's authorised-series list describes it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionSeries {
    pub ticker: String,
    pub option_type: OptionType,
    pub exercise_style: ExerciseStyle,
    pub strike: f64,
    pub expiry: NaiveDate,
}

impl OptionSeries {
    pub fn base_ticker(&self) -> &str {
        base_ticker(&self.ticker)
    }

    /// A leg on this series with the given signed quantity.
    pub fn to_leg(&self, quantity: i64) -> OptionLeg {
        OptionLeg {
            ticker: Some(self.ticker.clone()),
            exercise_style: Some(self.exercise_style),
            ..OptionLeg::new(self.strike, self.option_type, quantity)
        }
    }
}

/// Selection the dashboard makes before building a position.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SeriesFilter {
    /// Underlying ticker, e.g. "BOVA11"; matched on its base.
    pub underlying: String,
    pub expiry: NaiveDate,
    pub option_types: Vec<OptionType>,
    pub exercise_styles: Vec<ExerciseStyle>,
}

impl SeriesFilter {
    pub fn matches(&self, series: &OptionSeries) -> bool {
        series.base_ticker() == base_ticker(&self.underlying)
            && series.expiry == self.expiry
            && self.option_types.contains(&series.option_type)
            && self.exercise_styles.contains(&series.exercise_style)
    }

    /// Matching series, in listing order.
    pub fn apply<'a>(&self, chain: &'a [OptionSeries]) -> Vec<&'a OptionSeries> {
        chain.iter().filter(|s| self.matches(s)).collect()
    }
}

/// Distinct expiries in ascending order.
pub fn expirations(chain: &[OptionSeries]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = chain.iter().map(|s| s.expiry).collect();
    dates.sort_unstable();
    dates.dedup();
    dates
}
