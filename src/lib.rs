//! Pricing and payoff simulation for Brazilian listed equity options.
//!
//! Black-Scholes prices and Greeks, implied-volatility recovery, position
//! valuation, payoff charts and Monte Carlo payoff fans. Rates are quoted
//! in percent and time is counted in trading days (252 per year).

pub mod calendar;
pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod payoff;
pub mod position;
pub mod simulation;

pub use calendar::{HolidayCalendar, TradingCalendar};
pub use config::AppConfig;
pub use engine::{AnalysisRequest, Engine, PositionAnalysis};
pub use errors::{EngineError, EngineResult};
pub use models::black_scholes::{price_option, BlackScholes};
pub use models::implied_vol::{solve_implied_volatility, ImpliedVolSolver, VolEstimate};
pub use models::{Greeks, OptionType, PricingModel};
pub use payoff::{project_payoff, PayoffProjection, PayoffUnit};
pub use position::valuer::{compute_position_cost, value_position, PositionValuer};
pub use position::{MarketContext, OptionLeg, Position};
pub use simulation::{simulate_paths, SimulationRun};
