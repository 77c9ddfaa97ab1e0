use crate::errors::{EngineError, EngineResult};
use crate::models::implied_vol::SolverConfig;
use crate::payoff::{PayoffUnit, ProjectionConfig};
use crate::simulation::{RandomSource, SimulationConfig};

/// Engine settings, read from the environment (and `.env`) by the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppConfig {
    pub solver: SolverConfig,
    pub projection: ProjectionConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let initial_guess = parse_or(&lookup, "IV_INITIAL_GUESS", defaults.solver.initial_guess)?;
        let max_iterations = parse_or(&lookup, "IV_MAX_ITERATIONS", defaults.solver.max_iterations)?;
        let tolerance = parse_or(&lookup, "IV_TOLERANCE", defaults.solver.tolerance)?;
        let grid_step = parse_or(&lookup, "PAYOFF_GRID_STEP", defaults.projection.grid_step)?;
        let path_count = parse_or(&lookup, "MC_PATHS", defaults.simulation.path_count)?;
        let unit = parse_or(&lookup, "PAYOFF_UNIT", defaults.projection.unit)?;

        let random_source = match lookup("MC_SEED") {
            Some(raw) => RandomSource::Seeded(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| EngineError::Config(format!("MC_SEED: {e}")))?,
            ),
            None => RandomSource::Entropy,
        };

        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(initial_guess) || !positive(tolerance) || max_iterations == 0 {
            return Err(EngineError::Config(
                "IV_INITIAL_GUESS, IV_TOLERANCE and IV_MAX_ITERATIONS must be positive".into(),
            ));
        }
        if !positive(grid_step) {
            return Err(EngineError::Config(format!("PAYOFF_GRID_STEP must be positive, got {grid_step}")));
        }

        Ok(Self {
            solver: SolverConfig {
                initial_guess,
                max_iterations,
                tolerance,
            },
            projection: ProjectionConfig { grid_step, unit },
            simulation: SimulationConfig {
                path_count,
                random_source,
                unit,
                vol_override: None,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> EngineResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| EngineError::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}
