use br_options::{AnalysisRequest, AppConfig, Engine, EngineResult};
use std::io::Read;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    // Request from the file named by the first argument, else stdin
    let source = std::env::args().nth(1);
    if let Err(e) = run(&cfg, source.as_deref()) {
        tracing::error!("analysis failed: {e}");
        std::process::exit(1);
    }
}

fn run(cfg: &AppConfig, source: Option<&str>) -> EngineResult<()> {
    let raw = match source {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let request: AnalysisRequest = serde_json::from_str(&raw)?;
    let (position, ctx, calendar) = request.into_parts()?;
    tracing::info!(
        legs = position.legs.len(),
        days = ctx.days_to_expiry,
        holidays = calendar.holiday_count(),
        "request loaded"
    );

    let analysis = Engine::new(cfg).analyze(&position, &ctx, &calendar)?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}
