//! SENTINEL: a skeletal Binance trading client.
//!
//! Entry point. Initialises structured logging, loads configuration,
//! builds the exchange client and runs one trading session until Ctrl+C
//! or a session-ending failure.

use anyhow::Result;
use tracing::{error, info, warn};

use sentinel::config::{AppConfig, Credentials};
use sentinel::engine::session::{Session, SessionReport};
use sentinel::exchange::binance::BinanceClient;
use sentinel::signal::NeutralSignal;

const BANNER: &str = r#"
 ____  _____ _   _ _____ ___ _   _ _____ _
/ ___|| ____| \ | |_   _|_ _| \ | | ____| |
\___ \|  _| |  \| | | |  | ||  \| |  _| | |
 ___) | |___| |\  | | |  | || |\  | |___| |___
|____/|_____|_| \_| |_| |___|_| \_|_____|_____|

  Low-latency execution harness
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();
    println!("{BANNER}");

    let session = match bootstrap(&AppConfig::path_from_env()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = format!("{e:#}"), "Bootstrap failed");
            return Err(e);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let report = session.run(shutdown).await;
    log_report(&report);

    Ok(())
}

/// Load configuration from `config_path` and build the session on it.
fn bootstrap(config_path: &str) -> Result<Session> {
    let cfg = AppConfig::load(config_path)?;
    info!(
        session = %cfg.session.name,
        config = %config_path,
        symbol = %cfg.trading.symbol,
        market_type = ?cfg.exchange.market_type,
        poll_interval_ms = cfg.session.poll_interval_ms,
        dry_run = cfg.trading.dry_run,
        "SENTINEL starting up"
    );

    let credentials = match cfg.credentials() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "API credentials missing, signed requests will be refused");
            Credentials::new("", "")
        }
    };

    let exchange = BinanceClient::new(credentials, &cfg.exchange)?;
    info!(base_url = exchange.base_url(), "Binance client ready");

    Ok(Session::new(
        Box::new(exchange),
        Box::new(NeutralSignal::new()),
        &cfg,
    ))
}

fn log_report(report: &SessionReport) {
    info!(
        exit = %report.exit,
        ticks = report.ticks(),
        orders = report.orders_placed(),
        position = %report.final_position(),
        last_price = ?report.state.last_price(),
        elapsed_secs = format!("{:.1}", report.elapsed.as_secs_f64()),
        "SENTINEL shut down."
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sentinel=info"));

    let json_logging = std::env::var("SENTINEL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
