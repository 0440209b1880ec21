use color_eyre::Result;
use meshtastic_zigbee_bridge::{lifecycle, mesh::MeshtasticCli, BridgeConfig};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // Konfiguration einmalig laden, danach unveränderlich
    let config = BridgeConfig::load()?;
    setup_logging_env(config.log_level);
    config.log_summary();

    let shutdown = CancellationToken::new();
    lifecycle::listen_for_shutdown(shutdown.clone());

    let sender = MeshtasticCli::from_config(&config.radio);
    lifecycle::run(config, sender, shutdown).await?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

// RUST_LOG gewinnt, sonst LOG_LEVEL
fn setup_logging_env(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
