pub mod api;
pub mod client;
pub mod config;
pub mod session;
pub mod wire;

use log::LevelFilter;
use tokio::net::TcpListener;

use love_ledger_sdk::{LedgerService, RecordStore};

use config::ServerConfig;

pub use client::{ClientConfig, ClientError, LedgerApi, LedgerClient};
pub use session::{ContractForm, Notice, NoticeLevel, Screen, SessionController, SessionSnapshot};

// ============================================================================
// Logging
// ============================================================================

/// Install the `env_logger` backend. `RUST_LOG` directives, when set, are
/// applied on top of `level`.
pub fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("diesel", LevelFilter::Warn)
        .filter_module("rustls", LevelFilter::Warn)
        .parse_default_env()
        .try_init();
}

// ============================================================================
// Server
// ============================================================================

/// Serve the API on `listener` until ctrl-c.
pub async fn serve<S: RecordStore>(
    listener: TcpListener,
    ledger: LedgerService<S>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let app = api::router(ledger, &config.prefix, config.api_token.clone());
    let mount = if config.prefix.is_empty() {
        "/"
    } else {
        config.prefix.as_str()
    };
    log::info!(
        "server: listening on {} (api at {mount}, auth {})",
        listener.local_addr()?,
        if config.api_token.is_some() {
            "token"
        } else {
            "any bearer"
        }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server: stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("server: failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("server: shutdown requested");
}
