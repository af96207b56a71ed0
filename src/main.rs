use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use love_ledger::config::{Cli, ServerConfig, Storage};
use love_ledger_sdk::{LedgerService, MemoryStore};
use love_ledger_store::LedgerStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_cli(Cli::parse()).context("invalid configuration")?;
    love_ledger::init_logging(config.log_level);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    match &config.storage {
        Storage::Memory => {
            log::warn!("server: using in-memory storage, records are lost on exit");
            let ledger = LedgerService::new(MemoryStore::new());
            love_ledger::serve(listener, ledger, &config).await?;
        }
        Storage::Sqlite(path) => {
            let path_str = path.to_string_lossy();
            let store = LedgerStore::open(&path_str)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            log::info!("server: using database {}", path.display());
            love_ledger::serve(listener, LedgerService::new(store), &config).await?;
        }
    }
    Ok(())
}
