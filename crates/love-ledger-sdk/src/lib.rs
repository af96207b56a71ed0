pub mod chain;
pub mod chain_watcher;
pub mod contract;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod stats;
pub mod status;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Core types
pub use contract::{
    CONTRACT_PREFIX, Contract, RefundOption, Role, WALLET_PREFIX, contract_key, normalize_wallet,
    wallet_key,
};
pub use error::{Error, Result, ServiceError};
pub use status::{ContractStatus, DisplayStatus, OnChainStatus};

// Persistence
pub use store::{Commit, Expect, MemoryStore, Record, RecordStore, RecordWrite};

// Lifecycle and aggregates
pub use lifecycle::{MAX_CAS_ATTEMPTS, NewContract, VerifyOutcome};
pub use service::LedgerService;
pub use stats::{Stats, parse_amount};

// On-chain mirror
pub use chain::{
    NATIVE_DECIMALS, ObservedStatus, RelationshipChain, RelationshipInfo, TokenId, ZERO_ADDRESS,
    resolve_relationship, to_base_units,
};
pub use chain_watcher::{
    StatusEvent, StatusWatcherConfig, StatusWatcherHandle, WatchCmd, spawn_status_watcher,
};
