mod error;
mod models;
mod schema;
mod store;

pub use error::StoreError;
pub use store::{LedgerStore, MIGRATIONS};

pub type Result<T> = std::result::Result<T, StoreError>;
