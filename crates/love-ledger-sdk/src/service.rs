//! `LedgerService` — async facade over the lifecycle and stats operations.
//!
//! The record store is synchronous (the SQLite store does blocking I/O), so
//! every call runs on `tokio::task::spawn_blocking` with the store locked.

use std::sync::{Arc, Mutex};

use crate::contract::Contract;
use crate::error::{Error, ServiceError};
use crate::lifecycle::{self, NewContract, VerifyOutcome};
use crate::stats::{self, Stats};
use crate::store::{MemoryStore, RecordStore};

pub struct LedgerService<S: RecordStore = MemoryStore> {
    store: Arc<Mutex<S>>,
}

impl<S: RecordStore> Clone for LedgerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    // ── Internal: spawn_blocking store helper ───────────────────────────

    /// Run a closure against the store on a blocking thread.
    ///
    /// The mutex is held for the whole closure, so operations on one service
    /// are serialized in-process; the store's CAS commit covers writers in
    /// other processes sharing the same database.
    async fn with_store<F, R>(&self, f: F) -> Result<R, ServiceError>
    where
        F: FnOnce(&mut S) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = store.lock().map_err(|_| ServiceError::MutexPoisoned)?;
            f(&mut guard).map_err(ServiceError::Ledger)
        })
        .await
        .map_err(|e| ServiceError::Task(e.to_string()))?
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub async fn create_contract(&self, request: NewContract) -> Result<Contract, ServiceError> {
        self.with_store(move |store| lifecycle::create(store, request))
            .await
    }

    pub async fn pair(
        &self,
        contract_id: &str,
        partner_wallet: &str,
    ) -> Result<Contract, ServiceError> {
        let (id, wallet) = (contract_id.to_string(), partner_wallet.to_string());
        self.with_store(move |store| lifecycle::pair(store, &id, &wallet))
            .await
    }

    pub async fn verify(
        &self,
        contract_id: &str,
        wallet: &str,
    ) -> Result<VerifyOutcome, ServiceError> {
        let (id, wallet) = (contract_id.to_string(), wallet.to_string());
        self.with_store(move |store| lifecycle::verify(store, &id, &wallet))
            .await
    }

    pub async fn unpair(&self, contract_id: &str, wallet: &str) -> Result<Contract, ServiceError> {
        let (id, wallet) = (contract_id.to_string(), wallet.to_string());
        self.with_store(move |store| lifecycle::unpair(store, &id, &wallet))
            .await
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn get_contract(&self, contract_id: &str) -> Result<Contract, ServiceError> {
        let id = contract_id.to_string();
        self.with_store(move |store| lifecycle::get_by_id(store, &id))
            .await
    }

    pub async fn get_contract_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<Contract>, ServiceError> {
        let wallet = wallet.to_string();
        self.with_store(move |store| lifecycle::get_by_wallet(store, &wallet))
            .await
    }

    pub async fn stats(&self) -> Result<Stats, ServiceError> {
        self.with_store(stats::get_stats::<S>).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ContractStatus;

    fn request() -> NewContract {
        NewContract {
            creator_wallet: "0xa11ce".into(),
            partner_wallet: "0xb0b".into(),
            amount: "1.5".into(),
            ..Default::default()
        }
    }

    #[test]
    fn service_is_clone_and_send() {
        fn assert_clone_send<T: Clone + Send + Sync>() {}
        assert_clone_send::<LedgerService>();
    }

    #[tokio::test]
    async fn operations_run_through_the_shared_store() {
        let service = LedgerService::new(MemoryStore::new());
        let other = service.clone();

        let created = service.create_contract(request()).await.unwrap();
        let paired = other.pair(&created.id, "0xb0b").await.unwrap();
        assert_eq!(paired.status, ContractStatus::Active);

        let by_wallet = service.get_contract_by_wallet("0xB0B").await.unwrap();
        assert_eq!(by_wallet.map(|c| c.id), Some(created.id.clone()));

        let stats = other.stats().await.unwrap();
        assert_eq!(stats.active_contracts, 1);
        assert_eq!(stats.total_locked, 1.5);
    }

    #[tokio::test]
    async fn ledger_errors_are_wrapped() {
        let service = LedgerService::new(MemoryStore::new());
        let err = service.get_contract("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::Ledger(Error::NotFound(_))));
        assert_eq!(err.to_string(), "contract not found: missing");
    }

    #[tokio::test]
    async fn concurrent_verifications_both_land() {
        let service = LedgerService::new(MemoryStore::new());
        let c = service.create_contract(request()).await.unwrap();
        service.pair(&c.id, "0xb0b").await.unwrap();

        let (a, b) = tokio::join!(
            service.verify(&c.id, "0xa11ce"),
            service.verify(&c.id, "0xb0b")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.both_verified ^ b.both_verified);

        let stored = service.get_contract(&c.id).await.unwrap();
        assert_eq!(stored.status, ContractStatus::Verified);
        assert!(stored.verified_creator && stored.verified_partner);
    }
}
