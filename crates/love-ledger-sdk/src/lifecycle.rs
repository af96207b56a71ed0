//! Contract lifecycle: create, pair, verify, unpair and lookups.
//!
//! Every mutation is a compare-and-swap against the contract record's
//! version. On a conflicting concurrent write the record is re-read and the
//! transition re-applied to the fresh state, so concurrent calls never drop
//! each other's updates.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::contract::{
    Contract, RefundOption, Role, contract_key, new_contract_id, normalize_wallet, wallet_key,
};
use crate::error::{Error, Result};
use crate::status::ContractStatus;
use crate::store::{Commit, Expect, Record, RecordStore, RecordWrite};

/// Upper bound on read-modify-write rounds for a single operation.
pub const MAX_CAS_ATTEMPTS: usize = 8;

/// Input to [`create`].
#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub creator_wallet: String,
    pub partner_wallet: String,
    pub amount: String,
    /// Days; `None` or `Some(0)` means no expiry.
    pub duration: Option<u32>,
    pub refund_option: RefundOption,
}

/// Result of [`verify`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub contract: Contract,
    /// True only for the call that set the second verification flag.
    pub both_verified: bool,
}

enum Step<T> {
    /// Nothing to persist.
    Keep(T),
    /// Persist the updated contract, optionally pointing a wallet's index at it.
    Save {
        contract: Contract,
        index_wallet: Option<String>,
        outcome: T,
    },
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn decode_contract(record: &Record) -> Result<Contract> {
    serde_json::from_value(record.value.clone()).map_err(|e| Error::CorruptRecord {
        key: record.key.clone(),
        reason: e.to_string(),
    })
}

fn encode_contract(contract: &Contract) -> Result<Value> {
    serde_json::to_value(contract).map_err(|e| Error::CorruptRecord {
        key: contract.record_key(),
        reason: e.to_string(),
    })
}

fn load<S: RecordStore>(store: &mut S, contract_id: &str) -> Result<Option<(Contract, u64)>> {
    let Some(record) = store.get(&contract_key(contract_id)).map_err(Error::Store)? else {
        return Ok(None);
    };
    Ok(Some((decode_contract(&record)?, record.version)))
}

fn require_id(contract_id: &str) -> Result<&str> {
    let id = contract_id.trim();
    if id.is_empty() {
        return Err(Error::Validation("Missing required fields: contractId".into()));
    }
    Ok(id)
}

fn update_contract<S, T, F>(store: &mut S, contract_id: &str, mut apply: F) -> Result<(Contract, T)>
where
    S: RecordStore,
    F: FnMut(Contract) -> Result<Step<T>>,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let (current, version) =
            load(store, contract_id)?.ok_or_else(|| Error::NotFound(contract_id.to_string()))?;

        let (contract, index_wallet, outcome) = match apply(current.clone())? {
            Step::Keep(outcome) => return Ok((current, outcome)),
            Step::Save {
                contract,
                index_wallet,
                outcome,
            } => (contract, index_wallet, outcome),
        };

        let mut writes = vec![RecordWrite::new(
            contract.record_key(),
            encode_contract(&contract)?,
            Expect::Version(version),
        )];
        if let Some(wallet) = index_wallet {
            writes.push(RecordWrite::new(
                wallet_key(&wallet),
                Value::String(contract.id.clone()),
                Expect::Any,
            ));
        }

        match store.commit(writes).map_err(Error::Store)? {
            Commit::Applied => return Ok((contract, outcome)),
            Commit::Conflict { key } => {
                log::debug!("lifecycle: write conflict on {key} (attempt {attempt}), reloading");
            }
        }
    }
    log::warn!("lifecycle: giving up on {contract_id} after {MAX_CAS_ATTEMPTS} conflicts");
    Err(Error::Conflict(contract_id.to_string()))
}

/// Create a pending contract and index it under the creator's wallet.
///
/// The contract record and the index entry are committed as one batch.
pub fn create<S: RecordStore>(store: &mut S, request: NewContract) -> Result<Contract> {
    let creator = normalize_wallet(&request.creator_wallet);
    let partner = normalize_wallet(&request.partner_wallet);
    let amount = request.amount.trim().to_string();

    let missing: Vec<&str> = [
        ("creatorWallet", creator.is_empty()),
        ("partnerWallet", partner.is_empty()),
        ("amount", amount.is_empty()),
    ]
    .into_iter()
    .filter_map(|(name, is_missing)| is_missing.then_some(name))
    .collect();
    if !missing.is_empty() {
        return Err(Error::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }
    if creator == partner {
        return Err(Error::Validation(
            "creatorWallet and partnerWallet must be different wallets".into(),
        ));
    }

    for _ in 0..MAX_CAS_ATTEMPTS {
        let created_at = now();
        let contract = Contract {
            id: new_contract_id(&creator, created_at),
            creator_wallet: creator.clone(),
            partner_wallet: partner.clone(),
            amount: amount.clone(),
            duration: request.duration.filter(|days| *days > 0),
            refund_option: request.refund_option,
            status: ContractStatus::Pending,
            verified_creator: false,
            verified_partner: false,
            created_at,
            last_activity: created_at,
            paired: false,
            verified_at: None,
            terminated_by: None,
            terminated_at: None,
        };

        let writes = vec![
            RecordWrite::new(
                contract.record_key(),
                encode_contract(&contract)?,
                Expect::Absent,
            ),
            RecordWrite::new(
                wallet_key(&creator),
                Value::String(contract.id.clone()),
                Expect::Any,
            ),
        ];
        match store.commit(writes).map_err(Error::Store)? {
            Commit::Applied => {
                log::info!("lifecycle: contract {} created by {creator}", contract.id);
                return Ok(contract);
            }
            Commit::Conflict { key } => {
                log::warn!("lifecycle: contract id collision on {key}, drawing a new id");
            }
        }
    }
    Err(Error::Conflict(format!("new contract for {creator}")))
}

/// The designated partner accepts a pending contract.
pub fn pair<S: RecordStore>(
    store: &mut S,
    contract_id: &str,
    requesting_wallet: &str,
) -> Result<Contract> {
    let id = require_id(contract_id)?;
    let wallet = normalize_wallet(requesting_wallet);

    let (contract, ()) = update_contract(store, id, |mut c| {
        if wallet != c.partner_wallet {
            return Err(Error::Unauthorized("Unauthorized partner wallet".into()));
        }
        match c.status {
            ContractStatus::Pending => {
                c.paired = true;
                c.status = ContractStatus::Active;
                c.last_activity = now();
                Ok(Step::Save {
                    contract: c,
                    index_wallet: Some(wallet.clone()),
                    outcome: (),
                })
            }
            ContractStatus::Active => Ok(Step::Keep(())),
            status => Err(Error::InvalidState {
                status,
                operation: "pair",
            }),
        }
    })?;

    log::info!("lifecycle: contract {id} paired with {wallet}");
    Ok(contract)
}

/// Record one party's marriage verification.
///
/// Verifying again after one's own flag is set is a no-op success.
pub fn verify<S: RecordStore>(
    store: &mut S,
    contract_id: &str,
    requesting_wallet: &str,
) -> Result<VerifyOutcome> {
    let id = require_id(contract_id)?;
    let wallet = normalize_wallet(requesting_wallet);

    let (contract, both_verified) = update_contract(store, id, |mut c| {
        if matches!(
            c.status,
            ContractStatus::Pending | ContractStatus::Terminated
        ) {
            return Err(Error::InvalidState {
                status: c.status,
                operation: "verify",
            });
        }
        let role = c
            .role_of(&wallet)
            .ok_or_else(|| Error::Unauthorized("Unauthorized wallet".into()))?;
        if c.is_verified_by(role) {
            return Ok(Step::Keep(false));
        }

        let at = now();
        match role {
            Role::Creator => c.verified_creator = true,
            Role::Partner => c.verified_partner = true,
        }
        c.last_activity = at;
        let both = c.both_verified();
        if both {
            c.status = ContractStatus::Verified;
            c.verified_at = Some(at);
        }
        Ok(Step::Save {
            contract: c,
            index_wallet: None,
            outcome: both,
        })
    })?;

    if both_verified {
        log::info!("lifecycle: contract {id} fully verified");
    } else {
        log::info!("lifecycle: contract {id} verified by {wallet}");
    }
    Ok(VerifyOutcome {
        contract,
        both_verified,
    })
}

/// Terminate a pending or active contract. One-way.
pub fn unpair<S: RecordStore>(
    store: &mut S,
    contract_id: &str,
    requesting_wallet: &str,
) -> Result<Contract> {
    let id = require_id(contract_id)?;
    let wallet = normalize_wallet(requesting_wallet);

    let (contract, ()) = update_contract(store, id, |mut c| {
        if !c.is_party(&wallet) {
            return Err(Error::Unauthorized("Unauthorized wallet".into()));
        }
        if c.status.is_terminal() {
            return Err(Error::InvalidState {
                status: c.status,
                operation: "unpair",
            });
        }
        let at = now();
        c.status = ContractStatus::Terminated;
        c.terminated_by = Some(wallet.clone());
        c.terminated_at = Some(at);
        c.last_activity = at;
        Ok(Step::Save {
            contract: c,
            index_wallet: None,
            outcome: (),
        })
    })?;

    log::info!("lifecycle: contract {id} terminated by {wallet}");
    Ok(contract)
}

pub fn get_by_id<S: RecordStore>(store: &mut S, contract_id: &str) -> Result<Contract> {
    let id = require_id(contract_id)?;
    load(store, id)?
        .map(|(contract, _)| contract)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// The contract currently indexed for `wallet`, or `None` if there is none.
pub fn get_by_wallet<S: RecordStore>(store: &mut S, wallet: &str) -> Result<Option<Contract>> {
    let key = wallet_key(wallet);
    let Some(record) = store.get(&key).map_err(Error::Store)? else {
        return Ok(None);
    };
    let contract_id = record.value.as_str().ok_or_else(|| Error::CorruptRecord {
        key: key.clone(),
        reason: "index entry is not a contract id".into(),
    })?;

    let contract = load(store, contract_id)?.map(|(contract, _)| contract);
    if contract.is_none() {
        log::warn!("lifecycle: {key} points at missing contract {contract_id}");
    }
    Ok(contract)
}
