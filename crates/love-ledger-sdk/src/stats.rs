use serde::{Deserialize, Serialize};

use crate::contract::{CONTRACT_PREFIX, Contract};
use crate::error::{Error, Result};
use crate::status::ContractStatus;
use crate::store::RecordStore;

/// Aggregate counters over every stored contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_contracts: u64,
    pub active_contracts: u64,
    pub verified_contracts: u64,
    #[serde(default)]
    pub pending_contracts: u64,
    #[serde(default)]
    pub terminated_contracts: u64,
    /// Sum of `amount` over active contracts only.
    pub total_locked: f64,
    /// `contract_` records left out of every counter because they failed to decode.
    #[serde(default)]
    pub skipped_records: u64,
}

impl Stats {
    pub fn from_contracts<'a>(contracts: impl IntoIterator<Item = &'a Contract>) -> Self {
        let mut stats = Stats::default();
        for c in contracts {
            stats.total_contracts += 1;
            match c.status {
                ContractStatus::Pending => stats.pending_contracts += 1,
                ContractStatus::Active => {
                    stats.active_contracts += 1;
                    stats.total_locked += parse_amount(&c.amount);
                }
                ContractStatus::Verified => stats.verified_contracts += 1,
                ContractStatus::Terminated => stats.terminated_contracts += 1,
            }
        }
        stats
    }
}

/// Numeric value of a stored amount. Anything unparseable counts as zero.
pub fn parse_amount(amount: &str) -> f64 {
    amount
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Scan every `contract_` record. Records that fail to decode are logged and
/// counted in `skipped_records` rather than failing the whole aggregate.
pub fn get_stats<S: RecordStore>(store: &mut S) -> Result<Stats> {
    let records = store.scan_prefix(CONTRACT_PREFIX).map_err(Error::Store)?;
    let mut contracts = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for record in records {
        match serde_json::from_value::<Contract>(record.value) {
            Ok(contract) => contracts.push(contract),
            Err(e) => {
                log::warn!("stats: skipping undecodable record {}: {e}", record.key);
                skipped += 1;
            }
        }
    }
    Ok(Stats {
        skipped_records: skipped,
        ..Stats::from_contracts(&contracts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_parse_leniently() {
        assert_eq!(parse_amount("50"), 50.0);
        assert_eq!(parse_amount(" 0.25 "), 0.25);
        assert_eq!(parse_amount("1e2"), 100.0);
        assert_eq!(parse_amount("abc"), 0.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("inf"), 0.0);
        assert_eq!(parse_amount("NaN"), 0.0);
    }

    #[test]
    fn serializes_in_camel_case() {
        let stats = Stats {
            total_contracts: 2,
            active_contracts: 1,
            total_locked: 50.0,
            ..Default::default()
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["totalContracts"], 2);
        assert_eq!(value["activeContracts"], 1);
        assert_eq!(value["verifiedContracts"], 0);
        assert_eq!(value["totalLocked"], 50.0);
        assert_eq!(value["skippedRecords"], 0);

        let older: Stats = serde_json::from_value(serde_json::json!({
            "totalContracts": 1,
            "activeContracts": 1,
            "verifiedContracts": 0,
            "totalLocked": 5.0
        }))
        .unwrap();
        assert_eq!(older.skipped_records, 0);
    }

    #[test]
    fn undecodable_records_are_counted_as_skipped() {
        use crate::store::MemoryStore;
        use crate::testing::sample_request;

        let mut store = MemoryStore::new();
        crate::lifecycle::create(&mut store, sample_request()).unwrap();
        store
            .set("contract_broken", serde_json::json!({ "id": 7 }))
            .unwrap();
        store
            .set("contract_text", serde_json::Value::String("oops".into()))
            .unwrap();

        let stats = get_stats(&mut store).unwrap();
        assert_eq!(stats.total_contracts, 1);
        assert_eq!(stats.pending_contracts, 1);
        assert_eq!(stats.skipped_records, 2);
    }
}
