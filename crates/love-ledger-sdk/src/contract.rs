use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::status::ContractStatus;

/// Record-store key namespace for contract records.
pub const CONTRACT_PREFIX: &str = "contract_";
/// Record-store key namespace for the wallet → contract id index.
pub const WALLET_PREFIX: &str = "wallet_";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What happens to the locked funds if one party unpairs early.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundOption {
    /// Funds go to the partner who stayed committed.
    #[default]
    Refund,
    /// Funds are sent to the null address.
    Burn,
}

impl RefundOption {
    pub fn as_str(self) -> &'static str {
        match self {
            RefundOption::Refund => "refund",
            RefundOption::Burn => "burn",
        }
    }
}

impl std::str::FromStr for RefundOption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "refund" => Ok(RefundOption::Refund),
            "burn" => Ok(RefundOption::Burn),
            _ => Err(format!("invalid refund option: {s} (expected refund or burn)")),
        }
    }
}

/// Which side of a contract a wallet is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Partner,
}

/// A relationship contract as persisted under `contract_<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub creator_wallet: String,
    pub partner_wallet: String,
    pub amount: String,
    /// Days until expiry; `None` means the contract never expires.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub refund_option: RefundOption,
    pub status: ContractStatus,
    #[serde(default)]
    pub verified_creator: bool,
    #[serde(default)]
    pub verified_partner: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub paired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Contract {
    pub fn role_of(&self, wallet: &str) -> Option<Role> {
        let wallet = normalize_wallet(wallet);
        if wallet == self.creator_wallet {
            Some(Role::Creator)
        } else if wallet == self.partner_wallet {
            Some(Role::Partner)
        } else {
            None
        }
    }

    pub fn is_party(&self, wallet: &str) -> bool {
        self.role_of(wallet).is_some()
    }

    pub fn is_verified_by(&self, role: Role) -> bool {
        match role {
            Role::Creator => self.verified_creator,
            Role::Partner => self.verified_partner,
        }
    }

    pub fn both_verified(&self) -> bool {
        self.verified_creator && self.verified_partner
    }

    pub fn record_key(&self) -> String {
        contract_key(&self.id)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration
            .map(|days| self.created_at + Duration::days(i64::from(days)))
    }

    /// Whole days left before expiry, rounded up and never negative.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        let expires_at = self.expires_at()?;
        let left_ms = (expires_at - now).num_milliseconds();
        let days = (left_ms as f64 / DAY_MS as f64).ceil() as i64;
        Some(days.max(0))
    }

    /// Share of the duration already elapsed, in percent (0 without a duration).
    pub fn progress_percent(&self, now: DateTime<Utc>) -> f64 {
        let Some(days) = self.duration else {
            return 0.0;
        };
        let total_ms = i64::from(days) * DAY_MS;
        if total_ms == 0 {
            return 0.0;
        }
        let elapsed_ms = (now - self.created_at).num_milliseconds().max(0);
        (elapsed_ms as f64 / total_ms as f64 * 100.0).min(100.0)
    }

    pub fn days_since_created(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds().div_euclid(DAY_MS)
    }
}

/// Canonical form of a wallet address. `0x` hex addresses are
/// case-insensitive and are lowercased; anything else is only trimmed.
pub fn normalize_wallet(address: &str) -> String {
    let trimmed = address.trim();
    let is_hex_address = trimmed.len() > 2
        && (trimmed.starts_with("0x") || trimmed.starts_with("0X"))
        && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit());
    if is_hex_address {
        format!("0x{}", trimmed[2..].to_ascii_lowercase())
    } else {
        trimmed.to_string()
    }
}

pub fn contract_key(id: &str) -> String {
    format!("{CONTRACT_PREFIX}{id}")
}

pub fn wallet_key(address: &str) -> String {
    format!("{WALLET_PREFIX}{}", normalize_wallet(address))
}

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Contract id: creator wallet, creation time in millis, and a suffix made of
/// a process-wide sequence number plus random bytes, so rapid repeated calls
/// within the same millisecond still get distinct ids.
pub fn new_contract_id(creator_wallet: &str, now: DateTime<Utc>) -> String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut entropy = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut entropy);
    format!(
        "{}_{}_{seq:x}{}",
        normalize_wallet(creator_wallet),
        now.timestamp_millis(),
        hex::encode(entropy)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    fn sample(duration: Option<u32>) -> Contract {
        let created = Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap();
        Contract {
            id: "c1".into(),
            creator_wallet: "0xaaa1".into(),
            partner_wallet: "0xbbb2".into(),
            amount: "100".into(),
            duration,
            refund_option: RefundOption::Refund,
            status: ContractStatus::Pending,
            verified_creator: false,
            verified_partner: false,
            created_at: created,
            last_activity: created,
            paired: false,
            verified_at: None,
            terminated_by: None,
            terminated_at: None,
        }
    }

    #[test]
    fn json_shape_matches_wire_format() {
        let value = serde_json::to_value(sample(None)).unwrap();
        assert_eq!(value["creatorWallet"], "0xaaa1");
        assert_eq!(value["refundOption"], "refund");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["duration"], serde_json::Value::Null);
        assert_eq!(value["verifiedCreator"], false);
        assert!(value.get("verifiedAt").is_none());
        assert!(value.get("terminatedBy").is_none());

        let back: Contract = serde_json::from_value(value).unwrap();
        assert_eq!(back, sample(None));
    }

    #[test]
    fn roles_use_normalized_addresses() {
        let c = sample(None);
        assert_eq!(c.role_of(" 0xAAA1 "), Some(Role::Creator));
        assert_eq!(c.role_of("0xBBB2"), Some(Role::Partner));
        assert_eq!(c.role_of("0xccc3"), None);
        assert!(!c.is_party("bbb2"));
    }

    #[test]
    fn normalize_only_lowercases_hex_addresses() {
        assert_eq!(normalize_wallet("  0xAbCdEf "), "0xabcdef");
        assert_eq!(normalize_wallet("0XABC"), "0xabc");
        assert_eq!(normalize_wallet("Alice"), "Alice");
        assert_eq!(normalize_wallet("0xNotHex"), "0xNotHex");
        assert_eq!(wallet_key("0xABC"), "wallet_0xabc");
    }

    #[test]
    fn expiry_helpers() {
        let c = sample(Some(10));
        let start = c.created_at;
        assert_eq!(c.expires_at(), Some(start + Duration::days(10)));

        let now = start + Duration::days(2) + Duration::hours(1);
        assert_eq!(c.days_remaining(now), Some(8));
        assert_eq!(c.days_since_created(now), 2);
        let pct = c.progress_percent(now);
        assert!(pct > 20.0 && pct < 21.0, "{pct}");

        let later = start + Duration::days(30);
        assert_eq!(c.days_remaining(later), Some(0));
        assert_eq!(c.progress_percent(later), 100.0);
    }

    #[test]
    fn no_duration_means_no_expiry() {
        let c = sample(None);
        let now = c.created_at + Duration::days(400);
        assert_eq!(c.expires_at(), None);
        assert_eq!(c.days_remaining(now), None);
        assert_eq!(c.progress_percent(now), 0.0);
        assert_eq!(c.days_since_created(now), 400);
    }

    #[test]
    fn ids_are_unique_within_one_millisecond() {
        let now = Utc::now();
        let ids: HashSet<String> = (0..500).map(|_| new_contract_id("0xAAA", now)).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("0xaaa_")));
    }

    #[test]
    fn refund_option_parsing() {
        assert_eq!("Burn".parse::<RefundOption>().unwrap(), RefundOption::Burn);
        assert_eq!(" refund ".parse::<RefundOption>().unwrap(), RefundOption::Refund);
        assert!("keep".parse::<RefundOption>().is_err());
        assert_eq!(RefundOption::default(), RefundOption::Refund);
    }
}
